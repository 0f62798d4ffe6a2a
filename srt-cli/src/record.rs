//! Length-prefixed packet records
//!
//! The encrypted stream is a sequence of records, each a big-endian `u32`
//! length followed by one packet (data or keying material).

use bytes::{BufMut, BytesMut};
use std::io::{self, Read, Write};

/// Largest record accepted when reading
pub const MAX_RECORD_LEN: usize = 65_536 + 64;

/// Write one packet as a record
pub fn write_record<W: Write>(writer: &mut W, packet: &[u8]) -> io::Result<()> {
    let len = u32::try_from(packet.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "record too large"))?;
    let mut buf = BytesMut::with_capacity(4 + packet.len());
    buf.put_u32(len);
    buf.put_slice(packet);
    writer.write_all(&buf)
}

/// Read the next record into `buf`
///
/// Returns `Ok(false)` on a clean end of stream.
pub fn read_record<R: Read>(reader: &mut R, buf: &mut Vec<u8>) -> io::Result<bool> {
    let mut header = [0u8; 4];
    let mut filled = 0;
    while filled < header.len() {
        match reader.read(&mut header[filled..]) {
            Ok(0) if filled == 0 => return Ok(false),
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "truncated record header",
                ))
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }

    let len = u32::from_be_bytes(header) as usize;
    if len > MAX_RECORD_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("record of {} bytes (max {})", len, MAX_RECORD_LEN),
        ));
    }
    buf.resize(len, 0);
    reader.read_exact(buf)?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_records_in_sequence() {
        let mut stream = Vec::new();
        write_record(&mut stream, b"first").unwrap();
        write_record(&mut stream, b"").unwrap();
        write_record(&mut stream, b"third record").unwrap();
        assert_eq!(&stream[..4], &[0, 0, 0, 5]);

        let mut reader = Cursor::new(stream);
        let mut buf = Vec::new();
        let mut seen = Vec::new();
        while read_record(&mut reader, &mut buf).unwrap() {
            seen.push(buf.clone());
        }
        assert_eq!(
            seen,
            vec![b"first".to_vec(), Vec::new(), b"third record".to_vec()]
        );
    }

    #[test]
    fn test_truncated_record() {
        let mut stream = Vec::new();
        write_record(&mut stream, b"cut short").unwrap();
        stream.truncate(8);

        let mut buf = Vec::new();
        let err = read_record(&mut Cursor::new(stream), &mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);

        let err = read_record(&mut Cursor::new(vec![0u8, 0]), &mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_oversized_record() {
        let stream = u32::MAX.to_be_bytes().to_vec();
        let mut buf = Vec::new();
        let err = read_record(&mut Cursor::new(stream), &mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }
}
