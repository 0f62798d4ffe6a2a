//! Packet prefix layouts
//!
//! Every encrypted packet carries a prefix naming the key parity and the
//! packet index (pki) the IV was built from. Two layouts exist:
//!
//! - **Standalone**: an 8-byte message header owned by this engine, used when
//!   media and keying material share a plain datagram channel.
//!
//!   ```text
//!    0               1               2               3
//!   +-+-----+-------+---------------+---------------+-----------+---+
//!   |0| Ver |  PT   |         Sign (0x2029)         |   resv    |KK |
//!   +-+-----+-------+---------------+---------------+-----------+---+
//!   |                     Packet index (pki)                        |
//!   +---------------------------------------------------------------+
//!   ```
//!
//! - **FramedBySession**: the 16-byte SRT data packet header. The pki is the
//!   31-bit sequence number and the key flags sit in bits 27-28 of the
//!   message number word.

use crate::epoch::KeyFlags;
use crate::error::{CryptoError, Result};
use bytes::{Buf, BufMut};

/// Standalone message header length
pub const STANDALONE_PREFIX_LEN: usize = 8;

/// SRT data packet header length
pub const SRT_PREFIX_LEN: usize = 16;

/// Longest prefix of any layout
pub const MAX_PREFIX_LEN: usize = SRT_PREFIX_LEN;

/// Message format version
pub const MSG_VERSION: u8 = 1;

/// Vendor signature ("HAI" PnP id)
pub const MSG_SIGN: u16 = 0x2029;

/// SRT control packet flag (bit 31 of the first header word)
const SRT_CONTROL_FLAG: u32 = 0x8000_0000;

/// SRT 31-bit sequence number mask
const SRT_SEQ_MASK: u32 = 0x7FFF_FFFF;

/// Shift of the key flags in the SRT message number word
const SRT_KK_SHIFT: u32 = 27;

/// Retransmitted flag in the SRT message number word (changes on resend)
const SRT_REXMIT_FLAG: u32 = 1 << 26;

/// Message type of a standalone datagram
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    /// Encrypted (or clear) media payload
    Media = 1,
    /// Keying material announcement
    KeyingMaterial = 2,
}

impl MessageType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(MessageType::Media),
            2 => Some(MessageType::KeyingMaterial),
            _ => None,
        }
    }

    /// First header byte: version in bits 4-6, type in bits 0-3
    pub fn header_byte(self) -> u8 {
        (MSG_VERSION << 4) | self as u8
    }
}

/// Parse the 4-byte common header of a standalone message
pub fn parse_common_header(bytes: &[u8]) -> Result<(MessageType, KeyFlags)> {
    if bytes.len() < 4 {
        return Err(CryptoError::MalformedMessage("message shorter than header"));
    }
    let mut buf = &bytes[..4];
    let first = buf.get_u8();
    let sign = buf.get_u16();
    let kk = buf.get_u8();

    if first & 0x80 != 0 || (first >> 4) & 0x07 != MSG_VERSION {
        return Err(CryptoError::MalformedMessage("unsupported message version"));
    }
    if sign != MSG_SIGN {
        return Err(CryptoError::MalformedMessage("bad message signature"));
    }
    let msg_type = MessageType::from_u8(first & 0x0F)
        .ok_or(CryptoError::MalformedMessage("unknown message type"))?;

    Ok((msg_type, KeyFlags::from_bits(kk & 0x03)))
}

/// Write the 4-byte common header of a standalone message
pub fn put_common_header(buf: &mut impl BufMut, msg_type: MessageType, flags: KeyFlags) {
    buf.put_u8(msg_type.header_byte());
    buf.put_u16(MSG_SIGN);
    buf.put_u8(flags.bits());
}

/// How packets are framed on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportMode {
    /// Engine-owned 8-byte header, keying material travels inline
    #[default]
    Standalone,
    /// SRT data header, keying material travels as session control messages
    FramedBySession,
}

impl TransportMode {
    /// Prefix length for this layout
    pub fn prefix_len(self) -> usize {
        match self {
            TransportMode::Standalone => STANDALONE_PREFIX_LEN,
            TransportMode::FramedBySession => SRT_PREFIX_LEN,
        }
    }

    /// Stream encapsulation code carried in keying material
    pub fn stream_encapsulation(self) -> u8 {
        match self {
            TransportMode::Standalone => 1,
            TransportMode::FramedBySession => 2,
        }
    }

    /// Mask of the packet index space
    pub fn pki_mask(self) -> u32 {
        match self {
            TransportMode::Standalone => u32::MAX,
            TransportMode::FramedBySession => SRT_SEQ_MASK,
        }
    }

    /// Whether `pki` comes strictly after `last` in the wrapping index space
    pub fn pki_after(self, pki: u32, last: u32) -> bool {
        let mask = self.pki_mask();
        let distance = pki.wrapping_sub(last) & mask;
        distance != 0 && distance <= mask / 2
    }

    fn check_len(self, prefix: &[u8]) -> Result<()> {
        if prefix.len() < self.prefix_len() {
            return Err(CryptoError::MalformedMessage("packet shorter than prefix"));
        }
        Ok(())
    }

    /// Packet index carried by `prefix`
    pub fn read_pki(self, prefix: &[u8]) -> Result<u32> {
        self.check_len(prefix)?;
        match self {
            TransportMode::Standalone => {
                let (msg_type, _) = parse_common_header(prefix)?;
                if msg_type != MessageType::Media {
                    return Err(CryptoError::MalformedMessage("not a media message"));
                }
                Ok((&prefix[4..8]).get_u32())
            }
            TransportMode::FramedBySession => {
                let seq = (&prefix[0..4]).get_u32();
                if seq & SRT_CONTROL_FLAG != 0 {
                    return Err(CryptoError::MalformedMessage("SRT control packet"));
                }
                Ok(seq & SRT_SEQ_MASK)
            }
        }
    }

    /// Key flags carried by `prefix`
    pub fn read_key_flags(self, prefix: &[u8]) -> Result<KeyFlags> {
        self.check_len(prefix)?;
        match self {
            TransportMode::Standalone => Ok(parse_common_header(prefix)?.1),
            TransportMode::FramedBySession => {
                let msgno = (&prefix[4..8]).get_u32();
                Ok(KeyFlags::from_bits(((msgno >> SRT_KK_SHIFT) & 0x03) as u8))
            }
        }
    }

    /// Stamp `flags` into an existing prefix
    pub fn write_key_flags(self, prefix: &mut [u8], flags: KeyFlags) -> Result<()> {
        self.check_len(prefix)?;
        match self {
            TransportMode::Standalone => {
                prefix[3] = (prefix[3] & !0x03) | flags.bits();
            }
            TransportMode::FramedBySession => {
                let mut msgno = (&prefix[4..8]).get_u32();
                msgno &= !(0x03 << SRT_KK_SHIFT);
                msgno |= (flags.bits() as u32) << SRT_KK_SHIFT;
                (&mut prefix[4..8]).put_u32(msgno);
            }
        }
        Ok(())
    }

    /// Build a complete prefix for a session-sequenced packet
    ///
    /// The SRT layout only gets its sequence number and key flags filled in;
    /// the session owns the remaining header fields.
    pub fn write_prefix(self, prefix: &mut [u8], flags: KeyFlags, pki: u32) -> Result<()> {
        self.check_len(prefix)?;
        match self {
            TransportMode::Standalone => {
                let mut buf = &mut prefix[..STANDALONE_PREFIX_LEN];
                put_common_header(&mut buf, MessageType::Media, flags);
                buf.put_u32(pki);
            }
            TransportMode::FramedBySession => {
                let mut buf = &mut prefix[..SRT_PREFIX_LEN];
                buf.put_u32(pki & SRT_SEQ_MASK);
                buf.put_u32(((flags.bits() as u32) << SRT_KK_SHIFT) | (0b11 << 30));
                buf.put_u32(0);
                buf.put_u32(0);
            }
        }
        Ok(())
    }

    /// Additional authenticated data for `prefix`
    ///
    /// The SRT retransmission flag is masked out: a resent packet keeps its
    /// ciphertext but flips that bit.
    pub fn aad(self, prefix: &[u8]) -> PrefixAad {
        let len = self.prefix_len().min(prefix.len());
        let mut aad = PrefixAad {
            bytes: [0u8; MAX_PREFIX_LEN],
            len,
        };
        aad.bytes[..len].copy_from_slice(&prefix[..len]);
        if self == TransportMode::FramedBySession && len == SRT_PREFIX_LEN {
            let msgno = (&aad.bytes[4..8]).get_u32() & !SRT_REXMIT_FLAG;
            (&mut aad.bytes[4..8]).put_u32(msgno);
        }
        aad
    }
}

/// Copy of a prefix as authenticated by AEAD modes
#[derive(Debug, Clone, Copy)]
pub struct PrefixAad {
    bytes: [u8; MAX_PREFIX_LEN],
    len: usize,
}

impl PrefixAad {
    pub fn as_slice(&self) -> &[u8] {
        &self.bytes[..self.len]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standalone_prefix_layout() {
        let mut prefix = [0u8; STANDALONE_PREFIX_LEN];
        TransportMode::Standalone
            .write_prefix(&mut prefix, KeyFlags::ODD, 0x0A0B_0C0D)
            .unwrap();

        assert_eq!(prefix, [0x11, 0x20, 0x29, 0x02, 0x0A, 0x0B, 0x0C, 0x0D]);
        assert_eq!(TransportMode::Standalone.read_pki(&prefix).unwrap(), 0x0A0B_0C0D);
        assert_eq!(
            TransportMode::Standalone.read_key_flags(&prefix).unwrap(),
            KeyFlags::ODD
        );
    }

    #[test]
    fn test_standalone_rejects_foreign_header() {
        let mut prefix = [0x11, 0x20, 0x29, 0x01, 0, 0, 0, 1];
        prefix[1] = 0x30;
        assert!(matches!(
            TransportMode::Standalone.read_pki(&prefix),
            Err(CryptoError::MalformedMessage(_))
        ));

        let km_header = [0x12, 0x20, 0x29, 0x01, 0, 0, 0, 1];
        assert!(matches!(
            TransportMode::Standalone.read_pki(&km_header),
            Err(CryptoError::MalformedMessage(_))
        ));

        assert!(TransportMode::Standalone.read_pki(&[0x11, 0x20]).is_err());
    }

    #[test]
    fn test_srt_header_key_flags() {
        // seq 1000, msgno word: boundary solo, in-order, message 77
        let mut header = [0u8; SRT_PREFIX_LEN];
        (&mut header[0..4]).put_u32(1000);
        (&mut header[4..8]).put_u32(0xE000_004D);

        let srt = TransportMode::FramedBySession;
        assert_eq!(srt.read_key_flags(&header).unwrap(), KeyFlags::NONE);

        srt.write_key_flags(&mut header, KeyFlags::EVEN).unwrap();
        assert_eq!(srt.read_key_flags(&header).unwrap(), KeyFlags::EVEN);
        assert_eq!((&header[4..8]).get_u32(), 0xE800_004D);

        srt.write_key_flags(&mut header, KeyFlags::ODD).unwrap();
        assert_eq!((&header[4..8]).get_u32(), 0xF000_004D);
        assert_eq!(srt.read_pki(&header).unwrap(), 1000);
    }

    #[test]
    fn test_srt_rejects_control_packet() {
        let mut header = [0u8; SRT_PREFIX_LEN];
        (&mut header[0..4]).put_u32(0x8002_0000);
        assert!(matches!(
            TransportMode::FramedBySession.read_pki(&header),
            Err(CryptoError::MalformedMessage(_))
        ));
    }

    #[test]
    fn test_srt_aad_ignores_retransmit_flag() {
        let srt = TransportMode::FramedBySession;
        let mut header = [0u8; SRT_PREFIX_LEN];
        srt.write_prefix(&mut header, KeyFlags::EVEN, 5).unwrap();
        let original = srt.aad(&header);

        header[4] |= 0x04;
        assert_eq!(srt.aad(&header).as_slice(), original.as_slice());

        header[0] ^= 0x01;
        assert_ne!(srt.aad(&header).as_slice(), original.as_slice());
    }

    #[test]
    fn test_pki_after_wraps() {
        let sa = TransportMode::Standalone;
        assert!(sa.pki_after(1, 0));
        assert!(!sa.pki_after(0, 0));
        assert!(!sa.pki_after(0, 1));
        assert!(sa.pki_after(2, u32::MAX));

        let srt = TransportMode::FramedBySession;
        assert!(srt.pki_after(0, SRT_SEQ_MASK));
        assert!(!srt.pki_after(SRT_SEQ_MASK, 0));
    }
}
