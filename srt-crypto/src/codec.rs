//! Packet encryption and decryption under one key
//!
//! The codec owns the cipher backend and the prefix layout. It checks the
//! payload bounds and the packet index, stamps the key flags, and hands the
//! payload to the backend. Key selection stays with the epoch.

use crate::backend::{Cipher, PacketKey};
use crate::epoch::{KeyFlags, Sek};
use crate::error::{CryptoError, Result};
use crate::transport::TransportMode;

/// Prefix-aware packet codec
#[derive(Debug)]
pub struct PacketCodec {
    cipher: Box<dyn Cipher>,
    transport: TransportMode,
    data_max_len: usize,
}

impl PacketCodec {
    pub fn new(cipher: Box<dyn Cipher>, transport: TransportMode, data_max_len: usize) -> Self {
        PacketCodec {
            cipher,
            transport,
            data_max_len,
        }
    }

    pub fn cipher(&self) -> &dyn Cipher {
        self.cipher.as_ref()
    }

    pub fn transport(&self) -> TransportMode {
        self.transport
    }

    pub fn prefix_len(&self) -> usize {
        self.transport.prefix_len()
    }

    pub fn data_max_len(&self) -> usize {
        self.data_max_len
    }

    /// Bytes the cipher may add to a payload
    pub fn overhead(&self) -> usize {
        self.cipher.overhead()
    }

    /// Largest packet (prefix, payload and cipher overhead) the codec emits
    pub fn max_packet_len(&self) -> usize {
        self.prefix_len() + self.data_max_len + self.overhead()
    }

    /// Reject payloads longer than the configured maximum
    pub fn check_payload(&self, len: usize) -> Result<()> {
        if len > self.data_max_len {
            return Err(CryptoError::PayloadTooLarge {
                size: len,
                max: self.data_max_len,
            });
        }
        Ok(())
    }

    /// Reject a packet index not strictly after the last one used with `sek`
    pub fn check_sequence(&self, sek: &Sek, pki: u32) -> Result<()> {
        match sek.last_pki() {
            Some(last) if !self.transport.pki_after(pki, last) => {
                Err(CryptoError::SequenceReuse { pki })
            }
            _ => Ok(()),
        }
    }

    /// Encrypt `payload[..len]` in place under `sek`
    ///
    /// The packet index is read from `prefix` and the key flags written into
    /// it before the prefix is authenticated. `payload` needs room for
    /// `len + overhead()` bytes. Returns the ciphertext length.
    pub fn encrypt(
        &self,
        sek: &Sek,
        prefix: &mut [u8],
        payload: &mut [u8],
        len: usize,
    ) -> Result<usize> {
        self.check_payload(len)?;
        let pki = self.transport.read_pki(prefix)?;
        self.check_sequence(sek, pki)?;

        self.transport
            .write_key_flags(prefix, sek.parity().key_flags())?;
        let aad = self.transport.aad(prefix);

        let key = PacketKey {
            key: sek.key().as_slice(),
            salt: sek.salt(),
        };
        let out_len = self
            .cipher
            .encrypt(key, pki, aad.as_slice(), payload, len)?;

        tracing::trace!(
            "Encrypted packet {} under {:?} key ({} -> {} bytes)",
            pki,
            sek.parity(),
            len,
            out_len
        );
        Ok(out_len)
    }

    /// Decrypt `payload` in place under `sek`, returning the plaintext length
    pub fn decrypt(&self, sek: &Sek, prefix: &[u8], payload: &mut [u8]) -> Result<usize> {
        let pki = self.transport.read_pki(prefix)?;
        let aad = self.transport.aad(prefix);

        let key = PacketKey {
            key: sek.key().as_slice(),
            salt: sek.salt(),
        };
        let plain_len = self.cipher.decrypt(key, pki, aad.as_slice(), payload)?;

        tracing::trace!(
            "Decrypted packet {} under {:?} key ({} bytes)",
            pki,
            sek.parity(),
            plain_len
        );
        Ok(plain_len)
    }

    /// Mark a packet as clear (crypto disabled)
    pub fn mark_clear(&self, prefix: &mut [u8], len: usize) -> Result<()> {
        self.check_payload(len)?;
        self.transport.write_key_flags(prefix, KeyFlags::NONE)
    }
}
