//! Keying Material (KM) messages
//!
//! A KM message announces one wrapped SEK. The byte layout is fixed so that
//! independent sender and receiver implementations interoperate:
//!
//! ```text
//!  0               1               2               3
//! +-+-----+-------+---------------+---------------+-----------+---+
//! |0|Vers |PT = 2 |         Sign (0x2029)         |   resv    |KK |
//! +-+-----+-------+---------------+---------------+-----------+---+
//! |                          Generation                           |
//! +---------------+---------------+---------------+---------------+
//! |    Cipher     |     Auth      |      SE       |     resv      |
//! +---------------+---------------+---------------+---------------+
//! |             resv              |   SLen / 4    |   KLen / 4    |
//! +---------------+---------------+---------------+---------------+
//! |                         Salt (16 bytes)                       |
//! +---------------------------------------------------------------+
//! |               Wrapped key (KLen + 8 bytes)                    |
//! +---------------------------------------------------------------+
//! ```

use crate::backend::{CipherMode, KEY_LENGTHS, SALT_LEN};
use crate::epoch::{KeyFlags, Parity};
use crate::error::{CryptoError, Result};
use crate::keywrap::{self, WRAP_OVERHEAD};
use crate::secret::{KeyMaterial, Secret};
use crate::transport::{parse_common_header, put_common_header, MessageType};
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Fixed header length before the salt
pub const KM_HEADER_LEN: usize = 16;

/// Longest KM message (32-byte key)
pub const KM_MAX_LEN: usize = KM_HEADER_LEN + SALT_LEN + 32 + WRAP_OVERHEAD;

/// Auth field value for AES-GCM
const KM_AUTH_GCM: u8 = 1;

/// One announced stream encrypting key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KmMessage {
    /// Slot the key goes into
    pub parity: Parity,
    /// Monotonic key generation counter
    pub generation: u32,
    /// Cipher the key is meant for
    pub cipher: CipherMode,
    /// Stream encapsulation (1 standalone, 2 SRT)
    pub stream_encapsulation: u8,
    /// Salt for IV and (for passphrases) KEK derivation
    pub salt: [u8; SALT_LEN],
    /// RFC 3394 wrapped key, `key_len + 8` bytes
    pub wrapped_key: Bytes,
}

impl KmMessage {
    /// Wrap `sek` under a KEK derived from `secret` and build the message
    pub fn seal(
        secret: &Secret,
        sek: &KeyMaterial,
        parity: Parity,
        generation: u32,
        cipher: CipherMode,
        stream_encapsulation: u8,
        salt: [u8; SALT_LEN],
    ) -> Result<Self> {
        let kek = secret.derive_kek(&salt, sek.len())?;
        let wrapped_key = keywrap::wrap(&kek, sek)?;

        Ok(KmMessage {
            parity,
            generation,
            cipher,
            stream_encapsulation,
            salt,
            wrapped_key,
        })
    }

    /// Unwrap the announced SEK with a KEK derived from `secret`
    pub fn open(&self, secret: &Secret) -> Result<KeyMaterial> {
        let kek = secret.derive_kek(&self.salt, self.key_len())?;
        keywrap::unwrap(&kek, &self.wrapped_key)
    }

    /// Length of the announced SEK
    pub fn key_len(&self) -> usize {
        self.wrapped_key.len().saturating_sub(WRAP_OVERHEAD)
    }

    /// Encoded size in bytes
    pub fn size(&self) -> usize {
        KM_HEADER_LEN + SALT_LEN + self.wrapped_key.len()
    }

    /// Serialize (network byte order)
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.size());
        put_common_header(&mut buf, MessageType::KeyingMaterial, self.parity.key_flags());
        buf.put_u32(self.generation);
        buf.put_u8(self.cipher.as_u8());
        buf.put_u8(if self.cipher.is_authenticated() {
            KM_AUTH_GCM
        } else {
            0
        });
        buf.put_u8(self.stream_encapsulation);
        buf.put_u8(0);
        buf.put_u16(0);
        buf.put_u8((SALT_LEN / 4) as u8);
        buf.put_u8((self.key_len() / 4) as u8);
        buf.put_slice(&self.salt);
        buf.put_slice(&self.wrapped_key);
        buf.freeze()
    }

    /// Parse and validate a message
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < KM_HEADER_LEN {
            return Err(CryptoError::MalformedMessage("KM message shorter than header"));
        }

        let (msg_type, flags) = parse_common_header(bytes)?;
        if msg_type != MessageType::KeyingMaterial {
            return Err(CryptoError::MalformedMessage("not a KM message"));
        }
        let parity = Parity::from_key_flags(flags)
            .ok_or(CryptoError::MalformedMessage("KM message must name exactly one key"))?;

        let mut buf = &bytes[4..];
        let generation = buf.get_u32();
        let cipher_code = buf.get_u8();
        let auth = buf.get_u8();
        let stream_encapsulation = buf.get_u8();
        buf.advance(3);
        let salt_len = buf.get_u8() as usize * 4;
        let key_len = buf.get_u8() as usize * 4;

        let cipher = CipherMode::from_u8(cipher_code).ok_or_else(|| {
            CryptoError::KmRejected(format!("unknown cipher code {}", cipher_code))
        })?;
        let expected_auth = if cipher.is_authenticated() {
            KM_AUTH_GCM
        } else {
            0
        };
        if auth != expected_auth {
            return Err(CryptoError::MalformedMessage("KM auth field does not match cipher"));
        }
        if salt_len != SALT_LEN {
            return Err(CryptoError::MalformedMessage("KM salt length"));
        }
        if !KEY_LENGTHS.contains(&key_len) {
            return Err(CryptoError::MalformedMessage("KM key length"));
        }
        if buf.remaining() != SALT_LEN + key_len + WRAP_OVERHEAD {
            return Err(CryptoError::MalformedMessage("KM message length"));
        }

        let mut salt = [0u8; SALT_LEN];
        buf.copy_to_slice(&mut salt);
        let wrapped_key = Bytes::copy_from_slice(buf);

        Ok(KmMessage {
            parity,
            generation,
            cipher,
            stream_encapsulation,
            salt,
            wrapped_key,
        })
    }

    /// Whether `bytes` starts like a KM message (standalone dispatch)
    pub fn is_km(bytes: &[u8]) -> bool {
        matches!(
            parse_common_header(bytes),
            Ok((MessageType::KeyingMaterial, _))
        )
    }
}
