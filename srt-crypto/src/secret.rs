//! Pre-shared secrets and Key Encrypting Key derivation

use crate::backend::{KEY_LENGTHS, MAX_KEY_LEN, SALT_LEN};
use crate::error::{CryptoError, Result};
use crate::ring_impl::pbkdf2_sha1;
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

/// Maximum secret length in bytes
pub const SECRET_MAX_LEN: usize = 80;

/// Minimum passphrase length accepted by SRT
pub const PASSPHRASE_MIN_LEN: usize = 10;

/// PBKDF2 salt length: the low-order 64 bits of the SEK salt
pub const PBKDF2_SALT_LEN: usize = 8;

/// How the KEK is obtained from the secret
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecretKind {
    /// No secret (crypto disabled)
    None,
    /// Raw key used directly as KEK
    Preshared,
    /// Password stretched with PBKDF2
    Passphrase,
}

/// Pre-shared secret for a session
///
/// The bytes are wiped on drop and never appear in `Debug` output.
#[derive(Clone)]
pub struct Secret {
    kind: SecretKind,
    bytes: Zeroizing<Vec<u8>>,
}

impl Secret {
    /// Empty secret, for contexts with crypto disabled
    pub fn none() -> Self {
        Secret {
            kind: SecretKind::None,
            bytes: Zeroizing::new(Vec::new()),
        }
    }

    /// Raw key used as KEK (must be at least the configured key length)
    pub fn preshared(key: &[u8]) -> Result<Self> {
        if key.len() > SECRET_MAX_LEN {
            return Err(CryptoError::ConfigInvalid(format!(
                "preshared key of {} bytes (max {})",
                key.len(),
                SECRET_MAX_LEN
            )));
        }
        if key.len() < KEY_LENGTHS[0] {
            return Err(CryptoError::ConfigInvalid(format!(
                "preshared key of {} bytes (min {})",
                key.len(),
                KEY_LENGTHS[0]
            )));
        }
        Ok(Secret {
            kind: SecretKind::Preshared,
            bytes: Zeroizing::new(key.to_vec()),
        })
    }

    /// Password for PBKDF2 derivation (10 to 80 bytes)
    pub fn passphrase(password: impl AsRef<[u8]>) -> Result<Self> {
        let password = password.as_ref();
        if !(PASSPHRASE_MIN_LEN..=SECRET_MAX_LEN).contains(&password.len()) {
            return Err(CryptoError::ConfigInvalid(format!(
                "passphrase of {} bytes (expected {}..={})",
                password.len(),
                PASSPHRASE_MIN_LEN,
                SECRET_MAX_LEN
            )));
        }
        Ok(Secret {
            kind: SecretKind::Passphrase,
            bytes: Zeroizing::new(password.to_vec()),
        })
    }

    pub fn kind(&self) -> SecretKind {
        self.kind
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Derive the KEK for a SEK of `key_len` bytes announced with `salt`
    ///
    /// Preshared secrets are truncated to `key_len`. Passphrases go through
    /// PBKDF2-HMAC-SHA1 (2048 iterations) salted with the last 8 bytes of
    /// `salt`, so the KEK follows every salt change.
    pub fn derive_kek(&self, salt: &[u8; SALT_LEN], key_len: usize) -> Result<KeyMaterial> {
        if !KEY_LENGTHS.contains(&key_len) {
            return Err(CryptoError::ConfigInvalid(format!(
                "key length {} (expected 16, 24 or 32)",
                key_len
            )));
        }

        match self.kind {
            SecretKind::None => Err(CryptoError::ConfigInvalid(
                "no secret configured".to_string(),
            )),
            SecretKind::Preshared => {
                if self.bytes.len() < key_len {
                    return Err(CryptoError::ConfigInvalid(format!(
                        "preshared key of {} bytes is shorter than key length {}",
                        self.bytes.len(),
                        key_len
                    )));
                }
                KeyMaterial::from_slice(&self.bytes[..key_len])
            }
            SecretKind::Passphrase => {
                let mut kek = KeyMaterial::zeroed(key_len)?;
                pbkdf2_sha1(
                    &self.bytes,
                    &salt[SALT_LEN - PBKDF2_SALT_LEN..],
                    kek.as_mut_slice(),
                );
                Ok(kek)
            }
        }
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Secret")
            .field("kind", &self.kind)
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// Fixed-capacity key bytes (SEK or KEK), wiped on drop
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct KeyMaterial {
    bytes: [u8; MAX_KEY_LEN],
    len: usize,
}

impl KeyMaterial {
    /// All-zero key of `len` bytes
    pub fn zeroed(len: usize) -> Result<Self> {
        if !KEY_LENGTHS.contains(&len) {
            return Err(CryptoError::ConfigInvalid(format!(
                "key length {} (expected 16, 24 or 32)",
                len
            )));
        }
        Ok(KeyMaterial {
            bytes: [0u8; MAX_KEY_LEN],
            len,
        })
    }

    /// Copy key bytes from a slice of a valid key length
    pub fn from_slice(key: &[u8]) -> Result<Self> {
        let mut material = Self::zeroed(key.len())?;
        material.as_mut_slice().copy_from_slice(key);
        Ok(material)
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.bytes[..self.len]
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.bytes[..self.len]
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl PartialEq for KeyMaterial {
    fn eq(&self, other: &Self) -> bool {
        ring::constant_time::verify_slices_are_equal(self.as_slice(), other.as_slice()).is_ok()
    }
}

impl Eq for KeyMaterial {}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyMaterial({} bytes)", self.len)
    }
}
