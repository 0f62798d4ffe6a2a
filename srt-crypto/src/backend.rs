//! Pluggable cipher backends
//!
//! The engine never runs AES itself. It calls a [`Cipher`] selected when the
//! context is built and fixed for its lifetime. Counter and CBC modes are
//! served by the RustCrypto block ciphers (`aes_impl`), the authenticated
//! GCM mode by ring (`ring_impl`).

use crate::aes_impl::{AesCbc, AesCtr};
use crate::error::{CryptoError, Result};
use crate::ring_impl::RingAesGcm;
use std::fmt;

/// AES block size in bytes
pub const BLOCK_SIZE: usize = 16;

/// Salt length carried with every SEK
pub const SALT_LEN: usize = 16;

/// Valid SEK/KEK lengths in bytes
pub const KEY_LENGTHS: [usize; 3] = [16, 24, 32];

/// Maximum SEK/KEK length in bytes
pub const MAX_KEY_LEN: usize = 32;

/// Length of the counter/CBC initialization vector
pub const IV_LEN: usize = 16;

/// Length of the GCM nonce
pub const GCM_NONCE_LEN: usize = 12;

/// Cipher mode, with its keying-material wire code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum CipherMode {
    /// AES counter mode (length preserving)
    #[default]
    Ctr = 2,
    /// AES-CBC with PKCS#7 padding
    Cbc = 3,
    /// AES-GCM with a 16-byte tag over the payload and the packet prefix
    Gcm = 4,
}

impl CipherMode {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            2 => Some(CipherMode::Ctr),
            3 => Some(CipherMode::Cbc),
            4 => Some(CipherMode::Gcm),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Whether the mode authenticates the packet
    pub fn is_authenticated(self) -> bool {
        matches!(self, CipherMode::Gcm)
    }
}

impl fmt::Display for CipherMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CipherMode::Ctr => write!(f, "AES-CTR"),
            CipherMode::Cbc => write!(f, "AES-CBC"),
            CipherMode::Gcm => write!(f, "AES-GCM"),
        }
    }
}

/// Key material handed to a cipher for one packet
#[derive(Clone, Copy)]
pub struct PacketKey<'a> {
    /// Stream encrypting key (16, 24 or 32 bytes)
    pub key: &'a [u8],
    /// Salt announced with the key
    pub salt: &'a [u8; SALT_LEN],
}

impl fmt::Debug for PacketKey<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PacketKey")
            .field("key_len", &self.key.len())
            .finish_non_exhaustive()
    }
}

/// Block/stream cipher capability
///
/// Implementations work in place: `encrypt` reads `len` plaintext bytes from
/// the front of `buf` and leaves the ciphertext (plus padding or tag) there,
/// `decrypt` consumes the whole of `buf`. `buf` must have room for
/// `len + overhead()` bytes.
pub trait Cipher: fmt::Debug + Send + Sync {
    /// Mode implemented by this backend
    fn mode(&self) -> CipherMode;

    /// Maximum number of bytes encryption adds to a payload
    fn overhead(&self) -> usize {
        0
    }

    /// Whether the backend can run with a key of `key_len` bytes
    fn supports_key_len(&self, key_len: usize) -> bool {
        KEY_LENGTHS.contains(&key_len)
    }

    /// Encrypt `buf[..len]` for packet index `pki`, returning the output length
    fn encrypt(
        &self,
        key: PacketKey<'_>,
        pki: u32,
        aad: &[u8],
        buf: &mut [u8],
        len: usize,
    ) -> Result<usize>;

    /// Decrypt `buf` for packet index `pki`, returning the plaintext length
    fn decrypt(&self, key: PacketKey<'_>, pki: u32, aad: &[u8], buf: &mut [u8]) -> Result<usize>;
}

/// Build the default backend for `mode`
pub fn backend_for(mode: CipherMode, key_len: usize) -> Result<Box<dyn Cipher>> {
    let cipher: Box<dyn Cipher> = match mode {
        CipherMode::Ctr => Box::new(AesCtr),
        CipherMode::Cbc => Box::new(AesCbc),
        CipherMode::Gcm => Box::new(RingAesGcm),
    };

    if !cipher.supports_key_len(key_len) {
        return Err(CryptoError::UnsupportedAlgorithm(format!(
            "{} with {}-byte keys",
            mode, key_len
        )));
    }

    Ok(cipher)
}

/// Counter/CBC IV: `MSB(112, salt) || 0x0000`, packet index XORed at bytes 10..14
pub fn ctr_iv(salt: &[u8; SALT_LEN], pki: u32) -> [u8; IV_LEN] {
    let mut iv = [0u8; IV_LEN];
    iv[..IV_LEN - 2].copy_from_slice(&salt[..IV_LEN - 2]);
    for (byte, p) in iv[10..14].iter_mut().zip(pki.to_be_bytes()) {
        *byte ^= p;
    }
    iv
}

/// GCM nonce: `MSB(96, salt)`, packet index XORed at bytes 8..12
pub fn gcm_nonce(salt: &[u8; SALT_LEN], pki: u32) -> [u8; GCM_NONCE_LEN] {
    let mut nonce = [0u8; GCM_NONCE_LEN];
    nonce.copy_from_slice(&salt[..GCM_NONCE_LEN]);
    for (byte, p) in nonce[8..12].iter_mut().zip(pki.to_be_bytes()) {
        *byte ^= p;
    }
    nonce
}
