//! ring-backed primitives: AES-GCM, PBKDF2 and the system RNG

use crate::backend::{gcm_nonce, Cipher, CipherMode, PacketKey};
use crate::error::{CryptoError, Result};
use ring::aead::{self, Aad, LessSafeKey, Nonce, UnboundKey};
use ring::pbkdf2;
use ring::rand::{SecureRandom, SystemRandom};
use std::num::NonZeroU32;

/// GCM authentication tag length
pub const GCM_TAG_LEN: usize = 16;

/// AES-GCM with a 16-byte tag
///
/// The packet prefix is authenticated as additional data, so a receiver
/// detects tampering with the key flags or packet index as well as the
/// payload. ring offers 128- and 256-bit keys only.
#[derive(Debug, Clone, Copy, Default)]
pub struct RingAesGcm;

impl RingAesGcm {
    fn key(key: PacketKey<'_>) -> Result<LessSafeKey> {
        let alg = match key.key.len() {
            16 => &aead::AES_128_GCM,
            32 => &aead::AES_256_GCM,
            n => {
                return Err(CryptoError::UnsupportedAlgorithm(format!(
                    "AES-GCM with {}-byte key",
                    n
                )))
            }
        };
        let unbound = UnboundKey::new(alg, key.key)
            .map_err(|_| CryptoError::UnsupportedAlgorithm("AES-GCM key rejected".into()))?;
        Ok(LessSafeKey::new(unbound))
    }
}

impl Cipher for RingAesGcm {
    fn mode(&self) -> CipherMode {
        CipherMode::Gcm
    }

    fn overhead(&self) -> usize {
        GCM_TAG_LEN
    }

    fn supports_key_len(&self, key_len: usize) -> bool {
        matches!(key_len, 16 | 32)
    }

    fn encrypt(
        &self,
        key: PacketKey<'_>,
        pki: u32,
        aad: &[u8],
        buf: &mut [u8],
        len: usize,
    ) -> Result<usize> {
        let out_len = len + GCM_TAG_LEN;
        if out_len > buf.len() {
            return Err(CryptoError::PayloadTooLarge {
                size: len,
                max: buf.len().saturating_sub(GCM_TAG_LEN),
            });
        }

        let sealing = Self::key(key)?;
        let nonce = Nonce::assume_unique_for_key(gcm_nonce(key.salt, pki));
        let tag = sealing
            .seal_in_place_separate_tag(nonce, Aad::from(aad), &mut buf[..len])
            .map_err(|_| CryptoError::PayloadTooLarge {
                size: len,
                max: out_len - GCM_TAG_LEN,
            })?;
        buf[len..out_len].copy_from_slice(tag.as_ref());
        Ok(out_len)
    }

    fn decrypt(&self, key: PacketKey<'_>, pki: u32, aad: &[u8], buf: &mut [u8]) -> Result<usize> {
        if buf.len() < GCM_TAG_LEN {
            return Err(CryptoError::MalformedMessage("GCM payload shorter than tag"));
        }

        let opening = Self::key(key)?;
        let nonce = Nonce::assume_unique_for_key(gcm_nonce(key.salt, pki));
        let plain = opening
            .open_in_place(nonce, Aad::from(aad), buf)
            .map_err(|_| CryptoError::AuthFailure)?;
        Ok(plain.len())
    }
}

/// PBKDF2 iteration count used for passphrase-derived KEKs
pub const PBKDF2_ITERATIONS: u32 = 2048;

const PBKDF2_ITER: NonZeroU32 = match NonZeroU32::new(PBKDF2_ITERATIONS) {
    Some(n) => n,
    None => panic!("PBKDF2 iteration count must be non-zero"),
};

/// PBKDF2-HMAC-SHA1 into `out`
pub fn pbkdf2_sha1(password: &[u8], salt: &[u8], out: &mut [u8]) {
    pbkdf2::derive(pbkdf2::PBKDF2_HMAC_SHA1, PBKDF2_ITER, salt, password, out);
}

/// Fill `buf` from the operating system RNG
pub fn fill_random(rng: &SystemRandom, buf: &mut [u8]) -> Result<()> {
    rng.fill(buf).map_err(|_| CryptoError::RandomSource)
}
