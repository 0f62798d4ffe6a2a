//! RFC 3394 AES key wrap of stream encrypting keys

use crate::error::{CryptoError, Result};
use crate::secret::KeyMaterial;
use aes::cipher::generic_array::GenericArray;
use aes_kw::{KekAes128, KekAes192, KekAes256};
use bytes::Bytes;

/// Integrity block prepended by the key wrap
pub const WRAP_OVERHEAD: usize = 8;

/// Maximum wrapped key length (32-byte key plus integrity block)
pub const MAX_WRAPPED_LEN: usize = 32 + WRAP_OVERHEAD;

/// Wrap `sek` under `kek`
///
/// Output is `sek.len() + 8` bytes and depends only on the two keys (the
/// default RFC 3394 IV is used).
pub fn wrap(kek: &KeyMaterial, sek: &KeyMaterial) -> Result<Bytes> {
    let mut out = [0u8; MAX_WRAPPED_LEN];
    let out_len = sek.len() + WRAP_OVERHEAD;
    let out_buf = &mut out[..out_len];

    let k = kek.as_slice();
    let result = match k.len() {
        16 => KekAes128::new(GenericArray::from_slice(k)).wrap(sek.as_slice(), out_buf),
        24 => KekAes192::new(GenericArray::from_slice(k)).wrap(sek.as_slice(), out_buf),
        32 => KekAes256::new(GenericArray::from_slice(k)).wrap(sek.as_slice(), out_buf),
        n => {
            return Err(CryptoError::ConfigInvalid(format!(
                "KEK length {} (expected 16, 24 or 32)",
                n
            )))
        }
    };
    result.map_err(|_| CryptoError::MalformedMessage("key wrap rejected SEK length"))?;

    Ok(Bytes::copy_from_slice(&out[..out_len]))
}

/// Unwrap a SEK, verifying the integrity block first
///
/// Fails with `AuthFailure` on any mismatch; no key bytes are returned in
/// that case.
pub fn unwrap(kek: &KeyMaterial, wrapped: &[u8]) -> Result<KeyMaterial> {
    if wrapped.len() <= WRAP_OVERHEAD {
        return Err(CryptoError::MalformedMessage("wrapped key too short"));
    }
    let mut sek = KeyMaterial::zeroed(wrapped.len() - WRAP_OVERHEAD)
        .map_err(|_| CryptoError::MalformedMessage("wrapped key has invalid length"))?;

    let k = kek.as_slice();
    let out = sek.as_mut_slice();
    let result = match k.len() {
        16 => KekAes128::new(GenericArray::from_slice(k)).unwrap(wrapped, out),
        24 => KekAes192::new(GenericArray::from_slice(k)).unwrap(wrapped, out),
        32 => KekAes256::new(GenericArray::from_slice(k)).unwrap(wrapped, out),
        n => {
            return Err(CryptoError::ConfigInvalid(format!(
                "KEK length {} (expected 16, 24 or 32)",
                n
            )))
        }
    };
    result.map_err(|_| CryptoError::AuthFailure)?;

    Ok(sek)
}
