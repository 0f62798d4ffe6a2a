//! AES-CTR and AES-CBC backends on the RustCrypto block ciphers

use crate::backend::{ctr_iv, Cipher, CipherMode, PacketKey, BLOCK_SIZE};
use crate::error::{CryptoError, Result};
use aes::{Aes128, Aes192, Aes256};
use cbc::cipher::block_padding::Pkcs7;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit, StreamCipher};

type Aes128Ctr = ctr::Ctr128BE<Aes128>;
type Aes192Ctr = ctr::Ctr128BE<Aes192>;
type Aes256Ctr = ctr::Ctr128BE<Aes256>;

fn bad_key_len(len: usize) -> CryptoError {
    CryptoError::UnsupportedAlgorithm(format!("AES with {}-byte key", len))
}

/// AES in counter mode
///
/// The packet index is folded into the IV, the low 16 bits count blocks
/// inside the packet.
#[derive(Debug, Clone, Copy, Default)]
pub struct AesCtr;

impl AesCtr {
    fn apply(key: PacketKey<'_>, pki: u32, buf: &mut [u8]) -> Result<()> {
        let iv = ctr_iv(key.salt, pki);
        let k = key.key;
        match k.len() {
            16 => Aes128Ctr::new_from_slices(k, &iv)
                .map_err(|_| bad_key_len(k.len()))?
                .apply_keystream(buf),
            24 => Aes192Ctr::new_from_slices(k, &iv)
                .map_err(|_| bad_key_len(k.len()))?
                .apply_keystream(buf),
            32 => Aes256Ctr::new_from_slices(k, &iv)
                .map_err(|_| bad_key_len(k.len()))?
                .apply_keystream(buf),
            n => return Err(bad_key_len(n)),
        }
        Ok(())
    }
}

impl Cipher for AesCtr {
    fn mode(&self) -> CipherMode {
        CipherMode::Ctr
    }

    fn encrypt(
        &self,
        key: PacketKey<'_>,
        pki: u32,
        _aad: &[u8],
        buf: &mut [u8],
        len: usize,
    ) -> Result<usize> {
        if len > buf.len() {
            return Err(CryptoError::PayloadTooLarge {
                size: len,
                max: buf.len(),
            });
        }
        Self::apply(key, pki, &mut buf[..len])?;
        Ok(len)
    }

    fn decrypt(&self, key: PacketKey<'_>, pki: u32, _aad: &[u8], buf: &mut [u8]) -> Result<usize> {
        Self::apply(key, pki, buf)?;
        Ok(buf.len())
    }
}

/// AES-CBC with PKCS#7 padding
///
/// Output grows to the next block boundary. A padding mismatch on decrypt is
/// reported as an authentication failure.
#[derive(Debug, Clone, Copy, Default)]
pub struct AesCbc;

impl Cipher for AesCbc {
    fn mode(&self) -> CipherMode {
        CipherMode::Cbc
    }

    fn overhead(&self) -> usize {
        BLOCK_SIZE
    }

    fn encrypt(
        &self,
        key: PacketKey<'_>,
        pki: u32,
        _aad: &[u8],
        buf: &mut [u8],
        len: usize,
    ) -> Result<usize> {
        let iv = ctr_iv(key.salt, pki);
        let k = key.key;
        let max = buf.len().saturating_sub(BLOCK_SIZE);
        let too_large = move |_| CryptoError::PayloadTooLarge { size: len, max };
        let out_len = match k.len() {
            16 => cbc::Encryptor::<Aes128>::new_from_slices(k, &iv)
                .map_err(|_| bad_key_len(k.len()))?
                .encrypt_padded_mut::<Pkcs7>(buf, len)
                .map_err(too_large)?
                .len(),
            24 => cbc::Encryptor::<Aes192>::new_from_slices(k, &iv)
                .map_err(|_| bad_key_len(k.len()))?
                .encrypt_padded_mut::<Pkcs7>(buf, len)
                .map_err(too_large)?
                .len(),
            32 => cbc::Encryptor::<Aes256>::new_from_slices(k, &iv)
                .map_err(|_| bad_key_len(k.len()))?
                .encrypt_padded_mut::<Pkcs7>(buf, len)
                .map_err(too_large)?
                .len(),
            n => return Err(bad_key_len(n)),
        };
        Ok(out_len)
    }

    fn decrypt(&self, key: PacketKey<'_>, pki: u32, _aad: &[u8], buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() || buf.len() % BLOCK_SIZE != 0 {
            return Err(CryptoError::MalformedMessage(
                "CBC payload is not a whole number of blocks",
            ));
        }

        let iv = ctr_iv(key.salt, pki);
        let k = key.key;
        let plain_len = match k.len() {
            16 => cbc::Decryptor::<Aes128>::new_from_slices(k, &iv)
                .map_err(|_| bad_key_len(k.len()))?
                .decrypt_padded_mut::<Pkcs7>(buf)
                .map_err(|_| CryptoError::AuthFailure)?
                .len(),
            24 => cbc::Decryptor::<Aes192>::new_from_slices(k, &iv)
                .map_err(|_| bad_key_len(k.len()))?
                .decrypt_padded_mut::<Pkcs7>(buf)
                .map_err(|_| CryptoError::AuthFailure)?
                .len(),
            32 => cbc::Decryptor::<Aes256>::new_from_slices(k, &iv)
                .map_err(|_| bad_key_len(k.len()))?
                .decrypt_padded_mut::<Pkcs7>(buf)
                .map_err(|_| CryptoError::AuthFailure)?
                .len(),
            n => return Err(bad_key_len(n)),
        };
        Ok(plain_len)
    }
}
