//! Configuration file support for the srt-crypt tool

use serde::{Deserialize, Serialize};
use srt_crypto::config::{
    DEFAULT_DATA_MAX_LEN, DEFAULT_KEY_LEN, DEFAULT_KM_PRE_ANNOUNCE, DEFAULT_KM_REFRESH_RATE,
    DEFAULT_KM_TX_PERIOD_MS,
};
use srt_crypto::{CipherMode, CryptoError, Direction, Secret, SessionConfig, TransportMode};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Cipher name as written in the config file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CipherName {
    /// AES counter mode
    Ctr,
    /// AES-CBC
    Cbc,
    /// AES-GCM
    Gcm,
}

impl From<CipherName> for CipherMode {
    fn from(name: CipherName) -> Self {
        match name {
            CipherName::Ctr => CipherMode::Ctr,
            CipherName::Cbc => CipherMode::Cbc,
            CipherName::Gcm => CipherMode::Gcm,
        }
    }
}

fn default_cipher() -> CipherName {
    CipherName::Ctr
}

fn default_key_len() -> usize {
    DEFAULT_KEY_LEN
}

fn default_payload_size() -> usize {
    1316
}

fn default_data_max_len() -> usize {
    DEFAULT_DATA_MAX_LEN
}

fn default_km_refresh_rate() -> u32 {
    DEFAULT_KM_REFRESH_RATE
}

fn default_km_pre_announce() -> u32 {
    DEFAULT_KM_PRE_ANNOUNCE
}

fn default_km_tx_period_ms() -> u64 {
    DEFAULT_KM_TX_PERIOD_MS
}

/// Encryption settings shared by `encrypt` and `decrypt`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CryptConfig {
    /// Passphrase the key-encrypting key is derived from
    pub passphrase: Option<String>,
    /// Hex-encoded key used directly as key-encrypting key
    pub preshared_key: Option<String>,
    /// Cipher mode
    #[serde(default = "default_cipher")]
    pub cipher: CipherName,
    /// Stream key length in bytes (16, 24 or 32)
    #[serde(default = "default_key_len")]
    pub key_len: usize,
    /// Bytes of input per packet
    #[serde(default = "default_payload_size")]
    pub payload_size: usize,
    /// Largest plaintext payload the context accepts
    #[serde(default = "default_data_max_len")]
    pub data_max_len: usize,
    /// Packets encrypted under one key before rotation
    #[serde(default = "default_km_refresh_rate")]
    pub km_refresh_rate: u32,
    /// Packets the next key is announced ahead of the switch
    #[serde(default = "default_km_pre_announce")]
    pub km_pre_announce: u32,
    /// Keying material re-send period in milliseconds
    #[serde(default = "default_km_tx_period_ms")]
    pub km_tx_period_ms: u64,
    /// Optional time-based key lifetime in seconds
    pub km_refresh_period_secs: Option<u64>,
}

impl Default for CryptConfig {
    fn default() -> Self {
        CryptConfig {
            passphrase: None,
            preshared_key: None,
            cipher: default_cipher(),
            key_len: default_key_len(),
            payload_size: default_payload_size(),
            data_max_len: default_data_max_len(),
            km_refresh_rate: default_km_refresh_rate(),
            km_pre_announce: default_km_pre_announce(),
            km_tx_period_ms: default_km_tx_period_ms(),
            km_refresh_period_secs: None,
        }
    }
}

impl CryptConfig {
    /// Load configuration from TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        let config: CryptConfig = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let contents = toml::to_string_pretty(self)?;
        fs::write(path, contents)?;
        Ok(())
    }

    /// Create example configuration
    pub fn example() -> Self {
        CryptConfig {
            passphrase: Some("change this passphrase".to_string()),
            cipher: CipherName::Gcm,
            km_refresh_rate: 0x0001_0000,
            km_pre_announce: 0x0400,
            ..Default::default()
        }
    }

    /// Build the secret from whichever of passphrase or preshared key is set
    pub fn secret(&self) -> Result<Secret, ConfigError> {
        match (&self.passphrase, &self.preshared_key) {
            (Some(_), Some(_)) => Err(ConfigError::Invalid(
                "set either passphrase or preshared_key, not both".to_string(),
            )),
            (Some(passphrase), None) => Ok(Secret::passphrase(passphrase)?),
            (None, Some(key)) => {
                let bytes = hex::decode(key.trim())?;
                Ok(Secret::preshared(&bytes)?)
            }
            (None, None) => Err(ConfigError::Invalid(
                "a passphrase or preshared_key is required".to_string(),
            )),
        }
    }

    /// Session settings for one direction, standalone framing
    pub fn to_session_config(&self, direction: Direction) -> Result<SessionConfig, ConfigError> {
        if self.payload_size == 0 || self.payload_size > self.data_max_len {
            return Err(ConfigError::Invalid(format!(
                "payload_size {} must be between 1 and data_max_len {}",
                self.payload_size, self.data_max_len
            )));
        }

        let mut config = SessionConfig::new(direction, self.secret()?)
            .with_cipher(self.cipher.into())
            .with_key_len(self.key_len)
            .with_data_max_len(self.data_max_len)
            .with_transport(TransportMode::Standalone)
            .with_km_refresh_rate(self.km_refresh_rate)
            .with_km_pre_announce(self.km_pre_announce)
            .with_km_tx_period(Duration::from_millis(self.km_tx_period_ms));
        if let Some(secs) = self.km_refresh_period_secs {
            config = config.with_km_refresh_period(Duration::from_secs(secs));
        }

        config.validate()?;
        Ok(config)
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Invalid hex key: {0}")]
    Hex(#[from] hex::FromHexError),

    #[error("Crypto settings rejected: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
