//! Session configuration
//!
//! Every field has a documented default and can be overridden with the
//! `with_*` builders. [`SessionConfig::validate`] runs when a context is
//! built; invalid combinations never produce a context.

use crate::backend::{CipherMode, KEY_LENGTHS};
use crate::error::{CryptoError, Result};
use crate::secret::{Secret, SecretKind};
use crate::transport::TransportMode;
use std::time::Duration;

/// Default SEK length (bytes)
pub const DEFAULT_KEY_LEN: usize = 16;

/// Default maximum payload length (bytes)
pub const DEFAULT_DATA_MAX_LEN: usize = 1500;

/// Largest payload a context accepts
pub const MAX_DATA_LEN: usize = 65_535;

/// Default keying material re-announce period (ms)
pub const DEFAULT_KM_TX_PERIOD_MS: u64 = 1000;

/// Default number of packets encrypted under one SEK
pub const DEFAULT_KM_REFRESH_RATE: u32 = 0x0100_0000;

/// Default pre/post-announce window (packets)
pub const DEFAULT_KM_PRE_ANNOUNCE: u32 = 0x1000;

/// Upper bound on the refresh rate (half the 31-bit packet index space)
pub const MAX_KM_REFRESH_RATE: u32 = 0x3FFF_FFFF;

/// Direction served by a context
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Sender: encrypts and announces keys
    Tx,
    /// Receiver: decrypts and installs announced keys
    Rx,
}

/// Configuration of one encryption context
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Transmit or receive
    pub direction: Direction,
    /// Encrypt (Tx) / decrypt (Rx); when false packets pass in the clear
    pub crypto: bool,
    /// Pre-shared secret
    pub secret: Secret,
    /// Cipher mode for media packets
    pub cipher: CipherMode,
    /// SEK length: 16, 24 or 32 bytes
    pub key_len: usize,
    /// Maximum plaintext payload per packet
    pub data_max_len: usize,
    /// Packet framing
    pub transport: TransportMode,
    /// Keying material re-announce period
    pub km_tx_period: Duration,
    /// Packets encrypted under one SEK before it is replaced
    pub km_refresh_rate_pkt: u32,
    /// Packets between announcing a key and using it, and between
    /// replacing a key and forgetting it
    pub km_pre_announce_pkt: u32,
    /// Optional time budget of a SEK (rotation by time as well as count)
    pub km_refresh_period: Option<Duration>,
}

impl SessionConfig {
    /// Configuration with defaults; crypto is enabled unless the secret is empty
    pub fn new(direction: Direction, secret: Secret) -> Self {
        SessionConfig {
            direction,
            crypto: secret.kind() != SecretKind::None,
            secret,
            cipher: CipherMode::default(),
            key_len: DEFAULT_KEY_LEN,
            data_max_len: DEFAULT_DATA_MAX_LEN,
            transport: TransportMode::default(),
            km_tx_period: Duration::from_millis(DEFAULT_KM_TX_PERIOD_MS),
            km_refresh_rate_pkt: DEFAULT_KM_REFRESH_RATE,
            km_pre_announce_pkt: DEFAULT_KM_PRE_ANNOUNCE,
            km_refresh_period: None,
        }
    }

    /// Sender configuration with defaults
    pub fn tx(secret: Secret) -> Self {
        Self::new(Direction::Tx, secret)
    }

    /// Receiver configuration with defaults
    pub fn rx(secret: Secret) -> Self {
        Self::new(Direction::Rx, secret)
    }

    /// Pass-through configuration (crypto disabled)
    pub fn clear(direction: Direction) -> Self {
        Self::new(direction, Secret::none())
    }

    pub fn with_cipher(mut self, cipher: CipherMode) -> Self {
        self.cipher = cipher;
        self
    }

    pub fn with_key_len(mut self, key_len: usize) -> Self {
        self.key_len = key_len;
        self
    }

    pub fn with_data_max_len(mut self, data_max_len: usize) -> Self {
        self.data_max_len = data_max_len;
        self
    }

    pub fn with_transport(mut self, transport: TransportMode) -> Self {
        self.transport = transport;
        self
    }

    pub fn with_km_tx_period(mut self, period: Duration) -> Self {
        self.km_tx_period = period;
        self
    }

    pub fn with_km_refresh_rate(mut self, packets: u32) -> Self {
        self.km_refresh_rate_pkt = packets;
        self
    }

    pub fn with_km_pre_announce(mut self, packets: u32) -> Self {
        self.km_pre_announce_pkt = packets;
        self
    }

    pub fn with_km_refresh_period(mut self, period: Duration) -> Self {
        self.km_refresh_period = Some(period);
        self
    }

    /// Check every field and their combinations
    pub fn validate(&self) -> Result<()> {
        if !KEY_LENGTHS.contains(&self.key_len) {
            return Err(CryptoError::ConfigInvalid(format!(
                "key length {} (expected 16, 24 or 32)",
                self.key_len
            )));
        }

        if self.data_max_len == 0 || self.data_max_len > MAX_DATA_LEN {
            return Err(CryptoError::ConfigInvalid(format!(
                "maximum payload length {} (expected 1..={})",
                self.data_max_len, MAX_DATA_LEN
            )));
        }

        if !self.crypto {
            return Ok(());
        }

        match self.secret.kind() {
            SecretKind::None => {
                return Err(CryptoError::ConfigInvalid(
                    "crypto enabled without a secret".to_string(),
                ))
            }
            SecretKind::Preshared if self.secret.len() < self.key_len => {
                return Err(CryptoError::ConfigInvalid(format!(
                    "preshared key of {} bytes is shorter than key length {}",
                    self.secret.len(),
                    self.key_len
                )))
            }
            _ => {}
        }

        if self.km_tx_period.is_zero() {
            return Err(CryptoError::ConfigInvalid(
                "keying material period must be non-zero".to_string(),
            ));
        }

        if self.km_refresh_rate_pkt > MAX_KM_REFRESH_RATE {
            return Err(CryptoError::ConfigInvalid(format!(
                "refresh rate {} packets (max {})",
                self.km_refresh_rate_pkt, MAX_KM_REFRESH_RATE
            )));
        }

        let pre = self.km_pre_announce_pkt;
        if pre == 0 || pre.saturating_mul(2) > self.km_refresh_rate_pkt {
            return Err(CryptoError::ConfigInvalid(format!(
                "pre-announce window {} must be at least 1 and at most half the refresh rate {}",
                pre, self.km_refresh_rate_pkt
            )));
        }

        if let Some(period) = self.km_refresh_period {
            if period.is_zero() {
                return Err(CryptoError::ConfigInvalid(
                    "refresh period must be non-zero".to_string(),
                ));
            }
        }

        Ok(())
    }
}
