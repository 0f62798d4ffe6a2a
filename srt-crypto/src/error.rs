//! Error types for the SRT encryption engine

use crate::config::Direction;
use crate::epoch::{KeyFlags, Parity};
use thiserror::Error;

/// Result type alias for encryption engine operations
pub type Result<T> = std::result::Result<T, CryptoError>;

/// Encryption engine errors
///
/// Configuration errors (`ConfigInvalid`, `UnsupportedAlgorithm`) are fatal
/// for the context being built. Per-packet errors (`UnknownKey`,
/// `AuthFailure`, `SequenceReuse`, `KmRejected`, ...) drop a single packet
/// or KM message and leave the session untouched.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("Invalid configuration: {0}")]
    ConfigInvalid(String),

    #[error("Unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("No stream encrypting key available")]
    NoKeyAvailable,

    #[error("Output needs {needed} segments (max {max})")]
    BufferTooSmall { needed: usize, max: usize },

    #[error("Payload too large: {size} bytes (max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("No acceptable key for flags {0:?}")]
    UnknownKey(KeyFlags),

    #[error("Authentication failure")]
    AuthFailure,

    #[error("Stale generation {generation} for {parity:?} key (last seen {last_seen})")]
    StaleGeneration {
        parity: Parity,
        generation: u32,
        last_seen: u32,
    },

    #[error("Operation requires a {expected:?} context")]
    WrongDirection { expected: Direction },

    #[error("Packet index {pki} already used with this key")]
    SequenceReuse { pki: u32 },

    #[error("Keying material rejected: {0}")]
    KmRejected(String),

    #[error("Malformed message: {0}")]
    MalformedMessage(&'static str),

    #[error("Random number generator failure")]
    RandomSource,
}

impl CryptoError {
    /// Whether the error invalidates the whole context rather than one packet
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            CryptoError::ConfigInvalid(_)
                | CryptoError::UnsupportedAlgorithm(_)
                | CryptoError::RandomSource
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(CryptoError::ConfigInvalid("key length".into()).is_fatal());
        assert!(CryptoError::UnsupportedAlgorithm("ECB".into()).is_fatal());
        assert!(!CryptoError::AuthFailure.is_fatal());
        assert!(!CryptoError::KmRejected("AES-CBC on AES-CTR".into()).is_fatal());
        assert!(!CryptoError::UnknownKey(KeyFlags::ODD).is_fatal());
        assert!(!CryptoError::NoKeyAvailable.is_fatal());
        assert!(!CryptoError::BufferTooSmall { needed: 2, max: 1 }.is_fatal());
    }

    #[test]
    fn test_display() {
        let err = CryptoError::StaleGeneration {
            parity: Parity::Odd,
            generation: 3,
            last_seen: 4,
        };
        assert_eq!(
            err.to_string(),
            "Stale generation 3 for Odd key (last seen 4)"
        );
    }
}
