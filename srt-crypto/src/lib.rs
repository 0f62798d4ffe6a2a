//! SRT Packet Encryption
//!
//! This crate implements the SRT payload encryption engine: pluggable AES
//! backends (CTR, CBC, GCM), key encrypting key derivation and RFC 3394 key
//! wrap, keying material messages, even/odd key rotation, and the per-stream
//! session context that ties them to packet prefixes.

pub mod aes_impl;
pub mod backend;
pub mod codec;
pub mod config;
pub mod context;
pub mod epoch;
pub mod error;
pub mod keywrap;
pub mod km;
pub mod ring_impl;
pub mod secret;
pub mod stats;
pub mod transport;

pub use aes_impl::{AesCbc, AesCtr};
pub use backend::{backend_for, Cipher, CipherMode, PacketKey};
pub use codec::PacketCodec;
pub use config::{Direction, SessionConfig};
pub use context::{RxOutput, SessionContext, TxSegments, MAX_TX_SEGMENTS};
pub use epoch::{KeyEpoch, KeyFlags, KmInstall, Parity, Sek, SekState};
pub use error::{CryptoError, Result};
pub use km::KmMessage;
pub use ring_impl::RingAesGcm;
pub use secret::{KeyMaterial, Secret, SecretKind};
pub use stats::CryptoStats;
pub use transport::TransportMode;
