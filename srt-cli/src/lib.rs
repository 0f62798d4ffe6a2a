//! SRT Crypt CLI Library
//!
//! Shared functionality for the srt-crypt command-line tool.

pub mod config;
pub mod record;
pub mod stats;

pub use config::{CipherName, ConfigError, CryptConfig};
pub use record::{read_record, write_record, MAX_RECORD_LEN};
pub use stats::{crypto_stats_lines, display_crypto_stats, format_bytes, format_throughput};
