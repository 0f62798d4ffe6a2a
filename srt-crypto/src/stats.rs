//! Per-context counters

/// Encryption context statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CryptoStats {
    /// Packets encrypted (or passed through in the clear) on Tx
    pub packets_encrypted: u64,
    /// Packets decrypted (or passed through in the clear) on Rx
    pub packets_decrypted: u64,
    /// Plaintext bytes encrypted
    pub bytes_encrypted: u64,
    /// Plaintext bytes recovered
    pub bytes_decrypted: u64,
    /// KM messages emitted (including resends)
    pub km_sent: u64,
    /// KM messages that installed a new key
    pub km_installed: u64,
    /// KM messages ignored as resends of an installed key
    pub km_unchanged: u64,
    /// KM messages rejected (stale, unwrap failure, malformed)
    pub km_rejected: u64,
    /// Keys generated on Tx
    pub keys_generated: u64,
    /// Packets dropped for an authentication failure
    pub auth_failures: u64,
    /// Packets dropped for naming a key that is not held
    pub unknown_key: u64,
}

impl CryptoStats {
    /// Packets dropped for any reason
    pub fn packets_dropped(&self) -> u64 {
        self.auth_failures + self.unknown_key
    }
}
