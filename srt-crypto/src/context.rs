//! Session encryption context
//!
//! One [`SessionContext`] serves one direction of one stream. It owns the
//! configuration, both key slots, the packet counter and the scratch buffer
//! packets are built in. Every mutating call takes `&mut self`; separate
//! contexts share nothing and can live on separate threads.
//!
//! # Example
//!
//! ```
//! use srt_crypto::{RxOutput, Secret, SessionConfig, SessionContext};
//! use std::time::Instant;
//!
//! let secret = Secret::passphrase("correct horse battery staple").unwrap();
//! let mut tx = SessionContext::new(SessionConfig::tx(secret.clone())).unwrap();
//! let mut rx = SessionContext::new(SessionConfig::rx(secret)).unwrap();
//!
//! let now = Instant::now();
//! for km in tx.tx_manage_keys(now).unwrap() {
//!     rx.rx_install_key(&km.to_bytes()).unwrap();
//! }
//!
//! let segments = tx.tx_process(b"payload", now, 3).unwrap();
//! let mut packet = segments.data().to_vec();
//! match rx.rx_process(&mut packet).unwrap() {
//!     RxOutput::Payload(plain) => assert_eq!(plain, b"payload"),
//!     RxOutput::KeyingMaterial(_) => unreachable!(),
//! }
//! ```

use crate::backend::{backend_for, Cipher};
use crate::codec::PacketCodec;
use crate::config::{Direction, SessionConfig};
use crate::epoch::{KeyEpoch, KeyFlags, KmInstall, Parity, SekState};
use crate::error::{CryptoError, Result};
use crate::km::KmMessage;
use crate::stats::CryptoStats;
use crate::transport::TransportMode;
use bytes::{Bytes, BytesMut};
use std::time::Instant;
use zeroize::Zeroize;

/// Most segments a single `tx_process` call returns (two KM messages and the
/// data packet)
pub const MAX_TX_SEGMENTS: usize = 3;

/// First packet index used by the internal counter
const INITIAL_PKI: u32 = 1;

/// Wire segments produced for one outgoing packet
///
/// Keying material segments (standalone framing only) come first, the data
/// packet is always last.
#[derive(Debug, Clone, Copy)]
pub struct TxSegments<'a> {
    segments: [&'a [u8]; MAX_TX_SEGMENTS],
    count: usize,
}

impl<'a> TxSegments<'a> {
    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn as_slice(&self) -> &[&'a [u8]] {
        &self.segments[..self.count]
    }

    pub fn iter(&self) -> impl Iterator<Item = &'a [u8]> + '_ {
        self.as_slice().iter().copied()
    }

    /// The data packet
    pub fn data(&self) -> &'a [u8] {
        self.segments[self.count.saturating_sub(1)]
    }

    /// KM messages sent ahead of the data packet
    pub fn keying_material(&self) -> &[&'a [u8]] {
        &self.segments[..self.count.saturating_sub(1)]
    }
}

/// Result of processing one received packet
#[derive(Debug, PartialEq, Eq)]
pub enum RxOutput<'a> {
    /// Decrypted payload, borrowed from the input packet
    Payload(&'a [u8]),
    /// Inline KM message (standalone framing)
    KeyingMaterial(KmInstall),
}

/// Encryption state of one stream direction
#[derive(Debug)]
pub struct SessionContext {
    config: SessionConfig,
    codec: PacketCodec,
    epoch: KeyEpoch,
    tx_buf: Vec<u8>,
    tx_staged: Option<usize>,
    tx_km: [Bytes; 2],
    next_pki: u32,
    stats: CryptoStats,
}

impl SessionContext {
    /// Build a context with the default backend for the configured cipher
    pub fn new(config: SessionConfig) -> Result<Self> {
        config.validate()?;
        let cipher = backend_for(config.cipher, config.key_len)?;
        Self::with_cipher(config, cipher)
    }

    /// Build a context around a caller-supplied cipher backend
    pub fn with_cipher(config: SessionConfig, cipher: Box<dyn Cipher>) -> Result<Self> {
        config.validate()?;

        if cipher.mode() != config.cipher {
            return Err(CryptoError::UnsupportedAlgorithm(format!(
                "backend implements {}, configuration asks for {}",
                cipher.mode(),
                config.cipher
            )));
        }
        if !cipher.supports_key_len(config.key_len) {
            return Err(CryptoError::UnsupportedAlgorithm(format!(
                "{} with {}-byte keys",
                config.cipher, config.key_len
            )));
        }

        let codec = PacketCodec::new(cipher, config.transport, config.data_max_len);
        let epoch = KeyEpoch::new(&config);
        let tx_buf = match config.direction {
            Direction::Tx => vec![0u8; codec.max_packet_len()],
            Direction::Rx => Vec::new(),
        };

        tracing::info!(
            "Created {:?} context: crypto {}, {} with {}-byte keys, {:?} framing",
            config.direction,
            if config.crypto { "on" } else { "off" },
            config.cipher,
            config.key_len,
            config.transport
        );

        Ok(SessionContext {
            config,
            codec,
            epoch,
            tx_buf,
            tx_staged: None,
            tx_km: [Bytes::new(), Bytes::new()],
            next_pki: INITIAL_PKI,
            stats: CryptoStats::default(),
        })
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn direction(&self) -> Direction {
        self.config.direction
    }

    /// Key slots, for inspection
    pub fn epoch(&self) -> &KeyEpoch {
        &self.epoch
    }

    pub fn key_state(&self, parity: Parity) -> SekState {
        self.epoch.state(parity)
    }

    /// Packet index the next `tx_process` call uses
    pub fn next_pki(&self) -> u32 {
        self.next_pki
    }

    fn require(&self, expected: Direction) -> Result<()> {
        if self.config.direction != expected {
            return Err(CryptoError::WrongDirection { expected });
        }
        Ok(())
    }

    // ---- Tx ----

    /// Borrow `len` bytes of the internal packet buffer to write a payload
    /// into; `tx_process_buffer` then encrypts it in place
    pub fn acquire_tx_buffer(&mut self, len: usize) -> Result<&mut [u8]> {
        self.require(Direction::Tx)?;
        self.codec.check_payload(len)?;
        let start = self.codec.prefix_len();
        self.tx_staged = Some(len);
        Ok(&mut self.tx_buf[start..start + len])
    }

    /// Encrypt the payload staged with `acquire_tx_buffer`
    pub fn tx_process_buffer(
        &mut self,
        now: Instant,
        max_segments: usize,
    ) -> Result<TxSegments<'_>> {
        self.require(Direction::Tx)?;
        let len = self
            .tx_staged
            .ok_or(CryptoError::MalformedMessage("no payload staged"))?;
        self.seal_staged(len, now, max_segments)
    }

    /// Encrypt one payload using the internal packet counter
    ///
    /// In standalone framing, KM messages that are due go out ahead of the
    /// data packet. Fails with `BufferTooSmall` (and changes nothing) when
    /// `max_segments` cannot hold them all.
    pub fn tx_process(
        &mut self,
        plaintext: &[u8],
        now: Instant,
        max_segments: usize,
    ) -> Result<TxSegments<'_>> {
        self.require(Direction::Tx)?;
        self.codec.check_payload(plaintext.len())?;
        let start = self.codec.prefix_len();
        self.tx_buf[start..start + plaintext.len()].copy_from_slice(plaintext);
        self.tx_staged = None;
        self.seal_staged(plaintext.len(), now, max_segments)
    }

    fn seal_staged(
        &mut self,
        len: usize,
        now: Instant,
        max_segments: usize,
    ) -> Result<TxSegments<'_>> {
        let prefix_len = self.codec.prefix_len();
        let transport = self.codec.transport();
        let pki = self.next_pki;

        if !self.config.crypto {
            if max_segments < 1 {
                return Err(CryptoError::BufferTooSmall {
                    needed: 1,
                    max: max_segments,
                });
            }
            transport.write_prefix(&mut self.tx_buf[..prefix_len], KeyFlags::NONE, pki)?;
            self.advance_pki(pki);
            self.stats.packets_encrypted += 1;
            self.stats.bytes_encrypted += len as u64;
            self.tx_staged = None;
            let mut segments: [&[u8]; MAX_TX_SEGMENTS] = [&[]; MAX_TX_SEGMENTS];
            segments[0] = &self.tx_buf[..prefix_len + len];
            return Ok(TxSegments { segments, count: 1 });
        }

        let mut due = [None; 2];
        if transport == TransportMode::Standalone {
            for (slot, parity) in due.iter_mut().zip(self.epoch.tx_due_km(now)) {
                *slot = Some(parity);
            }
        }
        let km_count = due.iter().flatten().count();
        if km_count + 1 > max_segments {
            return Err(CryptoError::BufferTooSmall {
                needed: km_count + 1,
                max: max_segments,
            });
        }

        let sek = self.epoch.active_for_encrypt()?;
        let (prefix, payload) = self.tx_buf.split_at_mut(prefix_len);
        transport.write_prefix(prefix, sek.parity().key_flags(), pki)?;
        let out_len = self.codec.encrypt(sek, prefix, payload, len)?;

        for (i, parity) in due.iter().flatten().enumerate() {
            if let Some(sek) = self.epoch.slot(*parity) {
                self.tx_km[i] = sek.km_bytes().clone();
            }
            self.epoch.tx_mark_km_sent(*parity, now);
            tracing::debug!("Sending KM for {:?} key inline", parity);
        }
        self.stats.km_sent += km_count as u64;

        // the index is spent even when starting the next key fails
        let accounted = self.epoch.tx_on_packet(pki, now);
        self.advance_pki(pki);
        accounted?;
        self.stats.packets_encrypted += 1;
        self.stats.bytes_encrypted += len as u64;
        self.tx_staged = None;

        let mut segments: [&[u8]; MAX_TX_SEGMENTS] = [&[]; MAX_TX_SEGMENTS];
        for (segment, km) in segments.iter_mut().zip(&self.tx_km[..km_count]) {
            *segment = &km[..];
        }
        segments[km_count] = &self.tx_buf[..prefix_len + out_len];
        Ok(TxSegments {
            segments,
            count: km_count + 1,
        })
    }

    fn advance_pki(&mut self, pki: u32) {
        self.next_pki = pki.wrapping_add(1) & self.codec.transport().pki_mask();
    }

    /// Encrypt `data` in place for a caller-built prefix
    ///
    /// The packet index comes from `prefix` (the session sequence number in
    /// SRT framing), and the key flags are written back into it. `data` grows
    /// by the cipher overhead. KM messages are not emitted here; use
    /// `tx_manage_keys`.
    pub fn tx_data(&mut self, prefix: &mut [u8], data: &mut BytesMut, now: Instant) -> Result<()> {
        self.require(Direction::Tx)?;
        let len = data.len();

        if !self.config.crypto {
            self.codec.mark_clear(prefix, len)?;
            self.stats.packets_encrypted += 1;
            self.stats.bytes_encrypted += len as u64;
            return Ok(());
        }

        self.codec.check_payload(len)?;
        let sek = self.epoch.active_for_encrypt()?;
        let pki = self.codec.transport().read_pki(prefix)?;

        data.resize(len + self.codec.overhead(), 0);
        match self.codec.encrypt(sek, prefix, &mut data[..], len) {
            Ok(out_len) => data.truncate(out_len),
            Err(e) => {
                data.truncate(len);
                return Err(e);
            }
        }

        self.epoch.tx_on_packet(pki, now)?;
        self.stats.packets_encrypted += 1;
        self.stats.bytes_encrypted += len as u64;
        Ok(())
    }

    /// Flags of the keys the sender currently holds
    pub fn tx_key_flags(&self) -> Result<KeyFlags> {
        self.require(Direction::Tx)?;
        Ok(self.epoch.key_flags())
    }

    /// Create or rotate keys as needed and return the KM messages due at `now`
    ///
    /// The first call creates the initial key. In SRT framing the caller
    /// sends the returned messages as session control packets.
    pub fn tx_manage_keys(&mut self, now: Instant) -> Result<Vec<KmMessage>> {
        self.require(Direction::Tx)?;
        if !self.config.crypto {
            return Ok(Vec::new());
        }

        self.epoch.tx_refresh(now)?;

        let due: Vec<Parity> = self.epoch.tx_due_km(now).collect();
        let mut messages = Vec::with_capacity(due.len());
        for parity in due {
            if let Some(sek) = self.epoch.slot(parity) {
                messages.push(sek.km().clone());
            }
            self.epoch.tx_mark_km_sent(parity, now);
        }
        self.stats.km_sent += messages.len() as u64;
        Ok(messages)
    }

    /// The peer confirmed the KM message for `generation`; stop re-sending it
    pub fn tx_acknowledge_km(&mut self, parity: Parity, generation: u32) -> Result<bool> {
        self.require(Direction::Tx)?;
        Ok(self.epoch.tx_acknowledge(parity, generation))
    }

    // ---- Rx ----

    /// Process one received packet in place
    ///
    /// In standalone framing a KM message is installed and reported as
    /// `KeyingMaterial`; anything else is decrypted and the payload returned.
    pub fn rx_process<'a>(&mut self, packet: &'a mut [u8]) -> Result<RxOutput<'a>> {
        self.require(Direction::Rx)?;

        if self.codec.transport() == TransportMode::Standalone && KmMessage::is_km(packet) {
            let installed = self.rx_install_key(packet)?;
            return Ok(RxOutput::KeyingMaterial(installed));
        }

        let prefix_len = self.codec.prefix_len();
        if packet.len() < prefix_len {
            return Err(CryptoError::MalformedMessage("packet shorter than prefix"));
        }
        let (prefix, payload) = packet.split_at_mut(prefix_len);
        let plain_len = self.rx_decrypt(prefix, payload)?;
        Ok(RxOutput::Payload(&packet[prefix_len..prefix_len + plain_len]))
    }

    /// Decrypt `data` in place for a separately held prefix
    pub fn rx_data(&mut self, prefix: &[u8], data: &mut BytesMut) -> Result<()> {
        self.require(Direction::Rx)?;
        let plain_len = self.rx_decrypt(prefix, &mut data[..])?;
        data.truncate(plain_len);
        Ok(())
    }

    fn rx_decrypt(&mut self, prefix: &[u8], payload: &mut [u8]) -> Result<usize> {
        let flags = self.codec.transport().read_key_flags(prefix)?;

        if flags.is_empty() {
            if self.config.crypto {
                self.stats.unknown_key += 1;
                tracing::warn!("Dropping clear packet on an encrypted stream");
                return Err(CryptoError::UnknownKey(flags));
            }
            self.codec.transport().read_pki(prefix)?;
            self.stats.packets_decrypted += 1;
            self.stats.bytes_decrypted += payload.len() as u64;
            return Ok(payload.len());
        }

        let sek = if self.config.crypto {
            Parity::from_key_flags(flags).and_then(|p| self.epoch.acceptable_for_decrypt(p))
        } else {
            None
        };
        let sek = match sek {
            Some(sek) => sek,
            None => {
                self.stats.unknown_key += 1;
                tracing::debug!("No key for packet flagged {:?}", flags);
                return Err(CryptoError::UnknownKey(flags));
            }
        };

        let parity = sek.parity();
        match self.codec.decrypt(sek, prefix, payload) {
            Ok(plain_len) => {
                self.epoch.rx_on_packet(parity);
                self.stats.packets_decrypted += 1;
                self.stats.bytes_decrypted += plain_len as u64;
                Ok(plain_len)
            }
            Err(CryptoError::AuthFailure) => {
                self.stats.auth_failures += 1;
                tracing::warn!("Authentication failure on {:?} key packet", parity);
                Err(CryptoError::AuthFailure)
            }
            Err(e) => Err(e),
        }
    }

    /// Install a KM message received from the peer
    pub fn rx_install_key(&mut self, bytes: &[u8]) -> Result<KmInstall> {
        self.require(Direction::Rx)?;
        if !self.config.crypto {
            return Err(CryptoError::KmRejected(
                "keying material received with crypto disabled".to_string(),
            ));
        }

        let result = KmMessage::from_bytes(bytes).and_then(|msg| {
            if !self.codec.cipher().supports_key_len(msg.key_len()) {
                return Err(CryptoError::KmRejected(format!(
                    "{} with {}-byte keys",
                    msg.cipher,
                    msg.key_len()
                )));
            }
            self.epoch.rx_install(msg, Bytes::copy_from_slice(bytes))
        });

        match &result {
            Ok(KmInstall::Installed { .. }) => self.stats.km_installed += 1,
            Ok(KmInstall::Unchanged { .. }) => self.stats.km_unchanged += 1,
            Err(e) => {
                self.stats.km_rejected += 1;
                tracing::warn!("Rejected KM message: {}", e);
            }
        }
        result
    }

    // ---- lifecycle ----

    pub fn stats(&self) -> CryptoStats {
        let mut stats = self.stats.clone();
        stats.keys_generated = self.epoch.keys_generated();
        stats
    }

    /// Tear the context down, wiping all key material
    pub fn close(mut self) -> CryptoStats {
        let stats = self.stats();
        self.epoch.clear();
        tracing::debug!(
            "Closed {:?} context after {} packets",
            self.config.direction,
            stats.packets_encrypted + stats.packets_decrypted
        );
        stats
    }
}

impl Drop for SessionContext {
    fn drop(&mut self) {
        self.tx_buf.zeroize();
    }
}
