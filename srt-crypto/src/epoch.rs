//! Stream encrypting key epochs
//!
//! Two key slots, indexed by parity, let a sender announce the next key
//! while the current one is still in use, and let a receiver keep the
//! previous key for packets that arrive late.
//!
//! Sender timeline for refresh rate `R` and announce window `P`:
//!
//! ```text
//! packets   1 ........ R-P ........ R ........ R+P
//! even      Active ---------------- Retiring -- Empty
//! odd                   Pending --- Active ------------->
//! ```

use crate::backend::{CipherMode, SALT_LEN};
use crate::config::{Direction, SessionConfig};
use crate::error::{CryptoError, Result};
use crate::km::KmMessage;
use crate::ring_impl::fill_random;
use crate::secret::{KeyMaterial, Secret};
use bytes::Bytes;
use ring::rand::SystemRandom;
use std::fmt;
use std::ops::{BitOr, BitOrAssign};
use std::time::{Duration, Instant};

/// Key slot selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Parity {
    Even = 0,
    Odd = 1,
}

impl Parity {
    /// Slot index (0 even, 1 odd)
    pub fn index(self) -> usize {
        self as usize
    }

    /// The other slot
    pub fn other(self) -> Self {
        match self {
            Parity::Even => Parity::Odd,
            Parity::Odd => Parity::Even,
        }
    }

    /// Wire flags naming this slot
    pub fn key_flags(self) -> KeyFlags {
        match self {
            Parity::Even => KeyFlags::EVEN,
            Parity::Odd => KeyFlags::ODD,
        }
    }

    /// Slot named by `flags`, if exactly one bit is set
    pub fn from_key_flags(flags: KeyFlags) -> Option<Self> {
        match flags {
            KeyFlags::EVEN => Some(Parity::Even),
            KeyFlags::ODD => Some(Parity::Odd),
            _ => None,
        }
    }
}

/// Two-bit key flags field carried in packet prefixes and KM messages
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct KeyFlags(u8);

impl KeyFlags {
    /// Clear packet
    pub const NONE: KeyFlags = KeyFlags(0);
    pub const EVEN: KeyFlags = KeyFlags(0b01);
    pub const ODD: KeyFlags = KeyFlags(0b10);
    pub const BOTH: KeyFlags = KeyFlags(0b11);

    /// Flags from the low two bits of `bits`
    pub fn from_bits(bits: u8) -> Self {
        KeyFlags(bits & 0b11)
    }

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn contains(self, other: KeyFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for KeyFlags {
    type Output = KeyFlags;

    fn bitor(self, rhs: KeyFlags) -> KeyFlags {
        KeyFlags(self.0 | rhs.0)
    }
}

impl BitOrAssign for KeyFlags {
    fn bitor_assign(&mut self, rhs: KeyFlags) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for KeyFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            KeyFlags::NONE => write!(f, "NONE"),
            KeyFlags::EVEN => write!(f, "EVEN"),
            KeyFlags::ODD => write!(f, "ODD"),
            _ => write!(f, "EVEN|ODD"),
        }
    }
}

/// Lifecycle state of a key slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SekState {
    /// No key in the slot
    Empty,
    /// Announced, not yet used for encryption
    Pending,
    /// Current key
    Active,
    /// Replaced, still accepted for decryption
    Retiring,
}

impl fmt::Display for SekState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SekState::Empty => write!(f, "empty"),
            SekState::Pending => write!(f, "pending"),
            SekState::Active => write!(f, "active"),
            SekState::Retiring => write!(f, "retiring"),
        }
    }
}

/// Stream encrypting key held in a slot
///
/// Key bytes are wiped when the slot is cleared.
#[derive(Debug)]
pub struct Sek {
    parity: Parity,
    generation: u32,
    key: KeyMaterial,
    salt: [u8; SALT_LEN],
    state: SekState,
    /// Packets encrypted (Tx) or decrypted (Rx) under this key
    packets: u64,
    /// Last packet index encrypted under this key
    last_pki: Option<u32>,
    created_at: Option<Instant>,
    km: KmMessage,
    km_bytes: Bytes,
    km_sent_at: Option<Instant>,
    km_acknowledged: bool,
}

impl Sek {
    pub fn parity(&self) -> Parity {
        self.parity
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }

    pub fn state(&self) -> SekState {
        self.state
    }

    pub fn key(&self) -> &KeyMaterial {
        &self.key
    }

    pub fn salt(&self) -> &[u8; SALT_LEN] {
        &self.salt
    }

    pub fn packets(&self) -> u64 {
        self.packets
    }

    pub fn last_pki(&self) -> Option<u32> {
        self.last_pki
    }

    /// KM message announcing this key
    pub fn km(&self) -> &KmMessage {
        &self.km
    }

    /// Encoded KM message, identical on every resend
    pub fn km_bytes(&self) -> &Bytes {
        &self.km_bytes
    }

    fn km_due(&self, now: Instant, period: Duration) -> bool {
        if self.km_acknowledged || !matches!(self.state, SekState::Pending | SekState::Active) {
            return false;
        }
        match self.km_sent_at {
            None => true,
            Some(sent) => now.saturating_duration_since(sent) >= period,
        }
    }
}

/// Outcome of installing a received KM message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KmInstall {
    /// Key unwrapped and placed in its slot
    Installed {
        parity: Parity,
        generation: u32,
        state: SekState,
    },
    /// Re-send of the message already installed in that slot
    Unchanged { parity: Parity, generation: u32 },
}

/// Key slots and the rules moving keys between them
#[derive(Debug)]
pub struct KeyEpoch {
    direction: Direction,
    cipher: CipherMode,
    key_len: usize,
    stream_encapsulation: u8,
    refresh_rate: u64,
    pre_announce: u64,
    km_tx_period: Duration,
    refresh_period: Option<Duration>,
    secret: Secret,
    rng: SystemRandom,
    slots: [Option<Sek>; 2],
    active: Option<Parity>,
    /// Packets counted through the current announce or retire window
    window: u64,
    last_generation: [Option<u32>; 2],
    next_generation: u32,
    generated: u64,
}

impl KeyEpoch {
    /// Empty epoch for a validated configuration
    pub fn new(config: &SessionConfig) -> Self {
        KeyEpoch {
            direction: config.direction,
            cipher: config.cipher,
            key_len: config.key_len,
            stream_encapsulation: config.transport.stream_encapsulation(),
            refresh_rate: u64::from(config.km_refresh_rate_pkt),
            pre_announce: u64::from(config.km_pre_announce_pkt),
            km_tx_period: config.km_tx_period,
            refresh_period: config.km_refresh_period,
            secret: config.secret.clone(),
            rng: SystemRandom::new(),
            slots: [None, None],
            active: None,
            window: 0,
            last_generation: [None, None],
            next_generation: 1,
            generated: 0,
        }
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn slot(&self, parity: Parity) -> Option<&Sek> {
        self.slots[parity.index()].as_ref()
    }

    pub fn state(&self, parity: Parity) -> SekState {
        self.slot(parity).map_or(SekState::Empty, |sek| sek.state)
    }

    pub fn active_parity(&self) -> Option<Parity> {
        self.active
    }

    /// Keys generated by this epoch (Tx)
    pub fn keys_generated(&self) -> u64 {
        self.generated
    }

    /// Flags of every key currently held
    pub fn key_flags(&self) -> KeyFlags {
        let mut flags = KeyFlags::NONE;
        for sek in self.slots.iter().flatten() {
            flags |= sek.parity.key_flags();
        }
        flags
    }

    /// Key used for the next encrypted packet
    pub fn active_for_encrypt(&self) -> Result<&Sek> {
        self.active
            .and_then(|parity| self.slot(parity))
            .ok_or(CryptoError::NoKeyAvailable)
    }

    /// Key accepted for packets flagged with `parity`
    pub fn acceptable_for_decrypt(&self, parity: Parity) -> Option<&Sek> {
        self.slot(parity)
            .filter(|sek| matches!(sek.state, SekState::Active | SekState::Retiring))
    }

    // ---- Tx ----

    /// Create the first key if none exists and start a timed rotation when due
    pub fn tx_refresh(&mut self, now: Instant) -> Result<()> {
        let active = match self.active {
            None => {
                self.generate(Parity::Even, SekState::Active, now)?;
                self.active = Some(Parity::Even);
                self.window = 0;
                return Ok(());
            }
            Some(parity) => parity,
        };

        if self.slot(active.other()).is_none() && self.time_budget_spent(active, now) {
            self.start_rotation(active, now)?;
        }
        Ok(())
    }

    /// Parities whose KM message is due at `now`, Active key first
    pub fn tx_due_km(&self, now: Instant) -> impl Iterator<Item = Parity> + '_ {
        let first = self.active.unwrap_or(Parity::Even);
        [first, first.other()].into_iter().filter(move |parity| {
            self.slot(*parity)
                .map_or(false, |sek| sek.km_due(now, self.km_tx_period))
        })
    }

    /// Record that the KM message of `parity` went out at `now`
    pub fn tx_mark_km_sent(&mut self, parity: Parity, now: Instant) {
        if let Some(sek) = self.slots[parity.index()].as_mut() {
            sek.km_sent_at = Some(now);
        }
    }

    /// Stop re-sending the KM message for `generation`
    ///
    /// Returns false when no held key matches.
    pub fn tx_acknowledge(&mut self, parity: Parity, generation: u32) -> bool {
        match self.slots[parity.index()].as_mut() {
            Some(sek) if sek.generation == generation => {
                sek.km_acknowledged = true;
                tracing::debug!("KM for {:?} key generation {} acknowledged", parity, generation);
                true
            }
            _ => false,
        }
    }

    /// Account one packet encrypted under the active key
    ///
    /// Drives the pre-announce, switch and retire transitions.
    pub fn tx_on_packet(&mut self, pki: u32, now: Instant) -> Result<()> {
        let active = self.active.ok_or(CryptoError::NoKeyAvailable)?;
        let packets = match self.slots[active.index()].as_mut() {
            Some(sek) => {
                sek.packets += 1;
                sek.last_pki = Some(pki);
                sek.packets
            }
            None => return Err(CryptoError::NoKeyAvailable),
        };

        match self.state(active.other()) {
            SekState::Empty => {
                if packets >= self.refresh_rate.saturating_sub(self.pre_announce)
                    || self.time_budget_spent(active, now)
                {
                    self.start_rotation(active, now)?;
                }
            }
            SekState::Pending => {
                self.window += 1;
                if self.window >= self.pre_announce {
                    self.switch(active);
                }
            }
            SekState::Retiring => {
                self.window += 1;
                if self.window >= self.pre_announce {
                    self.retire(active.other());
                }
            }
            SekState::Active => {}
        }
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn set_key_len(&mut self, key_len: usize) {
        self.key_len = key_len;
    }

    fn time_budget_spent(&self, active: Parity, now: Instant) -> bool {
        match (self.refresh_period, self.slot(active).and_then(|sek| sek.created_at)) {
            (Some(period), Some(created)) => now.saturating_duration_since(created) >= period,
            _ => false,
        }
    }

    fn start_rotation(&mut self, active: Parity, now: Instant) -> Result<()> {
        self.generate(active.other(), SekState::Pending, now)?;
        self.window = 0;
        Ok(())
    }

    fn switch(&mut self, active: Parity) {
        let next = active.other();
        if let Some(sek) = self.slots[active.index()].as_mut() {
            sek.state = SekState::Retiring;
        }
        if let Some(sek) = self.slots[next.index()].as_mut() {
            sek.state = SekState::Active;
            tracing::info!(
                "Key rollover: {:?} -> {:?} (generation {})",
                active,
                next,
                sek.generation
            );
        }
        self.active = Some(next);
        self.window = 0;
    }

    fn retire(&mut self, parity: Parity) {
        if let Some(sek) = self.slots[parity.index()].take() {
            tracing::info!(
                "Retired {:?} key generation {} after {} packets",
                parity,
                sek.generation,
                sek.packets
            );
        }
        self.window = 0;
    }

    fn generate(&mut self, parity: Parity, state: SekState, now: Instant) -> Result<()> {
        let mut key = KeyMaterial::zeroed(self.key_len)?;
        fill_random(&self.rng, key.as_mut_slice())?;
        let mut salt = [0u8; SALT_LEN];
        fill_random(&self.rng, &mut salt)?;

        let generation = self.next_generation;
        let km = KmMessage::seal(
            &self.secret,
            &key,
            parity,
            generation,
            self.cipher,
            self.stream_encapsulation,
            salt,
        )?;
        let km_bytes = km.to_bytes();

        tracing::debug!(
            "Generated {:?} key generation {} ({}, {} bytes)",
            parity,
            generation,
            state,
            self.key_len
        );

        self.next_generation = generation.checked_add(1).unwrap_or(1);
        self.generated += 1;
        self.last_generation[parity.index()] = Some(generation);
        self.slots[parity.index()] = Some(Sek {
            parity,
            generation,
            key,
            salt,
            state,
            packets: 0,
            last_pki: None,
            created_at: Some(now),
            km,
            km_bytes,
            km_sent_at: None,
            km_acknowledged: false,
        });
        Ok(())
    }

    // ---- Rx ----

    /// Install a received KM message
    ///
    /// Nothing changes unless the key unwraps.
    pub fn rx_install(&mut self, msg: KmMessage, raw: Bytes) -> Result<KmInstall> {
        if msg.cipher != self.cipher {
            return Err(CryptoError::KmRejected(format!(
                "KM announces {} on a {} context",
                msg.cipher, self.cipher
            )));
        }

        let parity = msg.parity;
        if let Some(sek) = self.slot(parity) {
            if sek.km == msg {
                return Ok(KmInstall::Unchanged {
                    parity,
                    generation: msg.generation,
                });
            }
        }

        if let Some(last_seen) = self.last_generation[parity.index()] {
            if msg.generation <= last_seen {
                return Err(CryptoError::StaleGeneration {
                    parity,
                    generation: msg.generation,
                    last_seen,
                });
            }
        }

        let key = msg.open(&self.secret)?;

        let newest = match self.active.and_then(|p| self.slot(p)) {
            Some(current) => msg.generation > current.generation,
            None => true,
        };
        let state = if newest {
            SekState::Active
        } else {
            SekState::Retiring
        };

        let generation = msg.generation;
        if newest {
            if let Some(previous) = self.active.filter(|p| *p != parity) {
                if let Some(sek) = self.slots[previous.index()].as_mut() {
                    sek.state = SekState::Retiring;
                }
            }
            self.active = Some(parity);
        }
        self.window = 0;
        self.last_generation[parity.index()] = Some(generation);
        self.slots[parity.index()] = Some(Sek {
            parity,
            generation,
            key,
            salt: msg.salt,
            state,
            packets: 0,
            last_pki: None,
            created_at: None,
            km: msg,
            km_bytes: raw,
            km_sent_at: None,
            km_acknowledged: true,
        });

        tracing::info!(
            "Installed {:?} key generation {} as {}",
            parity,
            generation,
            state
        );

        Ok(KmInstall::Installed {
            parity,
            generation,
            state,
        })
    }

    /// Account one packet decrypted under `parity`
    ///
    /// Only packets under the active key advance the retire window.
    pub fn rx_on_packet(&mut self, parity: Parity) {
        if let Some(sek) = self.slots[parity.index()].as_mut() {
            sek.packets += 1;
        }
        if self.active != Some(parity) {
            return;
        }
        if self.state(parity.other()) == SekState::Retiring {
            self.window += 1;
            if self.window >= self.pre_announce {
                self.retire(parity.other());
            }
        }
    }

    /// Wipe both slots
    pub fn clear(&mut self) {
        self.slots = [None, None];
        self.active = None;
        self.window = 0;
    }
}
