//! Key rotation tests
//!
//! These tests drive a sender through even/odd key rollovers with a small
//! refresh rate (R = 100, P = 10) and check that the receiver follows without
//! losing a packet, that replayed keying material is refused, and that the
//! KM re-send schedule behaves.

use bytes::BytesMut;
use srt_crypto::*;
use std::time::{Duration, Instant};

const REFRESH_RATE: u32 = 100;
const PRE_ANNOUNCE: u32 = 10;

fn secret() -> Secret {
    Secret::passphrase("rotation test passphrase").unwrap()
}

fn rotating(direction: Direction, transport: TransportMode) -> SessionContext {
    let cfg = SessionConfig::new(direction, secret())
        .with_transport(transport)
        .with_km_refresh_rate(REFRESH_RATE)
        .with_km_pre_announce(PRE_ANNOUNCE);
    SessionContext::new(cfg).unwrap()
}

/// Helper to build an SRT data header for `seq`
fn srt_header(seq: u32) -> [u8; 16] {
    let mut header = [0u8; 16];
    TransportMode::FramedBySession
        .write_prefix(&mut header, KeyFlags::NONE, seq)
        .unwrap();
    header
}

// ============================================================================
// ROLLOVER CONTINUITY
// ============================================================================

#[test]
fn test_standalone_rollover_continuity() {
    let mut tx = rotating(Direction::Tx, TransportMode::Standalone);
    let mut rx = rotating(Direction::Rx, TransportMode::Standalone);
    let now = Instant::now();

    for km in tx.tx_manage_keys(now).unwrap() {
        rx.rx_install_key(&km.to_bytes()).unwrap();
    }

    let mut km_sent_with = Vec::new();
    let mut flags = Vec::new();

    for n in 1..=110u32 {
        let payload = n.to_be_bytes();
        let segments = tx.tx_process(&payload, now, MAX_TX_SEGMENTS).unwrap();

        for km in segments.keying_material() {
            km_sent_with.push(n);
            let mut km = km.to_vec();
            match rx.rx_process(&mut km).unwrap() {
                RxOutput::KeyingMaterial(KmInstall::Installed {
                    parity, generation, ..
                }) => {
                    assert_eq!(parity, Parity::Odd);
                    assert_eq!(generation, 2);
                }
                other => panic!("packet {}: unexpected {:?}", n, other),
            }
        }

        let mut data = segments.data().to_vec();
        flags.push(TransportMode::Standalone.read_key_flags(&data).unwrap());
        match rx.rx_process(&mut data) {
            Ok(RxOutput::Payload(plain)) => assert_eq!(plain, &payload[..], "packet {}", n),
            other => panic!("packet {} did not decrypt: {:?}", n, other),
        }
    }

    // the new key is announced right after packet 90
    assert_eq!(km_sent_with, vec![91]);

    // packets 1..=100 under the even key, 101..=110 under the odd key
    assert!(flags[..100].iter().all(|f| *f == KeyFlags::EVEN));
    assert!(flags[100..].iter().all(|f| *f == KeyFlags::ODD));

    // both sides dropped the even key after the post-announce window
    assert_eq!(tx.key_state(Parity::Even), SekState::Empty);
    assert_eq!(rx.key_state(Parity::Even), SekState::Empty);
    assert_eq!(tx.tx_key_flags().unwrap(), KeyFlags::ODD);
    assert_eq!(rx.stats().packets_decrypted, 110);
}

#[test]
fn test_srt_framing_rollover_continuity() {
    let mut tx = rotating(Direction::Tx, TransportMode::FramedBySession);
    let mut rx = rotating(Direction::Rx, TransportMode::FramedBySession);
    let now = Instant::now();
    let mut generations = Vec::new();

    // three full key lifetimes
    for seq in 1..=320u32 {
        for km in tx.tx_manage_keys(now).unwrap() {
            generations.push((seq, km.generation));
            rx.rx_install_key(&km.to_bytes()).unwrap();
        }

        let mut header = srt_header(seq);
        let mut data = BytesMut::from(&seq.to_be_bytes()[..]);
        tx.tx_data(&mut header, &mut data, now).unwrap();
        rx.rx_data(&header, &mut data).unwrap();
        assert_eq!(&data[..], &seq.to_be_bytes()[..]);
    }

    assert_eq!(generations, vec![(1, 1), (91, 2), (191, 3), (291, 4)]);
    assert_eq!(rx.epoch().active_parity(), Some(Parity::Odd));
    assert_eq!(rx.key_state(Parity::Even), SekState::Empty);
}

#[test]
fn test_late_packets_under_retiring_key() {
    let mut tx = rotating(Direction::Tx, TransportMode::Standalone);
    let mut rx = rotating(Direction::Rx, TransportMode::Standalone);
    let now = Instant::now();
    for km in tx.tx_manage_keys(now).unwrap() {
        rx.rx_install_key(&km.to_bytes()).unwrap();
    }

    let mut held_back = Vec::new();
    for n in 1..=105u32 {
        let segments = tx.tx_process(&n.to_be_bytes(), now, 3).unwrap();
        for km in segments.keying_material() {
            rx.rx_process(&mut km.to_vec()).unwrap();
        }
        let data = segments.data().to_vec();
        if (96..=100).contains(&n) {
            // delayed past the switch
            held_back.push((n, data));
        } else {
            rx.rx_process(&mut data.clone()).unwrap();
        }
    }

    // five odd packets arrived first; the even key is still accepted
    for (n, mut data) in held_back {
        match rx.rx_process(&mut data).unwrap() {
            RxOutput::Payload(plain) => assert_eq!(plain, &n.to_be_bytes()[..]),
            other => panic!("unexpected {:?}", other),
        }
    }
}

// ============================================================================
// REPLAY AND RE-SEND
// ============================================================================

#[test]
fn test_replayed_km_is_refused() {
    let mut tx = rotating(Direction::Tx, TransportMode::FramedBySession);
    let mut rx = rotating(Direction::Rx, TransportMode::FramedBySession);
    let now = Instant::now();

    let first = tx.tx_manage_keys(now).unwrap().remove(0).to_bytes();
    assert!(matches!(
        rx.rx_install_key(&first).unwrap(),
        KmInstall::Installed { generation: 1, .. }
    ));

    // identical re-send while installed
    assert_eq!(
        rx.rx_install_key(&first).unwrap(),
        KmInstall::Unchanged {
            parity: Parity::Even,
            generation: 1
        }
    );

    for seq in 1..=110u32 {
        for km in tx.tx_manage_keys(now).unwrap() {
            rx.rx_install_key(&km.to_bytes()).unwrap();
        }
        let mut header = srt_header(seq);
        let mut data = BytesMut::from(&b"payload"[..]);
        tx.tx_data(&mut header, &mut data, now).unwrap();
        rx.rx_data(&header, &mut data).unwrap();
    }
    assert_eq!(rx.key_state(Parity::Even), SekState::Empty);

    assert_eq!(
        rx.rx_install_key(&first).unwrap_err(),
        CryptoError::StaleGeneration {
            parity: Parity::Even,
            generation: 1,
            last_seen: 1
        }
    );

    // the active key is unchanged
    let active = rx.epoch().active_for_encrypt().unwrap();
    assert_eq!(active.parity(), Parity::Odd);
    assert_eq!(active.generation(), 2);
    assert_eq!(rx.stats().km_rejected, 1);
}

#[test]
fn test_km_resend_until_acknowledged() {
    let mut tx = rotating(Direction::Tx, TransportMode::FramedBySession);
    let start = Instant::now();

    assert_eq!(tx.tx_manage_keys(start).unwrap().len(), 1);
    assert!(tx.tx_manage_keys(start + Duration::from_millis(500)).unwrap().is_empty());

    let resent = tx.tx_manage_keys(start + Duration::from_millis(1000)).unwrap();
    assert_eq!(resent.len(), 1);
    assert_eq!(resent[0].generation, 1);

    assert!(tx.tx_acknowledge_km(Parity::Even, 1).unwrap());
    assert!(tx.tx_manage_keys(start + Duration::from_secs(10)).unwrap().is_empty());
    assert!(!tx.tx_acknowledge_km(Parity::Odd, 7).unwrap());
}

#[test]
fn test_resent_km_bytes_are_identical() {
    let mut tx = rotating(Direction::Tx, TransportMode::FramedBySession);
    let start = Instant::now();
    let first = tx.tx_manage_keys(start).unwrap();
    let again = tx.tx_manage_keys(start + Duration::from_secs(2)).unwrap();
    assert_eq!(first[0].to_bytes(), again[0].to_bytes());
}

#[test]
fn test_time_based_rotation() {
    let cfg = SessionConfig::tx(secret())
        .with_transport(TransportMode::FramedBySession)
        .with_km_refresh_period(Duration::from_secs(60));
    let mut tx = SessionContext::new(cfg).unwrap();
    let start = Instant::now();

    tx.tx_manage_keys(start).unwrap();
    assert!(tx.tx_acknowledge_km(Parity::Even, 1).unwrap());
    assert!(tx.tx_manage_keys(start + Duration::from_secs(59)).unwrap().is_empty());

    let due = tx.tx_manage_keys(start + Duration::from_secs(60)).unwrap();
    assert_eq!(due.len(), 1);
    assert_eq!(due[0].parity, Parity::Odd);
    assert_eq!(due[0].generation, 2);
    assert_eq!(tx.key_state(Parity::Odd), SekState::Pending);
    assert_eq!(tx.tx_key_flags().unwrap(), KeyFlags::BOTH);
}

#[test]
fn test_initial_key_only_once() {
    let mut tx = rotating(Direction::Tx, TransportMode::Standalone);
    let now = Instant::now();
    tx.tx_manage_keys(now).unwrap();
    tx.tx_manage_keys(now).unwrap();
    assert_eq!(tx.stats().keys_generated, 1);
    assert_eq!(tx.epoch().active_for_encrypt().unwrap().generation(), 1);
}
