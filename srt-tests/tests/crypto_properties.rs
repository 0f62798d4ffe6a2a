//! Property-based tests for the encryption engine
//!
//! These tests use proptest to generate random payloads, cipher settings
//! and wire bytes, and check round trips and that malformed input is always
//! rejected without a panic.

use proptest::prelude::*;
use srt_crypto::*;
use std::time::Instant;

// Property test strategies

fn cipher_strategy() -> impl Strategy<Value = (CipherMode, usize)> {
    prop_oneof![
        Just((CipherMode::Ctr, 16)),
        Just((CipherMode::Ctr, 24)),
        Just((CipherMode::Ctr, 32)),
        Just((CipherMode::Cbc, 16)),
        Just((CipherMode::Cbc, 24)),
        Just((CipherMode::Cbc, 32)),
        Just((CipherMode::Gcm, 16)),
        Just((CipherMode::Gcm, 32)),
    ]
}

fn transport_strategy() -> impl Strategy<Value = TransportMode> {
    prop_oneof![
        Just(TransportMode::Standalone),
        Just(TransportMode::FramedBySession),
    ]
}

fn payload_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..=1500)
}

fn keyed_pair(
    mode: CipherMode,
    key_len: usize,
    transport: TransportMode,
) -> (SessionContext, SessionContext) {
    let secret = Secret::preshared(&[0x3C; 32]).unwrap();
    let configure = |cfg: SessionConfig| {
        cfg.with_cipher(mode)
            .with_key_len(key_len)
            .with_transport(transport)
    };
    let mut tx = SessionContext::new(configure(SessionConfig::tx(secret.clone()))).unwrap();
    let mut rx = SessionContext::new(configure(SessionConfig::rx(secret))).unwrap();
    for km in tx.tx_manage_keys(Instant::now()).unwrap() {
        rx.rx_install_key(&km.to_bytes()).unwrap();
    }
    (tx, rx)
}

// Property tests

proptest! {
    #[test]
    fn prop_roundtrip(
        (mode, key_len) in cipher_strategy(),
        transport in transport_strategy(),
        payload in payload_strategy(),
    ) {
        let (mut tx, mut rx) = keyed_pair(mode, key_len, transport);
        let mut packet = tx
            .tx_process(&payload, Instant::now(), MAX_TX_SEGMENTS)
            .unwrap()
            .data()
            .to_vec();

        match rx.rx_process(&mut packet) {
            Ok(RxOutput::Payload(plain)) => prop_assert_eq!(plain, &payload[..]),
            other => prop_assert!(false, "unexpected {:?}", other),
        }
    }

    #[test]
    fn prop_output_length(
        (mode, key_len) in cipher_strategy(),
        payload in payload_strategy(),
    ) {
        let (mut tx, _) = keyed_pair(mode, key_len, TransportMode::Standalone);
        let len = tx
            .tx_process(&payload, Instant::now(), MAX_TX_SEGMENTS)
            .unwrap()
            .data()
            .len() - 8;

        let expected = match mode {
            CipherMode::Ctr => payload.len(),
            CipherMode::Cbc => (payload.len() / 16 + 1) * 16,
            CipherMode::Gcm => payload.len() + 16,
        };
        prop_assert_eq!(len, expected);
    }

    #[test]
    fn prop_gcm_rejects_any_bit_flip(
        payload in prop::collection::vec(any::<u8>(), 1..=256),
        bit in any::<prop::sample::Index>(),
    ) {
        let (mut tx, mut rx) = keyed_pair(CipherMode::Gcm, 16, TransportMode::Standalone);
        let mut packet = tx
            .tx_process(&payload, Instant::now(), MAX_TX_SEGMENTS)
            .unwrap()
            .data()
            .to_vec();

        let bit = bit.index(packet.len() * 8);
        packet[bit / 8] ^= 1 << (bit % 8);
        prop_assert!(rx.rx_process(&mut packet).is_err());

        // state untouched: a fresh packet still decrypts
        let mut good = tx
            .tx_process(&payload, Instant::now(), MAX_TX_SEGMENTS)
            .unwrap()
            .data()
            .to_vec();
        prop_assert!(rx.rx_process(&mut good).is_ok());
    }

    #[test]
    fn prop_km_decode_never_panics(bytes in prop::collection::vec(any::<u8>(), 0..=128)) {
        let _ = KmMessage::from_bytes(&bytes);
    }

    #[test]
    fn prop_km_decode_with_valid_header_never_panics(
        tail in prop::collection::vec(any::<u8>(), 0..=96),
        flags in 0u8..4,
    ) {
        let mut bytes = vec![0x12, 0x20, 0x29, flags];
        bytes.extend_from_slice(&tail);
        if let Ok(msg) = KmMessage::from_bytes(&bytes) {
            prop_assert_eq!(msg.to_bytes().len(), bytes.len());
        }
    }

    #[test]
    fn prop_rx_arbitrary_packets_never_panic(
        transport in transport_strategy(),
        (mode, key_len) in cipher_strategy(),
        mut packet in prop::collection::vec(any::<u8>(), 0..=512),
    ) {
        let (_, mut rx) = keyed_pair(mode, key_len, transport);
        let _ = rx.rx_process(&mut packet);
    }

    #[test]
    fn prop_wrap_roundtrip(
        kek in prop_oneof![
            prop::collection::vec(any::<u8>(), 16),
            prop::collection::vec(any::<u8>(), 24),
            prop::collection::vec(any::<u8>(), 32),
        ],
        sek in prop_oneof![
            prop::collection::vec(any::<u8>(), 16),
            prop::collection::vec(any::<u8>(), 24),
            prop::collection::vec(any::<u8>(), 32),
        ],
    ) {
        let kek = KeyMaterial::from_slice(&kek).unwrap();
        let sek = KeyMaterial::from_slice(&sek).unwrap();
        let wrapped = keywrap::wrap(&kek, &sek).unwrap();
        prop_assert_eq!(wrapped.len(), sek.len() + 8);
        prop_assert_eq!(keywrap::unwrap(&kek, &wrapped).unwrap(), sek);
    }

    #[test]
    fn prop_packet_index_strictly_increases(count in 2usize..64) {
        let (mut tx, _) = keyed_pair(CipherMode::Ctr, 16, TransportMode::FramedBySession);
        let mut last = None;
        for _ in 0..count {
            let packet = tx
                .tx_process(b"x", Instant::now(), MAX_TX_SEGMENTS)
                .unwrap()
                .data()
                .to_vec();
            let pki = TransportMode::FramedBySession.read_pki(&packet).unwrap();
            if let Some(prev) = last {
                prop_assert!(TransportMode::FramedBySession.pki_after(pki, prev));
            }
            last = Some(pki);
        }
    }
}
