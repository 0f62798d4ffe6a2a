use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use srt_crypto::keywrap;
use srt_crypto::{
    CipherMode, KeyMaterial, Secret, SessionConfig, SessionContext, TransportMode,
};
use std::time::Instant;

const PAYLOAD_LEN: usize = 1316; // 7 transport stream packets

fn contexts(mode: CipherMode) -> (SessionContext, SessionContext) {
    let secret = Secret::preshared(&[0x5A; 32]).unwrap();
    let tx_cfg = SessionConfig::tx(secret.clone()).with_cipher(mode);
    let rx_cfg = SessionConfig::rx(secret).with_cipher(mode);
    let mut tx = SessionContext::new(tx_cfg).unwrap();
    let mut rx = SessionContext::new(rx_cfg).unwrap();
    for km in tx.tx_manage_keys(Instant::now()).unwrap() {
        rx.rx_install_key(&km.to_bytes()).unwrap();
    }
    (tx, rx)
}

fn bench_tx_process(c: &mut Criterion) {
    let mut group = c.benchmark_group("tx_process");
    group.throughput(Throughput::Bytes(PAYLOAD_LEN as u64));
    let payload = vec![0x47u8; PAYLOAD_LEN];

    for mode in [CipherMode::Ctr, CipherMode::Cbc, CipherMode::Gcm] {
        let (mut tx, _) = contexts(mode);
        let now = Instant::now();
        group.bench_function(mode.to_string(), |b| {
            b.iter(|| {
                let segments = tx.tx_process(black_box(&payload), now, 3).unwrap();
                black_box(segments.data().len());
            });
        });
    }

    group.finish();
}

fn bench_rx_process(c: &mut Criterion) {
    let mut group = c.benchmark_group("rx_process");
    group.throughput(Throughput::Bytes(PAYLOAD_LEN as u64));
    let payload = vec![0x47u8; PAYLOAD_LEN];

    for mode in [CipherMode::Ctr, CipherMode::Cbc, CipherMode::Gcm] {
        let (mut tx, mut rx) = contexts(mode);
        let packet = tx
            .tx_process(&payload, Instant::now(), 3)
            .unwrap()
            .data()
            .to_vec();
        let mut buf = packet.clone();

        group.bench_function(mode.to_string(), |b| {
            b.iter(|| {
                buf.copy_from_slice(&packet);
                let out = rx.rx_process(black_box(&mut buf)).unwrap();
                black_box(out);
            });
        });
    }

    group.finish();
}

fn bench_key_management(c: &mut Criterion) {
    let kek = KeyMaterial::from_slice(&[1u8; 16]).unwrap();
    let sek = KeyMaterial::from_slice(&[2u8; 16]).unwrap();

    c.bench_function("key_wrap_128", |b| {
        b.iter(|| {
            let wrapped = keywrap::wrap(black_box(&kek), black_box(&sek)).unwrap();
            black_box(wrapped);
        });
    });

    let secret = Secret::passphrase("benchmark passphrase").unwrap();
    let salt = [0x33u8; 16];
    c.bench_function("passphrase_kek_derivation", |b| {
        b.iter(|| {
            let kek = secret.derive_kek(black_box(&salt), 16).unwrap();
            black_box(kek);
        });
    });

    c.bench_function("context_setup_standalone", |b| {
        b.iter(|| {
            let cfg = SessionConfig::tx(secret.clone()).with_transport(TransportMode::Standalone);
            let mut tx = SessionContext::new(cfg).unwrap();
            let km = tx.tx_manage_keys(Instant::now()).unwrap();
            black_box(km);
        });
    });
}

criterion_group!(benches, bench_tx_process, bench_rx_process, bench_key_management);
criterion_main!(benches);
