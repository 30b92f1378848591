//! Codec benchmarks for relay-protocol.

use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use relay_protocol::{codec, PacketCodec, PayloadProcessor};
use serde_json::json;

fn bench_encode_event(c: &mut Criterion) {
    let packet = PacketCodec::new().create_event("/", "chat", vec![json!("x".repeat(64))]);

    let mut group = c.benchmark_group("encode");
    group.throughput(Throughput::Bytes(64));
    group.bench_function("event_64B", |b| {
        b.iter(|| codec::encode_engine(black_box(&packet)))
    });
    group.finish();
}

fn bench_decode_event(c: &mut Criterion) {
    let packet = PacketCodec::new().create_event("/", "chat", vec![json!("x".repeat(64))]);
    let encoded = codec::encode_engine(&packet);

    let mut group = c.benchmark_group("decode");
    group.throughput(Throughput::Bytes(encoded.len() as u64));
    group.bench_function("event_64B", |b| {
        b.iter(|| {
            let engine = codec::decode_engine(black_box(&encoded)).unwrap();
            PacketCodec::new().unwrap_message(&engine).unwrap()
        })
    });
    group.finish();
}

fn bench_payload_roundtrip(c: &mut Criterion) {
    let processor = PayloadProcessor::new();
    let packets: Vec<Bytes> = (0..16)
        .map(|i| codec::encode_engine(&PacketCodec::new().create_event("/", "tick", vec![json!(i)])))
        .collect();

    c.bench_function("payload_roundtrip_16", |b| {
        b.iter(|| {
            let payload = processor.encode_payload(black_box(&packets));
            processor.decode_payload(black_box(&payload)).unwrap()
        })
    });
}

criterion_group!(
    benches,
    bench_encode_event,
    bench_decode_event,
    bench_payload_roundtrip
);
criterion_main!(benches);
