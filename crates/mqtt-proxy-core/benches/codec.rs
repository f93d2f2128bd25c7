//! Performance benchmarks for the MQTT codec.
//!
//! Measures encode and decode throughput for PUBLISH packets of various
//! sizes, and the cost of the passthrough path for uninspected packets.

use bytes::{Bytes, BytesMut};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use tokio_util::codec::{Decoder, Encoder};

use mqtt_proxy_core::packet::{Packet, PacketType, ProtocolVersion, Publish, QoS, RawPacket};
use mqtt_proxy_core::MqttCodec;

fn publish(payload_size: usize) -> Packet {
    let mut publish = Publish::new("site/floor1/room42/temperature", vec![0xAB; payload_size]);
    publish.qos = QoS::AtLeastOnce;
    publish.packet_id = Some(7);
    publish.properties.push_user("Device", "edge-1");
    Packet::Publish(publish)
}

fn codec(version: ProtocolVersion) -> MqttCodec {
    let codec = MqttCodec::new();
    codec.set_protocol_version(version);
    codec
}

/// Benchmark PUBLISH encoding.
fn bench_encode_publish(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode_publish");

    for size in [16, 1024, 64 * 1024] {
        for version in [ProtocolVersion::V3_1_1, ProtocolVersion::V5] {
            let packet = publish(size);
            let mut codec = codec(version);

            group.throughput(Throughput::Bytes(size as u64));
            group.bench_with_input(
                BenchmarkId::new(format!("{version:?}"), size),
                &packet,
                |b, packet| {
                    let mut dst = BytesMut::with_capacity(size + 64);
                    b.iter(|| {
                        dst.clear();
                        codec.encode(black_box(packet), &mut dst).unwrap();
                    });
                },
            );
        }
    }

    group.finish();
}

/// Benchmark PUBLISH decoding from a complete frame.
fn bench_decode_publish(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode_publish");

    for size in [16, 1024, 64 * 1024] {
        for version in [ProtocolVersion::V3_1_1, ProtocolVersion::V5] {
            let mut codec = codec(version);
            let mut wire = BytesMut::new();
            codec.encode(&publish(size), &mut wire).unwrap();
            let wire = wire.freeze();

            group.throughput(Throughput::Bytes(size as u64));
            group.bench_with_input(
                BenchmarkId::new(format!("{version:?}"), size),
                &wire,
                |b, wire| {
                    b.iter(|| {
                        let mut src = BytesMut::from(&wire[..]);
                        black_box(codec.decode(&mut src).unwrap());
                    });
                },
            );
        }
    }

    group.finish();
}

/// Benchmark the opaque passthrough for packets the proxy does not inspect.
fn bench_passthrough(c: &mut Criterion) {
    let mut group = c.benchmark_group("passthrough");

    let packet = Packet::Other(RawPacket {
        packet_type: PacketType::Puback,
        flags: 0,
        body: Bytes::from_static(&[0x00, 0x07]),
    });
    let mut codec = MqttCodec::new();
    let mut wire = BytesMut::new();
    for _ in 0..1000 {
        codec.encode(&packet, &mut wire).unwrap();
    }
    let wire = wire.freeze();

    group.throughput(Throughput::Elements(1000));
    group.bench_function("puback_x1000", |b| {
        b.iter(|| {
            let mut src = BytesMut::from(&wire[..]);
            let mut out = BytesMut::with_capacity(wire.len());
            while let Some(packet) = codec.decode(&mut src).unwrap() {
                codec.encode(&packet, &mut out).unwrap();
            }
            black_box(out);
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_encode_publish,
    bench_decode_publish,
    bench_passthrough
);
criterion_main!(benches);
