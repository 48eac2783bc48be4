//! Codec benchmarks for switchboard-protocol.

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use switchboard_protocol::{
    codec, CallEnded, Encoding, InboundEvent, OpaqueId, OutboundEvent, Stamped,
};

fn call_ended() -> CallEnded {
    CallEnded {
        call_id: OpaqueId::text("call-8812"),
        campaign_id: Some(OpaqueId::int(7)),
        contact_id: Some(OpaqueId::int(55_120)),
        device_id: Some(OpaqueId::text("pixel-7a-01")),
        duration: Some(43.into()),
        status: Some("completed".into()),
        dtmf_response: Some("1".into()),
    }
}

fn bench_encode(c: &mut Criterion) {
    let event = OutboundEvent::CallEnded(Stamped::now(call_ended()));

    let mut group = c.benchmark_group("encode");
    group.bench_function("call_ended_json", |b| {
        b.iter(|| codec::encode(black_box(&event), Encoding::Json))
    });
    group.bench_function("call_ended_msgpack", |b| {
        b.iter(|| codec::encode(black_box(&event), Encoding::MessagePack))
    });
    group.finish();
}

fn bench_decode(c: &mut Criterion) {
    let event = InboundEvent::CallEnded(call_ended());
    let text = codec::encode(&event, Encoding::Json).unwrap();
    let binary = codec::encode(&event, Encoding::MessagePack).unwrap();

    let mut group = c.benchmark_group("decode");
    group.throughput(Throughput::Bytes(text.len() as u64));
    group.bench_function("call_ended_json", |b| {
        b.iter(|| codec::decode::<InboundEvent>(black_box(&text)))
    });
    group.throughput(Throughput::Bytes(binary.len() as u64));
    group.bench_function("call_ended_msgpack", |b| {
        b.iter(|| codec::decode::<InboundEvent>(black_box(&binary)))
    });
    group.finish();
}

criterion_group!(benches, bench_encode, bench_decode);
criterion_main!(benches);
