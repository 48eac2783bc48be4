//! Routing benchmarks for Switchboard.
//!
//! Measures announce cost and account-wide fan-out of device telemetry.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use switchboard_core::{Delivery, Router, RouterConfig};
use switchboard_protocol::{Announce, CallEvent, ConnectionId, InboundEvent, OpaqueId};
use tokio::sync::mpsc;

fn router_with_operators(operators: usize) -> (Router, Vec<mpsc::Receiver<Delivery>>) {
    let router = Router::with_config(RouterConfig {
        mailbox_capacity: 1 << 16,
        ..RouterConfig::default()
    });
    let mailboxes = (0..operators)
        .map(|i| {
            let id = ConnectionId::new(format!("op-{i}"));
            let rx = router.connect(&id).unwrap();
            router
                .dispatch(&id, InboundEvent::Authenticate(Announce::operator("acct")))
                .unwrap();
            rx
        })
        .collect();
    (router, mailboxes)
}

fn drain(mailboxes: &mut [mpsc::Receiver<Delivery>]) {
    for rx in mailboxes {
        while rx.try_recv().is_ok() {}
    }
}

/// Benchmark identity announces.
fn bench_announce(c: &mut Criterion) {
    let mut group = c.benchmark_group("announce");

    group.bench_function("device", |b| {
        let router = Router::new();
        let mut i = 0u64;
        b.iter(|| {
            let id = ConnectionId::new(format!("dev-{i}"));
            let _rx = router.connect(&id).unwrap();
            router
                .dispatch(
                    &id,
                    InboundEvent::Authenticate(Announce::device("acct", format!("D{i}"))),
                )
                .unwrap();
            router.disconnect(&id);
            i += 1;
        });
    });

    group.finish();
}

/// Benchmark relaying a call event to every operator of an account.
fn bench_fanout(c: &mut Criterion) {
    let mut group = c.benchmark_group("fanout");

    for operators in [1, 10, 100] {
        let (router, mut mailboxes) = router_with_operators(operators);
        let device = ConnectionId::new("dev");
        let _device_rx = router.connect(&device).unwrap();
        router
            .dispatch(&device, InboundEvent::Authenticate(Announce::device("acct", "D1")))
            .unwrap();
        drain(&mut mailboxes);

        let event = InboundEvent::CallInitiated(CallEvent {
            call_id: OpaqueId::text("call-1"),
            campaign_id: Some(OpaqueId::int(7)),
            contact_id: Some(OpaqueId::int(99)),
            device_id: Some(OpaqueId::text("D1")),
        });

        group.throughput(Throughput::Elements(operators as u64));
        group.bench_with_input(
            BenchmarkId::new("call_initiated", operators),
            &operators,
            |b, _| {
                b.iter(|| {
                    let delivered = router.dispatch(&device, black_box(event.clone())).unwrap();
                    drain(&mut mailboxes);
                    delivered
                });
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_announce, bench_fanout);
criterion_main!(benches);
