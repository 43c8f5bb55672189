//! Relay and session tick benchmarks
//!
//! Measures the per-message cost of the inbound pipeline (decode, suppression,
//! dedupe) and a full session tick under a burst of traffic.
//!
//! Run with: cargo bench --bench relay

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rand::Rng;
use tokio_util::sync::CancellationToken;

use arrowduel_session::config::SessionConfig;
use arrowduel_session::metrics::Metrics;
use arrowduel_session::net::inbound::{InboundEvent, InboundQueue, PresenceList};
use arrowduel_session::net::protocol::{NetEvent, PositionRotationData};
use arrowduel_session::net::transport::SessionHandle;
use arrowduel_session::session::context::SessionContext;
use arrowduel_session::session::participant::{Participant, ParticipantId, PlayerIndex, TransportHandle};
use arrowduel_session::session::relay::{EventRelay, Outbound};
use arrowduel_session::util::vec3::Vec3;

fn participant(id: &str) -> Participant {
    Participant::new(ParticipantId::new(id), id, TransportHandle::generate())
}

/// Encoded position samples as the guest would send them
fn guest_samples(count: usize) -> Vec<Outbound> {
    let mut rng = rand::thread_rng();
    let mut relay = EventRelay::new(ParticipantId::new("bob"), PlayerIndex::GUEST);
    relay.bind_index(PlayerIndex::GUEST);
    (0..count)
        .map(|_| {
            let data = PositionRotationData {
                position: Vec3::new(rng.gen_range(-10.0..10.0), 0.0, 0.0),
                rotation_z: rng.gen_range(0.0..180.0),
                auto_rotation_angle: rng.gen_range(-90.0..90.0),
                auto_rotation_direction: 1,
                is_held: false,
            };
            relay.send(&NetEvent::PositionRotation(data)).unwrap()
        })
        .collect()
}

fn bench_relay_receive(c: &mut Criterion) {
    let mut group = c.benchmark_group("relay_receive");

    for count in [100, 1000] {
        let samples = guest_samples(count);
        let bob = ParticipantId::new("bob");
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), &samples, |b, samples| {
            b.iter(|| {
                let mut relay = EventRelay::new(ParticipantId::new("alice"), PlayerIndex::HOST);
                relay.bind_index(PlayerIndex::HOST);
                for out in samples {
                    black_box(relay.receive(out.op.code(), &bob, &out.payload).unwrap());
                }
            });
        });
    }

    group.finish();
}

fn bench_session_tick(c: &mut Criterion) {
    let mut group = c.benchmark_group("session_tick");
    let samples = guest_samples(64);
    let bob = participant("bob");

    group.bench_function("burst_64", |b| {
        b.iter_batched(
            || {
                let queue = InboundQueue::new(256);
                let sender = queue.sender();
                let handle = SessionHandle {
                    session_id: "bench".into(),
                    local: participant("alice"),
                };
                let ctx = SessionContext::new(
                    SessionConfig::default(),
                    handle,
                    queue,
                    CancellationToken::new(),
                    Arc::new(Metrics::new()),
                );
                sender
                    .try_send(InboundEvent::Presence {
                        joins: smallvec::smallvec![bob.clone()],
                        leaves: PresenceList::new(),
                    })
                    .unwrap();
                for out in &samples {
                    sender
                        .try_send(InboundEvent::Message {
                            op: out.op.code(),
                            sender: bob.clone(),
                            payload: out.payload.clone(),
                        })
                        .unwrap();
                }
                ctx
            },
            |mut ctx| black_box(ctx.tick(1.0 / 60.0)),
            criterion::BatchSize::SmallInput,
        );
    });

    group.finish();
}

criterion_group!(benches, bench_relay_receive, bench_session_tick);
criterion_main!(benches);
