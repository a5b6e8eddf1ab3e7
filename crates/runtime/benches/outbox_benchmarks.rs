use std::hint::black_box;

use chrono::Utc;
use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use outbox_core::{Action, CoreResult, EffectDescriptor, IdempotencyKey, RequestSpec, reducer_fn};
use outbox_runtime::snapshot::{Snapshot, decode, encode};
use outbox_runtime::{ConnectivityMonitor, InMemoryPersistence, Outbox, Runtime, ScriptedTransport};
use serde_json::json;

fn effectful_action(n: u64) -> Action {
    Action::new("counter/inc", json!({"n": n})).with_effect(EffectDescriptor::new(
        IdempotencyKey::new(format!("inc-{n}")).unwrap(),
        RequestSpec::post("/counter", json!({"by": 1})),
        Action::bare("counter/inc/commit"),
        Action::bare("counter/inc/rollback"),
    ))
}

fn counter(state: &mut u64, action: &Action) -> CoreResult<()> {
    if action.kind() == "counter/inc" {
        *state += 1;
    }
    Ok(())
}

/// Dispatch throughput while offline: reducer + enqueue + snapshot save per call.
fn bench_dispatch(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("dispatch_offline");

    for queued in [0usize, 100, 1_000] {
        group.throughput(Throughput::Elements(1));
        group.bench_with_input(BenchmarkId::from_parameter(queued), &queued, |b, &queued| {
            let runtime = rt.block_on(async {
                let runtime = Runtime::builder(
                    reducer_fn(counter),
                    InMemoryPersistence::new(),
                    ScriptedTransport::new(),
                    ConnectivityMonitor::offline(),
                )
                .initial_state(0u64)
                .start()
                .await
                .unwrap();
                for n in 0..queued as u64 {
                    runtime.dispatch(effectful_action(n)).await.unwrap();
                }
                runtime
            });

            let mut n = queued as u64;
            b.iter(|| {
                n += 1;
                rt.block_on(runtime.dispatch(black_box(effectful_action(n)))).unwrap();
            });

            rt.block_on(runtime.shutdown());
        });
    }

    group.finish();
}

/// Snapshot encode/decode cost as the queue grows.
fn bench_snapshot_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("snapshot_codec");

    for entries in [10usize, 100, 1_000] {
        let mut outbox = Outbox::new();
        for n in 0..entries as u64 {
            if let Some(effect) = effectful_action(n).effect() {
                outbox.enqueue(effect.clone(), Utc::now());
            }
        }
        let snapshot = Snapshot::new(entries as u64, outbox.entries().cloned().collect());
        let bytes = encode(&snapshot).unwrap();

        group.throughput(Throughput::Bytes(bytes.len() as u64));
        group.bench_with_input(BenchmarkId::new("encode", entries), &snapshot, |b, snapshot| {
            b.iter(|| encode(black_box(snapshot)).unwrap());
        });
        group.bench_with_input(BenchmarkId::new("decode", entries), &bytes, |b, bytes| {
            b.iter(|| decode::<u64>(black_box(bytes)).unwrap());
        });
    }

    group.finish();
}

criterion_group!(benches, bench_dispatch, bench_snapshot_codec);
criterion_main!(benches);
