//! Benchmark: digest planning and heartbeat transitions.
//!
//! Run with:
//! ```bash
//! cargo bench -p somnus-core --bench plan
//! ```

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use rand::SeedableRng;
use rand::rngs::SmallRng;
use somnus_core::{ChunkSizes, DaemonState, DigestCursors, GrowthProfile, Phase, plan_digest};
use std::hint::black_box;

fn bench_plan_digest(c: &mut Criterion) {
    let mut group = c.benchmark_group("digest/plan");
    for digested in [100usize, 10_000, 1_000_000] {
        let cursors = DigestCursors {
            history: digested,
            tool_log: digested * 2,
        };
        group.bench_with_input(BenchmarkId::from_parameter(digested), &cursors, |b, &cursors| {
            let mut rng = SmallRng::seed_from_u64(42);
            b.iter(|| {
                plan_digest(
                    black_box(cursors),
                    cursors.history + 250,
                    cursors.tool_log + 500,
                    ChunkSizes::default(),
                    0.3,
                    &mut rng,
                )
            })
        });
    }
    group.finish();
}

fn bench_heartbeat(c: &mut Criterion) {
    let profile = GrowthProfile::default();
    c.bench_function("cycle/heartbeat", |b| {
        let mut rng = SmallRng::seed_from_u64(42);
        let mut state = DaemonState::genesis(&profile, &mut rng).unwrap();
        b.iter(|| {
            state = match state.phase {
                Phase::Awake => state.after_heartbeat(&profile, &mut rng).unwrap().0,
                Phase::Sleeping => state.wake(&profile, &mut rng).unwrap(),
            };
            black_box(state.awake_count)
        })
    });
}

criterion_group!(benches, bench_plan_digest, bench_heartbeat);
criterion_main!(benches);
