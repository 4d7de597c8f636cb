//! Benchmark for subscription ledger throughput.
//!
//! TARGET: a radius-4 subscribe/unsubscribe pair (121 regions) well under
//! 50 microseconds, so observers can relocate every tick.
//!
//! Run with: cargo bench --package tessera_streaming --bench ledger_benchmark

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use tessera_core::{ColumnIndex, Planet, PlanetId};
use tessera_streaming::SubscriptionLedger;

fn planet() -> Planet {
    Planet::new(PlanetId(0), ColumnIndex::new(256, 256)).expect("valid planet")
}

fn benchmark_subscribe_pair(c: &mut Criterion) {
    let world = planet();
    let mut group = c.benchmark_group("subscribe_unsubscribe");

    for radius in [1, 4, 8] {
        let side = u64::try_from(2 * radius + 3).unwrap_or(0);
        group.throughput(Throughput::Elements(side * side));
        group.bench_with_input(BenchmarkId::from_parameter(radius), &radius, |b, &radius| {
            let mut ledger = SubscriptionLedger::new(1);
            b.iter(|| {
                ledger
                    .subscribe(&world, black_box(ColumnIndex::new(10, 10)), radius)
                    .expect("subscribe");
                ledger
                    .unsubscribe(&world, black_box(ColumnIndex::new(10, 10)), radius)
                    .expect("unsubscribe");
            });
        });
    }
    group.finish();
}

fn benchmark_walking_observers(c: &mut Criterion) {
    let world = planet();

    c.bench_function("64_observers_step_one_column", |b| {
        let mut ledger = SubscriptionLedger::new(1);
        let mut centers: Vec<ColumnIndex> = (0..64).map(|i| ColumnIndex::new(i * 4, i * 2)).collect();
        for center in &centers {
            ledger.subscribe(&world, *center, 4).expect("subscribe");
        }

        b.iter(|| {
            for center in &mut centers {
                let next = center.offset(1, 0);
                ledger.subscribe(&world, next, 4).expect("subscribe");
                ledger.unsubscribe(&world, *center, 4).expect("unsubscribe");
                *center = next;
            }
            black_box(ledger.len())
        });
    });
}

fn benchmark_claim_scan(c: &mut Criterion) {
    let world = planet();

    c.bench_function("claim_next_radius_14", |b| {
        b.iter_batched(
            || {
                let mut ledger = SubscriptionLedger::new(1);
                ledger.subscribe(&world, ColumnIndex::new(0, 0), 14).expect("subscribe");
                ledger
            },
            |mut ledger| {
                let claim = ledger.claim_next().expect("claim");
                black_box(claim)
            },
            criterion::BatchSize::SmallInput,
        );
    });
}

criterion_group! {
    name = benches;
    config = Criterion::default();
    targets = benchmark_subscribe_pair,
              benchmark_walking_observers,
              benchmark_claim_scan
}

criterion_main!(benches);
