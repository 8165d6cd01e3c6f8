//! Throughput benchmarks for bulk operations.
//!
//! Run with: `cargo bench --bench throughput`

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use futures_core::types::manual_plan::Side;
use futures_core::types::order::floor_to_quantum;
use futures_core::types::position::Position;
use hmac::{Hmac, Mac};
use rand::Rng;
use rust_decimal::Decimal;
use sha2::Sha256;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

fn random_positions(count: usize) -> Vec<Position> {
    let mut rng = rand::thread_rng();
    (0..count)
        .map(|_| {
            let entry = Decimal::new(rng.gen_range(3_000_000..7_000_000), 2);
            let side = if rng.gen_bool(0.5) { Side::Buy } else { Side::Sell };
            Position::new_entry(
                Some(Uuid::new_v4()),
                "BTCUSDT".to_string(),
                side,
                Some(Uuid::new_v4().to_string()),
                entry,
                Decimal::new(rng.gen_range(1..1000), 2),
                5,
                Decimal::new(5, 2),
                Decimal::new(1, 1),
                Decimal::new(5, 3),
            )
        })
        .collect()
}

/// Benchmark a monitor tick's extrema update across the active-position set.
fn bench_bulk_extrema_update(c: &mut Criterion) {
    let mut group = c.benchmark_group("bulk_extrema_update");

    for count in [10, 50, 100, 500, 1000].iter() {
        let positions = random_positions(*count);

        group.throughput(Throughput::Elements(*count as u64));
        group.bench_with_input(BenchmarkId::new("tick", count), &positions, |b, positions| {
            b.iter_batched(
                || positions.clone(),
                |mut batch| {
                    for pos in batch.iter_mut() {
                        pos.update_extrema(black_box(Decimal::new(50500, 0)));
                    }
                    black_box(batch)
                },
                criterion::BatchSize::SmallInput,
            )
        });
    }

    group.finish();
}

/// Benchmark a monitor tick's exit evaluation across the active-position set.
fn bench_bulk_evaluate_exit(c: &mut Criterion) {
    let mut group = c.benchmark_group("bulk_evaluate_exit");

    for count in [10, 50, 100, 500, 1000].iter() {
        let positions = random_positions(*count);

        group.throughput(Throughput::Elements(*count as u64));
        group.bench_with_input(
            BenchmarkId::new("tick", count),
            &positions,
            |b, positions| {
                b.iter(|| {
                    let triggered: Vec<_> = positions
                        .iter()
                        .filter_map(|p| {
                            p.evaluate_exit(
                                black_box(Decimal::new(49000, 0)),
                                p.highest_price,
                                p.lowest_price,
                            )
                        })
                        .collect();
                    black_box(triggered)
                })
            },
        );
    }

    group.finish();
}

/// Benchmark batch order-quantity quantization (a sizing pass across plans).
fn bench_bulk_floor_to_quantum(c: &mut Criterion) {
    let mut group = c.benchmark_group("bulk_floor_to_quantum");
    let step = Decimal::new(1, 3);

    for count in [100, 500, 1000, 5000].iter() {
        let mut rng = rand::thread_rng();
        let quantities: Vec<Decimal> = (0..*count)
            .map(|_| Decimal::new(rng.gen_range(1_000..50_000), 3))
            .collect();

        group.throughput(Throughput::Elements(*count as u64));
        group.bench_with_input(
            BenchmarkId::new("quantize", count),
            &quantities,
            |b, quantities| {
                b.iter(|| {
                    let floored: Vec<_> = quantities.iter().map(|q| floor_to_quantum(*q, step)).collect();
                    black_box(floored)
                })
            },
        );
    }

    group.finish();
}

/// Benchmark HMAC-SHA256 signing throughput (one signature per REST call).
fn bench_bulk_hmac_signing(c: &mut Criterion) {
    let mut group = c.benchmark_group("bulk_hmac_signing");
    let secret = b"test-api-secret-used-only-for-benchmarking";

    for count in [10, 50, 100, 500].iter() {
        let queries: Vec<String> = (0..*count)
            .map(|i| format!("symbol=BTCUSDT&side=BUY&type=MARKET&quantity=0.01&timestamp={i}"))
            .collect();

        group.throughput(Throughput::Elements(*count as u64));
        group.bench_with_input(
            BenchmarkId::new("sign_batch", count),
            &queries,
            |b, queries| {
                b.iter(|| {
                    let signatures: Vec<_> = queries
                        .iter()
                        .map(|q| {
                            let mut mac = HmacSha256::new_from_slice(secret).unwrap();
                            mac.update(q.as_bytes());
                            hex::encode(mac.finalize().into_bytes())
                        })
                        .collect();
                    black_box(signatures)
                })
            },
        );
    }

    group.finish();
}

/// Benchmark DashMap bulk inserts, modeling the precision-thread registry
/// under a burst of near-simultaneous plan listing times.
fn bench_dashmap_bulk_updates(c: &mut Criterion) {
    use dashmap::DashMap;

    let mut group = c.benchmark_group("dashmap_bulk");

    for count in [100, 500, 1000, 5000].iter() {
        let ids: Vec<Uuid> = (0..*count).map(|_| Uuid::new_v4()).collect();

        group.throughput(Throughput::Elements(*count as u64));
        group.bench_with_input(BenchmarkId::new("arm", count), &ids, |b, ids| {
            b.iter(|| {
                let registry: DashMap<Uuid, ()> = DashMap::new();
                for id in ids {
                    registry.insert(*id, ());
                }
                black_box(registry)
            })
        });
    }

    group.finish();
}

/// Benchmark JSON serialization throughput for a batch of positions, as
/// written to the dashboard read endpoint.
fn bench_position_batch_serialization(c: &mut Criterion) {
    let mut group = c.benchmark_group("position_batch_serialization");

    for count in [10, 50, 100, 500].iter() {
        let positions = random_positions(*count);

        group.throughput(Throughput::Elements(*count as u64));
        group.bench_with_input(
            BenchmarkId::new("serialize_batch", count),
            &positions,
            |b, positions| {
                b.iter(|| {
                    let serialized: Vec<_> = positions
                        .iter()
                        .map(|p| serde_json::to_string(p).unwrap())
                        .collect();
                    black_box(serialized)
                })
            },
        );
    }

    group.finish();
}

/// Benchmark realized-PnL aggregation across a closed-position batch.
fn bench_pnl_aggregation(c: &mut Criterion) {
    let mut group = c.benchmark_group("pnl_aggregation");

    for count in [10, 50, 100, 500, 1000].iter() {
        let mut rng = rand::thread_rng();
        let mut positions = random_positions(*count);
        for pos in positions.iter_mut() {
            let exit = Decimal::new(rng.gen_range(3_000_000..7_000_000), 2);
            pos.close(exit, pos.entry_quantity, futures_core::types::position::ExitReason::StopLoss);
        }

        group.throughput(Throughput::Elements(*count as u64));
        group.bench_with_input(
            BenchmarkId::new("sum_realized", count),
            &positions,
            |b, positions| {
                b.iter(|| {
                    let total: Decimal = positions.iter().filter_map(|p| p.realized_pnl()).sum();
                    black_box(total)
                })
            },
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_bulk_extrema_update,
    bench_bulk_evaluate_exit,
    bench_bulk_floor_to_quantum,
    bench_bulk_hmac_signing,
    bench_dashmap_bulk_updates,
    bench_position_batch_serialization,
    bench_pnl_aggregation,
);

criterion_main!(benches);
