//! Latency benchmarks for critical trading operations.
//!
//! Run with: `cargo bench --bench latency`

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use futures_core::types::manual_plan::Side;
use futures_core::types::order::{floor_to_quantum, SymbolFilters};
use futures_core::types::position::Position;
use hmac::{Hmac, Mac};
use rust_decimal::Decimal;
use sha2::Sha256;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

fn make_position(entry: Decimal, side: Side) -> Position {
    Position::new_entry(
        Some(Uuid::new_v4()),
        "BTCUSDT".to_string(),
        side,
        Some("1".to_string()),
        entry,
        Decimal::new(1, 0),
        5,
        Decimal::new(5, 2),
        Decimal::new(1, 1),
        Decimal::new(5, 3),
    )
}

/// Benchmark the running-extrema update applied on every monitor tick.
fn bench_extrema_update(c: &mut Criterion) {
    let mut group = c.benchmark_group("position_extrema");

    let mut position = make_position(Decimal::new(50000, 0), Side::Buy);
    group.bench_function("update_extrema", |b| {
        b.iter(|| {
            position.update_extrema(black_box(Decimal::new(50100, 0)));
        })
    });

    group.finish();
}

/// Benchmark stop-loss / trailing-stop evaluation against captured extrema.
fn bench_evaluate_exit(c: &mut Criterion) {
    let mut group = c.benchmark_group("position_evaluate_exit");

    let position = make_position(Decimal::new(50000, 0), Side::Buy);
    let (high, low) = (position.highest_price, position.lowest_price);

    group.bench_function("buy_no_trigger", |b| {
        b.iter(|| black_box(position.evaluate_exit(black_box(Decimal::new(50050, 0)), high, low)))
    });

    group.bench_function("buy_stop_loss_trigger", |b| {
        b.iter(|| black_box(position.evaluate_exit(black_box(Decimal::new(47000, 0)), high, low)))
    });

    group.finish();
}

/// Benchmark quantity/price floor-to-quantum rounding, applied on every order submission.
fn bench_floor_to_quantum(c: &mut Criterion) {
    let mut group = c.benchmark_group("floor_to_quantum");

    let filters = SymbolFilters {
        step_size: Decimal::new(1, 3),
        tick_size: Decimal::new(1, 1),
    };

    group.bench_with_input(
        BenchmarkId::new("quantity", "step_0.001"),
        &filters.step_size,
        |b, step| b.iter(|| black_box(floor_to_quantum(black_box(Decimal::new(123456, 5)), *step))),
    );

    group.finish();
}

/// Benchmark HMAC-SHA256 request signing, applied on every signed REST call.
fn bench_hmac_signing(c: &mut Criterion) {
    let mut group = c.benchmark_group("hmac_sign");

    let secret = b"test-api-secret-used-only-for-benchmarking";
    let query = "symbol=BTCUSDT&side=BUY&type=MARKET&quantity=0.01&timestamp=1700000000000";

    group.bench_function("sign_order_query", |b| {
        b.iter(|| {
            let mut mac = HmacSha256::new_from_slice(black_box(secret)).unwrap();
            mac.update(black_box(query.as_bytes()));
            black_box(hex::encode(mac.finalize().into_bytes()))
        })
    });

    group.finish();
}

/// Benchmark UUID generation (used for plan and position IDs).
fn bench_uuid_generation(c: &mut Criterion) {
    c.bench_function("uuid_v4", |b| b.iter(|| black_box(Uuid::new_v4())));
}

/// Benchmark Decimal arithmetic, the core of every price/quantity calculation.
fn bench_decimal_arithmetic(c: &mut Criterion) {
    let mut group = c.benchmark_group("decimal_arithmetic");

    let val_a = Decimal::new(12345, 4); // 1.2345
    let val_b = Decimal::new(67890, 4); // 6.7890

    group.bench_function("addition", |bencher| {
        bencher.iter(|| black_box(black_box(val_a) + black_box(val_b)))
    });

    group.bench_function("multiplication", |bencher| {
        bencher.iter(|| black_box(black_box(val_a) * black_box(val_b)))
    });

    group.bench_function("division", |bencher| {
        bencher.iter(|| black_box(black_box(val_a) / black_box(val_b)))
    });

    group.bench_function("comparison", |bencher| {
        bencher.iter(|| black_box(black_box(val_a) > black_box(val_b)))
    });

    group.finish();
}

/// Benchmark concurrent DashMap operations (used for the precision-thread registry).
fn bench_dashmap_operations(c: &mut Criterion) {
    use dashmap::DashMap;

    let mut group = c.benchmark_group("dashmap");

    let map: DashMap<Uuid, ()> = DashMap::new();

    for _ in 0..1000 {
        map.insert(Uuid::new_v4(), ());
    }

    let known_key = *map.iter().next().unwrap().key();

    group.bench_function("insert", |b| {
        b.iter(|| {
            map.insert(Uuid::new_v4(), ());
        })
    });

    group.bench_function("get", |b| b.iter(|| black_box(map.get(&known_key))));

    group.bench_function("contains", |b| {
        b.iter(|| black_box(map.contains_key(&known_key)))
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_extrema_update,
    bench_evaluate_exit,
    bench_floor_to_quantum,
    bench_hmac_signing,
    bench_uuid_generation,
    bench_decimal_arithmetic,
    bench_dashmap_operations,
);

criterion_main!(benches);
