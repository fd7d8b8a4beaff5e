//! Performance benchmarks for the status cache.
//!
//! These benchmarks measure:
//! - Cold reads (eviction followed by a batched re-read)
//! - Warm reads served from cache while the channel is live
//! - Batch amortization (1 vs 7 vs 31 keys)
//! - Mint round trip including the local confirmation path
//! - Local signal fan-out
//!
//! Run with: `cargo bench -p datemint-sdk`

#![allow(clippy::unwrap_used, clippy::expect_used, missing_docs)]

use std::{hint::black_box, sync::Arc, time::Duration};

use chrono::{Days, NaiveDate};
use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use datemint_sdk::{
    Address, CacheConfig, ChannelState, DateKey, LocalSignalBus, StatusCache, Wei, mock::MockLedger, month_keys,
};
use tokio::runtime::Runtime;

/// Creates a runtime for async benchmarks.
fn create_runtime() -> Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("Failed to create runtime")
}

/// Creates a cache with no batch window so timings exclude the wait.
fn create_cache(ledger: &Arc<MockLedger>) -> StatusCache {
    let config = CacheConfig::builder().batch_window(Duration::ZERO).build().expect("valid config");
    StatusCache::builder().ledger(ledger.clone()).config(config).build().expect("cache")
}

// ============================================================================
// Read Benchmarks
// ============================================================================

/// Cold month read: evict, then read 31 keys in one round trip.
fn bench_cold_month(c: &mut Criterion) {
    let rt = create_runtime();
    let ledger = Arc::new(MockLedger::new());
    let keys = month_keys(2025, 7).unwrap();
    for key in keys.iter().step_by(5) {
        ledger.mint_externally(*key, Address::new([1; 20])).unwrap();
    }
    let cache = rt.block_on(async { create_cache(&ledger) });

    c.bench_function("cold_month_read", |b| {
        b.to_async(&rt).iter(|| async {
            cache.show_range([]);
            black_box(cache.get_range(&keys).await.expect("read failed"))
        })
    });
}

/// Warm month read: every key fresh and the channel live.
fn bench_warm_month(c: &mut Criterion) {
    let rt = create_runtime();
    let ledger = Arc::new(MockLedger::new());
    let keys = month_keys(2025, 8).unwrap();
    let cache = rt.block_on(async {
        let cache = create_cache(&ledger);
        cache.get_range(&keys).await.unwrap();
        let mut state = cache.channel().watch_state();
        state.wait_for(|s| *s == ChannelState::Connected).await.unwrap();
        cache
    });

    c.bench_function("warm_month_read", |b| {
        b.to_async(&rt).iter(|| async { black_box(cache.get_range(&keys).await.expect("read failed")) })
    });
}

/// Cold reads at increasing range sizes.
fn bench_batch_sizes(c: &mut Criterion) {
    let rt = create_runtime();
    let ledger = Arc::new(MockLedger::new());
    let month = month_keys(2025, 1).unwrap();
    let cache = rt.block_on(async { create_cache(&ledger) });

    let mut group = c.benchmark_group("cold_range");
    for size in [1usize, 7, 31] {
        let keys: Vec<DateKey> = month[..size].to_vec();
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &keys, |b, keys| {
            b.to_async(&rt).iter(|| async {
                cache.show_range([]);
                black_box(cache.get_range(keys).await.expect("read failed"))
            })
        });
    }
    group.finish();
}

// ============================================================================
// Mutation Benchmarks
// ============================================================================

/// Mint round trip on a fresh date each iteration.
fn bench_mutate(c: &mut Criterion) {
    let rt = create_runtime();
    let ledger = Arc::new(MockLedger::new());
    let cache = rt.block_on(async { create_cache(&ledger) });
    let start = NaiveDate::from_ymd_opt(2030, 1, 1).unwrap();
    let actor = Address::new([2; 20]);
    let mut day = 0u64;

    c.bench_function("mutate_confirmed", |b| {
        b.to_async(&rt).iter(|| {
            day += 1;
            let key = DateKey::from_date(start.checked_add_days(Days::new(day)).unwrap()).unwrap();
            let cache = cache.clone();
            async move { black_box(cache.mutate(key, &actor, Wei::from_milli_ether(10)).await) }
        })
    });
}

// ============================================================================
// Signal Benchmarks
// ============================================================================

/// Publish to a key with a growing number of subscribers.
fn bench_signal_fanout(c: &mut Criterion) {
    let bus = LocalSignalBus::new();
    let key = DateKey::from_ymd(2025, 12, 25).unwrap();
    let mut group = c.benchmark_group("signal_fanout");

    for subscribers in [1usize, 10, 100] {
        let handles: Vec<_> = (0..subscribers)
            .map(|_| {
                bus.subscribe(
                    key,
                    Arc::new(|k: DateKey| {
                        black_box(k);
                    }),
                )
            })
            .collect();
        group.throughput(Throughput::Elements(subscribers as u64));
        group.bench_function(BenchmarkId::from_parameter(subscribers), |b| {
            b.iter(|| bus.publish(black_box(key)))
        });
        drop(handles);
    }
    group.finish();
}

criterion_group!(reads, bench_cold_month, bench_warm_month, bench_batch_sizes);
criterion_group!(writes, bench_mutate);
criterion_group!(signals, bench_signal_fanout);
criterion_main!(reads, writes, signals);
