//! Benchmarks for the consistent-hash shard router
//!
//! This benchmark suite measures:
//! - Lookup latency with and without the lookup cache
//! - Lookup latency as the ring grows
//! - Ring rebuild cost when a node joins

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use std::time::Duration;
use tagged_cache::ShardRouter;

fn ring(nodes: usize, cache: usize) -> ShardRouter<usize> {
    let router = ShardRouter::new(256, cache);
    for i in 0..nodes {
        router
            .add_node(format!("redis://10.0.0.{i}:6379"), 1, i)
            .unwrap_or_else(|e| panic!("Failed to add node: {e}"));
    }
    router
}

/// Benchmark lookups over rings of different sizes
fn bench_route(c: &mut Criterion) {
    let keys: Vec<String> = (0..1024).map(|i| format!("user:{i}:profile")).collect();

    let mut group = c.benchmark_group("route");
    group.measurement_time(Duration::from_secs(5));

    for nodes in &[2usize, 8, 32] {
        let uncached = ring(*nodes, 0);
        group.bench_with_input(BenchmarkId::new("uncached", nodes), nodes, |b, _| {
            let mut i = 0;
            b.iter(|| {
                i = (i + 1) % keys.len();
                black_box(uncached.route(&keys[i]).unwrap_or_default());
            });
        });

        let cached = ring(*nodes, 4096);
        group.bench_with_input(BenchmarkId::new("cached", nodes), nodes, |b, _| {
            let mut i = 0;
            b.iter(|| {
                i = (i + 1) % keys.len();
                black_box(cached.route(&keys[i]).unwrap_or_default());
            });
        });
    }

    group.finish();
}

/// Benchmark ring rebuild when a node joins
fn bench_add_node(c: &mut Criterion) {
    let mut group = c.benchmark_group("add_node");

    for nodes in &[2usize, 8, 32] {
        group.bench_with_input(BenchmarkId::from_parameter(nodes), nodes, |b, &n| {
            b.iter(|| {
                let router = ring(n, 0);
                router
                    .add_node("redis://10.0.1.1:6379", 2, n)
                    .unwrap_or_else(|e| panic!("Failed to add node: {e}"));
                black_box(router.len());
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_route, bench_add_node);
criterion_main!(benches);
