//! Benchmarks for the collection diff pipeline.
//!
//! Run with: cargo bench -p argus-observation --bench diff_bench
//!
//! Measures the incremental `IndexMap` maintenance cost for the
//! workloads the engine batches most often: append bursts, random
//! replaces, and full reorders, at several collection sizes.

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use std::hint::black_box;

use argus_core::value::Value;
use argus_observation::collection::IndexMap;
use argus_observation::ObservedList;

const SIZES: [usize; 3] = [16, 256, 4096];

fn seeded_list(len: usize) -> ObservedList {
    let values: Vec<Value> = (0..len).map(|n| Value::Int(n as i64)).collect();
    ObservedList::from_values(values)
}

fn bench_append_burst(c: &mut Criterion) {
    let mut group = c.benchmark_group("index_map/append_burst");
    for size in SIZES {
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.iter(|| {
                let mut map = IndexMap::identity(0);
                for i in 0..size {
                    map.record_insert(i);
                }
                map.normalize();
                black_box(map.len())
            });
        });
    }
    group.finish();
}

fn bench_random_replaces(c: &mut Criterion) {
    let mut group = c.benchmark_group("index_map/random_replaces");
    for size in SIZES {
        group.throughput(Throughput::Elements(size as u64 / 4));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.iter(|| {
                let mut map = IndexMap::identity(size);
                // Quarter of the slots, scattered deterministically.
                for i in 0..size / 4 {
                    let slot = (i * 7 + 3) % size;
                    map.record_remove(slot);
                    map.record_insert(slot);
                }
                map.normalize();
                black_box(map.deleted().len())
            });
        });
    }
    group.finish();
}

fn bench_full_reorder(c: &mut Criterion) {
    let mut group = c.benchmark_group("index_map/full_reorder");
    for size in SIZES {
        let permutation: Vec<usize> = (0..size).rev().collect();
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(size),
            &permutation,
            |b, permutation| {
                b.iter(|| {
                    let mut map = IndexMap::identity(permutation.len());
                    map.record_permutation(permutation);
                    map.normalize();
                    black_box(map.is_permutation())
                });
            },
        );
    }
    group.finish();
}

fn bench_list_sort(c: &mut Criterion) {
    let mut group = c.benchmark_group("list/sort_by_values");
    for size in SIZES {
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.iter(|| {
                let list = seeded_list(size);
                list.sort_by_values(|a, b| match (a, b) {
                    (Value::Int(x), Value::Int(y)) => y.cmp(x),
                    _ => std::cmp::Ordering::Equal,
                });
                black_box(list.len())
            });
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_append_burst,
    bench_random_replaces,
    bench_full_reorder,
    bench_list_sort
);
criterion_main!(benches);
