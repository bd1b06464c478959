//! Benchmarks for storage operations.

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use flowgate::storage::{MemoryStorage, Storage};
use std::time::Duration;
use tokio::runtime::Runtime;

const WINDOW: Duration = Duration::from_secs(3600);

fn bench_storage_operations(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();

    let mut group = c.benchmark_group("storage");

    group.bench_function("get_existing", |b| {
        let storage = MemoryStorage::new();
        rt.block_on(async { storage.increment("bench:key", WINDOW).await.unwrap() });
        b.iter(|| rt.block_on(async { black_box(storage.get("bench:key").await) }))
    });

    group.bench_function("get_missing", |b| {
        let storage = MemoryStorage::new();
        b.iter(|| rt.block_on(async { black_box(storage.get("nonexistent:key").await) }))
    });

    group.bench_function("increment", |b| {
        let storage = MemoryStorage::new();
        let mut i = 0u64;
        b.iter(|| {
            i += 1;
            let key = format!("bench:inc:{}", i % 100);
            rt.block_on(async { black_box(storage.increment(&key, WINDOW).await) })
        })
    });

    group.bench_function("get_block", |b| {
        let storage = MemoryStorage::new();
        rt.block_on(async { storage.set_block("bench:blocked", WINDOW, "bench").await.unwrap() });
        b.iter(|| rt.block_on(async { black_box(storage.get_block("bench:blocked").await) }))
    });

    group.finish();
}

fn bench_storage_scaling(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();

    let mut group = c.benchmark_group("storage_scaling");

    for num_keys in [100u64, 1000, 10000].iter() {
        group.bench_with_input(BenchmarkId::new("increment_with_entries", num_keys), num_keys, |b, &num_keys| {
            let storage = MemoryStorage::new();

            rt.block_on(async {
                for i in 0..num_keys {
                    storage.increment(&format!("scale:{}", i), WINDOW).await.unwrap();
                }
            });

            let mut i = 0u64;
            b.iter(|| {
                i += 1;
                let key = format!("scale:{}", i % num_keys);
                rt.block_on(async { black_box(storage.increment(&key, WINDOW).await) })
            })
        });
    }

    group.finish();
}

fn bench_hot_key(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();

    let mut group = c.benchmark_group("concurrent_access");

    group.bench_function("increment_same_key", |b| {
        let storage = MemoryStorage::new();
        b.iter(|| rt.block_on(async { black_box(storage.increment("hotkey", WINDOW).await) }))
    });

    group.finish();
}

criterion_group!(benches, bench_storage_operations, bench_storage_scaling, bench_hot_key);
criterion_main!(benches);
