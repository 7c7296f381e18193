//! Performance benchmarks for MirrorSync
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use mirrorsync::cache::{FileRecord, MetaCache};
use mirrorsync::fs::Scanner;
use mirrorsync::hash::{fingerprint, hash_records};
use tempfile::TempDir;

fn make_records(count: usize) -> Vec<FileRecord> {
    (0..count)
        .map(|i| FileRecord::new(format!("/data/project/src/module_{i}/file_{i}.rs"), i as u64, i as u64))
        .collect()
}

fn bench_fingerprint(c: &mut Criterion) {
    c.bench_function("fingerprint_single", |b| {
        b.iter(|| {
            fingerprint(
                black_box("/data/project/src/main.rs"),
                black_box(4096),
                black_box(1_700_000_000_000_000_000),
            )
        })
    });
}

fn bench_hash_records(c: &mut Criterion) {
    let mut group = c.benchmark_group("hash_records");

    for &count in &[100usize, 1000, 10_000] {
        group.throughput(Throughput::Elements(count as u64));
        for &threads in &[1usize, 4] {
            group.bench_with_input(
                BenchmarkId::new(format!("{threads}_threads"), count),
                &count,
                |b, &count| {
                    b.iter_batched(
                        || make_records(count),
                        |mut records| hash_records(&mut records, threads).unwrap(),
                        criterion::BatchSize::SmallInput,
                    )
                },
            );
        }
    }
    group.finish();
}

fn bench_cache_save_load(c: &mut Criterion) {
    let dir = TempDir::new().unwrap();
    let cache = MetaCache::new(dir.path());
    let mut records = make_records(1000);
    hash_records(&mut records, 4).unwrap();
    for record in records {
        cache.update(record);
    }
    cache.save(1).unwrap();

    c.bench_function("cache_load_1000_entries", |b| {
        let loader = MetaCache::new(dir.path());
        b.iter(|| loader.load(black_box(1)).unwrap())
    });

    c.bench_function("cache_save_1000_entries", |b| {
        b.iter(|| cache.save(black_box(2)).unwrap())
    });
}

fn bench_scan(c: &mut Criterion) {
    let dir = TempDir::new().unwrap();
    for i in 0..20 {
        let sub = dir.path().join(format!("dir_{i}"));
        std::fs::create_dir_all(&sub).unwrap();
        for j in 0..50 {
            std::fs::write(sub.join(format!("f_{j}.txt")), b"x").unwrap();
        }
    }

    c.bench_function("scan_1000_files", |b| {
        let scanner = Scanner::default();
        b.iter(|| scanner.scan(black_box(dir.path())))
    });
}

criterion_group!(
    benches,
    bench_fingerprint,
    bench_hash_records,
    bench_cache_save_load,
    bench_scan
);
criterion_main!(benches);
