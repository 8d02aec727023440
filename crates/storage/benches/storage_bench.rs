//! Benchmarks for the storage engine (WAL + Memtable).

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use tempfile::TempDir;
use vclocked_storage::record::WalBatch;
use vclocked_storage::{BatchOp, FsyncPolicy, OrderedStore, RangeQuery, StorageEngine};

fn make_op(key: &str, value_size: usize) -> BatchOp {
    BatchOp::put(key.as_bytes(), vec![0x42u8; value_size])
}

fn bench_engine_write_batch(c: &mut Criterion) {
    let mut group = c.benchmark_group("engine_write_batch");

    for size in [64, 1024, 4096] {
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            let dir = TempDir::new().unwrap();
            let mut engine = StorageEngine::open(dir.path(), FsyncPolicy::None).unwrap();

            let mut i = 0u64;
            b.iter(|| {
                // One logical version: a value entry plus its metadata entry.
                let ops = vec![
                    make_op(&format!("key_{}\0v\0k", i), size),
                    make_op(&format!("key_{}\0v\0m", i), 32),
                ];
                engine.write_batch(ops).unwrap();
                i += 1;
            });
        });
    }
    group.finish();
}

fn bench_engine_range_scan(c: &mut Criterion) {
    let dir = TempDir::new().unwrap();
    let mut engine = StorageEngine::open(dir.path(), FsyncPolicy::None).unwrap();

    for i in 0..1000 {
        engine
            .write_batch(vec![make_op(&format!("key_{:04}", i), 256)])
            .unwrap();
    }

    let mut group = c.benchmark_group("engine_range_scan");
    for page in [16, 256] {
        group.bench_with_input(BenchmarkId::from_parameter(page), &page, |b, &page| {
            let mut i = 0u64;
            b.iter(|| {
                let start = format!("key_{:04}", i % 1000).into_bytes();
                let q = RangeQuery::all().start(start).limit(page);
                black_box(engine.scan(&q).unwrap());
                i += 1;
            });
        });
    }
    group.finish();
}

fn bench_wal_append(c: &mut Criterion) {
    use vclocked_storage::wal::Wal;

    let dir = TempDir::new().unwrap();
    let wal_path = dir.path().join("bench.wal");
    let mut wal = Wal::open(&wal_path, FsyncPolicy::None).unwrap();

    c.bench_function("wal_append", |b| {
        let mut i = 0u64;
        b.iter(|| {
            let batch = WalBatch::new(vec![make_op(&format!("k_{}", i), 128)]);
            wal.append(&batch).unwrap();
            i += 1;
        });
    });
}

criterion_group!(
    benches,
    bench_engine_write_batch,
    bench_engine_range_scan,
    bench_wal_append
);
criterion_main!(benches);
