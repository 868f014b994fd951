use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use kvfs::store::Store;
use tempfile::tempdir;

fn bench_single_key_commit(c: &mut Criterion) {
    c.bench_function("commit single key", |b| {
        let dir = tempdir().unwrap();
        let store = Store::open(dir.path()).unwrap();
        let mut i: u64 = 0;
        b.iter(|| {
            let mut txn = store.transaction().unwrap();
            i += 1;
            txn.put(format!("key-{}", i).as_bytes(), black_box(b"value".to_vec()))
                .unwrap();
            txn.commit().unwrap();
        });
    });
}

fn bench_batch_commit(c: &mut Criterion) {
    let mut group = c.benchmark_group("commit batch");

    for batch_size in [1usize, 8, 64, 256] {
        group.throughput(Throughput::Elements(batch_size as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(batch_size),
            &batch_size,
            |b, &batch_size| {
                let dir = tempdir().unwrap();
                let store = Store::open(dir.path()).unwrap();
                let mut round: u64 = 0;
                b.iter(|| {
                    let mut txn = store.transaction().unwrap();
                    round += 1;
                    for i in 0..batch_size {
                        let key = format!("round-{}-key-{}", round, i);
                        txn.put(key.as_bytes(), black_box(b"value".to_vec())).unwrap();
                    }
                    txn.commit().unwrap();
                });
            },
        );
    }

    group.finish();
}

fn bench_get_committed(c: &mut Criterion) {
    let dir = tempdir().unwrap();
    let store = Store::open(dir.path()).unwrap();
    let mut txn = store.transaction().unwrap();
    txn.put(b"warm", b"value".to_vec()).unwrap();
    txn.commit().unwrap();

    c.bench_function("get committed key", |b| {
        b.iter(|| store.get(black_box(b"warm")).unwrap());
    });
}

criterion_group!(
    benches,
    bench_single_key_commit,
    bench_batch_commit,
    bench_get_committed
);
criterion_main!(benches);
