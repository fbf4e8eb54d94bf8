use std::time::{Duration, SystemTime};

use config::Config;
use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use kvstore::{Batch, Store};
use tablestore::TableStore;
use tempfile::tempdir;

const N_KEYS: usize = 10_000;
const VALUE_SIZE: usize = 100;

fn map_store() -> TableStore {
    TableStore::start(&Config::default_map().without_gc(), &["bench"]).unwrap()
}

fn fill(store: &TableStore) {
    let table = store.get_table("bench").unwrap();
    let value = vec![b'x'; VALUE_SIZE];
    let mut batch = table.new_batch();
    for i in 0..N_KEYS {
        batch.put(format!("key{:05}", i).as_bytes(), &value);
    }
    batch.apply().unwrap();
}

fn table_put_benchmark(c: &mut Criterion) {
    c.bench_function("table_put_map_10k", |b| {
        b.iter_batched(
            map_store,
            |store| fill(&store),
            BatchSize::SmallInput,
        );
    });
}

fn table_put_disk_benchmark(c: &mut Criterion) {
    c.bench_function("table_batch_put_disk_10k", |b| {
        b.iter_batched(
            || {
                let dir = tempdir().unwrap();
                let config = Config {
                    wal_sync: false,
                    ..Config::default_disk(dir.path()).without_gc()
                };
                let store = TableStore::start(&config, &["bench"]).unwrap();
                (dir, store)
            },
            |(_dir, store)| fill(&store),
            BatchSize::SmallInput,
        );
    });
}

fn table_get_benchmark(c: &mut Criterion) {
    let store = map_store();
    fill(&store);
    let table = store.get_table("bench").unwrap();
    c.bench_function("table_get_hit_10k", |b| {
        b.iter(|| {
            for i in 0..N_KEYS {
                assert!(table.get(format!("key{:05}", i).as_bytes()).is_ok());
            }
        });
    });
}

fn expire_benchmark(c: &mut Criterion) {
    c.bench_function("expire_sweep_10k", |b| {
        b.iter_batched(
            || {
                let store = map_store();
                let table = store.get_table("bench").unwrap();
                let past = SystemTime::now() - Duration::from_secs(1);
                let mut batch = table.new_ttl_batch();
                for i in 0..N_KEYS {
                    batch.put_with_expiration(format!("key{:05}", i).as_bytes(), b"v", past);
                }
                batch.apply().unwrap();
                store
            },
            |store| {
                let n = store.expire_keys(SystemTime::now(), 1024).unwrap();
                assert_eq!(n, N_KEYS);
            },
            BatchSize::SmallInput,
        );
    });
}

criterion_group!(
    benches,
    table_put_benchmark,
    table_put_disk_benchmark,
    table_get_benchmark,
    expire_benchmark
);
criterion_main!(benches);
