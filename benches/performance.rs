//! Performance benchmarks for the record store.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use record_store::{
    Encoding, Fields, FileArea, MemoryArea, PersistenceArea, RecordStore, StoreConfig,
};
use serde_json::json;
use std::sync::Arc;
use tempfile::TempDir;

fn row(n: usize) -> Fields {
    json!({
        "name": format!("Client {}", n),
        "email": format!("client{}@example.com", n),
        "status": "active",
        "notes": "regular customer, invoices monthly",
    })
    .as_object()
    .cloned()
    .unwrap()
}

fn filled_store(area: Arc<dyn PersistenceArea>, encoding: Encoding, size: usize) -> RecordStore {
    let store = RecordStore::open(
        "clients",
        area,
        StoreConfig {
            encoding,
            auto_persist: false,
            ..Default::default()
        },
    );
    for n in 0..size {
        store.create(row(n)).unwrap();
    }
    store.flush().unwrap();
    store
}

/// Benchmark create against store size (every create rewrites the whole set)
fn bench_create(c: &mut Criterion) {
    let mut group = c.benchmark_group("create");

    for size in [10, 100, 1000] {
        group.bench_with_input(BenchmarkId::new("existing", size), &size, |b, &size| {
            let area: Arc<dyn PersistenceArea> = Arc::new(MemoryArea::new());
            drop(filled_store(area.clone(), Encoding::None, size));
            let store = RecordStore::open("clients", area, StoreConfig::default());
            let mut n = size;
            b.iter(|| {
                n += 1;
                black_box(store.create(row(n)).unwrap());
            });
        });
    }

    group.finish();
}

/// Benchmark lookups in a populated store
fn bench_lookup(c: &mut Criterion) {
    let store = filled_store(Arc::new(MemoryArea::new()), Encoding::None, 1000);
    let ids: Vec<_> = store.get_all().into_iter().map(|r| r.id).collect();

    c.bench_function("get_by_id", |b| {
        let mut i = 0;
        b.iter(|| {
            i = (i + 1) % ids.len();
            black_box(store.get_by_id(&ids[i]));
        });
    });

    c.bench_function("get_where", |b| {
        b.iter(|| {
            black_box(store.get_where(|r| r.get_str("name").map_or(false, |n| n.ends_with('7'))));
        });
    });
}

/// Benchmark a persisted update under each encoding
fn bench_encodings(c: &mut Criterion) {
    let mut group = c.benchmark_group("persisted_update");

    for (label, encoding) in [
        ("none", Encoding::None),
        ("passthrough", Encoding::Passthrough),
        ("lz4", Encoding::Lz4),
    ] {
        group.bench_function(BenchmarkId::new("memory", label), |b| {
            let store = filled_store(Arc::new(MemoryArea::new()), encoding, 500);
            let id = store.get_all()[0].id.clone();
            let mut n = 0u64;
            b.iter(|| {
                n += 1;
                let patch = json!({"visits": n}).as_object().cloned().unwrap();
                store.update(&id, patch).unwrap();
                store.flush().unwrap();
            });
        });

        group.bench_function(BenchmarkId::new("file", label), |b| {
            let dir = TempDir::new().unwrap();
            let area = Arc::new(FileArea::open(dir.path().join("data")).unwrap());
            let store = filled_store(area, encoding, 500);
            let id = store.get_all()[0].id.clone();
            let mut n = 0u64;
            b.iter(|| {
                n += 1;
                let patch = json!({"visits": n}).as_object().cloned().unwrap();
                store.update(&id, patch).unwrap();
                store.flush().unwrap();
            });
        });
    }

    group.finish();
}

/// Benchmark hydration of a persisted store
fn bench_open(c: &mut Criterion) {
    let mut group = c.benchmark_group("open");

    for encoding in [Encoding::None, Encoding::Lz4] {
        let area: Arc<dyn PersistenceArea> = Arc::new(MemoryArea::new());
        drop(filled_store(area.clone(), encoding, 1000));

        group.bench_with_input(
            BenchmarkId::new("records_1000", format!("{:?}", encoding)),
            &encoding,
            |b, &encoding| {
                b.iter(|| {
                    let store = RecordStore::open(
                        "clients",
                        area.clone(),
                        StoreConfig {
                            encoding,
                            ..Default::default()
                        },
                    );
                    black_box(store.count());
                });
            },
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_create,
    bench_lookup,
    bench_encodings,
    bench_open,
);

criterion_main!(benches);
