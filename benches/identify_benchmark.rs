use criterion::{criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion, Throughput};
use identirust::test_support::{generate_requests, primary_contact, secondary_contact, seeded_store};
use identirust::{IdentifyRequest, Identirust, MemoryStore, PersistentContactStore, RetryConfig};
use std::hint::black_box;
use std::sync::Arc;

fn memory_service() -> Identirust {
    Identirust::with_shared_store(Arc::new(MemoryStore::new()), RetryConfig::no_backoff(8))
}

/// Stream of overlapping observations into an empty store.
fn benchmark_identify_stream(c: &mut Criterion) {
    let mut group = c.benchmark_group("identify_stream");
    for &count in &[100usize, 1_000] {
        let requests = generate_requests(count, count / 4, 42).requests;
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::new("memory", count), &requests, |b, requests| {
            b.iter_batched(
                memory_service,
                |service| {
                    for request in requests.iter().cloned() {
                        black_box(service.identify(request).ok());
                    }
                },
                BatchSize::SmallInput,
            )
        });
    }
    group.finish();
}

/// Read-only resolution against a settled cluster of growing size.
fn benchmark_settled_cluster(c: &mut Criterion) {
    let mut group = c.benchmark_group("settled_cluster");
    for &size in &[10u64, 100, 1_000] {
        let mut contacts = vec![primary_contact(1, Some("root@example.com"), Some("1"), 0)];
        for id in 2..=size {
            let email = format!("member{id}@example.com");
            contacts.push(secondary_contact(id, Some(&email), Some("1"), 1, id as i64));
        }
        let service = Identirust::with_store(seeded_store(contacts));
        group.bench_function(BenchmarkId::from_parameter(size), |b| {
            b.iter(|| {
                black_box(
                    service
                        .identify(IdentifyRequest::new(Some("root@example.com"), None))
                        .ok(),
                )
            })
        });
    }
    group.finish();
}

/// Merge of two clusters of `size` members each.
fn benchmark_bridge_merge(c: &mut Criterion) {
    let mut group = c.benchmark_group("bridge_merge");
    for &size in &[10u64, 100] {
        let mut contacts = vec![
            primary_contact(1, Some("left@example.com"), Some("100"), 0),
            primary_contact(2, Some("right@example.com"), Some("200"), 1),
        ];
        for offset in 0..size {
            let left = 3 + offset * 2;
            let right = left + 1;
            contacts.push(secondary_contact(
                left,
                Some("left@example.com"),
                Some(&format!("1{offset:04}")),
                1,
                left as i64,
            ));
            contacts.push(secondary_contact(
                right,
                Some("right@example.com"),
                Some(&format!("2{offset:04}")),
                2,
                right as i64,
            ));
        }
        group.bench_function(BenchmarkId::from_parameter(size), |b| {
            b.iter_batched(
                || Identirust::with_store(seeded_store(contacts.clone())),
                |service| {
                    black_box(
                        service
                            .identify(IdentifyRequest::new(
                                Some("left@example.com"),
                                Some("200"),
                            ))
                            .ok(),
                    )
                },
                BatchSize::SmallInput,
            )
        });
    }
    group.finish();
}

/// Same stream against RocksDB.
fn benchmark_persistent_stream(c: &mut Criterion) {
    let requests = generate_requests(200, 50, 7).requests;
    let mut group = c.benchmark_group("identify_persistent");
    group.sample_size(10);
    group.throughput(Throughput::Elements(requests.len() as u64));
    group.bench_function("rocksdb_200", |b| {
        b.iter_batched(
            || {
                let dir = tempfile::tempdir().expect("tempdir");
                let store = PersistentContactStore::open(dir.path()).expect("open store");
                (Identirust::with_store(store), dir)
            },
            |(service, _dir)| {
                for request in requests.iter().cloned() {
                    black_box(service.identify(request).ok());
                }
            },
            BatchSize::PerIteration,
        )
    });
    group.finish();
}

criterion_group!(
    benches,
    benchmark_identify_stream,
    benchmark_settled_cluster,
    benchmark_bridge_merge
);
criterion_group! {
    name = persistent_benches;
    config = Criterion::default().without_plots();
    targets = benchmark_persistent_stream
}
criterion_main!(benches, persistent_benches);
