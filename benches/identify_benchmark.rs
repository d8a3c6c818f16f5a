//! Benchmarks for the identify hot path.

use criterion::{criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion, Throughput};
use identirust::Identirust;
use std::hint::black_box;
use std::time::Duration;

/// Populate `clusters` independent identities of `cluster_size` contacts each.
fn populated(clusters: usize, cluster_size: usize) -> Identirust {
    let identirust = Identirust::new();
    for cluster in 0..clusters {
        let phone = format!("555-{cluster:06}");
        for member in 0..cluster_size {
            let email = format!("user{cluster}.{member}@example.com");
            identirust
                .identify(Some(email.as_str()), Some(phone.as_str()))
                .expect("populate");
        }
    }
    identirust
}

fn bench_new_identities(c: &mut Criterion) {
    let mut group = c.benchmark_group("identify_new");
    group.sample_size(20);
    group.warm_up_time(Duration::from_millis(500));

    for &count in &[1_000usize, 10_000] {
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::new("primaries", count), &count, |b, &count| {
            b.iter_batched(
                Identirust::new,
                |identirust| {
                    for i in 0..count {
                        let email = format!("user{i}@example.com");
                        black_box(identirust.identify(Some(email.as_str()), None).ok());
                    }
                },
                BatchSize::LargeInput,
            )
        });
    }

    group.finish();
}

fn bench_duplicate_probe(c: &mut Criterion) {
    let mut group = c.benchmark_group("identify_probe");
    group.measurement_time(Duration::from_secs(5));

    for &cluster_size in &[1usize, 10, 100] {
        let identirust = populated(100, cluster_size);
        group.bench_with_input(
            BenchmarkId::new("cluster_size", cluster_size),
            &cluster_size,
            |b, _| {
                b.iter(|| {
                    black_box(
                        identirust
                            .identify(Some("user50.0@example.com"), Some("555-000050"))
                            .ok(),
                    )
                })
            },
        );
    }

    group.finish();
}

fn bench_bridge_merge(c: &mut Criterion) {
    let mut group = c.benchmark_group("identify_merge");
    group.sample_size(20);

    for &cluster_size in &[10usize, 100] {
        group.bench_with_input(
            BenchmarkId::new("cluster_size", cluster_size),
            &cluster_size,
            |b, &cluster_size| {
                b.iter_batched(
                    || populated(2, cluster_size),
                    |identirust| {
                        black_box(
                            identirust
                                .identify(Some("user0.0@example.com"), Some("555-000001"))
                                .ok(),
                        )
                    },
                    BatchSize::SmallInput,
                )
            },
        );
    }

    group.finish();
}

criterion_group!(
    identify_benches,
    bench_new_identities,
    bench_duplicate_probe,
    bench_bridge_merge
);

criterion_main!(identify_benches);
