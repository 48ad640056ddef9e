//! Scheduling throughput benchmarks: flat leaf floods and fork/join trees.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use framejob::JobSystem;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn bench_leaf_flood(c: &mut Criterion) {
    let jobs = JobSystem::new(num_cpus::get(), 1);

    let mut group = c.benchmark_group("leaf_flood");
    group.sample_size(10);
    for count in [1_000usize, 10_000] {
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, &count| {
            b.iter(|| {
                let done = Arc::new(AtomicUsize::new(0));
                for _ in 0..count {
                    let done = Arc::clone(&done);
                    jobs.submit(move || {
                        done.fetch_add(1, Ordering::Relaxed);
                    });
                }
                jobs.wait();
                assert_eq!(done.load(Ordering::Relaxed), count);
                jobs.reset_pool(0);
            });
        });
    }
    group.finish();
    jobs.shutdown().expect("shutdown failed");
}

fn bench_fork_join(c: &mut Criterion) {
    let jobs = JobSystem::new(num_cpus::get(), 1);

    let mut group = c.benchmark_group("fork_join");
    group.sample_size(10);
    for fanout in [64usize, 512] {
        group.throughput(Throughput::Elements(fanout as u64));
        group.bench_with_input(BenchmarkId::from_parameter(fanout), &fanout, |b, &fanout| {
            b.iter(|| {
                let done = Arc::new(AtomicUsize::new(0));
                let sys = jobs.clone();
                let counter = Arc::clone(&done);
                jobs.submit(move || {
                    for _ in 0..fanout {
                        let counter = Arc::clone(&counter);
                        sys.submit_child(move || {
                            counter.fetch_add(1, Ordering::Relaxed);
                        });
                    }
                });
                jobs.wait();
                assert_eq!(done.load(Ordering::Relaxed), fanout);
                jobs.reset_pool(0);
            });
        });
    }
    group.finish();
    jobs.shutdown().expect("shutdown failed");
}

criterion_group!(benches, bench_leaf_flood, bench_fork_join);
criterion_main!(benches);
