//! Admission benchmarks

use criterion::{criterion_group, criterion_main, Criterion};
use s3nd::admission::AdmissionController;
use std::sync::Arc;
use std::time::Duration;

fn benchmark_acquire_release(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let controller = AdmissionController::new(100);

    c.bench_function("acquire_release_uncontended", |b| {
        b.to_async(&runtime).iter(|| async {
            let ticket = controller.acquire(Duration::from_secs(1)).await.unwrap();
            ticket.release();
        });
    });
}

fn benchmark_contended(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("acquire_release_contended");

    for capacity in [1usize, 8, 64] {
        let controller = Arc::new(AdmissionController::new(capacity));
        group.bench_function(format!("capacity_{}", capacity), |b| {
            b.to_async(&runtime).iter(|| {
                let controller = Arc::clone(&controller);
                async move {
                    let tasks: Vec<_> = (0..64)
                        .map(|_| {
                            let controller = Arc::clone(&controller);
                            tokio::spawn(async move {
                                let ticket =
                                    controller.acquire(Duration::from_secs(10)).await.unwrap();
                                tokio::task::yield_now().await;
                                ticket.release();
                            })
                        })
                        .collect();
                    for task in tasks {
                        task.await.unwrap();
                    }
                }
            });
        });
    }

    group.finish();
}

criterion_group!(benches, benchmark_acquire_release, benchmark_contended);
criterion_main!(benches);
