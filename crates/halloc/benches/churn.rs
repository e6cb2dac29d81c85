//! Single-thread allocate/free throughput across the size-class table,
//! the workload the thread cache's fast path is shaped for.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use std::hint::black_box;

fn churn(c: &mut Criterion) {
    let mut group = c.benchmark_group("churn");
    for size in [16usize, 64, 256, 1000, 8192] {
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            halloc::test_util::reset();
            b.iter(|| {
                let ptr = halloc::allocate(size);
                // SAFETY: freshly allocated, freed exactly once per iteration.
                unsafe {
                    black_box(ptr.as_ptr()).write(0);
                    halloc::free(ptr.as_ptr());
                }
            });
        });
    }
    group.finish();
}

fn magazine_refill(c: &mut Criterion) {
    c.bench_function("magazine_refill_batch", |b| {
        halloc::test_util::reset();
        b.iter(|| {
            let mut ptrs = Vec::with_capacity(32);
            for _ in 0..32 {
                ptrs.push(halloc::allocate(48));
            }
            for ptr in ptrs {
                // SAFETY: each pointer was allocated in this iteration and
                // freed exactly once.
                unsafe { halloc::free(ptr.as_ptr()) };
            }
        });
    });
}

criterion_group!(benches, churn, magazine_refill);
criterion_main!(benches);
