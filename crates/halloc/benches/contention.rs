//! Multi-thread allocate/free throughput, the workload that exercises the
//! central cache's per-size-class spin locks and the global quarantine's
//! single FIFO lock under real contention.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use std::thread;

fn contention(c: &mut Criterion) {
    let mut group = c.benchmark_group("contention");
    for threads in [2usize, 4, 8] {
        group.bench_with_input(BenchmarkId::from_parameter(threads), &threads, |b, &threads| {
            halloc::test_util::reset();
            b.iter(|| {
                let handles: Vec<_> = (0..threads)
                    .map(|_| {
                        thread::spawn(|| {
                            for _ in 0..2_000 {
                                let ptr = halloc::allocate(64);
                                // SAFETY: freshly allocated, freed exactly
                                // once within this iteration.
                                unsafe {
                                    ptr.as_ptr().write(0);
                                    halloc::free(ptr.as_ptr());
                                }
                            }
                        })
                    })
                    .collect();
                for h in handles {
                    h.join().unwrap();
                }
            });
        });
    }
    group.finish();
}

criterion_group!(benches, contention);
criterion_main!(benches);
