use criterion::{criterion_group, criterion_main, Criterion};
use std::hint::black_box;
use std::sync::Arc;
use std::time::{Duration, Instant};

use naptick::{Scheduler, SimPlatform};

// ==================== Helpers ====================

type SimScheduler = Scheduler<SimPlatform>;

fn fresh() -> SimScheduler {
    Scheduler::new(SimPlatform::new())
}

fn with_stop(sched: &Arc<SimScheduler>, at: u32) {
    let inner = Arc::clone(sched);
    sched
        .post(move || {
            inner.stop();
        })
        .delay(at)
        .tolerance(1)
        .handle();
}

// ==================== Posting ====================

fn bench_post(c: &mut Criterion) {
    let mut group = c.benchmark_group("post");

    group.bench_function("post_cancel", |b| {
        let sched = fresh();

        b.iter(|| {
            let handle = sched.post(|| ()).delay(100).tolerance(10).handle();
            sched.cancel(black_box(handle));
        });
    });

    group.bench_function("burst_1000", |b| {
        b.iter_custom(|iters| {
            let mut total = Duration::ZERO;

            for _ in 0..iters {
                let sched = fresh();
                let start = Instant::now();

                let handles: Vec<_> = (0..1000u32)
                    .map(|i| sched.post(|| ()).delay(100 + i).tolerance(10).handle())
                    .collect();
                for handle in handles {
                    sched.cancel(handle);
                }

                total += start.elapsed();
            }
            total
        });
    });

    group.finish();
}

// ==================== Dispatch ====================

fn bench_dispatch(c: &mut Criterion) {
    let mut group = c.benchmark_group("dispatch");

    group.bench_function("oneshot_1000", |b| {
        b.iter_custom(|iters| {
            let mut total = Duration::ZERO;

            for _ in 0..iters {
                let sched = Arc::new(fresh());
                for i in 0..1000u32 {
                    sched.post(|| ()).delay(10 + i).tolerance(5).handle();
                }
                with_stop(&sched, 5000);

                let start = Instant::now();
                black_box(sched.start());
                total += start.elapsed();
            }
            total
        });
    });

    group.bench_function("coalesced_100", |b| {
        b.iter_custom(|iters| {
            let mut total = Duration::ZERO;

            for _ in 0..iters {
                let sched = Arc::new(fresh());
                // All hundred windows overlap: a single wake drains them.
                for i in 0..100u32 {
                    sched.post(|| ()).delay(1000 + i).tolerance(200).handle();
                }
                with_stop(&sched, 5000);

                let start = Instant::now();
                black_box(sched.start());
                total += start.elapsed();
            }
            total
        });
    });

    group.bench_function("periodic_steady_state", |b| {
        b.iter_custom(|iters| {
            let mut total = Duration::ZERO;

            for _ in 0..iters {
                let sched = Arc::new(fresh());
                // 1000 recycles of a single node through the heap.
                sched.post(|| ()).period(10).tolerance(2).handle();
                with_stop(&sched, 10_005);

                let start = Instant::now();
                black_box(sched.start());
                total += start.elapsed();
            }
            total
        });
    });

    group.finish();
}

criterion_group!(benches, bench_post, bench_dispatch);
criterion_main!(benches);
