//! Basic benchmarks for the `buffer_pool` crate.
#![allow(
    missing_docs,
    reason = "No need for API documentation in benchmark code"
)]

use std::hint::black_box;
use std::iter;
use std::time::Instant;

use buffer_pool::{BATCH_SIZE, BufferPool};
use criterion::{Criterion, criterion_group, criterion_main};

criterion_group!(benches, entrypoint);
criterion_main!(benches);

const MIN_SIZE: usize = 100;
const MAX_SIZE: usize = 1500;
const SLOT_COUNT: usize = 10;
const TEST_SIZE: usize = 800;

fn new_pool() -> BufferPool<u64> {
    BufferPool::new(MIN_SIZE, MAX_SIZE, SLOT_COUNT).unwrap()
}

/// A pool whose size class for `TEST_SIZE` already holds a full batch of free blocks.
fn warm_pool() -> BufferPool<u64> {
    let mut pool = new_pool();
    let buffer = pool.acquire(TEST_SIZE).unwrap();
    pool.release(buffer);
    pool
}

fn entrypoint(c: &mut Criterion) {
    let mut group = c.benchmark_group("buffer_pool_basic");

    group.bench_function("build_empty", |b| {
        b.iter_custom(|iters| {
            let start = Instant::now();

            for _ in 0..iters {
                drop(black_box(new_pool()));
            }

            start.elapsed()
        });
    });

    group.bench_function("acquire_release_warm", |b| {
        b.iter_custom(|iters| {
            let mut pool = warm_pool();

            let start = Instant::now();

            for _ in 0..iters {
                let buffer = pool.acquire(black_box(TEST_SIZE)).unwrap();
                pool.release(black_box(buffer));
            }

            start.elapsed()
        });
    });

    group.bench_function("acquire_cold", |b| {
        // Every acquire draws a full batch for an empty size class.
        b.iter_custom(|iters| {
            let mut pools = iter::repeat_with(new_pool)
                .take(usize::try_from(iters).unwrap())
                .collect::<Vec<_>>();

            let mut buffers = Vec::with_capacity(pools.len());

            let start = Instant::now();

            for pool in &mut pools {
                buffers.push(black_box(pool.acquire(TEST_SIZE).unwrap()));
            }

            let elapsed = start.elapsed();

            for (pool, buffer) in pools.iter_mut().zip(buffers) {
                pool.release(buffer);
            }

            elapsed
        });
    });

    group.bench_function("out_of_range", |b| {
        b.iter_custom(|iters| {
            let mut pool = new_pool();

            let start = Instant::now();

            for _ in 0..iters {
                _ = black_box(pool.acquire(black_box(MAX_SIZE + 1)));
            }

            start.elapsed()
        });
    });

    group.finish();

    let mut group = c.benchmark_group("buffer_pool_slow");

    group.bench_function("acquire_batch_release_batch", |b| {
        // Drains a warm size class completely and refills it.
        b.iter_custom(|iters| {
            let mut pool = warm_pool();
            let mut buffers = Vec::with_capacity(BATCH_SIZE.get());

            let start = Instant::now();

            for _ in 0..iters {
                for _ in 0..BATCH_SIZE.get() {
                    buffers.push(pool.acquire(black_box(TEST_SIZE)).unwrap());
                }

                while let Some(buffer) = buffers.pop() {
                    pool.release(buffer);
                }
            }

            start.elapsed()
        });
    });

    group.bench_function("mixed_sizes_all_slots", |b| {
        b.iter_custom(|iters| {
            let mut pool = new_pool();
            let sizes = pool.slot_capacities().to_vec();

            // Warm every size class up front so only reuse is measured.
            for size in &sizes {
                let size = (*size).min(MAX_SIZE);
                let buffer = pool.acquire(size).unwrap();
                pool.release(buffer);
            }

            let start = Instant::now();

            for _ in 0..iters {
                for size in &sizes {
                    let buffer = pool.acquire(black_box((*size).min(MAX_SIZE))).unwrap();
                    pool.release(buffer);
                }
            }

            start.elapsed()
        });
    });

    group.finish();
}
