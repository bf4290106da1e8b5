//! Stress test for `BufferPool`.
//!
//! Repeatedly acquires a round of randomly sized buffers, fills them and releases them all,
//! then reports how much memory the pool drew from the system allocator. Set `RUST_LOG=debug`
//! to see the pool grow its size classes.

use std::process::ExitCode;
use std::time::Instant;

use buffer_pool::BufferPool;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use tracing_subscriber::EnvFilter;

const MIN_SIZE: usize = 100;
const MAX_SIZE: usize = 1500;
const SLOT_COUNT: usize = 10;

const ROUNDS: usize = 1024;
const BUFFERS_PER_ROUND: usize = 1024;

#[derive(Debug, Default)]
#[expect(dead_code, reason = "the fields only give the header a realistic size")]
struct Header {
    buf: [u8; 16],
    count: usize,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let mut pool = match BufferPool::<Header>::new(MIN_SIZE, MAX_SIZE, SLOT_COUNT) {
        Ok(pool) => pool,
        Err(e) => {
            eprintln!("Error initializing buffer pool: {e}");
            return ExitCode::FAILURE;
        }
    };

    println!(
        "Serving {MIN_SIZE}..={MAX_SIZE} bytes from {} size classes: {:?}",
        pool.slot_count(),
        pool.slot_capacities()
    );

    let mut rng = SmallRng::seed_from_u64(0x5EED);
    let mut buffers = Vec::with_capacity(BUFFERS_PER_ROUND);

    let start = Instant::now();

    for _ in 0..ROUNDS {
        for _ in 0..BUFFERS_PER_ROUND {
            let size = rng.random_range(MIN_SIZE..=MAX_SIZE);

            let mut buffer = match pool.acquire(size) {
                Ok(buffer) => buffer,
                Err(e) => {
                    eprintln!("Error getting buffer of size {size}: {e}");

                    for buffer in buffers {
                        pool.release(buffer);
                    }

                    return ExitCode::FAILURE;
                }
            };

            buffer.header_mut().count = size;

            #[expect(clippy::indexing_slicing, reason = "capacity is at least size")]
            buffer.data_mut()[..size].fill(b'0');

            buffers.push(buffer);
        }

        while let Some(buffer) = buffers.pop() {
            pool.release(buffer);
        }
    }

    let elapsed = start.elapsed();

    println!(
        "Acquired and released {} buffers in {elapsed:?}",
        ROUNDS.saturating_mul(BUFFERS_PER_ROUND)
    );
    println!(
        "Drew {} bytes from the system allocator, {} bytes are held in free lists",
        pool.allocated_bytes(),
        pool.free_bytes()
    );

    for index in 0..pool.slot_count() {
        println!(
            "  slot {index:>3}: capacity {:>5}, {:>5} free blocks",
            pool.slot_capacity(index).unwrap_or_default(),
            pool.free_count(index).unwrap_or_default()
        );
    }

    ExitCode::SUCCESS
}
