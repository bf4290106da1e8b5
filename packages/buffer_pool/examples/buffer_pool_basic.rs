//! Basic usage example for `BufferPool`.
//!
//! This example demonstrates acquiring buffers of various sizes, using their headers
//! and data regions, and returning them to the pool for reuse.

use buffer_pool::{BufferPool, Error};

#[derive(Debug, Default)]
struct PacketHeader {
    sequence: u32,
    length: usize,
}

fn main() {
    // Serve buffers of 100 to 1500 bytes from 10 size classes.
    let mut pool = BufferPool::<PacketHeader>::builder()
        .min_size(100)
        .max_size(1500)
        .slot_count(10)
        .max_memory(16 * 1024 * 1024)
        .build()
        .unwrap();

    println!("Size classes: {:?}", pool.slot_capacities());

    let payload = b"hello, buffer pool";

    let mut buffer = pool.acquire(120).unwrap();
    println!("Requested 120 bytes, got a buffer of {} bytes", buffer.capacity());

    buffer.header_mut().sequence = 1;
    buffer.header_mut().length = payload.len();
    buffer.data_mut()[..payload.len()].copy_from_slice(payload);

    println!(
        "Packet #{} carries {:?}",
        buffer.header().sequence,
        String::from_utf8_lossy(&buffer.data()[..buffer.header().length])
    );

    let addr = buffer.block_addr();
    pool.release(buffer);

    // The next request from the same size class gets the same block back, with a fresh header.
    let buffer = pool.acquire(200).unwrap();
    println!(
        "Reused the same block: {}, header reset: {}",
        buffer.block_addr() == addr,
        buffer.header().sequence == 0
    );
    pool.release(buffer);

    match pool.acquire(9000) {
        Err(Error::OutOfRange { size, .. }) => println!("Size {size} is not served by this pool"),
        other => println!("Unexpected result: {other:?}"),
    }

    println!(
        "Allocated {} bytes in total, {} bytes are free",
        pool.allocated_bytes(),
        pool.free_bytes()
    );

    pool.clear();
    println!("After clear: {} bytes are free", pool.free_bytes());
}
