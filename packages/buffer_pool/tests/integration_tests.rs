//! Integration tests for the `buffer_pool` package.
//!
//! These tests exercise `BufferPool` and `PooledBuffer` through the public API only,
//! covering size class mapping, reuse, memory accounting and the memory budget.

use std::thread;

use buffer_pool::{BATCH_SIZE, BufferPool, DropPolicy, Error, MAX_SLOTS, PooledBuffer};

#[derive(Debug, Default)]
struct PacketHeader {
    sequence: u64,
    length: usize,
}

fn packet_pool() -> BufferPool<PacketHeader> {
    BufferPool::new(100, 1500, 10).unwrap()
}

#[test]
fn every_size_in_range_is_served_with_enough_capacity() {
    let mut pool = packet_pool();

    for size in pool.min_size()..=pool.max_size() {
        let buffer = pool.acquire(size).unwrap();
        assert!(
            buffer.capacity() >= size,
            "size {size} served with capacity {}",
            buffer.capacity()
        );
        pool.release(buffer);
    }

    assert_eq!(pool.checked_out(), 0);
}

#[test]
fn size_class_queries_are_consistent() {
    let pool = packet_pool();

    assert_eq!(pool.slot_count(), 10);
    assert_eq!(pool.step(), 141);
    assert_eq!(pool.slot_capacities().len(), pool.slot_count());

    for (index, capacity) in pool.slot_capacities().iter().enumerate() {
        assert_eq!(pool.slot_capacity(index), Some(*capacity));
    }

    assert_eq!(pool.slot_capacity(pool.slot_count()), None);
    assert_eq!(pool.slot_index(100), Some(0));
    assert_eq!(pool.slot_index(1500), Some(9));
    assert_eq!(pool.slot_index(1501), None);
}

#[test]
fn buffers_of_different_slots_are_distinct() {
    let mut pool = packet_pool();

    let small = pool.acquire(100).unwrap();
    let large = pool.acquire(1500).unwrap();

    assert_ne!(small.block_addr(), large.block_addr());
    assert!(small.capacity() < large.capacity());

    pool.release(small);
    pool.release(large);
}

#[test]
fn most_recently_released_is_reused_first() {
    let mut pool = packet_pool();

    let buffers = (0..5)
        .map(|_| pool.acquire(1000).unwrap())
        .collect::<Vec<_>>();
    let addrs = buffers
        .iter()
        .map(PooledBuffer::block_addr)
        .collect::<Vec<_>>();

    for buffer in buffers {
        pool.release(buffer);
    }

    // Released in order 0..5, so reacquired in order 5..0.
    let reacquired = (0..5)
        .map(|_| pool.acquire(1000).unwrap())
        .collect::<Vec<_>>();

    for (buffer, addr) in reacquired.iter().zip(addrs.iter().rev()) {
        assert_eq!(buffer.block_addr(), *addr);
    }

    for buffer in reacquired {
        pool.release(buffer);
    }
}

#[test]
fn batch_of_same_size_needs_one_growth() {
    let mut pool = packet_pool();

    let first = pool.acquire(800).unwrap();
    let after_first = pool.allocated_bytes();
    assert!(after_first > 0);

    let mut buffers = vec![first];
    for _ in 1..BATCH_SIZE.get() {
        buffers.push(pool.acquire(800).unwrap());
    }

    assert_eq!(pool.allocated_bytes(), after_first);

    let index = pool.slot_index(800).unwrap();
    assert_eq!(pool.free_count(index), Some(0));

    for buffer in buffers {
        pool.release(buffer);
    }

    assert_eq!(pool.free_count(index), Some(BATCH_SIZE.get()));
    assert_eq!(pool.free_bytes(), after_first);
}

#[test]
fn allocated_bytes_never_exceeds_budget() {
    const BUDGET: usize = 64 * 1024;

    let mut pool = BufferPool::<PacketHeader>::builder()
        .min_size(100)
        .max_size(1500)
        .slot_count(10)
        .max_memory(BUDGET)
        .build()
        .unwrap();

    let mut buffers = Vec::new();
    let mut exhausted = 0_usize;

    for round in 0..2000_usize {
        let size = 100 + (round * 37) % 1401;

        match pool.acquire(size) {
            Ok(buffer) => buffers.push(buffer),
            Err(Error::Exhausted { max_memory, .. }) => {
                assert_eq!(max_memory, BUDGET);
                exhausted += 1;
            }
            Err(other) => panic!("unexpected error: {other}"),
        }

        assert!(pool.allocated_bytes() <= BUDGET);
    }

    assert!(exhausted > 0);
    assert_eq!(pool.checked_out(), buffers.len());

    for buffer in buffers {
        pool.release(buffer);
    }

    assert_eq!(pool.free_bytes(), pool.allocated_bytes());
}

#[test]
fn errors_describe_the_problem() {
    let mut pool = packet_pool();

    let error = pool.acquire(5000).unwrap_err();
    let message = error.to_string();

    assert!(message.contains("5000"), "{message}");
    assert!(message.contains("1500"), "{message}");

    let error = BufferPool::<()>::new(10, 5, 1).unwrap_err();
    assert!(matches!(
        error,
        Error::InvalidRange {
            min_size: 10,
            max_size: 5
        }
    ));

    let error = BufferPool::<()>::new(0, 10, MAX_SLOTS.get() + 1).unwrap_err();
    assert!(matches!(error, Error::InvalidSlotCount { .. }));
}

#[test]
fn header_and_data_are_independent() {
    let mut pool = packet_pool();

    let mut buffer = pool.acquire(200).unwrap();
    buffer.header_mut().sequence = 7;
    buffer.header_mut().length = 200;
    buffer.data_mut()[..200].fill(0xEE);

    assert_eq!(buffer.header().sequence, 7);
    assert_eq!(buffer.header().length, 200);
    assert!(buffer.data()[..200].iter().all(|byte| *byte == 0xEE));

    pool.release(buffer);

    let buffer = pool.acquire(200).unwrap();
    assert_eq!(buffer.header().sequence, 0);
    assert_eq!(buffer.header().length, 0);
    pool.release(buffer);
}

#[test]
fn buffers_can_be_filled_through_as_mut() {
    let mut pool = BufferPool::<()>::new(0, 64, 8).unwrap();

    let mut buffer = pool.acquire(64).unwrap();
    AsMut::<[u8]>::as_mut(&mut buffer).fill(b'0');

    assert!(AsRef::<[u8]>::as_ref(&buffer).iter().all(|byte| *byte == b'0'));
    pool.release(buffer);
}

#[test]
fn clear_then_continue() {
    let mut pool = packet_pool();

    let kept = pool.acquire(400).unwrap();
    let returned = pool.acquire(400).unwrap();
    pool.release(returned);

    let allocated = pool.allocated_bytes();
    pool.clear();
    assert_eq!(pool.free_bytes(), 0);

    pool.release(kept);
    let buffer = pool.acquire(400).unwrap();

    assert_eq!(pool.allocated_bytes(), allocated);
    pool.release(buffer);
}

#[test]
fn pool_can_move_between_threads() {
    let mut pool = packet_pool();
    let buffer = pool.acquire(300).unwrap();

    let (pool, buffer) = thread::spawn(move || {
        let mut pool = pool;
        let second = pool.acquire(300).unwrap();
        pool.release(second);
        (pool, buffer)
    })
    .join()
    .unwrap();

    let mut pool = pool;
    pool.release(buffer);
    assert_eq!(pool.checked_out(), 0);
}

#[test]
fn buffers_can_move_between_threads() {
    let mut pool = packet_pool();

    let mut buffer = pool.acquire(300).unwrap();
    buffer.header_mut().sequence = 3;

    let buffer = thread::spawn(move || {
        buffer.header_mut().sequence += 1;
        buffer.data_mut()[0] = 1;
        buffer
    })
    .join()
    .unwrap();

    assert_eq!(buffer.header().sequence, 4);
    pool.release(buffer);
}

#[test]
#[should_panic]
fn release_into_wrong_pool_panics() {
    let mut pool_a = packet_pool();
    let mut pool_b = packet_pool();

    let buffer = pool_a.acquire(100).unwrap();
    pool_b.release(buffer);
}

#[test]
#[should_panic]
fn strict_drop_policy_detects_leaked_buffers() {
    let mut pool = BufferPool::<PacketHeader>::builder()
        .max_size(1500)
        .drop_policy(DropPolicy::MustReleaseBuffers)
        .build()
        .unwrap();

    let buffer = pool.acquire(100).unwrap();
    drop(buffer);
    drop(pool);
}
