#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

//! A memory pool that serves variable-size byte buffers from a fixed range of sizes,
//! reusing released buffers instead of returning them to the system allocator.
//!
//! This crate provides [`BufferPool`], a slab allocator in miniature for workloads that
//! repeatedly request similarly shaped buffers of varying size, such as network packet buffers.
//! The pool divides its size range into a bounded number of size classes and keeps a free list
//! for each. Requests are rounded up to the capacity of their size class, trading some unused
//! bytes for far fewer calls into the general-purpose allocator.
//!
//! # Key Features
//!
//! - **Segregated size classes**: Up to [`MAX_SLOTS`] equally wide classes cover the range
//!   without gaps
//! - **Lazy batch allocation**: A size class draws [`BATCH_SIZE`] blocks at once, the first
//!   time it is needed and whenever it runs dry
//! - **Memory budget**: An optional ceiling on the total bytes drawn from the system allocator
//! - **Most-recently-released reuse**: Released blocks are reused first while still warm in cache
//! - **Typed headers**: Every buffer carries a caller-defined header that is reset on each use
//! - **Single ownership**: Releasing a buffer consumes it, so it cannot be released twice
//!
//! # Buffer layout
//!
//! Each block is a single allocation holding the header followed by the data region. The
//! number of bytes a block draws from the system allocator is the header size plus the size
//! class capacity, rounded up to pointer alignment:
//!
//! ```text
//! ┌──────────────┬─────────────────────────────────────┬─────────┐
//! │  header: H   │  data: [u8; slot capacity]          │ padding │
//! └──────────────┴─────────────────────────────────────┴─────────┘
//! ```
//!
//! # Examples
//!
//! ```
//! use buffer_pool::{BufferPool, Error};
//!
//! #[derive(Default)]
//! struct PacketHeader {
//!     sequence: u32,
//!     checksum: u16,
//! }
//!
//! // Serve buffers of 100 to 1500 bytes from 10 size classes.
//! let mut pool = BufferPool::<PacketHeader>::new(100, 1500, 10).unwrap();
//!
//! let mut buffer = pool.acquire(512).unwrap();
//! assert!(buffer.capacity() >= 512);
//!
//! buffer.header_mut().sequence = 1;
//! buffer.data_mut()[..4].copy_from_slice(&[1, 2, 3, 4]);
//!
//! // Return the buffer for reuse. Its header is dropped, its memory stays in the pool.
//! pool.release(buffer);
//!
//! // Requests outside of the range are rejected.
//! assert!(matches!(pool.acquire(4000), Err(Error::OutOfRange { .. })));
//! ```
//!
//! # Memory accounting
//!
//! [`BufferPool::allocated_bytes()`] is the total number of bytes ever drawn from the system
//! allocator. It is cumulative and never decreases, not even when [`BufferPool::clear()`]
//! returns free blocks to the system. [`BufferPool::free_bytes()`] reports the bytes currently
//! held in free lists.

mod block;
mod buffer;
mod builder;
mod drop_policy;
mod error;
mod free_list;
mod pool;
mod size_classes;

pub(crate) use block::*;
pub use buffer::PooledBuffer;
pub use builder::BufferPoolBuilder;
pub use drop_policy::DropPolicy;
pub use error::{Error, Result};
pub(crate) use free_list::*;
pub use pool::{BATCH_SIZE, BufferPool};
pub use size_classes::MAX_SLOTS;
pub(crate) use size_classes::SizeClasses;
