use thiserror::Error;

/// Errors that can occur when configuring a [`BufferPool`][crate::BufferPool] or when
/// acquiring buffers from one.
///
/// Configuration errors are returned when building the pool. Out-of-range requests and
/// exhaustion are ordinary outcomes of [`acquire()`][crate::BufferPool::acquire] that the
/// caller is expected to handle. The pool remains fully usable after either of them.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The lower bound of the size range was greater than the upper bound.
    #[error("invalid size range: min_size {min_size} is greater than max_size {max_size}")]
    InvalidRange {
        /// The configured lower bound.
        min_size: usize,

        /// The configured upper bound.
        max_size: usize,
    },

    /// The requested number of size classes was zero or above the supported maximum.
    #[error("invalid slot count {requested}: must be between 1 and {max} (inclusive)")]
    InvalidSlotCount {
        /// The number of slots the caller asked for.
        requested: usize,

        /// The largest number of slots a pool supports.
        max: usize,
    },

    /// A size class would have a capacity (or block size) that cannot be represented
    /// as a memory allocation on this platform.
    #[error("slot capacity {capacity} cannot be represented as a memory allocation")]
    CapacityOverflow {
        /// The capacity that could not be represented. Saturated at `usize::MAX` if the
        /// capacity calculation itself overflowed.
        capacity: usize,
    },

    /// A buffer was requested with a size outside the range the pool serves.
    #[error("requested size {size} is outside of the pool range [{min_size}, {max_size}]")]
    OutOfRange {
        /// The requested size.
        size: usize,

        /// The smallest size the pool serves.
        min_size: usize,

        /// The largest size the pool serves.
        max_size: usize,
    },

    /// The size class serving the request had no free blocks and the pool could not
    /// obtain more, either because the memory budget is used up or because the system
    /// allocator refused the request.
    #[error(
        "no buffer available for size {size} (slot capacity {slot_capacity}): {allocated} of {max_memory} bytes already drawn from the system"
    )]
    Exhausted {
        /// The requested size.
        size: usize,

        /// The capacity of the size class that was asked to grow.
        slot_capacity: usize,

        /// Cumulative bytes drawn from the system allocator at the time of the failure.
        allocated: usize,

        /// The configured memory budget.
        max_memory: usize,
    },
}

/// A specialized `Result` type for buffer pool operations, returning the crate's
/// [`Error`] type as the error value.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::fmt::Debug;

    use static_assertions::assert_impl_all;

    use super::*;

    assert_impl_all!(Error: Send, Sync, Debug);

    #[test]
    fn messages_mention_offending_values() {
        let error = Error::InvalidRange {
            min_size: 10,
            max_size: 5,
        };
        let message = error.to_string();
        assert!(message.contains("10"));
        assert!(message.contains('5'));

        let error = Error::InvalidSlotCount {
            requested: 300,
            max: 256,
        };
        let message = error.to_string();
        assert!(message.contains("300"));
        assert!(message.contains("256"));

        let error = Error::OutOfRange {
            size: 5000,
            min_size: 100,
            max_size: 1500,
        };
        assert!(error.to_string().contains("5000"));
    }

    #[test]
    fn exhausted_reports_budget() {
        let error = Error::Exhausted {
            size: 800,
            slot_capacity: 939,
            allocated: 4096,
            max_memory: 4096,
        };

        let message = error.to_string();
        assert!(message.contains("939"));
        assert!(message.contains("4096"));
    }
}
