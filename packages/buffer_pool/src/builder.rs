use std::any::type_name;
use std::cell::Cell;
use std::fmt;
use std::marker::PhantomData;

use crate::{BufferPool, DropPolicy, MAX_SLOTS, Result};

/// Builder for creating an instance of [`BufferPool`].
///
/// The upper bound of the size range is mandatory, whereas other settings are optional:
///
/// * `min_size` defaults to zero.
/// * `slot_count` defaults to [`MAX_SLOTS`].
/// * `max_memory` defaults to `usize::MAX`, meaning the pool may draw as much memory from the
///   system allocator as it needs.
/// * `drop_policy` defaults to [`DropPolicy::MayLeakBuffers`].
///
/// # Examples
///
/// ```
/// use buffer_pool::BufferPool;
///
/// let pool = BufferPool::<u64>::builder()
///     .min_size(100)
///     .max_size(1500)
///     .slot_count(10)
///     .build()
///     .unwrap();
///
/// assert_eq!(pool.min_size(), 100);
/// assert_eq!(pool.max_size(), 1500);
/// ```
///
/// # Thread safety
///
/// The builder is thread-mobile ([`Send`]) and can be safely transferred between threads,
/// allowing pool configuration to happen on different threads than where the pool is used.
/// However, it is not thread-safe ([`Sync`]) as it contains mutable configuration state.
#[must_use]
pub struct BufferPoolBuilder<H> {
    min_size: usize,
    max_size: Option<usize>,
    slot_count: usize,
    max_memory: usize,
    drop_policy: DropPolicy,

    _header: PhantomData<fn() -> H>,

    // Prevents Sync while allowing Send - builders are thread-mobile but not thread-safe
    _not_sync: PhantomData<Cell<()>>,
}

impl<H> fmt::Debug for BufferPoolBuilder<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(type_name::<Self>())
            .field("min_size", &self.min_size)
            .field("max_size", &self.max_size)
            .field("slot_count", &self.slot_count)
            .field("max_memory", &self.max_memory)
            .field("drop_policy", &self.drop_policy)
            .finish_non_exhaustive()
    }
}

impl<H> BufferPoolBuilder<H> {
    #[inline]
    pub(crate) fn new() -> Self {
        Self {
            min_size: 0,
            max_size: None,
            slot_count: MAX_SLOTS.get(),
            max_memory: usize::MAX,
            drop_policy: DropPolicy::default(),
            _header: PhantomData,
            _not_sync: PhantomData,
        }
    }

    /// Sets the smallest buffer size the pool serves.
    #[inline]
    pub fn min_size(mut self, min_size: usize) -> Self {
        self.min_size = min_size;
        self
    }

    /// Sets the largest buffer size the pool serves. This setting is mandatory.
    #[inline]
    pub fn max_size(mut self, max_size: usize) -> Self {
        self.max_size = Some(max_size);
        self
    }

    /// Sets the number of size classes to divide the size range into.
    ///
    /// Must be between 1 and [`MAX_SLOTS`] (inclusive), which is verified by
    /// [`build()`][Self::build]. If the range contains fewer distinct sizes than this,
    /// the pool uses one size class per distinct size instead.
    #[inline]
    pub fn slot_count(mut self, slot_count: usize) -> Self {
        self.slot_count = slot_count;
        self
    }

    /// Sets the memory budget of the pool: the most bytes it will ever draw from the
    /// system allocator.
    ///
    /// Once the budget is used up, size classes without free blocks can no longer grow and
    /// acquiring from them fails with [`Error::Exhausted`][crate::Error::Exhausted].
    ///
    /// # Examples
    ///
    /// ```
    /// use buffer_pool::BufferPool;
    ///
    /// let mut pool = BufferPool::<()>::builder()
    ///     .max_size(1000)
    ///     .slot_count(1)
    ///     .max_memory(4096)
    ///     .build()
    ///     .unwrap();
    ///
    /// let buffer = pool.acquire(1000).unwrap();
    /// assert!(pool.allocated_bytes() <= 4096);
    /// # pool.release(buffer);
    /// ```
    #[inline]
    pub fn max_memory(mut self, max_memory: usize) -> Self {
        self.max_memory = max_memory;
        self
    }

    /// Sets the [drop policy][DropPolicy] for the pool. This governs how to treat buffers
    /// that are still checked out when the pool is dropped.
    ///
    /// # Examples
    ///
    /// ```
    /// use buffer_pool::{BufferPool, DropPolicy};
    ///
    /// let pool = BufferPool::<()>::builder()
    ///     .max_size(1500)
    ///     .drop_policy(DropPolicy::MustReleaseBuffers)
    ///     .build()
    ///     .unwrap();
    /// ```
    #[inline]
    pub fn drop_policy(mut self, policy: DropPolicy) -> Self {
        self.drop_policy = policy;
        self
    }

    /// Builds the buffer pool with the specified configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRange`][crate::Error::InvalidRange] if the minimum size is
    /// greater than the maximum size, [`Error::InvalidSlotCount`][crate::Error::InvalidSlotCount]
    /// if the slot count is zero or greater than [`MAX_SLOTS`] and
    /// [`Error::CapacityOverflow`][crate::Error::CapacityOverflow] if a size class would be too
    /// large to allocate.
    ///
    /// # Panics
    ///
    /// Panics if no maximum size has been set using [`max_size()`][Self::max_size].
    pub fn build(self) -> Result<BufferPool<H>> {
        let max_size = self
            .max_size
            .expect("max_size must be set using .max_size() before calling .build()");

        BufferPool::new_inner(
            self.min_size,
            max_size,
            self.slot_count,
            self.max_memory,
            self.drop_policy,
        )
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use static_assertions::{assert_impl_all, assert_not_impl_any};

    use super::*;
    use crate::Error;

    assert_impl_all!(BufferPoolBuilder<u64>: Send, fmt::Debug);
    assert_not_impl_any!(BufferPoolBuilder<u64>: Sync);

    #[test]
    fn builder_new_creates_default_state() {
        let builder = BufferPoolBuilder::<()>::new();

        assert_eq!(builder.min_size, 0);
        assert!(builder.max_size.is_none());
        assert_eq!(builder.slot_count, MAX_SLOTS.get());
        assert_eq!(builder.max_memory, usize::MAX);
        assert_eq!(builder.drop_policy, DropPolicy::MayLeakBuffers);
    }

    #[test]
    fn setters_store_values() {
        let builder = BufferPoolBuilder::<()>::new()
            .min_size(10)
            .max_size(20)
            .slot_count(3)
            .max_memory(1000)
            .drop_policy(DropPolicy::MustReleaseBuffers);

        assert_eq!(builder.min_size, 10);
        assert_eq!(builder.max_size, Some(20));
        assert_eq!(builder.slot_count, 3);
        assert_eq!(builder.max_memory, 1000);
        assert_eq!(builder.drop_policy, DropPolicy::MustReleaseBuffers);
    }

    #[test]
    fn settings_can_be_overridden() {
        let builder = BufferPoolBuilder::<()>::new().max_size(20).max_size(30);

        assert_eq!(builder.max_size, Some(30));
    }

    #[test]
    fn build_applies_settings() {
        let pool = BufferPoolBuilder::<u32>::new()
            .min_size(100)
            .max_size(1500)
            .slot_count(10)
            .max_memory(1 << 20)
            .build()
            .unwrap();

        assert_eq!(pool.min_size(), 100);
        assert_eq!(pool.max_size(), 1500);
        assert_eq!(pool.slot_count(), 10);
        assert_eq!(pool.max_memory(), 1 << 20);
        assert_eq!(pool.allocated_bytes(), 0);
    }

    #[test]
    fn build_with_only_max_size_uses_defaults() {
        let pool = BufferPoolBuilder::<()>::new().max_size(1023).build().unwrap();

        assert_eq!(pool.min_size(), 0);
        assert_eq!(pool.slot_count(), MAX_SLOTS.get());
        assert_eq!(pool.step(), 4);
        assert_eq!(pool.max_memory(), usize::MAX);
    }

    #[test]
    fn build_reports_invalid_range() {
        let result = BufferPoolBuilder::<()>::new().min_size(10).max_size(5).build();

        assert!(matches!(result, Err(Error::InvalidRange { .. })));
    }

    #[test]
    fn build_reports_invalid_slot_count() {
        let result = BufferPoolBuilder::<()>::new()
            .max_size(100)
            .slot_count(0)
            .build();

        assert!(matches!(result, Err(Error::InvalidSlotCount { .. })));
    }

    #[test]
    fn build_reports_unallocatable_size_class() {
        let result = BufferPoolBuilder::<u64>::new()
            .min_size(usize::MAX - 16)
            .max_size(usize::MAX - 8)
            .slot_count(1)
            .build();

        assert!(matches!(result, Err(Error::CapacityOverflow { .. })));
    }

    #[test]
    #[should_panic]
    fn build_without_max_size_panics() {
        let _pool = BufferPoolBuilder::<()>::new().min_size(10).build();
    }

    #[test]
    fn builder_is_debug() {
        let builder = BufferPoolBuilder::<u32>::new().max_size(10);

        let output = format!("{builder:?}");
        assert!(output.contains("BufferPoolBuilder"));
    }

    #[test]
    fn builder_can_move_between_threads() {
        let builder = BufferPoolBuilder::<u64>::new().max_size(1500);

        let handle = std::thread::spawn(move || builder.build());
        let _pool = handle
            .join()
            .expect("thread completed successfully")
            .unwrap();
    }
}
