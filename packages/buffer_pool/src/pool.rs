use std::any::type_name;
use std::cell::Cell;
use std::fmt;
use std::marker::PhantomData;
use std::num::NonZero;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;

use new_zealand::nz;
use tracing::{debug, trace};

use crate::{
    BlockLayout, BufferPoolBuilder, DropPolicy, Error, FreeBlock, FreeList, PooledBuffer, Result,
    SizeClasses,
};

/// Number of blocks a size class tries to obtain from the system allocator whenever it runs
/// out of free blocks.
pub const BATCH_SIZE: NonZero<usize> = nz!(1024);

/// Global counter for generating unique pool IDs.
static POOL_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Generates a unique pool ID.
fn generate_pool_id() -> u64 {
    POOL_ID_COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// A memory pool that serves byte buffers of any size within a fixed range, reusing released
/// buffers instead of returning them to the system allocator.
///
/// The range `[min_size, max_size]` is divided into up to [`MAX_SLOTS`][crate::MAX_SLOTS]
/// contiguous size classes ("slots") of equal width. Every buffer served by a slot has the same
/// capacity: the largest size that maps to the slot. A request is therefore rounded up to the
/// capacity of its slot, trading some unused bytes for far fewer calls into the system
/// allocator.
///
/// Each slot keeps a free list of blocks. When a slot has no free block, the pool draws a
/// batch of up to [`BATCH_SIZE`] blocks for it from the system allocator, limited by the memory
/// budget of the pool. Released buffers go back on the free list of their slot and are reused
/// most-recently-released first. Memory is only returned to the system allocator by
/// [`clear()`][Self::clear] or when the pool is dropped.
///
/// Every buffer carries a header of type `H`, which is reset to [`H::default()`][Default] each
/// time the buffer is acquired.
///
/// # Examples
///
/// ```
/// use buffer_pool::BufferPool;
///
/// let mut pool = BufferPool::<()>::new(100, 1500, 10).unwrap();
///
/// let buffer = pool.acquire(800).unwrap();
/// assert!(buffer.capacity() >= 800);
/// let addr = buffer.block_addr();
///
/// pool.release(buffer);
///
/// // The most recently released block of a slot is reused first.
/// let buffer = pool.acquire(800).unwrap();
/// assert_eq!(buffer.block_addr(), addr);
///
/// // Sizes outside the configured range are rejected.
/// assert!(pool.acquire(5000).is_err());
/// # pool.release(buffer);
/// ```
///
/// # Thread safety
///
/// The pool is thread-mobile ([`Send`]) and can be moved between threads, but it is not
/// thread-safe ([`Sync`]). Wrap it in a mutex if it needs to be shared.
pub struct BufferPool<H> {
    /// We need to uniquely identify each pool to ensure that buffers are not released into
    /// the wrong pool. If the pool ID does not match when a buffer is released, we panic.
    pool_id: u64,

    size_classes: SizeClasses,

    /// One free list per size class, at the same index.
    free_lists: Vec<FreeList>,

    /// Upper limit on `allocated`.
    max_memory: usize,

    /// Total bytes ever drawn from the system allocator. Never decreases, not even when
    /// memory is returned to the system allocator by `clear()`.
    allocated: usize,

    /// Buffers acquired from this pool and not yet released to it.
    checked_out: usize,

    drop_policy: DropPolicy,

    // The pool creates headers but never stores them, so it is Send regardless of H.
    _header: PhantomData<fn() -> H>,

    // Prevents Sync while allowing Send - the pool is thread-mobile but not thread-safe.
    _not_sync: PhantomData<Cell<()>>,
}

impl<H> BufferPool<H> {
    /// Creates a builder for configuring and constructing a [`BufferPool`].
    ///
    /// The upper bound of the size range is mandatory, everything else is optional.
    ///
    /// # Example
    ///
    /// ```
    /// use buffer_pool::BufferPool;
    ///
    /// let pool = BufferPool::<u32>::builder()
    ///     .min_size(100)
    ///     .max_size(1500)
    ///     .slot_count(10)
    ///     .max_memory(64 * 1024 * 1024)
    ///     .build()
    ///     .unwrap();
    ///
    /// assert_eq!(pool.slot_count(), 10);
    /// ```
    #[inline]
    pub fn builder() -> BufferPoolBuilder<H> {
        BufferPoolBuilder::new()
    }

    /// Creates a pool serving sizes in `[min_size, max_size]` with up to `slot_count`
    /// size classes and no memory budget.
    ///
    /// The pool uses fewer size classes than requested if the range contains fewer
    /// distinct sizes than `slot_count`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRange`] if `min_size > max_size`, [`Error::InvalidSlotCount`]
    /// if `slot_count` is zero or greater than [`MAX_SLOTS`][crate::MAX_SLOTS] and
    /// [`Error::CapacityOverflow`] if the largest size class cannot be allocated.
    ///
    /// # Example
    ///
    /// ```
    /// use buffer_pool::BufferPool;
    ///
    /// let pool = BufferPool::<()>::new(100, 1500, 10).unwrap();
    /// assert_eq!(pool.slot_count(), 10);
    ///
    /// assert!(BufferPool::<()>::new(10, 5, 1).is_err());
    /// ```
    pub fn new(min_size: usize, max_size: usize, slot_count: usize) -> Result<Self> {
        Self::builder()
            .min_size(min_size)
            .max_size(max_size)
            .slot_count(slot_count)
            .build()
    }

    pub(crate) fn new_inner(
        min_size: usize,
        max_size: usize,
        slot_count: usize,
        max_memory: usize,
        drop_policy: DropPolicy,
    ) -> Result<Self> {
        let size_classes = SizeClasses::new(min_size, max_size, slot_count)?;

        let free_lists = size_classes
            .capacities()
            .iter()
            .map(|&capacity| {
                BlockLayout::new::<H>(capacity)
                    .map(FreeList::new)
                    .ok_or(Error::CapacityOverflow { capacity })
            })
            .collect::<Result<Vec<_>>>()?;

        let pool_id = generate_pool_id();

        debug!(
            pool_id,
            min_size,
            max_size,
            slot_count = size_classes.len(),
            step = size_classes.step().get(),
            max_memory,
            header_type = type_name::<H>(),
            "created buffer pool"
        );

        Ok(Self {
            pool_id,
            size_classes,
            free_lists,
            max_memory,
            allocated: 0,
            checked_out: 0,
            drop_policy,
            _header: PhantomData,
            _not_sync: PhantomData,
        })
    }

    /// The smallest size the pool serves.
    #[must_use]
    #[inline]
    pub fn min_size(&self) -> usize {
        self.size_classes.min_size()
    }

    /// The largest size the pool serves.
    #[must_use]
    #[inline]
    pub fn max_size(&self) -> usize {
        self.size_classes.max_size()
    }

    /// The number of size classes the range is divided into.
    ///
    /// This is the requested slot count, or the number of distinct sizes in the range if that
    /// is smaller.
    #[must_use]
    #[inline]
    pub fn slot_count(&self) -> usize {
        self.size_classes.len()
    }

    /// The width of each size class in bytes.
    #[must_use]
    #[inline]
    pub fn step(&self) -> usize {
        self.size_classes.step().get()
    }

    /// The capacity of the buffers served by the size class at `index`, or `None` if there is
    /// no such size class.
    #[must_use]
    #[inline]
    pub fn slot_capacity(&self, index: usize) -> Option<usize> {
        self.size_classes.capacity(index)
    }

    /// The capacities of all size classes, in increasing order.
    ///
    /// # Example
    ///
    /// ```
    /// use buffer_pool::BufferPool;
    ///
    /// let pool = BufferPool::<()>::new(0, 10, 4).unwrap();
    /// assert_eq!(pool.slot_capacities(), &[2, 5, 8, 11]);
    /// ```
    #[must_use]
    #[inline]
    pub fn slot_capacities(&self) -> &[usize] {
        self.size_classes.capacities()
    }

    /// The index of the size class that serves `size`, or `None` if `size` is outside the
    /// range of the pool.
    #[must_use]
    #[inline]
    pub fn slot_index(&self, size: usize) -> Option<usize> {
        self.size_classes.index_of(size)
    }

    /// The memory budget of the pool: the most bytes it will ever draw from the system
    /// allocator. `usize::MAX` if the pool is unbounded.
    #[must_use]
    #[inline]
    pub fn max_memory(&self) -> usize {
        self.max_memory
    }

    /// Total bytes drawn from the system allocator over the lifetime of the pool.
    ///
    /// This is a cumulative counter, not a gauge of current memory usage. It never decreases:
    /// neither releasing buffers nor [`clear()`][Self::clear] reduces it. Use
    /// [`free_bytes()`][Self::free_bytes] to see how much memory is currently held in free lists.
    #[must_use]
    #[inline]
    pub fn allocated_bytes(&self) -> usize {
        self.allocated
    }

    /// Bytes held by the blocks currently in the free lists of the pool.
    #[must_use]
    pub fn free_bytes(&self) -> usize {
        self.free_lists
            .iter()
            .map(FreeList::resident_bytes)
            .fold(0, usize::wrapping_add)
    }

    /// The number of free blocks in the size class at `index`, or `None` if there is no such
    /// size class.
    #[must_use]
    #[inline]
    pub fn free_count(&self, index: usize) -> Option<usize> {
        self.free_lists.get(index).map(FreeList::len)
    }

    /// The number of buffers acquired from the pool and not released back to it.
    ///
    /// Buffers that were dropped instead of released remain counted.
    #[must_use]
    #[inline]
    pub fn checked_out(&self) -> usize {
        self.checked_out
    }

    /// Returns a buffer to the pool, making its memory available to future acquisitions
    /// of the same size class.
    ///
    /// The header of the buffer is dropped. The data region keeps its contents.
    ///
    /// # Example
    ///
    /// ```
    /// use buffer_pool::BufferPool;
    ///
    /// let mut pool = BufferPool::<()>::new(100, 1500, 10).unwrap();
    ///
    /// let buffer = pool.acquire(1000).unwrap();
    /// assert_eq!(pool.checked_out(), 1);
    ///
    /// pool.release(buffer);
    /// assert_eq!(pool.checked_out(), 0);
    /// ```
    ///
    /// # Panics
    ///
    /// Panics if the buffer was acquired from a different pool.
    pub fn release(&mut self, buffer: PooledBuffer<H>) {
        assert!(
            buffer.pool_id() == self.pool_id,
            "attempted to release a buffer into a different pool (buffer pool ID: {}, current pool ID: {})",
            buffer.pool_id(),
            self.pool_id
        );

        let free_list = self
            .free_lists
            .get_mut(buffer.slot_index())
            .expect("a buffer from this pool always maps to one of its size classes");

        free_list.push(buffer.into_free_block());

        // Cannot wrap because this buffer was acquired from this pool and counted then.
        self.checked_out = self.checked_out.wrapping_sub(1);
    }

    /// Returns the memory of every free block to the system allocator.
    ///
    /// Buffers that are checked out are not affected and may still be released afterwards,
    /// after which they are reused as usual. [`allocated_bytes()`][Self::allocated_bytes] is
    /// not reduced.
    ///
    /// # Example
    ///
    /// ```
    /// use buffer_pool::BufferPool;
    ///
    /// let mut pool = BufferPool::<()>::new(100, 1500, 10).unwrap();
    ///
    /// let buffer = pool.acquire(100).unwrap();
    /// pool.release(buffer);
    /// assert!(pool.free_bytes() > 0);
    ///
    /// let allocated = pool.allocated_bytes();
    /// pool.clear();
    ///
    /// assert_eq!(pool.free_bytes(), 0);
    /// assert_eq!(pool.allocated_bytes(), allocated);
    /// ```
    pub fn clear(&mut self) {
        let bytes = self.free_bytes();

        let blocks = self
            .free_lists
            .iter_mut()
            .map(FreeList::clear)
            .fold(0, usize::wrapping_add);

        if blocks > 0 {
            debug!(
                pool_id = self.pool_id,
                blocks, bytes, "returned free blocks to the system allocator"
            );
        }
    }

    /// Draws up to [`BATCH_SIZE`] blocks for the size class at `slot_index` from the system
    /// allocator, stopping early if the memory budget would be exceeded or the system
    /// allocator fails.
    ///
    /// Returns `true` if the free list of the size class is non-empty afterwards.
    fn grow(&mut self, slot_index: usize) -> bool {
        let free_list = self
            .free_lists
            .get_mut(slot_index)
            .expect("grow() is only called with indexes of existing size classes");

        let block_layout = free_list.block_layout();
        let storage_size = block_layout.storage_size();

        // Only as many blocks as fit in the remaining budget. The list itself is sized for
        // exactly that many, so a slot that cannot grow draws no memory for bookkeeping either.
        let batch = self
            .max_memory
            .saturating_sub(self.allocated)
            .checked_div(storage_size)
            .expect("BlockLayout::new() guarantees a non-zero storage size")
            .min(BATCH_SIZE.get());

        free_list.reserve_exact(batch);

        let mut obtained: usize = 0;

        for _ in 0..batch {
            let Some(block) = FreeBlock::allocate(block_layout) else {
                break;
            };

            free_list.push(block);

            // Cannot overflow because the whole batch fits in the budget.
            self.allocated = self.allocated.wrapping_add(storage_size);

            // Cannot wrap because it is bounded by BATCH_SIZE.
            obtained = obtained.wrapping_add(1);
        }

        let is_empty = free_list.is_empty();

        self.log_growth(slot_index, block_layout, obtained);

        !is_empty
    }

    #[cfg_attr(test, mutants::skip)] // Only affects log output.
    fn log_growth(&self, slot_index: usize, block_layout: BlockLayout, obtained: usize) {
        let storage_size = block_layout.storage_size();

        if obtained == 0 {
            debug!(
                pool_id = self.pool_id,
                slot_index,
                capacity = block_layout.capacity(),
                storage_size,
                allocated = self.allocated,
                max_memory = self.max_memory,
                "size class could not grow"
            );
        } else {
            debug!(
                pool_id = self.pool_id,
                slot_index,
                capacity = block_layout.capacity(),
                blocks = obtained,
                // Cannot overflow because these blocks all fit in the budget.
                bytes = obtained.wrapping_mul(storage_size),
                allocated = self.allocated,
                "size class grew"
            );
        }
    }
}

impl<H: Default> BufferPool<H> {
    /// Acquires a buffer with a capacity of at least `size` bytes.
    ///
    /// The buffer comes from the size class that serves `size`, so its
    /// [`capacity()`][PooledBuffer::capacity] is that of the size class, which may be more
    /// than `size`. Its header is `H::default()`.
    ///
    /// If the size class has no free block, the pool first draws a batch of blocks for it
    /// from the system allocator.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutOfRange`] if `size` is outside the range of the pool.
    ///
    /// Returns [`Error::Exhausted`] if the size class has no free block and no more could be
    /// obtained, either because of the memory budget or because the system allocator failed.
    /// The pool remains usable and other size classes may still have free blocks.
    ///
    /// # Example
    ///
    /// ```
    /// use buffer_pool::{BufferPool, Error};
    ///
    /// let mut pool = BufferPool::<()>::new(100, 1500, 10).unwrap();
    ///
    /// let small = pool.acquire(100).unwrap();
    /// let large = pool.acquire(1500).unwrap();
    /// assert!(small.capacity() >= 100);
    /// assert!(large.capacity() >= 1500);
    ///
    /// assert!(matches!(pool.acquire(5000), Err(Error::OutOfRange { .. })));
    ///
    /// pool.release(small);
    /// pool.release(large);
    /// ```
    pub fn acquire(&mut self, size: usize) -> Result<PooledBuffer<H>> {
        let Some(slot_index) = self.size_classes.index_of(size) else {
            trace!(
                pool_id = self.pool_id,
                size,
                min_size = self.min_size(),
                max_size = self.max_size(),
                "requested size is outside of the pool range"
            );

            return Err(Error::OutOfRange {
                size,
                min_size: self.min_size(),
                max_size: self.max_size(),
            });
        };

        let needs_growth = self
            .free_lists
            .get(slot_index)
            .is_none_or(FreeList::is_empty);

        if needs_growth && !self.grow(slot_index) {
            return Err(Error::Exhausted {
                size,
                slot_capacity: self
                    .size_classes
                    .capacity(slot_index)
                    .expect("index_of() only returns indexes of existing size classes"),
                allocated: self.allocated,
                max_memory: self.max_memory,
            });
        }

        let block = self
            .free_lists
            .get_mut(slot_index)
            .and_then(FreeList::pop)
            .expect("the free list was just verified or grown to be non-empty");

        // Cannot overflow because every checked out buffer is a live allocation.
        self.checked_out = self.checked_out.wrapping_add(1);

        Ok(PooledBuffer::new(
            self.pool_id,
            slot_index,
            block,
            H::default(),
        ))
    }
}

impl<H> Drop for BufferPool<H> {
    fn drop(&mut self) {
        self.clear();

        // We check this after releasing the memory. If we are already panicking, we do not
        // want to panic again because that would obscure the original panic.
        if !thread::panicking() && matches!(self.drop_policy, DropPolicy::MustReleaseBuffers) {
            assert!(
                self.checked_out == 0,
                "dropped a BufferPool with {} buffers checked out - this is forbidden by DropPolicy::MustReleaseBuffers",
                self.checked_out
            );
        }
    }
}

impl<H> fmt::Debug for BufferPool<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(type_name::<Self>())
            .field("pool_id", &self.pool_id)
            .field("size_classes", &self.size_classes)
            .field("free_bytes", &self.free_bytes())
            .field("max_memory", &self.max_memory)
            .field("allocated", &self.allocated)
            .field("checked_out", &self.checked_out)
            .field("drop_policy", &self.drop_policy)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
#[allow(
    clippy::indexing_slicing,
    clippy::arithmetic_side_effects,
    clippy::integer_division,
    reason = "tests focus on succinct code and do not need to tick all the boxes"
)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;

    use static_assertions::{assert_impl_all, assert_not_impl_any};

    use super::*;

    assert_impl_all!(BufferPool<u64>: Send, fmt::Debug);
    assert_impl_all!(BufferPool<Rc<u64>>: Send);
    assert_not_impl_any!(BufferPool<u64>: Sync);

    #[derive(Default)]
    struct PacketHeader {
        buf: [u8; 16],
        count: usize,
    }

    fn packet_pool() -> BufferPool<PacketHeader> {
        BufferPool::new(100, 1500, 10).unwrap()
    }

    fn storage_size_of<H>(pool: &BufferPool<H>, size: usize) -> usize {
        let index = pool.slot_index(size).unwrap();
        pool.free_lists[index].block_layout().storage_size()
    }

    #[test]
    fn smoke_test() {
        let mut pool = packet_pool();

        let small = pool.acquire(100).unwrap();
        let large = pool.acquire(1500).unwrap();

        assert!(small.capacity() >= 100);
        assert!(large.capacity() >= 1500);
        assert_ne!(small.capacity(), large.capacity());
        assert_eq!(pool.checked_out(), 2);

        pool.release(small);
        pool.release(large);

        assert_eq!(pool.checked_out(), 0);
    }

    #[test]
    fn capacity_is_that_of_the_slot() {
        let mut pool = packet_pool();

        for size in [100, 101, 239, 240, 241, 799, 800, 1499, 1500] {
            let buffer = pool.acquire(size).unwrap();
            let index = pool.slot_index(size).unwrap();

            assert!(buffer.capacity() >= size);
            assert_eq!(Some(buffer.capacity()), pool.slot_capacity(index));
            assert_eq!(buffer.data().len(), buffer.capacity());

            pool.release(buffer);
        }
    }

    #[test]
    fn out_of_range_is_rejected_without_allocating() {
        let mut pool = packet_pool();

        assert!(matches!(
            pool.acquire(99),
            Err(Error::OutOfRange {
                size: 99,
                min_size: 100,
                max_size: 1500
            })
        ));
        assert!(matches!(
            pool.acquire(5000),
            Err(Error::OutOfRange { size: 5000, .. })
        ));

        assert_eq!(pool.allocated_bytes(), 0);
        assert_eq!(pool.checked_out(), 0);
    }

    #[test]
    fn out_of_range_is_independent_of_free_list_state() {
        let mut pool = packet_pool();

        let buffer = pool.acquire(1500).unwrap();
        pool.release(buffer);

        assert!(matches!(pool.acquire(5000), Err(Error::OutOfRange { .. })));
    }

    #[test]
    fn first_acquire_grows_one_batch() {
        let mut pool = packet_pool();

        let buffer = pool.acquire(800).unwrap();
        let index = pool.slot_index(800).unwrap();
        let storage_size = storage_size_of(&pool, 800);

        assert_eq!(pool.free_count(index), Some(BATCH_SIZE.get() - 1));
        assert_eq!(pool.allocated_bytes(), BATCH_SIZE.get() * storage_size);

        // Other slots are untouched.
        for other in (0..pool.slot_count()).filter(|other| *other != index) {
            assert_eq!(pool.free_count(other), Some(0));
        }

        pool.release(buffer);
        assert_eq!(pool.free_count(index), Some(BATCH_SIZE.get()));
    }

    #[test]
    fn release_then_acquire_reuses_same_block() {
        let mut pool = packet_pool();

        let buffer = pool.acquire(800).unwrap();
        let addr = buffer.block_addr();
        pool.release(buffer);

        let buffer = pool.acquire(800).unwrap();
        assert_eq!(buffer.block_addr(), addr);

        // Any size in the same slot reuses the block too.
        pool.release(buffer);
        let index = pool.slot_index(800).unwrap();
        let other_size_in_slot = pool.slot_capacity(index).unwrap();
        let buffer = pool.acquire(other_size_in_slot).unwrap();
        assert_eq!(buffer.block_addr(), addr);

        pool.release(buffer);
    }

    #[test]
    fn release_order_is_last_in_first_out() {
        let mut pool = packet_pool();

        let first = pool.acquire(500).unwrap();
        let second = pool.acquire(500).unwrap();
        let first_addr = first.block_addr();
        let second_addr = second.block_addr();

        pool.release(first);
        pool.release(second);

        let again = pool.acquire(500).unwrap();
        assert_eq!(again.block_addr(), second_addr);
        let again_too = pool.acquire(500).unwrap();
        assert_eq!(again_too.block_addr(), first_addr);

        pool.release(again);
        pool.release(again_too);
    }

    #[test]
    fn full_batch_then_grows_again() {
        let mut pool = packet_pool();
        let storage_size = storage_size_of(&pool, 800);

        let buffers = (0..BATCH_SIZE.get())
            .map(|_| pool.acquire(800).unwrap())
            .collect::<Vec<_>>();

        assert_eq!(pool.allocated_bytes(), BATCH_SIZE.get() * storage_size);
        assert_eq!(pool.checked_out(), BATCH_SIZE.get());

        // The slot is empty now, so the next acquire draws another batch.
        let one_more = pool.acquire(800).unwrap();
        assert_eq!(pool.allocated_bytes(), 2 * BATCH_SIZE.get() * storage_size);

        pool.release(one_more);
        for buffer in buffers {
            pool.release(buffer);
        }

        assert_eq!(pool.checked_out(), 0);
    }

    #[test]
    fn budget_limits_batch_size() {
        let layout_pool = packet_pool();
        let storage_size = storage_size_of(&layout_pool, 800);

        let mut pool = BufferPool::<PacketHeader>::builder()
            .min_size(100)
            .max_size(1500)
            .slot_count(10)
            .max_memory(storage_size * 3 + storage_size / 2)
            .build()
            .unwrap();

        let buffers = (0..3)
            .map(|_| pool.acquire(800).unwrap())
            .collect::<Vec<_>>();

        assert_eq!(pool.allocated_bytes(), storage_size * 3);
        assert!(pool.allocated_bytes() <= pool.max_memory());

        let result = pool.acquire(800);
        assert!(matches!(
            result,
            Err(Error::Exhausted {
                size: 800,
                max_memory,
                ..
            }) if max_memory == storage_size * 3 + storage_size / 2
        ));

        // The pool stays usable: released blocks are served again.
        for buffer in buffers {
            pool.release(buffer);
        }

        let buffer = pool.acquire(800).unwrap();
        assert_eq!(pool.allocated_bytes(), storage_size * 3);
        pool.release(buffer);
    }

    #[test]
    fn exhausted_slot_does_not_affect_slots_with_free_blocks() {
        let storage_size = storage_size_of(&packet_pool(), 100);

        let mut pool = BufferPool::<PacketHeader>::builder()
            .min_size(100)
            .max_size(1500)
            .slot_count(10)
            .max_memory(storage_size * 2)
            .build()
            .unwrap();

        let small = pool.acquire(100).unwrap();
        pool.release(small);

        // The small slot took the entire budget, so the large slot cannot grow.
        assert!(matches!(pool.acquire(1500), Err(Error::Exhausted { .. })));

        let small = pool.acquire(100).unwrap();
        let small_too = pool.acquire(100).unwrap();
        assert!(matches!(pool.acquire(100), Err(Error::Exhausted { .. })));

        pool.release(small);
        pool.release(small_too);
    }

    #[test]
    fn zero_budget_never_allocates() {
        let mut pool = BufferPool::<()>::builder()
            .max_size(100)
            .max_memory(0)
            .build()
            .unwrap();

        assert!(matches!(pool.acquire(50), Err(Error::Exhausted { .. })));
        assert_eq!(pool.allocated_bytes(), 0);
        assert_eq!(pool.checked_out(), 0);
    }

    #[test]
    fn zero_budget_draws_no_bookkeeping_memory() {
        let mut pool = BufferPool::<PacketHeader>::builder()
            .min_size(100)
            .max_size(1500)
            .slot_count(10)
            .max_memory(0)
            .build()
            .unwrap();

        for size in [100, 800, 1500] {
            assert!(matches!(pool.acquire(size), Err(Error::Exhausted { .. })));
        }

        assert!(pool.free_lists.iter().all(|list| list.reserved() == 0));
    }

    #[test]
    fn growth_reserves_only_what_the_budget_allows() {
        let storage_size = storage_size_of(&packet_pool(), 800);

        let mut pool = BufferPool::<PacketHeader>::builder()
            .min_size(100)
            .max_size(1500)
            .slot_count(10)
            .max_memory(storage_size * 3 + storage_size / 2)
            .build()
            .unwrap();

        let buffer = pool.acquire(800).unwrap();
        let index = buffer.slot_index();

        let reserved = pool.free_lists[index].reserved();
        assert!(reserved >= 3);
        assert!(reserved < BATCH_SIZE.get());

        // Slots that never grew reserve nothing.
        for (other, list) in pool.free_lists.iter().enumerate() {
            if other != index {
                assert_eq!(list.reserved(), 0);
            }
        }

        pool.release(buffer);
    }

    #[test]
    fn buffer_remembers_its_slot() {
        let mut pool = packet_pool();

        for size in [100, 240, 241, 1000, 1500] {
            let buffer = pool.acquire(size).unwrap();

            assert_eq!(Some(buffer.slot_index()), pool.slot_index(size));
            assert_eq!(
                pool.slot_capacity(buffer.slot_index()),
                Some(buffer.capacity())
            );

            pool.release(buffer);
            assert_eq!(
                pool.free_count(pool.slot_index(size).unwrap()),
                Some(BATCH_SIZE.get())
            );
        }
    }

    #[test]
    fn last_slot_capacity_beyond_max_size_is_released_to_last_slot() {
        let mut pool = packet_pool();

        let buffer = pool.acquire(1500).unwrap();
        assert!(buffer.capacity() > pool.max_size());
        assert_eq!(buffer.slot_index(), pool.slot_count() - 1);

        pool.release(buffer);
        assert_eq!(
            pool.free_count(pool.slot_count() - 1),
            Some(BATCH_SIZE.get())
        );
    }

    #[test]
    fn allocated_bytes_is_monotonic() {
        let mut pool = packet_pool();
        let mut previous = pool.allocated_bytes();

        let mut check = |pool: &BufferPool<PacketHeader>| {
            assert!(pool.allocated_bytes() >= previous);
            previous = pool.allocated_bytes();
        };

        let a = pool.acquire(100).unwrap();
        check(&pool);
        let b = pool.acquire(1500).unwrap();
        check(&pool);
        pool.release(a);
        check(&pool);
        pool.clear();
        check(&pool);
        pool.release(b);
        check(&pool);
        let c = pool.acquire(100).unwrap();
        check(&pool);
        pool.release(c);
        pool.clear();
        check(&pool);
    }

    #[test]
    fn clear_releases_free_blocks_but_keeps_counter() {
        let mut pool = packet_pool();

        let buffer = pool.acquire(300).unwrap();
        let allocated = pool.allocated_bytes();
        assert_eq!(
            pool.free_bytes(),
            (BATCH_SIZE.get() - 1) * storage_size_of(&pool, 300)
        );

        pool.clear();

        assert_eq!(pool.free_bytes(), 0);
        assert_eq!(pool.allocated_bytes(), allocated);
        assert!((0..pool.slot_count()).all(|index| pool.free_count(index) == Some(0)));

        // Checked out buffers survive the clear and can still be released.
        pool.release(buffer);
        assert_eq!(pool.free_bytes(), storage_size_of(&pool, 300));

        // The next acquire reuses that block without growing.
        let buffer = pool.acquire(300).unwrap();
        assert_eq!(pool.allocated_bytes(), allocated);
        pool.release(buffer);
    }

    #[test]
    fn header_is_reset_on_every_acquire() {
        let mut pool = packet_pool();

        let mut buffer = pool.acquire(700).unwrap();
        buffer.header_mut().count = 42;
        buffer.header_mut().buf[3] = 9;
        buffer.data_mut()[0] = 0xAB;
        pool.release(buffer);

        let buffer = pool.acquire(700).unwrap();
        assert_eq!(buffer.header().count, 0);
        assert_eq!(buffer.header().buf, [0; 16]);

        // The data region is not reset.
        assert_eq!(buffer.data()[0], 0xAB);

        pool.release(buffer);
    }

    #[test]
    fn header_is_dropped_on_release() {
        #[derive(Default)]
        struct Tracked {
            drops: Option<Rc<Cell<usize>>>,
        }

        impl Drop for Tracked {
            fn drop(&mut self) {
                if let Some(drops) = &self.drops {
                    drops.set(drops.get() + 1);
                }
            }
        }

        let drops = Rc::new(Cell::new(0));
        let mut pool = BufferPool::<Tracked>::new(1, 64, 4).unwrap();

        let mut buffer = pool.acquire(10).unwrap();
        buffer.header_mut().drops = Some(Rc::clone(&drops));

        pool.release(buffer);
        assert_eq!(drops.get(), 1);
    }

    #[test]
    #[should_panic]
    fn release_into_other_pool_panics() {
        let mut pool_a = packet_pool();
        let mut pool_b = packet_pool();

        let buffer = pool_a.acquire(200).unwrap();
        pool_b.release(buffer);
    }

    #[test]
    fn dropped_buffer_stays_checked_out() {
        let mut pool = packet_pool();

        let buffer = pool.acquire(200).unwrap();
        drop(buffer);

        assert_eq!(pool.checked_out(), 1);
    }

    #[test]
    fn buffer_outlives_pool() {
        let mut pool = packet_pool();

        let mut buffer = pool.acquire(200).unwrap();
        drop(pool);

        buffer.data_mut().fill(1);
        assert!(buffer.data().iter().all(|byte| *byte == 1));
    }

    #[test]
    #[should_panic]
    fn drop_with_outstanding_buffers_panics_if_forbidden() {
        let mut pool = BufferPool::<()>::builder()
            .max_size(100)
            .drop_policy(DropPolicy::MustReleaseBuffers)
            .build()
            .unwrap();

        let _buffer = pool.acquire(10).unwrap();
        drop(pool);
    }

    #[test]
    fn drop_without_outstanding_buffers_is_fine_if_forbidden() {
        let mut pool = BufferPool::<()>::builder()
            .max_size(100)
            .drop_policy(DropPolicy::MustReleaseBuffers)
            .build()
            .unwrap();

        let buffer = pool.acquire(10).unwrap();
        pool.release(buffer);
        drop(pool);
    }

    #[test]
    fn drop_with_outstanding_buffers_is_fine_by_default() {
        let mut pool = BufferPool::<()>::new(0, 100, 4).unwrap();

        let _buffer = pool.acquire(10).unwrap();
        drop(pool);
    }

    #[test]
    fn single_size_pool() {
        let mut pool = BufferPool::<u32>::new(64, 64, 8).unwrap();

        assert_eq!(pool.slot_count(), 1);
        assert!(matches!(pool.acquire(63), Err(Error::OutOfRange { .. })));

        let buffer = pool.acquire(64).unwrap();
        assert_eq!(buffer.capacity(), 64);
        pool.release(buffer);
    }

    #[test]
    fn zero_capacity_buffers_are_served() {
        let mut pool = BufferPool::<()>::new(0, 3, 4).unwrap();

        let buffer = pool.acquire(0).unwrap();
        assert_eq!(buffer.capacity(), 0);
        assert!(buffer.data().is_empty());
        pool.release(buffer);
    }

    #[test]
    fn invalid_configuration_is_rejected() {
        assert!(matches!(
            BufferPool::<()>::new(10, 5, 1),
            Err(Error::InvalidRange { .. })
        ));
        assert!(matches!(
            BufferPool::<()>::new(100, 1500, 0),
            Err(Error::InvalidSlotCount { .. })
        ));
        assert!(matches!(
            BufferPool::<()>::new(100, 1500, 257),
            Err(Error::InvalidSlotCount { .. })
        ));
    }

    #[test]
    fn pool_ids_are_unique() {
        let pool_a = packet_pool();
        let pool_b = packet_pool();

        assert_ne!(pool_a.pool_id, pool_b.pool_id);
    }

    #[test]
    fn debug_output_includes_counters() {
        let pool = packet_pool();

        let output = format!("{pool:?}");
        assert!(output.contains("allocated"));
        assert!(output.contains("checked_out"));
    }
}
