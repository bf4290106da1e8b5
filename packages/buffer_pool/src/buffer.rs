use std::alloc::Layout;
use std::any::type_name;
use std::fmt;
use std::marker::PhantomData;
use std::mem::ManuallyDrop;
use std::ptr::{self, NonNull};
use std::slice;

use crate::{BlockLayout, FreeBlock};

/// A buffer acquired from a [`BufferPool`], consisting of a header of type `H` and a
/// data region of [`capacity()`][Self::capacity] bytes.
///
/// The capacity is that of the size class the buffer was served from, which is at least the
/// size that was requested and frequently more. Treat the capacity, not the requested size,
/// as the usable size of the buffer.
///
/// The header is freshly created via [`Default`] every time the buffer is acquired and is
/// dropped every time the buffer is released, so no state carries over between uses. The data
/// region is not cleared between uses: it is zeroed when the pool first allocates the block and
/// afterwards contains whatever the previous user left in it.
///
/// Return the buffer to the pool it came from via [`BufferPool::release()`] so the memory can
/// be reused. A buffer that is dropped instead drops its header and returns its memory
/// directly to the system allocator.
///
/// # Examples
///
/// ```
/// use buffer_pool::BufferPool;
///
/// #[derive(Default)]
/// struct PacketHeader {
///     sequence: u32,
/// }
///
/// let mut pool = BufferPool::<PacketHeader>::new(100, 1500, 10).unwrap();
///
/// let mut buffer = pool.acquire(200).unwrap();
/// assert!(buffer.capacity() >= 200);
/// assert_eq!(buffer.header().sequence, 0);
///
/// buffer.header_mut().sequence = 7;
/// buffer.data_mut()[..5].copy_from_slice(b"hello");
/// assert_eq!(&buffer.data()[..5], b"hello");
///
/// pool.release(buffer);
/// ```
///
/// # Thread safety
///
/// The buffer is [`Send`] if `H` is [`Send`] and [`Sync`] if `H` is [`Sync`].
///
/// [`BufferPool`]: crate::BufferPool
/// [`BufferPool::release()`]: crate::BufferPool::release
pub struct PooledBuffer<H> {
    /// Identifies the pool the buffer was acquired from, so it cannot be released into
    /// a different pool.
    pool_id: u64,

    /// Index of the size class the buffer was served from. Its free list is where the block
    /// goes back to on release.
    slot_index: usize,

    /// Start of the block. The header lives at offset zero and is always initialized while
    /// the buffer exists.
    ptr: NonNull<u8>,

    layout: BlockLayout,

    _header: PhantomData<H>,
}

impl<H> PooledBuffer<H> {
    /// Takes ownership of a free block and initializes its header.
    #[must_use]
    pub(crate) fn new(pool_id: u64, slot_index: usize, block: FreeBlock, header: H) -> Self {
        let (ptr, layout) = block.into_parts();

        debug_assert_eq!(
            layout.header_layout(),
            Layout::new::<H>(),
            "block was laid out for a different header type"
        );

        let header_ptr = ptr.cast::<H>();

        // SAFETY: The pool only hands us blocks laid out for a header of type H at offset zero
        // with at least the alignment of H (verified above in debug builds). The header region
        // is not initialized because it is a free block, and we own the block exclusively.
        unsafe {
            header_ptr.write(header);
        }

        Self {
            pool_id,
            slot_index,
            ptr,
            layout,
            _header: PhantomData,
        }
    }

    /// Drops the header and turns the buffer back into a free block.
    #[must_use]
    pub(crate) fn into_free_block(self) -> FreeBlock {
        let this = ManuallyDrop::new(self);

        // SAFETY: The header is initialized for as long as the buffer exists and we are
        // consuming the buffer, so nothing can observe the header after this.
        unsafe {
            ptr::drop_in_place(this.header_ptr().as_ptr());
        }

        // SAFETY: These are the parts we took from a free block in new(), they are used only
        // once because `this` is never dropped, and the header has just been dropped.
        unsafe { FreeBlock::from_parts(this.ptr, this.layout) }
    }

    #[must_use]
    pub(crate) fn pool_id(&self) -> u64 {
        self.pool_id
    }

    /// The index of the size class the buffer was served from.
    ///
    /// This is [`BufferPool::slot_index()`] of the requested size, so the capacity of the
    /// buffer is [`BufferPool::slot_capacity()`] of this index.
    ///
    /// [`BufferPool::slot_index()`]: crate::BufferPool::slot_index
    /// [`BufferPool::slot_capacity()`]: crate::BufferPool::slot_capacity
    #[must_use]
    #[inline]
    pub fn slot_index(&self) -> usize {
        self.slot_index
    }

    /// The number of bytes in the data region of the buffer.
    ///
    /// This is the capacity of the size class the buffer was served from and never changes
    /// over the lifetime of the buffer.
    #[must_use]
    #[inline]
    pub fn capacity(&self) -> usize {
        self.layout.capacity()
    }

    /// The header of the buffer.
    #[must_use]
    #[inline]
    pub fn header(&self) -> &H {
        // SAFETY: The header is initialized for as long as the buffer exists and the borrow
        // of self ensures no exclusive reference exists at the same time.
        unsafe { self.header_ptr().as_ref() }
    }

    /// The header of the buffer, for modification.
    #[must_use]
    #[inline]
    pub fn header_mut(&mut self) -> &mut H {
        // SAFETY: The header is initialized for as long as the buffer exists and the exclusive
        // borrow of self ensures no other reference exists at the same time.
        unsafe { self.header_ptr().as_mut() }
    }

    /// The data region of the buffer. Always exactly [`capacity()`][Self::capacity] bytes long.
    #[must_use]
    #[inline]
    pub fn data(&self) -> &[u8] {
        // SAFETY: The data region is within the block allocation, always initialized (zeroed
        // on allocation) and does not overlap the header.
        unsafe { slice::from_raw_parts(self.data_ptr().as_ptr(), self.capacity()) }
    }

    /// The data region of the buffer, for modification.
    /// Always exactly [`capacity()`][Self::capacity] bytes long.
    #[must_use]
    #[inline]
    pub fn data_mut(&mut self) -> &mut [u8] {
        // SAFETY: The data region is within the block allocation, always initialized (zeroed
        // on allocation) and does not overlap the header. We hold an exclusive borrow of self.
        unsafe { slice::from_raw_parts_mut(self.data_ptr().as_ptr(), self.capacity()) }
    }

    /// Address of the underlying memory block. Two buffers with the same address are the
    /// same block, which makes this useful to observe block reuse.
    #[must_use]
    #[inline]
    pub fn block_addr(&self) -> usize {
        self.ptr.as_ptr().addr()
    }

    fn header_ptr(&self) -> NonNull<H> {
        self.ptr.cast::<H>()
    }

    fn data_ptr(&self) -> NonNull<u8> {
        // SAFETY: The data offset is within the block allocation by construction of the layout.
        unsafe { self.ptr.add(self.layout.data_offset()) }
    }
}

impl<H> Drop for PooledBuffer<H> {
    fn drop(&mut self) {
        // SAFETY: The header is initialized for as long as the buffer exists and we are
        // being dropped, so nothing can observe the header after this.
        unsafe {
            ptr::drop_in_place(self.header_ptr().as_ptr());
        }

        // SAFETY: These are the parts we took from a free block in new(). The buffer is being
        // dropped so they cannot be used again, and the header has just been dropped.
        drop(unsafe { FreeBlock::from_parts(self.ptr, self.layout) });
    }
}

impl<H> AsRef<[u8]> for PooledBuffer<H> {
    fn as_ref(&self) -> &[u8] {
        self.data()
    }
}

impl<H> AsMut<[u8]> for PooledBuffer<H> {
    fn as_mut(&mut self) -> &mut [u8] {
        self.data_mut()
    }
}

impl<H> fmt::Debug for PooledBuffer<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(type_name::<Self>())
            .field("pool_id", &self.pool_id)
            .field("slot_index", &self.slot_index)
            .field("ptr", &self.ptr)
            .field("capacity", &self.capacity())
            .finish_non_exhaustive()
    }
}

// SAFETY: The buffer exclusively owns its block, so moving it to another thread is as safe
// as moving the header it contains.
unsafe impl<H: Send> Send for PooledBuffer<H> {}

// SAFETY: Shared access only hands out `&H` and `&[u8]`, which is safe to share if `H` is.
unsafe impl<H: Sync> Sync for PooledBuffer<H> {}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
#[allow(
    clippy::indexing_slicing,
    reason = "tests focus on succinct code and do not need to tick all the boxes"
)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;

    use static_assertions::{assert_impl_all, assert_not_impl_any};

    use super::*;

    assert_impl_all!(PooledBuffer<u64>: Send, Sync, fmt::Debug);
    assert_impl_all!(PooledBuffer<Cell<u64>>: Send);
    assert_not_impl_any!(PooledBuffer<Cell<u64>>: Sync);
    assert_not_impl_any!(PooledBuffer<Rc<u64>>: Send, Sync);
    assert_not_impl_any!(PooledBuffer<u64>: Clone, Copy);

    fn free_block<H>(capacity: usize) -> FreeBlock {
        FreeBlock::allocate(BlockLayout::new::<H>(capacity).unwrap()).unwrap()
    }

    #[derive(Default)]
    struct DropCounting {
        drops: Option<Rc<Cell<usize>>>,
    }

    impl Drop for DropCounting {
        fn drop(&mut self) {
            if let Some(drops) = &self.drops {
                drops.set(drops.get() + 1);
            }
        }
    }

    #[test]
    fn header_and_data_are_independent() {
        let mut buffer = PooledBuffer::new(1, 0, free_block::<[u64; 2]>(24), [0_u64; 2]);

        assert_eq!(buffer.capacity(), 24);
        assert_eq!(buffer.data().len(), 24);

        buffer.data_mut().fill(0xFF);
        assert_eq!(*buffer.header(), [0, 0]);

        *buffer.header_mut() = [u64::MAX, 1];
        assert!(buffer.data().iter().all(|byte| *byte == 0xFF));
        assert_eq!(*buffer.header(), [u64::MAX, 1]);
    }

    #[test]
    fn fresh_data_is_zeroed() {
        let buffer = PooledBuffer::new(1, 0, free_block::<u32>(100), 0_u32);

        assert!(buffer.data().iter().all(|byte| *byte == 0));
    }

    #[test]
    fn into_free_block_drops_header_and_keeps_memory() {
        let drops = Rc::new(Cell::new(0));

        let mut buffer = PooledBuffer::new(
            1,
            0,
            free_block::<DropCounting>(16),
            DropCounting {
                drops: Some(Rc::clone(&drops)),
            },
        );
        buffer.data_mut()[0] = 42;
        let addr = buffer.block_addr();

        let block = buffer.into_free_block();
        assert_eq!(drops.get(), 1);
        assert_eq!(block.as_ptr().as_ptr().addr(), addr);
        assert_eq!(block.capacity(), 16);

        // The data survives the round trip, only the header is reset.
        let buffer = PooledBuffer::new(2, 0, block, DropCounting::default());
        assert_eq!(buffer.data()[0], 42);
        assert_eq!(buffer.block_addr(), addr);
        assert!(buffer.header().drops.is_none());
    }

    #[test]
    fn dropping_buffer_drops_header() {
        let drops = Rc::new(Cell::new(0));

        let buffer = PooledBuffer::new(
            1,
            0,
            free_block::<DropCounting>(16),
            DropCounting {
                drops: Some(Rc::clone(&drops)),
            },
        );

        drop(buffer);
        assert_eq!(drops.get(), 1);
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic]
    fn mismatched_header_type_panics() {
        let _buffer = PooledBuffer::new(1, 0, free_block::<u8>(16), [0_u64; 4]);
    }

    #[test]
    fn as_ref_and_as_mut_expose_data() {
        let mut buffer = PooledBuffer::new(1, 0, free_block::<()>(8), ());

        buffer.as_mut().copy_from_slice(b"abcdefgh");
        assert_eq!(buffer.as_ref(), b"abcdefgh");
    }

    #[test]
    fn slot_index_is_remembered() {
        let buffer = PooledBuffer::new(1, 5, free_block::<u32>(64), 0_u32);

        assert_eq!(buffer.slot_index(), 5);

        let block = buffer.into_free_block();
        let buffer = PooledBuffer::new(1, 3, block, 0_u32);
        assert_eq!(buffer.slot_index(), 3);
    }

    #[test]
    fn debug_output_names_the_type() {
        let buffer = PooledBuffer::new(7, 0, free_block::<u16>(8), 0_u16);

        let output = format!("{buffer:?}");
        assert!(output.contains("PooledBuffer"));
        assert!(output.contains("capacity"));
    }
}
