use std::alloc::{Layout, alloc_zeroed, dealloc};
use std::mem::ManuallyDrop;
use std::ptr::NonNull;

/// Precalculated memory layout of a block: a header of some type `H` at offset zero followed
/// by a data region of `capacity` bytes, padded to at least pointer alignment.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) struct BlockLayout {
    /// Layout of the header the block was calculated for. Used to validate that blocks are
    /// only ever used with the header type they were laid out for.
    header_layout: Layout,

    /// Layout of the entire block allocation. The size is what we count against the memory
    /// budget of the pool.
    block_layout: Layout,

    /// Byte offset from the start of the block to the first data byte.
    data_offset: usize,

    /// Number of bytes in the data region.
    capacity: usize,
}

impl BlockLayout {
    /// Calculates the layout of a block with a header of type `H` and `capacity` data bytes.
    ///
    /// Returns `None` if the block would be too large to be represented as an allocation.
    #[must_use]
    pub(crate) fn new<H>(capacity: usize) -> Option<Self> {
        let header_layout = Layout::new::<H>();

        let (combined, data_offset) = header_layout
            .align_to(align_of::<usize>())
            .ok()?
            .extend(Layout::array::<u8>(capacity).ok()?)
            .ok()?;

        let mut block_layout = combined.pad_to_align();

        // A zero-sized header with zero-sized data still needs a distinct address
        // per block, so we never request zero bytes from the allocator.
        if block_layout.size() == 0 {
            block_layout = Layout::from_size_align(block_layout.align(), block_layout.align())
                .ok()?;
        }

        Some(Self {
            header_layout,
            block_layout,
            data_offset,
            capacity,
        })
    }

    /// Number of data bytes in each block.
    #[must_use]
    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of bytes each block draws from the system allocator.
    #[must_use]
    pub(crate) fn storage_size(&self) -> usize {
        self.block_layout.size()
    }

    #[must_use]
    pub(crate) fn data_offset(&self) -> usize {
        self.data_offset
    }

    #[must_use]
    pub(crate) fn header_layout(&self) -> Layout {
        self.header_layout
    }
}

/// A block of memory obtained from the system allocator whose header is not initialized.
///
/// The data region is always initialized: it is zeroed when the block is allocated and after
/// that only ever holds bytes written by users of the block.
///
/// The memory is returned to the system allocator when the block is dropped.
#[derive(Debug)]
pub(crate) struct FreeBlock {
    ptr: NonNull<u8>,
    layout: BlockLayout,
}

impl FreeBlock {
    /// Obtains a new block from the system allocator.
    ///
    /// Returns `None` if the allocator reports failure.
    #[must_use]
    pub(crate) fn allocate(layout: BlockLayout) -> Option<Self> {
        // SAFETY: BlockLayout::new() guarantees the block layout has a non-zero size.
        let ptr = NonNull::new(unsafe { alloc_zeroed(layout.block_layout) })?;

        Some(Self { ptr, layout })
    }

    /// Reassembles a block from parts previously obtained from [`into_parts()`][Self::into_parts].
    ///
    /// # Safety
    ///
    /// The pointer must come from a single call to `into_parts()` and must not have been used
    /// to reassemble a block before. The layout must equal the one returned alongside it.
    /// The header, if it was ever initialized, must have been dropped.
    #[must_use]
    pub(crate) unsafe fn from_parts(ptr: NonNull<u8>, layout: BlockLayout) -> Self {
        Self { ptr, layout }
    }

    /// Gives up ownership of the memory without releasing it to the system allocator.
    #[must_use]
    pub(crate) fn into_parts(self) -> (NonNull<u8>, BlockLayout) {
        let this = ManuallyDrop::new(self);
        (this.ptr, this.layout)
    }

    #[must_use]
    pub(crate) fn layout(&self) -> BlockLayout {
        self.layout
    }

    #[must_use]
    pub(crate) fn capacity(&self) -> usize {
        self.layout.capacity
    }

    #[cfg(test)]
    #[must_use]
    pub(crate) fn as_ptr(&self) -> NonNull<u8> {
        self.ptr
    }
}

impl Drop for FreeBlock {
    fn drop(&mut self) {
        // SAFETY: The memory was allocated in allocate() with this exact layout and we are
        // the only owner of the allocation, so it has not been released yet.
        unsafe {
            dealloc(self.ptr.as_ptr(), self.layout.block_layout);
        }
    }
}

// SAFETY: A free block is plain memory with no initialized header, so there is no value
// in it that could be tied to a particular thread.
unsafe impl Send for FreeBlock {}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
#[allow(
    clippy::undocumented_unsafe_blocks,
    clippy::arithmetic_side_effects,
    reason = "tests focus on succinct code and do not need to tick all the boxes"
)]
mod tests {
    use std::ptr;

    use static_assertions::{assert_impl_all, assert_not_impl_any};

    use super::*;

    assert_impl_all!(FreeBlock: Send);
    assert_not_impl_any!(FreeBlock: Sync, Clone);

    const WORD: usize = size_of::<usize>();

    #[repr(C)]
    #[allow(dead_code, reason = "only the layout matters")]
    struct PacketHeader {
        buf: [u8; 16],
        count: usize,
    }

    fn round_up_to_word(value: usize) -> usize {
        value.div_ceil(WORD) * WORD
    }

    #[test]
    fn storage_size_is_header_plus_capacity_rounded_to_word() {
        for capacity in [0, 1, 7, 8, 9, 240, 1509] {
            let layout = BlockLayout::new::<PacketHeader>(capacity).unwrap();

            assert_eq!(layout.capacity(), capacity);
            assert_eq!(layout.data_offset(), size_of::<PacketHeader>());
            assert_eq!(
                layout.storage_size(),
                round_up_to_word(size_of::<PacketHeader>() + capacity)
            );
        }
    }

    #[test]
    fn small_header_is_padded_to_word_alignment() {
        let layout = BlockLayout::new::<u8>(3).unwrap();

        assert_eq!(layout.data_offset(), 1);
        assert_eq!(layout.storage_size(), WORD);
        assert_eq!(layout.header_layout(), Layout::new::<u8>());
    }

    #[test]
    fn over_aligned_header_raises_block_alignment() {
        #[repr(align(64))]
        #[allow(dead_code, reason = "only the layout matters")]
        struct Aligned([u8; 64]);

        let layout = BlockLayout::new::<Aligned>(1).unwrap();

        assert_eq!(layout.data_offset(), 64);
        assert_eq!(layout.storage_size(), 128);
    }

    #[test]
    fn zero_sized_block_still_occupies_memory() {
        let layout = BlockLayout::new::<()>(0).unwrap();

        assert_eq!(layout.capacity(), 0);
        assert!(layout.storage_size() > 0);

        let block = FreeBlock::allocate(layout).unwrap();
        assert_eq!(block.capacity(), 0);
    }

    #[test]
    fn unrepresentable_capacity_is_rejected() {
        assert!(BlockLayout::new::<u64>(usize::MAX).is_none());
        assert!(BlockLayout::new::<u64>(usize::MAX >> 1).is_none());
    }

    #[test]
    fn allocated_data_is_zeroed() {
        let layout = BlockLayout::new::<PacketHeader>(100).unwrap();
        let block = FreeBlock::allocate(layout).unwrap();

        let data = unsafe {
            std::slice::from_raw_parts(block.as_ptr().as_ptr().add(layout.data_offset()), 100)
        };

        assert!(data.iter().all(|byte| *byte == 0));
    }

    #[test]
    fn parts_round_trip_keeps_memory_identity() {
        let layout = BlockLayout::new::<u32>(16).unwrap();
        let block = FreeBlock::allocate(layout).unwrap();
        let original = block.as_ptr();

        let (ptr, parts_layout) = block.into_parts();
        assert_eq!(ptr, original);
        assert_eq!(parts_layout, layout);

        let block = unsafe { FreeBlock::from_parts(ptr, parts_layout) };
        assert_eq!(block.as_ptr(), original);
        assert_eq!(block.layout(), layout);
    }

    #[test]
    fn data_region_is_writable() {
        let layout = BlockLayout::new::<PacketHeader>(32).unwrap();
        let block = FreeBlock::allocate(layout).unwrap();

        unsafe {
            let data = block.as_ptr().as_ptr().add(layout.data_offset());
            ptr::write_bytes(data, b'0', 32);
            assert_eq!(*data.add(31), b'0');
        }
    }
}
