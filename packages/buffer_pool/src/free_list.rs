use std::ptr::NonNull;

use crate::{BlockLayout, FreeBlock};

/// The free blocks of one size class.
///
/// Blocks are kept in a stack: the most recently released block is the first to be reused,
/// as it is the most likely to still be in the processor caches.
///
/// Only the address of each block is stored. The layout is the same for every block of the
/// size class, so it is stored once and reattached when a block leaves the list.
#[derive(Debug)]
pub(crate) struct FreeList {
    /// Layout shared by every block of this size class.
    block_layout: BlockLayout,

    /// The top of the stack (the end of the Vec) is the head of the free list.
    ///
    /// Every address is the start of a block allocated with `block_layout` and exclusively
    /// owned by this list.
    blocks: Vec<NonNull<u8>>,
}

impl FreeList {
    #[must_use]
    pub(crate) fn new(block_layout: BlockLayout) -> Self {
        Self {
            block_layout,
            blocks: Vec::new(),
        }
    }

    #[must_use]
    pub(crate) fn block_layout(&self) -> BlockLayout {
        self.block_layout
    }

    #[must_use]
    pub(crate) fn len(&self) -> usize {
        self.blocks.len()
    }

    #[must_use]
    pub(crate) fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Bytes drawn from the system allocator by the blocks currently in this list.
    #[must_use]
    pub(crate) fn resident_bytes(&self) -> usize {
        // Cannot overflow because every one of these blocks is a live allocation.
        self.blocks
            .len()
            .wrapping_mul(self.block_layout.storage_size())
    }

    /// Makes room for exactly `additional` more blocks without reallocating the list itself.
    pub(crate) fn reserve_exact(&mut self, additional: usize) {
        self.blocks.reserve_exact(additional);
    }

    /// Places a block at the head of the list.
    ///
    /// # Panics
    ///
    /// Panics if the block does not belong to this size class.
    pub(crate) fn push(&mut self, block: FreeBlock) {
        assert_eq!(
            block.layout(),
            self.block_layout,
            "block of capacity {} pushed into free list of capacity {}",
            block.capacity(),
            self.block_layout.capacity()
        );

        let (ptr, _) = block.into_parts();
        self.blocks.push(ptr);
    }

    /// Takes the block at the head of the list, if any.
    #[must_use]
    pub(crate) fn pop(&mut self) -> Option<FreeBlock> {
        let ptr = self.blocks.pop()?;

        // SAFETY: Every address in the list came from into_parts() of a block with this
        // layout in push() and was just removed from the list, so it is reassembled once.
        Some(unsafe { FreeBlock::from_parts(ptr, self.block_layout) })
    }

    /// Returns every block in the list to the system allocator.
    ///
    /// Returns the number of blocks released.
    pub(crate) fn clear(&mut self) -> usize {
        let count = self.blocks.len();

        // Dropping a free block returns its memory to the system allocator.
        while let Some(block) = self.pop() {
            drop(block);
        }

        self.blocks.shrink_to_fit();

        count
    }

    /// Number of blocks the list can hold without reallocating.
    #[cfg(test)]
    #[must_use]
    pub(crate) fn reserved(&self) -> usize {
        self.blocks.capacity()
    }
}

impl Drop for FreeList {
    fn drop(&mut self) {
        self.clear();
    }
}

// SAFETY: The list exclusively owns the blocks it points to, and free blocks are plain memory
// that may be released from any thread, just like a FreeBlock.
unsafe impl Send for FreeList {}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
#[allow(
    clippy::arithmetic_side_effects,
    reason = "tests focus on succinct code and do not need to tick all the boxes"
)]
mod tests {
    use static_assertions::{assert_impl_all, assert_not_impl_any};

    use super::*;

    assert_impl_all!(FreeList: Send);
    assert_not_impl_any!(FreeList: Sync);

    fn layout(capacity: usize) -> BlockLayout {
        BlockLayout::new::<u64>(capacity).unwrap()
    }

    fn fill(list: &mut FreeList, count: usize) {
        for _ in 0..count {
            list.push(FreeBlock::allocate(list.block_layout()).unwrap());
        }
    }

    #[test]
    fn starts_empty() {
        let list = FreeList::new(layout(128));

        assert!(list.is_empty());
        assert_eq!(list.len(), 0);
        assert_eq!(list.resident_bytes(), 0);
    }

    #[test]
    fn pop_is_last_in_first_out() {
        let mut list = FreeList::new(layout(128));
        fill(&mut list, 2);

        let top = list.pop().unwrap();
        let top_ptr = top.as_ptr();
        list.push(top);

        let again = list.pop().unwrap();
        assert_eq!(again.as_ptr(), top_ptr);

        let below = list.pop().unwrap();
        assert_ne!(below.as_ptr(), top_ptr);

        assert!(list.pop().is_none());
    }

    #[test]
    fn resident_bytes_tracks_block_count() {
        let mut list = FreeList::new(layout(100));
        fill(&mut list, 3);

        assert_eq!(list.len(), 3);
        assert_eq!(
            list.resident_bytes(),
            3 * list.block_layout().storage_size()
        );

        _ = list.pop();
        assert_eq!(
            list.resident_bytes(),
            2 * list.block_layout().storage_size()
        );
    }

    #[test]
    fn clear_releases_all_blocks() {
        let mut list = FreeList::new(layout(64));
        list.reserve_exact(10);
        fill(&mut list, 10);

        assert_eq!(list.clear(), 10);
        assert!(list.is_empty());
        assert_eq!(list.reserved(), 0);
        assert_eq!(list.clear(), 0);
    }

    #[test]
    fn popped_block_keeps_shared_layout() {
        let mut list = FreeList::new(layout(200));
        fill(&mut list, 2);

        let block = list.pop().unwrap();
        assert_eq!(block.layout(), list.block_layout());
        assert_eq!(block.capacity(), 200);
    }

    #[test]
    fn new_list_reserves_nothing() {
        let list = FreeList::new(layout(64));

        assert_eq!(list.reserved(), 0);
    }

    #[test]
    fn dropping_list_with_blocks_releases_them() {
        let mut list = FreeList::new(layout(64));
        fill(&mut list, 3);

        drop(list);
    }

    #[test]
    #[should_panic]
    fn push_of_foreign_size_panics() {
        let mut list = FreeList::new(layout(64));
        list.push(FreeBlock::allocate(layout(65)).unwrap());
    }
}
