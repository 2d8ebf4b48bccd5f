//! The allocator that never allocates
//!
//! Useful as a terminal fallback and as a probe in tests: any composition
//! routed onto a [`NullAllocator`] reports clean capacity exhaustion instead
//! of touching a real heap.

use crate::block::Block;
use crate::realloc::try_trivial;
use crate::traits::{BlockAllocator, DeallocateAll, Owns};

/// An allocator that fails every request and owns only the empty block.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullAllocator;

impl NullAllocator {
    /// Creates the (stateless) null allocator.
    #[inline]
    pub const fn new() -> Self {
        NullAllocator
    }
}

// SAFETY: never hands out memory, so there is nothing to get wrong.
unsafe impl BlockAllocator for NullAllocator {
    // Vacuously true: no block ever needs deallocating at any length.
    const SUPPORTS_TRUNCATED_DEALLOCATION: bool = true;

    fn allocate(&self, _size: usize) -> Block {
        Block::empty()
    }

    unsafe fn deallocate(&self, block: &mut Block) {
        debug_assert!(
            block.is_empty(),
            "a non-empty block cannot come from the null allocator"
        );
        block.reset();
    }

    unsafe fn reallocate(&self, block: &mut Block, new_size: usize) -> bool {
        debug_assert!(
            block.is_empty(),
            "a non-empty block cannot come from the null allocator"
        );
        // SAFETY: forwarded caller contract. The empty-to-allocate case
        // "allocates" an empty block and reports failure accordingly.
        if let Some(handled) = unsafe { try_trivial(self, block, new_size) } {
            return handled;
        }
        false
    }
}

impl Owns for NullAllocator {
    fn owns(&self, block: &Block) -> bool {
        block.is_empty()
    }
}

// SAFETY: there is nothing to invalidate.
unsafe impl DeallocateAll for NullAllocator {
    unsafe fn deallocate_all(&self) {}
}
