//! Size-threshold routing
//!
//! Splits requests at a compile-time threshold: sizes up to and including
//! `THRESHOLD` go to the small allocator, everything above to the large one.
//! Segregators nest, so a handful of them build a full size-class tree.

use crate::block::Block;
use crate::realloc::{reallocate_with_copy, try_trivial};
use crate::traits::{BlockAllocator, DeallocateAll, Expand, Owns};

/// Routes requests by size, inclusive on the small side.
#[derive(Debug)]
pub struct Segregator<const THRESHOLD: usize, Small, Large> {
    small: Small,
    large: Large,
}

impl<const THRESHOLD: usize, Small, Large> Segregator<THRESHOLD, Small, Large> {
    /// Builds the pair.
    pub fn new(small: Small, large: Large) -> Self {
        Self { small, large }
    }

    /// The allocator serving sizes `1..=THRESHOLD`.
    pub fn small(&self) -> &Small {
        &self.small
    }

    /// The allocator serving sizes above `THRESHOLD`.
    pub fn large(&self) -> &Large {
        &self.large
    }
}

// SAFETY: a block's length never crosses the threshold while it lives (the
// cross-threshold resize below moves it explicitly), so length-based routing
// always reaches the child that produced the block.
unsafe impl<const THRESHOLD: usize, Small, Large> BlockAllocator
    for Segregator<THRESHOLD, Small, Large>
where
    Small: BlockAllocator,
    Large: BlockAllocator,
{
    const SUPPORTS_TRUNCATED_DEALLOCATION: bool =
        Small::SUPPORTS_TRUNCATED_DEALLOCATION && Large::SUPPORTS_TRUNCATED_DEALLOCATION;

    fn allocate(&self, size: usize) -> Block {
        if size <= THRESHOLD {
            self.small.allocate(size)
        } else {
            self.large.allocate(size)
        }
    }

    unsafe fn deallocate(&self, block: &mut Block) {
        if block.is_empty() {
            return;
        }
        if block.len() <= THRESHOLD {
            // SAFETY: length routing reaches the producing child.
            unsafe { self.small.deallocate(block) };
        } else {
            // SAFETY: length routing reaches the producing child.
            unsafe { self.large.deallocate(block) };
        }
    }

    unsafe fn reallocate(&self, block: &mut Block, new_size: usize) -> bool {
        // SAFETY: forwarded caller contract.
        if let Some(handled) = unsafe { try_trivial(self, block, new_size) } {
            return handled;
        }

        if block.len() <= THRESHOLD {
            if new_size <= THRESHOLD {
                // SAFETY: stays on the small side.
                return unsafe { self.small.reallocate(block, new_size) };
            }
            // Crossing up: explicit move from the small to the large child.
            // SAFETY: old block belongs to small, new one to large.
            return unsafe { reallocate_with_copy(&self.small, &self.large, block, new_size) };
        }
        if new_size <= THRESHOLD {
            // Crossing down.
            // SAFETY: old block belongs to large, new one to small.
            return unsafe { reallocate_with_copy(&self.large, &self.small, block, new_size) };
        }
        // SAFETY: stays on the large side.
        unsafe { self.large.reallocate(block, new_size) }
    }
}

impl<const THRESHOLD: usize, Small, Large> Owns for Segregator<THRESHOLD, Small, Large>
where
    Small: Owns,
    Large: Owns,
{
    fn owns(&self, block: &Block) -> bool {
        if block.len() <= THRESHOLD {
            self.small.owns(block)
        } else {
            self.large.owns(block)
        }
    }
}

// SAFETY: growth that would cross the threshold is rejected outright, so the
// producing child stays responsible for the block.
unsafe impl<const THRESHOLD: usize, Small, Large> Expand for Segregator<THRESHOLD, Small, Large>
where
    Small: Expand,
    Large: Expand,
{
    unsafe fn expand(&self, block: &mut Block, delta: usize) -> bool {
        if delta == 0 {
            return true;
        }
        if block.len() <= THRESHOLD {
            if block.len() + delta > THRESHOLD {
                // Would cross the boundary; expansion never moves a block.
                return false;
            }
            // SAFETY: forwarded caller contract.
            return unsafe { self.small.expand(block, delta) };
        }
        // SAFETY: forwarded caller contract.
        unsafe { self.large.expand(block, delta) }
    }
}

// SAFETY: resets both children; all issued blocks become invalid.
unsafe impl<const THRESHOLD: usize, Small, Large> DeallocateAll
    for Segregator<THRESHOLD, Small, Large>
where
    Small: DeallocateAll,
    Large: DeallocateAll,
{
    unsafe fn deallocate_all(&self) {
        // SAFETY: forwarded caller contract.
        unsafe {
            self.small.deallocate_all();
            self.large.deallocate_all();
        }
    }
}
