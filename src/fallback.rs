//! Primary-then-fallback routing
//!
//! Every request goes to the primary allocator first; only when the primary
//! reports exhaustion does the fallback see it. Deallocation and resizing are
//! routed by asking the primary whether it owns the block, so the primary
//! must implement [`Owns`].

use crate::block::Block;
use crate::realloc::{reallocate_with_copy, try_trivial};
use crate::traits::{BlockAllocator, DeallocateAll, Expand, Owns};

/// Routes to `primary` first and `fallback` on primary exhaustion.
///
/// A typical composition keeps a bounded, fast structure as the primary (a
/// freelist, a chunk heap) with the system heap behind it.
#[derive(Debug)]
pub struct FallbackAllocator<P, F> {
    primary: P,
    fallback: F,
}

impl<P, F> FallbackAllocator<P, F> {
    /// Builds the pair.
    pub fn new(primary: P, fallback: F) -> Self {
        Self { primary, fallback }
    }

    /// The primary allocator.
    pub fn primary(&self) -> &P {
        &self.primary
    }

    /// The fallback allocator.
    pub fn fallback(&self) -> &F {
        &self.fallback
    }
}

// SAFETY: each block is produced and released by exactly one child; the
// primary's ownership test decides which one on the way back.
unsafe impl<P, F> BlockAllocator for FallbackAllocator<P, F>
where
    P: BlockAllocator + Owns,
    F: BlockAllocator,
{
    const SUPPORTS_TRUNCATED_DEALLOCATION: bool =
        P::SUPPORTS_TRUNCATED_DEALLOCATION || F::SUPPORTS_TRUNCATED_DEALLOCATION;

    fn allocate(&self, size: usize) -> Block {
        if size == 0 {
            return Block::empty();
        }
        let block = self.primary.allocate(size);
        if !block.is_empty() {
            return block;
        }
        self.fallback.allocate(size)
    }

    unsafe fn deallocate(&self, block: &mut Block) {
        if block.is_empty() {
            return;
        }
        if self.primary.owns(block) {
            // SAFETY: primary produced the block; forwarded caller contract.
            unsafe { self.primary.deallocate(block) };
        } else {
            // SAFETY: not primary's, so it must be fallback's.
            unsafe { self.fallback.deallocate(block) };
        }
    }

    unsafe fn reallocate(&self, block: &mut Block, new_size: usize) -> bool {
        // The trivial cases run against the composite, so the empty-to-
        // allocate case retries the primary first and deallocation is
        // ownership-routed.
        // SAFETY: forwarded caller contract.
        if let Some(handled) = unsafe { try_trivial(self, block, new_size) } {
            return handled;
        }

        if self.primary.owns(block) {
            // SAFETY: primary produced the block.
            if unsafe { self.primary.reallocate(block, new_size) } {
                return true;
            }
            // Primary is out of room at the new size: move the bytes across.
            // SAFETY: old block belongs to primary, new one to fallback.
            return unsafe {
                reallocate_with_copy(&self.primary, &self.fallback, block, new_size)
            };
        }
        // A fallback-owned block never moves back to the primary.
        // SAFETY: fallback produced the block.
        unsafe { self.fallback.reallocate(block, new_size) }
    }
}

impl<P, F> Owns for FallbackAllocator<P, F>
where
    P: Owns,
    F: Owns,
{
    fn owns(&self, block: &Block) -> bool {
        self.primary.owns(block) || self.fallback.owns(block)
    }
}

// SAFETY: expansion is forwarded to the child that produced the block.
unsafe impl<P, F> Expand for FallbackAllocator<P, F>
where
    P: Expand + Owns,
    F: Expand,
{
    unsafe fn expand(&self, block: &mut Block, delta: usize) -> bool {
        if delta == 0 {
            return true;
        }
        if self.primary.owns(block) {
            // SAFETY: forwarded caller contract.
            unsafe { self.primary.expand(block, delta) }
        } else {
            // SAFETY: forwarded caller contract.
            unsafe { self.fallback.expand(block, delta) }
        }
    }
}

// SAFETY: resets both children; all issued blocks become invalid.
unsafe impl<P, F> DeallocateAll for FallbackAllocator<P, F>
where
    P: DeallocateAll,
    F: DeallocateAll,
{
    unsafe fn deallocate_all(&self) {
        // SAFETY: forwarded caller contract.
        unsafe {
            self.primary.deallocate_all();
            self.fallback.deallocate_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stack::StackAllocator;
    use crate::system::SystemAllocator;

    #[test]
    fn primary_is_preferred() {
        let a = FallbackAllocator::new(StackAllocator::<128>::new(), SystemAllocator::new());
        let mut b = a.allocate(64);
        assert!(a.primary().owns(&b));
        unsafe { a.deallocate(&mut b) };
    }

    #[test]
    fn exhausted_primary_falls_back() {
        let a = FallbackAllocator::new(StackAllocator::<64>::new(), SystemAllocator::new());
        let mut small = a.allocate(64);
        let mut big = a.allocate(64);
        assert!(!big.is_empty());
        assert!(a.primary().owns(&small));
        assert!(!a.primary().owns(&big));
        unsafe {
            a.deallocate(&mut big);
            a.deallocate(&mut small);
        }
    }

    #[test]
    fn reallocate_moves_across_on_primary_exhaustion() {
        let a = FallbackAllocator::new(StackAllocator::<64>::new(), SystemAllocator::new());
        let mut b = a.allocate(32);
        unsafe { core::ptr::write_bytes(b.ptr(), 0x3C, 32) };
        // 128 bytes cannot fit the stack, so the content must move over.
        assert!(unsafe { a.reallocate(&mut b, 128) });
        assert!(!a.primary().owns(&b));
        for i in 0..32 {
            assert_eq!(unsafe { *b.ptr().add(i) }, 0x3C);
        }
        unsafe { a.deallocate(&mut b) };
    }

    #[test]
    fn zero_size_allocation_is_empty() {
        let a = FallbackAllocator::new(StackAllocator::<64>::new(), SystemAllocator::new());
        assert!(a.allocate(0).is_empty());
    }
}
