//! Leaf allocators backed by the process heap
//!
//! [`SystemAllocator`] is the thin proxy over the platform allocator that
//! nearly every composition bottoms out in. [`AlignedAllocator`] is the same
//! proxy with a caller-chosen alignment. Both are stateless and inherently
//! thread-safe.

use core::alloc::{GlobalAlloc, Layout};
use std::alloc::System;

use crate::block::Block;
use crate::realloc::{reallocate_with_copy, try_trivial};
use crate::traits::BlockAllocator;

/// Alignment guaranteed by the platform allocator for ordinary requests.
const SYSTEM_ALIGNMENT: usize = 16;

/// Proxy over the system heap.
///
/// Does not implement [`Owns`](crate::Owns): the system heap cannot answer
/// provenance questions, which is why it usually sits on the fallback side of
/// a composition rather than the primary side.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemAllocator;

impl SystemAllocator {
    /// Creates the (stateless) system proxy.
    #[inline]
    pub const fn new() -> Self {
        SystemAllocator
    }
}

// SAFETY: delegates to the platform allocator; returned blocks are valid and
// exclusive, deallocate reconstructs the exact allocation layout from the
// block length.
unsafe impl BlockAllocator for SystemAllocator {
    // The platform heap frees by pointer identity with the original layout;
    // a sub-length free is not representable.
    const SUPPORTS_TRUNCATED_DEALLOCATION: bool = false;

    fn allocate(&self, size: usize) -> Block {
        if size == 0 {
            return Block::empty();
        }
        let Ok(layout) = Layout::from_size_align(size, SYSTEM_ALIGNMENT) else {
            return Block::empty();
        };
        // SAFETY: layout has non-zero size and valid alignment.
        let ptr = unsafe { System.alloc(layout) };
        Block::from_raw_parts(ptr, size)
    }

    unsafe fn deallocate(&self, block: &mut Block) {
        if block.is_empty() {
            return;
        }
        let layout = Layout::from_size_align(block.len(), SYSTEM_ALIGNMENT)
            .expect("a live block always carries its allocation layout");
        // SAFETY: the block was produced by allocate with this exact layout
        // (caller contract: the length was not changed).
        unsafe { System.dealloc(block.ptr(), layout) };
        block.reset();
    }

    unsafe fn reallocate(&self, block: &mut Block, new_size: usize) -> bool {
        // SAFETY: forwarded caller contract.
        if let Some(handled) = unsafe { try_trivial(self, block, new_size) } {
            return handled;
        }
        let layout = Layout::from_size_align(block.len(), SYSTEM_ALIGNMENT)
            .expect("a live block always carries its allocation layout");
        // SAFETY: block is a live system allocation with `layout`; realloc
        // either moves it preserving min(old, new) bytes or fails in place.
        let ptr = unsafe { System.realloc(block.ptr(), layout, new_size) };
        if ptr.is_null() {
            return false;
        }
        *block = Block::from_raw_parts(ptr, new_size);
        true
    }
}

/// Proxy over the system heap with a fixed power-of-two alignment.
///
/// Useful as a backing allocator for structures with SIMD or cache-line
/// alignment requirements.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlignedAllocator<const ALIGNMENT: usize>;

impl<const ALIGNMENT: usize> AlignedAllocator<ALIGNMENT> {
    /// Creates the proxy. `ALIGNMENT` must be a power of two.
    #[inline]
    pub const fn new() -> Self {
        assert!(ALIGNMENT.is_power_of_two());
        AlignedAllocator
    }

    fn layout_for(size: usize) -> Option<Layout> {
        Layout::from_size_align(size, ALIGNMENT).ok()
    }
}

// SAFETY: same delegation as SystemAllocator, with the stricter alignment
// threaded through every layout.
unsafe impl<const ALIGNMENT: usize> BlockAllocator for AlignedAllocator<ALIGNMENT> {
    const SUPPORTS_TRUNCATED_DEALLOCATION: bool = false;

    fn allocate(&self, size: usize) -> Block {
        if size == 0 {
            return Block::empty();
        }
        let Some(layout) = Self::layout_for(size) else {
            return Block::empty();
        };
        // SAFETY: layout has non-zero size and power-of-two alignment.
        let ptr = unsafe { System.alloc(layout) };
        Block::from_raw_parts(ptr, size)
    }

    unsafe fn deallocate(&self, block: &mut Block) {
        if block.is_empty() {
            return;
        }
        let layout =
            Self::layout_for(block.len()).expect("a live block always carries a valid layout");
        // SAFETY: block was produced by allocate with this layout.
        unsafe { System.dealloc(block.ptr(), layout) };
        block.reset();
    }

    unsafe fn reallocate(&self, block: &mut Block, new_size: usize) -> bool {
        // SAFETY: forwarded caller contract.
        if let Some(handled) = unsafe { try_trivial(self, block, new_size) } {
            return handled;
        }
        // The platform realloc only preserves the default alignment, so an
        // aligned resize is always a fresh allocation plus a copy.
        unsafe { reallocate_with_copy(self, self, block, new_size) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_write_deallocate() {
        let a = SystemAllocator::new();
        let mut b = a.allocate(64);
        assert!(!b.is_empty());
        assert_eq!(b.len(), 64);
        unsafe {
            core::ptr::write_bytes(b.ptr(), 0x42, 64);
            assert_eq!(*b.ptr(), 0x42);
            a.deallocate(&mut b);
        }
        assert!(b.is_empty());
    }

    #[test]
    fn zero_size_yields_empty() {
        let a = SystemAllocator::new();
        assert!(a.allocate(0).is_empty());
    }

    #[test]
    fn reallocate_preserves_prefix() {
        let a = SystemAllocator::new();
        let mut b = a.allocate(16);
        unsafe { core::ptr::write_bytes(b.ptr(), 0x17, 16) };
        assert!(unsafe { a.reallocate(&mut b, 48) });
        assert_eq!(b.len(), 48);
        for i in 0..16 {
            assert_eq!(unsafe { *b.ptr().add(i) }, 0x17);
        }
        unsafe { a.deallocate(&mut b) };
    }

    #[test]
    fn reallocate_to_zero_frees() {
        let a = SystemAllocator::new();
        let mut b = a.allocate(16);
        assert!(unsafe { a.reallocate(&mut b, 0) });
        assert!(b.is_empty());
    }

    #[test]
    fn aligned_allocations_respect_alignment() {
        let a = AlignedAllocator::<64>::new();
        let mut b = a.allocate(100);
        assert!(!b.is_empty());
        assert_eq!(b.ptr() as usize % 64, 0);
        assert!(unsafe { a.reallocate(&mut b, 200) });
        assert_eq!(b.ptr() as usize % 64, 0);
        unsafe { a.deallocate(&mut b) };
    }
}
