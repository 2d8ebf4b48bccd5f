//! Shared reallocation building blocks
//!
//! Every allocator's `reallocate` starts with the same trivial cases, and
//! every composite falls back to the same allocate-copy-free move when a
//! request cannot be satisfied in place. Both live here so the policies stay
//! small.

use crate::block::Block;
use crate::traits::{BlockAllocator, Expand};
use crate::utils::block_copy;

/// Handles the trivial reallocation cases that need no allocator-specific
/// logic.
///
/// Returns `Some(success)` when the request was fully handled:
/// - same size: no-op success;
/// - `new_size == 0`: deallocates, success;
/// - empty block: plain allocate, success iff the allocation succeeded.
///
/// Returns `None` when a real resize is required.
///
/// # Safety
///
/// Same caller contract as [`BlockAllocator::reallocate`].
#[inline]
pub unsafe fn try_trivial<A>(allocator: &A, block: &mut Block, new_size: usize) -> Option<bool>
where
    A: BlockAllocator + ?Sized,
{
    if block.len() == new_size {
        return Some(true);
    }
    if new_size == 0 {
        // SAFETY: forwarded caller contract.
        unsafe { allocator.deallocate(block) };
        return Some(true);
    }
    if block.is_empty() {
        *block = allocator.allocate(new_size);
        return Some(!block.is_empty());
    }
    None
}

/// Like [`try_trivial`], additionally resolving growth through the
/// allocator's in-place [`Expand`] capability before giving up.
///
/// # Safety
///
/// Same caller contract as [`BlockAllocator::reallocate`].
#[inline]
pub unsafe fn try_trivial_or_expand<A>(
    allocator: &A,
    block: &mut Block,
    new_size: usize,
) -> Option<bool>
where
    A: Expand + ?Sized,
{
    // SAFETY: forwarded caller contract.
    if let Some(handled) = unsafe { try_trivial(allocator, block, new_size) } {
        return Some(handled);
    }
    if new_size > block.len() {
        // SAFETY: block came from `allocator` per the caller contract.
        if unsafe { allocator.expand(block, new_size - block.len()) } {
            return Some(true);
        }
    }
    None
}

/// Cross-move: allocates `new_size` bytes on `new_allocator`, copies
/// `min(block.len(), new_size)` bytes over, frees the old block on
/// `old_allocator` and installs the new one.
///
/// On allocation failure returns `false` with `block` untouched, so a failed
/// composite operation never leaves partial state behind.
///
/// # Safety
///
/// `block` must have been produced by `old_allocator` and must not be
/// referenced afterwards if the move succeeds.
pub unsafe fn reallocate_with_copy<Old, New>(
    old_allocator: &Old,
    new_allocator: &New,
    block: &mut Block,
    new_size: usize,
) -> bool
where
    Old: BlockAllocator + ?Sized,
    New: BlockAllocator + ?Sized,
{
    let new_block = new_allocator.allocate(new_size);
    if new_block.is_empty() {
        return false;
    }
    // SAFETY: new_block is a fresh allocation, disjoint from `block`.
    unsafe { block_copy(block, &new_block) };
    // SAFETY: block belongs to old_allocator per the caller contract.
    unsafe { old_allocator.deallocate(block) };
    *block = new_block;
    true
}
