//! The capability contract every allocator implements
//!
//! Allocators are polymorphic over a fixed vocabulary of operations. Two are
//! mandatory ([`BlockAllocator::allocate`] and [`BlockAllocator::deallocate`]);
//! the rest are optional capabilities expressed as separate traits so that
//! composite allocators can require exactly the capabilities they route
//! through, resolved entirely at compile time:
//!
//! - [`Owns`]: answer "did this allocator produce that block?"
//! - [`Expand`]: grow a block in place, never moving it
//! - [`DeallocateAll`]: invalidate every block issued so far in one call
//!
//! Capacity exhaustion is reported as an empty [`Block`] or a `false` return.
//! Handing an allocator a block it does not own is a caller bug, checked by
//! `debug_assert!` where the allocator can afford the check.
//!
//! # Safety
//!
//! `BlockAllocator`, `Expand` and `DeallocateAll` are unsafe traits: an
//! implementation promises that successful allocations describe valid,
//! exclusive, writable memory of at least the stated length, and that the
//! release operations only require the documented caller contract (the block
//! came from this allocator and is no longer referenced).

use crate::block::Block;

/// Mandatory allocation surface.
///
/// # Safety
///
/// Implementors must guarantee:
/// - a non-empty block returned by `allocate` describes valid, exclusively
///   owned memory of at least the requested length;
/// - `deallocate` and `reallocate` only assume the documented caller
///   contract, and `reallocate` leaves the block untouched when it fails.
pub unsafe trait BlockAllocator {
    /// Whether a block may be handed back for deallocation with a smaller
    /// length than it was allocated with (after a legitimate `reallocate`
    /// shrink elsewhere in a composite). Composites combine this flag from
    /// their children.
    const SUPPORTS_TRUNCATED_DEALLOCATION: bool;

    /// Allocates `size` bytes.
    ///
    /// Returns the empty block when `size` is zero and on capacity
    /// exhaustion. The returned length may exceed `size` for allocators with
    /// a fixed grain (pools, chunk heaps); the caller must pass the block
    /// back with whatever length it carries.
    fn allocate(&self, size: usize) -> Block;

    /// Releases `block` and resets it to empty.
    ///
    /// An empty block is always a safe no-op.
    ///
    /// # Safety
    ///
    /// `block` must have been produced by this allocator (or by a child it
    /// routes for) and must not be referenced afterwards.
    unsafe fn deallocate(&self, block: &mut Block);

    /// Resizes `block` to `new_size` bytes, moving it if necessary.
    ///
    /// `new_size == 0` behaves as `deallocate`. On failure `block` is left
    /// fully valid and unchanged.
    ///
    /// # Safety
    ///
    /// Same contract as [`BlockAllocator::deallocate`]; on success the block
    /// may describe a different region.
    unsafe fn reallocate(&self, block: &mut Block, new_size: usize) -> bool;
}

/// Ownership test, required by composites that route by provenance.
pub trait Owns {
    /// True if `block` was produced by this allocator or one of its
    /// descendants. Only meaningful for such blocks; an empty block is never
    /// owned.
    fn owns(&self, block: &Block) -> bool;
}

/// In-place growth capability.
///
/// # Safety
///
/// Same implementor contract as [`BlockAllocator`]: on success the block's
/// pointer is unchanged and the added bytes are valid exclusive memory.
pub unsafe trait Expand: BlockAllocator {
    /// Grows `block` by at least `delta` bytes without moving it.
    ///
    /// `delta == 0` always succeeds. On failure `block` is unchanged.
    ///
    /// # Safety
    ///
    /// `block` must have been produced by this allocator and must not be
    /// concurrently referenced.
    unsafe fn expand(&self, block: &mut Block, delta: usize) -> bool;
}

/// Bulk-reset capability.
///
/// # Safety
///
/// Implementors must make all memory previously issued available again.
pub unsafe trait DeallocateAll {
    /// Invalidates every block this allocator has issued.
    ///
    /// # Safety
    ///
    /// No block previously returned by this allocator may be used afterwards.
    unsafe fn deallocate_all(&self);
}
