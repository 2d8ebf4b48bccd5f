//! Affix allocator: prefix/suffix objects around every block
//!
//! Wraps an allocator so that every returned block is transparently
//! surrounded by a fixed-size prefix and/or suffix object, invisible to the
//! caller's reported length. The classic use is a [`CorruptionGuard`] on both
//! sides of each allocation: its drop check fires at deallocation time when a
//! caller has written past its block.
//!
//! Affix types are placed with byte-wise moves (`read_unaligned` and
//! `write_unaligned`), so they must tolerate relocation by copy. Any `Default
//! + Sized` type without address-sensitive state qualifies; `()` disables the
//! corresponding side entirely.

use core::marker::PhantomData;
use core::mem::{size_of, ManuallyDrop};
use core::ptr;

use crate::block::Block;
use crate::realloc::try_trivial;
use crate::traits::{BlockAllocator, Expand, Owns};

/// Pattern stored by [`CorruptionGuard`].
const GUARD_PATTERN: u64 = 0xDEAD_BEEF_1CE_CAFE;

/// A guard object that detects writes past a block's boundary.
///
/// Construct through `Default` (the affix allocator does this for every
/// allocation); on drop it asserts that the stored pattern was never
/// modified.
#[repr(transparent)]
#[derive(Debug)]
pub struct CorruptionGuard(u64);

impl CorruptionGuard {
    /// True while the guard bytes have not been overwritten.
    #[inline]
    pub fn is_intact(&self) -> bool {
        self.0 == GUARD_PATTERN
    }
}

impl Default for CorruptionGuard {
    #[inline]
    fn default() -> Self {
        CorruptionGuard(GUARD_PATTERN)
    }
}

impl Drop for CorruptionGuard {
    fn drop(&mut self) {
        if !self.is_intact() {
            tracing::error!(found = self.0, "memory corruption guard overwritten");
        }
        assert!(
            self.is_intact(),
            "memory corruption detected: guard pattern was overwritten"
        );
    }
}

/// Wraps `A` so every block is surrounded by a `Prefix` and a `Suffix`.
///
/// The inner allocation is `size_of::<Prefix>() + n + size_of::<Suffix>()`
/// bytes; the caller only ever sees the middle `n`. Use `()` for a side that
/// is not needed.
pub struct AffixAllocator<A, Prefix = (), Suffix = ()> {
    inner: A,
    _affixes: PhantomData<(Prefix, Suffix)>,
}

impl<A, Prefix, Suffix> AffixAllocator<A, Prefix, Suffix>
where
    A: BlockAllocator,
    Prefix: Default,
    Suffix: Default,
{
    /// Size of the prefix object in bytes.
    pub const PREFIX_SIZE: usize = size_of::<Prefix>();
    /// Size of the suffix object in bytes.
    pub const SUFFIX_SIZE: usize = size_of::<Suffix>();

    /// Wraps `inner`.
    pub fn new(inner: A) -> Self {
        Self {
            inner,
            _affixes: PhantomData,
        }
    }

    /// The wrapped allocator.
    pub fn inner(&self) -> &A {
        &self.inner
    }

    /// Pointer to the prefix of an outer block.
    ///
    /// Unpredictable for a block not produced by this allocator. Read it with
    /// `read_unaligned`; the prefix is not guaranteed to be aligned for
    /// `Prefix`.
    pub fn prefix(&self, block: &Block) -> *mut Prefix {
        block.ptr().wrapping_sub(Self::PREFIX_SIZE) as *mut Prefix
    }

    /// Pointer to the suffix of an outer block. Same caveats as
    /// [`prefix`](Self::prefix).
    pub fn suffix(&self, block: &Block) -> *mut Suffix {
        block.end() as *mut Suffix
    }

    /// The full backing allocation behind an outer block.
    fn to_inner(&self, outer: &Block) -> Block {
        Block::from_raw_parts(
            outer.ptr().wrapping_sub(Self::PREFIX_SIZE),
            outer.len() + Self::PREFIX_SIZE + Self::SUFFIX_SIZE,
        )
    }

    /// The caller-visible sub-block of a backing allocation.
    fn to_outer(&self, inner: &Block) -> Block {
        Block::from_raw_parts(
            inner.ptr().wrapping_add(Self::PREFIX_SIZE),
            inner.len() - Self::PREFIX_SIZE - Self::SUFFIX_SIZE,
        )
    }

    fn inner_suffix(&self, inner: &Block) -> *mut Suffix {
        inner.end().wrapping_sub(Self::SUFFIX_SIZE) as *mut Suffix
    }

    /// Places fresh affix objects into a backing allocation.
    ///
    /// # Safety
    ///
    /// `inner` must be a live allocation of at least
    /// `PREFIX_SIZE + SUFFIX_SIZE` bytes.
    unsafe fn construct_affixes(&self, inner: &Block) {
        // SAFETY: the affix regions are inside the inner block per the length
        // contract; unaligned writes avoid any alignment requirement.
        unsafe {
            ptr::write_unaligned(inner.ptr() as *mut Prefix, Prefix::default());
            ptr::write_unaligned(self.inner_suffix(inner), Suffix::default());
        }
    }

    /// Runs the affix destructors of an outer block.
    ///
    /// # Safety
    ///
    /// `outer` must be a live block produced by this allocator.
    unsafe fn destroy_affixes(&self, outer: &Block) {
        // SAFETY: reading the affix objects out by value runs their drop glue
        // on the stack copy, which is where a corruption guard fires.
        unsafe {
            drop(ptr::read_unaligned(self.prefix(outer)));
            drop(ptr::read_unaligned(self.suffix(outer)));
        }
    }
}

// SAFETY: every outer block is a strict sub-region of one live inner
// allocation; all bookkeeping is pointer arithmetic on that allocation.
unsafe impl<A, Prefix, Suffix> BlockAllocator for AffixAllocator<A, Prefix, Suffix>
where
    A: BlockAllocator,
    Prefix: Default,
    Suffix: Default,
{
    const SUPPORTS_TRUNCATED_DEALLOCATION: bool = A::SUPPORTS_TRUNCATED_DEALLOCATION;

    fn allocate(&self, size: usize) -> Block {
        if size == 0 {
            return Block::empty();
        }
        let inner = self
            .inner
            .allocate(Self::PREFIX_SIZE + size + Self::SUFFIX_SIZE);
        if inner.is_empty() {
            return Block::empty();
        }
        // SAFETY: inner is live and large enough for both affixes.
        unsafe { self.construct_affixes(&inner) };
        self.to_outer(&inner)
    }

    unsafe fn deallocate(&self, block: &mut Block) {
        if block.is_empty() {
            return;
        }
        // SAFETY: block came from this allocator per the caller contract.
        unsafe { self.destroy_affixes(block) };
        let mut inner = self.to_inner(block);
        // SAFETY: inner is the exact backing allocation of `block`.
        unsafe { self.inner.deallocate(&mut inner) };
        block.reset();
    }

    unsafe fn reallocate(&self, block: &mut Block, new_size: usize) -> bool {
        // SAFETY: forwarded caller contract.
        if let Some(handled) = unsafe { try_trivial(self, block, new_size) } {
            return handled;
        }

        let mut inner = self.to_inner(block);
        // The suffix must survive the move: read it out, and forget the copy
        // if the backing reallocation fails (the original bytes still stand).
        // SAFETY: the suffix region is live inside `block`'s allocation.
        let suffix = ManuallyDrop::new(unsafe { ptr::read_unaligned(self.suffix(block)) });

        // SAFETY: inner is the backing allocation of `block`.
        if unsafe {
            self.inner.reallocate(
                &mut inner,
                Self::PREFIX_SIZE + new_size + Self::SUFFIX_SIZE,
            )
        } {
            // SAFETY: inner now has the new length; the suffix slot is inside it.
            unsafe {
                ptr::write_unaligned(self.inner_suffix(&inner), ManuallyDrop::into_inner(suffix));
            }
            *block = self.to_outer(&inner);
            return true;
        }
        false
    }
}

impl<A, Prefix, Suffix> Owns for AffixAllocator<A, Prefix, Suffix>
where
    A: BlockAllocator + Owns,
    Prefix: Default,
    Suffix: Default,
{
    fn owns(&self, block: &Block) -> bool {
        !block.is_empty() && self.inner.owns(&self.to_inner(block))
    }
}

// SAFETY: growth happens on the backing allocation; the suffix is re-placed
// at the new end before the caller sees the grown block.
unsafe impl<A, Prefix, Suffix> Expand for AffixAllocator<A, Prefix, Suffix>
where
    A: Expand,
    Prefix: Default,
    Suffix: Default,
{
    unsafe fn expand(&self, block: &mut Block, delta: usize) -> bool {
        if delta == 0 {
            return true;
        }
        if block.is_empty() {
            *block = self.allocate(delta);
            return !block.is_empty();
        }

        let mut inner = self.to_inner(block);
        // SAFETY: the suffix region is live inside `block`'s allocation.
        let suffix = ManuallyDrop::new(unsafe { ptr::read_unaligned(self.suffix(block)) });

        // SAFETY: inner is the backing allocation of `block`.
        if unsafe { self.inner.expand(&mut inner, delta) } {
            // SAFETY: inner grew in place; its new suffix slot is in bounds.
            unsafe {
                ptr::write_unaligned(self.inner_suffix(&inner), ManuallyDrop::into_inner(suffix));
            }
            *block = self.to_outer(&inner);
            return true;
        }
        false
    }
}

impl<A: core::fmt::Debug, Prefix, Suffix> core::fmt::Debug for AffixAllocator<A, Prefix, Suffix> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AffixAllocator")
            .field("inner", &self.inner)
            .field("prefix_size", &size_of::<Prefix>())
            .field("suffix_size", &size_of::<Suffix>())
            .finish()
    }
}
