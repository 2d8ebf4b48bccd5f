//! Statistics-collecting decorator
//!
//! Wraps any allocator and counts what flows through it. Bookkeeping only:
//! the wrapped allocator's behavior, capabilities and failure modes are
//! passed through untouched. Counters are relaxed atomics, so the decorator
//! is as thread-safe as its inner allocator.

use core::sync::atomic::{AtomicUsize, Ordering};

use crate::block::Block;
use crate::traits::{BlockAllocator, DeallocateAll, Expand, Owns};

/// Snapshot of a [`TrackedAllocator`]'s counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AllocatorStats {
    /// Successful allocations.
    pub allocations: usize,
    /// Deallocations (including those triggered through `reallocate(.., 0)`).
    pub deallocations: usize,
    /// Reallocation attempts.
    pub reallocations: usize,
    /// Expansion attempts.
    pub expansions: usize,
    /// Allocation requests the inner allocator could not satisfy.
    pub failures: usize,
    /// Bytes currently live.
    pub live_bytes: usize,
    /// High-water mark of live bytes.
    pub peak_bytes: usize,
}

#[derive(Debug, Default)]
struct Counters {
    allocations: AtomicUsize,
    deallocations: AtomicUsize,
    reallocations: AtomicUsize,
    expansions: AtomicUsize,
    failures: AtomicUsize,
    live_bytes: AtomicUsize,
    peak_bytes: AtomicUsize,
}

impl Counters {
    fn add_live(&self, bytes: usize) {
        let live = self.live_bytes.fetch_add(bytes, Ordering::Relaxed) + bytes;
        self.peak_bytes.fetch_max(live, Ordering::Relaxed);
    }

    fn sub_live(&self, bytes: usize) {
        self.live_bytes.fetch_sub(bytes, Ordering::Relaxed);
    }
}

/// Transparent counting wrapper around an allocator.
#[derive(Debug, Default)]
pub struct TrackedAllocator<A> {
    inner: A,
    counters: Counters,
}

impl<A> TrackedAllocator<A> {
    /// Wraps `inner`.
    pub fn new(inner: A) -> Self {
        Self {
            inner,
            counters: Counters::default(),
        }
    }

    /// The wrapped allocator.
    pub fn inner(&self) -> &A {
        &self.inner
    }

    /// Unwraps the decorator.
    pub fn into_inner(self) -> A {
        self.inner
    }

    /// Current counter values.
    pub fn stats(&self) -> AllocatorStats {
        AllocatorStats {
            allocations: self.counters.allocations.load(Ordering::Relaxed),
            deallocations: self.counters.deallocations.load(Ordering::Relaxed),
            reallocations: self.counters.reallocations.load(Ordering::Relaxed),
            expansions: self.counters.expansions.load(Ordering::Relaxed),
            failures: self.counters.failures.load(Ordering::Relaxed),
            live_bytes: self.counters.live_bytes.load(Ordering::Relaxed),
            peak_bytes: self.counters.peak_bytes.load(Ordering::Relaxed),
        }
    }
}

// SAFETY: pure pass-through; only counters are added.
unsafe impl<A: BlockAllocator> BlockAllocator for TrackedAllocator<A> {
    const SUPPORTS_TRUNCATED_DEALLOCATION: bool = A::SUPPORTS_TRUNCATED_DEALLOCATION;

    fn allocate(&self, size: usize) -> Block {
        let block = self.inner.allocate(size);
        if block.is_empty() {
            if size != 0 {
                self.counters.failures.fetch_add(1, Ordering::Relaxed);
            }
        } else {
            self.counters.allocations.fetch_add(1, Ordering::Relaxed);
            self.counters.add_live(block.len());
        }
        block
    }

    unsafe fn deallocate(&self, block: &mut Block) {
        if block.is_empty() {
            return;
        }
        let released = block.len();
        // SAFETY: forwarded caller contract.
        unsafe { self.inner.deallocate(block) };
        self.counters.deallocations.fetch_add(1, Ordering::Relaxed);
        self.counters.sub_live(released);
    }

    unsafe fn reallocate(&self, block: &mut Block, new_size: usize) -> bool {
        self.counters.reallocations.fetch_add(1, Ordering::Relaxed);
        let before = block.len();
        // SAFETY: forwarded caller contract.
        let ok = unsafe { self.inner.reallocate(block, new_size) };
        if ok {
            let after = block.len();
            if after > before {
                self.counters.add_live(after - before);
            } else {
                self.counters.sub_live(before - after);
            }
        }
        ok
    }
}

impl<A: Owns> Owns for TrackedAllocator<A> {
    fn owns(&self, block: &Block) -> bool {
        self.inner.owns(block)
    }
}

// SAFETY: pure pass-through.
unsafe impl<A: Expand> Expand for TrackedAllocator<A> {
    unsafe fn expand(&self, block: &mut Block, delta: usize) -> bool {
        self.counters.expansions.fetch_add(1, Ordering::Relaxed);
        let before = block.len();
        // SAFETY: forwarded caller contract.
        let ok = unsafe { self.inner.expand(block, delta) };
        if ok {
            self.counters.add_live(block.len() - before);
        }
        ok
    }
}

// SAFETY: pure pass-through; live bytes drop to zero with the reset.
unsafe impl<A: DeallocateAll> DeallocateAll for TrackedAllocator<A> {
    unsafe fn deallocate_all(&self) {
        // SAFETY: forwarded caller contract.
        unsafe { self.inner.deallocate_all() };
        self.counters.live_bytes.store(0, Ordering::Relaxed);
    }
}
