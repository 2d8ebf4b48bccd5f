//! Bounded pools of same-sized blocks
//!
//! A freelist serves requests within a `[min_size, max_size]` band from a
//! bounded pool of recycled blocks, all sized exactly `max_size`. Misses
//! refill from a parent allocator in batches; a full pool forwards
//! deallocations back to the parent. [`Freelist`] is the single-threaded
//! variant, [`SharedFreelist`] the thread-safe one with a lock-free pool.

use crate::block::Block;
use crate::bound::Bound;
use crate::error::{AllocError, AllocResult};
use crate::realloc::try_trivial;
use crate::traits::{BlockAllocator, Owns};

/// Pool slots kept by default.
const DEFAULT_POOL_SIZE: usize = 1024;
/// Parent allocations per refill by default.
const DEFAULT_BATCH: usize = 8;

mod pool {
    use core::cell::RefCell;

    use crossbeam_queue::ArrayQueue;

    /// Bounded pool of recycled block addresses.
    pub trait PointerPool {
        /// Creates a pool holding at most `capacity` addresses.
        fn with_capacity(capacity: usize) -> Self;
        /// Stores `ptr`; `false` when the pool is full.
        fn push(&self, ptr: usize) -> bool;
        /// Takes an address out; each stored address is observed at most once.
        fn pop(&self) -> Option<usize>;
        /// Number of addresses currently pooled.
        fn len(&self) -> usize;
    }

    /// Single-threaded LIFO pool.
    #[derive(Debug)]
    pub struct LocalPool {
        slots: RefCell<Vec<usize>>,
        capacity: usize,
    }

    impl PointerPool for LocalPool {
        fn with_capacity(capacity: usize) -> Self {
            Self {
                slots: RefCell::new(Vec::with_capacity(capacity)),
                capacity,
            }
        }

        fn push(&self, ptr: usize) -> bool {
            let mut slots = self.slots.borrow_mut();
            if slots.len() < self.capacity {
                slots.push(ptr);
                true
            } else {
                false
            }
        }

        fn pop(&self) -> Option<usize> {
            self.slots.borrow_mut().pop()
        }

        fn len(&self) -> usize {
            self.slots.borrow().len()
        }
    }

    /// Lock-free bounded pool for the shared freelist.
    ///
    /// A pushed address becomes immediately visible to racing pops, and a
    /// popped address is handed to exactly one thread.
    #[derive(Debug)]
    pub struct SharedPool {
        queue: ArrayQueue<usize>,
    }

    impl PointerPool for SharedPool {
        fn with_capacity(capacity: usize) -> Self {
            Self {
                queue: ArrayQueue::new(capacity.max(1)),
            }
        }

        fn push(&self, ptr: usize) -> bool {
            self.queue.push(ptr).is_ok()
        }

        fn pop(&self) -> Option<usize> {
            self.queue.pop()
        }

        fn len(&self) -> usize {
            self.queue.len()
        }
    }
}

pub use pool::{LocalPool, PointerPool, SharedPool};

/// Generic freelist over a parent allocator and a pool flavor.
///
/// Use through the [`Freelist`] and [`SharedFreelist`] aliases.
#[derive(Debug)]
pub struct FreelistBase<A: BlockAllocator, P: PointerPool> {
    parent: A,
    pool: P,
    lower: Bound,
    upper: Bound,
    batch: usize,
}

/// Single-threaded freelist.
pub type Freelist<A> = FreelistBase<A, LocalPool>;

/// Thread-safe freelist with a lock-free pool.
pub type SharedFreelist<A> = FreelistBase<A, SharedPool>;

impl<A: BlockAllocator, P: PointerPool> FreelistBase<A, P> {
    fn build(
        parent: A,
        lower: Bound,
        upper: Bound,
        pool_size: usize,
        batch: usize,
    ) -> AllocResult<Self> {
        if batch == 0 {
            return Err(AllocError::invalid_config("batch size must be at least 1"));
        }
        if pool_size == 0 {
            return Err(AllocError::invalid_config("pool size must be at least 1"));
        }
        if let (Some(lo), Some(hi)) = (lower.value(), upper.value()) {
            Self::validate_bounds(lo, hi)?;
        }
        Ok(Self {
            parent,
            pool: P::with_capacity(pool_size),
            lower,
            upper,
            batch,
        })
    }

    fn validate_bounds(lower: usize, upper: usize) -> AllocResult<()> {
        if upper == 0 || lower > upper {
            return Err(AllocError::invalid_config(
                "freelist bounds must satisfy lower <= upper, upper > 0",
            ));
        }
        Ok(())
    }

    /// Installs the size band of an unbounded freelist. Must happen before
    /// first use and exactly once.
    pub fn set_bounds(&self, lower: usize, upper: usize) -> AllocResult<()> {
        Self::validate_bounds(lower, upper)?;
        self.lower.set(lower)?;
        self.upper.set(upper)?;
        Ok(())
    }

    /// Lower edge of the served band, once configured.
    pub fn min_size(&self) -> Option<usize> {
        self.lower.value()
    }

    /// Upper edge of the served band, once configured. Every block this
    /// freelist returns has exactly this length.
    pub fn max_size(&self) -> Option<usize> {
        self.upper.value()
    }

    /// Blocks currently waiting in the pool.
    pub fn pooled(&self) -> usize {
        self.pool.len()
    }

    /// The parent allocator.
    pub fn parent(&self) -> &A {
        &self.parent
    }

    /// Refills from the parent and returns one block of `block_size` bytes.
    fn refill(&self, block_size: usize) -> Block {
        tracing::trace!(block_size, batch = self.batch, "freelist refill");

        if A::SUPPORTS_TRUNCATED_DEALLOCATION {
            // One large parent allocation sliced into batch pieces; the
            // parent accepts the slices back at slice length.
            let Some(total) = block_size.checked_mul(self.batch) else {
                return Block::empty();
            };
            let batch_block = self.parent.allocate(total);
            if !batch_block.is_empty() {
                for i in 1..self.batch {
                    let slice = batch_block.ptr().wrapping_add(i * block_size);
                    if !self.pool.push(slice as usize) {
                        // Racing deallocations filled the pool mid-batch;
                        // hand the rest straight back.
                        let mut rest = Block::from_raw_parts(slice, block_size);
                        // SAFETY: `rest` is an unused slice of the batch
                        // allocation and the parent supports sub-length
                        // deallocation.
                        unsafe { self.parent.deallocate(&mut rest) };
                    }
                }
                return Block::from_raw_parts(batch_block.ptr(), block_size);
            }
            return self.parent.allocate(block_size);
        }

        // The parent frees only whole allocations, so batch pieces must be
        // independent parent blocks.
        for _ in 0..self.batch - 1 {
            let piece = self.parent.allocate(block_size);
            if piece.is_empty() {
                break;
            }
            if !self.pool.push(piece.ptr() as usize) {
                return piece;
            }
        }
        self.parent.allocate(block_size)
    }
}

// SAFETY: pooled addresses are parent allocations of exactly `upper` bytes;
// each address leaves the pool through one pop, so blocks never alias.
unsafe impl<A: BlockAllocator, P: PointerPool> BlockAllocator for FreelistBase<A, P> {
    const SUPPORTS_TRUNCATED_DEALLOCATION: bool = A::SUPPORTS_TRUNCATED_DEALLOCATION;

    fn allocate(&self, size: usize) -> Block {
        let (Some(lower), Some(upper)) = (self.lower.value(), self.upper.value()) else {
            debug_assert!(false, "freelist used before its bounds were set");
            return Block::empty();
        };
        if size == 0 || size < lower || size > upper {
            return Block::empty();
        }
        // The pool is single-size: a hit always carries the upper bound.
        if let Some(ptr) = self.pool.pop() {
            return Block::from_raw_parts(ptr as *mut u8, upper);
        }
        self.refill(upper)
    }

    unsafe fn deallocate(&self, block: &mut Block) {
        if block.is_empty() {
            return;
        }
        debug_assert!(self.owns(block), "deallocating a foreign block");
        if !self.owns(block) {
            return;
        }
        if self.pool.push(block.ptr() as usize) {
            block.reset();
            return;
        }
        // Pool is full; the parent takes the block back.
        // SAFETY: the block is a parent allocation per the pool invariant.
        unsafe { self.parent.deallocate(block) };
    }

    unsafe fn reallocate(&self, block: &mut Block, new_size: usize) -> bool {
        // SAFETY: forwarded caller contract.
        if let Some(handled) = unsafe { try_trivial(self, block, new_size) } {
            return handled;
        }
        // The pool serves one block size; real resizes always fail.
        false
    }
}

impl<A: BlockAllocator, P: PointerPool> Owns for FreelistBase<A, P> {
    fn owns(&self, block: &Block) -> bool {
        let (Some(lower), Some(upper)) = (self.lower.value(), self.upper.value()) else {
            return false;
        };
        !block.is_empty() && lower <= block.len() && block.len() <= upper
    }
}

impl<A: BlockAllocator, P: PointerPool> Drop for FreelistBase<A, P> {
    fn drop(&mut self) {
        let Some(upper) = self.upper.value() else {
            return;
        };
        while let Some(ptr) = self.pool.pop() {
            let mut block = Block::from_raw_parts(ptr as *mut u8, upper);
            // SAFETY: pooled addresses are parent allocations of `upper`
            // bytes that no caller references any more.
            unsafe { self.parent.deallocate(&mut block) };
        }
    }
}

impl<A: BlockAllocator> FreelistBase<A, LocalPool> {
    /// Freelist with bounds fixed at construction.
    pub fn with_bounds(parent: A, lower: usize, upper: usize) -> AllocResult<Self> {
        Self::build(
            parent,
            Bound::Fixed(lower),
            Bound::Fixed(upper),
            DEFAULT_POOL_SIZE,
            DEFAULT_BATCH,
        )
    }

    /// Freelist whose bounds are supplied later through
    /// [`set_bounds`](FreelistBase::set_bounds).
    pub fn new(parent: A) -> Self {
        Self::build(
            parent,
            Bound::dynamic(),
            Bound::dynamic(),
            DEFAULT_POOL_SIZE,
            DEFAULT_BATCH,
        )
        .expect("default freelist configuration is valid")
    }

    /// Fully parameterized construction.
    pub fn with_config(
        parent: A,
        lower: usize,
        upper: usize,
        pool_size: usize,
        batch: usize,
    ) -> AllocResult<Self> {
        Self::build(
            parent,
            Bound::Fixed(lower),
            Bound::Fixed(upper),
            pool_size,
            batch,
        )
    }
}

impl<A: BlockAllocator> FreelistBase<A, SharedPool> {
    /// Shared freelist with bounds fixed at construction.
    pub fn with_bounds(parent: A, lower: usize, upper: usize) -> AllocResult<Self> {
        Self::build(
            parent,
            Bound::Fixed(lower),
            Bound::Fixed(upper),
            DEFAULT_POOL_SIZE,
            DEFAULT_BATCH,
        )
    }

    /// Shared freelist whose bounds are supplied later through
    /// [`set_bounds`](FreelistBase::set_bounds).
    pub fn new(parent: A) -> Self {
        Self::build(
            parent,
            Bound::dynamic(),
            Bound::dynamic(),
            DEFAULT_POOL_SIZE,
            DEFAULT_BATCH,
        )
        .expect("default freelist configuration is valid")
    }

    /// Fully parameterized construction.
    pub fn with_config(
        parent: A,
        lower: usize,
        upper: usize,
        pool_size: usize,
        batch: usize,
    ) -> AllocResult<Self> {
        Self::build(
            parent,
            Bound::Fixed(lower),
            Bound::Fixed(upper),
            pool_size,
            batch,
        )
    }
}
