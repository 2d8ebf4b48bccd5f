//! Size-class buckets over one allocator type
//!
//! Holds `(max_size - min_size + 1) / step_size` instances of the same
//! allocator, each configured for one contiguous size sub-range of width
//! `step_size`. Requests route to the bucket whose range contains the size;
//! resizing across a bucket boundary is an explicit copy-move between the two
//! bucket instances. Pairs naturally with [`Freelist`](crate::Freelist)
//! buckets.

use crate::block::Block;
use crate::error::{AllocError, AllocResult};
use crate::realloc::{reallocate_with_copy, try_trivial};
use crate::traits::{BlockAllocator, DeallocateAll, Expand, Owns};

/// Size-segregated array of allocator instances.
///
/// Bucket `i` serves sizes in
/// `[min_size + i * step_size, min_size + (i + 1) * step_size - 1]`.
#[derive(Debug)]
pub struct Bucketizer<A> {
    buckets: Vec<A>,
    min_size: usize,
    max_size: usize,
    step_size: usize,
}

impl<A: BlockAllocator> Bucketizer<A> {
    /// Builds the bucket array.
    ///
    /// `factory` is called once per bucket with that bucket's inclusive
    /// `(min, max)` range and returns the allocator instance configured for
    /// it. The range `[min_size, max_size]` must be non-empty and divide
    /// evenly into `step_size` sub-ranges.
    pub fn new(
        min_size: usize,
        max_size: usize,
        step_size: usize,
        mut factory: impl FnMut(usize, usize) -> A,
    ) -> AllocResult<Self> {
        if min_size == 0 || min_size >= max_size {
            return Err(AllocError::invalid_config(
                "bucket range must satisfy 0 < min_size < max_size",
            ));
        }
        if step_size == 0 || (max_size - min_size + 1) % step_size != 0 {
            return Err(AllocError::invalid_config(
                "step size must evenly divide the bucket range",
            ));
        }

        let count = (max_size - min_size + 1) / step_size;
        let buckets = (0..count)
            .map(|i| {
                let lo = min_size + i * step_size;
                factory(lo, lo + step_size - 1)
            })
            .collect();

        Ok(Self {
            buckets,
            min_size,
            max_size,
            step_size,
        })
    }

    /// Number of buckets.
    pub fn number_of_buckets(&self) -> usize {
        self.buckets.len()
    }

    /// Smallest size served.
    pub fn min_size(&self) -> usize {
        self.min_size
    }

    /// Largest size served.
    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Width of each bucket's sub-range.
    pub fn step_size(&self) -> usize {
        self.step_size
    }

    /// Bucket responsible for `size`. Valid for sizes within the range; block
    /// lengths round-trip here because every bucket hands out lengths inside
    /// its own sub-range.
    #[inline]
    fn bucket_index(&self, size: usize) -> usize {
        debug_assert!(self.min_size <= size && size <= self.max_size);
        (size - self.min_size) / self.step_size
    }

    #[inline]
    fn bucket_range(&self, index: usize) -> (usize, usize) {
        let lo = self.min_size + index * self.step_size;
        (lo, lo + self.step_size - 1)
    }
}

// SAFETY: blocks route to buckets purely by length, and every bucket reports
// lengths inside its own sub-range, so routing always reaches the producer.
unsafe impl<A: BlockAllocator> BlockAllocator for Bucketizer<A> {
    // A block's stored length is its routing key, so it must reach
    // deallocate unchanged.
    const SUPPORTS_TRUNCATED_DEALLOCATION: bool = false;

    fn allocate(&self, size: usize) -> Block {
        for (i, bucket) in self.buckets.iter().enumerate() {
            let (lo, hi) = self.bucket_range(i);
            if lo <= size && size <= hi {
                return bucket.allocate(size);
            }
        }
        Block::empty()
    }

    unsafe fn deallocate(&self, block: &mut Block) {
        if block.is_empty() {
            return;
        }
        debug_assert!(self.owns(block), "deallocating a foreign block");
        if !self.owns(block) {
            return;
        }
        let index = self.bucket_index(block.len());
        // SAFETY: length routing reaches the producing bucket.
        unsafe { self.buckets[index].deallocate(block) };
    }

    unsafe fn reallocate(&self, block: &mut Block, new_size: usize) -> bool {
        if new_size != 0 && (new_size < self.min_size || new_size > self.max_size) {
            return false;
        }
        // SAFETY: forwarded caller contract.
        if let Some(handled) = unsafe { try_trivial(self, block, new_size) } {
            return handled;
        }

        debug_assert!(self.owns(block));
        let current = self.bucket_index(block.len());
        let target = self.bucket_index(new_size);
        if current == target {
            // Same size class: the stored length already covers the request.
            return true;
        }
        // SAFETY: old block belongs to `current`, the new one to `target`.
        unsafe {
            reallocate_with_copy(
                &self.buckets[current],
                &self.buckets[target],
                block,
                new_size,
            )
        }
    }
}

impl<A: BlockAllocator> Owns for Bucketizer<A> {
    fn owns(&self, block: &Block) -> bool {
        !block.is_empty() && self.min_size <= block.len() && block.len() <= self.max_size
    }
}

// SAFETY: expansion is forwarded to the bucket that produced the block.
unsafe impl<A: BlockAllocator + Expand> Expand for Bucketizer<A> {
    unsafe fn expand(&self, block: &mut Block, delta: usize) -> bool {
        if delta == 0 {
            return true;
        }
        if block.is_empty() || !self.owns(block) {
            return false;
        }
        let index = self.bucket_index(block.len());
        // SAFETY: forwarded caller contract.
        unsafe { self.buckets[index].expand(block, delta) }
    }
}

// SAFETY: resets every bucket; all issued blocks become invalid.
unsafe impl<A: BlockAllocator + DeallocateAll> DeallocateAll for Bucketizer<A> {
    unsafe fn deallocate_all(&self) {
        for bucket in &self.buckets {
            // SAFETY: forwarded caller contract.
            unsafe { bucket.deallocate_all() };
        }
    }
}
