//! Thread-safe chunk heap
//!
//! Same bitmap layout and search strategies as [`ChunkHeap`](super::ChunkHeap)
//! with a two-tier concurrency discipline:
//!
//! - single-register operations are compare-and-swap retry loops taken under
//!   a *shared* lock, so concurrent fast paths never block each other;
//! - multi-register operations (register runs, register-crossing spans,
//!   `deallocate_all`) hold the *exclusive* lock, because no single atomic
//!   instruction can publish them consistently.
//!
//! The shared lock's only job is to fence the fast path against an in-flight
//! exclusive writer; register updates themselves synchronize through
//! release/acquire CAS.

use core::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

use crate::block::Block;
use crate::error::{AllocError, AllocResult};
use crate::realloc::{reallocate_with_copy, try_trivial_or_expand};
use crate::traits::{BlockAllocator, DeallocateAll, Expand, Owns};
use crate::utils::round_to_multiple;

use super::{
    apply_mask, mask_for, BlockContext, CHUNK_COUNT_GRAIN, CHUNK_SIZE_GRAIN, REGISTER_BITS,
};

/// Thread-safe bitmap chunk heap.
///
/// All operations take `&self`; the heap is `Sync` and meant to be shared
/// across threads behind a reference or an `Arc`.
pub struct SharedChunkHeap<A: BlockAllocator> {
    backing: A,
    buffer: Block,
    control_buffer: Block,
    control: *const AtomicU64,
    control_size: usize,
    chunk_count: usize,
    chunk_size: usize,
    /// Shared = fast-path CAS, exclusive = structural multi-register change.
    mutex: RwLock<()>,
}

impl<A: BlockAllocator> SharedChunkHeap<A> {
    /// Builds a heap of `chunk_count` chunks of `chunk_size` bytes each,
    /// rounded up to the heap's grain.
    pub fn new(backing: A, chunk_count: usize, chunk_size: usize) -> AllocResult<Self> {
        if chunk_count == 0 || chunk_size == 0 {
            return Err(AllocError::invalid_config(
                "chunk count and chunk size must be non-zero",
            ));
        }
        let chunk_count = round_to_multiple(CHUNK_COUNT_GRAIN, chunk_count);
        let chunk_size = round_to_multiple(CHUNK_SIZE_GRAIN, chunk_size);
        let control_size = chunk_count / REGISTER_BITS;

        let control_bytes = control_size * core::mem::size_of::<AtomicU64>();
        let mut control_buffer = backing.allocate(control_bytes);
        if control_buffer.is_empty() {
            return Err(AllocError::out_of_memory(control_bytes));
        }
        let arena_bytes = chunk_count * chunk_size;
        let buffer = backing.allocate(arena_bytes);
        if buffer.is_empty() {
            // SAFETY: control_buffer came from `backing` just above.
            unsafe { backing.deallocate(&mut control_buffer) };
            return Err(AllocError::out_of_memory(arena_bytes));
        }

        debug_assert!(
            crate::utils::is_aligned(
                control_buffer.ptr() as usize,
                core::mem::align_of::<AtomicU64>()
            ),
            "backing allocator must align the control bitmap for atomic access"
        );
        let control = control_buffer.ptr() as *mut AtomicU64;
        for i in 0..control_size {
            // SAFETY: the control buffer holds control_size registers; they
            // are initialized exactly once before the heap is shared.
            unsafe { control.add(i).write(AtomicU64::new(u64::MAX)) };
        }

        tracing::debug!(chunk_count, chunk_size, "shared chunk heap initialized");
        Ok(Self {
            backing,
            buffer,
            control_buffer,
            control,
            control_size,
            chunk_count,
            chunk_size,
            mutex: RwLock::new(()),
        })
    }

    /// Number of chunks in the arena.
    pub fn chunk_count(&self) -> usize {
        self.chunk_count
    }

    /// Size of one chunk in bytes.
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Total arena capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.chunk_count * self.chunk_size
    }

    /// Number of currently free chunks: the popcount of the bitmap.
    pub fn free_chunks(&self) -> usize {
        (0..self.control_size)
            .map(|i| self.register(i).load(Ordering::Acquire).count_ones() as usize)
            .sum()
    }

    #[inline]
    fn register(&self, index: usize) -> &AtomicU64 {
        debug_assert!(index < self.control_size);
        // SAFETY: control points at control_size live registers for the
        // heap's whole lifetime.
        unsafe { &*self.control.add(index) }
    }

    fn block_to_context(&self, block: &Block) -> BlockContext {
        let chunk_index = (block.ptr() as usize - self.buffer.ptr() as usize) / self.chunk_size;
        BlockContext {
            register_index: chunk_index / REGISTER_BITS,
            sub_index: chunk_index % REGISTER_BITS,
            used_chunks: block.len() / self.chunk_size,
        }
    }

    fn block_at(&self, chunk_index: usize, chunks: usize) -> Block {
        Block::from_raw_parts(
            self.buffer.ptr().wrapping_add(chunk_index * self.chunk_size),
            chunks * self.chunk_size,
        )
    }

    /// CAS-applies `mask` to one register until it sticks. Each attempt holds
    /// the shared lock so an exclusive writer is never interleaved.
    fn cas_apply(&self, register_index: usize, mask: u64, free: bool) {
        let register = self.register(register_index);
        loop {
            let current = register.load(Ordering::Acquire);
            let new = apply_mask(current, mask, free);
            let _shared = self.mutex.read();
            if register
                .compare_exchange(current, new, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return;
            }
        }
    }

    /// Claims `mask` in one register iff every masked bit is free.
    fn cas_try_claim(&self, register_index: usize, mask: u64) -> bool {
        let register = self.register(register_index);
        loop {
            let current = register.load(Ordering::Acquire);
            if current & mask != mask {
                return false;
            }
            let new = apply_mask(current, mask, false);
            let _shared = self.mutex.read();
            if register
                .compare_exchange(current, new, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return true;
            }
        }
    }

    /// Marks a span free/used through per-register CAS under the shared
    /// lock. Used by the paths that do not hold the exclusive lock.
    fn mark_span_shared(&self, start_chunk: usize, count: usize, free: bool) {
        debug_assert!(start_chunk + count <= self.chunk_count);
        let mut register_index = start_chunk / REGISTER_BITS;
        let mut sub_index = start_chunk % REGISTER_BITS;
        let mut remaining = count;
        while remaining > 0 {
            let in_this = remaining.min(REGISTER_BITS - sub_index);
            self.cas_apply(register_index, mask_for(sub_index, in_this), free);
            remaining -= in_this;
            sub_index = 0;
            register_index += 1;
        }
    }

    /// Marks a span free/used with plain stores. Caller holds the exclusive
    /// lock, so no CAS can be in flight.
    fn mark_span_exclusive(&self, start_chunk: usize, count: usize, free: bool) {
        debug_assert!(start_chunk + count <= self.chunk_count);
        let mut register_index = start_chunk / REGISTER_BITS;
        let mut sub_index = start_chunk % REGISTER_BITS;
        let mut remaining = count;
        while remaining > 0 {
            let in_this = remaining.min(REGISTER_BITS - sub_index);
            let mask = mask_for(sub_index, in_this);
            let register = self.register(register_index);
            let value = apply_mask(register.load(Ordering::Acquire), mask, free);
            register.store(value, Ordering::Release);
            remaining -= in_this;
            sub_index = 0;
            register_index += 1;
        }
    }

    /// Fast path: spans shorter than one register. The scan runs lock-free;
    /// only the committing CAS takes the shared lock. A register that changes
    /// under our feet is rescanned from its fresh value.
    fn allocate_within_single_register(&self, chunks: usize) -> Block {
        for register_index in 0..self.control_size {
            'rescan: loop {
                let current = self.register(register_index).load(Ordering::Acquire);
                if current == 0 {
                    break;
                }
                let mut mask = mask_for(0, chunks);
                for position in 0..=(REGISTER_BITS - chunks) {
                    if current & mask == mask {
                        let new = apply_mask(current, mask, false);
                        let _shared = self.mutex.read();
                        if self
                            .register(register_index)
                            .compare_exchange(current, new, Ordering::AcqRel, Ordering::Acquire)
                            .is_ok()
                        {
                            return self
                                .block_at(register_index * REGISTER_BITS + position, chunks);
                        }
                        // Lost the race on this register; rescan it.
                        continue 'rescan;
                    }
                    mask <<= 1;
                }
                break;
            }
        }
        Block::empty()
    }

    /// Fast path for exactly one register: find a fully free register and
    /// claim it with one CAS.
    fn allocate_complete_register(&self) -> Block {
        loop {
            let mut candidate = None;
            for register_index in 0..self.control_size {
                if self.register(register_index).load(Ordering::Acquire) == u64::MAX {
                    candidate = Some(register_index);
                    break;
                }
            }
            let Some(register_index) = candidate else {
                return Block::empty();
            };
            let _shared = self.mutex.read();
            if self
                .register(register_index)
                .compare_exchange(u64::MAX, 0, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return self.block_at(register_index * REGISTER_BITS, REGISTER_BITS);
            }
            // Someone claimed it first; look for another.
        }
    }

    /// Rare path: a run of whole registers. Works on several registers at
    /// once, so it needs the exclusive lock.
    fn allocate_multiple_registers(&self, chunks: usize) -> Block {
        let _exclusive = self.mutex.write();

        let needed = chunks / REGISTER_BITS;
        let mut run_start = 0;
        let mut run_len = 0;
        for register_index in 0..self.control_size {
            if self.register(register_index).load(Ordering::Acquire) == u64::MAX {
                if run_len == 0 {
                    run_start = register_index;
                }
                run_len += 1;
                if run_len == needed {
                    for i in run_start..run_start + needed {
                        self.register(i).store(0, Ordering::Release);
                    }
                    return self.block_at(run_start * REGISTER_BITS, chunks);
                }
            } else {
                run_len = 0;
            }
        }
        Block::empty()
    }

    /// Rare path: byte-granular span crossing register boundaries, under the
    /// exclusive lock.
    fn allocate_register_overlap(&self, chunks: usize) -> Block {
        let _exclusive = self.mutex.write();

        let total_bytes = self.control_size * core::mem::size_of::<u64>();
        let mut free_chunks = 0usize;
        let mut run_start_byte = None;

        for byte_index in 0..total_bytes {
            let register = self.register(byte_index / 8).load(Ordering::Acquire);
            let byte = register.to_le_bytes()[byte_index % 8];
            if byte == 0xFF {
                if run_start_byte.is_none() {
                    run_start_byte = Some(byte_index);
                }
                free_chunks += 8;
                if free_chunks >= chunks {
                    let start_chunk = run_start_byte.unwrap() * 8;
                    self.mark_span_exclusive(start_chunk, chunks, false);
                    return self.block_at(start_chunk, chunks);
                }
            } else {
                free_chunks = 0;
                run_start_byte = None;
            }
        }
        Block::empty()
    }
}

// SAFETY: bits move between free and used only through the CAS/lock
// discipline above, so no two threads can be handed overlapping spans, and a
// release is visible to the next acquire-loading allocation.
unsafe impl<A: BlockAllocator> BlockAllocator for SharedChunkHeap<A> {
    const SUPPORTS_TRUNCATED_DEALLOCATION: bool = true;

    fn allocate(&self, size: usize) -> Block {
        if size == 0 {
            return Block::empty();
        }
        if size > self.capacity() {
            return Block::empty();
        }
        let chunks = (round_to_multiple(self.chunk_size, size) / self.chunk_size).max(1);

        if chunks < REGISTER_BITS {
            let result = self.allocate_within_single_register(chunks);
            if !result.is_empty() {
                return result;
            }
        } else if chunks == REGISTER_BITS {
            let result = self.allocate_complete_register();
            if !result.is_empty() {
                return result;
            }
        } else if chunks % REGISTER_BITS == 0 {
            let result = self.allocate_multiple_registers(chunks);
            if !result.is_empty() {
                return result;
            }
        }
        self.allocate_register_overlap(chunks)
    }

    unsafe fn deallocate(&self, block: &mut Block) {
        if block.is_empty() {
            return;
        }
        debug_assert!(self.owns(block), "deallocating a foreign block");
        if !self.owns(block) {
            return;
        }
        let context = self.block_to_context(block);
        let start = context.register_index * REGISTER_BITS + context.sub_index;

        if context.sub_index + context.used_chunks <= REGISTER_BITS {
            // One register: a single CAS under the shared lock.
            self.cas_apply(
                context.register_index,
                mask_for(context.sub_index, context.used_chunks),
                true,
            );
        } else if context.sub_index == 0 && context.used_chunks % REGISTER_BITS == 0 {
            // Aligned whole registers: store them free one by one.
            for i in context.register_index
                ..context.register_index + context.used_chunks / REGISTER_BITS
            {
                let _shared = self.mutex.read();
                self.register(i).store(u64::MAX, Ordering::Release);
            }
        } else {
            self.mark_span_shared(start, context.used_chunks, true);
        }
        block.reset();
    }

    unsafe fn reallocate(&self, block: &mut Block, new_size: usize) -> bool {
        // SAFETY: forwarded caller contract; growth tries expand first.
        if let Some(handled) = unsafe { try_trivial_or_expand(self, block, new_size) } {
            return handled;
        }

        let chunks = block.len() / self.chunk_size;
        let new_chunks = round_to_multiple(self.chunk_size, new_size) / self.chunk_size;
        if chunks == new_chunks {
            return true;
        }
        if block.len() > new_size {
            let context = self.block_to_context(block);
            let start =
                context.register_index * REGISTER_BITS + context.sub_index + new_chunks;
            self.mark_span_shared(start, chunks - new_chunks, true);
            block.truncate(new_chunks * self.chunk_size);
            return true;
        }
        // SAFETY: forwarded caller contract.
        unsafe { reallocate_with_copy(self, self, block, new_size) }
    }
}

impl<A: BlockAllocator> Owns for SharedChunkHeap<A> {
    fn owns(&self, block: &Block) -> bool {
        !block.is_empty()
            && self.buffer.ptr() <= block.ptr()
            && block.ptr() < self.buffer.end()
    }
}

// SAFETY: the claimed chunks are verified free and flipped used atomically
// (single CAS) or under the exclusive lock (crossing spans), so a successful
// expand never overlaps a concurrent allocation.
unsafe impl<A: BlockAllocator> Expand for SharedChunkHeap<A> {
    unsafe fn expand(&self, block: &mut Block, delta: usize) -> bool {
        if delta == 0 {
            return true;
        }
        if block.is_empty() {
            *block = self.allocate(delta);
            return !block.is_empty();
        }
        let additional = round_to_multiple(self.chunk_size, delta) / self.chunk_size;
        let context = self.block_to_context(block);
        let end_chunk =
            context.register_index * REGISTER_BITS + context.sub_index + context.used_chunks;
        if end_chunk + additional > self.chunk_count {
            return false;
        }

        let end_sub = end_chunk % REGISTER_BITS;
        if end_sub + additional <= REGISTER_BITS {
            // The new span sits in one register: claim it with one CAS.
            if !self.cas_try_claim(end_chunk / REGISTER_BITS, mask_for(end_sub, additional)) {
                return false;
            }
        } else {
            // Crossing registers: verify and claim under the exclusive lock.
            let _exclusive = self.mutex.write();
            let mut register_index = end_chunk / REGISTER_BITS;
            let mut sub_index = end_sub;
            let mut remaining = additional;
            while remaining > 0 {
                let in_this = remaining.min(REGISTER_BITS - sub_index);
                let mask = mask_for(sub_index, in_this);
                if self.register(register_index).load(Ordering::Acquire) & mask != mask {
                    return false;
                }
                remaining -= in_this;
                sub_index = 0;
                register_index += 1;
            }
            self.mark_span_exclusive(end_chunk, additional, false);
        }

        *block = Block::from_raw_parts(
            block.ptr(),
            block.len() + additional * self.chunk_size,
        );
        true
    }
}

// SAFETY: holds the exclusive lock while resetting every register.
unsafe impl<A: BlockAllocator> DeallocateAll for SharedChunkHeap<A> {
    unsafe fn deallocate_all(&self) {
        let _exclusive = self.mutex.write();
        for i in 0..self.control_size {
            self.register(i).store(u64::MAX, Ordering::Release);
        }
    }
}

impl<A: BlockAllocator> Drop for SharedChunkHeap<A> {
    fn drop(&mut self) {
        let mut control_buffer = self.control_buffer;
        let mut buffer = self.buffer;
        // SAFETY: both blocks came from `self.backing` at construction; drop
        // has exclusive access.
        unsafe {
            self.backing.deallocate(&mut control_buffer);
            self.backing.deallocate(&mut buffer);
        }
        self.control = core::ptr::null();
    }
}

// SAFETY: all shared-state mutation goes through atomics and the RwLock; the
// raw pointers alias memory the heap exclusively owns.
unsafe impl<A: BlockAllocator + Send> Send for SharedChunkHeap<A> {}
unsafe impl<A: BlockAllocator + Send + Sync> Sync for SharedChunkHeap<A> {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system::SystemAllocator;

    fn heap(chunks: usize, chunk_size: usize) -> SharedChunkHeap<SystemAllocator> {
        SharedChunkHeap::new(SystemAllocator::new(), chunks, chunk_size).unwrap()
    }

    #[test]
    fn mirrors_the_single_threaded_geometry() {
        let h = heap(100, 6);
        assert_eq!(h.chunk_count(), 128);
        assert_eq!(h.chunk_size(), 8);
        assert_eq!(h.free_chunks(), 128);
    }

    #[test]
    fn fill_exhaust_reset_refill() {
        let h = heap(64, 8);
        let blocks: Vec<Block> = (0..64).map(|_| h.allocate(8)).collect();
        let base = blocks[0].ptr();
        assert!(blocks.iter().all(|b| b.len() == 8));
        assert_eq!(h.free_chunks(), 0);
        assert!(h.allocate(8).is_empty());

        unsafe { h.deallocate_all() };
        assert_eq!(h.free_chunks(), 64);

        let full = h.allocate(512);
        assert_eq!(full.ptr(), base);
        assert_eq!(full.len(), 512);
    }

    #[test]
    fn register_crossing_span_roundtrips() {
        let h = heap(192, 8);
        let _pin = h.allocate(80);
        let mut crossing = h.allocate(65 * 8);
        assert_eq!(crossing.len(), 65 * 8);
        assert_eq!(h.free_chunks(), 192 - 10 - 65);
        unsafe { h.deallocate(&mut crossing) };
        assert_eq!(h.free_chunks(), 192 - 10);
    }

    #[test]
    fn expand_claims_only_adjacent_free_chunks() {
        let h = heap(64, 8);
        let mut a = h.allocate(16);
        let mut b = h.allocate(8);
        assert!(!unsafe { h.expand(&mut a, 8) });
        unsafe { h.deallocate(&mut b) };
        assert!(unsafe { h.expand(&mut a, 8) });
        assert_eq!(a.len(), 24);
    }

    #[test]
    fn reallocate_shrinks_in_place() {
        let h = heap(64, 8);
        let mut a = h.allocate(64);
        let ptr = a.ptr();
        assert!(unsafe { h.reallocate(&mut a, 24) });
        assert_eq!(a.ptr(), ptr);
        assert_eq!(a.len(), 24);
        assert_eq!(h.free_chunks(), 64 - 3);
    }
}
