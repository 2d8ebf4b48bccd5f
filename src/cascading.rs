//! Lazily grown chains of allocator instances
//!
//! A cascading allocator owns a singly linked chain of identical allocator
//! instances. Requests scan the chain; when every node is exhausted a fresh
//! node is appended and the scan retried. Nodes are self-hosting: each node
//! object lives in memory allocated from its own allocator instance, so a
//! node releases itself through itself at teardown.
//!
//! [`CascadingAllocator`] is single-threaded. [`SharedCascadingAllocator`]
//! appends with an optimistic compare-and-swap from null: a thread that loses
//! the race to install the first node releases its speculative node and
//! rescans, and a lost tail append just means the tail moved, so the same
//! node is retried further down.

use core::cell::Cell;
use core::mem;
use core::ptr;
use core::sync::atomic::{AtomicPtr, Ordering};

use crate::block::Block;
use crate::realloc::{reallocate_with_copy, try_trivial};
use crate::traits::{BlockAllocator, DeallocateAll, Expand, Owns};
use crate::utils::align_up;

// ---------------------------------------------------------------------------
// Shared (thread-safe) variant
// ---------------------------------------------------------------------------

struct SharedNode<A> {
    allocator: A,
    next: AtomicPtr<SharedNode<A>>,
    /// The node's own backing allocation, owned by `allocator`.
    memory: Block,
}

/// Thread-safe cascade of `A` instances.
///
/// `A` must be `Default` so the cascade can mint fresh instances, and
/// [`Owns`] so blocks find their way back to the producing node.
pub struct SharedCascadingAllocator<A: BlockAllocator> {
    root: AtomicPtr<SharedNode<A>>,
}

/// Allocates a node out of its own freshly built allocator.
///
/// Over-allocates by the node's alignment so the node object can be placed
/// aligned inside the backing block; the whole backing block is remembered
/// for teardown.
fn create_shared_node<A: BlockAllocator + Default>() -> *mut SharedNode<A> {
    let temp = A::default();
    let size = mem::size_of::<SharedNode<A>>() + mem::align_of::<SharedNode<A>>();
    let node_block = temp.allocate(size);
    if node_block.is_empty() {
        return ptr::null_mut();
    }
    let raw = align_up(node_block.ptr() as usize, mem::align_of::<SharedNode<A>>())
        as *mut SharedNode<A>;
    // SAFETY: raw is aligned and the node fits the backing block; writing
    // moves `temp` into memory that `temp` itself allocated.
    unsafe {
        ptr::write(
            raw,
            SharedNode {
                allocator: temp,
                next: AtomicPtr::new(ptr::null_mut()),
                memory: node_block,
            },
        );
    }
    raw
}

/// Tears one node down: the node frees its own backing block through its own
/// allocator, then the allocator drops and releases whatever it owned.
///
/// # Safety
///
/// `node_ptr` must be a live node no other thread can reach any more.
unsafe fn release_shared_node<A: BlockAllocator>(node_ptr: *mut SharedNode<A>) {
    // SAFETY: moves the node out to the stack; the heap bytes become stale.
    let node = unsafe { ptr::read(node_ptr) };
    let mut memory = node.memory;
    // SAFETY: `memory` is the allocation the node lived in, produced by
    // `node.allocator`.
    unsafe { node.allocator.deallocate(&mut memory) };
}

impl<A> SharedCascadingAllocator<A>
where
    A: BlockAllocator + Owns + Default,
{
    /// Creates an empty cascade; the first node appears on first demand.
    pub fn new() -> Self {
        Self {
            root: AtomicPtr::new(ptr::null_mut()),
        }
    }

    /// Number of nodes currently chained. Mostly useful in tests.
    pub fn chain_length(&self) -> usize {
        let mut n = 0;
        let mut p = self.root.load(Ordering::Acquire);
        while !p.is_null() {
            n += 1;
            // SAFETY: chain nodes stay live until teardown.
            p = unsafe { (*p).next.load(Ordering::Acquire) };
        }
        n
    }

    fn allocate_no_grow(&self, size: usize) -> Block {
        let mut p = self.root.load(Ordering::Acquire);
        while !p.is_null() {
            // SAFETY: chain nodes stay live until teardown.
            let node = unsafe { &*p };
            let result = node.allocator.allocate(size);
            if !result.is_empty() {
                return result;
            }
            p = node.next.load(Ordering::Acquire);
        }
        Block::empty()
    }

    fn find_owning_node(&self, block: &Block) -> *mut SharedNode<A> {
        let mut p = self.root.load(Ordering::Acquire);
        while !p.is_null() {
            // SAFETY: chain nodes stay live until teardown.
            let node = unsafe { &*p };
            if node.allocator.owns(block) {
                return p;
            }
            p = node.next.load(Ordering::Acquire);
        }
        ptr::null_mut()
    }

    /// Appends `new_node`, retrying while the tail moves underneath us.
    fn append(&self, new_node: *mut SharedNode<A>) {
        loop {
            let mut p = self.root.load(Ordering::Acquire);
            if p.is_null() {
                if self
                    .root
                    .compare_exchange(
                        ptr::null_mut(),
                        new_node,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    )
                    .is_ok()
                {
                    return;
                }
                continue;
            }
            // SAFETY: chain nodes stay live until teardown.
            unsafe {
                while !(*p).next.load(Ordering::Acquire).is_null() {
                    p = (*p).next.load(Ordering::Acquire);
                }
                if (*p)
                    .next
                    .compare_exchange(
                        ptr::null_mut(),
                        new_node,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    )
                    .is_ok()
                {
                    return;
                }
            }
            // Tail moved: rescan and retry with the same node.
        }
    }

    fn release_chain(&self) {
        let mut p = self.root.swap(ptr::null_mut(), Ordering::AcqRel);
        while !p.is_null() {
            // SAFETY: the chain was detached above, so this thread is the
            // only one still holding it.
            let next = unsafe { (*p).next.load(Ordering::Relaxed) };
            unsafe { release_shared_node(p) };
            p = next;
        }
    }
}

impl<A> Default for SharedCascadingAllocator<A>
where
    A: BlockAllocator + Owns + Default,
{
    fn default() -> Self {
        Self::new()
    }
}

// SAFETY: each block comes from exactly one node; nodes are only appended
// (never removed) while the cascade lives, so scans are stable.
unsafe impl<A> BlockAllocator for SharedCascadingAllocator<A>
where
    A: BlockAllocator + Owns + Default,
{
    const SUPPORTS_TRUNCATED_DEALLOCATION: bool = A::SUPPORTS_TRUNCATED_DEALLOCATION;

    fn allocate(&self, size: usize) -> Block {
        if size == 0 {
            return Block::empty();
        }

        let result = self.allocate_no_grow(size);
        if !result.is_empty() {
            return result;
        }

        // Install the first node if the chain is empty.
        if self.root.load(Ordering::Acquire).is_null() {
            let first = create_shared_node::<A>();
            if first.is_null() {
                return Block::empty();
            }
            if self
                .root
                .compare_exchange(ptr::null_mut(), first, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                // Someone else won the install; undo the speculative node.
                tracing::trace!("lost the race to install the cascade root");
                // SAFETY: `first` was never published.
                unsafe { release_shared_node(first) };
            }
            let result = self.allocate_no_grow(size);
            if !result.is_empty() {
                return result;
            }
        }

        // Chain exhausted: grow by one node and rescan.
        let new_node = create_shared_node::<A>();
        if new_node.is_null() {
            return Block::empty();
        }
        tracing::trace!("cascade grows by one node");
        self.append(new_node);
        self.allocate_no_grow(size)
    }

    unsafe fn deallocate(&self, block: &mut Block) {
        if block.is_empty() {
            return;
        }
        let node = self.find_owning_node(block);
        debug_assert!(!node.is_null(), "deallocating a foreign block");
        if node.is_null() {
            return;
        }
        // SAFETY: the owning node produced the block; forwarded contract.
        unsafe { (*node).allocator.deallocate(block) };
    }

    unsafe fn reallocate(&self, block: &mut Block, new_size: usize) -> bool {
        // SAFETY: forwarded caller contract.
        if let Some(handled) = unsafe { try_trivial(self, block, new_size) } {
            return handled;
        }
        let node = self.find_owning_node(block);
        debug_assert!(!node.is_null(), "reallocating a foreign block");
        if node.is_null() {
            return false;
        }
        // SAFETY: the owning node produced the block.
        if unsafe { (*node).allocator.reallocate(block, new_size) } {
            return true;
        }
        // The owning node is out of room: move anywhere in the cascade,
        // growing the chain if need be.
        // SAFETY: self routes the old block back to its owning node.
        unsafe { reallocate_with_copy(self, self, block, new_size) }
    }
}

impl<A> Owns for SharedCascadingAllocator<A>
where
    A: BlockAllocator + Owns + Default,
{
    fn owns(&self, block: &Block) -> bool {
        !block.is_empty() && !self.find_owning_node(block).is_null()
    }
}

// SAFETY: expansion is forwarded to the owning node and never moves a block.
unsafe impl<A> Expand for SharedCascadingAllocator<A>
where
    A: Expand + Owns + Default,
{
    unsafe fn expand(&self, block: &mut Block, delta: usize) -> bool {
        if delta == 0 {
            return true;
        }
        let node = self.find_owning_node(block);
        if node.is_null() {
            return false;
        }
        // SAFETY: forwarded caller contract.
        unsafe { (*node).allocator.expand(block, delta) }
    }
}

// SAFETY: tears the whole chain down; all issued blocks become invalid. Must
// not race with other operations, per the capability contract.
unsafe impl<A> DeallocateAll for SharedCascadingAllocator<A>
where
    A: BlockAllocator + Owns + Default,
{
    unsafe fn deallocate_all(&self) {
        self.release_chain();
    }
}

impl<A: BlockAllocator> Drop for SharedCascadingAllocator<A> {
    fn drop(&mut self) {
        let mut p = self.root.swap(ptr::null_mut(), Ordering::AcqRel);
        while !p.is_null() {
            // SAFETY: drop has exclusive access to the chain.
            let next = unsafe { (*p).next.load(Ordering::Relaxed) };
            unsafe { release_shared_node(p) };
            p = next;
        }
    }
}

// SAFETY: the chain is guarded by atomic link updates; nodes are never
// mutated after publication except through their own thread-safe allocators.
unsafe impl<A: BlockAllocator + Send> Send for SharedCascadingAllocator<A> {}
unsafe impl<A: BlockAllocator + Send + Sync> Sync for SharedCascadingAllocator<A> {}

// ---------------------------------------------------------------------------
// Single-threaded variant
// ---------------------------------------------------------------------------

struct LocalNode<A> {
    allocator: A,
    next: Cell<*mut LocalNode<A>>,
    memory: Block,
}

/// Single-threaded cascade of `A` instances. Same behavior as
/// [`SharedCascadingAllocator`] without the atomic link discipline.
pub struct CascadingAllocator<A: BlockAllocator> {
    root: Cell<*mut LocalNode<A>>,
}

fn create_local_node<A: BlockAllocator + Default>() -> *mut LocalNode<A> {
    let temp = A::default();
    let size = mem::size_of::<LocalNode<A>>() + mem::align_of::<LocalNode<A>>();
    let node_block = temp.allocate(size);
    if node_block.is_empty() {
        return ptr::null_mut();
    }
    let raw =
        align_up(node_block.ptr() as usize, mem::align_of::<LocalNode<A>>()) as *mut LocalNode<A>;
    // SAFETY: raw is aligned and the node fits the backing block.
    unsafe {
        ptr::write(
            raw,
            LocalNode {
                allocator: temp,
                next: Cell::new(ptr::null_mut()),
                memory: node_block,
            },
        );
    }
    raw
}

/// # Safety
///
/// `node_ptr` must be a live, unreachable node.
unsafe fn release_local_node<A: BlockAllocator>(node_ptr: *mut LocalNode<A>) {
    // SAFETY: moves the node out; the heap bytes become stale.
    let node = unsafe { ptr::read(node_ptr) };
    let mut memory = node.memory;
    // SAFETY: `memory` is the allocation the node lived in.
    unsafe { node.allocator.deallocate(&mut memory) };
}

impl<A> CascadingAllocator<A>
where
    A: BlockAllocator + Owns + Default,
{
    /// Creates an empty cascade; the first node appears on first demand.
    pub fn new() -> Self {
        Self {
            root: Cell::new(ptr::null_mut()),
        }
    }

    /// Number of nodes currently chained.
    pub fn chain_length(&self) -> usize {
        let mut n = 0;
        let mut p = self.root.get();
        while !p.is_null() {
            n += 1;
            // SAFETY: chain nodes stay live until teardown.
            p = unsafe { (*p).next.get() };
        }
        n
    }

    fn allocate_no_grow(&self, size: usize) -> Block {
        let mut p = self.root.get();
        while !p.is_null() {
            // SAFETY: chain nodes stay live until teardown.
            let node = unsafe { &*p };
            let result = node.allocator.allocate(size);
            if !result.is_empty() {
                return result;
            }
            p = node.next.get();
        }
        Block::empty()
    }

    fn find_owning_node(&self, block: &Block) -> *mut LocalNode<A> {
        let mut p = self.root.get();
        while !p.is_null() {
            // SAFETY: chain nodes stay live until teardown.
            let node = unsafe { &*p };
            if node.allocator.owns(block) {
                return p;
            }
            p = node.next.get();
        }
        ptr::null_mut()
    }

    fn append(&self, new_node: *mut LocalNode<A>) {
        let mut p = self.root.get();
        if p.is_null() {
            self.root.set(new_node);
            return;
        }
        // SAFETY: chain nodes stay live until teardown.
        unsafe {
            while !(*p).next.get().is_null() {
                p = (*p).next.get();
            }
            (*p).next.set(new_node);
        }
    }

    fn release_chain(&self) {
        let mut p = self.root.replace(ptr::null_mut());
        while !p.is_null() {
            // SAFETY: the chain was detached above.
            let next = unsafe { (*p).next.get() };
            unsafe { release_local_node(p) };
            p = next;
        }
    }
}

impl<A> Default for CascadingAllocator<A>
where
    A: BlockAllocator + Owns + Default,
{
    fn default() -> Self {
        Self::new()
    }
}

// SAFETY: same reasoning as the shared variant, minus concurrency.
unsafe impl<A> BlockAllocator for CascadingAllocator<A>
where
    A: BlockAllocator + Owns + Default,
{
    const SUPPORTS_TRUNCATED_DEALLOCATION: bool = A::SUPPORTS_TRUNCATED_DEALLOCATION;

    fn allocate(&self, size: usize) -> Block {
        if size == 0 {
            return Block::empty();
        }
        let result = self.allocate_no_grow(size);
        if !result.is_empty() {
            return result;
        }
        let new_node = create_local_node::<A>();
        if new_node.is_null() {
            return Block::empty();
        }
        tracing::trace!("cascade grows by one node");
        self.append(new_node);
        self.allocate_no_grow(size)
    }

    unsafe fn deallocate(&self, block: &mut Block) {
        if block.is_empty() {
            return;
        }
        let node = self.find_owning_node(block);
        debug_assert!(!node.is_null(), "deallocating a foreign block");
        if node.is_null() {
            return;
        }
        // SAFETY: the owning node produced the block.
        unsafe { (*node).allocator.deallocate(block) };
    }

    unsafe fn reallocate(&self, block: &mut Block, new_size: usize) -> bool {
        // SAFETY: forwarded caller contract.
        if let Some(handled) = unsafe { try_trivial(self, block, new_size) } {
            return handled;
        }
        let node = self.find_owning_node(block);
        debug_assert!(!node.is_null(), "reallocating a foreign block");
        if node.is_null() {
            return false;
        }
        // SAFETY: the owning node produced the block.
        if unsafe { (*node).allocator.reallocate(block, new_size) } {
            return true;
        }
        // SAFETY: self routes the old block back to its owning node.
        unsafe { reallocate_with_copy(self, self, block, new_size) }
    }
}

impl<A> Owns for CascadingAllocator<A>
where
    A: BlockAllocator + Owns + Default,
{
    fn owns(&self, block: &Block) -> bool {
        !block.is_empty() && !self.find_owning_node(block).is_null()
    }
}

// SAFETY: expansion is forwarded to the owning node.
unsafe impl<A> Expand for CascadingAllocator<A>
where
    A: Expand + Owns + Default,
{
    unsafe fn expand(&self, block: &mut Block, delta: usize) -> bool {
        if delta == 0 {
            return true;
        }
        let node = self.find_owning_node(block);
        if node.is_null() {
            return false;
        }
        // SAFETY: forwarded caller contract.
        unsafe { (*node).allocator.expand(block, delta) }
    }
}

// SAFETY: tears the whole chain down; all issued blocks become invalid.
unsafe impl<A> DeallocateAll for CascadingAllocator<A>
where
    A: BlockAllocator + Owns + Default,
{
    unsafe fn deallocate_all(&self) {
        self.release_chain();
    }
}

impl<A: BlockAllocator> Drop for CascadingAllocator<A> {
    fn drop(&mut self) {
        let mut p = self.root.replace(ptr::null_mut());
        while !p.is_null() {
            // SAFETY: drop has exclusive access to the chain.
            let next = unsafe { (*p).next.get() };
            unsafe { release_local_node(p) };
            p = next;
        }
    }
}
