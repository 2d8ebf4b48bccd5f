//! Shared freelist and shared cascading allocator under concurrency

use std::sync::Arc;
use std::thread;

use blockalloc::{
    Block, BlockAllocator, Owns, SharedCascadingAllocator, SharedChunkHeap, SharedFreelist,
    SystemAllocator,
};

#[test]
fn shared_freelist_recycles_across_threads() {
    let f = Arc::new(SharedFreelist::with_config(SystemAllocator::new(), 64, 256, 512, 8).unwrap());
    let threads = 8;

    let handles: Vec<_> = (0..threads)
        .map(|t| {
            let f = Arc::clone(&f);
            thread::spawn(move || {
                let pattern = 0xA0 + t as u8;
                for i in 0..400 {
                    let size = 64 + (i + t) % 193;
                    let mut b = f.allocate(size);
                    assert_eq!(b.len(), 256, "pool always serves the upper bound");
                    unsafe {
                        core::ptr::write_bytes(b.ptr(), pattern, b.len());
                        for offset in [0, 128, 255] {
                            assert_eq!(*b.ptr().add(offset), pattern);
                        }
                        f.deallocate(&mut b);
                    }
                }
            })
        })
        .collect();

    for j in handles {
        j.join().unwrap();
    }
    // Everything went back to the pool or the parent; the pool holds at most
    // its configured capacity.
    assert!(f.pooled() <= 512);
}

#[test]
fn shared_freelist_pop_is_exclusive() {
    // Seed the pool with a handful of blocks, then have more threads than
    // blocks race to pop them; every popped pointer must be unique.
    let f = Arc::new(SharedFreelist::with_config(SystemAllocator::new(), 32, 32, 64, 1).unwrap());
    let mut seeded: Vec<Block> = (0..8).map(|_| f.allocate(32)).collect();
    for b in seeded.iter_mut() {
        unsafe { f.deallocate(b) };
    }
    assert_eq!(f.pooled(), 8);

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let f = Arc::clone(&f);
            thread::spawn(move || {
                let b = f.allocate(32);
                b.ptr() as usize
            })
        })
        .collect();

    let mut addresses: Vec<usize> = handles.into_iter().map(|j| j.join().unwrap()).collect();
    addresses.retain(|&a| a != 0);
    let total = addresses.len();
    addresses.sort_unstable();
    addresses.dedup();
    assert_eq!(addresses.len(), total, "a pooled block was popped twice");
}

/// Default-constructible node allocator for the shared cascade: a 64-chunk,
/// 32-byte-chunk shared heap, 2 KiB of arena per node.
struct NodeHeap(SharedChunkHeap<SystemAllocator>);

impl Default for NodeHeap {
    fn default() -> Self {
        Self(SharedChunkHeap::new(SystemAllocator::new(), 64, 32).unwrap())
    }
}

unsafe impl BlockAllocator for NodeHeap {
    const SUPPORTS_TRUNCATED_DEALLOCATION: bool = true;

    fn allocate(&self, size: usize) -> Block {
        self.0.allocate(size)
    }

    unsafe fn deallocate(&self, block: &mut Block) {
        unsafe { self.0.deallocate(block) }
    }

    unsafe fn reallocate(&self, block: &mut Block, new_size: usize) -> bool {
        unsafe { self.0.reallocate(block, new_size) }
    }
}

impl Owns for NodeHeap {
    fn owns(&self, block: &Block) -> bool {
        self.0.owns(block)
    }
}

#[test]
fn shared_cascade_grows_under_contention_without_sharing_blocks() {
    let c = Arc::new(SharedCascadingAllocator::<NodeHeap>::new());
    let threads = 8;

    let handles: Vec<_> = (0..threads)
        .map(|t| {
            let c = Arc::clone(&c);
            thread::spawn(move || {
                let pattern = 0x40 + t as u8;
                let mut held: Vec<Block> = Vec::new();
                for i in 0..100 {
                    let size = 32 * (1 + (i + t) % 8);
                    let b = c.allocate(size);
                    if b.is_empty() {
                        continue;
                    }
                    unsafe { core::ptr::write_bytes(b.ptr(), pattern, b.len()) };
                    held.push(b);
                    if held.len() > 4 {
                        let mut old = held.remove(0);
                        unsafe {
                            for offset in 0..old.len() {
                                assert_eq!(
                                    *old.ptr().add(offset),
                                    pattern,
                                    "thread {t} found foreign bytes in its own block"
                                );
                            }
                            c.deallocate(&mut old);
                        }
                    }
                }
                for mut b in held {
                    unsafe { c.deallocate(&mut b) };
                }
            })
        })
        .collect();

    for j in handles {
        j.join().unwrap();
    }
    // Concurrent exhaustion forced the chain to grow beyond one node.
    assert!(c.chain_length() >= 1);
}

#[test]
fn shared_cascade_single_thread_reuses_freed_nodes() {
    let c = SharedCascadingAllocator::<NodeHeap>::new();
    let mut a = c.allocate(1536);
    let b = c.allocate(1536);
    assert!(!a.is_empty());
    assert!(!b.is_empty());
    assert_eq!(c.chain_length(), 2);

    unsafe { c.deallocate(&mut a) };
    let again = c.allocate(1536);
    assert!(!again.is_empty());
    assert_eq!(c.chain_length(), 2, "freed capacity is found before growing");
}
