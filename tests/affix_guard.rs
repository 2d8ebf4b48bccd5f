//! Guarded allocation integration tests
//!
//! An affix allocator with corruption guards on both sides must stay silent
//! for well-behaved callers and trip on the first deallocation after an
//! overrun.

use blockalloc::{
    AffixAllocator, BlockAllocator, ChunkHeap, CorruptionGuard, Expand, Owns, SystemAllocator,
};

type Guarded = AffixAllocator<SystemAllocator, CorruptionGuard, CorruptionGuard>;

#[test]
fn clean_usage_never_trips_the_guards() {
    let a = Guarded::new(SystemAllocator::new());
    for size in [1, 7, 16, 100, 4096] {
        let mut b = a.allocate(size);
        assert_eq!(b.len(), size);
        unsafe {
            core::ptr::write_bytes(b.ptr(), 0x33, size);
            a.deallocate(&mut b);
        }
    }
}

#[test]
#[should_panic(expected = "memory corruption detected")]
fn suffix_overrun_is_reported() {
    let a = Guarded::new(SystemAllocator::new());
    let mut b = a.allocate(24);
    unsafe {
        // One byte past the reported length lands in the suffix guard.
        *b.ptr().add(24) = 0xEE;
        a.deallocate(&mut b);
    }
}

#[test]
#[should_panic(expected = "memory corruption detected")]
fn prefix_underrun_is_reported() {
    let a = Guarded::new(SystemAllocator::new());
    let mut b = a.allocate(24);
    unsafe {
        *b.ptr().sub(1) = 0xEE;
        a.deallocate(&mut b);
    }
}

#[test]
fn guards_survive_reallocation_cycles() {
    let a = Guarded::new(SystemAllocator::new());
    let mut b = a.allocate(32);
    unsafe {
        core::ptr::write_bytes(b.ptr(), 0x5A, 32);
        assert!(a.reallocate(&mut b, 256));
        assert!(a.reallocate(&mut b, 16));
        a.deallocate(&mut b);
    }
}

#[test]
fn affix_over_a_chunk_heap_routes_ownership() {
    // The affix wrapper delegates ownership to the heap on the inner block.
    let a: AffixAllocator<ChunkHeap<SystemAllocator>, CorruptionGuard, CorruptionGuard> =
        AffixAllocator::new(ChunkHeap::new(SystemAllocator::new(), 64, 16).unwrap());
    let mut b = a.allocate(40);
    assert!(!b.is_empty());
    assert!(a.owns(&b));
    unsafe { a.deallocate(&mut b) };
    assert_eq!(a.inner().free_chunks(), 64);
}

#[test]
fn expand_preserves_the_suffix_guard() {
    let a: AffixAllocator<ChunkHeap<SystemAllocator>, CorruptionGuard, CorruptionGuard> =
        AffixAllocator::new(ChunkHeap::new(SystemAllocator::new(), 64, 16).unwrap());
    let mut b = a.allocate(40);
    let ptr = b.ptr();
    assert!(unsafe { a.expand(&mut b, 32) });
    assert_eq!(b.ptr(), ptr);
    assert!(b.len() >= 72);
    unsafe { a.deallocate(&mut b) };
    assert_eq!(a.inner().free_chunks(), 64);
}
