//! Composition policy integration tests
//!
//! Exercises the routing composites stacked the way an application would
//! stack them: size-class pools behind a segregator, a fallback to the system
//! heap, and cross-policy reallocation.

use blockalloc::{
    Block, BlockAllocator, Bucketizer, FallbackAllocator, Freelist, Owns, Segregator,
    StackAllocator, SystemAllocator, TrackedAllocator,
};

#[test]
fn block_truthiness_follows_length() {
    let b = Block::empty();
    assert!(b.is_empty());
    let sys = SystemAllocator::new();
    let mut b = sys.allocate(1);
    assert!(!b.is_empty());
    unsafe { sys.deallocate(&mut b) };
    assert!(b.is_empty());
}

#[test]
fn bucketizer_boundary_round_trips() {
    // Buckets [17,32][33,48][49,64]; each edge maps to its bucket's upper
    // edge, one past the range routes nowhere.
    let pools = Bucketizer::new(17, 64, 16, |lo, hi| {
        Freelist::with_bounds(SystemAllocator::new(), lo, hi).unwrap()
    })
    .unwrap();

    let mut a = pools.allocate(17);
    let mut b = pools.allocate(32);
    let mut c = pools.allocate(33);
    let mut d = pools.allocate(64);
    assert_eq!(a.len(), 32);
    assert_eq!(b.len(), 32);
    assert_eq!(c.len(), 48);
    assert_eq!(d.len(), 64);
    assert!(pools.allocate(65).is_empty());
    assert!(pools.allocate(16).is_empty());

    unsafe {
        pools.deallocate(&mut a);
        pools.deallocate(&mut b);
        pools.deallocate(&mut c);
        pools.deallocate(&mut d);
    }
}

#[test]
fn segregator_with_fallback_covers_all_sizes() {
    // Small requests hit the bucketized pools, everything else the system
    // heap; the fallback catches what the pools reject (sizes 1..17).
    let pools = Bucketizer::new(17, 64, 16, |lo, hi| {
        Freelist::with_bounds(SystemAllocator::new(), lo, hi).unwrap()
    })
    .unwrap();
    let alloc = FallbackAllocator::new(pools, SystemAllocator::new());

    let mut tiny = alloc.allocate(4);
    let mut pooled = alloc.allocate(40);
    let mut big = alloc.allocate(4096);
    assert!(!tiny.is_empty());
    assert_eq!(pooled.len(), 48);
    assert_eq!(big.len(), 4096);
    assert!(alloc.primary().owns(&pooled));
    assert!(!alloc.primary().owns(&big));

    unsafe {
        alloc.deallocate(&mut tiny);
        alloc.deallocate(&mut pooled);
        alloc.deallocate(&mut big);
    }
}

#[test]
fn cross_move_preserves_min_of_old_and_new() {
    let split: Segregator<64, StackAllocator<1024>, SystemAllocator> =
        Segregator::new(StackAllocator::new(), SystemAllocator::new());

    let mut b = split.allocate(64);
    for i in 0..64 {
        unsafe { *b.ptr().add(i) = i as u8 };
    }
    // Cross the threshold upward: content moves to the large side.
    assert!(unsafe { split.reallocate(&mut b, 200) });
    for i in 0..64 {
        assert_eq!(unsafe { *b.ptr().add(i) }, i as u8);
    }
    // And back down: the first 64 bytes survive again (40 kept).
    assert!(unsafe { split.reallocate(&mut b, 40) });
    for i in 0..40 {
        assert_eq!(unsafe { *b.ptr().add(i) }, i as u8);
    }
    unsafe { split.deallocate(&mut b) };
}

#[test]
fn tracked_composition_counts_the_whole_stack() {
    let tracked = TrackedAllocator::new(
        Bucketizer::new(17, 64, 16, |lo, hi| {
            Freelist::with_bounds(SystemAllocator::new(), lo, hi).unwrap()
        })
        .unwrap(),
    );

    let mut a = tracked.allocate(20);
    let mut b = tracked.allocate(50);
    assert!(tracked.allocate(300).is_empty());

    let stats = tracked.stats();
    assert_eq!(stats.allocations, 2);
    assert_eq!(stats.failures, 1);
    assert_eq!(stats.live_bytes, 32 + 64);

    unsafe {
        tracked.deallocate(&mut a);
        tracked.deallocate(&mut b);
    }
    assert_eq!(tracked.stats().live_bytes, 0);
    assert_eq!(tracked.stats().peak_bytes, 96);
}

#[test]
fn dropping_a_composition_releases_pooled_memory() {
    // Freelists hand pooled blocks back to their parent on drop; this just
    // must not crash or double-free under a composite.
    let pools = Bucketizer::new(17, 64, 16, |lo, hi| {
        Freelist::with_bounds(SystemAllocator::new(), lo, hi).unwrap()
    })
    .unwrap();
    let mut blocks: Vec<Block> = (0..32).map(|i| pools.allocate(17 + (i % 48))).collect();
    for b in blocks.iter_mut() {
        unsafe { pools.deallocate(b) };
    }
    drop(pools);
}
