//! Allocation-path benchmarks
//!
//! Compares the hot paths of the main building blocks against the system
//! heap baseline: pooled freelist hits, chunk-heap single-register
//! allocations, and the shared chunk heap's CAS fast path.

use criterion::{criterion_group, criterion_main, Criterion};

use blockalloc::{
    BlockAllocator, Bucketizer, ChunkHeap, Freelist, SharedChunkHeap, SystemAllocator,
};

fn alloc_free_cycle(c: &mut Criterion) {
    let mut group = c.benchmark_group("alloc_free_64b");

    let sys = SystemAllocator::new();
    group.bench_function("system", |b| {
        b.iter(|| {
            let mut blk = sys.allocate(64);
            unsafe { sys.deallocate(&mut blk) };
        })
    });

    let freelist = Freelist::with_bounds(SystemAllocator::new(), 1, 64).unwrap();
    group.bench_function("freelist", |b| {
        b.iter(|| {
            let mut blk = freelist.allocate(64);
            unsafe { freelist.deallocate(&mut blk) };
        })
    });

    let heap = ChunkHeap::new(SystemAllocator::new(), 4096, 64).unwrap();
    group.bench_function("chunk_heap", |b| {
        b.iter(|| {
            let mut blk = heap.allocate(64);
            unsafe { heap.deallocate(&mut blk) };
        })
    });

    let shared = SharedChunkHeap::new(SystemAllocator::new(), 4096, 64).unwrap();
    group.bench_function("shared_chunk_heap", |b| {
        b.iter(|| {
            let mut blk = shared.allocate(64);
            unsafe { shared.deallocate(&mut blk) };
        })
    });

    group.finish();
}

fn bucketized_routing(c: &mut Criterion) {
    let pools = Bucketizer::new(17, 64, 16, |lo, hi| {
        Freelist::with_bounds(SystemAllocator::new(), lo, hi).unwrap()
    })
    .unwrap();

    c.bench_function("bucketizer_route_and_pool", |b| {
        let mut size = 17usize;
        b.iter(|| {
            let mut blk = pools.allocate(size);
            unsafe { pools.deallocate(&mut blk) };
            size = 17 + (size + 13) % 48;
        })
    });
}

fn multi_chunk_spans(c: &mut Criterion) {
    let heap = ChunkHeap::new(SystemAllocator::new(), 4096, 64).unwrap();
    c.bench_function("chunk_heap_span_10_chunks", |b| {
        b.iter(|| {
            let mut blk = heap.allocate(640);
            unsafe { heap.deallocate(&mut blk) };
        })
    });
}

criterion_group!(benches, alloc_free_cycle, bucketized_routing, multi_chunk_spans);
criterion_main!(benches);
