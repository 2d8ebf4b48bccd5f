//! Composable block-based memory allocators
//!
//! This crate provides a toolkit of small allocator policies that nest and
//! combine into allocators tuned to an application's allocation profile:
//!
//! - [`Block`]: the non-owning `(pointer, length)` descriptor every allocator
//!   speaks
//! - [`BlockAllocator`] and the optional capabilities [`Owns`], [`Expand`],
//!   [`DeallocateAll`]: the contract composites route through
//! - routing policies: [`FallbackAllocator`], [`Segregator`], [`Bucketizer`]
//! - pooling and growth: [`Freelist`]/[`SharedFreelist`],
//!   [`CascadingAllocator`]/[`SharedCascadingAllocator`]
//! - instrumentation: [`AffixAllocator`] with [`CorruptionGuard`],
//!   [`TrackedAllocator`]
//! - arenas: [`ChunkHeap`]/[`SharedChunkHeap`] (bitmap-indexed chunk heap),
//!   [`StackAllocator`]
//! - leaves: [`SystemAllocator`], [`AlignedAllocator`], [`NullAllocator`]
//!
//! Capacity exhaustion is reported as an empty block or a `false` return;
//! errors are reserved for construction and configuration. Blocks are never
//! freed implicitly: lifetime is entirely the caller's responsibility.
//!
//! # Example
//!
//! ```
//! use blockalloc::{BlockAllocator, Bucketizer, FallbackAllocator, Freelist, SystemAllocator};
//!
//! // Pooled size classes 17..=64 in steps of 16, system heap behind them.
//! let pools = Bucketizer::new(17, 64, 16, |lo, hi| {
//!     Freelist::with_bounds(SystemAllocator::new(), lo, hi).unwrap()
//! })
//! .unwrap();
//! let alloc = FallbackAllocator::new(pools, SystemAllocator::new());
//!
//! let mut block = alloc.allocate(20);
//! assert_eq!(block.len(), 32); // served by the [17, 32] pool
//! unsafe { alloc.deallocate(&mut block) };
//! ```

#![warn(missing_docs)]

pub mod affix;
pub mod block;
pub mod bound;
pub mod bucketizer;
pub mod cascading;
pub mod error;
pub mod fallback;
pub mod freelist;
pub mod heap;
pub mod null;
pub mod realloc;
pub mod segregator;
pub mod stack;
pub mod system;
pub mod tracked;
pub mod traits;
pub mod utils;

pub use affix::{AffixAllocator, CorruptionGuard};
pub use block::Block;
pub use bound::Bound;
pub use bucketizer::Bucketizer;
pub use cascading::{CascadingAllocator, SharedCascadingAllocator};
pub use error::{AllocError, AllocResult};
pub use fallback::FallbackAllocator;
pub use freelist::{Freelist, SharedFreelist};
pub use heap::{ChunkHeap, SharedChunkHeap};
pub use null::NullAllocator;
pub use segregator::Segregator;
pub use stack::StackAllocator;
pub use system::{AlignedAllocator, SystemAllocator};
pub use tracked::{AllocatorStats, TrackedAllocator};
pub use traits::{BlockAllocator, DeallocateAll, Expand, Owns};
