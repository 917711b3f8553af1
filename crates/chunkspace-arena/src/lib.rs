//! Chunk-based metadata allocation.
//!
//! Supplies word-granular memory for runtime metadata outside any
//! garbage-collected heap, under a hard cap on committed memory.
//!
//! # Architecture
//!
//! ```text
//! Context (one per allocation domain, Arc-shared)
//! ├── Mutex<ChunkManager>                 ← context lock ("expand lock")
//! │   ├── VirtualSpaceList → VirtualSpaceNode[]   reserve / commit
//! │   ├── ChunkTable (index-based buddy tree)
//! │   └── free lists × NUM_CHUNK_LEVELS (address ordered)
//! ├── Arc<CommitLimiter>                  ← may be shared between contexts
//! └── Arc<UsageCounters>
//!
//! Arena (one per class-loading unit)
//! ├── Mutex<ArenaState>                   ← arena lock
//! │   ├── chunks, oldest first; the last one is current
//! │   └── FreeBlocks (size-indexed best fit)
//! └── &'static ArenaGrowthPolicy
//! ```
//!
//! Lock order is always arena lock, then context lock. The context lock
//! is only reachable as an [`context::ExpandGuard`], which arena code
//! receives by parameter. The context's arena registry is locked before
//! either, and only by slow verification and arena teardown.
//!
//! # Memory model
//!
//! Address space is simulated: reservations claim ranges of
//! [`WordAddr`](chunkspace_core::WordAddr)s and committing a granule
//! allocates its zeroed backing store. Nothing here touches the OS, and
//! the crate contains no `unsafe` code.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

#[macro_use]
mod invariant;

pub mod arena;
pub mod chunk;
pub mod config;
pub mod context;
pub mod counters;
pub mod free_blocks;
pub mod growth;
pub mod limiter;
pub mod loader;
pub mod manager;
pub mod vspace;

// Public re-exports for the primary API surface.
pub use arena::Arena;
pub use config::{ContextConfig, Settings};
pub use context::{Context, ExpandGuard};
pub use counters::{CounterSnapshot, UsageCounters};
pub use growth::ArenaGrowthPolicy;
pub use limiter::CommitLimiter;
pub use loader::LoaderSpace;
pub use manager::{ChunkManager, PurgeSummary};
