//! Statistics snapshots for chunkspace.
//!
//! These are plain value types filled in by the allocator crates and
//! consumed by monitoring code:
//!
//! ```text
//! ClmsStats
//! ├── ArenaStats (non-class)
//! │   └── InUseChunkStats × NUM_CHUNK_LEVELS
//! └── ArenaStats (class)
//!
//! ChunkManagerStats (free chunks per level)
//! ```
//!
//! Every record can be summed with `add()`, checked with `verify()` and
//! rendered with `print_on()` at a chosen [`Scale`]. Rendering is for
//! humans and not meant to be parsed.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod arena;
pub mod chunk;
pub mod manager;
pub mod scale;

pub use arena::{ArenaStats, ClmsStats};
pub use chunk::InUseChunkStats;
pub use manager::ChunkManagerStats;
pub use scale::Scale;
