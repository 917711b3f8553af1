//! Chunkspace: chunk-managed arena allocation for runtime metadata.
//!
//! This is the top-level facade crate that re-exports the public API from
//! the chunkspace sub-crates. Most users only need this one dependency.
//!
//! # Quick start
//!
//! ```rust
//! use chunkspace::prelude::*;
//!
//! // An expandable context capped at 4 Mi committed words.
//! let ctx = Context::create(ContextConfig::expandable("metadata", 4 * 1024 * 1024)).unwrap();
//!
//! // One arena per class-loading unit.
//! let arena = ctx.create_arena(ClientCategory::Standard, false);
//! let addr = arena.allocate(24).unwrap();
//! ctx.write_words(addr, &[7; 24]).unwrap();
//!
//! // Freed spans are reused by the same arena.
//! arena.deallocate(addr, 24).unwrap();
//! assert_eq!(arena.allocate(24).unwrap(), addr);
//!
//! // Dropping the arena hands its chunks back to the context.
//! drop(arena);
//! assert_eq!(ctx.counters().used_words, 0);
//! ctx.verify(true).unwrap();
//! ```
//!
//! # Modules
//!
//! | Module | Sub-crate | Contents |
//! |--------|-----------|----------|
//! | [`types`] | `chunkspace-core` | Word addresses, chunk levels, IDs, errors |
//! | [`stats`] | `chunkspace-stats` | Statistics snapshots and text reports |
//! | [`arena`] | `chunkspace-arena` | Contexts, chunk manager, arenas, loader spaces |

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

/// Core types (`chunkspace-core`).
///
/// Contains [`types::WordAddr`], [`types::ChunkLevel`], the client
/// categories and the error enums shared by all layers.
pub use chunkspace_core as types;

/// Statistics snapshots (`chunkspace-stats`).
///
/// [`stats::ChunkManagerStats`] for contexts, [`stats::ArenaStats`] and
/// [`stats::ClmsStats`] for arenas and loader spaces.
pub use chunkspace_stats as stats;

/// Contexts and arenas (`chunkspace-arena`).
///
/// [`arena::Context`] owns the address space and chunk manager;
/// [`arena::Arena`] allocates from chunks it obtains there.
pub use chunkspace_arena as arena;

/// Common imports for typical chunkspace usage.
///
/// ```rust
/// use chunkspace::prelude::*;
/// ```
pub mod prelude {
    // Core types
    pub use chunkspace_core::{ChunkLevel, ClientCategory, MetadataType, WordAddr};

    // Errors
    pub use chunkspace_core::{AccessError, AllocFailure, ArenaError, ConfigError, UsageError, VerifyError};

    // Statistics
    pub use chunkspace_stats::{ArenaStats, ChunkManagerStats, ClmsStats, Scale};

    // Contexts and arenas
    pub use chunkspace_arena::{
        Arena, CommitLimiter, Context, ContextConfig, LoaderSpace, Settings,
    };
}
