//! Core types for the chunkspace metadata allocator.
//!
//! This is the leaf crate with zero internal dependencies. It defines
//! the vocabulary shared by the rest of the workspace: word addresses,
//! chunk levels and their geometry, client categories, identifiers and
//! error types.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod category;
pub mod error;
pub mod id;
pub mod level;
pub mod word;

pub use category::{ClientCategory, MetadataType};
pub use error::{AccessError, AllocFailure, ArenaError, ConfigError, UsageError, VerifyError};
pub use id::{ArenaId, ChunkId, NodeId};
pub use level::{ChunkLevel, MAX_CHUNK_WORD_SIZE, MIN_CHUNK_WORD_SIZE, NUM_CHUNK_LEVELS};
pub use word::{WordAddr, BYTES_PER_WORD, MIN_BLOCK_WORDS};
