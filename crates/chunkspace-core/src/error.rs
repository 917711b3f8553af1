//! Error types for chunkspace.
//!
//! Organized by how the caller is expected to react:
//!
//! - [`AllocFailure`]: capacity exhaustion. Recoverable; the arena's client
//!   decides whether running out of metadata space is fatal for it.
//! - [`UsageError`]: programmer errors, rejected immediately.
//! - [`ConfigError`]: invalid construction parameters.
//! - [`AccessError`]: reads or writes through a context that hit
//!   unreserved or uncommitted words.
//! - [`VerifyError`]: first inconsistency found by a `verify()` pass.
//!
//! Invariant violations (corrupted chunk state, counter underflow) are not
//! represented here: they panic after logging a diagnostic dump.

use std::error::Error;
use std::fmt;

use crate::id::{ChunkId, NodeId};
use crate::word::WordAddr;

/// Why an allocation could not be satisfied.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AllocFailure {
    /// Committing more memory would exceed the commit ceiling.
    CommitLimitReached {
        /// Words the failing commit asked for.
        requested_words: usize,
        /// The ceiling in words.
        limit_words: usize,
    },
    /// No free chunk is large enough and no further address space can be
    /// reserved.
    ReserveExhausted {
        /// Size in words of the chunk that could not be produced.
        requested_words: usize,
        /// Words currently reserved by the context.
        reserved_words: usize,
    },
    /// The request is larger than a root chunk and can never be satisfied.
    TooLarge {
        /// Requested size in words.
        requested_words: usize,
    },
}

impl fmt::Display for AllocFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CommitLimitReached {
                requested_words,
                limit_words,
            } => write!(
                f,
                "commit limit reached: {requested_words} words requested, limit {limit_words} words"
            ),
            Self::ReserveExhausted {
                requested_words,
                reserved_words,
            } => write!(
                f,
                "address space exhausted: chunk of {requested_words} words unavailable, \
                 {reserved_words} words reserved"
            ),
            Self::TooLarge { requested_words } => {
                write!(f, "request of {requested_words} words exceeds a root chunk")
            }
        }
    }
}

impl Error for AllocFailure {}

/// Caller misuse of the allocation API.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UsageError {
    /// `allocate(0)`.
    ZeroSize,
    /// The span does not lie inside the used part of a chunk owned by this
    /// arena.
    ForeignSpan {
        /// Start of the span.
        addr: WordAddr,
        /// Length of the span in words.
        words: usize,
    },
    /// The span overlaps a block already on the free-block list.
    DoubleFree {
        /// Start of the span.
        addr: WordAddr,
        /// Length of the span in words.
        words: usize,
    },
}

impl fmt::Display for UsageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ZeroSize => write!(f, "zero-sized allocation"),
            Self::ForeignSpan { addr, words } => {
                write!(f, "span {addr}+{words} was not allocated by this arena")
            }
            Self::DoubleFree { addr, words } => {
                write!(f, "span {addr}+{words} overlaps an already freed block")
            }
        }
    }
}

impl Error for UsageError {}

/// Errors returned by arena allocate/deallocate.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ArenaError {
    /// Capacity exhaustion.
    Alloc(AllocFailure),
    /// Caller misuse.
    Usage(UsageError),
}

impl ArenaError {
    /// Whether this is a capacity failure rather than misuse.
    pub fn is_out_of_memory(&self) -> bool {
        matches!(self, Self::Alloc(_))
    }
}

impl fmt::Display for ArenaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Alloc(e) => write!(f, "allocation failed: {e}"),
            Self::Usage(e) => write!(f, "usage error: {e}"),
        }
    }
}

impl Error for ArenaError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Alloc(e) => Some(e),
            Self::Usage(e) => Some(e),
        }
    }
}

impl From<AllocFailure> for ArenaError {
    fn from(e: AllocFailure) -> Self {
        Self::Alloc(e)
    }
}

impl From<UsageError> for ArenaError {
    fn from(e: UsageError) -> Self {
        Self::Usage(e)
    }
}

/// Invalid context configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConfigError {
    /// The reserve limit cannot hold even one minimal chunk.
    ReserveLimitTooSmall {
        /// The configured limit in words.
        configured: usize,
        /// The smallest acceptable limit in words.
        minimum: usize,
    },
    /// Commit granule is not a power of two within chunk bounds.
    InvalidCommitGranule {
        /// The configured granule in words.
        configured: usize,
    },
    /// Expandable node size is not a positive multiple of the root chunk.
    InvalidNodeSize {
        /// The configured node size in words.
        configured: usize,
    },
    /// A context name was empty.
    EmptyName,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReserveLimitTooSmall {
                configured,
                minimum,
            } => write!(
                f,
                "reserve limit of {configured} words is below the minimum of {minimum} words"
            ),
            Self::InvalidCommitGranule { configured } => write!(
                f,
                "commit granule of {configured} words must be a power of two between \
                 the smallest and largest chunk size"
            ),
            Self::InvalidNodeSize { configured } => write!(
                f,
                "node size of {configured} words must be a positive multiple of the root chunk size"
            ),
            Self::EmptyName => write!(f, "context name must not be empty"),
        }
    }
}

impl Error for ConfigError {}

/// A read or write through a context touched memory it may not.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AccessError {
    /// The address is not inside any reserved node.
    Unreserved {
        /// First offending address.
        addr: WordAddr,
    },
    /// The address is reserved but its granule is not committed.
    Uncommitted {
        /// First offending address.
        addr: WordAddr,
    },
}

impl fmt::Display for AccessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unreserved { addr } => write!(f, "address {addr} is not reserved"),
            Self::Uncommitted { addr } => write!(f, "address {addr} is not committed"),
        }
    }
}

impl Error for AccessError {}

/// First inconsistency found by a verification pass.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum VerifyError {
    /// A chunk header is inconsistent with its tree, free list or node.
    Chunk {
        /// The offending chunk.
        chunk: ChunkId,
        /// What is wrong.
        reason: String,
    },
    /// A node's commit bookkeeping is inconsistent.
    Node {
        /// The offending node.
        node: NodeId,
        /// What is wrong.
        reason: String,
    },
    /// Arena-local state (chunk list, free blocks) is inconsistent.
    Arena {
        /// What is wrong.
        reason: String,
    },
    /// A running counter disagrees with the authoritative state.
    Counter {
        /// Counter name.
        name: &'static str,
        /// Value derived from authoritative state.
        expected: usize,
        /// Value the counter holds.
        actual: usize,
    },
    /// A statistics record violates its accounting identity.
    Stats {
        /// What is wrong.
        reason: String,
    },
}

impl fmt::Display for VerifyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Chunk { chunk, reason } => write!(f, "{chunk}: {reason}"),
            Self::Node { node, reason } => write!(f, "{node}: {reason}"),
            Self::Arena { reason } => write!(f, "arena: {reason}"),
            Self::Counter {
                name,
                expected,
                actual,
            } => write!(f, "counter {name}: expected {expected}, found {actual}"),
            Self::Stats { reason } => write!(f, "statistics: {reason}"),
        }
    }
}

impl Error for VerifyError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arena_error_wraps_sources() {
        let e: ArenaError = AllocFailure::TooLarge {
            requested_words: 10,
        }
        .into();
        assert!(e.is_out_of_memory());
        assert!(e.source().is_some());

        let u: ArenaError = UsageError::ZeroSize.into();
        assert!(!u.is_out_of_memory());
        assert_eq!(u.to_string(), "usage error: zero-sized allocation");
    }

    #[test]
    fn commit_limit_message_names_limit() {
        let e = AllocFailure::CommitLimitReached {
            requested_words: 8192,
            limit_words: 4096,
        };
        assert!(e.to_string().contains("limit 4096 words"));
    }
}
