//! Benchmark profiles for the chunkspace allocator.
//!
//! Provides pre-built contexts and request traces:
//!
//! - [`reference_context`]: expandable, unlimited, default settings
//! - [`loader_trace`]: seeded request sizes shaped like class metadata
//! - [`churn_trace`]: seeded allocate/free interleavings

#![forbid(unsafe_code)]
#![deny(rustdoc::broken_intra_doc_links)]

use chunkspace_arena::{Context, ContextConfig};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// An expandable, unlimited context with default settings.
pub fn reference_context(name: &str) -> Context {
    match Context::create(ContextConfig::new(name)) {
        Ok(ctx) => ctx,
        Err(e) => panic!("default context rejected: {e}"),
    }
}

/// `n` request sizes: mostly small records, a few method bodies and tables.
pub fn loader_trace(n: usize, seed: u64) -> Vec<usize> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    (0..n)
        .map(|_| match rng.random_range(0..100) {
            0..=69 => rng.random_range(2..=16),
            70..=94 => rng.random_range(17..=256),
            _ => rng.random_range(257..=4096),
        })
        .collect()
}

/// One step of a churn trace.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChurnOp {
    /// Allocate this many words.
    Allocate(usize),
    /// Free the live span at this index (modulo the live count).
    Free(usize),
}

/// `n` interleaved allocations and frees, roughly two allocations per free.
pub fn churn_trace(n: usize, seed: u64) -> Vec<ChurnOp> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    (0..n)
        .map(|_| {
            if rng.random_range(0..3) == 0 {
                ChurnOp::Free(rng.random_range(0..usize::MAX))
            } else {
                ChurnOp::Allocate(rng.random_range(1..=128))
            }
        })
        .collect()
}
