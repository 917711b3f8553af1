//! Commit ceiling enforcement.
//!
//! [`CommitLimiter`] is the single source of truth for how many words may
//! still be committed. It is lock-free so contexts sharing one limiter do
//! not serialize on it, and it never blocks: callers see success or
//! failure immediately.

use std::sync::atomic::{AtomicUsize, Ordering};

/// Atomic counter of committed words with an optional ceiling.
#[derive(Debug)]
pub struct CommitLimiter {
    committed: AtomicUsize,
    /// Ceiling in words; zero means unlimited.
    limit: usize,
}

// Compile-time assertion: CommitLimiter must be Send + Sync.
const _: fn() = || {
    fn assert<T: Send + Sync>() {}
    assert::<CommitLimiter>();
};

impl CommitLimiter {
    /// Create a limiter with the given ceiling. Zero means unlimited.
    pub fn new(limit_words: usize) -> Self {
        Self {
            committed: AtomicUsize::new(0),
            limit: limit_words,
        }
    }

    /// Create a limiter without a ceiling.
    pub fn unlimited() -> Self {
        Self::new(0)
    }

    /// Atomically add `words` if that keeps the total within the ceiling.
    ///
    /// Returns `false` and leaves the counter untouched otherwise.
    pub fn try_commit(&self, words: usize) -> bool {
        let ceiling = self.ceiling();
        self.committed
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                current
                    .checked_add(words)
                    .filter(|&total| total <= ceiling)
            })
            .is_ok()
    }

    /// Atomically subtract `words`.
    ///
    /// # Panics
    ///
    /// Panics if more words are uncommitted than were ever committed.
    pub fn uncommit(&self, words: usize) {
        let result = self
            .committed
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                current.checked_sub(words)
            });
        invariant!(
            result.is_ok(),
            "commit limiter underflow: uncommitting {words} words, {} committed",
            self.committed_words()
        );
    }

    /// Words currently committed against this limiter.
    pub fn committed_words(&self) -> usize {
        self.committed.load(Ordering::Acquire)
    }

    /// The configured ceiling; zero means unlimited.
    pub fn limit_words(&self) -> usize {
        self.limit
    }

    /// Whether a ceiling is in force.
    pub fn is_limited(&self) -> bool {
        self.limit != 0
    }

    /// Words that could still be committed right now.
    pub fn possible_expansion_words(&self) -> usize {
        self.ceiling().saturating_sub(self.committed_words())
    }

    fn ceiling(&self) -> usize {
        if self.limit == 0 {
            usize::MAX
        } else {
            self.limit
        }
    }
}

impl Default for CommitLimiter {
    fn default() -> Self {
        Self::unlimited()
    }
}
