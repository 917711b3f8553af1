//! Running usage counters.
//!
//! [`UsageCounters`] are updated on the allocation paths and read without
//! any lock by monitoring code. They are informational only: the chunk
//! manager and arena state stay authoritative, and `verify(true)` checks
//! the counters against them.

use std::sync::atomic::{AtomicUsize, Ordering};

/// Atomic used / committed / reserved word totals for one context.
#[derive(Debug, Default)]
pub struct UsageCounters {
    used: AtomicUsize,
    committed: AtomicUsize,
    reserved: AtomicUsize,
}

/// A point-in-time copy of [`UsageCounters`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CounterSnapshot {
    /// Words handed out to arena clients and not deallocated.
    pub used_words: usize,
    /// Words committed by the context's virtual space.
    pub committed_words: usize,
    /// Words reserved by the context's virtual space.
    pub reserved_words: usize,
}

fn sub(counter: &AtomicUsize, words: usize, name: &str) {
    let result = counter.fetch_update(Ordering::AcqRel, Ordering::Acquire, |v| v.checked_sub(words));
    invariant!(
        result.is_ok(),
        "{name} counter underflow: subtracting {words} from {}",
        counter.load(Ordering::Acquire)
    );
}

impl UsageCounters {
    /// All counters at zero.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn add_used(&self, words: usize) {
        self.used.fetch_add(words, Ordering::AcqRel);
    }

    pub(crate) fn sub_used(&self, words: usize) {
        sub(&self.used, words, "used");
    }

    pub(crate) fn add_committed(&self, words: usize) {
        self.committed.fetch_add(words, Ordering::AcqRel);
    }

    pub(crate) fn sub_committed(&self, words: usize) {
        sub(&self.committed, words, "committed");
    }

    pub(crate) fn add_reserved(&self, words: usize) {
        self.reserved.fetch_add(words, Ordering::AcqRel);
    }

    pub(crate) fn sub_reserved(&self, words: usize) {
        sub(&self.reserved, words, "reserved");
    }

    /// Words in use by arena clients.
    pub fn used_words(&self) -> usize {
        self.used.load(Ordering::Acquire)
    }

    /// Committed words.
    pub fn committed_words(&self) -> usize {
        self.committed.load(Ordering::Acquire)
    }

    /// Reserved words.
    pub fn reserved_words(&self) -> usize {
        self.reserved.load(Ordering::Acquire)
    }

    /// Read all three counters.
    ///
    /// Each value is read atomically, but the three reads are not one
    /// transaction.
    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            used_words: self.used_words(),
            committed_words: self.committed_words(),
            reserved_words: self.reserved_words(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_then_sub_restores() {
        let c = UsageCounters::new();
        c.add_used(10);
        c.add_committed(8192);
        c.add_reserved(1 << 20);
        c.sub_used(10);
        assert_eq!(
            c.snapshot(),
            CounterSnapshot {
                used_words: 0,
                committed_words: 8192,
                reserved_words: 1 << 20,
            }
        );
    }

    #[test]
    #[should_panic(expected = "used counter underflow")]
    fn negative_used_is_fatal() {
        let c = UsageCounters::new();
        c.add_used(1);
        c.sub_used(2);
    }
}
