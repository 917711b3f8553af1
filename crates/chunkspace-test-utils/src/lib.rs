//! Test harness for chunkspace development.
//!
//! [`TestContext`] builds a context that deep-verifies itself after every
//! operation. [`TestArena`] wraps an arena, fills every span it hands out
//! with a recognizable pattern and tracks the live spans, so tests can
//! check contents and tear down cleanly. [`workload`] produces seeded
//! allocation sizes.

#![forbid(unsafe_code)]
#![allow(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod workload;

use std::ops::Deref;

use chunkspace_arena::{Arena, Context, ContextConfig, Settings};
use chunkspace_core::{ArenaError, ClientCategory, WordAddr};

/// Install a `tracing` subscriber writing to the test output.
///
/// Honors `RUST_LOG`; safe to call from every test.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A context with `verify_after_ops` forced on.
pub struct TestContext {
    ctx: Context,
}

impl TestContext {
    pub fn from_config(config: ContextConfig) -> Self {
        init_tracing();
        let settings = Settings {
            verify_after_ops: true,
            ..config.settings.clone()
        };
        let ctx = Context::create(config.with_settings(settings))
            .unwrap_or_else(|e| panic!("test context rejected: {e}"));
        Self { ctx }
    }

    pub fn expandable(name: &str) -> Self {
        Self::from_config(ContextConfig::new(name))
    }

    pub fn expandable_limited(name: &str, commit_limit_words: usize) -> Self {
        Self::from_config(ContextConfig::expandable(name, commit_limit_words))
    }

    pub fn non_expandable(name: &str, reserve_words: usize, commit_limit_words: usize) -> Self {
        Self::from_config(ContextConfig::non_expandable(
            name,
            reserve_words,
            commit_limit_words,
        ))
    }

    pub fn context(&self) -> &Context {
        &self.ctx
    }

    pub fn arena(&self, category: ClientCategory, is_class: bool) -> TestArena {
        TestArena::new(self.ctx.create_arena(category, is_class), self.ctx.clone())
    }

    /// Deep verification; panics with the first inconsistency.
    pub fn check(&self) {
        if let Err(e) = self.ctx.verify(true) {
            panic!("context '{}' failed verification: {e}", self.ctx.name());
        }
        let counters = self.ctx.counters();
        assert!(counters.used_words <= counters.committed_words);
        assert!(counters.committed_words <= counters.reserved_words);
    }
}

impl Deref for TestContext {
    type Target = Context;

    fn deref(&self) -> &Context {
        &self.ctx
    }
}

/// A live allocation made through a [`TestArena`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Span {
    pub addr: WordAddr,
    pub words: usize,
    pub pattern: u64,
}

impl Span {
    fn expected(&self) -> Vec<u64> {
        (0..self.words as u64).map(|i| self.pattern ^ i).collect()
    }
}

/// An arena whose spans are pattern-filled and tracked.
pub struct TestArena {
    arena: Arena,
    ctx: Context,
    live: Vec<Span>,
    next_pattern: u64,
}

impl TestArena {
    pub fn new(arena: Arena, ctx: Context) -> Self {
        Self {
            arena,
            ctx,
            live: Vec::new(),
            next_pattern: 0x5eed_0000_0000_0000,
        }
    }

    pub fn arena(&self) -> &Arena {
        &self.arena
    }

    /// Allocate, fill with a fresh pattern and track the span.
    pub fn allocate(&mut self, words: usize) -> Result<Span, ArenaError> {
        let addr = self.arena.allocate(words)?;
        self.next_pattern += 1 << 20;
        let span = Span {
            addr,
            words,
            pattern: self.next_pattern,
        };
        self.ctx
            .write_words(addr, &span.expected())
            .unwrap_or_else(|e| panic!("allocated span {addr}+{words} not writable: {e}"));
        self.live.push(span);
        Ok(span)
    }

    /// Deallocate the `index`-th live span (swap-remove order).
    pub fn deallocate_at(&mut self, index: usize) -> Span {
        let span = self.live.swap_remove(index);
        self.arena
            .deallocate(span.addr, span.words)
            .unwrap_or_else(|e| panic!("deallocating {span:?}: {e}"));
        span
    }

    pub fn deallocate_all(&mut self) {
        while !self.live.is_empty() {
            self.deallocate_at(self.live.len() - 1);
        }
    }

    /// Check every live span still holds its pattern.
    pub fn check_contents(&self) {
        for span in &self.live {
            let actual = self
                .ctx
                .read_words(span.addr, span.words)
                .unwrap_or_else(|e| panic!("reading {span:?}: {e}"));
            assert_eq!(actual, span.expected(), "span {span:?} was overwritten");
        }
    }

    pub fn live(&self) -> &[Span] {
        &self.live
    }

    pub fn live_words(&self) -> usize {
        self.live.iter().map(|s| s.words).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spans_keep_their_patterns() {
        let ctx = TestContext::expandable("harness");
        let mut arena = ctx.arena(ClientCategory::Standard, false);
        for words in [1, 7, 300] {
            arena.allocate(words).unwrap();
        }
        arena.check_contents();
        assert_eq!(arena.live_words(), 308);
        assert_eq!(arena.arena().used_words(), 308);
        arena.deallocate_all();
        assert_eq!(ctx.counters().used_words, 0);
        ctx.check();
    }
}
