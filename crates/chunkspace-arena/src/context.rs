//! Allocation contexts.
//!
//! A [`Context`] bundles the virtual space, the chunk manager, the commit
//! limiter and the usage counters of one allocation domain. Arenas are
//! created from a context and keep it alive; the shared state goes away
//! with the last arena and the last `Context` handle.
//!
//! # Locking
//!
//! The chunk manager sits behind the context lock. Arena code reaches it
//! only through [`ExpandGuard`], taken while it already holds its own arena
//! lock; the context never takes an arena lock while holding its own. The
//! arena registry has a third lock, always taken first.

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, info};

use chunkspace_core::{AccessError, ArenaId, ClientCategory, ConfigError, VerifyError, WordAddr};
use chunkspace_stats::{ChunkManagerStats, ClmsStats, Scale};

use crate::arena::{Arena, ArenaInner};
use crate::config::{ContextConfig, Settings};
use crate::counters::{CounterSnapshot, UsageCounters};
use crate::limiter::CommitLimiter;
use crate::manager::{ChunkManager, PurgeSummary};
use crate::vspace::VirtualSpaceList;

pub(crate) struct ContextShared {
    name: String,
    settings: Settings,
    expandable: bool,
    limiter: Arc<CommitLimiter>,
    counters: Arc<UsageCounters>,
    manager: Mutex<ChunkManager>,
    arenas: Mutex<ArenaRegistry>,
}

pub(crate) type ArenaRegistry = Vec<(ArenaId, Weak<ArenaInner>)>;

impl Drop for ContextShared {
    fn drop(&mut self) {
        let manager = self.manager.get_mut();
        if !std::thread::panicking() {
            invariant!(
                manager.in_use_count() == 0,
                "{}: context dropped with {} chunk(s) still in use",
                self.name,
                manager.in_use_count()
            );
        }
        debug!(context = %self.name, "context released");
    }
}

/// Handle to an allocation context. Cheap to clone.
#[derive(Clone)]
pub struct Context {
    shared: Arc<ContextShared>,
}

// Compile-time assertion: Context must be Send + Sync.
const _: fn() = || {
    fn assert<T: Send + Sync>() {}
    assert::<Context>();
};

/// Exclusive access to a context's chunk manager.
///
/// With [`Settings::verify_after_ops`] set, dropping the guard runs a deep
/// verification of the manager and panics on the first inconsistency.
pub struct ExpandGuard<'a> {
    manager: MutexGuard<'a, ChunkManager>,
    verify: bool,
}

impl Deref for ExpandGuard<'_> {
    type Target = ChunkManager;

    fn deref(&self) -> &ChunkManager {
        &self.manager
    }
}

impl DerefMut for ExpandGuard<'_> {
    fn deref_mut(&mut self) -> &mut ChunkManager {
        &mut self.manager
    }
}

impl Drop for ExpandGuard<'_> {
    fn drop(&mut self) {
        if self.verify && !std::thread::panicking() {
            let result = self.manager.verify(true);
            invariant!(
                result.is_ok(),
                "{}: verification after operation failed: {:?}",
                self.manager.name(),
                result
            );
        }
    }
}

impl Context {
    /// Create a context with its own commit limiter.
    pub fn create(config: ContextConfig) -> Result<Context, ConfigError> {
        let limiter = Arc::new(CommitLimiter::new(config.commit_limit_words));
        Self::create_with_limiter(config, limiter)
    }

    /// Create a context charging commits to a shared limiter.
    ///
    /// `config.commit_limit_words` is ignored; the limiter's own ceiling
    /// applies.
    pub fn create_with_limiter(
        config: ContextConfig,
        limiter: Arc<CommitLimiter>,
    ) -> Result<Context, ConfigError> {
        config.validate()?;
        let settings = config.settings.clone();
        let counters = Arc::new(UsageCounters::new());
        let vsl = if config.is_expandable() {
            VirtualSpaceList::new_expandable(
                &config.name,
                settings.node_words,
                settings.commit_granule_words,
                Arc::clone(&limiter),
                Arc::clone(&counters),
            )
        } else {
            VirtualSpaceList::new_non_expandable(
                &config.name,
                config.effective_reserve_words(),
                settings.commit_granule_words,
                Arc::clone(&limiter),
                Arc::clone(&counters),
            )
        };
        info!(
            context = %config.name,
            expandable = config.is_expandable(),
            reserve_words = config.effective_reserve_words(),
            commit_limit_words = limiter.limit_words(),
            "context created"
        );
        let manager = ChunkManager::new(&config.name, vsl, settings.clone());
        Ok(Context {
            shared: Arc::new(ContextShared {
                name: config.name,
                expandable: config.reserve_limit_words == 0,
                settings,
                limiter,
                counters,
                manager: Mutex::new(manager),
                arenas: Mutex::new(Vec::new()),
            }),
        })
    }

    /// Create an arena drawing chunks from this context.
    pub fn create_arena(&self, category: ClientCategory, is_class: bool) -> Arena {
        let arena = Arena::new(self.clone(), category, is_class);
        let mut registry = self.shared.arenas.lock();
        registry.retain(|(_, weak)| weak.strong_count() > 0);
        registry.push((arena.id(), arena.downgrade()));
        arena
    }

    /// Drop `id` from the registry, returning the registry still locked.
    pub(crate) fn deregister_arena(
        &self,
        id: ArenaId,
    ) -> MutexGuard<'_, ArenaRegistry> {
        let mut registry = self.shared.arenas.lock();
        registry.retain(|(arena, _)| *arena != id);
        registry
    }

    /// Take the context lock.
    pub(crate) fn lock_expand(&self) -> ExpandGuard<'_> {
        ExpandGuard {
            manager: self.shared.manager.lock(),
            verify: self.shared.settings.verify_after_ops,
        }
    }

    pub(crate) fn usage_counters(&self) -> &UsageCounters {
        &self.shared.counters
    }

    /// Context name.
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Context settings.
    pub fn settings(&self) -> &Settings {
        &self.shared.settings
    }

    /// Whether the context appends reservations on demand.
    pub fn is_expandable(&self) -> bool {
        self.shared.expandable
    }

    /// The limiter commits are charged to.
    pub fn limiter(&self) -> &Arc<CommitLimiter> {
        &self.shared.limiter
    }

    /// Current used / committed / reserved totals.
    pub fn counters(&self) -> CounterSnapshot {
        self.shared.counters.snapshot()
    }

    /// Uncommit free chunks and release free nodes.
    pub fn purge(&self) -> PurgeSummary {
        self.lock_expand().purge()
    }

    /// Free chunks by level.
    pub fn statistics(&self) -> ChunkManagerStats {
        self.lock_expand().statistics()
    }

    fn live_arenas(&self) -> Vec<Arc<ArenaInner>> {
        self.shared
            .arenas
            .lock()
            .iter()
            .filter_map(|(_, weak)| weak.upgrade())
            .collect()
    }

    /// Statistics of every live arena of this context, split by class and
    /// non-class arenas.
    ///
    /// All arena locks are held together, so the result is one point in
    /// time across arenas.
    pub fn arena_statistics(&self) -> ClmsStats {
        let arenas = self.live_arenas();
        let states: Vec<_> = arenas.iter().map(|a| a.lock_state()).collect();
        let mut stats = ClmsStats::default();
        for (arena, state) in arenas.iter().zip(&states) {
            let s = state.statistics();
            if arena.is_class() {
                stats.arena_stats_class.add(&s);
            } else {
                stats.arena_stats_nonclass.add(&s);
            }
        }
        drop(states);
        stats
    }

    /// Check the context's consistency.
    ///
    /// Fast mode checks the chunk manager and virtual space. Slow mode also
    /// checks every live arena against the chunk manager, with every arena
    /// locked, and the used-words counter against the arenas.
    pub fn verify(&self, slow: bool) -> Result<(), VerifyError> {
        if !slow {
            return self.shared.manager.lock().verify(false);
        }
        let registry = self.shared.arenas.lock();
        let arenas: Vec<Arc<ArenaInner>> = registry
            .iter()
            .filter_map(|(_, weak)| weak.upgrade())
            .collect();
        // Arenas that are tearing down still hold counted words.
        let all_live = arenas.len() == registry.len();
        let result = self.verify_arenas(&arenas, all_live);
        drop(registry);
        drop(arenas);
        result
    }

    fn verify_arenas(&self, arenas: &[Arc<ArenaInner>], check_used: bool) -> Result<(), VerifyError> {
        let states: Vec<_> = arenas.iter().map(|a| a.lock_state()).collect();
        let manager = self.shared.manager.lock();
        manager.verify(true)?;
        let mut used = 0;
        for (arena, state) in arenas.iter().zip(&states) {
            arena.verify_locked(state, &manager)?;
            used += state.used_words();
        }
        if check_used && used != self.shared.counters.used_words() {
            return Err(VerifyError::Counter {
                name: "used",
                expected: used,
                actual: self.shared.counters.used_words(),
            });
        }
        Ok(())
    }

    /// Read `len` committed words starting at `addr`.
    pub fn read_words(&self, addr: WordAddr, len: usize) -> Result<Vec<u64>, AccessError> {
        self.shared.manager.lock().vsl().read_words(addr, len)
    }

    /// Write `data` to committed words starting at `addr`.
    pub fn write_words(&self, addr: WordAddr, data: &[u64]) -> Result<(), AccessError> {
        self.shared.manager.lock().vsl_mut().write_words(addr, data)
    }

    /// Render the context: space usage, free chunks and arena usage.
    pub fn print_on(&self, out: &mut dyn fmt::Write, scale: Scale, detailed: bool) -> fmt::Result {
        let arenas = self.arena_statistics();
        self.shared.manager.lock().print_on(out, scale)?;
        let counters = self.counters();
        write!(out, "Used by arenas: ")?;
        chunkspace_stats::scale::write_scaled_words(out, counters.used_words, scale)?;
        writeln!(out)?;
        arenas.print_on(out, scale, detailed)
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("name", &self.shared.name)
            .field("expandable", &self.shared.expandable)
            .field("counters", &self.counters())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chunkspace_core::{MAX_CHUNK_WORD_SIZE, MIN_CHUNK_WORD_SIZE};

    #[test]
    fn invalid_config_is_rejected() {
        let err = Context::create(ContextConfig::non_expandable("t", 10, 0)).unwrap_err();
        assert_eq!(
            err,
            ConfigError::ReserveLimitTooSmall {
                configured: 10,
                minimum: MIN_CHUNK_WORD_SIZE,
            }
        );
    }

    #[test]
    fn non_expandable_reserves_up_front() {
        let ctx = Context::create(ContextConfig::non_expandable("t", 4096, 0)).unwrap();
        assert!(!ctx.is_expandable());
        assert_eq!(ctx.counters().reserved_words, 4096);
        assert_eq!(ctx.counters().committed_words, 0);
        ctx.verify(true).unwrap();
    }

    #[test]
    fn expandable_starts_empty() {
        let ctx = Context::create(ContextConfig::new("t")).unwrap();
        assert!(ctx.is_expandable());
        assert_eq!(ctx.counters(), CounterSnapshot::default());
        let arena = ctx.create_arena(ClientCategory::Standard, false);
        arena.allocate(10).unwrap();
        assert_eq!(ctx.counters().reserved_words, 8 * MAX_CHUNK_WORD_SIZE);
        ctx.verify(true).unwrap();
    }

    #[test]
    fn shared_limiter_spans_contexts() {
        let limiter = Arc::new(CommitLimiter::new(16 * 1024));
        let a = Context::create_with_limiter(ContextConfig::new("a"), limiter.clone()).unwrap();
        let b = Context::create_with_limiter(ContextConfig::new("b"), limiter.clone()).unwrap();
        let arena_a = a.create_arena(ClientCategory::Standard, false);
        let arena_b = b.create_arena(ClientCategory::Standard, false);
        arena_a.allocate(10).unwrap();
        arena_b.allocate(10).unwrap();
        assert_eq!(limiter.committed_words(), 16 * 1024);
        let arena_c = a.create_arena(ClientCategory::Standard, false);
        assert!(arena_c.allocate(8 * 1024).unwrap_err().is_out_of_memory());
    }

    #[test]
    fn print_mentions_context_and_usage() {
        let ctx = Context::create(ContextConfig::new("printing")).unwrap();
        let arena = ctx.create_arena(ClientCategory::Standard, false);
        arena.allocate(100).unwrap();
        let mut out = String::new();
        ctx.print_on(&mut out, Scale::Words, true).unwrap();
        assert!(out.contains("Context 'printing'"), "{out}");
        assert!(out.contains("Used by arenas: 100 words"), "{out}");
        assert!(out.contains("Non-class space:"), "{out}");
    }

    #[test]
    fn arena_statistics_cover_every_arena() {
        let ctx = Context::create(ContextConfig::new("t")).unwrap();
        let a = ctx.create_arena(ClientCategory::Standard, false);
        let b = ctx.create_arena(ClientCategory::Reflection, false);
        let c = ctx.create_arena(ClientCategory::Standard, true);
        a.allocate(100).unwrap();
        b.allocate(30).unwrap();
        c.allocate(7).unwrap();
        let stats = ctx.arena_statistics();
        assert_eq!(stats.arena_stats_nonclass.totals().num, 2);
        assert_eq!(stats.arena_stats_nonclass.totals().used_words, 130);
        assert_eq!(stats.arena_stats_class.totals().used_words, 7);
        assert_eq!(stats.totals().totals().used_words, ctx.counters().used_words);
        stats.verify().unwrap();
    }

    #[test]
    fn arena_drop_deregisters() {
        let ctx = Context::create(ContextConfig::new("t")).unwrap();
        let arena = ctx.create_arena(ClientCategory::Reflection, true);
        arena.allocate(3).unwrap();
        assert_eq!(ctx.arena_statistics().arena_stats_class.totals().num, 1);
        drop(arena);
        assert_eq!(ctx.counters().used_words, 0);
        assert_eq!(ctx.arena_statistics(), ClmsStats::default());
        assert!(ctx.shared.arenas.lock().is_empty());
        ctx.verify(true).unwrap();
    }
}
