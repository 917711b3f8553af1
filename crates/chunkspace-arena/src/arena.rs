//! Arena allocation front end.
//!
//! An [`Arena`] serves one class-loading unit. It owns a list of chunks,
//! the last of which is *current*, and hands out word spans by bumping a
//! pointer through the current chunk. Deallocated spans go to a
//! [`FreeBlocks`] list and are reused before the bump pointer moves.
//!
//! # Allocation order
//!
//! 1. Best fit from the free-block list.
//! 2. Bump allocation in the current chunk, committing on demand.
//! 3. In-place enlargement of the current chunk, if its buddy is free and
//!    the growth policy would not hand out a smaller chunk anyway.
//! 4. A new chunk sized by the growth policy. The committed tail of the
//!    retired current chunk is salvaged onto the free-block list.
//!
//! Chunks are only given back when the arena is dropped.
//!
//! # Accounting
//!
//! ```text
//! per chunk:  committed = live + waste + free
//!             free      = (committed - top) + free blocks inside the chunk
//! ```
//!
//! `live` counts the requested words of outstanding allocations; `waste`
//! counts padding up to [`MIN_BLOCK_WORDS`] and remainders too small to
//! keep on the free-block list.

use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, trace};

use chunkspace_core::{
    AllocFailure, ArenaError, ArenaId, ChunkLevel, ClientCategory, UsageError, VerifyError,
    WordAddr, MAX_CHUNK_WORD_SIZE, MIN_BLOCK_WORDS,
};
use chunkspace_stats::{ArenaStats, InUseChunkStats, Scale};

use crate::chunk::{ChunkState, InUseChunk};
use crate::context::Context;
use crate::free_blocks::FreeBlocks;
use crate::growth::ArenaGrowthPolicy;
use crate::manager::ChunkManager;

/// A chunk owned by an arena, with its bump pointer.
#[derive(Debug)]
struct ArenaChunk {
    chunk: InUseChunk,
    /// Words handed out from the chunk's start, live or not.
    top: usize,
    live_words: usize,
    waste_words: usize,
}

impl ArenaChunk {
    fn contains_used(&self, addr: WordAddr, words: usize) -> bool {
        addr >= self.chunk.base()
            && addr
                .checked_offset(words)
                .is_some_and(|end| end <= self.chunk.base() + self.top)
    }

    fn stats(&self) -> InUseChunkStats {
        let committed = self.chunk.committed_words();
        InUseChunkStats {
            num: 1,
            word_size: self.chunk.word_size(),
            committed_words: committed,
            used_words: self.live_words,
            free_words: committed - self.live_words - self.waste_words,
            waste_words: self.waste_words,
        }
    }
}

/// Arena state guarded by the arena lock.
#[derive(Debug, Default)]
pub(crate) struct ArenaState {
    /// Oldest first; the last one is current.
    chunks: Vec<ArenaChunk>,
    free_blocks: FreeBlocks,
    used_words: usize,
}

impl ArenaState {
    pub(crate) fn used_words(&self) -> usize {
        self.used_words
    }

    fn chunk_index(&self, addr: WordAddr, words: usize) -> Option<usize> {
        self.chunks.iter().position(|c| c.contains_used(addr, words))
    }

    /// Record `words` live words in the chunk holding `addr`.
    fn account(&mut self, index: usize, words: usize, raw: usize) {
        let chunk = &mut self.chunks[index];
        chunk.live_words += words;
        chunk.waste_words += raw - words;
        self.used_words += words;
    }

    fn allocate_from_free_blocks(&mut self, words: usize, raw: usize) -> Option<WordAddr> {
        let (addr, size) = self.free_blocks.remove_block(raw)?;
        let index = self.chunk_index(addr, size);
        invariant!(
            index.is_some(),
            "free block {addr}+{size} lies outside every chunk of its arena"
        );
        let index = index.unwrap_or_default();
        self.account(index, words, raw);
        let remainder = size - raw;
        if remainder >= MIN_BLOCK_WORDS {
            let reinserted = self.free_blocks.add_block(addr + raw, remainder);
            invariant!(
                reinserted.is_ok(),
                "remainder {}+{remainder} overlaps the free-block list",
                addr + raw
            );
        } else {
            self.chunks[index].waste_words += remainder;
        }
        Some(addr)
    }

    pub(crate) fn statistics(&self) -> ArenaStats {
        let mut stats = ArenaStats::default();
        for chunk in &self.chunks {
            stats.stats[chunk.chunk.level().index()].add(&chunk.stats());
        }
        stats.free_blocks_num = self.free_blocks.count();
        stats.free_blocks_word_size = self.free_blocks.total_words();
        stats
    }
}

pub(crate) struct ArenaInner {
    id: ArenaId,
    category: ClientCategory,
    is_class: bool,
    policy: &'static ArenaGrowthPolicy,
    state: Mutex<ArenaState>,
    context: Context,
}

impl ArenaInner {
    pub(crate) fn is_class(&self) -> bool {
        self.is_class
    }

    pub(crate) fn lock_state(&self) -> MutexGuard<'_, ArenaState> {
        self.state.lock()
    }

    pub(crate) fn statistics(&self) -> ArenaStats {
        self.state.lock().statistics()
    }

    /// Check arena state against the chunk manager. Both locks are held.
    pub(crate) fn verify_locked(
        &self,
        state: &ArenaState,
        manager: &ChunkManager,
    ) -> Result<(), VerifyError> {
        let arena_err = |reason: String| {
            Err(VerifyError::Arena {
                reason: format!("{}: {reason}", self.id),
            })
        };
        let mut used = 0;
        for c in &state.chunks {
            let id = c.chunk.id();
            let header = manager.header(id);
            if header.state != ChunkState::InUse
                || header.base != c.chunk.base()
                || header.level != c.chunk.level()
            {
                return arena_err(format!(
                    "{id} is {:?} {} at {} in the manager",
                    header.state, header.level, header.base
                ));
            }
            let actual = manager
                .vsl()
                .committed_prefix(header.node, header.offset, header.word_size());
            if c.chunk.committed_words() > actual {
                return arena_err(format!(
                    "{id} assumes {} committed words, node has {actual}",
                    c.chunk.committed_words()
                ));
            }
            if c.top > c.chunk.committed_words() || c.live_words + c.waste_words > c.top {
                return arena_err(format!(
                    "{id}: top {}, committed {}, live {}, waste {}",
                    c.top,
                    c.chunk.committed_words(),
                    c.live_words,
                    c.waste_words
                ));
            }
            let listed: usize = state
                .free_blocks
                .iter()
                .filter(|&(addr, words)| c.contains_used(addr, words))
                .map(|(_, words)| words)
                .sum();
            if listed != c.top - c.live_words - c.waste_words {
                return arena_err(format!(
                    "{id}: {listed} words on the free-block list, {} unaccounted",
                    c.top - c.live_words - c.waste_words
                ));
            }
            used += c.live_words;
        }
        for (addr, words) in state.free_blocks.iter() {
            if state.chunk_index(addr, words).is_none() {
                return arena_err(format!("free block {addr}+{words} outside every chunk"));
            }
        }
        if used != state.used_words {
            return Err(VerifyError::Counter {
                name: "arena used",
                expected: used,
                actual: state.used_words,
            });
        }
        state.statistics().verify()
    }
}

impl Drop for ArenaInner {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        let registry = self.context.deregister_arena(self.id);
        let chunks = state.chunks.len();
        {
            let mut manager = self.context.lock_expand();
            for c in state.chunks.drain(..) {
                manager.return_chunk(c.chunk);
            }
        }
        self.context.usage_counters().sub_used(state.used_words);
        drop(registry);
        debug!(
            arena = %self.id,
            category = %self.category,
            chunks,
            used_words = state.used_words,
            "arena released"
        );
    }
}

/// Word allocator for one class-loading unit.
///
/// Thread safe; all operations take the arena lock.
pub struct Arena {
    inner: Arc<ArenaInner>,
}

// Compile-time assertion: Arena must be Send + Sync.
const _: fn() = || {
    fn assert<T: Send + Sync>() {}
    assert::<Arena>();
};

impl Arena {
    pub(crate) fn new(context: Context, category: ClientCategory, is_class: bool) -> Self {
        let id = ArenaId::next();
        debug!(arena = %id, context = context.name(), %category, is_class, "arena created");
        Self {
            inner: Arc::new(ArenaInner {
                id,
                category,
                is_class,
                policy: ArenaGrowthPolicy::for_category(category, is_class),
                state: Mutex::new(ArenaState::default()),
                context,
            }),
        }
    }

    pub(crate) fn downgrade(&self) -> Weak<ArenaInner> {
        Arc::downgrade(&self.inner)
    }

    /// Arena id.
    pub fn id(&self) -> ArenaId {
        self.inner.id
    }

    /// Client category.
    pub fn category(&self) -> ClientCategory {
        self.inner.category
    }

    /// Whether this arena serves class metadata.
    pub fn is_class(&self) -> bool {
        self.inner.is_class
    }

    /// The growth schedule in force.
    pub fn growth_policy(&self) -> &'static ArenaGrowthPolicy {
        self.inner.policy
    }

    /// The context chunks come from.
    pub fn context(&self) -> &Context {
        &self.inner.context
    }

    /// Allocate `words` words.
    ///
    /// The span is word aligned and lies in committed memory. Requests
    /// smaller than [`MIN_BLOCK_WORDS`] are padded. Nothing is retried when
    /// memory cannot be found. A failed call hands out no words and leaves
    /// the usage counters alone, but the current chunk may already have
    /// been enlarged in place when the commit limit stopped it.
    pub fn allocate(&self, words: usize) -> Result<WordAddr, ArenaError> {
        if words == 0 {
            return Err(UsageError::ZeroSize.into());
        }
        if words > MAX_CHUNK_WORD_SIZE {
            return Err(AllocFailure::TooLarge {
                requested_words: words,
            }
            .into());
        }
        let raw = words.max(MIN_BLOCK_WORDS);
        let mut state = self.inner.state.lock();

        let addr = match state.allocate_from_free_blocks(words, raw) {
            Some(addr) => addr,
            None => self.allocate_from_chunks(&mut state, words, raw)?,
        };
        self.inner.context.usage_counters().add_used(words);
        trace!(arena = %self.inner.id, %addr, words, "allocated");
        self.check_after_op(&state);
        Ok(addr)
    }

    fn allocate_from_chunks(
        &self,
        state: &mut ArenaState,
        words: usize,
        raw: usize,
    ) -> Result<WordAddr, AllocFailure> {
        let mut manager = self.inner.context.lock_expand();
        let step = state.chunks.len();

        if let Some(current) = state.chunks.last_mut() {
            let mut fits = current.top + raw <= current.chunk.word_size();
            if !fits && manager.settings().enlarge_chunks_in_place {
                fits = self.try_enlarge(&mut manager, current, raw, step);
            }
            if fits {
                return Self::bump(&mut manager, state, words, raw);
            }
        }

        let policy_level = self.inner.policy.level_at_step(step);
        let fitting = ChunkLevel::fitting(raw).ok_or(AllocFailure::TooLarge {
            requested_words: words,
        })?;
        let level = policy_level.min(fitting);
        let chunk = manager.get_chunk(level, raw)?;

        if let Some(old) = state.chunks.last_mut() {
            let tail = old.chunk.committed_words() - old.top;
            if tail >= MIN_BLOCK_WORDS {
                let addr = old.chunk.base() + old.top;
                let salvaged = state.free_blocks.add_block(addr, tail);
                invariant!(salvaged.is_ok(), "salvaged tail {addr}+{tail} overlaps a free block");
                trace!(arena = %self.inner.id, %addr, tail, "salvaged chunk tail");
            } else {
                old.waste_words += tail;
            }
            old.top += tail;
        }
        debug!(
            arena = %self.inner.id,
            step,
            level = %chunk.level(),
            base = %chunk.base(),
            "new current chunk"
        );
        state.chunks.push(ArenaChunk {
            chunk,
            top: 0,
            live_words: 0,
            waste_words: 0,
        });
        Self::bump(&mut manager, state, words, raw)
    }

    /// Enlarge `current` in place if that lets `raw` more words fit.
    fn try_enlarge(
        &self,
        manager: &mut ChunkManager,
        current: &mut ArenaChunk,
        raw: usize,
        step: usize,
    ) -> bool {
        let needed = current.top + raw;
        if needed > 2 * current.chunk.word_size() {
            return false;
        }
        let Some(enlarged) = current.chunk.level().coarser() else {
            return false;
        };
        if enlarged < self.inner.policy.level_at_step(step) {
            return false;
        }
        manager.attempt_enlarge_chunk(&mut current.chunk)
    }

    /// Bump-allocate from the current chunk, which must have room.
    fn bump(
        manager: &mut ChunkManager,
        state: &mut ArenaState,
        words: usize,
        raw: usize,
    ) -> Result<WordAddr, AllocFailure> {
        let index = state.chunks.len() - 1;
        let current = &mut state.chunks[index];
        let new_top = current.top + raw;
        if new_top > current.chunk.committed_words() {
            manager.commit_chunk(&mut current.chunk, new_top)?;
        }
        let addr = current.chunk.base() + current.top;
        current.top = new_top;
        state.account(index, words, raw);
        Ok(addr)
    }

    /// Give back a span obtained from [`Arena::allocate`].
    ///
    /// `words` must be the size originally requested. The span goes to the
    /// free-block list; the chunk stays with the arena.
    ///
    /// Spans outside the used part of every chunk are rejected as
    /// [`UsageError::ForeignSpan`], spans overlapping the free-block list as
    /// [`UsageError::DoubleFree`]. A sub-span of a still-live allocation is
    /// not detected: it is accepted and can be handed out again while the
    /// enclosing allocation is in use.
    pub fn deallocate(&self, addr: WordAddr, words: usize) -> Result<(), ArenaError> {
        if words == 0 {
            return Err(UsageError::ZeroSize.into());
        }
        let raw = words.max(MIN_BLOCK_WORDS);
        let mut state = self.inner.state.lock();
        let Some(index) = state.chunk_index(addr, raw) else {
            return Err(UsageError::ForeignSpan { addr, words }.into());
        };
        if state.free_blocks.overlaps(addr, raw) {
            return Err(UsageError::DoubleFree { addr, words }.into());
        }
        let chunk = &mut state.chunks[index];
        if chunk.live_words < words || chunk.waste_words < raw - words {
            return Err(UsageError::ForeignSpan { addr, words }.into());
        }
        chunk.live_words -= words;
        chunk.waste_words -= raw - words;
        state.used_words -= words;
        state.free_blocks.add_block(addr, raw)?;
        self.inner.context.usage_counters().sub_used(words);
        trace!(arena = %self.inner.id, %addr, words, "deallocated");
        self.check_after_op(&state);
        Ok(())
    }

    fn check_after_op(&self, state: &ArenaState) {
        if !self.inner.context.settings().verify_after_ops {
            return;
        }
        let manager = self.inner.context.lock_expand();
        let result = self.inner.verify_locked(state, &manager);
        invariant!(
            result.is_ok(),
            "{}: arena verification failed: {:?}",
            self.inner.id,
            result
        );
    }

    /// Usage broken down by chunk level, plus the free-block list.
    pub fn statistics(&self) -> ArenaStats {
        self.inner.statistics()
    }

    /// Check this arena against its context's chunk manager.
    pub fn verify(&self) -> Result<(), VerifyError> {
        let state = self.inner.state.lock();
        let manager = self.inner.context.lock_expand();
        self.inner.verify_locked(&state, &manager)
    }

    /// Words handed out and not deallocated.
    pub fn used_words(&self) -> usize {
        self.inner.state.lock().used_words
    }

    /// Chunks currently owned.
    pub fn chunk_count(&self) -> usize {
        self.inner.state.lock().chunks.len()
    }

    /// Render the arena's statistics.
    pub fn print_on(&self, out: &mut dyn fmt::Write, scale: Scale, detailed: bool) -> fmt::Result {
        writeln!(
            out,
            "Arena {} ({}, {}):",
            self.inner.id,
            self.inner.category,
            if self.inner.is_class { "class" } else { "non-class" }
        )?;
        self.statistics().print_on(out, scale, detailed)
    }
}

impl fmt::Debug for Arena {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Arena")
            .field("id", &self.inner.id)
            .field("category", &self.inner.category)
            .field("is_class", &self.inner.is_class)
            .finish()
    }
}
