//! The chunk manager: buddy allocation of chunks over reserved space.
//!
//! # Overview
//!
//! Reserved space is partitioned into chunks of [`NUM_CHUNK_LEVELS`] power
//! of two sizes. Every node contributes *top chunks*; a top chunk is the
//! root of a binary tree of headers in the [`ChunkTable`]. Acquiring a
//! chunk finds a free chunk at the requested level or coarser and splits
//! it down, queueing the upper halves on the free lists. Returning a chunk
//! merges it with its free buddy, repeatedly, up to its top chunk.
//!
//! Free lists are address ordered, so acquisition is deterministic: for
//! identical request sequences the same addresses come back.
//!
//! # Commit
//!
//! A chunk's committed words are the committed prefix of its range, as
//! recorded by its node. Returning a chunk keeps its memory committed;
//! only [`ChunkManager::purge`] gives memory back.

use std::collections::BTreeMap;
use std::fmt;

use indexmap::IndexMap;
use smallvec::SmallVec;
use tracing::{debug, trace};

use chunkspace_core::{
    AllocFailure, ChunkId, ChunkLevel, NodeId, VerifyError, WordAddr, NUM_CHUNK_LEVELS,
};
use chunkspace_stats::{ChunkManagerStats, Scale};

use crate::chunk::{ChunkHeader, ChunkState, ChunkTable, InUseChunk};
use crate::config::Settings;
use crate::vspace::{TopChunk, VirtualSpaceList};

/// What a purge gave back.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PurgeSummary {
    /// Words uncommitted, including those of released nodes.
    pub uncommitted_words: usize,
    /// Nodes released back to the address space.
    pub released_nodes: usize,
}

/// Chunk allocator for one context. Always accessed under the context lock.
pub struct ChunkManager {
    name: String,
    vsl: VirtualSpaceList,
    table: ChunkTable,
    free_lists: [BTreeMap<WordAddr, ChunkId>; NUM_CHUNK_LEVELS],
    /// Top chunks of each node, in carve order.
    tops: IndexMap<NodeId, SmallVec<[ChunkId; 8]>>,
    in_use: usize,
    settings: Settings,
}

impl ChunkManager {
    /// A manager over `vsl`. Nothing is carved until the first request.
    pub fn new(name: &str, vsl: VirtualSpaceList, settings: Settings) -> Self {
        Self {
            name: name.to_string(),
            vsl,
            table: ChunkTable::new(),
            free_lists: std::array::from_fn(|_| BTreeMap::new()),
            tops: IndexMap::new(),
            in_use: 0,
            settings,
        }
    }

    /// Context name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The settings this manager was built with.
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// The underlying virtual space.
    pub fn vsl(&self) -> &VirtualSpaceList {
        &self.vsl
    }

    /// The underlying virtual space, mutably.
    pub fn vsl_mut(&mut self) -> &mut VirtualSpaceList {
        &mut self.vsl
    }

    /// Chunks currently handed out.
    pub fn in_use_count(&self) -> usize {
        self.in_use
    }

    /// Chunks currently on the free lists.
    pub fn free_chunk_count(&self) -> usize {
        self.free_lists.iter().map(BTreeMap::len).sum()
    }

    /// Header of a chunk, for inspection.
    pub fn header(&self, id: ChunkId) -> &ChunkHeader {
        self.table.get(id)
    }

    // ── Free lists ──────────────────────────────────────────────

    fn link_free(&mut self, id: ChunkId) {
        let header = self.table.get_mut(id);
        header.state = ChunkState::Free;
        let (level, base) = (header.level, header.base);
        let previous = self.free_lists[level.index()].insert(base, id);
        invariant!(
            previous.is_none(),
            "{}: two free chunks at {base} on {level}",
            self.name
        );
    }

    fn unlink_free(&mut self, id: ChunkId) {
        let header = self.table.get(id);
        invariant!(
            header.state == ChunkState::Free,
            "{}: unlinking {id} in state {:?}",
            self.name,
            header.state
        );
        let removed = self.free_lists[header.level.index()].remove(&header.base);
        invariant!(
            removed == Some(id),
            "{}: free list at {} holds {removed:?}, expected {id}",
            self.name,
            header.base
        );
    }

    fn chunk_committed(&self, id: ChunkId) -> usize {
        let h = self.table.get(id);
        self.vsl.committed_prefix(h.node, h.offset, h.word_size())
    }

    /// Remove and return the best free chunk at `level` or coarser.
    ///
    /// Prefers, at the finest possible level, the lowest-address chunk
    /// whose committed prefix already covers `min_committed`.
    fn take_free_chunk(&mut self, level: ChunkLevel, min_committed: usize) -> Option<ChunkId> {
        let levels = || (0..=level.index()).rev();
        let committed = levels().find_map(|l| {
            self.free_lists[l]
                .values()
                .copied()
                .find(|&id| self.chunk_committed(id) >= min_committed)
        });
        let id = committed
            .or_else(|| levels().find_map(|l| self.free_lists[l].values().next().copied()))?;
        self.unlink_free(id);
        Some(id)
    }

    fn register_top_chunk(&mut self, top: TopChunk) -> ChunkId {
        let id = self.table.insert(ChunkHeader {
            node: top.node,
            level: top.level,
            offset: top.offset,
            base: top.base,
            state: ChunkState::Free,
            parent: None,
            children: None,
        });
        self.tops.entry(top.node).or_default().push(id);
        self.link_free(id);
        trace!(context = %self.name, chunk = %id, level = %top.level, base = %top.base, "new top chunk");
        id
    }

    // ── Split / merge ───────────────────────────────────────────

    /// Split an unlinked chunk; queue the upper half and return the lower.
    fn split(&mut self, id: ChunkId) -> ChunkId {
        let parent = self.table.get(id).clone();
        let Some(finer) = parent.level.finer() else {
            panic!("chunkspace invariant violated: splitting finest {id}");
        };
        let half = finer.word_size();
        let child = |offset: usize| ChunkHeader {
            node: parent.node,
            level: finer,
            offset,
            base: parent.base + (offset - parent.offset),
            state: ChunkState::InUse,
            parent: Some(id),
            children: None,
        };
        let leader = self.table.insert(child(parent.offset));
        let follower = self.table.insert(child(parent.offset + half));
        let header = self.table.get_mut(id);
        header.state = ChunkState::Split;
        header.children = Some([leader, follower]);
        self.link_free(follower);
        trace!(context = %self.name, chunk = %id, level = %parent.level, "split");
        leader
    }

    /// Fold the children of `parent` back into it. Both must be unlinked.
    fn fuse(&mut self, parent: ChunkId) {
        let Some([leader, follower]) = self.table.get_mut(parent).children.take() else {
            panic!("chunkspace invariant violated: fusing unsplit {parent}");
        };
        self.table.remove(leader);
        self.table.remove(follower);
    }

    /// Put an unlinked chunk back, merging with free buddies upward.
    fn release(&mut self, mut id: ChunkId) {
        while let Some(buddy) = self.table.buddy(id) {
            if self.table.get(buddy).state != ChunkState::Free {
                break;
            }
            self.unlink_free(buddy);
            let Some(parent) = self.table.get(id).parent else {
                break;
            };
            self.fuse(parent);
            trace!(context = %self.name, chunk = %parent, level = %self.table.get(parent).level, "merged");
            id = parent;
        }
        self.link_free(id);
    }

    // ── Acquire / return ────────────────────────────────────────

    /// Acquire a chunk of exactly `level` with at least `min_committed`
    /// words committed.
    ///
    /// Carves new top chunks, reserving a node in expandable mode, when no
    /// free chunk is large enough. On commit failure the chunk goes back to
    /// the free lists and nothing is retried.
    pub fn get_chunk(
        &mut self,
        level: ChunkLevel,
        min_committed: usize,
    ) -> Result<InUseChunk, AllocFailure> {
        invariant!(
            min_committed <= level.word_size(),
            "{}: asking {min_committed} committed words of a {level} chunk",
            self.name
        );
        let mut id = loop {
            if let Some(id) = self.take_free_chunk(level, min_committed) {
                break id;
            }
            match self.vsl.allocate_top_chunk() {
                Some(top) => {
                    self.register_top_chunk(top);
                }
                None => {
                    debug!(context = %self.name, %level, "no address space left");
                    return Err(AllocFailure::ReserveExhausted {
                        requested_words: level.word_size(),
                        reserved_words: self.vsl.reserved_words(),
                    });
                }
            }
        };
        while self.table.get(id).level < level {
            id = self.split(id);
        }
        self.table.get_mut(id).state = ChunkState::InUse;

        let (node, offset, base) = {
            let h = self.table.get(id);
            (h.node, h.offset, h.base)
        };
        if self.chunk_committed(id) < min_committed {
            if let Err(failure) = self.vsl.commit_range(node, offset, min_committed) {
                self.release(id);
                return Err(failure);
            }
        }
        self.in_use += 1;
        let chunk = InUseChunk {
            id,
            node,
            level,
            base,
            committed_words: self.chunk_committed(id),
        };
        debug!(
            context = %self.name,
            chunk = %id,
            %level,
            base = %base,
            committed = chunk.committed_words,
            "chunk acquired"
        );
        Ok(chunk)
    }

    /// Take back a chunk and merge it with free buddies. Keeps its commit.
    pub fn return_chunk(&mut self, chunk: InUseChunk) {
        let header = self.table.get(chunk.id);
        invariant!(
            header.state == ChunkState::InUse && header.base == chunk.base,
            "{}: returning {} which is {:?} at {}",
            self.name,
            chunk.id,
            header.state,
            header.base
        );
        self.in_use -= 1;
        debug!(context = %self.name, chunk = %chunk.id, level = %chunk.level, base = %chunk.base, "chunk returned");
        self.release(chunk.id);
    }

    /// Extend the committed prefix of an in-use chunk to `words`.
    pub fn commit_chunk(&mut self, chunk: &mut InUseChunk, words: usize) -> Result<(), AllocFailure> {
        invariant!(
            words <= chunk.word_size(),
            "{}: committing {words} words of a {}-word chunk",
            self.name,
            chunk.word_size()
        );
        if chunk.committed_words >= words {
            return Ok(());
        }
        let offset = self.table.get(chunk.id).offset;
        self.vsl.commit_range(chunk.node, offset, words)?;
        chunk.committed_words = self.chunk_committed(chunk.id);
        Ok(())
    }

    /// Grow a chunk in place by absorbing its buddy.
    ///
    /// Succeeds only for the lower half of a pair whose upper half is free
    /// and unsplit. On success the token names the parent chunk; its base
    /// is unchanged and its size doubles.
    pub fn attempt_enlarge_chunk(&mut self, chunk: &mut InUseChunk) -> bool {
        let header = self.table.get(chunk.id);
        let Some(parent) = header.parent else {
            return false;
        };
        if !header.is_leader() {
            return false;
        }
        let Some(buddy) = self.table.buddy(chunk.id) else {
            return false;
        };
        if self.table.get(buddy).state != ChunkState::Free {
            return false;
        }
        self.unlink_free(buddy);
        self.fuse(parent);
        let header = self.table.get_mut(parent);
        header.state = ChunkState::InUse;
        chunk.id = parent;
        chunk.level = header.level;
        chunk.committed_words = self.chunk_committed(parent);
        debug!(context = %self.name, chunk = %parent, level = %chunk.level, "chunk enlarged in place");
        true
    }

    // ── Purge ───────────────────────────────────────────────────

    /// Give memory back: uncommit free chunks of at least one granule
    /// (when enabled), then release fully free nodes (expandable mode).
    pub fn purge(&mut self) -> PurgeSummary {
        let mut summary = PurgeSummary::default();
        let granule = self.vsl.granule_words();
        if self.settings.uncommit_free_chunks {
            let candidates: Vec<(NodeId, usize, usize)> = self
                .free_lists
                .iter()
                .flat_map(BTreeMap::values)
                .map(|&id| self.table.get(id))
                .filter(|h| h.word_size() >= granule)
                .map(|h| (h.node, h.offset, h.word_size()))
                .collect();
            for (node, offset, words) in candidates {
                summary.uncommitted_words += self.vsl.uncommit_range(node, offset, words);
            }
        }
        if self.vsl.is_expandable() {
            let free_nodes: Vec<NodeId> = self
                .tops
                .iter()
                .filter(|(_, tops)| {
                    tops.iter()
                        .all(|&id| self.table.get(id).state == ChunkState::Free)
                })
                .map(|(&node, _)| node)
                .collect();
            for node in free_nodes {
                let tops = self.tops.shift_remove(&node).unwrap_or_default();
                for id in tops {
                    self.unlink_free(id);
                    self.table.remove(id);
                }
                summary.uncommitted_words += self.vsl.node(node).committed_words();
                self.vsl.release_node(node);
                summary.released_nodes += 1;
            }
        }
        debug!(
            context = %self.name,
            uncommitted = summary.uncommitted_words,
            released_nodes = summary.released_nodes,
            "purge finished"
        );
        summary
    }

    // ── Statistics / verification ───────────────────────────────

    /// Free chunks by level.
    pub fn statistics(&self) -> ChunkManagerStats {
        let mut stats = ChunkManagerStats::default();
        for (i, list) in self.free_lists.iter().enumerate() {
            for &id in list.values() {
                stats.num_chunks[i] += 1;
                stats.committed_word_size[i] += self.chunk_committed(id);
            }
        }
        stats
    }

    /// Check the chunk tree, the free lists and the virtual space.
    ///
    /// With `slow`, also re-derive per-node carve totals from the headers.
    pub fn verify(&self, slow: bool) -> Result<(), VerifyError> {
        let chunk_err = |chunk: ChunkId, reason: String| Err(VerifyError::Chunk { chunk, reason });
        self.vsl.verify()?;

        for (i, list) in self.free_lists.iter().enumerate() {
            for (&base, &id) in list {
                if !self.table.contains(id) {
                    return chunk_err(id, format!("dead header on free list {i}"));
                }
                let h = self.table.get(id);
                if h.state != ChunkState::Free || h.level.index() != i || h.base != base {
                    return chunk_err(
                        id,
                        format!(
                            "free list {i} entry at {base} is {:?} {} at {}",
                            h.state, h.level, h.base
                        ),
                    );
                }
            }
        }

        let mut in_use = 0;
        let mut free = 0;
        for (id, h) in self.table.iter() {
            match h.state {
                ChunkState::InUse => in_use += 1,
                ChunkState::Free => free += 1,
                ChunkState::Split => {}
            }
            if self.vsl.committed_prefix(h.node, h.offset, h.word_size()) > h.word_size() {
                return chunk_err(id, "committed prefix exceeds chunk".to_string());
            }
            match (h.state, h.children) {
                (ChunkState::Split, Some(children)) => {
                    for (k, child) in children.into_iter().enumerate() {
                        let c = self.table.get(child);
                        let expected = h.offset + k * (h.word_size() / 2);
                        if c.parent != Some(id)
                            || c.level.coarser() != Some(h.level)
                            || c.offset != expected
                            || c.node != h.node
                        {
                            return chunk_err(child, format!("child {k} of {id} misplaced"));
                        }
                    }
                }
                (ChunkState::Split, None) => {
                    return chunk_err(id, "split without children".to_string());
                }
                (_, Some(_)) => return chunk_err(id, format!("{:?} with children", h.state)),
                (_, None) => {}
            }
            if h.state == ChunkState::Free {
                if let Some(buddy) = self.table.buddy(id) {
                    if self.table.get(buddy).state == ChunkState::Free {
                        return chunk_err(id, format!("free buddy {buddy} not merged"));
                    }
                }
            }
            if h.parent.is_none() {
                let listed = self.tops.get(&h.node).is_some_and(|t| t.contains(&id));
                if !listed {
                    return chunk_err(id, "parentless chunk is not a top chunk".to_string());
                }
            }
        }
        if in_use != self.in_use {
            return Err(VerifyError::Counter {
                name: "chunks in use",
                expected: in_use,
                actual: self.in_use,
            });
        }
        if free != self.free_chunk_count() {
            return Err(VerifyError::Counter {
                name: "free chunks",
                expected: free,
                actual: self.free_chunk_count(),
            });
        }

        if slow {
            for (&node, tops) in &self.tops {
                let carved: usize = tops.iter().map(|&id| self.table.get(id).word_size()).sum();
                let recorded = self.vsl.node(node).carved_words();
                if carved != recorded {
                    return Err(VerifyError::Node {
                        node,
                        reason: format!("top chunks cover {carved} words, node carved {recorded}"),
                    });
                }
            }
            self.statistics().verify()?;
        }
        Ok(())
    }

    /// Render a summary of the virtual space and the free lists.
    pub fn print_on(&self, out: &mut dyn fmt::Write, scale: Scale) -> fmt::Result {
        writeln!(
            out,
            "Context '{}': {} node(s), {} chunk(s) in use",
            self.name,
            self.vsl.node_count(),
            self.in_use
        )?;
        write!(out, "  reserved ")?;
        chunkspace_stats::scale::write_scaled_words(out, self.vsl.reserved_words(), scale)?;
        write!(out, ", committed ")?;
        chunkspace_stats::scale::write_scaled_words(out, self.vsl.committed_words(), scale)?;
        writeln!(out)?;
        writeln!(out, "Free chunks:")?;
        self.statistics().print_on(out, scale)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use chunkspace_core::MAX_CHUNK_WORD_SIZE;

    use crate::counters::UsageCounters;
    use crate::limiter::CommitLimiter;

    fn lv(l: u8) -> ChunkLevel {
        ChunkLevel::new(l).unwrap()
    }

    fn settings(granule: usize) -> Settings {
        Settings {
            commit_granule_words: granule,
            node_words: MAX_CHUNK_WORD_SIZE,
            ..Settings::default()
        }
    }

    fn non_expandable(words: usize, granule: usize, limit: usize) -> ChunkManager {
        let vsl = VirtualSpaceList::new_non_expandable(
            "test",
            words,
            granule,
            Arc::new(CommitLimiter::new(limit)),
            Arc::new(UsageCounters::new()),
        );
        ChunkManager::new("test", vsl, settings(granule))
    }

    fn expandable(granule: usize, limit: usize) -> ChunkManager {
        let vsl = VirtualSpaceList::new_expandable(
            "test",
            MAX_CHUNK_WORD_SIZE,
            granule,
            Arc::new(CommitLimiter::new(limit)),
            Arc::new(UsageCounters::new()),
        );
        ChunkManager::new("test", vsl, settings(granule))
    }

    #[test]
    fn acquire_splits_down_and_queues_upper_halves() {
        let mut m = non_expandable(4096, 1024, 0);
        let c = m.get_chunk(lv(12), 0).unwrap();
        assert_eq!(c.word_size(), 128);
        let stats = m.statistics();
        for l in 8..=12 {
            assert_eq!(stats.num_chunks[l], 1, "level {l}");
        }
        assert_eq!(stats.total_chunks(), 5);
        m.verify(true).unwrap();
        m.return_chunk(c);
        assert_eq!(m.statistics().num_chunks[7], 1);
        assert_eq!(m.free_chunk_count(), 1);
        m.verify(true).unwrap();
    }

    #[test]
    fn acquisition_is_address_ordered() {
        let mut m = non_expandable(4096, 1024, 0);
        let a = m.get_chunk(lv(10), 0).unwrap();
        let b = m.get_chunk(lv(10), 0).unwrap();
        let c = m.get_chunk(lv(9), 0).unwrap();
        assert_eq!(b.base(), a.base() + 512);
        assert_eq!(c.base(), a.base() + 1024);
    }

    #[test]
    fn exhausted_non_expandable_space_fails() {
        let mut m = non_expandable(4096, 1024, 0);
        let whole = m.get_chunk(lv(7), 0).unwrap();
        let err = m.get_chunk(lv(12), 0).unwrap_err();
        assert_eq!(
            err,
            AllocFailure::ReserveExhausted {
                requested_words: 128,
                reserved_words: 4096,
            }
        );
        assert!(matches!(
            m.get_chunk(lv(0), 0),
            Err(AllocFailure::ReserveExhausted { .. })
        ));
        m.return_chunk(whole);
        m.verify(true).unwrap();
    }

    #[test]
    fn commit_failure_returns_chunk() {
        let mut m = expandable(1024, 1024);
        let small = m.get_chunk(lv(12), 128).unwrap();
        assert_eq!(small.committed_words(), 128);
        let err = m.get_chunk(lv(7), 4096).unwrap_err();
        assert!(matches!(err, AllocFailure::CommitLimitReached { .. }));
        assert_eq!(m.in_use_count(), 1);
        m.verify(true).unwrap();
        m.return_chunk(small);
        assert_eq!(m.free_chunk_count(), 1);
    }

    #[test]
    fn committed_chunks_are_preferred() {
        let mut m = expandable(1024, 0);
        let a = m.get_chunk(lv(10), 0).unwrap();
        let b = m.get_chunk(lv(10), 0).unwrap();
        let mut c = m.get_chunk(lv(10), 0).unwrap();
        m.commit_chunk(&mut c, 512).unwrap();
        assert_eq!(c.committed_words(), 512);
        let committed_base = c.base();
        m.return_chunk(c);
        m.return_chunk(a);
        let d = m.get_chunk(lv(10), 512).unwrap();
        assert_eq!(d.base(), committed_base);
        let e = m.get_chunk(lv(10), 0).unwrap();
        assert_eq!(e.base(), WordAddr(d.base().0 - 1024));
        for chunk in [b, d, e] {
            m.return_chunk(chunk);
        }
        m.verify(true).unwrap();
    }

    #[test]
    fn enlarge_absorbs_free_buddy_only_for_leader() {
        let mut m = non_expandable(4096, 1024, 0);
        let mut a = m.get_chunk(lv(12), 0).unwrap();
        let base = a.base();
        assert!(m.attempt_enlarge_chunk(&mut a));
        assert_eq!((a.level(), a.base()), (lv(11), base));
        assert!(m.attempt_enlarge_chunk(&mut a));
        assert_eq!(a.word_size(), 512);
        let mut b = m.get_chunk(lv(10), 0).unwrap();
        assert_eq!(b.base(), base + 512);
        assert!(!m.attempt_enlarge_chunk(&mut a), "buddy is in use");
        assert!(!m.attempt_enlarge_chunk(&mut b), "follower never enlarges");
        m.verify(true).unwrap();
        m.return_chunk(a);
        m.return_chunk(b);
        assert_eq!(m.free_chunk_count(), 1);
    }

    #[test]
    fn top_chunk_never_enlarges() {
        let mut m = non_expandable(4096, 1024, 0);
        let mut whole = m.get_chunk(lv(7), 0).unwrap();
        assert!(!m.attempt_enlarge_chunk(&mut whole));
        m.return_chunk(whole);
    }

    #[test]
    fn purge_releases_free_nodes_when_expandable() {
        let mut m = expandable(8192, 0);
        let c = m.get_chunk(ChunkLevel::ROOT, 8192 * 2).unwrap();
        assert_eq!(m.vsl().committed_words(), 16384);
        m.return_chunk(c);
        assert_eq!(m.vsl().committed_words(), 16384, "return keeps commit");
        let summary = m.purge();
        assert_eq!(summary.released_nodes, 1);
        assert_eq!(summary.uncommitted_words, 16384);
        assert_eq!(m.vsl().node_count(), 0);
        assert_eq!(m.vsl().reserved_words(), 0);
        m.verify(true).unwrap();
    }

    #[test]
    fn purge_keeps_node_when_non_expandable() {
        let mut m = non_expandable(16384, 1024, 0);
        let c = m.get_chunk(lv(6), 8192).unwrap();
        let keep = m.get_chunk(lv(12), 128).unwrap();
        m.return_chunk(c);
        let summary = m.purge();
        assert_eq!(summary.released_nodes, 0);
        assert_eq!(summary.uncommitted_words, 8192);
        assert_eq!(m.vsl().node_count(), 1);
        assert_eq!(m.vsl().committed_words(), 1024);
        m.return_chunk(keep);
        m.verify(true).unwrap();
    }

    #[test]
    fn purge_without_uncommit_only_releases_nodes() {
        let vsl = VirtualSpaceList::new_non_expandable(
            "test",
            8192,
            1024,
            Arc::new(CommitLimiter::unlimited()),
            Arc::new(UsageCounters::new()),
        );
        let mut m = ChunkManager::new(
            "test",
            vsl,
            Settings {
                uncommit_free_chunks: false,
                ..settings(1024)
            },
        );
        let c = m.get_chunk(lv(6), 8192).unwrap();
        m.return_chunk(c);
        assert_eq!(m.purge(), PurgeSummary::default());
        assert_eq!(m.vsl().committed_words(), 8192);
    }

    #[cfg(not(miri))]
    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn random_get_return_keeps_tree_consistent(
                ops in prop::collection::vec((4u8..13, any::<bool>(), any::<prop::sample::Index>()), 1..60)
            ) {
                let mut m = non_expandable(MAX_CHUNK_WORD_SIZE / 4, 1024, 0);
                let mut held: Vec<InUseChunk> = Vec::new();
                for (level, get, pick) in ops {
                    if get || held.is_empty() {
                        let level = lv(level);
                        if let Ok(c) = m.get_chunk(level, level.word_size().min(256)) {
                            prop_assert!(c.committed_words() >= level.word_size().min(256));
                            held.push(c);
                        }
                    } else {
                        let c = held.swap_remove(pick.index(held.len()));
                        m.return_chunk(c);
                    }
                    prop_assert!(m.verify(true).is_ok());
                }
                for c in held.drain(..) {
                    m.return_chunk(c);
                }
                prop_assert_eq!(m.free_chunk_count(), 1);
                prop_assert_eq!(m.in_use_count(), 0);
            }
        }
    }
}
