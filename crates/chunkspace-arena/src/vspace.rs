//! Reserved address space and commit bookkeeping.
//!
//! A [`VirtualSpaceNode`] is one reservation: a contiguous range of word
//! addresses, committed granule by granule. A [`VirtualSpaceList`] owns the
//! nodes of one context and grows (expandable mode) or stays a single
//! fixed node (non-expandable mode).
//!
//! Nodes hand their space to the chunk manager as *top chunks*, carved
//! lazily from low to high addresses. Each top chunk is the coarsest chunk
//! that fits the remaining space and is aligned to its own size, so buddy
//! arithmetic inside a top chunk never crosses its boundary.
//!
//! Committing a granule allocates its zeroed backing store; uncommitting
//! drops it. Commits are charged to the [`CommitLimiter`] before anything
//! is allocated, so a rejected commit leaves no trace.

use std::ops::Range;
use std::sync::Arc;

use indexmap::IndexMap;
use tracing::{debug, trace, warn};

use chunkspace_core::{
    AccessError, AllocFailure, ChunkLevel, NodeId, VerifyError, WordAddr, MAX_CHUNK_WORD_SIZE,
    MIN_CHUNK_WORD_SIZE,
};

use crate::counters::UsageCounters;
use crate::limiter::CommitLimiter;

/// A top chunk freshly carved from a node.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TopChunk {
    /// The node the chunk lives in.
    pub node: NodeId,
    /// Word offset within the node.
    pub offset: usize,
    /// The chunk's level.
    pub level: ChunkLevel,
    /// Absolute address of the chunk.
    pub base: WordAddr,
}

/// One reservation.
pub struct VirtualSpaceNode {
    id: NodeId,
    base: WordAddr,
    word_size: usize,
    granule_words: usize,
    /// Backing store per granule; `None` while uncommitted.
    granules: Vec<Option<Box<[u64]>>>,
    committed_words: usize,
    /// Words already carved into top chunks, from offset zero.
    carved_words: usize,
}

impl VirtualSpaceNode {
    /// Reserve a node. `word_size` must be a multiple of the smallest chunk.
    pub fn new(id: NodeId, base: WordAddr, word_size: usize, granule_words: usize) -> Self {
        invariant!(
            word_size > 0 && word_size % MIN_CHUNK_WORD_SIZE == 0,
            "node size {word_size} is not a multiple of {MIN_CHUNK_WORD_SIZE}"
        );
        let granule_count = word_size.div_ceil(granule_words);
        Self {
            id,
            base,
            word_size,
            granule_words,
            granules: (0..granule_count).map(|_| None).collect(),
            committed_words: 0,
            carved_words: 0,
        }
    }

    /// Node id.
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// First address of the reservation.
    pub fn base(&self) -> WordAddr {
        self.base
    }

    /// Reserved size in words.
    pub fn word_size(&self) -> usize {
        self.word_size
    }

    /// Committed words.
    pub fn committed_words(&self) -> usize {
        self.committed_words
    }

    /// Words already carved into top chunks.
    pub fn carved_words(&self) -> usize {
        self.carved_words
    }

    /// Whether `addr` falls inside this reservation.
    pub fn contains(&self, addr: WordAddr) -> bool {
        addr >= self.base && addr < self.base + self.word_size
    }

    /// Carve the next top chunk, or `None` when the node is fully carved.
    pub fn carve_top_chunk(&mut self) -> Option<TopChunk> {
        let remaining = self.word_size - self.carved_words;
        let offset = self.carved_words;
        let level = ChunkLevel::all().find(|l| {
            let size = l.word_size();
            size <= remaining && offset % size == 0
        })?;
        self.carved_words += level.word_size();
        Some(TopChunk {
            node: self.id,
            offset,
            level,
            base: self.base + offset,
        })
    }

    fn granule_len(&self, index: usize) -> usize {
        let start = index * self.granule_words;
        self.granule_words.min(self.word_size - start)
    }

    /// Granules touched by `[offset, offset + words)`.
    fn touched_granules(&self, offset: usize, words: usize) -> Range<usize> {
        if words == 0 {
            return 0..0;
        }
        let end = offset + words;
        invariant!(
            end <= self.word_size,
            "{}: range {offset}+{words} exceeds node size {}",
            self.id,
            self.word_size
        );
        offset / self.granule_words..end.div_ceil(self.granule_words)
    }

    /// Granules lying entirely inside `[offset, offset + words)`.
    fn enclosed_granules(&self, offset: usize, words: usize) -> Range<usize> {
        let end = (offset + words).min(self.word_size);
        let first = offset.div_ceil(self.granule_words);
        let last = if end == self.word_size {
            self.granules.len()
        } else {
            end / self.granule_words
        };
        first..last.max(first)
    }

    /// Length of the committed prefix of `[offset, offset + words)`.
    pub fn committed_prefix(&self, offset: usize, words: usize) -> usize {
        let end = offset + words;
        let mut prefix_end = offset;
        for i in self.touched_granules(offset, words) {
            if self.granules[i].is_none() {
                break;
            }
            prefix_end = ((i + 1) * self.granule_words).min(end);
        }
        prefix_end - offset
    }

    /// Commit every granule touched by the range.
    ///
    /// Returns the number of newly committed words. The limiter is charged
    /// once, up front; on rejection nothing changes.
    pub fn commit_range(
        &mut self,
        offset: usize,
        words: usize,
        limiter: &CommitLimiter,
    ) -> Result<usize, AllocFailure> {
        let range = self.touched_granules(offset, words);
        let needed: usize = range
            .clone()
            .filter(|&i| self.granules[i].is_none())
            .map(|i| self.granule_len(i))
            .sum();
        if needed == 0 {
            return Ok(0);
        }
        if !limiter.try_commit(needed) {
            warn!(
                node = %self.id,
                needed,
                committed = limiter.committed_words(),
                limit = limiter.limit_words(),
                "commit limit reached"
            );
            return Err(AllocFailure::CommitLimitReached {
                requested_words: needed,
                limit_words: limiter.limit_words(),
            });
        }
        for i in range {
            if self.granules[i].is_none() {
                self.granules[i] = Some(vec![0u64; self.granule_len(i)].into_boxed_slice());
            }
        }
        self.committed_words += needed;
        trace!(node = %self.id, offset, words, needed, "committed range");
        Ok(needed)
    }

    /// Uncommit every granule lying entirely inside the range.
    ///
    /// Returns the number of words released. Never fails.
    pub fn uncommit_range(&mut self, offset: usize, words: usize, limiter: &CommitLimiter) -> usize {
        let mut released = 0;
        for i in self.enclosed_granules(offset, words) {
            if self.granules[i].take().is_some() {
                released += self.granule_len(i);
            }
        }
        if released > 0 {
            self.committed_words -= released;
            limiter.uncommit(released);
            trace!(node = %self.id, offset, words, released, "uncommitted range");
        }
        released
    }

    fn locate(&self, addr: WordAddr) -> (usize, usize) {
        let offset = addr - self.base;
        (offset / self.granule_words, offset % self.granule_words)
    }

    /// Read one committed word.
    pub fn read_word(&self, addr: WordAddr) -> Result<u64, AccessError> {
        let (g, i) = self.locate(addr);
        self.granules[g]
            .as_ref()
            .map(|data| data[i])
            .ok_or(AccessError::Uncommitted { addr })
    }

    /// Write one committed word.
    pub fn write_word(&mut self, addr: WordAddr, value: u64) -> Result<(), AccessError> {
        let (g, i) = self.locate(addr);
        let data = self.granules[g]
            .as_mut()
            .ok_or(AccessError::Uncommitted { addr })?;
        data[i] = value;
        Ok(())
    }

    /// Check that the committed-word total matches the granule table.
    pub fn verify(&self) -> Result<(), VerifyError> {
        let counted: usize = (0..self.granules.len())
            .filter(|&i| self.granules[i].is_some())
            .map(|i| self.granule_len(i))
            .sum();
        if counted != self.committed_words {
            return Err(VerifyError::Node {
                node: self.id,
                reason: format!(
                    "granule table holds {counted} committed words, node records {}",
                    self.committed_words
                ),
            });
        }
        if self.carved_words > self.word_size {
            return Err(VerifyError::Node {
                node: self.id,
                reason: format!(
                    "carved {} words of a {}-word node",
                    self.carved_words, self.word_size
                ),
            });
        }
        Ok(())
    }
}

/// The reservations of one context.
pub struct VirtualSpaceList {
    name: String,
    expandable: bool,
    node_words: usize,
    granule_words: usize,
    nodes: IndexMap<NodeId, VirtualSpaceNode>,
    next_node_id: u32,
    /// Address-space cursor; addresses are never reused.
    next_base: u64,
    limiter: Arc<CommitLimiter>,
    counters: Arc<UsageCounters>,
}

impl VirtualSpaceList {
    fn empty(
        name: &str,
        expandable: bool,
        node_words: usize,
        granule_words: usize,
        limiter: Arc<CommitLimiter>,
        counters: Arc<UsageCounters>,
    ) -> Self {
        Self {
            name: name.to_string(),
            expandable,
            node_words,
            granule_words,
            nodes: IndexMap::new(),
            next_node_id: 0,
            // Keep address zero (and the first root's worth) unused.
            next_base: MAX_CHUNK_WORD_SIZE as u64,
            limiter,
            counters,
        }
    }

    /// An expandable list that starts without any reservation.
    pub fn new_expandable(
        name: &str,
        node_words: usize,
        granule_words: usize,
        limiter: Arc<CommitLimiter>,
        counters: Arc<UsageCounters>,
    ) -> Self {
        Self::empty(name, true, node_words, granule_words, limiter, counters)
    }

    /// A non-expandable list over one reservation of `reserve_words`.
    pub fn new_non_expandable(
        name: &str,
        reserve_words: usize,
        granule_words: usize,
        limiter: Arc<CommitLimiter>,
        counters: Arc<UsageCounters>,
    ) -> Self {
        let mut list = Self::empty(name, false, reserve_words, granule_words, limiter, counters);
        list.reserve_node(reserve_words);
        list
    }

    fn reserve_node(&mut self, word_size: usize) -> NodeId {
        let id = NodeId(self.next_node_id);
        self.next_node_id += 1;
        let base = WordAddr(self.next_base);
        self.next_base += word_size.next_multiple_of(MAX_CHUNK_WORD_SIZE) as u64;
        self.nodes
            .insert(id, VirtualSpaceNode::new(id, base, word_size, self.granule_words));
        self.counters.add_reserved(word_size);
        debug!(context = %self.name, node = %id, base = %base, word_size, "reserved node");
        id
    }

    /// Whether new nodes may be appended.
    pub fn is_expandable(&self) -> bool {
        self.expandable
    }

    /// Commit granularity in words.
    pub fn granule_words(&self) -> usize {
        self.granule_words
    }

    /// Carve a top chunk from the first node with uncarved space, reserving
    /// a new node in expandable mode when all are fully carved.
    pub fn allocate_top_chunk(&mut self) -> Option<TopChunk> {
        for node in self.nodes.values_mut() {
            if let Some(top) = node.carve_top_chunk() {
                return Some(top);
            }
        }
        if !self.expandable {
            return None;
        }
        let id = self.reserve_node(self.node_words);
        self.nodes.get_mut(&id).and_then(VirtualSpaceNode::carve_top_chunk)
    }

    /// Look up a node.
    ///
    /// # Panics
    ///
    /// Panics if the node does not exist: chunk headers only ever name
    /// live nodes.
    pub fn node(&self, id: NodeId) -> &VirtualSpaceNode {
        match self.nodes.get(&id) {
            Some(node) => node,
            None => panic!("chunkspace invariant violated: {id} is not a live node"),
        }
    }

    fn node_mut(&mut self, id: NodeId) -> &mut VirtualSpaceNode {
        match self.nodes.get_mut(&id) {
            Some(node) => node,
            None => panic!("chunkspace invariant violated: {id} is not a live node"),
        }
    }

    /// Commit a range of a node, charging the limiter first.
    pub fn commit_range(
        &mut self,
        node: NodeId,
        offset: usize,
        words: usize,
    ) -> Result<usize, AllocFailure> {
        let limiter = Arc::clone(&self.limiter);
        let added = self.node_mut(node).commit_range(offset, words, &limiter)?;
        self.counters.add_committed(added);
        Ok(added)
    }

    /// Uncommit the granules lying entirely inside a range of a node.
    pub fn uncommit_range(&mut self, node: NodeId, offset: usize, words: usize) -> usize {
        let limiter = Arc::clone(&self.limiter);
        let released = self.node_mut(node).uncommit_range(offset, words, &limiter);
        self.counters.sub_committed(released);
        released
    }

    /// Committed prefix of a range of a node.
    pub fn committed_prefix(&self, node: NodeId, offset: usize, words: usize) -> usize {
        self.node(node).committed_prefix(offset, words)
    }

    /// Uncommit and unreserve a node. Expandable mode only.
    pub fn release_node(&mut self, id: NodeId) {
        invariant!(
            self.expandable,
            "{}: releasing {id} of a non-expandable context",
            self.name
        );
        let word_size = self.node(id).word_size();
        self.uncommit_range(id, 0, word_size);
        self.nodes.shift_remove(&id);
        self.counters.sub_reserved(word_size);
        debug!(context = %self.name, node = %id, word_size, "released node");
    }

    /// Ids of all live nodes, oldest first.
    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes.keys().copied()
    }

    /// Number of live nodes.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Total reserved words.
    pub fn reserved_words(&self) -> usize {
        self.nodes.values().map(VirtualSpaceNode::word_size).sum()
    }

    /// Total committed words.
    pub fn committed_words(&self) -> usize {
        self.nodes.values().map(VirtualSpaceNode::committed_words).sum()
    }

    fn node_containing(&self, addr: WordAddr) -> Result<&VirtualSpaceNode, AccessError> {
        self.nodes
            .values()
            .find(|n| n.contains(addr))
            .ok_or(AccessError::Unreserved { addr })
    }

    /// Read `len` committed words starting at `addr`.
    pub fn read_words(&self, addr: WordAddr, len: usize) -> Result<Vec<u64>, AccessError> {
        (0..len)
            .map(|i| {
                let a = addr + i;
                self.node_containing(a)?.read_word(a)
            })
            .collect()
    }

    /// Write `data` to committed words starting at `addr`.
    ///
    /// Checks the whole range before writing anything.
    pub fn write_words(&mut self, addr: WordAddr, data: &[u64]) -> Result<(), AccessError> {
        for i in 0..data.len() {
            self.node_containing(addr + i)?.read_word(addr + i)?;
        }
        for (i, &value) in data.iter().enumerate() {
            let a = addr + i;
            let id = self.node_containing(a)?.id();
            self.node_mut(id).write_word(a, value)?;
        }
        Ok(())
    }

    /// Check every node, and the reserve/commit counters against them.
    pub fn verify(&self) -> Result<(), VerifyError> {
        for node in self.nodes.values() {
            node.verify()?;
        }
        let committed = self.committed_words();
        if committed != self.counters.committed_words() {
            return Err(VerifyError::Counter {
                name: "committed",
                expected: committed,
                actual: self.counters.committed_words(),
            });
        }
        let reserved = self.reserved_words();
        if reserved != self.counters.reserved_words() {
            return Err(VerifyError::Counter {
                name: "reserved",
                expected: reserved,
                actual: self.counters.reserved_words(),
            });
        }
        if committed > self.limiter.committed_words() {
            return Err(VerifyError::Counter {
                name: "limiter",
                expected: committed,
                actual: self.limiter.committed_words(),
            });
        }
        if !self.expandable && self.nodes.len() != 1 {
            return Err(VerifyError::Counter {
                name: "nodes",
                expected: 1,
                actual: self.nodes.len(),
            });
        }
        Ok(())
    }
}

impl Drop for VirtualSpaceList {
    fn drop(&mut self) {
        // Credit the limiter, which may outlive this context.
        let limiter = Arc::clone(&self.limiter);
        for node in self.nodes.values_mut() {
            let size = node.word_size();
            let released = node.uncommit_range(0, size, &limiter);
            self.counters.sub_committed(released);
            self.counters.sub_reserved(size);
        }
        debug!(context = %self.name, nodes = self.nodes.len(), "virtual space released");
        self.nodes.clear();
    }
}
