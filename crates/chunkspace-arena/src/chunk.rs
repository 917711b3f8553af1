//! Chunk headers and the index-based buddy tree.
//!
//! Every chunk the manager knows about (free, in use, or split into two
//! children) has a [`ChunkHeader`] in the [`ChunkTable`] slab. Buddies are
//! found through the parent's child ids, never by address arithmetic, so
//! a header can be looked up, merged, or retired in O(1).
//!
//! Slots of merged-away children are recycled through a free-slot stack.
//! A recycled slot gets a fresh header; stale [`ChunkId`]s are never held
//! outside the manager, so reuse is safe.

use chunkspace_core::{ChunkId, ChunkLevel, NodeId, WordAddr};

/// Lifecycle state of a chunk header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChunkState {
    /// On a free list, available to `get_chunk`.
    Free,
    /// Owned by exactly one arena through an [`InUseChunk`] token.
    InUse,
    /// Split into two children; the header only anchors the tree.
    Split,
}

/// Metadata for one chunk.
#[derive(Clone, Debug)]
pub struct ChunkHeader {
    /// Node the chunk lives in.
    pub node: NodeId,
    /// Chunk level.
    pub level: ChunkLevel,
    /// Word offset within the node.
    pub offset: usize,
    /// Absolute address.
    pub base: WordAddr,
    /// Current state.
    pub state: ChunkState,
    /// Parent header; `None` for top chunks.
    pub parent: Option<ChunkId>,
    /// Children while split: `[leader, follower]`, leader at the lower address.
    pub children: Option<[ChunkId; 2]>,
}

impl ChunkHeader {
    /// Size in words.
    pub fn word_size(&self) -> usize {
        self.level.word_size()
    }

    /// Whether this chunk is the lower half of its buddy pair.
    pub fn is_leader(&self) -> bool {
        self.parent.is_some() && self.offset % (2 * self.word_size()) == 0
    }
}

/// Slab of chunk headers keyed by [`ChunkId`].
#[derive(Debug, Default)]
pub struct ChunkTable {
    slots: Vec<Option<ChunkHeader>>,
    free_slots: Vec<u32>,
    live: usize,
}

impl ChunkTable {
    /// An empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a header, reusing a retired slot when one exists.
    pub fn insert(&mut self, header: ChunkHeader) -> ChunkId {
        self.live += 1;
        if let Some(slot) = self.free_slots.pop() {
            self.slots[slot as usize] = Some(header);
            ChunkId(slot)
        } else {
            let slot = self.slots.len() as u32;
            self.slots.push(Some(header));
            ChunkId(slot)
        }
    }

    /// Retire a header, returning it.
    pub fn remove(&mut self, id: ChunkId) -> ChunkHeader {
        let header = self.slots.get_mut(id.index()).and_then(Option::take);
        match header {
            Some(header) => {
                self.live -= 1;
                self.free_slots.push(id.0);
                header
            }
            None => panic!("chunkspace invariant violated: removing dead {id}"),
        }
    }

    /// Look up a live header.
    ///
    /// # Panics
    ///
    /// Panics if `id` is not live.
    pub fn get(&self, id: ChunkId) -> &ChunkHeader {
        match self.slots.get(id.index()).and_then(Option::as_ref) {
            Some(header) => header,
            None => panic!("chunkspace invariant violated: {id} is not live"),
        }
    }

    /// Look up a live header mutably.
    ///
    /// # Panics
    ///
    /// Panics if `id` is not live.
    pub fn get_mut(&mut self, id: ChunkId) -> &mut ChunkHeader {
        match self.slots.get_mut(id.index()).and_then(Option::as_mut) {
            Some(header) => header,
            None => panic!("chunkspace invariant violated: {id} is not live"),
        }
    }

    /// Whether `id` names a live header.
    pub fn contains(&self, id: ChunkId) -> bool {
        matches!(self.slots.get(id.index()), Some(Some(_)))
    }

    /// The other child of `id`'s parent, if `id` has a parent.
    pub fn buddy(&self, id: ChunkId) -> Option<ChunkId> {
        let parent = self.get(id).parent?;
        let children = self.get(parent).children?;
        Some(if children[0] == id {
            children[1]
        } else {
            children[0]
        })
    }

    /// Number of live headers.
    pub fn len(&self) -> usize {
        self.live
    }

    /// Whether the table holds no live headers.
    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Iterate over live headers.
    pub fn iter(&self) -> impl Iterator<Item = (ChunkId, &ChunkHeader)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_ref().map(|h| (ChunkId(i as u32), h)))
    }
}

/// Ownership token for a chunk handed to an arena.
///
/// Not `Clone`: exactly one arena holds a given chunk, and the token goes
/// back to the manager on return. The committed prefix is cached here so
/// the arena can bump-allocate without the context lock.
#[derive(Debug, PartialEq, Eq)]
pub struct InUseChunk {
    pub(crate) id: ChunkId,
    pub(crate) node: NodeId,
    pub(crate) level: ChunkLevel,
    pub(crate) base: WordAddr,
    pub(crate) committed_words: usize,
}

impl InUseChunk {
    /// Header id.
    pub fn id(&self) -> ChunkId {
        self.id
    }

    /// Node the chunk lives in.
    pub fn node(&self) -> NodeId {
        self.node
    }

    /// Chunk level.
    pub fn level(&self) -> ChunkLevel {
        self.level
    }

    /// First word of the chunk.
    pub fn base(&self) -> WordAddr {
        self.base
    }

    /// Size in words.
    pub fn word_size(&self) -> usize {
        self.level.word_size()
    }

    /// Committed prefix in words.
    pub fn committed_words(&self) -> usize {
        self.committed_words
    }

    /// Whether `[addr, addr + words)` lies inside the chunk.
    pub fn contains_span(&self, addr: WordAddr, words: usize) -> bool {
        addr >= self.base && addr + words <= self.base + self.word_size()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(level: u8, offset: usize, parent: Option<ChunkId>) -> ChunkHeader {
        ChunkHeader {
            node: NodeId(0),
            level: ChunkLevel::new(level).unwrap(),
            offset,
            base: WordAddr(1 << 20) + offset,
            state: ChunkState::Free,
            parent,
            children: None,
        }
    }

    #[test]
    fn slots_are_recycled() {
        let mut t = ChunkTable::new();
        let a = t.insert(header(0, 0, None));
        let b = t.insert(header(1, 0, Some(a)));
        t.remove(b);
        let c = t.insert(header(1, 0, Some(a)));
        assert_eq!(b, c);
        assert_eq!(t.len(), 2);
    }

    #[test]
    fn buddy_is_other_child() {
        let mut t = ChunkTable::new();
        let root = t.insert(header(0, 0, None));
        let half = ChunkLevel::new(1).unwrap().word_size();
        let lo = t.insert(header(1, 0, Some(root)));
        let hi = t.insert(header(1, half, Some(root)));
        t.get_mut(root).children = Some([lo, hi]);
        assert_eq!(t.buddy(lo), Some(hi));
        assert_eq!(t.buddy(hi), Some(lo));
        assert_eq!(t.buddy(root), None);
        assert!(t.get(lo).is_leader());
        assert!(!t.get(hi).is_leader());
    }

    #[test]
    #[should_panic(expected = "is not live")]
    fn stale_lookup_is_fatal() {
        let mut t = ChunkTable::new();
        let a = t.insert(header(0, 0, None));
        t.remove(a);
        t.get(a);
    }

    #[test]
    fn token_span_check() {
        let chunk = InUseChunk {
            id: ChunkId(0),
            node: NodeId(0),
            level: ChunkLevel::HIGHEST,
            base: WordAddr(1000),
            committed_words: 128,
        };
        assert!(chunk.contains_span(WordAddr(1000), 128));
        assert!(!chunk.contains_span(WordAddr(1001), 128));
        assert!(!chunk.contains_span(WordAddr(999), 1));
    }
}
