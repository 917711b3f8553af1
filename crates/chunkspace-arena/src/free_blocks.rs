//! Arena-local free-block list.
//!
//! Deallocated spans are kept here for reuse by later allocations of the
//! same arena. Blocks are indexed twice: by size for best-fit lookup and
//! by address for overlap detection. Adjacent blocks are not coalesced.

use std::collections::BTreeMap;

use smallvec::SmallVec;

use chunkspace_core::{UsageError, WordAddr, MIN_BLOCK_WORDS};

/// Size-indexed best-fit free list.
#[derive(Debug, Default)]
pub struct FreeBlocks {
    /// Block addresses per size; the last pushed is reused first.
    by_size: BTreeMap<usize, SmallVec<[WordAddr; 4]>>,
    by_addr: BTreeMap<WordAddr, usize>,
    total_words: usize,
}

impl FreeBlocks {
    /// An empty list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `[addr, addr + words)` overlaps a block on the list.
    ///
    /// A range running past the end of the address space overlaps every
    /// block at or above `addr`.
    pub fn overlaps(&self, addr: WordAddr, words: usize) -> bool {
        let end = addr.checked_offset(words);
        let before = self
            .by_addr
            .range(..=addr)
            .next_back()
            .is_some_and(|(&a, &w)| a + w > addr);
        let after = self
            .by_addr
            .range(addr..)
            .next()
            .is_some_and(|(&a, _)| end.is_none_or(|end| a < end));
        before || after
    }

    /// Put a block on the list.
    ///
    /// Fails with [`UsageError::DoubleFree`] if the block overlaps one
    /// already listed.
    pub fn add_block(&mut self, addr: WordAddr, words: usize) -> Result<(), UsageError> {
        invariant!(
            words >= MIN_BLOCK_WORDS,
            "free block of {words} words is below the minimum of {MIN_BLOCK_WORDS}"
        );
        if self.overlaps(addr, words) {
            return Err(UsageError::DoubleFree { addr, words });
        }
        self.by_size.entry(words).or_default().push(addr);
        self.by_addr.insert(addr, words);
        self.total_words += words;
        Ok(())
    }

    /// Take the smallest block of at least `min_words`.
    pub fn remove_block(&mut self, min_words: usize) -> Option<(WordAddr, usize)> {
        let (&size, stack) = self.by_size.range_mut(min_words..).next()?;
        let addr = stack.pop()?;
        if stack.is_empty() {
            self.by_size.remove(&size);
        }
        self.by_addr.remove(&addr);
        self.total_words -= size;
        Some((addr, size))
    }

    /// Number of blocks.
    pub fn count(&self) -> usize {
        self.by_addr.len()
    }

    /// Total words held.
    pub fn total_words(&self) -> usize {
        self.total_words
    }

    /// Whether the list is empty.
    pub fn is_empty(&self) -> bool {
        self.by_addr.is_empty()
    }

    /// Blocks in address order.
    pub fn iter(&self) -> impl Iterator<Item = (WordAddr, usize)> + '_ {
        self.by_addr.iter().map(|(&a, &w)| (a, w))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn best_fit_prefers_smallest_sufficient() {
        let mut fb = FreeBlocks::new();
        fb.add_block(WordAddr(100), 10).unwrap();
        fb.add_block(WordAddr(200), 4).unwrap();
        fb.add_block(WordAddr(300), 6).unwrap();
        assert_eq!(fb.remove_block(5), Some((WordAddr(300), 6)));
        assert_eq!(fb.remove_block(5), Some((WordAddr(100), 10)));
        assert_eq!(fb.remove_block(5), None);
        assert_eq!(fb.total_words(), 4);
    }

    #[test]
    fn same_size_is_lifo() {
        let mut fb = FreeBlocks::new();
        fb.add_block(WordAddr(10), 2).unwrap();
        fb.add_block(WordAddr(20), 2).unwrap();
        assert_eq!(fb.remove_block(2), Some((WordAddr(20), 2)));
        assert_eq!(fb.remove_block(2), Some((WordAddr(10), 2)));
        assert!(fb.is_empty());
    }

    #[test]
    fn overlapping_insert_is_double_free() {
        let mut fb = FreeBlocks::new();
        fb.add_block(WordAddr(100), 10).unwrap();
        for (addr, words) in [(100, 10), (105, 2), (95, 6), (109, 4), (90, 20)] {
            assert_eq!(
                fb.add_block(WordAddr(addr), words),
                Err(UsageError::DoubleFree {
                    addr: WordAddr(addr),
                    words
                })
            );
        }
        fb.add_block(WordAddr(110), 2).unwrap();
        fb.add_block(WordAddr(98), 2).unwrap();
        assert_eq!(fb.count(), 3);
        assert_eq!(fb.total_words(), 14);
    }

    #[test]
    fn overlap_check_survives_address_space_end() {
        let mut fb = FreeBlocks::new();
        fb.add_block(WordAddr(100), 10).unwrap();
        assert!(fb.overlaps(WordAddr(105), usize::MAX));
        assert!(!fb.overlaps(WordAddr(110), usize::MAX));
        assert!(!fb.overlaps(WordAddr(u64::MAX), 4));
    }

    #[cfg(not(miri))]
    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn totals_track_contents(sizes in prop::collection::vec(2usize..64, 1..40)) {
                let mut fb = FreeBlocks::new();
                let mut addr = 1000u64;
                for &s in &sizes {
                    fb.add_block(WordAddr(addr), s).unwrap();
                    addr += s as u64 + 1;
                }
                prop_assert_eq!(fb.total_words(), sizes.iter().sum::<usize>());
                let mut drained = 0;
                while let Some((_, w)) = fb.remove_block(2) {
                    drained += w;
                }
                prop_assert_eq!(drained, sizes.iter().sum::<usize>());
                prop_assert_eq!(fb.count(), 0);
            }
        }
    }
}
