//! Chunk levels and chunk geometry.
//!
//! Chunks come in [`NUM_CHUNK_LEVELS`] power-of-two sizes. Level 0 is the
//! root chunk ([`MAX_CHUNK_WORD_SIZE`] words); every finer level halves
//! the size, down to [`MIN_CHUNK_WORD_SIZE`] at [`ChunkLevel::HIGHEST`].
//!
//! ```text
//! level   0     1     2    ...   10    11    12
//! size    4M    2M    1M   ...   4K    2K    1K    (bytes)
//! ```

use std::fmt;

use crate::word::BYTES_PER_WORD;

/// Number of distinct chunk levels.
pub const NUM_CHUNK_LEVELS: usize = 13;

/// Size of a root (level 0) chunk in words: 4 MiB.
pub const MAX_CHUNK_WORD_SIZE: usize = 512 * 1024;

/// Size of the smallest (level 12) chunk in words: 1 KiB.
pub const MIN_CHUNK_WORD_SIZE: usize = MAX_CHUNK_WORD_SIZE >> (NUM_CHUNK_LEVELS - 1);

/// A chunk size class.
///
/// Lower numbers are coarser (larger) chunks. Ordering follows the level
/// number, so `ChunkLevel::ROOT < ChunkLevel::HIGHEST`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChunkLevel(u8);

impl ChunkLevel {
    /// The root level: the coarsest chunk.
    pub const ROOT: ChunkLevel = ChunkLevel(0);

    /// The finest level.
    pub const HIGHEST: ChunkLevel = ChunkLevel((NUM_CHUNK_LEVELS - 1) as u8);

    /// Construct a level, returning `None` if `level` is out of range.
    pub const fn new(level: u8) -> Option<Self> {
        if (level as usize) < NUM_CHUNK_LEVELS {
            Some(Self(level))
        } else {
            None
        }
    }

    /// The raw level number.
    pub const fn get(self) -> u8 {
        self.0
    }

    /// Index into per-level arrays.
    pub const fn index(self) -> usize {
        self.0 as usize
    }

    /// Size in words of a chunk at this level.
    pub const fn word_size(self) -> usize {
        MAX_CHUNK_WORD_SIZE >> self.0
    }

    /// The next finer level (half the size), or `None` at the finest level.
    pub const fn finer(self) -> Option<Self> {
        Self::new(self.0 + 1)
    }

    /// The next coarser level (twice the size), or `None` at the root.
    pub const fn coarser(self) -> Option<Self> {
        if self.0 == 0 {
            None
        } else {
            Some(Self(self.0 - 1))
        }
    }

    /// The finest level whose chunks can hold `words` words.
    ///
    /// Returns `None` if `words` exceeds a root chunk.
    pub fn fitting(words: usize) -> Option<Self> {
        if words > MAX_CHUNK_WORD_SIZE {
            return None;
        }
        let words = words.max(MIN_CHUNK_WORD_SIZE).next_power_of_two();
        let shift = MAX_CHUNK_WORD_SIZE.trailing_zeros() - words.trailing_zeros();
        Some(Self(shift as u8))
    }

    /// The level whose chunk size is exactly `words`, if any.
    pub fn for_exact_size(words: usize) -> Option<Self> {
        let level = Self::fitting(words)?;
        (level.word_size() == words).then_some(level)
    }

    /// Iterate all levels from root to finest.
    pub fn all() -> impl Iterator<Item = ChunkLevel> {
        (0..NUM_CHUNK_LEVELS as u8).map(ChunkLevel)
    }
}

impl fmt::Display for ChunkLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bytes = self.word_size() * BYTES_PER_WORD;
        if bytes >= 1024 * 1024 {
            write!(f, "lv{:02} ({}M)", self.0, bytes / (1024 * 1024))
        } else {
            write!(f, "lv{:02} ({}K)", self.0, bytes / 1024)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn geometry_constants() {
        assert_eq!(MAX_CHUNK_WORD_SIZE * BYTES_PER_WORD, 4 * 1024 * 1024);
        assert_eq!(MIN_CHUNK_WORD_SIZE * BYTES_PER_WORD, 1024);
        assert_eq!(ChunkLevel::HIGHEST.word_size(), MIN_CHUNK_WORD_SIZE);
    }

    #[test]
    fn fitting_rounds_up_to_next_level() {
        assert_eq!(ChunkLevel::fitting(1), Some(ChunkLevel::HIGHEST));
        assert_eq!(ChunkLevel::fitting(128), Some(ChunkLevel::HIGHEST));
        assert_eq!(ChunkLevel::fitting(129), ChunkLevel::new(11));
        assert_eq!(ChunkLevel::fitting(1000).map(|l| l.word_size()), Some(1024));
        assert_eq!(ChunkLevel::fitting(50_000).map(|l| l.word_size()), Some(65_536));
        assert_eq!(ChunkLevel::fitting(MAX_CHUNK_WORD_SIZE), Some(ChunkLevel::ROOT));
        assert_eq!(ChunkLevel::fitting(MAX_CHUNK_WORD_SIZE + 1), None);
    }

    #[test]
    fn exact_size_lookup() {
        assert_eq!(ChunkLevel::for_exact_size(4096), ChunkLevel::new(7));
        assert_eq!(ChunkLevel::for_exact_size(4095), None);
    }

    #[test]
    fn finer_and_coarser_are_inverse() {
        for level in ChunkLevel::all() {
            if let Some(f) = level.finer() {
                assert_eq!(f.coarser(), Some(level));
                assert_eq!(f.word_size() * 2, level.word_size());
            }
        }
        assert_eq!(ChunkLevel::ROOT.coarser(), None);
        assert_eq!(ChunkLevel::HIGHEST.finer(), None);
    }

    #[test]
    fn display_names_size() {
        assert_eq!(ChunkLevel::ROOT.to_string(), "lv00 (4M)");
        assert_eq!(ChunkLevel::HIGHEST.to_string(), "lv12 (1K)");
    }

    #[cfg(not(miri))]
    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn fitting_level_holds_request(words in 1usize..=MAX_CHUNK_WORD_SIZE) {
                let level = ChunkLevel::fitting(words).unwrap();
                prop_assert!(level.word_size() >= words);
                if let Some(finer) = level.finer() {
                    prop_assert!(finer.word_size() < words);
                }
            }
        }
    }
}
