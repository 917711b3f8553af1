//! Chunk manager statistics: free chunks by level.

use std::fmt;

use chunkspace_core::{ChunkLevel, VerifyError, NUM_CHUNK_LEVELS};

use crate::scale::{write_scaled_words, Scale};

/// Free chunks held by one or more chunk managers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ChunkManagerStats {
    /// Number of free chunks per level.
    pub num_chunks: [usize; NUM_CHUNK_LEVELS],
    /// Committed words across the free chunks of each level.
    pub committed_word_size: [usize; NUM_CHUNK_LEVELS],
}

impl ChunkManagerStats {
    /// Accumulate `other` into `self`.
    pub fn add(&mut self, other: &ChunkManagerStats) {
        for i in 0..NUM_CHUNK_LEVELS {
            self.num_chunks[i] += other.num_chunks[i];
            self.committed_word_size[i] += other.committed_word_size[i];
        }
    }

    /// Total size in words of all free chunks.
    pub fn total_word_size(&self) -> usize {
        ChunkLevel::all()
            .map(|l| self.num_chunks[l.index()] * l.word_size())
            .sum()
    }

    /// Total committed words in all free chunks.
    pub fn total_committed_word_size(&self) -> usize {
        self.committed_word_size.iter().sum()
    }

    /// Total number of free chunks.
    pub fn total_chunks(&self) -> usize {
        self.num_chunks.iter().sum()
    }

    /// Check that no level reports more committed words than it holds.
    pub fn verify(&self) -> Result<(), VerifyError> {
        for level in ChunkLevel::all() {
            let i = level.index();
            let capacity = self.num_chunks[i] * level.word_size();
            if self.committed_word_size[i] > capacity {
                return Err(VerifyError::Stats {
                    reason: format!(
                        "{level}: committed {} exceeds capacity {capacity}",
                        self.committed_word_size[i]
                    ),
                });
            }
        }
        Ok(())
    }

    /// Render one line per non-empty level followed by totals.
    pub fn print_on(&self, out: &mut dyn fmt::Write, scale: Scale) -> fmt::Result {
        for level in ChunkLevel::all() {
            let i = level.index();
            if self.num_chunks[i] == 0 {
                continue;
            }
            write!(out, "  {level}: {:4}, capacity ", self.num_chunks[i])?;
            write_scaled_words(out, self.num_chunks[i] * level.word_size(), scale)?;
            write!(out, ", committed ")?;
            write_scaled_words(out, self.committed_word_size[i], scale)?;
            writeln!(out)?;
        }
        write!(out, "  Total: {:4}, capacity ", self.total_chunks())?;
        write_scaled_words(out, self.total_word_size(), scale)?;
        write!(out, ", committed ")?;
        write_scaled_words(out, self.total_committed_word_size(), scale)?;
        writeln!(out)
    }
}

impl fmt::Display for ChunkManagerStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.print_on(f, Scale::Dynamic)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn totals_weight_by_level_size() {
        let mut s = ChunkManagerStats::default();
        s.num_chunks[ChunkLevel::ROOT.index()] = 1;
        s.num_chunks[ChunkLevel::HIGHEST.index()] = 2;
        s.committed_word_size[ChunkLevel::HIGHEST.index()] = 128;
        assert_eq!(s.total_chunks(), 3);
        assert_eq!(
            s.total_word_size(),
            ChunkLevel::ROOT.word_size() + 2 * ChunkLevel::HIGHEST.word_size()
        );
        assert_eq!(s.total_committed_word_size(), 128);
        s.verify().unwrap();
    }

    #[test]
    fn verify_rejects_overcommitted_level() {
        let mut s = ChunkManagerStats::default();
        s.num_chunks[ChunkLevel::HIGHEST.index()] = 1;
        s.committed_word_size[ChunkLevel::HIGHEST.index()] = 129;
        assert!(s.verify().is_err());
    }

    #[test]
    fn add_merges_levelwise() {
        let mut a = ChunkManagerStats::default();
        a.num_chunks[3] = 1;
        let mut b = ChunkManagerStats::default();
        b.num_chunks[3] = 2;
        b.committed_word_size[3] = 10;
        a.add(&b);
        assert_eq!(a.num_chunks[3], 3);
        assert_eq!(a.committed_word_size[3], 10);
    }

    #[test]
    fn print_has_total_line() {
        let s = ChunkManagerStats::default();
        assert!(s.to_string().contains("Total:"));
    }
}
