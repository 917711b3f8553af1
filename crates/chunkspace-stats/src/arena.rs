//! Per-arena and per-loader statistics.

use std::fmt;

use chunkspace_core::{ChunkLevel, VerifyError, NUM_CHUNK_LEVELS};

use crate::chunk::InUseChunkStats;
use crate::scale::{write_scaled_words, Scale};

/// Statistics for one or more arenas, broken down by chunk level.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ArenaStats {
    /// In-use chunk statistics, indexed by [`ChunkLevel::index`].
    pub stats: [InUseChunkStats; NUM_CHUNK_LEVELS],
    /// Number of blocks on the free-block list.
    pub free_blocks_num: usize,
    /// Total words on the free-block list.
    pub free_blocks_word_size: usize,
}

impl ArenaStats {
    /// Accumulate `other` into `self`.
    pub fn add(&mut self, other: &ArenaStats) {
        for (mine, theirs) in self.stats.iter_mut().zip(other.stats.iter()) {
            mine.add(theirs);
        }
        self.free_blocks_num += other.free_blocks_num;
        self.free_blocks_word_size += other.free_blocks_word_size;
    }

    /// Stats for one level.
    pub fn level(&self, level: ChunkLevel) -> &InUseChunkStats {
        &self.stats[level.index()]
    }

    /// Sum over all levels.
    pub fn totals(&self) -> InUseChunkStats {
        let mut out = InUseChunkStats::default();
        for s in &self.stats {
            out.add(s);
        }
        out
    }

    /// Check every level and the free-block totals.
    pub fn verify(&self) -> Result<(), VerifyError> {
        for s in &self.stats {
            s.verify()?;
        }
        let totals = self.totals();
        if self.free_blocks_word_size > totals.free_words {
            return Err(VerifyError::Stats {
                reason: format!(
                    "free-block words {} exceed free words {}",
                    self.free_blocks_word_size, totals.free_words
                ),
            });
        }
        if (self.free_blocks_num == 0) != (self.free_blocks_word_size == 0) {
            return Err(VerifyError::Stats {
                reason: format!(
                    "{} free blocks holding {} words",
                    self.free_blocks_num, self.free_blocks_word_size
                ),
            });
        }
        Ok(())
    }

    /// Render the report. With `detailed`, one line per non-empty level
    /// precedes the totals.
    pub fn print_on(&self, out: &mut dyn fmt::Write, scale: Scale, detailed: bool) -> fmt::Result {
        if detailed {
            writeln!(out, "Usage by chunk level:")?;
            for level in ChunkLevel::all() {
                let s = self.level(level);
                if s.num == 0 {
                    continue;
                }
                write!(out, "  {level}: ")?;
                s.print_on(out, scale)?;
                writeln!(out)?;
            }
            write!(out, "            -total-: ")?;
        }
        self.totals().print_on(out, scale)?;
        writeln!(out)?;
        if self.free_blocks_num > 0 {
            write!(out, "Deallocated: {} blocks with ", self.free_blocks_num)?;
            write_scaled_words(out, self.free_blocks_word_size, scale)?;
            writeln!(out)?;
        }
        Ok(())
    }
}

impl fmt::Display for ArenaStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.print_on(f, Scale::Dynamic, true)
    }
}

/// Statistics for one or more class-loading units: their non-class and
/// class arenas side by side.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ClmsStats {
    /// Non-class arena statistics.
    pub arena_stats_nonclass: ArenaStats,
    /// Class arena statistics.
    pub arena_stats_class: ArenaStats,
}

impl ClmsStats {
    /// Accumulate `other` into `self`.
    pub fn add(&mut self, other: &ClmsStats) {
        self.arena_stats_nonclass.add(&other.arena_stats_nonclass);
        self.arena_stats_class.add(&other.arena_stats_class);
    }

    /// Combined class and non-class statistics.
    pub fn totals(&self) -> ArenaStats {
        let mut out = self.arena_stats_nonclass;
        out.add(&self.arena_stats_class);
        out
    }

    /// Check both halves.
    pub fn verify(&self) -> Result<(), VerifyError> {
        self.arena_stats_nonclass.verify()?;
        self.arena_stats_class.verify()
    }

    /// Render non-class, class and combined sections.
    pub fn print_on(&self, out: &mut dyn fmt::Write, scale: Scale, detailed: bool) -> fmt::Result {
        writeln!(out, "Non-class space:")?;
        self.arena_stats_nonclass.print_on(out, scale, detailed)?;
        if self.arena_stats_class.totals().num > 0 {
            writeln!(out, "    Class space:")?;
            self.arena_stats_class.print_on(out, scale, detailed)?;
            writeln!(out, "           Both:")?;
            self.totals().print_on(out, scale, detailed)?;
        }
        Ok(())
    }
}

impl fmt::Display for ClmsStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.print_on(f, Scale::Dynamic, false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn one_chunk(level: u8, used: usize, free: usize) -> ArenaStats {
        let level = ChunkLevel::new(level).unwrap();
        let mut a = ArenaStats::default();
        a.stats[level.index()] = InUseChunkStats {
            num: 1,
            word_size: level.word_size(),
            committed_words: used + free,
            used_words: used,
            free_words: free,
            waste_words: 0,
        };
        a
    }

    #[test]
    fn totals_sum_levels() {
        let mut a = one_chunk(12, 10, 118);
        a.add(&one_chunk(11, 100, 156));
        let t = a.totals();
        assert_eq!(t.num, 2);
        assert_eq!(t.word_size, 128 + 256);
        assert_eq!(t.used_words, 110);
        a.verify().unwrap();
    }

    #[test]
    fn free_blocks_bounded_by_free_words() {
        let mut a = one_chunk(12, 10, 118);
        a.free_blocks_num = 1;
        a.free_blocks_word_size = 200;
        assert!(a.verify().is_err());
    }

    #[test]
    fn clms_totals_combine_halves() {
        let c = ClmsStats {
            arena_stats_nonclass: one_chunk(10, 12, 500),
            arena_stats_class: one_chunk(12, 4, 124),
        };
        assert_eq!(c.totals().totals().used_words, 16);
        c.verify().unwrap();
    }

    #[test]
    fn detailed_print_lists_levels() {
        let mut a = one_chunk(12, 10, 118);
        a.free_blocks_num = 1;
        a.free_blocks_word_size = 4;
        let mut s = String::new();
        a.print_on(&mut s, Scale::Words, true).unwrap();
        assert!(s.contains("lv12 (1K)"));
        assert!(s.contains("-total-"));
        assert!(s.contains("Deallocated: 1 blocks with 4 words"));
    }

    #[test]
    fn clms_print_omits_empty_class_space() {
        let c = ClmsStats {
            arena_stats_nonclass: one_chunk(10, 12, 500),
            arena_stats_class: ArenaStats::default(),
        };
        let text = c.to_string();
        assert!(text.contains("Non-class space:"));
        assert!(!text.contains("Class space:"));
    }
}
