//! Statistics for chunks in use by arenas.

use std::fmt;

use chunkspace_core::VerifyError;

use crate::scale::{write_scaled_words, write_scaled_words_and_share, Scale};

/// Totals for one or more in-use chunks.
///
/// ```text
/// word_size = committed + uncommitted
/// committed = used + free + waste
/// ```
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct InUseChunkStats {
    /// Number of chunks.
    pub num: usize,
    /// Sum of chunk sizes in words (committed and uncommitted).
    pub word_size: usize,
    /// Committed words.
    pub committed_words: usize,
    /// Words handed out to clients and not yet deallocated.
    pub used_words: usize,
    /// Committed words available for reuse: the untouched tail behind each
    /// bump pointer plus free-block-list words.
    pub free_words: usize,
    /// Committed words lost to padding and unusable remainders.
    pub waste_words: usize,
}

impl InUseChunkStats {
    /// Accumulate `other` into `self`.
    pub fn add(&mut self, other: &InUseChunkStats) {
        self.num += other.num;
        self.word_size += other.word_size;
        self.committed_words += other.committed_words;
        self.used_words += other.used_words;
        self.free_words += other.free_words;
        self.waste_words += other.waste_words;
    }

    /// Check the accounting identities.
    pub fn verify(&self) -> Result<(), VerifyError> {
        let sum = self.used_words + self.free_words + self.waste_words;
        if self.committed_words != sum {
            return Err(VerifyError::Stats {
                reason: format!(
                    "committed {} != used {} + free {} + waste {}",
                    self.committed_words, self.used_words, self.free_words, self.waste_words
                ),
            });
        }
        if self.word_size < self.committed_words {
            return Err(VerifyError::Stats {
                reason: format!(
                    "capacity {} < committed {}",
                    self.word_size, self.committed_words
                ),
            });
        }
        Ok(())
    }

    /// Render as a single line.
    pub fn print_on(&self, out: &mut dyn fmt::Write, scale: Scale) -> fmt::Result {
        write!(out, "{:4} chunks, ", self.num)?;
        if self.num == 0 {
            return Ok(());
        }
        write_scaled_words(out, self.word_size, scale)?;
        write!(out, " capacity, ")?;
        write_scaled_words_and_share(out, self.committed_words, self.word_size, scale)?;
        write!(out, " committed, of which ")?;
        write_scaled_words_and_share(out, self.used_words, self.committed_words, scale)?;
        write!(out, " used, ")?;
        write_scaled_words_and_share(out, self.free_words, self.committed_words, scale)?;
        write!(out, " free, ")?;
        write_scaled_words_and_share(out, self.waste_words, self.committed_words, scale)?;
        write!(out, " waste")
    }
}

impl fmt::Display for InUseChunkStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.print_on(f, Scale::Dynamic)
    }
}
