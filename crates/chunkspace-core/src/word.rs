//! Word-granular addresses.
//!
//! All sizes in chunkspace are measured in 64-bit words. Addresses are
//! [`WordAddr`] values in a simulated address space; they are never
//! dereferenced directly, only resolved through the owning context.

use std::fmt;
use std::ops::{Add, Sub};

/// Size of one allocation word in bytes.
pub const BYTES_PER_WORD: usize = 8;

/// Smallest span an arena ever hands out or keeps on its free-block list.
///
/// Requests below this size are padded up; the padding is accounted as
/// waste. Free-block remainders below this size are absorbed as waste.
pub const MIN_BLOCK_WORDS: usize = 2;

/// A word address inside a context's simulated address space.
///
/// Address zero is never handed out, so it can serve as a sentinel in
/// diagnostics output.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WordAddr(pub u64);

impl WordAddr {
    /// Offset this address by `words`.
    pub fn offset(self, words: usize) -> Self {
        Self(self.0 + words as u64)
    }

    /// Offset this address by `words`, or `None` past the end of the
    /// address space.
    pub fn checked_offset(self, words: usize) -> Option<Self> {
        let words = u64::try_from(words).ok()?;
        self.0.checked_add(words).map(Self)
    }

    /// Number of words from `base` up to `self`.
    ///
    /// # Panics
    ///
    /// Panics if `base > self`.
    pub fn words_since(self, base: WordAddr) -> usize {
        assert!(base <= self, "address {self} precedes base {base}");
        (self.0 - base.0) as usize
    }

    /// The address expressed in bytes, for human-readable output.
    pub fn byte_address(self) -> u64 {
        self.0 * BYTES_PER_WORD as u64
    }
}

impl Add<usize> for WordAddr {
    type Output = WordAddr;

    fn add(self, rhs: usize) -> WordAddr {
        self.offset(rhs)
    }
}

impl Sub for WordAddr {
    type Output = usize;

    fn sub(self, rhs: WordAddr) -> usize {
        self.words_since(rhs)
    }
}

impl fmt::Display for WordAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:016x}", self.byte_address())
    }
}

/// Convert a word count to bytes.
pub fn words_to_bytes(words: usize) -> usize {
    words * BYTES_PER_WORD
}
