//! Seeded allocation workloads.
//!
//! Every workload is a pure function of its seed, so a failing run can be
//! replayed exactly.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Distribution of request sizes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SizeMix {
    /// 1 to 8 words: tiny structures, lots of padding.
    Tiny,
    /// 1 to 128 words: typical metadata records.
    Small,
    /// Mostly small, one request in sixteen up to 16 Ki words.
    Mixed,
}

/// Seeded generator of request sizes and decisions.
pub struct Workload {
    rng: ChaCha8Rng,
    mix: SizeMix,
}

impl Workload {
    pub fn new(seed: u64, mix: SizeMix) -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
            mix,
        }
    }

    /// Next request size in words; never zero.
    pub fn next_size(&mut self) -> usize {
        match self.mix {
            SizeMix::Tiny => self.rng.random_range(1..=8),
            SizeMix::Small => self.rng.random_range(1..=128),
            SizeMix::Mixed => {
                if self.rng.random_range(0..16) == 0 {
                    self.rng.random_range(129..=16 * 1024)
                } else {
                    self.rng.random_range(1..=128)
                }
            }
        }
    }

    /// `true` with probability `percent / 100`.
    pub fn chance(&mut self, percent: u32) -> bool {
        self.rng.random_range(0..100) < percent
    }

    /// Uniform index below `len`; `len` must be non-zero.
    pub fn pick(&mut self, len: usize) -> usize {
        self.rng.random_range(0..len)
    }

    /// The first `n` sizes for `seed`.
    pub fn sizes(seed: u64, mix: SizeMix, n: usize) -> Vec<usize> {
        let mut w = Self::new(seed, mix);
        (0..n).map(|_| w.next_size()).collect()
    }
}
