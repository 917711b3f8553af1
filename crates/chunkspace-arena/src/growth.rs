//! Chunk growth schedules.
//!
//! An arena asks for progressively larger chunks as it grows: the n-th
//! chunk request is served at the level the schedule names for step n.
//! Past the end of a schedule its last entry repeats, so growth is bounded.

use chunkspace_core::{ChunkLevel, ClientCategory};

/// A static schedule of chunk levels, one entry per growth step.
#[derive(Debug, PartialEq, Eq)]
pub struct ArenaGrowthPolicy {
    steps: &'static [ChunkLevel],
}

const fn lv(level: u8) -> ChunkLevel {
    match ChunkLevel::new(level) {
        Some(l) => l,
        None => panic!("growth schedule names a level past the finest"),
    }
}

// Levels: 0 = 4M, 2 = 1M, 3 = 512K, 4 = 256K, 6 = 64K, 7 = 32K,
// 8 = 16K, 9 = 8K, 10 = 4K, 11 = 2K, 12 = 1K.

static STANDARD_NON_CLASS: ArenaGrowthPolicy = ArenaGrowthPolicy {
    steps: &[lv(10), lv(10), lv(10), lv(9), lv(8), lv(7), lv(6)],
};

static STANDARD_CLASS: ArenaGrowthPolicy = ArenaGrowthPolicy {
    steps: &[lv(11), lv(11), lv(10), lv(9), lv(8)],
};

static REFLECTION_NON_CLASS: ArenaGrowthPolicy = ArenaGrowthPolicy {
    steps: &[lv(12), lv(12), lv(11)],
};

static REFLECTION_CLASS: ArenaGrowthPolicy = ArenaGrowthPolicy { steps: &[lv(12)] };

static MIRROR_HOLDER: ArenaGrowthPolicy = ArenaGrowthPolicy { steps: &[lv(12)] };

static BOOT_NON_CLASS: ArenaGrowthPolicy = ArenaGrowthPolicy {
    steps: &[lv(2), lv(1), lv(0)],
};

static BOOT_CLASS: ArenaGrowthPolicy = ArenaGrowthPolicy {
    steps: &[lv(4), lv(3), lv(2)],
};

impl ArenaGrowthPolicy {
    /// The schedule for an arena of `category` serving class or non-class
    /// metadata.
    pub fn for_category(category: ClientCategory, is_class: bool) -> &'static ArenaGrowthPolicy {
        match (category, is_class) {
            (ClientCategory::Standard, false) => &STANDARD_NON_CLASS,
            (ClientCategory::Standard, true) => &STANDARD_CLASS,
            (ClientCategory::Reflection, false) => &REFLECTION_NON_CLASS,
            (ClientCategory::Reflection, true) => &REFLECTION_CLASS,
            (ClientCategory::ClassMirrorHolder, _) => &MIRROR_HOLDER,
            (ClientCategory::Boot, false) => &BOOT_NON_CLASS,
            (ClientCategory::Boot, true) => &BOOT_CLASS,
        }
    }

    /// Level for the `step`-th chunk request (zero-based).
    pub fn level_at_step(&self, step: usize) -> ChunkLevel {
        let last = self.steps.len() - 1;
        self.steps[step.min(last)]
    }

    /// The raw schedule.
    pub fn steps(&self) -> &'static [ChunkLevel] {
        self.steps
    }
}
