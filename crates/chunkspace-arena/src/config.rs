//! Context configuration parameters.

use chunkspace_core::{ConfigError, MAX_CHUNK_WORD_SIZE, MIN_CHUNK_WORD_SIZE};

/// Tunables shared by every arena of a context.
///
/// Validated at context construction; immutable afterwards.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Settings {
    /// Commit granularity in words.
    ///
    /// Default: 8192 (64 KiB). Must be a power of two between the smallest
    /// and the largest chunk size.
    pub commit_granule_words: usize,

    /// Size of each reservation appended by an expandable context, in words.
    ///
    /// Default: 8 root chunks (32 MiB). Must be a positive multiple of the
    /// root chunk size. Ignored by non-expandable contexts.
    pub node_words: usize,

    /// Let arenas grow their current chunk by absorbing its free buddy
    /// before asking for a new chunk. Default: `true`.
    pub enlarge_chunks_in_place: bool,

    /// Let `purge()` uncommit free chunks of at least one granule.
    /// Default: `true`. Node release in expandable mode happens either way.
    pub uncommit_free_chunks: bool,

    /// Run a deep `verify(true)` whenever the context lock is released.
    ///
    /// Expensive. Default: `false`; test suites turn it on.
    pub verify_after_ops: bool,
}

impl Settings {
    /// Default commit granule: 64 KiB.
    pub const DEFAULT_COMMIT_GRANULE_WORDS: usize = 8 * 1024;

    /// Default node size: eight root chunks.
    pub const DEFAULT_NODE_WORDS: usize = 8 * MAX_CHUNK_WORD_SIZE;

    /// Check the settings' structural invariants.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let g = self.commit_granule_words;
        if !g.is_power_of_two() || !(MIN_CHUNK_WORD_SIZE..=MAX_CHUNK_WORD_SIZE).contains(&g) {
            return Err(ConfigError::InvalidCommitGranule { configured: g });
        }
        if self.node_words == 0 || self.node_words % MAX_CHUNK_WORD_SIZE != 0 {
            return Err(ConfigError::InvalidNodeSize {
                configured: self.node_words,
            });
        }
        Ok(())
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            commit_granule_words: Self::DEFAULT_COMMIT_GRANULE_WORDS,
            node_words: Self::DEFAULT_NODE_WORDS,
            enlarge_chunks_in_place: true,
            uncommit_free_chunks: true,
            verify_after_ops: false,
        }
    }
}

/// Construction parameters for a [`Context`](crate::Context).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContextConfig {
    /// Name used in diagnostics.
    pub name: String,

    /// Size of the single fixed reservation, in words.
    ///
    /// Zero selects an expandable context. Non-zero values are rounded down
    /// to a multiple of the smallest chunk size.
    pub reserve_limit_words: usize,

    /// Commit ceiling in words. Zero means unlimited.
    pub commit_limit_words: usize,

    /// Tunables.
    pub settings: Settings,
}

impl ContextConfig {
    /// An expandable, unlimited context with default settings.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            reserve_limit_words: 0,
            commit_limit_words: 0,
            settings: Settings::default(),
        }
    }

    /// An expandable context with the given commit ceiling.
    pub fn expandable(name: impl Into<String>, commit_limit_words: usize) -> Self {
        Self {
            commit_limit_words,
            ..Self::new(name)
        }
    }

    /// A non-expandable context over one reservation of `reserve_limit_words`.
    pub fn non_expandable(
        name: impl Into<String>,
        reserve_limit_words: usize,
        commit_limit_words: usize,
    ) -> Self {
        Self {
            reserve_limit_words,
            commit_limit_words,
            ..Self::new(name)
        }
    }

    /// Replace the settings.
    pub fn with_settings(mut self, settings: Settings) -> Self {
        self.settings = settings;
        self
    }

    /// Whether this configuration describes an expandable context.
    pub fn is_expandable(&self) -> bool {
        self.reserve_limit_words == 0
    }

    /// The reservation actually made by a non-expandable context.
    pub fn effective_reserve_words(&self) -> usize {
        self.reserve_limit_words - self.reserve_limit_words % MIN_CHUNK_WORD_SIZE
    }

    /// Check the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.is_empty() {
            return Err(ConfigError::EmptyName);
        }
        if !self.is_expandable() && self.effective_reserve_words() == 0 {
            return Err(ConfigError::ReserveLimitTooSmall {
                configured: self.reserve_limit_words,
                minimum: MIN_CHUNK_WORD_SIZE,
            });
        }
        self.settings.validate()
    }
}
