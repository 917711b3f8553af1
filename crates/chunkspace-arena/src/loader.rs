//! Per-loader arena pairs.
//!
//! A class-loading unit allocates class structures and everything else
//! from two arenas. With a separate class context the class arena draws
//! from it; without one, class metadata shares the non-class arena.

use chunkspace_core::{ArenaError, ClientCategory, MetadataType, VerifyError, WordAddr};
use chunkspace_stats::ClmsStats;

use crate::arena::Arena;
use crate::context::Context;

/// The arenas of one class-loading unit.
#[derive(Debug)]
pub struct LoaderSpace {
    category: ClientCategory,
    nonclass: Arena,
    class: Option<Arena>,
}

impl LoaderSpace {
    /// Create the arenas for a unit of `category`.
    pub fn new(nonclass: &Context, class: Option<&Context>, category: ClientCategory) -> Self {
        Self {
            category,
            nonclass: nonclass.create_arena(category, false),
            class: class.map(|ctx| ctx.create_arena(category, true)),
        }
    }

    /// Client category.
    pub fn category(&self) -> ClientCategory {
        self.category
    }

    fn arena(&self, kind: MetadataType) -> &Arena {
        match (kind, &self.class) {
            (MetadataType::Class, Some(class)) => class,
            _ => &self.nonclass,
        }
    }

    /// The non-class arena.
    pub fn nonclass_arena(&self) -> &Arena {
        &self.nonclass
    }

    /// The class arena, if a class context was supplied.
    pub fn class_arena(&self) -> Option<&Arena> {
        self.class.as_ref()
    }

    /// Allocate `words` from the arena serving `kind`.
    pub fn allocate(&self, words: usize, kind: MetadataType) -> Result<WordAddr, ArenaError> {
        self.arena(kind).allocate(words)
    }

    /// Deallocate a span from the arena serving `kind`.
    pub fn deallocate(&self, addr: WordAddr, words: usize, kind: MetadataType) -> Result<(), ArenaError> {
        self.arena(kind).deallocate(addr, words)
    }

    /// Words in use across both arenas.
    pub fn used_words(&self) -> usize {
        self.nonclass.used_words() + self.class.as_ref().map_or(0, Arena::used_words)
    }

    /// Statistics of both arenas.
    pub fn statistics(&self) -> ClmsStats {
        ClmsStats {
            arena_stats_nonclass: self.nonclass.statistics(),
            arena_stats_class: self
                .class
                .as_ref()
                .map(Arena::statistics)
                .unwrap_or_default(),
        }
    }

    /// Check both arenas.
    pub fn verify(&self) -> Result<(), VerifyError> {
        self.nonclass.verify()?;
        if let Some(class) = &self.class {
            class.verify()?;
        }
        self.statistics().verify()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ContextConfig;

    #[test]
    fn class_metadata_goes_to_class_context() {
        let nonclass = Context::create(ContextConfig::new("non-class")).unwrap();
        let class = Context::create(ContextConfig::non_expandable("class", 64 * 1024, 0)).unwrap();
        let loader = LoaderSpace::new(&nonclass, Some(&class), ClientCategory::Standard);
        loader.allocate(40, MetadataType::Class).unwrap();
        loader.allocate(100, MetadataType::NonClass).unwrap();
        assert_eq!(class.counters().used_words, 40);
        assert_eq!(nonclass.counters().used_words, 100);
        assert_eq!(loader.used_words(), 140);
        let stats = loader.statistics();
        assert_eq!(stats.arena_stats_class.totals().used_words, 40);
        assert_eq!(stats.totals().totals().used_words, 140);
        loader.verify().unwrap();
    }

    #[test]
    fn without_class_context_everything_is_non_class() {
        let ctx = Context::create(ContextConfig::new("only")).unwrap();
        let loader = LoaderSpace::new(&ctx, None, ClientCategory::Reflection);
        let a = loader.allocate(7, MetadataType::Class).unwrap();
        loader.deallocate(a, 7, MetadataType::Class).unwrap();
        assert!(loader.class_arena().is_none());
        assert_eq!(loader.statistics().arena_stats_class.totals().num, 0);
        assert_eq!(loader.nonclass_arena().statistics().free_blocks_num, 1);
    }

    #[test]
    fn dropping_loader_frees_both_contexts() {
        let nonclass = Context::create(ContextConfig::new("n")).unwrap();
        let class = Context::create(ContextConfig::new("c")).unwrap();
        let loader = LoaderSpace::new(&nonclass, Some(&class), ClientCategory::Boot);
        loader.allocate(1000, MetadataType::Class).unwrap();
        loader.allocate(1000, MetadataType::NonClass).unwrap();
        drop(loader);
        for ctx in [&nonclass, &class] {
            assert_eq!(ctx.counters().used_words, 0);
            ctx.verify(true).unwrap();
        }
    }
}
