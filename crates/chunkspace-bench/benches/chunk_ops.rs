//! Criterion micro-benchmarks for chunk acquisition, return and purge.

use std::hint::black_box;
use std::sync::Arc;

use chunkspace_arena::vspace::VirtualSpaceList;
use chunkspace_arena::{ChunkManager, CommitLimiter, Settings, UsageCounters};
use chunkspace_core::{ChunkLevel, MAX_CHUNK_WORD_SIZE};
use criterion::{criterion_group, criterion_main, Criterion};

fn make_manager() -> ChunkManager {
    let settings = Settings::default();
    let vsl = VirtualSpaceList::new_expandable(
        "bench",
        settings.node_words,
        settings.commit_granule_words,
        Arc::new(CommitLimiter::unlimited()),
        Arc::new(UsageCounters::new()),
    );
    ChunkManager::new("bench", vsl, settings)
}

/// Benchmark: split a root down to the finest level and merge it back.
fn bench_get_return_finest(c: &mut Criterion) {
    let mut manager = make_manager();
    c.bench_function("chunk_get_return_finest", |b| {
        b.iter(|| {
            let chunk = manager.get_chunk(ChunkLevel::HIGHEST, 0).unwrap();
            black_box(chunk.base());
            manager.return_chunk(chunk);
        });
    });
}

/// Benchmark: fill one root with finest chunks, then return them all.
fn bench_fill_root(c: &mut Criterion) {
    let mut manager = make_manager();
    let count = MAX_CHUNK_WORD_SIZE / ChunkLevel::HIGHEST.word_size();
    c.bench_function("chunk_fill_root_4096", |b| {
        b.iter(|| {
            let chunks: Vec<_> = (0..count)
                .map(|_| manager.get_chunk(ChunkLevel::HIGHEST, 0).unwrap())
                .collect();
            for chunk in chunks {
                manager.return_chunk(chunk);
            }
        });
    });
}

/// Benchmark: commit a root chunk fully, return it and purge.
fn bench_commit_purge(c: &mut Criterion) {
    let mut manager = make_manager();
    c.bench_function("chunk_commit_purge_root", |b| {
        b.iter(|| {
            let chunk = manager
                .get_chunk(ChunkLevel::ROOT, MAX_CHUNK_WORD_SIZE)
                .unwrap();
            manager.return_chunk(chunk);
            black_box(manager.purge());
        });
    });
}

criterion_group!(
    benches,
    bench_get_return_finest,
    bench_fill_root,
    bench_commit_purge
);
criterion_main!(benches);
