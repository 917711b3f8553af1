//! Many threads against one context.

use std::thread;

use crossbeam_channel::unbounded;

use chunkspace_core::{ClientCategory, WordAddr};
use chunkspace_test_utils::workload::{SizeMix, Workload};
use chunkspace_test_utils::TestContext;

#[test]
fn distinct_arenas_in_parallel() {
    let ctx = TestContext::expandable("parallel");
    let totals: Vec<usize> = thread::scope(|s| {
        let handles: Vec<_> = (0..8u64)
            .map(|t| {
                let ctx = &ctx;
                s.spawn(move || {
                    let mut arena = ctx.arena(ClientCategory::Standard, t % 2 == 1);
                    let mut w = Workload::new(t, SizeMix::Small);
                    for _ in 0..400 {
                        if arena.live().is_empty() || w.chance(70) {
                            arena.allocate(w.next_size()).unwrap();
                        } else {
                            let i = w.pick(arena.live().len());
                            arena.deallocate_at(i);
                        }
                    }
                    arena.check_contents();
                    let words = arena.live_words();
                    assert_eq!(arena.arena().used_words(), words);
                    // Keep the arena alive until all threads are done.
                    (arena, words)
                })
            })
            .collect();
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        ctx.check();
        let sum: usize = results.iter().map(|(_, w)| w).sum();
        assert_eq!(ctx.counters().used_words, sum);
        results.into_iter().map(|(_, w)| w).collect()
    });
    assert_eq!(totals.len(), 8);
    assert_eq!(ctx.counters().used_words, 0);
    ctx.check();
}

#[test]
fn shared_arena_with_handoff() {
    let ctx = TestContext::expandable("shared");
    let arena = ctx.create_arena(ClientCategory::Standard, false);
    let (tx, rx) = unbounded::<(WordAddr, usize)>();

    thread::scope(|s| {
        for t in 0..4u64 {
            let tx = tx.clone();
            let arena = &arena;
            s.spawn(move || {
                let mut w = Workload::new(100 + t, SizeMix::Tiny);
                for _ in 0..500 {
                    let words = w.next_size();
                    let addr = arena.allocate(words).unwrap();
                    tx.send((addr, words)).unwrap();
                }
            });
        }
        drop(tx);
        // Two consumers free what the producers allocated.
        for _ in 0..2 {
            let rx = rx.clone();
            let arena = &arena;
            s.spawn(move || {
                for (addr, words) in rx.iter() {
                    arena.deallocate(addr, words).unwrap();
                }
            });
        }
    });

    assert_eq!(arena.used_words(), 0);
    assert_eq!(ctx.counters().used_words, 0);
    arena.verify().unwrap();
    ctx.check();
}

#[test]
fn verification_runs_alongside_traffic() {
    let ctx = TestContext::expandable("observed");
    thread::scope(|s| {
        for t in 0..4u64 {
            let ctx = &ctx;
            s.spawn(move || {
                let mut w = Workload::new(t, SizeMix::Mixed);
                for _ in 0..20 {
                    let mut arena = ctx.arena(ClientCategory::Reflection, false);
                    for _ in 0..20 {
                        arena.allocate(w.next_size()).unwrap();
                    }
                    arena.check_contents();
                }
            });
        }
        let ctx = &ctx;
        s.spawn(move || {
            for _ in 0..50 {
                ctx.verify(true).unwrap();
                let _ = ctx.arena_statistics();
                ctx.purge();
            }
        });
    });
    assert_eq!(ctx.counters().used_words, 0);
    ctx.check();
}
