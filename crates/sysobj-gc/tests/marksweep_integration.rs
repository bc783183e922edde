//! Integration tests for the mark-sweep collector
//!
//! Tests cover:
//! - Reachability from registered roots
//! - Manual blocks surviving every pass
//! - Sweep finalizers
//! - Teardown leak reports
//! - Finalizers touching other dying blocks
//! - Allocation from another thread during a pass

use std::cell::Cell;
use std::ptr::NonNull;

use once_cell::sync::Lazy;
use sysobj_gc::{rooted, BlockFinalizer, Collector, Rooted, TrackMode};

fn auto_block(collector: &Collector, size: usize) -> NonNull<u8> {
    let ptr = collector.malloc(size).unwrap();
    unsafe { collector.set_track(ptr, TrackMode::Auto).unwrap() };
    ptr
}

#[test]
fn test_collect_frees_exactly_unreachable_auto_blocks() {
    let collector = Collector::new();
    const N: usize = 10;
    const K: usize = 4;

    let blocks: Vec<_> = (0..N).map(|_| auto_block(&collector, 32)).collect();
    let roots: Vec<Rooted> = blocks[..K]
        .iter()
        .map(|&ptr| Rooted::with("reachable", ptr))
        .collect();

    let stats = collector.collect();
    assert_eq!(stats.marked, K);
    assert_eq!(stats.freed, N - K);
    assert_eq!(stats.bytes_freed, (N - K) * 32);
    assert_eq!(stats.live, K);
    assert_eq!(collector.block_count(), K);

    // A second pass with the same roots frees nothing more.
    assert_eq!(collector.collect().freed, 0);

    drop(roots);
    assert_eq!(collector.collect().freed, K);
    assert_eq!(collector.block_count(), 0);
}

#[test]
fn test_manual_blocks_are_never_swept() {
    let collector = Collector::new();
    let manual: Vec<_> = (0..5).map(|_| collector.malloc(16).unwrap()).collect();
    let _auto = auto_block(&collector, 16);

    let stats = collector.collect();
    assert_eq!(stats.freed, 1);
    assert_eq!(collector.block_count(), manual.len());

    for ptr in manual {
        unsafe { collector.free(ptr).unwrap() };
    }
    assert!(collector.teardown().is_clean());
}

#[test]
fn test_uninit_and_null_roots_are_skipped() {
    let collector = Collector::new();
    let _block = auto_block(&collector, 8);

    rooted!(pending);
    let cleared = Rooted::new("cleared");
    cleared.clear();
    assert!(pending.is_uninit());

    assert_eq!(collector.collect().freed, 1);
}

#[test]
fn test_duplicate_roots_mark_once() {
    let collector = Collector::new();
    let ptr = auto_block(&collector, 8);
    let _a = Rooted::with("a", ptr);
    let _b = Rooted::with("b", ptr);

    let stats = collector.collect();
    assert_eq!(stats.marked, 1);
    assert_eq!(stats.freed, 0);
}

#[test]
fn test_roots_into_other_collectors_are_ignored() {
    let mine = Collector::new();
    let theirs = Collector::new();
    let foreign = auto_block(&theirs, 8);
    let _root = Rooted::with("foreign", foreign);
    let _unrooted = auto_block(&mine, 8);

    assert_eq!(mine.collect().freed, 1);
    assert_eq!(theirs.block_count(), 1);
    assert_eq!(theirs.collect().freed, 0);
}

thread_local! {
    static FINALIZED: Cell<usize> = const { Cell::new(0) };
}

unsafe fn count_finalize(ptr: NonNull<u8>) {
    assert_eq!(ptr.as_ptr().read(), 0xAB);
    FINALIZED.with(|n| n.set(n.get() + 1));
}

#[test]
fn test_sweep_runs_finalizers_before_release() {
    let collector = Collector::new();
    for _ in 0..3 {
        let ptr = auto_block(&collector, 16);
        unsafe {
            ptr.as_ptr().add(4).write(0xAB);
            collector
                .set_finalizer(
                    ptr,
                    Some(BlockFinalizer {
                        func: count_finalize,
                        offset: 4,
                    }),
                )
                .unwrap();
        }
    }

    assert_eq!(collector.collect().freed, 3);
    assert_eq!(FINALIZED.with(Cell::get), 3);
}

static RESIZING: Lazy<Collector> = Lazy::new(Collector::new);

thread_local! {
    static RESIZE_TARGET: Cell<usize> = const { Cell::new(0) };
    static RESIZE_REFUSED: Cell<bool> = const { Cell::new(false) };
}

unsafe fn grow_sibling(_ptr: NonNull<u8>) {
    let Some(target) = NonNull::new(RESIZE_TARGET.with(Cell::get) as *mut u8) else {
        return;
    };
    let resized = RESIZING.realloc(target, 4096);
    RESIZE_REFUSED.with(|refused| refused.set(resized.is_none()));
}

#[test]
fn test_finalizer_cannot_resize_dying_block() {
    let collector = &*RESIZING;
    let live = collector.malloc(24).unwrap();
    let x = auto_block(collector, 16);
    let y = auto_block(collector, 16);
    RESIZE_TARGET.with(|target| target.set(y.as_ptr() as usize));
    unsafe {
        collector
            .set_finalizer(
                x,
                Some(BlockFinalizer {
                    func: grow_sibling,
                    offset: 0,
                }),
            )
            .unwrap();
    }

    let stats = collector.collect();
    assert_eq!(stats.freed, 2);
    assert_eq!(stats.live, 1);
    assert!(RESIZE_REFUSED.with(Cell::get));
    assert_eq!(collector.block_count(), 1);
    assert_eq!(collector.live_bytes(), 24);

    unsafe { collector.free(live).unwrap() };
    assert_eq!(collector.block_count(), 0);
}

#[test]
fn test_stats_accumulate_across_passes() {
    let collector = Collector::new();
    auto_block(&collector, 10);
    collector.collect();
    auto_block(&collector, 20);
    auto_block(&collector, 30);
    collector.collect();

    let stats = collector.stats();
    assert_eq!(stats.collections, 2);
    assert_eq!(stats.blocks_freed, 3);
    assert_eq!(stats.bytes_freed, 60);
    assert!(stats.total_pause_time >= stats.last_pause_time);
}

#[test]
fn test_teardown_reports_leaks_with_root_names() {
    let collector = Collector::with_leak_limit(2);
    let named = collector.malloc(64).unwrap();
    let _root = Rooted::with("config_buffer", named);
    collector.malloc(8).unwrap();
    collector.malloc(8).unwrap();

    let report = collector.teardown();
    assert_eq!(report.total, 3);
    assert_eq!(report.bytes, 80);
    assert_eq!(report.blocks.len(), 2);
    assert!(!report.is_clean());

    let all = Collector::new();
    let ptr = all.malloc(64).unwrap();
    let _root = Rooted::with("config_buffer", ptr);
    let report = all.teardown();
    assert_eq!(report.blocks[0].root, Some("config_buffer"));
    assert_eq!(report.blocks[0].track, TrackMode::Manual);
}

#[test]
fn test_threads_share_block_list_but_not_roots() {
    let collector = Collector::new();
    std::thread::scope(|scope| {
        scope.spawn(|| {
            let ptr = auto_block(&collector, 8);
            let _root = Rooted::with("worker", ptr);
            assert_eq!(collector.collect().freed, 0);
        });
    });
    // The worker's root is gone, so its block is garbage now.
    assert_eq!(collector.block_count(), 1);
    assert_eq!(collector.collect().freed, 1);
}

#[test]
fn test_allocation_during_collection() {
    const ALLOCATIONS: usize = 500;
    let collector = Collector::new();
    let kept: Vec<_> = (0..2).map(|_| auto_block(&collector, 32)).collect();
    let _roots: Vec<Rooted> = kept.iter().map(|&ptr| Rooted::with("kept", ptr)).collect();
    for _ in 0..3 {
        auto_block(&collector, 32);
    }

    let (worker_blocks, freed) = std::thread::scope(|scope| {
        let worker = scope.spawn(|| {
            (0..ALLOCATIONS)
                .map(|i| {
                    let ptr = collector.malloc(16).unwrap();
                    unsafe { ptr.as_ptr().write(i as u8) };
                    ptr.as_ptr() as usize
                })
                .collect::<Vec<usize>>()
        });
        let mut freed = 0;
        while !worker.is_finished() {
            freed += collector.collect().freed;
        }
        freed += collector.collect().freed;
        (worker.join().unwrap(), freed)
    });

    assert_eq!(freed, 3);
    assert_eq!(collector.block_count(), kept.len() + ALLOCATIONS);
    for (i, &addr) in worker_blocks.iter().enumerate() {
        let ptr = NonNull::new(addr as *mut u8).unwrap();
        unsafe {
            assert_eq!(ptr.as_ptr().read(), i as u8);
            assert_eq!(collector.track(ptr), Ok(TrackMode::Manual));
            collector.free(ptr).unwrap();
        }
    }
    assert_eq!(collector.block_count(), kept.len());
}
