//! The mark-sweep collector.

use std::ptr::NonNull;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use super::block::{BlockFinalizer, BlockList, BlockStatus, MsBlock, TrackMode};
use super::roots::{self, UNINIT};
use crate::defaults::{DEFAULT_LEAK_REPORT_LIMIT, MS_BLOCK_MAGIC};
use crate::{GcError, GcResult};

static NEXT_COLLECTOR_ID: AtomicU64 = AtomicU64::new(1);

static GLOBAL: Lazy<Collector> = Lazy::new(Collector::new);

/// Cumulative collector statistics
#[derive(Debug, Clone, Default)]
pub struct GcStats {
    /// Number of completed collection passes
    pub collections: usize,
    /// Total blocks freed by sweeps
    pub blocks_freed: usize,
    /// Total payload bytes freed by sweeps
    pub bytes_freed: usize,
    /// Blocks marked during the last pass
    pub last_marked: usize,
    pub last_pause_time: Duration,
    pub total_pause_time: Duration,
}

/// Outcome of one collection pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CollectStats {
    pub marked: usize,
    pub freed: usize,
    pub bytes_freed: usize,
    /// Blocks still on the list after the sweep
    pub live: usize,
}

/// A block still allocated at teardown
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeakedBlock {
    pub addr: usize,
    pub size: usize,
    pub track: TrackMode,
    /// Name of a root on the calling thread that still references the block
    pub root: Option<&'static str>,
}

/// Blocks outstanding when a collector is torn down
#[derive(Debug, Clone, Default)]
pub struct LeakReport {
    pub total: usize,
    pub bytes: usize,
    /// At most the collector's leak report limit entries
    pub blocks: Vec<LeakedBlock>,
}

impl LeakReport {
    pub fn is_clean(&self) -> bool {
        self.total == 0
    }
}

/// Owns a list of mark-sweep blocks.
///
/// The block list is shared by every thread allocating through the
/// collector; roots are read from the thread that runs [`collect`].
///
/// [`collect`]: Collector::collect
pub struct Collector {
    id: u64,
    blocks: Mutex<BlockList>,
    stats: Mutex<GcStats>,
    leak_report_limit: AtomicUsize,
}

impl Collector {
    pub fn new() -> Self {
        Self::with_leak_limit(DEFAULT_LEAK_REPORT_LIMIT)
    }

    pub fn with_leak_limit(leak_report_limit: usize) -> Self {
        Self {
            id: NEXT_COLLECTOR_ID.fetch_add(1, Ordering::Relaxed),
            blocks: Mutex::new(BlockList::new()),
            stats: Mutex::new(GcStats::default()),
            leak_report_limit: AtomicUsize::new(leak_report_limit),
        }
    }

    /// Blocks listed individually by [`teardown`](Self::teardown).
    pub fn leak_report_limit(&self) -> usize {
        self.leak_report_limit.load(Ordering::Relaxed)
    }

    pub fn set_leak_report_limit(&self, limit: usize) {
        self.leak_report_limit.store(limit, Ordering::Relaxed);
    }

    /// The collector behind the mark-sweep strategy table.
    pub fn global() -> &'static Collector {
        &GLOBAL
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Allocate a zeroed, manually tracked block.
    pub fn malloc(&self, size: usize) -> Option<NonNull<u8>> {
        let block = MsBlock::allocate(size, self.id)?;
        // SAFETY: the block is fresh and unlinked.
        unsafe { self.blocks.lock().insert(block) };
        tracing::trace!(target: "sysobj::gc", size, collector = self.id, "ms block allocated");
        Some(MsBlock::payload(block))
    }

    /// # Safety
    /// `ptr` must be readable at least one block header before its address.
    unsafe fn owned_block(&self, ptr: NonNull<u8>) -> GcResult<NonNull<MsBlock>> {
        let block = MsBlock::from_payload(ptr);
        let header = block.as_ref();
        if header.magic != MS_BLOCK_MAGIC {
            return Err(GcError::InvalidBlock {
                addr: ptr.as_ptr() as usize,
            });
        }
        if header.owner != self.id {
            return Err(GcError::ForeignBlock {
                addr: ptr.as_ptr() as usize,
                owner: header.owner,
                collector: self.id,
            });
        }
        Ok(block)
    }

    /// Free a block explicitly, whatever its track mode.
    ///
    /// A block already handed to a running sweep is left for the sweep to
    /// release.
    ///
    /// # Safety
    /// `ptr` must come from this collector's [`malloc`](Self::malloc) or
    /// [`realloc`](Self::realloc) and must not be used afterwards.
    pub unsafe fn free(&self, ptr: NonNull<u8>) -> GcResult<()> {
        let block = self.owned_block(ptr)?;
        {
            let mut list = self.blocks.lock();
            if (*block.as_ptr()).dying {
                return Ok(());
            }
            list.remove(block);
        }
        if (*block.as_ptr()).track == TrackMode::Auto {
            tracing::debug!(target: "sysobj::gc", ptr = ?ptr.as_ptr(), "auto block freed explicitly");
        }
        MsBlock::release(block);
        Ok(())
    }

    /// Resize a block, keeping its track mode, status and list membership.
    ///
    /// A block already handed to a running sweep cannot be resized; the
    /// call returns `None` and the sweep still releases it.
    ///
    /// # Safety
    /// `ptr` must come from this collector's [`malloc`](Self::malloc) or
    /// [`realloc`](Self::realloc). On success the old pointer must no longer
    /// be used.
    pub unsafe fn realloc(&self, ptr: NonNull<u8>, size: usize) -> Option<NonNull<u8>> {
        let block = match self.owned_block(ptr) {
            Ok(block) => block,
            Err(e) => {
                tracing::warn!(target: "sysobj::gc", "realloc refused: {e}");
                return None;
            }
        };
        let mut list = self.blocks.lock();
        if (*block.as_ptr()).dying {
            tracing::warn!(target: "sysobj::gc", ptr = ?ptr.as_ptr(), "realloc refused: block is being swept");
            return None;
        }
        list.remove(block);
        match MsBlock::resize(block, size) {
            Some(moved) => {
                list.insert(moved);
                Some(MsBlock::payload(moved))
            }
            None => {
                list.insert(block);
                None
            }
        }
    }

    /// # Safety
    /// `ptr` must come from this collector and still be allocated.
    pub unsafe fn set_track(&self, ptr: NonNull<u8>, track: TrackMode) -> GcResult<()> {
        let block = self.owned_block(ptr)?;
        let _list = self.blocks.lock();
        (*block.as_ptr()).track = track;
        Ok(())
    }

    /// # Safety
    /// `ptr` must come from this collector and still be allocated.
    pub unsafe fn track(&self, ptr: NonNull<u8>) -> GcResult<TrackMode> {
        let block = self.owned_block(ptr)?;
        let _list = self.blocks.lock();
        Ok((*block.as_ptr()).track)
    }

    /// # Safety
    /// `ptr` must come from this collector and still be allocated.
    pub unsafe fn status(&self, ptr: NonNull<u8>) -> GcResult<BlockStatus> {
        let block = self.owned_block(ptr)?;
        let _list = self.blocks.lock();
        Ok((*block.as_ptr()).status)
    }

    /// Install or clear the hook run when a sweep frees the block.
    ///
    /// # Safety
    /// `ptr` must come from this collector and still be allocated. The
    /// finalizer must tolerate being handed the block's payload advanced by
    /// its offset.
    pub unsafe fn set_finalizer(
        &self,
        ptr: NonNull<u8>,
        finalizer: Option<BlockFinalizer>,
    ) -> GcResult<()> {
        let block = self.owned_block(ptr)?;
        let _list = self.blocks.lock();
        (*block.as_ptr()).finalizer = finalizer;
        Ok(())
    }

    /// Number of blocks currently allocated.
    pub fn block_count(&self) -> usize {
        self.blocks.lock().len()
    }

    /// Payload bytes currently allocated.
    pub fn live_bytes(&self) -> usize {
        self.blocks.lock().bytes()
    }

    pub fn stats(&self) -> GcStats {
        self.stats.lock().clone()
    }

    /// Run one mark-sweep pass from the calling thread's roots.
    ///
    /// Auto-tracked blocks not reachable from a root are freed. Manually
    /// tracked blocks are never touched.
    pub fn collect(&self) -> CollectStats {
        let start = Instant::now();
        tracing::debug!(target: "sysobj::gc", collector = self.id, "starting collection");

        let roots = roots::snapshot();
        let mut result = CollectStats::default();
        let mut dead = Vec::new();
        {
            let mut list = self.blocks.lock();

            for (value, name) in roots {
                if value == UNINIT {
                    continue;
                }
                let Some(ptr) = NonNull::new(value) else {
                    continue;
                };
                // SAFETY: roots hold payload pointers of live blocks or sentinels.
                let block = match unsafe { self.owned_block(ptr) } {
                    Ok(block) => block,
                    Err(GcError::ForeignBlock { .. }) => continue,
                    Err(e) => {
                        tracing::warn!(target: "sysobj::gc", root = name, "skipping root: {e}");
                        continue;
                    }
                };
                // SAFETY: the block is linked into this list, which is locked.
                unsafe {
                    let raw = block.as_ptr();
                    if (*raw).track == TrackMode::Auto && (*raw).status == BlockStatus::Malloced {
                        (*raw).status = BlockStatus::Marked;
                        list.move_to_front(block);
                        result.marked += 1;
                    }
                }
            }
            tracing::debug!(target: "sysobj::gc", marked = result.marked, "mark phase complete");

            let mut cursor = list.head();
            while let Some(block) = cursor {
                // SAFETY: the next link is read before the block is unlinked.
                unsafe {
                    let raw = block.as_ptr();
                    cursor = NonNull::new((*raw).next);
                    match ((*raw).track, (*raw).status) {
                        (TrackMode::Manual, _) => {}
                        (TrackMode::Auto, BlockStatus::Marked) => {
                            (*raw).status = BlockStatus::Malloced;
                        }
                        (TrackMode::Auto, BlockStatus::Malloced) => {
                            list.remove(block);
                            (*raw).dying = true;
                            dead.push(block);
                        }
                    }
                }
            }
            result.live = list.len();
        }

        // Finalizers may free or unref other blocks, so every one of them
        // runs before any dead memory is released.
        for &block in &dead {
            // SAFETY: dead blocks are unlinked and still allocated.
            unsafe {
                if let Some(finalizer) = (*block.as_ptr()).finalizer {
                    let target = MsBlock::payload(block).as_ptr().add(finalizer.offset);
                    (finalizer.func)(NonNull::new_unchecked(target));
                }
            }
        }
        for block in dead {
            // SAFETY: finalizers have run; nothing refers to the block anymore.
            unsafe {
                result.bytes_freed += (*block.as_ptr()).size;
                MsBlock::release(block);
            }
            result.freed += 1;
        }

        let pause = start.elapsed();
        {
            let mut stats = self.stats.lock();
            stats.collections += 1;
            stats.blocks_freed += result.freed;
            stats.bytes_freed += result.bytes_freed;
            stats.last_marked = result.marked;
            stats.last_pause_time = pause;
            stats.total_pause_time += pause;
        }
        tracing::debug!(
            target: "sysobj::gc",
            freed = result.freed,
            bytes_freed = result.bytes_freed,
            live = result.live,
            pause_us = pause.as_micros() as u64,
            "collection complete"
        );
        result
    }

    /// Report every block still allocated.
    ///
    /// Blocks are reported, not freed: teardown order across subsystems is
    /// not guaranteed and a reported block may still be in use.
    pub fn teardown(&self) -> LeakReport {
        let names: FxHashMap<usize, &'static str> = roots::snapshot()
            .into_iter()
            .map(|(ptr, name)| (ptr as usize, name))
            .collect();

        let limit = self.leak_report_limit();
        let mut report = LeakReport::default();
        let list = self.blocks.lock();
        for block in list.iter() {
            // SAFETY: linked blocks are live while the list is locked.
            let header = unsafe { block.as_ref() };
            let addr = MsBlock::payload(block).as_ptr() as usize;
            report.total += 1;
            report.bytes += header.size;
            if report.blocks.len() < limit {
                let root = names.get(&addr).copied();
                tracing::warn!(
                    target: "sysobj::gc",
                    "memory leak block: {}, {:#x}",
                    root.unwrap_or("<unrooted>"),
                    addr
                );
                report.blocks.push(LeakedBlock {
                    addr,
                    size: header.size,
                    track: header.track,
                    root,
                });
            }
        }
        if report.total > report.blocks.len() {
            tracing::warn!(
                target: "sysobj::gc",
                "{} more leaked blocks not listed",
                report.total - report.blocks.len()
            );
        }
        report
    }
}

impl Default for Collector {
    fn default() -> Self {
        Self::new()
    }
}
