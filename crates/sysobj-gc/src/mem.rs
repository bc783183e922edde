//! Process-wide allocation strategy table.
//!
//! The strategy is fixed the first time it is observed, either by an
//! explicit [`install`] or implicitly by [`active`]. Blocks must always be
//! released through the table that allocated them, so the choice never
//! changes afterwards.

use std::fmt;
use std::ptr::NonNull;
use std::str::FromStr;

use once_cell::sync::OnceCell;
use serde::Deserialize;

use crate::{marksweep, refblock, GcError, GcResult};

/// Allocation entry points of one reclamation strategy.
///
/// `malloc` returns zeroed memory aligned to
/// [`BLOCK_ALIGN`](crate::defaults::BLOCK_ALIGN).
#[derive(Debug)]
pub struct MemVTable {
    pub malloc: fn(usize) -> Option<NonNull<u8>>,
    pub free: unsafe fn(NonNull<u8>),
    pub realloc: unsafe fn(NonNull<u8>, usize) -> Option<NonNull<u8>>,
}

/// Ref-counted blocks, freed synchronously.
pub static REF_COUNT_VTABLE: MemVTable = MemVTable {
    malloc: refblock::malloc,
    free: refblock::free,
    realloc: refblock::realloc,
};

/// Blocks tracked by the global mark-sweep collector.
pub static MARK_SWEEP_VTABLE: MemVTable = MemVTable {
    malloc: marksweep::ms_malloc,
    free: marksweep::ms_free,
    realloc: marksweep::ms_realloc,
};

/// Memory reclamation strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    /// Manual reference counting
    #[default]
    RefCount,
    /// Cooperative mark-sweep over registered roots
    MarkSweep,
}

impl Strategy {
    /// Strategy table for this strategy
    pub fn vtable(self) -> &'static MemVTable {
        match self {
            Strategy::RefCount => &REF_COUNT_VTABLE,
            Strategy::MarkSweep => &MARK_SWEEP_VTABLE,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Strategy::RefCount => "ref-count",
            Strategy::MarkSweep => "mark-sweep",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Strategy {
    type Err = GcError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ref-count" | "refcount" | "ref" => Ok(Strategy::RefCount),
            "mark-sweep" | "marksweep" | "ms" => Ok(Strategy::MarkSweep),
            other => Err(GcError::UnknownStrategy(other.to_string())),
        }
    }
}

static ACTIVE: OnceCell<Strategy> = OnceCell::new();

/// Fix the process-wide strategy.
///
/// Installing the strategy already in effect is a no-op.
pub fn install(strategy: Strategy) -> GcResult<()> {
    let installed = *ACTIVE.get_or_init(|| strategy);
    if installed != strategy {
        return Err(GcError::StrategyConflict {
            installed,
            requested: strategy,
        });
    }
    tracing::debug!(target: "sysobj::gc", %strategy, "allocation strategy installed");
    Ok(())
}

/// The process-wide strategy, defaulting to ref counting on first use.
pub fn active() -> Strategy {
    *ACTIVE.get_or_init(Strategy::default)
}

/// Strategy table of the process-wide strategy.
pub fn vtable() -> &'static MemVTable {
    active().vtable()
}

/// Allocate through the process-wide strategy.
pub fn malloc(size: usize) -> Option<NonNull<u8>> {
    (vtable().malloc)(size)
}

/// Release through the process-wide strategy.
///
/// # Safety
/// `ptr` must come from [`malloc`] or [`realloc`] and must not be used
/// afterwards.
pub unsafe fn free(ptr: NonNull<u8>) {
    (vtable().free)(ptr)
}

/// Resize through the process-wide strategy.
///
/// # Safety
/// `ptr` must come from [`malloc`] or [`realloc`].
pub unsafe fn realloc(ptr: NonNull<u8>, size: usize) -> Option<NonNull<u8>> {
    (vtable().realloc)(ptr, size)
}
