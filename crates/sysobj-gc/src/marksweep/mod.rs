//! Cooperative mark-sweep collection.
//!
//! # Block layout
//!
//! ```text
//!        +---------------------------+
//!        | prev / next               |  intrusive list links
//!        | owner, size, finalizer    |
//!        | magic, track, status      |
//!        +---------------------------+ <- payload (16-byte aligned)
//!        | user data ...             |
//!        +---------------------------+
//! ```
//!
//! Blocks start out [`TrackMode::Manual`]. Only blocks switched to
//! [`TrackMode::Auto`] are candidates for sweeping.

mod block;
mod collector;
mod roots;

use std::ptr::NonNull;

pub use block::{BlockFinalizer, BlockStatus, TrackMode};
pub use collector::{CollectStats, Collector, GcStats, LeakReport, LeakedBlock};
pub use roots::{register_var, root_count, unregister_var, RootId, Rooted, UNINIT};

pub(crate) fn ms_malloc(size: usize) -> Option<NonNull<u8>> {
    Collector::global().malloc(size)
}

pub(crate) unsafe fn ms_free(ptr: NonNull<u8>) {
    if let Err(e) = Collector::global().free(ptr) {
        tracing::warn!(target: "sysobj::gc", "free refused: {e}");
    }
}

pub(crate) unsafe fn ms_realloc(ptr: NonNull<u8>, size: usize) -> Option<NonNull<u8>> {
    Collector::global().realloc(ptr, size)
}

/// Declare a scoped root named after the variable.
///
/// ```
/// use sysobj_gc::{rooted, Collector};
///
/// let collector = Collector::new();
/// rooted!(buffer = collector.malloc(16).unwrap());
/// assert!(buffer.get().is_some());
/// ```
#[macro_export]
macro_rules! rooted {
    ($name:ident) => {
        let $name = $crate::Rooted::new(stringify!($name));
    };
    ($name:ident = $value:expr) => {
        let $name = $crate::Rooted::with(stringify!($name), $value);
    };
}
