//! Block layer and cooperative mark-sweep collector for the sysobj runtime.
//!
//! Every tracked allocation is preceded by exactly one block header. Two
//! header variants exist, one per reclamation strategy:
//!
//! ```text
//! ref-count:   [ RefBlockHeader | payload ... ]
//! mark-sweep:  [ MsBlock        | payload ... ]
//!                               ^
//!                               pointer handed to callers
//! ```
//!
//! The active strategy is chosen once per process through [`mem::install`].
//! Code above this crate allocates through [`mem::malloc`]/[`mem::free`]
//! (or a captured [`MemVTable`]) and never needs to know which header is in
//! front of its memory.
//!
//! The mark-sweep collector has no view of the machine stack. Pointer
//! variables that may reference auto-tracked blocks must be registered as
//! roots, usually through the scoped [`Rooted`] guard.

pub mod defaults;
pub mod marksweep;
pub mod mem;
pub mod refblock;

pub use marksweep::{
    register_var, root_count, unregister_var, BlockFinalizer, BlockStatus, CollectStats,
    Collector, GcStats, LeakReport, LeakedBlock, RootId, Rooted, TrackMode, UNINIT,
};
pub use mem::{MemVTable, Strategy};

use thiserror::Error;

/// Block layer and collector errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GcError {
    /// The pointer does not carry a valid block header
    #[error("Invalid block pointer {addr:#x}")]
    InvalidBlock {
        /// Payload address
        addr: usize,
    },

    /// The block was allocated by a different collector
    #[error("Block {addr:#x} belongs to collector {owner}, not collector {collector}")]
    ForeignBlock {
        /// Payload address
        addr: usize,
        /// Collector that owns the block
        owner: u64,
        /// Collector the operation was issued on
        collector: u64,
    },

    /// A root was unregistered that is not on this thread's root list
    #[error("Unbalanced root unregistration: {0:?}")]
    UnbalancedRoot(RootId),

    /// A different strategy has already been fixed for this process
    #[error("Strategy {installed} already installed, cannot switch to {requested}")]
    StrategyConflict {
        /// Strategy in effect
        installed: Strategy,
        /// Strategy that was asked for
        requested: Strategy,
    },

    /// Unrecognized strategy name
    #[error("Unknown allocation strategy: {0}")]
    UnknownStrategy(String),
}

/// Result type for block layer operations
pub type GcResult<T> = Result<T, GcError>;
