//! Default constants for the type registry and object layer.

pub use sysobj_gc::defaults::{DEFAULT_LEAK_REPORT_LIMIT, MAX_REF_COUNT};

/// Fundamental type ids are their tag shifted left by this many bits.
pub const FUNDAMENTAL_SHIFT: u32 = 2;

/// Largest fundamental type id; registered types are numbered above it.
pub const FUNDAMENTAL_MAX: u32 = 255 << FUNDAMENTAL_SHIFT;

/// Each class's private data is rounded up to this alignment.
pub const PRIVATE_ALIGN: usize = 16;

/// Contract violations are logged but do not panic unless enabled.
pub const DEFAULT_TRAP_CONTRACT_VIOLATIONS: bool = false;

/// Environment variable selecting the allocation strategy.
pub const ENV_STRATEGY: &str = "SYSOBJ_GC_STRATEGY";

/// Environment variable enabling panics on contract violations.
pub const ENV_TRAP_VIOLATIONS: &str = "SYSOBJ_TRAP_VIOLATIONS";

/// Environment variable overriding the leak report limit.
pub const ENV_LEAK_REPORT_LIMIT: &str = "SYSOBJ_LEAK_REPORT_LIMIT";
