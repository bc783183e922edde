//! Default constants for the block layer and collector.

/// Alignment of every block header and payload.
pub const BLOCK_ALIGN: usize = 16;

/// Reference counts at or above this value mark a corrupted block.
pub const MAX_REF_COUNT: i32 = 0x00ff_ffff;

/// Value a freshly registered root holds until it is first assigned.
pub const UNINIT_ROOT: usize = 0xCCCC_CCCC;

/// Maximum number of blocks listed individually in a teardown leak report.
pub const DEFAULT_LEAK_REPORT_LIMIT: usize = 20;

pub(crate) const REF_BLOCK_MAGIC: u32 = 0x5246_424b;
pub(crate) const MS_BLOCK_MAGIC: u32 = 0x4d53_424b;
