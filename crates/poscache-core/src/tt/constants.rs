//! Constants for transposition table bit layout

/// Number of entries per cluster (4 x 16 bytes = 1 cache line)
pub const CLUSTER_SIZE: usize = 4;

/// Cache line size assumed for cluster alignment
pub const CACHE_LINE_SIZE: usize = 64;

/// Generation increment per new search
pub const GENERATION_DELTA: u8 = 1;

/// Clusters sampled by `hashfull`
pub const HASHFULL_SAMPLE_CLUSTERS: usize = 1000;

// Key word layout (64 bits):
// [63:32] key fragment XOR fold(data word)
// [31:16] move
// [15:8]  bound + root flag
// [7:0]   generation
pub const FRAGMENT_SHIFT: u32 = 32;
pub const MOVE_SHIFT: u32 = 16;
pub const MOVE_MASK: u64 = 0xFFFF;
pub const FLAGS_SHIFT: u32 = 8;
pub const FLAGS_MASK: u64 = 0xFF;
pub const GEN_MASK: u64 = 0xFF;

// Data word layout (64 bits):
// [15:0]  value (i16)
// [31:16] depth (i16)
// [47:32] static eval (i16)
// [63:48] eval margin (i16)
pub const VALUE_SHIFT: u32 = 0;
pub const DEPTH_SHIFT: u32 = 16;
pub const EVAL_SHIFT: u32 = 32;
pub const MARGIN_SHIFT: u32 = 48;
pub const HALF_MASK: u64 = 0xFFFF;

// Staging data word layout (64 bits):
// [15:0]  move
// [23:16] bound + root flag
// [31:24] generation
// [47:32] depth (i16)
pub const STAGING_FLAGS_SHIFT: u32 = 16;
pub const STAGING_GEN_SHIFT: u32 = 24;
pub const STAGING_DEPTH_SHIFT: u32 = 32;
