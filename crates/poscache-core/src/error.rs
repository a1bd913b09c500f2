//! Error types for the persistent hash
//!
//! 内部関数は [`PhashResult`] を返し、公開APIはエラーを吸収してログに出す。

use std::path::PathBuf;

/// Persistent hash errors
#[derive(thiserror::Error, Debug)]
pub enum PhashError {
    /// File I/O error
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// File does not start with a valid store header
    #[error("bad store header in {path:?}: {reason}")]
    BadHeader { path: PathBuf, reason: String },

    /// A record whose payload width matches no known layout
    #[error("corrupt record for key {key:#018x}: payload of {len} bytes")]
    CorruptRecord { key: u64, len: usize },

    /// A bounded store has no room left for the write
    #[error("store capacity exhausted: {used} of {capacity} bytes in use")]
    CapacityExhausted { used: u64, capacity: u64 },

    /// Write attempted on a store opened read-only
    #[error("store {0:?} is opened read-only")]
    ReadOnly(PathBuf),

    /// Store could not be opened or persistence is disabled
    #[error("persistent store unavailable")]
    Unavailable,
}

/// Result type for persistent hash operations
pub type PhashResult<T> = Result<T, PhashError>;
