//! Storage error types.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by the durable stores.
///
/// Every variant is fatal to whoever owns the store: callers propagate it
/// instead of continuing with state that may not match the disk.
#[derive(Debug, Error)]
pub enum StorageError {
    /// I/O error.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Encoding a record failed.
    #[error("failed to encode record: {0}")]
    Encode(#[from] serde_json::Error),

    /// A record in the middle of a log could not be decoded.
    #[error("corrupt record in {path} at line {line}: {reason}")]
    Corrupt {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    /// A write running on the blocking pool did not complete.
    #[error("store write did not complete: {0}")]
    Interrupted(String),

    /// A writer panicked while holding the store lock.
    #[error("store lock poisoned")]
    LockPoisoned,
}
