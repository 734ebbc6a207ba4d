//! Sequence state storage.
//!
//! Holds the last applied [`SequenceState`] of every tracked stream so the
//! gap engine can resume after a restart and ask the server for exactly
//! what it missed.

use std::path::Path;

use gapline_types::{SequenceState, StreamId};

use crate::StorageError;
use crate::log::KvLog;

/// Durable per-stream sequencing state.
///
/// Implementations must be safe to call from several streams at once and
/// `set` must be atomic with respect to `get` of the same stream.
pub trait SequenceStateStore: Send + Sync {
    /// Returns the stored state for `stream`, if any.
    fn get(&self, stream: StreamId) -> Result<Option<SequenceState>, StorageError>;

    /// Durably replaces the state for `stream`.
    fn set(&self, stream: StreamId, state: SequenceState) -> Result<(), StorageError>;

    /// Every stream with stored state.
    fn streams(&self) -> Result<Vec<StreamId>, StorageError>;
}

/// [`SequenceStateStore`] backed by an fsynced append-only log.
pub struct StateStore {
    log: KvLog<StreamId, SequenceState>,
}

impl StateStore {
    /// Opens the store at `path`, creating it if missing.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        Ok(Self {
            log: KvLog::open(path)?,
        })
    }

    /// Creates a store that is not persisted.
    pub fn in_memory() -> Self {
        Self {
            log: KvLog::in_memory(),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.log.path()
    }

    pub fn close(&self) -> Result<(), StorageError> {
        self.log.close()
    }
}

impl SequenceStateStore for StateStore {
    fn get(&self, stream: StreamId) -> Result<Option<SequenceState>, StorageError> {
        self.log.get(&stream)
    }

    fn set(&self, stream: StreamId, state: SequenceState) -> Result<(), StorageError> {
        self.log.set(stream, state)
    }

    fn streams(&self) -> Result<Vec<StreamId>, StorageError> {
        let mut streams = self.log.keys()?;
        streams.sort();
        Ok(streams)
    }
}
