//! Session credential blob storage.
//!
//! The transport owns the blob's format; this store only guarantees that
//! a reader sees either the previous or the new blob, never a mix.

use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use bytes::Bytes;
use tracing::debug;

use crate::StorageError;

/// Session blob, file-backed or held in memory.
#[derive(Debug)]
pub struct SessionStore {
    path: Option<PathBuf>,
    memory: Mutex<Option<Bytes>>,
}

impl SessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            memory: Mutex::new(None),
        }
    }

    pub fn in_memory() -> Self {
        Self {
            path: None,
            memory: Mutex::new(None),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Returns the stored blob, or `None` before the first login.
    pub fn load(&self) -> Result<Option<Bytes>, StorageError> {
        let Some(path) = &self.path else {
            return Ok(self
                .memory
                .lock()
                .map_err(|_| StorageError::LockPoisoned)?
                .clone());
        };
        match fs::read(path) {
            Ok(data) => Ok(Some(Bytes::from(data))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Replaces the stored blob via write-to-temp and rename.
    pub fn store(&self, data: &[u8]) -> Result<(), StorageError> {
        let Some(path) = &self.path else {
            *self.memory.lock().map_err(|_| StorageError::LockPoisoned)? =
                Some(Bytes::copy_from_slice(data));
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut tmp_name = path.as_os_str().to_owned();
        tmp_name.push(".tmp");
        let tmp_path = PathBuf::from(tmp_name);

        let mut file = File::create(&tmp_path)?;
        file.write_all(data)?;
        file.sync_all()?;
        fs::rename(&tmp_path, path)?;

        debug!(path = %path.display(), bytes = data.len(), "stored session");
        Ok(())
    }
}
