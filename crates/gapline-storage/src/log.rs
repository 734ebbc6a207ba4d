//! Append-only key/value log with an in-memory index.
//!
//! Every write appends one JSON line `{"key":..,"value":..}` and is
//! `fsync`ed before the in-memory map changes, so a value visible to
//! readers is always on disk. Opening a log replays it (last write wins)
//! and rewrites it compacted when it carries mostly superseded lines.
//!
//! # File Layout
//!
//! ```text
//! {name}.jsonl       <- live log
//! {name}.jsonl.tmp   <- compaction snapshot (renamed over the live log)
//! ```

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::hash::Hash;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tracing::{debug, warn};

use crate::StorageError;

/// Superseded lines tolerated before the log is compacted on open.
const COMPACTION_MIN_STALE: usize = 1024;

#[derive(Serialize, Deserialize)]
struct LogRecord<K, V> {
    key: K,
    value: V,
}

struct LogInner<K, V> {
    /// `None` for in-memory logs.
    file: Option<File>,
    entries: HashMap<K, V>,
}

/// Durable map from `K` to `V`.
///
/// All reads and writes go through one mutex, so a `get` never observes a
/// half-applied `set` of the same key.
pub(crate) struct KvLog<K, V> {
    path: Option<PathBuf>,
    inner: Mutex<LogInner<K, V>>,
}

impl<K, V> KvLog<K, V>
where
    K: Eq + Hash + Clone + Serialize + DeserializeOwned,
    V: Clone + Serialize + DeserializeOwned,
{
    /// Opens (or creates) the log at `path` and replays it.
    pub(crate) fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let (entries, lines) = if path.exists() {
            replay(&path)?
        } else {
            (HashMap::new(), 0)
        };

        let stale = lines.saturating_sub(entries.len());
        if stale >= COMPACTION_MIN_STALE && stale > entries.len() {
            debug!(path = %path.display(), lines, live = entries.len(), "compacting log");
            write_snapshot(&path, &entries)?;
        }

        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        debug!(path = %path.display(), entries = entries.len(), "opened log");

        Ok(Self {
            path: Some(path),
            inner: Mutex::new(LogInner {
                file: Some(file),
                entries,
            }),
        })
    }

    /// Creates a log that lives only in memory.
    pub(crate) fn in_memory() -> Self {
        Self {
            path: None,
            inner: Mutex::new(LogInner {
                file: None,
                entries: HashMap::new(),
            }),
        }
    }

    pub(crate) fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn lock(&self) -> Result<MutexGuard<'_, LogInner<K, V>>, StorageError> {
        self.inner.lock().map_err(|_| StorageError::LockPoisoned)
    }

    pub(crate) fn get(&self, key: &K) -> Result<Option<V>, StorageError> {
        Ok(self.lock()?.entries.get(key).cloned())
    }

    pub(crate) fn set(&self, key: K, value: V) -> Result<(), StorageError> {
        let mut inner = self.lock()?;
        append(&mut inner, &key, &value)?;
        inner.entries.insert(key, value);
        Ok(())
    }

    /// Read-modify-write of one key under the log lock.
    ///
    /// `f` receives the current value (if any) and returns the value to
    /// store, which is also returned to the caller.
    pub(crate) fn update(
        &self,
        key: K,
        f: impl FnOnce(Option<V>) -> V,
    ) -> Result<V, StorageError> {
        let mut inner = self.lock()?;
        let value = f(inner.entries.get(&key).cloned());
        append(&mut inner, &key, &value)?;
        inner.entries.insert(key, value.clone());
        Ok(value)
    }

    pub(crate) fn keys(&self) -> Result<Vec<K>, StorageError> {
        Ok(self.lock()?.entries.keys().cloned().collect())
    }

    pub(crate) fn values(&self) -> Result<Vec<V>, StorageError> {
        Ok(self.lock()?.entries.values().cloned().collect())
    }

    pub(crate) fn len(&self) -> Result<usize, StorageError> {
        Ok(self.lock()?.entries.len())
    }

    /// Flushes file metadata and releases the file handle.
    pub(crate) fn close(&self) -> Result<(), StorageError> {
        let mut inner = self.lock()?;
        if let Some(file) = inner.file.take() {
            file.sync_all()?;
        }
        Ok(())
    }
}

fn append<K: Serialize, V: Serialize>(
    inner: &mut LogInner<K, V>,
    key: &K,
    value: &V,
) -> Result<(), StorageError> {
    let Some(file) = inner.file.as_mut() else {
        return Ok(());
    };
    let mut line = serde_json::to_vec(&LogRecord { key, value })?;
    line.push(b'\n');
    file.write_all(&line)?;
    file.sync_data()?;
    Ok(())
}

/// Replays `path`, returning the live entries and the number of lines read.
///
/// A trailing line without a newline is a write torn by a crash and is
/// dropped; an undecodable line anywhere else is corruption.
fn replay<K, V>(path: &Path) -> Result<(HashMap<K, V>, usize), StorageError>
where
    K: Eq + Hash + Serialize + DeserializeOwned,
    V: Serialize + DeserializeOwned,
{
    let reader = BufReader::new(File::open(path)?);
    let mut entries = HashMap::new();
    let mut lines = 0;
    let mut torn_tail = false;

    for (idx, line) in reader.split(b'\n').enumerate() {
        let line = line?;
        if line.is_empty() {
            continue;
        }
        if torn_tail {
            // A bad line followed by more data is not a torn write.
            return Err(StorageError::Corrupt {
                path: path.to_path_buf(),
                line: idx,
                reason: "undecodable record before end of log".to_string(),
            });
        }
        match serde_json::from_slice::<LogRecord<K, V>>(&line) {
            Ok(record) => {
                entries.insert(record.key, record.value);
                lines += 1;
            }
            Err(e) if e.is_eof() => torn_tail = true,
            Err(e) => {
                return Err(StorageError::Corrupt {
                    path: path.to_path_buf(),
                    line: idx + 1,
                    reason: e.to_string(),
                });
            }
        }
    }

    if torn_tail {
        warn!(path = %path.display(), "dropping torn record at end of log");
        // Rewrite so the next append does not land after the partial line.
        write_snapshot(path, &entries)?;
    }

    Ok((entries, lines))
}

/// Atomically replaces `path` with one line per live entry.
fn write_snapshot<K: Serialize, V: Serialize>(
    path: &Path,
    entries: &HashMap<K, V>,
) -> Result<(), StorageError> {
    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp_path = PathBuf::from(tmp_name);

    let mut file = File::create(&tmp_path)?;
    for (key, value) in entries {
        let mut line = serde_json::to_vec(&LogRecord { key, value })?;
        line.push(b'\n');
        file.write_all(&line)?;
    }
    file.sync_all()?;
    fs::rename(&tmp_path, path)?;
    Ok(())
}
