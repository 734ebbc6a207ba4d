//! Peer cache storage.
//!
//! Maps [`PeerId`] to the last known [`PeerRecord`], with a secondary
//! username index. Writes merge into the stored record so a valid access
//! hash is never replaced by a missing one.

use std::collections::HashMap;
use std::path::Path;
use std::sync::RwLock;

use gapline_types::{PeerId, PeerRecord};

use crate::StorageError;
use crate::log::KvLog;

/// Durable peer metadata cache.
pub trait PeerStore: Send + Sync {
    fn get(&self, id: PeerId) -> Result<Option<PeerRecord>, StorageError>;

    /// Merges `record` into the stored one (see [`PeerRecord::merge`]) and
    /// returns the record as stored.
    fn put(&self, record: PeerRecord) -> Result<PeerRecord, StorageError>;

    /// Looks a peer up by username (case-insensitive, without `@`).
    fn find_username(&self, username: &str) -> Result<Option<PeerRecord>, StorageError>;

    /// Ids of every stored peer, in no particular order.
    fn peer_ids(&self) -> Result<Vec<PeerId>, StorageError>;

    /// Lazily iterates the stored records.
    fn scan(&self) -> Result<PeerScan<'_, Self>, StorageError>
    where
        Self: Sized,
    {
        PeerScan::new(self)
    }
}

/// Lazy iteration over a [`PeerStore`].
///
/// The key set is captured when the scan starts and each record is read
/// when reached, so every yielded record was current at some point during
/// the scan. Peers added after the scan started are not visited. Start a
/// new scan to restart.
pub struct PeerScan<'a, S: PeerStore + ?Sized> {
    store: &'a S,
    ids: std::vec::IntoIter<PeerId>,
}

impl<'a, S: PeerStore + ?Sized> PeerScan<'a, S> {
    pub fn new(store: &'a S) -> Result<Self, StorageError> {
        let mut ids = store.peer_ids()?;
        ids.sort();
        Ok(Self {
            store,
            ids: ids.into_iter(),
        })
    }
}

impl<S: PeerStore + ?Sized> Iterator for PeerScan<'_, S> {
    type Item = Result<PeerRecord, StorageError>;

    fn next(&mut self) -> Option<Self::Item> {
        for id in self.ids.by_ref() {
            match self.store.get(id) {
                Ok(Some(record)) => return Some(Ok(record)),
                Ok(None) => {}
                Err(e) => return Some(Err(e)),
            }
        }
        None
    }
}

fn normalize_username(username: &str) -> String {
    username.trim_start_matches('@').to_ascii_lowercase()
}

/// [`PeerStore`] backed by an fsynced append-only log.
pub struct PeerCache {
    log: KvLog<PeerId, PeerRecord>,
    usernames: RwLock<HashMap<String, PeerId>>,
}

impl PeerCache {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let log = KvLog::open(path)?;
        let usernames = log
            .values()?
            .into_iter()
            .filter_map(|record: PeerRecord| {
                let username = record.username.as_deref()?;
                Some((normalize_username(username), record.id))
            })
            .collect();
        Ok(Self {
            log,
            usernames: RwLock::new(usernames),
        })
    }

    pub fn in_memory() -> Self {
        Self {
            log: KvLog::in_memory(),
            usernames: RwLock::new(HashMap::new()),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.log.path()
    }

    pub fn len(&self) -> Result<usize, StorageError> {
        self.log.len()
    }

    pub fn is_empty(&self) -> Result<bool, StorageError> {
        Ok(self.len()? == 0)
    }

    pub fn close(&self) -> Result<(), StorageError> {
        self.log.close()
    }
}

impl PeerStore for PeerCache {
    fn get(&self, id: PeerId) -> Result<Option<PeerRecord>, StorageError> {
        self.log.get(&id)
    }

    fn put(&self, record: PeerRecord) -> Result<PeerRecord, StorageError> {
        let stored = self.log.update(record.id, |existing| match existing {
            Some(existing) => existing.merge(record),
            None => record,
        })?;

        if let Some(username) = stored.username.as_deref() {
            self.usernames
                .write()
                .map_err(|_| StorageError::LockPoisoned)?
                .insert(normalize_username(username), stored.id);
        }
        Ok(stored)
    }

    fn find_username(&self, username: &str) -> Result<Option<PeerRecord>, StorageError> {
        let key = normalize_username(username);
        let id = self
            .usernames
            .read()
            .map_err(|_| StorageError::LockPoisoned)?
            .get(&key)
            .copied();
        let Some(id) = id else {
            return Ok(None);
        };

        // The peer may have changed its username since it was indexed.
        Ok(self.get(id)?.filter(|record| {
            record
                .username
                .as_deref()
                .is_some_and(|current| normalize_username(current) == key)
        }))
    }

    fn peer_ids(&self) -> Result<Vec<PeerId>, StorageError> {
        self.log.keys()
    }
}
