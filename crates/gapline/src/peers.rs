//! Peer resolution on top of the peer cache.
//!
//! Usernames resolve read-through: the cache first, then the server, with
//! the answer written back. Ids resolve from the cache only, since an id
//! alone is not enough to ask the server about a peer.

use std::sync::Arc;

use gapline_storage::{PeerStore, StorageError};
use gapline_types::{PeerId, PeerRecord, Update};
use tracing::{debug, info};

use crate::dispatch::ResolvedPeer;
use crate::error::PeerError;
use crate::persist::offload;
use crate::transport::{Invoker, Request};

/// Server error for a username nobody holds.
const USERNAME_NOT_OCCUPIED: &str = "USERNAME_NOT_OCCUPIED";

/// Resolves peers by username or id, keeping the cache current.
pub struct PeerResolver {
    store: Arc<dyn PeerStore>,
    api: Arc<dyn Invoker>,
}

impl PeerResolver {
    pub fn new(store: Arc<dyn PeerStore>, api: Arc<dyn Invoker>) -> Self {
        Self { store, api }
    }

    pub fn store(&self) -> &Arc<dyn PeerStore> {
        &self.store
    }

    /// Resolves `@username`, asking the server only on a cache miss.
    pub async fn resolve_username(&self, username: &str) -> Result<PeerRecord, PeerError> {
        let username = username.trim_start_matches('@');
        if let Some(record) = self.store.find_username(username)? {
            debug!(username, peer = %record.id, "username resolved from cache");
            return Ok(record);
        }

        let request = Request::ResolveUsername {
            username: username.to_string(),
        };
        let record = match self.api.invoke(request).await {
            Ok(response) => response.into_peer()?,
            Err(e) if e.is_message(USERNAME_NOT_OCCUPIED) => {
                return Err(PeerError::UsernameNotFound(username.to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        // Index under the name that was asked for if the server left it out.
        let record = match record.username {
            Some(_) => record,
            None => record.with_username(username),
        };
        debug!(username, peer = %record.id, "username resolved from server");
        let store = self.store.clone();
        Ok(offload(move || store.put(record)).await?)
    }

    /// Resolves an id from the cache.
    pub fn resolve_id(&self, id: PeerId) -> Result<PeerRecord, PeerError> {
        self.store.get(id)?.ok_or(PeerError::Unknown(id))
    }

    /// Writes peer entities observed on the wire into the cache.
    pub async fn ingest(&self, entities: &[PeerRecord]) -> Result<(), StorageError> {
        if entities.is_empty() {
            return Ok(());
        }
        let store = self.store.clone();
        let entities = entities.to_vec();
        offload(move || {
            for record in entities {
                store.put(record)?;
            }
            Ok(())
        })
        .await
    }

    /// Resolves the peer an update is about.
    ///
    /// Call after [`ingest`](Self::ingest)ing the update's entities so that
    /// metadata delivered with the update is visible.
    pub fn update_peer(&self, update: &Update) -> Result<ResolvedPeer, StorageError> {
        let Some(id) = update.peer else {
            return Ok(ResolvedPeer::None);
        };
        Ok(match self.store.get(id)? {
            Some(record) => ResolvedPeer::Known(record),
            None => ResolvedPeer::Unknown(id),
        })
    }

    /// Access hash of a channel, if cached.
    pub(crate) fn channel_access_hash(
        &self,
        channel_id: i64,
    ) -> Result<Option<String>, StorageError> {
        Ok(self
            .store
            .get(PeerId::channel(channel_id))?
            .filter(PeerRecord::has_access_hash)
            .and_then(|record| record.access_hash))
    }
}

/// Fills the peer cache from the dialog list.
pub struct PeerCollector {
    store: Arc<dyn PeerStore>,
    api: Arc<dyn Invoker>,
    page_size: u32,
}

impl PeerCollector {
    pub const DEFAULT_PAGE_SIZE: u32 = 100;

    pub fn new(store: Arc<dyn PeerStore>, api: Arc<dyn Invoker>) -> Self {
        Self {
            store,
            api,
            page_size: Self::DEFAULT_PAGE_SIZE,
        }
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Walks every dialog page and caches the peers found.
    ///
    /// Returns the number of peer records written.
    pub async fn dialogs(&self) -> Result<usize, PeerError> {
        let mut offset = None;
        let mut collected = 0;
        loop {
            let request = Request::GetDialogs {
                offset,
                limit: self.page_size,
            };
            let slice = self.api.invoke(request).await?.into_dialogs()?;
            let store = self.store.clone();
            let peers = slice.peers;
            collected += peers.len();
            offload(move || {
                for record in peers {
                    store.put(record)?;
                }
                Ok(())
            })
            .await?;
            match slice.next {
                // A server repeating an offset would loop forever.
                Some(next) if Some(next) != offset => offset = Some(next),
                _ => break,
            }
        }
        info!(peers = collected, "collected peers from dialogs");
        Ok(collected)
    }
}
