//! # gapline-storage: Durable client state
//!
//! Three independent stores, all living in one session directory:
//!
//! ```text
//! {session_dir}/
//! ├── updates.state.jsonl   <- SequenceState per stream   (StateStore)
//! ├── peers.jsonl           <- PeerRecord per peer        (PeerCache)
//! └── session.json          <- opaque credential blob     (SessionStore)
//! ```
//!
//! The state and peer stores are append-only logs replayed into memory on
//! open. Every write is `fsync`ed before it becomes visible, so a crash
//! loses at most the write that was in progress.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

mod error;
mod log;
mod peers;
mod session;
mod state;

pub use error::StorageError;
pub use peers::{PeerCache, PeerScan, PeerStore};
pub use session::SessionStore;
pub use state::{SequenceStateStore, StateStore};

/// Sequence state log filename.
pub const STATE_FILENAME: &str = "updates.state.jsonl";

/// Peer cache log filename.
pub const PEERS_FILENAME: &str = "peers.jsonl";

/// Session blob filename.
pub const SESSION_FILENAME: &str = "session.json";

/// All durable stores of one session directory.
///
/// Each store is shared with running tasks, hence the `Arc`s.
#[derive(Clone)]
pub struct Stores {
    pub dir: PathBuf,
    pub state: Arc<StateStore>,
    pub peers: Arc<PeerCache>,
    pub session: Arc<SessionStore>,
}

impl Stores {
    /// Opens every store under `dir`, creating the directory if needed.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, StorageError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            state: Arc::new(StateStore::open(dir.join(STATE_FILENAME))?),
            peers: Arc::new(PeerCache::open(dir.join(PEERS_FILENAME))?),
            session: Arc::new(SessionStore::new(dir.join(SESSION_FILENAME))),
            dir,
        })
    }

    /// Stores that are never persisted, for tests and dry runs.
    pub fn in_memory() -> Self {
        Self {
            dir: PathBuf::new(),
            state: Arc::new(StateStore::in_memory()),
            peers: Arc::new(PeerCache::in_memory()),
            session: Arc::new(SessionStore::in_memory()),
        }
    }

    /// Closes both logs, returning the first error after trying both.
    pub fn close(&self) -> Result<(), StorageError> {
        let state = self.state.close();
        let peers = self.peers.close();
        state.and(peers)
    }
}
