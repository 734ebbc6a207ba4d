//! Fail-fast task group and the readiness signal.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::error::ClientError;

/// A set of tasks that live and die together.
///
/// The first task to fail cancels the group's token and aborts the rest;
/// [`wait`](Self::wait) returns that first error. Errors that follow it
/// (usually [`ClientError::Cancelled`]) are discarded.
pub struct TaskGroup {
    tasks: JoinSet<Result<(), ClientError>>,
    names: Vec<(tokio::task::Id, &'static str)>,
    token: CancellationToken,
}

impl TaskGroup {
    /// Creates a group whose token is a child of `parent`.
    pub fn new(parent: &CancellationToken) -> Self {
        Self {
            tasks: JoinSet::new(),
            names: Vec::new(),
            token: parent.child_token(),
        }
    }

    /// Token cancelled when the group fails or the parent is cancelled.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn spawn<F>(&mut self, name: &'static str, task: F)
    where
        F: Future<Output = Result<(), ClientError>> + Send + 'static,
    {
        let handle = self.tasks.spawn(task);
        self.names.push((handle.id(), name));
        debug!(task = name, "spawned");
    }

    fn name(&self, id: tokio::task::Id) -> &'static str {
        self.names
            .iter()
            .find(|(task, _)| *task == id)
            .map_or("unknown", |(_, name)| name)
    }

    /// Waits for every task and returns the first error.
    pub async fn wait(mut self) -> Result<(), ClientError> {
        let mut first: Option<ClientError> = None;
        while let Some(joined) = self.tasks.join_next_with_id().await {
            let (name, result) = match joined {
                Ok((id, result)) => (self.name(id), result),
                Err(e) if e.is_cancelled() => (self.name(e.id()), Err(ClientError::Cancelled)),
                Err(e) => {
                    let name = self.name(e.id());
                    (name, Err(ClientError::TaskPanicked(name.to_string())))
                }
            };
            match result {
                Ok(()) => debug!(task = name, "finished"),
                Err(err) if first.is_none() => {
                    if !err.is_cancelled() {
                        error!(task = name, error = %err, "task failed, cancelling group");
                    }
                    self.token.cancel();
                    self.tasks.abort_all();
                    first = Some(err);
                }
                Err(err) => debug!(task = name, error = %err, "task stopped after group failure"),
            }
        }
        first.map_or(Ok(()), Err)
    }
}

/// One-shot "caught up" signal.
///
/// Setting it is idempotent; waiters that arrive after it was set return
/// immediately.
#[derive(Debug, Clone)]
pub struct ReadySignal {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for ReadySignal {
    fn default() -> Self {
        Self::new()
    }
}

impl ReadySignal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn set(&self) {
        self.tx.send_if_modified(|ready| !std::mem::replace(ready, true));
    }

    pub fn is_set(&self) -> bool {
        *self.tx.borrow()
    }

    /// Waits for the signal, or fails with `Cancelled` if `cancel` fires first.
    pub async fn wait(&self, cancel: &CancellationToken) -> Result<(), ClientError> {
        let mut rx = self.tx.subscribe();
        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(ClientError::Cancelled),
            ready = rx.wait_for(|ready| *ready) => {
                ready.map(|_| ()).map_err(|_| ClientError::Cancelled)
            }
        }
    }
}
