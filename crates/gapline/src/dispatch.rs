//! Routing of applied updates to handlers.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use gapline_types::{PeerId, PeerRecord, Update, UpdateKind};
use tracing::trace;

use crate::error::{BoxError, ClientError};
use crate::transport::Invoker;

/// The peer an update is about, as far as it could be resolved.
#[derive(Debug, Clone, PartialEq)]
pub enum ResolvedPeer {
    /// The update names no peer.
    None,
    Known(PeerRecord),
    /// The peer was never seen with entity data; only the id is known.
    Unknown(PeerId),
}

impl ResolvedPeer {
    pub fn id(&self) -> Option<PeerId> {
        match self {
            ResolvedPeer::None => None,
            ResolvedPeer::Known(record) => Some(record.id),
            ResolvedPeer::Unknown(id) => Some(*id),
        }
    }

    pub fn record(&self) -> Option<&PeerRecord> {
        match self {
            ResolvedPeer::Known(record) => Some(record),
            _ => None,
        }
    }
}

/// What a handler gets alongside the update.
#[derive(Clone)]
pub struct UpdateContext {
    pub peer: ResolvedPeer,
    /// Flood-controlled client for follow-up calls.
    pub api: Arc<dyn Invoker>,
}

pub type HandlerResult = Result<(), BoxError>;

pub type HandlerFuture = Pin<Box<dyn Future<Output = HandlerResult> + Send + 'static>>;

/// Handles one update kind.
///
/// Implemented for any `Fn(UpdateContext, Update) -> impl Future` closure.
pub trait Handler: Send + Sync + 'static {
    fn handle(&self, ctx: UpdateContext, update: Update) -> HandlerFuture;
}

impl<F, Fut> Handler for F
where
    F: Fn(UpdateContext, Update) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    fn handle(&self, ctx: UpdateContext, update: Update) -> HandlerFuture {
        Box::pin(self(ctx, update))
    }
}

/// Maps update kinds to handlers.
///
/// Registration happens before the client runs; the dispatcher is read-only
/// afterwards. Updates of a kind with no handler are dropped.
#[derive(Default)]
pub struct Dispatcher {
    handlers: HashMap<UpdateKind, Arc<dyn Handler>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for `kind`, replacing any previous one.
    pub fn on(&mut self, kind: UpdateKind, handler: impl Handler) -> &mut Self {
        self.handlers.insert(kind, Arc::new(handler));
        self
    }

    pub fn handles(&self, kind: &UpdateKind) -> bool {
        self.handlers.contains_key(kind)
    }

    /// Runs the handler for `update`, if any, and returns its outcome.
    pub async fn dispatch(&self, ctx: UpdateContext, update: Update) -> Result<(), ClientError> {
        let Some(handler) = self.handlers.get(&update.kind) else {
            trace!(kind = %update.kind, "no handler registered, dropping update");
            return Ok(());
        };
        let kind = update.kind.clone();
        handler
            .handle(ctx, update)
            .await
            .map_err(|source| ClientError::Handler { kind, source })
    }
}
