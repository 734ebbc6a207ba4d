//! # gapline
//!
//! Event-stream synchronization for chat protocol clients.
//!
//! gapline keeps a durable mirror of the server's per-stream sequence
//! counters, detects missed updates, fetches them and replays everything in
//! counter order before handlers see it. Alongside it keeps a write-through
//! peer cache and gates every outbound call behind a rate limiter and a
//! congestion backoff.
//!
//! # Architecture
//!
//! ```text
//!              inbound                                     handlers
//!  Transport ───────────► Engine ──► PeerResolver ──► Dispatcher ──► fn(ctx, update)
//!      ▲                    │ gap        (cache)
//!      │   outbound         ▼
//!      └──── RateLimiter ◄─ FloodWaiter ◄── GetDifference / API calls
//! ```
//!
//! # Quick Start
//!
//! ```ignore
//! use gapline::{Client, UpdateContext, UpdateKind};
//!
//! let mut client = Client::open(transport, "session/phone-15550100")?;
//! client.on(UpdateKind::NewMessage, |ctx: UpdateContext, update| async move {
//!     println!("{:?}: {}", ctx.peer.id(), update.payload);
//!     Ok(())
//! });
//! client.run(|session| async move {
//!     println!("logged in as {}", session.user.first_name);
//!     Ok(())
//! }).await?;
//! ```
//!
//! # Delivery guarantee
//!
//! Within one stream, handlers see updates in strictly increasing counter
//! order. The stored counter is advanced right after a handler returns, so
//! a crash in between delivers that update again on the next start: handlers
//! must be idempotent.

mod auth;
mod client;
mod dispatch;
mod error;
mod gaps;
mod group;
mod middleware;
mod peers;
mod persist;
mod transport;

pub use auth::{AuthFlow, ConstantAuthenticator, SignUpInfo, UserAuthenticator};
pub use client::{Client, ClientOptions, Session};
pub use dispatch::{Dispatcher, Handler, HandlerFuture, HandlerResult, ResolvedPeer, UpdateContext};
pub use error::{AuthError, BoxError, ClientError, ClientResult, PeerError, RpcError};
pub use gaps::{Engine, EngineConfig};
pub use group::{ReadySignal, TaskGroup};
pub use middleware::{
    FloodCallback, FloodWait, FloodWaiter, RateLimit, RateLimiter, flow_control,
};
pub use peers::{PeerCollector, PeerResolver};
pub use transport::{
    Connection, DialogsOffset, DialogsSlice, Inbound, Invoker, Request, Response, SentCode,
    TermsOfService, Transport, User,
};

// Re-export the shared types, stores and configuration
pub use gapline_config::GaplineConfig;
pub use gapline_storage::{
    PeerCache, PeerStore, SequenceStateStore, SessionStore, StateStore, StorageError, Stores,
};
pub use gapline_types::{
    Counter, Difference, PeerId, PeerKind, PeerRecord, Sequence, SequenceState, StreamId, Update,
    UpdateKind,
};
