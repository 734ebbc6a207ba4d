//! Flood control for outbound calls.
//!
//! Two [`Invoker`] layers, composed as
//! `RateLimiter(FloodWaiter(connection))`: every call first takes a rate
//! token, then waits out any congestion block, then reaches the wire.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::transport::Invoker;

mod floodwait;
mod ratelimit;

pub use floodwait::{FloodCallback, FloodWait, FloodWaiter};
pub use ratelimit::{RateLimit, RateLimiter};

/// Wraps `invoker` in both flood-control layers.
pub fn flow_control(
    invoker: Arc<dyn Invoker>,
    limit: RateLimit,
    on_flood_wait: Option<FloodCallback>,
    cancel: &CancellationToken,
) -> Arc<dyn Invoker> {
    let mut waiter = FloodWaiter::new(invoker, cancel.clone());
    if let Some(callback) = on_flood_wait {
        waiter = waiter.with_callback(callback);
    }
    Arc::new(RateLimiter::new(waiter, limit, cancel.clone()))
}
