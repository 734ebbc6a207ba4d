//! Token bucket rate limiting for outbound calls.

use std::time::Duration;

use async_trait::async_trait;
use gapline_config::RateLimitConfig;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::RpcError;
use crate::transport::{Invoker, Request, Response};

/// Rate limit settings: one call per `interval`, up to `burst` back to back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    pub interval: Duration,
    pub burst: u32,
}

impl Default for RateLimit {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(100),
            burst: 5,
        }
    }
}

impl From<&RateLimitConfig> for RateLimit {
    fn from(config: &RateLimitConfig) -> Self {
        Self {
            interval: config.interval(),
            burst: config.burst,
        }
    }
}

/// Token bucket measured in time credit.
///
/// One token is worth `interval` of credit and the bucket holds at most
/// `burst` tokens. Credit accrues in real time, so the arithmetic stays
/// exact in integer nanoseconds.
#[derive(Debug)]
struct Bucket {
    interval: Duration,
    capacity: Duration,
    credit: Duration,
    last_refill: Instant,
}

impl Bucket {
    fn new(limit: RateLimit) -> Self {
        let capacity = limit.interval.saturating_mul(limit.burst.max(1));
        Self {
            interval: limit.interval,
            capacity,
            credit: capacity, // Start full
            last_refill: Instant::now(),
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill);
        self.credit = (self.credit + elapsed).min(self.capacity);
        self.last_refill = now;
    }

    /// Takes one token, or returns how long until one is available.
    fn take(&mut self, now: Instant) -> Option<Duration> {
        self.refill(now);
        if self.credit >= self.interval {
            self.credit -= self.interval;
            None
        } else {
            Some(self.interval - self.credit)
        }
    }
}

/// [`Invoker`] that delays calls to stay within a [`RateLimit`].
///
/// Waiting callers queue on a fair lock and are released in arrival order.
pub struct RateLimiter<I> {
    inner: I,
    bucket: Mutex<Bucket>,
    cancel: CancellationToken,
}

impl<I: Invoker> RateLimiter<I> {
    pub fn new(inner: I, limit: RateLimit, cancel: CancellationToken) -> Self {
        Self {
            inner,
            bucket: Mutex::new(Bucket::new(limit)),
            cancel,
        }
    }

    /// Waits for a token. Fails only when cancelled.
    pub async fn acquire(&self) -> Result<(), RpcError> {
        let mut bucket = tokio::select! {
            biased;
            () = self.cancel.cancelled() => return Err(RpcError::Cancelled),
            bucket = self.bucket.lock() => bucket,
        };
        if bucket.interval.is_zero() {
            return Ok(());
        }
        loop {
            let Some(wait) = bucket.take(Instant::now()) else {
                return Ok(());
            };
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => return Err(RpcError::Cancelled),
                () = tokio::time::sleep(wait) => {}
            }
        }
    }
}

#[async_trait]
impl<I: Invoker> Invoker for RateLimiter<I> {
    async fn invoke(&self, request: Request) -> Result<Response, RpcError> {
        self.acquire().await?;
        self.inner.invoke(request).await
    }
}
