//! Congestion backoff.
//!
//! When a call fails with [`RpcError::FloodWait`], every call through the
//! same waiter is held back until the requested time has passed, then the
//! failed call is retried.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::error::RpcError;
use crate::transport::{Invoker, Request, Response};

/// A congestion signal, as reported to the notification callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FloodWait {
    pub method: &'static str,
    pub duration: Duration,
}

/// Called once per congestion signal.
pub type FloodCallback = Arc<dyn Fn(FloodWait) + Send + Sync>;

/// [`Invoker`] that honours server congestion signals.
pub struct FloodWaiter<I> {
    inner: I,
    /// Only ever moves later.
    blocked_until: Mutex<Option<Instant>>,
    on_wait: Option<FloodCallback>,
    cancel: CancellationToken,
}

impl<I: Invoker> FloodWaiter<I> {
    pub fn new(inner: I, cancel: CancellationToken) -> Self {
        Self {
            inner,
            blocked_until: Mutex::new(None),
            on_wait: None,
            cancel,
        }
    }

    /// Sets the callback fired on each congestion signal.
    pub fn with_callback(mut self, callback: FloodCallback) -> Self {
        self.on_wait = Some(callback);
        self
    }

    fn blocked_until(&self) -> Option<Instant> {
        *self
            .blocked_until
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn block_for(&self, duration: Duration) {
        let until = Instant::now() + duration;
        let mut blocked = self
            .blocked_until
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *blocked = Some(blocked.map_or(until, |current| current.max(until)));
    }

    /// Waits until no congestion block is in effect.
    async fn wait_unblocked(&self) -> Result<(), RpcError> {
        while let Some(until) = self.blocked_until() {
            if until <= Instant::now() {
                break;
            }
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => return Err(RpcError::Cancelled),
                () = tokio::time::sleep_until(until) => {}
            }
        }
        Ok(())
    }
}

#[async_trait]
impl<I: Invoker> Invoker for FloodWaiter<I> {
    async fn invoke(&self, request: Request) -> Result<Response, RpcError> {
        loop {
            self.wait_unblocked().await?;
            match self.inner.invoke(request.clone()).await {
                Err(RpcError::FloodWait(duration)) => {
                    let method = request.method();
                    warn!(method, wait = ?duration, "flood wait, backing off");
                    self.block_for(duration);
                    if let Some(callback) = &self.on_wait {
                        callback(FloodWait { method, duration });
                    }
                }
                other => return other,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    /// Answers the first call with a flood wait, then succeeds.
    struct Congested {
        calls: AtomicUsize,
        wait: Duration,
    }

    #[async_trait]
    impl Invoker for Congested {
        async fn invoke(&self, _request: Request) -> Result<Response, RpcError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(RpcError::FloodWait(self.wait))
            } else {
                Ok(Response::Ok)
            }
        }
    }

    fn waiter(
        cancel: &CancellationToken,
        notified: Arc<Mutex<Vec<Duration>>>,
    ) -> FloodWaiter<Congested> {
        FloodWaiter::new(
            Congested {
                calls: AtomicUsize::new(0),
                wait: Duration::from_secs(2),
            },
            cancel.clone(),
        )
        .with_callback(Arc::new(move |wait: FloodWait| {
            notified.lock().unwrap().push(wait.duration);
        }))
    }

    #[tokio::test(start_paused = true)]
    async fn congestion_blocks_every_caller() {
        let notified = Arc::new(Mutex::new(Vec::new()));
        let cancel = CancellationToken::new();
        let waiter = Arc::new(waiter(&cancel, notified.clone()));
        let start = Instant::now();

        let first = {
            let waiter = waiter.clone();
            tokio::spawn(async move {
                waiter.invoke(Request::GetState).await.unwrap();
                start.elapsed()
            })
        };
        tokio::time::sleep(Duration::from_millis(500)).await;
        let second = {
            let waiter = waiter.clone();
            tokio::spawn(async move {
                waiter.invoke(Request::GetSelf).await.unwrap();
                start.elapsed()
            })
        };

        assert!(first.await.unwrap() >= Duration::from_secs(2));
        assert!(second.await.unwrap() >= Duration::from_secs(2));
        assert_eq!(*notified.lock().unwrap(), vec![Duration::from_secs(2)]);
    }

    #[tokio::test(start_paused = true)]
    async fn block_only_extends() {
        let cancel = CancellationToken::new();
        let waiter = waiter(&cancel, Arc::new(Mutex::new(Vec::new())));

        waiter.block_for(Duration::from_secs(5));
        let long = waiter.blocked_until().unwrap();
        waiter.block_for(Duration::from_secs(1));
        assert_eq!(waiter.blocked_until(), Some(long));
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_interrupts_backoff() {
        let cancel = CancellationToken::new();
        let waiter = Arc::new(waiter(&cancel, Arc::new(Mutex::new(Vec::new()))));

        let call = {
            let waiter = waiter.clone();
            tokio::spawn(async move { waiter.invoke(Request::GetState).await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;
        cancel.cancel();

        let started = Instant::now();
        let result = call.await.unwrap();
        assert!(matches!(result, Err(RpcError::Cancelled)));
        assert!(started.elapsed() < Duration::from_secs(1));
    }
}
