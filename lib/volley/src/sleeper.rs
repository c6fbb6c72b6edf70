//! Inter-attempt delays.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures_util::future::BoxFuture;

/// Waits between retry attempts.
///
/// The blocking dispatch path calls [`Sleeper::sleep`]; the asynchronous path awaits
/// [`Sleeper::sleep_async`].
pub trait Sleeper: Send + Sync {
    /// Block the current thread for `duration`.
    fn sleep(&self, duration: Duration);

    /// Wait for `duration` without blocking the thread.
    fn sleep_async(&self, duration: Duration) -> BoxFuture<'static, ()>;
}

/// Real delays: `std::thread::sleep` and `tokio::time::sleep`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

impl Sleeper for TokioSleeper {
    fn sleep(&self, duration: Duration) {
        if !duration.is_zero() {
            std::thread::sleep(duration);
        }
    }

    fn sleep_async(&self, duration: Duration) -> BoxFuture<'static, ()> {
        Box::pin(async move {
            if !duration.is_zero() {
                tokio::time::sleep(duration).await;
            }
        })
    }
}

/// Records requested delays instead of waiting.
///
/// Clones share the same log.
#[derive(Debug, Clone, Default)]
pub struct RecordingSleeper {
    delays: Arc<Mutex<Vec<Duration>>>,
}

impl RecordingSleeper {
    /// Create an empty recording sleeper.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Delays requested so far, in order.
    #[must_use]
    pub fn delays(&self) -> Vec<Duration> {
        self.delays
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn record(&self, duration: Duration) {
        self.delays
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(duration);
    }
}

impl Sleeper for RecordingSleeper {
    fn sleep(&self, duration: Duration) {
        self.record(duration);
    }

    fn sleep_async(&self, duration: Duration) -> BoxFuture<'static, ()> {
        self.record(duration);
        Box::pin(std::future::ready(()))
    }
}
