//! Per-attempt transfer statistics.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use url::Url;

use crate::Method;

/// Timing and effective-URI data for one attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferStats {
    method: Method,
    effective_url: Url,
    total_time: Duration,
    status: Option<u16>,
    redirects: usize,
}

impl TransferStats {
    /// Create stats for one completed attempt.
    #[must_use]
    pub fn new(method: Method, effective_url: Url, total_time: Duration) -> Self {
        Self {
            method,
            effective_url,
            total_time,
            status: None,
            redirects: 0,
        }
    }

    /// Set the final status code.
    #[must_use]
    pub const fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    /// Set the number of redirects followed.
    #[must_use]
    pub const fn with_redirects(mut self, redirects: usize) -> Self {
        self.redirects = redirects;
        self
    }

    /// Request method of the attempt.
    #[must_use]
    pub const fn method(&self) -> Method {
        self.method
    }

    /// URL that produced the final response, after redirects.
    #[must_use]
    pub fn effective_url(&self) -> &Url {
        &self.effective_url
    }

    /// Wall time of the attempt.
    #[must_use]
    pub const fn total_time(&self) -> Duration {
        self.total_time
    }

    /// Final status code, if a response was received.
    #[must_use]
    pub const fn status(&self) -> Option<u16> {
        self.status
    }

    /// Redirects followed during the attempt.
    #[must_use]
    pub const fn redirects(&self) -> usize {
        self.redirects
    }
}

/// Callback invoked once per attempt with its [`TransferStats`].
#[derive(Clone)]
pub struct StatsCallback(Arc<dyn Fn(&TransferStats) + Send + Sync>);

impl StatsCallback {
    /// Wrap a callback.
    pub fn new(callback: impl Fn(&TransferStats) + Send + Sync + 'static) -> Self {
        Self(Arc::new(callback))
    }

    /// Invoke the callback.
    pub fn call(&self, stats: &TransferStats) {
        (self.0)(stats);
    }
}

impl fmt::Debug for StatsCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("StatsCallback(..)")
    }
}
