//! Per-attempt logging middleware.
//!
//! [`LoggingLayer`] logs every attempt of a dispatch with the `tracing` crate: the
//! attempt number, the outcome, and for failed responses the same body summary a
//! [`RequestException`] would carry. Credentials never reach the log.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::task::{Context, Poll};
use std::time::Instant;

use http::header::{AUTHORIZATION, COOKIE, HeaderMap, PROXY_AUTHORIZATION};
use tower::{Layer, Service};
use tracing::{Instrument, debug, info, info_span, warn};
use volley_core::{ExceptionPolicy, RequestException, TransferStats};

use crate::{Error, Request, Response, ResponseFuture, Result};

const REDACTED: &str = "[redacted]";

/// Layer logging each attempt that passes through it.
///
/// A builder applies its middleware once per dispatch, so attempt numbers restart at 1
/// for every request and count retries within it.
///
/// # Example
///
/// ```
/// use volley::{Factory, middleware::LoggingLayer, pipeline};
///
/// let http = Factory::new();
/// http.global_middleware(pipeline::layer(LoggingLayer::new()));
/// ```
#[derive(Debug, Clone, Default)]
pub struct LoggingLayer {
    level: LogLevel,
    exceptions: ExceptionPolicy,
}

/// How much the logging middleware records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogLevel {
    /// Also log redacted request headers and body sizes at debug level.
    Debug,
    /// One line per attempt outcome.
    #[default]
    Info,
}

impl LoggingLayer {
    /// Log attempt outcomes.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Log attempt outcomes plus request details.
    #[must_use]
    pub fn debug() -> Self {
        Self {
            level: LogLevel::Debug,
            ..Self::default()
        }
    }

    /// Truncate failure summaries with `policy` instead of the default length.
    #[must_use]
    pub fn with_exception_policy(mut self, policy: ExceptionPolicy) -> Self {
        self.exceptions = policy;
        self
    }
}

impl<S> Layer<S> for LoggingLayer {
    type Service = Logging<S>;

    fn layer(&self, inner: S) -> Self::Service {
        Logging {
            inner,
            level: self.level,
            exceptions: self.exceptions.clone(),
            attempts: Arc::default(),
        }
    }
}

/// Service produced by [`LoggingLayer`].
///
/// Clones share the attempt counter.
#[derive(Debug, Clone)]
pub struct Logging<S> {
    inner: S,
    level: LogLevel,
    exceptions: ExceptionPolicy,
    attempts: Arc<AtomicU32>,
}

impl<S> Service<Request> for Logging<S>
where
    S: Service<Request, Response = Response, Error = Error> + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = Response;
    type Error = Error;
    type Future = ResponseFuture;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<()>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request) -> Self::Future {
        let attempt = self.attempts.fetch_add(1, Ordering::Relaxed) + 1;
        let span = info_span!(
            "http_attempt",
            method = %request.method(),
            url = %request.url(),
            attempt
        );

        if self.level == LogLevel::Debug {
            span.in_scope(|| {
                debug!(
                    headers = ?redacted_headers(request.headers()),
                    body_bytes = request.body().len(),
                    "sending request"
                );
            });
        }

        let exceptions = self.exceptions.clone();
        let mut inner = self.inner.clone();
        Box::pin(
            async move {
                let started = Instant::now();
                let result = inner.call(request).await;
                let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

                match &result {
                    Ok(response) if response.failed() => {
                        let summary = failure_summary(response, &exceptions);
                        warn!(
                            status = response.status(),
                            elapsed_ms,
                            summary = summary.as_deref().unwrap_or_default(),
                            "attempt returned a failed response"
                        );
                    }
                    Ok(response) => {
                        let redirects = response.transfer_stats().map_or(0, TransferStats::redirects);
                        info!(status = response.status(), elapsed_ms, redirects, "attempt completed");
                    }
                    Err(Error::Connection(failure)) => {
                        warn!(
                            kind = %failure.kind(),
                            error = failure.message(),
                            elapsed_ms,
                            "attempt could not connect"
                        );
                    }
                    Err(err) if err.is_stray_request() => {
                        warn!("no fake matched the request and stray requests are prevented");
                    }
                    Err(err) => warn!(error = %err, elapsed_ms, "attempt failed"),
                }

                result
            }
            .instrument(span),
        )
    }
}

/// Header pairs safe to log.
fn redacted_headers(headers: &HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .map(|(name, value)| {
            let value = if [AUTHORIZATION, COOKIE, PROXY_AUTHORIZATION].contains(name) {
                REDACTED.to_string()
            } else {
                value.to_str().unwrap_or("[binary]").to_string()
            };
            (name.as_str().to_string(), value)
        })
        .collect()
}

/// Body summary of a failed response, truncated like exception messages.
fn failure_summary(response: &Response, policy: &ExceptionPolicy) -> Option<String> {
    RequestException::from_response(response.clone(), policy)
        .and_then(|exception| exception.summary().map(str::to_string))
}
