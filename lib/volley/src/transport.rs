//! Wire transport built on hyper-util.
//!
//! The pipeline treats the transport as an opaque tower service that executes one
//! [`Request`] and yields a [`Response`] or a low-level [`Error`]. [`HyperTransport`]
//! is the bundled implementation.

use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use bytes::Bytes;
use futures_util::future::BoxFuture;
use http::header::{CONTENT_LENGTH, CONTENT_TYPE, HeaderMap, LOCATION, USER_AGENT};
use http_body_util::{BodyExt, Full};
use hyper_rustls::HttpsConnector;
use hyper_util::{
    client::legacy::{Client, connect::HttpConnector},
    rt::TokioExecutor,
};
use tower::util::BoxCloneService;
use tower_service::Service;
use url::Url;
use volley_core::{
    Auth, ConnectionFailureKind, Redirects, Sink, StatsCallback, TransferStats,
};

use crate::{ClientConfig, Error, Method, Request, Response, Result, connector::https_connector};

// ============================================================================
// Type-Erased Service
// ============================================================================

/// Type-erased service every pipeline stage wraps.
pub type BoxedService = BoxCloneService<Request, Response, Error>;

/// Future returned by asynchronous dispatch.
pub type ResponseFuture = BoxFuture<'static, Result<Response>>;

/// Shared handle to a boxed transport.
///
/// The service is cloned out of the mutex for each call, so concurrent dispatches
/// never hold the lock across an await.
#[derive(Clone)]
pub(crate) struct SyncService {
    inner: Arc<Mutex<BoxedService>>,
}

impl SyncService {
    pub(crate) fn new(service: BoxedService) -> Self {
        Self {
            inner: Arc::new(Mutex::new(service)),
        }
    }

    pub(crate) fn service(&self) -> BoxedService {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl std::fmt::Debug for SyncService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SyncService(..)")
    }
}

// ============================================================================
// Hyper Transport
// ============================================================================

type HyperClient = Client<HttpsConnector<HttpConnector>, Full<Bytes>>;

/// HTTP transport using hyper-util with connection pooling and rustls.
///
/// Applies the request's `timeout`, `connect_timeout` and `allow_redirects` options,
/// writes the body to the `sink` option and reports [`TransferStats`] to `on_stats`.
/// Digest authentication and disabled certificate verification are rejected with
/// [`Error::InvalidRequest`].
#[derive(Clone)]
pub struct HyperTransport {
    client: HyperClient,
    config: ClientConfig,
}

impl std::fmt::Debug for HyperTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HyperTransport")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Default for HyperTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl HyperTransport {
    /// Create a transport with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(ClientConfig::default())
    }

    /// Create a transport with custom configuration.
    #[must_use]
    pub fn with_config(config: ClientConfig) -> Self {
        let client = build_client(&config, config.connect_timeout);
        Self { client, config }
    }

    /// Transport configuration.
    #[must_use]
    pub const fn config(&self) -> &ClientConfig {
        &self.config
    }

    async fn execute(&self, request: Request) -> Result<Response> {
        let options = request.options();
        if matches!(options.auth, Some(Auth::Digest { .. })) {
            return Err(Error::invalid_request(
                "digest authentication is not supported by HyperTransport",
            ));
        }
        if options.verify == Some(false) {
            return Err(Error::invalid_request(
                "disabling certificate verification is not supported by HyperTransport",
            ));
        }

        let client = match options.connect_timeout {
            Some(timeout) if timeout != self.config.connect_timeout => {
                build_client(&self.config, timeout)
            }
            _ => self.client.clone(),
        };
        let max_redirects = match options.allow_redirects {
            Some(Redirects::Disabled) => None,
            Some(Redirects::Follow { max }) => Some(max),
            None => Some(self.config.max_redirects),
        };
        let timeout = options.timeout.unwrap_or(self.config.timeout);
        let sink = options.sink.clone();
        let on_stats = options.on_stats.clone();

        let started = Instant::now();
        let method = request.method();
        let url = request.url().clone();
        let exchange = self.exchange(&client, request, max_redirects);
        let outcome = if timeout.is_zero() {
            exchange.await
        } else {
            tokio::time::timeout(timeout, exchange)
                .await
                .unwrap_or_else(|_| Err(Error::timeout(format!("request timed out after {timeout:?}"))))
        };

        match outcome {
            Ok(Exchange {
                mut response,
                effective_url,
                redirects,
            }) => {
                let stats = TransferStats::new(method, effective_url, started.elapsed())
                    .with_status(response.status())
                    .with_redirects(redirects);
                if let Some(sink) = &sink {
                    write_sink(sink, response.bytes()).await?;
                }
                report_stats(on_stats.as_ref(), &stats);
                response.attach_transfer_stats(stats);
                Ok(response)
            }
            Err(err) => {
                report_stats(
                    on_stats.as_ref(),
                    &TransferStats::new(method, url, started.elapsed()),
                );
                Err(err)
            }
        }
    }

    async fn exchange(
        &self,
        client: &HyperClient,
        request: Request,
        max_redirects: Option<usize>,
    ) -> Result<Exchange> {
        let (mut method, mut url, mut headers, mut body, _) = request.into_parts();
        if !headers.contains_key(USER_AGENT)
            && let Ok(value) = self.config.user_agent.parse()
        {
            headers.insert(USER_AGENT, value);
        }

        let mut redirects = 0;
        loop {
            let response = send_once(client, method, &url, &headers, body.clone()).await?;

            let Some(max) = max_redirects.filter(|_| is_redirect(response.status())) else {
                return Ok(Exchange {
                    response,
                    effective_url: url,
                    redirects,
                });
            };
            if redirects >= max {
                return Err(Error::TooManyRedirects {
                    count: redirects,
                    max,
                });
            }

            let location = response.header(LOCATION.as_str()).ok_or_else(|| {
                Error::InvalidRedirect("redirect response missing Location header".into())
            })?;
            url = url.join(location)?;

            let next_method = redirect_method(response.status(), method);
            if next_method != method {
                body = Bytes::new();
                headers.remove(CONTENT_TYPE);
                headers.remove(CONTENT_LENGTH);
            }
            method = next_method;
            redirects += 1;
            tracing::debug!(%url, redirects, "following redirect");
        }
    }
}

struct Exchange {
    response: Response,
    effective_url: Url,
    redirects: usize,
}

impl Service<Request> for HyperTransport {
    type Response = Response;
    type Error = Error;
    type Future = ResponseFuture;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: Request) -> Self::Future {
        let transport = self.clone();
        Box::pin(async move { transport.execute(request).await })
    }
}

fn build_client(config: &ClientConfig, connect_timeout: Duration) -> HyperClient {
    Client::builder(TokioExecutor::new())
        .pool_idle_timeout(config.pool_idle_timeout)
        .pool_max_idle_per_host(config.pool_idle_per_host)
        .build(https_connector(connect_timeout))
}

async fn send_once(
    client: &HyperClient,
    method: Method,
    url: &Url,
    headers: &HeaderMap,
    body: Bytes,
) -> Result<Response> {
    let uri: http::Uri = url
        .as_str()
        .parse()
        .map_err(|e| Error::invalid_request(format!("invalid URI '{url}': {e}")))?;

    let mut hyper_request = http::Request::new(Full::new(body));
    *hyper_request.method_mut() = method.into();
    *hyper_request.uri_mut() = uri;
    *hyper_request.headers_mut() = headers.clone();

    let response = client
        .request(hyper_request)
        .await
        .map_err(map_hyper_error)?;

    let status = response.status().as_u16();
    let (parts, body) = response.into_parts();
    let body = body
        .collect()
        .await
        .map_err(|e| Error::connection(ConnectionFailureKind::Other, e.to_string()))?
        .to_bytes();

    Ok(Response::new(status, parts.headers, body))
}

#[allow(clippy::needless_pass_by_value)]
fn map_hyper_error(err: hyper_util::client::legacy::Error) -> Error {
    let msg = format!("{err:?}");
    let lower = msg.to_ascii_lowercase();

    if lower.contains("tls") || lower.contains("certificate") || lower.contains("handshake") {
        return Error::connection(ConnectionFailureKind::Tls, err.to_string());
    }
    if lower.contains("timed out") || lower.contains("timeout") {
        return Error::connection(ConnectionFailureKind::Timeout, err.to_string());
    }
    if err.is_connect() {
        return Error::connection(ConnectionFailureKind::Connect, err.to_string());
    }
    Error::connection(ConnectionFailureKind::Other, err.to_string())
}

/// Check if a status code is a followed redirect.
const fn is_redirect(status: u16) -> bool {
    matches!(status, 301 | 302 | 303 | 307 | 308)
}

/// 301, 302 and 303 switch to GET (HEAD stays HEAD); 307 and 308 keep the method.
fn redirect_method(status: u16, original: Method) -> Method {
    match status {
        307 | 308 => original,
        _ if original == Method::Head => Method::Head,
        _ => Method::Get,
    }
}

fn report_stats(callback: Option<&StatsCallback>, stats: &TransferStats) {
    if let Some(callback) = callback {
        callback.call(stats);
    }
}

/// Write a response body to its sink.
pub(crate) async fn write_sink(sink: &Sink, body: &Bytes) -> Result<()> {
    match sink {
        Sink::Path(path) => tokio::fs::write(path, body).await.map_err(Error::Sink),
        Sink::Buffer(buffer) => {
            buffer.write(body);
            Ok(())
        }
    }
}
