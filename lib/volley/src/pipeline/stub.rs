//! Stub stage: answers matched requests with fakes instead of the transport.

use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use tower::{Layer, Service};
use volley_core::TransferStats;

use crate::fake::StubMatcher;
use crate::transport::write_sink;
use crate::{Error, Request, Response, ResponseFuture, Result};

/// Layer consulting stub matchers in registration order.
#[derive(Clone)]
pub struct StubLayer {
    matchers: Arc<[StubMatcher]>,
    prevent_stray_requests: bool,
}

impl StubLayer {
    /// Create the layer. With `prevent_stray_requests`, unmatched requests fail
    /// with [`Error::StrayRequest`] instead of reaching the transport.
    #[must_use]
    pub fn new(matchers: Vec<StubMatcher>, prevent_stray_requests: bool) -> Self {
        Self {
            matchers: matchers.into(),
            prevent_stray_requests,
        }
    }
}

impl<S> Layer<S> for StubLayer {
    type Service = StubService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        StubService {
            inner,
            matchers: Arc::clone(&self.matchers),
            prevent_stray_requests: self.prevent_stray_requests,
        }
    }
}

/// Service resolving stubs, falling through to the inner transport.
#[derive(Clone)]
pub struct StubService<S> {
    inner: S,
    matchers: Arc<[StubMatcher]>,
    prevent_stray_requests: bool,
}

impl<S> Service<Request> for StubService<S>
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
        let stub = self.matchers.iter().find_map(|matcher| matcher(&request));

        let Some(stub) = stub else {
            if self.prevent_stray_requests {
                let err = Error::stray_request(request.method(), request.url().as_str());
                return Box::pin(std::future::ready(Err(err)));
            }
            return Box::pin(self.inner.call(request));
        };

        tracing::debug!(method = %request.method(), url = %request.url(), "answering with fake");
        Box::pin(async move {
            let mut response = stub.resolve(&request)?;

            let options = request.options();
            if let Some(sink) = &options.sink {
                write_sink(sink, response.bytes()).await?;
            }
            let stats = TransferStats::new(request.method(), request.url().clone(), Duration::ZERO)
                .with_status(response.status());
            if let Some(on_stats) = &options.on_stats {
                on_stats.call(&stats);
            }
            response.attach_transfer_stats(stats);
            Ok(response)
        })
    }
}
