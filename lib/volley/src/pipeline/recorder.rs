//! Recorder stage: logs every exchange that reaches it.

use std::sync::Arc;
use std::task::{Context, Poll};

use tower::{Layer, Service};

use crate::{Error, Recorder, Request, Response, ResponseFuture, Result};

/// Layer appending `(request, response)` pairs to recorders.
#[derive(Clone)]
pub struct RecorderLayer {
    recorders: Arc<[Arc<dyn Recorder>]>,
}

impl RecorderLayer {
    /// Create the layer.
    #[must_use]
    pub fn new(recorders: Vec<Arc<dyn Recorder>>) -> Self {
        Self {
            recorders: recorders.into(),
        }
    }
}

impl<S> Layer<S> for RecorderLayer {
    type Service = Record<S>;

    fn layer(&self, inner: S) -> Self::Service {
        Record {
            inner,
            recorders: Arc::clone(&self.recorders),
        }
    }
}

/// Service recording exchanges without altering them.
#[derive(Clone)]
pub struct Record<S> {
    inner: S,
    recorders: Arc<[Arc<dyn Recorder>]>,
}

impl<S> Service<Request> for Record<S>
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
        let recorders = Arc::clone(&self.recorders);
        let recorded = (!recorders.is_empty()).then(|| request.clone());
        let future = self.inner.call(request);

        Box::pin(async move {
            let result = future.await;
            if let Some(request) = recorded {
                let response = result.as_ref().ok();
                for recorder in recorders.iter() {
                    recorder.append(request.clone(), response.cloned());
                }
            }
            result
        })
    }
}
