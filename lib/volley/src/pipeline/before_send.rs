//! Before-send stage: hooks that observe or replace the outgoing request.

use std::sync::Arc;
use std::task::{Context, Poll};

use tower::{Layer, Service};

use crate::{Error, Request, Response, ResponseFuture, Result};

/// Receives the current request; returning `Some` replaces it.
pub type BeforeSendHook = Arc<dyn Fn(&Request) -> Option<Request> + Send + Sync>;

/// Layer running [`BeforeSendHook`]s in registration order.
#[derive(Clone)]
pub struct BeforeSendLayer {
    hooks: Arc<[BeforeSendHook]>,
}

impl BeforeSendLayer {
    /// Create the layer.
    #[must_use]
    pub fn new(hooks: Vec<BeforeSendHook>) -> Self {
        Self {
            hooks: hooks.into(),
        }
    }
}

impl<S> Layer<S> for BeforeSendLayer {
    type Service = BeforeSend<S>;

    fn layer(&self, inner: S) -> Self::Service {
        BeforeSend {
            inner,
            hooks: Arc::clone(&self.hooks),
        }
    }
}

/// Service applying before-send hooks.
#[derive(Clone)]
pub struct BeforeSend<S> {
    inner: S,
    hooks: Arc<[BeforeSendHook]>,
}

impl<S> Service<Request> for BeforeSend<S>
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
        let request = self
            .hooks
            .iter()
            .fold(request, |request, hook| hook(&request).unwrap_or(request));
        let future = self.inner.call(request);
        Box::pin(future)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use tower::ServiceExt;
    use tower::util::BoxCloneService;
    use volley_core::{Method, RequestOptions};

    use super::*;
    use crate::fake;

    #[tokio::test]
    async fn last_replacement_is_sent() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let observed = Arc::clone(&seen);
        let hooks: Vec<BeforeSendHook> = vec![
            Arc::new(|request: &Request| request.clone().with_header("X-Step", "one").ok()),
            Arc::new(move |request: &Request| {
                observed
                    .lock()
                    .expect("lock")
                    .push(request.header("x-step").map(str::to_string));
                None
            }),
            Arc::new(|request: &Request| request.clone().with_header("X-Step", "two").ok()),
        ];

        let transport = BoxCloneService::new(tower::service_fn(|request: Request| async move {
            Ok::<_, Error>(fake::response(
                request.header("x-step").unwrap_or_default().to_string(),
                200,
                http::HeaderMap::new(),
            ))
        }));
        let service = BeforeSendLayer::new(hooks).layer(transport);

        let request = Request::build(Method::Get, "https://api.test/", RequestOptions::new())
            .expect("request");
        let response = service.oneshot(request).await.expect("response");

        assert_eq!(response.text(), "two");
        assert_eq!(*seen.lock().expect("lock"), vec![Some("one".to_string())]);
    }
}
