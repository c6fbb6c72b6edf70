//! The ordered handler pipeline.
//!
//! Every dispatch composes its stages around the transport once, outermost first:
//!
//! 1. user middleware, in registration order,
//! 2. the before-send stage,
//! 3. the recorder stage,
//! 4. the stub stage,
//! 5. the transport.
//!
//! A [`Stage`] is a function from the inner service to the wrapped service, so tower
//! layers, request maps and response maps all fit the same list.

mod before_send;
mod recorder;
mod stub;

use std::sync::Arc;

use tower::util::{BoxCloneService, MapRequestLayer, MapResponseLayer};
use tower::{Layer, Service};

pub use before_send::{BeforeSend, BeforeSendHook, BeforeSendLayer};
pub use recorder::{Record, RecorderLayer};
pub use stub::{StubLayer, StubService};

use crate::{BoxedService, Error, Request, Response};

/// One pipeline stage: wraps the inner service.
pub type Stage = Arc<dyn Fn(BoxedService) -> BoxedService + Send + Sync>;

/// Wrap `transport` in `stages`; the first stage ends up outermost.
#[must_use]
pub fn compose(stages: &[Stage], transport: BoxedService) -> BoxedService {
    stages
        .iter()
        .rev()
        .fold(transport, |service, stage| stage(service))
}

/// A stage applying a tower layer.
pub fn layer<L>(layer: L) -> Stage
where
    L: Layer<BoxedService> + Send + Sync + 'static,
    L::Service: Service<Request, Response = Response, Error = Error> + Clone + Send + 'static,
    <L::Service as Service<Request>>::Future: Send,
{
    Arc::new(move |service| BoxCloneService::new(layer.layer(service)))
}

/// A stage rewriting each request before it moves inward.
pub fn map_request(f: impl Fn(Request) -> Request + Send + Sync + 'static) -> Stage {
    let f = Arc::new(f);
    Arc::new(move |service| {
        let f = Arc::clone(&f);
        BoxCloneService::new(MapRequestLayer::new(move |request| f(request)).layer(service))
    })
}

/// A stage rewriting each successful response on its way out.
pub fn map_response(f: impl Fn(Response) -> Response + Send + Sync + 'static) -> Stage {
    let f = Arc::new(f);
    Arc::new(move |service| {
        let f = Arc::clone(&f);
        BoxCloneService::new(MapResponseLayer::new(move |response| f(response)).layer(service))
    })
}
