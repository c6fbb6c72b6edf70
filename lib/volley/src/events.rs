//! Lifecycle events.

use volley_core::ConnectionFailure;

use crate::{Request, Response};

/// A request lifecycle event.
#[derive(Debug, Clone)]
pub enum Event {
    /// A request reached the before-send stage and is about to be sent.
    RequestSending {
        /// The outgoing request.
        request: Request,
    },
    /// An attempt produced a response.
    ResponseReceived {
        /// The request that produced the response.
        request: Request,
        /// The received response.
        response: Response,
    },
    /// The transport could not complete the exchange.
    ConnectionFailed {
        /// The request that failed.
        request: Request,
        /// The transport failure.
        failure: ConnectionFailure,
    },
}

impl Event {
    /// The request this event is about.
    #[must_use]
    pub const fn request(&self) -> &Request {
        match self {
            Self::RequestSending { request }
            | Self::ResponseReceived { request, .. }
            | Self::ConnectionFailed { request, .. } => request,
        }
    }
}

/// Fire-and-forget event sink.
///
/// Closures taking `&Event` implement this trait.
pub trait Notifier: Send + Sync {
    /// Publish an event.
    fn publish(&self, event: &Event);
}

impl<F> Notifier for F
where
    F: Fn(&Event) + Send + Sync,
{
    fn publish(&self, event: &Event) {
        self(event);
    }
}
