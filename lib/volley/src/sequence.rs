//! Ordered canned responses.
//!
//! A [`ResponseSequence`] hands out its entries one per invocation. Once empty it
//! either fails with [`Error::SequenceExhausted`] or returns its fallback.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use bytes::Bytes;
use http::HeaderMap;
use serde_json::Value;
use volley_core::{ConnectionFailure, ConnectionFailureKind};

use crate::{Error, Request, Response, Result, fake};

/// Produces a response from the request that triggered it.
pub type ResponseCallback = Arc<dyn Fn(&Request) -> Response + Send + Sync>;

/// One entry of a [`ResponseSequence`].
#[derive(Clone)]
pub enum SequenceEntry {
    /// A literal response.
    Response(Response),
    /// A response computed from the request.
    Callback(ResponseCallback),
    /// A simulated transport failure.
    ConnectionFailure(ConnectionFailure),
}

impl SequenceEntry {
    fn resolve(&self, request: &Request) -> Result<Response> {
        match self {
            Self::Response(response) => Ok(response.clone()),
            Self::Callback(callback) => Ok(callback(request)),
            Self::ConnectionFailure(failure) => Err(Error::Connection(failure.clone())),
        }
    }
}

impl fmt::Debug for SequenceEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Response(response) => f.debug_tuple("Response").field(&response.status()).finish(),
            Self::Callback(_) => f.write_str("Callback(..)"),
            Self::ConnectionFailure(failure) => {
                f.debug_tuple("ConnectionFailure").field(failure).finish()
            }
        }
    }
}

#[derive(Debug)]
struct SequenceState {
    queue: VecDeque<SequenceEntry>,
    fail_when_empty: bool,
    empty_fallback: Option<SequenceEntry>,
}

/// A queue of canned responses shared by every clone of the handle.
///
/// # Example
///
/// ```
/// use volley::ResponseSequence;
///
/// let sequence = ResponseSequence::new()
///     .push_status(500)
///     .push_body("ok", 200)
///     .when_empty(volley::fake::status(204));
/// assert_eq!(sequence.len(), 2);
/// ```
#[derive(Debug, Clone)]
pub struct ResponseSequence {
    state: Arc<Mutex<SequenceState>>,
}

impl Default for ResponseSequence {
    fn default() -> Self {
        Self::new()
    }
}

impl ResponseSequence {
    /// Create an empty sequence that fails when exhausted.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(SequenceState {
                queue: VecDeque::new(),
                fail_when_empty: true,
                empty_fallback: None,
            })),
        }
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut SequenceState) -> T) -> T {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut state)
    }

    fn push_entry(self, entry: SequenceEntry) -> Self {
        self.with_state(|state| state.queue.push_back(entry));
        self
    }

    /// Append a response.
    #[must_use]
    pub fn push(self, response: Response) -> Self {
        self.push_entry(SequenceEntry::Response(response))
    }

    /// Append a response with a body and status.
    #[must_use]
    pub fn push_body(self, body: impl Into<Bytes>, status: u16) -> Self {
        self.push(fake::response(body, status, HeaderMap::new()))
    }

    /// Append a JSON response.
    #[must_use]
    pub fn push_json(self, value: Value, status: u16) -> Self {
        self.push(fake::json(&value, status))
    }

    /// Append an empty response with `status`.
    #[must_use]
    pub fn push_status(self, status: u16) -> Self {
        self.push(fake::status(status))
    }

    /// Append a response computed from the request.
    #[must_use]
    pub fn push_callback(
        self,
        callback: impl Fn(&Request) -> Response + Send + Sync + 'static,
    ) -> Self {
        self.push_entry(SequenceEntry::Callback(Arc::new(callback)))
    }

    /// Append a simulated connection failure.
    #[must_use]
    pub fn push_failed_connection(self, message: impl Into<String>) -> Self {
        self.push_entry(SequenceEntry::ConnectionFailure(ConnectionFailure::new(
            ConnectionFailureKind::Connect,
            message,
        )))
    }

    /// Return `response` once the sequence is empty.
    #[must_use]
    pub fn when_empty(self, response: Response) -> Self {
        self.with_state(|state| {
            state.fail_when_empty = false;
            state.empty_fallback = Some(SequenceEntry::Response(response));
        });
        self
    }

    /// Return an empty 200 response once the sequence is empty.
    #[must_use]
    pub fn dont_fail_when_empty(self) -> Self {
        self.when_empty(fake::status(200))
    }

    /// Number of entries left.
    #[must_use]
    pub fn len(&self) -> usize {
        self.with_state(|state| state.queue.len())
    }

    /// Returns `true` when no entries are left.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Pop the next entry and resolve it against `request`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SequenceExhausted`] when empty without a fallback, or
    /// [`Error::Connection`] for a simulated connection failure.
    pub fn next_response(&self, request: &Request) -> Result<Response> {
        let entry = self.with_state(|state| match state.queue.pop_front() {
            Some(entry) => Ok(entry),
            None if state.fail_when_empty => Err(Error::SequenceExhausted),
            None => Ok(state
                .empty_fallback
                .clone()
                .unwrap_or_else(|| SequenceEntry::Response(fake::status(200)))),
        })?;
        entry.resolve(request)
    }
}
