//! Error types for volley.

use derive_more::{Display, Error, From};

use crate::{Method, RequestException, Response};

// ============================================================================
// Connection Failure
// ============================================================================

/// What went wrong when the transport could not complete an exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum ConnectionFailureKind {
    /// DNS resolution or TCP connect failed, or the connection was refused.
    #[display("connect")]
    Connect,
    /// No response arrived before the configured timeout.
    #[display("timeout")]
    Timeout,
    /// The TLS handshake failed.
    #[display("tls")]
    Tls,
    /// Any other low-level I/O failure before a response was received.
    #[display("other")]
    Other,
}

/// The transport could not complete the exchange at all.
///
/// No response exists for this failure, so it is never retried by the
/// request engine; callers that want to retry must do so around the call.
#[derive(Debug, Clone, PartialEq, Eq, Display, Error)]
#[display("connection error ({kind}): {message}")]
pub struct ConnectionFailure {
    kind: ConnectionFailureKind,
    message: String,
}

impl ConnectionFailure {
    /// Create a connection failure of the given kind.
    #[must_use]
    pub fn new(kind: ConnectionFailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// The failure category.
    #[must_use]
    pub const fn kind(&self) -> ConnectionFailureKind {
        self.kind
    }

    /// The transport's description of the failure.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

// ============================================================================
// Error Type
// ============================================================================

/// Main error type for volley operations.
#[derive(Debug, Display, Error, From)]
pub enum Error {
    /// The transport could not complete the exchange.
    #[display("{_0}")]
    #[from]
    Connection(ConnectionFailure),

    /// A response was received but its status is a client or server error.
    #[display("{_0}")]
    #[from]
    Http(RequestException),

    /// Stray requests are prevented and no fake matched.
    #[display("attempted request to [{url}] without a matching fake")]
    #[from(skip)]
    StrayRequest {
        /// Request method.
        method: Method,
        /// Request URL.
        url: String,
    },

    /// A response sequence was invoked after it ran out of entries.
    #[display("out of responses: the response sequence is empty")]
    #[from(skip)]
    SequenceExhausted,

    /// Invalid request configuration.
    #[display("invalid request: {_0}")]
    #[from(skip)]
    InvalidRequest(#[error(not(source))] String),

    /// JSON serialization error.
    #[display("JSON serialization error: {_0}")]
    #[from]
    JsonSerialization(serde_json::Error),

    /// JSON deserialization error with path context.
    #[display("JSON deserialization error at '{path}': {message}")]
    #[from(skip)]
    JsonDeserialization {
        /// JSON path to the error (e.g., "user.address.city").
        path: String,
        /// Error message.
        message: String,
    },

    /// Form URL-encoded or query string serialization error.
    #[display("form serialization error: {_0}")]
    #[from]
    FormSerialization(serde_html_form::ser::Error),

    /// URL parsing error.
    #[display("invalid URL: {_0}")]
    #[from]
    InvalidUrl(url::ParseError),

    /// Too many redirects.
    #[display("too many redirects ({count} exceeded max of {max})")]
    #[from(skip)]
    TooManyRedirects {
        /// Number of redirects followed.
        count: usize,
        /// Maximum allowed redirects.
        max: usize,
    },

    /// Invalid redirect response.
    #[display("invalid redirect: {_0}")]
    #[from(skip)]
    InvalidRedirect(#[error(not(source))] String),

    /// Writing a response body to its sink failed.
    #[display("sink write failed: {_0}")]
    #[from(skip)]
    Sink(std::io::Error),

    /// The blocking runtime could not be started.
    #[display("runtime error: {_0}")]
    #[from(skip)]
    Runtime(#[error(not(source))] String),
}

/// Result type alias using [`crate::Error`].
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create a connection error of the given kind.
    #[must_use]
    pub fn connection(kind: ConnectionFailureKind, message: impl Into<String>) -> Self {
        Self::Connection(ConnectionFailure::new(kind, message))
    }

    /// Create a timeout connection error.
    #[must_use]
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::connection(ConnectionFailureKind::Timeout, message)
    }

    /// Create an invalid request error.
    #[must_use]
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest(message.into())
    }

    /// Create a stray request error.
    #[must_use]
    pub fn stray_request(method: Method, url: impl Into<String>) -> Self {
        Self::StrayRequest {
            method,
            url: url.into(),
        }
    }

    /// Create a JSON deserialization error with path context.
    #[must_use]
    pub fn json_deserialization(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::JsonDeserialization {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Returns `true` if this is a connection failure.
    #[must_use]
    pub const fn is_connection(&self) -> bool {
        matches!(self, Self::Connection(_))
    }

    /// Returns `true` if this is a connection failure caused by a timeout.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Connection(failure) if failure.kind() == ConnectionFailureKind::Timeout)
    }

    /// Returns `true` if this is an HTTP-level failure.
    #[must_use]
    pub const fn is_http(&self) -> bool {
        matches!(self, Self::Http(_))
    }

    /// Returns `true` if a stray request was blocked.
    #[must_use]
    pub const fn is_stray_request(&self) -> bool {
        matches!(self, Self::StrayRequest { .. })
    }

    /// Returns the HTTP status code if this is an HTTP error.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http(exception) => Some(exception.status()),
            _ => None,
        }
    }

    /// Returns the failed response if this is an HTTP error.
    #[must_use]
    pub fn response(&self) -> Option<&Response> {
        match self {
            Self::Http(exception) => Some(exception.response()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;
    use crate::ExceptionPolicy;

    fn http_error(status: u16, body: &'static str) -> Error {
        let response = Response::new(status, http::HeaderMap::new(), Bytes::from(body));
        let exception = response
            .to_exception(&ExceptionPolicy::default())
            .expect("failed response");
        Error::Http(exception)
    }

    #[test]
    fn error_display() {
        let err = Error::connection(ConnectionFailureKind::Connect, "connection refused");
        assert_eq!(
            err.to_string(),
            "connection error (connect): connection refused"
        );

        let err = Error::stray_request(Method::Get, "https://example.com/");
        assert_eq!(
            err.to_string(),
            "attempted request to [https://example.com/] without a matching fake"
        );

        let err = Error::json_deserialization("user.address.city", "missing field `city`");
        assert_eq!(
            err.to_string(),
            "JSON deserialization error at 'user.address.city': missing field `city`"
        );

        assert_eq!(http_error(404, "").to_string(), "HTTP request returned status code 404");
    }

    #[test]
    fn error_status() {
        let err = http_error(503, "down");
        assert_eq!(err.status(), Some(503));
        assert!(err.is_http());
        assert_eq!(err.response().map(Response::status), Some(503));

        let err = Error::timeout("deadline elapsed");
        assert_eq!(err.status(), None);
        assert!(err.response().is_none());
    }

    #[test]
    fn error_kinds() {
        assert!(Error::timeout("slow").is_timeout());
        assert!(Error::timeout("slow").is_connection());
        assert!(!Error::connection(ConnectionFailureKind::Tls, "bad cert").is_timeout());
        assert!(Error::stray_request(Method::Post, "http://x").is_stray_request());
        assert!(!Error::SequenceExhausted.is_connection());
    }
}
