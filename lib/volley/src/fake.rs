//! Canned responses and stub matchers.
//!
//! Stubs are consulted by the stub stage of the pipeline before the transport. The
//! first matcher that returns a [`Stub`] for a request decides the outcome; later
//! matchers are not evaluated.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use http::HeaderMap;
use http::header::{CONTENT_TYPE, HeaderValue};
use serde_json::Value;
use volley_core::{ConnectionFailure, ConnectionFailureKind};

use crate::{Error, Request, Response, ResponseSequence, Result, sequence::ResponseCallback};

/// Selects a [`Stub`] for a request, or `None` to let later matchers decide.
pub type StubMatcher = Arc<dyn Fn(&Request) -> Option<Stub> + Send + Sync>;

/// What a matched request resolves to.
#[derive(Clone)]
pub enum Stub {
    /// A literal response.
    Response(Response),
    /// A response computed from the request.
    Callback(ResponseCallback),
    /// The next entry of a sequence.
    Sequence(ResponseSequence),
    /// A simulated transport failure.
    ConnectionFailure(ConnectionFailure),
}

impl Stub {
    /// A stub computing its response from the request.
    pub fn callback(callback: impl Fn(&Request) -> Response + Send + Sync + 'static) -> Self {
        Self::Callback(Arc::new(callback))
    }

    /// Produce the outcome for `request`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connection`] for simulated failures and
    /// [`Error::SequenceExhausted`] for an exhausted sequence.
    pub fn resolve(&self, request: &Request) -> Result<Response> {
        match self {
            Self::Response(response) => Ok(response.clone()),
            Self::Callback(callback) => Ok(callback(request)),
            Self::Sequence(sequence) => sequence.next_response(request),
            Self::ConnectionFailure(failure) => Err(Error::Connection(failure.clone())),
        }
    }
}

impl fmt::Debug for Stub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Response(response) => f.debug_tuple("Response").field(&response.status()).finish(),
            Self::Callback(_) => f.write_str("Callback(..)"),
            Self::Sequence(sequence) => f.debug_tuple("Sequence").field(&sequence.len()).finish(),
            Self::ConnectionFailure(failure) => {
                f.debug_tuple("ConnectionFailure").field(failure).finish()
            }
        }
    }
}

impl From<Response> for Stub {
    fn from(response: Response) -> Self {
        Self::Response(response)
    }
}

impl From<ResponseSequence> for Stub {
    fn from(sequence: ResponseSequence) -> Self {
        Self::Sequence(sequence)
    }
}

impl From<ConnectionFailure> for Stub {
    fn from(failure: ConnectionFailure) -> Self {
        Self::ConnectionFailure(failure)
    }
}

/// A response with a body, status and headers.
#[must_use]
pub fn response(body: impl Into<Bytes>, status: u16, headers: HeaderMap) -> Response {
    Response::new(status, headers, body.into())
}

/// A JSON response with `Content-Type: application/json`.
#[must_use]
pub fn json(value: &Value, status: u16) -> Response {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    Response::new(status, headers, Bytes::from(value.to_string()))
}

/// An empty response with `status`.
#[must_use]
pub fn status(status: u16) -> Response {
    Response::new(status, HeaderMap::new(), Bytes::new())
}

/// A simulated connection failure.
#[must_use]
pub fn failed_connection(message: impl Into<String>) -> ConnectionFailure {
    ConnectionFailure::new(ConnectionFailureKind::Connect, message)
}

/// Wrap a closure as a [`StubMatcher`].
pub fn matcher(f: impl Fn(&Request) -> Option<Stub> + Send + Sync + 'static) -> StubMatcher {
    Arc::new(f)
}

/// Match every request.
pub fn any(stub: impl Into<Stub>) -> StubMatcher {
    let stub = stub.into();
    Arc::new(move |_| Some(stub.clone()))
}

/// Match requests whose URL matches `pattern`.
///
/// `*` matches any run of characters, and the pattern is anchored at the end only, so
/// `api.test/users/*` matches `https://api.test/users/7`.
pub fn url_matcher(pattern: impl Into<String>, stub: impl Into<Stub>) -> StubMatcher {
    let pattern = pattern.into();
    let stub = stub.into();
    Arc::new(move |request| url_matches(&pattern, request.url().as_str()).then(|| stub.clone()))
}

/// Returns `true` if `url` matches the wildcard `pattern`, which is implicitly prefixed
/// with `*`.
#[must_use]
pub fn url_matches(pattern: &str, url: &str) -> bool {
    if pattern.starts_with('*') {
        wildcard_match(pattern.as_bytes(), url.as_bytes())
    } else {
        wildcard_match(format!("*{pattern}").as_bytes(), url.as_bytes())
    }
}

/// Greedy `*` matching with single-star backtracking.
fn wildcard_match(pattern: &[u8], text: &[u8]) -> bool {
    let (mut p, mut t) = (0, 0);
    let mut star: Option<(usize, usize)> = None;

    while t < text.len() {
        match pattern.get(p) {
            Some(b'*') => {
                star = Some((p, t));
                p += 1;
            }
            Some(c) if Some(c) == text.get(t) => {
                p += 1;
                t += 1;
            }
            _ => match star {
                Some((star_p, star_t)) => {
                    p = star_p + 1;
                    t = star_t + 1;
                    star = Some((star_p, star_t + 1));
                }
                None => return false,
            },
        }
    }

    pattern.get(p..).is_some_and(|rest| rest.iter().all(|&c| c == b'*'))
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use volley_core::{Method, RequestOptions};

    use super::*;

    fn request(url: &str) -> Request {
        Request::build(Method::Get, url, RequestOptions::new()).expect("request")
    }

    #[test]
    fn url_patterns() {
        assert!(url_matches("*", "https://api.test/anything"));
        assert!(url_matches("api.test/*", "https://api.test/users/7"));
        assert!(url_matches("api.test/users/*/posts", "https://api.test/users/7/posts"));
        assert!(url_matches("https://api.test/users", "https://api.test/users"));
        assert!(!url_matches("api.test/users", "https://api.test/users/7"));
        assert!(!url_matches("other.test/*", "https://api.test/users"));
    }

    #[test]
    fn url_matcher_returns_stub_only_on_match() {
        let matcher = url_matcher("api.test/*", status(404));
        assert!(matcher(&request("https://api.test/x")).is_some());
        assert!(matcher(&request("https://other.test/x")).is_none());
    }

    #[test]
    fn stubs_resolve() {
        let request = request("https://api.test/echo");

        let stub = Stub::from(json(&json!({"a": 1}), 201));
        let response = stub.resolve(&request).expect("response");
        assert_eq!(response.status(), 201);
        assert_eq!(response.header("content-type"), Some("application/json"));

        let stub = Stub::callback(|request| response_for(request.url().path()));
        assert_eq!(stub.resolve(&request).expect("callback").text(), "/echo");

        let stub = Stub::from(failed_connection("refused"));
        assert!(stub.resolve(&request).expect_err("failure").is_connection());

        let stub = Stub::from(ResponseSequence::new());
        assert!(matches!(stub.resolve(&request), Err(Error::SequenceExhausted)));
    }

    fn response_for(path: &str) -> Response {
        response(path.to_string(), 200, HeaderMap::new())
    }
}
