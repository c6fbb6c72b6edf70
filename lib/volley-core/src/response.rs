//! HTTP response handling.
//!
//! [`Response`] wraps one received (or faked) response. Its decoded JSON is computed on
//! first access and cached; cookies and [`TransferStats`] are attached after dispatch.
//!
//! # Example
//!
//! ```
//! use bytes::Bytes;
//! use http::HeaderMap;
//! use volley_core::Response;
//!
//! let response = Response::new(200, HeaderMap::new(), Bytes::from(r#"{"data":{"ids":[7]}}"#));
//! assert!(response.successful());
//! assert_eq!(response.json_get("data.ids.0"), Some(&serde_json::json!(7)));
//! ```

use std::collections::BTreeMap;
use std::sync::OnceLock;

use bytes::Bytes;
use http::header::{HeaderMap, HeaderName, HeaderValue, SET_COOKIE};
use serde_json::Value;
use url::Url;

use crate::{ExceptionPolicy, RequestException, Result, TransferStats};

/// HTTP response with status, headers, body and attached metadata.
#[derive(Debug, Clone)]
pub struct Response {
    status: u16,
    headers: HeaderMap,
    body: Bytes,
    decoded: OnceLock<Option<Value>>,
    cookies: BTreeMap<String, String>,
    transfer_stats: Option<TransferStats>,
}

impl Response {
    /// Creates a new response.
    #[must_use]
    pub fn new(status: u16, headers: HeaderMap, body: Bytes) -> Self {
        Self {
            status,
            headers,
            body,
            decoded: OnceLock::new(),
            cookies: BTreeMap::new(),
            transfer_stats: None,
        }
    }

    /// Add a header. Invalid names or values are ignored.
    #[must_use]
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            self.headers.append(name, value);
        }
        self
    }

    /// HTTP status code.
    #[must_use]
    pub const fn status(&self) -> u16 {
        self.status
    }

    /// Response headers.
    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// First value of a header, if present and visible ASCII.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Raw body.
    #[must_use]
    pub const fn bytes(&self) -> &Bytes {
        &self.body
    }

    /// Body as text, replacing invalid UTF-8 sequences.
    #[must_use]
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Deserialize the body as JSON.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::JsonDeserialization`] with the failing path.
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        crate::from_json(&self.body)
    }

    /// Decoded JSON body, computed once. `None` if the body is not JSON.
    #[must_use]
    pub fn json_value(&self) -> Option<&Value> {
        self.decoded
            .get_or_init(|| serde_json::from_slice(&self.body).ok())
            .as_ref()
    }

    /// Look up a value in the decoded body with a dot path such as `data.items.0.id`.
    #[must_use]
    pub fn json_get(&self, path: &str) -> Option<&Value> {
        path.split('.')
            .filter(|segment| !segment.is_empty())
            .try_fold(self.json_value()?, |value, segment| match value {
                Value::Object(map) => map.get(segment),
                Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
                _ => None,
            })
    }

    /// Status is exactly 200.
    #[must_use]
    pub const fn ok(&self) -> bool {
        self.status == 200
    }

    /// Status is 2xx.
    #[must_use]
    pub const fn successful(&self) -> bool {
        self.status >= 200 && self.status < 300
    }

    /// Status is 3xx.
    #[must_use]
    pub const fn redirect(&self) -> bool {
        self.status >= 300 && self.status < 400
    }

    /// Status is 4xx.
    #[must_use]
    pub const fn client_error(&self) -> bool {
        self.status >= 400 && self.status < 500
    }

    /// Status is 5xx or above.
    #[must_use]
    pub const fn server_error(&self) -> bool {
        self.status >= 500
    }

    /// Status is a client or server error.
    #[must_use]
    pub const fn failed(&self) -> bool {
        self.client_error() || self.server_error()
    }

    /// Cookies set by the response.
    #[must_use]
    pub fn cookies(&self) -> &BTreeMap<String, String> {
        &self.cookies
    }

    /// Value of one cookie set by the response.
    #[must_use]
    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies.get(name).map(String::as_str)
    }

    /// Attach cookies; existing names are overwritten.
    pub fn attach_cookies(&mut self, cookies: BTreeMap<String, String>) {
        self.cookies.extend(cookies);
    }

    /// Transfer statistics of the attempt that produced this response.
    #[must_use]
    pub const fn transfer_stats(&self) -> Option<&TransferStats> {
        self.transfer_stats.as_ref()
    }

    /// Attach transfer statistics.
    pub fn attach_transfer_stats(&mut self, stats: TransferStats) {
        self.transfer_stats = Some(stats);
    }

    /// URL that produced this response, after redirects.
    #[must_use]
    pub fn effective_url(&self) -> Option<&Url> {
        self.transfer_stats.as_ref().map(TransferStats::effective_url)
    }

    /// Run `callback` if the response failed.
    #[must_use]
    pub fn on_error(self, callback: impl FnOnce(&Self)) -> Self {
        if self.failed() {
            callback(&self);
        }
        self
    }

    /// Build a [`RequestException`] if the response failed.
    #[must_use]
    pub fn to_exception(&self, policy: &ExceptionPolicy) -> Option<RequestException> {
        RequestException::from_response(self.clone(), policy)
    }

    /// Return the response, or [`crate::Error::Http`] if it failed.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Http`] for client and server errors.
    pub fn throw_if_failed(self, policy: &ExceptionPolicy) -> Result<Self> {
        match self.to_exception(policy) {
            Some(exception) => Err(exception.into()),
            None => Ok(self),
        }
    }

    /// Consume into (status, headers, body).
    #[must_use]
    pub fn into_parts(self) -> (u16, HeaderMap, Bytes) {
        (self.status, self.headers, self.body)
    }
}

/// Extract `name=value` pairs from `Set-Cookie` headers.
#[must_use]
pub fn parse_set_cookies(headers: &HeaderMap) -> BTreeMap<String, String> {
    headers
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .filter_map(|value| {
            let pair = value.split(';').next()?;
            let (name, value) = pair.split_once('=')?;
            let name = name.trim();
            (!name.is_empty()).then(|| (name.to_string(), value.trim().to_string()))
        })
        .collect()
}
