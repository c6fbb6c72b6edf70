//! Request options and their merge semantics.
//!
//! [`RequestOptions`] is the option set handed to the transport. Builders merge option
//! sets on every mutating call with [`RequestOptions::merge`]:
//!
//! - `cookies`, `form_params`, `headers`, `json`, `multipart` and `query` are merged
//!   recursively (a deep union where the later set wins on scalar conflicts),
//! - every other option is replaced wholesale when the later set provides it.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use base64::Engine;
use bytes::Bytes;
use serde_json::{Map, Value};

use crate::{Part, StatsCallback};

/// Credentials for the `auth` option.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Auth {
    /// HTTP basic authentication.
    Basic {
        /// User name.
        username: String,
        /// Password.
        password: String,
    },
    /// HTTP digest authentication.
    Digest {
        /// User name.
        username: String,
        /// Password.
        password: String,
    },
}

impl Auth {
    /// Basic credentials.
    pub fn basic(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self::Basic {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Digest credentials.
    pub fn digest(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self::Digest {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Pre-computed `Authorization` header value, for schemes that have one.
    #[must_use]
    pub fn header_value(&self) -> Option<String> {
        match self {
            Self::Basic { username, password } => {
                let encoded = base64::engine::general_purpose::STANDARD
                    .encode(format!("{username}:{password}"));
                Some(format!("Basic {encoded}"))
            }
            Self::Digest { .. } => None,
        }
    }
}

/// The `allow_redirects` option.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Redirects {
    /// Return 3xx responses as-is.
    Disabled,
    /// Follow up to `max` redirects.
    Follow {
        /// Maximum number of redirects to follow.
        max: usize,
    },
}

/// In-memory sink target.
#[derive(Debug, Clone, Default)]
pub struct SinkBuffer(Arc<Mutex<Vec<u8>>>);

impl SinkBuffer {
    /// Create an empty buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the buffer contents.
    pub fn write(&self, bytes: &[u8]) {
        let mut buffer = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        buffer.clear();
        buffer.extend_from_slice(bytes);
    }

    /// Current buffer contents.
    #[must_use]
    pub fn contents(&self) -> Bytes {
        let buffer = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        Bytes::copy_from_slice(&buffer)
    }
}

/// Where a response body is additionally written.
#[derive(Debug, Clone)]
pub enum Sink {
    /// Write the body to a file.
    Path(PathBuf),
    /// Write the body to a shared buffer.
    Buffer(SinkBuffer),
}

impl From<PathBuf> for Sink {
    fn from(path: PathBuf) -> Self {
        Self::Path(path)
    }
}

impl From<SinkBuffer> for Sink {
    fn from(buffer: SinkBuffer) -> Self {
        Self::Buffer(buffer)
    }
}

/// Options for one request.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    /// Request headers, keyed by lowercase name.
    ///
    /// Prefer [`RequestOptions::set_header`] over inserting directly so names that differ
    /// only in case replace each other.
    pub headers: BTreeMap<String, String>,
    /// Query string parameters.
    pub query: BTreeMap<String, String>,
    /// Cookies sent with the request.
    pub cookies: BTreeMap<String, String>,
    /// JSON body.
    pub json: Option<Value>,
    /// Form URL-encoded body fields.
    pub form_params: Option<Map<String, Value>>,
    /// Multipart body parts.
    pub multipart: Vec<Part>,
    /// Raw body.
    pub body: Option<Bytes>,
    /// Connection timeout.
    pub connect_timeout: Option<Duration>,
    /// Total request timeout.
    pub timeout: Option<Duration>,
    /// Authentication credentials.
    pub auth: Option<Auth>,
    /// Redirect handling.
    pub allow_redirects: Option<Redirects>,
    /// TLS certificate verification.
    pub verify: Option<bool>,
    /// Additional response body destination.
    pub sink: Option<Sink>,
    /// Per-attempt transfer statistics callback.
    pub on_stats: Option<StatsCallback>,
}

impl RequestOptions {
    /// Create an empty option set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge `other` on top of `self`.
    #[must_use]
    pub fn merge(mut self, other: Self) -> Self {
        self.merge_from(other);
        self
    }

    /// Merge `other` on top of `self` in place.
    pub fn merge_from(&mut self, other: Self) {
        for (name, value) in other.headers {
            self.set_header(&name, value);
        }
        self.query.extend(other.query);
        self.cookies.extend(other.cookies);
        self.multipart.extend(other.multipart);

        self.json = match (self.json.take(), other.json) {
            (Some(mut base), Some(overlay)) => {
                deep_merge(&mut base, overlay);
                Some(base)
            }
            (base, overlay) => overlay.or(base),
        };
        self.form_params = match (self.form_params.take(), other.form_params) {
            (Some(mut base), Some(overlay)) => {
                merge_maps(&mut base, overlay);
                Some(base)
            }
            (base, overlay) => overlay.or(base),
        };

        replace(&mut self.body, other.body);
        replace(&mut self.connect_timeout, other.connect_timeout);
        replace(&mut self.timeout, other.timeout);
        replace(&mut self.auth, other.auth);
        replace(&mut self.allow_redirects, other.allow_redirects);
        replace(&mut self.verify, other.verify);
        replace(&mut self.sink, other.sink);
        replace(&mut self.on_stats, other.on_stats);
    }

    /// Set a header.
    #[must_use]
    pub fn header(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.set_header(name.as_ref(), value);
        self
    }

    /// Set a query parameter.
    #[must_use]
    pub fn query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.insert(name.into(), value.into());
        self
    }

    /// Set the JSON body.
    #[must_use]
    pub fn json(mut self, value: Value) -> Self {
        self.json = Some(value);
        self
    }

    /// Set the total request timeout.
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set a header in place, replacing any value stored under the same name in any case.
    pub fn set_header(&mut self, name: &str, value: impl Into<String>) {
        self.remove_header(name);
        self.headers.insert(name.to_ascii_lowercase(), value.into());
    }

    /// Remove a header, ignoring ASCII case.
    pub fn remove_header(&mut self, name: &str) {
        self.headers.retain(|key, _| !key.eq_ignore_ascii_case(name));
    }

    /// Header value by name, ignoring ASCII case.
    #[must_use]
    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

fn replace<T>(slot: &mut Option<T>, value: Option<T>) {
    if value.is_some() {
        *slot = value;
    }
}

/// Recursively merge `overlay` into `base`.
///
/// Objects are merged key by key, arrays are concatenated, anything else is replaced.
pub fn deep_merge(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base), Value::Object(overlay)) => merge_maps(base, overlay),
        (Value::Array(base), Value::Array(overlay)) => base.extend(overlay),
        (base, overlay) => *base = overlay,
    }
}

fn merge_maps(base: &mut Map<String, Value>, overlay: Map<String, Value>) {
    for (key, value) in overlay {
        match base.get_mut(&key) {
            Some(existing) => deep_merge(existing, value),
            None => {
                base.insert(key, value);
            }
        }
    }
}
