//! HTTP-level failures and their message policy.
//!
//! A [`RequestException`] is built from a failed [`Response`]. Its message embeds a
//! summary of the response body, truncated according to an [`ExceptionPolicy`].
//! The policy is a shared handle: every clone observes changes made through any other
//! clone, so a factory and all the requests it creates agree on one setting.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use derive_more::{Display, Error};

use crate::Response;

/// Default number of body characters kept in an exception summary.
pub const DEFAULT_TRUNCATE_AT: usize = 120;

/// Body summary truncation for [`RequestException`] messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Truncation {
    /// The full body is embedded in the message.
    Disabled,
    /// At most this many characters of the body are embedded.
    At(usize),
}

/// Shared, mutable truncation setting for exception messages.
///
/// A length of zero is stored as "disabled".
#[derive(Debug, Clone)]
pub struct ExceptionPolicy {
    truncate_at: Arc<AtomicUsize>,
}

impl Default for ExceptionPolicy {
    fn default() -> Self {
        Self {
            truncate_at: Arc::new(AtomicUsize::new(DEFAULT_TRUNCATE_AT)),
        }
    }
}

impl ExceptionPolicy {
    /// Create a policy with the default truncation length.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Restore the default truncation length.
    pub fn truncate(&self) {
        self.truncate_at(DEFAULT_TRUNCATE_AT);
    }

    /// Truncate summaries to `length` characters.
    ///
    /// Zero disables truncation, the same as [`ExceptionPolicy::dont_truncate`].
    pub fn truncate_at(&self, length: usize) {
        self.truncate_at.store(length, Ordering::SeqCst);
    }

    /// Embed the full body in exception messages.
    pub fn dont_truncate(&self) {
        self.truncate_at(0);
    }

    /// Current truncation setting.
    #[must_use]
    pub fn truncation(&self) -> Truncation {
        match self.truncate_at.load(Ordering::SeqCst) {
            0 => Truncation::Disabled,
            length => Truncation::At(length),
        }
    }
}

/// A response was received but its status is a client or server error.
#[derive(Debug, Clone, Display, Error)]
#[display("{message}")]
pub struct RequestException {
    response: Box<Response>,
    summary: Option<String>,
    message: String,
}

impl RequestException {
    /// Build an exception from a failed response.
    ///
    /// Returns `None` when the response is not a client or server error.
    #[must_use]
    pub fn from_response(response: Response, policy: &ExceptionPolicy) -> Option<Self> {
        if !response.failed() {
            return None;
        }

        let summary = match policy.truncation() {
            Truncation::Disabled => {
                let body = String::from_utf8_lossy(response.bytes()).into_owned();
                (!body.is_empty()).then_some(body)
            }
            Truncation::At(length) => body_summary(response.bytes(), length),
        };

        let mut message = format!("HTTP request returned status code {}", response.status());
        if let Some(summary) = &summary {
            message.push_str(":\n");
            message.push_str(summary);
            message.push('\n');
        }

        Some(Self {
            response: Box::new(response),
            summary,
            message,
        })
    }

    /// HTTP status code of the failed response.
    #[must_use]
    pub fn status(&self) -> u16 {
        self.response.status()
    }

    /// The failed response.
    #[must_use]
    pub fn response(&self) -> &Response {
        &self.response
    }

    /// Consume into the failed response.
    #[must_use]
    pub fn into_response(self) -> Response {
        *self.response
    }

    /// Body summary embedded in the message, if any.
    #[must_use]
    pub fn summary(&self) -> Option<&str> {
        self.summary.as_deref()
    }

    /// Full exception message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Summarize a body to at most `length` characters.
///
/// Empty bodies and bodies with non-printable characters have no summary.
fn body_summary(body: &[u8], length: usize) -> Option<String> {
    if body.is_empty() {
        return None;
    }

    let text = String::from_utf8_lossy(body);
    let mut summary: String = text.chars().take(length).collect();

    let printable = summary
        .chars()
        .all(|c| !c.is_control() || matches!(c, '\n' | '\r' | '\t'));
    if !printable || summary.contains(char::REPLACEMENT_CHARACTER) {
        return None;
    }

    if text.chars().nth(length).is_some() {
        summary.push_str(" (truncated...)");
    }

    Some(summary)
}
