//! Request/response recording.

use std::sync::{Arc, Mutex, PoisonError};

use crate::{Request, Response};

/// Append-only log of dispatched requests.
pub trait Recorder: Send + Sync {
    /// Record a request with its response, or `None` when no response was produced.
    fn append(&self, request: Request, response: Option<Response>);
}

/// One recorded exchange.
pub type RecordedExchange = (Request, Option<Response>);

/// In-memory [`Recorder`]. Clones share the same log.
#[derive(Debug, Clone, Default)]
pub struct MemoryRecorder {
    entries: Arc<Mutex<Vec<RecordedExchange>>>,
}

impl MemoryRecorder {
    /// Create an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of recorded exchanges, in dispatch order.
    #[must_use]
    pub fn recorded(&self) -> Vec<RecordedExchange> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of recorded exchanges.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Returns `true` if nothing was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forget every recorded exchange.
    pub fn clear(&self) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl Recorder for MemoryRecorder {
    fn append(&self, request: Request, response: Option<Response>) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((request, response));
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use http::HeaderMap;
    use volley_core::{Method, RequestOptions};

    use super::*;

    #[test]
    fn memory_recorder_keeps_order() {
        let recorder = MemoryRecorder::new();
        let shared = recorder.clone();
        assert!(recorder.is_empty());

        for path in ["a", "b"] {
            let request = Request::build(
                Method::Get,
                &format!("https://api.test/{path}"),
                RequestOptions::new(),
            )
            .expect("request");
            recorder.append(request, Some(Response::new(200, HeaderMap::new(), Bytes::new())));
        }
        let failed = Request::build(Method::Post, "https://api.test/c", RequestOptions::new())
            .expect("request");
        recorder.append(failed, None);

        let recorded = shared.recorded();
        assert_eq!(recorded.len(), 3);
        let paths: Vec<_> = recorded.iter().map(|(r, _)| r.url().path().to_string()).collect();
        assert_eq!(paths, vec!["/a", "/b", "/c"]);
        assert!(recorded.last().is_some_and(|(_, response)| response.is_none()));

        shared.clear();
        assert!(recorder.is_empty());
    }
}
