//! Concurrent fan-out of asynchronous requests.
//!
//! # Example
//!
//! ```no_run
//! use volley::{Factory, RetryPolicy, Tries};
//!
//! # async fn run() {
//! let http = Factory::new();
//! let results = http
//!     .pool()
//!     .add("users", |mut request| request.get("https://api.example.com/users"))
//!     .add("posts", |request| {
//!         request
//!             .retry(RetryPolicy::new(Tries::Count(3)))
//!             .throw_on_failure()
//!             .get("https://api.example.com/posts")
//!     })
//!     .push(|mut request| request.get("https://api.example.com/health"))
//!     .run()
//!     .await;
//!
//! assert!(results.get("users").is_some());
//! assert!(results.get(0_usize).is_some());
//! # }
//! ```

use std::fmt;

use futures_util::future::join_all;
use futures_util::stream::{self, StreamExt};

use crate::pending::{Async, PendingRequest};
use crate::{Factory, Response, ResponseFuture, Result};

/// Key of a pool entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PoolKey {
    /// Explicit name given to [`Pool::add`].
    Name(String),
    /// Position among the entries added with [`Pool::push`].
    Index(usize),
}

impl From<&str> for PoolKey {
    fn from(name: &str) -> Self {
        Self::Name(name.to_string())
    }
}

impl From<String> for PoolKey {
    fn from(name: String) -> Self {
        Self::Name(name)
    }
}

impl From<usize> for PoolKey {
    fn from(index: usize) -> Self {
        Self::Index(index)
    }
}

impl fmt::Display for PoolKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Name(name) => f.write_str(name),
            Self::Index(index) => write!(f, "{index}"),
        }
    }
}

/// Requests dispatched together; created by [`Factory::pool`].
///
/// Every entry is sent through its own asynchronous builder. A failing entry does
/// not cancel the others.
#[must_use]
pub struct Pool {
    factory: Factory,
    entries: Vec<(PoolKey, ResponseFuture)>,
    next_index: usize,
    concurrency: Option<usize>,
}

impl fmt::Debug for Pool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field(
                "keys",
                &self.entries.iter().map(|(key, _)| key).collect::<Vec<_>>(),
            )
            .field("concurrency", &self.concurrency)
            .finish_non_exhaustive()
    }
}

impl Pool {
    pub(crate) fn new(factory: Factory) -> Self {
        Self {
            factory,
            entries: Vec::new(),
            next_index: 0,
            concurrency: None,
        }
    }

    /// Add a request under `key`.
    ///
    /// `send` receives a fresh asynchronous builder from the factory, configures it and
    /// calls a verb.
    pub fn add(
        mut self,
        key: impl Into<PoolKey>,
        send: impl FnOnce(PendingRequest<Async>) -> ResponseFuture,
    ) -> Self {
        let future = send(self.factory.request().into_async());
        self.entries.push((key.into(), future));
        self
    }

    /// Add a request under the next numeric index.
    pub fn push(self, send: impl FnOnce(PendingRequest<Async>) -> ResponseFuture) -> Self {
        let index = self.next_index;
        let mut pool = self.add(index, send);
        pool.next_index += 1;
        pool
    }

    /// Keep at most `limit` requests in flight.
    pub fn with_concurrency(mut self, limit: usize) -> Self {
        self.concurrency = Some(limit.max(1));
        self
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if no entry was added.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drive every entry to completion.
    pub async fn run(self) -> PoolResults {
        let (keys, futures): (Vec<_>, Vec<_>) = self.entries.into_iter().unzip();
        tracing::debug!(entries = keys.len(), concurrency = ?self.concurrency, "running pool");

        let results: Vec<Result<Response>> = match self.concurrency {
            Some(limit) => stream::iter(futures).buffered(limit).collect().await,
            None => join_all(futures).await,
        };
        PoolResults {
            entries: keys.into_iter().zip(results).collect(),
        }
    }
}

/// Settled results of a [`Pool`], in insertion order.
#[derive(Debug)]
pub struct PoolResults {
    entries: Vec<(PoolKey, Result<Response>)>,
}

impl PoolResults {
    /// Result of the entry added under `key`.
    #[must_use]
    pub fn get(&self, key: impl Into<PoolKey>) -> Option<&Result<Response>> {
        let key = key.into();
        self.entries
            .iter()
            .find(|(candidate, _)| *candidate == key)
            .map(|(_, result)| result)
    }

    /// Iterate over keys and results.
    pub fn iter(&self) -> impl Iterator<Item = (&PoolKey, &Result<Response>)> {
        self.entries.iter().map(|(key, result)| (key, result))
    }

    /// Number of results.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if the pool was empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl IntoIterator for PoolResults {
    type Item = (PoolKey, Result<Response>);
    type IntoIter = std::vec::IntoIter<Self::Item>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}
