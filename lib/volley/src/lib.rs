//! Outbound HTTP request pipeline.
//!
//! Build requests with a fluent [`PendingRequest`], dispatch them blocking or
//! asynchronously with identical retry semantics, fan them out with a [`Pool`], and
//! test code that sends them with deterministic fakes, sequences and assertions.
//!
//! Every attempt runs through one ordered pipeline: user middleware, the before-send
//! hooks, the recorder, the stub matchers, then the transport.
//!
//! # Example
//!
//! ```
//! use volley::{Factory, RetryPolicy, Tries};
//!
//! let http = Factory::new();
//! http.fake_sequence("api.example.com/*")
//!     .push_status(500)
//!     .push_status(500)
//!     .push_json(serde_json::json!({"id": 1}), 200);
//!
//! let response = http
//!     .request()
//!     .retry(RetryPolicy::new(Tries::Count(3)))
//!     .get("https://api.example.com/users/1")?;
//!
//! assert_eq!(response.status(), 200);
//! http.assert_sent_count(3);
//! # Ok::<(), volley::Error>(())
//! ```

mod config;
mod connector;
mod dispatch;
mod events;
mod factory;
pub mod fake;
pub mod middleware;
mod pending;
pub mod pipeline;
mod pool;
pub mod prelude;
mod recorder;
mod retry;
mod sequence;
mod sleeper;
mod transport;

pub use config::{ClientConfig, ClientConfigBuilder, DEFAULT_MAX_REDIRECTS};
pub use connector::https_connector;
pub use events::{Event, Notifier};
pub use factory::{Factory, FactoryBuilder};
pub use pending::{Async, Blocking, Mode, PendingRequest};
pub use pool::{Pool, PoolKey, PoolResults};
pub use recorder::{MemoryRecorder, RecordedExchange, Recorder};
pub use retry::{Delay, DelayFn, RetryPolicy, RetryWhen, ThrowCallback, ThrowGuard, ThrowPolicy, Tries};
pub use sequence::{ResponseCallback, ResponseSequence, SequenceEntry};
pub use sleeper::{RecordingSleeper, Sleeper, TokioSleeper};
pub use transport::{BoxedService, HyperTransport, ResponseFuture};

// Re-export tower for middleware composition
pub use tower;

// Re-export core types
pub use volley_core::{
    Auth, BodyFormat, ConnectionFailure, ConnectionFailureKind, ContentType, Error,
    ExceptionPolicy, Form, Method, Part, Redirects, Request, RequestException, RequestOptions,
    Response, Result, Sink, SinkBuffer, StatsCallback, TransferStats, Truncation, from_json,
    to_form, to_json, to_query_string,
};

// Re-export http types for status codes and headers
pub use volley_core::{HeaderMap, StatusCode, header};
