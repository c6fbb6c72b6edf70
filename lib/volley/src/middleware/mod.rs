//! Tower middleware for the request pipeline.
//!
//! Any tower [`Layer`] whose service handles [`Request`](crate::Request) and yields
//! [`Response`](crate::Response) can run as user middleware. Wrap it with
//! [`pipeline::layer`](crate::pipeline::layer) and register it on a builder or a
//! factory; the first middleware registered is the first to see the request.
//!
//! # Feature Flags
//!
//! | Feature | Description |
//! |---------|-------------|
//! | `middleware-logging` | [`LoggingLayer`] and `.with_logging()` |
//!
//! # Example
//!
//! ```
//! use volley::{Factory, middleware::LoggingLayer, pipeline};
//!
//! let http = Factory::new();
//! http.fake();
//! let response = http
//!     .request()
//!     .with_middleware(pipeline::layer(LoggingLayer::debug()))
//!     .get("https://api.test/ping")?;
//! assert!(response.ok());
//! # Ok::<(), volley::Error>(())
//! ```

#[cfg(feature = "middleware-logging")]
mod logging;

#[cfg(feature = "middleware-logging")]
pub use logging::{LogLevel, Logging, LoggingLayer};

// Re-export tower types for convenience (always available)
pub use tower::util::{MapRequestLayer, MapResponseLayer};
pub use tower::{Layer, ServiceBuilder};
