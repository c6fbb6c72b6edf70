//! Core types for the volley HTTP request pipeline.
//!
//! This crate provides the value types shared by the request engine and its
//! collaborators:
//! - [`Method`] - HTTP method enum
//! - [`Request`] - a fully resolved outgoing request
//! - [`RequestOptions`] - the option set merged by builders and read by transports
//! - [`Response`] - HTTP response with cached JSON decoding
//! - [`RequestException`] and [`ExceptionPolicy`] - HTTP-level failures
//! - [`Error`] and [`Result`] - Error handling
//! - [`TransferStats`] - per-attempt timing data
//! - [`Form`] and [`Part`] - multipart bodies
//! - [`join_url`] and [`expand`] - URL joining and placeholder expansion

mod body;
mod error;
mod exception;
mod method;
mod multipart;
mod options;
pub mod prelude;
mod request;
mod response;
mod stats;
mod uri_template;

pub use body::{
    BodyFormat, ContentType, from_json, to_form, to_json, to_query_pairs, to_query_string,
    value_to_field,
};
pub use error::{ConnectionFailure, ConnectionFailureKind, Error, Result};
pub use exception::{DEFAULT_TRUNCATE_AT, ExceptionPolicy, RequestException, Truncation};
pub use method::Method;
pub use multipart::{Form, Part};
pub use options::{Auth, Redirects, RequestOptions, Sink, SinkBuffer, deep_merge};
pub use request::Request;
pub use response::{Response, parse_set_cookies};
pub use stats::{StatsCallback, TransferStats};
pub use uri_template::{expand, is_absolute, join_url};

// Re-export http crate types for status codes and headers
pub use http::{HeaderMap, StatusCode, header};
