//! Prelude module for convenient imports.
//!
//! ```
//! use volley_core::prelude::*;
//! ```

pub use crate::{
    Auth, BodyFormat, Error, ExceptionPolicy, Form, Method, Part, Redirects, Request,
    RequestException, RequestOptions, Response, Result, Sink, SinkBuffer, TransferStats,
};
