//! Prelude module for convenient imports.
//!
//! ```
//! use volley::prelude::*;
//!
//! let http = Factory::new();
//! http.fake();
//! let response: Response = http.request().get("https://api.test/")?;
//! assert!(response.ok());
//! # Ok::<(), Error>(())
//! ```

pub use crate::{
    Async, Auth, Blocking, BodyFormat, ClientConfig, Delay, Error, Event, Factory, Method, Part,
    PendingRequest, Pool, PoolKey, Redirects, Request, RequestException, RequestOptions,
    Response, ResponseSequence, Result, RetryPolicy, ThrowPolicy, Tries, fake,
};
pub use serde::{Deserialize, Serialize};
