//! The request builder.
//!
//! A [`PendingRequest`] accumulates configuration and sends requests with the verb
//! methods. Configuration methods consume and return the builder; verbs borrow it
//! mutably, so one builder can send several requests in sequence.
//!
//! The dispatch mode is part of the type: `PendingRequest<Blocking>` verbs return
//! `Result<Response>`, `PendingRequest<Async>` verbs return a [`ResponseFuture`].
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use volley::{Factory, RetryPolicy, Tries};
//!
//! let http = Factory::new();
//! let response = http
//!     .request()
//!     .base_url("https://api.example.com")
//!     .with_token("secret")
//!     .retry(RetryPolicy::new(Tries::Backoff(vec![Duration::from_millis(100)])))
//!     .get("/users/1")?;
//!
//! assert!(response.successful());
//! # Ok::<(), volley::Error>(())
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use serde::Serialize;
use serde_json::{Map, Value};
use volley_core::{
    Auth, BodyFormat, ContentType, Part, Redirects, RequestException, RequestOptions, Sink,
    StatsCallback, expand, join_url, to_json, to_query_pairs, value_to_field,
};

use crate::dispatch::{Dispatch, Environment};
use crate::fake::StubMatcher;
use crate::pipeline::{self, BeforeSendHook, Stage};
use crate::retry::{RetryPolicy, ThrowPolicy};
use crate::{Error, Method, Recorder, Request, Response, ResponseFuture, Result};

mod sealed {
    pub trait Sealed {}
    impl Sealed for super::Blocking {}
    impl Sealed for super::Async {}
}

/// How a [`PendingRequest`] dispatches.
pub trait Mode: sealed::Sealed + Send + Sync + 'static {
    /// What verb methods return.
    type Output;

    /// Whether verbs return before the request completes.
    const ASYNC: bool;

    #[doc(hidden)]
    fn dispatch(dispatch: Dispatch) -> Self::Output;

    #[doc(hidden)]
    fn fail(error: Error) -> Self::Output;
}

/// Verbs block until the request completes.
///
/// Blocking dispatch drives the request on a runtime owned by the factory. Called from
/// inside an asynchronous context it still works but blocks a runtime thread; prefer
/// [`PendingRequest::into_async`] there, or move the call to `tokio::task::spawn_blocking`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Blocking;

/// Verbs return a [`ResponseFuture`].
#[derive(Debug, Clone, Copy, Default)]
pub struct Async;

impl Mode for Blocking {
    type Output = Result<Response>;
    const ASYNC: bool = false;

    fn dispatch(dispatch: Dispatch) -> Self::Output {
        dispatch.run_blocking()
    }

    fn fail(error: Error) -> Self::Output {
        Err(error)
    }
}

impl Mode for Async {
    type Output = ResponseFuture;
    const ASYNC: bool = true;

    fn dispatch(dispatch: Dispatch) -> Self::Output {
        Box::pin(dispatch.run_async())
    }

    fn fail(error: Error) -> Self::Output {
        Box::pin(std::future::ready(Err(error)))
    }
}

/// Request builder created by [`crate::Factory::request`].
#[must_use]
pub struct PendingRequest<M = Blocking> {
    base_url: String,
    url_parameters: BTreeMap<String, String>,
    body_format: BodyFormat,
    pending_body: Option<Bytes>,
    pending_files: Vec<Part>,
    options: RequestOptions,
    retry: RetryPolicy,
    throw: ThrowPolicy,
    middleware: Vec<Stage>,
    before_sending: Vec<BeforeSendHook>,
    stubs: Vec<StubMatcher>,
    prevent_stray_requests: bool,
    recorders: Vec<Arc<dyn Recorder>>,
    last_request: Arc<Mutex<Option<Request>>>,
    env: Environment,
    mode: PhantomData<M>,
}

impl<M> fmt::Debug for PendingRequest<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingRequest")
            .field("base_url", &self.base_url)
            .field("body_format", &self.body_format)
            .field("options", &self.options)
            .field("retry", &self.retry)
            .field("throw", &self.throw)
            .field("middleware", &self.middleware.len())
            .field("stubs", &self.stubs.len())
            .field("prevent_stray_requests", &self.prevent_stray_requests)
            .finish_non_exhaustive()
    }
}

impl PendingRequest<Blocking> {
    pub(crate) fn new(
        env: Environment,
        recorders: Vec<Arc<dyn Recorder>>,
        stubs: Vec<StubMatcher>,
        prevent_stray_requests: bool,
    ) -> Self {
        Self {
            base_url: String::new(),
            url_parameters: BTreeMap::new(),
            body_format: BodyFormat::Json,
            pending_body: None,
            pending_files: Vec::new(),
            options: RequestOptions::new(),
            retry: RetryPolicy::default(),
            throw: ThrowPolicy::default(),
            middleware: Vec::new(),
            before_sending: Vec::new(),
            stubs,
            prevent_stray_requests,
            recorders,
            last_request: Arc::default(),
            env,
            mode: PhantomData,
        }
        .as_json()
    }

    /// Switch to asynchronous dispatch.
    pub fn into_async(self) -> PendingRequest<Async> {
        PendingRequest {
            base_url: self.base_url,
            url_parameters: self.url_parameters,
            body_format: self.body_format,
            pending_body: self.pending_body,
            pending_files: self.pending_files,
            options: self.options,
            retry: self.retry,
            throw: self.throw,
            middleware: self.middleware,
            before_sending: self.before_sending,
            stubs: self.stubs,
            prevent_stray_requests: self.prevent_stray_requests,
            recorders: self.recorders,
            last_request: self.last_request,
            env: self.env,
            mode: PhantomData,
        }
    }
}

// ============================================================================
// Configuration
// ============================================================================

impl<M: Mode> PendingRequest<M> {
    /// Returns `true` if verbs return a future.
    #[must_use]
    pub const fn is_async(&self) -> bool {
        M::ASYNC
    }

    /// Current option set.
    #[must_use]
    pub const fn options(&self) -> &RequestOptions {
        &self.options
    }

    /// Active body format.
    #[must_use]
    pub const fn body_format(&self) -> BodyFormat {
        self.body_format
    }

    /// The request most recently handed to the before-send stage.
    #[must_use]
    pub fn last_request(&self) -> Option<Request> {
        self.last_request
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Prefix relative URLs with `base_url`.
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Merge options into the current set.
    pub fn with_options(mut self, options: RequestOptions) -> Self {
        self.options.merge_from(options);
        self
    }

    /// Add headers.
    pub fn with_headers<K, V>(mut self, headers: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        for (name, value) in headers {
            self.set_header(name.into(), value.into());
        }
        self
    }

    /// Add one header.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_header(name.into(), value.into());
        self
    }

    /// Alias of [`PendingRequest::with_headers`].
    ///
    /// Headers hold one value per name, so adding a header always replaces an earlier
    /// value stored under the same name in any case.
    pub fn replace_headers<K, V>(self, headers: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.with_headers(headers)
    }

    /// Set the `Accept` header.
    pub fn accept(self, content_type: impl Into<String>) -> Self {
        self.with_header("Accept", content_type)
    }

    /// Accept JSON responses.
    pub fn accept_json(self) -> Self {
        self.accept(ContentType::Json.as_str())
    }

    /// Set the `Content-Type` header.
    pub fn content_type(self, content_type: impl Into<String>) -> Self {
        self.with_header("Content-Type", content_type)
    }

    /// Send a bearer token.
    pub fn with_token(self, token: impl AsRef<str>) -> Self {
        self.with_header("Authorization", format!("Bearer {}", token.as_ref()))
    }

    /// Use basic authentication.
    pub fn with_basic_auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.options.auth = Some(Auth::basic(username, password));
        self
    }

    /// Use digest authentication.
    pub fn with_digest_auth(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.options.auth = Some(Auth::digest(username, password));
        self
    }

    /// Set the `User-Agent` header.
    pub fn with_user_agent(self, user_agent: impl Into<String>) -> Self {
        self.with_header("User-Agent", user_agent)
    }

    /// Send cookies.
    pub fn with_cookies<K, V>(mut self, cookies: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.options
            .cookies
            .extend(cookies.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Add query parameters.
    pub fn with_query_parameters<K, V>(mut self, query: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.options
            .query
            .extend(query.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Values for `{name}` and `{+name}` placeholders in the URL.
    pub fn with_url_parameters<K, V>(mut self, parameters: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.url_parameters
            .extend(parameters.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Follow at most `max` redirects.
    pub fn max_redirects(mut self, max: usize) -> Self {
        self.options.allow_redirects = Some(Redirects::Follow { max });
        self
    }

    /// Return redirect responses as-is.
    pub fn without_redirecting(mut self) -> Self {
        self.options.allow_redirects = Some(Redirects::Disabled);
        self
    }

    /// Skip TLS certificate verification.
    pub fn without_verifying(mut self) -> Self {
        self.options.verify = Some(false);
        self
    }

    /// Also write response bodies to `sink`.
    pub fn sink(mut self, sink: impl Into<Sink>) -> Self {
        self.options.sink = Some(sink.into());
        self
    }

    /// Total timeout of each attempt.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.options.timeout = Some(timeout);
        self
    }

    /// Connection timeout of each attempt.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.options.connect_timeout = Some(timeout);
        self
    }

    /// Receive transfer statistics once per attempt.
    pub fn on_stats(
        mut self,
        callback: impl Fn(&volley_core::TransferStats) + Send + Sync + 'static,
    ) -> Self {
        self.options.on_stats = Some(StatsCallback::new(callback));
        self
    }

    /// Stage a raw body, sent with `content_type`.
    pub fn with_body(mut self, body: impl Into<Bytes>, content_type: impl Into<String>) -> Self {
        self.body_format = BodyFormat::Body;
        self.pending_body = Some(body.into());
        self.content_type(content_type)
    }

    /// Stage a multipart part and switch to multipart.
    pub fn attach(mut self, part: Part) -> Self {
        self.pending_files.push(part);
        self.as_multipart()
    }

    /// Select the body format without touching headers.
    pub fn with_body_format(mut self, format: BodyFormat) -> Self {
        self.body_format = format;
        self
    }

    /// Send data as JSON.
    pub fn as_json(mut self) -> Self {
        self.body_format = BodyFormat::Json;
        self.content_type(ContentType::Json.as_str())
    }

    /// Send data form URL-encoded.
    pub fn as_form(mut self) -> Self {
        self.body_format = BodyFormat::Form;
        self.content_type(ContentType::FormUrlEncoded.as_str())
    }

    /// Send data as multipart form data.
    pub fn as_multipart(mut self) -> Self {
        self.body_format = BodyFormat::Multipart;
        self
    }

    /// Retry configuration.
    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    /// Return [`Error::Http`] for failed responses.
    pub fn throw_on_failure(mut self) -> Self {
        self.throw = self.throw.raising();
        self
    }

    /// Return [`Error::Http`] for failed responses accepted by `guard`.
    pub fn throw_if(mut self, guard: impl Fn(&Response) -> bool + Send + Sync + 'static) -> Self {
        self.throw = self.throw.with_guard(Arc::new(guard));
        self
    }

    /// Return [`Error::Http`] for failed responses rejected by `guard`.
    pub fn throw_unless(self, guard: impl Fn(&Response) -> bool + Send + Sync + 'static) -> Self {
        self.throw_if(move |response| !guard(response))
    }

    /// Return [`Error::Http`] for failed responses, running `callback` first.
    pub fn throw_with(
        mut self,
        callback: impl Fn(&Response, &RequestException) + Send + Sync + 'static,
    ) -> Self {
        self.throw = self.throw.with_callback(Arc::new(callback));
        self
    }

    /// Observe or replace the request right before it is sent.
    pub fn before_sending(
        mut self,
        hook: impl Fn(&Request) -> Option<Request> + Send + Sync + 'static,
    ) -> Self {
        self.before_sending.push(Arc::new(hook));
        self
    }

    /// Add a pipeline stage. The first stage added is the outermost.
    pub fn with_middleware(mut self, stage: Stage) -> Self {
        self.middleware.push(stage);
        self
    }

    /// Log each attempt with [`crate::middleware::LoggingLayer`].
    #[cfg(feature = "middleware-logging")]
    pub fn with_logging(self) -> Self {
        let layer = crate::middleware::LoggingLayer::new()
            .with_exception_policy(self.env.exceptions.clone());
        self.with_middleware(pipeline::layer(layer))
    }

    /// Rewrite requests before they move inward.
    pub fn with_request_middleware(
        self,
        f: impl Fn(Request) -> Request + Send + Sync + 'static,
    ) -> Self {
        self.with_middleware(pipeline::map_request(f))
    }

    /// Rewrite responses on their way out.
    pub fn with_response_middleware(
        self,
        f: impl Fn(Response) -> Response + Send + Sync + 'static,
    ) -> Self {
        self.with_middleware(pipeline::map_response(f))
    }

    /// Add a stub matcher, consulted after the factory's fakes.
    pub fn stub(mut self, matcher: StubMatcher) -> Self {
        self.stubs.push(matcher);
        self
    }

    /// Fail unmatched requests instead of sending them.
    pub fn prevent_stray_requests(mut self, prevent: bool) -> Self {
        self.prevent_stray_requests = prevent;
        self
    }

    fn set_header(&mut self, name: String, value: String) {
        self.options.set_header(&name, value);
    }
}

// ============================================================================
// Verbs
// ============================================================================

impl<M: Mode> PendingRequest<M> {
    /// Send a GET request.
    pub fn get(&mut self, url: &str) -> M::Output {
        self.send(Method::Get, url, RequestOptions::new())
    }

    /// Send a GET request with `query` in the query string.
    pub fn get_with<T: Serialize + ?Sized>(&mut self, url: &str, query: &T) -> M::Output {
        self.send_data(Method::Get, url, query)
    }

    /// Send a HEAD request.
    pub fn head(&mut self, url: &str) -> M::Output {
        self.send(Method::Head, url, RequestOptions::new())
    }

    /// Send a HEAD request with `query` in the query string.
    pub fn head_with<T: Serialize + ?Sized>(&mut self, url: &str, query: &T) -> M::Output {
        self.send_data(Method::Head, url, query)
    }

    /// Send a POST request.
    pub fn post(&mut self, url: &str) -> M::Output {
        self.send(Method::Post, url, RequestOptions::new())
    }

    /// Send a POST request with `data` encoded in the active body format.
    pub fn post_with<T: Serialize + ?Sized>(&mut self, url: &str, data: &T) -> M::Output {
        self.send_data(Method::Post, url, data)
    }

    /// Send a PUT request.
    pub fn put(&mut self, url: &str) -> M::Output {
        self.send(Method::Put, url, RequestOptions::new())
    }

    /// Send a PUT request with `data` encoded in the active body format.
    pub fn put_with<T: Serialize + ?Sized>(&mut self, url: &str, data: &T) -> M::Output {
        self.send_data(Method::Put, url, data)
    }

    /// Send a PATCH request.
    pub fn patch(&mut self, url: &str) -> M::Output {
        self.send(Method::Patch, url, RequestOptions::new())
    }

    /// Send a PATCH request with `data` encoded in the active body format.
    pub fn patch_with<T: Serialize + ?Sized>(&mut self, url: &str, data: &T) -> M::Output {
        self.send_data(Method::Patch, url, data)
    }

    /// Send a DELETE request.
    pub fn delete(&mut self, url: &str) -> M::Output {
        self.send(Method::Delete, url, RequestOptions::new())
    }

    /// Send a DELETE request with `data` encoded in the active body format.
    pub fn delete_with<T: Serialize + ?Sized>(&mut self, url: &str, data: &T) -> M::Output {
        self.send_data(Method::Delete, url, data)
    }

    /// Send a request with `options` merged over the builder's options.
    ///
    /// The staged body and files are consumed by this call whatever the outcome.
    pub fn send(&mut self, method: Method, url: &str, options: RequestOptions) -> M::Output {
        let url = expand(&join_url(&self.base_url, url), &self.url_parameters);
        let mut options = self.options.clone().merge(options);

        let body = self.pending_body.take();
        let files = std::mem::take(&mut self.pending_files);
        match self.body_format {
            BodyFormat::Body => {
                if body.is_some() {
                    options.body = body;
                }
            }
            BodyFormat::Multipart => options.multipart.extend(files),
            BodyFormat::Json | BodyFormat::Form => {}
        }

        M::dispatch(Dispatch {
            method,
            url,
            options,
            middleware: self.middleware.clone(),
            before_sending: self.before_sending.clone(),
            recorders: self.recorders.clone(),
            stubs: self.stubs.clone(),
            prevent_stray_requests: self.prevent_stray_requests,
            retry: self.retry.clone(),
            throw: self.throw.clone(),
            last_request: Arc::clone(&self.last_request),
            env: self.env.clone(),
        })
    }

    fn send_data<T: Serialize + ?Sized>(&mut self, method: Method, url: &str, data: &T) -> M::Output {
        match self.data_options(method, data) {
            Ok(options) => self.send(method, url, options),
            Err(err) => {
                self.pending_body = None;
                self.pending_files.clear();
                M::fail(err)
            }
        }
    }

    fn data_options<T: Serialize + ?Sized>(&self, method: Method, data: &T) -> Result<RequestOptions> {
        let mut options = RequestOptions::new();
        if method.sends_data_as_query() {
            options.query.extend(to_query_pairs(data)?);
            return Ok(options);
        }

        let value = serde_json::to_value(data)?;
        match self.body_format {
            BodyFormat::Json => options.json = Some(value),
            BodyFormat::Form => options.form_params = Some(into_object(value)?),
            BodyFormat::Multipart => {
                options.multipart = into_object(value)?
                    .iter()
                    .map(|(name, value)| Part::text(name.as_str(), value_to_field(value)))
                    .collect();
            }
            BodyFormat::Body => options.body = Some(to_json(&value)?),
        }
        Ok(options)
    }
}

fn into_object(value: Value) -> Result<Map<String, Value>> {
    match value {
        Value::Object(map) => Ok(map),
        Value::Null => Ok(Map::new()),
        other => Err(Error::invalid_request(format!(
            "request data must serialize to a map, got {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::json;

    use super::*;
    use crate::{Factory, Tries, fake};

    fn faked() -> Factory {
        let factory = Factory::new();
        factory.fake();
        factory
    }

    fn last(factory: &Factory) -> Request {
        factory
            .recorded(|_, _| true)
            .pop()
            .map(|(request, _)| request)
            .expect("a recorded request")
    }

    #[test]
    fn defaults_to_json() {
        let factory = faked();
        let request = factory.request();
        assert_eq!(request.body_format(), BodyFormat::Json);
        assert_eq!(
            request.options().header_value("content-type"),
            Some("application/json")
        );
        assert!(!request.is_async());
        assert!(request.into_async().is_async());
    }

    #[test]
    fn base_url_and_url_parameters() {
        let factory = faked();
        factory
            .request()
            .base_url("https://api.test/v1/")
            .with_url_parameters([("id", "a b"), ("path", "x/y")])
            .get("/users/{id}/{+path}")
            .expect("response");

        assert_eq!(last(&factory).url().as_str(), "https://api.test/v1/users/a%20b/x/y");
    }

    #[test]
    fn absolute_urls_ignore_base() {
        let factory = faked();
        factory
            .request()
            .base_url("https://api.test")
            .get("https://other.test/ping")
            .expect("response");
        assert_eq!(last(&factory).url().as_str(), "https://other.test/ping");
    }

    #[test]
    fn get_data_goes_to_the_query() {
        let factory = faked();
        factory
            .request()
            .with_query_parameters([("page", "1")])
            .get_with("https://api.test/search", &json!({"q": "rust"}))
            .expect("response");

        let request = last(&factory);
        assert_eq!(request.url().query(), Some("page=1&q=rust"));
        assert!(request.body().is_empty());
    }

    #[test]
    fn post_data_follows_the_body_format() {
        let factory = faked();
        let data = json!({"name": "Jane", "age": 30});

        factory.request().post_with("https://api.test/", &data).expect("json");
        let request = last(&factory);
        assert!(request.is_json());
        assert_eq!(request.data().get("age"), Some(&json!(30)));

        factory
            .request()
            .as_form()
            .post_with("https://api.test/", &data)
            .expect("form");
        let request = last(&factory);
        assert!(request.is_form());
        assert!(request.text().contains("name=Jane"));
        assert!(request.text().contains("age=30"));

        factory
            .request()
            .as_multipart()
            .post_with("https://api.test/", &data)
            .expect("multipart");
        let request = last(&factory);
        assert!(request.is_multipart());
        assert_eq!(request.data().get("name"), Some(&json!("Jane")));
    }

    #[test]
    fn form_data_must_be_a_map() {
        let factory = faked();
        let err = factory
            .request()
            .as_form()
            .post_with("https://api.test/", &[1, 2])
            .expect_err("not a map");
        assert!(matches!(err, Error::InvalidRequest(_)));
        assert_eq!(factory.recorded(|_, _| true).len(), 0);
    }

    #[test]
    fn staged_body_is_cleared_on_send() {
        let factory = faked();
        let mut request = factory.request().with_body("raw payload", "text/plain");

        request.post("https://api.test/a").expect("first");
        assert_eq!(last(&factory).text(), "raw payload");
        assert_eq!(last(&factory).header("content-type"), Some("text/plain"));

        request.post("https://api.test/b").expect("second");
        assert!(last(&factory).body().is_empty());
    }

    #[test]
    fn staged_files_are_sent_once() {
        let factory = faked();
        let mut request = factory
            .request()
            .attach(Part::file("doc", "a.txt", "hello"));
        assert_eq!(request.body_format(), BodyFormat::Multipart);

        request.post("https://api.test/upload").expect("first");
        assert!(last(&factory).text().contains("filename=\"a.txt\""));

        request.post("https://api.test/upload").expect("second");
        assert!(!last(&factory).text().contains("a.txt"));
    }

    #[test]
    fn staged_files_are_dropped_under_another_format() {
        let factory = faked();
        factory
            .request()
            .attach(Part::file("doc", "a.txt", "hello"))
            .as_json()
            .post_with("https://api.test/", &json!({"x": 1}))
            .expect("response");

        let request = last(&factory);
        assert!(request.is_json());
        assert!(request.options().multipart.is_empty());
    }

    #[test]
    fn headers_replace_case_insensitively() {
        let factory = faked();
        factory
            .request()
            .with_header("x-token", "old")
            .with_headers([("X-Token", "new")])
            .accept_json()
            .with_token("secret")
            .with_user_agent("tests")
            .get("https://api.test/")
            .expect("response");

        let request = last(&factory);
        assert_eq!(request.header("x-token"), Some("new"));
        assert_eq!(request.header("accept"), Some("application/json"));
        assert_eq!(request.header("authorization"), Some("Bearer secret"));
        assert_eq!(request.header("user-agent"), Some("tests"));
    }

    #[test]
    fn replace_headers_matches_with_headers() {
        let replaced = faked()
            .request()
            .with_header("X-Token", "old")
            .replace_headers([("x-token", "new")]);
        let added = faked()
            .request()
            .with_header("X-Token", "old")
            .with_headers([("x-token", "new")]);

        assert_eq!(replaced.options().headers, added.options().headers);
        assert_eq!(replaced.options().header_value("X-Token"), Some("new"));
    }

    #[tokio::test]
    async fn blocking_verbs_work_inside_a_runtime() {
        let factory = Factory::new();
        let _statuses = factory
            .fake_sequence("api.test/*")
            .push_status(503)
            .push_status(201);

        let response = factory
            .request()
            .retry(RetryPolicy::new(Tries::Count(2)))
            .post("https://api.test/items")
            .expect("response");

        assert_eq!(response.status(), 201);
        factory.assert_sent_count(2);
    }

    #[test]
    fn per_send_headers_win_over_builder_headers_in_any_case() {
        let factory = faked();
        let mut request = factory
            .request()
            .with_header("X-Mode", "builder")
            .replace_headers([("X-Other", "kept")]);

        for _ in 0..50 {
            request
                .send(
                    Method::Get,
                    "https://api.test/",
                    RequestOptions::new()
                        .header("x-mode", "per-call")
                        .header("content-type", "text/plain"),
                )
                .expect("response");
            let sent = last(&factory);
            assert_eq!(sent.header("x-mode"), Some("per-call"));
            assert_eq!(sent.header("x-other"), Some("kept"));
            assert_eq!(
                sent.options().header_value("Content-Type"),
                Some("text/plain")
            );
        }
        assert_eq!(request.options().header_value("x-mode"), Some("builder"));
    }

    #[test]
    fn options_merge_per_send() {
        let factory = faked();
        let mut request = factory
            .request()
            .with_options(RequestOptions::new().query("a", "1").json(json!({"keep": {"x": 1}})))
            .timeout(Duration::from_secs(3));

        request
            .send(
                Method::Post,
                "https://api.test/",
                RequestOptions::new()
                    .query("b", "2")
                    .json(json!({"keep": {"y": 2}}))
                    .timeout(Duration::from_secs(5)),
            )
            .expect("response");

        let sent = last(&factory);
        assert_eq!(sent.url().query(), Some("a=1&b=2"));
        assert_eq!(sent.data().get("keep"), Some(&json!({"x": 1, "y": 2})));
        assert_eq!(sent.options().timeout, Some(Duration::from_secs(5)));
        assert_eq!(request.options().timeout, Some(Duration::from_secs(3)));
    }

    #[test]
    fn redirect_and_auth_options() {
        let request = Factory::new()
            .request()
            .max_redirects(2)
            .with_basic_auth("u", "p")
            .without_verifying()
            .connect_timeout(Duration::from_secs(1));
        assert_eq!(
            request.options().allow_redirects,
            Some(Redirects::Follow { max: 2 })
        );
        assert_eq!(request.options().auth, Some(Auth::basic("u", "p")));
        assert_eq!(request.options().verify, Some(false));

        let request = request.without_redirecting().with_digest_auth("u", "p");
        assert_eq!(request.options().allow_redirects, Some(Redirects::Disabled));
        assert!(matches!(request.options().auth, Some(Auth::Digest { .. })));
    }

    #[test]
    fn before_sending_replaces_and_last_request_captures() {
        let factory = faked();
        let mut request = factory.request().before_sending(|request| {
            request.clone().with_header("X-Signed", "yes").ok()
        });
        assert!(request.last_request().is_none());

        request.get("https://api.test/signed").expect("response");

        assert_eq!(last(&factory).header("x-signed"), Some("yes"));
        let captured = request.last_request().expect("captured");
        assert_eq!(captured.url().as_str(), "https://api.test/signed");
    }

    #[test]
    fn builder_stubs_and_middleware() {
        let factory = Factory::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);

        let response = factory
            .request()
            .stub(fake::any(fake::status(201)))
            .with_request_middleware(move |request| {
                counter.fetch_add(1, Ordering::SeqCst);
                request
            })
            .with_response_middleware(|response| response.with_header("X-Seen", "1"))
            .post("https://api.test/")
            .expect("response");

        assert_eq!(response.status(), 201);
        assert_eq!(response.header("x-seen"), Some("1"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn throw_helpers() {
        let factory = Factory::new();
        factory.fake_url("*", fake::status(404));

        let response = factory.request().get("https://api.test/").expect("404 returned");
        assert_eq!(response.status(), 404);

        let err = factory
            .request()
            .throw_on_failure()
            .get("https://api.test/")
            .expect_err("404 raised");
        assert_eq!(err.status(), Some(404));

        let response = factory
            .request()
            .throw_if(|response| response.server_error())
            .get("https://api.test/")
            .expect("guard rejects");
        assert_eq!(response.status(), 404);

        let err = factory
            .request()
            .throw_unless(|response| response.server_error())
            .get("https://api.test/")
            .expect_err("guard accepts");
        assert!(err.is_http());

        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        let err = factory
            .request()
            .throw_with(move |_, exception| {
                assert_eq!(exception.status(), 404);
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .get("https://api.test/")
            .expect_err("callback");
        assert!(err.is_http());
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn data_serialization_errors_surface() {
        let factory = faked();
        let err = factory
            .request()
            .get_with("https://api.test/", &json!({"nested": {"a": 1}}))
            .expect_err("nested query");
        assert!(matches!(err, Error::FormSerialization(_)));
    }
}
