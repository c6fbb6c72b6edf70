//! The entry point: creates request builders and owns their shared collaborators.
//!
//! A [`Factory`] owns the transport, the notifier, the recorder, the sleeper, the
//! exception policy and the runtime used by blocking dispatch. It also holds the
//! faking state: stubs registered here are handed to every builder it creates.
//!
//! # Example
//!
//! ```
//! use volley::{Factory, fake};
//!
//! let http = Factory::new();
//! http.fake_url("api.test/users/*", fake::json(&serde_json::json!({"id": 7}), 200));
//!
//! let response = http.request().get("https://api.test/users/7")?;
//! assert_eq!(response.json_get("id"), Some(&serde_json::json!(7)));
//!
//! http.assert_sent(|request, _| request.url().path() == "/users/7");
//! # Ok::<(), volley::Error>(())
//! ```

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tower::util::BoxCloneService;
use tower_service::Service;
use volley_core::{ExceptionPolicy, RequestOptions};

use crate::dispatch::{BlockingRuntime, Environment};
use crate::events::Notifier;
use crate::fake::{self, Stub, StubMatcher};
use crate::pending::PendingRequest;
use crate::pipeline::{self, Stage};
use crate::pool::Pool;
use crate::recorder::RecordedExchange;
use crate::transport::SyncService;
use crate::{
    BoxedService, ClientConfig, Error, HyperTransport, MemoryRecorder, Recorder, Request,
    Response, ResponseSequence, Sleeper, TokioSleeper,
};

#[derive(Default)]
struct FactoryState {
    stubs: Vec<StubMatcher>,
    prevent_stray_requests: bool,
    recording: bool,
    options: RequestOptions,
    middleware: Vec<Stage>,
}

struct FactoryInner {
    env: Environment,
    history: MemoryRecorder,
    recorder: Option<Arc<dyn Recorder>>,
    state: Mutex<FactoryState>,
}

/// Creates [`PendingRequest`]s and records, fakes and asserts on their traffic.
///
/// Clones share the same state.
#[derive(Clone)]
pub struct Factory {
    inner: Arc<FactoryInner>,
}

impl fmt::Debug for Factory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state();
        f.debug_struct("Factory")
            .field("stubs", &state.stubs.len())
            .field("prevent_stray_requests", &state.prevent_stray_requests)
            .field("recording", &state.recording)
            .field("recorded", &self.inner.history.len())
            .finish_non_exhaustive()
    }
}

impl Default for Factory {
    fn default() -> Self {
        Self::new()
    }
}

impl Factory {
    /// A factory sending through [`HyperTransport`] with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Configure a factory.
    #[must_use]
    pub fn builder() -> FactoryBuilder {
        FactoryBuilder::default()
    }

    /// A new blocking request builder, preloaded with global options, global
    /// middleware, the current fakes and the stray-request setting.
    pub fn request(&self) -> PendingRequest {
        let state = self.state();
        let mut recorders: Vec<Arc<dyn Recorder>> = Vec::new();
        if state.recording {
            recorders.push(Arc::new(self.inner.history.clone()));
        }
        if let Some(recorder) = &self.inner.recorder {
            recorders.push(Arc::clone(recorder));
        }

        let request = PendingRequest::new(
            self.inner.env.clone(),
            recorders,
            state.stubs.clone(),
            state.prevent_stray_requests,
        )
        .with_options(state.options.clone());
        state
            .middleware
            .iter()
            .cloned()
            .fold(request, PendingRequest::with_middleware)
    }

    /// A pool of concurrent asynchronous requests.
    #[must_use]
    pub fn pool(&self) -> Pool {
        Pool::new(self.clone())
    }

    // ------------------------------------------------------------------------
    // Global configuration
    // ------------------------------------------------------------------------

    /// Merge options into every builder created from now on.
    pub fn global_options(&self, options: RequestOptions) -> &Self {
        self.state().options.merge_from(options);
        self
    }

    /// Add a stage to every builder created from now on.
    pub fn global_middleware(&self, stage: Stage) -> &Self {
        self.state().middleware.push(stage);
        self
    }

    /// Rewrite the requests of every builder created from now on.
    pub fn global_request_middleware(
        &self,
        f: impl Fn(Request) -> Request + Send + Sync + 'static,
    ) -> &Self {
        self.global_middleware(pipeline::map_request(f))
    }

    /// Rewrite the responses of every builder created from now on.
    pub fn global_response_middleware(
        &self,
        f: impl Fn(Response) -> Response + Send + Sync + 'static,
    ) -> &Self {
        self.global_middleware(pipeline::map_response(f))
    }

    /// Exception message policy shared with every builder.
    #[must_use]
    pub fn exception_policy(&self) -> &ExceptionPolicy {
        &self.inner.env.exceptions
    }

    /// Restore the default truncation of exception messages.
    pub fn truncate_exceptions(&self) -> &Self {
        self.inner.env.exceptions.truncate();
        self
    }

    /// Truncate exception messages to `length` characters of body.
    ///
    /// A `length` of zero disables truncation, like [`Factory::dont_truncate_exceptions`].
    pub fn truncate_exceptions_at(&self, length: usize) -> &Self {
        self.inner.env.exceptions.truncate_at(length);
        self
    }

    /// Embed full response bodies in exception messages.
    pub fn dont_truncate_exceptions(&self) -> &Self {
        self.inner.env.exceptions.dont_truncate();
        self
    }

    // ------------------------------------------------------------------------
    // Faking
    // ------------------------------------------------------------------------

    /// Answer every request with an empty 200 response.
    pub fn fake(&self) -> &Self {
        self.stub(fake::any(fake::status(200)))
    }

    /// Answer requests whose URL matches `pattern` (`*` is a wildcard).
    pub fn fake_url(&self, pattern: impl Into<String>, stub: impl Into<Stub>) -> &Self {
        self.stub(fake::url_matcher(pattern, stub))
    }

    /// Answer requests for which `callback` returns a stub.
    pub fn fake_with(
        &self,
        callback: impl Fn(&Request) -> Option<Stub> + Send + Sync + 'static,
    ) -> &Self {
        self.stub(fake::matcher(callback))
    }

    /// Register a stub matcher. Faking turns recording on.
    pub fn stub(&self, matcher: StubMatcher) -> &Self {
        let mut state = self.state();
        state.stubs.push(matcher);
        state.recording = true;
        self
    }

    /// A new, empty response sequence.
    #[must_use]
    pub fn sequence() -> ResponseSequence {
        ResponseSequence::new()
    }

    /// Answer requests matching `pattern` from a new sequence and return it.
    ///
    /// The returned handle shares its queue with the registered fake, so entries can
    /// be pushed after registration.
    pub fn fake_sequence(&self, pattern: impl Into<String>) -> ResponseSequence {
        let sequence = ResponseSequence::new();
        self.fake_url(pattern, sequence.clone());
        sequence
    }

    /// Fail requests that no fake matches with [`Error::StrayRequest`].
    pub fn prevent_stray_requests(&self) -> &Self {
        self.state().prevent_stray_requests = true;
        self
    }

    /// Send requests that no fake matches through the transport.
    pub fn allow_stray_requests(&self) -> &Self {
        self.state().prevent_stray_requests = false;
        self
    }

    /// Record requests sent by builders created from now on.
    pub fn record(&self) -> &Self {
        self.state().recording = true;
        self
    }

    // ------------------------------------------------------------------------
    // Assertions
    // ------------------------------------------------------------------------

    /// Recorded exchanges accepted by `predicate`, in dispatch order.
    #[must_use]
    pub fn recorded(
        &self,
        predicate: impl Fn(&Request, Option<&Response>) -> bool,
    ) -> Vec<RecordedExchange> {
        self.inner
            .history
            .recorded()
            .into_iter()
            .filter(|(request, response)| predicate(request, response.as_ref()))
            .collect()
    }

    /// Assert that a recorded exchange matches `predicate`.
    ///
    /// # Panics
    ///
    /// Panics if no recorded exchange matches.
    pub fn assert_sent(&self, predicate: impl Fn(&Request, Option<&Response>) -> bool) {
        assert!(
            !self.recorded(predicate).is_empty(),
            "an expected request was not recorded"
        );
    }

    /// Assert that no recorded exchange matches `predicate`.
    ///
    /// # Panics
    ///
    /// Panics if a recorded exchange matches.
    pub fn assert_not_sent(&self, predicate: impl Fn(&Request, Option<&Response>) -> bool) {
        assert!(
            self.recorded(predicate).is_empty(),
            "an unexpected request was recorded"
        );
    }

    /// Assert how many exchanges were recorded.
    ///
    /// # Panics
    ///
    /// Panics if the count differs.
    pub fn assert_sent_count(&self, count: usize) {
        let recorded = self.inner.history.len();
        assert_eq!(
            recorded, count,
            "expected {count} requests to be sent, {recorded} were"
        );
    }

    /// Assert that nothing was recorded.
    ///
    /// # Panics
    ///
    /// Panics if any exchange was recorded.
    pub fn assert_nothing_sent(&self) {
        assert!(
            self.inner.history.is_empty(),
            "requests were sent unexpectedly"
        );
    }

    /// Assert that exactly these requests were recorded, in this order.
    ///
    /// # Panics
    ///
    /// Panics if the count differs or a request does not match its predicate.
    pub fn assert_sent_in_order(&self, predicates: &[&dyn Fn(&Request) -> bool]) {
        let recorded = self.inner.history.recorded();
        assert_eq!(
            recorded.len(),
            predicates.len(),
            "expected {} requests to be sent, {} were",
            predicates.len(),
            recorded.len()
        );
        for (index, ((request, _), predicate)) in recorded.iter().zip(predicates).enumerate() {
            assert!(
                predicate(request),
                "request #{index} ({} {}) was not sent in the expected order",
                request.method(),
                request.url()
            );
        }
    }

    fn state(&self) -> MutexGuard<'_, FactoryState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Builder for [`Factory`].
#[must_use]
#[derive(Default)]
pub struct FactoryBuilder {
    config: ClientConfig,
    transport: Option<BoxedService>,
    notifier: Option<Arc<dyn Notifier>>,
    recorder: Option<Arc<dyn Recorder>>,
    sleeper: Option<Arc<dyn Sleeper>>,
    exceptions: ExceptionPolicy,
}

impl fmt::Debug for FactoryBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FactoryBuilder")
            .field("config", &self.config)
            .field("transport", &self.transport.is_some())
            .field("notifier", &self.notifier.is_some())
            .field("recorder", &self.recorder.is_some())
            .field("sleeper", &self.sleeper.is_some())
            .finish_non_exhaustive()
    }
}

impl FactoryBuilder {
    /// Configuration of the bundled transport. Ignored with a custom transport.
    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    /// Send through a custom transport.
    pub fn transport<S>(mut self, transport: S) -> Self
    where
        S: Service<Request, Response = Response, Error = Error> + Clone + Send + 'static,
        S::Future: Send + 'static,
    {
        self.transport = Some(BoxCloneService::new(transport));
        self
    }

    /// Publish lifecycle events to `notifier`.
    pub fn notifier(mut self, notifier: impl Notifier + 'static) -> Self {
        self.notifier = Some(Arc::new(notifier));
        self
    }

    /// Also record every exchange to `recorder`.
    pub fn recorder(mut self, recorder: impl Recorder + 'static) -> Self {
        self.recorder = Some(Arc::new(recorder));
        self
    }

    /// Wait between retry attempts with `sleeper`.
    pub fn sleeper(mut self, sleeper: impl Sleeper + 'static) -> Self {
        self.sleeper = Some(Arc::new(sleeper));
        self
    }

    /// Share an existing exception policy.
    pub fn exception_policy(mut self, policy: ExceptionPolicy) -> Self {
        self.exceptions = policy;
        self
    }

    /// Build the factory.
    #[must_use]
    pub fn build(self) -> Factory {
        let transport = self
            .transport
            .unwrap_or_else(|| BoxCloneService::new(HyperTransport::with_config(self.config)));

        Factory {
            inner: Arc::new(FactoryInner {
                env: Environment {
                    transport: SyncService::new(transport),
                    notifier: self.notifier,
                    sleeper: self.sleeper.unwrap_or_else(|| Arc::new(TokioSleeper)),
                    exceptions: self.exceptions,
                    runtime: Arc::new(BlockingRuntime::default()),
                },
                history: MemoryRecorder::new(),
                recorder: self.recorder,
                state: Mutex::new(FactoryState::default()),
            }),
        }
    }
}
