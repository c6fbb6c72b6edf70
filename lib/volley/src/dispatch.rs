//! Drives the attempts of one dispatch.
//!
//! A [`Dispatch`] is a value snapshot of a builder at `send` time. The blocking and the
//! asynchronous driver share the attempt and the retry decision; they only differ in
//! how they wait for an attempt and sleep between attempts.

use std::sync::{Arc, Mutex, PoisonError};
use std::thread;

use tokio::runtime::{Handle, Runtime};
use tower::ServiceExt;
use tracing::Instrument;
use volley_core::{ExceptionPolicy, RequestOptions, parse_set_cookies};

use crate::events::{Event, Notifier};
use crate::fake::StubMatcher;
use crate::pipeline::{self, BeforeSendHook, BeforeSendLayer, RecorderLayer, Stage, StubLayer};
use crate::retry::{self, RetryPolicy, Step, ThrowPolicy};
use crate::transport::SyncService;
use crate::{BoxedService, Error, Method, Recorder, Request, Response, Result, Sleeper};

/// Collaborators shared by every builder of a factory.
#[derive(Clone)]
pub(crate) struct Environment {
    pub(crate) transport: SyncService,
    pub(crate) notifier: Option<Arc<dyn Notifier>>,
    pub(crate) sleeper: Arc<dyn Sleeper>,
    pub(crate) exceptions: ExceptionPolicy,
    pub(crate) runtime: Arc<BlockingRuntime>,
}

impl Environment {
    fn publish(&self, event: &Event) {
        if let Some(notifier) = &self.notifier {
            notifier.publish(event);
        }
    }
}

/// Runtime driving blocking dispatches, started on first use.
#[derive(Debug, Default)]
pub(crate) struct BlockingRuntime {
    runtime: Mutex<Option<Arc<Runtime>>>,
}

impl BlockingRuntime {
    fn get(&self) -> Result<Arc<Runtime>> {
        let mut slot = self.runtime.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(runtime) = slot.as_ref() {
            return Ok(Arc::clone(runtime));
        }
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("volley-blocking")
            .enable_all()
            .build()
            .map(Arc::new)
            .map_err(|e| Error::Runtime(e.to_string()))?;
        *slot = Some(Arc::clone(&runtime));
        Ok(runtime)
    }
}

impl Drop for BlockingRuntime {
    fn drop(&mut self) {
        let slot = self
            .runtime
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(runtime) = slot
            && let Ok(runtime) = Arc::try_unwrap(runtime)
        {
            runtime.shutdown_background();
        }
    }
}

/// Everything one `send` needs, detached from the builder.
pub struct Dispatch {
    pub(crate) method: Method,
    pub(crate) url: String,
    pub(crate) options: RequestOptions,
    pub(crate) middleware: Vec<Stage>,
    pub(crate) before_sending: Vec<BeforeSendHook>,
    pub(crate) recorders: Vec<Arc<dyn Recorder>>,
    pub(crate) stubs: Vec<StubMatcher>,
    pub(crate) prevent_stray_requests: bool,
    pub(crate) retry: RetryPolicy,
    pub(crate) throw: ThrowPolicy,
    pub(crate) last_request: Arc<Mutex<Option<Request>>>,
    pub(crate) env: Environment,
}

type SentSlot = Arc<Mutex<Option<Request>>>;

impl Dispatch {
    /// Run every attempt on the blocking runtime.
    ///
    /// Inside an asynchronous context each attempt is driven from a helper thread, so
    /// the calling thread blocks without re-entering its own runtime.
    pub(crate) fn run_blocking(mut self) -> Result<Response> {
        let runtime = self.env.runtime.get()?;
        let span = tracing::debug_span!("http_request", method = %self.method, url = %self.url);
        let _entered = span.enter();

        let sent = SentSlot::default();
        let service = self.compose(&sent);
        let mut attempt = 1;
        loop {
            let outcome = block_on(&runtime, self.attempt(attempt, service.clone(), &sent))?;
            match self.decide(attempt, outcome) {
                Step::Done(result) => return result,
                Step::Retry(delay) => {
                    tracing::warn!(attempt, ?delay, "retrying failed request");
                    self.env.sleeper.sleep(delay);
                    attempt += 1;
                }
            }
        }
    }

    /// Run every attempt without blocking the calling thread.
    pub(crate) async fn run_async(mut self) -> Result<Response> {
        let span = tracing::debug_span!("http_request", method = %self.method, url = %self.url);
        async move {
            let sent = SentSlot::default();
            let service = self.compose(&sent);
            let mut attempt = 1;
            loop {
                let outcome = self.attempt(attempt, service.clone(), &sent).await;
                match self.decide(attempt, outcome) {
                    Step::Done(result) => return result,
                    Step::Retry(delay) => {
                        tracing::warn!(attempt, ?delay, "retrying failed request");
                        self.env.sleeper.sleep_async(delay).await;
                        attempt += 1;
                    }
                }
            }
        }
        .instrument(span)
        .await
    }

    fn compose(&self, sent: &SentSlot) -> BoxedService {
        let capture: BeforeSendHook = {
            let sent = Arc::clone(sent);
            let last_request = Arc::clone(&self.last_request);
            let env = self.env.clone();
            Arc::new(move |request: &Request| {
                *sent.lock().unwrap_or_else(PoisonError::into_inner) = Some(request.clone());
                *last_request.lock().unwrap_or_else(PoisonError::into_inner) =
                    Some(request.clone());
                env.publish(&Event::RequestSending {
                    request: request.clone(),
                });
                None
            })
        };
        let mut hooks = vec![capture];
        hooks.extend(self.before_sending.iter().cloned());

        let mut stages = self.middleware.clone();
        stages.push(pipeline::layer(BeforeSendLayer::new(hooks)));
        stages.push(pipeline::layer(RecorderLayer::new(self.recorders.clone())));
        stages.push(pipeline::layer(StubLayer::new(
            self.stubs.clone(),
            self.prevent_stray_requests,
        )));
        pipeline::compose(&stages, self.env.transport.service())
    }

    async fn attempt(
        &self,
        attempt: u32,
        service: BoxedService,
        sent: &SentSlot,
    ) -> Result<Response> {
        let request = Request::build(self.method, &self.url, self.options.clone())?;
        tracing::debug!(attempt, "sending request");

        let outcome = service.oneshot(request.clone()).await;
        let sent = sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        match outcome {
            Ok(mut response) => {
                response.attach_cookies(parse_set_cookies(response.headers()));
                tracing::debug!(attempt, status = response.status(), "received response");
                if let Some(request) = sent {
                    self.env.publish(&Event::ResponseReceived {
                        request,
                        response: response.clone(),
                    });
                }
                Ok(response)
            }
            Err(Error::Connection(failure)) => {
                tracing::warn!(attempt, error = %failure, "connection failed");
                self.env.publish(&Event::ConnectionFailed {
                    request: sent.unwrap_or(request),
                    failure: failure.clone(),
                });
                Err(Error::Connection(failure))
            }
            Err(err) => Err(err),
        }
    }

    fn decide(&mut self, attempt: u32, outcome: Result<Response>) -> Step {
        retry::decide(
            attempt,
            outcome,
            &self.retry,
            &self.throw,
            &self.env.exceptions,
            &mut self.options,
        )
    }
}

fn block_on<F>(runtime: &Runtime, future: F) -> Result<F::Output>
where
    F: Future + Send,
    F::Output: Send,
{
    if Handle::try_current().is_err() {
        return Ok(runtime.block_on(future));
    }

    tracing::debug!("blocking dispatch inside an async runtime, driving it from a helper thread");
    thread::scope(|scope| -> Result<F::Output> {
        let worker = thread::Builder::new()
            .name("volley-blocking-call".into())
            .spawn_scoped(scope, move || runtime.block_on(future))
            .map_err(|e| Error::Runtime(e.to_string()))?;
        match worker.join() {
            Ok(output) => Ok(output),
            Err(payload) => std::panic::resume_unwind(payload),
        }
    })
}
