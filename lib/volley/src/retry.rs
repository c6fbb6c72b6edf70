//! Retry and throw policies, and the per-attempt decision shared by both dispatch modes.
//!
//! Only failed responses (4xx and 5xx) are retried. Connection failures end the
//! dispatch immediately. Other non-successful responses (1xx, 3xx) are returned as-is.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use volley_core::{ExceptionPolicy, RequestException, RequestOptions};

use crate::{Error, Response, Result};

/// Decides whether a failed attempt is retried; may adjust the options of the next
/// attempt (for example to refresh a token).
pub type RetryWhen = Arc<dyn Fn(&Error, &mut RequestOptions) -> bool + Send + Sync>;

/// Computes the delay before the next attempt from the 1-indexed attempt number.
pub type DelayFn = Arc<dyn Fn(u32, &Error) -> Duration + Send + Sync>;

/// Decides whether a failed response raises.
pub type ThrowGuard = Arc<dyn Fn(&Response) -> bool + Send + Sync>;

/// Runs before a failed response raises.
pub type ThrowCallback = Arc<dyn Fn(&Response, &RequestException) + Send + Sync>;

/// How many attempts a request gets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Tries {
    /// Total number of attempts (at least one).
    Count(u32),
    /// One delay per retry; the request gets `len + 1` attempts.
    Backoff(Vec<Duration>),
}

/// Delay between attempts for [`Tries::Count`].
#[derive(Clone)]
pub enum Delay {
    /// The same delay after every attempt.
    Fixed(Duration),
    /// A delay computed from the attempt number and its failure.
    Computed(DelayFn),
}

impl fmt::Debug for Delay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fixed(delay) => f.debug_tuple("Fixed").field(delay).finish(),
            Self::Computed(_) => f.write_str("Computed(..)"),
        }
    }
}

/// Retry configuration of a request.
#[derive(Clone)]
pub struct RetryPolicy {
    tries: Tries,
    delay: Delay,
    throw_on_exhaustion: bool,
    when: Option<RetryWhen>,
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("tries", &self.tries)
            .field("delay", &self.delay)
            .field("throw_on_exhaustion", &self.throw_on_exhaustion)
            .field("when", &self.when.is_some())
            .finish()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(Tries::Count(1))
    }
}

impl RetryPolicy {
    /// A policy with `tries`, no delay, and exhaustion raising.
    #[must_use]
    pub fn new(tries: Tries) -> Self {
        Self {
            tries,
            delay: Delay::Fixed(Duration::ZERO),
            throw_on_exhaustion: true,
            when: None,
        }
    }

    /// Set the delay used with [`Tries::Count`].
    #[must_use]
    pub fn with_delay(mut self, delay: Delay) -> Self {
        self.delay = delay;
        self
    }

    /// Set the retry predicate.
    #[must_use]
    pub fn when(
        mut self,
        when: impl Fn(&Error, &mut RequestOptions) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.when = Some(Arc::new(when));
        self
    }

    /// Whether a failed last attempt raises [`Error::Http`].
    #[must_use]
    pub fn throw_on_exhaustion(mut self, throw: bool) -> Self {
        self.throw_on_exhaustion = throw;
        self
    }

    /// Configured attempts.
    #[must_use]
    pub const fn tries(&self) -> &Tries {
        &self.tries
    }

    /// Total number of attempts.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        match &self.tries {
            Tries::Count(count) => (*count).max(1),
            Tries::Backoff(delays) => u32::try_from(delays.len())
                .unwrap_or(u32::MAX)
                .saturating_add(1),
        }
    }

    /// Delay after the 1-indexed `attempt` failed with `error`.
    #[must_use]
    pub fn delay_for(&self, attempt: u32, error: &Error) -> Duration {
        if let Tries::Backoff(delays) = &self.tries {
            let index = usize::try_from(attempt.saturating_sub(1)).unwrap_or(usize::MAX);
            if let Some(delay) = delays.get(index) {
                return *delay;
            }
        }
        match &self.delay {
            Delay::Fixed(delay) => *delay,
            Delay::Computed(compute) => compute(attempt, error),
        }
    }
}

/// When failed responses raise instead of being returned.
#[derive(Clone, Default)]
pub struct ThrowPolicy {
    on_failure: bool,
    guard: Option<ThrowGuard>,
    callback: Option<ThrowCallback>,
}

impl fmt::Debug for ThrowPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThrowPolicy")
            .field("on_failure", &self.on_failure)
            .field("guard", &self.guard.is_some())
            .field("callback", &self.callback.is_some())
            .finish()
    }
}

impl ThrowPolicy {
    /// Raise on every failed response.
    #[must_use]
    pub fn always() -> Self {
        Self::default().raising()
    }

    /// Raise on failed responses, keeping any guard and callback.
    #[must_use]
    pub fn raising(mut self) -> Self {
        self.on_failure = true;
        self
    }

    /// Raise only when `guard` accepts the failed response.
    #[must_use]
    pub fn with_guard(mut self, guard: ThrowGuard) -> Self {
        self.on_failure = true;
        self.guard = Some(guard);
        self
    }

    /// Run `callback` before raising.
    #[must_use]
    pub fn with_callback(mut self, callback: ThrowCallback) -> Self {
        self.on_failure = true;
        self.callback = Some(callback);
        self
    }

    /// Returns `true` if failed responses may raise.
    #[must_use]
    pub const fn on_failure(&self) -> bool {
        self.on_failure
    }

    fn raises(&self, response: &Response) -> bool {
        self.on_failure && self.guard.as_ref().is_none_or(|guard| guard(response))
    }
}

/// What the dispatch loop does after an attempt.
#[derive(Debug)]
pub(crate) enum Step {
    /// Wait, then run the next attempt.
    Retry(Duration),
    /// Stop with this result.
    Done(Result<Response>),
}

/// Decide the next step after the 1-indexed `attempt` produced `outcome`.
pub(crate) fn decide(
    attempt: u32,
    outcome: Result<Response>,
    retry: &RetryPolicy,
    throw: &ThrowPolicy,
    exceptions: &ExceptionPolicy,
    options: &mut RequestOptions,
) -> Step {
    let response = match outcome {
        Ok(response) => response,
        Err(Error::Http(exception)) => exception.into_response(),
        Err(err) => return Step::Done(Err(err)),
    };

    let Some(exception) = response.to_exception(exceptions) else {
        return Step::Done(Ok(response));
    };
    let error = Error::Http(exception);

    let should_retry = retry.when.as_ref().is_none_or(|when| when(&error, options));

    let raised = throw.raises(&response);
    if raised
        && let (Some(callback), Error::Http(exception)) = (&throw.callback, &error)
    {
        callback(&response, exception);
    }

    let max_attempts = retry.max_attempts();
    if attempt < max_attempts && should_retry {
        return Step::Retry(retry.delay_for(attempt, &error));
    }
    if raised || (max_attempts > 1 && retry.throw_on_exhaustion) {
        return Step::Done(Err(error));
    }
    Step::Done(Ok(response))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::fake;

    fn run(
        attempt: u32,
        status: u16,
        retry: &RetryPolicy,
        throw: &ThrowPolicy,
    ) -> Step {
        decide(
            attempt,
            Ok(fake::status(status)),
            retry,
            throw,
            &ExceptionPolicy::default(),
            &mut RequestOptions::new(),
        )
    }

    #[test]
    fn max_attempts() {
        assert_eq!(RetryPolicy::new(Tries::Count(0)).max_attempts(), 1);
        assert_eq!(RetryPolicy::new(Tries::Count(3)).max_attempts(), 3);
        let backoff = Tries::Backoff(vec![Duration::from_millis(1), Duration::from_millis(2)]);
        assert_eq!(RetryPolicy::new(backoff).max_attempts(), 3);
    }

    #[test]
    fn backoff_delays_are_indexed_by_attempt() {
        let policy = RetryPolicy::new(Tries::Backoff(vec![
            Duration::from_millis(100),
            Duration::from_millis(200),
        ]));
        let error = Error::timeout("x");
        assert_eq!(policy.delay_for(1, &error), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2, &error), Duration::from_millis(200));
    }

    #[test]
    fn computed_delay_sees_attempt() {
        let policy = RetryPolicy::new(Tries::Count(3)).with_delay(Delay::Computed(Arc::new(
            |attempt, _| Duration::from_millis(u64::from(attempt) * 10),
        )));
        assert_eq!(
            policy.delay_for(2, &Error::timeout("x")),
            Duration::from_millis(20)
        );
    }

    #[test]
    fn success_and_redirects_are_returned() {
        let retry = RetryPolicy::new(Tries::Count(3));
        for status in [200, 204, 302] {
            assert!(matches!(
                run(1, status, &retry, &ThrowPolicy::always()),
                Step::Done(Ok(ref r)) if r.status() == status
            ));
        }
    }

    #[test]
    fn failed_responses_retry_until_exhausted() {
        let retry = RetryPolicy::new(Tries::Count(3))
            .with_delay(Delay::Fixed(Duration::from_millis(5)));
        let throw = ThrowPolicy::default();

        assert!(matches!(run(1, 500, &retry, &throw), Step::Retry(d) if d == Duration::from_millis(5)));
        assert!(matches!(run(2, 500, &retry, &throw), Step::Retry(_)));
        assert!(matches!(
            run(3, 500, &retry, &throw),
            Step::Done(Err(Error::Http(ref e))) if e.status() == 500
        ));
    }

    #[test]
    fn exhaustion_can_return_the_response() {
        let retry = RetryPolicy::new(Tries::Count(2)).throw_on_exhaustion(false);
        assert!(matches!(
            run(2, 503, &retry, &ThrowPolicy::default()),
            Step::Done(Ok(ref r)) if r.status() == 503
        ));
    }

    #[test]
    fn single_attempt_returns_failed_response_unless_throwing() {
        let retry = RetryPolicy::default();
        assert!(matches!(
            run(1, 404, &retry, &ThrowPolicy::default()),
            Step::Done(Ok(ref r)) if r.status() == 404
        ));
        assert!(matches!(
            run(1, 404, &retry, &ThrowPolicy::always()),
            Step::Done(Err(Error::Http(_)))
        ));
    }

    #[test]
    fn throw_still_retries_while_attempts_remain() {
        let retry = RetryPolicy::new(Tries::Count(2));
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let throw = ThrowPolicy::always().with_callback(Arc::new(move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        assert!(matches!(run(1, 500, &retry, &throw), Step::Retry(_)));
        assert!(matches!(run(2, 500, &retry, &throw), Step::Done(Err(Error::Http(_)))));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn throw_guard_filters() {
        let throw = ThrowPolicy::default().with_guard(Arc::new(|r: &Response| r.server_error()));
        let retry = RetryPolicy::default();
        assert!(matches!(run(1, 404, &retry, &throw), Step::Done(Ok(_))));
        assert!(matches!(run(1, 500, &retry, &throw), Step::Done(Err(_))));
    }

    #[test]
    fn when_predicate_stops_and_mutates() {
        let retry = RetryPolicy::new(Tries::Count(3)).when(|error, options| {
            options.set_header("X-Retry", "1");
            error.status() == Some(503)
        });
        let mut options = RequestOptions::new();

        let step = decide(
            1,
            Ok(fake::status(503)),
            &retry,
            &ThrowPolicy::default(),
            &ExceptionPolicy::default(),
            &mut options,
        );
        assert!(matches!(step, Step::Retry(_)));
        assert_eq!(options.header_value("x-retry"), Some("1"));

        let step = decide(
            1,
            Ok(fake::status(400)),
            &retry,
            &ThrowPolicy::default(),
            &ExceptionPolicy::default(),
            &mut options,
        );
        assert!(matches!(step, Step::Done(Err(Error::Http(_)))));
    }

    #[test]
    fn connection_failures_are_terminal() {
        let retry = RetryPolicy::new(Tries::Count(5));
        let step = decide(
            1,
            Err(Error::timeout("slow")),
            &retry,
            &ThrowPolicy::default(),
            &ExceptionPolicy::default(),
            &mut RequestOptions::new(),
        );
        assert!(matches!(step, Step::Done(Err(ref e)) if e.is_timeout()));
    }

    #[test]
    fn http_errors_from_middleware_are_unwrapped() {
        let exception = fake::status(502)
            .to_exception(&ExceptionPolicy::default())
            .expect("failed");
        let retry = RetryPolicy::new(Tries::Count(2));
        let step = decide(
            1,
            Err(Error::Http(exception)),
            &retry,
            &ThrowPolicy::default(),
            &ExceptionPolicy::default(),
            &mut RequestOptions::new(),
        );
        assert!(matches!(step, Step::Retry(_)));
    }
}
