//! Timer-driven polling with in-place retries.
//!
//! [`IntervalPoller`] calls a check operation immediately and then once per
//! interval until a predicate says to stop. Transient failures are retried after
//! `retry_delay` without waiting for the next interval; once the retry budget is
//! spent the run fails with [`PollError::RetryExhausted`].
//!
//! Cancelling the run's token aborts even an in-flight check. The interrupt
//! token is only honored between checks, so a check that has started always
//! completes and is observed before the run returns [`PollError::Interrupted`].
//!
//! ```ignore
//! let poller = IntervalPoller::new(PollSettings::default());
//! let details = poller.run(continue_until_truthy, || client.details()).await?;
//! ```

use std::fmt;
use std::future::Future;
use std::time::Duration;

use serde_json::Value;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Classifies a failure as worth retrying.
pub trait Transient {
    fn is_transient(&self) -> bool {
        true
    }
}

/// How many transient failures in a row a poll run tolerates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryLimit {
    Bounded(u32),
    Unbounded,
}

impl RetryLimit {
    /// Whether another retry is allowed after `retries` have already happened.
    pub fn allows(&self, retries: u32) -> bool {
        match self {
            RetryLimit::Bounded(limit) => retries < *limit,
            RetryLimit::Unbounded => true,
        }
    }
}

impl Default for RetryLimit {
    fn default() -> Self {
        RetryLimit::Bounded(3)
    }
}

impl fmt::Display for RetryLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetryLimit::Bounded(limit) => write!(f, "{limit}"),
            RetryLimit::Unbounded => f.write_str("unbounded"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollSettings {
    pub interval: Duration,
    pub retry_limit: RetryLimit,
    pub retry_delay: Duration,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(2000),
            retry_limit: RetryLimit::default(),
            retry_delay: Duration::from_millis(1000),
        }
    }
}

#[derive(Debug, Error)]
pub enum PollError<E> {
    #[error("retry budget exhausted after {retries} retries: {last}")]
    RetryExhausted { retries: u32, last: E },

    #[error("check failed: {0}")]
    Fatal(E),

    #[error("polling cancelled")]
    Cancelled,

    #[error("polling interrupted between checks")]
    Interrupted,
}

/// Progress notifications emitted by [`IntervalPoller::run_observed`].
#[derive(Debug)]
pub enum PollEvent<'a, T, E> {
    /// A check succeeded with this value.
    Tick(&'a T),
    /// A check failed transiently; `attempt` is the retry about to be made.
    Retry { attempt: u32, error: &'a E },
}

#[derive(Debug, Clone)]
pub struct IntervalPoller {
    settings: PollSettings,
    cancel: CancellationToken,
    interrupt: CancellationToken,
    retries_spent: u32,
}

impl IntervalPoller {
    pub fn new(settings: PollSettings) -> Self {
        Self {
            settings,
            cancel: CancellationToken::new(),
            interrupt: CancellationToken::new(),
            retries_spent: 0,
        }
    }

    /// Ties this poller to an externally owned cancellation token.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Ends the run at the next gap between checks once `interrupt` is cancelled.
    pub fn with_interrupt(mut self, interrupt: CancellationToken) -> Self {
        self.interrupt = interrupt;
        self
    }

    /// Starts the run with part of the retry budget already used.
    pub fn with_retries_spent(mut self, retries: u32) -> Self {
        self.retries_spent = retries;
        self
    }

    /// A token that stops the run when cancelled.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn settings(&self) -> &PollSettings {
        &self.settings
    }

    pub async fn run<T, E, F, Fut, P>(&self, keep_polling: P, check: F) -> Result<T, PollError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: FnMut(&T) -> bool,
        E: Transient,
    {
        self.run_observed(keep_polling, check, |_| {}).await
    }

    /// Like [`run`](Self::run), reporting every tick and retry to `observe`.
    pub async fn run_observed<T, E, F, Fut, P, O>(
        &self,
        mut keep_polling: P,
        mut check: F,
        mut observe: O,
    ) -> Result<T, PollError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: FnMut(&T) -> bool,
        O: FnMut(PollEvent<'_, T, E>),
        E: Transient,
    {
        let mut retries = self.retries_spent;

        loop {
            if self.cancel.is_cancelled() {
                return Err(PollError::Cancelled);
            }
            if self.interrupt.is_cancelled() {
                return Err(PollError::Interrupted);
            }

            let attempt = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(PollError::Cancelled),
                result = check() => result,
            };

            let wait = match attempt {
                Ok(value) => {
                    retries = 0;
                    observe(PollEvent::Tick(&value));
                    if !keep_polling(&value) {
                        return Ok(value);
                    }
                    self.settings.interval
                }
                Err(error) if !error.is_transient() => return Err(PollError::Fatal(error)),
                Err(error) => {
                    if !self.settings.retry_limit.allows(retries) {
                        return Err(PollError::RetryExhausted {
                            retries,
                            last: error,
                        });
                    }
                    retries = retries.saturating_add(1);
                    observe(PollEvent::Retry {
                        attempt: retries,
                        error: &error,
                    });
                    self.settings.retry_delay
                }
            };

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(PollError::Cancelled),
                _ = self.interrupt.cancelled() => return Err(PollError::Interrupted),
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }
}

/// Polls `check` with the given settings until `keep_polling` returns false.
pub async fn poll<T, E, F, Fut, P>(
    settings: PollSettings,
    keep_polling: P,
    check: F,
) -> Result<T, PollError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: FnMut(&T) -> bool,
    E: Transient,
{
    IntervalPoller::new(settings).run(keep_polling, check).await
}

/// Keeps polling while the value is falsy (`null`, `false`, `0`, `""`).
pub fn continue_until_truthy(value: &Value) -> bool {
    !is_truthy(value)
}

/// Keeps polling while the value is present (not `null`).
pub fn continue_while_present(value: &Value) -> bool {
    !value.is_null()
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    #[derive(Debug, Clone, PartialEq)]
    enum TestError {
        Flaky,
        Broken,
    }

    impl fmt::Display for TestError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{self:?}")
        }
    }

    impl Transient for TestError {
        fn is_transient(&self) -> bool {
            matches!(self, TestError::Flaky)
        }
    }

    fn settings(interval_ms: u64, retry_limit: RetryLimit, retry_delay_ms: u64) -> PollSettings {
        PollSettings {
            interval: Duration::from_millis(interval_ms),
            retry_limit,
            retry_delay: Duration::from_millis(retry_delay_ms),
        }
    }

    #[test]
    fn retry_limit_allows() {
        assert!(RetryLimit::Bounded(2).allows(1));
        assert!(!RetryLimit::Bounded(2).allows(2));
        assert!(!RetryLimit::Bounded(0).allows(0));
        assert!(RetryLimit::Unbounded.allows(u32::MAX));
        assert_eq!(RetryLimit::Unbounded.to_string(), "unbounded");
    }

    #[tokio::test(start_paused = true)]
    async fn stops_after_first_check_when_predicate_is_false() {
        let calls = &AtomicU32::new(0);
        let started = Instant::now();

        let value = poll(
            settings(1000, RetryLimit::Bounded(3), 100),
            |_: &u32| false,
            || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, TestError>(7)
            },
        )
        .await
        .unwrap();

        assert_eq!(value, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn polls_every_interval_until_predicate_flips() {
        let calls = &AtomicU32::new(0);
        let started = Instant::now();

        let value = poll(
            settings(10, RetryLimit::Bounded(3), 100),
            |n: &u32| *n < 3,
            || async move { Ok::<_, TestError>(calls.fetch_add(1, Ordering::SeqCst) + 1) },
        )
        .await
        .unwrap();

        assert_eq!(value, 3);
        assert_eq!(started.elapsed(), Duration::from_millis(20));
    }

    #[tokio::test(start_paused = true)]
    async fn exhausts_after_exactly_limit_retries() {
        let calls = &AtomicU32::new(0);
        let started = Instant::now();

        let err = poll(
            settings(1000, RetryLimit::Bounded(2), 50),
            |_: &u32| true,
            || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<u32, _>(TestError::Flaky)
            },
        )
        .await
        .unwrap_err();

        match err {
            PollError::RetryExhausted { retries, last } => {
                assert_eq!(retries, 2);
                assert_eq!(last, TestError::Flaky);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(started.elapsed(), Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn success_resets_retry_count() {
        let calls = &AtomicU32::new(0);
        let mut retries_seen = Vec::new();

        // flaky, ok, flaky, flaky, ok(done)
        let value = IntervalPoller::new(settings(10, RetryLimit::Bounded(2), 5))
            .run_observed(
                |n: &u32| *n < 4,
                || async move {
                    match calls.fetch_add(1, Ordering::SeqCst) {
                        0 | 2 | 3 => Err(TestError::Flaky),
                        n => Ok(n),
                    }
                },
                |event| {
                    if let PollEvent::Retry { attempt, .. } = event {
                        retries_seen.push(attempt);
                    }
                },
            )
            .await
            .unwrap();

        assert_eq!(value, 4);
        assert_eq!(retries_seen, vec![1, 1, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn fatal_errors_are_not_retried() {
        let calls = &AtomicU32::new(0);
        let err = poll(
            settings(10, RetryLimit::Unbounded, 5),
            |_: &u32| true,
            || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<u32, _>(TestError::Broken)
            },
        )
        .await
        .unwrap_err();

        assert!(matches!(err, PollError::Fatal(TestError::Broken)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn unbounded_retries_keep_going_until_success() {
        let calls = &AtomicU32::new(0);
        let value = poll(
            settings(10, RetryLimit::Unbounded, 1),
            |_: &u32| false,
            || async move {
                match calls.fetch_add(1, Ordering::SeqCst) {
                    n if n < 50 => Err(TestError::Flaky),
                    n => Ok(n),
                }
            },
        )
        .await
        .unwrap();
        assert_eq!(value, 50);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_stops_further_checks() {
        let calls = Arc::new(AtomicU32::new(0));
        let poller = IntervalPoller::new(settings(100, RetryLimit::Bounded(3), 10));
        let cancel = poller.cancel_token();

        let counter = calls.clone();
        let task = tokio::spawn(async move {
            poller
                .run(
                    |_: &u32| true,
                    || {
                        let counter = counter.clone();
                        async move { Ok::<_, TestError>(counter.fetch_add(1, Ordering::SeqCst)) }
                    },
                )
                .await
        });

        tokio::time::sleep(Duration::from_millis(250)).await;
        cancel.cancel();
        let result = task.await.unwrap();
        assert!(matches!(result, Err(PollError::Cancelled)));

        let seen = calls.load(Ordering::SeqCst);
        assert_eq!(seen, 3);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(calls.load(Ordering::SeqCst), seen);
    }

    #[tokio::test]
    async fn pre_cancelled_poller_never_checks() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let calls = &AtomicU32::new(0);

        let result = IntervalPoller::new(PollSettings::default())
            .with_cancellation(cancel)
            .run(
                |_: &u32| true,
                || async move { Ok::<_, TestError>(calls.fetch_add(1, Ordering::SeqCst)) },
            )
            .await;

        assert!(matches!(result, Err(PollError::Cancelled)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn interrupt_waits_for_the_in_flight_check() {
        let calls = &AtomicU32::new(0);
        let interrupt = CancellationToken::new();
        let poller = IntervalPoller::new(settings(1000, RetryLimit::Bounded(3), 10))
            .with_interrupt(interrupt.clone());
        let started = Instant::now();
        let mut ticks = Vec::new();

        let trigger = async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            interrupt.cancel();
        };
        let run = poller.run_observed(
            |_: &u32| true,
            || async move {
                tokio::time::sleep(Duration::from_millis(500)).await;
                Ok::<_, TestError>(calls.fetch_add(1, Ordering::SeqCst))
            },
            |event| {
                if let PollEvent::Tick(n) = event {
                    ticks.push(*n);
                }
            },
        );
        let (result, ()) = tokio::join!(run, trigger);

        assert!(matches!(result, Err(PollError::Interrupted)));
        assert_eq!(ticks, vec![0]);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(started.elapsed(), Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn interrupt_cuts_the_interval_short() {
        let interrupt = CancellationToken::new();
        let poller = IntervalPoller::new(settings(10_000, RetryLimit::Bounded(3), 10))
            .with_interrupt(interrupt.clone());
        let started = Instant::now();

        let trigger = async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            interrupt.cancel();
        };
        let (result, ()) = tokio::join!(
            poller.run(|_: &u32| true, || async { Ok::<_, TestError>(1) }),
            trigger
        );

        assert!(matches!(result, Err(PollError::Interrupted)));
        assert_eq!(started.elapsed(), Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn spent_retries_count_against_the_budget() {
        let calls = &AtomicU32::new(0);
        let err = IntervalPoller::new(settings(1000, RetryLimit::Bounded(2), 5))
            .with_retries_spent(1)
            .run(
                |_: &u32| true,
                || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err::<u32, _>(TestError::Flaky)
                },
            )
            .await
            .unwrap_err();

        assert!(matches!(err, PollError::RetryExhausted { retries: 2, .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn unbounded_retry_counter_saturates() {
        let calls = &AtomicU32::new(0);
        let value = IntervalPoller::new(settings(10, RetryLimit::Unbounded, 1))
            .with_retries_spent(u32::MAX)
            .run(
                |_: &u32| false,
                || async move {
                    match calls.fetch_add(1, Ordering::SeqCst) {
                        0 => Err(TestError::Flaky),
                        n => Ok(n),
                    }
                },
            )
            .await
            .unwrap();
        assert_eq!(value, 1);
    }

    #[test]
    fn truthy_predicate() {
        assert!(continue_until_truthy(&Value::Null));
        assert!(continue_until_truthy(&json!(false)));
        assert!(continue_until_truthy(&json!(0)));
        assert!(continue_until_truthy(&json!("")));
        assert!(!continue_until_truthy(&json!(true)));
        assert!(!continue_until_truthy(&json!({"version": "1.2"})));
        assert!(!continue_until_truthy(&json!([])));
    }

    #[test]
    fn presence_predicate() {
        assert!(continue_while_present(&json!({"up": true})));
        assert!(continue_while_present(&json!(false)));
        assert!(!continue_while_present(&Value::Null));
    }
}
