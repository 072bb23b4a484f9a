//! Retry policy implementation
//!
//! A [`RetryPolicy`] is an immutable `{max_attempts, delay}` pair plus the collaborators it
//! consults (transaction context, blocking sleeper, applicability filter). It is cheap to clone
//! and safe to share between threads and sequences.
//!
//! Three entry points drive retries:
//! - [`RetryPolicy::apply_policy_async`]: retries a future-producing supplier and resolves to
//!   the first success or to the mapped terminal error.
//! - [`RetryPolicy::apply_policy_stream`]: resubscribes to a fresh stream after each retryable
//!   error (see the `stream` module).
//! - [`RetryPolicy::apply_policy`]: one decision per call for callers running their own loop.
//!   Blocks the calling thread for the delay.
//!
//! Semantics:
//! - In the future and stream modes `max_attempts` counts total attempts (initial try +
//!   retries). The one-shot mode counts the retries it grants: it answers `Ok` `max_attempts`
//!   times and `Exhausted` after that. [`MaxAttempts::Forever`] never runs out.
//! - A configured zero delay is raised to [`MIN_DELAY`].
//! - The first attempt always runs on the calling thread. A retry runs on the calling thread
//!   too while a transaction is active there (the delay then blocks that thread); otherwise it
//!   is scheduled on the supplied [`Scheduler`].
//! - `on_exhausted` runs exactly once, with the mapped error, before the caller sees it.
//!
//! Example
//! ```rust
//! use std::sync::Arc;
//! use std::time::Duration;
//! use reattempt::{RetryError, RetryPolicy, TokioScheduler};
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let policy = RetryPolicy::builder()
//!     .max_attempts(3) // total attempts
//!     .delay(Duration::from_millis(10))
//!     .build()
//!     .unwrap();
//! let result: Result<(), RetryError<std::io::Error>> = policy
//!     .apply_policy_async(
//!         || async { Err(std::io::Error::new(std::io::ErrorKind::Other, "refused")) },
//!         |_e| true,
//!         |_e| {},
//!         |_mapped| {},
//!         |cause| cause,
//!         Arc::new(TokioScheduler::current()),
//!     )
//!     .await;
//! assert!(result.is_err());
//! # });
//! ```

use crate::config::{DEFAULT_FREQUENCY, DEFAULT_RETRY_COUNT};
use crate::counter::{self, AttemptCounter, PolicyKey};
use crate::dispatch::ConditionalScheduler;
use crate::error::{BuildError, RetryError};
use crate::scheduler::{Scheduler, Task};
use crate::sleeper::{BlockingSleeper, Interrupted, ThreadSleeper};
use crate::status::PolicyStatus;
use crate::transaction::{LazyTransactionCheck, ThreadBoundTransactions, TransactionContext};
use futures::channel::oneshot;
use futures::future::BoxFuture;
use std::error::Error;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tracing::{debug, warn};

/// Smallest delay ever used between attempts.
pub const MIN_DELAY: Duration = Duration::from_millis(1);

/// Attempt budget of a policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaxAttempts {
    /// At most this many attempts in total.
    Limited(usize),
    /// Retry until success.
    Forever,
}

impl MaxAttempts {
    /// Whether another attempt may follow `attempts_made` attempts.
    pub fn permits_retry(&self, attempts_made: usize) -> bool {
        match self {
            Self::Forever => true,
            Self::Limited(max) => attempts_made < *max,
        }
    }

    pub fn is_forever(&self) -> bool {
        matches!(self, Self::Forever)
    }
}

type Applicability = Arc<dyn Fn(&(dyn Error + 'static)) -> bool + Send + Sync>;

/// Fixed-delay retry policy with a bounded or unbounded attempt budget.
///
/// Clones share the thread-local attempt counters used by [`RetryPolicy::apply_policy`].
#[derive(Clone)]
pub struct RetryPolicy {
    key: Arc<PolicyKey>,
    max_attempts: MaxAttempts,
    delay: Duration,
    transactions: Arc<dyn TransactionContext>,
    sleeper: Arc<dyn BlockingSleeper>,
    applicable: Applicability,
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("delay", &self.delay)
            .field("transactions", &"<transaction context>")
            .field("sleeper", &self.sleeper)
            .field("applicable", &"<predicate>")
            .finish()
    }
}

impl RetryPolicy {
    /// Construct a new builder with defaults.
    pub fn builder() -> RetryPolicyBuilder {
        RetryPolicyBuilder::new()
    }

    /// Policy allowing a single attempt with default collaborators.
    pub fn no_retry() -> Self {
        let defaults = RetryPolicyBuilder::new();
        Self {
            key: PolicyKey::new(),
            max_attempts: MaxAttempts::Limited(1),
            delay: defaults.delay,
            transactions: defaults.transactions,
            sleeper: defaults.sleeper,
            applicable: defaults.applicable,
        }
    }

    pub fn max_attempts(&self) -> MaxAttempts {
        self.max_attempts
    }

    /// Effective delay between attempts; never zero.
    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Applicability filter consulted by the one-shot mode.
    pub fn is_applicable_to(&self, cause: &(dyn Error + 'static)) -> bool {
        (self.applicable)(cause)
    }

    /// Decide whether the caller should try again after `cause`, using this thread's counter.
    ///
    /// Returns `Exhausted` without sleeping once this thread has been granted `max_attempts`
    /// retries or `cause` is not applicable; otherwise counts the retry, blocks for the delay
    /// and returns `Ok`. An interrupted delay ends the sequence with
    /// [`RetryError::Interrupted`].
    ///
    /// The count is kept per thread until [`RetryPolicy::reset_attempts`] is called or the last
    /// clone of the policy is dropped.
    pub fn apply_policy<E>(&self, cause: E) -> PolicyStatus<E>
    where
        E: Error + 'static,
    {
        let mut attempts = counter::load(&self.key);
        let status = self.apply_policy_with(&mut attempts, cause);
        counter::store(&self.key, attempts);
        status
    }

    /// Same as [`RetryPolicy::apply_policy`] with a caller-owned counter.
    pub fn apply_policy_with<E>(&self, attempts: &mut AttemptCounter, cause: E) -> PolicyStatus<E>
    where
        E: Error + 'static,
    {
        if !self.max_attempts.permits_retry(attempts.retries()) || !self.is_applicable_to(&cause) {
            warn!(
                target: "reattempt::retry",
                attempts = attempts.attempts(),
                error = %cause,
                "retry policy exhausted"
            );
            return PolicyStatus::Exhausted(RetryError::Failed(cause));
        }

        attempts.increment();
        match self.sleeper.sleep_blocking(self.delay) {
            Ok(()) => PolicyStatus::Ok,
            Err(Interrupted) => {
                warn!(
                    target: "reattempt::retry",
                    attempts = attempts.attempts(),
                    "retry delay interrupted"
                );
                PolicyStatus::Exhausted(RetryError::Interrupted)
            }
        }
    }

    /// Forget this thread's one-shot attempt count.
    pub fn reset_attempts(&self) {
        counter::reset(&self.key)
    }

    /// This thread's one-shot attempt count.
    pub fn thread_attempts(&self) -> AttemptCounter {
        counter::load(&self.key)
    }

    /// Retry the future produced by `work` until it succeeds or the policy gives up.
    ///
    /// - `should_retry` classifies a failure; `false` ends the sequence immediately.
    /// - `on_retry` runs before every retry (not before the first attempt), after the delay,
    ///   with the failure that triggered it.
    /// - `map_error` turns the terminal cause into the caller's error type, and
    ///   `on_exhausted` sees that mapped error once, before the returned future resolves.
    ///
    /// The first attempt is started before this function returns. Dropping the returned
    /// future cancels the sequence: pending retries are skipped and no callback fires again.
    pub fn apply_policy_async<T, E, M, W, Fut, R, N, X, ME>(
        &self,
        work: W,
        should_retry: R,
        on_retry: N,
        on_exhausted: X,
        map_error: ME,
        scheduler: Arc<dyn Scheduler>,
    ) -> RetryFuture<T, M>
    where
        T: Send + 'static,
        E: Send + 'static,
        M: Send + 'static,
        W: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        R: Fn(&E) -> bool + Send + 'static,
        N: Fn(&E) + Send + Sync + 'static,
        X: FnOnce(&M) + Send + 'static,
        ME: FnOnce(RetryError<E>) -> M + Send + 'static,
    {
        let guard = CancelOnDrop::new();
        let sequence =
            Arc::new(Sequence { produce: work, on_retry, cancelled: guard.flag() });
        let policy = self.clone();

        let (first, task) = attempt_task(&sequence, None::<E>);
        policy.dispatcher(&scheduler, true).dispatch(task);
        let mut pending: Result<oneshot::Receiver<Fut>, Interrupted> = Ok(first);

        let inner = async move {
            let _guard = guard;
            let mut context = AttemptContext::new();
            let cause = loop {
                let produced = match pending {
                    Ok(receiver) => receiver.await,
                    Err(Interrupted) => break RetryError::Interrupted,
                };
                let failure = match produced {
                    Ok(attempt) => match attempt.await {
                        Ok(value) => return Ok(value),
                        Err(e) => e,
                    },
                    Err(oneshot::Canceled) => break RetryError::Rejected,
                };
                if !should_retry(&failure) {
                    debug!(
                        target: "reattempt::retry",
                        attempt = context.attempts(),
                        "failure is not retryable"
                    );
                    break RetryError::Failed(failure);
                }
                if !policy.max_attempts.permits_retry(context.attempts()) {
                    break RetryError::Failed(failure);
                }
                context.begin_retry();
                let (next, task) = attempt_task(&sequence, Some(failure));
                pending = policy.dispatch_retry(&scheduler, context, task).map(|()| next);
            };

            let mapped = map_error(cause);
            warn!(target: "reattempt::retry", attempts = context.attempts(), "retries exhausted");
            on_exhausted(&mapped);
            Err(mapped)
        };

        RetryFuture { inner: Box::pin(inner) }
    }

    /// Dispatcher for one attempt: inline for the first attempt or while a transaction is
    /// active on the dispatching thread, the scheduler otherwise.
    pub(crate) fn dispatcher(
        &self,
        scheduler: &Arc<dyn Scheduler>,
        first_attempt: bool,
    ) -> ConditionalScheduler {
        let transaction = LazyTransactionCheck::new(self.transactions.clone());
        ConditionalScheduler::new(scheduler.clone(), move || {
            first_attempt || transaction.is_active()
        })
        .with_blocking_sleeper(self.sleeper.clone())
    }

    /// Run a retry task after the delay, wherever the dispatch rule puts it.
    pub(crate) fn dispatch_retry(
        &self,
        scheduler: &Arc<dyn Scheduler>,
        context: AttemptContext,
        task: Task,
    ) -> Result<(), Interrupted> {
        let dispatch = self.dispatcher(scheduler, context.is_first_attempt());
        match dispatch.dispatch_after(self.delay, task) {
            Ok(mode) => {
                debug!(
                    target: "reattempt::retry",
                    attempt = context.attempts(),
                    delay_ms = self.delay.as_millis() as u64,
                    dispatch = ?mode,
                    "retry dispatched"
                );
                Ok(())
            }
            Err(Interrupted) => {
                warn!(
                    target: "reattempt::retry",
                    attempt = context.attempts(),
                    "retry delay interrupted"
                );
                Err(Interrupted)
            }
        }
    }
}

/// Per-sequence attempt bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct AttemptContext {
    attempts: usize,
}

impl AttemptContext {
    pub(crate) fn new() -> Self {
        Self { attempts: 1 }
    }

    /// Attempts started so far, including the one in flight.
    pub(crate) fn attempts(&self) -> usize {
        self.attempts
    }

    pub(crate) fn is_first_attempt(&self) -> bool {
        self.attempts == 1
    }

    pub(crate) fn begin_retry(&mut self) {
        self.attempts = self.attempts.saturating_add(1);
    }
}

/// Shared between a retry future and the tasks it dispatches.
struct Sequence<W, N> {
    produce: W,
    on_retry: N,
    cancelled: Arc<AtomicBool>,
}

/// Build the task for one attempt and the channel its future comes back on.
fn attempt_task<W, N, Fut, E>(
    sequence: &Arc<Sequence<W, N>>,
    failure: Option<E>,
) -> (oneshot::Receiver<Fut>, Task)
where
    W: Fn() -> Fut + Send + Sync + 'static,
    N: Fn(&E) + Send + Sync + 'static,
    Fut: Send + 'static,
    E: Send + 'static,
{
    let (tx, rx) = oneshot::channel();
    let sequence = sequence.clone();
    let task: Task = Box::new(move || {
        if sequence.cancelled.load(Ordering::Acquire) {
            return;
        }
        if let Some(failure) = &failure {
            (sequence.on_retry)(failure);
        }
        let _ = tx.send((sequence.produce)());
    });
    (rx, task)
}

/// Marks a sequence cancelled when the future or stream driving it is dropped.
#[derive(Debug)]
pub(crate) struct CancelOnDrop(Arc<AtomicBool>);

impl CancelOnDrop {
    pub(crate) fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub(crate) fn flag(&self) -> Arc<AtomicBool> {
        self.0.clone()
    }
}

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.store(true, Ordering::Release);
    }
}

/// Future returned by [`RetryPolicy::apply_policy_async`].
#[must_use = "futures do nothing unless you `.await` or poll them"]
pub struct RetryFuture<T, M> {
    inner: BoxFuture<'static, Result<T, M>>,
}

impl<T, M> Future for RetryFuture<T, M> {
    type Output = Result<T, M>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.inner.as_mut().poll(cx)
    }
}

impl<T, M> fmt::Debug for RetryFuture<T, M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryFuture").finish_non_exhaustive()
    }
}

/// Builder for `RetryPolicy`.
pub struct RetryPolicyBuilder {
    max_attempts: MaxAttempts,
    delay: Duration,
    transactions: Arc<dyn TransactionContext>,
    sleeper: Arc<dyn BlockingSleeper>,
    applicable: Applicability,
}

impl RetryPolicyBuilder {
    /// Create a builder with defaults: two attempts, two seconds apart, thread-bound
    /// transactions, real blocking sleeps.
    pub fn new() -> Self {
        Self {
            max_attempts: MaxAttempts::Limited(DEFAULT_RETRY_COUNT as usize),
            delay: DEFAULT_FREQUENCY,
            transactions: Arc::new(ThreadBoundTransactions),
            sleeper: Arc::new(ThreadSleeper),
            applicable: Arc::new(|_| true),
        }
    }

    /// Set total attempts (initial + retries). Must be > 0.
    pub fn max_attempts(mut self, attempts: usize) -> Self {
        self.max_attempts = MaxAttempts::Limited(attempts);
        self
    }

    /// Retry until success.
    pub fn forever(mut self) -> Self {
        self.max_attempts = MaxAttempts::Forever;
        self
    }

    pub fn attempts(mut self, attempts: MaxAttempts) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Delay between attempts. Zero is raised to [`MIN_DELAY`].
    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Transaction context consulted by the dispatch rule.
    pub fn with_transactions<C>(mut self, transactions: C) -> Self
    where
        C: TransactionContext + 'static,
    {
        self.transactions = Arc::new(transactions);
        self
    }

    /// Sleeper used for blocking delays (one-shot mode and inline retries).
    pub fn with_blocking_sleeper<S>(mut self, sleeper: S) -> Self
    where
        S: BlockingSleeper + 'static,
    {
        self.sleeper = Arc::new(sleeper);
        self
    }

    /// Filter deciding which causes the one-shot mode retries at all.
    pub fn applicable_to<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&(dyn Error + 'static)) -> bool + Send + Sync + 'static,
    {
        self.applicable = Arc::new(predicate);
        self
    }

    /// Build the retry policy, validating inputs.
    pub fn build(self) -> Result<RetryPolicy, BuildError> {
        if self.max_attempts == MaxAttempts::Limited(0) {
            return Err(BuildError::InvalidMaxAttempts(0));
        }
        Ok(RetryPolicy {
            key: PolicyKey::new(),
            max_attempts: self.max_attempts,
            delay: self.delay.max(MIN_DELAY),
            transactions: self.transactions,
            sleeper: self.sleeper,
            applicable: self.applicable,
        })
    }
}

impl Default for RetryPolicyBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::TokioScheduler;
    use crate::sleeper::{InstantSleeper, InterruptibleSleeper, TrackingSleeper};
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
    #[error("TestError: {0}")]
    struct TestError(String);

    fn policy(max_attempts: usize) -> RetryPolicy {
        RetryPolicy::builder()
            .max_attempts(max_attempts)
            .delay(Duration::from_millis(10))
            .with_blocking_sleeper(InstantSleeper)
            .build()
            .expect("builder")
    }

    fn scheduler() -> Arc<dyn Scheduler> {
        Arc::new(TokioScheduler::current().with_sleeper(InstantSleeper))
    }

    #[test]
    fn builder_rejects_zero_attempts() {
        let err = RetryPolicy::builder().max_attempts(0).build();
        assert!(matches!(err, Err(BuildError::InvalidMaxAttempts(0))));
    }

    #[test]
    fn zero_delay_is_raised_to_minimum() {
        let policy = RetryPolicy::builder().delay(Duration::ZERO).build().unwrap();
        assert_eq!(policy.delay(), MIN_DELAY);
    }

    #[test]
    fn builder_defaults() {
        let policy = RetryPolicy::builder().build().unwrap();
        assert_eq!(policy.max_attempts(), MaxAttempts::Limited(2));
        assert_eq!(policy.delay(), Duration::from_secs(2));
    }

    #[test]
    fn max_attempts_permits() {
        assert!(MaxAttempts::Limited(3).permits_retry(2));
        assert!(!MaxAttempts::Limited(3).permits_retry(3));
        assert!(MaxAttempts::Forever.permits_retry(usize::MAX));
    }

    #[test]
    fn one_shot_grants_max_attempts_retries() {
        let sleeper = TrackingSleeper::new();
        let policy = RetryPolicy::builder()
            .max_attempts(3)
            .delay(Duration::from_millis(10))
            .with_blocking_sleeper(sleeper.clone())
            .build()
            .unwrap();

        for n in 1..=3 {
            assert!(policy.apply_policy(TestError(n.to_string())).is_ok(), "call {}", n);
        }
        let status = policy.apply_policy(TestError("4".into()));
        assert_eq!(status, PolicyStatus::Exhausted(RetryError::Failed(TestError("4".into()))));

        assert_eq!(sleeper.calls(), 3, "exhaustion must not sleep");
        assert_eq!(sleeper.call_at(0), Some(Duration::from_millis(10)));
        assert_eq!(policy.thread_attempts().retries(), 3, "exhaustion must not count");
    }

    #[test]
    fn one_shot_reset_starts_new_sequence() {
        let policy = policy(1);
        assert!(policy.apply_policy(TestError("a".into())).is_ok());
        assert!(policy.apply_policy(TestError("b".into())).is_exhausted());

        policy.reset_attempts();
        assert_eq!(policy.thread_attempts(), AttemptCounter::new());
        assert!(policy.apply_policy(TestError("c".into())).is_ok());
    }

    #[test]
    fn dropped_policies_leave_no_thread_counters() {
        for n in 0..1000 {
            let policy = policy(2);
            assert!(policy.apply_policy(TestError(n.to_string())).is_ok());
        }
        assert_eq!(counter::tracked(), 0);
    }

    #[test]
    fn live_clone_keeps_thread_counter() {
        let policy = policy(2);
        let clone = policy.clone();
        assert!(policy.apply_policy(TestError("x".into())).is_ok());
        drop(policy);
        assert_eq!(clone.thread_attempts().retries(), 1);
        assert_eq!(counter::tracked(), 1);
    }

    #[test]
    fn one_shot_forever_never_exhausts() {
        let policy = RetryPolicy::builder()
            .forever()
            .with_blocking_sleeper(InstantSleeper)
            .build()
            .unwrap();
        for n in 0..200 {
            assert!(policy.apply_policy(TestError(n.to_string())).is_ok());
        }
        assert_eq!(policy.thread_attempts().retries(), 200);
    }

    #[test]
    fn one_shot_respects_applicability() {
        let sleeper = TrackingSleeper::new();
        let policy = RetryPolicy::builder()
            .max_attempts(5)
            .with_blocking_sleeper(sleeper.clone())
            .applicable_to(|cause| cause.to_string().contains("transient"))
            .build()
            .unwrap();

        assert!(policy.is_applicable_to(&TestError("transient".into())));
        let status = policy.apply_policy(TestError("fatal".into()));
        assert!(status.is_exhausted());
        assert_eq!(sleeper.calls(), 0);
        assert_eq!(policy.thread_attempts().retries(), 0);
    }

    #[test]
    fn one_shot_interruption_is_terminal() {
        let sleeper = InterruptibleSleeper::new();
        let policy = RetryPolicy::builder()
            .forever()
            .delay(Duration::from_secs(30))
            .with_blocking_sleeper(sleeper.clone())
            .build()
            .unwrap();

        sleeper.interrupt();
        let status = policy.apply_policy(TestError("down".into()));
        assert_eq!(status, PolicyStatus::Exhausted(RetryError::Interrupted));
    }

    #[test]
    fn explicit_counter_is_independent_of_thread_counter() {
        let policy = policy(1);
        let mut counter = AttemptCounter::new();
        assert!(policy.apply_policy_with(&mut counter, TestError("x".into())).is_ok());
        assert!(policy.apply_policy_with(&mut counter, TestError("y".into())).is_exhausted());
        assert_eq!(policy.thread_attempts().retries(), 0);
    }

    #[test]
    fn clones_share_thread_counter() {
        let policy = policy(1);
        let clone = policy.clone();
        assert!(policy.apply_policy(TestError("x".into())).is_ok());
        assert!(clone.apply_policy(TestError("y".into())).is_exhausted());
    }

    #[tokio::test]
    async fn async_success_first_attempt() {
        let counter = Arc::new(AtomicUsize::new(0));
        let retries = Arc::new(AtomicUsize::new(0));
        let attempts = counter.clone();
        let seen = retries.clone();

        let result = policy(3)
            .apply_policy_async(
                move || {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    async { Ok::<_, TestError>(42) }
                },
                |_| true,
                move |_| {
                    seen.fetch_add(1, Ordering::SeqCst);
                },
                |_: &RetryError<TestError>| panic!("must not exhaust"),
                |cause| cause,
                scheduler(),
            )
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(counter.load(Ordering::SeqCst), 1, "Should only execute once");
        assert_eq!(retries.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn async_success_after_retries() {
        let counter = Arc::new(AtomicUsize::new(0));
        let failures = Arc::new(Mutex::new(Vec::new()));
        let attempts = counter.clone();
        let seen = failures.clone();

        let result = policy(5)
            .apply_policy_async(
                move || {
                    let attempt = attempts.fetch_add(1, Ordering::SeqCst);
                    async move {
                        if attempt < 2 {
                            Err(TestError(format!("attempt {}", attempt)))
                        } else {
                            Ok(attempt)
                        }
                    }
                },
                |_| true,
                move |e: &TestError| seen.lock().unwrap().push(e.0.clone()),
                |_: &RetryError<TestError>| {},
                |cause| cause,
                scheduler(),
            )
            .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(counter.load(Ordering::SeqCst), 3, "Should succeed on 3rd attempt");
        assert_eq!(*failures.lock().unwrap(), vec!["attempt 0", "attempt 1"]);
    }

    #[tokio::test]
    async fn async_exhaustion_maps_last_failure() {
        let counter = Arc::new(AtomicUsize::new(0));
        let exhausted = Arc::new(Mutex::new(Vec::new()));
        let attempts = counter.clone();
        let seen = exhausted.clone();

        let result: Result<(), String> = policy(3)
            .apply_policy_async(
                move || {
                    let attempt = attempts.fetch_add(1, Ordering::SeqCst);
                    async move { Err(TestError(format!("attempt {}", attempt))) }
                },
                |_| true,
                |_| {},
                move |mapped: &String| seen.lock().unwrap().push(mapped.clone()),
                |cause: RetryError<TestError>| format!("mapped: {}", cause),
                scheduler(),
            )
            .await;

        assert_eq!(result.unwrap_err(), "mapped: TestError: attempt 2");
        assert_eq!(counter.load(Ordering::SeqCst), 3, "Should attempt 3 times");
        assert_eq!(*exhausted.lock().unwrap(), vec!["mapped: TestError: attempt 2"]);
    }

    #[tokio::test]
    async fn async_should_retry_false_short_circuits() {
        let counter = Arc::new(AtomicUsize::new(0));
        let retries = Arc::new(AtomicUsize::new(0));
        let exhausted = Arc::new(AtomicUsize::new(0));
        let attempts = counter.clone();
        let seen_retry = retries.clone();
        let seen_exhausted = exhausted.clone();

        let result = policy(5)
            .apply_policy_async(
                move || {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    async { Err::<(), _>(TestError("fatal error".into())) }
                },
                |e: &TestError| e.0.contains("retryable"),
                move |_| {
                    seen_retry.fetch_add(1, Ordering::SeqCst);
                },
                move |_: &RetryError<TestError>| {
                    seen_exhausted.fetch_add(1, Ordering::SeqCst);
                },
                |cause| cause,
                scheduler(),
            )
            .await;

        assert_eq!(result, Err(RetryError::Failed(TestError("fatal error".into()))));
        assert_eq!(counter.load(Ordering::SeqCst), 1, "should not retry");
        assert_eq!(retries.load(Ordering::SeqCst), 0);
        assert_eq!(exhausted.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn async_first_attempt_starts_eagerly() {
        let counter = Arc::new(AtomicUsize::new(0));
        let attempts = counter.clone();

        let future = policy(1).apply_policy_async(
            move || {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Ok::<_, TestError>(()) }
            },
            |_| true,
            |_| {},
            |_: &RetryError<TestError>| {},
            |cause| cause,
            scheduler(),
        );

        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(future.await.is_ok());
    }

    #[test]
    fn attempt_context_tracks_first_attempt() {
        let mut context = AttemptContext::new();
        assert!(context.is_first_attempt());
        context.begin_retry();
        assert!(!context.is_first_attempt());
        assert_eq!(context.attempts(), 2);
    }
}
