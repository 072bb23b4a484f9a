//! Synchronous retry templates for connectors and reconnection loops.
//!
//! A [`RetryTemplate`] couples a [`RetryPolicy`] with a [`RetryNotifier`]. It runs a
//! [`RetryCallback`] until the work succeeds or the policy is exhausted, and it reports the
//! outcome once.
//!
//! ```rust
//! use std::time::Duration;
//! use reattempt::{MemoryNotifier, RetryContext, RetryPolicy, RetryTemplate};
//!
//! let policy = RetryPolicy::builder().max_attempts(3).delay(Duration::from_millis(1)).build().unwrap();
//! let notifier = MemoryNotifier::new();
//! let template = RetryTemplate::new(policy).with_notifier(notifier.clone());
//!
//! let mut calls = 0;
//! let mut connect = |_: &mut RetryContext| -> Result<(), std::io::Error> {
//!     calls += 1;
//!     if calls < 2 {
//!         Err(std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused"))
//!     } else {
//!         Ok(())
//!     }
//! };
//! let context = template.execute(&mut connect).unwrap();
//! assert_eq!(context.attempt(), 2);
//! ```

use crate::counter::AttemptCounter;
use crate::error::{RetryError, RetryExhaustedError};
use crate::notifier::{LogNotifier, RetryNotifier};
use crate::retry::RetryPolicy;
use crate::status::PolicyStatus;
use std::collections::HashMap;
use std::error::Error;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

/// Work driven by a [`RetryTemplate`].
pub trait RetryCallback<E> {
    /// Run one attempt of the work.
    fn do_work(&mut self, context: &mut RetryContext) -> Result<(), E>;

    /// Human-readable description used in logs, notifications and errors.
    fn work_description(&self) -> String {
        "unnamed work".to_string()
    }
}

impl<E, F> RetryCallback<E> for F
where
    F: FnMut(&mut RetryContext) -> Result<(), E>,
{
    fn do_work(&mut self, context: &mut RetryContext) -> Result<(), E> {
        self(context)
    }
}

/// State of one templated execution, shared with the callback and the notifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryContext {
    description: String,
    attempt: usize,
    ok: bool,
    last_failure: Option<String>,
    metadata: HashMap<String, String>,
}

impl RetryContext {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            attempt: 0,
            ok: false,
            last_failure: None,
            metadata: HashMap::new(),
        }
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    /// 1-based number of the attempt in flight, or the last one made.
    pub fn attempt(&self) -> usize {
        self.attempt
    }

    pub fn is_ok(&self) -> bool {
        self.ok
    }

    /// Display form of the most recent failure.
    pub fn last_failure(&self) -> Option<&str> {
        self.last_failure.as_deref()
    }

    pub fn metadata(&self) -> &HashMap<String, String> {
        &self.metadata
    }

    /// Attach a value for notifiers to read.
    pub fn add_metadata(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.metadata.insert(key.into(), value.into());
    }

    pub fn set_ok(&mut self) {
        self.ok = true;
        self.last_failure = None;
    }

    pub fn set_failed(&mut self, failure: &dyn fmt::Display) {
        self.ok = false;
        self.last_failure = Some(failure.to_string());
    }

    pub fn begin_attempt(&mut self, attempt: usize) {
        self.attempt = attempt;
    }
}

/// Runs [`RetryCallback`]s under a policy.
#[derive(Debug, Clone)]
pub struct RetryTemplate {
    policy: RetryPolicy,
    notifier: Arc<dyn RetryNotifier>,
}

impl RetryTemplate {
    /// Template reporting through [`LogNotifier`].
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy, notifier: Arc::new(LogNotifier) }
    }

    /// Template that runs the work exactly once.
    pub fn no_retry() -> Self {
        Self::new(RetryPolicy::no_retry())
    }

    pub fn with_notifier<N>(mut self, notifier: N) -> Self
    where
        N: RetryNotifier + 'static,
    {
        self.notifier = Arc::new(notifier);
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `callback` until it succeeds or the policy gives up.
    ///
    /// `max_attempts` bounds the total number of `do_work` calls, as in the future mode; the
    /// one-shot policy decides each retry in between. The calling thread blocks for the policy
    /// delay between attempts. Each call starts a fresh attempt count.
    pub fn execute<E, C>(&self, callback: &mut C) -> Result<RetryContext, RetryExhaustedError<E>>
    where
        E: Error + 'static,
        C: RetryCallback<E> + ?Sized,
    {
        let mut context = RetryContext::new(callback.work_description());
        let mut attempts = AttemptCounter::new();

        loop {
            context.begin_attempt(attempts.attempts());
            let failure = match callback.do_work(&mut context) {
                Ok(()) => {
                    context.set_ok();
                    debug!(
                        target: "reattempt::template",
                        work = %context.description(),
                        attempt = context.attempt(),
                        "work completed"
                    );
                    self.notifier.on_success(&context);
                    return Ok(context);
                }
                Err(failure) => failure,
            };

            context.set_failed(&failure);
            let status = if self.policy.max_attempts().permits_retry(context.attempt()) {
                self.policy.apply_policy_with(&mut attempts, failure)
            } else {
                debug!(
                    target: "reattempt::template",
                    work = %context.description(),
                    attempt = context.attempt(),
                    "attempt budget spent"
                );
                PolicyStatus::Exhausted(RetryError::Failed(failure))
            };
            match status {
                PolicyStatus::Ok => {
                    info!(
                        target: "reattempt::template",
                        work = %context.description(),
                        attempt = context.attempt(),
                        error = context.last_failure().unwrap_or_default(),
                        "retrying work"
                    );
                }
                PolicyStatus::Exhausted(cause) => {
                    let error = RetryExhaustedError::new(
                        context.description().to_string(),
                        context.attempt(),
                        cause,
                    );
                    self.notifier.on_failure(&context, &error);
                    return Err(error);
                }
            }
        }
    }
}
