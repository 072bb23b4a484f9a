//! Error types for retry policies and templates
use std::fmt;
use thiserror::Error;

/// Terminal cause of a retry sequence.
///
/// This is what `map_error` receives in the future and stream modes, and what an exhausted
/// [`PolicyStatus`](crate::PolicyStatus) carries in the one-shot mode.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RetryError<E> {
    /// The last attempt failed and no retry follows, either because the attempt budget is
    /// spent or because the failure was classified as not retryable.
    #[error("{0}")]
    Failed(E),
    /// A blocking delay between attempts was interrupted. Interruption is never retried.
    #[error("retry delay was interrupted")]
    Interrupted,
    /// The scheduler dropped a retry attempt without running it.
    #[error("scheduler dropped the retry attempt before it ran")]
    Rejected,
}

impl<E> RetryError<E> {
    /// Check if the sequence ended because of an interrupted delay
    pub fn is_interrupted(&self) -> bool {
        matches!(self, Self::Interrupted)
    }

    /// Check if the scheduler refused to run a retry
    pub fn is_rejected(&self) -> bool {
        matches!(self, Self::Rejected)
    }

    /// Borrow the failure of the last attempt, if the sequence ended on one.
    pub fn as_failure(&self) -> Option<&E> {
        match self {
            Self::Failed(e) => Some(e),
            _ => None,
        }
    }

    /// Take the failure of the last attempt, if the sequence ended on one.
    pub fn into_failure(self) -> Option<E> {
        match self {
            Self::Failed(e) => Some(e),
            _ => None,
        }
    }

    /// Map the failure type, keeping interruption and rejection as they are.
    pub fn map<F, T>(self, f: F) -> RetryError<T>
    where
        F: FnOnce(E) -> T,
    {
        match self {
            Self::Failed(e) => RetryError::Failed(f(e)),
            Self::Interrupted => RetryError::Interrupted,
            Self::Rejected => RetryError::Rejected,
        }
    }
}

/// Errors produced while building a retry policy.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
    /// `max_attempts` must be > 0.
    #[error("max_attempts must be > 0 (got {0})")]
    InvalidMaxAttempts(usize),
    /// A configured retry count must be positive or `RETRY_COUNT_FOREVER`.
    #[error("retry count must be positive or RETRY_COUNT_FOREVER (got {0})")]
    InvalidRetryCount(i64),
}

/// Returned by [`RetryTemplate::execute`](crate::RetryTemplate::execute) once the policy
/// gives up on a piece of work.
#[derive(Debug, Clone)]
pub struct RetryExhaustedError<E> {
    description: String,
    attempts: usize,
    cause: RetryError<E>,
}

impl<E> RetryExhaustedError<E> {
    pub(crate) fn new(description: String, attempts: usize, cause: RetryError<E>) -> Self {
        Self { description, attempts, cause }
    }

    /// Description of the work that could not be completed.
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Number of times the work was attempted.
    pub fn attempts(&self) -> usize {
        self.attempts
    }

    pub fn cause(&self) -> &RetryError<E> {
        &self.cause
    }

    pub fn into_cause(self) -> RetryError<E> {
        self.cause
    }
}

impl<E: fmt::Display> fmt::Display for RetryExhaustedError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "retry exhausted for '{}' after {} attempts: {}",
            self.description, self.attempts, self.cause
        )
    }
}

impl<E: std::error::Error + 'static> std::error::Error for RetryExhaustedError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &self.cause {
            RetryError::Failed(e) => Some(e),
            _ => None,
        }
    }
}
