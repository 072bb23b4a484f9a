//! Decision value returned by the one-shot policy mode.

use crate::error::RetryError;

/// Outcome of a single policy evaluation.
///
/// Once `Exhausted` is returned for a sequence, the caller must reset the attempt counter
/// before evaluating the policy again for that sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyStatus<E> {
    /// The delay has elapsed; try again.
    Ok,
    /// No more retries; carries the terminating cause.
    Exhausted(RetryError<E>),
}

impl<E> PolicyStatus<E> {
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok)
    }

    pub fn is_exhausted(&self) -> bool {
        matches!(self, Self::Exhausted(_))
    }

    /// Borrow the terminating cause, if exhausted.
    pub fn cause(&self) -> Option<&RetryError<E>> {
        match self {
            Self::Exhausted(cause) => Some(cause),
            Self::Ok => None,
        }
    }

    pub fn into_cause(self) -> Option<RetryError<E>> {
        match self {
            Self::Exhausted(cause) => Some(cause),
            Self::Ok => None,
        }
    }
}
