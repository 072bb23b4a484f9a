//! Hooks fired when a [`RetryTemplate`](crate::RetryTemplate) finishes a piece of work.
//!
//! Notifiers are fire-and-forget: they cannot change the outcome of a retry sequence.

use crate::template::RetryContext;
use std::error::Error;
use std::sync::{Arc, Mutex, PoisonError};

/// Receives the final outcome of templated work.
pub trait RetryNotifier: Send + Sync + std::fmt::Debug {
    fn on_success(&self, context: &RetryContext);
    fn on_failure(&self, context: &RetryContext, error: &(dyn Error + 'static));
}

/// Discards all notifications.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullNotifier;

impl RetryNotifier for NullNotifier {
    fn on_success(&self, _context: &RetryContext) {}

    fn on_failure(&self, _context: &RetryContext, _error: &(dyn Error + 'static)) {}
}

/// Logs notifications through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl RetryNotifier for LogNotifier {
    fn on_success(&self, context: &RetryContext) {
        tracing::info!(
            target: "reattempt::notifier",
            work = %context.description(),
            attempts = context.attempt(),
            "work succeeded"
        );
    }

    fn on_failure(&self, context: &RetryContext, error: &(dyn Error + 'static)) {
        tracing::warn!(
            target: "reattempt::notifier",
            work = %context.description(),
            attempts = context.attempt(),
            error = %error,
            "work failed after retries"
        );
    }
}

/// A notification captured by [`MemoryNotifier`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    Success { description: String, attempts: usize },
    Failure { description: String, attempts: usize, error: String },
}

/// Stores notifications in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryNotifier {
    notifications: Arc<Mutex<Vec<Notification>>>,
}

impl MemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.notifications.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn clear(&self) {
        self.notifications.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }

    fn push(&self, notification: Notification) {
        self.notifications.lock().unwrap_or_else(PoisonError::into_inner).push(notification);
    }
}

impl RetryNotifier for MemoryNotifier {
    fn on_success(&self, context: &RetryContext) {
        self.push(Notification::Success {
            description: context.description().to_string(),
            attempts: context.attempt(),
        });
    }

    fn on_failure(&self, context: &RetryContext, error: &(dyn Error + 'static)) {
        self.push(Notification::Failure {
            description: context.description().to_string(),
            attempts: context.attempt(),
            error: error.to_string(),
        });
    }
}
