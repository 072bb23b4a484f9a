//! Executors that run retry attempts.
//!
//! The engine only needs two things from a scheduler: run a task soon, and run a task after a
//! delay without occupying a thread while waiting. [`TokioScheduler`] does both on a Tokio
//! runtime; [`InlineScheduler`] runs everything on the calling thread.

use crate::sleeper::{BlockingSleeper, Sleeper, ThreadSleeper, TokioSleeper};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;

/// A unit of work handed to a scheduler.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Dispatch abstraction used for retry attempts.
///
/// A scheduler may drop a task instead of running it (for example while shutting down); the
/// retry engine reports that as [`RetryError::Rejected`](crate::RetryError::Rejected).
pub trait Scheduler: Send + Sync + fmt::Debug {
    /// Run `task` as soon as possible.
    fn execute(&self, task: Task);

    /// Run `task` once `delay` has elapsed.
    fn schedule(&self, delay: Duration, task: Task);
}

impl<S> Scheduler for Arc<S>
where
    S: Scheduler + ?Sized,
{
    fn execute(&self, task: Task) {
        (**self).execute(task)
    }

    fn schedule(&self, delay: Duration, task: Task) {
        (**self).schedule(delay, task)
    }
}

/// Scheduler backed by a Tokio runtime.
///
/// Tasks run on the runtime's worker threads and must not block. Delays use the configured
/// [`Sleeper`], so waiting never holds a thread.
#[derive(Debug, Clone)]
pub struct TokioScheduler {
    handle: Handle,
    sleeper: Arc<dyn Sleeper>,
}

impl TokioScheduler {
    pub fn new(handle: Handle) -> Self {
        Self { handle, sleeper: Arc::new(TokioSleeper) }
    }

    /// Scheduler on the runtime the caller is running in.
    ///
    /// Panics if called outside of a Tokio runtime.
    pub fn current() -> Self {
        Self::new(Handle::current())
    }

    /// Provide a custom sleeper implementation.
    pub fn with_sleeper<S>(mut self, sleeper: S) -> Self
    where
        S: Sleeper + 'static,
    {
        self.sleeper = Arc::new(sleeper);
        self
    }
}

impl Scheduler for TokioScheduler {
    fn execute(&self, task: Task) {
        self.handle.spawn(async move { task() });
    }

    fn schedule(&self, delay: Duration, task: Task) {
        let sleep = self.sleeper.sleep(delay);
        self.handle.spawn(async move {
            sleep.await;
            task()
        });
    }
}

/// Scheduler that runs every task on the calling thread, blocking through delays.
///
/// An interrupted delay drops the task.
#[derive(Debug, Clone)]
pub struct InlineScheduler {
    sleeper: Arc<dyn BlockingSleeper>,
}

impl InlineScheduler {
    pub fn new() -> Self {
        Self { sleeper: Arc::new(ThreadSleeper) }
    }

    pub fn with_sleeper<S>(mut self, sleeper: S) -> Self
    where
        S: BlockingSleeper + 'static,
    {
        self.sleeper = Arc::new(sleeper);
        self
    }
}

impl Default for InlineScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler for InlineScheduler {
    fn execute(&self, task: Task) {
        task()
    }

    fn schedule(&self, delay: Duration, task: Task) {
        if self.sleeper.sleep_blocking(delay).is_ok() {
            task()
        }
    }
}
