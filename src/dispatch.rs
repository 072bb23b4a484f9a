//! Conditional dispatch.
//!
//! [`ConditionalScheduler`] decorates a [`Scheduler`]: when its predicate holds, work runs
//! synchronously on the calling thread (delays block that thread); otherwise work goes to the
//! wrapped scheduler. The retry engine builds one per attempt with the predicate
//! "first attempt OR transaction active on this thread".

use crate::scheduler::{Scheduler, Task};
use crate::sleeper::{BlockingSleeper, Interrupted, ThreadSleeper};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Where a dispatched task ended up running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Ran synchronously on the calling thread.
    Inline,
    /// Handed to the wrapped scheduler.
    Delegated,
}

/// Scheduler decorator that runs work inline while a predicate holds.
pub struct ConditionalScheduler {
    delegate: Arc<dyn Scheduler>,
    run_inline: Box<dyn Fn() -> bool + Send + Sync>,
    sleeper: Arc<dyn BlockingSleeper>,
}

impl ConditionalScheduler {
    pub fn new<F>(delegate: Arc<dyn Scheduler>, run_inline: F) -> Self
    where
        F: Fn() -> bool + Send + Sync + 'static,
    {
        Self { delegate, run_inline: Box::new(run_inline), sleeper: Arc::new(ThreadSleeper) }
    }

    /// Sleeper used for inline delays.
    pub fn with_blocking_sleeper(mut self, sleeper: Arc<dyn BlockingSleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn should_run_inline(&self) -> bool {
        (self.run_inline)()
    }

    /// Run `task` now, inline or through the wrapped scheduler.
    pub fn dispatch(&self, task: Task) -> Dispatch {
        if self.should_run_inline() {
            task();
            Dispatch::Inline
        } else {
            self.delegate.execute(task);
            Dispatch::Delegated
        }
    }

    /// Run `task` after `delay`.
    ///
    /// Inline dispatch blocks the calling thread for the delay; if that sleep is interrupted
    /// the task is dropped and the interruption returned.
    pub fn dispatch_after(&self, delay: Duration, task: Task) -> Result<Dispatch, Interrupted> {
        if self.should_run_inline() {
            self.sleeper.sleep_blocking(delay)?;
            task();
            Ok(Dispatch::Inline)
        } else {
            self.delegate.schedule(delay, task);
            Ok(Dispatch::Delegated)
        }
    }
}

impl fmt::Debug for ConditionalScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConditionalScheduler")
            .field("delegate", &self.delegate)
            .field("run_inline", &"<predicate>")
            .field("sleeper", &self.sleeper)
            .finish()
    }
}

impl Scheduler for ConditionalScheduler {
    fn execute(&self, task: Task) {
        self.dispatch(task);
    }

    fn schedule(&self, delay: Duration, task: Task) {
        // an interrupted inline delay drops the task
        let _ = self.dispatch_after(delay, task);
    }
}
