use reattempt::{InstantSleeper, RetryPolicy, Scheduler, Task};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, ThreadId};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("TestError: {0}")]
pub struct TestError(pub String);

impl TestError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

/// Supplier bookkeeping: fails the first `failures` calls, then succeeds with the call number.
#[derive(Debug, Clone)]
pub struct Script {
    failures: usize,
    calls: Arc<AtomicUsize>,
    threads: Arc<Mutex<Vec<ThreadId>>>,
}

impl Script {
    pub fn failing(failures: usize) -> Self {
        Self {
            failures,
            calls: Arc::new(AtomicUsize::new(0)),
            threads: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn always_failing() -> Self {
        Self::failing(usize::MAX)
    }

    /// Record the call on the current thread and decide its outcome.
    pub fn next(&self) -> Result<usize, TestError> {
        self.threads.lock().unwrap().push(thread::current().id());
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if n <= self.failures {
            Err(TestError::new(format!("attempt {}", n)))
        } else {
            Ok(n)
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn threads(&self) -> Vec<ThreadId> {
        self.threads.lock().unwrap().clone()
    }
}

/// Counts hook invocations.
#[derive(Debug, Clone, Default)]
pub struct Hits(Arc<AtomicUsize>);

impl Hits {
    pub fn hit(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }

    pub fn count(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

/// Scheduler that drops every task it is given.
#[derive(Debug, Default)]
pub struct DroppingScheduler;

impl Scheduler for DroppingScheduler {
    fn execute(&self, task: Task) {
        drop(task);
    }

    fn schedule(&self, _delay: Duration, task: Task) {
        drop(task);
    }
}

/// Policy with `max_attempts` total attempts and no real blocking delays.
pub fn instant_policy(max_attempts: usize) -> RetryPolicy {
    RetryPolicy::builder()
        .max_attempts(max_attempts)
        .delay(Duration::from_millis(10))
        .with_blocking_sleeper(InstantSleeper)
        .build()
        .unwrap()
}
