//! Abstraction for sleeping/waiting
//!
//! Two flavours exist. [`Sleeper`] is the non-blocking timer used by schedulers between
//! pooled retries. [`BlockingSleeper`] parks the calling thread; it backs the one-shot policy
//! mode and inline (transaction-bound) retries, and it can be interrupted.
//!
//! Enables fast, deterministic tests without real time delays.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Abstraction for sleeping/waiting
pub trait Sleeper: Send + Sync + std::fmt::Debug {
    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send>>;
}

/// A blocking delay was cut short.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("sleep interrupted")]
pub struct Interrupted;

/// Sleep that occupies the calling thread until the delay elapses or it is interrupted.
pub trait BlockingSleeper: Send + Sync + std::fmt::Debug {
    fn sleep_blocking(&self, duration: Duration) -> Result<(), Interrupted>;
}

/// Production sleeper using tokio runtime
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSleeper;

impl Sleeper for TokioSleeper {
    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send>> {
        Box::pin(tokio::time::sleep(duration))
    }
}

/// Blocking sleeper backed by `std::thread::sleep`. Never interrupted.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadSleeper;

impl BlockingSleeper for ThreadSleeper {
    fn sleep_blocking(&self, duration: Duration) -> Result<(), Interrupted> {
        std::thread::sleep(duration);
        Ok(())
    }
}

/// Blocking sleeper that another thread can wake early.
///
/// An interrupt is consumed by the sleep it cuts short; a pending interrupt makes the next
/// sleep return immediately.
#[derive(Debug, Clone, Default)]
pub struct InterruptibleSleeper {
    state: Arc<(Mutex<bool>, Condvar)>,
}

impl InterruptibleSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Interrupt the current (or next) blocking sleep.
    pub fn interrupt(&self) {
        let (flag, wakeup) = &*self.state;
        *flag.lock().unwrap_or_else(PoisonError::into_inner) = true;
        wakeup.notify_all();
    }

    /// Whether an interrupt is pending.
    pub fn is_interrupted(&self) -> bool {
        *self.state.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl BlockingSleeper for InterruptibleSleeper {
    fn sleep_blocking(&self, duration: Duration) -> Result<(), Interrupted> {
        let (flag, wakeup) = &*self.state;
        let deadline = Instant::now() + duration;
        let mut interrupted = flag.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            if *interrupted {
                *interrupted = false;
                return Err(Interrupted);
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(());
            }
            interrupted = wakeup
                .wait_timeout(interrupted, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }
}

/// Test sleeper that doesn't actually sleep
#[derive(Debug, Default, Clone, Copy)]
pub struct InstantSleeper;

impl Sleeper for InstantSleeper {
    fn sleep(&self, _duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send>> {
        Box::pin(async {})
    }
}

impl BlockingSleeper for InstantSleeper {
    fn sleep_blocking(&self, _duration: Duration) -> Result<(), Interrupted> {
        Ok(())
    }
}

/// Test sleeper that tracks all sleep calls
#[derive(Debug, Clone)]
pub struct TrackingSleeper {
    calls: Arc<Mutex<Vec<Duration>>>,
}

impl TrackingSleeper {
    pub fn new() -> Self {
        Self { calls: Arc::new(Mutex::new(Vec::new())) }
    }

    /// Number of recorded sleeps.
    pub fn calls(&self) -> usize {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Duration of the `idx`-th recorded sleep.
    pub fn call_at(&self, idx: usize) -> Option<Duration> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).get(idx).copied()
    }

    pub fn clear(&self) {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }

    fn record(&self, duration: Duration) {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).push(duration);
    }
}

impl Default for TrackingSleeper {
    fn default() -> Self {
        Self::new()
    }
}

impl Sleeper for TrackingSleeper {
    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send>> {
        self.record(duration);
        Box::pin(async {})
    }
}

impl BlockingSleeper for TrackingSleeper {
    fn sleep_blocking(&self, duration: Duration) -> Result<(), Interrupted> {
        self.record(duration);
        Ok(())
    }
}
