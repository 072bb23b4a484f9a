//! Attempt bookkeeping for the one-shot policy mode.
//!
//! Callers that drive their own retry loop can own an [`AttemptCounter`] and pass it to
//! [`RetryPolicy::apply_policy_with`](crate::RetryPolicy::apply_policy_with). The plain
//! [`RetryPolicy::apply_policy`](crate::RetryPolicy::apply_policy) keeps one counter per
//! (policy, thread) pair in thread-local storage instead, so concurrent flows on different
//! threads never share a count and no locking is needed.

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// Retries granted so far in one synchronous retry sequence.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct AttemptCounter {
    retries: usize,
}

impl AttemptCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Retries granted since the last reset.
    pub fn retries(&self) -> usize {
        self.retries
    }

    /// Attempts made so far, counting the initial one.
    pub fn attempts(&self) -> usize {
        self.retries.saturating_add(1)
    }

    pub fn reset(&mut self) {
        self.retries = 0;
    }

    pub(crate) fn increment(&mut self) {
        self.retries = self.retries.saturating_add(1);
    }
}

/// Identity shared by a policy and its clones.
///
/// Thread-local counters hold it weakly. Dropping the last clone clears the counter on the
/// dropping thread; counters other threads kept for it are pruned on their next store.
#[derive(Debug)]
pub(crate) struct PolicyKey {
    id: u64,
}

impl PolicyKey {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self { id: NEXT_POLICY_ID.fetch_add(1, Ordering::Relaxed) })
    }
}

impl Drop for PolicyKey {
    fn drop(&mut self) {
        // the thread-local map may already be gone during thread teardown
        let _ = COUNTERS.try_with(|counters| {
            if let Ok(mut counters) = counters.try_borrow_mut() {
                counters.remove(&self.id);
            }
        });
    }
}

struct Slot {
    owner: Weak<PolicyKey>,
    counter: AttemptCounter,
}

thread_local! {
    static COUNTERS: RefCell<HashMap<u64, Slot>> = RefCell::new(HashMap::new());
}

static NEXT_POLICY_ID: AtomicU64 = AtomicU64::new(1);

/// Copy of this thread's counter for `key` (zero if never touched).
pub(crate) fn load(key: &PolicyKey) -> AttemptCounter {
    COUNTERS.with(|counters| {
        counters.borrow().get(&key.id).map(|slot| slot.counter.clone()).unwrap_or_default()
    })
}

/// Save this thread's counter for `key`. Zero counts are not kept.
pub(crate) fn store(key: &Arc<PolicyKey>, counter: AttemptCounter) {
    COUNTERS.with(|counters| {
        let mut counters = counters.borrow_mut();
        counters.retain(|_, slot| slot.owner.strong_count() > 0);
        if counter == AttemptCounter::default() {
            counters.remove(&key.id);
        } else {
            counters.insert(key.id, Slot { owner: Arc::downgrade(key), counter });
        }
    });
}

pub(crate) fn reset(key: &PolicyKey) {
    COUNTERS.with(|counters| {
        counters.borrow_mut().remove(&key.id);
    });
}

/// Number of policies with a counter on this thread.
#[cfg(test)]
pub(crate) fn tracked() -> usize {
    COUNTERS.with(|counters| counters.borrow().len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_tracks_attempts_and_resets() {
        let mut counter = AttemptCounter::new();
        assert_eq!(counter.attempts(), 1);
        counter.increment();
        counter.increment();
        assert_eq!(counter.retries(), 2);
        assert_eq!(counter.attempts(), 3);
        counter.reset();
        assert_eq!(counter, AttemptCounter::new());
    }

    #[test]
    fn thread_counters_are_per_policy() {
        let a = PolicyKey::new();
        let b = PolicyKey::new();
        let mut counter = load(&a);
        counter.increment();
        store(&a, counter);

        assert_eq!(load(&a).retries(), 1);
        assert_eq!(load(&b).retries(), 0);

        reset(&a);
        assert_eq!(load(&a).retries(), 0);
    }

    #[test]
    fn thread_counters_are_per_thread() {
        let key = PolicyKey::new();
        let mut counter = load(&key);
        counter.increment();
        store(&key, counter);

        let remote = {
            let key = key.clone();
            std::thread::spawn(move || load(&key).retries()).join().unwrap()
        };
        assert_eq!(remote, 0);
        assert_eq!(load(&key).retries(), 1);
    }

    #[test]
    fn zero_counts_are_not_kept() {
        let key = PolicyKey::new();
        store(&key, AttemptCounter::new());
        assert_eq!(tracked(), 0);
    }

    #[test]
    fn dropping_the_last_key_clears_its_counter() {
        let key = PolicyKey::new();
        let clone = key.clone();
        let mut counter = AttemptCounter::new();
        counter.increment();
        store(&key, counter);

        drop(key);
        assert_eq!(tracked(), 1, "a live clone keeps the counter");
        drop(clone);
        assert_eq!(tracked(), 0);
    }

    #[test]
    fn counters_of_keys_dropped_elsewhere_are_pruned() {
        let stale = PolicyKey::new();
        let mut counter = AttemptCounter::new();
        counter.increment();
        store(&stale, counter.clone());

        std::thread::spawn(move || drop(stale)).join().unwrap();
        assert_eq!(tracked(), 1, "the other thread cannot reach this map");

        let live = PolicyKey::new();
        store(&live, counter);
        assert_eq!(tracked(), 1);
        assert_eq!(load(&live).retries(), 1);
    }
}
