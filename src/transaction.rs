//! Transaction awareness.
//!
//! Transaction managers bind transactions to threads. A retry that runs while a transaction
//! is active on the current thread has to stay on that thread, so the dispatch decision asks a
//! [`TransactionContext`] before handing an attempt to a pool.
//!
//! [`ThreadBoundTransactions`] is the built-in context: it reports the transactions opened on
//! the calling thread through [`begin`]. Hosts with their own transaction manager implement the
//! trait over it instead.

use std::cell::Cell;
use std::marker::PhantomData;
use std::sync::{Arc, OnceLock};

/// Query for "is a transaction bound to the calling thread". Must be side-effect free.
pub trait TransactionContext: Send + Sync {
    fn is_transaction_active(&self) -> bool;
}

/// Context for environments without transactions.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoTransactions;

impl TransactionContext for NoTransactions {
    fn is_transaction_active(&self) -> bool {
        false
    }
}

/// Context backed by the thread-local registry maintained by [`begin`].
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadBoundTransactions;

impl TransactionContext for ThreadBoundTransactions {
    fn is_transaction_active(&self) -> bool {
        is_active_on_current_thread()
    }
}

thread_local! {
    static DEPTH: Cell<usize> = const { Cell::new(0) };
}

/// Bind a transaction to the current thread until the returned guard is dropped.
///
/// Nested calls are counted; the thread stays transactional until every guard is gone.
pub fn begin() -> TransactionGuard {
    DEPTH.with(|depth| depth.set(depth.get() + 1));
    TransactionGuard { _thread_bound: PhantomData }
}

/// Whether a transaction opened with [`begin`] is active on this thread.
pub fn is_active_on_current_thread() -> bool {
    DEPTH.with(|depth| depth.get() > 0)
}

/// Keeps a transaction bound to the thread that created it.
#[derive(Debug)]
#[must_use = "the transaction ends when the guard is dropped"]
pub struct TransactionGuard {
    // not Send: the guard must be dropped on the thread it was created on
    _thread_bound: PhantomData<*const ()>,
}

impl Drop for TransactionGuard {
    fn drop(&mut self) {
        DEPTH.with(|depth| depth.set(depth.get().saturating_sub(1)));
    }
}

/// Lazily evaluated transaction check, computed at most once.
///
/// One instance backs one dispatch decision: the lookup runs on whichever thread first asks,
/// and every later question about the same attempt gets the same answer.
pub struct LazyTransactionCheck {
    context: Arc<dyn TransactionContext>,
    active: OnceLock<bool>,
}

impl LazyTransactionCheck {
    pub fn new(context: Arc<dyn TransactionContext>) -> Self {
        Self { context, active: OnceLock::new() }
    }

    pub fn is_active(&self) -> bool {
        *self.active.get_or_init(|| self.context.is_transaction_active())
    }
}

impl std::fmt::Debug for LazyTransactionCheck {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LazyTransactionCheck")
            .field("context", &"<transaction context>")
            .field("active", &self.active.get())
            .finish()
    }
}
