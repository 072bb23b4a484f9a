#![forbid(unsafe_code)]
#![deny(warnings)]
#![cfg_attr(not(test), deny(clippy::all))]

//! # reattempt
//!
//! Retry and reconnection orchestration for connectors: a fixed-delay policy with a bounded
//! or unbounded attempt budget, applied three ways.
//!
//! ## Features
//!
//! - **Future mode**: retry a future-producing supplier, with hooks for each retry and for
//!   exhaustion
//! - **Stream mode**: resubscribe to a fresh stream after each retryable error
//! - **One-shot mode**: one blocking decision per call, for callers with their own loop
//! - **Transaction-aware dispatch**: retries stay on the calling thread while a transaction
//!   is active there and move to a scheduler otherwise
//! - **Templates and notifiers** for synchronous reconnection loops
//! - **Tower integration** via [`RetryLayer`]
//!
//! ## Quick Start
//!
//! ```rust
//! use reattempt::{RetryError, RetryPolicy, TokioScheduler};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() {
//!     let policy = RetryPolicy::builder()
//!         .max_attempts(3)
//!         .delay(Duration::from_millis(50))
//!         .build()
//!         .unwrap();
//!
//!     let result: Result<&str, RetryError<std::io::Error>> = policy
//!         .apply_policy_async(
//!             || async { Ok("connected") },
//!             |_e| true,
//!             |_e| {},
//!             |_mapped| {},
//!             |cause| cause,
//!             Arc::new(TokioScheduler::current()),
//!         )
//!         .await;
//!     assert_eq!(result.unwrap(), "connected");
//! }
//! ```

pub mod config;
pub mod counter;
pub mod dispatch;
pub mod error;
pub mod layer;
pub mod notifier;
pub mod prelude;
pub mod retry;
pub mod scheduler;
pub mod sleeper;
pub mod status;
pub mod stream;
pub mod template;
pub mod transaction;

// Re-exports
pub use config::{RetryConfig, DEFAULT_FREQUENCY, DEFAULT_RETRY_COUNT, RETRY_COUNT_FOREVER};
pub use counter::AttemptCounter;
pub use dispatch::{ConditionalScheduler, Dispatch};
pub use error::{BuildError, RetryError, RetryExhaustedError};
pub use layer::{RetryLayer, RetryService};
pub use notifier::{LogNotifier, MemoryNotifier, Notification, NullNotifier, RetryNotifier};
pub use retry::{MaxAttempts, RetryFuture, RetryPolicy, RetryPolicyBuilder, MIN_DELAY};
pub use scheduler::{InlineScheduler, Scheduler, Task, TokioScheduler};
pub use sleeper::{
    BlockingSleeper, InstantSleeper, Interrupted, InterruptibleSleeper, Sleeper, ThreadSleeper,
    TokioSleeper, TrackingSleeper,
};
pub use status::PolicyStatus;
pub use stream::RetryStream;
pub use template::{RetryCallback, RetryContext, RetryTemplate};
pub use transaction::{
    LazyTransactionCheck, NoTransactions, ThreadBoundTransactions, TransactionContext,
    TransactionGuard,
};
