//! Convenient re-exports for common reattempt types.
pub use crate::{
    config::{RetryConfig, RETRY_COUNT_FOREVER},
    error::{BuildError, RetryError, RetryExhaustedError},
    layer::RetryLayer,
    retry::{MaxAttempts, RetryPolicy, RetryPolicyBuilder},
    scheduler::{InlineScheduler, Scheduler, TokioScheduler},
    status::PolicyStatus,
    template::{RetryCallback, RetryContext, RetryTemplate},
    transaction::TransactionContext,
};
