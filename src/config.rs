//! Declarative reconnection settings.
//!
//! [`RetryConfig`] is the `{frequency, count}` pair a connector configuration carries. With the
//! `serde` feature it reads from documents such as `{"frequency_ms": 500, "count": 5}`; missing
//! fields fall back to the defaults below.

use crate::error::BuildError;
use crate::retry::RetryPolicy;
use std::time::Duration;

/// Retry count meaning "retry until success".
pub const RETRY_COUNT_FOREVER: i64 = -1;

/// Delay between attempts when none is configured.
pub const DEFAULT_FREQUENCY: Duration = Duration::from_millis(2000);

/// Attempt count when none is configured.
pub const DEFAULT_RETRY_COUNT: i64 = 2;

/// Reconnection frequency and count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct RetryConfig {
    #[cfg_attr(feature = "serde", serde(rename = "frequency_ms", with = "millis"))]
    pub frequency: Duration,
    /// Total attempts, or [`RETRY_COUNT_FOREVER`].
    pub count: i64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self { frequency: DEFAULT_FREQUENCY, count: DEFAULT_RETRY_COUNT }
    }
}

impl RetryConfig {
    pub fn new(frequency: Duration, count: i64) -> Self {
        Self { frequency, count }
    }

    /// Retry every `frequency` until success.
    pub fn forever(frequency: Duration) -> Self {
        Self { frequency, count: RETRY_COUNT_FOREVER }
    }

    pub fn is_forever(&self) -> bool {
        self.count == RETRY_COUNT_FOREVER
    }

    /// Build a policy with default collaborators.
    pub fn into_policy(self) -> Result<RetryPolicy, BuildError> {
        let builder = RetryPolicy::builder().delay(self.frequency);
        let builder = match self.count {
            RETRY_COUNT_FOREVER => builder.forever(),
            count if count > 0 => {
                let attempts =
                    usize::try_from(count).map_err(|_| BuildError::InvalidRetryCount(count))?;
                builder.max_attempts(attempts)
            }
            count => return Err(BuildError::InvalidRetryCount(count)),
        };
        builder.build()
    }
}

impl TryFrom<RetryConfig> for RetryPolicy {
    type Error = BuildError;

    fn try_from(config: RetryConfig) -> Result<Self, Self::Error> {
        config.into_policy()
    }
}

#[cfg(feature = "serde")]
mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub(super) fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
