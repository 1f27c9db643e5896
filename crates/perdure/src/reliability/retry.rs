//! Workflow-level retry policy

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for the workflow retry loop
///
/// Each workflow attempt re-invokes the whole handler; completed steps are
/// memoized in the store, so a retry picks up where the prior attempt left
/// off rather than redoing work.
///
/// # Example
///
/// ```
/// use perdure::RetryPolicy;
/// use std::time::Duration;
///
/// let policy = RetryPolicy::exponential()
///     .with_max_attempts(5)
///     .with_backoff(Duration::from_millis(500));
///
/// // First retry after 500ms, second after 1s, third after 2s, ...
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the initial one)
    pub max_attempts: u32,

    /// Base delay between attempts
    #[serde(with = "duration_millis")]
    pub backoff: Duration,

    /// Whether the delay doubles after each failed attempt
    pub exponential: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::exponential()
    }
}

impl RetryPolicy {
    /// Exponential backoff with the engine defaults
    ///
    /// - 3 max attempts
    /// - 1 second base backoff
    /// - doubling delay
    pub fn exponential() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_millis(1000),
            exponential: true,
        }
    }

    /// Fixed delay between attempts (no backoff growth)
    pub fn fixed(backoff: Duration, max_attempts: u32) -> Self {
        Self {
            max_attempts,
            backoff,
            exponential: false,
        }
    }

    /// A policy that never retries
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            backoff: Duration::ZERO,
            exponential: false,
        }
    }

    /// Set the maximum number of attempts
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Set the base backoff delay
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    /// Enable or disable exponential growth
    pub fn with_exponential(mut self, exponential: bool) -> Self {
        self.exponential = exponential;
        self
    }

    /// Delay to wait after a failed attempt (1-based)
    ///
    /// `backoff * 2^(attempt-1)` when exponential, `backoff` otherwise.
    pub fn delay_after_attempt(&self, attempt: u32) -> Duration {
        if self.exponential {
            let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
            self.backoff.saturating_mul(factor)
        } else {
            self.backoff
        }
    }

    /// Check if there are remaining attempts after the given one
    pub fn has_attempts_remaining(&self, current_attempt: u32) -> bool {
        current_attempt < self.max_attempts
    }
}

/// Serde support for Duration as milliseconds
mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
