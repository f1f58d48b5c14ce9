//! Reconnect backoff for push channels

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Doubling-with-cap reconnect policy.
///
/// Delay for the n-th consecutive failure (0-based) is
/// `min(max_interval, initial_interval * 2^n)`.
///
/// # Example
///
/// ```
/// use pressluft_stream::BackoffPolicy;
/// use std::time::Duration;
///
/// let policy = BackoffPolicy::default()
///     .with_initial_interval(Duration::from_millis(500))
///     .with_max_interval(Duration::from_secs(10));
///
/// assert_eq!(policy.delay_for_retry(0), Duration::from_millis(500));
/// assert_eq!(policy.delay_for_retry(1), Duration::from_millis(1000));
/// ```
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Delay before the first retry
    #[serde(with = "duration_millis")]
    pub initial_interval: Duration,

    /// Upper bound for any delay
    #[serde(with = "duration_millis")]
    pub max_interval: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_millis(1_000),
            max_interval: Duration::from_millis(30_000),
        }
    }
}

impl BackoffPolicy {
    pub fn new(initial_interval: Duration, max_interval: Duration) -> Self {
        Self {
            initial_interval,
            max_interval,
        }
    }

    /// Set the delay before the first retry
    pub fn with_initial_interval(mut self, interval: Duration) -> Self {
        self.initial_interval = interval;
        self
    }

    /// Set the delay cap
    pub fn with_max_interval(mut self, interval: Duration) -> Self {
        self.max_interval = interval;
        self
    }

    /// Delay for a 0-based retry number
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        let shift = retry.min(31);
        let base_ms = self.initial_interval.as_millis() as u64;
        let calculated = base_ms.saturating_mul(1_u64 << shift);
        let capped = calculated.min(self.max_interval.as_millis() as u64);
        Duration::from_millis(capped)
    }
}

/// Stateful backoff controller owned by one session.
///
/// `next_delay` consumes a retry slot; `reset` is called after any
/// successfully processed event so a flapping connection never accumulates
/// an ever-growing delay.
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: BackoffPolicy,
    retry_count: u32,
}

impl Backoff {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            policy,
            retry_count: 0,
        }
    }

    /// Delay before the next reconnect attempt
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.policy.delay_for_retry(self.retry_count);
        self.retry_count = self.retry_count.saturating_add(1);
        delay
    }

    pub fn reset(&mut self) {
        self.retry_count = 0;
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn policy(&self) -> &BackoffPolicy {
        &self.policy
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(BackoffPolicy::default())
    }
}

/// Serde support for Duration as milliseconds
pub(crate) mod duration_millis {
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
