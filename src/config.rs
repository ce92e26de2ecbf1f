//! Pool and retry configuration

use std::time::Duration;

use crate::errors::{ErrorClass, OperationError, PoolError, PoolResult};

/// Configuration for pool sizing, acquisition and maintenance
///
/// # Examples
///
/// ```
/// use docpool::PoolConfiguration;
/// use std::time::Duration;
///
/// let config = PoolConfiguration::new()
///     .with_capacity(4)
///     .with_max_wait_time(Duration::from_secs(2))
///     .with_max_age(Duration::from_secs(600));
///
/// assert_eq!(config.capacity, 4);
/// assert_eq!(config.connection_timeout, Duration::from_secs(30));
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct PoolConfiguration {
    /// Number of handles in the pool (constant for its lifetime)
    pub capacity: usize,

    /// Idle time after which a handle is refreshed before being handed out
    pub connection_timeout: Duration,

    /// Upper bound on waiting for a free handle
    pub max_wait_time: Duration,

    /// Upper bound on a single `connect` or `probe` call to the store
    pub connect_timeout: Duration,

    /// Re-scan interval while waiting
    pub poll_interval: Duration,

    /// Error count that triggers an immediate refresh
    pub refresh_threshold: u32,

    /// Error count at which a handle is skipped while waiting under contention
    pub unusable_threshold: u32,

    /// Minimum time between two real health audits
    pub health_check_interval: Duration,

    /// Fraction of healthy handles required for the pool to count as healthy
    pub min_healthy_ratio: f64,

    /// Age after which the sweeper recycles an idle handle
    pub max_age: Duration,

    /// Error count above which the sweeper recycles an idle handle
    pub hard_error_limit: u32,
}

impl Default for PoolConfiguration {
    fn default() -> Self {
        Self {
            capacity: 10,
            connection_timeout: Duration::from_secs(30),
            max_wait_time: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(10),
            poll_interval: Duration::from_millis(100),
            refresh_threshold: 3,
            unusable_threshold: 5,
            health_check_interval: Duration::from_secs(300),
            min_healthy_ratio: 0.5,
            max_age: Duration::from_secs(3600),
            hard_error_limit: 5,
        }
    }
}

impl PoolConfiguration {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of handles
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Set the idle time after which a handle is refreshed before use
    pub fn with_connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    /// Set how long `acquire` waits under contention
    pub fn with_max_wait_time(mut self, wait: Duration) -> Self {
        self.max_wait_time = wait;
        self
    }

    /// Set the bound on a single store `connect` or `probe`
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the re-scan interval while waiting
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the refresh and unusable error thresholds
    pub fn with_error_thresholds(mut self, refresh: u32, unusable: u32) -> Self {
        self.refresh_threshold = refresh;
        self.unusable_threshold = unusable;
        self
    }

    /// Set the minimum time between two real health audits
    pub fn with_health_check_interval(mut self, interval: Duration) -> Self {
        self.health_check_interval = interval;
        self
    }

    /// Set the healthy fraction the pool must reach
    pub fn with_min_healthy_ratio(mut self, ratio: f64) -> Self {
        self.min_healthy_ratio = ratio;
        self
    }

    /// Set the age after which the sweeper recycles a handle
    pub fn with_max_age(mut self, age: Duration) -> Self {
        self.max_age = age;
        self
    }

    /// Set the error count above which the sweeper recycles a handle
    pub fn with_hard_error_limit(mut self, limit: u32) -> Self {
        self.hard_error_limit = limit;
        self
    }

    /// Reject configurations the pool cannot operate with
    pub fn validate(&self) -> PoolResult<()> {
        if self.capacity == 0 {
            return Err(PoolError::InvalidConfiguration(
                "capacity must be greater than 0".into(),
            ));
        }
        if self.poll_interval.is_zero() {
            return Err(PoolError::InvalidConfiguration(
                "poll_interval must be greater than zero".into(),
            ));
        }
        if self.connect_timeout.is_zero() {
            return Err(PoolError::InvalidConfiguration(
                "connect_timeout must be greater than zero".into(),
            ));
        }
        if self.refresh_threshold == 0 {
            return Err(PoolError::InvalidConfiguration(
                "refresh_threshold must be greater than 0".into(),
            ));
        }
        if self.unusable_threshold < self.refresh_threshold {
            return Err(PoolError::InvalidConfiguration(format!(
                "unusable_threshold ({}) must not be below refresh_threshold ({})",
                self.unusable_threshold, self.refresh_threshold
            )));
        }
        if !(0.0..=1.0).contains(&self.min_healthy_ratio) {
            return Err(PoolError::InvalidConfiguration(format!(
                "min_healthy_ratio ({}) must be within 0.0..=1.0",
                self.min_healthy_ratio
            )));
        }
        Ok(())
    }
}

/// Retry behaviour of the [`RetryExecutor`](crate::RetryExecutor)
///
/// # Examples
///
/// ```
/// use docpool::{ErrorClass, OperationError, RetryPolicy};
/// use std::time::Duration;
///
/// let policy = RetryPolicy::default();
/// assert_eq!(policy.backoff_for(1), Duration::from_millis(500));
/// assert_eq!(policy.backoff_for(2), Duration::from_secs(1));
/// assert_eq!(
///     policy.classify(&OperationError::status(403, "forbidden")),
///     ErrorClass::NonRetryable
/// );
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,

    /// Delay before the second attempt; doubles for each further one
    pub base_backoff: Duration,

    /// Store status codes that stop retrying immediately
    pub non_retryable_statuses: Vec<u16>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff: Duration::from_millis(500),
            non_retryable_statuses: vec![401, 403, 404],
        }
    }
}

impl RetryPolicy {
    /// Create a policy with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the total number of attempts
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Set the delay before the second attempt
    pub fn with_base_backoff(mut self, backoff: Duration) -> Self {
        self.base_backoff = backoff;
        self
    }

    /// Replace the status codes that stop retrying
    pub fn with_non_retryable_statuses(mut self, statuses: impl IntoIterator<Item = u16>) -> Self {
        self.non_retryable_statuses = statuses.into_iter().collect();
        self
    }

    /// Delay slept after a failed `attempt` (1-based) before the next one
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base_backoff.saturating_mul(1u32 << exponent)
    }

    /// Classify an operation failure for retrying
    pub fn classify(&self, error: &OperationError) -> ErrorClass {
        match error {
            OperationError::Remote {
                status: Some(status),
                ..
            } if self.non_retryable_statuses.contains(status) => ErrorClass::NonRetryable,
            OperationError::Remote { .. } => ErrorClass::Retryable,
            OperationError::Unexpected(_) => ErrorClass::Unexpected,
        }
    }

    /// Reject policies that would never attempt anything
    pub fn validate(&self) -> PoolResult<()> {
        if self.max_attempts == 0 {
            return Err(PoolError::InvalidConfiguration(
                "max_attempts must be at least 1".into(),
            ));
        }
        Ok(())
    }
}
