//! Configuration for eligibility checks, dispatch and the coordinator.

use evlot_sync::{RetryConfig, SyncConfig};
use std::time::Duration;

/// Limits on the location sample recorded at check-in.
#[derive(Debug, Clone, PartialEq)]
pub struct EligibilityConfig {
    /// Oldest a sample may be, relative to the check-in time.
    pub max_sample_age: Duration,
    /// Largest accepted accuracy radius in meters; `None` accepts any.
    pub max_accuracy_m: Option<f64>,
    /// How far a sample may be dated after the check-in time.
    pub max_clock_skew: Duration,
}

impl EligibilityConfig {
    /// Creates a configuration with default values.
    pub fn new() -> Self {
        Self {
            max_sample_age: Duration::from_secs(5 * 60),
            max_accuracy_m: None,
            max_clock_skew: Duration::from_secs(5),
        }
    }

    /// Sets the staleness bound.
    pub fn with_max_sample_age(mut self, age: Duration) -> Self {
        self.max_sample_age = age;
        self
    }

    /// Sets the accuracy bound.
    pub fn with_max_accuracy_m(mut self, meters: f64) -> Self {
        self.max_accuracy_m = Some(meters);
        self
    }

    /// Sets the tolerance for samples dated after check-in.
    pub fn with_max_clock_skew(mut self, skew: Duration) -> Self {
        self.max_clock_skew = skew;
        self
    }
}

impl Default for EligibilityConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration for push delivery.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Retry policy for transient failures.
    pub retry: RetryConfig,
    /// Time allowed for one send attempt.
    pub attempt_timeout: Duration,
}

impl DispatchConfig {
    /// Creates a configuration with default values.
    pub fn new() -> Self {
        Self {
            retry: RetryConfig::new(3),
            attempt_timeout: Duration::from_secs(10),
        }
    }

    /// Sets the retry policy.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the per-attempt timeout.
    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration for a [`LotteryCoordinator`](crate::LotteryCoordinator).
#[derive(Debug, Clone, Default)]
pub struct CoordinatorConfig {
    /// Sync store settings.
    pub sync: SyncConfig,
    /// Eligibility rules.
    pub eligibility: EligibilityConfig,
    /// Push delivery settings.
    pub dispatch: DispatchConfig,
}

impl CoordinatorConfig {
    /// Creates a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the sync store settings.
    pub fn with_sync(mut self, sync: SyncConfig) -> Self {
        self.sync = sync;
        self
    }

    /// Sets the eligibility rules.
    pub fn with_eligibility(mut self, eligibility: EligibilityConfig) -> Self {
        self.eligibility = eligibility;
        self
    }

    /// Sets the push delivery settings.
    pub fn with_dispatch(mut self, dispatch: DispatchConfig) -> Self {
        self.dispatch = dispatch;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = CoordinatorConfig::new();
        assert_eq!(config.eligibility.max_sample_age, Duration::from_secs(300));
        assert_eq!(config.eligibility.max_accuracy_m, None);
        assert_eq!(config.dispatch.retry.max_attempts, 3);
        assert_eq!(config.dispatch.attempt_timeout, Duration::from_secs(10));
    }

    #[test]
    fn builders() {
        let config = CoordinatorConfig::new()
            .with_eligibility(EligibilityConfig::new().with_max_accuracy_m(50.0))
            .with_dispatch(DispatchConfig::new().with_retry(RetryConfig::no_retry()));
        assert_eq!(config.eligibility.max_accuracy_m, Some(50.0));
        assert_eq!(config.dispatch.retry.max_attempts, 1);
    }
}
