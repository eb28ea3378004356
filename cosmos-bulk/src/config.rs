//! Executor configuration.

use std::time::Duration;

use cosmos_bulk_core::BatchLimits;

use crate::error::{BulkError, BulkResult};
use crate::retry::RetryPolicyConfig;

/// Environment variable overriding the default dispatch interval (milliseconds).
pub const DISPATCH_INTERVAL_ENV: &str = "COSMOS_BULK_DISPATCH_INTERVAL_MS";

/// Default dispatch timer interval.
const DISPATCH_INTERVAL_DEFAULT: Duration = Duration::from_secs(1);

/// Smallest allowed dispatch timer interval.
const DISPATCH_INTERVAL_MIN: Duration = Duration::from_millis(1);

/// Configuration for a [`ContainerExecutor`](crate::ContainerExecutor).
#[derive(Debug, Clone)]
pub struct BulkConfig {
    /// Size and count bounds for each batch request.
    pub limits: BatchLimits,
    /// How often a partially filled batch is dispatched when traffic is sparse.
    /// Default: 1s, overridable through `COSMOS_BULK_DISPATCH_INTERVAL_MS`.
    pub dispatch_interval: Duration,
    /// Maximum concurrent batch requests per partition key range. Default: 1.
    pub max_concurrent_dispatches_per_range: u32,
    /// Upper bound on each batch request round trip. Default: 65s.
    pub request_timeout: Duration,
    /// Send batches as all-or-nothing. Bulk mode leaves this off.
    pub atomic: bool,
    /// Ask the service to stop at the first failure. Bulk mode leaves this off.
    pub ordered: bool,
    /// Settings for the default retry policy.
    pub retry: RetryPolicyConfig,
}

impl Default for BulkConfig {
    fn default() -> Self {
        let dispatch_interval = std::env::var(DISPATCH_INTERVAL_ENV)
            .ok()
            .and_then(|v| v.parse().ok())
            .map_or(DISPATCH_INTERVAL_DEFAULT, Duration::from_millis);

        Self {
            limits: BatchLimits::default(),
            dispatch_interval,
            max_concurrent_dispatches_per_range: 1,
            request_timeout: Duration::from_secs(65),
            atomic: false,
            ordered: false,
            retry: RetryPolicyConfig::default(),
        }
    }
}

impl BulkConfig {
    /// Creates a configuration with short timers for tests.
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            limits: BatchLimits::default(),
            dispatch_interval: Duration::from_millis(10),
            max_concurrent_dispatches_per_range: 1,
            request_timeout: Duration::from_secs(5),
            atomic: false,
            ordered: false,
            retry: RetryPolicyConfig::for_testing(),
        }
    }

    /// Sets the batch limits.
    #[must_use]
    pub const fn with_limits(mut self, limits: BatchLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Sets the dispatch timer interval.
    #[must_use]
    pub const fn with_dispatch_interval(mut self, interval: Duration) -> Self {
        self.dispatch_interval = interval;
        self
    }

    /// Sets the per-range concurrency bound.
    #[must_use]
    pub const fn with_max_concurrent_dispatches_per_range(mut self, permits: u32) -> Self {
        self.max_concurrent_dispatches_per_range = permits;
        self
    }

    /// Sets the per-request timeout.
    #[must_use]
    pub const fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Sets the default retry policy settings.
    #[must_use]
    pub const fn with_retry(mut self, retry: RetryPolicyConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Validates the configuration.
    ///
    /// # Errors
    /// Returns `BulkError::Configuration` if any setting is out of range.
    pub fn validate(&self) -> BulkResult<()> {
        self.limits.validate()?;

        if self.dispatch_interval < DISPATCH_INTERVAL_MIN {
            return Err(BulkError::configuration(
                "dispatch_interval must be at least 1ms",
            ));
        }

        if self.max_concurrent_dispatches_per_range == 0 {
            return Err(BulkError::configuration(
                "max_concurrent_dispatches_per_range must be positive",
            ));
        }

        if self.request_timeout.is_zero() {
            return Err(BulkError::configuration("request_timeout must be positive"));
        }

        if self.ordered && !self.atomic {
            return Err(BulkError::configuration(
                "ordered execution requires atomic batches",
            ));
        }

        self.retry.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = BulkConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_concurrent_dispatches_per_range, 1);
        assert!(!config.atomic);
    }

    #[test]
    fn test_testing_config_is_valid() {
        assert!(BulkConfig::for_testing().validate().is_ok());
    }

    #[test]
    fn test_zero_dispatch_interval_rejected() {
        let config = BulkConfig::for_testing().with_dispatch_interval(Duration::ZERO);
        assert!(matches!(
            config.validate(),
            Err(BulkError::Configuration { .. })
        ));
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let config = BulkConfig::for_testing().with_max_concurrent_dispatches_per_range(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_limits_rejected() {
        let config = BulkConfig::for_testing().with_limits(BatchLimits::with_bounds(1000, 0));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_ordered_requires_atomic() {
        let config = BulkConfig {
            ordered: true,
            ..BulkConfig::for_testing()
        };
        assert!(config.validate().is_err());
    }
}
