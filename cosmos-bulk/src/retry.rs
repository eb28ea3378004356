//! Per-operation retry policy.
//!
//! After a batch response is demultiplexed, each operation's outcome goes
//! through a [`RetryPolicy`]. Range-gone outcomes are retried against a
//! refreshed routing map; throttled outcomes are retried after a backoff.
//! Everything else completes the operation.

use std::time::Duration;

use cosmos_bulk_core::OutcomeCategory;
use rand::Rng;

use crate::error::{BulkError, BulkResult};
use crate::response::OperationResponse;

/// Ceiling for computed throttle backoff when the service gives no hint.
const BACKOFF_CAP: Duration = Duration::from_secs(1);

/// What to do with an operation after its outcome arrived.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Deliver the outcome to the caller.
    Complete,
    /// Re-resolve the operation's range with a forced refresh and resubmit.
    RetryAfterRefresh,
    /// Resubmit to the same range after the delay.
    RetryAfter(Duration),
}

/// Retry bookkeeping carried by each in-flight operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryState {
    /// Range-gone retries taken so far.
    pub range_gone_attempts: u32,
    /// Throttle retries taken so far.
    pub throttle_attempts: u32,
    /// Total time spent waiting on throttle backoff.
    pub throttle_wait: Duration,
}

impl RetryState {
    /// Records that `decision` is being acted on.
    pub fn record(&mut self, decision: RetryDecision) {
        match decision {
            RetryDecision::Complete => {}
            RetryDecision::RetryAfterRefresh => self.range_gone_attempts += 1,
            RetryDecision::RetryAfter(delay) => {
                self.throttle_attempts += 1;
                self.throttle_wait = self.throttle_wait.saturating_add(delay);
            }
        }
    }
}

/// Decides whether an operation outcome is retried.
pub trait RetryPolicy: Send + Sync + 'static {
    /// Returns the decision for `response` given the attempts so far.
    fn should_retry(&self, response: &OperationResponse, state: &RetryState) -> RetryDecision;
}

/// Settings for [`DefaultRetryPolicy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicyConfig {
    /// Maximum range-gone retries per operation. Default: 10.
    pub max_range_gone_retries: u32,
    /// Maximum throttle retries per operation. Default: 9.
    pub max_throttle_retries: u32,
    /// Maximum cumulative throttle wait per operation. Default: 30s.
    pub max_throttle_wait: Duration,
    /// Initial backoff when a throttled outcome has no retry-after hint.
    pub base_backoff: Duration,
}

impl Default for RetryPolicyConfig {
    fn default() -> Self {
        Self {
            max_range_gone_retries: 10,
            max_throttle_retries: 9,
            max_throttle_wait: Duration::from_secs(30),
            base_backoff: Duration::from_millis(5),
        }
    }
}

impl RetryPolicyConfig {
    /// Creates settings with short waits for tests.
    #[must_use]
    pub const fn for_testing() -> Self {
        Self {
            max_range_gone_retries: 5,
            max_throttle_retries: 3,
            max_throttle_wait: Duration::from_secs(1),
            base_backoff: Duration::from_millis(1),
        }
    }

    /// Validates the settings.
    ///
    /// # Errors
    /// Returns `BulkError::Configuration` if the backoff is zero.
    pub fn validate(&self) -> BulkResult<()> {
        if self.base_backoff.is_zero() {
            return Err(BulkError::configuration("base_backoff must be positive"));
        }
        Ok(())
    }
}

/// Retries range-gone outcomes and throttled outcomes within bounds.
#[derive(Debug, Clone, Default)]
pub struct DefaultRetryPolicy {
    config: RetryPolicyConfig,
}

impl DefaultRetryPolicy {
    /// Creates a policy from its settings.
    #[must_use]
    pub const fn new(config: RetryPolicyConfig) -> Self {
        Self { config }
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let exp = self
            .config
            .base_backoff
            .saturating_mul(1u32 << attempt.min(16))
            .min(BACKOFF_CAP);
        let base_ms = u64::try_from(self.config.base_backoff.as_millis()).unwrap_or(u64::MAX);
        let jitter_ms = rand::thread_rng().gen_range(0..=base_ms);
        exp + Duration::from_millis(jitter_ms)
    }
}

impl RetryPolicy for DefaultRetryPolicy {
    fn should_retry(&self, response: &OperationResponse, state: &RetryState) -> RetryDecision {
        match response.category() {
            OutcomeCategory::Success | OutcomeCategory::TerminalError => RetryDecision::Complete,
            OutcomeCategory::RetriableRangeGone => {
                if state.range_gone_attempts < self.config.max_range_gone_retries {
                    RetryDecision::RetryAfterRefresh
                } else {
                    RetryDecision::Complete
                }
            }
            OutcomeCategory::Throttled => {
                if state.throttle_attempts >= self.config.max_throttle_retries {
                    return RetryDecision::Complete;
                }
                let delay = response
                    .retry_after
                    .unwrap_or_else(|| self.backoff(state.throttle_attempts));
                if state.throttle_wait.saturating_add(delay) > self.config.max_throttle_wait {
                    return RetryDecision::Complete;
                }
                RetryDecision::RetryAfter(delay)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use cosmos_bulk_core::{status_codes, sub_status_codes};

    use super::*;

    fn throttled(retry_after_ms: u64) -> OperationResponse {
        let mut response = OperationResponse::with_status(status_codes::TOO_MANY_REQUESTS, 3200);
        response.retry_after = Some(Duration::from_millis(retry_after_ms));
        response
    }

    #[test]
    fn test_success_and_terminal_complete() {
        let policy = DefaultRetryPolicy::default();
        let state = RetryState::default();
        for status in [status_codes::CREATED, status_codes::CONFLICT, status_codes::NOT_FOUND] {
            let response = OperationResponse::with_status(status, 0);
            assert_eq!(policy.should_retry(&response, &state), RetryDecision::Complete);
        }
    }

    #[test]
    fn test_range_gone_retries_until_limit() {
        let policy = DefaultRetryPolicy::new(RetryPolicyConfig::for_testing());
        let response = OperationResponse::with_status(
            status_codes::GONE,
            sub_status_codes::COMPLETING_SPLIT,
        );
        let mut state = RetryState::default();

        for _ in 0..5 {
            let decision = policy.should_retry(&response, &state);
            assert_eq!(decision, RetryDecision::RetryAfterRefresh);
            state.record(decision);
        }
        assert_eq!(policy.should_retry(&response, &state), RetryDecision::Complete);
    }

    #[test]
    fn test_throttle_uses_retry_after_hint() {
        let policy = DefaultRetryPolicy::default();
        let decision = policy.should_retry(&throttled(40), &RetryState::default());
        assert_eq!(decision, RetryDecision::RetryAfter(Duration::from_millis(40)));
    }

    #[test]
    fn test_throttle_gives_up_past_max_wait() {
        let policy = DefaultRetryPolicy::new(RetryPolicyConfig::for_testing());
        let state = RetryState {
            throttle_wait: Duration::from_millis(990),
            ..RetryState::default()
        };
        assert_eq!(
            policy.should_retry(&throttled(20), &state),
            RetryDecision::Complete
        );
    }

    #[test]
    fn test_throttle_without_hint_backs_off() {
        let policy = DefaultRetryPolicy::new(RetryPolicyConfig::for_testing());
        let response = OperationResponse::with_status(status_codes::TOO_MANY_REQUESTS, 0);
        match policy.should_retry(&response, &RetryState::default()) {
            RetryDecision::RetryAfter(delay) => assert!(delay >= Duration::from_millis(1)),
            other => panic!("expected backoff, got {other:?}"),
        }
    }

    #[test]
    fn test_record_tracks_attempts() {
        let mut state = RetryState::default();
        state.record(RetryDecision::RetryAfter(Duration::from_millis(10)));
        state.record(RetryDecision::RetryAfterRefresh);
        state.record(RetryDecision::Complete);
        assert_eq!(state.throttle_attempts, 1);
        assert_eq!(state.range_gone_attempts, 1);
        assert_eq!(state.throttle_wait, Duration::from_millis(10));
    }
}
