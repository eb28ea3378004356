//! Status codes and outcome classification.
//!
//! Per-operation outcomes carry an HTTP-style status code and a service
//! sub-status code. Retry decisions only care about four categories, so the
//! pair is classified once into an [`OutcomeCategory`].

/// HTTP-style status codes relevant to batch execution.
pub mod status_codes {
    /// 200 OK.
    pub const OK: i32 = 200;
    /// 201 Created.
    pub const CREATED: i32 = 201;
    /// 204 No Content.
    pub const NO_CONTENT: i32 = 204;
    /// 207 Multi-Status, returned for a batch with per-operation failures.
    pub const MULTI_STATUS: i32 = 207;
    /// 304 Not Modified.
    pub const NOT_MODIFIED: i32 = 304;
    /// 400 Bad Request.
    pub const BAD_REQUEST: i32 = 400;
    /// 404 Not Found.
    pub const NOT_FOUND: i32 = 404;
    /// 408 Request Timeout.
    pub const REQUEST_TIMEOUT: i32 = 408;
    /// 409 Conflict.
    pub const CONFLICT: i32 = 409;
    /// 410 Gone.
    pub const GONE: i32 = 410;
    /// 412 Precondition Failed.
    pub const PRECONDITION_FAILED: i32 = 412;
    /// 413 Request Entity Too Large.
    pub const REQUEST_ENTITY_TOO_LARGE: i32 = 413;
    /// 424 Failed Dependency, for operations skipped after an atomic failure.
    pub const FAILED_DEPENDENCY: i32 = 424;
    /// 429 Too Many Requests.
    pub const TOO_MANY_REQUESTS: i32 = 429;
    /// 500 Internal Server Error.
    pub const INTERNAL_SERVER_ERROR: i32 = 500;
    /// 503 Service Unavailable.
    pub const SERVICE_UNAVAILABLE: i32 = 503;
}

/// Service sub-status codes relevant to batch execution.
pub mod sub_status_codes {
    /// No sub-status.
    pub const UNKNOWN: i32 = 0;
    /// The name cache is stale; the container must be re-resolved.
    pub const NAME_CACHE_IS_STALE: i32 = 1000;
    /// The partition key range no longer exists (split or merge completed).
    pub const PARTITION_KEY_RANGE_GONE: i32 = 1002;
    /// The partition key range is completing a split.
    pub const COMPLETING_SPLIT: i32 = 1007;
    /// The partition key range is completing a migration.
    pub const COMPLETING_PARTITION_MIGRATION: i32 = 1008;
    /// The response count did not match the request count.
    pub const BATCH_RESPONSE_COUNT_MISMATCH: i32 = 20_001;
    /// The operation was completed by a batcher that does not own it.
    pub const COMPLETED_BY_WRONG_BATCHER: i32 = 20_002;
}

/// Retry-relevant category of a single operation outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutcomeCategory {
    /// 2xx or 304; the operation is complete.
    Success,
    /// The partition key range moved; re-resolve and resubmit.
    RetriableRangeGone,
    /// The request was throttled; resubmit after the retry-after delay.
    Throttled,
    /// An application or service error that is not retried by the pipeline.
    TerminalError,
}

impl OutcomeCategory {
    /// Classifies a status/sub-status pair.
    #[must_use]
    pub const fn classify(status_code: i32, sub_status_code: i32) -> Self {
        if is_success(status_code) {
            return Self::Success;
        }

        match status_code {
            status_codes::TOO_MANY_REQUESTS => Self::Throttled,
            status_codes::GONE => match sub_status_code {
                sub_status_codes::NAME_CACHE_IS_STALE
                | sub_status_codes::PARTITION_KEY_RANGE_GONE
                | sub_status_codes::COMPLETING_SPLIT
                | sub_status_codes::COMPLETING_PARTITION_MIGRATION => Self::RetriableRangeGone,
                _ => Self::TerminalError,
            },
            _ => Self::TerminalError,
        }
    }

    /// Returns true if the pipeline may resubmit an operation in this category.
    #[must_use]
    pub const fn is_retriable(self) -> bool {
        matches!(self, Self::RetriableRangeGone | Self::Throttled)
    }

    /// Returns a short label for logging.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::RetriableRangeGone => "range_gone",
            Self::Throttled => "throttled",
            Self::TerminalError => "terminal_error",
        }
    }
}

/// Returns true for 2xx and 304.
#[must_use]
const fn is_success(status_code: i32) -> bool {
    (status_code >= 200 && status_code < 300) || status_code == status_codes::NOT_MODIFIED
}
