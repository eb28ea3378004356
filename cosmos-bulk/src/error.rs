//! Bulk executor error types.
//!
//! Errors are `Clone` because a build or transport failure is delivered to
//! every operation of the affected batch. Per-operation failures reported by
//! the service are not errors here: they arrive as an
//! [`OperationResponse`](crate::OperationResponse) with a non-success status.

use cosmos_bulk_core::{BatchId, PartitionKeyRangeId};
use cosmos_bulk_routing::RoutingError;

/// Bulk executor error type.
#[derive(Debug, Clone, thiserror::Error)]
pub enum BulkError {
    /// Unsupported option combination or invalid limit. Never retried.
    #[error("configuration error: {message}")]
    Configuration {
        /// Error message.
        message: String,
    },

    /// An item could not be converted to or from bytes.
    #[error("serialization error: {message}")]
    Serialization {
        /// Error message.
        message: String,
    },

    /// The batch request body could not be assembled.
    #[error("failed to build batch request: {message}")]
    Build {
        /// Error message.
        message: String,
    },

    /// The transport failed to deliver the request or return a response.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
    },

    /// The batch request did not complete within the request timeout.
    #[error("batch request to range {range_id} timed out after {timeout_ms}ms")]
    Timeout {
        /// The range the request was sent to.
        range_id: PartitionKeyRangeId,
        /// The timeout that elapsed.
        timeout_ms: u64,
    },

    /// The partition key range could not be resolved.
    #[error("routing error: {0}")]
    Routing(#[from] RoutingError),

    /// The operation was cancelled by its caller.
    #[error("operation cancelled")]
    Cancelled,

    /// The service violated the batch protocol, or an internal invariant broke.
    #[error("internal error: {message}")]
    Internal {
        /// Error message.
        message: String,
    },

    /// A batcher tried to complete an operation it does not own.
    #[error("operation completed by {actual} but owned by {expected:?}")]
    WrongBatcher {
        /// The batcher that owns the operation, if any.
        expected: Option<BatchId>,
        /// The batcher that attempted the completion.
        actual: BatchId,
    },

    /// The operation is not permitted in the current state.
    #[error("invalid state: {message}")]
    InvalidState {
        /// Error message.
        message: String,
    },

    /// The executor has been shut down.
    #[error("bulk executor is shut down")]
    Shutdown,
}

impl BulkError {
    /// Convenience constructor for configuration errors.
    pub(crate) fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Convenience constructor for internal errors.
    pub(crate) fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

impl From<cosmos_bulk_core::Error> for BulkError {
    fn from(err: cosmos_bulk_core::Error) -> Self {
        Self::Configuration {
            message: err.to_string(),
        }
    }
}

/// Result type for bulk operations.
pub type BulkResult<T> = Result<T, BulkError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_core_error_becomes_configuration() {
        let err: BulkError = cosmos_bulk_core::Error::InvalidArgument {
            name: "max_operation_count",
            reason: "must be positive",
        }
        .into();
        assert!(matches!(err, BulkError::Configuration { .. }));
        assert!(err.to_string().contains("max_operation_count"));
    }

    #[test]
    fn test_wrong_batcher_display() {
        let err = BulkError::WrongBatcher {
            expected: Some(BatchId::new(1)),
            actual: BatchId::new(2),
        };
        assert_eq!(
            err.to_string(),
            "operation completed by batch-2 but owned by Some(batch(1))"
        );
    }
}
