//! Transport abstraction for batch requests.
//!
//! The executor never speaks the network protocol itself. It hands a framed
//! body plus routing headers to a [`BatchTransport`] and gets back a status
//! line and a framed response body.
//!
//! # Design
//!
//! Production code plugs in an HTTP or direct-connectivity client. Tests use
//! an in-process transport that decodes the request body with
//! `cosmos_bulk_codec` and scripts the outcomes.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use cosmos_bulk_core::{PartitionKey, PartitionKeyRangeId};
use thiserror::Error;

/// Headers sent with every batch request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchHeaders {
    /// Always true; marks the body as a batch.
    pub is_batch_request: bool,
    /// All-or-nothing execution.
    pub is_batch_atomic: bool,
    /// Stop at the first failed operation.
    pub is_batch_ordered: bool,
    /// Range the request is addressed to.
    pub partition_key_range_id: PartitionKeyRangeId,
    /// Logical partition key; set only for transactional batches.
    pub partition_key: Option<PartitionKey>,
}

impl BatchHeaders {
    /// Headers for a non-atomic bulk request to `range_id`.
    #[must_use]
    pub const fn bulk(partition_key_range_id: PartitionKeyRangeId) -> Self {
        Self {
            is_batch_request: true,
            is_batch_atomic: false,
            is_batch_ordered: false,
            partition_key_range_id,
            partition_key: None,
        }
    }
}

/// A batch request ready to be sent.
#[derive(Debug, Clone)]
pub struct BatchRequest {
    /// Routing and execution headers.
    pub headers: BatchHeaders,
    /// Framed request body.
    pub body: Bytes,
    /// Number of operation records in `body`.
    pub operation_count: usize,
}

/// The service's answer to a batch request.
#[derive(Debug, Clone)]
pub struct BatchResponse {
    /// Status of the request as a whole.
    pub status_code: i32,
    /// Sub-status of the request as a whole.
    pub sub_status_code: i32,
    /// Backoff hint for a throttled request.
    pub retry_after: Option<Duration>,
    /// Request units consumed by the whole batch.
    pub request_charge: f64,
    /// Framed response body. May be empty for a request-level failure.
    pub body: Bytes,
}

impl BatchResponse {
    /// Creates a response with the given status and body.
    #[must_use]
    pub const fn new(status_code: i32, sub_status_code: i32, body: Bytes) -> Self {
        Self {
            status_code,
            sub_status_code,
            retry_after: None,
            request_charge: 0.0,
            body,
        }
    }

    /// Sets the retry-after hint.
    #[must_use]
    pub const fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after = Some(retry_after);
        self
    }

    /// Returns true for a 2xx status.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.status_code >= 200 && self.status_code < 300
    }
}

/// Errors from the transport layer.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// The connection could not be established or was lost.
    #[error("connection failed: {message}")]
    Connection {
        /// Error description.
        message: String,
    },
    /// The request was rejected before a response was produced.
    #[error("request failed: {message}")]
    Request {
        /// Error description.
        message: String,
    },
    /// The transport has been closed.
    #[error("transport closed")]
    Closed,
}

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

/// Sends batch requests to the service.
///
/// Implementations must be `Send + Sync`; one transport is shared by every
/// range's dispatch tasks.
#[async_trait]
pub trait BatchTransport: Send + Sync + 'static {
    /// Sends one batch request and returns the service's response.
    ///
    /// A response with a failure status is still `Ok`; `Err` means no usable
    /// response was received.
    ///
    /// # Errors
    ///
    /// Returns an error if the request could not be delivered.
    async fn send(&self, request: BatchRequest) -> TransportResult<BatchResponse>;
}
