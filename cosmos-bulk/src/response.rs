//! Per-operation results.

use std::time::Duration;

use bytes::Bytes;
use cosmos_bulk_codec::OutcomeRecord;
use cosmos_bulk_core::{status_codes, OutcomeCategory};
use serde::de::DeserializeOwned;

use crate::error::{BulkError, BulkResult};

/// The service's result for one operation of a batch.
///
/// A non-success status is still a response, not a [`BulkError`]; callers
/// inspect [`status_code`](Self::status_code) or [`category`](Self::category).
#[derive(Debug, Clone, PartialEq)]
pub struct OperationResponse {
    /// HTTP-style status code.
    pub status_code: i32,
    /// Service sub-status code.
    pub sub_status_code: i32,
    /// Item etag after the operation.
    pub etag: Option<String>,
    /// Item body returned by the service.
    pub resource_body: Option<Bytes>,
    /// Request units charged for this operation.
    pub request_charge: f64,
    /// Backoff hint for a throttled operation.
    pub retry_after: Option<Duration>,
}

impl OperationResponse {
    /// Creates a response carrying only a status.
    #[must_use]
    pub const fn with_status(status_code: i32, sub_status_code: i32) -> Self {
        Self {
            status_code,
            sub_status_code,
            etag: None,
            resource_body: None,
            request_charge: 0.0,
            retry_after: None,
        }
    }

    /// Converts a decoded response record.
    #[must_use]
    pub fn from_record(record: OutcomeRecord) -> Self {
        let retry_after = (record.retry_after_ms > 0)
            .then(|| Duration::from_millis(u64::from(record.retry_after_ms)));
        Self {
            status_code: record.status_code,
            sub_status_code: record.sub_status_code,
            etag: record.etag,
            resource_body: record.resource_body,
            request_charge: record.request_charge,
            retry_after,
        }
    }

    /// Classifies the outcome.
    #[must_use]
    pub const fn category(&self) -> OutcomeCategory {
        OutcomeCategory::classify(self.status_code, self.sub_status_code)
    }

    /// Returns true if the operation succeeded.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self.category(), OutcomeCategory::Success)
    }

    /// Returns true if the service throttled the operation.
    #[must_use]
    pub const fn is_throttled(&self) -> bool {
        self.status_code == status_codes::TOO_MANY_REQUESTS
    }

    /// Deserializes the returned item body.
    ///
    /// # Errors
    /// Returns `BulkError::Serialization` if there is no body or it does not
    /// match `T`.
    pub fn item_as<T: DeserializeOwned>(&self) -> BulkResult<T> {
        let body = self
            .resource_body
            .as_ref()
            .ok_or_else(|| BulkError::Serialization {
                message: "response has no resource body".to_string(),
            })?;
        serde_json::from_slice(body).map_err(|e| BulkError::Serialization {
            message: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use cosmos_bulk_core::sub_status_codes;
    use serde::Deserialize;

    use super::*;

    #[test]
    fn test_from_record_maps_retry_after() {
        let mut record = OutcomeRecord::with_status(status_codes::TOO_MANY_REQUESTS, 0);
        record.retry_after_ms = 250;
        let response = OperationResponse::from_record(record);
        assert!(response.is_throttled());
        assert_eq!(response.retry_after, Some(Duration::from_millis(250)));

        let ok = OperationResponse::from_record(OutcomeRecord::with_status(201, 0));
        assert!(ok.is_success());
        assert_eq!(ok.retry_after, None);
    }

    #[test]
    fn test_category() {
        let gone = OperationResponse::with_status(
            status_codes::GONE,
            sub_status_codes::PARTITION_KEY_RANGE_GONE,
        );
        assert_eq!(gone.category(), OutcomeCategory::RetriableRangeGone);
        assert!(!gone.is_success());
    }

    #[test]
    fn test_item_as() {
        #[derive(Deserialize)]
        struct Item {
            id: String,
        }

        let mut response = OperationResponse::with_status(status_codes::OK, 0);
        assert!(response.item_as::<Item>().is_err());

        response.resource_body = Some(Bytes::from_static(br#"{"id":"a"}"#));
        assert_eq!(response.item_as::<Item>().unwrap().id, "a");
    }
}
