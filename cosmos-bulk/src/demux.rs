//! Splits a batch response into per-operation results.
//!
//! Outcome `i` of the response belongs to operation `i` of the request body.
//! When the service answers the request as a whole (throttling, a gone range,
//! a server error) without per-operation records, the request-level status is
//! copied to every operation so each one goes through the retry policy.

use cosmos_bulk_codec::decode_batch_response;
use cosmos_bulk_core::{status_codes, sub_status_codes};
use tracing::error;

use crate::error::{BulkError, BulkResult};
use crate::response::OperationResponse;
use crate::transport::BatchResponse;

/// Returns one result per operation, in request order.
///
/// # Errors
/// `Internal` if the response body cannot be decoded.
pub(crate) fn demultiplex(
    response: &BatchResponse,
    operation_count: usize,
) -> BulkResult<Vec<OperationResponse>> {
    let records = if response.body.is_empty() {
        Vec::new()
    } else {
        decode_batch_response(&response.body).map_err(|e| {
            error!(error = %e, status = response.status_code, "Undecodable batch response");
            BulkError::internal(format!("undecodable batch response: {e}"))
        })?
    };

    if records.len() == operation_count {
        return Ok(records
            .into_iter()
            .map(|record| {
                let mut outcome = OperationResponse::from_record(record);
                if outcome.is_throttled() && outcome.retry_after.is_none() {
                    outcome.retry_after = response.retry_after;
                }
                outcome
            })
            .collect());
    }

    if response.is_success() {
        error!(
            expected = operation_count,
            received = records.len(),
            "Batch response outcome count does not match request"
        );
        return Ok(broadcast(
            operation_count,
            &OperationResponse::with_status(
                status_codes::INTERNAL_SERVER_ERROR,
                sub_status_codes::BATCH_RESPONSE_COUNT_MISMATCH,
            ),
        ));
    }

    let mut outcome = OperationResponse::with_status(response.status_code, response.sub_status_code);
    outcome.retry_after = response.retry_after;
    Ok(broadcast(operation_count, &outcome))
}

fn broadcast(count: usize, outcome: &OperationResponse) -> Vec<OperationResponse> {
    vec![outcome.clone(); count]
}
