//! Transactional batches - several operations on one logical partition key,
//! executed all-or-nothing in order.
//!
//! A transactional batch goes out as exactly one request. It is never split,
//! so exceeding the batch limits is a configuration error raised before any
//! network activity.

use std::time::Duration;

use cosmos_bulk_codec::BatchRequestEncoder;
use cosmos_bulk_core::{OutcomeCategory, PartitionKey};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::demux::demultiplex;
use crate::error::{BulkError, BulkResult};
use crate::executor::ContainerExecutor;
use crate::operation::{ItemOperation, ItemRequestOptions};
use crate::response::OperationResponse;
use crate::retry::{RetryDecision, RetryState};
use crate::transport::{BatchHeaders, BatchRequest, BatchResponse};

/// Operations on one logical partition key, executed atomically.
#[derive(Debug, Clone)]
pub struct TransactionalBatch {
    partition_key: PartitionKey,
    operations: Vec<ItemOperation>,
    cancellation: Option<CancellationToken>,
}

impl TransactionalBatch {
    /// Creates an empty batch for `partition_key`.
    #[must_use]
    pub const fn new(partition_key: PartitionKey) -> Self {
        Self {
            partition_key,
            operations: Vec::new(),
            cancellation: None,
        }
    }

    /// Adds a create.
    #[must_use]
    pub fn create_item(self, item: Value) -> Self {
        let op = ItemOperation::create(self.partition_key.clone(), item);
        self.push(op)
    }

    /// Adds an upsert.
    #[must_use]
    pub fn upsert_item(self, item: Value) -> Self {
        let op = ItemOperation::upsert(self.partition_key.clone(), item);
        self.push(op)
    }

    /// Adds a replace.
    #[must_use]
    pub fn replace_item(self, id: impl Into<String>, item: Value) -> Self {
        let op = ItemOperation::replace(self.partition_key.clone(), id, item);
        self.push(op)
    }

    /// Adds a read.
    #[must_use]
    pub fn read_item(self, id: impl Into<String>) -> Self {
        let op = ItemOperation::read(self.partition_key.clone(), id);
        self.push(op)
    }

    /// Adds a delete.
    #[must_use]
    pub fn delete_item(self, id: impl Into<String>) -> Self {
        let op = ItemOperation::delete(self.partition_key.clone(), id);
        self.push(op)
    }

    /// Adds a patch.
    #[must_use]
    pub fn patch_item(self, id: impl Into<String>, patch: Value) -> Self {
        let op = ItemOperation::patch(self.partition_key.clone(), id, patch);
        self.push(op)
    }

    /// Sets options on the most recently added operation.
    #[must_use]
    pub fn with_options(mut self, options: ItemRequestOptions) -> Self {
        if let Some(last) = self.operations.pop() {
            self.operations.push(last.with_options(options));
        }
        self
    }

    /// Attaches a cancellation token for the whole batch.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    /// Returns the partition key.
    #[must_use]
    pub const fn partition_key(&self) -> &PartitionKey {
        &self.partition_key
    }

    /// Returns the number of operations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.operations.len()
    }

    /// Returns true if no operations were added.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    fn push(mut self, op: ItemOperation) -> Self {
        self.operations.push(op);
        self
    }

    fn is_cancelled(&self) -> bool {
        self.cancellation
            .as_ref()
            .is_some_and(CancellationToken::is_cancelled)
    }
}

/// Result of a transactional batch.
#[derive(Debug, Clone)]
pub struct TransactionalBatchResponse {
    /// Status of the batch as a whole.
    pub status_code: i32,
    /// Sub-status of the batch as a whole.
    pub sub_status_code: i32,
    /// Request units consumed by the batch.
    pub request_charge: f64,
    /// Backoff hint if the batch was throttled.
    pub retry_after: Option<Duration>,
    results: Vec<OperationResponse>,
}

impl TransactionalBatchResponse {
    /// Returns true if the batch committed.
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code) && self.results.iter().all(OperationResponse::is_success)
    }

    /// Returns the per-operation results, in batch order.
    #[must_use]
    pub fn results(&self) -> &[OperationResponse] {
        &self.results
    }

    /// Returns the result of operation `index`.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&OperationResponse> {
        self.results.get(index)
    }

    /// Returns the number of results.
    #[must_use]
    pub fn len(&self) -> usize {
        self.results.len()
    }

    /// Returns true if there are no results.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}

impl ContainerExecutor {
    /// Executes `batch` as one atomic, ordered request.
    ///
    /// Range-gone and throttled responses for the whole batch are retried
    /// according to the executor's retry policy.
    ///
    /// # Errors
    /// `Configuration` if the batch is empty, malformed, or exceeds the
    /// batch limits; `Cancelled`, `Routing`, `Transport`, `Timeout`,
    /// `Internal` or `Shutdown` as for bulk operations.
    #[tracing::instrument(skip_all, fields(partition_key = %batch.partition_key, operations = batch.len()))]
    pub async fn execute_transactional_batch(
        &self,
        batch: TransactionalBatch,
    ) -> BulkResult<TransactionalBatchResponse> {
        let inner = &self.inner;
        inner.ensure_running()?;

        if batch.is_empty() {
            return Err(BulkError::configuration("transactional batch has no operations"));
        }
        let limits = inner.config.limits;
        if batch.len() > limits.max_operation_count as usize {
            return Err(BulkError::configuration(format!(
                "transactional batch has {} operations, limit is {}",
                batch.len(),
                limits.max_operation_count
            )));
        }
        if batch.is_cancelled() {
            return Err(BulkError::Cancelled);
        }

        let mut operations = batch.operations.clone();
        for operation in &mut operations {
            operation.validate()?;
            operation.materialize(inner.serializer.as_ref())?;
        }

        let too_large = || {
            BulkError::configuration(format!(
                "transactional batch exceeds max body length of {} bytes",
                limits.max_body_length
            ))
        };
        let mut encoder = BatchRequestEncoder::new(limits.max_body_length);
        for operation in &operations {
            let written = encoder
                .push(&operation.to_record()?)
                .map_err(|e| BulkError::Build {
                    message: e.to_string(),
                })?;
            if !written {
                return Err(too_large());
            }
        }
        // The encoder always admits a first record, even an oversized one.
        let body = encoder.finish().body;
        if body.len() > limits.max_body_length as usize {
            return Err(too_large());
        }
        let count = operations.len();

        let mut range_id = inner.resolve(&operations[0], false).await?;
        let mut retry = RetryState::default();

        loop {
            if batch.is_cancelled() {
                return Err(BulkError::Cancelled);
            }

            let request = BatchRequest {
                headers: BatchHeaders {
                    is_batch_atomic: true,
                    is_batch_ordered: true,
                    partition_key: Some(batch.partition_key.clone()),
                    ..BatchHeaders::bulk(range_id.clone())
                },
                body: body.clone(),
                operation_count: count,
            };

            let gate = inner.gate_for(&range_id).await;
            let permit = gate.acquire_owned().await.map_err(|_| BulkError::Shutdown)?;
            let sent = tokio::time::timeout(
                inner.config.request_timeout,
                inner.transport.send(request),
            )
            .await;
            drop(permit);

            let response = match sent {
                Ok(Ok(response)) => response,
                Ok(Err(e)) => {
                    return Err(BulkError::Transport {
                        message: e.to_string(),
                    })
                }
                Err(_elapsed) => {
                    return Err(BulkError::Timeout {
                        range_id,
                        timeout_ms: u64::try_from(inner.config.request_timeout.as_millis())
                            .unwrap_or(u64::MAX),
                    })
                }
            };

            let mut summary =
                OperationResponse::with_status(response.status_code, response.sub_status_code);
            summary.retry_after = response.retry_after;
            let decision = if summary.category() == OutcomeCategory::Success {
                RetryDecision::Complete
            } else {
                inner.retry_policy.should_retry(&summary, &retry)
            };
            retry.record(decision);

            match decision {
                RetryDecision::Complete => return finish(&response, count),
                RetryDecision::RetryAfterRefresh => {
                    debug!(range_id = %range_id, "Range moved, retrying transactional batch");
                    inner.stats.record_range_gone_retry();
                    range_id = inner.resolve(&operations[0], true).await?;
                }
                RetryDecision::RetryAfter(delay) => {
                    debug!(
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        "Transactional batch throttled"
                    );
                    inner.stats.record_throttle_retry();
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

fn finish(response: &BatchResponse, count: usize) -> BulkResult<TransactionalBatchResponse> {
    let results = demultiplex(response, count)?;
    Ok(TransactionalBatchResponse {
        status_code: response.status_code,
        sub_status_code: response.sub_status_code,
        request_charge: response.request_charge,
        retry_after: response.retry_after,
        results,
    })
}
