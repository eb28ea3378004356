//! Batch dispatch - sends one frozen builder and routes each outcome.
//!
//! # Design
//!
//! ```text
//! BatchBuilder ──> Batcher::dispatch ──> gate permit ──> build ──> send ──> demultiplex
//!                                                          │                    │
//!                                                overflow ─┘      per operation ┤
//!                                                    │                          ├─> complete slot
//!                                                    ▼                          └─> resubmit (refresh / delay)
//!                                              retry path
//! ```
//!
//! A dispatch never returns an error: every operation it was handed ends up
//! either completed (with a response or a failure) or resubmitted.

use std::sync::Arc;
use std::time::Duration;

use cosmos_bulk_core::{BatchId, PartitionKeyRangeId};
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, warn};

use crate::builder::BatchBuilder;
use crate::demux::demultiplex;
use crate::error::{BulkError, BulkResult};
use crate::operation::PendingOperation;
use crate::response::OperationResponse;
use crate::retry::{RetryDecision, RetryPolicy};
use crate::stats::BulkStats;
use crate::transport::{BatchHeaders, BatchRequest, BatchTransport};

/// Why a builder was handed to a batcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FlushReason {
    /// The dispatch timer fired.
    Timer,
    /// The builder rejected an operation or reached its count bound.
    Full,
    /// The streamer is closing.
    Close,
}

impl FlushReason {
    pub(crate) const fn as_str(self) -> &'static str {
        match self {
            Self::Timer => "timer",
            Self::Full => "full",
            Self::Close => "close",
        }
    }
}

/// An operation sent back through the executor's retry path.
#[derive(Debug)]
pub(crate) struct Resubmission {
    pub(crate) operation: PendingOperation,
    /// Re-resolve the range with a forced refresh before enqueueing.
    pub(crate) refresh_range: bool,
    /// Wait this long before enqueueing.
    pub(crate) delay: Duration,
}

/// Everything a dispatch for one range needs, shared by all its batchers.
pub(crate) struct DispatchContext {
    pub(crate) range_id: PartitionKeyRangeId,
    pub(crate) transport: Arc<dyn BatchTransport>,
    pub(crate) retry_policy: Arc<dyn RetryPolicy>,
    pub(crate) resubmit: mpsc::UnboundedSender<Resubmission>,
    /// Admission gate bounding concurrent requests to the range.
    pub(crate) gate: Arc<Semaphore>,
    pub(crate) stats: Arc<BulkStats>,
    pub(crate) request_timeout: Duration,
    pub(crate) atomic: bool,
    pub(crate) ordered: bool,
}

impl DispatchContext {
    fn headers(&self) -> BatchHeaders {
        BatchHeaders {
            is_batch_atomic: self.atomic,
            is_batch_ordered: self.ordered,
            ..BatchHeaders::bulk(self.range_id.clone())
        }
    }

    /// Sends `operation` back through the retry path.
    pub(crate) fn resubmit(&self, operation: PendingOperation, refresh_range: bool, delay: Duration) {
        let resubmission = Resubmission {
            operation,
            refresh_range,
            delay,
        };
        if let Err(mpsc::error::SendError(rejected)) = self.resubmit.send(resubmission) {
            rejected.operation.fail(BulkError::Shutdown);
        }
    }
}

/// Dispatches one builder's operations.
pub(crate) struct Batcher {
    builder: BatchBuilder,
    ctx: Arc<DispatchContext>,
}

impl Batcher {
    pub(crate) const fn new(builder: BatchBuilder, ctx: Arc<DispatchContext>) -> Self {
        Self { builder, ctx }
    }

    /// Builds, sends and demultiplexes the batch.
    #[tracing::instrument(
        skip_all,
        name = "batch_dispatch",
        fields(
            batch_id = %self.builder.id(),
            range_id = %self.ctx.range_id,
            reason = reason.as_str(),
            operations = self.builder.len(),
        )
    )]
    pub(crate) async fn dispatch(mut self, reason: FlushReason) {
        let batch_id = self.builder.id();

        let Ok(permit) = Arc::clone(&self.ctx.gate).acquire_owned().await else {
            debug!("Admission gate closed, failing batch");
            let operations = self.builder.take_operations();
            self.fail_all(&operations, &BulkError::Shutdown);
            return;
        };

        let built = match self.builder.build() {
            Ok(built) => built,
            Err(e) => {
                warn!(error = %e, "Failed to build batch request");
                self.ctx.stats.record_batch_failure();
                let operations = self.builder.take_operations();
                self.fail_all(&operations, &e);
                return;
            }
        };

        if !built.overflow.is_empty() {
            debug!(overflow = built.overflow.len(), "Resubmitting overflow operations");
            self.ctx.stats.record_overflow(built.overflow.len());
            for operation in built.overflow {
                self.ctx.resubmit(operation, false, Duration::ZERO);
            }
        }

        let operations = built.operations;
        if operations.is_empty() {
            return;
        }

        self.ctx.stats.record_dispatch(reason, operations.len());
        let request = BatchRequest {
            headers: self.ctx.headers(),
            body: built.body,
            operation_count: operations.len(),
        };

        let sent = tokio::time::timeout(self.ctx.request_timeout, self.ctx.transport.send(request)).await;
        drop(permit);

        let outcomes = match sent {
            Ok(Ok(response)) => demultiplex(&response, operations.len()),
            Ok(Err(e)) => Err(BulkError::Transport {
                message: e.to_string(),
            }),
            Err(_elapsed) => Err(BulkError::Timeout {
                range_id: self.ctx.range_id.clone(),
                timeout_ms: u64::try_from(self.ctx.request_timeout.as_millis())
                    .unwrap_or(u64::MAX),
            }),
        };

        match outcomes {
            Ok(outcomes) => {
                for (operation, outcome) in operations.into_iter().zip(outcomes) {
                    self.route(batch_id, operation, outcome);
                }
            }
            Err(e) => {
                warn!(error = %e, "Batch request failed");
                self.ctx.stats.record_batch_failure();
                self.fail_all(&operations, &e);
            }
        }
    }

    fn route(&self, batch_id: BatchId, mut operation: PendingOperation, outcome: OperationResponse) {
        let decision = self
            .ctx
            .retry_policy
            .should_retry(&outcome, &operation.retry_state);
        operation.retry_state.record(decision);

        match decision {
            RetryDecision::Complete => {
                self.complete(batch_id, &operation, Ok(outcome));
            }
            RetryDecision::RetryAfterRefresh => {
                debug!(
                    index = operation.operation_index,
                    status = outcome.status_code,
                    sub_status = outcome.sub_status_code,
                    "Range moved, resubmitting operation"
                );
                self.ctx.stats.record_range_gone_retry();
                self.ctx.resubmit(operation, true, Duration::ZERO);
            }
            RetryDecision::RetryAfter(delay) => {
                debug!(
                    index = operation.operation_index,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    "Operation throttled, resubmitting after delay"
                );
                self.ctx.stats.record_throttle_retry();
                self.ctx.resubmit(operation, false, delay);
            }
        }
    }

    fn complete(
        &self,
        batch_id: BatchId,
        operation: &PendingOperation,
        result: BulkResult<OperationResponse>,
    ) {
        match operation.complete(batch_id, result) {
            Ok(()) => self.ctx.stats.record_completed(1),
            Err(BulkError::WrongBatcher { .. }) => self.ctx.stats.record_wrong_batcher(),
            Err(e) => warn!(error = %e, index = operation.operation_index, "Completion rejected"),
        }
    }

    fn fail_all(&self, operations: &[PendingOperation], err: &BulkError) {
        let batch_id = self.builder.id();
        for operation in operations {
            self.complete(batch_id, operation, Err(err.clone()));
        }
    }
}
