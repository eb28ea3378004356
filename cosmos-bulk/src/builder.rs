//! Batch builder - accumulates operations for one range under size and count
//! bounds.
//!
//! Admission uses [`ItemOperation::approximate_size`], which leaves out the
//! record framing. The exact bound is enforced later, in [`BatchBuilder::build`],
//! by the codec's encoder: operations that do not fit come back as overflow
//! and go into a later batch.
//!
//! [`ItemOperation::approximate_size`]: crate::ItemOperation::approximate_size

use bytes::Bytes;
use cosmos_bulk_codec::BatchRequestEncoder;
use cosmos_bulk_core::{BatchId, BatchLimits, PartitionKeyRangeId};
use tracing::debug;

use crate::error::{BulkError, BulkResult};
use crate::operation::PendingOperation;

/// Output of [`BatchBuilder::build`].
#[derive(Debug)]
pub(crate) struct BuiltBatch {
    /// Framed request body.
    pub(crate) body: Bytes,
    /// Operations written into `body`, in body order.
    pub(crate) operations: Vec<PendingOperation>,
    /// Operations that did not fit and must be resubmitted.
    pub(crate) overflow: Vec<PendingOperation>,
}

/// Accumulates operations for one partition key range.
#[derive(Debug)]
pub(crate) struct BatchBuilder {
    id: BatchId,
    range_id: PartitionKeyRangeId,
    limits: BatchLimits,
    operations: Vec<PendingOperation>,
    approximate_bytes: usize,
    dispatched: bool,
}

impl BatchBuilder {
    pub(crate) fn new(id: BatchId, range_id: PartitionKeyRangeId, limits: BatchLimits) -> Self {
        Self {
            id,
            range_id,
            limits,
            operations: Vec::new(),
            approximate_bytes: 0,
            dispatched: false,
        }
    }

    pub(crate) const fn id(&self) -> BatchId {
        self.id
    }

    pub(crate) const fn range_id(&self) -> &PartitionKeyRangeId {
        &self.range_id
    }

    pub(crate) fn len(&self) -> usize {
        self.operations.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub(crate) const fn approximate_bytes(&self) -> usize {
        self.approximate_bytes
    }

    pub(crate) fn is_full(&self) -> bool {
        self.operations.len() >= self.limits.max_operation_count as usize
    }

    /// Adds `operation` if it fits. Hands it back otherwise.
    ///
    /// An empty builder admits any single operation regardless of size.
    pub(crate) fn try_add(
        &mut self,
        mut operation: PendingOperation,
    ) -> Result<(), PendingOperation> {
        if self.dispatched || self.is_full() {
            return Err(operation);
        }

        let size = operation.operation.approximate_size();
        if !self.operations.is_empty()
            && self.approximate_bytes + size > self.limits.max_body_length as usize
        {
            return Err(operation);
        }

        operation.operation_index = self.operations.len();
        if let Some(ctx) = operation.context() {
            ctx.assign_owner(self.id);
        }
        self.approximate_bytes += size;
        self.operations.push(operation);
        Ok(())
    }

    /// Marks the builder dispatched; it accepts nothing afterwards.
    ///
    /// # Errors
    /// `InvalidState` if already dispatched.
    pub(crate) fn freeze(&mut self) -> BulkResult<()> {
        if self.dispatched {
            return Err(BulkError::InvalidState {
                message: format!("{} was already dispatched", self.id),
            });
        }
        self.dispatched = true;
        Ok(())
    }

    /// Freezes the builder and serializes its operations.
    ///
    /// Cancelled operations are completed with `Cancelled` and left out.
    /// On error the operations stay in the builder; use
    /// [`take_operations`](Self::take_operations) to fail them.
    ///
    /// # Errors
    /// `InvalidState` on a second call; `Build` if an operation cannot be
    /// encoded.
    pub(crate) fn build(&mut self) -> BulkResult<BuiltBatch> {
        self.freeze()?;

        let (cancelled, live): (Vec<_>, Vec<_>) = std::mem::take(&mut self.operations)
            .into_iter()
            .partition(PendingOperation::is_cancelled);
        for operation in &cancelled {
            // The slot belongs to this batch, so this cannot be foreign.
            let _ = operation.complete(self.id, Err(BulkError::Cancelled));
        }
        if !cancelled.is_empty() {
            debug!(batch_id = %self.id, cancelled = cancelled.len(), "Dropped cancelled operations");
        }
        self.operations = live;

        let mut encoder = BatchRequestEncoder::new(self.limits.max_body_length);
        for operation in &self.operations {
            let record = operation.operation.to_record()?;
            let written = encoder.push(&record).map_err(|e| BulkError::Build {
                message: e.to_string(),
            })?;
            if !written {
                break;
            }
        }
        let encoded = encoder.finish();

        let overflow = self.operations.split_off(encoded.accepted);
        let mut operations = std::mem::take(&mut self.operations);
        for (index, operation) in operations.iter_mut().enumerate() {
            operation.operation_index = index;
        }
        self.approximate_bytes = 0;

        Ok(BuiltBatch {
            body: encoded.body,
            operations,
            overflow,
        })
    }

    /// Removes and returns every operation still held.
    pub(crate) fn take_operations(&mut self) -> Vec<PendingOperation> {
        self.approximate_bytes = 0;
        std::mem::take(&mut self.operations)
    }
}
