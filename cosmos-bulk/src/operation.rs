//! Item operations and their result slots.
//!
//! An [`ItemOperation`] is what the caller submits. Once accepted by the
//! executor it travels through the pipeline as a [`PendingOperation`], which
//! adds its resolved range, its position in the current batch, retry
//! bookkeeping, and the [`OperationContext`] the caller's
//! [`OperationFuture`] listens on.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};

use bytes::Bytes;
use cosmos_bulk_codec::OperationRecord;
use cosmos_bulk_core::{
    BatchId, IndexingDirective, OperationType, PartitionKey, PartitionKeyRangeId,
};
use cosmos_bulk_routing::RoutingKey;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::error;

use crate::error::{BulkError, BulkResult};
use crate::response::OperationResponse;
use crate::retry::RetryState;
use crate::serializer::ItemSerializer;

/// Body of an item operation.
#[derive(Debug, Clone, PartialEq)]
pub enum ItemBody {
    /// The operation carries no body (read, delete).
    None,
    /// A document that still has to be serialized.
    Pending(Value),
    /// Serialized document bytes.
    Materialized(Bytes),
}

impl ItemBody {
    /// Returns the serialized length, or zero if not materialized.
    #[must_use]
    pub fn materialized_len(&self) -> usize {
        match self {
            Self::Materialized(bytes) => bytes.len(),
            Self::None | Self::Pending(_) => 0,
        }
    }
}

/// Optional per-operation request settings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ItemRequestOptions {
    /// Apply only if the item's etag matches.
    pub if_match_etag: Option<String>,
    /// Apply only if the item's etag does not match.
    pub if_none_match_etag: Option<String>,
    /// Indexing directive for the written item.
    pub indexing_directive: Option<IndexingDirective>,
    /// Item time-to-live in seconds.
    pub time_to_live_seconds: Option<i32>,
    /// Binary item id.
    pub binary_id: Option<Bytes>,
    /// Pre-computed effective partition key. Mutually exclusive with a
    /// logical partition key.
    pub effective_partition_key: Option<Bytes>,
}

/// One item operation submitted to the executor.
#[derive(Debug, Clone)]
pub struct ItemOperation {
    operation_type: OperationType,
    id: Option<String>,
    partition_key: Option<PartitionKey>,
    body: ItemBody,
    options: ItemRequestOptions,
    cancellation: Option<CancellationToken>,
}

impl ItemOperation {
    fn new(
        operation_type: OperationType,
        partition_key: PartitionKey,
        id: Option<String>,
        body: ItemBody,
    ) -> Self {
        Self {
            operation_type,
            id,
            partition_key: Some(partition_key),
            body,
            options: ItemRequestOptions::default(),
            cancellation: None,
        }
    }

    /// Creates an item. The id is taken from the document's `"id"` field.
    #[must_use]
    pub fn create(partition_key: PartitionKey, item: Value) -> Self {
        let id = document_id(&item);
        Self::new(OperationType::Create, partition_key, id, ItemBody::Pending(item))
    }

    /// Creates or replaces an item. The id is taken from the document's `"id"` field.
    #[must_use]
    pub fn upsert(partition_key: PartitionKey, item: Value) -> Self {
        let id = document_id(&item);
        Self::new(OperationType::Upsert, partition_key, id, ItemBody::Pending(item))
    }

    /// Replaces the item `id`.
    #[must_use]
    pub fn replace(partition_key: PartitionKey, id: impl Into<String>, item: Value) -> Self {
        Self::new(
            OperationType::Replace,
            partition_key,
            Some(id.into()),
            ItemBody::Pending(item),
        )
    }

    /// Reads the item `id`.
    #[must_use]
    pub fn read(partition_key: PartitionKey, id: impl Into<String>) -> Self {
        Self::new(OperationType::Read, partition_key, Some(id.into()), ItemBody::None)
    }

    /// Deletes the item `id`.
    #[must_use]
    pub fn delete(partition_key: PartitionKey, id: impl Into<String>) -> Self {
        Self::new(OperationType::Delete, partition_key, Some(id.into()), ItemBody::None)
    }

    /// Applies a patch document to the item `id`.
    #[must_use]
    pub fn patch(partition_key: PartitionKey, id: impl Into<String>, patch: Value) -> Self {
        Self::new(
            OperationType::Patch,
            partition_key,
            Some(id.into()),
            ItemBody::Pending(patch),
        )
    }

    /// Replaces the request options.
    #[must_use]
    pub fn with_options(mut self, options: ItemRequestOptions) -> Self {
        self.options = options;
        self
    }

    /// Routes by a pre-computed effective partition key instead of the
    /// logical key.
    #[must_use]
    pub fn with_effective_partition_key(mut self, epk: impl Into<Bytes>) -> Self {
        self.options.effective_partition_key = Some(epk.into());
        self.partition_key = None;
        self
    }

    /// Attaches a cancellation token.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    /// Returns the operation kind.
    #[must_use]
    pub const fn operation_type(&self) -> OperationType {
        self.operation_type
    }

    /// Returns the item id, if any.
    #[must_use]
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    /// Returns the logical partition key, if any.
    #[must_use]
    pub const fn partition_key(&self) -> Option<&PartitionKey> {
        self.partition_key.as_ref()
    }

    /// Returns the body.
    #[must_use]
    pub const fn body(&self) -> &ItemBody {
        &self.body
    }

    /// Returns the request options.
    #[must_use]
    pub const fn options(&self) -> &ItemRequestOptions {
        &self.options
    }

    /// Returns true if the caller cancelled the operation.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancellation
            .as_ref()
            .is_some_and(CancellationToken::is_cancelled)
    }

    /// Checks that the operation is well-formed.
    ///
    /// # Errors
    /// Returns `BulkError::Configuration` naming the first problem found.
    pub fn validate(&self) -> BulkResult<()> {
        let op = self.operation_type.as_str();

        if self.operation_type.requires_id() && self.id.as_deref().map_or(true, str::is_empty) {
            return Err(BulkError::configuration(format!("{op} requires an item id")));
        }

        match (&self.body, self.operation_type.has_body()) {
            (ItemBody::None, true) => {
                return Err(BulkError::configuration(format!("{op} requires a body")));
            }
            (ItemBody::Pending(_) | ItemBody::Materialized(_), false) => {
                return Err(BulkError::configuration(format!("{op} does not take a body")));
            }
            _ => {}
        }

        match (&self.partition_key, &self.options.effective_partition_key) {
            (Some(_), Some(_)) => Err(BulkError::configuration(
                "effective partition key cannot be combined with a logical partition key",
            )),
            (None, None) => Err(BulkError::configuration(
                "operation needs a partition key or an effective partition key",
            )),
            (None, Some(epk)) if epk.is_empty() => Err(BulkError::configuration(
                "effective partition key cannot be empty",
            )),
            _ => Ok(()),
        }
    }

    /// Serializes a pending body in place. Already materialized bodies are
    /// left untouched.
    ///
    /// # Errors
    /// Returns `BulkError::Serialization` if the serializer fails.
    pub fn materialize(&mut self, serializer: &dyn ItemSerializer) -> BulkResult<()> {
        if let ItemBody::Pending(item) = &self.body {
            let bytes = serializer.to_bytes(item)?;
            self.body = ItemBody::Materialized(bytes);
        }
        Ok(())
    }

    /// Estimated serialized size, without record framing.
    #[must_use]
    pub fn approximate_size(&self) -> usize {
        let opt_len = |s: Option<&str>| s.map_or(0, str::len);
        let opt_bytes = |b: Option<&Bytes>| b.map_or(0, Bytes::len);

        opt_len(self.id.as_deref())
            + opt_len(self.partition_key.as_ref().map(PartitionKey::as_json))
            + self.body.materialized_len()
            + opt_len(self.options.if_match_etag.as_deref())
            + opt_len(self.options.if_none_match_etag.as_deref())
            + opt_bytes(self.options.binary_id.as_ref())
            + opt_bytes(self.options.effective_partition_key.as_ref())
    }

    /// Returns what this operation is routed by.
    pub(crate) fn routing_key(&self) -> BulkResult<RoutingKey<'_>> {
        if let Some(epk) = &self.options.effective_partition_key {
            return Ok(RoutingKey::Effective(epk));
        }
        self.partition_key
            .as_ref()
            .map(RoutingKey::Logical)
            .ok_or_else(|| BulkError::configuration("operation has no partition key"))
    }

    /// Builds the wire record.
    pub(crate) fn to_record(&self) -> BulkResult<OperationRecord> {
        let resource_body = match &self.body {
            ItemBody::None => None,
            ItemBody::Materialized(bytes) => Some(bytes.clone()),
            ItemBody::Pending(_) => {
                return Err(BulkError::Build {
                    message: format!(
                        "{} body was not materialized",
                        self.operation_type.as_str()
                    ),
                })
            }
        };

        let mut record = OperationRecord::new(self.operation_type);
        record.partition_key = self.partition_key.as_ref().map(|pk| pk.as_json().to_owned());
        record.id.clone_from(&self.id);
        record.resource_body = resource_body;
        record.indexing_directive = self.options.indexing_directive;
        record.if_match.clone_from(&self.options.if_match_etag);
        record.if_none_match.clone_from(&self.options.if_none_match_etag);
        record.binary_id.clone_from(&self.options.binary_id);
        record
            .effective_partition_key
            .clone_from(&self.options.effective_partition_key);
        record.time_to_live_seconds = self.options.time_to_live_seconds;
        Ok(record)
    }
}

fn document_id(item: &Value) -> Option<String> {
    item.get("id").and_then(Value::as_str).map(str::to_owned)
}

// =============================================================================
// Result slot
// =============================================================================

type ResultSender = oneshot::Sender<BulkResult<OperationResponse>>;

#[derive(Debug)]
struct Slot {
    sender: Option<ResultSender>,
    owner: Option<BatchId>,
}

/// Single-assignment result slot shared by the pipeline and the caller.
#[derive(Debug)]
pub(crate) struct OperationContext {
    slot: Mutex<Slot>,
}

impl OperationContext {
    /// Creates a slot and the future that observes it.
    pub(crate) fn new() -> (Arc<Self>, OperationFuture) {
        let (tx, rx) = oneshot::channel();
        let context = Arc::new(Self {
            slot: Mutex::new(Slot {
                sender: Some(tx),
                owner: None,
            }),
        });
        (context, OperationFuture { rx })
    }

    /// Records the batch that now owns the operation.
    pub(crate) fn assign_owner(&self, batch_id: BatchId) {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .owner = Some(batch_id);
    }

    /// Returns the batch that owns the operation.
    #[cfg(test)]
    pub(crate) fn owner(&self) -> Option<BatchId> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner).owner
    }

    /// Returns true once a result has been delivered.
    #[cfg(test)]
    pub(crate) fn is_completed(&self) -> bool {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .sender
            .is_none()
    }

    /// Delivers a result.
    ///
    /// With `by` set, the completion is checked against the owner: a foreign
    /// batch fails the slot with `WrongBatcher` instead of delivering its
    /// result.
    ///
    /// # Errors
    /// `InvalidState` if the slot was already completed; `WrongBatcher` if
    /// `by` does not own the operation.
    pub(crate) fn complete(
        &self,
        by: Option<BatchId>,
        result: BulkResult<OperationResponse>,
    ) -> BulkResult<()> {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        let sender = slot.sender.take().ok_or_else(|| BulkError::InvalidState {
            message: "operation already completed".to_string(),
        })?;

        match by {
            Some(actual) if slot.owner != Some(actual) => {
                let err = BulkError::WrongBatcher {
                    expected: slot.owner,
                    actual,
                };
                error!(
                    expected = ?slot.owner,
                    actual = %actual,
                    "Operation completed by a batch that does not own it"
                );
                // Receiver may be gone; nothing to do then.
                let _ = sender.send(Err(err.clone()));
                Err(err)
            }
            _ => {
                let _ = sender.send(result);
                Ok(())
            }
        }
    }
}

// =============================================================================
// Pending operation
// =============================================================================

/// An accepted operation travelling through the pipeline.
#[derive(Debug)]
pub(crate) struct PendingOperation {
    pub(crate) operation: ItemOperation,
    pub(crate) range_id: PartitionKeyRangeId,
    /// Position within the batch currently holding the operation.
    pub(crate) operation_index: usize,
    pub(crate) retry_state: RetryState,
    context: Option<Arc<OperationContext>>,
}

impl PendingOperation {
    pub(crate) fn new(operation: ItemOperation, range_id: PartitionKeyRangeId) -> Self {
        Self {
            operation,
            range_id,
            operation_index: 0,
            retry_state: RetryState::default(),
            context: None,
        }
    }

    /// Attaches the result slot.
    ///
    /// # Errors
    /// `InvalidState` if a slot is already attached.
    pub(crate) fn attach(&mut self, context: Arc<OperationContext>) -> BulkResult<()> {
        if self.context.is_some() {
            return Err(BulkError::InvalidState {
                message: "operation context already attached".to_string(),
            });
        }
        self.context = Some(context);
        Ok(())
    }

    pub(crate) fn context(&self) -> Option<&Arc<OperationContext>> {
        self.context.as_ref()
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.operation.is_cancelled()
    }

    /// Completes the operation on behalf of batch `by`.
    pub(crate) fn complete(
        &self,
        by: BatchId,
        result: BulkResult<OperationResponse>,
    ) -> BulkResult<()> {
        self.context.as_ref().map_or_else(
            || {
                Err(BulkError::InvalidState {
                    message: "operation has no context".to_string(),
                })
            },
            |ctx| ctx.complete(Some(by), result),
        )
    }

    /// Fails the operation outside of any batch.
    pub(crate) fn fail(&self, err: BulkError) {
        if let Some(ctx) = &self.context {
            // Already-completed slots keep their first result.
            let _ = ctx.complete(None, Err(err));
        }
    }
}

// =============================================================================
// Caller future
// =============================================================================

/// Resolves to the result of one submitted operation.
#[derive(Debug)]
#[must_use = "the operation result is only observable through this future"]
pub struct OperationFuture {
    rx: oneshot::Receiver<BulkResult<OperationResponse>>,
}

impl Future for OperationFuture {
    type Output = BulkResult<OperationResponse>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx).poll(cx).map(|result| {
            result.unwrap_or_else(|_| {
                Err(BulkError::internal("operation dropped without a result"))
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use cosmos_bulk_core::status_codes;
    use serde_json::json;

    use super::*;
    use crate::serializer::JsonSerializer;

    fn pk() -> PartitionKey {
        PartitionKey::new("tenant")
    }

    #[test]
    fn test_create_takes_id_from_document() {
        let op = ItemOperation::create(pk(), json!({"id": "a", "v": 1}));
        assert_eq!(op.id(), Some("a"));
        assert!(op.validate().is_ok());
    }

    #[test]
    fn test_validate_requires_id() {
        let op = ItemOperation::read(pk(), "");
        assert!(matches!(op.validate(), Err(BulkError::Configuration { .. })));
    }

    #[test]
    fn test_validate_rejects_epk_with_logical_key() {
        let options = ItemRequestOptions {
            effective_partition_key: Some(Bytes::from_static(&[1, 2, 3, 4])),
            ..ItemRequestOptions::default()
        };
        let op = ItemOperation::delete(pk(), "a").with_options(options);
        let err = op.validate().unwrap_err();
        assert!(err.to_string().contains("effective partition key"));

        let epk_only = ItemOperation::delete(pk(), "a").with_effective_partition_key(vec![1, 2]);
        assert!(epk_only.validate().is_ok());
        assert!(matches!(
            epk_only.routing_key().unwrap(),
            RoutingKey::Effective(_)
        ));
    }

    #[test]
    fn test_materialize_and_approximate_size() {
        let mut op = ItemOperation::upsert(pk(), json!({"id": "ab"}));
        assert!(op.to_record().is_err());

        op.materialize(&JsonSerializer).unwrap();
        let body_len = op.body().materialized_len();
        assert_eq!(body_len, br#"{"id":"ab"}"#.len());
        assert_eq!(op.approximate_size(), 2 + r#"["tenant"]"#.len() + body_len);

        let record = op.to_record().unwrap();
        assert!(op.approximate_size() < record.payload_len());
    }

    #[test]
    fn test_attach_twice_is_rejected() {
        let mut pending = PendingOperation::new(ItemOperation::read(pk(), "a"), "0".into());
        let (first, _f1) = OperationContext::new();
        let (second, _f2) = OperationContext::new();
        pending.attach(first).unwrap();
        assert!(matches!(
            pending.attach(second),
            Err(BulkError::InvalidState { .. })
        ));
    }

    #[tokio::test]
    async fn test_single_completion() {
        let (ctx, future) = OperationContext::new();
        ctx.assign_owner(BatchId::new(1));

        let ok = OperationResponse::with_status(status_codes::OK, 0);
        ctx.complete(Some(BatchId::new(1)), Ok(ok.clone())).unwrap();
        assert!(ctx.is_completed());

        let second = ctx.complete(Some(BatchId::new(1)), Ok(ok.clone()));
        assert!(matches!(second, Err(BulkError::InvalidState { .. })));

        assert_eq!(future.await.unwrap(), ok);
    }

    #[tokio::test]
    async fn test_foreign_batch_completion_fails_slot() {
        let (ctx, future) = OperationContext::new();
        ctx.assign_owner(BatchId::new(2));

        let result = ctx.complete(
            Some(BatchId::new(9)),
            Ok(OperationResponse::with_status(status_codes::OK, 0)),
        );
        assert!(matches!(result, Err(BulkError::WrongBatcher { .. })));

        match future.await {
            Err(BulkError::WrongBatcher { expected, actual }) => {
                assert_eq!(expected, Some(BatchId::new(2)));
                assert_eq!(actual, BatchId::new(9));
            }
            other => panic!("expected WrongBatcher, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_dropped_context_resolves_future() {
        let (ctx, future) = OperationContext::new();
        drop(ctx);
        assert!(matches!(future.await, Err(BulkError::Internal { .. })));
    }
}
