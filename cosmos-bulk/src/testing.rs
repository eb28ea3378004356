//! Shared fixtures for unit tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use cosmos_bulk_codec::{decode_batch_request, encode_batch_response, OperationRecord, OutcomeRecord};
use cosmos_bulk_core::{status_codes, PartitionKey};
use serde_json::json;
use tokio::sync::{mpsc, Semaphore};

use crate::batcher::{DispatchContext, Resubmission};
use crate::operation::{ItemOperation, OperationContext, OperationFuture, PendingOperation};
use crate::retry::{DefaultRetryPolicy, RetryPolicyConfig};
use crate::serializer::JsonSerializer;
use crate::stats::BulkStats;
use crate::transport::{BatchRequest, BatchResponse, BatchTransport, TransportError, TransportResult};

type OutcomeFn = dyn Fn(usize, &[OperationRecord]) -> Vec<OutcomeRecord> + Send + Sync;

/// Transport that decodes each request and answers with scripted outcomes.
pub(crate) struct ScriptedTransport {
    outcomes: Box<OutcomeFn>,
    failure: Option<String>,
    latency: Duration,
    calls: AtomicUsize,
    requests: Mutex<Vec<BatchRequest>>,
}

impl ScriptedTransport {
    /// Answers every operation with 201.
    pub(crate) fn accept_all() -> Arc<Self> {
        Self::with_outcomes(|_, records| {
            records
                .iter()
                .map(|_| OutcomeRecord::with_status(status_codes::CREATED, 0))
                .collect()
        })
    }

    /// Answers with `f(call_index, records)`.
    pub(crate) fn with_outcomes<F>(f: F) -> Arc<Self>
    where
        F: Fn(usize, &[OperationRecord]) -> Vec<OutcomeRecord> + Send + Sync + 'static,
    {
        Arc::new(Self {
            outcomes: Box::new(f),
            failure: None,
            latency: Duration::ZERO,
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        })
    }

    /// Fails every request with a connection error.
    pub(crate) fn failing(message: &str) -> Arc<Self> {
        Arc::new(Self {
            outcomes: Box::new(|_, _| Vec::new()),
            failure: Some(message.to_string()),
            latency: Duration::ZERO,
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        })
    }

    /// Delays every response.
    pub(crate) fn with_latency(self: Arc<Self>, latency: Duration) -> Arc<Self> {
        let mut inner = Arc::try_unwrap(self).ok().unwrap();
        inner.latency = latency;
        Arc::new(inner)
    }

    pub(crate) fn requests(&self) -> Vec<BatchRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl BatchTransport for ScriptedTransport {
    async fn send(&self, request: BatchRequest) -> TransportResult<BatchResponse> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        if let Some(message) = &self.failure {
            return Err(TransportError::Connection {
                message: message.clone(),
            });
        }

        let records = decode_batch_request(&request.body).unwrap();
        let outcomes = (self.outcomes)(call, &records);
        let body = encode_batch_response(&outcomes).unwrap();
        Ok(BatchResponse::new(status_codes::MULTI_STATUS, 0, body))
    }
}

/// A materialized create for item `id` with an attached result slot.
pub(crate) fn create_pending(id: &str, range: &str) -> (PendingOperation, OperationFuture) {
    let mut op = ItemOperation::create(PartitionKey::new("tenant"), json!({"id": id}));
    op.materialize(&JsonSerializer).unwrap();
    let mut pending = PendingOperation::new(op, range.into());
    let (ctx, future) = OperationContext::new();
    pending.attach(ctx).unwrap();
    (pending, future)
}

/// A dispatch context for range `"0"` plus the receiving end of its retry path.
pub(crate) fn dispatch_context(
    transport: Arc<ScriptedTransport>,
    permits: usize,
) -> (Arc<DispatchContext>, mpsc::UnboundedReceiver<Resubmission>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let ctx = DispatchContext {
        range_id: "0".into(),
        transport,
        retry_policy: Arc::new(DefaultRetryPolicy::new(RetryPolicyConfig::for_testing())),
        resubmit: tx,
        gate: Arc::new(Semaphore::new(permits)),
        stats: Arc::new(BulkStats::default()),
        request_timeout: Duration::from_secs(1),
        atomic: false,
        ordered: false,
    };
    (Arc::new(ctx), rx)
}
