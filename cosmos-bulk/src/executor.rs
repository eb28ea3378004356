//! Container executor - the entry point for bulk operations.
//!
//! # Design
//!
//! ```text
//!                       ┌──────────────────────────────────────────────┐
//!                       │               ExecutorInner                  │
//! add(op) ─────────────►│  validate ─► materialize ─► resolve range    │
//!                       │  ┌────────────────────────────────────────┐  │
//!                       │  │ streamers: HashMap<RangeId, Streamer>  │  │
//!                       │  │ gates:     HashMap<RangeId, Semaphore> │  │
//!                       │  └────────────────────────────────────────┘  │
//! retry pump ──────────►│  resubmit: (refresh range) ─► streamer.add   │
//!                       └──────────────────────────────────────────────┘
//! ```
//!
//! Streamers and gates are created lazily, one per range, with
//! insert-if-absent semantics. A creator that loses the race closes the
//! instance it built and uses the winner's.

use std::collections::HashMap;
use std::sync::atomic::AtomicU64;
use std::sync::{Arc, Weak};

use cosmos_bulk_core::PartitionKeyRangeId;
use cosmos_bulk_routing::RangeResolver;
use tokio::sync::{mpsc, RwLock, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::batcher::{DispatchContext, Resubmission};
use crate::config::BulkConfig;
use crate::error::{BulkError, BulkResult};
use crate::operation::{ItemOperation, OperationContext, OperationFuture, PendingOperation};
use crate::response::OperationResponse;
use crate::retry::{DefaultRetryPolicy, RetryPolicy};
use crate::serializer::{ItemSerializer, JsonSerializer};
use crate::stats::{BulkStats, BulkStatsSnapshot};
use crate::streamer::RangeStreamer;
use crate::transport::BatchTransport;

/// Builder for [`ContainerExecutor`].
pub struct ContainerExecutorBuilder {
    resolver: Arc<dyn RangeResolver>,
    transport: Arc<dyn BatchTransport>,
    config: Option<BulkConfig>,
    serializer: Arc<dyn ItemSerializer>,
    retry_policy: Option<Arc<dyn RetryPolicy>>,
}

impl ContainerExecutorBuilder {
    /// Creates a builder around the two required collaborators.
    #[must_use]
    pub fn new(resolver: Arc<dyn RangeResolver>, transport: Arc<dyn BatchTransport>) -> Self {
        Self {
            resolver,
            transport,
            config: None,
            serializer: Arc::new(JsonSerializer),
            retry_policy: None,
        }
    }

    /// Sets the configuration. Defaults to [`BulkConfig::default`].
    #[must_use]
    pub fn with_config(mut self, config: BulkConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Sets the item serializer. Defaults to [`JsonSerializer`].
    #[must_use]
    pub fn with_serializer(mut self, serializer: Arc<dyn ItemSerializer>) -> Self {
        self.serializer = serializer;
        self
    }

    /// Sets the retry policy. Defaults to a [`DefaultRetryPolicy`] built
    /// from the configuration.
    #[must_use]
    pub fn with_retry_policy(mut self, policy: Arc<dyn RetryPolicy>) -> Self {
        self.retry_policy = Some(policy);
        self
    }

    /// Validates the configuration and starts the executor.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    /// Returns `BulkError::Configuration` if the configuration is invalid.
    pub fn build(self) -> BulkResult<ContainerExecutor> {
        let config = self.config.unwrap_or_default();
        config.validate()?;

        let retry_policy: Arc<dyn RetryPolicy> = match self.retry_policy {
            Some(policy) => policy,
            None => Arc::new(DefaultRetryPolicy::new(config.retry)),
        };
        let (resubmit_tx, resubmit_rx) = mpsc::unbounded_channel();

        info!(
            dispatch_interval_ms = u64::try_from(config.dispatch_interval.as_millis()).unwrap_or(u64::MAX),
            max_body_length = config.limits.max_body_length,
            max_operation_count = config.limits.max_operation_count,
            max_concurrent_dispatches_per_range = config.max_concurrent_dispatches_per_range,
            "Bulk executor started"
        );

        let inner = Arc::new(ExecutorInner {
            config,
            resolver: self.resolver,
            transport: self.transport,
            serializer: self.serializer,
            retry_policy,
            stats: Arc::new(BulkStats::default()),
            streamers: RwLock::new(HashMap::new()),
            gates: RwLock::new(HashMap::new()),
            batch_ids: Arc::new(AtomicU64::new(1)),
            resubmit_tx,
            shutdown: CancellationToken::new(),
        });
        spawn_retry_pump(
            Arc::downgrade(&inner),
            resubmit_rx,
            inner.shutdown.clone(),
        );

        Ok(ContainerExecutor { inner })
    }
}

/// Shared executor state.
pub(crate) struct ExecutorInner {
    pub(crate) config: BulkConfig,
    pub(crate) resolver: Arc<dyn RangeResolver>,
    pub(crate) transport: Arc<dyn BatchTransport>,
    pub(crate) serializer: Arc<dyn ItemSerializer>,
    pub(crate) retry_policy: Arc<dyn RetryPolicy>,
    pub(crate) stats: Arc<BulkStats>,
    streamers: RwLock<HashMap<PartitionKeyRangeId, Arc<RangeStreamer>>>,
    gates: RwLock<HashMap<PartitionKeyRangeId, Arc<Semaphore>>>,
    batch_ids: Arc<AtomicU64>,
    resubmit_tx: mpsc::UnboundedSender<Resubmission>,
    pub(crate) shutdown: CancellationToken,
}

impl ExecutorInner {
    pub(crate) fn ensure_running(&self) -> BulkResult<()> {
        if self.shutdown.is_cancelled() {
            return Err(BulkError::Shutdown);
        }
        Ok(())
    }

    /// Resolves the range that owns `operation`.
    pub(crate) async fn resolve(
        &self,
        operation: &ItemOperation,
        force_refresh: bool,
    ) -> BulkResult<PartitionKeyRangeId> {
        let key = operation.routing_key()?;
        Ok(self.resolver.resolve(key, force_refresh).await?)
    }

    /// Returns the admission gate for `range_id`, creating it if absent.
    pub(crate) async fn gate_for(&self, range_id: &PartitionKeyRangeId) -> Arc<Semaphore> {
        if let Some(gate) = self.gates.read().await.get(range_id) {
            return Arc::clone(gate);
        }

        let permits = self.config.max_concurrent_dispatches_per_range as usize;
        let mut gates = self.gates.write().await;
        if self.shutdown.is_cancelled() {
            // Shutdown already drained the map; hand out a closed gate.
            let closed = Arc::new(Semaphore::new(0));
            closed.close();
            return closed;
        }
        let gate = gates
            .entry(range_id.clone())
            .or_insert_with(|| Arc::new(Semaphore::new(permits)));
        Arc::clone(gate)
    }

    /// Returns the streamer for `range_id`, creating it if absent.
    async fn streamer_for(&self, range_id: &PartitionKeyRangeId) -> BulkResult<Arc<RangeStreamer>> {
        self.ensure_running()?;
        if let Some(streamer) = self.streamers.read().await.get(range_id) {
            return Ok(Arc::clone(streamer));
        }

        let ctx = DispatchContext {
            range_id: range_id.clone(),
            transport: Arc::clone(&self.transport),
            retry_policy: Arc::clone(&self.retry_policy),
            resubmit: self.resubmit_tx.clone(),
            gate: self.gate_for(range_id).await,
            stats: Arc::clone(&self.stats),
            request_timeout: self.config.request_timeout,
            atomic: self.config.atomic,
            ordered: self.config.ordered,
        };
        let created = RangeStreamer::new(
            Arc::new(ctx),
            self.config.limits,
            Arc::clone(&self.batch_ids),
            self.config.dispatch_interval,
        );

        let mut streamers = self.streamers.write().await;
        if self.shutdown.is_cancelled() {
            drop(streamers);
            created.close().await;
            return Err(BulkError::Shutdown);
        }
        if let Some(existing) = streamers.get(range_id) {
            let existing = Arc::clone(existing);
            drop(streamers);
            created.close().await;
            return Ok(existing);
        }
        streamers.insert(range_id.clone(), Arc::clone(&created));
        debug!(range_id = %range_id, "Created range streamer");
        Ok(created)
    }

    /// Puts a resubmitted operation back into a streamer.
    async fn resubmit(&self, resubmission: Resubmission) {
        let Resubmission {
            mut operation,
            refresh_range,
            ..
        } = resubmission;

        if refresh_range {
            match self.resolve(&operation.operation, true).await {
                Ok(range_id) => {
                    if range_id != operation.range_id {
                        debug!(from = %operation.range_id, to = %range_id, "Operation rerouted");
                    }
                    operation.range_id = range_id;
                }
                Err(e) => {
                    warn!(error = %e, "Failed to re-resolve range for retried operation");
                    operation.fail(e);
                    return;
                }
            }
        }

        match self.streamer_for(&operation.range_id).await {
            Ok(streamer) => {
                if let Err(e) = streamer.add(operation).await {
                    debug!(error = %e, "Resubmitted operation rejected");
                }
            }
            Err(e) => operation.fail(e),
        }
    }
}

fn spawn_retry_pump(
    inner: Weak<ExecutorInner>,
    mut rx: mpsc::UnboundedReceiver<Resubmission>,
    shutdown: CancellationToken,
) {
    tokio::spawn(async move {
        loop {
            let resubmission = tokio::select! {
                () = shutdown.cancelled() => break,
                next = rx.recv() => match next {
                    Some(resubmission) => resubmission,
                    None => break,
                },
            };

            if resubmission.delay.is_zero() && !resubmission.refresh_range {
                // Overflow keeps its relative order by going back inline.
                match inner.upgrade() {
                    Some(inner) => inner.resubmit(resubmission).await,
                    None => resubmission.operation.fail(BulkError::Shutdown),
                }
                continue;
            }

            let inner = inner.clone();
            tokio::spawn(async move {
                if !resubmission.delay.is_zero() {
                    tokio::time::sleep(resubmission.delay).await;
                }
                match inner.upgrade() {
                    Some(inner) => inner.resubmit(resubmission).await,
                    None => resubmission.operation.fail(BulkError::Shutdown),
                }
            });
        }

        rx.close();
        while let Ok(resubmission) = rx.try_recv() {
            resubmission.operation.fail(BulkError::Shutdown);
        }
        debug!("Retry pump stopped");
    });
}

/// Executes item operations against one container in bulk.
///
/// Cloning is cheap; clones share the same streamers and counters.
#[derive(Clone)]
pub struct ContainerExecutor {
    pub(crate) inner: Arc<ExecutorInner>,
}

impl ContainerExecutor {
    /// Starts building an executor.
    #[must_use]
    pub fn builder(
        resolver: Arc<dyn RangeResolver>,
        transport: Arc<dyn BatchTransport>,
    ) -> ContainerExecutorBuilder {
        ContainerExecutorBuilder::new(resolver, transport)
    }

    /// Submits an operation.
    ///
    /// Returns once the operation is queued for its range; the returned
    /// future resolves when the service's outcome for this operation arrives.
    ///
    /// # Errors
    /// `Configuration` for a malformed operation, `Serialization` if the body
    /// cannot be serialized, `Routing` if the range cannot be resolved,
    /// `Cancelled` if the operation was cancelled, `Shutdown` after
    /// [`shutdown`](Self::shutdown).
    #[tracing::instrument(skip_all, fields(op = operation.operation_type().as_str()))]
    pub async fn add(&self, mut operation: ItemOperation) -> BulkResult<OperationFuture> {
        self.inner.ensure_running()?;
        operation.validate()?;

        if operation.is_cancelled() {
            return Err(BulkError::Cancelled);
        }
        operation.materialize(self.inner.serializer.as_ref())?;

        let range_id = self.inner.resolve(&operation, false).await?;
        let streamer = self.inner.streamer_for(&range_id).await?;

        let (context, future) = OperationContext::new();
        let mut pending = PendingOperation::new(operation, range_id);
        pending.attach(context)?;
        streamer.add(pending).await?;
        Ok(future)
    }

    /// Submits an operation and waits for its outcome.
    ///
    /// # Errors
    /// Any error from [`add`](Self::add), or the failure delivered for the
    /// operation's batch.
    pub async fn execute(&self, operation: ItemOperation) -> BulkResult<OperationResponse> {
        self.add(operation).await?.await
    }

    /// Returns a snapshot of the executor's counters.
    #[must_use]
    pub fn stats(&self) -> BulkStatsSnapshot {
        self.inner.stats.snapshot()
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &BulkConfig {
        &self.inner.config
    }

    /// Returns the number of ranges with a live streamer.
    pub async fn active_ranges(&self) -> usize {
        self.inner.streamers.read().await.len()
    }

    /// Closes every streamer and admission gate.
    ///
    /// Further adds fail with `Shutdown`. Queued operations are flushed but
    /// their batches may fail with `Shutdown` once the gates close; requests
    /// already on the network are not awaited.
    pub async fn shutdown(&self) {
        self.inner.shutdown.cancel();

        let streamers: Vec<_> = self
            .inner
            .streamers
            .write()
            .await
            .drain()
            .map(|(_, streamer)| streamer)
            .collect();
        for streamer in &streamers {
            streamer.close().await;
        }

        let gates: Vec<_> = self
            .inner
            .gates
            .write()
            .await
            .drain()
            .map(|(_, gate)| gate)
            .collect();
        for gate in &gates {
            gate.close();
        }

        info!(ranges = streamers.len(), "Bulk executor shut down");
    }
}
