//! Per-range streamer - owns the current batch builder for one range.
//!
//! `add` and the dispatch timer both run under one mutex. When the current
//! builder rejects an operation (or reaches its count bound) it is swapped for
//! a fresh one and handed to a spawned [`Batcher`]; the caller never waits on
//! the network.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use cosmos_bulk_core::{BatchId, BatchLimits};
use tokio::sync::Mutex;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::batcher::{Batcher, DispatchContext, FlushReason};
use crate::builder::BatchBuilder;
use crate::error::{BulkError, BulkResult};
use crate::operation::PendingOperation;

struct StreamerState {
    current: BatchBuilder,
    closed: bool,
}

/// Accumulates and dispatches batches for one partition key range.
pub(crate) struct RangeStreamer {
    state: Mutex<StreamerState>,
    ctx: Arc<DispatchContext>,
    limits: BatchLimits,
    batch_ids: Arc<AtomicU64>,
    timer: CancellationToken,
}

impl RangeStreamer {
    /// Creates a streamer and starts its dispatch timer.
    ///
    /// Must be called from within a tokio runtime.
    pub(crate) fn new(
        ctx: Arc<DispatchContext>,
        limits: BatchLimits,
        batch_ids: Arc<AtomicU64>,
        dispatch_interval: Duration,
    ) -> Arc<Self> {
        let first = next_builder(&batch_ids, &ctx, limits);
        let streamer = Arc::new(Self {
            state: Mutex::new(StreamerState {
                current: first,
                closed: false,
            }),
            ctx,
            limits,
            batch_ids,
            timer: CancellationToken::new(),
        });
        spawn_timer(
            Arc::downgrade(&streamer),
            dispatch_interval,
            streamer.timer.clone(),
        );
        streamer
    }

    /// Enqueues an operation.
    ///
    /// On error the operation's slot has already been failed with the same
    /// error.
    ///
    /// # Errors
    /// `Shutdown` if the streamer is closed; `Cancelled` if the caller
    /// cancelled the operation.
    pub(crate) async fn add(&self, operation: PendingOperation) -> BulkResult<()> {
        if operation.is_cancelled() {
            operation.fail(BulkError::Cancelled);
            return Err(BulkError::Cancelled);
        }

        let mut state = self.state.lock().await;
        if state.closed {
            operation.fail(BulkError::Shutdown);
            return Err(BulkError::Shutdown);
        }

        let operation = match state.current.try_add(operation) {
            Ok(()) => {
                if state.current.is_full() {
                    self.swap_and_dispatch(&mut state, FlushReason::Full);
                }
                return Ok(());
            }
            Err(rejected) => rejected,
        };

        self.swap_and_dispatch(&mut state, FlushReason::Full);
        match state.current.try_add(operation) {
            Ok(()) => {
                if state.current.is_full() {
                    self.swap_and_dispatch(&mut state, FlushReason::Full);
                }
                Ok(())
            }
            Err(rejected) => {
                let err = BulkError::internal("fresh batch builder rejected an operation");
                rejected.fail(err.clone());
                Err(err)
            }
        }
    }

    /// Dispatches the current builder if it holds anything.
    pub(crate) async fn flush(&self, reason: FlushReason) {
        let mut state = self.state.lock().await;
        if !state.closed {
            self.swap_and_dispatch(&mut state, reason);
        }
    }

    /// Stops the timer, rejects further adds and dispatches what is queued.
    /// In-flight dispatches keep running.
    pub(crate) async fn close(&self) {
        let mut state = self.state.lock().await;
        if state.closed {
            return;
        }
        state.closed = true;
        self.timer.cancel();
        self.swap_and_dispatch(&mut state, FlushReason::Close);
        debug!(range_id = %self.ctx.range_id, "Streamer closed");
    }

    /// Returns the number of operations waiting in the current builder.
    #[cfg(test)]
    pub(crate) async fn queued(&self) -> usize {
        self.state.lock().await.current.len()
    }

    fn swap_and_dispatch(&self, state: &mut StreamerState, reason: FlushReason) {
        if state.current.is_empty() {
            return;
        }
        let fresh = next_builder(&self.batch_ids, &self.ctx, self.limits);
        let full = std::mem::replace(&mut state.current, fresh);
        debug!(
            range_id = %full.range_id(),
            batch_id = %full.id(),
            operations = full.len(),
            bytes = full.approximate_bytes(),
            reason = reason.as_str(),
            "Dispatching batch"
        );
        let batcher = Batcher::new(full, Arc::clone(&self.ctx));
        tokio::spawn(batcher.dispatch(reason));
    }
}

impl Drop for RangeStreamer {
    fn drop(&mut self) {
        self.timer.cancel();
    }
}

fn next_builder(
    batch_ids: &AtomicU64,
    ctx: &DispatchContext,
    limits: BatchLimits,
) -> BatchBuilder {
    let id = BatchId::new(batch_ids.fetch_add(1, Ordering::Relaxed));
    BatchBuilder::new(id, ctx.range_id.clone(), limits)
}

fn spawn_timer(streamer: Weak<RangeStreamer>, interval: Duration, cancel: CancellationToken) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let Some(streamer) = streamer.upgrade() else {
                        break;
                    };
                    streamer.flush(FlushReason::Timer).await;
                }
            }
        }
    });
}
