//! Executor counters.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::batcher::FlushReason;

/// Running counters for one executor. All updates are relaxed atomics.
#[derive(Debug, Default)]
pub struct BulkStats {
    batches_timer: AtomicU64,
    batches_full: AtomicU64,
    batches_close: AtomicU64,
    batch_failures: AtomicU64,
    operations_sent: AtomicU64,
    operations_completed: AtomicU64,
    operations_overflowed: AtomicU64,
    range_gone_retries: AtomicU64,
    throttle_retries: AtomicU64,
    wrong_batcher_completions: AtomicU64,
}

/// Point-in-time copy of [`BulkStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BulkStatsSnapshot {
    /// Batches dispatched by the dispatch timer.
    pub batches_timer: u64,
    /// Batches dispatched because the builder was full.
    pub batches_full: u64,
    /// Batches dispatched while closing a streamer.
    pub batches_close: u64,
    /// Batches whose build or send failed as a whole.
    pub batch_failures: u64,
    /// Operations written into a sent request body.
    pub operations_sent: u64,
    /// Operations whose result slot was completed.
    pub operations_completed: u64,
    /// Operations moved to a later batch by the size bound.
    pub operations_overflowed: u64,
    /// Operations resubmitted after a range-gone outcome.
    pub range_gone_retries: u64,
    /// Operations resubmitted after a throttled outcome.
    pub throttle_retries: u64,
    /// Completions rejected because the batcher did not own the operation.
    pub wrong_batcher_completions: u64,
}

impl BulkStatsSnapshot {
    /// Returns the total number of dispatched batches.
    #[must_use]
    pub const fn batches_dispatched(&self) -> u64 {
        self.batches_timer + self.batches_full + self.batches_close
    }
}

impl BulkStats {
    pub(crate) fn record_dispatch(&self, reason: FlushReason, operations: usize) {
        let counter = match reason {
            FlushReason::Timer => &self.batches_timer,
            FlushReason::Full => &self.batches_full,
            FlushReason::Close => &self.batches_close,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        self.operations_sent
            .fetch_add(operations as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_batch_failure(&self) {
        self.batch_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_completed(&self, count: usize) {
        self.operations_completed
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_overflow(&self, count: usize) {
        self.operations_overflowed
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_range_gone_retry(&self) {
        self.range_gone_retries.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_throttle_retry(&self) {
        self.throttle_retries.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_wrong_batcher(&self) {
        self.wrong_batcher_completions
            .fetch_add(1, Ordering::Relaxed);
    }

    /// Returns a copy of the current counters.
    #[must_use]
    pub fn snapshot(&self) -> BulkStatsSnapshot {
        BulkStatsSnapshot {
            batches_timer: self.batches_timer.load(Ordering::Relaxed),
            batches_full: self.batches_full.load(Ordering::Relaxed),
            batches_close: self.batches_close.load(Ordering::Relaxed),
            batch_failures: self.batch_failures.load(Ordering::Relaxed),
            operations_sent: self.operations_sent.load(Ordering::Relaxed),
            operations_completed: self.operations_completed.load(Ordering::Relaxed),
            operations_overflowed: self.operations_overflowed.load(Ordering::Relaxed),
            range_gone_retries: self.range_gone_retries.load(Ordering::Relaxed),
            throttle_retries: self.throttle_retries.load(Ordering::Relaxed),
            wrong_batcher_completions: self.wrong_batcher_completions.load(Ordering::Relaxed),
        }
    }
}
