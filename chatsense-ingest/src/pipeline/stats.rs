//! Pipeline counters

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Running totals updated by the pipeline stages
#[derive(Debug, Default)]
pub struct PipelineStats {
    pub(crate) offered: AtomicU64,
    pub(crate) filtered: AtomicU64,
    pub(crate) admitted: AtomicU64,
    pub(crate) evicted: AtomicU64,
    pub(crate) rejected_full: AtomicU64,
    pub(crate) rejected_shutdown: AtomicU64,
    pub(crate) classified: AtomicU64,
    pub(crate) classification_errors: AtomicU64,
    pub(crate) persisted: AtomicU64,
    pub(crate) write_retries: AtomicU64,
    pub(crate) lost: AtomicU64,
}

pub(crate) fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

impl PipelineStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the counters plus current queue depths
    pub fn snapshot(
        &self,
        intake_depth: usize,
        result_depth: usize,
        unfinished: usize,
    ) -> PipelineSnapshot {
        PipelineSnapshot {
            offered: self.offered.load(Ordering::Relaxed),
            filtered: self.filtered.load(Ordering::Relaxed),
            admitted: self.admitted.load(Ordering::Relaxed),
            evicted: self.evicted.load(Ordering::Relaxed),
            rejected_full: self.rejected_full.load(Ordering::Relaxed),
            rejected_shutdown: self.rejected_shutdown.load(Ordering::Relaxed),
            classified: self.classified.load(Ordering::Relaxed),
            classification_errors: self.classification_errors.load(Ordering::Relaxed),
            persisted: self.persisted.load(Ordering::Relaxed),
            write_retries: self.write_retries.load(Ordering::Relaxed),
            lost: self.lost.load(Ordering::Relaxed),
            intake_depth,
            result_depth,
            unfinished,
        }
    }
}

/// Point-in-time view of pipeline counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PipelineSnapshot {
    /// Messages handed to the pipeline
    pub offered: u64,
    /// Messages dropped by the event filter
    pub filtered: u64,
    /// Events placed on the intake queue
    pub admitted: u64,
    /// Queued events evicted to make room (drop-oldest)
    pub evicted: u64,
    /// Incoming events refused because intake was full (drop-newest)
    pub rejected_full: u64,
    /// Events refused because the pipeline was shutting down
    pub rejected_shutdown: u64,
    /// Results produced, `Error` results included
    pub classified: u64,
    /// Results carrying the `Error` label
    pub classification_errors: u64,
    /// Rows appended to the durable log
    pub persisted: u64,
    /// Extra write attempts made after a failed write
    pub write_retries: u64,
    /// Results that could not be written after all attempts
    pub lost: u64,
    /// Events waiting for a classification worker
    pub intake_depth: usize,
    /// Results waiting for the persistence worker
    pub result_depth: usize,
    /// Admitted events not yet fully handled by both stages
    pub unfinished: usize,
}

impl PipelineSnapshot {
    /// Events lost to intake overflow under either policy
    pub fn dropped_overflow(&self) -> u64 {
        self.evicted + self.rejected_full
    }

    /// Every admitted event that was not evicted reached the log or was counted lost
    pub fn is_settled(&self) -> bool {
        self.unfinished == 0 && self.admitted == self.evicted + self.persisted + self.lost
    }
}
