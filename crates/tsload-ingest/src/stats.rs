//! Run counters and the final report.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// Counters shared by all workers of one run
#[derive(Debug)]
pub struct IngestStats {
    total: AtomicU64,
    errors: AtomicU64,
    batches: AtomicU64,
    started_at: DateTime<Utc>,
    finished_at: Mutex<Option<DateTime<Utc>>>,
}

impl Default for IngestStats {
    fn default() -> Self {
        Self::new()
    }
}

impl IngestStats {
    pub fn new() -> Self {
        Self {
            total: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            batches: AtomicU64::new(0),
            started_at: Utc::now(),
            finished_at: Mutex::new(None),
        }
    }

    /// A row was taken off the input queue
    pub fn record_row(&self) {
        self.total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_errors(&self, count: u64) {
        self.errors.fetch_add(count, Ordering::Relaxed);
    }

    /// A batch reached the sink successfully
    pub fn record_batch(&self) {
        self.batches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    pub fn batches(&self) -> u64 {
        self.batches.load(Ordering::Relaxed)
    }

    pub fn finish(&self) {
        let mut finished = self
            .finished_at
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        finished.get_or_insert_with(Utc::now);
    }

    /// Snapshot for `target`; an unfinished run reports the current time as its end
    pub fn report(&self, target: impl Into<String>) -> IngestReport {
        let finished_at = self
            .finished_at
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .unwrap_or_else(Utc::now);

        IngestReport {
            target: target.into(),
            total: self.total(),
            errors: self.errors(),
            batches: self.batches(),
            started_at: self.started_at,
            finished_at,
            elapsed_ms: (finished_at - self.started_at).num_milliseconds().max(0),
        }
    }
}

/// Final outcome of one run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub target: String,
    pub total: u64,
    pub errors: u64,
    pub batches: u64,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub elapsed_ms: i64,
}

impl IngestReport {
    pub fn succeeded(&self) -> u64 {
        self.total.saturating_sub(self.errors)
    }
}

impl fmt::Display for IngestReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} rows read, {} written, {} failed in {} batches ({} ms)",
            self.target,
            self.total,
            self.succeeded(),
            self.errors,
            self.batches,
            self.elapsed_ms
        )
    }
}
