//! Row batching.

use std::time::Duration;

/// Shortest flush interval a worker will run with
pub const MIN_FLUSH_INTERVAL: Duration = Duration::from_millis(1);

/// Batch sizing and flush cadence
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchConfig {
    /// Rows per sink write
    pub batch_size: usize,
    /// Maximum time a non-empty buffer waits before it is flushed
    pub flush_interval: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batch_size: 1000,
            flush_interval: Duration::from_millis(200),
        }
    }
}

impl BatchConfig {
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Intervals shorter than [`MIN_FLUSH_INTERVAL`] are raised to it
    pub fn with_flush_interval(mut self, flush_interval: Duration) -> Self {
        self.flush_interval = flush_interval.max(MIN_FLUSH_INTERVAL);
        self
    }
}

/// Buffer owned by one worker; hands out full batches in arrival order.
#[derive(Debug)]
pub struct Batcher<T> {
    capacity: usize,
    buffer: Vec<T>,
}

impl<T> Batcher<T> {
    /// A capacity of zero is treated as one
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            buffer: Vec::with_capacity(capacity),
        }
    }

    /// Append an item; returns the full batch once `capacity` items are buffered
    pub fn push(&mut self, item: T) -> Option<Vec<T>> {
        self.buffer.push(item);
        if self.buffer.len() >= self.capacity {
            Some(self.take())
        } else {
            None
        }
    }

    /// Drain whatever is buffered
    pub fn take(&mut self) -> Vec<T> {
        std::mem::replace(&mut self.buffer, Vec::with_capacity(self.capacity))
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
