//! Ingestion worker
//!
//! Workers share one bounded input queue. Each worker extracts the configured
//! columns from every row it receives, buffers the typed rows and writes them to the
//! sink when the buffer is full, when the flush timer fires, when the queue closes or
//! when the run is cancelled.

use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::batch::{BatchConfig, Batcher, MIN_FLUSH_INTERVAL};
use crate::columns::CompiledColumns;
use crate::sink::Sink;
use crate::stats::IngestStats;
use tsload_common::types::{Cell, ColumnarBatch, Row};

/// Input queue shared between the workers of one run
pub type SharedReceiver = Arc<Mutex<mpsc::Receiver<Row>>>;

/// Worker draining the shared queue into one destination table
pub struct IngestWorker<S: Sink> {
    worker_id: Uuid,
    target: String,
    columns: CompiledColumns,
    sink: Arc<S>,
    config: BatchConfig,
    stats: Arc<IngestStats>,
    prepared: Option<S::Prepared>,
}

impl<S: Sink> IngestWorker<S> {
    pub fn new(
        target: impl Into<String>,
        columns: CompiledColumns,
        sink: Arc<S>,
        config: BatchConfig,
        stats: Arc<IngestStats>,
    ) -> Self {
        Self {
            worker_id: Uuid::new_v4(),
            target: target.into(),
            columns,
            sink,
            config,
            stats,
            prepared: None,
        }
    }

    pub fn worker_id(&self) -> Uuid {
        self.worker_id
    }

    /// Run until the queue is closed and drained, or until `cancel` fires
    pub async fn run(mut self, rows: SharedReceiver, cancel: CancellationToken) {
        debug!(worker_id = %self.worker_id, target = %self.target, "Worker started");

        let mut batcher = Batcher::new(self.config.batch_size);
        // `interval` panics on a zero period and the config fields are public
        let mut ticker = interval(self.config.flush_interval.max(MIN_FLUSH_INTERVAL));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // the first tick completes immediately
        ticker.tick().await;

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!(worker_id = %self.worker_id, pending = batcher.len(), "Worker cancelled");
                    break;
                }
                _ = ticker.tick() => {
                    if !batcher.is_empty() {
                        self.flush(batcher.take()).await;
                    }
                    continue;
                }
                row = receive(&rows) => row,
            };

            let Some(row) = next else {
                break;
            };

            self.stats.record_row();
            match self.columns.extract_row(&row) {
                Ok(cells) => {
                    if let Some(batch) = batcher.push(cells) {
                        self.flush(batch).await;
                    }
                },
                Err(e) => {
                    self.stats.record_errors(1);
                    warn!(worker_id = %self.worker_id, target = %self.target, error = %e, "Dropping row");
                },
            }
        }

        let rest = batcher.take();
        if !rest.is_empty() {
            self.flush(rest).await;
        }

        debug!(worker_id = %self.worker_id, target = %self.target, "Worker finished");
    }

    /// Write one batch; failures are counted against the rows of the batch
    async fn flush(&mut self, rows: Vec<Vec<Cell>>) {
        let count = rows.len();
        let batch = ColumnarBatch::from_rows(self.target.as_str(), self.columns.specs(), rows);

        if self.prepared.is_none() {
            match self
                .sink
                .prepare_insert(&self.target, self.columns.specs())
                .await
            {
                Ok(prepared) => self.prepared = Some(prepared),
                Err(e) => {
                    self.stats.record_errors(count as u64);
                    error!(worker_id = %self.worker_id, rows = count, error = %e, "Failed to prepare insert");
                    return;
                },
            }
        }

        let Some(prepared) = self.prepared.as_ref() else {
            return;
        };

        match self.sink.bind_and_execute(prepared, &batch).await {
            Ok(()) => {
                self.stats.record_batch();
                debug!(worker_id = %self.worker_id, target = %self.target, rows = count, "Batch written");
            },
            Err(e) => {
                self.stats.record_errors(count as u64);
                error!(worker_id = %self.worker_id, target = %self.target, rows = count, error = %e, "Batch rejected");
            },
        }
    }
}

async fn receive(rows: &SharedReceiver) -> Option<Row> {
    rows.lock().await.recv().await
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::expr::Extractor;
    use crate::sink::MemorySink;
    use std::time::Duration;
    use tsload_common::types::{ColumnSpec, ColumnType, Precision};

    fn columns() -> CompiledColumns {
        CompiledColumns::compile(
            vec![
                ColumnSpec::new("ts", ColumnType::Timestamp(Precision::Millisecond), "ts"),
                ColumnSpec::new("v", ColumnType::Int, "v"),
            ],
            Arc::new(Extractor::new()),
        )
        .unwrap()
    }

    fn row(i: i64) -> Row {
        Row::new().with("ts", i).with("v", i)
    }

    fn worker(sink: Arc<MemorySink>, batch_size: usize, stats: Arc<IngestStats>) -> IngestWorker<MemorySink> {
        let config = BatchConfig::default()
            .with_batch_size(batch_size)
            .with_flush_interval(Duration::from_millis(200));
        IngestWorker::new("t_1", columns(), sink, config, stats)
    }

    #[tokio::test(start_paused = true)]
    async fn test_flushes_full_batches_then_remainder() {
        let sink = Arc::new(MemorySink::new());
        let stats = Arc::new(IngestStats::new());
        let (tx, rx) = mpsc::channel(32);
        for i in 0..25 {
            tx.send(row(i)).await.unwrap();
        }
        drop(tx);

        worker(Arc::clone(&sink), 10, Arc::clone(&stats))
            .run(Arc::new(Mutex::new(rx)), CancellationToken::new())
            .await;

        assert_eq!(sink.batch_sizes(), vec![10, 10, 5]);
        assert_eq!(sink.prepare_count(), 1);
        assert_eq!(stats.total(), 25);
        assert_eq!(stats.errors(), 0);
        assert_eq!(stats.batches(), 3);

        let batches = sink.batches();
        assert_eq!(batches[0].columns[1].cells[..3], [Cell::Int(0), Cell::Int(1), Cell::Int(2)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_flushes_partial_batch() {
        let sink = Arc::new(MemorySink::new());
        let stats = Arc::new(IngestStats::new());
        let (tx, rx) = mpsc::channel(8);
        let handle = tokio::spawn(
            worker(Arc::clone(&sink), 100, stats).run(Arc::new(Mutex::new(rx)), CancellationToken::new()),
        );

        tx.send(row(1)).await.unwrap();
        tx.send(row(2)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(sink.batch_sizes(), vec![2]);

        drop(tx);
        handle.await.unwrap();
        assert_eq!(sink.batch_sizes(), vec![2]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_flush_interval_still_flushes() {
        let sink = Arc::new(MemorySink::new());
        let stats = Arc::new(IngestStats::new());
        let config = BatchConfig {
            batch_size: 100,
            flush_interval: Duration::ZERO,
        };
        let (tx, rx) = mpsc::channel(8);
        let handle = tokio::spawn(
            IngestWorker::new("t_1", columns(), Arc::clone(&sink), config, Arc::clone(&stats))
                .run(Arc::new(Mutex::new(rx)), CancellationToken::new()),
        );

        tx.send(row(1)).await.unwrap();
        tx.send(row(2)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(sink.total_rows(), 2);

        drop(tx);
        handle.await.unwrap();
        assert_eq!(sink.total_rows(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bad_rows_are_counted_and_dropped() {
        let sink = Arc::new(MemorySink::new());
        let stats = Arc::new(IngestStats::new());
        let (tx, rx) = mpsc::channel(8);
        tx.send(row(1)).await.unwrap();
        tx.send(Row::new().with("ts", 2i64).with("v", "not a number")).await.unwrap();
        tx.send(row(3)).await.unwrap();
        drop(tx);

        worker(Arc::clone(&sink), 10, Arc::clone(&stats))
            .run(Arc::new(Mutex::new(rx)), CancellationToken::new())
            .await;

        assert_eq!(sink.batch_sizes(), vec![2]);
        assert_eq!(stats.total(), 3);
        assert_eq!(stats.errors(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sink_failure_counts_whole_batch() {
        let sink = Arc::new(MemorySink::new().with_execute_failures(1));
        let stats = Arc::new(IngestStats::new());
        let (tx, rx) = mpsc::channel(16);
        for i in 0..8 {
            tx.send(row(i)).await.unwrap();
        }
        drop(tx);

        worker(Arc::clone(&sink), 5, Arc::clone(&stats))
            .run(Arc::new(Mutex::new(rx)), CancellationToken::new())
            .await;

        assert_eq!(sink.batch_sizes(), vec![3]);
        assert_eq!(stats.errors(), 5);
        assert_eq!(stats.batches(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_prepare_is_retried_next_flush() {
        let sink = Arc::new(MemorySink::new().with_prepare_failures(1));
        let stats = Arc::new(IngestStats::new());
        let (tx, rx) = mpsc::channel(16);
        for i in 0..4 {
            tx.send(row(i)).await.unwrap();
        }
        drop(tx);

        worker(Arc::clone(&sink), 2, Arc::clone(&stats))
            .run(Arc::new(Mutex::new(rx)), CancellationToken::new())
            .await;

        assert_eq!(sink.batch_sizes(), vec![2]);
        assert_eq!(sink.prepare_count(), 1);
        assert_eq!(stats.errors(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_flushes_pending_rows() {
        let sink = Arc::new(MemorySink::new());
        let stats = Arc::new(IngestStats::new());
        let cancel = CancellationToken::new();
        let (tx, rx) = mpsc::channel(8);
        let handle = tokio::spawn(
            worker(Arc::clone(&sink), 100, stats).run(Arc::new(Mutex::new(rx)), cancel.clone()),
        );

        tx.send(row(1)).await.unwrap();
        tokio::task::yield_now().await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        cancel.cancel();
        handle.await.unwrap();

        assert_eq!(sink.batch_sizes(), vec![1]);
        // the worker stopped on the token, not on a closed queue
        assert!(tx.is_closed());
    }
}
