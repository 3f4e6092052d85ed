//! Run orchestration: spawn the worker pool for one destination table, wait for it
//! and report.

use futures::future::join_all;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::batch::BatchConfig;
use crate::columns::CompiledColumns;
use crate::sink::Sink;
use crate::stats::{IngestReport, IngestStats};
use crate::worker::IngestWorker;
use tsload_common::types::Row;

/// Imports rows into one table through a pool of workers
pub struct Ingestor<S: Sink> {
    columns: CompiledColumns,
    sink: Arc<S>,
    batch: BatchConfig,
    concurrency: usize,
}

impl<S: Sink + 'static> Ingestor<S> {
    pub fn new(columns: CompiledColumns, sink: Arc<S>, batch: BatchConfig) -> Self {
        Self {
            columns,
            sink,
            batch,
            concurrency: 1,
        }
    }

    /// Number of workers; at least one
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Drain `rows` into `target` and return the run report once every worker has
    /// finished. Cancellation makes each worker flush what it holds and stop.
    pub async fn run(
        &self,
        target: &str,
        rows: mpsc::Receiver<Row>,
        cancel: CancellationToken,
    ) -> IngestReport {
        let stats = Arc::new(IngestStats::new());
        let shared = Arc::new(Mutex::new(rows));

        info!(
            target = %target,
            workers = self.concurrency,
            batch_size = self.batch.batch_size,
            "Starting import"
        );

        let handles = (0..self.concurrency).map(|_| {
            let worker = IngestWorker::new(
                target,
                self.columns.clone(),
                Arc::clone(&self.sink),
                self.batch.clone(),
                Arc::clone(&stats),
            );
            tokio::spawn(worker.run(Arc::clone(&shared), cancel.clone()))
        });

        for result in join_all(handles).await {
            if let Err(e) = result {
                error!(target = %target, error = %e, "Worker task failed");
            }
        }

        stats.finish();
        let report = stats.report(target);
        info!(
            target = %report.target,
            total = report.total,
            errors = report.errors,
            batches = report.batches,
            elapsed_ms = report.elapsed_ms,
            "{}",
            report
        );
        report
    }
}
