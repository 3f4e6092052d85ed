//! Destination contract and the sinks shipped with the importer.

use async_trait::async_trait;
use serde_json::{json, Map, Value as JsonValue};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;

use tsload_common::types::{Cell, ColumnSpec, ColumnarBatch};
use tsload_common::SinkError;

/// A destination accepting typed columnar batches.
///
/// Each worker prepares its insert once and then binds and executes one batch per
/// flush. Implementations must tolerate several workers writing concurrently.
#[async_trait]
pub trait Sink: Send + Sync {
    /// Per-worker prepared insert
    type Prepared: Send + Sync + 'static;

    async fn prepare_insert(
        &self,
        target: &str,
        columns: &[ColumnSpec],
    ) -> Result<Self::Prepared, SinkError>;

    async fn bind_and_execute(
        &self,
        prepared: &Self::Prepared,
        batch: &ColumnarBatch,
    ) -> Result<(), SinkError>;
}

#[async_trait]
impl<S: Sink + ?Sized> Sink for Arc<S> {
    type Prepared = S::Prepared;

    async fn prepare_insert(
        &self,
        target: &str,
        columns: &[ColumnSpec],
    ) -> Result<Self::Prepared, SinkError> {
        (**self).prepare_insert(target, columns).await
    }

    async fn bind_and_execute(
        &self,
        prepared: &Self::Prepared,
        batch: &ColumnarBatch,
    ) -> Result<(), SinkError> {
        (**self).bind_and_execute(prepared, batch).await
    }
}

/// Insert prepared by [`MemorySink`]
#[derive(Debug, Clone)]
pub struct MemoryInsert {
    pub target: String,
    pub columns: Vec<String>,
}

/// Records every executed batch; used for dry runs and tests.
///
/// Failures can be injected: the first `n` prepares or executes fail.
#[derive(Debug, Default)]
pub struct MemorySink {
    batches: Mutex<Vec<ColumnarBatch>>,
    prepares: AtomicUsize,
    prepare_failures: AtomicUsize,
    execute_failures: AtomicUsize,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_prepare_failures(self, n: usize) -> Self {
        self.prepare_failures.store(n, Ordering::SeqCst);
        self
    }

    pub fn with_execute_failures(self, n: usize) -> Self {
        self.execute_failures.store(n, Ordering::SeqCst);
        self
    }

    /// Batches executed so far, in completion order
    pub fn batches(&self) -> Vec<ColumnarBatch> {
        self.batches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Row counts of the executed batches
    pub fn batch_sizes(&self) -> Vec<usize> {
        self.batches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(ColumnarBatch::num_rows)
            .collect()
    }

    pub fn total_rows(&self) -> usize {
        self.batch_sizes().iter().sum()
    }

    /// Successful prepares
    pub fn prepare_count(&self) -> usize {
        self.prepares.load(Ordering::SeqCst)
    }

    fn take_failure(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl Sink for MemorySink {
    type Prepared = MemoryInsert;

    async fn prepare_insert(
        &self,
        target: &str,
        columns: &[ColumnSpec],
    ) -> Result<Self::Prepared, SinkError> {
        if Self::take_failure(&self.prepare_failures) {
            return Err(SinkError::Prepare {
                target: target.to_string(),
                message: "injected prepare failure".to_string(),
            });
        }

        self.prepares.fetch_add(1, Ordering::SeqCst);
        Ok(MemoryInsert {
            target: target.to_string(),
            columns: columns.iter().map(|c| c.name.clone()).collect(),
        })
    }

    async fn bind_and_execute(
        &self,
        prepared: &Self::Prepared,
        batch: &ColumnarBatch,
    ) -> Result<(), SinkError> {
        if batch.columns.len() != prepared.columns.len() {
            return Err(SinkError::Bind {
                target: prepared.target.clone(),
                message: format!(
                    "expected {} columns, got {}",
                    prepared.columns.len(),
                    batch.columns.len()
                ),
            });
        }
        if Self::take_failure(&self.execute_failures) {
            return Err(SinkError::Execute {
                target: prepared.target.clone(),
                message: "injected execute failure".to_string(),
            });
        }

        self.batches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(batch.clone());
        Ok(())
    }
}

/// Insert prepared by [`JsonLinesSink`]
#[derive(Debug, Clone)]
pub struct JsonLinesInsert {
    target: String,
    columns: Vec<String>,
}

/// Appends one JSON object per row to a file.
///
/// Every object carries the destination table under `_table`.
#[derive(Debug)]
pub struct JsonLinesSink {
    path: PathBuf,
    file: tokio::sync::Mutex<Option<tokio::fs::File>>,
}

impl JsonLinesSink {
    /// The file is created (or appended to) on the first prepare
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            file: tokio::sync::Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn encode(prepared: &JsonLinesInsert, batch: &ColumnarBatch) -> Result<Vec<u8>, SinkError> {
        let bind_error = |message: String| SinkError::Bind {
            target: prepared.target.clone(),
            message,
        };

        let mut out = Vec::new();
        for index in 0..batch.num_rows() {
            let cells = batch
                .row(index)
                .ok_or_else(|| bind_error(format!("row {} is incomplete", index)))?;

            let mut object = Map::with_capacity(cells.len() + 1);
            object.insert("_table".to_string(), json!(batch.target));
            for (name, cell) in prepared.columns.iter().zip(cells) {
                object.insert(name.clone(), cell_to_json(cell));
            }

            serde_json::to_writer(&mut out, &object).map_err(|e| bind_error(e.to_string()))?;
            out.push(b'\n');
        }
        Ok(out)
    }
}

fn cell_to_json(cell: &Cell) -> JsonValue {
    match cell {
        Cell::Null => JsonValue::Null,
        Cell::Timestamp(v) | Cell::BigInt(v) => json!(v),
        Cell::TinyInt(v) => json!(v),
        Cell::SmallInt(v) => json!(v),
        Cell::Int(v) => json!(v),
        Cell::UTinyInt(v) => json!(v),
        Cell::USmallInt(v) => json!(v),
        Cell::UInt(v) => json!(v),
        Cell::UBigInt(v) => json!(v),
        Cell::Float(v) => json!(v),
        Cell::Double(v) => json!(v),
        Cell::Bool(v) => json!(v),
        Cell::NChar(v) => json!(v),
        Cell::Binary(bytes) | Cell::Json(bytes) => json!(String::from_utf8_lossy(bytes)),
    }
}

#[async_trait]
impl Sink for JsonLinesSink {
    type Prepared = JsonLinesInsert;

    async fn prepare_insert(
        &self,
        target: &str,
        columns: &[ColumnSpec],
    ) -> Result<Self::Prepared, SinkError> {
        let mut file = self.file.lock().await;
        if file.is_none() {
            let opened = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)
                .await
                .map_err(|e| SinkError::Prepare {
                    target: target.to_string(),
                    message: format!("{}: {}", self.path.display(), e),
                })?;
            *file = Some(opened);
        }

        Ok(JsonLinesInsert {
            target: target.to_string(),
            columns: columns.iter().map(|c| c.name.clone()).collect(),
        })
    }

    async fn bind_and_execute(
        &self,
        prepared: &Self::Prepared,
        batch: &ColumnarBatch,
    ) -> Result<(), SinkError> {
        let payload = Self::encode(prepared, batch)?;
        let execute_error = |message: String| SinkError::Execute {
            target: prepared.target.clone(),
            message,
        };

        let mut guard = self.file.lock().await;
        let file = guard
            .as_mut()
            .ok_or_else(|| execute_error("insert was not prepared".to_string()))?;
        file.write_all(&payload)
            .await
            .map_err(|e| execute_error(e.to_string()))?;
        file.flush().await.map_err(|e| execute_error(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use tsload_common::types::{ColumnType, Precision};

    fn specs() -> Vec<ColumnSpec> {
        vec![
            ColumnSpec::new("ts", ColumnType::Timestamp(Precision::Millisecond), "ts"),
            ColumnSpec::new("name", ColumnType::NChar(10), "name"),
        ]
    }

    fn batch(rows: usize) -> ColumnarBatch {
        let rows = (0..rows)
            .map(|i| vec![Cell::Timestamp(i as i64), Cell::NChar(format!("n{}", i))])
            .collect();
        ColumnarBatch::from_rows("t_1", &specs(), rows)
    }

    #[tokio::test]
    async fn test_memory_sink_records_batches() {
        let sink = MemorySink::new();
        let prepared = sink.prepare_insert("t_1", &specs()).await.unwrap();
        sink.bind_and_execute(&prepared, &batch(3)).await.unwrap();
        sink.bind_and_execute(&prepared, &batch(1)).await.unwrap();

        assert_eq!(sink.batch_sizes(), vec![3, 1]);
        assert_eq!(sink.total_rows(), 4);
        assert_eq!(sink.prepare_count(), 1);
    }

    #[tokio::test]
    async fn test_memory_sink_injected_failures() {
        let sink = MemorySink::new().with_prepare_failures(1).with_execute_failures(1);
        assert!(matches!(
            sink.prepare_insert("t_1", &specs()).await,
            Err(SinkError::Prepare { .. })
        ));
        let prepared = sink.prepare_insert("t_1", &specs()).await.unwrap();
        assert!(matches!(
            sink.bind_and_execute(&prepared, &batch(2)).await,
            Err(SinkError::Execute { .. })
        ));
        sink.bind_and_execute(&prepared, &batch(2)).await.unwrap();
        assert_eq!(sink.batch_sizes(), vec![2]);
    }

    #[tokio::test]
    async fn test_json_lines_sink_appends_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.jsonl");
        let sink = JsonLinesSink::new(&path);

        let prepared = sink.prepare_insert("t_1", &specs()).await.unwrap();
        sink.bind_and_execute(&prepared, &batch(2)).await.unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<JsonValue> = content
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1], json!({"_table": "t_1", "ts": 1, "name": "n1"}));
    }

    #[tokio::test]
    async fn test_json_lines_sink_requires_prepare() {
        let dir = tempfile::tempdir().unwrap();
        let sink = JsonLinesSink::new(dir.path().join("out.jsonl"));
        let prepared = JsonLinesInsert {
            target: "t_1".to_string(),
            columns: vec!["ts".to_string(), "name".to_string()],
        };
        assert!(matches!(
            sink.bind_and_execute(&prepared, &batch(1)).await,
            Err(SinkError::Execute { .. })
        ));
    }
}
