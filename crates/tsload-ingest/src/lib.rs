//! tsload Ingest Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Imports delimited text into a time-series store.
//!
//! - **Expressions**: every destination column is computed from a source row by a small
//!   expression language with a function library (`expr`)
//! - **Conflict avoidance**: colliding timestamps are nudged to free slots (`conflict`)
//! - **Table identity**: tag values map to child table names (`identity`, `discovery`)
//! - **Ingestion**: rows are batched by a pool of workers and written to a [`Sink`]
//!   (`worker`, `pipeline`)
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//! use tsload_ingest::{reader, CompiledColumns, Extractor, ImportConfig, Ingestor, MemorySink};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ImportConfig::from_file("import.toml")?;
//!     let extractor = Arc::new(Extractor::from_config(config.conflict.clone())?);
//!     let columns = CompiledColumns::compile(config.column_specs()?, extractor)?;
//!
//!     let (rows, _reader) = reader::spawn_csv_reader("d_100_aaa.csv", config.queue_capacity);
//!     let report = Ingestor::new(columns, Arc::new(MemorySink::new()), config.batch_config())
//!         .with_concurrency(config.concurrency)
//!         .run("d_100_aaa", rows, CancellationToken::new())
//!         .await;
//!     println!("{}", report);
//!     Ok(())
//! }
//! ```

pub mod batch;
pub mod columns;
pub mod config;
pub mod conflict;
pub mod discovery;
pub mod expr;
pub mod identity;
pub mod pipeline;
pub mod reader;
pub mod sink;
pub mod stats;
pub mod worker;

pub use batch::{BatchConfig, Batcher};
pub use columns::CompiledColumns;
pub use config::ImportConfig;
pub use conflict::{ConflictCache, ConflictConfig};
pub use discovery::{discover_tables, DiscoveredTables, TableDescriptor};
pub use expr::Extractor;
pub use identity::TableIdentityResolver;
pub use pipeline::Ingestor;
pub use sink::{JsonLinesSink, MemorySink, Sink};
pub use stats::{IngestReport, IngestStats};
pub use worker::IngestWorker;
