//! Table discovery
//!
//! Before data is imported the tag file is scanned once to learn which destination
//! tables exist and which tag values each of them carries. A pool of workers resolves
//! rows into private maps; the maps are merged once every worker has finished, so the
//! first descriptor seen for an identity wins within a worker and the lowest worker
//! index wins across workers.

use futures::future::join_all;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info, warn};

use crate::columns::CompiledColumns;
use crate::identity::TableIdentityResolver;
use tsload_common::types::{Cell, Row, Value};
use tsload_common::TsloadError;

/// One destination table together with its tag values in declaration order
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableDescriptor {
    pub name: String,
    pub tags: Vec<(String, Cell)>,
}

#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct DiscoveredTables {
    pub tables: BTreeMap<String, TableDescriptor>,
    /// Rows whose identity or tag values could not be resolved
    pub failures: u64,
}

impl DiscoveredTables {
    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tables.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&TableDescriptor> {
        self.tables.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }

    fn merge(&mut self, other: DiscoveredTables) {
        for (name, descriptor) in other.tables {
            self.tables.entry(name).or_insert(descriptor);
        }
        self.failures += other.failures;
    }
}

/// Resolve every row of `rows` into its destination table.
///
/// Runs `concurrency` workers (at least one) until the queue is closed and drained.
pub async fn discover_tables(
    rows: mpsc::Receiver<Row>,
    resolver: Arc<TableIdentityResolver>,
    tags: Arc<CompiledColumns>,
    concurrency: usize,
) -> DiscoveredTables {
    let concurrency = concurrency.max(1);
    let shared = Arc::new(Mutex::new(rows));
    info!(workers = concurrency, tags = tags.len(), "Discovering tables");

    let handles = (0..concurrency).map(|worker| {
        let shared = Arc::clone(&shared);
        let resolver = Arc::clone(&resolver);
        let tags = Arc::clone(&tags);
        tokio::spawn(async move { discover_worker(worker, shared, &resolver, &tags).await })
    });

    let mut discovered = DiscoveredTables::default();
    for result in join_all(handles).await {
        match result {
            Ok(partial) => discovered.merge(partial),
            Err(e) => error!(error = %e, "Discovery worker failed"),
        }
    }

    info!(
        tables = discovered.len(),
        failures = discovered.failures,
        "Table discovery complete"
    );
    discovered
}

/// Run discovery over rows already in memory
pub async fn discover_from_rows(
    rows: Vec<Row>,
    resolver: Arc<TableIdentityResolver>,
    tags: Arc<CompiledColumns>,
    concurrency: usize,
) -> DiscoveredTables {
    let (tx, rx) = mpsc::channel(rows.len().max(1));
    let feeder = tokio::spawn(async move {
        for row in rows {
            if tx.send(row).await.is_err() {
                break;
            }
        }
    });

    let discovered = discover_tables(rx, resolver, tags, concurrency).await;
    if let Err(e) = feeder.await {
        error!(error = %e, "Discovery feeder failed");
    }
    discovered
}

async fn discover_worker(
    worker: usize,
    rows: Arc<Mutex<mpsc::Receiver<Row>>>,
    resolver: &TableIdentityResolver,
    tags: &CompiledColumns,
) -> DiscoveredTables {
    let mut local = DiscoveredTables::default();

    loop {
        let next = rows.lock().await.recv().await;
        let Some(row) = next else {
            break;
        };

        match describe(&row, resolver, tags) {
            Ok(descriptor) => {
                local
                    .tables
                    .entry(descriptor.name.clone())
                    .or_insert(descriptor);
            },
            Err(e) => {
                local.failures += 1;
                warn!(worker, error = %e, "Skipping tag row");
            },
        }
    }

    debug!(worker, tables = local.len(), "Discovery worker finished");
    local
}

fn describe(
    row: &Row,
    resolver: &TableIdentityResolver,
    tags: &CompiledColumns,
) -> Result<TableDescriptor, TsloadError> {
    let values = tags.evaluate_row(row)?;
    let name = resolver.resolve(&values)?;

    let tags = tags
        .specs()
        .iter()
        .map(|spec| {
            let value = values.get(&spec.name).cloned().unwrap_or(Value::Null);
            Ok((spec.name.clone(), spec.column_type.coerce(&value)?))
        })
        .collect::<Result<Vec<_>, TsloadError>>()?;

    Ok(TableDescriptor { name, tags })
}

/// Destination table of a data file: `prefix` followed by the file stem
pub fn table_name_for_file(path: &Path, prefix: &str) -> Option<String> {
    let stem = path.file_stem()?.to_str()?;
    Some(format!("{}{}", prefix, stem))
}
