//! tsload - time-series CSV importer

use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tsload_common::logging::{init_logging, LogConfig, LogLevel};
use tsload_ingest::discovery::{discover_from_rows, table_name_for_file};
use tsload_ingest::{
    reader, CompiledColumns, DiscoveredTables, Extractor, ImportConfig, IngestReport, Ingestor,
    JsonLinesSink, MemorySink, Sink, TableIdentityResolver,
};

#[derive(Parser, Debug)]
#[command(name = "tsload")]
#[command(author, version, about = "Import CSV data into a time-series store")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Parser, Debug)]
enum Command {
    /// Import data files
    Import {
        /// Import configuration (TOML)
        #[arg(short, long)]
        conf: PathBuf,

        /// Data files (CSV with header); one child table per file
        #[arg(short, long, required = true, num_args = 1..)]
        data: Vec<PathBuf>,

        /// Destination table for every data file, instead of deriving it from the file name
        #[arg(short, long)]
        table: Option<String>,

        /// Write rows as JSON lines to this file instead of a dry run
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Tag file; data files whose table was not discovered in it are skipped
        #[arg(long)]
        tags: Option<PathBuf>,
    },

    /// List the child tables found in a tag file
    Tables {
        /// Import configuration (TOML)
        #[arg(short, long)]
        conf: PathBuf,

        /// Tag file (CSV with header)
        #[arg(long)]
        tags: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    // environment variables take precedence over the flag
    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("tsload")
        .build()
        .merge_env()?;
    let _guard = init_logging(&log_config)?;

    match cli.command {
        Command::Import {
            conf,
            data,
            table,
            output,
            tags,
        } => {
            let config = load_config(&conf)?;
            let reports = match output {
                Some(path) => {
                    let sink = Arc::new(JsonLinesSink::new(path));
                    import(&config, sink, &data, table.as_deref(), tags.as_deref()).await?
                },
                None => {
                    info!("No output given, running against the in-memory sink");
                    let sink = Arc::new(MemorySink::new());
                    import(&config, sink, &data, table.as_deref(), tags.as_deref()).await?
                },
            };

            let total: u64 = reports.iter().map(|r| r.total).sum();
            let errors: u64 = reports.iter().map(|r| r.errors).sum();
            info!(files = reports.len(), total, errors, "Import complete");
        },
        Command::Tables { conf, tags } => {
            let config = load_config(&conf)?;
            let extractor = Arc::new(Extractor::from_config(config.conflict.clone())?);
            let discovered = discover(&config, &tags, extractor).await?;
            for descriptor in discovered.tables.values() {
                println!("{}", serde_json::to_string(descriptor)?);
            }
        },
    }

    Ok(())
}

fn load_config(path: &Path) -> Result<ImportConfig> {
    ImportConfig::from_file(path)
        .with_context(|| format!("Failed to load configuration from {}", path.display()))
}

async fn discover(
    config: &ImportConfig,
    tags_path: &Path,
    extractor: Arc<Extractor>,
) -> Result<DiscoveredTables> {
    let resolver = TableIdentityResolver::from_options(
        config.table.child_table_name.as_deref(),
        config.table.hash_prefix.as_deref(),
        Arc::clone(&extractor),
    )?;
    let tags = CompiledColumns::compile_tags(config.tag_specs()?, extractor)?;

    let rows = reader::read_csv_rows(tags_path)
        .with_context(|| format!("Failed to read tag file {}", tags_path.display()))?;
    Ok(discover_from_rows(
        rows,
        Arc::new(resolver),
        Arc::new(tags),
        config.discovery_concurrency,
    )
    .await)
}

async fn import<S: Sink + 'static>(
    config: &ImportConfig,
    sink: Arc<S>,
    data: &[PathBuf],
    table: Option<&str>,
    tags: Option<&Path>,
) -> Result<Vec<IngestReport>> {
    let extractor = Arc::new(Extractor::from_config(config.conflict.clone())?);
    let columns = CompiledColumns::compile(config.column_specs()?, Arc::clone(&extractor))?;

    let discovered = match tags {
        Some(path) => Some(discover(config, path, Arc::clone(&extractor)).await?),
        None => None,
    };

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, flushing pending rows");
            on_signal.cancel();
        }
    });

    let ingestor = Ingestor::new(columns, sink, config.batch_config()).with_concurrency(config.concurrency);
    let mut reports = Vec::with_capacity(data.len());

    for path in data {
        if cancel.is_cancelled() {
            break;
        }

        let target = match table {
            Some(name) => name.to_string(),
            None => table_name_for_file(path, &config.table.child_table_name_prefix)
                .with_context(|| format!("Cannot derive a table name from {}", path.display()))?,
        };

        if let Some(discovered) = &discovered {
            if !discovered.contains(&target) {
                warn!(path = %path.display(), target = %target, "Table not found in tag file, skipping");
                continue;
            }
        }

        let (rows, reader) = reader::spawn_csv_reader(path, config.queue_capacity);
        let report = ingestor.run(&target, rows, cancel.clone()).await;

        match reader.await {
            Ok(Ok(_)) => {},
            Ok(Err(e)) => error!(path = %path.display(), error = %e, "Failed to read data file"),
            Err(e) => error!(path = %path.display(), error = %e, "Reader task failed"),
        }
        reports.push(report);
    }

    Ok(reports)
}
