//! Import configuration
//!
//! A TOML document describes the destination table, how each of its columns and tags
//! is computed from a source row, and how the run is sized:
//!
//! ```toml
//! batch_size = 1000
//! concurrency = 4
//! precision = "ms"
//!
//! [conflict]
//! window_ms = 1000
//!
//! [table]
//! name = "meters"
//! child_table_name = "d_{code}_{name}"
//!
//! [[table.columns]]
//! field = "ts"
//! type = "timestamp"
//! source = 'date_parse(time, "YYYY-MM-DD HH:mm:ss")'
//!
//! [[table.tags]]
//! field = "code"
//! type = "int"
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

use crate::batch::BatchConfig;
use crate::conflict::ConflictConfig;
use tsload_common::types::{ColumnSpec, ColumnType, Precision};
use tsload_common::ConfigError;

// ============================================================================
// Defaults
// ============================================================================

/// Rows per sink write
pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// Import workers per destination
pub const DEFAULT_CONCURRENCY: usize = 4;

/// Workers of the table discovery phase
pub const DEFAULT_DISCOVERY_CONCURRENCY: usize = 10;

/// Capacity of the bounded row queue between reader and workers
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;

pub const DEFAULT_FLUSH_INTERVAL_MS: u64 = 200;

/// Hard ceiling on worker counts
const MAX_CONCURRENCY: usize = 1024;

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

fn default_concurrency() -> usize {
    DEFAULT_CONCURRENCY
}

fn default_discovery_concurrency() -> usize {
    DEFAULT_DISCOVERY_CONCURRENCY
}

fn default_queue_capacity() -> usize {
    DEFAULT_QUEUE_CAPACITY
}

fn default_flush_interval_ms() -> u64 {
    DEFAULT_FLUSH_INTERVAL_MS
}

/// Complete import configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_discovery_concurrency")]
    pub discovery_concurrency: usize,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,
    /// Store precision applied to every timestamp column
    #[serde(default)]
    pub precision: Precision,
    #[serde(default)]
    pub conflict: Option<ConflictConfig>,
    pub table: TableConfig,
}

/// Destination super table and its child table naming
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableConfig {
    pub name: String,
    /// Placeholder pattern such as `d_{code}`; digest naming is used when absent
    #[serde(default)]
    pub child_table_name: Option<String>,
    /// Prefix joined to a data file stem to find its child table
    #[serde(default)]
    pub child_table_name_prefix: String,
    #[serde(default)]
    pub hash_prefix: Option<String>,
    pub columns: Vec<FieldConfig>,
    #[serde(default)]
    pub tags: Vec<FieldConfig>,
}

/// One column or tag declaration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldConfig {
    pub field: String,
    #[serde(rename = "type")]
    pub column_type: String,
    /// Expression computing the value; the field name itself when empty
    #[serde(default)]
    pub source: String,
}

impl FieldConfig {
    pub fn source(&self) -> &str {
        if self.source.trim().is_empty() {
            &self.field
        } else {
            &self.source
        }
    }

    fn to_spec(&self, precision: Precision) -> Result<ColumnSpec, ConfigError> {
        let column_type = ColumnType::parse(&self.column_type, precision)?;
        Ok(ColumnSpec::new(self.field.clone(), column_type, self.source()))
    }
}

impl ImportConfig {
    /// Load a TOML file, apply environment overrides and validate
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Malformed {
            origin: path.display().to_string(),
            reason: e.to_string(),
        })?;

        let mut config = Self::parse_toml(&text, &path.display().to_string())?;
        config.apply_env_overrides()?;
        config.validate()?;
        debug!(path = %path.display(), table = %config.table.name, "Loaded import configuration");
        Ok(config)
    }

    /// Parse and validate a TOML document; the environment is not consulted
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config = Self::parse_toml(text, "<inline>")?;
        config.validate()?;
        Ok(config)
    }

    fn parse_toml(text: &str, origin: &str) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|e| ConfigError::Malformed {
            origin: origin.to_string(),
            reason: e.to_string(),
        })
    }

    /// `TSLOAD_BATCH_SIZE` and `TSLOAD_CONCURRENCY` override the file
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(batch_size) = env_usize("TSLOAD_BATCH_SIZE")? {
            self.batch_size = batch_size;
        }
        if let Some(concurrency) = env_usize("TSLOAD_CONCURRENCY")? {
            self.concurrency = concurrency;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = |key: &str, value: usize| {
            if value == 0 {
                Err(ConfigError::InvalidValue {
                    key: key.to_string(),
                    reason: "must be greater than 0".to_string(),
                })
            } else {
                Ok(())
            }
        };
        positive("batch_size", self.batch_size)?;
        positive("concurrency", self.concurrency)?;
        positive("discovery_concurrency", self.discovery_concurrency)?;
        positive("queue_capacity", self.queue_capacity)?;

        for (key, value) in [
            ("concurrency", self.concurrency),
            ("discovery_concurrency", self.discovery_concurrency),
        ] {
            if value > MAX_CONCURRENCY {
                return Err(ConfigError::InvalidValue {
                    key: key.to_string(),
                    reason: format!("must be at most {}", MAX_CONCURRENCY),
                });
            }
        }

        if self.flush_interval_ms == 0 {
            return Err(ConfigError::InvalidValue {
                key: "flush_interval_ms".to_string(),
                reason: "must be greater than 0".to_string(),
            });
        }

        if let Some(conflict) = &self.conflict {
            if conflict.window_ms <= 0 {
                return Err(ConfigError::NonPositiveWindow(conflict.window_ms));
            }
        }

        if self.table.name.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "table.name".to_string(),
                reason: "cannot be empty".to_string(),
            });
        }

        // surfaces type errors and the timestamp-first rule at load time
        let columns = self.column_specs()?;
        match columns.first() {
            None => {
                return Err(ConfigError::InvalidValue {
                    key: "table.columns".to_string(),
                    reason: "at least one column is required".to_string(),
                })
            },
            Some(first) if !matches!(first.column_type, ColumnType::Timestamp(_)) => {
                return Err(ConfigError::InvalidColumn {
                    column: first.name.clone(),
                    reason: "first column must be a timestamp".to_string(),
                })
            },
            Some(_) => {},
        }
        self.tag_specs()?;

        Ok(())
    }

    pub fn column_specs(&self) -> Result<Vec<ColumnSpec>, ConfigError> {
        self.table
            .columns
            .iter()
            .map(|field| field.to_spec(self.precision))
            .collect()
    }

    pub fn tag_specs(&self) -> Result<Vec<ColumnSpec>, ConfigError> {
        self.table
            .tags
            .iter()
            .map(|field| field.to_spec(self.precision))
            .collect()
    }

    pub fn batch_config(&self) -> BatchConfig {
        BatchConfig::default()
            .with_batch_size(self.batch_size)
            .with_flush_interval(Duration::from_millis(self.flush_interval_ms))
    }
}

fn env_usize(key: &str) -> Result<Option<usize>, ConfigError> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue {
                key: key.to_string(),
                reason: format!("expected a positive integer, got `{}`", raw),
            }),
        Err(_) => Ok(None),
    }
}
