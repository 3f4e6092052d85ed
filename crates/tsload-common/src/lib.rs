//! tsload Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared types, error handling and logging for the tsload workspace.
//!
//! - **Error Handling**: parse, evaluation, configuration, sink and identity errors
//! - **Types**: extracted values, rows, column declarations and columnar batches
//! - **Logging**: `tracing` subscriber bootstrap
//!
//! # Example
//!
//! ```no_run
//! use tsload_common::types::{ColumnType, Precision, Value};
//!
//! fn main() -> tsload_common::Result<()> {
//!     let ty = ColumnType::parse("nchar(10)", Precision::Millisecond)?;
//!     let cell = ty.coerce(&Value::from("hello"))?;
//!     println!("{:?}", cell);
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod logging;
pub mod types;

// Re-export commonly used types
pub use error::{ConfigError, EvalError, IdentityError, ParseError, Result, SinkError, TsloadError};
