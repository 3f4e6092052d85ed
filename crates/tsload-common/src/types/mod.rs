//! Common types used across tsload

pub mod column;
pub mod value;

pub use column::{Cell, ColumnData, ColumnSpec, ColumnType, ColumnarBatch, Precision};
pub use value::{Row, Value};
