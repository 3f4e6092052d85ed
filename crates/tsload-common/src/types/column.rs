//! Column declarations and the typed columnar form handed to a sink.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::value::Value;
use crate::error::{ConfigError, EvalError};

/// Time precision of the destination store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Precision {
    #[default]
    #[serde(rename = "ms")]
    Millisecond,
    #[serde(rename = "us")]
    Microsecond,
    #[serde(rename = "ns")]
    Nanosecond,
}

impl Precision {
    /// Parse a precision name, falling back to milliseconds for anything unknown
    pub fn parse_or_default(s: &str) -> Self {
        s.parse().unwrap_or_default()
    }

    /// Length of one unit in nanoseconds
    pub fn unit_nanos(self) -> i64 {
        match self {
            Precision::Millisecond => 1_000_000,
            Precision::Microsecond => 1_000,
            Precision::Nanosecond => 1,
        }
    }

    /// Epoch offset of `ts` in units of this precision
    pub fn quantize(self, ts: &DateTime<Utc>) -> Option<i64> {
        match self {
            Precision::Millisecond => Some(ts.timestamp_millis()),
            Precision::Microsecond => Some(ts.timestamp_micros()),
            Precision::Nanosecond => ts.timestamp_nanos_opt(),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Precision::Millisecond => "ms",
            Precision::Microsecond => "us",
            Precision::Nanosecond => "ns",
        }
    }
}

impl FromStr for Precision {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ms" => Ok(Precision::Millisecond),
            "us" => Ok(Precision::Microsecond),
            "ns" => Ok(Precision::Nanosecond),
            other => Err(ConfigError::InvalidValue {
                key: "precision".to_string(),
                reason: format!("expected ms, us or ns, got `{}`", other),
            }),
        }
    }
}

impl fmt::Display for Precision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Declared type of a destination column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    Timestamp(Precision),
    TinyInt,
    SmallInt,
    Int,
    BigInt,
    UTinyInt,
    USmallInt,
    UInt,
    UBigInt,
    Float,
    Double,
    Bool,
    /// Fixed-width binary; `varchar(n)` declarations map here as well
    Binary(usize),
    /// Fixed-width unicode text
    NChar(usize),
    Json(usize),
}

impl ColumnType {
    /// Parse a type declaration such as `int unsigned` or `nchar(10)`.
    ///
    /// Timestamp columns take the store precision.
    pub fn parse(decl: &str, precision: Precision) -> Result<Self, ConfigError> {
        let normalized = decl.split_whitespace().collect::<Vec<_>>().join(" ").to_ascii_lowercase();

        let ty = match normalized.as_str() {
            "timestamp" => ColumnType::Timestamp(precision),
            "tinyint" => ColumnType::TinyInt,
            "smallint" => ColumnType::SmallInt,
            "int" => ColumnType::Int,
            "bigint" => ColumnType::BigInt,
            "tinyint unsigned" => ColumnType::UTinyInt,
            "smallint unsigned" => ColumnType::USmallInt,
            "int unsigned" => ColumnType::UInt,
            "bigint unsigned" => ColumnType::UBigInt,
            "float" => ColumnType::Float,
            "double" => ColumnType::Double,
            "bool" => ColumnType::Bool,
            other => {
                let (base, length) = split_length(other, decl)?;
                match base {
                    "binary" | "varchar" => ColumnType::Binary(length),
                    "nchar" => ColumnType::NChar(length),
                    "json" => ColumnType::Json(length),
                    _ => return Err(ConfigError::UnknownColumnType(decl.to_string())),
                }
            },
        };

        Ok(ty)
    }

    /// Convert an extracted value into a cell of this type
    pub fn coerce(&self, value: &Value) -> Result<Cell, EvalError> {
        if value.is_null() {
            return Ok(Cell::Null);
        }

        let cell = match self {
            ColumnType::Timestamp(precision) => match value {
                Value::Int(i) => Cell::Timestamp(*i),
                other => {
                    let ts = other.as_timestamp().ok_or_else(|| self.coercion_error(value))?;
                    Cell::Timestamp(precision.quantize(&ts).ok_or_else(|| {
                        EvalError::TimestampOutOfRange(ts.to_rfc3339())
                    })?)
                },
            },
            ColumnType::TinyInt => Cell::TinyInt(self.integer(value)?),
            ColumnType::SmallInt => Cell::SmallInt(self.integer(value)?),
            ColumnType::Int => Cell::Int(self.integer(value)?),
            ColumnType::BigInt => Cell::BigInt(self.integer(value)?),
            ColumnType::UTinyInt => Cell::UTinyInt(self.integer(value)?),
            ColumnType::USmallInt => Cell::USmallInt(self.integer(value)?),
            ColumnType::UInt => Cell::UInt(self.integer(value)?),
            ColumnType::UBigInt => Cell::UBigInt(self.integer(value)?),
            ColumnType::Float => {
                Cell::Float(value.as_f64().ok_or_else(|| self.coercion_error(value))? as f32)
            },
            ColumnType::Double => {
                Cell::Double(value.as_f64().ok_or_else(|| self.coercion_error(value))?)
            },
            ColumnType::Bool => Cell::Bool(value.as_bool().ok_or_else(|| self.coercion_error(value))?),
            ColumnType::Binary(length) => {
                let bytes = value.to_string().into_bytes();
                if bytes.len() > *length {
                    return Err(self.coercion_error(value));
                }
                Cell::Binary(bytes)
            },
            ColumnType::NChar(length) => {
                let text = value.to_string();
                if text.chars().count() > *length {
                    return Err(self.coercion_error(value));
                }
                Cell::NChar(text)
            },
            ColumnType::Json(length) => {
                let bytes = value.to_string().into_bytes();
                if bytes.len() > *length {
                    return Err(self.coercion_error(value));
                }
                Cell::Json(bytes)
            },
        };

        Ok(cell)
    }

    fn integer<T: TryFrom<i64>>(&self, value: &Value) -> Result<T, EvalError> {
        value
            .as_i64()
            .and_then(|i| T::try_from(i).ok())
            .ok_or_else(|| self.coercion_error(value))
    }

    fn coercion_error(&self, value: &Value) -> EvalError {
        EvalError::Coercion {
            value: format!("{} `{}`", value.type_name(), value),
            target: self.to_string(),
        }
    }
}

fn split_length<'a>(normalized: &'a str, original: &str) -> Result<(&'a str, usize), ConfigError> {
    let open = normalized
        .find('(')
        .ok_or_else(|| ConfigError::UnknownColumnType(original.to_string()))?;
    let inner = normalized[open + 1..]
        .strip_suffix(')')
        .ok_or_else(|| ConfigError::InvalidLength(original.to_string()))?;
    let length = inner
        .trim()
        .parse::<usize>()
        .ok()
        .filter(|n| *n > 0)
        .ok_or_else(|| ConfigError::InvalidLength(original.to_string()))?;

    Ok((normalized[..open].trim(), length))
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnType::Timestamp(_) => f.write_str("timestamp"),
            ColumnType::TinyInt => f.write_str("tinyint"),
            ColumnType::SmallInt => f.write_str("smallint"),
            ColumnType::Int => f.write_str("int"),
            ColumnType::BigInt => f.write_str("bigint"),
            ColumnType::UTinyInt => f.write_str("tinyint unsigned"),
            ColumnType::USmallInt => f.write_str("smallint unsigned"),
            ColumnType::UInt => f.write_str("int unsigned"),
            ColumnType::UBigInt => f.write_str("bigint unsigned"),
            ColumnType::Float => f.write_str("float"),
            ColumnType::Double => f.write_str("double"),
            ColumnType::Bool => f.write_str("bool"),
            ColumnType::Binary(n) => write!(f, "binary({})", n),
            ColumnType::NChar(n) => write!(f, "nchar({})", n),
            ColumnType::Json(n) => write!(f, "json({})", n),
        }
    }
}

/// Static description of one destination column
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub name: String,
    pub column_type: ColumnType,
    /// Expression producing the column value
    pub source: String,
}

impl ColumnSpec {
    pub fn new(name: impl Into<String>, column_type: ColumnType, source: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            column_type,
            source: source.into(),
        }
    }
}

/// A single typed value ready for binding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Cell {
    Null,
    /// Epoch offset in the column's precision
    Timestamp(i64),
    TinyInt(i8),
    SmallInt(i16),
    Int(i32),
    BigInt(i64),
    UTinyInt(u8),
    USmallInt(u16),
    UInt(u32),
    UBigInt(u64),
    Float(f32),
    Double(f64),
    Bool(bool),
    Binary(Vec<u8>),
    NChar(String),
    Json(Vec<u8>),
}

/// All values of one column within a batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnData {
    pub name: String,
    pub column_type: ColumnType,
    pub cells: Vec<Cell>,
}

/// Column-oriented batch bound to one destination table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnarBatch {
    pub target: String,
    pub columns: Vec<ColumnData>,
}

impl ColumnarBatch {
    /// Transpose row-major cells into columns.
    ///
    /// Every row must hold one cell per column spec.
    pub fn from_rows(target: impl Into<String>, specs: &[ColumnSpec], rows: Vec<Vec<Cell>>) -> Self {
        let mut columns: Vec<ColumnData> = specs
            .iter()
            .map(|spec| ColumnData {
                name: spec.name.clone(),
                column_type: spec.column_type,
                cells: Vec::with_capacity(rows.len()),
            })
            .collect();

        for row in rows {
            debug_assert_eq!(row.len(), columns.len());
            for (column, cell) in columns.iter_mut().zip(row) {
                column.cells.push(cell);
            }
        }

        Self {
            target: target.into(),
            columns,
        }
    }

    pub fn num_rows(&self) -> usize {
        self.columns.first().map_or(0, |c| c.cells.len())
    }

    pub fn is_empty(&self) -> bool {
        self.num_rows() == 0
    }

    /// Row-major view of row `index`
    pub fn row(&self, index: usize) -> Option<Vec<&Cell>> {
        self.columns.iter().map(|c| c.cells.get(index)).collect()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_parse_column_types() {
        let p = Precision::Microsecond;
        assert_eq!(ColumnType::parse("timestamp", p).unwrap(), ColumnType::Timestamp(p));
        assert_eq!(ColumnType::parse("INT", p).unwrap(), ColumnType::Int);
        assert_eq!(ColumnType::parse("int  unsigned", p).unwrap(), ColumnType::UInt);
        assert_eq!(ColumnType::parse("varchar(10)", p).unwrap(), ColumnType::Binary(10));
        assert_eq!(ColumnType::parse("nchar( 20 )", p).unwrap(), ColumnType::NChar(20));
        assert_eq!(ColumnType::parse("json(4096)", p).unwrap(), ColumnType::Json(4096));
    }

    #[test]
    fn test_parse_column_type_errors() {
        let p = Precision::Millisecond;
        assert!(matches!(
            ColumnType::parse("decimal", p),
            Err(ConfigError::UnknownColumnType(_))
        ));
        assert!(matches!(
            ColumnType::parse("binary(abc)", p),
            Err(ConfigError::InvalidLength(_))
        ));
        assert!(matches!(
            ColumnType::parse("nchar(0)", p),
            Err(ConfigError::InvalidLength(_))
        ));
        assert!(matches!(
            ColumnType::parse("binary(10", p),
            Err(ConfigError::InvalidLength(_))
        ));
    }

    #[test]
    fn test_precision_fallback() {
        assert_eq!(Precision::parse_or_default("us"), Precision::Microsecond);
        assert_eq!(Precision::parse_or_default("seconds"), Precision::Millisecond);
    }

    #[test]
    fn test_coerce_integers_with_range_check() {
        assert_eq!(ColumnType::TinyInt.coerce(&Value::from("12")).unwrap(), Cell::TinyInt(12));
        assert!(ColumnType::TinyInt.coerce(&Value::Int(300)).is_err());
        assert!(ColumnType::UInt.coerce(&Value::Int(-1)).is_err());
        assert_eq!(ColumnType::BigInt.coerce(&Value::Null).unwrap(), Cell::Null);
    }

    #[test]
    fn test_coerce_timestamp_uses_precision() {
        let ts = Utc.timestamp_opt(1_700_000_000, 123_456_789).unwrap();
        let value = Value::Timestamp(ts);

        assert_eq!(
            ColumnType::Timestamp(Precision::Millisecond).coerce(&value).unwrap(),
            Cell::Timestamp(1_700_000_000_123)
        );
        assert_eq!(
            ColumnType::Timestamp(Precision::Nanosecond).coerce(&value).unwrap(),
            Cell::Timestamp(1_700_000_000_123_456_789)
        );
        assert!(ColumnType::Timestamp(Precision::Millisecond)
            .coerce(&Value::from("not a time"))
            .is_err());
    }

    #[test]
    fn test_coerce_text_respects_width() {
        assert_eq!(
            ColumnType::NChar(3).coerce(&Value::from("abc")).unwrap(),
            Cell::NChar("abc".to_string())
        );
        assert!(ColumnType::NChar(2).coerce(&Value::from("abc")).is_err());
        assert_eq!(
            ColumnType::Binary(8).coerce(&Value::Int(42)).unwrap(),
            Cell::Binary(b"42".to_vec())
        );
    }

    proptest::proptest! {
        #[test]
        fn prop_small_integer_coercion_checks_range(v in proptest::prelude::any::<i64>()) {
            let text = Value::from(v.to_string());
            match i16::try_from(v) {
                Ok(expected) => {
                    proptest::prop_assert_eq!(ColumnType::SmallInt.coerce(&text).unwrap(), Cell::SmallInt(expected));
                },
                Err(_) => proptest::prop_assert!(ColumnType::SmallInt.coerce(&text).is_err()),
            }
        }
    }

    #[test]
    fn test_columnar_batch_transposes_rows() {
        let specs = vec![
            ColumnSpec::new("ts", ColumnType::Timestamp(Precision::Millisecond), "ts"),
            ColumnSpec::new("v", ColumnType::Int, "v"),
        ];
        let rows = vec![
            vec![Cell::Timestamp(1), Cell::Int(10)],
            vec![Cell::Timestamp(2), Cell::Int(20)],
        ];

        let batch = ColumnarBatch::from_rows("t_1", &specs, rows);
        assert_eq!(batch.num_rows(), 2);
        assert_eq!(batch.columns[1].cells, vec![Cell::Int(10), Cell::Int(20)]);
        assert_eq!(batch.row(1).unwrap(), vec![&Cell::Timestamp(2), &Cell::Int(20)]);
        assert!(batch.row(2).is_none());
    }
}
