//! Compiled column set: per-row extraction followed by coercion to the declared types.

use std::sync::Arc;

use crate::expr::{Expr, Extractor};
use tsload_common::types::{Cell, ColumnSpec, ColumnType, Row};
use tsload_common::{ConfigError, EvalError, TsloadError};

#[derive(Debug, Clone)]
pub struct CompiledColumns {
    specs: Arc<[ColumnSpec]>,
    exprs: Vec<Arc<Expr>>,
    extractor: Arc<Extractor>,
}

impl CompiledColumns {
    /// Compile every column source. The first column is the time key and must be a
    /// timestamp.
    pub fn compile(specs: Vec<ColumnSpec>, extractor: Arc<Extractor>) -> Result<Self, TsloadError> {
        match specs.first() {
            None => {
                return Err(ConfigError::InvalidValue {
                    key: "columns".to_string(),
                    reason: "at least one column is required".to_string(),
                }
                .into());
            },
            Some(first) if !matches!(first.column_type, ColumnType::Timestamp(_)) => {
                return Err(ConfigError::InvalidColumn {
                    column: first.name.clone(),
                    reason: format!("first column must be a timestamp, found {}", first.column_type),
                }
                .into());
            },
            Some(_) => {},
        }

        Self::compile_tags(specs, extractor)
    }

    /// Compile tag sources; unlike data columns there is no time key and the set may
    /// be empty.
    pub fn compile_tags(specs: Vec<ColumnSpec>, extractor: Arc<Extractor>) -> Result<Self, TsloadError> {
        let exprs = specs
            .iter()
            .map(|spec| extractor.parse(&spec.source))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            specs: specs.into(),
            exprs,
            extractor,
        })
    }

    pub fn specs(&self) -> &[ColumnSpec] {
        &self.specs
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    /// Evaluate and coerce every column for `row`; fails on the first bad column
    pub fn extract_row(&self, row: &Row) -> Result<Vec<Cell>, EvalError> {
        self.specs
            .iter()
            .zip(&self.exprs)
            .map(|(spec, expr)| {
                let value = self.extractor.evaluate(expr, row)?;
                spec.column_type.coerce(&value)
            })
            .collect()
    }

    /// Evaluate every column without coercion, keyed by column name
    pub fn evaluate_row(&self, row: &Row) -> Result<Row, EvalError> {
        self.specs
            .iter()
            .zip(&self.exprs)
            .map(|(spec, expr)| Ok((spec.name.clone(), self.extractor.evaluate(expr, row)?)))
            .collect()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use tsload_common::types::{Precision, Value};

    fn specs() -> Vec<ColumnSpec> {
        vec![
            ColumnSpec::new(
                "ts",
                ColumnType::Timestamp(Precision::Millisecond),
                r#"date_parse(time, "YYYY-MM-DD HH:mm:ss")"#,
            ),
            ColumnSpec::new("current", ColumnType::Float, "2 * current"),
            ColumnSpec::new("phase", ColumnType::NChar(8), r#"pad_left(phase, "0", 3)"#),
        ]
    }

    #[test]
    fn test_extract_row_coerces_to_declared_types() {
        let columns = CompiledColumns::compile(specs(), Arc::new(Extractor::new())).unwrap();
        let row = Row::from_text([("time", "2022-11-23 09:46:25"), ("current", "1.25"), ("phase", "7")]);

        let cells = columns.extract_row(&row).unwrap();
        assert_eq!(
            cells,
            vec![
                Cell::Timestamp(1_669_196_785_000),
                Cell::Float(2.5),
                Cell::NChar("007".to_string())
            ]
        );
    }

    #[test]
    fn test_extract_row_reports_failures() {
        let columns = CompiledColumns::compile(specs(), Arc::new(Extractor::new())).unwrap();
        let row = Row::from_text([("time", "2022-11-23 09:46:25"), ("current", "abc"), ("phase", "7")]);
        assert!(columns.extract_row(&row).is_err());
    }

    #[test]
    fn test_evaluate_row_keys_values_by_column() {
        let tags = CompiledColumns::compile_tags(
            vec![
                ColumnSpec::new("code", ColumnType::Int, "code"),
                ColumnSpec::new("label", ColumnType::NChar(16), r#"concat(city, "-", code)"#),
            ],
            Arc::new(Extractor::new()),
        )
        .unwrap();
        let row = Row::from_text([("code", "100"), ("city", "sh"), ("extra", "x")]);

        let values = tags.evaluate_row(&row).unwrap();
        assert_eq!(values.len(), 2);
        assert_eq!(values.get("code"), Some(&Value::from("100")));
        assert_eq!(values.get("label"), Some(&Value::from("sh-100")));
        assert!(!values.contains("extra"));
    }

    #[test]
    fn test_compile_validates_columns() {
        let extractor = Arc::new(Extractor::new());
        assert!(CompiledColumns::compile(vec![], Arc::clone(&extractor)).is_err());
        assert!(CompiledColumns::compile(
            vec![ColumnSpec::new("v", ColumnType::Int, "v")],
            Arc::clone(&extractor)
        )
        .is_err());
        assert!(matches!(
            CompiledColumns::compile(
                vec![ColumnSpec::new("ts", ColumnType::Timestamp(Precision::Millisecond), "ts +")],
                extractor
            ),
            Err(TsloadError::Parse(_))
        ));
    }
}
