//! Error types for tsload

use thiserror::Error;

/// Result type alias for tsload operations
pub type Result<T> = std::result::Result<T, TsloadError>;

/// Malformed expression text.
///
/// Column and tag expressions come from static configuration, so a parse error is
/// fatal at startup.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Failed to parse expression `{expression}` at position {position}: {message}")]
pub struct ParseError {
    /// The full expression text that failed to parse
    pub expression: String,
    /// Character offset of the offending token
    pub position: usize,
    pub message: String,
}

impl ParseError {
    pub fn new(expression: impl Into<String>, position: usize, message: impl Into<String>) -> Self {
        Self {
            expression: expression.into(),
            position,
            message: message.into(),
        }
    }
}

/// Per-row evaluation failure.
///
/// Variants carry the failing sub-expression (rendered back to source form) and, where
/// relevant, the operand values.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EvalError {
    #[error("Null operand in `{expr}`")]
    NullOperand { expr: String },

    #[error("Type mismatch in `{expr}`: {left} {op} {right}")]
    TypeMismatch {
        expr: String,
        op: String,
        left: String,
        right: String,
    },

    #[error("Unsupported operator `{op}` for {operand_type} in `{expr}`")]
    UnsupportedOperator {
        expr: String,
        op: String,
        operand_type: String,
    },

    #[error("Integer overflow in `{expr}`")]
    Overflow { expr: String },

    #[error("Unknown function: {0}")]
    UnknownFunction(String),

    #[error("Function {function} expects {expected} arguments, got {actual}")]
    Arity {
        function: String,
        expected: String,
        actual: usize,
    },

    #[error("Invalid argument to {function}: {message}")]
    InvalidArgument { function: String, message: String },

    #[error("Cannot convert {value} to {target}")]
    Coercion { value: String, target: String },

    #[error("Timestamp out of range: {0}")]
    TimestampOutOfRange(String),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Invalid static configuration; fatal at startup.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Unknown column type `{0}`")]
    UnknownColumnType(String),

    #[error("Invalid length in column type `{0}`")]
    InvalidLength(String),

    #[error("Column `{column}` has invalid type: {reason}")]
    InvalidColumn { column: String, reason: String },

    #[error("Conflict avoidance window must be positive, got {0} ms")]
    NonPositiveWindow(i64),

    #[error("Invalid table name pattern `{pattern}`: {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("Invalid configuration value for {key}: {reason}")]
    InvalidValue { key: String, reason: String },

    #[error("Malformed configuration in {origin}: {reason}")]
    Malformed { origin: String, reason: String },
}

/// Destination store failure; scoped to one batch.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SinkError {
    #[error("Failed to prepare insert into {target}: {message}")]
    Prepare { target: String, message: String },

    #[error("Failed to bind batch for {target}: {message}")]
    Bind { target: String, message: String },

    #[error("Failed to execute batch for {target}: {message}")]
    Execute { target: String, message: String },
}

/// Table identity could not be derived for a row.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum IdentityError {
    #[error("Tag referenced by `{{{placeholder}}}` is missing from the row")]
    MissingTag { placeholder: String },

    #[error("Failed to evaluate table name placeholder `{{{placeholder}}}`: {source}")]
    Eval {
        placeholder: String,
        #[source]
        source: EvalError,
    },
}

/// Main error type for tsload
#[derive(Error, Debug)]
pub enum TsloadError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Eval(#[from] EvalError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Sink(#[from] SinkError),

    #[error(transparent)]
    Identity(#[from] IdentityError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_error_carries_expression() {
        let err = ParseError::new("a + ", 4, "unexpected end of input");
        assert!(err.to_string().contains("`a + `"));
        assert!(err.to_string().contains("position 4"));
    }

    #[test]
    fn test_identity_error_message() {
        let err = IdentityError::MissingTag {
            placeholder: "name".to_string(),
        };
        assert_eq!(err.to_string(), "Tag referenced by `{name}` is missing from the row");
    }

    #[test]
    fn test_config_error_converts_into_eval_error() {
        let err: EvalError = ConfigError::NonPositiveWindow(0).into();
        assert!(matches!(err, EvalError::Config(ConfigError::NonPositiveWindow(0))));
    }
}
