//! Expression evaluation and the shared [`Extractor`] engine.

use dashmap::DashMap;
use std::cmp::Ordering;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use tracing::debug;

use super::ast::{BinaryOp, Expr};
use super::functions;
use super::parser;
use crate::conflict::{ConflictCache, ConflictConfig};
use tsload_common::types::{Row, Value};
use tsload_common::{ConfigError, EvalError, ParseError};

/// Parses, caches and evaluates column and tag expressions.
///
/// One extractor is shared by every worker of a run: parsed trees are cached by their
/// exact source text, and the conflict cache used by `conflict_avoidance` lives here.
#[derive(Debug, Default)]
pub struct Extractor {
    cache: DashMap<String, Arc<Expr>>,
    conflict: OnceLock<Arc<ConflictCache>>,
    /// Serializes lazy creation of `conflict`
    conflict_init: Mutex<()>,
}

impl Extractor {
    /// Extractor whose conflict cache is created on first use
    pub fn new() -> Self {
        Self::default()
    }

    /// Extractor with an already configured conflict cache
    pub fn with_conflict_cache(cache: Arc<ConflictCache>) -> Self {
        Self {
            conflict: OnceLock::from(cache),
            ..Self::default()
        }
    }

    /// Build from optional configuration; without it the cache is created lazily
    pub fn from_config(conflict: Option<ConflictConfig>) -> Result<Self, ConfigError> {
        match conflict {
            Some(config) => Ok(Self::with_conflict_cache(Arc::new(ConflictCache::new(config)?))),
            None => Ok(Self::new()),
        }
    }

    /// Parse `text`, reusing the cached tree when the same text was seen before
    pub fn parse(&self, text: &str) -> Result<Arc<Expr>, ParseError> {
        if let Some(expr) = self.cache.get(text) {
            return Ok(Arc::clone(expr.value()));
        }

        let expr = Arc::new(parser::parse(text)?);
        debug!(expression = %text, "Compiled expression");
        // a concurrent parse of the same text produced an equal tree; keep whichever landed first
        let entry = self.cache.entry(text.to_string()).or_insert(expr);
        Ok(Arc::clone(entry.value()))
    }

    /// Evaluate a parsed expression against one row
    pub fn evaluate(&self, expr: &Expr, row: &Row) -> Result<Value, EvalError> {
        match expr {
            Expr::Literal(value) => Ok(value.clone()),
            Expr::Identifier(name) => Ok(row.get(name).cloned().unwrap_or(Value::Null)),
            Expr::Paren(inner) => self.evaluate(inner, row),
            Expr::Not(inner) => match self.evaluate(inner, row)? {
                Value::Bool(b) => Ok(Value::Bool(!b)),
                Value::Null => Err(EvalError::NullOperand {
                    expr: expr.to_string(),
                }),
                other => Err(EvalError::UnsupportedOperator {
                    expr: expr.to_string(),
                    op: "!".to_string(),
                    operand_type: other.type_name().to_string(),
                }),
            },
            Expr::Binary { op, left, right } => {
                let lhs = self.evaluate(left, row)?;
                let rhs = self.evaluate(right, row)?;
                binary(expr, *op, lhs, rhs)
            },
            Expr::Call { name, args } => functions::call(self, name, args, row),
        }
    }

    /// Parse (cached) and evaluate in one step
    pub fn extract(&self, text: &str, row: &Row) -> tsload_common::Result<Value> {
        let expr = self.parse(text)?;
        Ok(self.evaluate(&expr, row)?)
    }

    /// Number of distinct expression texts compiled so far
    pub fn cached_expressions(&self) -> usize {
        self.cache.len()
    }

    pub fn conflict_cache(&self) -> Option<&Arc<ConflictCache>> {
        self.conflict.get()
    }

    /// The conflict cache, creating it from `init` when none exists yet.
    ///
    /// `init` runs under a lock, so the cache is built once; later callers get the
    /// existing cache and their arguments are ignored. A failed `init` leaves the
    /// cache unset.
    pub(crate) fn conflict_cache_or_init<F>(&self, init: F) -> Result<&ConflictCache, EvalError>
    where
        F: FnOnce() -> Result<ConflictConfig, EvalError>,
    {
        if let Some(cache) = self.conflict.get() {
            return Ok(cache.as_ref());
        }

        let _guard = self
            .conflict_init
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(cache) = self.conflict.get() {
            return Ok(cache.as_ref());
        }

        let cache = Arc::new(ConflictCache::new(init()?)?);
        Ok(self.conflict.get_or_init(|| cache).as_ref())
    }
}

fn binary(expr: &Expr, op: BinaryOp, lhs: Value, rhs: Value) -> Result<Value, EvalError> {
    if lhs.is_null() || rhs.is_null() {
        return Err(EvalError::NullOperand {
            expr: expr.to_string(),
        });
    }

    match &lhs {
        Value::Int(_) | Value::Float(_) => numeric(expr, op, &lhs, &rhs),
        Value::String(l) => {
            let r = rhs.to_string();
            match op {
                BinaryOp::Equal => Ok(Value::Bool(*l == r)),
                BinaryOp::NotEqual => Ok(Value::Bool(*l != r)),
                BinaryOp::Add => Ok(Value::String(format!("{}{}", l, r))),
                _ => Err(unsupported(expr, op, &lhs)),
            }
        },
        Value::Bool(l) => {
            let r = rhs.as_bool().ok_or_else(|| mismatch(expr, op, &lhs, &rhs))?;
            match op {
                BinaryOp::And => Ok(Value::Bool(*l && r)),
                BinaryOp::Or => Ok(Value::Bool(*l || r)),
                BinaryOp::Equal => Ok(Value::Bool(*l == r)),
                BinaryOp::NotEqual => Ok(Value::Bool(*l != r)),
                _ => Err(unsupported(expr, op, &lhs)),
            }
        },
        Value::Timestamp(l) => {
            if !op.is_comparison() {
                return Err(unsupported(expr, op, &lhs));
            }
            let r = rhs.as_timestamp().ok_or_else(|| mismatch(expr, op, &lhs, &rhs))?;
            Ok(Value::Bool(compare(op, l.cmp(&r))))
        },
        Value::Null => Err(EvalError::NullOperand {
            expr: expr.to_string(),
        }),
    }
}

/// Numeric left operand: integer arithmetic when both sides are integral, float otherwise
fn numeric(expr: &Expr, op: BinaryOp, lhs: &Value, rhs: &Value) -> Result<Value, EvalError> {
    let rhs_int = match rhs {
        Value::Int(i) => Some(*i),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    };

    if let (Value::Int(l), Some(r)) = (lhs, rhs_int) {
        return integer(expr, op, *l, r);
    }

    let l = lhs.as_f64().ok_or_else(|| mismatch(expr, op, lhs, rhs))?;
    let r = match rhs {
        Value::Int(_) | Value::Float(_) | Value::String(_) => rhs.as_f64(),
        _ => None,
    }
    .ok_or_else(|| mismatch(expr, op, lhs, rhs))?;

    if op.is_comparison() {
        let ordering = l.partial_cmp(&r).ok_or_else(|| mismatch(expr, op, lhs, rhs))?;
        return Ok(Value::Bool(compare(op, ordering)));
    }

    match op {
        BinaryOp::Add => Ok(Value::Float(l + r)),
        BinaryOp::Subtract => Ok(Value::Float(l - r)),
        BinaryOp::Multiply => Ok(Value::Float(l * r)),
        BinaryOp::Divide if r == 0.0 => Ok(Value::Float(0.0)),
        BinaryOp::Divide => Ok(Value::Float(l / r)),
        _ => Err(unsupported(expr, op, lhs)),
    }
}

fn integer(expr: &Expr, op: BinaryOp, l: i64, r: i64) -> Result<Value, EvalError> {
    if op.is_comparison() {
        return Ok(Value::Bool(compare(op, l.cmp(&r))));
    }

    let result = match op {
        BinaryOp::Add => l.checked_add(r),
        BinaryOp::Subtract => l.checked_sub(r),
        BinaryOp::Multiply => l.checked_mul(r),
        BinaryOp::Divide if r == 0 => Some(0),
        BinaryOp::Divide => l.checked_div(r),
        _ => return Err(unsupported(expr, op, &Value::Int(l))),
    };

    result.map(Value::Int).ok_or_else(|| EvalError::Overflow {
        expr: expr.to_string(),
    })
}

fn compare(op: BinaryOp, ordering: Ordering) -> bool {
    match op {
        BinaryOp::Equal => ordering == Ordering::Equal,
        BinaryOp::NotEqual => ordering != Ordering::Equal,
        BinaryOp::Less => ordering == Ordering::Less,
        BinaryOp::LessEqual => ordering != Ordering::Greater,
        BinaryOp::Greater => ordering == Ordering::Greater,
        BinaryOp::GreaterEqual => ordering != Ordering::Less,
        _ => false,
    }
}

fn describe(value: &Value) -> String {
    match value {
        Value::String(s) => format!("string {:?}", s),
        other => format!("{} `{}`", other.type_name(), other),
    }
}

fn mismatch(expr: &Expr, op: BinaryOp, lhs: &Value, rhs: &Value) -> EvalError {
    EvalError::TypeMismatch {
        expr: expr.to_string(),
        op: op.symbol().to_string(),
        left: describe(lhs),
        right: describe(rhs),
    }
}

fn unsupported(expr: &Expr, op: BinaryOp, operand: &Value) -> EvalError {
    EvalError::UnsupportedOperator {
        expr: expr.to_string(),
        op: op.symbol().to_string(),
        operand_type: operand.type_name().to_string(),
    }
}
