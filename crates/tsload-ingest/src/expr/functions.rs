//! Built-in functions callable from expressions.
//!
//! Functions receive their argument sub-expressions unevaluated and decide themselves
//! what to evaluate; `conflict_avoidance` only reads its window and precision arguments
//! when it has to create the cache.

use chrono::{DateTime, Utc};
use std::fmt;

use super::ast::Expr;
use super::datetime::{DatePattern, Zone};
use super::eval::Extractor;
use crate::conflict::ConflictConfig;
use tsload_common::types::{Row, Value};
use tsload_common::EvalError;

/// Longest string `pad_left`/`pad_right` will build, in characters
pub const MAX_PADDED_LENGTH: i64 = 1 << 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Function {
    PadLeft,
    PadRight,
    Substring,
    Concat,
    IndexOf,
    DateParse,
    ConflictAvoidance,
}

impl Function {
    /// Look up a function by name or legacy alias
    pub fn resolve(name: &str) -> Option<Self> {
        match name {
            "pad_left" | "left_pad" => Some(Function::PadLeft),
            "pad_right" | "right_pad" => Some(Function::PadRight),
            "substring" | "sub_str" => Some(Function::Substring),
            "concat" | "contact" => Some(Function::Concat),
            "index_of" => Some(Function::IndexOf),
            "date_parse" => Some(Function::DateParse),
            "conflict_avoidance" | "avoid_datetime_conflict" => Some(Function::ConflictAvoidance),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Function::PadLeft => "pad_left",
            Function::PadRight => "pad_right",
            Function::Substring => "substring",
            Function::Concat => "concat",
            Function::IndexOf => "index_of",
            Function::DateParse => "date_parse",
            Function::ConflictAvoidance => "conflict_avoidance",
        }
    }

    /// Accepted argument counts, inclusive
    fn arity(self) -> (usize, Option<usize>) {
        match self {
            Function::PadLeft | Function::PadRight | Function::Substring => (3, Some(3)),
            Function::Concat => (0, None),
            Function::IndexOf => (2, Some(2)),
            Function::DateParse | Function::ConflictAvoidance => (2, Some(3)),
        }
    }

    fn check_arity(self, actual: usize) -> Result<(), EvalError> {
        let (min, max) = self.arity();
        if actual >= min && max.is_none_or(|max| actual <= max) {
            return Ok(());
        }

        let expected = match max {
            Some(max) if max == min => min.to_string(),
            Some(max) => format!("{} to {}", min, max),
            None => format!("at least {}", min),
        };
        Err(EvalError::Arity {
            function: self.name().to_string(),
            expected,
            actual,
        })
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Dispatch a call by name
pub(crate) fn call(
    extractor: &Extractor,
    name: &str,
    args: &[Expr],
    row: &Row,
) -> Result<Value, EvalError> {
    let function = Function::resolve(name).ok_or_else(|| EvalError::UnknownFunction(name.to_string()))?;
    function.check_arity(args.len())?;

    let ctx = CallContext {
        extractor,
        function,
        args,
        row,
    };

    match function {
        Function::PadLeft => ctx.pad(Side::Left),
        Function::PadRight => ctx.pad(Side::Right),
        Function::Substring => ctx.substring(),
        Function::Concat => ctx.concat(),
        Function::IndexOf => ctx.index_of(),
        Function::DateParse => ctx.date_parse(),
        Function::ConflictAvoidance => ctx.conflict_avoidance(),
    }
}

#[derive(Clone, Copy)]
enum Side {
    Left,
    Right,
}

struct CallContext<'a> {
    extractor: &'a Extractor,
    function: Function,
    args: &'a [Expr],
    row: &'a Row,
}

impl CallContext<'_> {
    fn eval(&self, index: usize) -> Result<Value, EvalError> {
        match self.args.get(index) {
            Some(arg) => self.extractor.evaluate(arg, self.row),
            None => Ok(Value::Null),
        }
    }

    fn string(&self, index: usize) -> Result<String, EvalError> {
        Ok(self.eval(index)?.to_string())
    }

    fn int(&self, index: usize, what: &str) -> Result<i64, EvalError> {
        let value = self.eval(index)?;
        value
            .as_i64()
            .ok_or_else(|| self.invalid(format!("{} must be an integer, got {} `{}`", what, value.type_name(), value)))
    }

    fn invalid(&self, message: impl Into<String>) -> EvalError {
        EvalError::InvalidArgument {
            function: self.function.name().to_string(),
            message: message.into(),
        }
    }

    fn pad(&self, side: Side) -> Result<Value, EvalError> {
        let value = self.string(0)?;
        let pad = self.string(1)?;
        let target = self.int(2, "length")?;

        let length = value.chars().count() as i64;
        if target <= length {
            return Ok(Value::String(value));
        }
        if pad.is_empty() {
            return Err(self.invalid("pad string must not be empty"));
        }

        if target > MAX_PADDED_LENGTH {
            return Err(self.invalid(format!(
                "length {} exceeds the maximum of {}",
                target, MAX_PADDED_LENGTH
            )));
        }

        // target and length are both within 0..=MAX_PADDED_LENGTH here
        let needed = (target - length) as usize;
        let repeats = needed.div_ceil(pad.chars().count());
        let padding = pad.repeat(repeats);

        Ok(Value::String(match side {
            Side::Left => padding + &value,
            Side::Right => value + &padding,
        }))
    }

    fn substring(&self) -> Result<Value, EvalError> {
        let value = self.string(0)?;
        let start = self.int(1, "start")?;
        let end = self.int(2, "end")?;
        let length = value.chars().count() as i64;

        if start < 0 || start > end || end > length {
            return Err(self.invalid(format!(
                "range [{}, {}) is invalid for a string of length {}",
                start, end, length
            )));
        }

        Ok(Value::String(
            value
                .chars()
                .skip(start as usize)
                .take((end - start) as usize)
                .collect(),
        ))
    }

    fn concat(&self) -> Result<Value, EvalError> {
        let mut out = String::new();
        for index in 0..self.args.len() {
            out.push_str(&self.string(index)?);
        }
        Ok(Value::String(out))
    }

    fn index_of(&self) -> Result<Value, EvalError> {
        let haystack = self.string(0)?;
        let needle = self.string(1)?;

        let index = haystack
            .find(&needle)
            .map_or(-1, |byte| haystack[..byte].chars().count() as i64);
        Ok(Value::Int(index))
    }

    fn date_parse(&self) -> Result<Value, EvalError> {
        let value = self.string(0)?;
        let pattern = self.string(1)?;
        let zone_name = self.string(2)?;

        let zone = Zone::parse(&zone_name).ok_or_else(|| self.invalid(format!("unknown time zone `{}`", zone_name)))?;
        let naive = DatePattern::compile(&pattern)
            .parse(&value)
            .map_err(|message| self.invalid(message))?;
        let ts = zone
            .to_utc(&naive)
            .ok_or_else(|| self.invalid(format!("`{}` does not exist in zone `{}`", value, zone_name)))?;

        Ok(Value::Timestamp(ts))
    }

    fn conflict_avoidance(&self) -> Result<Value, EvalError> {
        let value = self.eval(0)?;
        let ts: DateTime<Utc> = value.as_timestamp().ok_or_else(|| EvalError::Coercion {
            value: format!("{} `{}`", value.type_name(), value),
            target: "timestamp".to_string(),
        })?;

        let cache = self.extractor.conflict_cache_or_init(|| {
            let window_ms = self.int(1, "window")?;
            let precision = match self.eval(2)? {
                Value::Null => "ms".to_string(),
                other => other.to_string(),
            };
            Ok(ConflictConfig::from_args(window_ms, &precision))
        })?;

        Ok(Value::Timestamp(cache.cache_and_get(ts)?))
    }
}
