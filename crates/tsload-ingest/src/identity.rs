//! Child table identity.
//!
//! Every distinct combination of tag values maps to one destination table. With a
//! pattern such as `d_{code}_{name}` the name is built from the tags; without one, the
//! name is a digest of the tag values so that identical tag sets always land in the same
//! table regardless of the order the tags were read in.

use std::sync::Arc;

use crate::expr::{Expr, Extractor};
use tsload_common::types::{Row, Value};
use tsload_common::{ConfigError, IdentityError, TsloadError};

/// Prefix of digest-based identities
pub const DEFAULT_HASH_PREFIX: &str = "t_";

#[derive(Debug, Clone)]
enum Part {
    Literal(String),
    Placeholder { text: String, expr: Arc<Expr> },
}

#[derive(Debug, Clone)]
enum Mode {
    Pattern(Vec<Part>),
    Hash { prefix: String },
}

/// Derives the destination table name for a set of tags
#[derive(Debug, Clone)]
pub struct TableIdentityResolver {
    mode: Mode,
    extractor: Arc<Extractor>,
}

impl TableIdentityResolver {
    /// Resolver for a `{placeholder}` pattern; every placeholder is compiled up front
    pub fn pattern(pattern: &str, extractor: Arc<Extractor>) -> Result<Self, TsloadError> {
        let parts = split_pattern(pattern)?
            .into_iter()
            .map(|segment| match segment {
                Segment::Literal(text) => Ok(Part::Literal(text)),
                Segment::Placeholder(text) => {
                    let expr = extractor.parse(&text)?;
                    Ok(Part::Placeholder { text, expr })
                },
            })
            .collect::<Result<Vec<_>, TsloadError>>()?;

        Ok(Self {
            mode: Mode::Pattern(parts),
            extractor,
        })
    }

    /// Digest-based resolver
    pub fn hash(prefix: impl Into<String>, extractor: Arc<Extractor>) -> Self {
        Self {
            mode: Mode::Hash { prefix: prefix.into() },
            extractor,
        }
    }

    /// Pattern mode when a non-empty pattern is given, hash mode otherwise
    pub fn from_options(
        pattern: Option<&str>,
        hash_prefix: Option<&str>,
        extractor: Arc<Extractor>,
    ) -> Result<Self, TsloadError> {
        match pattern.map(str::trim).filter(|p| !p.is_empty()) {
            Some(pattern) => Self::pattern(pattern, extractor),
            None => Ok(Self::hash(hash_prefix.unwrap_or(DEFAULT_HASH_PREFIX), extractor)),
        }
    }

    pub fn is_pattern(&self) -> bool {
        matches!(self.mode, Mode::Pattern(_))
    }

    /// Table name for `tags`
    pub fn resolve(&self, tags: &Row) -> Result<String, IdentityError> {
        match &self.mode {
            Mode::Hash { prefix } => Ok(hash_identity(prefix, tags)),
            Mode::Pattern(parts) => {
                let mut name = String::new();
                for part in parts {
                    match part {
                        Part::Literal(text) => name.push_str(text),
                        Part::Placeholder { text, expr } => {
                            let value = self.extractor.evaluate(expr, tags).map_err(|source| {
                                IdentityError::Eval {
                                    placeholder: text.clone(),
                                    source,
                                }
                            })?;
                            if let Value::Null = value {
                                return Err(IdentityError::MissingTag {
                                    placeholder: text.clone(),
                                });
                            }
                            name.push_str(&value.to_string());
                        },
                    }
                }
                Ok(name)
            },
        }
    }
}

/// `prefix` + hex MD5 of the tag values concatenated in sorted key order
pub fn hash_identity(prefix: &str, tags: &Row) -> String {
    let mut entries: Vec<(&String, &Value)> = tags.iter().collect();
    entries.sort_by(|a, b| a.0.cmp(b.0));

    let mut context = md5::Context::new();
    for (_, value) in entries {
        context.consume(value.to_string().as_bytes());
    }

    format!("{}{:x}", prefix, context.compute())
}

#[derive(Debug, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Placeholder(String),
}

fn split_pattern(pattern: &str) -> Result<Vec<Segment>, ConfigError> {
    let invalid = |reason: &str| ConfigError::InvalidPattern {
        pattern: pattern.to_string(),
        reason: reason.to_string(),
    };

    let mut segments = Vec::new();
    let mut literal = String::new();
    let mut chars = pattern.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                literal.push('{');
            },
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                literal.push('}');
            },
            '{' => {
                let mut placeholder = String::new();
                loop {
                    match chars.next() {
                        Some('}') => break,
                        Some(c) => placeholder.push(c),
                        None => return Err(invalid("unclosed `{`")),
                    }
                }
                if placeholder.trim().is_empty() {
                    return Err(invalid("empty placeholder"));
                }
                if !literal.is_empty() {
                    segments.push(Segment::Literal(std::mem::take(&mut literal)));
                }
                segments.push(Segment::Placeholder(placeholder.trim().to_string()));
            },
            '}' => return Err(invalid("unmatched `}`")),
            c => literal.push(c),
        }
    }

    if !literal.is_empty() {
        segments.push(Segment::Literal(literal));
    }
    Ok(segments)
}
