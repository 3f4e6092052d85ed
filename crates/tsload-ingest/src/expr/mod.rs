//! Expression language used by column sources and table-name placeholders.
//!
//! Text such as `pad_left(code, "0", 10)` or `a * 1.5 + b` is tokenized
//! ([`lexer`]), parsed into an [`Expr`] tree ([`parser`]) and evaluated against a
//! [`Row`](tsload_common::types::Row) by the [`Extractor`], which also caches parsed
//! trees and owns the conflict-avoidance cache. Built-in functions live in
//! [`functions`].

pub mod ast;
pub mod datetime;
mod eval;
pub mod functions;
pub mod lexer;
pub mod parser;

pub use ast::{BinaryOp, Expr};
pub use eval::Extractor;
pub use functions::Function;
