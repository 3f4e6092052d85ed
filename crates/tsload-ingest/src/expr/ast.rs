//! Parse tree for column and tag expressions.

use std::fmt;
use tsload_common::types::Value;

/// Binary operators, lowest precedence first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Or,
    And,
    Equal,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    Add,
    Subtract,
    Multiply,
    Divide,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Or => "||",
            BinaryOp::And => "&&",
            BinaryOp::Equal => "==",
            BinaryOp::NotEqual => "!=",
            BinaryOp::Less => "<",
            BinaryOp::LessEqual => "<=",
            BinaryOp::Greater => ">",
            BinaryOp::GreaterEqual => ">=",
            BinaryOp::Add => "+",
            BinaryOp::Subtract => "-",
            BinaryOp::Multiply => "*",
            BinaryOp::Divide => "/",
        }
    }

    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOp::Equal
                | BinaryOp::NotEqual
                | BinaryOp::Less
                | BinaryOp::LessEqual
                | BinaryOp::Greater
                | BinaryOp::GreaterEqual
        )
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// Immutable parse tree; shared read-only between workers once cached.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Integer, float, string or boolean constant
    Literal(Value),
    /// Field reference resolved against the row
    Identifier(String),
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Not(Box<Expr>),
    /// Function call; arguments are handed to the function unevaluated
    Call { name: String, args: Vec<Expr> },
    Paren(Box<Expr>),
}

impl Expr {
    pub fn binary(op: BinaryOp, left: Expr, right: Expr) -> Self {
        Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    /// Identifier names referenced anywhere in the tree, in first-seen order
    pub fn identifiers(&self) -> Vec<&str> {
        let mut names = Vec::new();
        self.collect_identifiers(&mut names);
        names
    }

    fn collect_identifiers<'a>(&'a self, names: &mut Vec<&'a str>) {
        match self {
            Expr::Literal(_) => {},
            Expr::Identifier(name) => {
                if !names.contains(&name.as_str()) {
                    names.push(name);
                }
            },
            Expr::Binary { left, right, .. } => {
                left.collect_identifiers(names);
                right.collect_identifiers(names);
            },
            Expr::Not(inner) | Expr::Paren(inner) => inner.collect_identifiers(names),
            Expr::Call { args, .. } => args.iter().for_each(|a| a.collect_identifiers(names)),
        }
    }
}

/// Renders the expression back to source form; used in error messages.
impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Literal(Value::String(s)) => write!(f, "{:?}", s),
            Expr::Literal(Value::Float(v)) if v.fract() == 0.0 && v.is_finite() => {
                write!(f, "{:.1}", v)
            },
            Expr::Literal(value) => write!(f, "{}", value),
            Expr::Identifier(name) => f.write_str(name),
            Expr::Binary { op, left, right } => write!(f, "{} {} {}", left, op, right),
            Expr::Not(inner) => write!(f, "!{}", inner),
            Expr::Call { name, args } => {
                write!(f, "{}(", name)?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", arg)?;
                }
                f.write_str(")")
            },
            Expr::Paren(inner) => write!(f, "({})", inner),
        }
    }
}
