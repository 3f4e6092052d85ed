/*!
Recursive-descent parser for column and tag expressions.

```text
Level 1 (Lowest):  ||                         (parse_logical_or)
Level 2:           &&                         (parse_logical_and)
Level 3:           == != < <= > >=            (parse_comparison)
Level 4:           + -                        (parse_additive)
Level 5:           * /                        (parse_multiplicative)
Level 6:           ! and negative literals    (parse_unary)
Level 7 (Highest): literals, identifiers, calls, parentheses (parse_primary)
```

All binary levels are left-associative.
*/

use super::ast::{BinaryOp, Expr};
use super::lexer::{tokenize, Token, TokenType};
use tsload_common::types::Value;
use tsload_common::ParseError;

/// Parse `source` into an expression tree
pub fn parse(source: &str) -> Result<Expr, ParseError> {
    if source.trim().is_empty() {
        return Err(ParseError::new(source, 0, "empty expression"));
    }

    let tokens = tokenize(source)?;
    let mut parser = ExprParser {
        source,
        tokens,
        current: 0,
    };

    let expr = parser.parse_logical_or()?;
    let trailing = parser.current_token();
    if trailing.token_type != TokenType::Eof {
        return Err(parser.error_at(trailing, format!("unexpected token `{}`", trailing.value)));
    }

    Ok(expr)
}

struct ExprParser<'a> {
    source: &'a str,
    tokens: Vec<Token>,
    current: usize,
}

impl ExprParser<'_> {
    fn current_token(&self) -> &Token {
        // tokenize always terminates with Eof, and the cursor never moves past it
        &self.tokens[self.current.min(self.tokens.len() - 1)]
    }

    fn advance(&mut self) -> Token {
        let token = self.current_token().clone();
        if token.token_type != TokenType::Eof {
            self.current += 1;
        }
        token
    }

    fn check(&self, token_type: TokenType) -> bool {
        self.current_token().token_type == token_type
    }

    fn expect(&mut self, token_type: TokenType, what: &str) -> Result<Token, ParseError> {
        if self.check(token_type) {
            Ok(self.advance())
        } else {
            let token = self.current_token();
            Err(self.error_at(token, format!("expected {}, found {}", what, describe(token))))
        }
    }

    fn error_at(&self, token: &Token, message: impl Into<String>) -> ParseError {
        ParseError::new(self.source, token.position, message)
    }

    fn parse_logical_or(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_logical_and()?;
        while self.check(TokenType::Or) {
            self.advance();
            let right = self.parse_logical_and()?;
            left = Expr::binary(BinaryOp::Or, left, right);
        }
        Ok(left)
    }

    fn parse_logical_and(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_comparison()?;
        while self.check(TokenType::And) {
            self.advance();
            let right = self.parse_comparison()?;
            left = Expr::binary(BinaryOp::And, left, right);
        }
        Ok(left)
    }

    fn parse_comparison(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_additive()?;
        loop {
            let op = match self.current_token().token_type {
                TokenType::Equal => BinaryOp::Equal,
                TokenType::NotEqual => BinaryOp::NotEqual,
                TokenType::Less => BinaryOp::Less,
                TokenType::LessEqual => BinaryOp::LessEqual,
                TokenType::Greater => BinaryOp::Greater,
                TokenType::GreaterEqual => BinaryOp::GreaterEqual,
                _ => break,
            };
            self.advance();
            let right = self.parse_additive()?;
            left = Expr::binary(op, left, right);
        }
        Ok(left)
    }

    fn parse_additive(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = match self.current_token().token_type {
                TokenType::Plus => BinaryOp::Add,
                TokenType::Minus => BinaryOp::Subtract,
                _ => break,
            };
            self.advance();
            let right = self.parse_multiplicative()?;
            left = Expr::binary(op, left, right);
        }
        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.current_token().token_type {
                TokenType::Star => BinaryOp::Multiply,
                TokenType::Slash => BinaryOp::Divide,
                _ => break,
            };
            self.advance();
            let right = self.parse_unary()?;
            left = Expr::binary(op, left, right);
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, ParseError> {
        match self.current_token().token_type {
            TokenType::Bang => {
                self.advance();
                Ok(Expr::Not(Box::new(self.parse_unary()?)))
            },
            TokenType::Minus => {
                let minus = self.advance();
                let number = self.current_token().clone();
                let negated = format!("-{}", number.value);
                let value = match number.token_type {
                    TokenType::Integer => negated.parse::<i64>().map(Value::Int).ok(),
                    TokenType::Float => negated.parse::<f64>().map(Value::Float).ok(),
                    _ => {
                        return Err(self.error_at(
                            &minus,
                            "unary minus is only allowed before a numeric literal",
                        ));
                    },
                };
                self.advance();
                value
                    .map(Expr::Literal)
                    .ok_or_else(|| self.error_at(&number, format!("invalid number `{}`", negated)))
            },
            _ => self.parse_primary(),
        }
    }

    fn parse_primary(&mut self) -> Result<Expr, ParseError> {
        let token = self.advance();
        match token.token_type {
            TokenType::Integer => token
                .value
                .parse::<i64>()
                .map(|v| Expr::Literal(Value::Int(v)))
                .map_err(|_| self.error_at(&token, format!("invalid integer `{}`", token.value))),
            TokenType::Float => token
                .value
                .parse::<f64>()
                .map(|v| Expr::Literal(Value::Float(v)))
                .map_err(|_| self.error_at(&token, format!("invalid number `{}`", token.value))),
            TokenType::String => Ok(Expr::Literal(Value::String(token.value))),
            TokenType::Identifier => match token.value.as_str() {
                "true" => Ok(Expr::Literal(Value::Bool(true))),
                "false" => Ok(Expr::Literal(Value::Bool(false))),
                _ if self.check(TokenType::LeftParen) => self.parse_call(token.value),
                _ => Ok(Expr::Identifier(token.value)),
            },
            TokenType::LeftParen => {
                let inner = self.parse_logical_or()?;
                self.expect(TokenType::RightParen, "`)`")?;
                Ok(Expr::Paren(Box::new(inner)))
            },
            _ => Err(self.error_at(&token, format!("expected an operand, found {}", describe(&token)))),
        }
    }

    fn parse_call(&mut self, name: String) -> Result<Expr, ParseError> {
        self.expect(TokenType::LeftParen, "`(`")?;
        let mut args = Vec::new();

        if !self.check(TokenType::RightParen) {
            loop {
                args.push(self.parse_logical_or()?);
                if self.check(TokenType::Comma) {
                    self.advance();
                } else {
                    break;
                }
            }
        }

        self.expect(TokenType::RightParen, "`,` or `)`")?;
        Ok(Expr::Call { name, args })
    }
}

fn describe(token: &Token) -> String {
    match token.token_type {
        TokenType::Eof => "end of input".to_string(),
        _ => format!("`{}`", token.value),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn ident(name: &str) -> Expr {
        Expr::Identifier(name.to_string())
    }

    #[test]
    fn test_precedence() {
        let expr = parse("a + b * 2 == c || d && e").unwrap();
        let expected = Expr::binary(
            BinaryOp::Or,
            Expr::binary(
                BinaryOp::Equal,
                Expr::binary(
                    BinaryOp::Add,
                    ident("a"),
                    Expr::binary(BinaryOp::Multiply, ident("b"), Expr::Literal(Value::Int(2))),
                ),
                ident("c"),
            ),
            Expr::binary(BinaryOp::And, ident("d"), ident("e")),
        );
        assert_eq!(expr, expected);
    }

    #[test]
    fn test_left_associative() {
        let expr = parse("a - b - c").unwrap();
        assert_eq!(
            expr,
            Expr::binary(
                BinaryOp::Subtract,
                Expr::binary(BinaryOp::Subtract, ident("a"), ident("b")),
                ident("c"),
            )
        );
    }

    #[test]
    fn test_function_call_and_literals() {
        let expr = parse(r#"pad_left(code, "0", 10)"#).unwrap();
        assert_eq!(
            expr,
            Expr::Call {
                name: "pad_left".to_string(),
                args: vec![
                    ident("code"),
                    Expr::Literal(Value::from("0")),
                    Expr::Literal(Value::Int(10)),
                ],
            }
        );
        assert_eq!(
            parse("concat()").unwrap(),
            Expr::Call {
                name: "concat".to_string(),
                args: vec![]
            }
        );
    }

    #[test]
    fn test_negative_literals_and_not() {
        assert_eq!(parse("-5").unwrap(), Expr::Literal(Value::Int(-5)));
        assert_eq!(parse("a * -1.5").unwrap().to_string(), "a * -1.5");
        assert_eq!(
            parse("!true").unwrap(),
            Expr::Not(Box::new(Expr::Literal(Value::Bool(true))))
        );
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(parse("").unwrap_err().position, 0);
        assert_eq!(parse("a +").unwrap_err().message, "expected an operand, found end of input");
        assert_eq!(parse("(a + b").unwrap_err().position, 6);
        assert_eq!(parse("a b").unwrap_err().position, 2);
        assert!(parse("f(a,)").is_err());
        assert!(parse("-a").is_err());
    }
}
