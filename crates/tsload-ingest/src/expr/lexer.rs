//! Tokenizer for column and tag expressions.

use tsload_common::ParseError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenType {
    // Literals and identifiers
    Identifier,
    Integer,
    Float,
    String,

    // Punctuation
    LeftParen,
    RightParen,
    Comma,

    // Operators
    Plus,
    Minus,
    Star,
    Slash,
    Bang,
    Equal,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    And,
    Or,

    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub token_type: TokenType,
    /// Source text; for string literals the unescaped content
    pub value: String,
    /// Character offset in the expression
    pub position: usize,
}

impl Token {
    fn new(token_type: TokenType, value: impl Into<String>, position: usize) -> Self {
        Self {
            token_type,
            value: value.into(),
            position,
        }
    }
}

/// Split `source` into tokens, always terminated by an `Eof` token
pub fn tokenize(source: &str) -> Result<Vec<Token>, ParseError> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut pos = 0;

    while pos < chars.len() {
        let ch = chars[pos];
        let next = chars.get(pos + 1).copied();

        match ch {
            c if c.is_whitespace() => {
                pos += 1;
            },
            '(' => {
                tokens.push(Token::new(TokenType::LeftParen, "(", pos));
                pos += 1;
            },
            ')' => {
                tokens.push(Token::new(TokenType::RightParen, ")", pos));
                pos += 1;
            },
            ',' => {
                tokens.push(Token::new(TokenType::Comma, ",", pos));
                pos += 1;
            },
            '+' => {
                tokens.push(Token::new(TokenType::Plus, "+", pos));
                pos += 1;
            },
            '-' => {
                tokens.push(Token::new(TokenType::Minus, "-", pos));
                pos += 1;
            },
            '*' => {
                tokens.push(Token::new(TokenType::Star, "*", pos));
                pos += 1;
            },
            '/' => {
                tokens.push(Token::new(TokenType::Slash, "/", pos));
                pos += 1;
            },
            '!' if next == Some('=') => {
                tokens.push(Token::new(TokenType::NotEqual, "!=", pos));
                pos += 2;
            },
            '!' => {
                tokens.push(Token::new(TokenType::Bang, "!", pos));
                pos += 1;
            },
            '=' if next == Some('=') => {
                tokens.push(Token::new(TokenType::Equal, "==", pos));
                pos += 2;
            },
            '<' if next == Some('=') => {
                tokens.push(Token::new(TokenType::LessEqual, "<=", pos));
                pos += 2;
            },
            '<' => {
                tokens.push(Token::new(TokenType::Less, "<", pos));
                pos += 1;
            },
            '>' if next == Some('=') => {
                tokens.push(Token::new(TokenType::GreaterEqual, ">=", pos));
                pos += 2;
            },
            '>' => {
                tokens.push(Token::new(TokenType::Greater, ">", pos));
                pos += 1;
            },
            '&' if next == Some('&') => {
                tokens.push(Token::new(TokenType::And, "&&", pos));
                pos += 2;
            },
            '|' if next == Some('|') => {
                tokens.push(Token::new(TokenType::Or, "||", pos));
                pos += 2;
            },
            '"' => {
                let (text, end) = read_quoted(source, &chars, pos)?;
                tokens.push(Token::new(TokenType::String, text, pos));
                pos = end;
            },
            '`' => {
                let start = pos;
                pos += 1;
                let mut text = String::new();
                loop {
                    match chars.get(pos) {
                        Some('`') => break,
                        Some(c) => text.push(*c),
                        None => {
                            return Err(ParseError::new(source, start, "unterminated raw string"));
                        },
                    }
                    pos += 1;
                }
                tokens.push(Token::new(TokenType::String, text, start));
                pos += 1;
            },
            c if c.is_ascii_digit() || (c == '.' && next.is_some_and(|n| n.is_ascii_digit())) => {
                let (token, end) = read_number(source, &chars, pos)?;
                tokens.push(token);
                pos = end;
            },
            c if c.is_alphabetic() || c == '_' => {
                let start = pos;
                while chars
                    .get(pos)
                    .is_some_and(|c| c.is_alphanumeric() || *c == '_')
                {
                    pos += 1;
                }
                let word: String = chars[start..pos].iter().collect();
                tokens.push(Token::new(TokenType::Identifier, word, start));
            },
            other => {
                return Err(ParseError::new(
                    source,
                    pos,
                    format!("unexpected character `{}`", other),
                ));
            },
        }
    }

    tokens.push(Token::new(TokenType::Eof, "", chars.len()));
    Ok(tokens)
}

fn read_quoted(source: &str, chars: &[char], start: usize) -> Result<(String, usize), ParseError> {
    let mut text = String::new();
    let mut pos = start + 1;

    loop {
        match chars.get(pos) {
            Some('"') => return Ok((text, pos + 1)),
            Some('\\') => {
                let escaped = match chars.get(pos + 1) {
                    Some('"') => '"',
                    Some('\\') => '\\',
                    Some('n') => '\n',
                    Some('t') => '\t',
                    Some('r') => '\r',
                    Some(other) => {
                        return Err(ParseError::new(
                            source,
                            pos,
                            format!("unknown escape sequence `\\{}`", other),
                        ));
                    },
                    None => break,
                };
                text.push(escaped);
                pos += 2;
            },
            Some(c) => {
                text.push(*c);
                pos += 1;
            },
            None => break,
        }
    }

    Err(ParseError::new(source, start, "unterminated string literal"))
}

fn read_number(source: &str, chars: &[char], start: usize) -> Result<(Token, usize), ParseError> {
    let mut pos = start;
    let mut is_float = false;

    while let Some(&c) = chars.get(pos) {
        match c {
            '0'..='9' => pos += 1,
            '.' if !is_float => {
                is_float = true;
                pos += 1;
            },
            'e' | 'E' => {
                is_float = true;
                pos += 1;
                if matches!(chars.get(pos), Some('+') | Some('-')) {
                    pos += 1;
                }
                if !chars.get(pos).is_some_and(|c| c.is_ascii_digit()) {
                    return Err(ParseError::new(source, start, "malformed exponent"));
                }
                while chars.get(pos).is_some_and(|c| c.is_ascii_digit()) {
                    pos += 1;
                }
                break;
            },
            _ => break,
        }
    }

    let text: String = chars[start..pos].iter().collect();
    let token_type = if is_float {
        text.parse::<f64>()
            .map_err(|_| ParseError::new(source, start, format!("invalid number `{}`", text)))?;
        TokenType::Float
    } else {
        text.parse::<i64>().map_err(|_| {
            ParseError::new(source, start, format!("integer literal `{}` out of range", text))
        })?;
        TokenType::Integer
    };

    Ok((Token::new(token_type, text, start), pos))
}
