//! Tokenizer
//!
//! Produces the whole token list up front. `{name}` placeholders are replaced
//! here by literal tokens carrying the span of the placeholder, so substituted
//! strings are never scanned as query text.

use serde_json::Value as JsonValue;

use super::placeholders::Placeholders;
use crate::planner::errors::{PrepareError, PrepareResult};
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keyword {
    From,
    Where,
    Having,
    Offset,
    Limit,
    Join,
    Left,
    Using,
    On,
    Group,
    By,
    With,
    Totals,
    Order,
    Asc,
    Desc,
    As,
    And,
    Or,
    Not,
    Between,
    In,
}

impl Keyword {
    fn parse(word: &str) -> Option<Self> {
        let keyword = match word.to_ascii_lowercase().as_str() {
            "from" => Keyword::From,
            "where" => Keyword::Where,
            "having" => Keyword::Having,
            "offset" => Keyword::Offset,
            "limit" => Keyword::Limit,
            "join" => Keyword::Join,
            "left" => Keyword::Left,
            "using" => Keyword::Using,
            "on" => Keyword::On,
            "group" => Keyword::Group,
            "by" => Keyword::By,
            "with" => Keyword::With,
            "totals" => Keyword::Totals,
            "order" => Keyword::Order,
            "asc" => Keyword::Asc,
            "desc" => Keyword::Desc,
            "as" => Keyword::As,
            "and" => Keyword::And,
            "or" => Keyword::Or,
            "not" => Keyword::Not,
            "between" => Keyword::Between,
            "in" => Keyword::In,
            _ => return None,
        };
        Some(keyword)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Identifier(String),
    Keyword(Keyword),
    /// `[path]`
    TablePath(String),
    Literal(Value),
    LeftParen,
    RightParen,
    Comma,
    Dot,
    Star,
    Plus,
    Minus,
    Slash,
    Percent,
    Equal,
    NotEqual,
    Less,
    LessOrEqual,
    Greater,
    GreaterOrEqual,
    LeftShift,
    RightShift,
    Ampersand,
    Pipe,
    Tilde,
    End,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    /// Byte range in the query text
    pub start: usize,
    pub end: usize,
}

const CONTEXT_WIDTH: usize = 30;

/// Syntax error pointing at `[start, end)` of `source`
pub fn syntax_error(source: &str, start: usize, end: usize, reason: &str) -> PrepareError {
    let start = start.min(source.len());
    let end = end.clamp(start, source.len());
    let mut before_start = start.saturating_sub(CONTEXT_WIDTH);
    while !source.is_char_boundary(before_start) {
        before_start -= 1;
    }
    let mut after_end = (end + CONTEXT_WIDTH).min(source.len());
    while !source.is_char_boundary(after_end) {
        after_end += 1;
    }
    let token = if start == end { "<end>" } else { &source[start..end] };
    PrepareError::syntax(
        format!(
            "Error while parsing query: syntax error, {}: {} >>>>> {} <<<<< {}",
            reason,
            &source[before_start..start],
            token,
            &source[end..after_end]
        ),
        start,
    )
}

struct Lexer<'a> {
    source: &'a str,
    bytes: &'a [u8],
    pos: usize,
    placeholders: &'a Placeholders,
    tokens: Vec<Token>,
}

/// Splits `source` into tokens, substituting placeholders
pub fn tokenize(source: &str, placeholders: &Placeholders) -> PrepareResult<Vec<Token>> {
    let mut lexer = Lexer {
        source,
        bytes: source.as_bytes(),
        pos: 0,
        placeholders,
        tokens: Vec::new(),
    };
    lexer.run()?;
    Ok(lexer.tokens)
}

impl<'a> Lexer<'a> {
    fn peek(&self, offset: usize) -> Option<u8> {
        self.bytes.get(self.pos + offset).copied()
    }

    fn push(&mut self, kind: TokenKind, start: usize) {
        self.tokens.push(Token {
            kind,
            start,
            end: self.pos,
        });
    }

    fn error(&self, start: usize, end: usize, reason: &str) -> PrepareError {
        syntax_error(self.source, start, end, reason)
    }

    fn run(&mut self) -> PrepareResult<()> {
        while let Some(c) = self.peek(0) {
            let start = self.pos;
            match c {
                b' ' | b'\t' | b'\n' | b'\r' => self.pos += 1,
                b'(' => self.single(TokenKind::LeftParen),
                b')' => self.single(TokenKind::RightParen),
                b',' => self.single(TokenKind::Comma),
                b'*' => self.single(TokenKind::Star),
                b'+' => self.single(TokenKind::Plus),
                b'-' => self.single(TokenKind::Minus),
                b'/' => self.single(TokenKind::Slash),
                b'%' => self.single(TokenKind::Percent),
                b'&' => self.single(TokenKind::Ampersand),
                b'|' => self.single(TokenKind::Pipe),
                b'~' => self.single(TokenKind::Tilde),
                b'=' => self.single(TokenKind::Equal),
                b'!' if self.peek(1) == Some(b'=') => self.double(TokenKind::NotEqual),
                b'<' => match self.peek(1) {
                    Some(b'=') => self.double(TokenKind::LessOrEqual),
                    Some(b'>') => self.double(TokenKind::NotEqual),
                    Some(b'<') => self.double(TokenKind::LeftShift),
                    _ => self.single(TokenKind::Less),
                },
                b'>' => match self.peek(1) {
                    Some(b'=') => self.double(TokenKind::GreaterOrEqual),
                    Some(b'>') => self.double(TokenKind::RightShift),
                    _ => self.single(TokenKind::Greater),
                },
                b'.' if !self.peek(1).map_or(false, |d| d.is_ascii_digit()) => self.single(TokenKind::Dot),
                b'0'..=b'9' | b'.' => self.number()?,
                b'"' | b'\'' => self.string(c)?,
                b'`' => self.quoted_identifier()?,
                b'[' => self.table_path()?,
                b'{' => self.placeholder()?,
                c if c == b'_' || c.is_ascii_alphabetic() => self.word(),
                _ => {
                    let end = start + self.source[start..].chars().next().map_or(1, char::len_utf8);
                    return Err(self.error(start, end, "unexpected character"));
                }
            }
        }
        self.tokens.push(Token {
            kind: TokenKind::End,
            start: self.source.len(),
            end: self.source.len(),
        });
        Ok(())
    }

    fn single(&mut self, kind: TokenKind) {
        let start = self.pos;
        self.pos += 1;
        self.push(kind, start);
    }

    fn double(&mut self, kind: TokenKind) {
        let start = self.pos;
        self.pos += 2;
        self.push(kind, start);
    }

    fn word(&mut self) {
        let start = self.pos;
        while self
            .peek(0)
            .map_or(false, |c| c == b'_' || c.is_ascii_alphanumeric())
        {
            self.pos += 1;
        }
        let word = &self.source[start..self.pos];
        let kind = match word.to_ascii_lowercase().as_str() {
            "true" => TokenKind::Literal(Value::Boolean(true)),
            "false" => TokenKind::Literal(Value::Boolean(false)),
            "null" => TokenKind::Literal(Value::Null),
            _ => match Keyword::parse(word) {
                Some(keyword) => TokenKind::Keyword(keyword),
                None => TokenKind::Identifier(word.to_string()),
            },
        };
        self.push(kind, start);
    }

    fn number(&mut self) -> PrepareResult<()> {
        let start = self.pos;
        let mut is_double = false;
        while let Some(c) = self.peek(0) {
            match c {
                b'0'..=b'9' => self.pos += 1,
                b'.' if !is_double => {
                    is_double = true;
                    self.pos += 1;
                }
                b'e' | b'E' if matches!(self.peek(1), Some(b'0'..=b'9' | b'-' | b'+')) => {
                    is_double = true;
                    self.pos += 2;
                }
                _ => break,
            }
        }
        let text = &self.source[start..self.pos];
        let value = if is_double {
            text.parse::<f64>().ok().map(Value::Double)
        } else if self.peek(0) == Some(b'u') {
            self.pos += 1;
            text.parse::<u64>().ok().map(Value::Uint64)
        } else {
            // integers that only fit unsigned become uint64
            text.parse::<i64>()
                .ok()
                .map(Value::Int64)
                .or_else(|| text.parse::<u64>().ok().map(Value::Uint64))
        };
        if self.peek(0).map_or(false, |c| c == b'_' || c.is_ascii_alphabetic()) {
            return Err(self.error(start, self.pos + 1, "malformed number"));
        }
        match value {
            Some(value) => {
                self.push(TokenKind::Literal(value), start);
                Ok(())
            }
            None => Err(self.error(start, self.pos, "malformed number")),
        }
    }

    /// Reads up to the closing `quote`, handling backslash escapes
    fn quoted(&mut self, quote: u8) -> PrepareResult<String> {
        let start = self.pos;
        self.pos += 1;
        let mut out = String::new();
        loop {
            let rest = &self.source[self.pos..];
            let mut chars = rest.chars();
            let c = match chars.next() {
                Some(c) => c,
                None => return Err(self.error(start, self.source.len(), "unterminated quoted text")),
            };
            self.pos += c.len_utf8();
            if c as u32 == u32::from(quote) {
                return Ok(out);
            }
            if c != '\\' {
                out.push(c);
                continue;
            }
            let escaped = match chars.next() {
                Some(e) => e,
                None => return Err(self.error(start, self.source.len(), "unterminated quoted text")),
            };
            self.pos += escaped.len_utf8();
            out.push(match escaped {
                'n' => '\n',
                't' => '\t',
                'r' => '\r',
                '0' => '\0',
                other => other,
            });
        }
    }

    fn string(&mut self, quote: u8) -> PrepareResult<()> {
        let start = self.pos;
        let text = self.quoted(quote)?;
        self.push(TokenKind::Literal(Value::String(text)), start);
        Ok(())
    }

    fn quoted_identifier(&mut self) -> PrepareResult<()> {
        let start = self.pos;
        let name = self.quoted(b'`')?;
        if name.is_empty() {
            return Err(self.error(start, self.pos, "empty identifier"));
        }
        self.push(TokenKind::Identifier(name), start);
        Ok(())
    }

    fn table_path(&mut self) -> PrepareResult<()> {
        let start = self.pos;
        let close = match self.source[start..].find(']') {
            Some(offset) => start + offset,
            None => return Err(self.error(start, self.source.len(), "unterminated table path")),
        };
        let path = self.source[start + 1..close].trim().to_string();
        self.pos = close + 1;
        if path.is_empty() {
            return Err(self.error(start, self.pos, "empty table path"));
        }
        self.push(TokenKind::TablePath(path), start);
        Ok(())
    }

    fn placeholder(&mut self) -> PrepareResult<()> {
        let start = self.pos;
        let mut end = start + 1;
        while self
            .bytes
            .get(end)
            .map_or(false, |c| *c == b'_' || c.is_ascii_alphanumeric())
        {
            end += 1;
        }
        if end == start + 1 || self.bytes.get(end) != Some(&b'}') {
            return Err(self.error(start, start + 1, "unexpected \"{\""));
        }
        let name = &self.source[start + 1..end];
        let value = self
            .placeholders
            .get(name)
            .ok_or_else(|| PrepareError::placeholder(format!("Placeholder was not found: \"{}\"", name)).with_position(start))?
            .clone();
        self.pos = end + 1;
        self.emit_placeholder_value(&value, start);
        Ok(())
    }

    /// Pushes tokens for a validated placeholder value, all spanning the placeholder
    fn emit_placeholder_value(&mut self, value: &JsonValue, start: usize) {
        match value {
            JsonValue::Array(items) => {
                self.push(TokenKind::LeftParen, start);
                for (index, item) in items.iter().enumerate() {
                    if index > 0 {
                        self.push(TokenKind::Comma, start);
                    }
                    self.emit_placeholder_value(item, start);
                }
                self.push(TokenKind::RightParen, start);
            }
            scalar => {
                let literal = Value::from_json_scalar(scalar).unwrap_or(Value::Null);
                self.push(TokenKind::Literal(literal), start);
            }
        }
    }
}
