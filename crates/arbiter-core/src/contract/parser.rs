//! Contract text parser
//!
//! ### Grammar (informal)
//!
//! ```text
//! contract   := line*
//! line       := directive | assertion | comment
//! directive  := "contract" NAME | "fields" IDENT ("," IDENT)*
//! assertion  := "range(" path "," number "," number ")"
//!             | "not_empty(" path ")" | "is_list(" path ")"
//!             | "type(" path "," kind ")" | "one_of(" path "," list ")"
//!             | ("forall" | "exists") "(" path "," expr ")"
//!             | "implies(" expr "," expr ")"
//! expr       := and (("||" | "or") and)*
//! and        := unary (("&&" | "and") unary)*
//! unary      := ("!" | "not") unary | cmp
//! cmp        := primary ((op primary) | ("in" list))?
//! primary    := "(" expr ")" | literal | "count(" path ")" | "exists(" path ")" | path
//! path       := IDENT ("." IDENT | "[" INDEX "]")*
//! ```
//!
//! An assertion may span several physical lines while parentheses or brackets
//! are open. `#` starts a comment outside string literals.

use super::ast::{
    Assertion, CompareOp, Expr, FieldPath, Literal, OutputContract, Quantifier, Segment,
    ValueKind, ITEM,
};
use crate::error::ContractError;

/// Maximum accepted contract source size in bytes
pub const MAX_CONTRACT_BYTES: usize = 64 * 1024;
/// Maximum predicate nesting depth
pub const MAX_NESTING: usize = 32;

const KEYWORDS: &[&str] = &["true", "false", "null", "and", "or", "not", "in"];

/// Parse contract text into an [`OutputContract`]
pub fn parse_contract(source: &str) -> Result<OutputContract, ContractError> {
    if source.len() > MAX_CONTRACT_BYTES {
        return Err(ContractError::TooLarge {
            max: MAX_CONTRACT_BYTES,
            actual: source.len(),
        });
    }

    let mut name: Option<String> = None;
    let mut fields: Option<Vec<String>> = None;
    let mut assertions: Vec<(usize, Assertion)> = Vec::new();

    for (line, text) in logical_lines(source) {
        if let Some(rest) = directive(&text, "contract") {
            if name.is_some() {
                return Err(ContractError::DuplicateDirective {
                    directive: "contract",
                    line,
                });
            }
            name = Some(rest.to_string());
            continue;
        }
        if let Some(rest) = directive(&text, "fields") {
            if fields.is_some() {
                return Err(ContractError::DuplicateDirective {
                    directive: "fields",
                    line,
                });
            }
            fields = Some(parse_fields(rest, line)?);
            continue;
        }

        let tokens = tokenize(&text, line)?;
        let mut parser = Parser::new(tokens, line);
        let assertion = parser.assertion()?;
        parser.expect_end()?;
        assertions.push((line, assertion));
    }

    if assertions.is_empty() {
        return Err(ContractError::Empty);
    }

    // Check against source lines first so errors point at the right place
    let header = OutputContract::new(name.clone(), fields.clone(), Vec::new())?;
    for (line, assertion) in &assertions {
        header.check_assertion(assertion, *line)?;
    }
    OutputContract::new(name, fields, assertions.into_iter().map(|(_, a)| a).collect())
}

/// `Some(rest)` when `text` is the given directive
fn directive<'a>(text: &'a str, keyword: &str) -> Option<&'a str> {
    let rest = text.strip_prefix(keyword)?;
    if rest.starts_with(char::is_whitespace) {
        let rest = rest.trim();
        (!rest.is_empty()).then_some(rest)
    } else {
        None
    }
}

fn parse_fields(list: &str, line: usize) -> Result<Vec<String>, ContractError> {
    let mut fields = Vec::new();
    for raw in list.split(',') {
        let field = raw.trim();
        if !is_identifier(field) {
            return Err(ContractError::InvalidPath {
                path: field.to_string(),
                line,
            });
        }
        if !fields.iter().any(|f| f == field) {
            fields.push(field.to_string());
        }
    }
    Ok(fields)
}

fn is_identifier(text: &str) -> bool {
    let mut chars = text.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Strip comments and join physical lines while delimiters are open.
/// Each logical line carries the number of its first physical line.
fn logical_lines(source: &str) -> Vec<(usize, String)> {
    let mut out = Vec::new();
    let mut buffer = String::new();
    let mut start = 0;
    let mut depth: i64 = 0;

    for (index, raw) in source.lines().enumerate() {
        let (text, delta) = strip_comment(raw);
        let text = text.trim();
        if text.is_empty() && buffer.is_empty() {
            continue;
        }
        if buffer.is_empty() {
            start = index + 1;
        } else if !text.is_empty() {
            buffer.push(' ');
        }
        buffer.push_str(text);
        depth += delta;
        if depth <= 0 {
            out.push((start, std::mem::take(&mut buffer)));
            depth = 0;
        }
    }
    if !buffer.trim().is_empty() {
        out.push((start, buffer));
    }
    out
}

/// Remove a trailing comment and report the net delimiter balance
fn strip_comment(line: &str) -> (&str, i64) {
    let mut in_string = false;
    let mut escaped = false;
    let mut depth = 0;
    for (i, c) in line.char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '(' | '[' => depth += 1,
            ')' | ']' => depth -= 1,
            '#' => return (&line[..i], depth),
            _ => {}
        }
    }
    (line, depth)
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Number(f64, String),
    Str(String),
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Dot,
    Op(CompareOp),
    AndAnd,
    OrOr,
    Bang,
    End,
}

impl Token {
    fn describe(&self) -> String {
        match self {
            Token::Ident(s) => s.clone(),
            Token::Number(_, raw) => raw.clone(),
            Token::Str(s) => format!("\"{}\"", s),
            Token::LParen => "(".into(),
            Token::RParen => ")".into(),
            Token::LBracket => "[".into(),
            Token::RBracket => "]".into(),
            Token::Comma => ",".into(),
            Token::Dot => ".".into(),
            Token::Op(op) => op.symbol().into(),
            Token::AndAnd => "&&".into(),
            Token::OrOr => "||".into(),
            Token::Bang => "!".into(),
            Token::End => "end of line".into(),
        }
    }
}

#[derive(Debug, Clone)]
struct Spanned {
    token: Token,
    column: usize,
}

fn tokenize(text: &str, line: usize) -> Result<Vec<Spanned>, ContractError> {
    let chars: Vec<char> = text.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let column = i + 1;
        if c.is_whitespace() {
            i += 1;
            continue;
        }

        let two = |next: char| chars.get(i + 1) == Some(&next);
        let (token, width) = match c {
            '(' => (Token::LParen, 1),
            ')' => (Token::RParen, 1),
            '[' => (Token::LBracket, 1),
            ']' => (Token::RBracket, 1),
            ',' => (Token::Comma, 1),
            '.' => (Token::Dot, 1),
            '=' if two('=') => (Token::Op(CompareOp::Eq), 2),
            '!' if two('=') => (Token::Op(CompareOp::Ne), 2),
            '!' => (Token::Bang, 1),
            '<' if two('=') => (Token::Op(CompareOp::Le), 2),
            '<' => (Token::Op(CompareOp::Lt), 1),
            '>' if two('=') => (Token::Op(CompareOp::Ge), 2),
            '>' => (Token::Op(CompareOp::Gt), 1),
            '&' if two('&') => (Token::AndAnd, 2),
            '|' if two('|') => (Token::OrOr, 2),
            '"' => {
                let (value, consumed) = read_string(&chars[i..], line, column)?;
                (Token::Str(value), consumed)
            }
            c if c.is_ascii_digit()
                || (c == '-' && chars.get(i + 1).is_some_and(|n| n.is_ascii_digit())) =>
            {
                let raw = read_number(&chars[i..]);
                let value: f64 = raw.parse().map_err(|_| ContractError::InvalidNumber {
                    raw: raw.clone(),
                    line,
                    column,
                })?;
                if !value.is_finite() {
                    return Err(ContractError::InvalidNumber { raw, line, column });
                }
                let width = raw.chars().count();
                (Token::Number(value, raw), width)
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let ident: String = chars[i..]
                    .iter()
                    .take_while(|c| c.is_ascii_alphanumeric() || **c == '_')
                    .collect();
                let width = ident.chars().count();
                (Token::Ident(ident), width)
            }
            other => {
                return Err(ContractError::UnexpectedToken {
                    expected: "a token",
                    found: other.to_string(),
                    line,
                    column,
                })
            }
        };
        tokens.push(Spanned { token, column });
        i += width;
    }

    tokens.push(Spanned {
        token: Token::End,
        column: chars.len() + 1,
    });
    Ok(tokens)
}

fn read_string(chars: &[char], line: usize, column: usize) -> Result<(String, usize), ContractError> {
    let mut value = String::new();
    let mut i = 1;
    while i < chars.len() {
        match chars[i] {
            '"' => return Ok((value, i + 1)),
            '\\' => {
                let escaped = chars
                    .get(i + 1)
                    .ok_or(ContractError::UnterminatedString { line, column })?;
                value.push(match escaped {
                    'n' => '\n',
                    't' => '\t',
                    other => *other,
                });
                i += 2;
            }
            other => {
                value.push(other);
                i += 1;
            }
        }
    }
    Err(ContractError::UnterminatedString { line, column })
}

fn read_number(chars: &[char]) -> String {
    let mut raw = String::new();
    let mut i = 0;
    if chars.first() == Some(&'-') {
        raw.push('-');
        i = 1;
    }
    let digits = |raw: &mut String, i: &mut usize| {
        while let Some(c) = chars.get(*i).filter(|c| c.is_ascii_digit()) {
            raw.push(*c);
            *i += 1;
        }
    };
    digits(&mut raw, &mut i);
    if chars.get(i) == Some(&'.') && chars.get(i + 1).is_some_and(|c| c.is_ascii_digit()) {
        raw.push('.');
        i += 1;
        digits(&mut raw, &mut i);
    }
    if matches!(chars.get(i), Some('e') | Some('E')) {
        let sign = matches!(chars.get(i + 1), Some('+') | Some('-'));
        let first_digit = if sign { i + 2 } else { i + 1 };
        if chars.get(first_digit).is_some_and(|c| c.is_ascii_digit()) {
            raw.push(chars[i]);
            if sign {
                raw.push(chars[i + 1]);
            }
            i = first_digit;
            digits(&mut raw, &mut i);
        }
    }
    raw
}

struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
    line: usize,
    depth: usize,
}

impl Parser {
    fn new(tokens: Vec<Spanned>, line: usize) -> Self {
        Self {
            tokens,
            pos: 0,
            line,
            depth: 0,
        }
    }

    fn peek(&self) -> &Token {
        self.tokens
            .get(self.pos)
            .map(|s| &s.token)
            .unwrap_or(&Token::End)
    }

    fn peek_at(&self, offset: usize) -> &Token {
        self.tokens
            .get(self.pos + offset)
            .map(|s| &s.token)
            .unwrap_or(&Token::End)
    }

    fn column(&self) -> usize {
        self.tokens.get(self.pos).map(|s| s.column).unwrap_or(0)
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        token
    }

    fn unexpected(&self, expected: &'static str) -> ContractError {
        ContractError::UnexpectedToken {
            expected,
            found: self.peek().describe(),
            line: self.line,
            column: self.column(),
        }
    }

    fn expect(&mut self, token: Token, expected: &'static str) -> Result<(), ContractError> {
        if *self.peek() == token {
            self.advance();
            Ok(())
        } else {
            Err(self.unexpected(expected))
        }
    }

    fn expect_end(&mut self) -> Result<(), ContractError> {
        self.expect(Token::End, "end of assertion")
    }

    fn is_keyword(&self, word: &str) -> bool {
        matches!(self.peek(), Token::Ident(s) if s == word)
    }

    fn enter(&mut self) -> Result<(), ContractError> {
        self.depth += 1;
        if self.depth > MAX_NESTING {
            return Err(ContractError::NestingTooDeep {
                max: MAX_NESTING,
                line: self.line,
                column: self.column(),
            });
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }

    fn assertion(&mut self) -> Result<Assertion, ContractError> {
        let name = match self.advance() {
            Token::Ident(name) => name,
            _ => {
                self.pos = self.pos.saturating_sub(1);
                return Err(self.unexpected("an assertion name"));
            }
        };
        self.expect(Token::LParen, "`(`")?;

        let assertion = match name.as_str() {
            "range" => {
                let field = self.path()?;
                self.expect(Token::Comma, "`,`")?;
                let low = self.number()?;
                self.expect(Token::Comma, "`,`")?;
                let high = self.number()?;
                Assertion::Range { field, low, high }
            }
            "not_empty" => Assertion::NotEmpty { field: self.path()? },
            "is_list" => Assertion::IsList { field: self.path()? },
            "type" => {
                let field = self.path()?;
                self.expect(Token::Comma, "`,`")?;
                let kind = match self.advance() {
                    Token::Ident(kind) => kind,
                    _ => {
                        self.pos = self.pos.saturating_sub(1);
                        return Err(self.unexpected("a type kind"));
                    }
                };
                let value_kind = ValueKind::parse(&kind).ok_or(ContractError::UnknownKind {
                    kind,
                    line: self.line,
                })?;
                Assertion::Type { field, value_kind }
            }
            "one_of" => {
                let field = self.path()?;
                self.expect(Token::Comma, "`,`")?;
                let allowed = match self.literal()? {
                    Literal::List(items) => items,
                    _ => return Err(self.unexpected("a list literal")),
                };
                Assertion::OneOf { field, allowed }
            }
            "forall" | "exists" => {
                let quantifier = if name == "forall" {
                    Quantifier::Forall
                } else {
                    Quantifier::Exists
                };
                let list = self.path()?;
                self.expect(Token::Comma, "`,`")?;
                let predicate = self.expr()?;
                Assertion::Quantified {
                    quantifier,
                    list,
                    predicate,
                }
            }
            "implies" => {
                let condition = self.expr()?;
                self.expect(Token::Comma, "`,`")?;
                let consequent = self.expr()?;
                Assertion::Implication {
                    condition,
                    consequent,
                }
            }
            _ => {
                return Err(ContractError::UnknownAssertion {
                    name,
                    line: self.line,
                })
            }
        };

        self.expect(Token::RParen, "`)`")?;
        Ok(assertion)
    }

    fn number(&mut self) -> Result<f64, ContractError> {
        match self.peek().clone() {
            Token::Number(value, _) => {
                self.advance();
                Ok(value)
            }
            _ => Err(self.unexpected("a number")),
        }
    }

    fn path(&mut self) -> Result<FieldPath, ContractError> {
        let first = match self.peek().clone() {
            Token::Ident(name) if !KEYWORDS.contains(&name.as_str()) => {
                self.advance();
                name
            }
            _ => return Err(self.unexpected("a field path")),
        };

        let mut path = if first == ITEM {
            FieldPath {
                item: true,
                segments: Vec::new(),
            }
        } else {
            FieldPath {
                item: false,
                segments: vec![Segment::Key(first)],
            }
        };

        loop {
            match self.peek() {
                Token::Dot => {
                    self.advance();
                    match self.advance() {
                        Token::Ident(key) => path.segments.push(Segment::Key(key)),
                        _ => {
                            self.pos = self.pos.saturating_sub(1);
                            return Err(self.unexpected("a field name"));
                        }
                    }
                }
                Token::LBracket => {
                    self.advance();
                    let column = self.column();
                    let index = match self.advance() {
                        Token::Number(_, raw) => {
                            raw.parse::<usize>()
                                .map_err(|_| ContractError::InvalidNumber {
                                    raw,
                                    line: self.line,
                                    column,
                                })?
                        }
                        _ => {
                            self.pos = self.pos.saturating_sub(1);
                            return Err(self.unexpected("an index"));
                        }
                    };
                    self.expect(Token::RBracket, "`]`")?;
                    path.segments.push(Segment::Index(index));
                }
                _ => break,
            }
        }
        Ok(path)
    }

    fn literal(&mut self) -> Result<Literal, ContractError> {
        match self.peek().clone() {
            Token::Number(value, _) => {
                self.advance();
                Ok(Literal::Number(value))
            }
            Token::Str(value) => {
                self.advance();
                Ok(Literal::String(value))
            }
            Token::Ident(word) if word == "true" || word == "false" => {
                self.advance();
                Ok(Literal::Bool(word == "true"))
            }
            Token::Ident(word) if word == "null" => {
                self.advance();
                Ok(Literal::Null)
            }
            Token::LBracket => {
                self.advance();
                self.enter()?;
                let mut items = Vec::new();
                if *self.peek() != Token::RBracket {
                    loop {
                        items.push(self.literal()?);
                        if *self.peek() == Token::Comma {
                            self.advance();
                        } else {
                            break;
                        }
                    }
                }
                self.expect(Token::RBracket, "`]`")?;
                self.leave();
                Ok(Literal::List(items))
            }
            _ => Err(self.unexpected("a literal")),
        }
    }

    fn expr(&mut self) -> Result<Expr, ContractError> {
        let mut parts = vec![self.and()?];
        while *self.peek() == Token::OrOr || self.is_keyword("or") {
            self.advance();
            parts.push(self.and()?);
        }
        Ok(if parts.len() == 1 {
            parts.remove(0)
        } else {
            Expr::Or(parts)
        })
    }

    fn and(&mut self) -> Result<Expr, ContractError> {
        let mut parts = vec![self.unary()?];
        while *self.peek() == Token::AndAnd || self.is_keyword("and") {
            self.advance();
            parts.push(self.unary()?);
        }
        Ok(if parts.len() == 1 {
            parts.remove(0)
        } else {
            Expr::And(parts)
        })
    }

    fn unary(&mut self) -> Result<Expr, ContractError> {
        if *self.peek() == Token::Bang || self.is_keyword("not") {
            self.advance();
            self.enter()?;
            let inner = self.unary()?;
            self.leave();
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.comparison()
    }

    fn comparison(&mut self) -> Result<Expr, ContractError> {
        let left = self.primary()?;
        if let Token::Op(op) = *self.peek() {
            self.advance();
            let right = self.primary()?;
            return Ok(Expr::Compare {
                left: Box::new(left),
                op,
                right: Box::new(right),
            });
        }
        if self.is_keyword("in") {
            self.advance();
            let haystack = match self.literal()? {
                Literal::List(items) => items,
                _ => return Err(self.unexpected("a list literal")),
            };
            return Ok(Expr::In {
                needle: Box::new(left),
                haystack,
            });
        }
        Ok(left)
    }

    fn primary(&mut self) -> Result<Expr, ContractError> {
        match self.peek().clone() {
            Token::LParen => {
                self.advance();
                self.enter()?;
                let inner = self.expr()?;
                self.expect(Token::RParen, "`)`")?;
                self.leave();
                Ok(inner)
            }
            Token::Number(..) | Token::Str(_) | Token::LBracket => {
                Ok(Expr::Literal(self.literal()?))
            }
            Token::Ident(word) if matches!(word.as_str(), "true" | "false" | "null") => {
                Ok(Expr::Literal(self.literal()?))
            }
            Token::Ident(word) if *self.peek_at(1) == Token::LParen => {
                let column = self.column();
                self.advance();
                self.advance();
                let path = self.path()?;
                self.expect(Token::RParen, "`)`")?;
                match word.as_str() {
                    "count" => Ok(Expr::Count(path)),
                    "exists" => Ok(Expr::Exists(path)),
                    _ => Err(ContractError::UnknownFunction {
                        name: word,
                        line: self.line,
                        column,
                    }),
                }
            }
            Token::Ident(_) => Ok(Expr::Path(self.path()?)),
            _ => Err(self.unexpected("an expression")),
        }
    }
}
