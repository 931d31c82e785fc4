//! Field templates for building activities from "now playing" data.
//!
//! Two placeholder forms are supported inside a template string:
//!
//! - `{a.b.0}` - path lookup; dots separate object keys and array indices
//! - `@{expr}` - a small expression, evaluated against the same fields
//!
//! The expression form is deliberately tiny. It is not a scripting language
//! and nothing in it can call out of the evaluator:
//!
//! ```text
//! expr     := chain ( "??" chain )*
//! chain    := primary accessor*
//! primary  := IDENT | STRING | NUMBER
//! accessor := "." IDENT
//!           | "[" NUMBER "]"
//!           | ".find(" IDENT "==" literal ")"
//!           | ".first()" | ".last()"
//! ```
//!
//! Rendering never fails. A missing field or a broken expression yields an
//! absent value for that placeholder only.
//!
//! # Example
//!
//! ```
//! use presence_ipc::activity::template::render;
//! use serde_json::json;
//!
//! let fields = json!({"title": "A", "cover": [{"size": "640x640", "url": "https://x/640.jpg"}]});
//! assert_eq!(render("{title} - {artist}", &fields).as_deref(), Some("A - "));
//! assert_eq!(
//!     render(r#"@{cover.find(size == "640x640").url ?? "fallback"}"#, &fields).as_deref(),
//!     Some("https://x/640.jpg")
//! );
//! ```

use anyhow::{anyhow, bail, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{Activity, ActivityKind, Assets, Timestamps};

/// Render a template against `fields`.
///
/// Returns `None` when the field should be omitted:
/// - every placeholder in the template resolved to nothing, or
/// - the rendered text is empty.
///
/// Otherwise absent placeholders contribute empty text.
pub fn render(template: &str, fields: &Value) -> Option<String> {
    let segments = split_segments(template);

    let mut out = String::new();
    let mut placeholders = 0usize;
    let mut resolved = 0usize;

    for segment in &segments {
        match segment {
            Segment::Literal(text) => out.push_str(text),
            Segment::Path(path) => {
                placeholders += 1;
                if let Some(text) = lookup_path(fields, path).and_then(value_to_text) {
                    resolved += 1;
                    out.push_str(&text);
                }
            }
            Segment::Expr(src) => {
                placeholders += 1;
                match evaluate(src, fields) {
                    Ok(value) => {
                        if let Some(text) = value.as_ref().and_then(value_to_text) {
                            resolved += 1;
                            out.push_str(&text);
                        }
                    }
                    Err(e) => log::debug!("[Template] Expression '{}' failed: {e}", src),
                }
            }
        }
    }

    if placeholders > 0 && resolved == 0 {
        return None;
    }
    (!out.is_empty()).then_some(out)
}

/// Evaluate a single expression (the inside of `@{...}`).
///
/// # Errors
///
/// Returns an error for syntax errors and unknown methods. Missing fields are
/// not errors; they evaluate to `Ok(None)`.
pub fn evaluate(src: &str, fields: &Value) -> Result<Option<Value>> {
    let tokens = tokenize(src)?;
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.parse_expr()?;
    if parser.pos != parser.tokens.len() {
        bail!("unexpected trailing input in '{src}'");
    }
    Ok(expr.eval(fields))
}

#[derive(Debug, PartialEq)]
enum Segment {
    Literal(String),
    Path(String),
    Expr(String),
}

fn split_segments(template: &str) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut literal = String::new();
    let mut rest = template;

    while !rest.is_empty() {
        let (is_expr, open) = if rest.starts_with("@{") {
            (true, 2)
        } else if rest.starts_with('{') {
            (false, 1)
        } else {
            let mut chars = rest.chars();
            if let Some(c) = chars.next() {
                literal.push(c);
            }
            rest = chars.as_str();
            continue;
        };

        let Some(close) = find_closing_brace(&rest[open..]) else {
            // Unterminated placeholder: keep the remainder verbatim
            literal.push_str(rest);
            break;
        };

        if !literal.is_empty() {
            segments.push(Segment::Literal(std::mem::take(&mut literal)));
        }
        let inner = rest[open..open + close].trim().to_string();
        segments.push(if is_expr {
            Segment::Expr(inner)
        } else {
            Segment::Path(inner)
        });
        rest = &rest[open + close + 1..];
    }

    if !literal.is_empty() {
        segments.push(Segment::Literal(literal));
    }
    segments
}

/// Byte offset of the `}` closing a placeholder, skipping quoted strings.
fn find_closing_brace(s: &str) -> Option<usize> {
    let mut quote: Option<char> = None;
    let mut escaped = false;
    for (i, c) in s.char_indices() {
        match quote {
            Some(q) => {
                if escaped {
                    escaped = false;
                } else if c == '\\' {
                    escaped = true;
                } else if c == q {
                    quote = None;
                }
            }
            None => match c {
                '"' | '\'' => quote = Some(c),
                '}' => return Some(i),
                _ => {}
            },
        }
    }
    None
}

fn lookup_path<'a>(fields: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .map(str::trim)
        .try_fold(fields, |current, key| match current {
            Value::Object(map) => map.get(key),
            Value::Array(items) => key.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        })
}

fn value_to_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

// ============================================================================
// Expression evaluator
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Str(String),
    Num(Value),
    Dot,
    LBracket,
    RBracket,
    LParen,
    RParen,
    EqEq,
    Coalesce,
}

fn tokenize(src: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = src.char_indices().peekable();

    while let Some(&(start, c)) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '.' => {
                chars.next();
                tokens.push(Token::Dot);
            }
            '[' => {
                chars.next();
                tokens.push(Token::LBracket);
            }
            ']' => {
                chars.next();
                tokens.push(Token::RBracket);
            }
            '(' => {
                chars.next();
                tokens.push(Token::LParen);
            }
            ')' => {
                chars.next();
                tokens.push(Token::RParen);
            }
            '=' => {
                chars.next();
                if chars.next().map(|(_, c)| c) != Some('=') {
                    bail!("expected '==' at offset {start}");
                }
                tokens.push(Token::EqEq);
            }
            '?' => {
                chars.next();
                if chars.next().map(|(_, c)| c) != Some('?') {
                    bail!("expected '??' at offset {start}");
                }
                tokens.push(Token::Coalesce);
            }
            '"' | '\'' => {
                chars.next();
                let mut text = String::new();
                let mut closed = false;
                while let Some((_, ch)) = chars.next() {
                    match ch {
                        '\\' => {
                            if let Some((_, escaped)) = chars.next() {
                                text.push(escaped);
                            }
                        }
                        ch if ch == c => {
                            closed = true;
                            break;
                        }
                        ch => text.push(ch),
                    }
                }
                if !closed {
                    bail!("unterminated string starting at offset {start}");
                }
                tokens.push(Token::Str(text));
            }
            c if c.is_ascii_digit() || c == '-' => {
                let mut end = start;
                while let Some(&(i, ch)) = chars.peek() {
                    let sign = i == start && ch == '-';
                    // A dot not followed by a digit starts an accessor
                    let fraction = ch == '.'
                        && i > start
                        && src[i + 1..].starts_with(|d: char| d.is_ascii_digit());
                    if !(ch.is_ascii_digit() || sign || fraction) {
                        break;
                    }
                    end = i + ch.len_utf8();
                    chars.next();
                }
                tokens.push(Token::Num(parse_number(&src[start..end])?));
            }
            c if c.is_alphabetic() || c == '_' => {
                let mut end = start;
                while let Some(&(i, ch)) = chars.peek() {
                    if ch.is_alphanumeric() || ch == '_' {
                        end = i + ch.len_utf8();
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Ident(src[start..end].to_string()));
            }
            other => bail!("unexpected character '{other}' at offset {start}"),
        }
    }

    Ok(tokens)
}

fn parse_number(text: &str) -> Result<Value> {
    if let Ok(i) = text.parse::<i64>() {
        return Ok(Value::from(i));
    }
    let f: f64 = text.parse().map_err(|e| anyhow!("invalid number '{text}': {e}"))?;
    serde_json::Number::from_f64(f)
        .map(Value::Number)
        .ok_or_else(|| anyhow!("non-finite number '{text}'"))
}

#[derive(Debug, Clone, PartialEq)]
enum Step {
    Field(String),
    Index(usize),
    Find { key: String, value: Value },
    First,
    Last,
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Literal(Value),
    Chain { root: Box<Expr>, steps: Vec<Step> },
    Field(String),
    Coalesce(Box<Expr>, Box<Expr>),
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn expect(&mut self, expected: &Token) -> Result<()> {
        match self.next() {
            Some(ref token) if token == expected => Ok(()),
            other => bail!("expected {expected:?}, found {other:?}"),
        }
    }

    fn ident(&mut self) -> Result<String> {
        match self.next() {
            Some(Token::Ident(name)) => Ok(name),
            other => bail!("expected identifier, found {other:?}"),
        }
    }

    fn parse_expr(&mut self) -> Result<Expr> {
        let mut expr = self.parse_chain()?;
        while self.peek() == Some(&Token::Coalesce) {
            self.pos += 1;
            let rhs = self.parse_chain()?;
            expr = Expr::Coalesce(Box::new(expr), Box::new(rhs));
        }
        Ok(expr)
    }

    fn parse_literal(&mut self) -> Result<Value> {
        match self.next() {
            Some(Token::Str(s)) => Ok(Value::String(s)),
            Some(Token::Num(n)) => Ok(n),
            Some(Token::Ident(word)) => match word.as_str() {
                "true" => Ok(Value::Bool(true)),
                "false" => Ok(Value::Bool(false)),
                "null" => Ok(Value::Null),
                _ => bail!("expected literal, found identifier '{word}'"),
            },
            other => bail!("expected literal, found {other:?}"),
        }
    }

    fn parse_chain(&mut self) -> Result<Expr> {
        let root = match self.peek() {
            Some(Token::Ident(_)) => {
                let name = self.ident()?;
                match name.as_str() {
                    "true" => Expr::Literal(Value::Bool(true)),
                    "false" => Expr::Literal(Value::Bool(false)),
                    "null" => Expr::Literal(Value::Null),
                    _ => Expr::Field(name),
                }
            }
            Some(Token::Str(_) | Token::Num(_)) => Expr::Literal(self.parse_literal()?),
            other => bail!("expected field or literal, found {other:?}"),
        };

        let mut steps = Vec::new();
        loop {
            match self.peek() {
                Some(Token::Dot) => {
                    self.pos += 1;
                    let name = self.ident()?;
                    if self.peek() == Some(&Token::LParen) {
                        self.pos += 1;
                        steps.push(self.parse_method(&name)?);
                    } else {
                        steps.push(Step::Field(name));
                    }
                }
                Some(Token::LBracket) => {
                    self.pos += 1;
                    let index = match self.next() {
                        Some(Token::Num(Value::Number(n))) => n
                            .as_u64()
                            .and_then(|i| usize::try_from(i).ok())
                            .ok_or_else(|| anyhow!("index must be a non-negative integer"))?,
                        Some(Token::Str(key)) => {
                            self.expect(&Token::RBracket)?;
                            steps.push(Step::Field(key));
                            continue;
                        }
                        other => bail!("expected index, found {other:?}"),
                    };
                    self.expect(&Token::RBracket)?;
                    steps.push(Step::Index(index));
                }
                _ => break,
            }
        }

        if steps.is_empty() {
            Ok(root)
        } else {
            Ok(Expr::Chain {
                root: Box::new(root),
                steps,
            })
        }
    }

    /// Parse a method call; the opening paren is already consumed.
    fn parse_method(&mut self, name: &str) -> Result<Step> {
        let step = match name {
            "find" => {
                let key = self.ident()?;
                self.expect(&Token::EqEq)?;
                let value = self.parse_literal()?;
                Step::Find { key, value }
            }
            "first" => Step::First,
            "last" => Step::Last,
            other => bail!("unknown method '{other}'"),
        };
        self.expect(&Token::RParen)?;
        Ok(step)
    }
}

impl Expr {
    fn eval(&self, fields: &Value) -> Option<Value> {
        match self {
            Self::Literal(value) => Some(value.clone()),
            Self::Field(name) => fields.get(name).cloned(),
            Self::Chain { root, steps } => {
                let mut current = root.eval(fields)?;
                for step in steps {
                    current = apply_step(&current, step)?;
                }
                Some(current)
            }
            Self::Coalesce(lhs, rhs) => match lhs.eval(fields) {
                Some(value) if !value.is_null() => Some(value),
                _ => rhs.eval(fields),
            },
        }
    }
}

fn apply_step(value: &Value, step: &Step) -> Option<Value> {
    match step {
        Step::Field(name) => value.get(name).cloned(),
        Step::Index(i) => value.as_array()?.get(*i).cloned(),
        Step::First => value.as_array()?.first().cloned(),
        Step::Last => value.as_array()?.last().cloned(),
        Step::Find { key, value: wanted } => value
            .as_array()?
            .iter()
            .find(|item| item.get(key).is_some_and(|v| loosely_equal(v, wanted)))
            .cloned(),
    }
}

/// Equality that treats `640` and `640.0` as the same number.
fn loosely_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

// ============================================================================
// Activity template
// ============================================================================

/// Per-field templates that produce an [`Activity`].
///
/// Every text field is a template string (see the module docs). `kind` and
/// `flags` are copied as-is; `timestamps` controls whether playback timing is
/// attached.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActivityTemplate {
    /// Activity name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Activity kind.
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<ActivityKind>,
    /// Stream URL.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// First line.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    /// Second line.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    /// Large image key or URL.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub large_image: Option<String>,
    /// Large image hover text.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub large_text: Option<String>,
    /// Small image key or URL.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub small_image: Option<String>,
    /// Small image hover text.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub small_text: Option<String>,
    /// Host-defined flag bits.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flags: Option<u32>,
    /// Attach playback timestamps when available.
    pub timestamps: bool,
}

impl ActivityTemplate {
    /// Resolve every template against `fields`.
    ///
    /// `timestamps` is only attached when the template enables it.
    pub fn build(&self, fields: &Value, timestamps: Option<Timestamps>) -> Activity {
        let field = |template: &Option<String>| template.as_deref().and_then(|t| render(t, fields));

        let assets = Assets {
            large_image: field(&self.large_image),
            large_text: field(&self.large_text),
            small_image: field(&self.small_image),
            small_text: field(&self.small_text),
        };

        Activity {
            name: field(&self.name),
            kind: self.kind,
            url: field(&self.url),
            state: field(&self.state),
            details: field(&self.details),
            assets: (!assets.is_empty()).then_some(assets),
            timestamps: if self.timestamps { timestamps } else { None },
            flags: self.flags,
        }
    }
}
