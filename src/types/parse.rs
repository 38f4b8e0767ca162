//! Annotation syntax → raw tree.
//!
//! Accepts the subscripted typing syntax (`Optional[List[Item]]`,
//! `Dict[str, int]`, `Tuple[int, ...]`, `int | None`, quoted forward references)
//! and produces a [`RawType`]. No name resolution happens here.
use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{Error, Result};

static TOKEN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"\s*(?:(?P<ellipsis>\.\.\.)|(?P<unit>\(\s*\))|['"](?P<quoted>[A-Za-z_][A-Za-z0-9_\.]*)['"]|(?P<ident>[A-Za-z_][A-Za-z0-9_\.]*)|(?P<punct>[\[\],|]))"#,
    )
    .expect("annotation token pattern is valid")
});

// ————————————————————————————————————————————————————————————————————————————
// TYPES
// ————————————————————————————————————————————————————————————————————————————

/// Unresolved annotation tree. `args` is `None` for a bare name (`List`) and
/// `Some` for a subscripted one (`List[int]`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawType {
    pub head: String,
    pub args: Option<Vec<RawType>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Ident(String),
    Open,
    Close,
    Comma,
    Pipe,
    Ellipsis,
    Unit,
}

// ————————————————————————————————————————————————————————————————————————————
// IMPLEMENTATION
// ————————————————————————————————————————————————————————————————————————————

impl RawType {
    pub fn name(head: impl Into<String>) -> Self {
        Self { head: head.into(), args: None }
    }

    pub fn generic(head: impl Into<String>, args: Vec<RawType>) -> Self {
        Self { head: head.into(), args: Some(args) }
    }

    pub fn parse(src: &str) -> Result<Self> {
        let tokens = tokenize(src)?;
        let mut parser = Parser { src, tokens, pos: 0 };
        let raw = parser.union()?;
        if parser.pos != parser.tokens.len() {
            return Err(parser.error("trailing input after annotation"));
        }
        Ok(raw)
    }
}

impl fmt::Display for RawType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.head)?;
        if let Some(args) = &self.args {
            f.write_str("[")?;
            for (i, arg) in args.iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                write!(f, "{arg}")?;
            }
            f.write_str("]")?;
        }
        Ok(())
    }
}

fn tokenize(src: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut pos = 0;
    for caps in TOKEN.captures_iter(src) {
        let Some(whole) = caps.get(0) else { continue };
        if whole.start() != pos {
            return Err(unexpected(src, pos));
        }
        pos = whole.end();
        let token = if caps.name("ellipsis").is_some() {
            Token::Ellipsis
        } else if caps.name("unit").is_some() {
            Token::Unit
        } else if let Some(m) = caps.name("quoted").or_else(|| caps.name("ident")) {
            Token::Ident(normalize_ident(m.as_str()))
        } else {
            match caps.name("punct").map(|m| m.as_str()) {
                Some("[") => Token::Open,
                Some("]") => Token::Close,
                Some(",") => Token::Comma,
                Some("|") => Token::Pipe,
                _ => return Err(unexpected(src, whole.start())),
            }
        };
        tokens.push(token);
    }
    if !src[pos..].trim().is_empty() {
        return Err(unexpected(src, pos));
    }
    Ok(tokens)
}

// `typing.Optional` and `Optional` name the same thing
fn normalize_ident(ident: &str) -> String {
    ident.strip_prefix("typing.").unwrap_or(ident).to_string()
}

fn unexpected(src: &str, pos: usize) -> Error {
    Error::UnsupportedType {
        annotation: src.to_string(),
        reason: format!("unexpected character at offset {pos}"),
    }
}

struct Parser<'a> {
    src: &'a str,
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn bump(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn error(&self, reason: &str) -> Error {
        Error::UnsupportedType {
            annotation: self.src.to_string(),
            reason: reason.to_string(),
        }
    }

    /// `term ('|' term)*`, desugared into `Union[...]`.
    fn union(&mut self) -> Result<RawType> {
        let first = self.term()?;
        if self.peek() != Some(&Token::Pipe) {
            return Ok(first);
        }
        let mut arms = vec![first];
        while self.peek() == Some(&Token::Pipe) {
            self.pos += 1;
            arms.push(self.term()?);
        }
        Ok(RawType::generic("Union", arms))
    }

    fn term(&mut self) -> Result<RawType> {
        match self.bump() {
            Some(Token::Ident(head)) => {
                if self.peek() != Some(&Token::Open) {
                    return Ok(RawType::name(head));
                }
                self.pos += 1;
                let args = self.args()?;
                Ok(RawType::generic(head, args))
            }
            Some(Token::Ellipsis) => Ok(RawType::name("...")),
            Some(Token::Unit) => Ok(RawType::name("()")),
            Some(_) => Err(self.error("expected a type name")),
            None => Err(self.error("unexpected end of annotation")),
        }
    }

    fn args(&mut self) -> Result<Vec<RawType>> {
        let mut args = Vec::new();
        loop {
            if self.peek() == Some(&Token::Close) {
                self.pos += 1;
                break;
            }
            args.push(self.union()?);
            match self.bump() {
                Some(Token::Comma) => continue,
                Some(Token::Close) => break,
                _ => return Err(self.error("expected ',' or ']'")),
            }
        }
        if args.is_empty() {
            return Err(self.error("empty type argument list"));
        }
        Ok(args)
    }
}

// ————————————————————————————————————————————————————————————————————————————
// TESTS
// ————————————————————————————————————————————————————————————————————————————
