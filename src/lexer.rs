//! Lexer for raw hardware instruction log lines using logos
//!
//! A log line looks roughly like:
//!
//! ```text
//! [1234] PC: 0x1a40 (3) MTE2 : (0110 1001) MOV_OUT_TO_L1 XN:0x10000 XM:0x40 id=17
//! ```
//!
//! Recognized tokens:
//! - Timestamps: `[1234]`
//! - Program counter: `PC: 0x1a40`
//! - Operand addresses: `XN:0x..`, `Src:OUT:0x..`, `Dst=0x..`
//! - Instruction ids: `id=17`, `instr_id: 17` (case-insensitive)
//! - Words, numbers, hex literals and `( ) : = ,` punctuation
//!
//! Anything else lexes as an error item, which keeps token adjacency intact.

use logos::Logos;
use serde::{Deserialize, Serialize};
use std::ops::Range;

/// An address operand such as `XN:0x1000` or `Src:OUT:0x20`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operand {
    pub label: String,
    pub qualifier: Option<String>,
    pub addr: u64,
}

fn hex_after_0x(slice: &str) -> Option<u64> {
    let pos = slice.rfind("0x")?;
    u64::from_str_radix(&slice[pos + 2..], 16).ok()
}

fn operand(lex: &mut logos::Lexer<LogToken>) -> Option<Operand> {
    let slice = lex.slice();
    let addr = hex_after_0x(slice)?;
    // Strip the `<sep>0x...` tail, leaving `LABEL` or `LABEL:QUAL`
    let head = &slice[..slice.rfind("0x")? - 1];
    let mut parts = head.splitn(2, ':');
    let label = parts.next()?.to_string();
    let qualifier = parts.next().map(str::to_string);
    Some(Operand {
        label,
        qualifier,
        addr,
    })
}

fn instr_id(lex: &mut logos::Lexer<LogToken>) -> Option<u64> {
    let slice = lex.slice();
    let pos = slice.find(|c: char| c == ':' || c == '=')?;
    slice[pos + 1..].trim().parse().ok()
}

/// Token types of a raw log line
#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r\n]+")]
pub enum LogToken {
    #[regex(r"\[[0-9]+\]", |lex| { let s = lex.slice(); s[1..s.len() - 1].parse::<u64>().ok() })]
    Timestamp(u64),

    #[regex(r"PC:[ \t]*0x[0-9a-fA-F]+", |lex| hex_after_0x(lex.slice()))]
    Pc(u64),

    #[regex(r"(XN|XM|XD|XT|Src|Dst|BASE|Addr|SPR)(:[A-Za-z0-9]+)?[:=]0x[0-9a-fA-F]+", operand)]
    Operand(Operand),

    #[regex(r"([iI][nN][sS][tT][rR]_)?[iI][dD][ \t]*[:=][ \t]*[0-9]+", instr_id)]
    Id(u64),

    #[regex(r"0x[0-9a-fA-F]+", |lex| hex_after_0x(lex.slice()))]
    Hex(u64),

    #[regex(r"[0-9]+")]
    Number,

    #[regex(r"[A-Za-z_][A-Za-z0-9_]*")]
    Word,

    #[token("(")]
    LParen,

    #[token(")")]
    RParen,

    #[token(":")]
    Colon,

    #[token("=")]
    Equals,

    #[token(",")]
    Comma,
}

/// One lexed item: the token (or `Err` for unrecognized input) and its span
#[derive(Debug, Clone, PartialEq)]
pub struct Lexeme {
    pub token: Result<LogToken, ()>,
    pub span: Range<usize>,
}

/// Tokenized view of one log line
pub struct LineLexer<'source> {
    source: &'source str,
    lexemes: Vec<Lexeme>,
}

impl<'source> LineLexer<'source> {
    pub fn new(source: &'source str) -> Self {
        let mut inner = LogToken::lexer(source);
        let mut lexemes = Vec::new();
        while let Some(token) = inner.next() {
            lexemes.push(Lexeme {
                token,
                span: inner.span(),
            });
        }
        Self { source, lexemes }
    }

    pub fn lexemes(&self) -> &[Lexeme] {
        &self.lexemes
    }

    /// Source text of the i-th lexeme
    pub fn text(&self, i: usize) -> &'source str {
        &self.source[self.lexemes[i].span.clone()]
    }

    pub fn is(&self, i: usize, expected: &LogToken) -> bool {
        matches!(self.lexemes.get(i), Some(Lexeme { token: Ok(tok), .. }) if tok == expected)
    }

    pub fn timestamp(&self) -> Option<u64> {
        self.tokens().find_map(|t| match t {
            LogToken::Timestamp(ts) => Some(*ts),
            _ => None,
        })
    }

    pub fn pc(&self) -> Option<u64> {
        self.tokens().find_map(|t| match t {
            LogToken::Pc(pc) => Some(*pc),
            _ => None,
        })
    }

    pub fn id(&self) -> Option<u64> {
        self.tokens().find_map(|t| match t {
            LogToken::Id(id) => Some(*id),
            _ => None,
        })
    }

    pub fn operands(&self) -> Vec<Operand> {
        self.tokens()
            .filter_map(|t| match t {
                LogToken::Operand(op) => Some(op.clone()),
                _ => None,
            })
            .collect()
    }

    /// First `[A-Z0-9_]+` run directly following a `)`
    pub fn pipeline_tag(&self) -> Option<&'source str> {
        (0..self.lexemes.len())
            .filter(|&i| self.is(i, &LogToken::RParen))
            .find_map(|i| self.upper_prefix(i + 1, 1))
    }

    /// Mnemonic following a `) TAG : (binary)` sequence, if present
    pub fn mnemonic_after_blob(&self) -> Option<&'source str> {
        (0..self.lexemes.len())
            .filter(|&i| self.is(i, &LogToken::RParen))
            .find_map(|i| {
                let tag = self.upper_prefix(i + 1, 1)?;
                if tag.len() != self.text(i + 1).len()
                    || !self.is(i + 2, &LogToken::Colon)
                    || !self.is(i + 3, &LogToken::LParen)
                {
                    return None;
                }
                let close = (i + 4..self.lexemes.len()).find(|&j| self.is(j, &LogToken::RParen))?;
                let word = self.upper_prefix(close + 1, 2)?;
                word.chars()
                    .next()
                    .filter(|c| c.is_ascii_uppercase())
                    .map(|_| word)
            })
    }

    fn tokens(&self) -> impl Iterator<Item = &LogToken> {
        self.lexemes.iter().filter_map(|l| l.token.as_ref().ok())
    }

    /// Leading `[A-Z0-9_]` run of lexeme `i`, if at least `min` chars long
    fn upper_prefix(&self, i: usize, min: usize) -> Option<&'source str> {
        if i >= self.lexemes.len() || self.lexemes[i].token.is_err() {
            return None;
        }
        let text = self.text(i);
        let len = text
            .find(|c: char| !(c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_'))
            .unwrap_or(text.len());
        (len >= min).then(|| &text[..len])
    }
}
