//! Lexer for KSL source text.
//!
//! Produces a flat [Token] list terminated by [TokenKind::EndOfTokens]. Every token carries the
//! line and column it started at, which later phases use for their diagnostics.

use std::fmt::Write;

use log::trace;
use nom::{
    branch::alt,
    bytes::complete::{tag, take_while},
    character::complete::{char, digit1, hex_digit1, one_of, satisfy},
    combinator::{opt, recognize},
    sequence::{pair, tuple},
    IResult,
};
use phf::phf_map;

use crate::error::{Diagnostic, Phase};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Symbol {
    LessLessEqual,
    GreatGreatEqual,
    LessEqual,
    GreaterEqual,
    EqualEqual,
    NotEqual,
    LessLess,
    GreatGreat,
    LazyOr,
    LazyAnd,
    PlusEqual,
    MinusEqual,
    MulEqual,
    DivEqual,
    PlusPlus,
    MinusMinus,
    Semicolon,
    LeftParen,
    RightParen,
    LeftBrace,
    RightBrace,
    LeftBracket,
    RightBracket,
    Less,
    Greater,
    Equal,
    Point,
    Comma,
    Plus,
    Minus,
    Mul,
    Div,
    Mod,
    BitwiseAnd,
    BitwiseOr,
    Colon,
    QuestionMark,
    ExclamationMark,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Keyword {
    Uniform,
    In,
    Out,
    Inout,
    Const,
    True,
    False,
    If,
    Else,
    For,
    Continue,
    Break,
    Return,
    Discard,
    Buffer,
    Shared,
    Image2D,
    Readonly,
    Writeonly,
    NumThreads,
    Struct,
    ForceHighp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    Symbol(Symbol),
    Keyword(Keyword),
    Identifier,
    Float,
    Half,
    SignedInteger,
    UnsignedInteger,
    EndOfTokens,
}

/// Longest symbols are three characters, lookups go from three down to one.
const SYMBOLS: phf::Map<&'static str, Symbol> = phf_map! {
    "<<=" => Symbol::LessLessEqual,
    ">>=" => Symbol::GreatGreatEqual,
    "<=" => Symbol::LessEqual,
    ">=" => Symbol::GreaterEqual,
    "==" => Symbol::EqualEqual,
    "!=" => Symbol::NotEqual,
    "<<" => Symbol::LessLess,
    ">>" => Symbol::GreatGreat,
    "||" => Symbol::LazyOr,
    "&&" => Symbol::LazyAnd,
    "+=" => Symbol::PlusEqual,
    "-=" => Symbol::MinusEqual,
    "*=" => Symbol::MulEqual,
    "/=" => Symbol::DivEqual,
    "++" => Symbol::PlusPlus,
    "--" => Symbol::MinusMinus,
    ";" => Symbol::Semicolon,
    "(" => Symbol::LeftParen,
    ")" => Symbol::RightParen,
    "{" => Symbol::LeftBrace,
    "}" => Symbol::RightBrace,
    "[" => Symbol::LeftBracket,
    "]" => Symbol::RightBracket,
    "<" => Symbol::Less,
    ">" => Symbol::Greater,
    "=" => Symbol::Equal,
    "." => Symbol::Point,
    "," => Symbol::Comma,
    "+" => Symbol::Plus,
    "-" => Symbol::Minus,
    "*" => Symbol::Mul,
    "/" => Symbol::Div,
    "%" => Symbol::Mod,
    "&" => Symbol::BitwiseAnd,
    "|" => Symbol::BitwiseOr,
    ":" => Symbol::Colon,
    "?" => Symbol::QuestionMark,
    "!" => Symbol::ExclamationMark,
};

const RESERVED_WORDS: phf::Map<&'static str, Keyword> = phf_map! {
    "uniform" => Keyword::Uniform,
    "in" => Keyword::In,
    "out" => Keyword::Out,
    "inout" => Keyword::Inout,
    "const" => Keyword::Const,
    "true" => Keyword::True,
    "false" => Keyword::False,
    "if" => Keyword::If,
    "else" => Keyword::Else,
    "for" => Keyword::For,
    "continue" => Keyword::Continue,
    "break" => Keyword::Break,
    "return" => Keyword::Return,
    "discard" => Keyword::Discard,
    "buffer" => Keyword::Buffer,
    "shared" => Keyword::Shared,
    "image2D" => Keyword::Image2D,
    "readonly" => Keyword::Readonly,
    "writeonly" => Keyword::Writeonly,
    "numthreads" => Keyword::NumThreads,
    "struct" => Keyword::Struct,
    "force_highp" => Keyword::ForceHighp,
};

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub line: u32,
    pub column: u32,
    pub str_value: String,
    pub int_value: u64,
    pub float_value: f64,
}
impl Token {
    fn new(kind: TokenKind, line: u32, column: u32, str_value: impl Into<String>) -> Self {
        Self {
            kind,
            line,
            column,
            str_value: str_value.into(),
            int_value: 0,
            float_value: 0.0,
        }
    }

    pub fn is_symbol(&self, s: Symbol) -> bool {
        self.kind == TokenKind::Symbol(s)
    }

    pub fn is_keyword(&self, k: Keyword) -> bool {
        self.kind == TokenKind::Keyword(k)
    }
}

fn identifier(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        satisfy(|c| c.is_ascii_alphabetic() || c == '_'),
        take_while(|c: char| c.is_ascii_alphanumeric() || c == '_'),
    ))(input)
}

/// `digits.digits` with an optional half suffix
fn float_literal(input: &str) -> IResult<&str, (&str, Option<char>)> {
    pair(recognize(tuple((digit1, char('.'), digit1))), opt(char('h')))(input)
}

/// (is_hexadecimal, digits, unsigned suffix)
fn integer_literal(input: &str) -> IResult<&str, (bool, &str, Option<char>)> {
    let (input, hex_prefix) = opt(alt((tag("0x"), tag("0X"))))(input)?;
    let (input, digits) = match hex_prefix {
        Some(_) => hex_digit1(input)?,
        None => digit1(input)?,
    };
    let (input, suffix) = opt(one_of("uU"))(input)?;
    Ok((input, (hex_prefix.is_some(), digits, suffix)))
}

#[derive(Debug, Default)]
pub struct Tokenizer {
    tokens: Vec<Token>,
    diagnostics: Vec<Diagnostic>,
    line: u32,
    column: u32,
}

impl Tokenizer {
    pub fn new() -> Self {
        Self {
            tokens: vec![],
            diagnostics: vec![],
            line: 1,
            column: 1,
        }
    }

    /// Splits `source` into tokens. Returns false on the first character that can't start a token,
    /// in which case a diagnostic is recorded. The token list is always terminated.
    pub fn tokenize(&mut self, source: &str) -> bool {
        self.tokens.clear();
        self.line = 1;
        self.column = 1;

        let mut rest = source;
        let mut success = true;
        while !rest.is_empty() {
            match self.scan(rest) {
                Some(consumed) => rest = &rest[consumed..],
                None => {
                    self.diagnostics.push(Diagnostic::error(
                        Phase::Tokenizer,
                        self.line,
                        self.column,
                        format!("tokenization fail at {}:{}", self.line, self.column),
                    ));
                    success = false;
                    break;
                }
            }
        }

        self.tokens.push(Token::new(
            TokenKind::EndOfTokens,
            self.line,
            self.column,
            "",
        ));
        trace!("tokenized {} tokens", self.tokens.len());
        success
    }

    /// Scans one whitespace character or token. Returns the number of bytes consumed.
    fn scan(&mut self, rest: &str) -> Option<usize> {
        if let Some(n) = self.scan_whitespace(rest) {
            return Some(n);
        }
        if let Some(n) = self.scan_symbol(rest) {
            return Some(n);
        }
        if let Ok((_, ident)) = identifier(rest) {
            let kind = match RESERVED_WORDS.get(ident) {
                Some(k) => TokenKind::Keyword(*k),
                None => TokenKind::Identifier,
            };
            self.push(Token::new(kind, self.line, self.column, ident), ident.len());
            return Some(ident.len());
        }
        // An integer is a valid prefix of a float, floats go first
        if let Ok((remaining, (text, half))) = float_literal(rest) {
            let mut t = Token::new(TokenKind::Float, self.line, self.column, text);
            t.float_value = text.parse().unwrap_or_default();
            if half.is_some() {
                t.kind = TokenKind::Half;
                t.str_value.push('h');
            }
            let consumed = rest.len() - remaining.len();
            self.push(t, consumed);
            return Some(consumed);
        }
        if let Ok((remaining, (hex, digits, suffix))) = integer_literal(rest) {
            let value = u64::from_str_radix(digits, if hex { 16 } else { 10 }).ok()?;
            let mut text = digits.to_string();
            let kind = if suffix.is_some() {
                text.push('u');
                TokenKind::UnsignedInteger
            } else {
                TokenKind::SignedInteger
            };
            if hex {
                text = format!("0x{}", text);
            }
            if kind == TokenKind::SignedInteger && value > i32::MAX as u64 {
                self.diagnostics.push(Diagnostic::warning(
                    Phase::Tokenizer,
                    self.line,
                    self.column,
                    format!(
                        "too large signed integer literal: ({}) at {}:{}. May cause compile error.",
                        text, self.line, self.column
                    ),
                ));
            }
            let mut t = Token::new(kind, self.line, self.column, text);
            t.int_value = value;
            let consumed = rest.len() - remaining.len();
            self.push(t, consumed);
            return Some(consumed);
        }
        None
    }

    fn scan_whitespace(&mut self, rest: &str) -> Option<usize> {
        match rest.as_bytes().first()? {
            b'\n' => {
                self.line += 1;
                self.column = 1;
            }
            b'\t' | b' ' => self.column += 1,
            b'\r' => {}
            _ => return None,
        }
        Some(1)
    }

    fn scan_symbol(&mut self, rest: &str) -> Option<usize> {
        for len in (1..=3).rev() {
            if rest.len() < len || !rest.is_char_boundary(len) {
                continue;
            }
            if let Some(sym) = SYMBOLS.get(&rest[..len]) {
                let t = Token::new(TokenKind::Symbol(*sym), self.line, self.column, &rest[..len]);
                self.push(t, len);
                return Some(len);
            }
        }
        None
    }

    fn push(&mut self, t: Token, len: usize) {
        self.tokens.push(t);
        self.column += len as u32;
    }

    pub fn tokens(&self) -> &[Token] {
        &self.tokens
    }

    pub fn into_tokens(self) -> Vec<Token> {
        self.tokens
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    pub fn take_diagnostics(&mut self) -> Vec<Diagnostic> {
        std::mem::take(&mut self.diagnostics)
    }

    /// One line per token: position, kind and source text.
    pub fn debug_dump(&self) -> String {
        let mut s = String::new();
        for t in &self.tokens {
            // Writing into a String can't fail
            let _ = writeln!(s, "{}:{} {:?} '{}'", t.line, t.column, t.kind, t.str_value);
        }
        s
    }
}
