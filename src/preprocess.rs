//! Preprocessing of shader source before tokenization.
//!
//! The compiler only needs the [Preprocessor] trait; hosts with a full GLSL preprocessor plug it
//! in there. [SimplePreprocessor] covers what KSL shaders use in practice: comments, object-like
//! macros and conditional blocks. It never changes the number of lines, so diagnostics of later
//! phases still point at the right line.

use std::collections::BTreeMap;

use log::{trace, warn};
use nom::{
    branch::alt,
    bytes::complete::{tag, tag_no_case, take_while},
    character::complete::{char, digit1, hex_digit1, satisfy, space0, space1},
    combinator::{all_consuming, map, map_res, recognize, value},
    multi::fold_many0,
    sequence::{delimited, pair, preceded},
    IResult,
};

/// Turns raw shader text into the text the tokenizer sees.
pub trait Preprocessor {
    /// Returns the processed source, or the log explaining why it failed.
    fn preprocess(&self, source: &str) -> Result<String, String>;
}

/// Object-like `#define`/`#undef`, `#ifdef`/`#ifndef`/`#if`/`#elif`/`#else`/`#endif` and `#error`.
#[derive(Debug, Clone, Default)]
pub struct SimplePreprocessor {
    defines: BTreeMap<String, String>,
}

impl SimplePreprocessor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Predefines `name` as `value` for every run.
    pub fn define(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.defines.insert(name.into(), value.into());
        self
    }
}

impl Preprocessor for SimplePreprocessor {
    fn preprocess(&self, source: &str) -> Result<String, String> {
        let text = strip_comments(source);
        let mut state = State {
            defines: self.defines.clone(),
            conditions: vec![],
        };

        let mut out = Vec::new();
        for (i, line) in text.split('\n').enumerate() {
            let line_number = i + 1;
            match line.trim_start().strip_prefix('#') {
                Some(directive) => {
                    state
                        .directive(directive.trim(), line_number)
                        .map_err(|e| format!("{}: {}", line_number, e))?;
                    out.push(String::new());
                }
                None if state.is_active() => out.push(expand(line, &state.defines, &mut vec![])),
                None => out.push(String::new()),
            }
        }
        if let Some(c) = state.conditions.last() {
            return Err(format!("{}: unterminated conditional block", c.line));
        }
        Ok(out.join("\n"))
    }
}

#[derive(Debug)]
struct Condition {
    line: usize,
    parent_active: bool,
    /// Some branch of this block was already taken.
    taken: bool,
    active: bool,
    seen_else: bool,
}

struct State {
    defines: BTreeMap<String, String>,
    conditions: Vec<Condition>,
}

impl State {
    fn is_active(&self) -> bool {
        self.conditions.last().map_or(true, |c| c.active)
    }

    fn push_condition(&mut self, line: usize, holds: bool) {
        let parent_active = self.is_active();
        self.conditions.push(Condition {
            line,
            parent_active,
            taken: parent_active && holds,
            active: parent_active && holds,
            seen_else: false,
        });
    }

    fn directive(&mut self, directive: &str, line: usize) -> Result<(), String> {
        let (name, rest) = match directive.find(|c: char| c.is_whitespace()) {
            Some(at) => (&directive[..at], directive[at..].trim()),
            None => (directive, ""),
        };
        trace!("#{} {}", name, rest);

        match name {
            "ifdef" => {
                let holds = self.defines.contains_key(macro_name(rest)?);
                self.push_condition(line, holds);
            }
            "ifndef" => {
                let holds = !self.defines.contains_key(macro_name(rest)?);
                self.push_condition(line, holds);
            }
            "if" => {
                let holds = self.is_active() && self.evaluate(rest)?;
                self.push_condition(line, holds);
            }
            "elif" => {
                let evaluate = match self.conditions.last() {
                    None => return Err("#elif without #if".to_string()),
                    Some(c) if c.seen_else => return Err("#elif after #else".to_string()),
                    Some(c) => c.parent_active && !c.taken,
                };
                let holds = evaluate && self.evaluate(rest)?;
                if let Some(c) = self.conditions.last_mut() {
                    c.active = holds;
                    c.taken |= holds;
                }
            }
            "else" => {
                let Some(c) = self.conditions.last_mut() else {
                    return Err("#else without #if".to_string());
                };
                if c.seen_else {
                    return Err("#else after #else".to_string());
                }
                c.seen_else = true;
                c.active = c.parent_active && !c.taken;
                c.taken = true;
            }
            "endif" => {
                if self.conditions.pop().is_none() {
                    return Err("#endif without #if".to_string());
                }
            }
            _ if !self.is_active() => {}
            "define" => {
                let (name, value) = match rest.find(|c: char| c.is_whitespace()) {
                    Some(at) => (&rest[..at], rest[at..].trim()),
                    None => (rest, ""),
                };
                if name.contains('(') {
                    return Err(format!("function-like macro not supported: {}", name));
                }
                let name = macro_name(name)?;
                self.defines.insert(name.to_string(), value.to_string());
            }
            "undef" => {
                self.defines.remove(macro_name(rest)?);
            }
            "error" => return Err(format!("#error {}", rest)),
            _ => warn!("ignoring unknown directive #{} at line {}", name, line),
        }
        Ok(())
    }

    fn evaluate(&self, condition: &str) -> Result<bool, String> {
        let expanded = expand_condition(condition, &self.defines);
        let parsed = all_consuming(delimited(space0, or_expression, space0))(expanded.as_str())
            .map(|(_, v)| v != 0);
        parsed.map_err(|_| format!("invalid #if expression: {}", condition))
    }
}

fn macro_name(text: &str) -> Result<&str, String> {
    match all_consuming(identifier)(text.trim()) {
        Ok((_, name)) => Ok(name),
        Err(_) => Err(format!("invalid macro name: '{}'", text)),
    }
}

/// Replaces comments with whitespace, keeping every line break.
fn strip_comments(source: &str) -> String {
    let mut out = String::with_capacity(source.len());
    let mut chars = source.chars().peekable();
    while let Some(c) = chars.next() {
        match (c, chars.peek()) {
            ('/', Some('/')) => {
                while chars.peek().map_or(false, |c| *c != '\n') {
                    chars.next();
                }
            }
            ('/', Some('*')) => {
                chars.next();
                out.push(' ');
                let mut previous = '\0';
                for c in chars.by_ref() {
                    if previous == '*' && c == '/' {
                        break;
                    }
                    if c == '\n' {
                        out.push('\n');
                    }
                    previous = c;
                }
            }
            _ => out.push(c),
        }
    }
    out
}

/// Walks `text`, handing every identifier to `f` and copying everything else.
fn map_identifiers(text: &str, mut f: impl FnMut(&str, &str, &mut String) -> usize) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(c) = rest.chars().next() {
        if c.is_ascii_digit() {
            // Numbers with suffixes (1u, 2.0h) are not identifiers
            let end = rest
                .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_' || c == '.'))
                .unwrap_or(rest.len());
            out.push_str(&rest[..end]);
            rest = &rest[end..];
        } else if let Ok((after, ident)) = identifier(rest) {
            let consumed = f(ident, after, &mut out);
            rest = &after[consumed..];
        } else {
            out.push(c);
            rest = &rest[c.len_utf8()..];
        }
    }
    out
}

/// Substitutes macros in `line`. `expanding` holds the macros being substituted, which are not
/// expanded again inside their own value.
fn expand(line: &str, defines: &BTreeMap<String, String>, expanding: &mut Vec<String>) -> String {
    map_identifiers(line, |ident, _, out| {
        match defines.get(ident) {
            Some(v) if !expanding.iter().any(|e| e == ident) => {
                expanding.push(ident.to_string());
                out.push_str(&expand(v, defines, expanding));
                expanding.pop();
            }
            _ => out.push_str(ident),
        }
        0
    })
}

/// Resolves `defined(X)` and `defined X`, then substitutes macros. Unknown names stay and
/// evaluate to 0.
fn expand_condition(condition: &str, defines: &BTreeMap<String, String>) -> String {
    map_identifiers(condition, |ident, after, out| {
        if ident == "defined" {
            if let Ok((remaining, name)) = defined_operand(after) {
                out.push_str(if defines.contains_key(name) { "1" } else { "0" });
                return after.len() - remaining.len();
            }
        }
        match defines.get(ident) {
            Some(v) => out.push_str(&expand(v, defines, &mut vec![ident.to_string()])),
            None => out.push_str(ident),
        }
        0
    })
}

fn identifier(i: &str) -> IResult<&str, &str> {
    recognize(pair(
        satisfy(|c| c.is_ascii_alphabetic() || c == '_'),
        take_while(|c: char| c.is_ascii_alphanumeric() || c == '_'),
    ))(i)
}

fn defined_operand(i: &str) -> IResult<&str, &str> {
    alt((
        delimited(
            pair(space0, char('(')),
            delimited(space0, identifier, space0),
            char(')'),
        ),
        preceded(space1, identifier),
    ))(i)
}

fn integer(i: &str) -> IResult<&str, i64> {
    alt((
        map_res(preceded(tag_no_case("0x"), hex_digit1), |s| {
            i64::from_str_radix(s, 16)
        }),
        map_res(digit1, str::parse::<i64>),
    ))(i)
}

fn primary(i: &str) -> IResult<&str, i64> {
    delimited(
        space0,
        alt((
            integer,
            delimited(char('('), or_expression, char(')')),
            value(0, identifier),
        )),
        space0,
    )(i)
}

fn unary(i: &str) -> IResult<&str, i64> {
    alt((
        map(preceded(pair(space0, char('!')), unary), |v| (v == 0) as i64),
        primary,
    ))(i)
}

fn comparison(i: &str) -> IResult<&str, i64> {
    let (i, first) = unary(i)?;
    fold_many0(
        pair(
            alt((tag("=="), tag("!="), tag("<="), tag(">="), tag("<"), tag(">"))),
            unary,
        ),
        move || first,
        |acc, (op, v)| {
            let holds = match op {
                "==" => acc == v,
                "!=" => acc != v,
                "<=" => acc <= v,
                ">=" => acc >= v,
                "<" => acc < v,
                _ => acc > v,
            };
            holds as i64
        },
    )(i)
}

fn and_expression(i: &str) -> IResult<&str, i64> {
    let (i, first) = comparison(i)?;
    fold_many0(
        preceded(tag("&&"), comparison),
        move || first,
        |acc, v| (acc != 0 && v != 0) as i64,
    )(i)
}

fn or_expression(i: &str) -> IResult<&str, i64> {
    let (i, first) = and_expression(i)?;
    fold_many0(
        preceded(tag("||"), and_expression),
        move || first,
        |acc, v| (acc != 0 || v != 0) as i64,
    )(i)
}
