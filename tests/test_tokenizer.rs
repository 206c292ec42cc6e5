use ksl_compiler::error::Severity;
use ksl_compiler::tokenizer::{Keyword, Symbol, TokenKind, Tokenizer};

fn kinds(source: &str) -> Vec<TokenKind> {
    let mut t = Tokenizer::new();
    assert!(t.tokenize(source));
    t.tokens().iter().map(|t| t.kind).collect()
}

#[test]
fn test_symbols_longest_first() {
    assert_eq!(
        kinds("a <<= b >= c<d"),
        vec![
            TokenKind::Identifier,
            TokenKind::Symbol(Symbol::LessLessEqual),
            TokenKind::Identifier,
            TokenKind::Symbol(Symbol::GreaterEqual),
            TokenKind::Identifier,
            TokenKind::Symbol(Symbol::Less),
            TokenKind::Identifier,
            TokenKind::EndOfTokens,
        ]
    );
}

#[test]
fn test_keywords_and_identifiers() {
    assert_eq!(
        kinds("uniform uniforms force_highp"),
        vec![
            TokenKind::Keyword(Keyword::Uniform),
            TokenKind::Identifier,
            TokenKind::Keyword(Keyword::ForceHighp),
            TokenKind::EndOfTokens,
        ]
    );
}

#[test]
fn test_literals() {
    let mut t = Tokenizer::new();
    assert!(t.tokenize("1.5 2.0h 0x1F 7u 3"));
    let tokens = t.tokens();

    assert_eq!(tokens[0].kind, TokenKind::Float);
    assert_eq!(tokens[0].float_value, 1.5);
    assert_eq!(tokens[1].kind, TokenKind::Half);
    assert_eq!(tokens[1].str_value, "2.0h");
    assert_eq!(tokens[2].kind, TokenKind::SignedInteger);
    assert_eq!(tokens[2].int_value, 31);
    assert_eq!(tokens[3].kind, TokenKind::UnsignedInteger);
    assert_eq!(tokens[3].int_value, 7);
    assert_eq!(tokens[4].kind, TokenKind::SignedInteger);
    assert_eq!(tokens[5].kind, TokenKind::EndOfTokens);
}

#[test]
fn test_positions() {
    let mut t = Tokenizer::new();
    assert!(t.tokenize("a\n  bb = 1;"));
    let tokens = t.tokens();
    assert_eq!((tokens[0].line, tokens[0].column), (1, 1));
    assert_eq!((tokens[1].line, tokens[1].column), (2, 3));
    assert_eq!((tokens[2].line, tokens[2].column), (2, 6));
    assert_eq!((tokens[3].line, tokens[3].column), (2, 8));
}

#[test]
fn test_large_signed_literal_warns() {
    let mut t = Tokenizer::new();
    assert!(t.tokenize("x = 3000000000;"));
    let d = t.diagnostics();
    assert_eq!(d.len(), 1);
    assert_eq!(d[0].severity, Severity::Warning);
    assert_eq!(
        d[0].message,
        "too large signed integer literal: (3000000000) at 1:5. May cause compile error."
    );

    let mut t = Tokenizer::new();
    assert!(t.tokenize("x = 3000000000u;"));
    assert!(t.diagnostics().is_empty());
}

#[test]
fn test_invalid_character() {
    let mut t = Tokenizer::new();
    assert!(!t.tokenize("a = b @ c;"));
    assert_eq!(t.diagnostics()[0].message, "tokenization fail at 1:7");
    assert_eq!(t.tokens().last().map(|t| t.kind), Some(TokenKind::EndOfTokens));
}

#[test]
fn test_debug_dump() {
    let mut t = Tokenizer::new();
    assert!(t.tokenize("x;"));
    let dump = t.debug_dump();
    let lines: Vec<&str> = dump.lines().collect();
    assert_eq!(lines[0], "1:1 Identifier 'x'");
    assert_eq!(lines[1], "1:2 Symbol(Semicolon) ';'");
    assert_eq!(lines.len(), 3);
}
