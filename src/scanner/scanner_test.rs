// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Tests for the hand-written scanner.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use super::*;

fn kinds(source: &str) -> Vec<TokenKind> {
    let mut scanner = Scanner::new(source);
    let mut out = Vec::new();
    loop {
        let tok = scanner.scan_token();
        if tok.kind == TokenKind::Eof {
            break;
        }
        out.push(tok.kind);
    }
    out
}

#[test]
fn scans_punctuation_and_operators() {
    assert_eq!(
        kinds("(){}[]:,.-+;/*!=====<=>="),
        vec![
            TokenKind::LeftParen,
            TokenKind::RightParen,
            TokenKind::LeftBrace,
            TokenKind::RightBrace,
            TokenKind::LeftBracket,
            TokenKind::RightBracket,
            TokenKind::Colon,
            TokenKind::Comma,
            TokenKind::Dot,
            TokenKind::Minus,
            TokenKind::Plus,
            TokenKind::Semicolon,
            TokenKind::Slash,
            TokenKind::Star,
            TokenKind::BangEqual,
            TokenKind::EqualEqual,
            TokenKind::Equal,
            TokenKind::LessEqual,
            TokenKind::GreaterEqual,
        ]
    );
}

#[test]
fn scans_every_keyword() {
    let source = "and break class continue else false for fun if nil or perm print return super this true var while";
    assert_eq!(
        kinds(source),
        vec![
            TokenKind::And,
            TokenKind::Break,
            TokenKind::Class,
            TokenKind::Continue,
            TokenKind::Else,
            TokenKind::False,
            TokenKind::For,
            TokenKind::Fun,
            TokenKind::If,
            TokenKind::Nil,
            TokenKind::Or,
            TokenKind::Perm,
            TokenKind::Print,
            TokenKind::Return,
            TokenKind::Super,
            TokenKind::This,
            TokenKind::True,
            TokenKind::Var,
            TokenKind::While,
        ]
    );
}

#[test]
fn identifiers_that_share_a_keyword_prefix_are_not_keywords() {
    assert_eq!(kinds("classy printer variable"), vec![TokenKind::Identifier; 3]);
}

#[test]
fn numbers_with_and_without_fractions() {
    let mut scanner = Scanner::new("42 3.14 5.");
    let first = scanner.scan_token();
    assert_eq!(first.kind, TokenKind::Number);
    assert_eq!(first.lexeme, "42");
    let second = scanner.scan_token();
    assert_eq!(second.lexeme, "3.14");
    // a trailing dot with no following digit is not part of the number
    let third = scanner.scan_token();
    assert_eq!(third.lexeme, "5");
    assert_eq!(scanner.scan_token().kind, TokenKind::Dot);
}

#[test]
fn strings_track_embedded_newlines_for_line_numbers() {
    let mut scanner = Scanner::new("\"a\nb\" true");
    let s = scanner.scan_token();
    assert_eq!(s.kind, TokenKind::String);
    assert_eq!(s.lexeme, "\"a\nb\"");
    let t = scanner.scan_token();
    assert_eq!(t.line, 2);
}

#[test]
fn unterminated_string_is_an_error_token() {
    let mut scanner = Scanner::new("\"never closes");
    let tok = scanner.scan_token();
    assert_eq!(tok.kind, TokenKind::Error);
    assert_eq!(tok.lexeme, "Unterminated string.");
}

#[test]
fn line_comments_are_skipped() {
    assert_eq!(kinds("1 // a comment\n2"), vec![TokenKind::Number, TokenKind::Number]);
}

#[test]
fn unexpected_character_is_an_error_token() {
    let mut scanner = Scanner::new("@");
    let tok = scanner.scan_token();
    assert_eq!(tok.kind, TokenKind::Error);
}

#[test]
fn scan_token_is_idempotent_at_eof() {
    let mut scanner = Scanner::new("");
    assert_eq!(scanner.scan_token().kind, TokenKind::Eof);
    assert_eq!(scanner.scan_token().kind, TokenKind::Eof);
}
