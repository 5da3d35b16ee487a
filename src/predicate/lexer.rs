//! Rule-based tokenizer for predicate text.
//!
//! Each rule is an anchored regular expression. At every position leading
//! whitespace is skipped and the rules are tried in registration order; the
//! first one that matches produces the token.

use std::sync::OnceLock;

use regex::Regex;

use crate::error::PredicateError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    LeftParen,
    RightParen,
    And,
    Or,
    Equal,
    NotEqual,
    GreaterEqual,
    LessEqual,
    Greater,
    Less,
    /// A string, number, boolean or null literal.
    Constant,
    Identifier,
    Eof,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
}

impl Token {
    fn eof() -> Self {
        Self {
            kind: TokenKind::Eof,
            text: String::new(),
        }
    }

    /// Text used when reporting this token in an error.
    pub(crate) fn describe(&self) -> &str {
        if self.kind == TokenKind::Eof {
            "end of input"
        } else {
            &self.text
        }
    }
}

struct Rule {
    pattern: Regex,
    kind: TokenKind,
}

const RULES: &[(&str, TokenKind)] = &[
    (r"^\(", TokenKind::LeftParen),
    (r"^\)", TokenKind::RightParen),
    (r"^&&", TokenKind::And),
    (r"^\|\|", TokenKind::Or),
    (r"^==", TokenKind::Equal),
    (r"^!=", TokenKind::NotEqual),
    (r"^>=", TokenKind::GreaterEqual),
    (r"^<=", TokenKind::LessEqual),
    (r"^>", TokenKind::Greater),
    (r"^<", TokenKind::Less),
    (r#"^"(?:[^"\\]|\\.)*""#, TokenKind::Constant),
    (r"^'(?:[^'\\]|\\.)*'", TokenKind::Constant),
    (r"^-?[0-9]+(?:\.[0-9]+)?\b", TokenKind::Constant),
    (r"^(?:true|false|null|NULL)\b", TokenKind::Constant),
    (r"^[A-Za-z_][A-Za-z0-9_]*", TokenKind::Identifier),
];

fn rules() -> Result<&'static [Rule], PredicateError> {
    static COMPILED: OnceLock<Result<Vec<Rule>, (String, &'static str)>> = OnceLock::new();
    COMPILED
        .get_or_init(|| {
            RULES
                .iter()
                .map(|(source, kind)| {
                    Regex::new(source)
                        .map(|pattern| Rule {
                            pattern,
                            kind: *kind,
                        })
                        .map_err(|e| (format!("token rule failed to compile: {e}"), *source))
                })
                .collect()
        })
        .as_deref()
        .map_err(|(message, source)| PredicateError::syntax(message.clone(), *source))
}

/// Splits `input` into tokens, always ending with [`TokenKind::Eof`].
pub fn tokenize(input: &str) -> Result<Vec<Token>, PredicateError> {
    let mut tokens = Vec::new();
    let mut rest = input.trim_start();

    while !rest.is_empty() {
        let matched = rules()?
            .iter()
            .find_map(|rule| rule.pattern.find(rest).map(|m| (rule.kind, m.end())));

        let Some((kind, end)) = matched else {
            let offending = rest.split_whitespace().next().unwrap_or(rest);
            return Err(PredicateError::syntax("unrecognized input", offending));
        };

        tokens.push(Token {
            kind,
            text: rest[..end].to_string(),
        });
        rest = rest[end..].trim_start();
    }

    tokens.push(Token::eof());
    Ok(tokens)
}

/// Strips the quotes from a string literal and resolves its escapes.
pub(crate) fn unquote(literal: &str) -> String {
    let inner = &literal[1..literal.len().saturating_sub(1).max(1)];
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('0') => out.push('\0'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}
