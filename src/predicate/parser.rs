//! Pratt parser over the token stream.
//!
//! Prefix parselets start an expression (a group, a field path, a literal);
//! infix parselets extend one with a binary operator. Binding powers, lowest
//! first: `||`, `&&`, `==`/`!=`, then `>` `>=` `<` `<=`. All binary
//! operators are left-associative.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::OnceLock;

use bigdecimal::BigDecimal;

use crate::error::PredicateError;
use crate::value::Value;

use super::lexer::{tokenize, unquote, Token, TokenKind};
use super::{ComparisonOp, Expression, LogicalOp};

const OR: u8 = 1;
const AND: u8 = 2;
const EQUALITY: u8 = 3;
const INEQUALITY: u8 = 4;

trait PrefixParselet: Send + Sync {
    fn parse(&self, parser: &mut Parser<'_>, token: Token) -> Result<Expression, PredicateError>;
}

trait InfixParselet: Send + Sync {
    fn parse(
        &self,
        parser: &mut Parser<'_>,
        lhs: Expression,
        token: Token,
    ) -> Result<Expression, PredicateError>;

    fn precedence(&self) -> u8;
}

struct GroupParselet;

impl PrefixParselet for GroupParselet {
    fn parse(&self, parser: &mut Parser<'_>, _token: Token) -> Result<Expression, PredicateError> {
        let inner = parser.parse_expression(0)?;
        parser.expect(TokenKind::RightParen, "expected ')'")?;
        Ok(inner)
    }
}

struct FieldPathParselet;

impl PrefixParselet for FieldPathParselet {
    fn parse(&self, _parser: &mut Parser<'_>, token: Token) -> Result<Expression, PredicateError> {
        Ok(Expression::FieldPath { name: token.text })
    }
}

struct ConstantParselet;

impl PrefixParselet for ConstantParselet {
    fn parse(&self, _parser: &mut Parser<'_>, token: Token) -> Result<Expression, PredicateError> {
        Ok(Expression::Constant {
            value: literal_value(&token.text)?,
        })
    }
}

fn literal_value(text: &str) -> Result<Value, PredicateError> {
    match text {
        "true" => return Ok(Value::Bool(true)),
        "false" => return Ok(Value::Bool(false)),
        "null" | "NULL" => return Ok(Value::Null),
        _ => {}
    }
    if text.starts_with('"') || text.starts_with('\'') {
        return Ok(Value::String(unquote(text)));
    }
    if !text.contains('.') {
        if let Ok(v) = text.parse::<i64>() {
            return Ok(Value::Int(v));
        }
    }
    BigDecimal::from_str(text)
        .map(Value::Decimal)
        .map_err(|_| PredicateError::syntax("invalid numeric literal", text))
}

enum BinaryOp {
    Comparison(ComparisonOp),
    Logical(LogicalOp),
}

struct BinaryParselet {
    op: BinaryOp,
    precedence: u8,
}

impl InfixParselet for BinaryParselet {
    fn parse(
        &self,
        parser: &mut Parser<'_>,
        lhs: Expression,
        _token: Token,
    ) -> Result<Expression, PredicateError> {
        let rhs = parser.parse_expression(self.precedence)?;
        Ok(match self.op {
            BinaryOp::Comparison(op) => lhs.compare(op, rhs),
            BinaryOp::Logical(LogicalOp::And) => lhs.and(rhs),
            BinaryOp::Logical(LogicalOp::Or) => lhs.or(rhs),
        })
    }

    fn precedence(&self) -> u8 {
        self.precedence
    }
}

struct Grammar {
    prefix: HashMap<TokenKind, Box<dyn PrefixParselet>>,
    infix: HashMap<TokenKind, Box<dyn InfixParselet>>,
}

impl Grammar {
    fn new() -> Self {
        let mut grammar = Self {
            prefix: HashMap::new(),
            infix: HashMap::new(),
        };

        grammar.prefix.insert(TokenKind::LeftParen, Box::new(GroupParselet));
        grammar.prefix.insert(TokenKind::Identifier, Box::new(FieldPathParselet));
        grammar.prefix.insert(TokenKind::Constant, Box::new(ConstantParselet));

        grammar.binary(TokenKind::Or, BinaryOp::Logical(LogicalOp::Or), OR);
        grammar.binary(TokenKind::And, BinaryOp::Logical(LogicalOp::And), AND);
        grammar.binary(TokenKind::Equal, BinaryOp::Comparison(ComparisonOp::Equal), EQUALITY);
        grammar.binary(TokenKind::NotEqual, BinaryOp::Comparison(ComparisonOp::NotEqual), EQUALITY);
        grammar.binary(TokenKind::Greater, BinaryOp::Comparison(ComparisonOp::Greater), INEQUALITY);
        grammar.binary(
            TokenKind::GreaterEqual,
            BinaryOp::Comparison(ComparisonOp::GreaterEqual),
            INEQUALITY,
        );
        grammar.binary(TokenKind::Less, BinaryOp::Comparison(ComparisonOp::Less), INEQUALITY);
        grammar.binary(
            TokenKind::LessEqual,
            BinaryOp::Comparison(ComparisonOp::LessEqual),
            INEQUALITY,
        );
        grammar
    }

    fn binary(&mut self, kind: TokenKind, op: BinaryOp, precedence: u8) {
        self.infix.insert(kind, Box::new(BinaryParselet { op, precedence }));
    }
}

fn grammar() -> &'static Grammar {
    static GRAMMAR: OnceLock<Grammar> = OnceLock::new();
    GRAMMAR.get_or_init(Grammar::new)
}

struct Parser<'g> {
    tokens: Vec<Token>,
    position: usize,
    grammar: &'g Grammar,
}

impl<'g> Parser<'g> {
    fn new(tokens: Vec<Token>, grammar: &'g Grammar) -> Self {
        Self {
            tokens,
            position: 0,
            grammar,
        }
    }

    fn peek(&self) -> TokenKind {
        self.tokens
            .get(self.position)
            .map_or(TokenKind::Eof, |t| t.kind)
    }

    fn consume(&mut self) -> Token {
        let token = self.tokens.get(self.position).cloned().unwrap_or(Token {
            kind: TokenKind::Eof,
            text: String::new(),
        });
        if self.position < self.tokens.len() {
            self.position += 1;
        }
        token
    }

    fn expect(&mut self, kind: TokenKind, message: &str) -> Result<Token, PredicateError> {
        let token = self.consume();
        if token.kind == kind {
            Ok(token)
        } else {
            Err(PredicateError::syntax(message, token.describe()))
        }
    }

    fn next_precedence(&self) -> u8 {
        self.grammar
            .infix
            .get(&self.peek())
            .map_or(0, |p| p.precedence())
    }

    fn parse_expression(&mut self, precedence: u8) -> Result<Expression, PredicateError> {
        let token = self.consume();
        let grammar = self.grammar;
        let prefix = grammar
            .prefix
            .get(&token.kind)
            .ok_or_else(|| PredicateError::syntax("unexpected token", token.describe()))?;
        let mut lhs = prefix.parse(self, token)?;

        while precedence < self.next_precedence() {
            let token = self.consume();
            let Some(infix) = grammar.infix.get(&token.kind) else {
                return Err(PredicateError::syntax("unexpected token", token.describe()));
            };
            lhs = infix.parse(self, lhs, token)?;
        }

        Ok(lhs)
    }
}

/// Parses predicate text into an expression tree.
///
/// ```text
/// expr    := orExpr
/// orExpr  := andExpr ("||" andExpr)*
/// andExpr := cmpExpr ("&&" cmpExpr)*
/// cmpExpr := primary (cmpOp primary)?
/// primary := "(" expr ")" | identifier | constant
/// ```
pub fn parse(input: &str) -> Result<Expression, PredicateError> {
    let tokens = tokenize(input)?;
    let mut parser = Parser::new(tokens, grammar());
    let expr = parser.parse_expression(0)?;
    parser.expect(TokenKind::Eof, "unexpected trailing input")?;
    Ok(expr)
}
