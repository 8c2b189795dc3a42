//! Sandboxed arithmetic for computed fee formulas.
//!
//! Grammar: numbers, identifiers, unary `+`/`-`, binary `+ - * /` and
//! parentheses. Identifiers are resolved through a caller-supplied lookup
//! at evaluation time; no text is ever substituted or executed.

use crate::error::FormulaError;
use std::iter::Peekable;
use std::str::Chars;

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Ident(String),
    Neg(Box<Expr>),
    Binary {
        op:  BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Number(f64),
    Plus,
    Minus,
    Star,
    Slash,
    LParen,
    RParen,
    Eof,
}

struct Lexer<'a> {
    source: &'a str,
    chars:  Peekable<Chars<'a>>,
}

impl<'a> Lexer<'a> {
    fn new(source: &'a str) -> Self {
        Self { source, chars: source.chars().peekable() }
    }

    fn invalid(&self, reason: String) -> FormulaError {
        FormulaError::InvalidExpression { expr: self.source.to_string(), reason }
    }

    fn next_token(&mut self) -> Result<Token, FormulaError> {
        while matches!(self.chars.peek(), Some(c) if c.is_ascii_whitespace()) {
            self.chars.next();
        }
        let Some(&ch) = self.chars.peek() else {
            return Ok(Token::Eof);
        };
        let single = match ch {
            '+' => Some(Token::Plus),
            '-' => Some(Token::Minus),
            '*' => Some(Token::Star),
            '/' => Some(Token::Slash),
            '(' => Some(Token::LParen),
            ')' => Some(Token::RParen),
            _ => None,
        };
        if let Some(tok) = single {
            self.chars.next();
            return Ok(tok);
        }
        if ch.is_ascii_alphabetic() || ch == '_' {
            return Ok(Token::Ident(self.read_ident()));
        }
        if ch.is_ascii_digit() || ch == '.' {
            let raw = self.read_number();
            return raw
                .parse::<f64>()
                .map(Token::Number)
                .map_err(|_| self.invalid(format!("invalid number `{raw}`")));
        }
        Err(self.invalid(format!("unexpected character `{ch}`")))
    }

    fn read_ident(&mut self) -> String {
        let mut out = String::new();
        while let Some(&c) = self.chars.peek() {
            if c.is_ascii_alphanumeric() || c == '_' {
                out.push(c);
                self.chars.next();
            } else {
                break;
            }
        }
        out
    }

    fn read_number(&mut self) -> String {
        let mut out = String::new();
        let mut seen_dot = false;
        let mut seen_exp = false;
        while let Some(&c) = self.chars.peek() {
            if c.is_ascii_digit() {
                out.push(c);
            } else if c == '.' && !seen_dot && !seen_exp {
                seen_dot = true;
                out.push(c);
            } else if (c == 'e' || c == 'E') && !seen_exp {
                seen_exp = true;
                out.push(c);
                self.chars.next();
                if let Some(&sign) = self.chars.peek() {
                    if sign == '+' || sign == '-' {
                        out.push(sign);
                        self.chars.next();
                    }
                }
                continue;
            } else {
                break;
            }
            self.chars.next();
        }
        out
    }
}

struct Parser<'a> {
    lexer:     Lexer<'a>,
    lookahead: Option<Token>,
}

impl<'a> Parser<'a> {
    fn new(source: &'a str) -> Self {
        Self { lexer: Lexer::new(source), lookahead: None }
    }

    fn next_token(&mut self) -> Result<Token, FormulaError> {
        match self.lookahead.take() {
            Some(tok) => Ok(tok),
            None => self.lexer.next_token(),
        }
    }

    fn peek_token(&mut self) -> Result<Token, FormulaError> {
        if self.lookahead.is_none() {
            self.lookahead = Some(self.lexer.next_token()?);
        }
        Ok(self.lookahead.clone().unwrap_or(Token::Eof))
    }

    fn parse_add_sub(&mut self) -> Result<Expr, FormulaError> {
        let mut lhs = self.parse_mul_div()?;
        loop {
            let op = match self.peek_token()? {
                Token::Plus => BinaryOp::Add,
                Token::Minus => BinaryOp::Sub,
                _ => break,
            };
            self.next_token()?;
            let rhs = self.parse_mul_div()?;
            lhs = Expr::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs) };
        }
        Ok(lhs)
    }

    fn parse_mul_div(&mut self) -> Result<Expr, FormulaError> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match self.peek_token()? {
                Token::Star => BinaryOp::Mul,
                Token::Slash => BinaryOp::Div,
                _ => break,
            };
            self.next_token()?;
            let rhs = self.parse_unary()?;
            lhs = Expr::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs) };
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr, FormulaError> {
        match self.peek_token()? {
            Token::Plus => {
                self.next_token()?;
                self.parse_unary()
            }
            Token::Minus => {
                self.next_token()?;
                Ok(Expr::Neg(Box::new(self.parse_unary()?)))
            }
            _ => self.parse_primary(),
        }
    }

    fn parse_primary(&mut self) -> Result<Expr, FormulaError> {
        match self.next_token()? {
            Token::Number(n) => Ok(Expr::Number(n)),
            Token::Ident(name) => Ok(Expr::Ident(name)),
            Token::LParen => {
                let inner = self.parse_add_sub()?;
                match self.next_token()? {
                    Token::RParen => Ok(inner),
                    other => Err(self.lexer.invalid(format!("expected `)`, found {other:?}"))),
                }
            }
            other => Err(self.lexer.invalid(format!("unexpected token {other:?}"))),
        }
    }
}

/// A parsed formula together with its source text.
#[derive(Debug, Clone, PartialEq)]
pub struct Formula {
    source: String,
    expr:   Expr,
}

impl Formula {
    pub fn parse(source: &str) -> Result<Self, FormulaError> {
        let mut parser = Parser::new(source);
        if matches!(parser.peek_token()?, Token::Eof) {
            return Err(parser.lexer.invalid("empty formula".into()));
        }
        let expr = parser.parse_add_sub()?;
        match parser.next_token()? {
            Token::Eof => Ok(Self { source: source.to_string(), expr }),
            other => Err(parser.lexer.invalid(format!("unexpected trailing token {other:?}"))),
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Identifiers in order of first appearance, without duplicates.
    pub fn references(&self) -> Vec<String> {
        let mut out = Vec::new();
        collect_idents(&self.expr, &mut out);
        out
    }

    pub fn evaluate<F>(&self, lookup: F) -> Result<f64, FormulaError>
    where
        F: Fn(&str) -> Option<f64>,
    {
        let value = eval(&self.expr, &lookup)?;
        if value.is_finite() {
            Ok(value)
        } else {
            Err(FormulaError::NonFinite)
        }
    }
}

fn collect_idents(expr: &Expr, out: &mut Vec<String>) {
    match expr {
        Expr::Number(_) => {}
        Expr::Ident(name) => {
            if !out.iter().any(|n| n == name) {
                out.push(name.clone());
            }
        }
        Expr::Neg(inner) => collect_idents(inner, out),
        Expr::Binary { lhs, rhs, .. } => {
            collect_idents(lhs, out);
            collect_idents(rhs, out);
        }
    }
}

fn eval<F>(expr: &Expr, lookup: &F) -> Result<f64, FormulaError>
where
    F: Fn(&str) -> Option<f64>,
{
    match expr {
        Expr::Number(n) => Ok(*n),
        Expr::Ident(name) => {
            lookup(name).ok_or_else(|| FormulaError::UnresolvedReference { name: name.clone() })
        }
        Expr::Neg(inner) => Ok(-eval(inner, lookup)?),
        Expr::Binary { op, lhs, rhs } => {
            let a = eval(lhs, lookup)?;
            let b = eval(rhs, lookup)?;
            Ok(match op {
                BinaryOp::Add => a + b,
                BinaryOp::Sub => a - b,
                BinaryOp::Mul => a * b,
                BinaryOp::Div => a / b,
            })
        }
    }
}
