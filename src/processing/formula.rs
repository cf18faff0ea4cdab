//! Sandboxed arithmetic for Spectral Math.
//!
//! Grammar:
//! ```text
//! expr    := term (('+' | '-') term)*
//! term    := unary (('*' | '/') unary)*
//! unary   := ('-' | '+') unary | primary
//! primary := number | name | '[' label ']' | '#' index | '(' expr ')'
//! ```
//! `name` is a label in identifier form, `[label]` accepts any label text
//! (e.g. `[1300-1400]`, `[D/G]`), and `#n` is the n-th (1-based) range or
//! peak of the formula's scope. Nothing else can be evaluated.

use std::fmt;

use thiserror::Error;

use super::cell::{CellError, CellValue};

/// Syntax errors, reported before any spectrum is processed.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FormulaError {
    #[error("expression is empty")]
    Empty,

    #[error("unexpected character '{ch}' at position {pos}")]
    UnexpectedChar { pos: usize, ch: char },

    #[error("invalid number '{0}'")]
    InvalidNumber(String),

    #[error("'[' at position {0} is never closed")]
    UnclosedBracket(usize),

    #[error("'#' at position {0} must be followed by an index starting at 1")]
    InvalidIndex(usize),

    #[error("unexpected {found} at position {pos}")]
    UnexpectedToken { pos: usize, found: String },

    #[error("expression ends unexpectedly")]
    UnexpectedEnd,
}

/// A variable reference inside a formula.
#[derive(Debug, Clone, PartialEq)]
pub enum VarRef {
    Label(String),
    /// 1-based index into the scope's ranges or peaks.
    Position(usize),
}

impl fmt::Display for VarRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VarRef::Label(l) if is_identifier(l) => write!(f, "{l}"),
            VarRef::Label(l) => write!(f, "[{l}]"),
            VarRef::Position(n) => write!(f, "#{n}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Var(VarRef),
    Neg(Box<Expr>),
    Binary {
        op: BinOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
}

/// Resolves variables while evaluating. `None` means the name is unknown.
pub trait Namespace {
    fn lookup(&self, var: &VarRef) -> Option<CellValue>;
}

/// `[A-Za-z_][A-Za-z0-9_]*`
pub fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

impl Expr {
    /// Parse a formula's source text.
    pub fn parse(src: &str) -> Result<Expr, FormulaError> {
        let tokens = tokenize(src)?;
        if tokens.is_empty() {
            return Err(FormulaError::Empty);
        }
        let mut parser = Parser { tokens, pos: 0 };
        let expr = parser.expr()?;
        match parser.tokens.get(parser.pos) {
            None => Ok(expr),
            Some((pos, tok)) => Err(FormulaError::UnexpectedToken {
                pos: *pos,
                found: tok.describe(),
            }),
        }
    }

    /// Evaluate against `ns`. Failures are per-cell errors, never panics.
    pub fn evaluate(&self, ns: &dyn Namespace) -> CellValue {
        let v = self.eval(ns)?;
        if v.is_finite() {
            Ok(v)
        } else {
            Err(CellError::NonFinite)
        }
    }

    fn eval(&self, ns: &dyn Namespace) -> CellValue {
        match self {
            Expr::Number(v) => Ok(*v),
            Expr::Var(var) => match ns.lookup(var) {
                None => Err(CellError::UnknownVariable(var.to_string())),
                Some(Ok(v)) => Ok(v),
                Some(Err(_)) => Err(CellError::InvalidOperand(var.to_string())),
            },
            Expr::Neg(inner) => Ok(-inner.eval(ns)?),
            Expr::Binary { op, lhs, rhs } => {
                let a = lhs.eval(ns)?;
                let b = rhs.eval(ns)?;
                match op {
                    BinOp::Add => Ok(a + b),
                    BinOp::Sub => Ok(a - b),
                    BinOp::Mul => Ok(a * b),
                    BinOp::Div if b == 0.0 => Err(CellError::ZeroDenominator),
                    BinOp::Div => Ok(a / b),
                }
            }
        }
    }

    /// Every variable the expression references, in source order.
    pub fn variables(&self) -> Vec<&VarRef> {
        let mut out = Vec::new();
        self.collect_vars(&mut out);
        out
    }

    fn collect_vars<'a>(&'a self, out: &mut Vec<&'a VarRef>) {
        match self {
            Expr::Number(_) => {}
            Expr::Var(v) => out.push(v),
            Expr::Neg(inner) => inner.collect_vars(out),
            Expr::Binary { lhs, rhs, .. } => {
                lhs.collect_vars(out);
                rhs.collect_vars(out);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Lexer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Name(String),
    Bracketed(String),
    Index(usize),
    Plus,
    Minus,
    Star,
    Slash,
    LParen,
    RParen,
}

impl Token {
    fn describe(&self) -> String {
        match self {
            Token::Number(v) => format!("number {v}"),
            Token::Name(n) => format!("name '{n}'"),
            Token::Bracketed(l) => format!("label [{l}]"),
            Token::Index(i) => format!("index #{i}"),
            Token::Plus => "'+'".into(),
            Token::Minus => "'-'".into(),
            Token::Star => "'*'".into(),
            Token::Slash => "'/'".into(),
            Token::LParen => "'('".into(),
            Token::RParen => "')'".into(),
        }
    }
}

fn tokenize(src: &str) -> Result<Vec<(usize, Token)>, FormulaError> {
    let chars: Vec<char> = src.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let start = i;
        let token = match c {
            c if c.is_whitespace() => {
                i += 1;
                continue;
            }
            '+' => Token::Plus,
            '-' => Token::Minus,
            '*' => Token::Star,
            '/' => Token::Slash,
            '(' => Token::LParen,
            ')' => Token::RParen,
            '[' => {
                let close = chars[i..]
                    .iter()
                    .position(|&ch| ch == ']')
                    .ok_or(FormulaError::UnclosedBracket(start))?;
                let label: String = chars[i + 1..i + close].iter().collect();
                i += close;
                Token::Bracketed(label.trim().to_string())
            }
            '#' => {
                let digits: String = chars[i + 1..]
                    .iter()
                    .take_while(|ch| ch.is_ascii_digit())
                    .collect();
                let index = digits
                    .parse::<usize>()
                    .ok()
                    .filter(|&n| n >= 1)
                    .ok_or(FormulaError::InvalidIndex(start))?;
                i += digits.len();
                Token::Index(index)
            }
            c if c.is_ascii_digit() || c == '.' => {
                i = scan_number(&chars, i);
                let text: String = chars[start..i].iter().collect();
                let value = text
                    .parse::<f64>()
                    .map_err(|_| FormulaError::InvalidNumber(text.clone()))?;
                tokens.push((start, Token::Number(value)));
                continue;
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                tokens.push((start, Token::Name(chars[start..i].iter().collect())));
                continue;
            }
            other => return Err(FormulaError::UnexpectedChar { pos: start, ch: other }),
        };
        tokens.push((start, token));
        i += 1;
    }
    Ok(tokens)
}

/// Returns the index one past the numeric literal starting at `i`.
fn scan_number(chars: &[char], mut i: usize) -> usize {
    while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
        i += 1;
    }
    if i < chars.len() && (chars[i] == 'e' || chars[i] == 'E') {
        let mut j = i + 1;
        if j < chars.len() && (chars[j] == '+' || chars[j] == '-') {
            j += 1;
        }
        if j < chars.len() && chars[j].is_ascii_digit() {
            while j < chars.len() && chars[j].is_ascii_digit() {
                j += 1;
            }
            return j;
        }
    }
    i
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

struct Parser {
    tokens: Vec<(usize, Token)>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(_, t)| t)
    }

    fn next(&mut self) -> Result<(usize, Token), FormulaError> {
        let tok = self
            .tokens
            .get(self.pos)
            .cloned()
            .ok_or(FormulaError::UnexpectedEnd)?;
        self.pos += 1;
        Ok(tok)
    }

    fn expr(&mut self) -> Result<Expr, FormulaError> {
        let mut lhs = self.term()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinOp::Add,
                Some(Token::Minus) => BinOp::Sub,
                _ => return Ok(lhs),
            };
            self.pos += 1;
            let rhs = self.term()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
    }

    fn term(&mut self) -> Result<Expr, FormulaError> {
        let mut lhs = self.unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinOp::Mul,
                Some(Token::Slash) => BinOp::Div,
                _ => return Ok(lhs),
            };
            self.pos += 1;
            let rhs = self.unary()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
    }

    fn unary(&mut self) -> Result<Expr, FormulaError> {
        match self.peek() {
            Some(Token::Minus) => {
                self.pos += 1;
                Ok(Expr::Neg(Box::new(self.unary()?)))
            }
            Some(Token::Plus) => {
                self.pos += 1;
                self.unary()
            }
            _ => self.primary(),
        }
    }

    fn primary(&mut self) -> Result<Expr, FormulaError> {
        let (pos, tok) = self.next()?;
        match tok {
            Token::Number(v) => Ok(Expr::Number(v)),
            Token::Name(n) | Token::Bracketed(n) => Ok(Expr::Var(VarRef::Label(n))),
            Token::Index(i) => Ok(Expr::Var(VarRef::Position(i))),
            Token::LParen => {
                let inner = self.expr()?;
                match self.next()? {
                    (_, Token::RParen) => Ok(inner),
                    (pos, other) => Err(FormulaError::UnexpectedToken {
                        pos,
                        found: other.describe(),
                    }),
                }
            }
            other => Err(FormulaError::UnexpectedToken {
                pos,
                found: other.describe(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct Vars(HashMap<String, CellValue>, Vec<CellValue>);

    impl Namespace for Vars {
        fn lookup(&self, var: &VarRef) -> Option<CellValue> {
            match var {
                VarRef::Label(l) => self.0.get(l).cloned(),
                VarRef::Position(n) => self.1.get(n - 1).cloned(),
            }
        }
    }

    fn vars() -> Vars {
        let mut map = HashMap::new();
        map.insert("D".to_string(), Ok(6.0));
        map.insert("G".to_string(), Ok(3.0));
        map.insert("1300-1400".to_string(), Ok(6.0));
        map.insert("zero".to_string(), Ok(0.0));
        map.insert("broken".to_string(), Err(CellError::OutOfDomain));
        Vars(map, vec![Ok(6.0), Ok(3.0)])
    }

    fn eval(src: &str) -> CellValue {
        Expr::parse(src).unwrap().evaluate(&vars())
    }

    #[test]
    fn test_precedence_and_parentheses() {
        assert_eq!(eval("1 + 2 * 3"), Ok(7.0));
        assert_eq!(eval("(1 + 2) * 3"), Ok(9.0));
        assert_eq!(eval("8 / 2 / 2"), Ok(2.0));
        assert_eq!(eval("-2 * -3"), Ok(6.0));
        assert_eq!(eval("1.5e1 - 5"), Ok(10.0));
    }

    #[test]
    fn test_variable_forms() {
        assert_eq!(eval("D / G"), Ok(2.0));
        assert_eq!(eval("[1300-1400] / G"), Ok(2.0));
        assert_eq!(eval("#1 / (#1 + #2)"), Ok(6.0 / 9.0));
    }

    #[test]
    fn test_evaluation_errors_are_cells() {
        assert_eq!(eval("D / zero"), Err(CellError::ZeroDenominator));
        assert_eq!(eval("D / (G - 3)"), Err(CellError::ZeroDenominator));
        assert_eq!(eval("missing + 1"), Err(CellError::UnknownVariable("missing".into())));
        assert_eq!(eval("#3"), Err(CellError::UnknownVariable("#3".into())));
        assert_eq!(eval("broken * 2"), Err(CellError::InvalidOperand("broken".into())));
        assert_eq!(eval("1e308 * 10"), Err(CellError::NonFinite));
    }

    #[test]
    fn test_syntax_errors() {
        assert_eq!(Expr::parse("   "), Err(FormulaError::Empty));
        assert_eq!(Expr::parse("1 +"), Err(FormulaError::UnexpectedEnd));
        assert!(matches!(Expr::parse("(1 + 2"), Err(FormulaError::UnexpectedEnd)));
        assert!(matches!(
            Expr::parse("D G"),
            Err(FormulaError::UnexpectedToken { pos: 2, .. })
        ));
        assert_eq!(
            Expr::parse("2 ^ 3"),
            Err(FormulaError::UnexpectedChar { pos: 2, ch: '^' })
        );
        assert_eq!(Expr::parse("[D"), Err(FormulaError::UnclosedBracket(0)));
        assert_eq!(Expr::parse("#0"), Err(FormulaError::InvalidIndex(0)));
        assert!(matches!(Expr::parse("1.2.3"), Err(FormulaError::InvalidNumber(_))));
        assert_eq!(
            Expr::parse("__import__('os')"),
            Err(FormulaError::UnexpectedChar { pos: 11, ch: '\'' })
        );
    }

    #[test]
    fn test_variables_listed_in_order() {
        let expr = Expr::parse("D / [G] + #2").unwrap();
        let names: Vec<String> = expr.variables().iter().map(|v| v.to_string()).collect();
        assert_eq!(names, vec!["D", "G", "#2"]);
    }
}
