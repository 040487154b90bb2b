//! Infix integer expressions for `expr` and the loop/branch conditions.
//!
//! The text has already been through variable and command substitution by the
//! time it gets here; this module only tokenizes, parses and evaluates.
//!
//! Operator precedence (lowest → highest):
//!   ternary  →  `||`  →  `&&`  →  `|`  →  `^`  →  `&`  →  equality  →
//!   relational  →  shift  →  additive  →  multiplicative  →  unary  →  primary
//!
//! Operands are integers or strings (bare words, `"quoted"`, `{braced}`).
//! Arithmetic insists on integers; comparisons fall back to byte-wise string
//! comparison when either side is not an integer.

use std::cmp::Ordering;

use crate::error::Error;
use crate::text::parse_int;

// ── Value ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Int(i64),
    Str(Vec<u8>),
}

impl Value {
    pub fn as_int(&self) -> Result<i64, Error> {
        match self {
            Value::Int(n) => Ok(*n),
            Value::Str(s) => parse_int(s).ok_or_else(|| Error::not_a_number(s)),
        }
    }

    fn try_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            Value::Str(s) => parse_int(s),
        }
    }

    pub fn truthy(&self) -> Result<bool, Error> {
        Ok(self.as_int()? != 0)
    }

    /// Canonical text form.
    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            Value::Int(n) => n.to_string().into_bytes(),
            Value::Str(s) => s,
        }
    }

    fn cmp_value(&self, other: &Value) -> Ordering {
        match (self.try_int(), other.try_int()) {
            (Some(a), Some(b)) => a.cmp(&b),
            _ => self.clone().into_bytes().cmp(&other.clone().into_bytes()),
        }
    }
}

fn flag(b: bool) -> Value {
    Value::Int(b as i64)
}

// ── Tokens ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Int(i64),
    Str(Vec<u8>),
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Bang,
    Tilde,
    Ampersand,
    Pipe,
    Caret,
    ShiftLeft,
    ShiftRight,
    Eq,
    Ne,
    StrEq,
    StrNe,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    Question,
    Colon,
    LParen,
    RParen,
    Eof,
}

struct Tokenizer<'a> {
    src: &'a [u8],
    pos: usize,
}

impl<'a> Tokenizer<'a> {
    fn peek(&self) -> Option<u8> {
        self.src.get(self.pos).copied()
    }

    fn eat(&mut self, ch: u8) -> bool {
        if self.peek() == Some(ch) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn read_number(&mut self) -> Result<Token, Error> {
        let start = self.pos;
        if self.src[self.pos..].starts_with(b"0x") || self.src[self.pos..].starts_with(b"0X") {
            self.pos += 2;
            let digits = self.pos;
            while matches!(self.peek(), Some(c) if c.is_ascii_hexdigit()) {
                self.pos += 1;
            }
            let hex = std::str::from_utf8(&self.src[digits..self.pos]).unwrap_or("");
            return i64::from_str_radix(hex, 16)
                .map(Token::Int)
                .map_err(|_| Error::not_a_number(&self.src[start..self.pos]));
        }
        while matches!(self.peek(), Some(c) if c.is_ascii_alphanumeric()) {
            self.pos += 1;
        }
        let word = &self.src[start..self.pos];
        parse_int(word).map(Token::Int).ok_or_else(|| Error::not_a_number(word))
    }

    fn read_quoted(&mut self) -> Result<Token, Error> {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c == b'"' {
                let s = self.src[start..self.pos].to_vec();
                self.pos += 1;
                return Ok(Token::Str(s));
            }
            self.pos += 1;
        }
        Err(Error::script("missing close-quote in expression"))
    }

    fn read_braced(&mut self) -> Result<Token, Error> {
        let start = self.pos;
        let mut level = 1usize;
        while let Some(c) = self.peek() {
            match c {
                b'{' => level += 1,
                b'}' => {
                    level -= 1;
                    if level == 0 {
                        let s = self.src[start..self.pos].to_vec();
                        self.pos += 1;
                        return Ok(Token::Str(s));
                    }
                }
                _ => {}
            }
            self.pos += 1;
        }
        Err(Error::script("missing close-brace in expression"))
    }

    fn read_word(&mut self) -> Token {
        let start = self.pos;
        while matches!(self.peek(), Some(c) if c.is_ascii_alphanumeric() || c == b'_' || c >= 0x80)
        {
            self.pos += 1;
        }
        match &self.src[start..self.pos] {
            b"eq" => Token::StrEq,
            b"ne" => Token::StrNe,
            word => Token::Str(word.to_vec()),
        }
    }

    fn next_token(&mut self) -> Result<Token, Error> {
        while matches!(self.peek(), Some(b' ' | b'\t' | b'\n' | b'\r')) {
            self.pos += 1;
        }
        let Some(ch) = self.peek() else {
            return Ok(Token::Eof);
        };
        if ch.is_ascii_digit() {
            return self.read_number();
        }
        if ch.is_ascii_alphabetic() || ch == b'_' || ch >= 0x80 {
            return Ok(self.read_word());
        }
        self.pos += 1;
        Ok(match ch {
            b'"' => return self.read_quoted(),
            b'{' => return self.read_braced(),
            b'+' => Token::Plus,
            b'-' => Token::Minus,
            b'*' => Token::Star,
            b'/' => Token::Slash,
            b'%' => Token::Percent,
            b'~' => Token::Tilde,
            b'^' => Token::Caret,
            b'?' => Token::Question,
            b':' => Token::Colon,
            b'(' => Token::LParen,
            b')' => Token::RParen,
            b'!' if self.eat(b'=') => Token::Ne,
            b'!' => Token::Bang,
            b'&' if self.eat(b'&') => Token::And,
            b'&' => Token::Ampersand,
            b'|' if self.eat(b'|') => Token::Or,
            b'|' => Token::Pipe,
            b'<' if self.eat(b'<') => Token::ShiftLeft,
            b'<' if self.eat(b'=') => Token::Le,
            b'<' => Token::Lt,
            b'>' if self.eat(b'>') => Token::ShiftRight,
            b'>' if self.eat(b'=') => Token::Ge,
            b'>' => Token::Gt,
            b'=' if self.eat(b'=') => Token::Eq,
            c => {
                return Err(Error::script(format!(
                    "syntax error in expression: unexpected \"{}\"",
                    c.escape_ascii()
                )))
            }
        })
    }
}

fn tokenize(src: &[u8]) -> Result<Vec<Token>, Error> {
    let mut lx = Tokenizer { src, pos: 0 };
    let mut tokens = Vec::new();
    loop {
        let t = lx.next_token()?;
        let done = t == Token::Eof;
        tokens.push(t);
        if done {
            return Ok(tokens);
        }
    }
}

// ── AST ───────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Shl,
    Shr,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
    StrEq,
    StrNe,
    BitAnd,
    BitXor,
    BitOr,
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
    BitNot,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    Ternary(Box<Expr>, Box<Expr>, Box<Expr>),
}

// ── Parser ────────────────────────────────────────────────────────────────────

/// Deepest expression tree the parser builds.  Parsing and evaluation both
/// recurse over the tree, so this bounds their native stack use.
pub const MAX_NESTING: usize = 256;

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    /// Depth of the tree under construction, counting the left spine of
    /// operator chains.
    depth: usize,
}

impl Parser {
    fn enter(&mut self) -> Result<(), Error> {
        self.depth += 1;
        if self.depth > MAX_NESTING {
            return Err(Error::script("expression nested too deeply"));
        }
        Ok(())
    }

    fn peek(&self) -> &Token {
        self.tokens.get(self.pos).unwrap_or(&Token::Eof)
    }

    fn advance(&mut self) -> Token {
        let t = self.tokens.get(self.pos).cloned().unwrap_or(Token::Eof);
        self.pos += 1;
        t
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.peek() == expected {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn parse_ternary(&mut self) -> Result<Expr, Error> {
        self.enter()?;
        let expr = self.parse_ternary_inner();
        self.depth -= 1;
        expr
    }

    fn parse_ternary_inner(&mut self) -> Result<Expr, Error> {
        let cond = self.parse_binary(0)?;
        if !self.eat(&Token::Question) {
            return Ok(cond);
        }
        let then = self.parse_ternary()?;
        if !self.eat(&Token::Colon) {
            return Err(Error::script("expected ':' in ternary expression"));
        }
        let else_ = self.parse_ternary()?;
        Ok(Expr::Ternary(Box::new(cond), Box::new(then), Box::new(else_)))
    }

    /// Binary operator at the head of the input with its precedence level.
    fn binop(&self) -> Option<(BinOp, u8)> {
        Some(match self.peek() {
            Token::Or => (BinOp::Or, 0),
            Token::And => (BinOp::And, 1),
            Token::Pipe => (BinOp::BitOr, 2),
            Token::Caret => (BinOp::BitXor, 3),
            Token::Ampersand => (BinOp::BitAnd, 4),
            Token::Eq => (BinOp::Eq, 5),
            Token::Ne => (BinOp::Ne, 5),
            Token::StrEq => (BinOp::StrEq, 5),
            Token::StrNe => (BinOp::StrNe, 5),
            Token::Lt => (BinOp::Lt, 6),
            Token::Le => (BinOp::Le, 6),
            Token::Gt => (BinOp::Gt, 6),
            Token::Ge => (BinOp::Ge, 6),
            Token::ShiftLeft => (BinOp::Shl, 7),
            Token::ShiftRight => (BinOp::Shr, 7),
            Token::Plus => (BinOp::Add, 8),
            Token::Minus => (BinOp::Sub, 8),
            Token::Star => (BinOp::Mul, 9),
            Token::Slash => (BinOp::Div, 9),
            Token::Percent => (BinOp::Rem, 9),
            _ => return None,
        })
    }

    /// Precedence climbing over the left-associative binary levels.
    fn parse_binary(&mut self, min: u8) -> Result<Expr, Error> {
        let entry = self.depth;
        let expr = self.parse_binary_chain(min);
        self.depth = entry;
        expr
    }

    fn parse_binary_chain(&mut self, min: u8) -> Result<Expr, Error> {
        let mut lhs = self.parse_unary()?;
        while let Some((op, prec)) = self.binop() {
            if prec < min {
                break;
            }
            self.pos += 1;
            // Each operator deepens the left spine by one.
            self.enter()?;
            let rhs = self.parse_binary(prec + 1)?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr, Error> {
        self.enter()?;
        let expr = self.parse_unary_inner();
        self.depth -= 1;
        expr
    }

    fn parse_unary_inner(&mut self) -> Result<Expr, Error> {
        let op = match self.peek() {
            Token::Minus => UnaryOp::Neg,
            Token::Bang => UnaryOp::Not,
            Token::Tilde => UnaryOp::BitNot,
            Token::Plus => {
                self.pos += 1;
                return self.parse_unary();
            }
            _ => return self.parse_primary(),
        };
        self.pos += 1;
        Ok(Expr::Unary(op, Box::new(self.parse_unary()?)))
    }

    fn parse_primary(&mut self) -> Result<Expr, Error> {
        match self.advance() {
            Token::Int(n) => Ok(Expr::Literal(Value::Int(n))),
            Token::Str(s) => Ok(Expr::Literal(Value::Str(s))),
            Token::LParen => {
                let inner = self.parse_ternary()?;
                if !self.eat(&Token::RParen) {
                    return Err(Error::script("expected ')' in expression"));
                }
                Ok(inner)
            }
            Token::Eof => Err(Error::script("premature end of expression")),
            other => Err(Error::script(format!("syntax error in expression near {other:?}"))),
        }
    }
}

/// Parse an expression into an AST.
pub fn parse(src: &[u8]) -> Result<Expr, Error> {
    let mut parser = Parser { tokens: tokenize(src)?, pos: 0, depth: 0 };
    let expr = parser.parse_ternary()?;
    if parser.peek() != &Token::Eof {
        return Err(Error::script(format!(
            "syntax error in expression \"{}\"",
            String::from_utf8_lossy(src)
        )));
    }
    Ok(expr)
}

// ── Evaluator ─────────────────────────────────────────────────────────────────

pub fn eval(expr: &Expr) -> Result<Value, Error> {
    match expr {
        Expr::Literal(v) => Ok(v.clone()),
        Expr::Unary(op, inner) => {
            let n = eval(inner)?.as_int()?;
            Ok(Value::Int(match op {
                UnaryOp::Neg => n.wrapping_neg(),
                UnaryOp::Not => (n == 0) as i64,
                UnaryOp::BitNot => !n,
            }))
        }
        Expr::Binary(BinOp::And, lhs, rhs) => {
            if !eval(lhs)?.truthy()? {
                return Ok(flag(false));
            }
            Ok(flag(eval(rhs)?.truthy()?))
        }
        Expr::Binary(BinOp::Or, lhs, rhs) => {
            if eval(lhs)?.truthy()? {
                return Ok(flag(true));
            }
            Ok(flag(eval(rhs)?.truthy()?))
        }
        Expr::Binary(op, lhs, rhs) => binop(*op, eval(lhs)?, eval(rhs)?),
        Expr::Ternary(cond, then, else_) => {
            if eval(cond)?.truthy()? {
                eval(then)
            } else {
                eval(else_)
            }
        }
    }
}

fn binop(op: BinOp, l: Value, r: Value) -> Result<Value, Error> {
    match op {
        BinOp::Lt => return Ok(flag(l.cmp_value(&r) == Ordering::Less)),
        BinOp::Le => return Ok(flag(l.cmp_value(&r) != Ordering::Greater)),
        BinOp::Gt => return Ok(flag(l.cmp_value(&r) == Ordering::Greater)),
        BinOp::Ge => return Ok(flag(l.cmp_value(&r) != Ordering::Less)),
        BinOp::Eq => return Ok(flag(l.cmp_value(&r) == Ordering::Equal)),
        BinOp::Ne => return Ok(flag(l.cmp_value(&r) != Ordering::Equal)),
        BinOp::StrEq => return Ok(flag(l.into_bytes() == r.into_bytes())),
        BinOp::StrNe => return Ok(flag(l.into_bytes() != r.into_bytes())),
        _ => {}
    }
    integer_op(op, l.as_int()?, r.as_int()?).map(Value::Int)
}

/// Integer arithmetic shared with the prefix math commands.
pub fn integer_op(op: BinOp, a: i64, b: i64) -> Result<i64, Error> {
    Ok(match op {
        BinOp::Add => a.wrapping_add(b),
        BinOp::Sub => a.wrapping_sub(b),
        BinOp::Mul => a.wrapping_mul(b),
        BinOp::Div | BinOp::Rem if b == 0 => return Err(Error::script("divide by zero")),
        BinOp::Div => a.wrapping_div(b),
        BinOp::Rem => a.wrapping_rem(b),
        BinOp::Shl | BinOp::Shr if b < 0 => return Err(Error::script("negative shift")),
        BinOp::Shl => a.checked_shl(b as u32).filter(|_| b < 64).unwrap_or(0),
        BinOp::Shr if b >= 64 => a >> 63,
        BinOp::Shr => a >> b,
        BinOp::BitAnd => a & b,
        BinOp::BitOr => a | b,
        BinOp::BitXor => a ^ b,
        BinOp::Lt => (a < b) as i64,
        BinOp::Le => (a <= b) as i64,
        BinOp::Gt => (a > b) as i64,
        BinOp::Ge => (a >= b) as i64,
        BinOp::Eq | BinOp::StrEq => (a == b) as i64,
        BinOp::Ne | BinOp::StrNe => (a != b) as i64,
        BinOp::And => (a != 0 && b != 0) as i64,
        BinOp::Or => (a != 0 || b != 0) as i64,
    })
}

/// Parse and evaluate.
pub fn eval_bytes(src: &[u8]) -> Result<Value, Error> {
    eval(&parse(src)?)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn int(src: &str) -> i64 {
        eval_bytes(src.as_bytes()).unwrap().as_int().unwrap()
    }

    #[test]
    fn arithmetic_and_precedence() {
        assert_eq!(int("1 + 2 * 3"), 7);
        assert_eq!(int("(1 + 2) * 3"), 9);
        assert_eq!(int("10 - 4 - 3"), 3);
        assert_eq!(int("7 / 2"), 3);
        assert_eq!(int("7 % 4"), 3);
        assert_eq!(int("-3 + 5"), 2);
        assert_eq!(int("1 << 4 | 1"), 17);
        assert_eq!(int("0xff & 0x0f"), 15);
    }

    #[test]
    fn comparisons() {
        assert_eq!(int("5 > 0"), 1);
        assert_eq!(int("0 > 0"), 0);
        assert_eq!(int("3 <= 3"), 1);
        assert_eq!(int("10 == 010"), 1);
        assert_eq!(int("abc < abd"), 1);
        assert_eq!(int("\"a b\" eq \"a b\""), 1);
        assert_eq!(int("\"10\" ne \"010\""), 1);
        assert_eq!(int("{x y} == {x y}"), 1);
    }

    #[test]
    fn logic_short_circuits() {
        assert_eq!(int("0 && (1 / 0)"), 0);
        assert_eq!(int("1 || (1 / 0)"), 1);
        assert_eq!(int("!0"), 1);
        assert_eq!(int("~0"), -1);
    }

    #[test]
    fn ternary() {
        assert_eq!(int("1 ? 2 : 3"), 2);
        assert_eq!(int("0 ? 2 : 0 ? 4 : 5"), 5);
    }

    #[test]
    fn errors() {
        assert_eq!(
            eval_bytes(b"1 / 0").unwrap_err().to_string(),
            "divide by zero"
        );
        assert_eq!(
            eval_bytes(b"abc + 1").unwrap_err().to_string(),
            "\"abc\" is not a number"
        );
        assert!(eval_bytes(b"1 +").is_err());
        assert!(eval_bytes(b"(1").is_err());
        assert!(eval_bytes(b"1 2").is_err());
        assert!(eval_bytes(b"1 = 2").is_err());
    }

    #[test]
    fn nesting_is_bounded() {
        let deep = format!("{}1{}", "(".repeat(200_000), ")".repeat(200_000));
        assert_eq!(
            eval_bytes(deep.as_bytes()).unwrap_err().to_string(),
            "expression nested too deeply"
        );
        let negations = "- ".repeat(100_000) + "1";
        assert!(eval_bytes(negations.as_bytes()).is_err());
        let chain = vec!["1"; 100_000].join(" + ");
        assert!(eval_bytes(chain.as_bytes()).is_err());

        let shallow = format!("{}1{}", "(".repeat(50), ")".repeat(50));
        assert_eq!(int(&shallow), 1);
        assert_eq!(int(&vec!["1"; 100].join(" + ")), 100);
    }

    #[test]
    fn overflow_wraps() {
        assert_eq!(int("9223372036854775807 + 1"), i64::MIN);
        assert_eq!(integer_op(BinOp::Shl, 1, 70).unwrap(), 0);
        assert_eq!(integer_op(BinOp::Shr, -8, 70).unwrap(), -1);
    }
}
