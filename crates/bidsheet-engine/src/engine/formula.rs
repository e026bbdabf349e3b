//! Parser for preprocessed formula text.
//!
//! By the time text reaches this parser every custom reference form has been
//! rewritten, so the grammar is plain spreadsheet syntax: numbers, `"strings"`,
//! `TRUE`/`FALSE`, error literals, A1 references, `A1:B2` ranges, function
//! calls and the operators below (loosest first):
//!
//! | operators              | kind               |
//! |------------------------|--------------------|
//! | `= <> < > <= >=`       | comparison         |
//! | `&`                    | text concatenation |
//! | `+ -`                  | additive           |
//! | `* /`                  | multiplicative     |
//! | `^`                    | power (left assoc) |
//! | unary `+ -`            | sign               |
//! | postfix `%`            | percent            |

use super::CellRef;
use crate::error::FormulaError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
    Concat,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Plus,
    Percent,
}

/// A cell or rectangular range the expression reads.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub enum InputRef {
    Cell(CellRef),
    Range(CellRef, CellRef),
}

#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    Number(f64),
    Text(String),
    Bool(bool),
    Error(FormulaError),
    Ref(CellRef),
    Range(CellRef, CellRef),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Call(String, Vec<Expr>),
}

impl Expr {
    /// Every input the expression reads, in first-seen order without duplicates.
    pub fn inputs(&self) -> Vec<InputRef> {
        let mut out = Vec::new();
        self.collect_inputs(&mut out);
        out
    }

    fn collect_inputs(&self, out: &mut Vec<InputRef>) {
        let push = |out: &mut Vec<InputRef>, input: InputRef| {
            if !out.contains(&input) {
                out.push(input);
            }
        };
        match self {
            Expr::Ref(cell) => push(out, InputRef::Cell(*cell)),
            Expr::Range(a, b) => push(out, InputRef::Range(*a, *b)),
            Expr::Unary(_, e) => e.collect_inputs(out),
            Expr::Binary(_, l, r) => {
                l.collect_inputs(out);
                r.collect_inputs(out);
            }
            Expr::Call(_, args) => args.iter().for_each(|a| a.collect_inputs(out)),
            Expr::Number(_) | Expr::Text(_) | Expr::Bool(_) | Expr::Error(_) => {}
        }
    }

    /// Names of all functions called anywhere in the expression (uppercased).
    pub fn function_names(&self) -> Vec<String> {
        let mut out = Vec::new();
        self.collect_functions(&mut out);
        out
    }

    fn collect_functions(&self, out: &mut Vec<String>) {
        match self {
            Expr::Call(name, args) => {
                out.push(name.clone());
                args.iter().for_each(|a| a.collect_functions(out));
            }
            Expr::Unary(_, e) => e.collect_functions(out),
            Expr::Binary(_, l, r) => {
                l.collect_functions(out);
                r.collect_functions(out);
            }
            _ => {}
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
enum Token {
    Number(f64),
    Text(String),
    Error(FormulaError),
    Ident(String),
    Op(&'static str),
    LParen,
    RParen,
    Comma,
    Colon,
}

fn tokenize(src: &str) -> Result<Vec<Token>, FormulaError> {
    let chars: Vec<char> = src.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '0'..='9' | '.' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                if i < chars.len() && (chars[i] == 'e' || chars[i] == 'E') {
                    let mut j = i + 1;
                    if j < chars.len() && (chars[j] == '+' || chars[j] == '-') {
                        j += 1;
                    }
                    if j < chars.len() && chars[j].is_ascii_digit() {
                        i = j;
                        while i < chars.len() && chars[i].is_ascii_digit() {
                            i += 1;
                        }
                    }
                }
                let text: String = chars[start..i].iter().collect();
                let n = text.parse::<f64>().map_err(|_| FormulaError::Parse)?;
                tokens.push(Token::Number(n));
            }
            '"' => {
                let mut text = String::new();
                i += 1;
                loop {
                    match chars.get(i) {
                        None => return Err(FormulaError::Parse),
                        Some('"') if chars.get(i + 1) == Some(&'"') => {
                            text.push('"');
                            i += 2;
                        }
                        Some('"') => {
                            i += 1;
                            break;
                        }
                        Some(ch) => {
                            text.push(*ch);
                            i += 1;
                        }
                    }
                }
                tokens.push(Token::Text(text));
            }
            '#' => {
                let start = i;
                i += 1;
                while i < chars.len() && (chars[i].is_ascii_alphanumeric() || "_/".contains(chars[i])) {
                    i += 1;
                }
                if i < chars.len() && (chars[i] == '!' || chars[i] == '?') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                tokens.push(Token::Error(
                    FormulaError::from_token(&text).unwrap_or(FormulaError::Eval),
                ));
            }
            c if c.is_ascii_alphabetic() || c == '_' || c == '$' => {
                let start = i;
                while i < chars.len()
                    && (chars[i].is_ascii_alphanumeric() || chars[i] == '_' || chars[i] == '$')
                {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            ',' | ';' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            ':' => {
                tokens.push(Token::Colon);
                i += 1;
            }
            '<' | '>' => {
                let next = chars.get(i + 1).copied();
                let op = match (c, next) {
                    ('<', Some('=')) => "<=",
                    ('<', Some('>')) => "<>",
                    ('>', Some('=')) => ">=",
                    ('<', _) => "<",
                    _ => ">",
                };
                i += op.len();
                tokens.push(Token::Op(op));
            }
            '+' | '-' | '*' | '/' | '^' | '&' | '=' | '%' => {
                let op = match c {
                    '+' => "+",
                    '-' => "-",
                    '*' => "*",
                    '/' => "/",
                    '^' => "^",
                    '&' => "&",
                    '=' => "=",
                    _ => "%",
                };
                tokens.push(Token::Op(op));
                i += 1;
            }
            _ => return Err(FormulaError::Parse),
        }
    }

    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

const PREFIX_BP: u8 = 11;
const PERCENT_BP: u8 = 13;

fn infix_binding(op: &str) -> Option<(u8, u8, BinaryOp)> {
    let entry = match op {
        "=" => (1, 2, BinaryOp::Eq),
        "<>" => (1, 2, BinaryOp::Ne),
        "<" => (1, 2, BinaryOp::Lt),
        "<=" => (1, 2, BinaryOp::Le),
        ">" => (1, 2, BinaryOp::Gt),
        ">=" => (1, 2, BinaryOp::Ge),
        "&" => (3, 4, BinaryOp::Concat),
        "+" => (5, 6, BinaryOp::Add),
        "-" => (5, 6, BinaryOp::Sub),
        "*" => (7, 8, BinaryOp::Mul),
        "/" => (7, 8, BinaryOp::Div),
        "^" => (9, 10, BinaryOp::Pow),
        _ => return None,
    };
    Some(entry)
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn expect(&mut self, expected: Token) -> Result<(), FormulaError> {
        match self.next() {
            Some(t) if t == expected => Ok(()),
            _ => Err(FormulaError::Parse),
        }
    }

    fn expr(&mut self, min_bp: u8) -> Result<Expr, FormulaError> {
        let mut lhs = self.prefix()?;

        loop {
            let op = match self.peek() {
                Some(Token::Op(op)) => *op,
                _ => break,
            };

            if op == "%" {
                if PERCENT_BP < min_bp {
                    break;
                }
                self.pos += 1;
                lhs = Expr::Unary(UnaryOp::Percent, Box::new(lhs));
                continue;
            }

            let Some((l_bp, r_bp, bin)) = infix_binding(op) else {
                break;
            };
            if l_bp < min_bp {
                break;
            }
            self.pos += 1;
            let rhs = self.expr(r_bp)?;
            lhs = Expr::Binary(bin, Box::new(lhs), Box::new(rhs));
        }

        Ok(lhs)
    }

    fn prefix(&mut self) -> Result<Expr, FormulaError> {
        match self.next().ok_or(FormulaError::Parse)? {
            Token::Number(n) => Ok(Expr::Number(n)),
            Token::Text(s) => Ok(Expr::Text(s)),
            Token::Error(e) => Ok(Expr::Error(e)),
            Token::Op("-") => Ok(Expr::Unary(UnaryOp::Neg, Box::new(self.expr(PREFIX_BP)?))),
            Token::Op("+") => Ok(Expr::Unary(UnaryOp::Plus, Box::new(self.expr(PREFIX_BP)?))),
            Token::LParen => {
                let inner = self.expr(0)?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            Token::Ident(name) => self.identifier(name),
            _ => Err(FormulaError::Parse),
        }
    }

    fn identifier(&mut self, name: String) -> Result<Expr, FormulaError> {
        if self.peek() == Some(&Token::LParen) {
            self.pos += 1;
            let mut args = Vec::new();
            if self.peek() == Some(&Token::RParen) {
                self.pos += 1;
            } else {
                loop {
                    args.push(self.expr(0)?);
                    match self.next() {
                        Some(Token::Comma) => continue,
                        Some(Token::RParen) => break,
                        _ => return Err(FormulaError::Parse),
                    }
                }
            }
            return Ok(Expr::Call(name.to_ascii_uppercase(), args));
        }

        if let Some(start) = CellRef::from_str(&name) {
            if self.peek() == Some(&Token::Colon) {
                self.pos += 1;
                let end = match self.next() {
                    Some(Token::Ident(end)) => CellRef::from_str(&end).ok_or(FormulaError::Parse)?,
                    _ => return Err(FormulaError::Parse),
                };
                return Ok(Expr::Range(start, end));
            }
            return Ok(Expr::Ref(start));
        }

        match name.to_ascii_uppercase().as_str() {
            "TRUE" => Ok(Expr::Bool(true)),
            "FALSE" => Ok(Expr::Bool(false)),
            _ => Err(FormulaError::Parse),
        }
    }
}

/// Parse preprocessed formula text (without the leading `=`).
pub fn parse_formula(src: &str) -> Result<Expr, FormulaError> {
    let tokens = tokenize(src)?;
    if tokens.is_empty() {
        return Err(FormulaError::Parse);
    }
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.expr(0)?;
    if parser.pos != parser.tokens.len() {
        return Err(FormulaError::Parse);
    }
    Ok(expr)
}
