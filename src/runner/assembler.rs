// mos65gen - A 6502/65C02 code generator emitting 64tass assembly
// Copyright (C) 2026  Marcel Joachim Kloubert <marcel@kloubert.dev>
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

//! A multi-pass assembler for the 64tass subset the code generator emits.
//!
//! Supported:
//! - Named labels, `.proc`/`.pend` scopes and `name = value` definitions
//! - Anonymous `+` and `-` labels
//! - `* = address` origins
//! - `.byte .char .word .sint .text .null .fill` data and `format(...)`
//! - Expressions with `< >` byte selection and the usual arithmetic
//! - Every 6502 opcode and the 65C02 ones selected with `.cpu '65c02'`
//!
//! Out of range branches are rewritten to an inverted branch around a
//! `jmp`, like 64tass does with `--long-branch`.

use std::collections::{HashMap, HashSet};

use log::{debug, trace};
use logos::Logos;
use thiserror::Error;

use super::opcodes::{self, Mnemonic, Mode};

/// The most passes before giving up on stable label values.
const MAX_PASSES: usize = 16;

/// Errors found while assembling.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AssemblerError {
    /// The line could not be parsed.
    #[error("line {line}: {message}")]
    Syntax { line: usize, message: String },

    /// A symbol is never defined.
    #[error("line {line}: undefined symbol '{name}'")]
    UndefinedSymbol { line: usize, name: String },

    /// A symbol is defined twice.
    #[error("line {line}: duplicate definition of '{name}'")]
    DuplicateSymbol { line: usize, name: String },

    /// A value does not fit its destination.
    #[error("line {line}: value {value} out of range")]
    ValueOutOfRange { line: usize, value: i64 },

    /// The instruction does not exist with this addressing mode.
    #[error("line {line}: invalid addressing mode for '{mnemonic}'")]
    InvalidMode { line: usize, mnemonic: String },

    /// Label values kept changing between passes.
    #[error("label values did not settle after {0} passes")]
    NotConverging(usize),

    /// The program contains no code or data.
    #[error("program is empty")]
    Empty,
}

type AsmResult<T> = std::result::Result<T, AssemblerError>;

/// The output of the assembler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssembledProgram {
    /// The address of the first byte.
    pub load_address: u16,
    /// The program bytes.
    pub bytes: Vec<u8>,
    /// Every named label and definition, with dotted scope names.
    pub symbols: HashMap<String, u16>,
    /// True when assembled for the 65C02.
    pub cmos: bool,
}

impl AssembledProgram {
    /// The value of a symbol such as `main.start.counter`.
    pub fn symbol(&self, name: &str) -> Option<u16> {
        self.symbols.get(name).copied()
    }

    /// The program as a PRG file: load address followed by the bytes.
    pub fn to_prg(&self) -> Vec<u8> {
        let mut prg = Vec::with_capacity(self.bytes.len() + 2);
        prg.extend_from_slice(&self.load_address.to_le_bytes());
        prg.extend_from_slice(&self.bytes);
        prg
    }
}

#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r]+")]
enum Token {
    #[regex(r"\$[0-9a-fA-F]+", |lex| i64::from_str_radix(&lex.slice()[1..], 16).ok())]
    #[regex(r"%[01]+", |lex| i64::from_str_radix(&lex.slice()[1..], 2).ok())]
    #[regex(r"[0-9]+", |lex| lex.slice().parse::<i64>().ok())]
    Number(i64),

    #[regex(r"[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)*", |lex| lex.slice().to_string())]
    Ident(String),

    #[regex(r"'[^']*'", |lex| strip_quotes(lex.slice()))]
    #[regex(r#""[^"]*""#, |lex| strip_quotes(lex.slice()))]
    Str(String),

    #[token("#")]
    Hash,
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token(",")]
    Comma,
    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Star,
    #[token("/")]
    Slash,
    #[token("<<")]
    Shl,
    #[token(">>")]
    Shr,
    #[token("<")]
    Lo,
    #[token(">")]
    Hi,
    #[token("&")]
    Amp,
    #[token("|")]
    Pipe,
    #[token("^")]
    Caret,
    #[token("~")]
    Tilde,
}

fn strip_quotes(text: &str) -> String {
    text[1..text.len() - 1].to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Shl,
    Shr,
    And,
    Or,
    Xor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UnOp {
    Lo,
    Hi,
    Neg,
    Not,
}

#[derive(Debug, Clone, PartialEq)]
enum AsmExpr {
    Number(i64),
    Symbol(String),
    /// Anonymous label reference; positive counts look forward.
    Anonymous(i32),
    /// The current program counter.
    Pc,
    Unary(UnOp, Box<AsmExpr>),
    Binary(BinOp, Box<AsmExpr>, Box<AsmExpr>),
}

#[derive(Debug, Clone, PartialEq)]
enum Operand {
    None,
    Accumulator,
    Immediate(AsmExpr),
    Direct(AsmExpr),
    IndexedX(AsmExpr),
    IndexedY(AsmExpr),
    Indirect(AsmExpr),
    IndirectX(AsmExpr),
    IndirectY(AsmExpr),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DataKind {
    Byte,
    Char,
    Word,
    Sint,
    Text,
    Null,
}

#[derive(Debug, Clone, PartialEq)]
enum DataItem {
    Value(AsmExpr),
    Text(String),
    Format(String, Vec<AsmExpr>),
}

#[derive(Debug, Clone, PartialEq)]
enum LabelDef {
    Named(String),
    Forward,
    Backward,
}

#[derive(Debug, Clone, PartialEq)]
enum Body {
    Empty,
    Instruction(Mnemonic, Operand),
    Define(String, AsmExpr),
    Origin(AsmExpr),
    Data(DataKind, Vec<DataItem>),
    Fill(AsmExpr, Option<AsmExpr>),
    Proc,
    Pend,
    Cpu(String),
}

#[derive(Debug, Clone, PartialEq)]
struct Line {
    number: usize,
    label: Option<LabelDef>,
    body: Body,
}

/// Remove a `;` comment, leaving quoted text alone.
fn strip_comment(line: &str) -> &str {
    let mut quote = None;
    for (index, c) in line.char_indices() {
        match (quote, c) {
            (None, '\'') | (None, '"') => quote = Some(c),
            (Some(q), c) if c == q => quote = None,
            (None, ';') => return &line[..index],
            _ => {}
        }
    }
    line
}

fn tokenize(text: &str, line: usize) -> AsmResult<Vec<Token>> {
    let mut lexer = Token::lexer(text);
    let mut tokens = Vec::new();
    while let Some(token) = lexer.next() {
        match token {
            Ok(token) => tokens.push(token),
            Err(()) => {
                return Err(AssemblerError::Syntax {
                    line,
                    message: format!("unexpected '{}'", lexer.slice()),
                })
            }
        }
    }
    Ok(tokens)
}

struct ExprParser<'t> {
    tokens: &'t [Token],
    position: usize,
    line: usize,
}

impl<'t> ExprParser<'t> {
    fn new(tokens: &'t [Token], line: usize) -> Self {
        Self {
            tokens,
            position: 0,
            line,
        }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.position)
    }

    fn at_end(&self) -> bool {
        self.position >= self.tokens.len()
    }

    fn error<T>(&self, message: impl Into<String>) -> AsmResult<T> {
        Err(AssemblerError::Syntax {
            line: self.line,
            message: message.into(),
        })
    }

    fn expect(&mut self, token: Token) -> AsmResult<()> {
        if self.peek() == Some(&token) {
            self.position += 1;
            Ok(())
        } else {
            self.error(format!("expected {:?}", token))
        }
    }

    fn expression(&mut self) -> AsmResult<AsmExpr> {
        let mut left = self.shift()?;
        loop {
            let op = match self.peek() {
                Some(Token::Amp) => BinOp::And,
                Some(Token::Pipe) => BinOp::Or,
                Some(Token::Caret) => BinOp::Xor,
                _ => return Ok(left),
            };
            self.position += 1;
            let right = self.shift()?;
            left = AsmExpr::Binary(op, Box::new(left), Box::new(right));
        }
    }

    fn shift(&mut self) -> AsmResult<AsmExpr> {
        let mut left = self.additive()?;
        loop {
            let op = match self.peek() {
                Some(Token::Shl) => BinOp::Shl,
                Some(Token::Shr) => BinOp::Shr,
                _ => return Ok(left),
            };
            self.position += 1;
            let right = self.additive()?;
            left = AsmExpr::Binary(op, Box::new(left), Box::new(right));
        }
    }

    fn additive(&mut self) -> AsmResult<AsmExpr> {
        let mut left = self.multiplicative()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinOp::Add,
                Some(Token::Minus) => BinOp::Sub,
                _ => return Ok(left),
            };
            self.position += 1;
            let right = self.multiplicative()?;
            left = AsmExpr::Binary(op, Box::new(left), Box::new(right));
        }
    }

    fn multiplicative(&mut self) -> AsmResult<AsmExpr> {
        let mut left = self.unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinOp::Mul,
                Some(Token::Slash) => BinOp::Div,
                _ => return Ok(left),
            };
            self.position += 1;
            let right = self.unary()?;
            left = AsmExpr::Binary(op, Box::new(left), Box::new(right));
        }
    }

    /// A run of `+` or `-` that ends the operand is an anonymous label reference.
    fn anonymous_reference(&mut self) -> Option<AsmExpr> {
        let sign = match self.peek() {
            Some(Token::Plus) => Token::Plus,
            Some(Token::Minus) => Token::Minus,
            _ => return None,
        };
        let mut count = 0;
        while self.tokens.get(self.position + count) == Some(&sign) {
            count += 1;
        }
        match self.tokens.get(self.position + count) {
            None | Some(Token::RParen) | Some(Token::Comma) => {
                self.position += count;
                let count = count as i32;
                Some(AsmExpr::Anonymous(if sign == Token::Plus { count } else { -count }))
            }
            _ => None,
        }
    }

    fn unary(&mut self) -> AsmResult<AsmExpr> {
        if let Some(reference) = self.anonymous_reference() {
            return Ok(reference);
        }
        let op = match self.peek() {
            Some(Token::Lo) => UnOp::Lo,
            Some(Token::Hi) => UnOp::Hi,
            Some(Token::Minus) => UnOp::Neg,
            Some(Token::Tilde) => UnOp::Not,
            Some(Token::Plus) => {
                self.position += 1;
                return self.unary();
            }
            _ => return self.primary(),
        };
        self.position += 1;
        let operand = self.unary()?;
        Ok(AsmExpr::Unary(op, Box::new(operand)))
    }

    fn primary(&mut self) -> AsmResult<AsmExpr> {
        let token = match self.peek() {
            Some(token) => token.clone(),
            None => return self.error("expected an expression"),
        };
        self.position += 1;
        match token {
            Token::Number(value) => Ok(AsmExpr::Number(value)),
            Token::Ident(name) => Ok(AsmExpr::Symbol(name)),
            Token::Star => Ok(AsmExpr::Pc),
            Token::Str(text) if text.chars().count() == 1 => {
                Ok(AsmExpr::Number(text.chars().next().map(|c| c as i64).unwrap_or(0)))
            }
            Token::LParen => {
                let inner = self.expression()?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            other => self.error(format!("unexpected {:?} in expression", other)),
        }
    }
}

fn parse_expression(tokens: &[Token], line: usize) -> AsmResult<AsmExpr> {
    let mut parser = ExprParser::new(tokens, line);
    let expr = parser.expression()?;
    if !parser.at_end() {
        return parser.error("unexpected text after expression");
    }
    Ok(expr)
}

/// Split tokens at top level commas.
fn split_arguments(tokens: &[Token]) -> Vec<&[Token]> {
    let mut parts = Vec::new();
    let mut depth = 0;
    let mut start = 0;
    for (index, token) in tokens.iter().enumerate() {
        match token {
            Token::LParen => depth += 1,
            Token::RParen => depth -= 1,
            Token::Comma if depth == 0 => {
                parts.push(&tokens[start..index]);
                start = index + 1;
            }
            _ => {}
        }
    }
    parts.push(&tokens[start..]);
    parts
}

/// The index of the parenthesis closing the one at `open`.
fn matching_paren(tokens: &[Token], open: usize) -> Option<usize> {
    let mut depth = 0;
    for (index, token) in tokens.iter().enumerate().skip(open) {
        match token {
            Token::LParen => depth += 1,
            Token::RParen => {
                depth -= 1;
                if depth == 0 {
                    return Some(index);
                }
            }
            _ => {}
        }
    }
    None
}

fn is_register(token: Option<&Token>, register: &str) -> bool {
    matches!(token, Some(Token::Ident(name)) if name.eq_ignore_ascii_case(register))
}

fn parse_operand(mnemonic: Mnemonic, tokens: &[Token], line: usize) -> AsmResult<Operand> {
    let len = tokens.len();
    if len == 0 {
        return Ok(Operand::None);
    }
    if len == 1 && is_register(tokens.first(), "a") && opcodes::supports(mnemonic, Mode::Accumulator, true) {
        return Ok(Operand::Accumulator);
    }
    if tokens[0] == Token::Hash {
        return Ok(Operand::Immediate(parse_expression(&tokens[1..], line)?));
    }
    if tokens[0] == Token::LParen && !mnemonic.is_branch() {
        if let Some(close) = matching_paren(tokens, 0) {
            if close == len - 1 {
                let inner = &tokens[1..close];
                if inner.len() >= 2
                    && is_register(inner.last(), "x")
                    && inner[inner.len() - 2] == Token::Comma
                {
                    let address = parse_expression(&inner[..inner.len() - 2], line)?;
                    return Ok(Operand::IndirectX(address));
                }
                return Ok(Operand::Indirect(parse_expression(inner, line)?));
            }
            if close == len - 3 && tokens[len - 2] == Token::Comma && is_register(tokens.last(), "y") {
                return Ok(Operand::IndirectY(parse_expression(&tokens[1..close], line)?));
            }
        }
    }
    if len >= 3 && tokens[len - 2] == Token::Comma {
        let address = &tokens[..len - 2];
        if is_register(tokens.last(), "x") {
            return Ok(Operand::IndexedX(parse_expression(address, line)?));
        }
        if is_register(tokens.last(), "y") {
            return Ok(Operand::IndexedY(parse_expression(address, line)?));
        }
    }
    Ok(Operand::Direct(parse_expression(tokens, line)?))
}

fn parse_data(kind: DataKind, text: &str, line: usize) -> AsmResult<Body> {
    let tokens = tokenize(text, line)?;
    let mut items = Vec::new();
    for part in split_arguments(&tokens) {
        match part {
            [] => {
                return Err(AssemblerError::Syntax {
                    line,
                    message: "empty data item".to_string(),
                })
            }
            [Token::Str(text)] if text.chars().count() != 1 || matches!(kind, DataKind::Text | DataKind::Null) => {
                items.push(DataItem::Text(text.clone()))
            }
            [Token::Ident(name), Token::LParen, rest @ ..] if name == "format" => {
                let arguments = match rest.split_last() {
                    Some((Token::RParen, inner)) => split_arguments(inner),
                    _ => {
                        return Err(AssemblerError::Syntax {
                            line,
                            message: "unterminated format(...)".to_string(),
                        })
                    }
                };
                let (template, values) = match arguments.split_first() {
                    Some(([Token::Str(template)], values)) => (template.clone(), values),
                    _ => {
                        return Err(AssemblerError::Syntax {
                            line,
                            message: "format(...) needs a format string".to_string(),
                        })
                    }
                };
                let values = values
                    .iter()
                    .map(|value| parse_expression(value, line))
                    .collect::<AsmResult<Vec<_>>>()?;
                items.push(DataItem::Format(template, values));
            }
            expr => items.push(DataItem::Value(parse_expression(expr, line)?)),
        }
    }
    Ok(Body::Data(kind, items))
}

fn parse_directive(directive: &str, rest: &str, line: usize) -> AsmResult<Body> {
    let kind = match directive.to_ascii_lowercase().as_str() {
        ".byte" => DataKind::Byte,
        ".char" => DataKind::Char,
        ".word" => DataKind::Word,
        ".sint" => DataKind::Sint,
        ".text" => DataKind::Text,
        ".null" => DataKind::Null,
        ".proc" => return Ok(Body::Proc),
        ".pend" => return Ok(Body::Pend),
        ".enc" => return Ok(Body::Empty),
        ".cpu" => return Ok(Body::Cpu(rest.trim().trim_matches(|c| c == '\'' || c == '"').to_string())),
        ".fill" => {
            let tokens = tokenize(rest, line)?;
            let parts = split_arguments(&tokens);
            let count = parse_expression(parts[0], line)?;
            let value = match parts.get(1) {
                Some(value) => Some(parse_expression(value, line)?),
                None => None,
            };
            return Ok(Body::Fill(count, value));
        }
        other => {
            return Err(AssemblerError::Syntax {
                line,
                message: format!("unsupported directive '{}'", other),
            })
        }
    };
    parse_data(kind, rest, line)
}

fn parse_statement(text: &str, line: usize) -> AsmResult<Body> {
    let text = text.trim();
    if text.is_empty() {
        return Ok(Body::Empty);
    }
    let (word, rest) = match text.find(char::is_whitespace) {
        Some(index) => (&text[..index], &text[index..]),
        None => (text, ""),
    };
    if word.starts_with('.') {
        return parse_directive(word, rest, line);
    }
    let mnemonic = Mnemonic::from_name(word).ok_or_else(|| AssemblerError::Syntax {
        line,
        message: format!("unknown instruction '{}'", word),
    })?;
    let tokens = tokenize(rest, line)?;
    Ok(Body::Instruction(mnemonic, parse_operand(mnemonic, &tokens, line)?))
}

/// `name = value` or `* = value`, at any indentation.
fn parse_definition(text: &str, line: usize) -> AsmResult<Option<Body>> {
    let trimmed = text.trim();
    let Some(index) = trimmed.find('=') else {
        return Ok(None);
    };
    let name = trimmed[..index].trim();
    let value = trimmed[index + 1..].trim();
    if value.starts_with('=') {
        return Ok(None);
    }
    let is_name = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
        && !name.starts_with(|c: char| c.is_ascii_digit());
    if name == "*" {
        let tokens = tokenize(value, line)?;
        return Ok(Some(Body::Origin(parse_expression(&tokens, line)?)));
    }
    if !is_name || Mnemonic::from_name(name).is_some() {
        return Ok(None);
    }
    let tokens = tokenize(value, line)?;
    Ok(Some(Body::Define(name.to_string(), parse_expression(&tokens, line)?)))
}

fn parse_line(raw: &str, number: usize) -> AsmResult<Line> {
    let text = strip_comment(raw);
    if let Some(body) = parse_definition(text, number)? {
        return Ok(Line {
            number,
            label: None,
            body,
        });
    }
    let starts_in_column_0 = !text.starts_with(|c: char| c.is_whitespace());
    let trimmed = text.trim();
    if !starts_in_column_0 || trimmed.is_empty() {
        return Ok(Line {
            number,
            label: None,
            body: parse_statement(trimmed, number)?,
        });
    }

    let (first, rest) = match trimmed.find(char::is_whitespace) {
        Some(index) => (&trimmed[..index], &trimmed[index..]),
        None => (trimmed, ""),
    };
    if first.starts_with('.') || Mnemonic::from_name(first).is_some() {
        return Ok(Line {
            number,
            label: None,
            body: parse_statement(trimmed, number)?,
        });
    }
    let label = match first.trim_end_matches(':') {
        "+" => LabelDef::Forward,
        "-" => LabelDef::Backward,
        name => LabelDef::Named(name.to_string()),
    };
    Ok(Line {
        number,
        label: Some(label),
        body: parse_statement(rest, number)?,
    })
}

/// State of one assembly pass.
struct Pass<'a> {
    lines: &'a [Line],
    predefined: &'a HashMap<String, i64>,
    final_pass: bool,
    cmos: bool,
    pc: u16,
    origin: Option<u16>,
    bytes: Vec<u8>,
    scope: Vec<String>,
    symbols: HashMap<String, i64>,
    previous: &'a HashMap<String, i64>,
    /// Addresses of the anonymous labels, indexed by line.
    anonymous: &'a mut Vec<Option<u16>>,
    long_branches: &'a mut HashSet<usize>,
    grew: bool,
    current_line: usize,
}

impl Pass<'_> {
    fn scoped(&self, name: &str) -> String {
        if self.scope.is_empty() {
            name.to_string()
        } else {
            format!("{}.{}", self.scope.join("."), name)
        }
    }

    fn define(&mut self, name: &str, value: i64) -> AsmResult<()> {
        let full = self.scoped(name);
        if self.symbols.insert(full.clone(), value).is_some() {
            return Err(AssemblerError::DuplicateSymbol {
                line: self.lines[self.current_line].number,
                name: full,
            });
        }
        Ok(())
    }

    fn lookup(&self, name: &str) -> Option<i64> {
        for depth in (0..=self.scope.len()).rev() {
            let candidate = if depth == 0 {
                name.to_string()
            } else {
                format!("{}.{}", self.scope[..depth].join("."), name)
            };
            if let Some(value) = self
                .symbols
                .get(&candidate)
                .or_else(|| self.previous.get(&candidate))
            {
                return Some(*value);
            }
        }
        self.predefined.get(name).copied()
    }

    fn anonymous_target(&self, count: i32) -> Option<u16> {
        let wanted = if count > 0 { LabelDef::Forward } else { LabelDef::Backward };
        let mut remaining = count.unsigned_abs() as usize;
        let matches = |index: &usize| self.lines[*index].label.as_ref() == Some(&wanted);
        let found = if count > 0 {
            (self.current_line + 1..self.lines.len()).find(|index| {
                if matches(index) {
                    remaining -= 1;
                }
                remaining == 0
            })
        } else {
            (0..=self.current_line).rev().find(|index| {
                if matches(index) {
                    remaining -= 1;
                }
                remaining == 0
            })
        };
        found.and_then(|index| self.anonymous[index])
    }

    fn line_number(&self) -> usize {
        self.lines[self.current_line].number
    }

    /// Evaluate; `None` while a symbol is still unknown in an early pass.
    fn eval(&self, expr: &AsmExpr) -> AsmResult<Option<i64>> {
        Ok(match expr {
            AsmExpr::Number(value) => Some(*value),
            AsmExpr::Pc => Some(i64::from(self.pc)),
            AsmExpr::Symbol(name) => match self.lookup(name) {
                Some(value) => Some(value),
                None if self.final_pass => {
                    return Err(AssemblerError::UndefinedSymbol {
                        line: self.line_number(),
                        name: name.clone(),
                    })
                }
                None => None,
            },
            AsmExpr::Anonymous(count) => match self.anonymous_target(*count) {
                Some(address) => Some(i64::from(address)),
                None if self.final_pass => {
                    return Err(AssemblerError::UndefinedSymbol {
                        line: self.line_number(),
                        name: if *count > 0 { "+".into() } else { "-".into() },
                    })
                }
                None => None,
            },
            AsmExpr::Unary(op, operand) => self.eval(operand)?.map(|value| match op {
                UnOp::Lo => value & 0xff,
                UnOp::Hi => (value >> 8) & 0xff,
                UnOp::Neg => -value,
                UnOp::Not => !value,
            }),
            AsmExpr::Binary(op, left, right) => {
                let (Some(left), Some(right)) = (self.eval(left)?, self.eval(right)?) else {
                    return Ok(None);
                };
                Some(match op {
                    BinOp::Add => left + right,
                    BinOp::Sub => left - right,
                    BinOp::Mul => left * right,
                    BinOp::Div => {
                        if right == 0 {
                            return Err(AssemblerError::Syntax {
                                line: self.line_number(),
                                message: "division by zero".to_string(),
                            });
                        }
                        left / right
                    }
                    BinOp::Shl => left << (right & 63),
                    BinOp::Shr => left >> (right & 63),
                    BinOp::And => left & right,
                    BinOp::Or => left | right,
                    BinOp::Xor => left ^ right,
                })
            }
        })
    }

    fn emit(&mut self, byte: u8) -> AsmResult<()> {
        let origin = match self.origin {
            Some(origin) => origin,
            None => {
                self.origin = Some(self.pc);
                self.pc
            }
        };
        let offset = usize::from(self.pc.wrapping_sub(origin));
        if self.bytes.len() < offset {
            self.bytes.resize(offset, 0);
        }
        if offset < self.bytes.len() {
            self.bytes[offset] = byte;
        } else {
            self.bytes.push(byte);
        }
        self.pc = self.pc.checked_add(1).ok_or(AssemblerError::ValueOutOfRange {
            line: self.line_number(),
            value: 0x10000,
        })?;
        Ok(())
    }

    fn check_range(&self, value: i64, min: i64, max: i64) -> AsmResult<i64> {
        if value < min || value > max {
            if self.final_pass {
                return Err(AssemblerError::ValueOutOfRange {
                    line: self.line_number(),
                    value,
                });
            }
            return Ok(0);
        }
        Ok(value)
    }

    fn emit_byte_value(&mut self, value: Option<i64>, min: i64) -> AsmResult<()> {
        let value = self.check_range(value.unwrap_or(0), min, 255)?;
        self.emit((value & 0xff) as u8)
    }

    fn emit_word_value(&mut self, value: Option<i64>, min: i64, max: i64) -> AsmResult<()> {
        let value = self.check_range(value.unwrap_or(0), min, max)?;
        self.emit((value & 0xff) as u8)?;
        self.emit(((value >> 8) & 0xff) as u8)
    }

    fn run(&mut self) -> AsmResult<()> {
        let lines = self.lines;
        for (index, line) in lines.iter().enumerate() {
            self.current_line = index;
            if let Some(label) = &line.label {
                match label {
                    LabelDef::Named(name) => {
                        let name = name.clone();
                        self.define(&name, i64::from(self.pc))?;
                    }
                    LabelDef::Forward | LabelDef::Backward => {
                        if self.anonymous[index] != Some(self.pc) {
                            self.anonymous[index] = Some(self.pc);
                        }
                    }
                }
            }
            self.line(&line.body, line.label.as_ref())?;
        }
        Ok(())
    }

    fn line(&mut self, body: &Body, label: Option<&LabelDef>) -> AsmResult<()> {
        match body {
            Body::Empty => {}
            Body::Cpu(cpu) => self.cmos = matches!(cpu.to_ascii_lowercase().as_str(), "65c02" | "w65c02"),
            Body::Define(name, value) => {
                let value = self.eval(value)?.unwrap_or(0);
                self.define(name, value)?;
            }
            Body::Origin(address) => {
                let address = self.eval(address)?.unwrap_or(0);
                let address = self.check_range(address, 0, 0xffff)? as u16;
                if let Some(origin) = self.origin {
                    let end = origin.wrapping_add(self.bytes.len() as u16);
                    if address < end && self.final_pass {
                        return Err(AssemblerError::Syntax {
                            line: self.line_number(),
                            message: format!("origin ${:04x} overlaps earlier code", address),
                        });
                    }
                }
                self.pc = address;
            }
            Body::Proc => match label {
                Some(LabelDef::Named(name)) => self.scope.push(name.clone()),
                _ => {
                    return Err(AssemblerError::Syntax {
                        line: self.line_number(),
                        message: ".proc needs a label".to_string(),
                    })
                }
            },
            Body::Pend => {
                if self.scope.pop().is_none() {
                    return Err(AssemblerError::Syntax {
                        line: self.line_number(),
                        message: ".pend without .proc".to_string(),
                    });
                }
            }
            Body::Fill(count, value) => {
                let count = self.eval(count)?.unwrap_or(0);
                let count = self.check_range(count, 0, 0xffff)?;
                let value = match value {
                    Some(value) => self.eval(value)?,
                    None => Some(0),
                };
                for _ in 0..count {
                    self.emit_byte_value(value, -128)?;
                }
            }
            Body::Data(kind, items) => self.data(*kind, items)?,
            Body::Instruction(mnemonic, operand) => self.instruction(*mnemonic, operand)?,
        }
        Ok(())
    }

    fn data(&mut self, kind: DataKind, items: &[DataItem]) -> AsmResult<()> {
        for item in items {
            match item {
                DataItem::Text(text) => {
                    for byte in text.bytes() {
                        self.emit(byte)?;
                    }
                }
                DataItem::Format(template, values) => {
                    let mut evaluated = Vec::with_capacity(values.len());
                    for value in values {
                        evaluated.push(self.eval(value)?.unwrap_or(0));
                    }
                    for byte in format_template(template, &evaluated).bytes() {
                        self.emit(byte)?;
                    }
                }
                DataItem::Value(expr) => {
                    let value = self.eval(expr)?;
                    match kind {
                        DataKind::Byte | DataKind::Text | DataKind::Null => {
                            self.emit_byte_value(value, -128)?
                        }
                        DataKind::Char => {
                            let value = self.check_range(value.unwrap_or(0), -128, 127)?;
                            self.emit((value & 0xff) as u8)?;
                        }
                        DataKind::Word => self.emit_word_value(value, -32768, 0xffff)?,
                        DataKind::Sint => self.emit_word_value(value, -32768, 32767)?,
                    }
                }
            }
        }
        if kind == DataKind::Null {
            self.emit(0)?;
        }
        Ok(())
    }

    fn invalid_mode(&self, mnemonic: Mnemonic) -> AssemblerError {
        AssemblerError::InvalidMode {
            line: self.line_number(),
            mnemonic: mnemonic.name().to_string(),
        }
    }

    fn opcode(&mut self, mnemonic: Mnemonic, mode: Mode) -> AsmResult<()> {
        let opcode = opcodes::encode(mnemonic, mode, self.cmos).ok_or_else(|| self.invalid_mode(mnemonic))?;
        self.emit(opcode.code)
    }

    /// Pick the zero page form when the value is known to fit.
    fn direct_mode(&self, mnemonic: Mnemonic, mode: Mode, value: Option<i64>) -> AsmResult<Mode> {
        let zeropage = mode.zeropage_form();
        let fits = value.is_some_and(|v| (0..256).contains(&v));
        match zeropage {
            Some(zp) if fits && opcodes::supports(mnemonic, zp, self.cmos) => Ok(zp),
            _ if opcodes::supports(mnemonic, mode, self.cmos) => Ok(mode),
            Some(zp) if opcodes::supports(mnemonic, zp, self.cmos) => Ok(zp),
            _ => Err(self.invalid_mode(mnemonic)),
        }
    }

    fn instruction(&mut self, mnemonic: Mnemonic, operand: &Operand) -> AsmResult<()> {
        if mnemonic.is_branch() {
            let Operand::Direct(target) = operand else {
                return Err(self.invalid_mode(mnemonic));
            };
            let target = self.eval(target)?;
            return self.branch(mnemonic, target);
        }
        match operand {
            Operand::None => {
                let mode = if opcodes::supports(mnemonic, Mode::Implied, self.cmos) {
                    Mode::Implied
                } else {
                    Mode::Accumulator
                };
                self.opcode(mnemonic, mode)
            }
            Operand::Accumulator => self.opcode(mnemonic, Mode::Accumulator),
            Operand::Immediate(value) => {
                let value = self.eval(value)?;
                self.opcode(mnemonic, Mode::Immediate)?;
                self.emit_byte_value(value, -128)
            }
            Operand::Direct(address) | Operand::IndexedX(address) | Operand::IndexedY(address) => {
                let value = self.eval(address)?;
                let mode = match operand {
                    Operand::IndexedX(_) => Mode::AbsoluteX,
                    Operand::IndexedY(_) => Mode::AbsoluteY,
                    _ => Mode::Absolute,
                };
                let mode = if matches!(mnemonic, Mnemonic::Jmp | Mnemonic::Jsr) {
                    mode
                } else {
                    self.direct_mode(mnemonic, mode, value)?
                };
                self.opcode(mnemonic, mode)?;
                if mode.operand_size() == 1 {
                    self.emit_byte_value(value, 0)
                } else {
                    self.emit_word_value(value, 0, 0xffff)
                }
            }
            Operand::Indirect(address) => {
                let value = self.eval(address)?;
                if mnemonic == Mnemonic::Jmp {
                    self.opcode(mnemonic, Mode::Indirect)?;
                    self.emit_word_value(value, 0, 0xffff)
                } else {
                    self.opcode(mnemonic, Mode::ZeroPageIndirect)?;
                    self.emit_byte_value(value, 0)
                }
            }
            Operand::IndirectX(address) => {
                let value = self.eval(address)?;
                if mnemonic == Mnemonic::Jmp {
                    self.opcode(mnemonic, Mode::AbsoluteIndexedIndirect)?;
                    self.emit_word_value(value, 0, 0xffff)
                } else {
                    self.opcode(mnemonic, Mode::IndirectX)?;
                    self.emit_byte_value(value, 0)
                }
            }
            Operand::IndirectY(address) => {
                let value = self.eval(address)?;
                self.opcode(mnemonic, Mode::IndirectY)?;
                self.emit_byte_value(value, 0)
            }
        }
    }

    fn branch(&mut self, mnemonic: Mnemonic, target: Option<i64>) -> AsmResult<()> {
        let offset = target.map(|t| t - (i64::from(self.pc) + 2));
        let in_range = offset.map_or(true, |o| (-128..=127).contains(&o));
        if !in_range && !self.long_branches.contains(&self.current_line) {
            trace!("line {}: branch becomes long", self.line_number());
            self.long_branches.insert(self.current_line);
            self.grew = true;
        }
        if self.long_branches.contains(&self.current_line) {
            match mnemonic.inverse_branch() {
                Some(inverse) => {
                    self.opcode(inverse, Mode::Relative)?;
                    self.emit(3)?;
                }
                None if mnemonic == Mnemonic::Bra => {}
                None => return Err(self.invalid_mode(mnemonic)),
            }
            self.opcode(Mnemonic::Jmp, Mode::Absolute)?;
            return self.emit_word_value(target, 0, 0xffff);
        }
        self.opcode(mnemonic, Mode::Relative)?;
        self.emit((offset.unwrap_or(0) & 0xff) as u8)
    }
}

/// Expand a `format(...)` template; supports `%d`, `%x`, `%X` and `%%`.
fn format_template(template: &str, values: &[i64]) -> String {
    let mut output = String::new();
    let mut values = values.iter();
    let mut chars = template.chars();
    while let Some(c) = chars.next() {
        if c != '%' {
            output.push(c);
            continue;
        }
        match chars.next() {
            Some('d') => output.push_str(&values.next().copied().unwrap_or(0).to_string()),
            Some('x') => output.push_str(&format!("{:x}", values.next().copied().unwrap_or(0))),
            Some('X') => output.push_str(&format!("{:X}", values.next().copied().unwrap_or(0))),
            Some(other) => output.push(other),
            None => output.push('%'),
        }
    }
    output
}

/// The assembler.
#[derive(Debug, Default, Clone)]
pub struct Assembler {
    predefined: HashMap<String, i64>,
    cmos: bool,
}

impl Assembler {
    /// Create an assembler for the 6502 without predefined symbols.
    pub fn new() -> Self {
        Self::default()
    }

    /// Predefine a symbol, such as the address of a runtime routine.
    pub fn with_symbol(mut self, name: impl Into<String>, value: u16) -> Self {
        self.predefined.insert(name.into(), i64::from(value));
        self
    }

    /// Predefine many symbols.
    pub fn with_symbols<I, S>(mut self, symbols: I) -> Self
    where
        I: IntoIterator<Item = (S, u16)>,
        S: Into<String>,
    {
        for (name, value) in symbols {
            self.predefined.insert(name.into(), i64::from(value));
        }
        self
    }

    /// Assemble `source`.
    pub fn assemble(&self, source: &str) -> AsmResult<AssembledProgram> {
        let lines = source
            .lines()
            .enumerate()
            .map(|(index, text)| parse_line(text, index + 1))
            .collect::<AsmResult<Vec<_>>>()?;

        let mut anonymous = vec![None; lines.len()];
        let mut long_branches = HashSet::new();
        let mut previous: HashMap<String, i64> = HashMap::new();
        let mut previous_anonymous = anonymous.clone();

        for pass in 1..=MAX_PASSES {
            let empty = HashMap::new();
            let (symbols, grew) = {
                let mut state = Pass {
                    lines: &lines,
                    predefined: &self.predefined,
                    final_pass: false,
                    cmos: self.cmos,
                    pc: 0,
                    origin: None,
                    bytes: Vec::new(),
                    scope: Vec::new(),
                    symbols: HashMap::new(),
                    previous: if pass == 1 { &empty } else { &previous },
                    anonymous: &mut anonymous,
                    long_branches: &mut long_branches,
                    grew: false,
                    current_line: 0,
                };
                state.run()?;
                (state.symbols, state.grew)
            };
            let settled = pass > 1 && !grew && symbols == previous && anonymous == previous_anonymous;
            trace!("assembler pass {}: {} symbols", pass, symbols.len());
            previous = symbols;
            previous_anonymous = anonymous.clone();
            if settled {
                return self.final_pass(&lines, &previous, &mut anonymous, &mut long_branches, pass);
            }
        }
        Err(AssemblerError::NotConverging(MAX_PASSES))
    }

    fn final_pass(
        &self,
        lines: &[Line],
        previous: &HashMap<String, i64>,
        anonymous: &mut Vec<Option<u16>>,
        long_branches: &mut HashSet<usize>,
        passes: usize,
    ) -> AsmResult<AssembledProgram> {
        let mut state = Pass {
            lines,
            predefined: &self.predefined,
            final_pass: true,
            cmos: self.cmos,
            pc: 0,
            origin: None,
            bytes: Vec::new(),
            scope: Vec::new(),
            symbols: HashMap::new(),
            previous,
            anonymous,
            long_branches,
            grew: false,
            current_line: 0,
        };
        state.run()?;
        let load_address = state.origin.ok_or(AssemblerError::Empty)?;
        debug!(
            "assembled {} bytes at ${:04x} in {} passes",
            state.bytes.len(),
            load_address,
            passes + 1
        );
        Ok(AssembledProgram {
            load_address,
            bytes: state.bytes,
            symbols: state
                .symbols
                .into_iter()
                .map(|(name, value)| (name, (value & 0xffff) as u16))
                .collect(),
            cmos: state.cmos,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn assemble(source: &str) -> AssembledProgram {
        Assembler::new().assemble(source).unwrap()
    }

    #[test]
    fn test_simple_program() {
        let program = assemble("* = $c000\n  lda  #1\n  sta  $d020\n  rts\n");
        assert_eq!(program.load_address, 0xc000);
        assert_eq!(program.bytes, vec![0xa9, 0x01, 0x8d, 0x20, 0xd0, 0x60]);
    }

    #[test]
    fn test_zero_page_forms_for_forward_symbols() {
        let program = assemble("* = $1000\n  lda  value\n  sta  value,x\n  rts\nvalue = $fb\n");
        assert_eq!(program.bytes, vec![0xa5, 0xfb, 0x95, 0xfb, 0x60]);
    }

    #[test]
    fn test_anonymous_labels() {
        let source = "* = $1000\n-  dex\n  bne  -\n  beq  +\n  nop\n+  rts\n";
        let program = assemble(source);
        assert_eq!(
            program.bytes,
            vec![0xca, 0xd0, 0xfd, 0xf0, 0x01, 0xea, 0x60]
        );
    }

    #[test]
    fn test_proc_scopes() {
        let source = "* = $1000\nmain\t.proc\nstart\t.proc\n  jsr  helper\n  rts\n  .pend\nhelper\trts\n  .pend\n  jmp  main.start\n";
        let program = assemble(source);
        assert_eq!(program.symbol("main.start"), Some(0x1000));
        assert_eq!(program.symbol("main.helper"), Some(0x1004));
        assert_eq!(&program.bytes[..3], &[0x20, 0x04, 0x10]);
        assert_eq!(&program.bytes[5..], &[0x4c, 0x00, 0x10]);
    }

    #[test]
    fn test_data_directives() {
        let source = "* = $2000\nt\t.byte  1, $ff, -1\n  .char  -2\n  .word  $1234, t\n  .sint  -1\n  .null  'hi'\n  .fill  2, 7\n";
        let program = assemble(source);
        assert_eq!(
            program.bytes,
            vec![1, 0xff, 0xff, 0xfe, 0x34, 0x12, 0x00, 0x20, 0xff, 0xff, b'h', b'i', 0, 7, 7]
        );
    }

    #[test]
    fn test_basic_stub() {
        let source = "* = $0801\n  .word  (+), 2026\n  .null  $9e, format(' %d ', start), $3a, $8f, ' prog8'\n+\t.word  0\nstart\trts\n";
        let program = assemble(source);
        let start = program.symbol("start").unwrap();
        let text = String::from_utf8_lossy(&program.bytes[4..]).to_string();
        assert!(text.contains(&format!(" {} ", start)));
        assert_eq!(program.bytes[2..4], 2026u16.to_le_bytes());
    }

    #[test]
    fn test_long_branch_rewrite() {
        let mut source = String::from("* = $1000\n  beq  far\n");
        for _ in 0..200 {
            source.push_str("  nop\n");
        }
        source.push_str("far\trts\n");
        let program = assemble(&source);
        assert_eq!(&program.bytes[..5], &[0xd0, 0x03, 0x4c, 0xcd, 0x10]);
    }

    #[test]
    fn test_byte_selection_and_comments() {
        let program = assemble("* = $1000\nv = $1234 ; comment\n  lda  #<v\n  ldy  #>(v+1)\n  lda  ';'\n");
        assert_eq!(program.bytes, vec![0xa9, 0x34, 0xa0, 0x12, 0xa5, 0x3b]);
    }

    #[test]
    fn test_cmos_instructions_need_cpu_directive() {
        let error = Assembler::new().assemble("* = $1000\n  phx\n").unwrap_err();
        assert!(matches!(error, AssemblerError::InvalidMode { line: 2, .. }));
        let program = assemble("  .cpu  '65c02'\n* = $1000\n  phx\n  stz  $d020\n  bra  *\n");
        assert!(program.cmos);
        assert_eq!(program.bytes, vec![0xda, 0x9c, 0x20, 0xd0, 0x80, 0xfe]);
    }

    #[test]
    fn test_indirect_modes() {
        let program = assemble("* = $1000\nptr = $fb\n  lda  (ptr),y\n  sta  (ptr,x)\n  jmp  (ptr)\n  asl  a\n");
        assert_eq!(
            program.bytes,
            vec![0xb1, 0xfb, 0x81, 0xfb, 0x6c, 0xfb, 0x00, 0x0a]
        );
    }

    #[test]
    fn test_undefined_symbol() {
        let error = Assembler::new().assemble("* = $1000\n  jsr  nowhere\n").unwrap_err();
        assert_eq!(
            error,
            AssemblerError::UndefinedSymbol {
                line: 2,
                name: "nowhere".to_string()
            }
        );
    }

    #[test]
    fn test_predefined_symbols() {
        let program = Assembler::new()
            .with_symbol("floats.FADD", 0xff00)
            .assemble("* = $1000\n  jsr  floats.FADD\n")
            .unwrap();
        assert_eq!(program.bytes, vec![0x20, 0x00, 0xff]);
        assert_eq!(program.to_prg()[..2], [0x00, 0x10]);
    }
}
