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

//! Expression parsing for the reader.
//!
//! Binary operators are parsed by precedence climbing over
//! [`BinaryOp::precedence`]; `**` is right associative, everything else
//! left associative. `not` binds looser than comparisons, `as` casts bind
//! tighter than any binary operator.

use super::helpers::ParserHelpers;
use super::tokens::Token;
use super::Parser;
use crate::ast::{BinaryOp, DataType, Expr, ExprKind, PrefixOp, ScopedName};
use crate::error::{CompileError, ErrorCode, Span};

/// Provisional datatype of integer literals; the resolver assigns the real one.
pub const UNTYPED: DataType = DataType::Ubyte;

/// Extension trait for expression parsing.
pub trait ExpressionParser {
    /// Parse an expression.
    fn parse_expression(&mut self) -> Result<Expr, CompileError>;

    /// Parse a binary expression whose operators bind at least as tight as `min_precedence`.
    fn parse_binary_expression(&mut self, min_precedence: u8) -> Result<Expr, CompileError>;

    /// Try to parse a binary operator.
    fn try_parse_binary_op(&self) -> Option<BinaryOp>;

    /// Parse a prefix expression, including trailing `as` casts.
    fn parse_unary_expression(&mut self) -> Result<Expr, CompileError>;

    /// Parse a primary expression with its postfix calls and indexing.
    fn parse_postfix_expression(&mut self) -> Result<Expr, CompileError>;

    /// Parse a possibly dotted name.
    fn parse_scoped_name(&mut self) -> Result<(ScopedName, Span), CompileError>;

    /// Parse a parenthesized, comma separated argument list.
    fn parse_arguments(&mut self) -> Result<Vec<Expr>, CompileError>;

    /// Parse a scalar datatype keyword.
    fn parse_scalar_type(&mut self) -> Result<DataType, CompileError>;
}

impl<'a> ExpressionParser for Parser<'a> {
    fn parse_expression(&mut self) -> Result<Expr, CompileError> {
        self.parse_binary_expression(0)
    }

    fn parse_binary_expression(&mut self, min_precedence: u8) -> Result<Expr, CompileError> {
        let mut left = if self.check(&Token::Not) {
            let (_, start) = self.advance().ok_or_else(|| self.error(ErrorCode::ExpectedExpression, "expected expression"))?;
            let operand = self.parse_binary_expression(BinaryOp::Equal.precedence())?;
            let span = start.merge(&operand.span);
            Expr::new(
                ExprKind::Prefix {
                    op: PrefixOp::Not,
                    operand: Box::new(operand),
                },
                DataType::Ubyte,
                span,
            )
        } else {
            self.parse_unary_expression()?
        };

        while let Some(op) = self.try_parse_binary_op() {
            let precedence = op.precedence();
            if precedence < min_precedence {
                break;
            }
            self.advance();
            self.skip_newlines();
            let next = if op == BinaryOp::Pow {
                precedence
            } else {
                precedence + 1
            };
            let right = self.parse_binary_expression(next)?;
            left = Expr::binary(left, op, right, UNTYPED);
        }

        Ok(left)
    }

    fn try_parse_binary_op(&self) -> Option<BinaryOp> {
        let op = match self.peek()? {
            Token::Plus => BinaryOp::Add,
            Token::Minus => BinaryOp::Sub,
            Token::Star => BinaryOp::Mul,
            Token::Slash => BinaryOp::Div,
            Token::Percent => BinaryOp::Remainder,
            Token::StarStar => BinaryOp::Pow,
            Token::Ampersand => BinaryOp::BitAnd,
            Token::Pipe => BinaryOp::BitOr,
            Token::Caret => BinaryOp::BitXor,
            Token::ShiftLeft => BinaryOp::ShiftLeft,
            Token::ShiftRight => BinaryOp::ShiftRight,
            Token::And => BinaryOp::And,
            Token::Or => BinaryOp::Or,
            Token::Xor => BinaryOp::Xor,
            Token::Equal => BinaryOp::Equal,
            Token::NotEqual => BinaryOp::NotEqual,
            Token::Less => BinaryOp::Less,
            Token::Greater => BinaryOp::Greater,
            Token::LessEqual => BinaryOp::LessEqual,
            Token::GreaterEqual => BinaryOp::GreaterEqual,
            _ => return None,
        };
        Some(op)
    }

    fn parse_unary_expression(&mut self) -> Result<Expr, CompileError> {
        let op = match self.peek() {
            Some(Token::Minus) => Some(PrefixOp::Negate),
            Some(Token::Plus) => Some(PrefixOp::Plus),
            Some(Token::Tilde) => Some(PrefixOp::Invert),
            _ => None,
        };
        let mut expr = match op {
            Some(op) => {
                let start = self.peek_span().unwrap_or_default();
                self.advance();
                let operand = self.parse_unary_expression()?;
                let span = start.merge(&operand.span);
                let dt = operand.dt;
                Expr::new(
                    ExprKind::Prefix {
                        op,
                        operand: Box::new(operand),
                    },
                    dt,
                    span,
                )
            }
            None => self.parse_postfix_expression()?,
        };

        while self.match_token(&Token::As) {
            let dt = self.parse_scalar_type()?;
            let span = expr.span.merge(&self.previous_span());
            expr = Expr::new(
                ExprKind::Typecast {
                    expr: Box::new(expr),
                    implicit: false,
                },
                dt,
                span,
            );
        }
        Ok(expr)
    }

    fn parse_postfix_expression(&mut self) -> Result<Expr, CompileError> {
        let Some((token, span)) = self.advance() else {
            return Err(self.error(ErrorCode::UnexpectedEndOfFile, "expected expression, found end of file"));
        };
        match token {
            Token::Integer(value) => Ok(Expr::number(f64::from(value), UNTYPED, span)),
            Token::Float(value) => Ok(Expr::number(value, DataType::Float, span)),
            Token::Char(value) => Ok(Expr::number(f64::from(value), DataType::Ubyte, span)),
            Token::Str(text) => Ok(self.hoist_string(text, span)),
            Token::LeftParen => {
                self.skip_newlines();
                let expr = self.parse_expression()?;
                self.skip_newlines();
                self.expect(&Token::RightParen, "expected ')' after expression")?;
                Ok(expr)
            }
            Token::Ampersand => {
                let (name, name_span) = self.parse_scoped_name()?;
                Ok(Expr::new(ExprKind::AddressOf(name), DataType::Uword, span.merge(&name_span)))
            }
            Token::At => {
                self.expect(&Token::LeftParen, "expected '(' after '@'")?;
                let address = self.parse_expression()?;
                self.expect(&Token::RightParen, "expected ')' after memory address")?;
                let span = span.merge(&self.previous_span());
                Ok(Expr::new(
                    ExprKind::DirectMemoryRead(Box::new(address)),
                    DataType::Ubyte,
                    span,
                ))
            }
            Token::Identifier(_) => {
                self.position -= 1;
                let (name, name_span) = self.parse_scoped_name()?;
                if self.check(&Token::LeftParen) {
                    let args = self.parse_arguments()?;
                    let span = name_span.merge(&self.previous_span());
                    Ok(Expr::new(ExprKind::FunctionCall { target: name, args }, UNTYPED, span))
                } else if self.match_token(&Token::LeftBracket) {
                    let index = self.parse_expression()?;
                    self.expect(&Token::RightBracket, "expected ']' after array index")?;
                    let span = name_span.merge(&self.previous_span());
                    Ok(Expr::new(
                        ExprKind::ArrayIndexed {
                            array: name,
                            index: Box::new(index),
                        },
                        UNTYPED,
                        span,
                    ))
                } else {
                    Ok(Expr::identifier(name, UNTYPED, name_span))
                }
            }
            other => {
                self.position -= 1;
                Err(self.error(
                    ErrorCode::ExpectedExpression,
                    format!("expected expression, found {}", other),
                ))
            }
        }
    }

    fn parse_scoped_name(&mut self) -> Result<(ScopedName, Span), CompileError> {
        let (first, start) = self.expect_identifier("expected name")?;
        let mut parts = vec![first];
        let mut span = start;
        while self.check(&Token::Dot) {
            self.advance();
            let (part, part_span) = self.expect_identifier("expected name after '.'")?;
            parts.push(part);
            span = span.merge(&part_span);
        }
        Ok((ScopedName::new(parts), span))
    }

    fn parse_arguments(&mut self) -> Result<Vec<Expr>, CompileError> {
        self.expect(&Token::LeftParen, "expected '('")?;
        let mut args = Vec::new();
        self.skip_newlines();
        if !self.check(&Token::RightParen) {
            loop {
                args.push(self.parse_expression()?);
                self.skip_newlines();
                if !self.match_token(&Token::Comma) {
                    break;
                }
                self.skip_newlines();
            }
        }
        self.expect(&Token::RightParen, "expected ')' after arguments")?;
        Ok(args)
    }

    fn parse_scalar_type(&mut self) -> Result<DataType, CompileError> {
        let dt = match self.peek() {
            Some(Token::Ubyte) => DataType::Ubyte,
            Some(Token::Byte) => DataType::Byte,
            Some(Token::Uword) => DataType::Uword,
            Some(Token::Word) => DataType::Word,
            Some(Token::FloatType) => DataType::Float,
            Some(Token::StrType) => DataType::Str,
            Some(other) => {
                return Err(self.error(ErrorCode::ExpectedType, format!("expected datatype, found {}", other)))
            }
            None => return Err(self.error(ErrorCode::UnexpectedEndOfFile, "expected datatype, found end of file")),
        };
        self.advance();
        Ok(dt)
    }
}
