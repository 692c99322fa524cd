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

//! Statement parsing for the reader.
//!
//! Statements end at a newline or at the closing brace of their block.
//! Compound assignments are expanded here (`x += e` becomes `x = x + e`);
//! everything else keeps its source shape for the resolver.

use super::declarations::DeclarationParser;
use super::expressions::{ExpressionParser, UNTYPED};
use super::helpers::ParserHelpers;
use super::tokens::Token;
use super::Parser;
use crate::ast::{
    AssignTarget, Assignment, BinaryOp, ConditionalBranch, Expr, ExprKind, IfElse, JumpTarget,
    RegisterOrPair, RepeatLoop, Statement, StatementKind, WhenChoice, WhenStatement,
};
use crate::error::{CompileError, ErrorCode};

/// Extension trait for statement parsing.
pub trait StatementParser {
    /// Parse `{ statements }`.
    fn parse_statement_block(&mut self) -> Result<Vec<Statement>, CompileError>;

    /// Parse one statement.
    ///
    /// Declarations are added to the current scope and produce no statement
    /// unless they assign an initial value.
    fn parse_statement(&mut self) -> Result<Option<Statement>, CompileError>;

    /// Parse an if statement with its else branches.
    fn parse_if(&mut self) -> Result<Statement, CompileError>;

    /// Parse a status flag branch (`if_cs`, `if_z`, ...).
    fn parse_conditional_branch(&mut self) -> Result<Statement, CompileError>;

    /// Parse a when statement.
    fn parse_when(&mut self) -> Result<Statement, CompileError>;

    /// Parse the target of a goto or gosub.
    fn parse_jump_target(&mut self) -> Result<JumpTarget, CompileError>;

    /// Parse an assignment, compound assignment, increment or call.
    fn parse_assignment_or_call(&mut self) -> Result<Statement, CompileError>;
}

impl<'a> StatementParser for Parser<'a> {
    fn parse_statement_block(&mut self) -> Result<Vec<Statement>, CompileError> {
        self.skip_newlines();
        self.expect(&Token::LeftBrace, "expected '{'")?;
        let mut statements = Vec::new();
        loop {
            self.skip_newlines();
            if self.check(&Token::RightBrace) || self.is_at_end() {
                break;
            }
            if let Some(statement) = self.parse_statement()? {
                statements.push(statement);
            }
            self.expect_end_of_statement()?;
        }
        self.expect(&Token::RightBrace, "expected '}' at the end of the block")?;
        Ok(statements)
    }

    fn parse_statement(&mut self) -> Result<Option<Statement>, CompileError> {
        if self.is_declaration_start() {
            return self.parse_variable_declaration();
        }
        let start = self.peek_span().unwrap_or_else(|| self.previous_span());
        let kind = match self.peek() {
            Some(Token::InlineAsm(text)) => {
                let text = text.clone();
                self.advance();
                StatementKind::InlineAssembly(text)
            }
            Some(Token::If) => return self.parse_if().map(Some),
            Some(Token::IfFlag(_)) => return self.parse_conditional_branch().map(Some),
            Some(Token::When) => return self.parse_when().map(Some),
            Some(Token::Repeat) => {
                self.advance();
                let count = if self.check(&Token::LeftBrace) {
                    None
                } else {
                    Some(self.parse_expression()?)
                };
                let body = self.parse_statement_block()?;
                StatementKind::Repeat(RepeatLoop { count, body })
            }
            Some(Token::While) => {
                self.advance();
                let condition = self.parse_expression()?;
                let body = self.parse_statement_block()?;
                StatementKind::While { condition, body }
            }
            Some(Token::Do) => {
                self.advance();
                let body = self.parse_statement_block()?;
                self.skip_newlines();
                self.expect(&Token::Until, "expected 'until' after the do block")?;
                let condition = self.parse_expression()?;
                StatementKind::Until { body, condition }
            }
            Some(Token::Break) => {
                self.advance();
                StatementKind::Break
            }
            Some(Token::Goto) => {
                self.advance();
                StatementKind::Jump(self.parse_jump_target()?)
            }
            Some(Token::Gosub) => {
                self.advance();
                StatementKind::GoSub(self.parse_jump_target()?)
            }
            Some(Token::Return) => {
                self.advance();
                let value = if self.check_any(&[Token::Newline, Token::RightBrace]) || self.is_at_end() {
                    None
                } else {
                    Some(self.parse_expression()?)
                };
                StatementKind::Return(value)
            }
            Some(Token::LeftBrace) => StatementKind::AnonymousScope(self.parse_statement_block()?),
            Some(Token::Identifier(name)) if self.peek_ahead(1) == Some(&Token::Colon) => {
                let name = name.clone();
                self.advance();
                self.advance();
                StatementKind::Label(name)
            }
            Some(_) => return self.parse_assignment_or_call().map(Some),
            None => {
                return Err(self.error(ErrorCode::UnexpectedEndOfFile, "expected statement, found end of file"))
            }
        };
        let span = start.merge(&self.previous_span());
        Ok(Some(Statement::new(kind, span)))
    }

    fn parse_if(&mut self) -> Result<Statement, CompileError> {
        let start = self.peek_span().unwrap_or_default();
        self.expect(&Token::If, "expected 'if'")?;
        let condition = self.parse_expression()?;
        let then_branch = self.parse_branch_body()?;
        let else_branch = self.parse_else()?;
        let span = start.merge(&self.previous_span());
        Ok(Statement::new(
            StatementKind::If(IfElse {
                condition,
                then_branch,
                else_branch,
            }),
            span,
        ))
    }

    fn parse_conditional_branch(&mut self) -> Result<Statement, CompileError> {
        let start = self.peek_span().unwrap_or_default();
        let condition = match self.advance() {
            Some((Token::IfFlag(condition), _)) => condition,
            _ => return Err(CompileError::new(ErrorCode::ExpectedToken, "expected status flag branch", start)),
        };
        let then_branch = self.parse_branch_body()?;
        let else_branch = self.parse_else()?;
        let span = start.merge(&self.previous_span());
        Ok(Statement::new(
            StatementKind::ConditionalBranch(ConditionalBranch {
                condition,
                then_branch,
                else_branch,
            }),
            span,
        ))
    }

    fn parse_when(&mut self) -> Result<Statement, CompileError> {
        let start = self.peek_span().unwrap_or_default();
        self.expect(&Token::When, "expected 'when'")?;
        let condition = self.parse_expression()?;
        self.skip_newlines();
        self.expect(&Token::LeftBrace, "expected '{' after the when value")?;
        let mut choices = Vec::new();
        loop {
            self.skip_newlines();
            if self.check(&Token::RightBrace) || self.is_at_end() {
                break;
            }
            let choice_start = self.peek_span().unwrap_or_default();
            let values = if self.match_token(&Token::Else) {
                None
            } else {
                let mut values = vec![self.parse_expression()?];
                while self.match_token(&Token::Comma) {
                    values.push(self.parse_expression()?);
                }
                Some(values)
            };
            self.expect(&Token::Arrow, "expected '->' after the choice values")?;
            let body = self.parse_branch_body()?;
            choices.push(WhenChoice {
                values,
                body,
                span: choice_start.merge(&self.previous_span()),
            });
            self.expect_end_of_statement()?;
        }
        self.expect(&Token::RightBrace, "expected '}' at the end of the when statement")?;
        let span = start.merge(&self.previous_span());
        Ok(Statement::new(
            StatementKind::When(WhenStatement { condition, choices }),
            span,
        ))
    }

    fn parse_jump_target(&mut self) -> Result<JumpTarget, CompileError> {
        if let Some(Token::Integer(address)) = self.peek() {
            let address = *address;
            let span = self.peek_span().unwrap_or_default();
            self.advance();
            return u16::try_from(address).map(JumpTarget::Address).map_err(|_| {
                CompileError::new(ErrorCode::ValueOutOfRange, "jump address is out of range", span)
            });
        }
        let (name, _) = self.parse_scoped_name()?;
        Ok(JumpTarget::Label(name))
    }

    fn parse_assignment_or_call(&mut self) -> Result<Statement, CompileError> {
        let start = self.peek_span().unwrap_or_default();
        let target = if self.check(&Token::At) && matches!(self.peek_ahead(1), Some(Token::Identifier(_))) {
            self.advance();
            let (name, span) = self.expect_identifier("expected register name")?;
            let register = RegisterOrPair::from_name(&name).ok_or_else(|| {
                CompileError::new(
                    ErrorCode::InvalidAssignmentTarget,
                    format!("'{}' is not a register or register pair", name),
                    span,
                )
            })?;
            self.expect(&Token::Assign, "expected '=' after the register")?;
            let value = self.parse_expression()?;
            let span = start.merge(&value.span);
            return Ok(Statement::new(
                StatementKind::Assignment(Assignment {
                    target: AssignTarget::Register(register),
                    dt: UNTYPED,
                    value,
                }),
                span,
            ));
        } else {
            self.parse_unary_expression()?
        };

        if let ExprKind::FunctionCall { target: callee, args } = &target.kind {
            return Ok(Statement::new(
                StatementKind::FunctionCall {
                    target: callee.clone(),
                    args: args.clone(),
                },
                start.merge(&self.previous_span()),
            ));
        }

        let Some((token, op_span)) = self.advance() else {
            return Err(self.error(ErrorCode::UnexpectedEndOfFile, "expected assignment, found end of file"));
        };
        let assign_target = as_assign_target(&target)?;
        let kind = match token {
            Token::PlusPlus | Token::MinusMinus => StatementKind::PostIncrDecr {
                target: assign_target,
                dt: UNTYPED,
                increment: token == Token::PlusPlus,
            },
            Token::Assign => StatementKind::Assignment(Assignment {
                target: assign_target,
                dt: UNTYPED,
                value: self.parse_expression()?,
            }),
            other => {
                let Some(op) = compound_operator(&other) else {
                    return Err(CompileError::new(
                        ErrorCode::UnexpectedToken,
                        format!("expected assignment or call, found {}", other),
                        op_span,
                    ));
                };
                let operand = self.parse_expression()?;
                let value = Expr::binary(target.clone(), op, operand, UNTYPED);
                StatementKind::Assignment(Assignment {
                    target: assign_target,
                    dt: UNTYPED,
                    value,
                })
            }
        };
        Ok(Statement::new(kind, start.merge(&self.previous_span())))
    }
}

impl Parser<'_> {
    /// The body of an if, else or when choice: a block or a single statement.
    fn parse_branch_body(&mut self) -> Result<Vec<Statement>, CompileError> {
        self.skip_newlines();
        if self.check(&Token::LeftBrace) {
            return self.parse_statement_block();
        }
        Ok(self.parse_statement()?.into_iter().collect())
    }

    fn parse_else(&mut self) -> Result<Vec<Statement>, CompileError> {
        if self.peek_past_newlines() != Some(&Token::Else) {
            return Ok(Vec::new());
        }
        self.skip_newlines();
        self.expect(&Token::Else, "expected 'else'")?;
        if self.check(&Token::If) {
            return Ok(vec![self.parse_if()?]);
        }
        self.parse_branch_body()
    }
}

/// The binary operator of a compound assignment token.
fn compound_operator(token: &Token) -> Option<BinaryOp> {
    let op = match token {
        Token::PlusAssign => BinaryOp::Add,
        Token::MinusAssign => BinaryOp::Sub,
        Token::StarAssign => BinaryOp::Mul,
        Token::SlashAssign => BinaryOp::Div,
        Token::PercentAssign => BinaryOp::Remainder,
        Token::AmpersandAssign => BinaryOp::BitAnd,
        Token::PipeAssign => BinaryOp::BitOr,
        Token::CaretAssign => BinaryOp::BitXor,
        Token::ShiftLeftAssign => BinaryOp::ShiftLeft,
        Token::ShiftRightAssign => BinaryOp::ShiftRight,
        _ => return None,
    };
    Some(op)
}

/// The assignment target an expression names.
fn as_assign_target(expr: &Expr) -> Result<AssignTarget, CompileError> {
    match &expr.kind {
        ExprKind::Identifier(name) => Ok(AssignTarget::Variable(name.clone())),
        ExprKind::DirectMemoryRead(address) => Ok(AssignTarget::Memory(address.clone())),
        ExprKind::ArrayIndexed { array, index } => Ok(AssignTarget::ArrayElement {
            array: array.clone(),
            index: index.clone(),
        }),
        _ => Err(CompileError::new(
            ErrorCode::InvalidAssignmentTarget,
            format!("cannot assign to '{}'", expr),
            expr.span,
        )),
    }
}
