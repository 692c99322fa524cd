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

//! Control flow code generation.
//!
//! This module provides code generation for:
//! - if/else statements, including the `if c goto L` shortcut
//! - repeat loops with byte or word counters
//! - when statements as compare-and-branch chains
//! - branches on CPU status flags

use super::comparisons::ComparisonEmitter;
use super::expressions::ExpressionEmitter;
use super::labels::LabelManager;
use super::statements::StatementEmitter;
use super::types::to_hex;
use super::CodegenSession;
use crate::ast::{
    ConditionalBranch, DataType, Expr, IfElse, JumpTarget, RepeatLoop, Statement, StatementKind,
    WhenStatement,
};
use crate::error::{CompileError, ErrorCode, Result, Span};

/// Extension trait for control flow statements.
pub trait ControlFlowEmitter {
    /// Translate an if statement.
    fn translate_if(&mut self, ifelse: &IfElse) -> Result<()>;

    /// Translate a repeat loop.
    fn translate_repeat(&mut self, repeat: &RepeatLoop, span: Span) -> Result<()>;

    /// Translate a when statement.
    fn translate_when(&mut self, when: &WhenStatement) -> Result<()>;

    /// Translate a branch on a status flag.
    fn translate_conditional_branch(&mut self, branch: &ConditionalBranch) -> Result<()>;
}

/// The label a lone `goto` in `statements` jumps to, if that is all they do.
fn single_goto(statements: &[Statement], session: &CodegenSession<'_>) -> Option<String> {
    match statements {
        [Statement {
            kind: StatementKind::Jump(target @ (JumpTarget::Label(_) | JumpTarget::Address(_))),
            ..
        }] => Some(session.jump_target(target)),
        _ => None,
    }
}

impl ControlFlowEmitter for CodegenSession<'_> {
    fn translate_if(&mut self, ifelse: &IfElse) -> Result<()> {
        if ifelse.else_branch.is_empty() {
            if let Some(target) = single_goto(&ifelse.then_branch, self) {
                return self.translate_condition_branch(&ifelse.condition, &target, false);
            }
            let end = self.make_label("if_end");
            self.translate_condition_branch(&ifelse.condition, &end, true)?;
            self.translate_statements(&ifelse.then_branch)?;
            self.out(&end);
        } else {
            let else_label = self.make_label("if_else");
            let end = self.make_label("if_end");
            self.translate_condition_branch(&ifelse.condition, &else_label, true)?;
            self.translate_statements(&ifelse.then_branch)?;
            self.jmp(&end);
            self.out(&else_label);
            self.translate_statements(&ifelse.else_branch)?;
            self.out(&end);
        }
        Ok(())
    }

    fn translate_repeat(&mut self, repeat: &RepeatLoop, span: Span) -> Result<()> {
        let count = match &repeat.count {
            None => {
                let label = self.make_label("repeat");
                self.out(&label);
                self.loop_body(&repeat.body)?;
                self.out(&format!("  jmp  {}", label));
                return Ok(());
            }
            Some(count) => count,
        };

        if let Some(value) = count.constant_value() {
            if value.fract() != 0.0 || !(0.0..=65535.0).contains(&value) {
                return Err(CompileError::new(
                    ErrorCode::InvalidRepeatCount,
                    format!("invalid repeat count {}, must be 0..65535", value),
                    count.span,
                ));
            }
            let value = value as u32;
            return match value {
                0 => Ok(()),
                1 => self.translate_statements(&repeat.body),
                2..=256 => {
                    let counter = self.repeat_counter(DataType::Ubyte);
                    self.out(&format!("  lda  #{} |  sta  {}", to_hex((value & 0xff) as i32), counter));
                    self.byte_counted_loop(&counter, &repeat.body)
                }
                _ => {
                    let counter = self.repeat_counter(DataType::Uword);
                    self.out(&format!(
                        "  lda  #<{v} |  sta  {c} |  lda  #>{v} |  sta  {c}+1",
                        v = to_hex(value as i32),
                        c = counter
                    ));
                    self.word_counted_loop(&counter, &repeat.body)
                }
            };
        }

        match count.dt {
            dt if dt.is_byte() => {
                let counter = self.repeat_counter(DataType::Ubyte);
                let end = self.make_label("repeat_end");
                self.count_to_a(count)?;
                self.out(&format!("  beq  {} |  sta  {}", end, counter));
                self.byte_counted_loop(&counter, &repeat.body)?;
                self.out(&end);
                Ok(())
            }
            dt if dt.is_word() => {
                let counter = self.repeat_counter(DataType::Uword);
                self.expr_to_ay(count)?;
                self.out(&format!("  sta  {c} |  sty  {c}+1", c = counter));
                self.word_counted_loop(&counter, &repeat.body)
            }
            dt => Err(CompileError::new(
                ErrorCode::InvalidRepeatCount,
                format!("repeat count must be an integer, not {}", dt),
                span,
            )),
        }
    }

    fn translate_when(&mut self, when: &WhenStatement) -> Result<()> {
        let end = self.make_label("when_end");
        let word = when.condition.dt.is_word();
        if word {
            self.expr_to_ay(&when.condition)?;
        } else {
            self.expr_to_a(&when.condition)?;
        }

        let mut choices = Vec::new();
        let mut else_body: &[Statement] = &[];
        for choice in &when.choices {
            let values = match &choice.values {
                Some(values) => values,
                None => {
                    else_body = &choice.body;
                    continue;
                }
            };
            let label = self.make_label("choice");
            for value in values {
                let number = value.constant_int().ok_or_else(|| {
                    CompileError::internal("when choice values must be constants", value.span)
                })?;
                if word {
                    self.out(&format!(
                        "  cpy  #{} |  bne  + |  cmp  #{} |  beq  {} | +",
                        to_hex((number >> 8) & 0xff),
                        to_hex(number & 0xff),
                        label
                    ));
                } else {
                    self.out(&format!("  cmp  #{} |  beq  {}", to_hex(number & 0xff), label));
                }
            }
            choices.push((label, &choice.body));
        }

        self.translate_statements(else_body)?;
        self.out(&format!("  jmp  {}", end));
        for (label, body) in choices {
            self.out(&label);
            self.translate_statements(body)?;
            self.out(&format!("  jmp  {}", end));
        }
        self.out(&end);
        Ok(())
    }

    fn translate_conditional_branch(&mut self, branch: &ConditionalBranch) -> Result<()> {
        if branch.else_branch.is_empty() {
            if let Some(target) = single_goto(&branch.then_branch, self) {
                self.out(&format!("  {}  {}", branch.condition.instruction(), target));
                return Ok(());
            }
            let end = self.make_label("branch_end");
            self.out(&format!("  {}  {}", branch.condition.complement().instruction(), end));
            self.translate_statements(&branch.then_branch)?;
            self.out(&end);
        } else {
            let else_label = self.make_label("branch_else");
            let end = self.make_label("branch_end");
            self.out(&format!(
                "  {}  {}",
                branch.condition.complement().instruction(),
                else_label
            ));
            self.translate_statements(&branch.then_branch)?;
            self.jmp(&end);
            self.out(&else_label);
            self.translate_statements(&branch.else_branch)?;
            self.out(&end);
        }
        Ok(())
    }
}

impl CodegenSession<'_> {
    fn translate_statements(&mut self, statements: &[Statement]) -> Result<()> {
        for statement in statements {
            self.translate_statement(statement)?;
        }
        Ok(())
    }

    fn repeat_counter(&mut self, dt: DataType) -> String {
        let nested = self.repeat_nesting > 0;
        self.counter_variable(dt, nested)
    }

    fn loop_body(&mut self, body: &[Statement]) -> Result<()> {
        self.repeat_nesting += 1;
        let result = self.translate_statements(body);
        self.repeat_nesting -= 1;
        result
    }

    /// A byte count in A with the zero flag set from it.
    fn count_to_a(&mut self, count: &Expr) -> Result<()> {
        match self.simple_operand(count)? {
            Some(operand) => self.out(&format!("  lda  {}", operand.lo())),
            None => {
                self.expr_to_a(count)?;
                self.out("  cmp  #0");
            }
        }
        Ok(())
    }

    fn byte_counted_loop(&mut self, counter: &str, body: &[Statement]) -> Result<()> {
        let label = self.make_label("repeat");
        self.out(&label);
        self.loop_body(body)?;
        self.out(&format!("  dec  {} |  bne  {}", counter, label));
        Ok(())
    }

    fn word_counted_loop(&mut self, counter: &str, body: &[Statement]) -> Result<()> {
        let label = self.make_label("repeat");
        let end = self.make_label("repeat_end");
        self.out(&format!(
            "{l}\tlda  {c} |  bne  + |  lda  {c}+1 |  beq  {e} | +  lda  {c} |  bne  + |  dec  {c}+1 | +  dec  {c}",
            l = label,
            c = counter,
            e = end
        ));
        self.loop_body(body)?;
        self.out(&format!("  jmp  {}", label));
        self.out(&end);
        Ok(())
    }
}
