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

//! Statement translation.
//!
//! This module dispatches every statement kind to its code generator and
//! handles the simple ones directly:
//! - Post increment and decrement
//! - Jumps, gosubs and returns
//! - Labels and inline assembly

use super::assignments::AssignmentEmitter;
use super::control_flow::ControlFlowEmitter;
use super::expressions::ExpressionEmitter;
use super::functions::FunctionEmitter;
use super::labels::LabelManager;
use super::types::to_hex;
use super::CodegenSession;
use crate::ast::{
    AssignTarget, Assignment, BinaryOp, DataType, Expr, ExprKind, JumpTarget, RegisterOrPair,
    Statement, StatementKind,
};
use crate::error::{CompileError, Result, Span};

/// Extension trait for statements.
pub trait StatementEmitter {
    /// Translate one statement.
    fn translate_statement(&mut self, statement: &Statement) -> Result<()>;
}

impl StatementEmitter for CodegenSession<'_> {
    fn translate_statement(&mut self, statement: &Statement) -> Result<()> {
        let span = statement.span;
        match &statement.kind {
            StatementKind::Assignment(assignment) => self.translate_assignment(assignment),
            StatementKind::PostIncrDecr {
                target,
                dt,
                increment,
            } => self.translate_post_incr_decr(target, *dt, *increment, span),
            StatementKind::If(ifelse) => self.translate_if(ifelse),
            StatementKind::Repeat(repeat) => self.translate_repeat(repeat, span),
            StatementKind::When(when) => self.translate_when(when),
            StatementKind::ConditionalBranch(branch) => self.translate_conditional_branch(branch),
            StatementKind::Jump(target) => {
                let target = self.jump_target(target);
                self.out(&format!("  jmp  {}", target));
                Ok(())
            }
            StatementKind::GoSub(target) => {
                self.translate_gosub(target);
                Ok(())
            }
            StatementKind::FunctionCall { target, args } => {
                self.translate_function_call(target, args, span)
            }
            StatementKind::Return(value) => self.translate_return(value.as_ref(), span),
            StatementKind::InlineAssembly(text) => {
                for line in text.lines() {
                    self.emitter.out_raw(line.trim_end());
                }
                Ok(())
            }
            StatementKind::Label(name) => {
                self.out(name);
                Ok(())
            }
            StatementKind::AnonymousScope(body) => {
                for statement in body {
                    self.translate_statement(statement)?;
                }
                Ok(())
            }
            StatementKind::While { .. } => Err(CompileError::internal(
                "while loop should have been lowered to jumps",
                span,
            )),
            StatementKind::Until { .. } => Err(CompileError::internal(
                "do-until loop should have been lowered to jumps",
                span,
            )),
            StatementKind::Break => Err(CompileError::internal(
                "break should have been replaced by a jump",
                span,
            )),
        }
    }
}

impl CodegenSession<'_> {
    /// The operand of a `jmp` to `target`; variables jump indirectly.
    pub(crate) fn jump_target(&self, target: &JumpTarget) -> String {
        match target {
            JumpTarget::Label(name) => self.asm_name(name),
            JumpTarget::Variable(name) => format!("({})", self.asm_name(name)),
            JumpTarget::Address(address) => to_hex(i32::from(*address)),
        }
    }

    fn translate_gosub(&mut self, target: &JumpTarget) {
        match target {
            JumpTarget::Variable(name) => {
                let vector = self.asm_name(name);
                let call = self.make_label("gosub_indirect");
                let back = self.make_label("gosub_return");
                self.out(&format!("  jsr  {} |  jmp  {}", call, back));
                self.out(&format!("{}\tjmp  ({})", call, vector));
                self.out(&back);
            }
            other => {
                let target = self.jump_target(other);
                self.out(&format!("  jsr  {}", target));
            }
        }
    }

    fn translate_return(&mut self, value: Option<&Expr>, span: Span) -> Result<()> {
        if let Some(value) = value {
            let sub = self
                .current_sub
                .ok_or_else(|| CompileError::internal("return outside of a subroutine", span))?;
            match (sub.return_register, sub.return_type) {
                (Some(register), _) => self.expr_to_register(value, register)?,
                (None, Some(DataType::Float)) => self.expr_to_fac1(value)?,
                (None, Some(dt)) if dt.is_byte() => self.expr_to_a(value)?,
                (None, Some(_)) => self.expr_to_ay(value)?,
                (None, None) => {
                    return Err(CompileError::internal(
                        format!("'{}' does not return a value", sub.scoped_name),
                        span,
                    ))
                }
            }
        }
        self.out("  rts");
        Ok(())
    }

    fn translate_post_incr_decr(
        &mut self,
        target: &AssignTarget,
        dt: DataType,
        increment: bool,
        span: Span,
    ) -> Result<()> {
        let read = match target {
            AssignTarget::Register(register) => return self.register_incr_decr(*register, increment),
            AssignTarget::Variable(name) => ExprKind::Identifier(name.clone()),
            AssignTarget::Memory(address) => ExprKind::DirectMemoryRead(address.clone()),
            AssignTarget::ArrayElement { array, index } => ExprKind::ArrayIndexed {
                array: array.clone(),
                index: index.clone(),
            },
        };
        let value = Expr::binary(
            Expr::new(read, dt, span),
            if increment { BinaryOp::Add } else { BinaryOp::Sub },
            Expr::number(1.0, dt, span),
            dt,
        );
        self.translate_assignment(&Assignment {
            target: target.clone(),
            dt,
            value,
        })
    }

    fn register_incr_decr(&mut self, register: RegisterOrPair, increment: bool) -> Result<()> {
        let (lo, hi) = match register {
            RegisterOrPair::A => {
                self.out(if increment { "  clc |  adc  #1" } else { "  sec |  sbc  #1" });
                return Ok(());
            }
            RegisterOrPair::X => {
                self.out(if increment { "  inx" } else { "  dex" });
                return Ok(());
            }
            RegisterOrPair::Y => {
                self.out(if increment { "  iny" } else { "  dey" });
                return Ok(());
            }
            RegisterOrPair::Fac1 | RegisterOrPair::Fac2 => {
                let one = self.float_constant(if increment { 1.0 } else { -1.0 });
                if register == RegisterOrPair::Fac2 {
                    self.float_call("MOVFA");
                }
                self.out(&format!("  lda  #<{c} |  ldy  #>{c}", c = one));
                self.float_call("FADD");
                if register == RegisterOrPair::Fac2 {
                    self.float_call("MOVEF");
                }
                return Ok(());
            }
            RegisterOrPair::AX => ("a", "x"),
            RegisterOrPair::AY => ("a", "y"),
            RegisterOrPair::XY => ("x", "y"),
        };
        if increment {
            if lo == "a" {
                self.out(&format!("  clc |  adc  #1 |  bne  + |  in{} | +", hi));
            } else {
                self.out(&format!("  inx |  bne  + |  in{} | +", hi));
            }
        } else if lo == "a" {
            self.out(&format!("  cmp  #0 |  bne  + |  de{} | +  sec |  sbc  #1", hi));
        } else {
            self.out(&format!("  cpx  #0 |  bne  + |  de{} | +  dex", hi));
        }
        Ok(())
    }
}
