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

//! Comparison and branch selection.
//!
//! Every comparison is compiled into a sequence that jumps to a label
//! exactly when the comparison is false. A request to jump when it is true
//! uses the inverted operator instead. Templates are picked by a match on
//! `(operator, kind)` and filled in with the right operand's text, so one
//! template serves constants, variables and memory reads alike.

use super::expressions::{address_expression, ExpressionEmitter, Operand};
use super::labels::LabelManager;
use super::CodegenSession;
use crate::ast::{BinaryOp, DataType, Expr, ExprKind};
use crate::error::{CompileError, Result};

/// The family of comparison templates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareKind {
    UnsignedByte,
    SignedByte,
    UnsignedWord,
    SignedWord,
}

impl CompareKind {
    fn of(dt: DataType) -> Option<Self> {
        match dt {
            DataType::Ubyte => Some(CompareKind::UnsignedByte),
            DataType::Byte => Some(CompareKind::SignedByte),
            DataType::Uword | DataType::Str => Some(CompareKind::UnsignedWord),
            DataType::Word => Some(CompareKind::SignedWord),
            dt if dt.is_array() => Some(CompareKind::UnsignedWord),
            _ => None,
        }
    }
}

/// The code comparing A (or AY) with `right` that jumps to `label` when
/// `left OP right` is false.
///
/// `ok` names a label private to this sequence, needed by the signed
/// `<=` templates.
pub fn comparison_template(op: BinaryOp, kind: CompareKind, right: &Operand, label: &str, ok: &str) -> String {
    let (lo, hi) = (right.lo(), right.hi());
    let l = label;
    match (op, kind) {
        (BinaryOp::Equal, CompareKind::UnsignedByte | CompareKind::SignedByte) => {
            format!("  cmp  {lo} |  bne  {l}")
        }
        (BinaryOp::NotEqual, CompareKind::UnsignedByte | CompareKind::SignedByte) => {
            format!("  cmp  {lo} |  beq  {l}")
        }
        (BinaryOp::Less, CompareKind::UnsignedByte) => format!("  cmp  {lo} |  bcs  {l}"),
        (BinaryOp::GreaterEqual, CompareKind::UnsignedByte) => format!("  cmp  {lo} |  bcc  {l}"),
        (BinaryOp::Greater, CompareKind::UnsignedByte) => {
            format!("  cmp  {lo} |  bcc  {l} |  beq  {l}")
        }
        (BinaryOp::LessEqual, CompareKind::UnsignedByte) => {
            format!("  cmp  {lo} |  beq  + |  bcs  {l} | +")
        }
        (BinaryOp::Less, CompareKind::SignedByte) => {
            format!("  sec |  sbc  {lo} |  bvc  + |  eor  #$80 | +  bpl  {l}")
        }
        (BinaryOp::GreaterEqual, CompareKind::SignedByte) => {
            format!("  sec |  sbc  {lo} |  bvc  + |  eor  #$80 | +  bmi  {l}")
        }
        (BinaryOp::Greater, CompareKind::SignedByte) => format!(
            "  cmp  {lo} |  beq  {l} |  sec |  sbc  {lo} |  bvc  + |  eor  #$80 | +  bmi  {l}"
        ),
        (BinaryOp::LessEqual, CompareKind::SignedByte) => format!(
            "  cmp  {lo} |  beq  {ok} |  sec |  sbc  {lo} |  bvc  + |  eor  #$80 | +  bpl  {l}\n{ok}"
        ),
        (BinaryOp::Equal, CompareKind::UnsignedWord | CompareKind::SignedWord) => {
            format!("  cmp  {lo} |  bne  {l} |  cpy  {hi} |  bne  {l}")
        }
        (BinaryOp::NotEqual, CompareKind::UnsignedWord | CompareKind::SignedWord) => {
            format!("  cmp  {lo} |  bne  + |  cpy  {hi} |  beq  {l} | +")
        }
        (BinaryOp::Less, CompareKind::UnsignedWord) => {
            format!("  cpy  {hi} |  bcc  + |  bne  {l} |  cmp  {lo} |  bcs  {l} | +")
        }
        (BinaryOp::GreaterEqual, CompareKind::UnsignedWord) => {
            format!("  cpy  {hi} |  bcc  {l} |  bne  + |  cmp  {lo} |  bcc  {l} | +")
        }
        (BinaryOp::Greater, CompareKind::UnsignedWord) => {
            format!("  cpy  {hi} |  bcc  {l} |  bne  + |  cmp  {lo} |  bcc  {l} |  beq  {l} | +")
        }
        (BinaryOp::LessEqual, CompareKind::UnsignedWord) => {
            format!("  cpy  {hi} |  bcc  + |  bne  {l} |  cmp  {lo} |  beq  + |  bcs  {l} | +")
        }
        (BinaryOp::Less, CompareKind::SignedWord) => {
            format!("  cmp  {lo} |  tya |  sbc  {hi} |  bvc  + |  eor  #$80 | +  bpl  {l}")
        }
        (BinaryOp::GreaterEqual, CompareKind::SignedWord) => {
            format!("  cmp  {lo} |  tya |  sbc  {hi} |  bvc  + |  eor  #$80 | +  bmi  {l}")
        }
        (BinaryOp::Greater, CompareKind::SignedWord) => format!(
            "  cmp  {lo} |  bne  + |  cpy  {hi} |  beq  {l} | +  cmp  {lo} |  tya |  sbc  {hi} |  bvc  + |  eor  #$80 | +  bmi  {l}"
        ),
        (BinaryOp::LessEqual, CompareKind::SignedWord) => format!(
            "  cmp  {lo} |  bne  + |  cpy  {hi} |  beq  {ok} | +  cmp  {lo} |  tya |  sbc  {hi} |  bvc  + |  eor  #$80 | +  bpl  {l}\n{ok}"
        ),
        _ => String::new(),
    }
}

/// The branches after a signed test of A against zero (flags set from A)
/// that jump to `label` when `A OP 0` is false.
pub fn signed_zero_branch(op: BinaryOp, label: &str) -> String {
    let l = label;
    match op {
        BinaryOp::Equal => format!("  bne  {l}"),
        BinaryOp::NotEqual => format!("  beq  {l}"),
        BinaryOp::Less => format!("  bpl  {l}"),
        BinaryOp::GreaterEqual => format!("  bmi  {l}"),
        BinaryOp::Greater => format!("  bmi  {l} |  beq  {l}"),
        _ => format!("  beq  + |  bpl  {l} | +"),
    }
}

/// Extension trait for comparisons.
pub trait ComparisonEmitter {
    /// Compare `left` with `right` and jump to `label` when the outcome
    /// is false (or true, when `jump_if_false` is not set).
    fn translate_comparison_branch(
        &mut self,
        left: &Expr,
        op: BinaryOp,
        right: &Expr,
        label: &str,
        jump_if_false: bool,
    ) -> Result<()>;

    /// Branch on a condition, which must be a comparison.
    fn translate_condition_branch(&mut self, condition: &Expr, label: &str, jump_if_false: bool) -> Result<()>;
}

impl ComparisonEmitter for CodegenSession<'_> {
    fn translate_comparison_branch(
        &mut self,
        left: &Expr,
        op: BinaryOp,
        right: &Expr,
        label: &str,
        jump_if_false: bool,
    ) -> Result<()> {
        let invalid = || CompileError::internal(format!("'{}' is not a comparison", op), left.span);
        let op = if jump_if_false {
            op
        } else {
            op.inverted().ok_or_else(invalid)?
        };

        if left.is_constant() && right.is_constant() {
            return Err(CompileError::internal(
                "comparison of two constants should have been folded",
                left.span.merge(&right.span),
            ));
        }
        let (left, op, right) = if left.is_constant() {
            (right, op.swapped().ok_or_else(invalid)?, left)
        } else {
            (left, op, right)
        };

        let dt = if right.dt.larger_than(left.dt) { right.dt } else { left.dt };
        match dt {
            DataType::Float => self.float_comparison(left, op, right, label),
            DataType::Str => self.string_comparison(left, op, right, label),
            _ => {
                let kind = CompareKind::of(dt).ok_or_else(|| {
                    CompileError::internal(format!("cannot compare values of type {}", dt), left.span)
                })?;
                if right.is_zero() {
                    return self.integer_zero_comparison(left, op, kind, label);
                }
                let operand = match kind {
                    CompareKind::UnsignedByte | CompareKind::SignedByte => {
                        self.byte_operands(left, right, false)?
                    }
                    _ => self.word_operands(left, right, false)?,
                };
                let ok = if op == BinaryOp::LessEqual
                    && matches!(kind, CompareKind::SignedByte | CompareKind::SignedWord)
                {
                    self.make_label("cmp_ok")
                } else {
                    String::new()
                };
                let code = comparison_template(op, kind, &operand, label, &ok);
                self.out(&code);
                Ok(())
            }
        }
    }

    fn translate_condition_branch(&mut self, condition: &Expr, label: &str, jump_if_false: bool) -> Result<()> {
        match &condition.kind {
            ExprKind::Binary { left, op, right } if op.is_comparison() => {
                self.translate_comparison_branch(left, *op, right, label, jump_if_false)
            }
            _ => Err(CompileError::internal(
                format!("condition '{}' must be a comparison", condition),
                condition.span,
            )),
        }
    }
}

impl CodegenSession<'_> {
    fn integer_zero_comparison(&mut self, left: &Expr, op: BinaryOp, kind: CompareKind, label: &str) -> Result<()> {
        let signed = matches!(kind, CompareKind::SignedByte | CompareKind::SignedWord);
        if !signed && matches!(op, BinaryOp::Less | BinaryOp::GreaterEqual) {
            if left.has_calls() {
                self.expr_to_ay(left)?;
            }
            if op == BinaryOp::Less {
                self.out(&format!("  jmp  {}", label));
            }
            return Ok(());
        }

        let simple = self.simple_operand(left)?;
        let l = label;
        match kind {
            CompareKind::UnsignedByte | CompareKind::SignedByte => {
                match simple {
                    Some(operand) => self.out(&format!("  lda  {}", operand.lo())),
                    None => {
                        self.expr_to_a(left)?;
                        self.out("  cmp  #0");
                    }
                }
                let code = if signed {
                    signed_zero_branch(op, label)
                } else {
                    match op {
                        BinaryOp::Equal | BinaryOp::LessEqual => format!("  bne  {l}"),
                        _ => format!("  beq  {l}"),
                    }
                };
                self.out(&code);
            }
            _ => {
                // (sign test, zero test) of the word
                let (sign, zero) = match simple {
                    Some(operand) => (
                        format!("  lda  {}", operand.hi()),
                        format!("  lda  {} |  ora  {}", operand.lo(), operand.hi()),
                    ),
                    None => {
                        self.expr_to_ay(left)?;
                        (
                            "  cpy  #0".to_string(),
                            "  sty  P8ZP_SCRATCH_B1 |  ora  P8ZP_SCRATCH_B1".to_string(),
                        )
                    }
                };
                let code = match (op, signed) {
                    (BinaryOp::Equal, _) | (BinaryOp::LessEqual, false) => format!("{zero} |  bne  {l}"),
                    (BinaryOp::NotEqual, _) | (BinaryOp::Greater, false) => format!("{zero} |  beq  {l}"),
                    (BinaryOp::Less, _) => format!("{sign} |  bpl  {l}"),
                    (BinaryOp::GreaterEqual, _) => format!("{sign} |  bmi  {l}"),
                    (BinaryOp::Greater, _) => format!("{sign} |  bmi  {l}\n{zero} |  beq  {l}"),
                    _ => format!("{sign} |  bmi  +\n{zero} |  bne  {l} | +"),
                };
                self.out(&code);
            }
        }
        Ok(())
    }

    fn float_comparison(&mut self, left: &Expr, op: BinaryOp, right: &Expr, label: &str) -> Result<()> {
        if matches!(op, BinaryOp::Equal | BinaryOp::NotEqual) {
            if let (Some(value), Some(name)) = (right.constant_value(), self.float_variable(left)?) {
                let l = label;
                let code = match (value, op) {
                    (v, BinaryOp::Equal) if v == 0.0 => Some(format!("  lda  {name} |  bne  {l}")),
                    (v, BinaryOp::NotEqual) if v == 0.0 => Some(format!("  lda  {name} |  beq  {l}")),
                    (v, BinaryOp::Equal) if v == 1.0 => Some(format!(
                        "  lda  {name} |  cmp  #$81 |  bne  {l} |  lda  {name}+1 |  ora  {name}+2 |  ora  {name}+3 |  ora  {name}+4 |  bne  {l}"
                    )),
                    (v, BinaryOp::NotEqual) if v == 1.0 => Some(format!(
                        "  lda  {name} |  cmp  #$81 |  bne  + |  lda  {name}+1 |  ora  {name}+2 |  ora  {name}+3 |  ora  {name}+4 |  beq  {l} | +"
                    )),
                    _ => None,
                };
                if let Some(code) = code {
                    self.out(&code);
                    return Ok(());
                }
            }
        }

        let op = if right.is_zero() {
            self.expr_to_fac1(left)?;
            self.float_call("SIGN");
            op
        } else if let Some(right_label) = self.float_operand(right)? {
            self.expr_to_fac1(left)?;
            self.float_compare_with(&right_label);
            op
        } else if let Some(left_label) = self.float_operand(left)? {
            self.expr_to_fac1(right)?;
            self.float_compare_with(&left_label);
            op.swapped().unwrap_or(op)
        } else {
            self.warn_slow(right.span);
            self.expr_to_fac1(left)?;
            self.out("  jsr  floats.push_fac1");
            self.expr_to_fac1(right)?;
            let temp = self.float_temp(2);
            self.store_fac1(&temp);
            self.out("  jsr  floats.pop_fac1");
            self.float_compare_with(&temp);
            op
        };
        self.out("  cmp  #0");
        let code = signed_zero_branch(op, label);
        self.out(&code);
        Ok(())
    }

    /// A = sign of (FAC1 - float at `label`).
    fn float_compare_with(&mut self, label: &str) {
        let address = address_expression(label);
        self.out(&format!("  lda  #<{} |  ldy  #>{}", address, address));
        self.float_call("FCOMP");
    }

    /// The name of a float variable whose bytes can be tested directly.
    fn float_variable(&self, expr: &Expr) -> Result<Option<String>> {
        match &expr.kind {
            ExprKind::Identifier(name) => {
                let decl = self.variable(name, expr.span)?;
                if decl.dt == DataType::Float && decl.kind != crate::ast::VarDeclKind::Const {
                    Ok(Some(self.asm_name(name)))
                } else {
                    Ok(None)
                }
            }
            _ => Ok(None),
        }
    }

    fn string_comparison(&mut self, left: &Expr, op: BinaryOp, right: &Expr, label: &str) -> Result<()> {
        let right_operand = self.simple_operand(right)?.ok_or_else(|| {
            CompileError::internal(format!("cannot compare string '{}'", right), right.span)
        })?;
        self.out(&format!(
            "  lda  {} |  sta  P8ZP_SCRATCH_W2 |  lda  {} |  sta  P8ZP_SCRATCH_W2+1",
            right_operand.lo(),
            right_operand.hi()
        ));
        self.expr_to_ay(left)?;
        self.out("  jsr  prog8_lib.strcmp_mem |  cmp  #0");
        let code = signed_zero_branch(op, label);
        self.out(&code);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Block, Program, ScopedName, Subroutine, VarDecl};
    use crate::config::CompilationOptions;
    use crate::error::{Diagnostics, ErrorCode, Span};
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    #[test_case(BinaryOp::Equal, CompareKind::UnsignedByte, "\tcmp  #5|\tbne  L")]
    #[test_case(BinaryOp::Less, CompareKind::UnsignedByte, "\tcmp  #5|\tbcs  L")]
    #[test_case(BinaryOp::LessEqual, CompareKind::UnsignedByte, "\tcmp  #5|\tbeq  +|\tbcs  L|+")]
    #[test_case(BinaryOp::Equal, CompareKind::UnsignedWord, "\tcmp  #5|\tbne  L|\tcpy  #0|\tbne  L")]
    fn test_templates(op: BinaryOp, kind: CompareKind, expected: &str) {
        let code = comparison_template(op, kind, &Operand::Immediate(5), "L", "OK");
        let mut emitter = crate::codegen::TextEmitter::new();
        emitter.out(&code);
        assert_eq!(emitter.lines().join("|"), expected);
    }

    #[test]
    fn test_every_template_defined() {
        let ops = [
            BinaryOp::Equal,
            BinaryOp::NotEqual,
            BinaryOp::Less,
            BinaryOp::Greater,
            BinaryOp::LessEqual,
            BinaryOp::GreaterEqual,
        ];
        let kinds = [
            CompareKind::UnsignedByte,
            CompareKind::SignedByte,
            CompareKind::UnsignedWord,
            CompareKind::SignedWord,
        ];
        for op in ops {
            for kind in kinds {
                let code = comparison_template(op, kind, &Operand::Memory("v".into()), "L", "OK");
                assert!(code.contains('L'), "{:?} {:?}", op, kind);
            }
        }
    }

    fn program() -> Program {
        let mut program = Program::new("cmp");
        let mut block = Block::new("main", Span::default());
        for (name, dt) in [("b", DataType::Ubyte), ("w", DataType::Word), ("f", DataType::Float)] {
            block.variables.push(VarDecl::new(
                ScopedName::parse(&format!("main.{}", name)),
                dt,
                Span::default(),
            ));
        }
        block
            .subroutines
            .push(Subroutine::new(ScopedName::parse("main.start"), Span::default()));
        program.blocks.push(block);
        program
    }

    fn var(name: &str, dt: DataType) -> Expr {
        Expr::identifier(ScopedName::parse(name), dt, Span::default())
    }

    fn branch(left: Expr, op: BinaryOp, right: Expr, jump_if_false: bool) -> Result<Vec<String>> {
        let program = program();
        let mut diagnostics = Diagnostics::new();
        let mut session =
            CodegenSession::new(&program, CompilationOptions::default(), &mut diagnostics);
        session.scope = ScopedName::parse("main");
        session.translate_comparison_branch(&left, op, &right, "L", jump_if_false)?;
        Ok(session.emitter.lines().to_vec())
    }

    #[test]
    fn test_constant_left_operand_is_swapped() {
        let lines = branch(
            Expr::number(10.0, DataType::Ubyte, Span::default()),
            BinaryOp::Less,
            var("main.b", DataType::Ubyte),
            true,
        )
        .unwrap();
        assert_eq!(lines, vec!["\tlda  b", "\tcmp  #10", "\tbcc  L", "\tbeq  L"]);
    }

    #[test]
    fn test_jump_if_true_inverts() {
        let lines = branch(
            var("main.b", DataType::Ubyte),
            BinaryOp::Equal,
            Expr::number(3.0, DataType::Ubyte, Span::default()),
            false,
        )
        .unwrap();
        assert_eq!(lines, vec!["\tlda  b", "\tcmp  #3", "\tbeq  L"]);
    }

    #[test]
    fn test_signed_word_zero_test_without_load() {
        let lines = branch(
            var("main.w", DataType::Word),
            BinaryOp::Less,
            Expr::number(0.0, DataType::Word, Span::default()),
            true,
        )
        .unwrap();
        assert_eq!(lines, vec!["\tlda  w+1", "\tbpl  L"]);
    }

    #[test]
    fn test_float_zero_shortcut() {
        let lines = branch(
            var("main.f", DataType::Float),
            BinaryOp::Equal,
            Expr::number(0.0, DataType::Float, Span::default()),
            true,
        )
        .unwrap();
        assert_eq!(lines, vec!["\tlda  f", "\tbne  L"]);
    }

    #[test]
    fn test_two_constants_is_internal_error() {
        let error = branch(
            Expr::number(1.0, DataType::Ubyte, Span::default()),
            BinaryOp::Less,
            Expr::number(2.0, DataType::Ubyte, Span::default()),
            true,
        )
        .unwrap_err();
        assert_eq!(error.code, ErrorCode::InternalError);
    }
}
