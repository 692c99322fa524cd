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

//! In-place updates of assignment targets.
//!
//! Assignments like `x = x + e` read and write the same location. Instead
//! of evaluating the whole value and storing it, the target is updated
//! directly with read-modify-write code. Recognized shapes:
//! - `t = t OP v`, and `t = v OP t` for associative operators
//! - one level of nesting with the same operator, giving two updates
//! - prefix `-`, `~` and `not` of the target
//! - typecasts of the target
//!
//! Targets are variables and memory bytes. Array elements go through a
//! normal assignment.

use super::expressions::{check_divisor, invalid_shift, ExpressionEmitter, Operand};
use super::types::to_hex;
use super::CodegenSession;
use crate::ast::{
    AssignTarget, Assignment, BinaryOp, DataType, Expr, ExprKind, PrefixOp,
};
use crate::error::{CompileError, ErrorCode, Result, Span};

/// The in-place rewrite of an assignment.
#[derive(Debug, Clone, PartialEq)]
enum Rewrite<'e> {
    /// Successive `t = t OP v` updates.
    Steps(Vec<(BinaryOp, &'e Expr)>),
    /// `t = OP t`.
    Prefix(PrefixOp),
    /// `t = (dt1)(dt2)...t`, outermost first.
    Cast(Vec<DataType>),
}

fn updatable(op: BinaryOp) -> bool {
    !op.is_comparison() && !op.is_logical()
}

fn associative(op: BinaryOp) -> bool {
    updatable(op) && op.is_associative()
}

/// True when evaluating `expr` may read the target.
fn reads_target(target: &AssignTarget, expr: &Expr) -> bool {
    let this = match (target, &expr.kind) {
        (AssignTarget::Variable(name), ExprKind::Identifier(other)) => name == other,
        (AssignTarget::Memory(_), ExprKind::DirectMemoryRead(_)) => true,
        _ => false,
    };
    this || match &expr.kind {
        ExprKind::DirectMemoryRead(inner) => reads_target(target, inner),
        ExprKind::ArrayIndexed { index, .. } => reads_target(target, index),
        ExprKind::Prefix { operand, .. } => reads_target(target, operand),
        ExprKind::Binary { left, right, .. } => {
            reads_target(target, left) || reads_target(target, right)
        }
        ExprKind::Typecast { expr, .. } => reads_target(target, expr),
        ExprKind::FunctionCall { .. } => true,
        _ => false,
    }
}

fn analyze(assignment: &Assignment) -> Option<Rewrite<'_>> {
    let target = &assignment.target;
    match target {
        AssignTarget::Variable(_) => {}
        AssignTarget::Memory(_) if assignment.dt.is_byte() => {}
        _ => return None,
    }
    let value = &assignment.value;
    match &value.kind {
        ExprKind::Binary { left, op, right } if updatable(*op) => {
            let op = *op;
            if target.is_same_as(left) {
                return Some(Rewrite::Steps(vec![(op, right.as_ref())]));
            }
            if associative(op) && target.is_same_as(right) {
                return Some(Rewrite::Steps(vec![(op, left.as_ref())]));
            }
            let nested = |second: &Expr| !reads_target(target, second);
            if let ExprKind::Binary {
                left: inner_left,
                op: inner_op,
                right: inner_right,
            } = &left.kind
            {
                if *inner_op == op {
                    if target.is_same_as(inner_left) && nested(right) {
                        return Some(Rewrite::Steps(vec![(op, inner_right.as_ref()), (op, right.as_ref())]));
                    }
                    if associative(op) && target.is_same_as(inner_right) && nested(right) {
                        return Some(Rewrite::Steps(vec![(op, inner_left.as_ref()), (op, right.as_ref())]));
                    }
                }
            }
            if let ExprKind::Binary {
                left: inner_left,
                op: inner_op,
                right: inner_right,
            } = &right.kind
            {
                if *inner_op == op && associative(op) {
                    if target.is_same_as(inner_left) && nested(left) {
                        return Some(Rewrite::Steps(vec![(op, inner_right.as_ref()), (op, left.as_ref())]));
                    }
                    if target.is_same_as(inner_right) && nested(left) {
                        return Some(Rewrite::Steps(vec![(op, inner_left.as_ref()), (op, left.as_ref())]));
                    }
                }
            }
            None
        }
        ExprKind::Prefix { op, operand } if target.is_same_as(operand) => Some(Rewrite::Prefix(*op)),
        ExprKind::Typecast { .. } => {
            let mut chain = Vec::new();
            let mut current = value;
            while let ExprKind::Typecast { expr, .. } = &current.kind {
                chain.push(current.dt);
                current = expr;
            }
            if target.is_same_as(current) {
                Some(Rewrite::Cast(chain))
            } else {
                None
            }
        }
        _ => None,
    }
}

/// True when the assignment can update its target in place.
pub fn is_augmentable(assignment: &Assignment) -> bool {
    analyze(assignment).is_some()
}

/// Where a byte update reads and writes.
#[derive(Debug, Clone, PartialEq, Eq)]
enum ByteTarget {
    /// An absolute or zero page symbol.
    Direct(String),
    /// `(zp),y` with a constant offset.
    Pointer { zp: String, offset: u8 },
}

/// Extension trait for in-place updates.
pub trait InPlaceEmitter {
    /// Translate an assignment accepted by [`is_augmentable`].
    fn translate_augmented(&mut self, assignment: &Assignment) -> Result<()>;
}

impl InPlaceEmitter for CodegenSession<'_> {
    fn translate_augmented(&mut self, assignment: &Assignment) -> Result<()> {
        let span = assignment.value.span;
        let rewrite = analyze(assignment).ok_or_else(|| {
            CompileError::internal("assignment cannot be updated in place", span)
        })?;
        let dt = assignment.dt;
        match rewrite {
            Rewrite::Steps(steps) => {
                for (op, value) in steps {
                    match &assignment.target {
                        AssignTarget::Variable(name) => {
                            let symbol = self.asm_name(name);
                            match dt {
                                dt if dt.is_byte() => {
                                    let operand = self.byte_update_operand(op, value)?;
                                    self.byte_update(ByteTarget::Direct(symbol), op, &operand, value, dt)?;
                                }
                                dt if dt.is_word() => self.word_update(&symbol, op, value, dt)?,
                                DataType::Float => self.float_update(&symbol, op, value)?,
                                other => return Err(not_updatable(other, span)),
                            }
                        }
                        AssignTarget::Memory(address) => {
                            let (target, operand) = self.memory_target(address, op, value)?;
                            self.byte_update(target, op, &operand, value, dt)?;
                        }
                        _ => return Err(CompileError::internal("invalid in-place target", span)),
                    }
                }
                Ok(())
            }
            Rewrite::Prefix(op) => self.prefix_update(&assignment.target, op, dt, span),
            Rewrite::Cast(chain) => self.cast_update(&assignment.target, &chain, dt, span),
        }
    }
}

fn not_updatable(dt: DataType, span: Span) -> CompileError {
    CompileError::internal(format!("cannot update a {} in place", dt), span)
}

impl CodegenSession<'_> {
    /// The operand of a byte update; values that are not simple end up in
    /// `P8ZP_SCRATCH_B1`.
    fn byte_update_operand(&mut self, op: BinaryOp, value: &Expr) -> Result<Operand> {
        if matches!(op, BinaryOp::ShiftLeft | BinaryOp::ShiftRight) && !value.dt.is_byte() {
            return Err(invalid_shift(value.span));
        }
        if let Some(operand) = self.simple_operand(value)? {
            return Ok(operand);
        }
        self.expr_to_a(value)?;
        self.out("  sta  P8ZP_SCRATCH_B1");
        Ok(Operand::Memory("P8ZP_SCRATCH_B1".to_string()))
    }

    /// Make the memory byte at `address` and the update operand available.
    fn memory_target(&mut self, address: &Expr, op: BinaryOp, value: &Expr) -> Result<(ByteTarget, Operand)> {
        if let Some(constant) = address.constant_int() {
            let operand = self.byte_update_operand(op, value)?;
            return Ok((ByteTarget::Direct(to_hex(constant & 0xffff)), operand));
        }
        if let Some(access) = self.pointer_access(address)? {
            let operand = self.byte_update_operand(op, value)?;
            let zp = self.pointer_in_zeropage(&access)?;
            return Ok((
                ByteTarget::Pointer {
                    zp,
                    offset: access.offset,
                },
                operand,
            ));
        }
        let operand = match self.simple_operand(value)? {
            Some(operand) => {
                self.expr_to_ay(address)?;
                operand
            }
            None => {
                if matches!(op, BinaryOp::ShiftLeft | BinaryOp::ShiftRight) && !value.dt.is_byte() {
                    return Err(invalid_shift(value.span));
                }
                self.warn_slow(value.span);
                self.expr_to_stack(value)?;
                self.expr_to_ay(address)?;
                self.out("  pha |  inx |  lda  P8ESTACK_LO,x |  sta  P8ZP_SCRATCH_B1 |  pla");
                Operand::Memory("P8ZP_SCRATCH_B1".to_string())
            }
        };
        self.out("  sta  P8ZP_SCRATCH_W1 |  sty  P8ZP_SCRATCH_W1+1");
        Ok((
            ByteTarget::Pointer {
                zp: "P8ZP_SCRATCH_W1".to_string(),
                offset: 0,
            },
            operand,
        ))
    }

    fn byte_load(&self, target: &ByteTarget) -> String {
        match target {
            ByteTarget::Direct(name) => format!("  lda  {}", name),
            ByteTarget::Pointer { zp, offset: 0 } if self.is_65c02() => format!("  lda  ({})", zp),
            ByteTarget::Pointer { zp, offset } => {
                format!("  ldy  #{} |  lda  ({}),y", to_hex(*offset as i32), zp)
            }
        }
    }

    fn byte_store(&self, target: &ByteTarget) -> String {
        match target {
            ByteTarget::Direct(name) => format!("  sta  {}", name),
            ByteTarget::Pointer { zp, offset: 0 } if self.is_65c02() => format!("  sta  ({})", zp),
            ByteTarget::Pointer { zp, offset } => {
                format!("  ldy  #{} |  sta  ({}),y", to_hex(*offset as i32), zp)
            }
        }
    }

    fn byte_update(&mut self, target: ByteTarget, op: BinaryOp, operand: &Operand, value: &Expr, dt: DataType) -> Result<()> {
        let signed = dt.is_signed();
        let load = self.byte_load(&target);
        let store = self.byte_store(&target);
        let direct = match &target {
            ByteTarget::Direct(name) => Some(name.clone()),
            ByteTarget::Pointer { .. } => None,
        };
        let v = operand.lo();
        let constant = operand.constant().map(|c| c & 0xff);

        match op {
            BinaryOp::Add | BinaryOp::Sub => {
                let (step, carry, instruction) = if op == BinaryOp::Add {
                    ("inc", "clc", "adc")
                } else {
                    ("dec", "sec", "sbc")
                };
                match (constant, &direct) {
                    (Some(0), _) => {}
                    (Some(1), Some(name)) => self.out(&format!("  {}  {}", step, name)),
                    (Some(2), Some(name)) => {
                        self.out(&format!("  {s}  {n} |  {s}  {n}", s = step, n = name))
                    }
                    _ => self.out(&format!("{} |  {} |  {}  {}\n{}", load, carry, instruction, v, store)),
                }
            }
            BinaryOp::BitAnd | BinaryOp::BitOr | BinaryOp::BitXor => {
                let instruction = match op {
                    BinaryOp::BitAnd => "and",
                    BinaryOp::BitOr => "ora",
                    _ => "eor",
                };
                self.out(&format!("{} |  {}  {}\n{}", load, instruction, v, store));
            }
            BinaryOp::Mul => match constant {
                Some(0) => self.out(&format!("  lda  #0\n{}", store)),
                Some(1) => {}
                Some(n) if (n as u32).is_power_of_two() => {
                    self.byte_shift_update(&target, &load, &store, true, n.trailing_zeros() as i32, false)
                }
                _ => self.out(&format!("{} |  ldy  {} |  jsr  math.multiply_bytes\n{}", load, v, store)),
            },
            BinaryOp::Div => {
                check_divisor(op, value, signed)?;
                if constant == Some(1) {
                    return Ok(());
                }
                let routine = if signed { "divmod_b_asm" } else { "divmod_ub_asm" };
                self.out(&format!("{} |  ldy  {} |  jsr  math.{} |  tya\n{}", load, v, routine, store));
            }
            BinaryOp::Remainder => {
                check_divisor(op, value, signed)?;
                self.out(&format!("{} |  ldy  {} |  jsr  math.divmod_ub_asm\n{}", load, v, store));
            }
            BinaryOp::ShiftLeft | BinaryOp::ShiftRight => {
                let left = op == BinaryOp::ShiftLeft;
                match constant {
                    Some(amount) => self.byte_shift_update(&target, &load, &store, left, amount, signed),
                    None => {
                        let step = if left {
                            "asl  a"
                        } else if signed {
                            "cmp  #$80 |  ror  a"
                        } else {
                            "lsr  a"
                        };
                        self.out(&format!(
                            "{} |  ldy  {} |  beq  + | -  {} |  dey |  bne  - | +\n{}",
                            load, v, step, store
                        ));
                    }
                }
            }
            BinaryOp::Pow => {
                return Err(CompileError::new(
                    ErrorCode::UnsupportedOperation,
                    "'**' is only supported for floats",
                    value.span,
                ))
            }
            _ => return Err(CompileError::internal(format!("invalid in-place operator '{}'", op), value.span)),
        }
        Ok(())
    }

    fn byte_shift_update(&mut self, target: &ByteTarget, load: &str, store: &str, left: bool, amount: i32, signed: bool) {
        if amount <= 0 {
            return;
        }
        match target {
            ByteTarget::Direct(name) if amount < 8 => {
                for _ in 0..amount {
                    if left {
                        self.out(&format!("  asl  {}", name));
                    } else if signed {
                        self.out(&format!("  lda  {n} |  asl  a |  ror  {n}", n = name));
                    } else {
                        self.out(&format!("  lsr  {}", name));
                    }
                }
            }
            _ => {
                self.out(load);
                self.byte_shift_a_constant(left, amount, signed);
                self.out(store);
            }
        }
    }

    fn word_update(&mut self, t: &str, op: BinaryOp, value: &Expr, dt: DataType) -> Result<()> {
        let signed = dt.is_signed();
        if matches!(op, BinaryOp::ShiftLeft | BinaryOp::ShiftRight) {
            return self.word_shift_update(t, op == BinaryOp::ShiftLeft, value, signed);
        }
        if matches!(op, BinaryOp::Div | BinaryOp::Remainder) {
            check_divisor(op, value, signed)?;
        }
        let operand = match self.simple_operand(value)? {
            Some(operand) => operand,
            None => {
                self.expr_to_ay(value)?;
                self.out("  sta  P8ZP_SCRATCH_W2 |  sty  P8ZP_SCRATCH_W2+1");
                Operand::Memory("P8ZP_SCRATCH_W2".to_string())
            }
        };
        let (lo, hi) = (operand.lo(), operand.hi());
        let constant = operand.constant().map(|c| c & 0xffff);

        match op {
            BinaryOp::Add => match constant {
                Some(0) => {}
                Some(1) => self.out(&format!("  inc  {t} |  bne  + |  inc  {t}+1 | +")),
                Some(c) if c < 256 => self.out(&format!(
                    "  lda  {t} |  clc |  adc  #{} |  sta  {t} |  bcc  + |  inc  {t}+1 | +",
                    to_hex(c)
                )),
                _ => self.out(&format!(
                    "  lda  {t} |  clc |  adc  {lo} |  sta  {t} |  lda  {t}+1 |  adc  {hi} |  sta  {t}+1"
                )),
            },
            BinaryOp::Sub => match constant {
                Some(0) => {}
                Some(1) => self.out(&format!("  lda  {t} |  bne  + |  dec  {t}+1 | +  dec  {t}")),
                Some(c) if c < 256 => self.out(&format!(
                    "  lda  {t} |  sec |  sbc  #{} |  sta  {t} |  bcs  + |  dec  {t}+1 | +",
                    to_hex(c)
                )),
                _ => self.out(&format!(
                    "  lda  {t} |  sec |  sbc  {lo} |  sta  {t} |  lda  {t}+1 |  sbc  {hi} |  sta  {t}+1"
                )),
            },
            BinaryOp::BitAnd | BinaryOp::BitOr | BinaryOp::BitXor => {
                let i = match op {
                    BinaryOp::BitAnd => "and",
                    BinaryOp::BitOr => "ora",
                    _ => "eor",
                };
                self.out(&format!(
                    "  lda  {t} |  {i}  {lo} |  sta  {t} |  lda  {t}+1 |  {i}  {hi} |  sta  {t}+1"
                ));
            }
            BinaryOp::Mul => match constant {
                Some(0) => self.out(&format!("  lda  #0 |  sta  {t} |  sta  {t}+1")),
                Some(1) => {}
                Some(n) if (n as u32).is_power_of_two() => {
                    self.word_constant_shift_update(t, true, n.trailing_zeros() as i32, false)
                }
                _ => self.out(&format!(
                    "  lda  {lo} |  sta  P8ZP_SCRATCH_W1 |  lda  {hi} |  sta  P8ZP_SCRATCH_W1+1 |  lda  {t} |  ldy  {t}+1 |  jsr  math.multiply_words |  sta  {t} |  sty  {t}+1"
                )),
            },
            BinaryOp::Div | BinaryOp::Remainder => {
                if op == BinaryOp::Div && constant == Some(1) {
                    return Ok(());
                }
                let routine = if signed { "divmod_w_asm" } else { "divmod_uw_asm" };
                self.out(&format!(
                    "  lda  {t} |  sta  P8ZP_SCRATCH_W1 |  lda  {t}+1 |  sta  P8ZP_SCRATCH_W1+1 |  lda  {lo} |  ldy  {hi} |  jsr  math.{routine}"
                ));
                if op == BinaryOp::Div {
                    self.out(&format!("  sta  {t} |  sty  {t}+1"));
                } else {
                    self.out(&format!(
                        "  lda  P8ZP_SCRATCH_W2 |  sta  {t} |  lda  P8ZP_SCRATCH_W2+1 |  sta  {t}+1"
                    ));
                }
            }
            BinaryOp::Pow => {
                return Err(CompileError::new(
                    ErrorCode::UnsupportedOperation,
                    "'**' is only supported for floats",
                    value.span,
                ))
            }
            _ => return Err(CompileError::internal(format!("invalid in-place operator '{}'", op), value.span)),
        }
        Ok(())
    }

    fn word_shift_update(&mut self, t: &str, left: bool, value: &Expr, signed: bool) -> Result<()> {
        if !value.dt.is_byte() {
            return Err(invalid_shift(value.span));
        }
        if let Some(amount) = value.constant_int() {
            self.word_constant_shift_update(t, left, amount, signed);
            return Ok(());
        }
        let count = match self.simple_operand(value)? {
            Some(operand) => operand.lo(),
            None => {
                self.expr_to_a(value)?;
                self.out("  tay");
                String::new()
            }
        };
        let step = if left {
            format!("asl  {t} |  rol  {t}+1")
        } else if signed {
            format!("lda  {t}+1 |  cmp  #$80 |  ror  {t}+1 |  ror  {t}")
        } else {
            format!("lsr  {t}+1 |  ror  {t}")
        };
        if count.is_empty() {
            self.out(&format!("  cpy  #0 |  beq  + | -  {step} |  dey |  bne  - | +"));
        } else {
            self.out(&format!("  ldy  {count} |  beq  + | -  {step} |  dey |  bne  - | +"));
        }
        Ok(())
    }

    fn word_constant_shift_update(&mut self, t: &str, left: bool, amount: i32, signed: bool) {
        if amount <= 0 {
            return;
        }
        if amount >= 16 {
            if !left && signed {
                self.out(&format!(
                    "  lda  {t}+1 |  asl  a |  lda  #0 |  adc  #$ff |  eor  #$ff |  sta  {t} |  sta  {t}+1"
                ));
            } else {
                self.out(&format!("  lda  #0 |  sta  {t} |  sta  {t}+1"));
            }
            return;
        }
        if amount >= 8 && !signed {
            if left {
                self.out(&format!("  lda  {t} |  sta  {t}+1 |  lda  #0 |  sta  {t}"));
                for _ in 8..amount {
                    self.out(&format!("  asl  {t}+1"));
                }
            } else {
                self.out(&format!("  lda  {t}+1 |  sta  {t} |  lda  #0 |  sta  {t}+1"));
                for _ in 8..amount {
                    self.out(&format!("  lsr  {t}"));
                }
            }
            return;
        }
        for _ in 0..amount {
            if left {
                self.out(&format!("  asl  {t} |  rol  {t}+1"));
            } else if signed {
                self.out(&format!("  lda  {t}+1 |  cmp  #$80 |  ror  {t}+1 |  ror  {t}"));
            } else {
                self.out(&format!("  lsr  {t}+1 |  ror  {t}"));
            }
        }
    }

    fn float_update(&mut self, t: &str, op: BinaryOp, value: &Expr) -> Result<()> {
        let routine = match op {
            BinaryOp::Add => "FADD",
            BinaryOp::Sub => "FSUB",
            BinaryOp::Mul => "FMULT",
            BinaryOp::Div => "FDIV",
            BinaryOp::Pow => "FPWR",
            _ => {
                return Err(CompileError::new(
                    ErrorCode::UnsupportedOperation,
                    format!("operator '{}' is not defined for floats", op),
                    value.span,
                ))
            }
        };
        if op == BinaryOp::Div && value.is_zero() {
            return Err(CompileError::new(
                ErrorCode::DivisionByZero,
                "division by zero",
                value.span,
            ));
        }
        self.expr_to_fac1(value)?;
        self.out(&format!("  lda  #<{t} |  ldy  #>{t}"));
        self.float_call(routine);
        self.store_fac1(t);
        Ok(())
    }

    fn prefix_update(&mut self, target: &AssignTarget, op: PrefixOp, dt: DataType, span: Span) -> Result<()> {
        if op == PrefixOp::Plus {
            return Ok(());
        }
        let byte_target = match target {
            AssignTarget::Variable(name) if !dt.is_byte() => {
                let t = self.asm_name(name);
                return self.wide_prefix_update(&t, op, dt, span);
            }
            AssignTarget::Variable(name) => ByteTarget::Direct(self.asm_name(name)),
            AssignTarget::Memory(address) => {
                let zero = Expr::number(0.0, DataType::Ubyte, span);
                self.memory_target(address, BinaryOp::BitOr, &zero)?.0
            }
            _ => return Err(CompileError::internal("invalid in-place target", span)),
        };
        let load = self.byte_load(&byte_target);
        let store = self.byte_store(&byte_target);
        let code = match op {
            PrefixOp::Negate => "  eor  #$ff |  clc |  adc  #1",
            PrefixOp::Invert => "  eor  #$ff",
            _ => "  beq  + |  lda  #1 | +  eor  #1",
        };
        self.out(&format!("{}\n{}\n{}", load, code, store));
        Ok(())
    }

    fn wide_prefix_update(&mut self, t: &str, op: PrefixOp, dt: DataType, span: Span) -> Result<()> {
        match (dt, op) {
            (DataType::Float, PrefixOp::Negate) => {
                self.out(&format!("  lda  {t}+1 |  eor  #$80 |  sta  {t}+1"))
            }
            (DataType::Float, _) => {
                return Err(CompileError::new(
                    ErrorCode::UnsupportedOperation,
                    format!("operator '{}' is not defined for floats", op),
                    span,
                ))
            }
            (_, PrefixOp::Negate) => self.out(&format!(
                "  lda  #0 |  sec |  sbc  {t} |  sta  {t} |  lda  #0 |  sbc  {t}+1 |  sta  {t}+1"
            )),
            (_, PrefixOp::Invert) => self.out(&format!(
                "  lda  {t} |  eor  #$ff |  sta  {t} |  lda  {t}+1 |  eor  #$ff |  sta  {t}+1"
            )),
            _ => self.out(&format!(
                "  lda  {t} |  ora  {t}+1 |  beq  + |  lda  #1 | +  eor  #1 |  sta  {t} |  lda  #0 |  sta  {t}+1"
            )),
        }
        Ok(())
    }

    fn cast_update(&mut self, target: &AssignTarget, chain: &[DataType], dt: DataType, span: Span) -> Result<()> {
        if dt == DataType::Float || chain.contains(&DataType::Float) {
            return Err(CompileError::new(
                ErrorCode::InvalidInPlaceCast,
                "cannot cast a float value in place",
                span,
            ));
        }
        let smallest = chain
            .iter()
            .copied()
            .min_by_key(|dt| dt.memory_size())
            .unwrap_or(dt);
        if smallest.memory_size() >= dt.memory_size() {
            return Ok(());
        }
        let name = match target {
            AssignTarget::Variable(name) => name,
            _ => return Err(CompileError::internal("invalid in-place cast target", span)),
        };
        let t = self.asm_name(name);
        if smallest.is_signed() {
            self.out(&format!("  lda  {t} |  ora  #$7f |  bmi  + |  lda  #0 | +  sta  {t}+1"));
        } else {
            self.out(&format!("  lda  #0 |  sta  {t}+1"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Block, Program, ScopedName, Subroutine, VarDecl};
    use crate::config::CompilationOptions;
    use crate::error::Diagnostics;
    use pretty_assertions::assert_eq;

    fn var(name: &str, dt: DataType) -> Expr {
        Expr::identifier(ScopedName::parse(name), dt, Span::default())
    }

    fn num(value: f64, dt: DataType) -> Expr {
        Expr::number(value, dt, Span::default())
    }

    fn assign(name: &str, dt: DataType, value: Expr) -> Assignment {
        Assignment {
            target: AssignTarget::Variable(ScopedName::parse(name)),
            dt,
            value,
        }
    }

    fn program() -> Program {
        let mut program = Program::new("inplace");
        let mut block = Block::new("main", Span::default());
        for (name, dt) in [
            ("b", DataType::Ubyte),
            ("c", DataType::Ubyte),
            ("sb", DataType::Byte),
            ("w", DataType::Uword),
            ("sw", DataType::Word),
            ("f", DataType::Float),
        ] {
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

    fn translate(assignment: &Assignment) -> Result<Vec<String>> {
        let program = program();
        let mut diagnostics = Diagnostics::new();
        let mut session =
            CodegenSession::new(&program, CompilationOptions::default(), &mut diagnostics);
        session.scope = ScopedName::parse("main");
        session.translate_augmented(assignment)?;
        Ok(session.emitter.lines().to_vec())
    }

    #[test]
    fn test_shapes() {
        let b = || var("main.b", DataType::Ubyte);
        let c = || var("main.c", DataType::Ubyte);
        let plus = |l, r| Expr::binary(l, BinaryOp::Add, r, DataType::Ubyte);
        let minus = |l, r| Expr::binary(l, BinaryOp::Sub, r, DataType::Ubyte);

        assert!(is_augmentable(&assign("main.b", DataType::Ubyte, plus(b(), c()))));
        assert!(is_augmentable(&assign("main.b", DataType::Ubyte, plus(c(), b()))));
        assert!(!is_augmentable(&assign("main.b", DataType::Ubyte, minus(c(), b()))));
        assert!(is_augmentable(&assign("main.b", DataType::Ubyte, minus(minus(b(), c()), c()))));
        assert!(is_augmentable(&assign("main.b", DataType::Ubyte, plus(c(), plus(b(), c())))));
        // the second update would read the already updated target
        assert!(!is_augmentable(&assign("main.b", DataType::Ubyte, minus(minus(b(), c()), b()))));
        assert!(!is_augmentable(&assign("main.b", DataType::Ubyte, c())));
    }

    #[test]
    fn test_byte_increment() {
        let value = Expr::binary(var("main.b", DataType::Ubyte), BinaryOp::Add, num(1.0, DataType::Ubyte), DataType::Ubyte);
        let lines = translate(&assign("main.b", DataType::Ubyte, value)).unwrap();
        assert_eq!(lines, vec!["\tinc  b"]);
    }

    #[test]
    fn test_word_plus_variable() {
        let value = Expr::binary(var("main.w", DataType::Uword), BinaryOp::Add, var("main.w", DataType::Uword), DataType::Uword);
        let lines = translate(&assign("main.w", DataType::Uword, value)).unwrap();
        assert_eq!(
            lines,
            vec!["\tlda  w", "\tclc", "\tadc  w", "\tsta  w", "\tlda  w+1", "\tadc  w+1", "\tsta  w+1"]
        );
    }

    #[test]
    fn test_nested_steps() {
        let inner = Expr::binary(var("main.b", DataType::Ubyte), BinaryOp::Sub, num(3.0, DataType::Ubyte), DataType::Ubyte);
        let value = Expr::binary(inner, BinaryOp::Sub, var("main.c", DataType::Ubyte), DataType::Ubyte);
        let lines = translate(&assign("main.b", DataType::Ubyte, value)).unwrap();
        assert_eq!(
            lines,
            vec!["\tlda  b", "\tsec", "\tsbc  #3", "\tsta  b", "\tlda  b", "\tsec", "\tsbc  c", "\tsta  b"]
        );
    }

    #[test]
    fn test_division_by_zero_is_fatal() {
        let value = Expr::binary(var("main.w", DataType::Uword), BinaryOp::Div, num(0.0, DataType::Uword), DataType::Uword);
        let error = translate(&assign("main.w", DataType::Uword, value)).unwrap_err();
        assert_eq!(error.code, ErrorCode::DivisionByZero);
    }

    #[test]
    fn test_signed_remainder_rejected() {
        let value = Expr::binary(var("main.sb", DataType::Byte), BinaryOp::Remainder, num(3.0, DataType::Byte), DataType::Byte);
        let error = translate(&assign("main.sb", DataType::Byte, value)).unwrap_err();
        assert_eq!(error.code, ErrorCode::SignedRemainder);
        assert!(error.message.contains("use unsigned instead"));
    }

    #[test]
    fn test_cast_to_byte_clears_high_byte() {
        let cast = Expr::new(
            ExprKind::Typecast {
                expr: Box::new(var("main.w", DataType::Uword)),
                implicit: false,
            },
            DataType::Ubyte,
            Span::default(),
        );
        let value = Expr::new(
            ExprKind::Typecast {
                expr: Box::new(cast),
                implicit: false,
            },
            DataType::Uword,
            Span::default(),
        );
        let lines = translate(&assign("main.w", DataType::Uword, value)).unwrap();
        assert_eq!(lines, vec!["\tlda  #0", "\tsta  w+1"]);
    }

    #[test]
    fn test_float_cast_rejected() {
        let value = Expr::new(
            ExprKind::Typecast {
                expr: Box::new(var("main.f", DataType::Float)),
                implicit: false,
            },
            DataType::Float,
            Span::default(),
        );
        let error = translate(&assign("main.f", DataType::Float, value)).unwrap_err();
        assert_eq!(error.code, ErrorCode::InvalidInPlaceCast);
    }

    #[test]
    fn test_constant_shift_beyond_width() {
        let value = Expr::binary(var("main.sw", DataType::Word), BinaryOp::ShiftRight, num(20.0, DataType::Ubyte), DataType::Word);
        let lines = translate(&assign("main.sw", DataType::Word, value)).unwrap();
        assert_eq!(lines[0], "\tlda  sw+1");
        assert_eq!(lines.last().map(String::as_str), Some("\tsta  sw+1"));
    }
}
