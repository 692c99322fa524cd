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

//! Expression evaluation.
//!
//! This module delivers the value of an expression to the CPU:
//! - Bytes in A, words in A (low) and Y (high), floats in FAC1
//! - Direct sequences for simple operands (constants, variables, addresses)
//! - The operand stack (`P8ESTACK_LO/HI`, indexed by X) for everything else
//!
//! X holds the operand stack pointer at all times. Code that needs X saves
//! and restores it around its use.

use super::comparisons::ComparisonEmitter;
use super::functions::FunctionEmitter;
use super::labels::LabelManager;
use super::types::to_hex;
use super::CodegenSession;
use crate::ast::{BinaryOp, DataType, Expr, ExprKind, PrefixOp, ScopedName, VarDeclKind};
use crate::error::{CompileError, ErrorCode, Result, Span};

/// A value an instruction can address directly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operand {
    /// A number, used as an immediate value.
    Immediate(i32),
    /// A memory location; words occupy `name` and `name+1`.
    Memory(String),
    /// The address of a symbol.
    Address(String),
    /// An unsigned byte in memory, widened to a word.
    ByteAsWord(String),
}

impl Operand {
    /// The operand text for the low (or only) byte.
    pub fn lo(&self) -> String {
        match self {
            Operand::Immediate(value) => format!("#{}", to_hex(value & 0xff)),
            Operand::Memory(name) | Operand::ByteAsWord(name) => name.clone(),
            Operand::Address(name) => format!("#<{}", name),
        }
    }

    /// The operand text for the high byte.
    pub fn hi(&self) -> String {
        match self {
            Operand::Immediate(value) => format!("#{}", to_hex((value >> 8) & 0xff)),
            Operand::Memory(name) => format!("{}+1", name),
            Operand::Address(name) => format!("#>{}", name),
            Operand::ByteAsWord(_) => "#0".to_string(),
        }
    }

    /// The value of an immediate operand.
    pub fn constant(&self) -> Option<i32> {
        match self {
            Operand::Immediate(value) => Some(*value),
            _ => None,
        }
    }
}

/// A pointer to dereference with `(zp),y`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PointerAccess {
    /// The pointer variable.
    pub pointer: ScopedName,
    /// Constant offset added to the pointer.
    pub offset: u8,
}

/// Wrap `name` in parentheses when it is a sum, for use after `<` and `>`.
pub(crate) fn address_expression(name: &str) -> String {
    if name.contains('+') {
        format!("({})", name)
    } else {
        name.to_string()
    }
}

/// Extension trait for expression evaluation.
pub trait ExpressionEmitter {
    /// The directly addressable form of `expr`, if it has one.
    fn simple_operand(&self, expr: &Expr) -> Result<Option<Operand>>;

    /// The label of a 5-byte float holding the value of `expr`, if it has one.
    fn float_operand(&mut self, expr: &Expr) -> Result<Option<String>>;

    /// Evaluate a byte expression into A (the low byte for words).
    fn expr_to_a(&mut self, expr: &Expr) -> Result<()>;

    /// Evaluate an integer or address expression into A (low) and Y (high).
    fn expr_to_ay(&mut self, expr: &Expr) -> Result<()>;

    /// Evaluate a numeric expression into FAC1.
    fn expr_to_fac1(&mut self, expr: &Expr) -> Result<()>;

    /// Evaluate an expression and push it on the operand stack.
    fn expr_to_stack(&mut self, expr: &Expr) -> Result<()>;

    /// Evaluate any expression to 0 or 1 in A.
    fn expr_to_bool_a(&mut self, expr: &Expr) -> Result<()>;

    /// The pointer variable and offset of a `@(ptr)` or `@(ptr+n)` address.
    fn pointer_access(&self, address: &Expr) -> Result<Option<PointerAccess>>;

    /// Call a float routine, keeping X.
    fn float_call(&mut self, routine: &str);

    /// Load FAC1 from the 5-byte float at `label`.
    fn load_fac1(&mut self, label: &str);

    /// Store FAC1 into the 5-byte float at `label`.
    fn store_fac1(&mut self, label: &str);

    /// Extend the byte in A to a word in AY.
    fn extend_a_to_ay(&mut self, signed: bool);

    /// The per-subroutine float temporary `number` (1 or 2).
    fn float_temp(&mut self, number: u8) -> String;
}

impl ExpressionEmitter for CodegenSession<'_> {
    fn simple_operand(&self, expr: &Expr) -> Result<Option<Operand>> {
        let operand = match &expr.kind {
            ExprKind::Number(value) if expr.dt.is_integer() => Some(Operand::Immediate(*value as i32)),
            ExprKind::Identifier(name) => {
                let decl = self.variable(name, expr.span)?;
                match decl.kind {
                    VarDeclKind::Const if decl.dt.is_integer() => {
                        decl.number().map(|v| Operand::Immediate(v as i32))
                    }
                    VarDeclKind::Const => None,
                    _ if decl.dt.is_integer() => Some(Operand::Memory(self.asm_name(name))),
                    _ if decl.dt.is_pass_by_reference() => Some(Operand::Address(self.asm_name(name))),
                    _ => None,
                }
            }
            ExprKind::AddressOf(name) => Some(Operand::Address(self.asm_name(name))),
            ExprKind::DirectMemoryRead(address) => address
                .constant_int()
                .map(|a| Operand::Memory(to_hex(a & 0xffff))),
            ExprKind::ArrayIndexed { array, index } => match index.constant_int() {
                Some(i) => {
                    let decl = self.variable(array, expr.span)?;
                    let element = element_type(decl.dt);
                    if element.is_integer() {
                        let offset = i as usize * element.memory_size();
                        Some(Operand::Memory(indexed_name(&self.asm_name(array), offset)))
                    } else {
                        None
                    }
                }
                None => None,
            },
            ExprKind::Typecast { expr: inner, .. } => {
                if expr.dt.is_word() && inner.dt == DataType::Ubyte {
                    match self.simple_operand(inner)? {
                        Some(Operand::Memory(name)) => Some(Operand::ByteAsWord(name)),
                        Some(Operand::Immediate(v)) => Some(Operand::Immediate(v & 0xff)),
                        _ => None,
                    }
                } else if expr.dt.equals_size(inner.dt) && expr.dt.is_integer() && inner.dt.is_integer() {
                    self.simple_operand(inner)?
                } else {
                    None
                }
            }
            _ => None,
        };
        Ok(operand)
    }

    fn float_operand(&mut self, expr: &Expr) -> Result<Option<String>> {
        if expr.dt != DataType::Float {
            return Ok(None);
        }
        match &expr.kind {
            ExprKind::Number(value) => Ok(Some(self.float_constant(*value))),
            ExprKind::Identifier(name) => {
                let decl = self.variable(name, expr.span)?;
                match decl.kind {
                    VarDeclKind::Const => match decl.number() {
                        Some(value) => Ok(Some(self.float_constant(value))),
                        None => Err(CompileError::internal(
                            format!("float constant '{}' has no value", name),
                            expr.span,
                        )),
                    },
                    _ => Ok(Some(self.asm_name(name))),
                }
            }
            ExprKind::ArrayIndexed { array, index } => match index.constant_int() {
                Some(i) => Ok(Some(indexed_name(
                    &self.asm_name(array),
                    i as usize * DataType::Float.memory_size(),
                ))),
                None => Ok(None),
            },
            _ => Ok(None),
        }
    }

    fn expr_to_a(&mut self, expr: &Expr) -> Result<()> {
        if expr.dt == DataType::Float {
            return Err(CompileError::internal(
                "float value where a byte is expected",
                expr.span,
            ));
        }
        if !expr.dt.is_byte() {
            return self.expr_to_ay(expr);
        }
        match &expr.kind {
            ExprKind::Number(value) => {
                self.out(&format!("  lda  #{}", to_hex(*value as i32 & 0xff)));
            }
            ExprKind::Identifier(_) | ExprKind::AddressOf(_) => {
                let operand = self.require_simple(expr)?;
                self.out(&format!("  lda  {}", operand.lo()));
            }
            ExprKind::DirectMemoryRead(address) => self.memory_read_to_a(address)?,
            ExprKind::ArrayIndexed { array, index } => self.array_byte_to_a(array, index, expr.span)?,
            ExprKind::Prefix { op, operand } => match op {
                PrefixOp::Plus => self.expr_to_a(operand)?,
                PrefixOp::Negate => {
                    self.expr_to_a(operand)?;
                    self.out("  eor  #$ff |  clc |  adc  #1");
                }
                PrefixOp::Invert => {
                    self.expr_to_a(operand)?;
                    self.out("  eor  #$ff");
                }
                PrefixOp::Not => {
                    self.expr_to_bool_a(operand)?;
                    self.out("  eor  #1");
                }
            },
            ExprKind::Binary { left, op, right } => {
                if op.is_comparison() {
                    self.comparison_to_a(left, *op, right)?;
                } else if op.is_logical() {
                    self.logical_to_a(left, *op, right)?;
                } else {
                    self.byte_binary_to_a(left, *op, right, expr.dt)?;
                }
            }
            ExprKind::Typecast { expr: inner, .. } => match inner.dt {
                dt if dt.is_byte() => self.expr_to_a(inner)?,
                DataType::Float => {
                    self.expr_to_fac1(inner)?;
                    if expr.dt.is_signed() {
                        self.float_call("cast_FAC1_as_w_into_ay");
                    } else {
                        self.float_call("cast_FAC1_as_uw_into_ay");
                    }
                }
                _ => self.expr_to_ay(inner)?,
            },
            ExprKind::FunctionCall { target, args } => {
                self.translate_function_call(target, args, expr.span)?;
            }
        }
        Ok(())
    }

    fn expr_to_ay(&mut self, expr: &Expr) -> Result<()> {
        if expr.dt == DataType::Float {
            return Err(CompileError::internal(
                "float value where a word is expected",
                expr.span,
            ));
        }
        if expr.dt.is_byte() {
            self.expr_to_a(expr)?;
            self.extend_a_to_ay(expr.dt.is_signed());
            return Ok(());
        }
        match &expr.kind {
            ExprKind::Number(_) | ExprKind::Identifier(_) | ExprKind::AddressOf(_) => {
                let operand = self.require_simple(expr)?;
                self.out(&format!("  lda  {} |  ldy  {}", operand.lo(), operand.hi()));
            }
            ExprKind::DirectMemoryRead(address) => {
                self.memory_read_to_a(address)?;
                self.out("  ldy  #0");
            }
            ExprKind::ArrayIndexed { array, index } => self.array_word_to_ay(array, index, expr.span)?,
            ExprKind::Prefix { op, operand } => match op {
                PrefixOp::Plus => self.expr_to_ay(operand)?,
                PrefixOp::Negate => {
                    self.expr_to_ay(operand)?;
                    self.out("  eor  #$ff |  clc |  adc  #1 |  pha |  tya |  eor  #$ff |  adc  #0 |  tay |  pla");
                }
                PrefixOp::Invert => {
                    self.expr_to_ay(operand)?;
                    self.out("  eor  #$ff |  pha |  tya |  eor  #$ff |  tay |  pla");
                }
                PrefixOp::Not => {
                    self.expr_to_bool_a(operand)?;
                    self.out("  eor  #1 |  ldy  #0");
                }
            },
            ExprKind::Binary { left, op, right } => {
                if op.is_comparison() || op.is_logical() {
                    let as_byte = Expr::new(expr.kind.clone(), DataType::Ubyte, expr.span);
                    self.expr_to_a(&as_byte)?;
                    self.out("  ldy  #0");
                } else {
                    self.word_binary_to_ay(left, *op, right, expr.dt)?;
                }
            }
            ExprKind::Typecast { expr: inner, .. } => match inner.dt {
                dt if dt.is_byte() => {
                    self.expr_to_a(inner)?;
                    self.extend_a_to_ay(dt.is_signed());
                }
                DataType::Float => {
                    self.expr_to_fac1(inner)?;
                    if expr.dt.is_signed() {
                        self.float_call("cast_FAC1_as_w_into_ay");
                    } else {
                        self.float_call("cast_FAC1_as_uw_into_ay");
                    }
                }
                _ => self.expr_to_ay(inner)?,
            },
            ExprKind::FunctionCall { target, args } => {
                self.translate_function_call(target, args, expr.span)?;
            }
        }
        Ok(())
    }

    fn expr_to_fac1(&mut self, expr: &Expr) -> Result<()> {
        if expr.dt != DataType::Float {
            return self.integer_to_fac1(expr);
        }
        if let Some(label) = self.float_operand(expr)? {
            self.load_fac1(&label);
            return Ok(());
        }
        match &expr.kind {
            ExprKind::ArrayIndexed { array, index } => {
                self.float_element_address_to_ay(array, index)?;
                self.float_call("MOVFM");
            }
            ExprKind::Prefix { op, operand } => {
                self.expr_to_fac1(operand)?;
                match op {
                    PrefixOp::Plus => {}
                    PrefixOp::Negate => self.float_call("NEGOP"),
                    PrefixOp::Invert | PrefixOp::Not => {
                        return Err(CompileError::new(
                            ErrorCode::UnsupportedOperation,
                            format!("operator '{}' is not defined for floats", op),
                            expr.span,
                        ))
                    }
                }
            }
            ExprKind::Binary { left, op, right } => self.float_binary_to_fac1(left, *op, right, expr.span)?,
            ExprKind::Typecast { expr: inner, .. } => self.expr_to_fac1(inner)?,
            ExprKind::FunctionCall { target, args } => {
                self.translate_function_call(target, args, expr.span)?;
            }
            _ => {
                return Err(CompileError::internal(
                    format!("cannot evaluate '{}' as a float", expr),
                    expr.span,
                ))
            }
        }
        Ok(())
    }

    fn expr_to_stack(&mut self, expr: &Expr) -> Result<()> {
        match expr.dt {
            DataType::Float => {
                self.expr_to_fac1(expr)?;
                self.out("  jsr  floats.push_fac1");
            }
            dt if dt.is_byte() => {
                self.expr_to_a(expr)?;
                self.out("  sta  P8ESTACK_LO,x |  dex");
            }
            _ => {
                self.expr_to_ay(expr)?;
                self.out("  sta  P8ESTACK_LO,x |  tya |  sta  P8ESTACK_HI,x |  dex");
            }
        }
        Ok(())
    }

    fn expr_to_bool_a(&mut self, expr: &Expr) -> Result<()> {
        match &expr.kind {
            ExprKind::Binary { op, .. } if op.is_comparison() || op.is_logical() => {
                return self.expr_to_a(expr);
            }
            ExprKind::Prefix {
                op: PrefixOp::Not, ..
            } => return self.expr_to_a(expr),
            _ => {}
        }
        match expr.dt {
            DataType::Float => {
                self.expr_to_fac1(expr)?;
                self.float_call("SIGN");
            }
            dt if dt.is_byte() => self.expr_to_a(expr)?,
            _ => {
                self.expr_to_ay(expr)?;
                self.out("  sty  P8ZP_SCRATCH_B1 |  ora  P8ZP_SCRATCH_B1");
            }
        }
        self.out("  cmp  #0 |  beq  + |  lda  #1 | +");
        Ok(())
    }

    fn pointer_access(&self, address: &Expr) -> Result<Option<PointerAccess>> {
        let (name, offset) = match &address.kind {
            ExprKind::Identifier(name) => (name, 0),
            ExprKind::Binary {
                left,
                op: BinaryOp::Add,
                right,
            } => match (left.as_identifier(), right.constant_int()) {
                (Some(name), Some(offset)) if (0..=255).contains(&offset) => (name, offset as u8),
                _ => return Ok(None),
            },
            _ => return Ok(None),
        };
        let decl = self.variable(name, address.span)?;
        if decl.dt != DataType::Uword || decl.kind == VarDeclKind::Const {
            return Ok(None);
        }
        Ok(Some(PointerAccess {
            pointer: name.clone(),
            offset,
        }))
    }

    fn float_call(&mut self, routine: &str) {
        self.out(&format!(
            "  stx  P8ZP_SCRATCH_REG |  jsr  floats.{} |  ldx  P8ZP_SCRATCH_REG",
            routine
        ));
    }

    fn load_fac1(&mut self, label: &str) {
        let address = address_expression(label);
        self.out(&format!("  lda  #<{} |  ldy  #>{}", address, address));
        self.float_call("MOVFM");
    }

    fn store_fac1(&mut self, label: &str) {
        let address = address_expression(label);
        self.out(&format!(
            "  stx  P8ZP_SCRATCH_REG |  ldx  #<{} |  ldy  #>{} |  jsr  floats.MOVMF |  ldx  P8ZP_SCRATCH_REG",
            address, address
        ));
    }

    fn extend_a_to_ay(&mut self, signed: bool) {
        if signed {
            self.out("  ldy  #0 |  cmp  #$80 |  bcc  + |  dey | +");
        } else {
            self.out("  ldy  #0");
        }
    }

    fn float_temp(&mut self, number: u8) -> String {
        if number == 1 {
            self.frame.float_eval_result1 = true;
        } else {
            self.frame.float_eval_result2 = true;
        }
        format!("prog8_float_eval_result{}", number)
    }
}

/// The element type of an array or string.
pub(crate) fn element_type(dt: DataType) -> DataType {
    dt.element_type().unwrap_or(DataType::Ubyte)
}

/// `name` displaced by `offset` bytes.
pub(crate) fn indexed_name(name: &str, offset: usize) -> String {
    if offset == 0 {
        name.to_string()
    } else {
        format!("{}+{}", name, offset)
    }
}

impl CodegenSession<'_> {
    fn require_simple(&self, expr: &Expr) -> Result<Operand> {
        self.simple_operand(expr)?.ok_or_else(|| {
            CompileError::internal(format!("cannot load '{}' directly", expr), expr.span)
        })
    }

    /// Load A through a pointer in zero page.
    pub(crate) fn load_indirect_a(&mut self, zp: &str, offset: u8) {
        if offset == 0 && self.is_65c02() {
            self.out(&format!("  lda  ({})", zp));
        } else {
            self.out(&format!("  ldy  #{} |  lda  ({}),y", to_hex(offset as i32), zp));
        }
    }

    /// The zero page symbol to dereference `access` through, copying the
    /// pointer into `P8ZP_SCRATCH_W2` when it is not in zero page. Only Y is
    /// used for the copy.
    pub(crate) fn pointer_in_zeropage(&mut self, access: &PointerAccess) -> Result<String> {
        let decl = self.variable(&access.pointer, Span::default())?;
        let name = self.asm_name(&access.pointer);
        let in_zp = self.is_zp_variable(&access.pointer)
            || (decl.kind == VarDeclKind::Memory && decl.number().is_some_and(|a| a < 256.0));
        if in_zp {
            Ok(name)
        } else {
            self.out(&format!(
                "  ldy  {} |  sty  P8ZP_SCRATCH_W2 |  ldy  {}+1 |  sty  P8ZP_SCRATCH_W2+1",
                name, name
            ));
            Ok("P8ZP_SCRATCH_W2".to_string())
        }
    }

    fn memory_read_to_a(&mut self, address: &Expr) -> Result<()> {
        if let Some(constant) = address.constant_int() {
            self.out(&format!("  lda  {}", to_hex(constant & 0xffff)));
            return Ok(());
        }
        if let Some(access) = self.pointer_access(address)? {
            let zp = self.pointer_in_zeropage(&access)?;
            self.load_indirect_a(&zp, access.offset);
            return Ok(());
        }
        self.expr_to_ay(address)?;
        self.out("  sta  P8ZP_SCRATCH_W2 |  sty  P8ZP_SCRATCH_W2+1");
        self.load_indirect_a("P8ZP_SCRATCH_W2", 0);
        Ok(())
    }

    /// Load the index of an array element, scaled by `element_size`, into Y.
    pub(crate) fn index_to_y(&mut self, index: &Expr, element_size: usize) -> Result<()> {
        if element_size == 1 {
            if let Some(operand) = self.simple_operand(index)? {
                self.out(&format!("  ldy  {}", operand.lo()));
                return Ok(());
            }
        }
        self.expr_to_a(index)?;
        for _ in 1..element_size {
            self.out("  asl  a");
        }
        self.out("  tay");
        Ok(())
    }

    fn array_byte_to_a(&mut self, array: &ScopedName, index: &Expr, span: Span) -> Result<()> {
        let name = self.asm_name(array);
        self.variable(array, span)?;
        match index.constant_int() {
            Some(i) => self.out(&format!("  lda  {}", indexed_name(&name, i as usize))),
            None => {
                self.index_to_y(index, 1)?;
                self.out(&format!("  lda  {},y", name));
            }
        }
        Ok(())
    }

    fn array_word_to_ay(&mut self, array: &ScopedName, index: &Expr, span: Span) -> Result<()> {
        let name = self.asm_name(array);
        self.variable(array, span)?;
        match index.constant_int() {
            Some(i) => {
                let element = indexed_name(&name, i as usize * 2);
                self.out(&format!("  lda  {} |  ldy  {}+1", element, element));
            }
            None => {
                self.index_to_y(index, 2)?;
                self.out(&format!(
                    "  lda  {},y |  pha |  lda  {}+1,y |  tay |  pla",
                    name, name
                ));
            }
        }
        Ok(())
    }

    /// Load the address of a float array element into AY.
    pub(crate) fn float_element_address_to_ay(&mut self, array: &ScopedName, index: &Expr) -> Result<()> {
        let name = self.asm_name(array);
        match index.constant_int() {
            Some(i) => {
                let element = address_expression(&indexed_name(&name, i as usize * 5));
                self.out(&format!("  lda  #<{} |  ldy  #>{}", element, element));
            }
            None => {
                self.expr_to_a(index)?;
                self.out(&format!(
                    "  sta  P8ZP_SCRATCH_B1 |  asl  a |  asl  a |  clc |  adc  P8ZP_SCRATCH_B1 |  clc |  adc  #<{} |  pha |  lda  #>{} |  adc  #0 |  tay |  pla",
                    name, name
                ));
            }
        }
        Ok(())
    }

    /// Evaluate `left` into A and make `right` addressable.
    ///
    /// Commutative operators may swap the operands to avoid the operand stack.
    pub(crate) fn byte_operands(&mut self, left: &Expr, right: &Expr, commutative: bool) -> Result<Operand> {
        if let Some(operand) = self.simple_operand(right)? {
            self.expr_to_a(left)?;
            return Ok(operand);
        }
        if commutative {
            if let Some(operand) = self.simple_operand(left)? {
                self.expr_to_a(right)?;
                return Ok(operand);
            }
        }
        self.warn_slow(right.span);
        self.expr_to_stack(right)?;
        self.expr_to_a(left)?;
        self.out("  inx |  ldy  P8ESTACK_LO,x |  sty  P8ZP_SCRATCH_B1");
        Ok(Operand::Memory("P8ZP_SCRATCH_B1".to_string()))
    }

    /// Evaluate `left` into AY and make `right` addressable.
    pub(crate) fn word_operands(&mut self, left: &Expr, right: &Expr, commutative: bool) -> Result<Operand> {
        if let Some(operand) = self.simple_operand(right)? {
            self.expr_to_ay(left)?;
            return Ok(operand);
        }
        if commutative {
            if let Some(operand) = self.simple_operand(left)? {
                self.expr_to_ay(right)?;
                return Ok(operand);
            }
        }
        self.warn_slow(right.span);
        self.expr_to_stack(right)?;
        self.expr_to_ay(left)?;
        self.out("  pha |  inx |  lda  P8ESTACK_LO,x |  sta  P8ZP_SCRATCH_W2 |  lda  P8ESTACK_HI,x |  sta  P8ZP_SCRATCH_W2+1 |  pla");
        Ok(Operand::Memory("P8ZP_SCRATCH_W2".to_string()))
    }

    fn logical_to_a(&mut self, left: &Expr, op: BinaryOp, right: &Expr) -> Result<()> {
        self.expr_to_bool_a(right)?;
        self.out("  sta  P8ESTACK_LO,x |  dex");
        self.expr_to_bool_a(left)?;
        let instruction = match op {
            BinaryOp::And => "and",
            BinaryOp::Or => "ora",
            _ => "eor",
        };
        self.out(&format!("  inx |  {}  P8ESTACK_LO,x", instruction));
        Ok(())
    }

    fn byte_binary_to_a(&mut self, left: &Expr, op: BinaryOp, right: &Expr, dt: DataType) -> Result<()> {
        let signed = dt.is_signed();
        match op {
            BinaryOp::ShiftLeft | BinaryOp::ShiftRight => {
                return self.byte_shift_to_a(left, op == BinaryOp::ShiftLeft, right, signed)
            }
            BinaryOp::Div | BinaryOp::Remainder => {
                check_divisor(op, right, signed)?;
            }
            BinaryOp::Pow => return Err(pow_unsupported(right.span)),
            _ => {}
        }

        if op == BinaryOp::Mul {
            if let Some(n) = right.constant_int() {
                let n = n & 0xff;
                if n == 0 {
                    self.expr_to_a(left)?;
                    self.out("  lda  #0");
                    return Ok(());
                }
                if (n as u32).is_power_of_two() {
                    self.expr_to_a(left)?;
                    for _ in 0..n.trailing_zeros() {
                        self.out("  asl  a");
                    }
                    return Ok(());
                }
            }
        }

        let commutative = matches!(
            op,
            BinaryOp::Add | BinaryOp::Mul | BinaryOp::BitAnd | BinaryOp::BitOr | BinaryOp::BitXor
        );
        let operand = self.byte_operands(left, right, commutative)?;
        let lo = operand.lo();
        match op {
            BinaryOp::Add => self.out(&format!("  clc |  adc  {}", lo)),
            BinaryOp::Sub => self.out(&format!("  sec |  sbc  {}", lo)),
            BinaryOp::BitAnd => self.out(&format!("  and  {}", lo)),
            BinaryOp::BitOr => self.out(&format!("  ora  {}", lo)),
            BinaryOp::BitXor => self.out(&format!("  eor  {}", lo)),
            BinaryOp::Mul => self.out(&format!("  ldy  {} |  jsr  math.multiply_bytes", lo)),
            BinaryOp::Div => {
                let routine = if signed { "divmod_b_asm" } else { "divmod_ub_asm" };
                self.out(&format!("  ldy  {} |  jsr  math.{} |  tya", lo, routine));
            }
            BinaryOp::Remainder => self.out(&format!("  ldy  {} |  jsr  math.divmod_ub_asm", lo)),
            _ => {
                return Err(CompileError::internal(
                    format!("invalid byte operator '{}'", op),
                    right.span,
                ))
            }
        }
        Ok(())
    }

    fn byte_shift_to_a(&mut self, left: &Expr, shift_left: bool, right: &Expr, signed: bool) -> Result<()> {
        if !right.dt.is_byte() {
            return Err(invalid_shift(right.span));
        }
        if let Some(amount) = right.constant_int() {
            self.expr_to_a(left)?;
            self.byte_shift_a_constant(shift_left, amount, signed);
            return Ok(());
        }
        let count = self.byte_operands(left, right, false)?;
        let step = if shift_left {
            "asl  a"
        } else if signed {
            "cmp  #$80 |  ror  a"
        } else {
            "lsr  a"
        };
        self.out(&format!(
            "  ldy  {} |  beq  + | -  {} |  dey |  bne  - | +",
            count.lo(),
            step
        ));
        Ok(())
    }

    /// Shift A by a constant amount.
    pub(crate) fn byte_shift_a_constant(&mut self, shift_left: bool, amount: i32, signed: bool) {
        if amount <= 0 {
            return;
        }
        if amount >= 8 {
            if !shift_left && signed {
                self.out("  asl  a |  lda  #0 |  adc  #$ff |  eor  #$ff");
            } else {
                self.out("  lda  #0");
            }
            return;
        }
        let step = if shift_left {
            "  asl  a"
        } else if signed {
            "  cmp  #$80 |  ror  a"
        } else {
            "  lsr  a"
        };
        for _ in 0..amount {
            self.out(step);
        }
    }

    fn word_binary_to_ay(&mut self, left: &Expr, op: BinaryOp, right: &Expr, dt: DataType) -> Result<()> {
        let signed = dt.is_signed();
        match op {
            BinaryOp::ShiftLeft | BinaryOp::ShiftRight => {
                return self.word_shift_to_ay(left, op == BinaryOp::ShiftLeft, right, signed)
            }
            BinaryOp::Div | BinaryOp::Remainder => check_divisor(op, right, signed)?,
            BinaryOp::Pow => return Err(pow_unsupported(right.span)),
            _ => {}
        }

        if let Some(n) = right.constant_int() {
            let n = n & 0xffff;
            let power = (n as u32).is_power_of_two();
            match op {
                BinaryOp::Mul if n == 0 => {
                    self.expr_to_ay(left)?;
                    self.out("  lda  #0 |  tay");
                    return Ok(());
                }
                BinaryOp::Mul if power => {
                    self.expr_to_ay(left)?;
                    self.word_shift_ay_constant(true, n.trailing_zeros() as i32, false);
                    return Ok(());
                }
                BinaryOp::Div if power && !signed => {
                    self.expr_to_ay(left)?;
                    self.word_shift_ay_constant(false, n.trailing_zeros() as i32, false);
                    return Ok(());
                }
                BinaryOp::Add if n < 256 => {
                    self.expr_to_ay(left)?;
                    self.out(&format!("  clc |  adc  #{} |  bcc  + |  iny | +", to_hex(n)));
                    return Ok(());
                }
                BinaryOp::Sub if n < 256 => {
                    self.expr_to_ay(left)?;
                    self.out(&format!("  sec |  sbc  #{} |  bcs  + |  dey | +", to_hex(n)));
                    return Ok(());
                }
                _ => {}
            }
        }

        let commutative = matches!(
            op,
            BinaryOp::Add | BinaryOp::Mul | BinaryOp::BitAnd | BinaryOp::BitOr | BinaryOp::BitXor
        );
        let operand = self.word_operands(left, right, commutative)?;
        let (lo, hi) = (operand.lo(), operand.hi());
        match op {
            BinaryOp::Add => self.out(&format!(
                "  clc |  adc  {} |  pha |  tya |  adc  {} |  tay |  pla",
                lo, hi
            )),
            BinaryOp::Sub => self.out(&format!(
                "  sec |  sbc  {} |  pha |  tya |  sbc  {} |  tay |  pla",
                lo, hi
            )),
            BinaryOp::BitAnd | BinaryOp::BitOr | BinaryOp::BitXor => {
                let instruction = match op {
                    BinaryOp::BitAnd => "and",
                    BinaryOp::BitOr => "ora",
                    _ => "eor",
                };
                self.out(&format!(
                    "  {i}  {} |  pha |  tya |  {i}  {} |  tay |  pla",
                    lo,
                    hi,
                    i = instruction
                ));
            }
            BinaryOp::Mul => self.out(&format!(
                "  pha |  lda  {} |  sta  P8ZP_SCRATCH_W1 |  lda  {} |  sta  P8ZP_SCRATCH_W1+1 |  pla |  jsr  math.multiply_words",
                lo, hi
            )),
            BinaryOp::Div | BinaryOp::Remainder => {
                let routine = if signed { "divmod_w_asm" } else { "divmod_uw_asm" };
                self.out(&format!(
                    "  sta  P8ZP_SCRATCH_W1 |  sty  P8ZP_SCRATCH_W1+1 |  lda  {} |  ldy  {} |  jsr  math.{}",
                    lo, hi, routine
                ));
                if op == BinaryOp::Remainder {
                    self.out("  lda  P8ZP_SCRATCH_W2 |  ldy  P8ZP_SCRATCH_W2+1");
                }
            }
            _ => {
                return Err(CompileError::internal(
                    format!("invalid word operator '{}'", op),
                    right.span,
                ))
            }
        }
        Ok(())
    }

    fn word_shift_to_ay(&mut self, left: &Expr, shift_left: bool, right: &Expr, signed: bool) -> Result<()> {
        if !right.dt.is_byte() {
            return Err(invalid_shift(right.span));
        }
        if let Some(amount) = right.constant_int() {
            self.expr_to_ay(left)?;
            self.word_shift_ay_constant(shift_left, amount, signed);
            return Ok(());
        }
        let count = match self.simple_operand(right)? {
            Some(operand) => {
                self.expr_to_ay(left)?;
                operand.lo()
            }
            None => {
                self.warn_slow(right.span);
                self.expr_to_stack(right)?;
                self.expr_to_ay(left)?;
                self.out("  inx");
                "P8ESTACK_LO,x".to_string()
            }
        };
        let step = if shift_left {
            "asl  P8ZP_SCRATCH_W1 |  rol  P8ZP_SCRATCH_W1+1"
        } else if signed {
            "lda  P8ZP_SCRATCH_W1+1 |  cmp  #$80 |  ror  P8ZP_SCRATCH_W1+1 |  ror  P8ZP_SCRATCH_W1"
        } else {
            "lsr  P8ZP_SCRATCH_W1+1 |  ror  P8ZP_SCRATCH_W1"
        };
        self.out(&format!(
            "  sta  P8ZP_SCRATCH_W1 |  sty  P8ZP_SCRATCH_W1+1 |  ldy  {} |  beq  + | -  {} |  dey |  bne  - | +  lda  P8ZP_SCRATCH_W1 |  ldy  P8ZP_SCRATCH_W1+1",
            count, step
        ));
        Ok(())
    }

    /// Shift AY by a constant amount.
    pub(crate) fn word_shift_ay_constant(&mut self, shift_left: bool, amount: i32, signed: bool) {
        if amount <= 0 {
            return;
        }
        if amount >= 16 {
            if !shift_left && signed {
                self.out("  tya |  asl  a |  lda  #0 |  adc  #$ff |  eor  #$ff |  tay");
            } else {
                self.out("  lda  #0 |  tay");
            }
            return;
        }
        if amount >= 8 {
            let rest = amount - 8;
            if shift_left {
                for _ in 0..rest {
                    self.out("  asl  a");
                }
                self.out("  tay |  lda  #0");
            } else {
                self.out("  tya");
                self.byte_shift_a_constant(false, rest, signed);
                if signed {
                    self.out("  pha |  tya |  asl  a |  lda  #0 |  adc  #$ff |  eor  #$ff |  tay |  pla");
                } else {
                    self.out("  ldy  #0");
                }
            }
            return;
        }
        let step = if shift_left {
            "  asl  P8ZP_SCRATCH_W1 |  rol  P8ZP_SCRATCH_W1+1"
        } else if signed {
            "  lda  P8ZP_SCRATCH_W1+1 |  cmp  #$80 |  ror  P8ZP_SCRATCH_W1+1 |  ror  P8ZP_SCRATCH_W1"
        } else {
            "  lsr  P8ZP_SCRATCH_W1+1 |  ror  P8ZP_SCRATCH_W1"
        };
        self.out("  sta  P8ZP_SCRATCH_W1 |  sty  P8ZP_SCRATCH_W1+1");
        for _ in 0..amount {
            self.out(step);
        }
        self.out("  lda  P8ZP_SCRATCH_W1 |  ldy  P8ZP_SCRATCH_W1+1");
    }

    fn integer_to_fac1(&mut self, expr: &Expr) -> Result<()> {
        match expr.dt {
            DataType::Ubyte => {
                self.expr_to_a(expr)?;
                self.out("  tay");
                self.float_call("FREADUY");
            }
            DataType::Byte => {
                self.expr_to_a(expr)?;
                self.float_call("FREADSA");
            }
            DataType::Uword => {
                self.expr_to_ay(expr)?;
                self.float_call("GIVUAYFAY");
            }
            DataType::Word => {
                self.expr_to_ay(expr)?;
                self.float_call("GIVAYFAY");
            }
            other => {
                return Err(CompileError::internal(
                    format!("cannot convert {} to float", other),
                    expr.span,
                ))
            }
        }
        Ok(())
    }

    fn float_binary_to_fac1(&mut self, left: &Expr, op: BinaryOp, right: &Expr, span: Span) -> Result<()> {
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
                    span,
                ))
            }
        };
        if op == BinaryOp::Div && right.is_zero() {
            return Err(CompileError::new(
                ErrorCode::DivisionByZero,
                "division by zero",
                right.span,
            ));
        }

        if let Some(left_label) = self.float_operand(left)? {
            self.expr_to_fac1(right)?;
            self.float_with_memory(routine, &left_label);
            return Ok(());
        }
        if let Some(right_label) = self.float_operand(right)? {
            self.expr_to_fac1(left)?;
            if matches!(op, BinaryOp::Add | BinaryOp::Mul) {
                self.float_with_memory(routine, &right_label);
            } else {
                let temp = self.float_temp(1);
                self.store_fac1(&temp);
                self.load_fac1(&right_label);
                self.float_with_memory(routine, &temp);
            }
            return Ok(());
        }

        self.warn_slow(span);
        self.expr_to_fac1(right)?;
        self.out("  jsr  floats.push_fac1");
        self.expr_to_fac1(left)?;
        let temp = self.float_temp(1);
        self.store_fac1(&temp);
        self.out("  jsr  floats.pop_fac1");
        self.float_with_memory(routine, &temp);
        Ok(())
    }

    /// FAC1 = float at `label` OP FAC1.
    fn float_with_memory(&mut self, routine: &str, label: &str) {
        let address = address_expression(label);
        self.out(&format!("  lda  #<{} |  ldy  #>{}", address, address));
        self.float_call(routine);
    }

    fn comparison_to_a(&mut self, left: &Expr, op: BinaryOp, right: &Expr) -> Result<()> {
        let false_label = self.make_label("cmp_false");
        let end_label = self.make_label("cmp_end");
        self.translate_comparison_branch(left, op, right, &false_label, true)?;
        self.out(&format!("  lda  #1 |  bne  {}", end_label));
        self.out(&format!("{}\tlda  #0", false_label));
        self.out(&end_label);
        Ok(())
    }
}

/// Reject division and remainder operands known to be invalid.
pub(crate) fn check_divisor(op: BinaryOp, divisor: &Expr, signed: bool) -> Result<()> {
    if divisor.is_zero() {
        return Err(CompileError::new(
            ErrorCode::DivisionByZero,
            "division by zero",
            divisor.span,
        ));
    }
    if op == BinaryOp::Remainder && signed {
        return Err(CompileError::new(
            ErrorCode::SignedRemainder,
            "remainder of signed integers is not properly defined/implemented, use unsigned instead",
            divisor.span,
        ));
    }
    Ok(())
}

pub(crate) fn invalid_shift(span: Span) -> CompileError {
    CompileError::new(
        ErrorCode::InvalidShift,
        "shift amount must be a byte value",
        span,
    )
}

fn pow_unsupported(span: Span) -> CompileError {
    CompileError::new(
        ErrorCode::UnsupportedOperation,
        "'**' is only supported for floats",
        span,
    )
}
