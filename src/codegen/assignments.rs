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

//! Assignment code generation.
//!
//! This module provides value delivery to every kind of destination:
//! - Variables of every datatype, including string and array copies
//! - CPU registers and register pairs, FAC1 and FAC2
//! - Memory bytes at constant addresses or through pointers
//! - Array elements with constant or computed index
//! - The operand stack
//!
//! Assignments that read their own target are handed to the in-place
//! updater instead.

use super::expressions::{address_expression, element_type, indexed_name, ExpressionEmitter};
use super::inplace::{is_augmentable, InPlaceEmitter};
use super::CodegenSession;
use crate::ast::{AssignTarget, Assignment, DataType, Expr, ExprKind, RegisterOrPair, ScopedName};
use crate::error::{CompileError, Result, Span};

/// Where `deliver` puts a value.
#[derive(Debug, Clone, PartialEq)]
pub enum Destination {
    /// A register, register pair or float accumulator.
    Register(RegisterOrPair),
    /// A named variable.
    Variable(ScopedName),
    /// The memory byte at an address.
    Memory(Expr),
    /// An array element.
    ArrayElement { array: ScopedName, index: Expr },
    /// The operand stack.
    Stack,
}

/// Extension trait for assignments.
pub trait AssignmentEmitter {
    /// Translate an assignment statement.
    fn translate_assignment(&mut self, assignment: &Assignment) -> Result<()>;

    /// Put the value of `expr` into `destination` and return its datatype.
    fn deliver(&mut self, expr: &Expr, destination: Destination) -> Result<DataType>;

    /// Evaluate `expr` into a register, register pair or float accumulator.
    fn expr_to_register(&mut self, expr: &Expr, register: RegisterOrPair) -> Result<()>;
}

impl AssignmentEmitter for CodegenSession<'_> {
    fn translate_assignment(&mut self, assignment: &Assignment) -> Result<()> {
        if is_augmentable(assignment) {
            return self.translate_augmented(assignment);
        }
        let value = &assignment.value;
        match &assignment.target {
            AssignTarget::Variable(name) => self.assign_variable(name, value),
            AssignTarget::Register(register) => self.expr_to_register(value, *register),
            AssignTarget::Memory(address) => self.assign_memory(address, value),
            AssignTarget::ArrayElement { array, index } => self.assign_element(array, index, value),
        }
    }

    fn deliver(&mut self, expr: &Expr, destination: Destination) -> Result<DataType> {
        match destination {
            Destination::Register(register) => self.expr_to_register(expr, register)?,
            Destination::Variable(name) => self.assign_variable(&name, expr)?,
            Destination::Memory(address) => self.assign_memory(&address, expr)?,
            Destination::ArrayElement { array, index } => self.assign_element(&array, &index, expr)?,
            Destination::Stack => self.expr_to_stack(expr)?,
        }
        Ok(expr.dt)
    }

    fn expr_to_register(&mut self, expr: &Expr, register: RegisterOrPair) -> Result<()> {
        match register {
            RegisterOrPair::A => self.expr_to_a(expr)?,
            RegisterOrPair::X => {
                self.expr_to_a(expr)?;
                self.out("  tax");
            }
            RegisterOrPair::Y => {
                self.expr_to_a(expr)?;
                self.out("  tay");
            }
            RegisterOrPair::AY => self.expr_to_ay(expr)?,
            RegisterOrPair::AX => {
                self.expr_to_ay(expr)?;
                self.out("  pha |  tya |  tax |  pla");
            }
            RegisterOrPair::XY => {
                self.expr_to_ay(expr)?;
                self.out("  tax");
            }
            RegisterOrPair::Fac1 => self.expr_to_fac1(expr)?,
            RegisterOrPair::Fac2 => {
                self.expr_to_fac1(expr)?;
                self.float_call("MOVEF");
            }
        }
        Ok(())
    }
}

impl CodegenSession<'_> {
    fn assign_variable(&mut self, name: &ScopedName, value: &Expr) -> Result<()> {
        let decl = self.variable(name, value.span)?;
        let target = self.asm_name(name);
        match decl.dt {
            dt if dt.is_byte() => {
                if value.is_zero() && self.is_65c02() {
                    self.out(&format!("  stz  {}", target));
                } else {
                    self.expr_to_a(value)?;
                    self.out(&format!("  sta  {}", target));
                }
            }
            dt if dt.is_word() => match self.simple_operand(value)? {
                Some(operand) if value.dt.is_word() || operand.constant().is_some() => {
                    let lo = operand.lo();
                    let hi = operand.hi();
                    self.store_byte_operand(&lo, &target);
                    self.store_byte_operand(&hi, &format!("{}+1", target));
                }
                _ => {
                    self.expr_to_ay(value)?;
                    self.out(&format!("  sta  {t} |  sty  {t}+1", t = target));
                }
            },
            DataType::Float => {
                if value.is_zero() {
                    self.out(&format!(
                        "  lda  #0 |  sta  {t} |  sta  {t}+1 |  sta  {t}+2 |  sta  {t}+3 |  sta  {t}+4",
                        t = target
                    ));
                } else if let Some(source) = self.float_operand(value)? {
                    let source = address_expression(&source);
                    self.out(&format!(
                        "  lda  #<{s} |  sta  P8ZP_SCRATCH_W1 |  lda  #>{s} |  sta  P8ZP_SCRATCH_W1+1 |  lda  #<{t} |  ldy  #>{t} |  jsr  floats.copy_float",
                        s = source,
                        t = target
                    ));
                } else {
                    self.expr_to_fac1(value)?;
                    self.store_fac1(&target);
                }
            }
            DataType::Str => {
                self.out(&format!(
                    "  lda  #<{t} |  sta  P8ZP_SCRATCH_W1 |  lda  #>{t} |  sta  P8ZP_SCRATCH_W1+1",
                    t = target
                ));
                self.expr_to_ay(value)?;
                self.out("  jsr  prog8_lib.strcpy");
            }
            dt => {
                let source = match &value.kind {
                    ExprKind::Identifier(source) => self.variable(source, value.span)?,
                    _ => {
                        return Err(CompileError::internal(
                            format!("cannot assign '{}' to array '{}'", value, name),
                            value.span,
                        ))
                    }
                };
                if source.dt != dt {
                    return Err(CompileError::internal(
                        format!("array type mismatch: {} and {}", source.dt, dt),
                        value.span,
                    ));
                }
                let size = dt.storage_size(decl.element_count().unwrap_or(0));
                let source_name = self.asm_name(&source.scoped_name);
                self.out(&format!(
                    "  lda  #<{s} |  sta  P8ZP_SCRATCH_W1 |  lda  #>{s} |  sta  P8ZP_SCRATCH_W1+1",
                    s = source_name
                ));
                self.out(&format!(
                    "  lda  #<{t} |  sta  P8ZP_SCRATCH_W2 |  lda  #>{t} |  sta  P8ZP_SCRATCH_W2+1",
                    t = target
                ));
                self.out(&format!(
                    "  lda  #<{} |  ldy  #>{} |  jsr  prog8_lib.memcopy",
                    size, size
                ));
            }
        }
        Ok(())
    }

    /// Store one byte operand, using `stz` for zero on the 65C02.
    fn store_byte_operand(&mut self, operand: &str, target: &str) {
        if operand == "#0" && self.is_65c02() {
            self.out(&format!("  stz  {}", target));
        } else {
            self.out(&format!("  lda  {} |  sta  {}", operand, target));
        }
    }

    /// Store A through a zero page pointer.
    fn store_indirect_a(&mut self, zp: &str, offset: u8) {
        if offset == 0 && self.is_65c02() {
            self.out(&format!("  sta  ({})", zp));
        } else {
            self.out(&format!("  ldy  #{} |  sta  ({}),y", offset, zp));
        }
    }

    fn assign_memory(&mut self, address: &Expr, value: &Expr) -> Result<()> {
        if let Some(constant) = address.constant_int() {
            let target = super::types::to_hex(constant & 0xffff);
            if value.is_zero() && self.is_65c02() {
                self.out(&format!("  stz  {}", target));
            } else {
                self.expr_to_a(value)?;
                self.out(&format!("  sta  {}", target));
            }
            return Ok(());
        }
        if let Some(access) = self.pointer_access(address)? {
            self.expr_to_a(value)?;
            let zp = self.pointer_in_zeropage(&access)?;
            self.store_indirect_a(&zp, access.offset);
            return Ok(());
        }
        match self.simple_operand(value)? {
            Some(operand) => {
                self.expr_to_ay(address)?;
                self.out(&format!(
                    "  sta  P8ZP_SCRATCH_W2 |  sty  P8ZP_SCRATCH_W2+1 |  lda  {}",
                    operand.lo()
                ));
            }
            None => {
                self.warn_slow(value.span);
                self.expr_to_stack(value)?;
                self.expr_to_ay(address)?;
                self.out("  sta  P8ZP_SCRATCH_W2 |  sty  P8ZP_SCRATCH_W2+1 |  inx |  lda  P8ESTACK_LO,x");
            }
        }
        self.store_indirect_a("P8ZP_SCRATCH_W2", 0);
        Ok(())
    }

    fn assign_element(&mut self, array: &ScopedName, index: &Expr, value: &Expr) -> Result<()> {
        let decl = self.variable(array, index.span)?;
        let name = self.asm_name(array);
        let element = element_type(decl.dt);
        let constant = index.constant_int();
        if let Some(i) = constant {
            check_index(decl.element_count(), i, index.span)?;
        }

        match element {
            dt if dt.is_byte() => match constant {
                Some(i) => {
                    self.expr_to_a(value)?;
                    self.out(&format!("  sta  {}", indexed_name(&name, i as usize)));
                }
                None => match self.simple_operand(index)? {
                    Some(operand) => {
                        self.expr_to_a(value)?;
                        self.out(&format!("  ldy  {} |  sta  {},y", operand.lo(), name));
                    }
                    None => {
                        self.expr_to_stack(value)?;
                        self.index_to_y(index, 1)?;
                        self.out(&format!("  inx |  lda  P8ESTACK_LO,x |  sta  {},y", name));
                    }
                },
            },
            dt if dt.is_word() => match constant {
                Some(i) => {
                    let target = indexed_name(&name, i as usize * 2);
                    self.expr_to_ay(value)?;
                    self.out(&format!("  sta  {t} |  sty  {t}+1", t = target));
                }
                None => match self.simple_operand(value)? {
                    Some(operand) => {
                        self.index_to_y(index, 2)?;
                        self.out(&format!(
                            "  lda  {} |  sta  {n},y |  lda  {} |  sta  {n}+1,y",
                            operand.lo(),
                            operand.hi(),
                            n = name
                        ));
                    }
                    None => {
                        self.expr_to_stack(value)?;
                        self.index_to_y(index, 2)?;
                        self.out(&format!(
                            "  inx |  lda  P8ESTACK_LO,x |  sta  {n},y |  lda  P8ESTACK_HI,x |  sta  {n}+1,y",
                            n = name
                        ));
                    }
                },
            },
            _ => match constant {
                Some(i) => {
                    self.expr_to_fac1(value)?;
                    self.store_fac1(&indexed_name(&name, i as usize * 5));
                }
                None => {
                    self.float_element_address_to_ay(array, index)?;
                    self.out("  sta  P8ESTACK_LO,x |  tya |  sta  P8ESTACK_HI,x |  dex");
                    self.expr_to_fac1(value)?;
                    self.out("  inx |  lda  P8ESTACK_LO,x |  ldy  P8ESTACK_HI,x");
                    self.out("  stx  P8ZP_SCRATCH_REG |  tax |  jsr  floats.MOVMF |  ldx  P8ZP_SCRATCH_REG");
                }
            },
        }
        Ok(())
    }
}

fn check_index(count: Option<usize>, index: i32, span: Span) -> Result<()> {
    match count {
        Some(count) if index < 0 || index as usize >= count => Err(CompileError::new(
            crate::error::ErrorCode::ValueOutOfRange,
            format!("array index {} out of bounds (size {})", index, count),
            span,
        )),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Block, Program, Subroutine, VarDecl, VarInit};
    use crate::config::{CompilationOptions, CpuType};
    use crate::error::{Diagnostics, ErrorCode};
    use pretty_assertions::assert_eq;

    fn program() -> Program {
        let mut program = Program::new("assign");
        let mut block = Block::new("main", Span::default());
        for (name, dt) in [
            ("b", DataType::Ubyte),
            ("w", DataType::Uword),
            ("f", DataType::Float),
            ("ptr", DataType::Uword),
        ] {
            block.variables.push(VarDecl::new(
                ScopedName::parse(&format!("main.{}", name)),
                dt,
                Span::default(),
            ));
        }
        let mut words = VarDecl::new(ScopedName::parse("main.words"), DataType::ArrayUw, Span::default());
        words.array_size = Some(4);
        block.variables.push(words);
        let mut text = VarDecl::new(ScopedName::parse("main.text"), DataType::Str, Span::default());
        text.value = Some(VarInit::Str("hi".to_string()));
        block.variables.push(text);
        block
            .subroutines
            .push(Subroutine::new(ScopedName::parse("main.start"), Span::default()));
        program.blocks.push(block);
        program
    }

    fn var(name: &str, dt: DataType) -> Expr {
        Expr::identifier(ScopedName::parse(name), dt, Span::default())
    }

    fn translate(assignment: Assignment, options: CompilationOptions) -> Result<Vec<String>> {
        let program = program();
        let mut diagnostics = Diagnostics::new();
        let mut session = CodegenSession::new(&program, options, &mut diagnostics);
        session.scope = ScopedName::parse("main");
        session.translate_assignment(&assignment)?;
        Ok(session.emitter.lines().to_vec())
    }

    #[test]
    fn test_word_constant_store() {
        let assignment = Assignment {
            target: AssignTarget::Variable(ScopedName::parse("main.w")),
            dt: DataType::Uword,
            value: Expr::number(0x1234 as f64, DataType::Uword, Span::default()),
        };
        let lines = translate(assignment, CompilationOptions::default()).unwrap();
        assert_eq!(lines, vec!["\tlda  #$34", "\tsta  w", "\tlda  #$12", "\tsta  w+1"]);
    }

    #[test]
    fn test_65c02_stores_zero_directly() {
        let assignment = Assignment {
            target: AssignTarget::Variable(ScopedName::parse("main.b")),
            dt: DataType::Ubyte,
            value: Expr::number(0.0, DataType::Ubyte, Span::default()),
        };
        let options = CompilationOptions::default().with_cpu(CpuType::Cpu65c02);
        let lines = translate(assignment, options).unwrap();
        assert_eq!(lines, vec!["\tstz  b"]);
    }

    #[test]
    fn test_pointer_store() {
        let assignment = Assignment {
            target: AssignTarget::Memory(Box::new(var("main.ptr", DataType::Uword))),
            dt: DataType::Ubyte,
            value: var("main.b", DataType::Ubyte),
        };
        let lines = translate(assignment, CompilationOptions::default()).unwrap();
        assert_eq!(lines.first().map(String::as_str), Some("\tlda  b"));
        assert_eq!(lines.last().map(String::as_str), Some("\tsta  (P8ZP_SCRATCH_W2),y"));
    }

    #[test]
    fn test_word_element_with_variable_index() {
        let assignment = Assignment {
            target: AssignTarget::ArrayElement {
                array: ScopedName::parse("main.words"),
                index: Box::new(var("main.b", DataType::Ubyte)),
            },
            dt: DataType::Uword,
            value: var("main.w", DataType::Uword),
        };
        let lines = translate(assignment, CompilationOptions::default()).unwrap();
        assert_eq!(
            lines,
            vec!["\tlda  b", "\tasl  a", "\ttay", "\tlda  w", "\tsta  words,y", "\tlda  w+1", "\tsta  words+1,y"]
        );
    }

    #[test]
    fn test_constant_index_out_of_bounds() {
        let assignment = Assignment {
            target: AssignTarget::ArrayElement {
                array: ScopedName::parse("main.words"),
                index: Box::new(Expr::number(4.0, DataType::Ubyte, Span::default())),
            },
            dt: DataType::Uword,
            value: var("main.w", DataType::Uword),
        };
        let error = translate(assignment, CompilationOptions::default()).unwrap_err();
        assert_eq!(error.code, ErrorCode::ValueOutOfRange);
    }

    #[test]
    fn test_string_copy() {
        let assignment = Assignment {
            target: AssignTarget::Variable(ScopedName::parse("main.text")),
            dt: DataType::Str,
            value: var("main.text", DataType::Str),
        };
        let lines = translate(assignment, CompilationOptions::default()).unwrap();
        assert_eq!(lines.last().map(String::as_str), Some("\tjsr  prog8_lib.strcpy"));
    }

    #[test]
    fn test_register_pair_ax() {
        let program = program();
        let mut diagnostics = Diagnostics::new();
        let mut session =
            CodegenSession::new(&program, CompilationOptions::default(), &mut diagnostics);
        session.scope = ScopedName::parse("main");
        let dt = session
            .deliver(&var("main.w", DataType::Uword), Destination::Register(RegisterOrPair::AX))
            .unwrap();
        assert_eq!(dt, DataType::Uword);
        assert_eq!(
            session.emitter.lines(),
            &["\tlda  w", "\tldy  w+1", "\tpha", "\ttya", "\ttax", "\tpla"]
        );
    }
}
