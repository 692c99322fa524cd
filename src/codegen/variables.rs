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

//! Variable allocation and declaration output.
//!
//! This module provides:
//! - The whole-program zero page sweep (required, then preferred variables)
//! - Late zero page placement of integer variables without a wish
//! - Memory-mapped definitions, constants and external routine addresses
//! - Data declarations of variables, strings and arrays

use log::{debug, trace};

use super::types::{encode_petscii, f64_to_mflpt, float_comment, float_fill_asm, to_hex};
use super::CodegenSession;
use crate::ast::{
    ArrayElement, AssignTarget, Assignment, Block, DataType, Expr, ScopedName, Subroutine,
    VarDecl, VarDeclKind, VarInit, ZeropageWish,
};
use crate::config::ZeropageType;
use crate::error::{CompileError, ErrorCode, Result, Span};

/// Values per line in data declarations.
const CHUNK_SIZE: usize = 16;

/// Extension trait for variable allocation and declaration output.
pub trait VariableManager {
    /// Place every variable that asks for zero page.
    ///
    /// Required variables first; any failure there is fatal. Preferred
    /// variables follow, smallest first, and stay in normal memory when they
    /// do not fit.
    fn allocate_all_zeropage_variables(&mut self) -> Result<()>;

    /// Emit the definitions of the zero page variables among `variables`.
    fn zeropage_vars_asm(&mut self, variables: &[VarDecl]) -> Result<()>;

    /// Emit memory-mapped variables, constants and external routines.
    fn memdefs_asm(&mut self, variables: &[VarDecl], subroutines: &[Subroutine]) -> Result<()>;

    /// Emit the data of the variables that are not in zero page.
    ///
    /// Block level numeric variables get their value from the block's
    /// initialization routine, so their data is zero.
    fn vardecls_asm(&mut self, variables: &[VarDecl], block_level: bool) -> Result<()>;

    /// Emit the initial data of a zero page string or array under `label`.
    fn zp_init_value_asm(&mut self, decl: &VarDecl, label: &str) -> Result<()>;
}

impl VariableManager for CodegenSession<'_> {
    fn allocate_all_zeropage_variables(&mut self) -> Result<()> {
        let program = self.program;
        let mut candidates: Vec<&VarDecl> = Vec::new();
        for block in &program.blocks {
            candidates.extend(block.variables.iter());
            for sub in &block.subroutines {
                candidates.extend(sub.variables.iter());
            }
        }
        candidates.retain(|decl| decl.kind == VarDeclKind::Var);

        let mut first_error: Option<CompileError> = None;
        for decl in candidates
            .iter()
            .filter(|d| d.zeropage == ZeropageWish::Require)
        {
            let result = self.zeropage.allocate(
                &decl.scoped_name,
                decl.dt,
                decl.element_count(),
                Some(decl.span),
                &mut *self.reporter,
            );
            if let Err(error) = result {
                let error = error.into_compile_error(decl.span);
                self.reporter.err(error.clone());
                first_error.get_or_insert(error);
            }
        }
        if let Some(error) = first_error {
            return Err(error);
        }
        // required variables fail above when zero page is disabled
        if self.options.zeropage == ZeropageType::Dontuse {
            return Ok(());
        }

        let mut preferred: Vec<&VarDecl> = candidates
            .iter()
            .copied()
            .filter(|d| d.zeropage == ZeropageWish::Prefer)
            .collect();
        preferred.sort_by_key(|d| d.dt.memory_size());
        for decl in preferred {
            let result = self.zeropage.allocate(
                &decl.scoped_name,
                decl.dt,
                decl.element_count(),
                Some(decl.span),
                &mut *self.reporter,
            );
            if let Err(error) = result {
                trace!("'{}' stays in normal memory: {}", decl.scoped_name, error);
            }
        }

        debug!(
            "zeropage sweep done, {} bytes left",
            self.zeropage.available_bytes()
        );
        Ok(())
    }

    fn zeropage_vars_asm(&mut self, variables: &[VarDecl]) -> Result<()> {
        self.out("; vars allocated on zeropage");
        for decl in variables.iter().filter(|d| d.kind == VarDeclKind::Var) {
            match self.zeropage.allocated_variable(&decl.scoped_name) {
                Some(allocation) => {
                    let size = match decl.dt {
                        DataType::Float | DataType::Str => format!("  {} bytes", allocation.size),
                        dt if dt.is_array() => format!("  {} bytes", allocation.size),
                        _ => String::new(),
                    };
                    let line = format!(
                        "{} = {}\t; zp {}{}",
                        decl.name, allocation.address, decl.dt, size
                    );
                    self.out(&line);
                }
                None => {
                    let fits = if decl.dt.is_byte() {
                        self.zeropage.has_byte_available()
                    } else {
                        self.zeropage.has_word_available()
                    };
                    if decl.zeropage != ZeropageWish::Forbid && decl.dt.is_integer() && fits {
                        let result = self.zeropage.allocate(
                            &decl.scoped_name,
                            decl.dt,
                            None,
                            None,
                            &mut *self.reporter,
                        );
                        if let Ok((address, _)) = result {
                            trace!("late zeropage placement of '{}'", decl.scoped_name);
                            self.out(&format!("{} = {}\t; zp {}", decl.name, address, decl.dt));
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn memdefs_asm(&mut self, variables: &[VarDecl], subroutines: &[Subroutine]) -> Result<()> {
        self.out("\n; memdefs and kernal subroutines");
        for decl in variables
            .iter()
            .filter(|d| matches!(d.kind, VarDeclKind::Memory | VarDeclKind::Const))
        {
            if decl.dt == DataType::Float {
                continue;
            }
            let value = decl.number().ok_or_else(|| {
                CompileError::internal(
                    format!("'{}' needs a numeric value", decl.scoped_name),
                    decl.span,
                )
            })?;
            self.out(&format!("  {} = {}", decl.name, to_hex(value as i32)));
        }
        for sub in subroutines.iter().filter(|s| s.is_asm) {
            if let Some(address) = sub.address {
                if !sub.statements.is_empty() {
                    return Err(CompileError::internal(
                        "kernal subroutine cannot have statements",
                        sub.span,
                    ));
                }
                self.out(&format!("  {} = {}", sub.name, to_hex(address as i32)));
            }
        }
        Ok(())
    }

    fn vardecls_asm(&mut self, variables: &[VarDecl], block_level: bool) -> Result<()> {
        self.out("\n; non-zeropage variables");
        let in_memory: Vec<&VarDecl> = variables
            .iter()
            .filter(|d| d.kind == VarDeclKind::Var && !self.is_zp_variable(&d.scoped_name))
            .collect();

        for decl in in_memory.iter().filter(|d| d.dt == DataType::Str) {
            let name = decl.name.clone();
            self.output_string_var(decl, &name)?;
        }

        let mut others: Vec<&VarDecl> = in_memory
            .into_iter()
            .filter(|d| d.dt != DataType::Str)
            .collect();
        others.sort_by_key(|d| d.dt);
        for decl in others {
            self.vardecl_asm(decl, block_level)?;
        }
        Ok(())
    }

    fn zp_init_value_asm(&mut self, decl: &VarDecl, label: &str) -> Result<()> {
        if decl.dt == DataType::Str {
            self.output_string_var(decl, label)
        } else {
            self.output_array(decl, label)
        }
    }
}

impl CodegenSession<'_> {
    fn vardecl_asm(&mut self, decl: &VarDecl, block_level: bool) -> Result<()> {
        let name = &decl.name;
        let value = if block_level { None } else { decl.number() };
        let line = match decl.dt {
            DataType::Ubyte => format!("{}\t.byte  {}", name, to_hex(value.unwrap_or(0.0) as i32)),
            DataType::Byte => format!("{}\t.char  {}", name, value.unwrap_or(0.0) as i32),
            DataType::Uword => format!("{}\t.word  {}", name, to_hex(value.unwrap_or(0.0) as i32)),
            DataType::Word => format!("{}\t.sint  {}", name, value.unwrap_or(0.0) as i32),
            DataType::Float => match value {
                Some(v) => format!(
                    "{}\t.byte  {}  ; float {}",
                    name,
                    float_fill_asm(float_bytes(v, decl.span)?),
                    float_comment(v)
                ),
                None => format!("{}\t.byte  0,0,0,0,0  ; float", name),
            },
            DataType::Str => {
                return Err(CompileError::internal(
                    "string variables are output separately",
                    decl.span,
                ))
            }
            _ => return self.output_array(decl, name),
        };
        self.out(&line);
        Ok(())
    }

    fn output_string_var(&mut self, decl: &VarDecl, label: &str) -> Result<()> {
        let text = match &decl.value {
            Some(VarInit::Str(text)) => text.as_str(),
            _ => {
                return Err(CompileError::internal(
                    format!("string '{}' has no value", decl.scoped_name),
                    decl.span,
                ))
            }
        };
        let mut bytes = encode_petscii(text).map_err(|c| {
            CompileError::new(
                ErrorCode::ValueOutOfRange,
                format!("cannot encode character '{}' in PETSCII", c.escape_debug()),
                decl.span,
            )
        })?;
        bytes.push(0);

        self.out(&format!(
            "{}\t; {} \"{}\"",
            label,
            decl.dt,
            text.escape_debug()
        ));
        let values: Vec<String> = bytes.iter().map(|b| format!("${:02x}", b)).collect();
        for chunk in values.chunks(CHUNK_SIZE) {
            self.out(&format!("  .byte  {}", chunk.join(", ")));
        }
        Ok(())
    }

    fn output_array(&mut self, decl: &VarDecl, label: &str) -> Result<()> {
        if decl.dt == DataType::ArrayF {
            let values = array_numbers(decl)?;
            self.out(label);
            for value in values {
                let fill = float_fill_asm(float_bytes(value, decl.span)?);
                self.out(&format!("  .byte  {}  ; float {}", fill, float_comment(value)));
            }
            return Ok(());
        }

        let directive = match decl.dt {
            DataType::ArrayUb => ".byte",
            DataType::ArrayB => ".char",
            DataType::ArrayUw => ".word",
            DataType::ArrayW => ".sint",
            other => {
                return Err(CompileError::internal(
                    format!("invalid array datatype {}", other),
                    decl.span,
                ))
            }
        };
        let data = self.array_fill_data(decl)?;
        if data.len() <= CHUNK_SIZE {
            self.out(&format!("{}\t{}  {}", label, directive, data.join(", ")));
        } else {
            self.out(label);
            for chunk in data.chunks(CHUNK_SIZE) {
                self.out(&format!("  {}  {}", directive, chunk.join(", ")));
            }
        }
        Ok(())
    }

    fn array_fill_data(&self, decl: &VarDecl) -> Result<Vec<String>> {
        let element_dt = decl.dt.element_type().unwrap_or(DataType::Ubyte);
        let elements: Vec<ArrayElement> = match &decl.value {
            Some(VarInit::Array(elements)) => elements.clone(),
            None => vec![ArrayElement::Number(0.0); decl.element_count().unwrap_or(0)],
            Some(_) => {
                return Err(CompileError::internal(
                    format!("array '{}' has a non-array value", decl.scoped_name),
                    decl.span,
                ))
            }
        };
        Ok(elements
            .iter()
            .map(|element| match element {
                ArrayElement::AddressOf(name) => self.asm_name(name),
                ArrayElement::Number(value) => {
                    let value = *value as i32;
                    let digits = if element_dt.is_byte() { 2 } else { 4 };
                    if value < 0 {
                        format!("-${:0width$x}", -value, width = digits)
                    } else {
                        format!("${:0width$x}", value, width = digits)
                    }
                }
            })
            .collect())
    }
}

fn float_bytes(value: f64, span: Span) -> Result<[u8; 5]> {
    f64_to_mflpt(value).ok_or_else(|| {
        CompileError::new(
            ErrorCode::ValueOutOfRange,
            format!("floating point value out of range: {}", value),
            span,
        )
    })
}

fn array_numbers(decl: &VarDecl) -> Result<Vec<f64>> {
    match &decl.value {
        None => Ok(vec![0.0; decl.element_count().unwrap_or(0)]),
        Some(VarInit::Array(elements)) => elements
            .iter()
            .map(|element| match element {
                ArrayElement::Number(value) => Ok(*value),
                ArrayElement::AddressOf(_) => Err(CompileError::internal(
                    "float arrays cannot hold addresses",
                    decl.span,
                )),
            })
            .collect(),
        Some(_) => Err(CompileError::internal(
            format!("array '{}' has a non-array value", decl.scoped_name),
            decl.span,
        )),
    }
}

/// The assignments that initialize the numeric variables of a block.
pub fn block_initializers(block: &Block) -> Vec<Assignment> {
    block
        .variables
        .iter()
        .filter(|d| d.kind == VarDeclKind::Var && d.dt.is_numeric())
        .filter_map(|decl| {
            decl.number().map(|value| Assignment {
                target: AssignTarget::Variable(decl.scoped_name.clone()),
                dt: decl.dt,
                value: Expr::number(value, decl.dt, decl.span),
            })
        })
        .collect()
}

/// The label of the initial value of a zero page string or array.
pub fn zp_init_label(name: &ScopedName) -> String {
    format!("{}_init_value", name.parts().join("_"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Program;
    use crate::config::CompilationOptions;
    use crate::error::Diagnostics;

    fn var(scope: &str, name: &str, dt: DataType) -> VarDecl {
        VarDecl::new(ScopedName::parse(scope).child(name), dt, Span::default())
    }

    fn program_with(vars: Vec<VarDecl>) -> Program {
        let mut program = Program::new("test");
        let mut block = Block::new("main", Span::default());
        block.variables = vars;
        program.blocks.push(block);
        program
    }

    #[test]
    fn test_block_initializers() {
        let mut a = var("main", "a", DataType::Ubyte);
        a.value = Some(VarInit::Number(7.0));
        let b = var("main", "b", DataType::Uword);
        let mut s = var("main", "s", DataType::Str);
        s.value = Some(VarInit::Str("hi".into()));
        let program = program_with(vec![a, b, s]);
        let inits = block_initializers(&program.blocks[0]);
        assert_eq!(inits.len(), 1);
        assert_eq!(inits[0].value.constant_value(), Some(7.0));
    }

    #[test]
    fn test_zp_init_label() {
        assert_eq!(
            zp_init_label(&ScopedName::parse("main.start.text")),
            "main_start_text_init_value"
        );
    }

    #[test]
    fn test_required_overflow_is_fatal() {
        let mut vars = Vec::new();
        for i in 0..20 {
            let mut decl = var("main", &format!("v{}", i), DataType::Ubyte);
            decl.zeropage = ZeropageWish::Require;
            vars.push(decl);
        }
        let program = program_with(vars);
        let mut diagnostics = Diagnostics::new();
        let mut session =
            CodegenSession::new(&program, CompilationOptions::default(), &mut diagnostics);
        let error = session.allocate_all_zeropage_variables().unwrap_err();
        assert_eq!(error.code, ErrorCode::ZeropageExhausted);
        drop(session);
        assert!(!diagnostics.errors().is_empty());
    }

    #[test]
    fn test_required_variables_fail_when_zeropage_is_disabled() {
        let mut required = var("main", "r", DataType::Ubyte);
        required.zeropage = ZeropageWish::Require;
        let mut preferred = var("main", "p", DataType::Ubyte);
        preferred.zeropage = ZeropageWish::Prefer;
        let program = program_with(vec![preferred, required]);
        let mut diagnostics = Diagnostics::new();
        let options = CompilationOptions::new().with_zeropage(ZeropageType::Dontuse);
        let mut session = CodegenSession::new(&program, options, &mut diagnostics);
        let error = session.allocate_all_zeropage_variables().unwrap_err();
        assert_eq!(error.code, ErrorCode::ZeropageDisabled);
        assert_eq!(session.zeropage().allocations().count(), 0);
    }

    #[test]
    fn test_required_array_larger_than_zeropage_is_exhausted() {
        let mut big = var("main", "big", DataType::ArrayUw);
        big.zeropage = ZeropageWish::Require;
        big.array_size = Some(128);
        let mut small = var("main", "small", DataType::Ubyte);
        small.zeropage = ZeropageWish::Require;
        let program = program_with(vec![big, small]);
        let mut diagnostics = Diagnostics::new();
        let options = CompilationOptions::new().with_zeropage(ZeropageType::Full);
        let mut session = CodegenSession::new(&program, options, &mut diagnostics);
        let error = session.allocate_all_zeropage_variables().unwrap_err();
        assert_eq!(error.code, ErrorCode::ZeropageExhausted);
        let placed: Vec<String> = session
            .zeropage()
            .allocations()
            .map(|a| a.name.to_string())
            .collect();
        assert_eq!(placed, vec!["main.small".to_string()]);
    }

    #[test]
    fn test_preferred_overflow_is_silent() {
        let mut vars = Vec::new();
        for i in 0..20 {
            let mut decl = var("main", &format!("v{}", i), DataType::Uword);
            decl.zeropage = ZeropageWish::Prefer;
            vars.push(decl);
        }
        let program = program_with(vars);
        let mut diagnostics = Diagnostics::new();
        let mut session =
            CodegenSession::new(&program, CompilationOptions::default(), &mut diagnostics);
        session.allocate_all_zeropage_variables().unwrap();
        let placed = session.zeropage().allocations().count();
        assert!(placed > 0 && placed < 20);
        drop(session);
        assert!(diagnostics.errors().is_empty());
    }

    #[test]
    fn test_array_fill_data_formats_signed_values() {
        let mut decl = var("main", "arr", DataType::ArrayB);
        decl.value = Some(VarInit::Array(vec![
            ArrayElement::Number(-1.0),
            ArrayElement::Number(16.0),
        ]));
        let program = program_with(vec![decl.clone()]);
        let mut diagnostics = Diagnostics::new();
        let session =
            CodegenSession::new(&program, CompilationOptions::default(), &mut diagnostics);
        assert_eq!(session.array_fill_data(&decl).unwrap(), vec!["-$01", "$10"]);
    }
}
