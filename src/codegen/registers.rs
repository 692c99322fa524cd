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

//! Register save and restore sequences.
//!
//! The 65C02 pushes every register directly. The 6502 can only push A, so
//! X and Y travel through A (keeping A intact through `P8ZP_SCRATCH_REG`
//! when asked) or are parked in per-subroutine save slots.

use super::CodegenSession;
use crate::ast::CpuRegister;

/// Extension trait for saving and restoring CPU registers.
pub trait RegisterManager {
    /// Push a register on the hardware stack.
    fn save_register_stack(&mut self, register: CpuRegister, keep_a: bool);

    /// Pull a register pushed by `save_register_stack`.
    fn restore_register_stack(&mut self, register: CpuRegister, keep_a: bool);

    /// Save a register in the current subroutine's save slot.
    fn save_register_local(&mut self, register: CpuRegister);

    /// Restore a register saved by `save_register_local`.
    fn restore_register_local(&mut self, register: CpuRegister);
}

impl RegisterManager for CodegenSession<'_> {
    fn save_register_stack(&mut self, register: CpuRegister, keep_a: bool) {
        match register {
            CpuRegister::A => self.out("  pha"),
            CpuRegister::X if self.is_65c02() => self.out("  phx"),
            CpuRegister::Y if self.is_65c02() => self.out("  phy"),
            CpuRegister::X => {
                if keep_a {
                    self.out("  sta  P8ZP_SCRATCH_REG |  txa |  pha |  lda  P8ZP_SCRATCH_REG");
                } else {
                    self.out("  txa |  pha");
                }
            }
            CpuRegister::Y => {
                if keep_a {
                    self.out("  sta  P8ZP_SCRATCH_REG |  tya |  pha |  lda  P8ZP_SCRATCH_REG");
                } else {
                    self.out("  tya |  pha");
                }
            }
        }
    }

    fn restore_register_stack(&mut self, register: CpuRegister, keep_a: bool) {
        match register {
            CpuRegister::A => self.out("  pla"),
            CpuRegister::X if self.is_65c02() => self.out("  plx"),
            CpuRegister::Y if self.is_65c02() => self.out("  ply"),
            CpuRegister::X => {
                if keep_a {
                    self.out("  sta  P8ZP_SCRATCH_REG |  pla |  tax |  lda  P8ZP_SCRATCH_REG");
                } else {
                    self.out("  pla |  tax");
                }
            }
            CpuRegister::Y => {
                if keep_a {
                    self.out("  sta  P8ZP_SCRATCH_REG |  pla |  tay |  lda  P8ZP_SCRATCH_REG");
                } else {
                    self.out("  pla |  tay");
                }
            }
        }
    }

    fn save_register_local(&mut self, register: CpuRegister) {
        if self.is_65c02() {
            match register {
                CpuRegister::A => self.out("  pha"),
                CpuRegister::X => self.out("  phx"),
                CpuRegister::Y => self.out("  phy"),
            }
            return;
        }
        match register {
            CpuRegister::A => {
                self.frame.regsave_a = true;
                self.out("  sta  prog8_regsaveA");
            }
            CpuRegister::X => {
                self.frame.regsave_x = true;
                self.out("  stx  prog8_regsaveX");
            }
            CpuRegister::Y => {
                self.frame.regsave_y = true;
                self.out("  sty  prog8_regsaveY");
            }
        }
    }

    fn restore_register_local(&mut self, register: CpuRegister) {
        if self.is_65c02() {
            match register {
                CpuRegister::A => self.out("  pla"),
                CpuRegister::X => self.out("  plx"),
                CpuRegister::Y => self.out("  ply"),
            }
            return;
        }
        match register {
            CpuRegister::A => self.out("  lda  prog8_regsaveA"),
            CpuRegister::X => self.out("  ldx  prog8_regsaveX"),
            CpuRegister::Y => self.out("  ldy  prog8_regsaveY"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Block, Program, ScopedName, Subroutine};
    use crate::config::{CompilationOptions, CpuType};
    use crate::error::{Diagnostics, Span};

    fn program() -> Program {
        let mut program = Program::new("regs");
        let mut block = Block::new("main", Span::default());
        block
            .subroutines
            .push(Subroutine::new(ScopedName::parse("main.start"), Span::default()));
        program.blocks.push(block);
        program
    }

    #[test]
    fn test_6502_keeps_a_through_scratch_register() {
        let program = program();
        let mut diagnostics = Diagnostics::new();
        let mut session =
            CodegenSession::new(&program, CompilationOptions::default(), &mut diagnostics);
        session.save_register_stack(CpuRegister::X, true);
        session.restore_register_stack(CpuRegister::X, false);
        assert_eq!(
            session.emitter.lines(),
            &[
                "\tsta  P8ZP_SCRATCH_REG",
                "\ttxa",
                "\tpha",
                "\tlda  P8ZP_SCRATCH_REG",
                "\tpla",
                "\ttax"
            ]
        );
    }

    #[test]
    fn test_65c02_uses_direct_pushes() {
        let program = program();
        let mut diagnostics = Diagnostics::new();
        let options = CompilationOptions::default().with_cpu(CpuType::Cpu65c02);
        let mut session = CodegenSession::new(&program, options, &mut diagnostics);
        session.save_register_local(CpuRegister::Y);
        session.restore_register_local(CpuRegister::Y);
        assert_eq!(session.emitter.lines(), &["\tphy", "\tply"]);
        assert!(!session.frame.regsave_y);
    }

    #[test]
    fn test_6502_local_save_flags_slot() {
        let program = program();
        let mut diagnostics = Diagnostics::new();
        let mut session =
            CodegenSession::new(&program, CompilationOptions::default(), &mut diagnostics);
        session.save_register_local(CpuRegister::X);
        session.restore_register_local(CpuRegister::X);
        assert!(session.frame.regsave_x);
        assert_eq!(
            session.emitter.lines(),
            &["\tstx  prog8_regsaveX", "\tldx  prog8_regsaveX"]
        );
    }
}
