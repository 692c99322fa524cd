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

//! The runtime library, executed natively by the simulator.
//!
//! Every routine the generated code calls (`math.*`, `floats.*`,
//! `prog8_lib.*`, `c64.*`, `sys.*`) gets an address in a reserved area at
//! the top of memory. When the CPU reaches such an address, the routine
//! runs natively and returns like `rts`. The float accumulators FAC1 and
//! FAC2 are kept as `f64` and converted from and to the 5-byte memory
//! format when routines read or store floats.

use std::sync::OnceLock;

use log::trace;
use thiserror::Error;

use super::cpu::{Cpu, Memory, FLAG_N, FLAG_Z};
use crate::codegen::types::{f64_to_mflpt, mflpt_to_f64, FLOAT_MAX_POSITIVE};
use crate::codegen::zeropage::{SCRATCH_W1, SCRATCH_W2};
use crate::codegen::{ESTACK_HI, ESTACK_LO};

/// First address of the native routines.
pub const RUNTIME_BASE: u16 = 0xfe00;
/// Returning here ends a simulation.
pub const EXIT_TRAP: u16 = 0xfdfe;
/// Storage of `prog8_lib.orig_stackpointer`.
pub const ORIG_STACKPOINTER: u16 = 0xfdf0;
/// The kernal character output routine.
pub const CHROUT: u16 = 0xffd2;

/// Errors raised by runtime routines.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RuntimeError {
    /// A float result does not fit the 5-byte format.
    #[error("float overflow in {routine}: {value}")]
    FloatOverflow { routine: &'static str, value: f64 },

    /// Float division by zero.
    #[error("float division by zero")]
    DivisionByZero,
}

/// The native routines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Routine {
    InitSystem,
    InitSystemPhase2,
    ResetSystem,
    Exit,
    Chrout,
    MultiplyBytes,
    MultiplyWords,
    DivmodUbyte,
    DivmodByte,
    DivmodUword,
    DivmodWord,
    Strcpy,
    Memcopy,
    StrcmpMem,
    Fadd,
    Fsub,
    Fmult,
    Fdiv,
    Fpwr,
    Fcomp,
    Freadsa,
    Freaduy,
    Givayfay,
    Givuayfay,
    Movef,
    Movfa,
    Movfm,
    Movmf,
    Negop,
    Sign,
    CastToUword,
    CastToWord,
    CopyFloat,
    PushFac1,
    PopFac1,
}

const ROUTINES: &[(&str, Routine)] = &[
    ("c64.init_system", Routine::InitSystem),
    ("c64.init_system_phase2", Routine::InitSystemPhase2),
    ("sys.reset_system", Routine::ResetSystem),
    ("sys.exit", Routine::Exit),
    ("math.multiply_bytes", Routine::MultiplyBytes),
    ("math.multiply_words", Routine::MultiplyWords),
    ("math.divmod_ub_asm", Routine::DivmodUbyte),
    ("math.divmod_b_asm", Routine::DivmodByte),
    ("math.divmod_uw_asm", Routine::DivmodUword),
    ("math.divmod_w_asm", Routine::DivmodWord),
    ("prog8_lib.strcpy", Routine::Strcpy),
    ("prog8_lib.memcopy", Routine::Memcopy),
    ("prog8_lib.strcmp_mem", Routine::StrcmpMem),
    ("floats.FADD", Routine::Fadd),
    ("floats.FSUB", Routine::Fsub),
    ("floats.FMULT", Routine::Fmult),
    ("floats.FDIV", Routine::Fdiv),
    ("floats.FPWR", Routine::Fpwr),
    ("floats.FCOMP", Routine::Fcomp),
    ("floats.FREADSA", Routine::Freadsa),
    ("floats.FREADUY", Routine::Freaduy),
    ("floats.GIVAYFAY", Routine::Givayfay),
    ("floats.GIVUAYFAY", Routine::Givuayfay),
    ("floats.MOVEF", Routine::Movef),
    ("floats.MOVFA", Routine::Movfa),
    ("floats.MOVFM", Routine::Movfm),
    ("floats.MOVMF", Routine::Movmf),
    ("floats.NEGOP", Routine::Negop),
    ("floats.SIGN", Routine::Sign),
    ("floats.cast_FAC1_as_uw_into_ay", Routine::CastToUword),
    ("floats.cast_FAC1_as_w_into_ay", Routine::CastToWord),
    ("floats.copy_float", Routine::CopyFloat),
    ("floats.push_fac1", Routine::PushFac1),
    ("floats.pop_fac1", Routine::PopFac1),
];

/// Each routine occupies this many bytes of the reserved area.
const ROUTINE_STRIDE: u16 = 3;

struct Entry {
    name: &'static str,
    address: u16,
    routine: Routine,
}

fn entries() -> &'static [Entry] {
    static ENTRIES: OnceLock<Vec<Entry>> = OnceLock::new();
    ENTRIES.get_or_init(|| {
        let mut entries: Vec<Entry> = ROUTINES
            .iter()
            .enumerate()
            .map(|(index, (name, routine))| Entry {
                name: *name,
                address: RUNTIME_BASE + index as u16 * ROUTINE_STRIDE,
                routine: *routine,
            })
            .collect();
        entries.push(Entry {
            name: "c64.CHROUT",
            address: CHROUT,
            routine: Routine::Chrout,
        });
        entries
    })
}

/// Symbols of the runtime library, for the assembler.
pub fn runtime_symbols() -> Vec<(&'static str, u16)> {
    let mut symbols: Vec<(&'static str, u16)> =
        entries().iter().map(|entry| (entry.name, entry.address)).collect();
    symbols.push(("prog8_lib.orig_stackpointer", ORIG_STACKPOINTER));
    symbols
}

/// What the simulator does after a native routine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Return to the caller.
    Return,
    /// End the program.
    Stop,
}

/// State of the native runtime.
#[derive(Debug, Default, Clone)]
pub struct Runtime {
    pub fac1: f64,
    pub fac2: f64,
    output: String,
}

fn sign(value: f64) -> u8 {
    if value > 0.0 {
        1
    } else if value < 0.0 {
        0xff
    } else {
        0
    }
}

fn ay(cpu: &Cpu) -> u16 {
    u16::from_le_bytes([cpu.a, cpu.y])
}

fn set_ay(cpu: &mut Cpu, value: u16) {
    let [lo, hi] = value.to_le_bytes();
    cpu.a = lo;
    cpu.y = hi;
}

fn set_a(cpu: &mut Cpu, value: u8) {
    cpu.a = value;
    cpu.set_flag(FLAG_Z, value == 0);
    cpu.set_flag(FLAG_N, value & 0x80 != 0);
}

fn petscii_to_char(byte: u8) -> char {
    match byte {
        0x0d => '\n',
        0x41..=0x5a => char::from(byte + 0x20),
        0xc1..=0xda => char::from(byte - 0x80),
        0x20..=0x7e => char::from(byte),
        _ => '?',
    }
}

impl Runtime {
    pub fn new() -> Self {
        Self::default()
    }

    /// The routine at `address`, if any.
    pub fn routine_at(&self, address: u16) -> Option<Routine> {
        entries()
            .iter()
            .find(|entry| entry.address == address)
            .map(|entry| entry.routine)
            .or_else(|| {
                // the zero page clobbering launcher pushes the address itself,
                // so its rts lands one byte further
                let reset = entries().iter().find(|e| e.routine == Routine::ResetSystem)?;
                (reset.address.wrapping_add(1) == address).then_some(Routine::ResetSystem)
            })
    }

    /// Text printed through `CHROUT`.
    pub fn output(&self) -> &str {
        &self.output
    }

    fn read_float(memory: &Memory, address: u16) -> f64 {
        let bytes = memory.slice(address, 5);
        mflpt_to_f64([bytes[0], bytes[1], bytes[2], bytes[3], bytes[4]])
    }

    fn encode(routine: &'static str, value: f64) -> Result<[u8; 5], RuntimeError> {
        f64_to_mflpt(value).ok_or(RuntimeError::FloatOverflow { routine, value })
    }

    fn check(routine: &'static str, value: f64) -> Result<f64, RuntimeError> {
        if value.is_finite() && value.abs() <= FLOAT_MAX_POSITIVE {
            Ok(value)
        } else {
            Err(RuntimeError::FloatOverflow { routine, value })
        }
    }

    /// Execute `routine` against the machine state.
    pub fn call(&mut self, routine: Routine, cpu: &mut Cpu, memory: &mut Memory) -> Result<Outcome, RuntimeError> {
        trace!("runtime call {:?}", routine);
        match routine {
            Routine::InitSystem | Routine::InitSystemPhase2 => {}
            Routine::ResetSystem => return Ok(Outcome::Stop),
            Routine::Exit => {
                cpu.sp = memory.read(ORIG_STACKPOINTER);
            }
            Routine::Chrout => self.output.push(petscii_to_char(cpu.a)),

            Routine::MultiplyBytes => set_a(cpu, cpu.a.wrapping_mul(cpu.y)),
            Routine::MultiplyWords => {
                let result = ay(cpu).wrapping_mul(memory.read_word(u16::from(SCRATCH_W1)));
                set_ay(cpu, result);
            }
            Routine::DivmodUbyte => {
                let (dividend, divisor) = (cpu.a, cpu.y);
                if divisor == 0 {
                    cpu.y = 0xff;
                    set_a(cpu, dividend);
                } else {
                    cpu.y = dividend / divisor;
                    set_a(cpu, dividend % divisor);
                }
            }
            Routine::DivmodByte => {
                let (dividend, divisor) = (cpu.a as i8, cpu.y as i8);
                if divisor == 0 {
                    cpu.y = 0xff;
                    set_a(cpu, dividend as u8);
                } else {
                    cpu.y = dividend.wrapping_div(divisor) as u8;
                    set_a(cpu, dividend.wrapping_rem(divisor) as u8);
                }
            }
            Routine::DivmodUword | Routine::DivmodWord => {
                let dividend = memory.read_word(u16::from(SCRATCH_W1));
                let divisor = ay(cpu);
                let (quotient, remainder) = if divisor == 0 {
                    (0xffff, dividend)
                } else if routine == Routine::DivmodWord {
                    let (dividend, divisor) = (dividend as i16, divisor as i16);
                    (
                        dividend.wrapping_div(divisor) as u16,
                        dividend.wrapping_rem(divisor) as u16,
                    )
                } else {
                    (dividend / divisor, dividend % divisor)
                };
                memory.write_word(u16::from(SCRATCH_W2), remainder);
                set_ay(cpu, quotient);
            }

            Routine::Strcpy => {
                let (mut source, mut target) = (ay(cpu), memory.read_word(u16::from(SCRATCH_W1)));
                let mut length = 0u8;
                loop {
                    let byte = memory.read(source);
                    memory.write(target, byte);
                    if byte == 0 || length == 255 {
                        break;
                    }
                    source = source.wrapping_add(1);
                    target = target.wrapping_add(1);
                    length += 1;
                }
                cpu.y = length;
            }
            Routine::Memcopy => {
                let source = memory.read_word(u16::from(SCRATCH_W1));
                let target = memory.read_word(u16::from(SCRATCH_W2));
                let data = memory.slice(source, usize::from(ay(cpu)));
                memory.load(target, &data);
            }
            Routine::StrcmpMem => {
                let (mut left, mut right) = (ay(cpu), memory.read_word(u16::from(SCRATCH_W2)));
                let result = loop {
                    let (l, r) = (memory.read(left), memory.read(right));
                    if l != r {
                        break if l < r { 0xff } else { 1 };
                    }
                    if l == 0 {
                        break 0;
                    }
                    left = left.wrapping_add(1);
                    right = right.wrapping_add(1);
                };
                set_a(cpu, result);
            }

            Routine::Fadd | Routine::Fsub | Routine::Fmult | Routine::Fdiv | Routine::Fpwr => {
                let operand = Self::read_float(memory, ay(cpu));
                let (name, result) = match routine {
                    Routine::Fadd => ("FADD", operand + self.fac1),
                    Routine::Fsub => ("FSUB", operand - self.fac1),
                    Routine::Fmult => ("FMULT", operand * self.fac1),
                    Routine::Fdiv => {
                        if self.fac1 == 0.0 {
                            return Err(RuntimeError::DivisionByZero);
                        }
                        ("FDIV", operand / self.fac1)
                    }
                    _ => ("FPWR", operand.powf(self.fac1)),
                };
                self.fac1 = Self::check(name, result)?;
            }
            Routine::Fcomp => {
                let operand = Self::read_float(memory, ay(cpu));
                set_a(cpu, sign(self.fac1 - operand));
            }
            Routine::Freadsa => self.fac1 = f64::from(cpu.a as i8),
            Routine::Freaduy => self.fac1 = f64::from(cpu.y),
            Routine::Givayfay => self.fac1 = f64::from(ay(cpu) as i16),
            Routine::Givuayfay => self.fac1 = f64::from(ay(cpu)),
            Routine::Movef => self.fac2 = self.fac1,
            Routine::Movfa => self.fac1 = self.fac2,
            Routine::Movfm => self.fac1 = Self::read_float(memory, ay(cpu)),
            Routine::Movmf => {
                let bytes = Self::encode("MOVMF", self.fac1)?;
                memory.load(u16::from_le_bytes([cpu.x, cpu.y]), &bytes);
            }
            Routine::Negop => self.fac1 = -self.fac1,
            Routine::Sign => set_a(cpu, sign(self.fac1)),
            Routine::CastToUword => set_ay(cpu, self.fac1.trunc() as i64 as u16),
            Routine::CastToWord => set_ay(cpu, self.fac1.trunc() as i64 as i16 as u16),
            Routine::CopyFloat => {
                let source = memory.read_word(u16::from(SCRATCH_W1));
                let data = memory.slice(source, 5);
                memory.load(ay(cpu), &data);
            }
            Routine::PushFac1 => {
                let bytes = Self::encode("push_fac1", self.fac1)?;
                let x = cpu.x;
                for (index, byte) in bytes.iter().enumerate() {
                    let slot = u16::from(x.wrapping_sub((index / 2) as u8));
                    let base = if index % 2 == 0 { ESTACK_LO } else { ESTACK_HI };
                    memory.write(base + slot, *byte);
                }
                cpu.x = x.wrapping_sub(3);
            }
            Routine::PopFac1 => {
                let x = cpu.x.wrapping_add(3);
                let mut bytes = [0u8; 5];
                for (index, byte) in bytes.iter_mut().enumerate() {
                    let slot = u16::from(x.wrapping_sub((index / 2) as u8));
                    let base = if index % 2 == 0 { ESTACK_LO } else { ESTACK_HI };
                    *byte = memory.read(base + slot);
                }
                cpu.x = x;
                self.fac1 = mflpt_to_f64(bytes);
            }
        }
        Ok(Outcome::Return)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn machine() -> (Runtime, Cpu, Memory) {
        (Runtime::new(), Cpu::new(false), Memory::new())
    }

    fn address_of(name: &str) -> u16 {
        runtime_symbols()
            .into_iter()
            .find(|(symbol, _)| *symbol == name)
            .map(|(_, address)| address)
            .unwrap()
    }

    #[test]
    fn test_symbols_are_unique() {
        let symbols = runtime_symbols();
        let mut addresses: Vec<u16> = symbols.iter().map(|(_, a)| *a).collect();
        addresses.sort_unstable();
        addresses.dedup();
        assert_eq!(addresses.len(), symbols.len());
        assert_eq!(address_of("c64.CHROUT"), 0xffd2);
    }

    #[test]
    fn test_reset_system_trapped_after_pushed_return() {
        let runtime = Runtime::new();
        let reset = address_of("sys.reset_system");
        assert_eq!(runtime.routine_at(reset), Some(Routine::ResetSystem));
        assert_eq!(runtime.routine_at(reset + 1), Some(Routine::ResetSystem));
        assert_eq!(runtime.routine_at(0x1000), None);
    }

    #[test]
    fn test_byte_division() {
        let (mut runtime, mut cpu, mut memory) = machine();
        cpu.a = 17;
        cpu.y = 5;
        runtime.call(Routine::DivmodUbyte, &mut cpu, &mut memory).unwrap();
        assert_eq!((cpu.y, cpu.a), (3, 2));

        cpu.a = (-17i8) as u8;
        cpu.y = 5;
        runtime.call(Routine::DivmodByte, &mut cpu, &mut memory).unwrap();
        assert_eq!(cpu.y as i8, -3);
    }

    #[test]
    fn test_word_division_leaves_remainder_in_w2() {
        let (mut runtime, mut cpu, mut memory) = machine();
        memory.write_word(u16::from(SCRATCH_W1), 1000);
        set_ay(&mut cpu, 7);
        runtime.call(Routine::DivmodUword, &mut cpu, &mut memory).unwrap();
        assert_eq!(ay(&cpu), 142);
        assert_eq!(memory.read_word(u16::from(SCRATCH_W2)), 6);
    }

    #[test]
    fn test_float_memory_operations() {
        let (mut runtime, mut cpu, mut memory) = machine();
        memory.load(0x2000, &f64_to_mflpt(10.0).unwrap());
        runtime.fac1 = 4.0;
        set_ay(&mut cpu, 0x2000);
        runtime.call(Routine::Fsub, &mut cpu, &mut memory).unwrap();
        assert_eq!(runtime.fac1, 6.0);

        cpu.x = 0x00;
        cpu.y = 0x30;
        runtime.call(Routine::Movmf, &mut cpu, &mut memory).unwrap();
        assert_eq!(Runtime::read_float(&memory, 0x3000), 6.0);

        set_ay(&mut cpu, 0x2000);
        runtime.call(Routine::Fcomp, &mut cpu, &mut memory).unwrap();
        assert_eq!(cpu.a, 0xff);
    }

    #[test]
    fn test_float_division_by_zero() {
        let (mut runtime, mut cpu, mut memory) = machine();
        runtime.fac1 = 0.0;
        assert_eq!(
            runtime.call(Routine::Fdiv, &mut cpu, &mut memory),
            Err(RuntimeError::DivisionByZero)
        );
    }

    #[test]
    fn test_push_and_pop_fac1() {
        let (mut runtime, mut cpu, mut memory) = machine();
        cpu.x = 0xff;
        cpu.a = 0x12;
        runtime.fac1 = -2.5;
        runtime.call(Routine::PushFac1, &mut cpu, &mut memory).unwrap();
        assert_eq!(cpu.x, 0xfc);
        runtime.fac1 = 0.0;
        runtime.call(Routine::PopFac1, &mut cpu, &mut memory).unwrap();
        assert_eq!(cpu.x, 0xff);
        assert_eq!(runtime.fac1, -2.5);
        assert_eq!(cpu.a, 0x12);
    }

    #[test]
    fn test_string_compare_and_copy() {
        let (mut runtime, mut cpu, mut memory) = machine();
        memory.load(0x2000, b"abc\0");
        memory.load(0x2100, b"abd\0");
        memory.write_word(u16::from(SCRATCH_W2), 0x2100);
        set_ay(&mut cpu, 0x2000);
        runtime.call(Routine::StrcmpMem, &mut cpu, &mut memory).unwrap();
        assert_eq!(cpu.a, 0xff);

        memory.write_word(u16::from(SCRATCH_W1), 0x3000);
        set_ay(&mut cpu, 0x2000);
        runtime.call(Routine::Strcpy, &mut cpu, &mut memory).unwrap();
        assert_eq!(memory.slice(0x3000, 4), b"abc\0".to_vec());
    }

    #[test]
    fn test_chrout_collects_output() {
        let (mut runtime, mut cpu, mut memory) = machine();
        for byte in [0x48, 0x49, 0x0d] {
            cpu.a = byte;
            runtime.call(Routine::Chrout, &mut cpu, &mut memory).unwrap();
        }
        assert_eq!(runtime.output(), "hi\n");
    }
}
