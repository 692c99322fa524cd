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

//! A 6502 and 65C02 CPU emulator over 64 KiB of RAM.
//!
//! Decimal mode is not emulated; arithmetic is always binary. Cycle counts
//! are the base counts without page crossing penalties.

use thiserror::Error;

use super::opcodes::{self, Mnemonic, Mode};

/// Carry flag.
pub const FLAG_C: u8 = 0x01;
/// Zero flag.
pub const FLAG_Z: u8 = 0x02;
/// Interrupt disable flag.
pub const FLAG_I: u8 = 0x04;
/// Decimal flag.
pub const FLAG_D: u8 = 0x08;
/// Break flag, only visible in pushed status bytes.
pub const FLAG_B: u8 = 0x10;
/// Always set in pushed status bytes.
pub const FLAG_U: u8 = 0x20;
/// Overflow flag.
pub const FLAG_V: u8 = 0x40;
/// Negative flag.
pub const FLAG_N: u8 = 0x80;

/// Errors that stop the CPU.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CpuError {
    /// The byte at `pc` is not an opcode for this CPU.
    #[error("invalid opcode ${code:02x} at ${pc:04x}")]
    InvalidOpcode { pc: u16, code: u8 },

    /// A `brk` instruction was executed.
    #[error("brk at ${0:04x}")]
    Break(u16),
}

/// The 64 KiB address space.
#[derive(Clone)]
pub struct Memory {
    bytes: Box<[u8]>,
}

impl Default for Memory {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Memory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Memory").field("size", &self.bytes.len()).finish()
    }
}

impl Memory {
    /// Zero filled memory.
    pub fn new() -> Self {
        Self {
            bytes: vec![0; 0x10000].into_boxed_slice(),
        }
    }

    pub fn read(&self, address: u16) -> u8 {
        self.bytes[usize::from(address)]
    }

    pub fn write(&mut self, address: u16, value: u8) {
        self.bytes[usize::from(address)] = value;
    }

    /// Little endian word at `address`.
    pub fn read_word(&self, address: u16) -> u16 {
        u16::from_le_bytes([self.read(address), self.read(address.wrapping_add(1))])
    }

    pub fn write_word(&mut self, address: u16, value: u16) {
        let [lo, hi] = value.to_le_bytes();
        self.write(address, lo);
        self.write(address.wrapping_add(1), hi);
    }

    /// Word pointer in zero page; the high byte wraps within page zero.
    pub fn read_zp_word(&self, address: u8) -> u16 {
        u16::from_le_bytes([
            self.read(u16::from(address)),
            self.read(u16::from(address.wrapping_add(1))),
        ])
    }

    /// Copy `data` into memory starting at `address`.
    pub fn load(&mut self, address: u16, data: &[u8]) {
        for (offset, byte) in data.iter().enumerate() {
            self.write(address.wrapping_add(offset as u16), *byte);
        }
    }

    /// `len` bytes starting at `address`.
    pub fn slice(&self, address: u16, len: usize) -> Vec<u8> {
        (0..len)
            .map(|offset| self.read(address.wrapping_add(offset as u16)))
            .collect()
    }
}

/// Where an instruction finds its operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Target {
    None,
    Accumulator,
    Value(u8),
    Address(u16),
}

/// The CPU registers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cpu {
    pub a: u8,
    pub x: u8,
    pub y: u8,
    pub sp: u8,
    pub pc: u16,
    pub status: u8,
    /// Execute the 65C02 instruction set.
    pub cmos: bool,
    /// Cycles executed so far.
    pub cycles: u64,
}

impl Cpu {
    pub fn new(cmos: bool) -> Self {
        Self {
            a: 0,
            x: 0,
            y: 0,
            sp: 0xff,
            pc: 0,
            status: FLAG_U | FLAG_I,
            cmos,
            cycles: 0,
        }
    }

    pub fn flag(&self, flag: u8) -> bool {
        self.status & flag != 0
    }

    pub fn set_flag(&mut self, flag: u8, on: bool) {
        if on {
            self.status |= flag;
        } else {
            self.status &= !flag;
        }
    }

    fn set_nz(&mut self, value: u8) {
        self.set_flag(FLAG_Z, value == 0);
        self.set_flag(FLAG_N, value & 0x80 != 0);
    }

    pub fn push(&mut self, memory: &mut Memory, value: u8) {
        memory.write(0x0100 | u16::from(self.sp), value);
        self.sp = self.sp.wrapping_sub(1);
    }

    pub fn pull(&mut self, memory: &Memory) -> u8 {
        self.sp = self.sp.wrapping_add(1);
        memory.read(0x0100 | u16::from(self.sp))
    }

    pub fn push_word(&mut self, memory: &mut Memory, value: u16) {
        let [lo, hi] = value.to_le_bytes();
        self.push(memory, hi);
        self.push(memory, lo);
    }

    pub fn pull_word(&mut self, memory: &Memory) -> u16 {
        let lo = self.pull(memory);
        let hi = self.pull(memory);
        u16::from_le_bytes([lo, hi])
    }

    /// Return from a subroutine, as `rts` does.
    pub fn return_from_subroutine(&mut self, memory: &Memory) {
        self.pc = self.pull_word(memory).wrapping_add(1);
    }

    fn fetch(&mut self, memory: &Memory) -> u8 {
        let value = memory.read(self.pc);
        self.pc = self.pc.wrapping_add(1);
        value
    }

    fn fetch_word(&mut self, memory: &Memory) -> u16 {
        let value = memory.read_word(self.pc);
        self.pc = self.pc.wrapping_add(2);
        value
    }

    fn resolve(&mut self, memory: &Memory, mode: Mode) -> Target {
        match mode {
            Mode::Implied => Target::None,
            Mode::Accumulator => Target::Accumulator,
            Mode::Immediate => Target::Value(self.fetch(memory)),
            Mode::Relative => Target::Value(self.fetch(memory)),
            Mode::ZeroPage => Target::Address(u16::from(self.fetch(memory))),
            Mode::ZeroPageX => Target::Address(u16::from(self.fetch(memory).wrapping_add(self.x))),
            Mode::ZeroPageY => Target::Address(u16::from(self.fetch(memory).wrapping_add(self.y))),
            Mode::Absolute => Target::Address(self.fetch_word(memory)),
            Mode::AbsoluteX => Target::Address(self.fetch_word(memory).wrapping_add(u16::from(self.x))),
            Mode::AbsoluteY => Target::Address(self.fetch_word(memory).wrapping_add(u16::from(self.y))),
            Mode::Indirect => {
                let pointer = self.fetch_word(memory);
                let hi_address = if self.cmos {
                    pointer.wrapping_add(1)
                } else {
                    // NMOS does not carry into the high byte of the pointer
                    (pointer & 0xff00) | (pointer.wrapping_add(1) & 0x00ff)
                };
                Target::Address(u16::from_le_bytes([memory.read(pointer), memory.read(hi_address)]))
            }
            Mode::IndirectX => {
                let pointer = self.fetch(memory).wrapping_add(self.x);
                Target::Address(memory.read_zp_word(pointer))
            }
            Mode::IndirectY => {
                let pointer = self.fetch(memory);
                Target::Address(memory.read_zp_word(pointer).wrapping_add(u16::from(self.y)))
            }
            Mode::ZeroPageIndirect => {
                let pointer = self.fetch(memory);
                Target::Address(memory.read_zp_word(pointer))
            }
            Mode::AbsoluteIndexedIndirect => {
                let pointer = self.fetch_word(memory).wrapping_add(u16::from(self.x));
                Target::Address(memory.read_word(pointer))
            }
        }
    }

    fn read(&self, memory: &Memory, target: Target) -> u8 {
        match target {
            Target::None => 0,
            Target::Accumulator => self.a,
            Target::Value(value) => value,
            Target::Address(address) => memory.read(address),
        }
    }

    fn write(&mut self, memory: &mut Memory, target: Target, value: u8) {
        match target {
            Target::Accumulator => self.a = value,
            Target::Address(address) => memory.write(address, value),
            Target::None | Target::Value(_) => {}
        }
    }

    fn add(&mut self, value: u8) {
        let carry = u16::from(self.flag(FLAG_C));
        let sum = u16::from(self.a) + u16::from(value) + carry;
        let result = sum as u8;
        self.set_flag(FLAG_C, sum > 0xff);
        self.set_flag(FLAG_V, (!(self.a ^ value) & (self.a ^ result)) & 0x80 != 0);
        self.a = result;
        self.set_nz(result);
    }

    fn compare(&mut self, register: u8, value: u8) {
        self.set_flag(FLAG_C, register >= value);
        self.set_nz(register.wrapping_sub(value));
    }

    fn branch(&mut self, offset: u8, taken: bool) {
        if taken {
            self.pc = self.pc.wrapping_add(offset as i8 as u16);
            self.cycles += 1;
        }
    }

    /// Execute one instruction.
    pub fn step(&mut self, memory: &mut Memory) -> Result<(), CpuError> {
        let pc = self.pc;
        let code = self.fetch(memory);
        let opcode = opcodes::decode(code, self.cmos).ok_or(CpuError::InvalidOpcode { pc, code })?;
        self.cycles += u64::from(opcode.cycles);
        let target = self.resolve(memory, opcode.mode);

        match opcode.mnemonic {
            Mnemonic::Lda => {
                self.a = self.read(memory, target);
                self.set_nz(self.a);
            }
            Mnemonic::Ldx => {
                self.x = self.read(memory, target);
                self.set_nz(self.x);
            }
            Mnemonic::Ldy => {
                self.y = self.read(memory, target);
                self.set_nz(self.y);
            }
            Mnemonic::Sta => self.write(memory, target, self.a),
            Mnemonic::Stx => self.write(memory, target, self.x),
            Mnemonic::Sty => self.write(memory, target, self.y),
            Mnemonic::Stz => self.write(memory, target, 0),

            Mnemonic::Adc => {
                let value = self.read(memory, target);
                self.add(value);
            }
            Mnemonic::Sbc => {
                let value = self.read(memory, target);
                self.add(!value);
            }
            Mnemonic::And => {
                self.a &= self.read(memory, target);
                self.set_nz(self.a);
            }
            Mnemonic::Ora => {
                self.a |= self.read(memory, target);
                self.set_nz(self.a);
            }
            Mnemonic::Eor => {
                self.a ^= self.read(memory, target);
                self.set_nz(self.a);
            }
            Mnemonic::Cmp => {
                let value = self.read(memory, target);
                self.compare(self.a, value);
            }
            Mnemonic::Cpx => {
                let value = self.read(memory, target);
                self.compare(self.x, value);
            }
            Mnemonic::Cpy => {
                let value = self.read(memory, target);
                self.compare(self.y, value);
            }
            Mnemonic::Bit => {
                let value = self.read(memory, target);
                self.set_flag(FLAG_Z, self.a & value == 0);
                if opcode.mode != Mode::Immediate {
                    self.set_flag(FLAG_N, value & 0x80 != 0);
                    self.set_flag(FLAG_V, value & 0x40 != 0);
                }
            }
            Mnemonic::Tsb | Mnemonic::Trb => {
                let value = self.read(memory, target);
                self.set_flag(FLAG_Z, self.a & value == 0);
                let result = if opcode.mnemonic == Mnemonic::Tsb {
                    value | self.a
                } else {
                    value & !self.a
                };
                self.write(memory, target, result);
            }

            Mnemonic::Inc | Mnemonic::Dec => {
                let value = self.read(memory, target);
                let result = if opcode.mnemonic == Mnemonic::Inc {
                    value.wrapping_add(1)
                } else {
                    value.wrapping_sub(1)
                };
                self.write(memory, target, result);
                self.set_nz(result);
            }
            Mnemonic::Inx => {
                self.x = self.x.wrapping_add(1);
                self.set_nz(self.x);
            }
            Mnemonic::Iny => {
                self.y = self.y.wrapping_add(1);
                self.set_nz(self.y);
            }
            Mnemonic::Dex => {
                self.x = self.x.wrapping_sub(1);
                self.set_nz(self.x);
            }
            Mnemonic::Dey => {
                self.y = self.y.wrapping_sub(1);
                self.set_nz(self.y);
            }

            Mnemonic::Asl | Mnemonic::Lsr | Mnemonic::Rol | Mnemonic::Ror => {
                let value = self.read(memory, target);
                let carry_in = self.flag(FLAG_C);
                let (result, carry_out) = match opcode.mnemonic {
                    Mnemonic::Asl => (value << 1, value & 0x80 != 0),
                    Mnemonic::Lsr => (value >> 1, value & 0x01 != 0),
                    Mnemonic::Rol => ((value << 1) | u8::from(carry_in), value & 0x80 != 0),
                    _ => ((value >> 1) | (u8::from(carry_in) << 7), value & 0x01 != 0),
                };
                self.set_flag(FLAG_C, carry_out);
                self.write(memory, target, result);
                self.set_nz(result);
            }

            Mnemonic::Jmp => {
                if let Target::Address(address) = target {
                    self.pc = address;
                }
            }
            Mnemonic::Jsr => {
                if let Target::Address(address) = target {
                    let return_address = self.pc.wrapping_sub(1);
                    self.push_word(memory, return_address);
                    self.pc = address;
                }
            }
            Mnemonic::Rts => self.return_from_subroutine(memory),
            Mnemonic::Rti => {
                self.status = (self.pull(memory) & !FLAG_B) | FLAG_U;
                self.pc = self.pull_word(memory);
            }
            Mnemonic::Brk => return Err(CpuError::Break(pc)),

            Mnemonic::Bcc | Mnemonic::Bcs | Mnemonic::Beq | Mnemonic::Bne | Mnemonic::Bmi
            | Mnemonic::Bpl | Mnemonic::Bvc | Mnemonic::Bvs | Mnemonic::Bra => {
                let offset = self.read(memory, target);
                let taken = match opcode.mnemonic {
                    Mnemonic::Bcc => !self.flag(FLAG_C),
                    Mnemonic::Bcs => self.flag(FLAG_C),
                    Mnemonic::Beq => self.flag(FLAG_Z),
                    Mnemonic::Bne => !self.flag(FLAG_Z),
                    Mnemonic::Bmi => self.flag(FLAG_N),
                    Mnemonic::Bpl => !self.flag(FLAG_N),
                    Mnemonic::Bvc => !self.flag(FLAG_V),
                    Mnemonic::Bvs => self.flag(FLAG_V),
                    _ => true,
                };
                self.branch(offset, taken);
            }

            Mnemonic::Pha => self.push(memory, self.a),
            Mnemonic::Phx => self.push(memory, self.x),
            Mnemonic::Phy => self.push(memory, self.y),
            Mnemonic::Php => self.push(memory, self.status | FLAG_B | FLAG_U),
            Mnemonic::Pla => {
                self.a = self.pull(memory);
                self.set_nz(self.a);
            }
            Mnemonic::Plx => {
                self.x = self.pull(memory);
                self.set_nz(self.x);
            }
            Mnemonic::Ply => {
                self.y = self.pull(memory);
                self.set_nz(self.y);
            }
            Mnemonic::Plp => self.status = (self.pull(memory) & !FLAG_B) | FLAG_U,

            Mnemonic::Tax => {
                self.x = self.a;
                self.set_nz(self.x);
            }
            Mnemonic::Tay => {
                self.y = self.a;
                self.set_nz(self.y);
            }
            Mnemonic::Txa => {
                self.a = self.x;
                self.set_nz(self.a);
            }
            Mnemonic::Tya => {
                self.a = self.y;
                self.set_nz(self.a);
            }
            Mnemonic::Tsx => {
                self.x = self.sp;
                self.set_nz(self.x);
            }
            Mnemonic::Txs => self.sp = self.x,

            Mnemonic::Clc => self.set_flag(FLAG_C, false),
            Mnemonic::Sec => self.set_flag(FLAG_C, true),
            Mnemonic::Cli => self.set_flag(FLAG_I, false),
            Mnemonic::Sei => self.set_flag(FLAG_I, true),
            Mnemonic::Clv => self.set_flag(FLAG_V, false),
            Mnemonic::Cld => self.set_flag(FLAG_D, false),
            Mnemonic::Sed => self.set_flag(FLAG_D, true),
            Mnemonic::Nop => {}
        }
        Ok(())
    }
}
