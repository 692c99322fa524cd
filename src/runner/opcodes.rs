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

//! 6502 and 65C02 instruction encoding.
//!
//! One table lists every supported opcode with its mnemonic, addressing
//! mode and base cycle count. The assembler encodes through it and the
//! CPU decodes through it.

use std::fmt;
use std::sync::OnceLock;

/// Addressing modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mode {
    Implied,
    /// `asl a`
    Accumulator,
    /// `#$xx`
    Immediate,
    /// `$xx`
    ZeroPage,
    /// `$xx,x`
    ZeroPageX,
    /// `$xx,y`
    ZeroPageY,
    /// `$xxxx`
    Absolute,
    /// `$xxxx,x`
    AbsoluteX,
    /// `$xxxx,y`
    AbsoluteY,
    /// `($xxxx)`, jmp only
    Indirect,
    /// `($xx,x)`
    IndirectX,
    /// `($xx),y`
    IndirectY,
    /// `($xx)`, 65C02
    ZeroPageIndirect,
    /// `($xxxx,x)`, 65C02 jmp only
    AbsoluteIndexedIndirect,
    /// Branch offsets.
    Relative,
}

impl Mode {
    /// Number of operand bytes following the opcode.
    pub fn operand_size(&self) -> u16 {
        match self {
            Mode::Implied | Mode::Accumulator => 0,
            Mode::Immediate
            | Mode::ZeroPage
            | Mode::ZeroPageX
            | Mode::ZeroPageY
            | Mode::IndirectX
            | Mode::IndirectY
            | Mode::ZeroPageIndirect
            | Mode::Relative => 1,
            Mode::Absolute
            | Mode::AbsoluteX
            | Mode::AbsoluteY
            | Mode::Indirect
            | Mode::AbsoluteIndexedIndirect => 2,
        }
    }

    /// The zero page form of an absolute mode.
    pub fn zeropage_form(&self) -> Option<Mode> {
        match self {
            Mode::Absolute => Some(Mode::ZeroPage),
            Mode::AbsoluteX => Some(Mode::ZeroPageX),
            Mode::AbsoluteY => Some(Mode::ZeroPageY),
            _ => None,
        }
    }
}

macro_rules! mnemonics {
    ($($variant:ident => $name:literal),* $(,)?) => {
        /// Instruction mnemonics.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum Mnemonic {
            $($variant),*
        }

        impl Mnemonic {
            /// Parse a mnemonic, ignoring case.
            pub fn from_name(name: &str) -> Option<Self> {
                match name.to_ascii_lowercase().as_str() {
                    $($name => Some(Mnemonic::$variant),)*
                    _ => None,
                }
            }

            /// The lowercase mnemonic.
            pub fn name(&self) -> &'static str {
                match self {
                    $(Mnemonic::$variant => $name),*
                }
            }
        }
    };
}

mnemonics! {
    Adc => "adc", And => "and", Asl => "asl", Bcc => "bcc", Bcs => "bcs", Beq => "beq",
    Bit => "bit", Bmi => "bmi", Bne => "bne", Bpl => "bpl", Bra => "bra", Brk => "brk",
    Bvc => "bvc", Bvs => "bvs", Clc => "clc", Cld => "cld", Cli => "cli", Clv => "clv",
    Cmp => "cmp", Cpx => "cpx", Cpy => "cpy", Dec => "dec", Dex => "dex", Dey => "dey",
    Eor => "eor", Inc => "inc", Inx => "inx", Iny => "iny", Jmp => "jmp", Jsr => "jsr",
    Lda => "lda", Ldx => "ldx", Ldy => "ldy", Lsr => "lsr", Nop => "nop", Ora => "ora",
    Pha => "pha", Php => "php", Phx => "phx", Phy => "phy", Pla => "pla", Plp => "plp",
    Plx => "plx", Ply => "ply", Rol => "rol", Ror => "ror", Rti => "rti", Rts => "rts",
    Sbc => "sbc", Sec => "sec", Sed => "sed", Sei => "sei", Sta => "sta", Stx => "stx",
    Sty => "sty", Stz => "stz", Tax => "tax", Tay => "tay", Trb => "trb", Tsb => "tsb",
    Tsx => "tsx", Txa => "txa", Txs => "txs", Tya => "tya",
}

impl Mnemonic {
    /// True for the conditional and unconditional relative branches.
    pub fn is_branch(&self) -> bool {
        matches!(
            self,
            Mnemonic::Bcc
                | Mnemonic::Bcs
                | Mnemonic::Beq
                | Mnemonic::Bmi
                | Mnemonic::Bne
                | Mnemonic::Bpl
                | Mnemonic::Bvc
                | Mnemonic::Bvs
                | Mnemonic::Bra
        )
    }

    /// The branch testing the opposite condition.
    pub fn inverse_branch(&self) -> Option<Mnemonic> {
        Some(match self {
            Mnemonic::Bcc => Mnemonic::Bcs,
            Mnemonic::Bcs => Mnemonic::Bcc,
            Mnemonic::Beq => Mnemonic::Bne,
            Mnemonic::Bne => Mnemonic::Beq,
            Mnemonic::Bmi => Mnemonic::Bpl,
            Mnemonic::Bpl => Mnemonic::Bmi,
            Mnemonic::Bvc => Mnemonic::Bvs,
            Mnemonic::Bvs => Mnemonic::Bvc,
            _ => return None,
        })
    }
}

impl fmt::Display for Mnemonic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// One opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Opcode {
    pub code: u8,
    pub mnemonic: Mnemonic,
    pub mode: Mode,
    /// Base cycle count, without page crossing penalties.
    pub cycles: u8,
    /// Only available on the 65C02.
    pub cmos: bool,
}

macro_rules! op {
    ($code:literal, $m:ident, $mode:ident, $cycles:literal) => {
        Opcode { code: $code, mnemonic: Mnemonic::$m, mode: Mode::$mode, cycles: $cycles, cmos: false }
    };
    ($code:literal, $m:ident, $mode:ident, $cycles:literal, cmos) => {
        Opcode { code: $code, mnemonic: Mnemonic::$m, mode: Mode::$mode, cycles: $cycles, cmos: true }
    };
}

/// Every supported opcode.
pub const OPCODES: &[Opcode] = &[
    // Load and store
    op!(0xa9, Lda, Immediate, 2), op!(0xa5, Lda, ZeroPage, 3), op!(0xb5, Lda, ZeroPageX, 4),
    op!(0xad, Lda, Absolute, 4), op!(0xbd, Lda, AbsoluteX, 4), op!(0xb9, Lda, AbsoluteY, 4),
    op!(0xa1, Lda, IndirectX, 6), op!(0xb1, Lda, IndirectY, 5), op!(0xb2, Lda, ZeroPageIndirect, 5, cmos),
    op!(0xa2, Ldx, Immediate, 2), op!(0xa6, Ldx, ZeroPage, 3), op!(0xb6, Ldx, ZeroPageY, 4),
    op!(0xae, Ldx, Absolute, 4), op!(0xbe, Ldx, AbsoluteY, 4),
    op!(0xa0, Ldy, Immediate, 2), op!(0xa4, Ldy, ZeroPage, 3), op!(0xb4, Ldy, ZeroPageX, 4),
    op!(0xac, Ldy, Absolute, 4), op!(0xbc, Ldy, AbsoluteX, 4),
    op!(0x85, Sta, ZeroPage, 3), op!(0x95, Sta, ZeroPageX, 4), op!(0x8d, Sta, Absolute, 4),
    op!(0x9d, Sta, AbsoluteX, 5), op!(0x99, Sta, AbsoluteY, 5), op!(0x81, Sta, IndirectX, 6),
    op!(0x91, Sta, IndirectY, 6), op!(0x92, Sta, ZeroPageIndirect, 5, cmos),
    op!(0x86, Stx, ZeroPage, 3), op!(0x96, Stx, ZeroPageY, 4), op!(0x8e, Stx, Absolute, 4),
    op!(0x84, Sty, ZeroPage, 3), op!(0x94, Sty, ZeroPageX, 4), op!(0x8c, Sty, Absolute, 4),
    op!(0x64, Stz, ZeroPage, 3, cmos), op!(0x74, Stz, ZeroPageX, 4, cmos),
    op!(0x9c, Stz, Absolute, 4, cmos), op!(0x9e, Stz, AbsoluteX, 5, cmos),
    // Arithmetic and logic
    op!(0x69, Adc, Immediate, 2), op!(0x65, Adc, ZeroPage, 3), op!(0x75, Adc, ZeroPageX, 4),
    op!(0x6d, Adc, Absolute, 4), op!(0x7d, Adc, AbsoluteX, 4), op!(0x79, Adc, AbsoluteY, 4),
    op!(0x61, Adc, IndirectX, 6), op!(0x71, Adc, IndirectY, 5), op!(0x72, Adc, ZeroPageIndirect, 5, cmos),
    op!(0xe9, Sbc, Immediate, 2), op!(0xe5, Sbc, ZeroPage, 3), op!(0xf5, Sbc, ZeroPageX, 4),
    op!(0xed, Sbc, Absolute, 4), op!(0xfd, Sbc, AbsoluteX, 4), op!(0xf9, Sbc, AbsoluteY, 4),
    op!(0xe1, Sbc, IndirectX, 6), op!(0xf1, Sbc, IndirectY, 5), op!(0xf2, Sbc, ZeroPageIndirect, 5, cmos),
    op!(0x29, And, Immediate, 2), op!(0x25, And, ZeroPage, 3), op!(0x35, And, ZeroPageX, 4),
    op!(0x2d, And, Absolute, 4), op!(0x3d, And, AbsoluteX, 4), op!(0x39, And, AbsoluteY, 4),
    op!(0x21, And, IndirectX, 6), op!(0x31, And, IndirectY, 5), op!(0x32, And, ZeroPageIndirect, 5, cmos),
    op!(0x09, Ora, Immediate, 2), op!(0x05, Ora, ZeroPage, 3), op!(0x15, Ora, ZeroPageX, 4),
    op!(0x0d, Ora, Absolute, 4), op!(0x1d, Ora, AbsoluteX, 4), op!(0x19, Ora, AbsoluteY, 4),
    op!(0x01, Ora, IndirectX, 6), op!(0x11, Ora, IndirectY, 5), op!(0x12, Ora, ZeroPageIndirect, 5, cmos),
    op!(0x49, Eor, Immediate, 2), op!(0x45, Eor, ZeroPage, 3), op!(0x55, Eor, ZeroPageX, 4),
    op!(0x4d, Eor, Absolute, 4), op!(0x5d, Eor, AbsoluteX, 4), op!(0x59, Eor, AbsoluteY, 4),
    op!(0x41, Eor, IndirectX, 6), op!(0x51, Eor, IndirectY, 5), op!(0x52, Eor, ZeroPageIndirect, 5, cmos),
    op!(0xc9, Cmp, Immediate, 2), op!(0xc5, Cmp, ZeroPage, 3), op!(0xd5, Cmp, ZeroPageX, 4),
    op!(0xcd, Cmp, Absolute, 4), op!(0xdd, Cmp, AbsoluteX, 4), op!(0xd9, Cmp, AbsoluteY, 4),
    op!(0xc1, Cmp, IndirectX, 6), op!(0xd1, Cmp, IndirectY, 5), op!(0xd2, Cmp, ZeroPageIndirect, 5, cmos),
    op!(0xe0, Cpx, Immediate, 2), op!(0xe4, Cpx, ZeroPage, 3), op!(0xec, Cpx, Absolute, 4),
    op!(0xc0, Cpy, Immediate, 2), op!(0xc4, Cpy, ZeroPage, 3), op!(0xcc, Cpy, Absolute, 4),
    op!(0x24, Bit, ZeroPage, 3), op!(0x2c, Bit, Absolute, 4), op!(0x89, Bit, Immediate, 2, cmos),
    op!(0x34, Bit, ZeroPageX, 4, cmos), op!(0x3c, Bit, AbsoluteX, 4, cmos),
    op!(0x04, Tsb, ZeroPage, 5, cmos), op!(0x0c, Tsb, Absolute, 6, cmos),
    op!(0x14, Trb, ZeroPage, 5, cmos), op!(0x1c, Trb, Absolute, 6, cmos),
    // Increments and decrements
    op!(0xe6, Inc, ZeroPage, 5), op!(0xf6, Inc, ZeroPageX, 6), op!(0xee, Inc, Absolute, 6),
    op!(0xfe, Inc, AbsoluteX, 7), op!(0x1a, Inc, Accumulator, 2, cmos),
    op!(0xc6, Dec, ZeroPage, 5), op!(0xd6, Dec, ZeroPageX, 6), op!(0xce, Dec, Absolute, 6),
    op!(0xde, Dec, AbsoluteX, 7), op!(0x3a, Dec, Accumulator, 2, cmos),
    op!(0xe8, Inx, Implied, 2), op!(0xc8, Iny, Implied, 2),
    op!(0xca, Dex, Implied, 2), op!(0x88, Dey, Implied, 2),
    // Shifts and rotates
    op!(0x0a, Asl, Accumulator, 2), op!(0x06, Asl, ZeroPage, 5), op!(0x16, Asl, ZeroPageX, 6),
    op!(0x0e, Asl, Absolute, 6), op!(0x1e, Asl, AbsoluteX, 7),
    op!(0x4a, Lsr, Accumulator, 2), op!(0x46, Lsr, ZeroPage, 5), op!(0x56, Lsr, ZeroPageX, 6),
    op!(0x4e, Lsr, Absolute, 6), op!(0x5e, Lsr, AbsoluteX, 7),
    op!(0x2a, Rol, Accumulator, 2), op!(0x26, Rol, ZeroPage, 5), op!(0x36, Rol, ZeroPageX, 6),
    op!(0x2e, Rol, Absolute, 6), op!(0x3e, Rol, AbsoluteX, 7),
    op!(0x6a, Ror, Accumulator, 2), op!(0x66, Ror, ZeroPage, 5), op!(0x76, Ror, ZeroPageX, 6),
    op!(0x6e, Ror, Absolute, 6), op!(0x7e, Ror, AbsoluteX, 7),
    // Jumps, calls and branches
    op!(0x4c, Jmp, Absolute, 3), op!(0x6c, Jmp, Indirect, 5),
    op!(0x7c, Jmp, AbsoluteIndexedIndirect, 6, cmos),
    op!(0x20, Jsr, Absolute, 6), op!(0x60, Rts, Implied, 6), op!(0x40, Rti, Implied, 6),
    op!(0x00, Brk, Implied, 7),
    op!(0x90, Bcc, Relative, 2), op!(0xb0, Bcs, Relative, 2), op!(0xf0, Beq, Relative, 2),
    op!(0xd0, Bne, Relative, 2), op!(0x30, Bmi, Relative, 2), op!(0x10, Bpl, Relative, 2),
    op!(0x50, Bvc, Relative, 2), op!(0x70, Bvs, Relative, 2), op!(0x80, Bra, Relative, 3, cmos),
    // Stack and transfers
    op!(0x48, Pha, Implied, 3), op!(0x08, Php, Implied, 3), op!(0x68, Pla, Implied, 4),
    op!(0x28, Plp, Implied, 4), op!(0xda, Phx, Implied, 3, cmos), op!(0x5a, Phy, Implied, 3, cmos),
    op!(0xfa, Plx, Implied, 4, cmos), op!(0x7a, Ply, Implied, 4, cmos),
    op!(0xaa, Tax, Implied, 2), op!(0xa8, Tay, Implied, 2), op!(0x8a, Txa, Implied, 2),
    op!(0x98, Tya, Implied, 2), op!(0xba, Tsx, Implied, 2), op!(0x9a, Txs, Implied, 2),
    // Flags
    op!(0x18, Clc, Implied, 2), op!(0x38, Sec, Implied, 2), op!(0x58, Cli, Implied, 2),
    op!(0x78, Sei, Implied, 2), op!(0xb8, Clv, Implied, 2), op!(0xd8, Cld, Implied, 2),
    op!(0xf8, Sed, Implied, 2), op!(0xea, Nop, Implied, 2),
];

fn decode_table() -> &'static [Option<Opcode>; 256] {
    static TABLE: OnceLock<[Option<Opcode>; 256]> = OnceLock::new();
    TABLE.get_or_init(|| {
        let mut table = [None; 256];
        for opcode in OPCODES {
            table[opcode.code as usize] = Some(*opcode);
        }
        table
    })
}

/// Look up an opcode byte. CMOS opcodes are only found when `cmos` is set.
pub fn decode(code: u8, cmos: bool) -> Option<Opcode> {
    decode_table()[code as usize].filter(|opcode| cmos || !opcode.cmos)
}

/// Find the opcode for an instruction form.
pub fn encode(mnemonic: Mnemonic, mode: Mode, cmos: bool) -> Option<Opcode> {
    OPCODES
        .iter()
        .find(|o| o.mnemonic == mnemonic && o.mode == mode && (cmos || !o.cmos))
        .copied()
}

/// True when `mnemonic` has any opcode with `mode`.
pub fn supports(mnemonic: Mnemonic, mode: Mode, cmos: bool) -> bool {
    encode(mnemonic, mode, cmos).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_opcodes_are_unique() {
        let mut seen = HashSet::new();
        for opcode in OPCODES {
            assert!(seen.insert(opcode.code), "duplicate opcode ${:02x}", opcode.code);
        }
        let forms: HashSet<(Mnemonic, Mode)> =
            OPCODES.iter().map(|o| (o.mnemonic, o.mode)).collect();
        assert_eq!(forms.len(), OPCODES.len());
    }

    #[test]
    fn test_known_encodings() {
        assert_eq!(encode(Mnemonic::Lda, Mode::Immediate, false).map(|o| o.code), Some(0xa9));
        assert_eq!(encode(Mnemonic::Sta, Mode::IndirectY, false).map(|o| o.code), Some(0x91));
        assert_eq!(encode(Mnemonic::Jmp, Mode::Indirect, false).map(|o| o.code), Some(0x6c));
        assert_eq!(encode(Mnemonic::Stz, Mode::ZeroPage, false), None);
        assert_eq!(encode(Mnemonic::Stz, Mode::ZeroPage, true).map(|o| o.code), Some(0x64));
    }

    #[test]
    fn test_cmos_opcodes_hidden_on_6502() {
        assert!(decode(0xda, false).is_none());
        assert_eq!(decode(0xda, true).map(|o| o.mnemonic), Some(Mnemonic::Phx));
        assert_eq!(decode(0x60, false).map(|o| o.mnemonic), Some(Mnemonic::Rts));
    }

    #[test]
    fn test_mnemonic_names() {
        assert_eq!(Mnemonic::from_name("LDA"), Some(Mnemonic::Lda));
        assert_eq!(Mnemonic::Bra.name(), "bra");
        assert_eq!(Mnemonic::Beq.inverse_branch(), Some(Mnemonic::Bne));
        assert!(Mnemonic::Bra.inverse_branch().is_none());
        assert!(Mode::Absolute.zeropage_form() == Some(Mode::ZeroPage));
    }
}
