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

//! Number representations for code generation.
//!
//! This module provides conversions between Rust numbers and the forms the
//! generated assembly uses:
//! - Hexadecimal operands in 64tass syntax
//! - The Commodore 5-byte MFLPT floating point format
//! - PETSCII encoded text

/// Largest value representable as MFLPT.
pub const FLOAT_MAX_POSITIVE: f64 = 1.7014118345e+38;

/// Smallest (most negative) value representable as MFLPT.
pub const FLOAT_MAX_NEGATIVE: f64 = -1.7014118345e+38;

/// Format an integer the way 64tass operands are written.
///
/// 0..15 stay decimal, larger values become `$xx` or `$xxxx`,
/// negative values get a leading minus.
pub fn to_hex(value: i32) -> String {
    if value < 0 {
        return format!("-{}", to_hex(value.saturating_neg()));
    }
    match value {
        0..=15 => value.to_string(),
        16..=0xff => format!("${:02x}", value),
        _ => format!("${:04x}", value & 0xffff),
    }
}

/// Convert a number to the 5-byte Commodore MFLPT format.
///
/// Byte 0 is the exponent (bias 128), bytes 1-4 the mantissa with the
/// sign in the top bit of byte 1. Returns `None` when out of range.
pub fn f64_to_mflpt(value: f64) -> Option<[u8; 5]> {
    if value == 0.0 {
        return Some([0; 5]);
    }
    if !value.is_finite() || !(FLOAT_MAX_NEGATIVE..=FLOAT_MAX_POSITIVE).contains(&value) {
        return None;
    }

    // 128 is the Commodore bias, 32 the bias of this normalization.
    let mut exponent: i32 = 128 + 32;
    let mut mantissa = value.abs();
    while mantissa >= 4_294_967_296.0 {
        mantissa /= 2.0;
        exponent += 1;
    }
    while mantissa < 2_147_483_648.0 {
        mantissa *= 2.0;
        exponent -= 1;
    }

    if exponent < 0 {
        return Some([0; 5]);
    }
    if exponent > 255 {
        return None;
    }

    let bits = mantissa as u64 as u32;
    let mut top = ((bits & 0x7f00_0000) >> 24) as u8;
    if value < 0.0 {
        top |= 0x80;
    }
    Some([
        exponent as u8,
        top,
        ((bits >> 16) & 0xff) as u8,
        ((bits >> 8) & 0xff) as u8,
        (bits & 0xff) as u8,
    ])
}

/// Convert 5 MFLPT bytes back into a number.
pub fn mflpt_to_f64(bytes: [u8; 5]) -> f64 {
    if bytes[0] == 0 {
        return 0.0;
    }
    let sign = if bytes[1] & 0x80 != 0 { -1.0 } else { 1.0 };
    let exponent = bytes[0] as i32 - 128;
    let mantissa = ((bytes[1] as u32 | 0x80) << 24)
        | ((bytes[2] as u32) << 16)
        | ((bytes[3] as u32) << 8)
        | bytes[4] as u32;
    sign * mantissa as f64 * 2f64.powi(exponent - 32)
}

/// The `.byte` operand list for a float value, e.g. `$81, $00, $00, $00, $00`.
pub fn float_fill_asm(bytes: [u8; 5]) -> String {
    bytes
        .iter()
        .map(|b| format!("${:02x}", b))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Encode text in PETSCII as shown with the C64's default character set.
///
/// Returns the offending character when the text cannot be encoded.
pub fn encode_petscii(text: &str) -> Result<Vec<u8>, char> {
    text.chars()
        .map(|c| match c {
            'a'..='z' => Ok(c as u8 - b'a' + 0x41),
            'A'..='Z' => Ok(c as u8 - b'A' + 0xc1),
            '\n' | '\r' => Ok(0x0d),
            '£' => Ok(0x5c),
            '↑' => Ok(0x5e),
            '←' => Ok(0x5f),
            ' '..='@' | '[' | ']' => Ok(c as u8),
            '\u{80}'..='\u{ff}' => Ok(c as u32 as u8),
            other => Err(other),
        })
        .collect()
}

/// Format a float the way it appears in comments of the generated code.
pub fn float_comment(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{:.1}", value)
    } else {
        format!("{}", value)
    }
}
