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

//! Datatypes of the program tree.

use std::fmt;

/// A datatype known to the code generator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DataType {
    /// 8-bit unsigned integer (0-255).
    Ubyte,
    /// 8-bit signed integer (-128 to 127).
    Byte,
    /// 16-bit unsigned integer (0-65535).
    Uword,
    /// 16-bit signed integer (-32768 to 32767).
    Word,
    /// 5-byte Commodore floating point value.
    Float,
    /// Zero terminated string.
    Str,
    /// Array of unsigned bytes.
    ArrayUb,
    /// Array of signed bytes.
    ArrayB,
    /// Array of unsigned words.
    ArrayUw,
    /// Array of signed words.
    ArrayW,
    /// Array of floats.
    ArrayF,
}

/// Size in bytes of a Commodore MFLPT float.
pub const FLOAT_SIZE: usize = 5;

impl DataType {
    /// Size of a value of this type in memory.
    ///
    /// Strings and arrays are passed by reference, so their value is an address.
    pub fn memory_size(&self) -> usize {
        match self {
            DataType::Ubyte | DataType::Byte => 1,
            DataType::Float => FLOAT_SIZE,
            _ => 2,
        }
    }

    /// Size of `count` elements of this type (string or array), or of a scalar.
    pub fn storage_size(&self, count: usize) -> usize {
        match self.element_type() {
            Some(element) => element.memory_size() * count,
            None if *self == DataType::Str => count,
            None => self.memory_size(),
        }
    }

    /// Check if this is an 8-bit integer type.
    pub fn is_byte(&self) -> bool {
        matches!(self, DataType::Ubyte | DataType::Byte)
    }

    /// Check if this is a 16-bit integer type.
    pub fn is_word(&self) -> bool {
        matches!(self, DataType::Uword | DataType::Word)
    }

    /// Check if this is an integer type.
    pub fn is_integer(&self) -> bool {
        self.is_byte() || self.is_word()
    }

    /// Check if this is a numeric type.
    pub fn is_numeric(&self) -> bool {
        self.is_integer() || *self == DataType::Float
    }

    /// Check if this is a signed type.
    pub fn is_signed(&self) -> bool {
        matches!(self, DataType::Byte | DataType::Word | DataType::Float)
    }

    /// Check if this is an array type.
    pub fn is_array(&self) -> bool {
        self.element_type().is_some()
    }

    /// Check if values of this type are passed by reference.
    pub fn is_pass_by_reference(&self) -> bool {
        self.is_array() || *self == DataType::Str
    }

    /// Get the element type if this is an array (or `ubyte` for strings).
    pub fn element_type(&self) -> Option<DataType> {
        match self {
            DataType::ArrayUb => Some(DataType::Ubyte),
            DataType::ArrayB => Some(DataType::Byte),
            DataType::ArrayUw => Some(DataType::Uword),
            DataType::ArrayW => Some(DataType::Word),
            DataType::ArrayF => Some(DataType::Float),
            _ => None,
        }
    }

    /// Most elements an array of this type can hold; element indexes are a single byte.
    pub fn max_array_length(&self) -> Option<usize> {
        self.element_type().map(|element| 256 / element.memory_size())
    }

    /// The array type holding elements of this type.
    pub fn array_of(&self) -> Option<DataType> {
        match self {
            DataType::Ubyte => Some(DataType::ArrayUb),
            DataType::Byte => Some(DataType::ArrayB),
            DataType::Uword => Some(DataType::ArrayUw),
            DataType::Word => Some(DataType::ArrayW),
            DataType::Float => Some(DataType::ArrayF),
            _ => None,
        }
    }

    /// The unsigned type with the same size.
    pub fn to_unsigned(&self) -> DataType {
        match self {
            DataType::Byte => DataType::Ubyte,
            DataType::Word => DataType::Uword,
            other => *other,
        }
    }

    /// True when a value of this type needs more bytes than one of `other`.
    pub fn larger_than(&self, other: DataType) -> bool {
        self.rank() > other.rank()
    }

    /// True when both types occupy the same number of bytes.
    pub fn equals_size(&self, other: DataType) -> bool {
        self.memory_size() == other.memory_size()
    }

    fn rank(&self) -> u8 {
        match self {
            DataType::Ubyte | DataType::Byte => 1,
            DataType::Uword | DataType::Word => 2,
            DataType::Float => 3,
            _ => 2,
        }
    }

    /// Check whether `value` fits in this integer type.
    pub fn contains(&self, value: f64) -> bool {
        match self {
            DataType::Ubyte => (0.0..=255.0).contains(&value),
            DataType::Byte => (-128.0..=127.0).contains(&value),
            DataType::Uword => (0.0..=65535.0).contains(&value),
            DataType::Word => (-32768.0..=32767.0).contains(&value),
            DataType::Float => value.is_finite(),
            _ => false,
        }
    }

    /// Get the name of this type as used in the program tree text.
    pub fn name(&self) -> &'static str {
        match self {
            DataType::Ubyte => "ubyte",
            DataType::Byte => "byte",
            DataType::Uword => "uword",
            DataType::Word => "word",
            DataType::Float => "float",
            DataType::Str => "str",
            DataType::ArrayUb => "ubyte[]",
            DataType::ArrayB => "byte[]",
            DataType::ArrayUw => "uword[]",
            DataType::ArrayW => "word[]",
            DataType::ArrayF => "float[]",
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_sizes() {
        assert_eq!(DataType::Ubyte.memory_size(), 1);
        assert_eq!(DataType::Byte.memory_size(), 1);
        assert_eq!(DataType::Uword.memory_size(), 2);
        assert_eq!(DataType::Word.memory_size(), 2);
        assert_eq!(DataType::Float.memory_size(), 5);
        assert_eq!(DataType::Str.memory_size(), 2);
        assert_eq!(DataType::ArrayF.memory_size(), 2);
    }

    #[test]
    fn test_storage_sizes() {
        assert_eq!(DataType::ArrayUw.storage_size(10), 20);
        assert_eq!(DataType::ArrayF.storage_size(3), 15);
        assert_eq!(DataType::Str.storage_size(6), 6);
        assert_eq!(DataType::Word.storage_size(99), 2);
    }

    #[test]
    fn test_classification() {
        assert!(DataType::Ubyte.is_byte());
        assert!(DataType::Word.is_word());
        assert!(DataType::Word.is_signed());
        assert!(!DataType::Uword.is_signed());
        assert!(DataType::Float.is_numeric());
        assert!(!DataType::Float.is_integer());
        assert!(DataType::ArrayB.is_array());
        assert!(DataType::Str.is_pass_by_reference());
        assert!(!DataType::Str.is_array());
    }

    #[test]
    fn test_element_and_array_types() {
        assert_eq!(DataType::ArrayW.element_type(), Some(DataType::Word));
        assert_eq!(DataType::Float.array_of(), Some(DataType::ArrayF));
        assert_eq!(DataType::Str.element_type(), None);
        assert_eq!(DataType::Byte.to_unsigned(), DataType::Ubyte);
    }

    #[test]
    fn test_max_array_lengths() {
        assert_eq!(DataType::ArrayUb.max_array_length(), Some(256));
        assert_eq!(DataType::ArrayW.max_array_length(), Some(128));
        assert_eq!(DataType::ArrayF.max_array_length(), Some(51));
        assert_eq!(DataType::Str.max_array_length(), None);
    }

    #[test]
    fn test_larger_than() {
        assert!(DataType::Uword.larger_than(DataType::Byte));
        assert!(DataType::Float.larger_than(DataType::Word));
        assert!(!DataType::Byte.larger_than(DataType::Ubyte));
        assert!(DataType::Byte.equals_size(DataType::Ubyte));
    }

    #[test]
    fn test_contains() {
        assert!(DataType::Ubyte.contains(255.0));
        assert!(!DataType::Ubyte.contains(-1.0));
        assert!(DataType::Byte.contains(-128.0));
        assert!(!DataType::Word.contains(40000.0));
    }

    #[test]
    fn test_display() {
        assert_eq!(DataType::ArrayUb.to_string(), "ubyte[]");
        assert_eq!(format!("{}", DataType::Uword), "uword");
    }
}
