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

//! Label and constant pool management for code generation.
//!
//! This module handles:
//! - Generated labels (`prog8_label_{n}_{postfix}`)
//! - The program wide pool of float constants
//! - LabelManager trait for label creation and constant lookup
//!
//! The `prog8_` prefix is reserved for generated names, so generated labels
//! never collide with identifiers of the program.

use super::CodegenSession;

/// Pooled float constants, in order of first use.
#[derive(Debug, Default, Clone)]
pub struct FloatConstants {
    constants: Vec<(u64, String)>,
}

impl FloatConstants {
    /// Create an empty pool.
    pub fn new() -> Self {
        Self::default()
    }

    /// The label holding `value`, adding it to the pool on first use.
    ///
    /// Values are pooled by their exact bit pattern.
    pub fn label_for(&mut self, value: f64) -> String {
        let bits = value.to_bits();
        if let Some((_, name)) = self.constants.iter().find(|(b, _)| *b == bits) {
            return name.clone();
        }
        let name = format!("prog8_float_const_{}", self.constants.len());
        self.constants.push((bits, name.clone()));
        name
    }

    /// The pooled constants as `(label, value)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.constants
            .iter()
            .map(|(bits, name)| (name.as_str(), f64::from_bits(*bits)))
    }

    /// Number of pooled constants.
    pub fn len(&self) -> usize {
        self.constants.len()
    }

    /// True when no constant has been pooled.
    pub fn is_empty(&self) -> bool {
        self.constants.is_empty()
    }
}

/// Extension trait for label management.
pub trait LabelManager {
    /// Generate a unique label ending in `postfix`.
    fn make_label(&mut self, postfix: &str) -> String;

    /// The label of the pooled float constant `value`.
    fn float_constant(&mut self, value: f64) -> String;
}

impl LabelManager for CodegenSession<'_> {
    fn make_label(&mut self, postfix: &str) -> String {
        self.label_counter += 1;
        format!("prog8_label_{}_{}", self.label_counter, postfix)
    }

    fn float_constant(&mut self, value: f64) -> String {
        self.float_constants.label_for(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_float_pool_reuses_values() {
        let mut pool = FloatConstants::new();
        assert_eq!(pool.label_for(1.5), "prog8_float_const_0");
        assert_eq!(pool.label_for(2.0), "prog8_float_const_1");
        assert_eq!(pool.label_for(1.5), "prog8_float_const_0");
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn test_float_pool_distinguishes_negative_zero() {
        let mut pool = FloatConstants::new();
        let zero = pool.label_for(0.0);
        let negative = pool.label_for(-0.0);
        assert_ne!(zero, negative);
    }

    #[test]
    fn test_float_pool_order() {
        let mut pool = FloatConstants::new();
        pool.label_for(3.0);
        pool.label_for(-1.0);
        let values: Vec<f64> = pool.iter().map(|(_, v)| v).collect();
        assert_eq!(values, vec![3.0, -1.0]);
    }
}
