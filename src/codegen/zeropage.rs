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

//! Zero page allocation.
//!
//! This module provides the `Zeropage` allocator that hands out the scarce
//! first 256 bytes of the address space:
//! - The machine's free byte list, depending on the zero page policy
//! - Fixed scratch cells removed before any allocation
//! - First-fit allocation with a preference for isolated single bytes
//!
//! Allocations are committed immediately and never moved.

use std::collections::{BTreeMap, HashMap};

use log::trace;
use thiserror::Error;

use crate::ast::{DataType, ScopedName};
use crate::config::{CompilationOptions, ZeropageType};
use crate::error::{CompileError, CompileWarning, ErrorCode, ErrorReporter, Span};

/// Scratch byte shared by all generated code.
pub const SCRATCH_B1: u8 = 0x02;
/// Scratch byte for saving a register; must be `SCRATCH_B1 + 1`.
pub const SCRATCH_REG: u8 = 0x03;
/// First scratch word ($fb/$fc).
pub const SCRATCH_W1: u8 = 0xfb;
/// Second scratch word ($fd/$fe).
pub const SCRATCH_W2: u8 = 0xfd;

const ZEROPAGE_SIZE: usize = 256;

/// Bytes usable while BASIC keeps running (as long as its floating point routines are not used).
const BASICSAFE: &[u8] = &[
    0x04, 0x05, 0x06, 0x0a, 0x0e, 0x94, 0x95, 0xa7, 0xa8, 0xa9, 0xaa, 0xb5, 0xb6, 0xf7, 0xf8, 0xf9,
];

/// Bytes usable when only the kernal has to keep working.
const KERNALSAFE: &[u8] = &[
    0x04, 0x05, 0x06, 0x0a, 0x0e, 0x92, 0x96, 0x9b, 0x9c, 0x9e, 0x9f, 0xa5, 0xa6, 0xb0, 0xb1, 0xbe,
    0xbf, 0xf9, 0x2a, 0x52, 0x94, 0x95, 0xa7, 0xa8, 0xa9, 0xaa, 0xb5, 0xb6, 0xf7, 0xf8,
];

/// Bytes the BASIC floating point routines work in.
const FLOAT_WORKSPACE: &[u8] = &[
    0x22, 0x23, 0x24, 0x25, 0x10, 0x11, 0x12, 0x26, 0x27, 0x28, 0x29, 0x2a, 0x57, 0x58, 0x59, 0x5a,
    0x5b, 0x5c, 0x5d, 0x5e, 0x5f, 0x60, 0x61, 0x62, 0x63, 0x64, 0x65, 0x66, 0x67, 0x68, 0x69, 0x6a,
    0x6b, 0x6c, 0x6d, 0x6e, 0x6f, 0x70, 0x71, 0x72, 0x8b, 0x8c, 0x8d, 0x8e, 0x8f, 0xff,
];

/// Bytes updated by the kernal IRQ handler.
const IRQ_BYTES: &[u8] = &[0xa0, 0xa1, 0xa2, 0x91, 0xc0, 0xc5, 0xcb, 0xf5, 0xf6];

/// Why an allocation failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ZeropageAllocationError {
    /// Zero page use is switched off.
    #[error("zero page usage has been disabled")]
    Disabled,

    /// A float was requested without float support.
    #[error("floating point option not enabled")]
    FloatsNotEnabled,

    /// The datatype cannot live in zero page.
    #[error("cannot put datatype {0} in zeropage")]
    TypeNotAllowed(DataType),

    /// Not enough consecutive free bytes.
    #[error("no more free space in ZP to allocate {0} sequential bytes")]
    Exhausted(usize),

    /// The name already owns an allocation.
    #[error("name can't be allocated twice: {0}")]
    AlreadyAllocated(ScopedName),
}

impl ZeropageAllocationError {
    /// Convert into a compile error at `span`.
    pub fn into_compile_error(self, span: Span) -> CompileError {
        let code = match &self {
            ZeropageAllocationError::Disabled => ErrorCode::ZeropageDisabled,
            ZeropageAllocationError::FloatsNotEnabled => ErrorCode::FloatsNotEnabled,
            ZeropageAllocationError::TypeNotAllowed(_) => ErrorCode::ZeropageTypeNotAllowed,
            ZeropageAllocationError::Exhausted(_) => ErrorCode::ZeropageExhausted,
            ZeropageAllocationError::AlreadyAllocated(_) => ErrorCode::InternalError,
        };
        CompileError::new(code, self.to_string(), span)
    }
}

/// One committed allocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZeropageAllocation {
    /// First byte.
    pub address: u8,
    /// Number of bytes.
    pub size: usize,
    /// Owner; empty for anonymous temporaries.
    pub name: ScopedName,
    /// Datatype of the value.
    pub dt: DataType,
}

/// The zero page allocator.
#[derive(Debug, Clone)]
pub struct Zeropage {
    zeropage_type: ZeropageType,
    floats: bool,
    /// Free addresses in list order; `u16` so the scan may look one past $ff.
    free: Vec<u16>,
    allocations: BTreeMap<u8, ZeropageAllocation>,
    by_name: HashMap<ScopedName, u8>,
}

impl Zeropage {
    /// Create the allocator for the C64 memory map and the given options.
    pub fn new(options: &CompilationOptions) -> Self {
        let mut free: Vec<u16> = match options.zeropage {
            ZeropageType::Dontuse => Vec::new(),
            ZeropageType::Basicsafe => BASICSAFE.iter().map(|&b| b as u16).collect(),
            ZeropageType::Kernalsafe => KERNALSAFE.iter().map(|&b| b as u16).collect(),
            ZeropageType::Floatsafe => KERNALSAFE
                .iter()
                .filter(|b| !FLOAT_WORKSPACE.contains(b))
                .map(|&b| b as u16)
                .collect(),
            ZeropageType::Full => (0x04u16..=0xf9)
                .chain(std::iter::once(0xff))
                .filter(|b| !IRQ_BYTES.contains(&(*b as u8)))
                .collect(),
        };
        free.sort_unstable();
        free.dedup();

        let mut zeropage = Self {
            zeropage_type: options.zeropage,
            floats: options.floats,
            free,
            allocations: BTreeMap::new(),
            by_name: HashMap::new(),
        };
        zeropage.remove_reserved_from_free_pool(options);
        zeropage
    }

    fn remove_reserved_from_free_pool(&mut self, options: &CompilationOptions) {
        for range in &options.zp_reserved {
            self.free
                .retain(|&b| !(b <= 0xff && range.contains(&(b as u8))));
        }
        let scratch = [
            SCRATCH_B1,
            SCRATCH_REG,
            SCRATCH_W1,
            SCRATCH_W1 + 1,
            SCRATCH_W2,
            SCRATCH_W2 + 1,
        ];
        self.free.retain(|&b| !scratch.iter().any(|&s| s as u16 == b));
    }

    /// Number of free bytes.
    pub fn available_bytes(&self) -> usize {
        if self.zeropage_type == ZeropageType::Dontuse {
            0
        } else {
            self.free.len()
        }
    }

    /// True when at least one byte is free.
    pub fn has_byte_available(&self) -> bool {
        self.zeropage_type != ZeropageType::Dontuse && !self.free.is_empty()
    }

    /// True when two adjacent bytes are free.
    pub fn has_word_available(&self) -> bool {
        self.zeropage_type != ZeropageType::Dontuse
            && self.free.windows(2).any(|w| w[0] + 1 == w[1])
    }

    /// The free addresses in ascending order.
    pub fn free_addresses(&self) -> impl Iterator<Item = u8> + '_ {
        self.free.iter().map(|&b| b as u8)
    }

    /// Allocate zero page space for `name`.
    ///
    /// `element_count` is the number of elements of a string (terminator
    /// included) or array. Large values produce a warning through `reporter`.
    /// Returns the address and the number of bytes taken.
    pub fn allocate(
        &mut self,
        name: &ScopedName,
        dt: DataType,
        element_count: Option<usize>,
        span: Option<Span>,
        reporter: &mut dyn ErrorReporter,
    ) -> Result<(u8, usize), ZeropageAllocationError> {
        if !name.is_empty() && self.by_name.contains_key(name) {
            return Err(ZeropageAllocationError::AlreadyAllocated(name.clone()));
        }
        if self.zeropage_type == ZeropageType::Dontuse {
            return Err(ZeropageAllocationError::Disabled);
        }

        let size = match dt {
            dt if dt.is_integer() => dt.memory_size(),
            DataType::Str => {
                let size = element_count.unwrap_or(1);
                self.warn_large(name, &format!("str {} bytes", size), span, reporter);
                size
            }
            dt if dt.is_array() => {
                let element = dt.element_type().map(|e| e.memory_size()).unwrap_or(1);
                let size = element_count.unwrap_or(1).saturating_mul(element);
                self.warn_large(name, &format!("array {} bytes", size), span, reporter);
                size
            }
            DataType::Float => {
                if !self.floats {
                    return Err(ZeropageAllocationError::FloatsNotEnabled);
                }
                let size = dt.memory_size();
                self.warn_large(name, &format!("float {} bytes", size), span, reporter);
                size
            }
            other => return Err(ZeropageAllocationError::TypeNotAllowed(other)),
        };

        if size > ZEROPAGE_SIZE || size > self.free.len() {
            return Err(ZeropageAllocationError::Exhausted(size));
        }

        if let (Some(&min), Some(&max)) = (self.free.iter().min(), self.free.iter().max()) {
            if size == 1 {
                for candidate in min..=max + 1 {
                    if self.one_separate_byte_free(candidate) {
                        return Ok((self.make_allocation(candidate, 1, dt, name), 1));
                    }
                }
                let first = self.free[0];
                return Ok((self.make_allocation(first, 1, dt, name), 1));
            }
            for candidate in min..=max + 1 {
                if self.sequential_free(candidate, size) {
                    return Ok((self.make_allocation(candidate, size, dt, name), size));
                }
            }
        }

        Err(ZeropageAllocationError::Exhausted(size))
    }

    fn warn_large(
        &self,
        name: &ScopedName,
        what: &str,
        span: Option<Span>,
        reporter: &mut dyn ErrorReporter,
    ) {
        let warning = match span {
            Some(span) => {
                CompileWarning::new(format!("allocating a large value in zeropage; {}", what), span)
            }
            None => CompileWarning::new(
                format!("{}: allocating a large value in zeropage; {}", name, what),
                Span::default(),
            ),
        };
        reporter.warn(warning);
    }

    fn make_allocation(&mut self, address: u16, size: usize, dt: DataType, name: &ScopedName) -> u8 {
        let end = usize::from(address) + size;
        self.free.retain(|&b| b < address || usize::from(b) >= end);
        let address = address as u8;
        self.allocations.insert(
            address,
            ZeropageAllocation {
                address,
                size,
                name: name.clone(),
                dt,
            },
        );
        if !name.is_empty() {
            self.by_name.insert(name.clone(), address);
        }
        trace!("zeropage: {} bytes at ${:02x} for '{}'", size, address, name);
        address
    }

    fn is_free(&self, address: u16) -> bool {
        self.free.contains(&address)
    }

    fn one_separate_byte_free(&self, address: u16) -> bool {
        self.is_free(address)
            && (address == 0 || !self.is_free(address - 1))
            && !self.is_free(address + 1)
    }

    fn sequential_free(&self, address: u16, size: usize) -> bool {
        let end = usize::from(address) + size;
        (usize::from(address)..end).all(|b| u16::try_from(b).is_ok_and(|b| self.is_free(b)))
    }

    /// The allocation owned by `name`, if any.
    pub fn allocated_variable(&self, name: &ScopedName) -> Option<&ZeropageAllocation> {
        self.by_name
            .get(name)
            .and_then(|address| self.allocations.get(address))
    }

    /// All committed allocations by ascending address.
    pub fn allocations(&self) -> impl Iterator<Item = &ZeropageAllocation> {
        self.allocations.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Diagnostics;
    use pretty_assertions::assert_eq;

    fn name(n: &str) -> ScopedName {
        ScopedName::parse(n)
    }

    fn zeropage(zp: ZeropageType) -> Zeropage {
        Zeropage::new(&CompilationOptions::new().with_zeropage(zp))
    }

    #[test]
    fn test_scratch_cells_never_free() {
        for zp in [
            ZeropageType::Basicsafe,
            ZeropageType::Floatsafe,
            ZeropageType::Kernalsafe,
            ZeropageType::Full,
        ] {
            let free: Vec<u8> = zeropage(zp).free_addresses().collect();
            for scratch in [SCRATCH_B1, SCRATCH_REG, SCRATCH_W1, SCRATCH_W1 + 1, SCRATCH_W2, SCRATCH_W2 + 1] {
                assert!(!free.contains(&scratch), "{:?} contains ${:02x}", zp, scratch);
            }
        }
    }

    #[test]
    fn test_policies_nest() {
        let basic = zeropage(ZeropageType::Basicsafe).available_bytes();
        let float = zeropage(ZeropageType::Floatsafe).available_bytes();
        let kernal = zeropage(ZeropageType::Kernalsafe).available_bytes();
        let full = zeropage(ZeropageType::Full).available_bytes();
        assert!(basic <= kernal);
        assert!(float <= kernal);
        assert!(kernal < full);
        assert_eq!(zeropage(ZeropageType::Dontuse).available_bytes(), 0);
    }

    #[test]
    fn test_single_byte_prefers_isolated_address() {
        let mut zp = zeropage(ZeropageType::Basicsafe);
        let mut diagnostics = Diagnostics::new();
        // $04,$05,$06 form a run; $0a is the first isolated byte.
        let (address, size) = zp
            .allocate(&name("main.b"), DataType::Ubyte, None, None, &mut diagnostics)
            .unwrap();
        assert_eq!((address, size), (0x0a, 1));
        let (address, _) = zp
            .allocate(&name("main.c"), DataType::Ubyte, None, None, &mut diagnostics)
            .unwrap();
        assert_eq!(address, 0x0e);
    }

    #[test]
    fn test_word_takes_first_run() {
        let mut zp = zeropage(ZeropageType::Basicsafe);
        let mut diagnostics = Diagnostics::new();
        let (address, size) = zp
            .allocate(&name("main.w"), DataType::Uword, None, None, &mut diagnostics)
            .unwrap();
        assert_eq!((address, size), (0x04, 2));
        assert_eq!(zp.allocated_variable(&name("main.w")).map(|a| a.size), Some(2));
    }

    #[test]
    fn test_errors() {
        let mut diagnostics = Diagnostics::new();
        let mut disabled = zeropage(ZeropageType::Dontuse);
        assert_eq!(
            disabled.allocate(&name("x"), DataType::Ubyte, None, None, &mut diagnostics),
            Err(ZeropageAllocationError::Disabled)
        );

        let mut zp = zeropage(ZeropageType::Basicsafe);
        assert_eq!(
            zp.allocate(&name("f"), DataType::Float, None, None, &mut diagnostics),
            Err(ZeropageAllocationError::FloatsNotEnabled)
        );
        assert_eq!(
            zp.allocate(&name("s"), DataType::ArrayUw, Some(100), None, &mut diagnostics),
            Err(ZeropageAllocationError::Exhausted(200))
        );
        zp.allocate(&name("x"), DataType::Ubyte, None, None, &mut diagnostics)
            .unwrap();
        assert_eq!(
            zp.allocate(&name("x"), DataType::Ubyte, None, None, &mut diagnostics),
            Err(ZeropageAllocationError::AlreadyAllocated(name("x")))
        );
    }

    #[test]
    fn test_oversized_requests_are_exhausted() {
        let mut zp = zeropage(ZeropageType::Full);
        let mut diagnostics = Diagnostics::new();
        let before: Vec<u8> = zp.free_addresses().collect();
        assert_eq!(
            zp.allocate(&name("main.big"), DataType::ArrayUw, Some(32768), None, &mut diagnostics),
            Err(ZeropageAllocationError::Exhausted(65536))
        );
        assert_eq!(
            zp.allocate(&name("main.huge"), DataType::ArrayUb, Some(usize::MAX), None, &mut diagnostics),
            Err(ZeropageAllocationError::Exhausted(usize::MAX))
        );
        assert_eq!(zp.free_addresses().collect::<Vec<_>>(), before);

        let (address, _) = zp
            .allocate(&name("main.b"), DataType::Ubyte, None, None, &mut diagnostics)
            .unwrap();
        assert!(zp.allocations().all(|a| a.address == address));
    }

    #[test]
    fn test_large_values_warn() {
        let options = CompilationOptions::new()
            .with_zeropage(ZeropageType::Floatsafe)
            .with_floats(true);
        let mut zp = Zeropage::new(&options);
        let mut diagnostics = Diagnostics::new();
        zp.allocate(&name("main.f"), DataType::Float, None, Some(Span::new(1, 2)), &mut diagnostics)
            .unwrap();
        assert_eq!(
            diagnostics.warnings()[0].message,
            "allocating a large value in zeropage; float 5 bytes"
        );
    }

    #[test]
    fn test_reserved_ranges_removed() {
        let options = CompilationOptions::new()
            .with_zeropage(ZeropageType::Full)
            .with_reserved(0x04..=0x20);
        let zp = Zeropage::new(&options);
        assert!(zp.free_addresses().all(|b| b > 0x20));
    }

    #[test]
    fn test_anonymous_allocations_are_not_named() {
        let mut zp = zeropage(ZeropageType::Basicsafe);
        let mut diagnostics = Diagnostics::new();
        let anonymous = ScopedName::new(vec![]);
        zp.allocate(&anonymous, DataType::Ubyte, None, None, &mut diagnostics)
            .unwrap();
        zp.allocate(&anonymous, DataType::Ubyte, None, None, &mut diagnostics)
            .unwrap();
        assert_eq!(zp.allocations().count(), 2);
        assert!(zp.allocated_variable(&anonymous).is_none());
    }

    #[test]
    fn test_word_availability() {
        let mut zp = zeropage(ZeropageType::Basicsafe);
        let mut diagnostics = Diagnostics::new();
        assert!(zp.has_word_available());
        let mut n = 0;
        while zp.has_word_available() {
            zp.allocate(&name(&format!("w{}", n)), DataType::Uword, None, None, &mut diagnostics)
                .unwrap();
            n += 1;
        }
        assert!(zp.has_byte_available());
        assert!(zp
            .allocate(&name("last"), DataType::Uword, None, None, &mut diagnostics)
            .is_err());
    }
}
