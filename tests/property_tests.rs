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

//! Property-based tests for mos65gen.
//!
//! These tests verify invariants of the zero page allocator and the
//! behavior of generated code, using proptest for random input generation
//! and the built-in simulator to run the programs.

use mos65gen::ast::{DataType, ScopedName};
use mos65gen::codegen::Zeropage;
use mos65gen::config::{CompilationOptions, CpuType, ZeropageType};
use mos65gen::runner::Simulator;
use mos65gen::{assemble, compile, Diagnostics};
use proptest::prelude::*;
use std::cell::RefCell;
use proptest::test_runner::{Config, TestRunner};

fn simulator(source: &str) -> Simulator {
    simulator_with(source, CompilationOptions::default())
}

fn simulator_with(source: &str, options: CompilationOptions) -> Simulator {
    let assembly = compile("prop", source, options)
        .unwrap_or_else(|e| panic!("compile failed: {}\n{}", e, source));
    Simulator::new(assemble(&assembly).unwrap())
}

fn runner() -> TestRunner {
    TestRunner::new(Config::with_cases(64))
}

// ============================================================================
// Zero Page Allocator Properties
// ============================================================================

fn zp_type() -> impl Strategy<Value = ZeropageType> {
    prop_oneof![
        Just(ZeropageType::Basicsafe),
        Just(ZeropageType::Floatsafe),
        Just(ZeropageType::Kernalsafe),
        Just(ZeropageType::Full),
    ]
}

fn allocation_type() -> impl Strategy<Value = DataType> {
    prop_oneof![
        Just(DataType::Ubyte),
        Just(DataType::Byte),
        Just(DataType::Uword),
        Just(DataType::Word),
    ]
}

proptest! {
    /// Property: allocations never overlap and never touch reserved bytes.
    #[test]
    fn prop_allocations_disjoint(
        zeropage in zp_type(),
        reserved_start in 0x04u8..0xf0,
        reserved_len in 0u8..16,
        types in prop::collection::vec(allocation_type(), 1..60),
    ) {
        let reserved = reserved_start..=reserved_start.saturating_add(reserved_len);
        let options = CompilationOptions::new()
            .with_zeropage(zeropage)
            .with_reserved(reserved.clone());
        let mut zp = Zeropage::new(&options);
        let mut reporter = Diagnostics::new();
        let mut used = [false; 256];
        for (index, dt) in types.iter().enumerate() {
            let name = ScopedName::parse(&format!("main.v{}", index));
            if let Ok((address, size)) = zp.allocate(&name, *dt, None, None, &mut reporter) {
                for byte in address as usize..address as usize + size {
                    prop_assert!(byte <= 0xff, "allocation past the zero page at {}", byte);
                    prop_assert!(!used[byte], "byte ${:02x} allocated twice", byte);
                    prop_assert!(!reserved.contains(&(byte as u8)), "reserved byte ${:02x} allocated", byte);
                    used[byte] = true;
                }
            }
        }
    }

    /// Property: the same requests give the same addresses.
    #[test]
    fn prop_allocation_deterministic(
        zeropage in zp_type(),
        types in prop::collection::vec(allocation_type(), 1..40),
    ) {
        let run = || {
            let options = CompilationOptions::new().with_zeropage(zeropage);
            let mut zp = Zeropage::new(&options);
            let mut reporter = Diagnostics::new();
            types
                .iter()
                .enumerate()
                .map(|(index, dt)| {
                    let name = ScopedName::parse(&format!("main.v{}", index));
                    zp.allocate(&name, *dt, None, None, &mut reporter).ok()
                })
                .collect::<Vec<_>>()
        };
        prop_assert_eq!(run(), run());
    }

    /// Property: a failing allocation leaves the free pool untouched.
    #[test]
    fn prop_failed_allocation_is_atomic(count in 1usize..300) {
        let options = CompilationOptions::new().with_zeropage(ZeropageType::Basicsafe);
        let mut zp = Zeropage::new(&options);
        let mut reporter = Diagnostics::new();
        let name = ScopedName::parse("main.big");
        let before: Vec<u8> = zp.free_addresses().collect();
        if zp.allocate(&name, DataType::ArrayUb, Some(count), None, &mut reporter).is_err() {
            let after: Vec<u8> = zp.free_addresses().collect();
            prop_assert_eq!(before, after);
            prop_assert!(zp.allocated_variable(&name).is_none());
        }
    }

    /// Property: arrays larger than the zero page are refused without
    /// touching the pool, and later allocations stay inside the page.
    #[test]
    fn prop_oversized_allocation_is_refused(
        zeropage in zp_type(),
        count in 257usize..70_000,
        dt in prop_oneof![Just(DataType::ArrayUb), Just(DataType::ArrayUw), Just(DataType::ArrayF)],
    ) {
        let options = CompilationOptions::new().with_zeropage(zeropage).with_floats(true);
        let mut zp = Zeropage::new(&options);
        let mut reporter = Diagnostics::new();
        let name = ScopedName::parse("main.big");
        let before: Vec<u8> = zp.free_addresses().collect();
        prop_assert!(zp.allocate(&name, dt, Some(count), None, &mut reporter).is_err());
        prop_assert_eq!(zp.free_addresses().collect::<Vec<_>>(), before);
        prop_assert!(zp.allocated_variable(&name).is_none());

        let small = ScopedName::parse("main.small");
        let (address, size) = zp.allocate(&small, DataType::Uword, None, None, &mut reporter).unwrap();
        prop_assert!(address as usize + size <= 256);
        prop_assert_eq!(zp.allocations().count(), 1);
    }
}

// ============================================================================
// Branch Properties
// ============================================================================

const COMPARISONS: [&str; 6] = ["==", "!=", "<", ">", "<=", ">="];

fn compare(op: &str, a: i32, b: i32) -> bool {
    match op {
        "==" => a == b,
        "!=" => a != b,
        "<" => a < b,
        ">" => a > b,
        "<=" => a <= b,
        _ => a >= b,
    }
}

/// Datatype name, its range and whether values are stored as words.
const INTEGER_TYPES: [(&str, i32, i32, bool); 4] = [
    ("ubyte", 0, 255, false),
    ("byte", -128, 127, false),
    ("uword", 0, 65535, true),
    ("word", -32768, 32767, true),
];

fn store(simulator: &mut Simulator, name: &str, value: i32, word: bool) {
    if word {
        simulator.write_word(name, value as u16).unwrap();
    } else {
        simulator.write_byte(name, value as u8).unwrap();
    }
}

fn branch_program(dt: &str, op: &str, right: &str) -> String {
    format!(
        "main {{\n  {dt} a\n  {dt} b\n  ubyte result\n  sub start() {{\n    result = 0\n    if a {op} {right} {{\n      result = 1\n    }}\n  }}\n}}\n"
    )
}

fn boundaries(min: i32, max: i32) -> Vec<i32> {
    let mut values = vec![min, min + 1, -1, 0, 1, max / 2, max / 2 + 1, max - 1, max];
    values.retain(|v| (min..=max).contains(v));
    values.sort_unstable();
    values.dedup();
    values
}

/// Branches on two variables agree with the comparison for random values.
#[test]
fn test_variable_branches_match_comparison() {
    for (dt, min, max, word) in INTEGER_TYPES {
        for op in COMPARISONS {
            let simulator = RefCell::new(simulator(&branch_program(dt, op, "b")));
            let mut runner = runner();
            runner
                .run(&(min..=max, min..=max), |(a, b)| {
                    let mut simulator = simulator.borrow_mut();
                    store(&mut simulator, "main.a", a, word);
                    store(&mut simulator, "main.b", b, word);
                    simulator.call("main.start").unwrap();
                    let taken = simulator.read_byte("main.result").unwrap() == 1;
                    prop_assert_eq!(taken, compare(op, a, b), "{} {} {} {}", dt, a, op, b);
                    Ok(())
                })
                .unwrap();
        }
    }
}

/// Branches against a constant agree with the comparison for the same values.
#[test]
fn test_constant_branches_match_comparison() {
    for (dt, min, max, word) in INTEGER_TYPES {
        for op in COMPARISONS {
            for constant in boundaries(min, max) {
                let mut simulator = simulator(&branch_program(dt, op, &constant.to_string()));
                for a in boundaries(min, max) {
                    store(&mut simulator, "main.a", a, word);
                    simulator.call("main.start").unwrap();
                    let taken = simulator.read_byte("main.result").unwrap() == 1;
                    assert_eq!(taken, compare(op, a, constant), "{} {} {} {}", dt, a, op, constant);
                }
            }
        }
    }
}

/// Branches against a memory read agree with the comparison.
#[test]
fn test_memory_read_branches_match_comparison() {
    for op in COMPARISONS {
        let simulator = RefCell::new(simulator(&branch_program("ubyte", op, "@($c000)")));
        let mut runner = runner();
        runner
            .run(&(any::<u8>(), any::<u8>()), |(a, b)| {
                let mut simulator = simulator.borrow_mut();
                simulator.write_byte("main.a", a).unwrap();
                simulator.poke(0xc000, b);
                simulator.call("main.start").unwrap();
                let taken = simulator.read_byte("main.result").unwrap() == 1;
                prop_assert_eq!(taken, compare(op, a as i32, b as i32));
                Ok(())
            })
            .unwrap();
    }
}

fn float_simulator(source: &str) -> Simulator {
    simulator_with(source, CompilationOptions::new().with_floats(true))
}

fn compare_floats(op: &str, a: f64, b: f64) -> bool {
    match op {
        "==" => a == b,
        "!=" => a != b,
        "<" => a < b,
        ">" => a > b,
        "<=" => a <= b,
        _ => a >= b,
    }
}

fn float_value() -> impl Strategy<Value = f64> {
    prop_oneof![
        prop::sample::select(vec![-2.5, -1.0, -0.5, 0.0, 0.5, 1.0, 1.5, 2.5]),
        -1000.0f64..1000.0,
    ]
}

/// Float branches on two variables agree with the comparison.
#[test]
fn test_float_variable_branches_match_comparison() {
    for op in COMPARISONS {
        let source = branch_program("float", op, "b");
        let simulator = RefCell::new(float_simulator(&source));
        let mut runner = runner();
        runner
            .run(&(float_value(), float_value()), |(a, b)| {
                let mut simulator = simulator.borrow_mut();
                simulator.write_float("main.a", a).unwrap();
                simulator.write_float("main.b", b).unwrap();
                let (a, b) = (
                    simulator.read_float("main.a").unwrap(),
                    simulator.read_float("main.b").unwrap(),
                );
                simulator.call("main.start").unwrap();
                let taken = simulator.read_byte("main.result").unwrap() == 1;
                prop_assert_eq!(taken, compare_floats(op, a, b), "{} {} {}", a, op, b);
                Ok(())
            })
            .unwrap();
    }
}

/// Float branches against constants, including the byte pattern tests
/// for `== 0.0`, `!= 0.0`, `== 1.0` and `!= 1.0`.
#[test]
fn test_float_constant_branches_match_comparison() {
    let values = [-2.5, -1.0, -0.5, 0.0, 0.25, 0.5, 1.0, 1.0 + 1.0 / 65536.0, 1.5, 2.0, 100.0];
    for op in COMPARISONS {
        for constant in ["0.0", "1.0", "-1.0", "2.5"] {
            let mut simulator = float_simulator(&branch_program("float", op, constant));
            let right: f64 = constant.parse().unwrap();
            for a in values {
                simulator.write_float("main.a", a).unwrap();
                simulator.call("main.start").unwrap();
                let taken = simulator.read_byte("main.result").unwrap() == 1;
                assert_eq!(taken, compare_floats(op, a, right), "{} {} {}", a, op, constant);
            }
        }
    }
}

fn poke_string(simulator: &mut Simulator, name: &str, text: &[u8]) {
    let address = simulator.program().symbol(name).unwrap();
    for (offset, byte) in text.iter().chain(std::iter::once(&0)).enumerate() {
        simulator.poke(address + offset as u16, *byte);
    }
}

/// String branches agree with byte-wise lexicographic ordering, where a
/// prefix orders before the longer string.
#[test]
fn test_string_branches_match_comparison() {
    let text = || prop::collection::vec(prop::sample::select(vec![0x41u8, 0x42, 0x43]), 0..=8);
    for op in COMPARISONS {
        let source = format!(
            "main {{\n  str a = \"........\"\n  str b = \"........\"\n  ubyte result\n  sub start() {{\n    result = 0\n    if a {op} b {{\n      result = 1\n    }}\n  }}\n}}\n"
        );
        let simulator = RefCell::new(simulator(&source));
        let mut runner = runner();
        runner
            .run(&(text(), text()), |(a, b)| {
                let mut simulator = simulator.borrow_mut();
                poke_string(&mut simulator, "main.a", &a);
                poke_string(&mut simulator, "main.b", &b);
                simulator.call("main.start").unwrap();
                let taken = simulator.read_byte("main.result").unwrap() == 1;
                let expected = match op {
                    "==" => a == b,
                    "!=" => a != b,
                    "<" => a < b,
                    ">" => a > b,
                    "<=" => a <= b,
                    _ => a >= b,
                };
                prop_assert_eq!(taken, expected, "{:?} {} {:?}", a, op, b);
                Ok(())
            })
            .unwrap();
    }
}

/// Branches reading through a pointer, in normal memory and in zero page,
/// on both CPUs and on both sides of the comparison.
#[test]
fn test_pointer_branches_match_comparison() {
    for cpu in [CpuType::Cpu6502, CpuType::Cpu65c02] {
        for pointer in ["uword ptr", "uword @zp ptr"] {
            for op in COMPARISONS {
                let source = format!(
                    "main {{\n  ubyte a\n  {pointer}\n  ubyte left\n  ubyte right\n  sub start() {{\n    left = 0\n    right = 0\n    if a {op} @(ptr) {{\n      left = 1\n    }}\n    if @(ptr) {op} a {{\n      right = 1\n    }}\n  }}\n}}\n"
                );
                let options = CompilationOptions::new().with_cpu(cpu);
                let simulator = RefCell::new(simulator_with(&source, options));
                let mut runner = runner();
                runner
                    .run(&(any::<u8>(), any::<u8>()), |(a, b)| {
                        let mut simulator = simulator.borrow_mut();
                        simulator.write_byte("main.a", a).unwrap();
                        simulator.write_word("main.ptr", 0xc000).unwrap();
                        simulator.poke(0xc000, b);
                        simulator.call("main.start").unwrap();
                        let (a, b) = (a as i32, b as i32);
                        prop_assert_eq!(simulator.read_byte("main.left").unwrap() == 1, compare(op, a, b));
                        prop_assert_eq!(simulator.read_byte("main.right").unwrap() == 1, compare(op, b, a));
                        Ok(())
                    })
                    .unwrap();
            }
        }
    }
}

// ============================================================================
// In-place Assignment Properties
// ============================================================================

const OPERATORS: [&str; 10] = ["+", "-", "*", "/", "%", "&", "|", "^", "<<", ">>"];

/// Datatype name, width in bits and signedness.
const ARITHMETIC_TYPES: [(&str, u32, bool); 4] = [
    ("ubyte", 8, false),
    ("byte", 8, true),
    ("uword", 16, false),
    ("word", 16, true),
];

/// Truncate `value` to `bits`, reading the result as signed when asked.
fn wrap(value: i64, bits: u32, signed: bool) -> i64 {
    let masked = value & ((1i64 << bits) - 1);
    if signed && masked >= 1i64 << (bits - 1) {
        masked - (1i64 << bits)
    } else {
        masked
    }
}

/// The result of `a op b` on the target: signed division truncates and
/// signed right shifts fill with the sign bit.
fn apply(op: &str, a: i64, b: i64, bits: u32, signed: bool) -> i64 {
    let value = match op {
        "+" => a + b,
        "-" => a - b,
        "*" => a * b,
        "/" => a / b,
        "%" => a % b,
        "&" => a & b,
        "|" => a | b,
        "^" => a ^ b,
        "<<" => a << b,
        _ => a >> b,
    };
    wrap(value, bits, signed)
}

fn range_of(bits: u32, signed: bool) -> std::ops::RangeInclusive<i64> {
    if signed {
        -(1i64 << (bits - 1))..=(1i64 << (bits - 1)) - 1
    } else {
        0..=(1i64 << bits) - 1
    }
}

fn read_integer(simulator: &Simulator, name: &str, bits: u32, signed: bool) -> i64 {
    let raw = if bits == 16 {
        simulator.read_word(name).unwrap() as i64
    } else {
        simulator.read_byte(name).unwrap() as i64
    };
    wrap(raw, bits, signed)
}

/// `x op= b`, `x = x op b` and `z = b op z` (or `z = a op b` when the
/// operator does not commute) all give the same result, for every
/// integer type.
#[test]
fn test_in_place_updates_match_evaluation() {
    for (dt, bits, signed) in ARITHMETIC_TYPES {
        for op in OPERATORS {
            if signed && op == "%" {
                continue;
            }
            let commutative = matches!(op, "+" | "*" | "&" | "|" | "^");
            let shift = matches!(op, "<<" | ">>");
            let amount_dt = if shift { "ubyte" } else { dt };
            let swapped = if commutative {
                format!("    z = b {op} z\n")
            } else {
                format!("    z = a {op} b\n")
            };
            let source = format!(
                "main {{\n  {dt} a\n  {amount_dt} b\n  {dt} x\n  {dt} y\n  {dt} z\n  sub start() {{\n    x = a\n    y = a\n    z = a\n    x {op}= b\n    y = y {op} b\n{swapped}  }}\n}}\n"
            );
            let simulator = RefCell::new(simulator(&source));
            let amount = if shift {
                0..=i64::from(bits) - 1
            } else {
                range_of(bits, signed)
            };
            let word = bits == 16;
            let mut runner = runner();
            runner
                .run(&(range_of(bits, signed), amount), |(a, b)| {
                    if matches!(op, "/" | "%") && b == 0 {
                        return Ok(());
                    }
                    let mut simulator = simulator.borrow_mut();
                    store(&mut simulator, "main.a", a as i32, word);
                    store(&mut simulator, "main.b", b as i32, word && !shift);
                    simulator.call("main.start").unwrap();
                    let expected = apply(op, a, b, bits, signed);
                    for target in ["main.x", "main.y", "main.z"] {
                        prop_assert_eq!(
                            read_integer(&simulator, target, bits, signed),
                            expected,
                            "{}: {} = {} {} {}", dt, target, a, op, b
                        );
                    }
                    Ok(())
                })
                .unwrap();
        }
    }
}

/// Nested updates of the target through an associative operator:
/// `x = (x+a)+b`, `x = a+(x+b)` and `x = (x-a)-b`.
#[test]
fn test_nested_associative_updates_match_evaluation() {
    for (dt, bits, signed) in ARITHMETIC_TYPES {
        let source = format!(
            "main {{\n  {dt} a\n  {dt} b\n  {dt} start_value\n  {dt} x1\n  {dt} x2\n  {dt} x3\n  {dt} x4\n  sub start() {{\n    x1 = start_value\n    x2 = start_value\n    x3 = start_value\n    x4 = start_value\n    x1 = (x1 + a) + b\n    x2 = a + (x2 + b)\n    x3 = (x3 - a) - b\n    x4 = (x4 ^ a) ^ b\n  }}\n}}\n"
        );
        let simulator = RefCell::new(simulator(&source));
        let word = bits == 16;
        let values = range_of(bits, signed);
        let mut runner = runner();
        runner
            .run(&(values.clone(), values.clone(), values), |(start, a, b)| {
                let mut simulator = simulator.borrow_mut();
                store(&mut simulator, "main.start_value", start as i32, word);
                store(&mut simulator, "main.a", a as i32, word);
                store(&mut simulator, "main.b", b as i32, word);
                simulator.call("main.start").unwrap();
                let sum = wrap(start + a + b, bits, signed);
                let difference = wrap(start - a - b, bits, signed);
                let xor = wrap(start ^ a ^ b, bits, signed);
                prop_assert_eq!(read_integer(&simulator, "main.x1", bits, signed), sum, "{}", dt);
                prop_assert_eq!(read_integer(&simulator, "main.x2", bits, signed), sum, "{}", dt);
                prop_assert_eq!(read_integer(&simulator, "main.x3", bits, signed), difference, "{}", dt);
                prop_assert_eq!(read_integer(&simulator, "main.x4", bits, signed), xor, "{}", dt);
                Ok(())
            })
            .unwrap();
    }
}

/// In-place updates of memory cells (through a pointer, a zero page
/// pointer and a constant address) and of array elements (constant and
/// variable index) give the same result as evaluating the operator.
#[test]
fn test_in_place_memory_and_element_updates_match_evaluation() {
    for cpu in [CpuType::Cpu6502, CpuType::Cpu65c02] {
        for op in OPERATORS {
            let shift = matches!(op, "<<" | ">>");
            let word_amount = if shift { "b" } else { "wb" };
            let source = format!(
                "main {{\n  ubyte a\n  ubyte b\n  uword wa\n  uword wb\n  uword ptr\n  uword @zp zptr\n  ubyte i\n  ubyte[4] bytes\n  uword[4] words\n  sub start() {{\n    ptr = $c000\n    zptr = $c001\n    i = 3\n    @(ptr) = a\n    @(ptr) {op}= b\n    @(zptr) = a\n    @(zptr) {op}= b\n    @($c002) = a\n    @($c002) {op}= b\n    bytes[1] = a\n    bytes[1] {op}= b\n    bytes[i] = a\n    bytes[i] {op}= b\n    words[2] = wa\n    words[2] {op}= {word_amount}\n    words[i] = wa\n    words[i] {op}= {word_amount}\n  }}\n}}\n"
            );
            let options = CompilationOptions::new().with_cpu(cpu);
            let simulator = RefCell::new(simulator_with(&source, options));
            let amount = if shift { 0u8..=7 } else { 0u8..=255 };
            let mut runner = runner();
            runner
                .run(&(any::<u8>(), amount, any::<u16>(), any::<u16>()), |(a, b, wa, wb)| {
                    if matches!(op, "/" | "%") && (b == 0 || wb == 0) {
                        return Ok(());
                    }
                    let mut simulator = simulator.borrow_mut();
                    simulator.write_byte("main.a", a).unwrap();
                    simulator.write_byte("main.b", b).unwrap();
                    simulator.write_word("main.wa", wa).unwrap();
                    simulator.write_word("main.wb", wb).unwrap();
                    simulator.call("main.start").unwrap();

                    let word_b = if shift { i64::from(b) } else { i64::from(wb) };
                    let expected_byte = apply(op, i64::from(a), i64::from(b), 8, false);
                    let expected_word = apply(op, i64::from(wa), word_b, 16, false);
                    for address in [0xc000u16, 0xc001, 0xc002] {
                        prop_assert_eq!(
                            i64::from(simulator.peek(address)),
                            expected_byte,
                            "{:?} @(${:04x}) {}= {}", cpu, address, op, b
                        );
                    }
                    let bytes = simulator.program().symbol("main.bytes").unwrap();
                    let words = simulator.program().symbol("main.words").unwrap();
                    prop_assert_eq!(i64::from(simulator.peek(bytes + 1)), expected_byte);
                    prop_assert_eq!(i64::from(simulator.peek(bytes + 3)), expected_byte);
                    prop_assert_eq!(i64::from(simulator.peek_word(words + 4)), expected_word);
                    prop_assert_eq!(i64::from(simulator.peek_word(words + 6)), expected_word);
                    Ok(())
                })
                .unwrap();
        }
    }
}

fn close_to(value: f64, expected: f64) -> bool {
    (value - expected).abs() <= expected.abs() * 1e-8 + 1e-30
}

/// Float `x op= b` matches `x = x op b` and the swapped or plain
/// evaluation, bit for bit, and is close to the exact result.
#[test]
fn test_float_in_place_updates_match_evaluation() {
    let divisor = prop_oneof![-1000.0f64..-0.5, 0.5f64..1000.0];
    for op in ["+", "-", "*", "/"] {
        let swapped = if matches!(op, "+" | "*") {
            format!("    z = b {op} z\n")
        } else {
            format!("    z = a {op} b\n")
        };
        let source = format!(
            "main {{\n  float a\n  float b\n  float x\n  float y\n  float z\n  sub start() {{\n    x = a\n    y = a\n    z = a\n    x {op}= b\n    y = y {op} b\n{swapped}  }}\n}}\n"
        );
        let simulator = RefCell::new(float_simulator(&source));
        let mut runner = runner();
        runner
            .run(&(-1000.0f64..1000.0, divisor.clone()), |(a, b)| {
                let mut simulator = simulator.borrow_mut();
                simulator.write_float("main.a", a).unwrap();
                simulator.write_float("main.b", b).unwrap();
                let (a, b) = (
                    simulator.read_float("main.a").unwrap(),
                    simulator.read_float("main.b").unwrap(),
                );
                simulator.call("main.start").unwrap();
                let expected = match op {
                    "+" => a + b,
                    "-" => a - b,
                    "*" => a * b,
                    _ => a / b,
                };
                let x = simulator.read_float("main.x").unwrap();
                prop_assert!(close_to(x, expected), "{} {}= {} gave {}, expected {}", a, op, b, x, expected);
                prop_assert_eq!(simulator.read_float("main.y").unwrap(), x);
                prop_assert_eq!(simulator.read_float("main.z").unwrap(), x);
                Ok(())
            })
            .unwrap();
    }
}
