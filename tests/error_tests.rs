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

//! Diagnostics tests: every rejected program reports the right error code.

use mos65gen::config::{CompilationOptions, ZeropageType};
use mos65gen::{compile, compile_with_reporter, Diagnostics, ErrorCode};
use pretty_assertions::assert_eq;
use test_case::test_case;

fn error_code(source: &str, options: CompilationOptions) -> ErrorCode {
    match compile("errors", source, options) {
        Ok(assembly) => panic!("expected an error, got:\n{}", assembly.text()),
        Err(error) => error.code,
    }
}

fn in_start(body: &str) -> String {
    format!(
        "main {{\n  ubyte b\n  byte sb\n  uword w\n  float f\n  sub start() {{\n{}\n  }}\n}}\n",
        body
    )
}

#[test_case("main {\n  ubyte x = #\n}\n", ErrorCode::InvalidCharacter; "invalid_character")]
#[test_case("main {\n  str s = \"open\n}\n", ErrorCode::UnterminatedString; "unterminated_string")]
#[test_case("main {\n  sub start() {\n    b = \n  }\n}\n", ErrorCode::ExpectedExpression; "missing_expression")]
#[test_case("main {\n  sub start() {\n", ErrorCode::UnexpectedEndOfFile; "unexpected_end")]
#[test_case("main {\n  sub start() {\n    5 = 3\n  }\n}\n", ErrorCode::InvalidAssignmentTarget; "literal_target")]
#[test_case("main {\n  sub start() {\n    x = 1\n  }\n}\n", ErrorCode::UndefinedName; "undefined_name")]
#[test_case("main {\n  ubyte x\n  ubyte x\n  sub start() {\n  }\n}\n", ErrorCode::DuplicateDefinition; "duplicate")]
#[test_case("main {\n  sub start() {\n    break\n  }\n}\n", ErrorCode::BreakOutsideLoop; "break_outside_loop")]
#[test_case("main {\n  ubyte x = 300\n  sub start() {\n  }\n}\n", ErrorCode::ValueOutOfRange; "initializer_out_of_range")]
#[test_case("main {\n  uword[129] table\n  sub start() {\n  }\n}\n", ErrorCode::ValueOutOfRange; "array_too_long")]
#[test_case("other {\n}\nmain {\n  sub start() {\n  }\n}\n", ErrorCode::MissingMainBlock; "main_not_first")]
#[test_case("main {\n  sub begin() {\n  }\n}\n", ErrorCode::MissingEntryPoint; "missing_start")]
fn test_program_errors(source: &str, expected: ErrorCode) {
    assert_eq!(error_code(source, CompilationOptions::default()), expected);
}

#[test_case("    b = w", ErrorCode::TypeMismatch; "implicit_narrowing")]
#[test_case("    start(1)", ErrorCode::ArgumentCount; "argument_count")]
#[test_case("    b = b / 0", ErrorCode::DivisionByZero; "division_by_zero")]
#[test_case("    w /= 0", ErrorCode::DivisionByZero; "in_place_division_by_zero")]
#[test_case("    b %= 0", ErrorCode::DivisionByZero; "in_place_remainder_by_zero")]
#[test_case("    sb %= 3", ErrorCode::SignedRemainder; "signed_remainder")]
#[test_case("    b = b << w", ErrorCode::InvalidShift; "word_shift_amount")]
fn test_statement_errors(body: &str, expected: ErrorCode) {
    let options = CompilationOptions::new().with_floats(true);
    assert_eq!(error_code(&in_start(body), options), expected);
}

#[test]
fn test_float_division_by_zero() {
    let options = CompilationOptions::new().with_floats(true);
    assert_eq!(error_code(&in_start("    f = f / 0.0"), options), ErrorCode::DivisionByZero);
}

#[test]
fn test_narrowing_error_has_cast_hint() {
    let error = compile("errors", &in_start("    b = w"), CompilationOptions::default()).unwrap_err();
    assert_eq!(error.hint.as_deref(), Some("use an explicit 'as' cast"));
}

#[test]
fn test_required_zeropage_with_zeropage_disabled() {
    let source = "main {\n  ubyte @requirezp counter\n  sub start() {\n    counter = 1\n  }\n}\n";
    let options = CompilationOptions::new().with_zeropage(ZeropageType::Dontuse);
    assert_eq!(error_code(source, options), ErrorCode::ZeropageDisabled);
}

#[test]
fn test_required_zeropage_array_larger_than_zeropage() {
    let source = "main {\n  ubyte[256] @requirezp big\n  sub start() {\n    big[0] = 1\n  }\n}\n";
    let options = CompilationOptions::new().with_zeropage(ZeropageType::Full);
    assert_eq!(error_code(source, options), ErrorCode::ZeropageExhausted);
}

#[test]
fn test_required_zeropage_float_without_floats() {
    let source = "main {\n  float @requirezp value\n  sub start() {\n  }\n}\n";
    assert_eq!(error_code(source, CompilationOptions::default()), ErrorCode::FloatsNotEnabled);
}

#[test]
fn test_reporter_collects_code_generation_errors() {
    let source = "main {\n  ubyte b\n  sub start() {\n    b = b / 0\n  }\n}\n";
    let mut diagnostics = Diagnostics::new();
    let result = compile_with_reporter("errors", source, CompilationOptions::default(), &mut diagnostics);
    assert!(result.is_err());
    let report = mos65gen::ErrorReporter::report(&diagnostics, source, Some("errors.p8t"));
    assert_eq!(diagnostics.errors().len(), 1);
    assert!(report.contains("E200"), "report was: {}", report);
    assert!(report.contains("errors.p8t:4:"), "report was: {}", report);
}

#[test]
fn test_preferred_zeropage_falls_back_silently() {
    let source = "main {\n  ubyte @zp counter\n  sub start() {\n    counter = 1\n  }\n}\n";
    let options = CompilationOptions::new().with_zeropage(ZeropageType::Dontuse);
    let assembly = compile("errors", source, options).unwrap();
    let text = assembly.text();
    assert!(text.contains("counter\t.byte"), "{}", text);
    assert!(!text.contains("counter = "), "{}", text);
}
