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

//! Snapshot tests for token streams and plain-text diagnostics.

use mos65gen::config::CompilationOptions;
use mos65gen::reader::tokenize;
use mos65gen::{compile, format_error};

#[test]
fn test_block_tokens() {
    let source = "main {\n  ubyte x = $10\n}\n";
    let dump: String = tokenize(source)
        .unwrap()
        .iter()
        .map(|(token, span)| format!("{:?} @ {}..{}\n", token, span.start, span.end))
        .collect();
    insta::assert_snapshot!("block_tokens", dump);
}

#[test]
fn test_undefined_name_diagnostic() {
    let source = "main {\n  sub start() {\n    x = 1\n  }\n}\n";
    let error = compile("bad", source, CompilationOptions::default()).unwrap_err();
    insta::assert_snapshot!("undefined_name_diagnostic", format_error(&error, source, Some("bad.p8t")));
}

#[test]
fn test_subroutine_assembly() {
    let source = "main {\n  ubyte counter\n  sub start() {\n    bump()\n  }\n  sub bump() {\n    counter++\n  }\n}\n";
    let assembly = compile("bump", source, CompilationOptions::default()).unwrap();
    let lines: Vec<&str> = assembly
        .lines
        .iter()
        .map(String::as_str)
        .skip_while(|line| *line != "bump\t.proc")
        .collect();
    let end = lines.iter().position(|line| *line == "\t.pend").unwrap();
    insta::assert_snapshot!("subroutine_assembly", lines[..=end].join("\n"));
}
