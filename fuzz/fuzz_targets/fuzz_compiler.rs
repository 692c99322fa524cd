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

//! Fuzz target for the complete pipeline: reader, code generator and the
//! built-in assembler.
//!
//! Run with:
//!   cargo +nightly fuzz run fuzz_compiler -- -max_total_time=60

#![no_main]

use libfuzzer_sys::fuzz_target;
use mos65gen::config::CompilationOptions;

fuzz_target!(|data: &[u8]| {
    if let Ok(source) = std::str::from_utf8(data) {
        let options = CompilationOptions::new().with_floats(true);
        if let Ok(assembly) = mos65gen::compile("fuzz", source, options) {
            let _ = mos65gen::assemble(&assembly);
        }
    }
});
