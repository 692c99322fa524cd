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

//! mos65gen Library
//!
//! A code generation backend for the 6502 and 65C02 that turns a typed
//! program tree into 64tass assembly.
//!
//! # Modules
//!
//! - [`error`] - Error types and error reporting
//! - [`ast`] - The normalized program tree
//! - [`reader`] - Reading program tree text into a normalized tree
//! - [`config`] - Compilation options
//! - [`codegen`] - Assembly generation
//! - [`runner`] - Built-in assembler, simulator and 64tass invocation
//! - [`output`] - Assembly, PRG and raw file writing
//!
//! # Example
//!
//! ```no_run
//! use mos65gen::{compile, CompilationOptions};
//!
//! let source = "main {\n  sub start() {\n    @($d020) = 0\n  }\n}\n";
//! let assembly = compile("border", source, CompilationOptions::default()).unwrap();
//! println!("{}", assembly.text());
//! ```

pub mod ast;
pub mod codegen;
pub mod config;
pub mod error;
pub mod output;
pub mod reader;
pub mod runner;

pub use ast::{DataType, Program};
pub use codegen::AssemblyProgram;
pub use config::CompilationOptions;
pub use error::{format_error, CompileError, CompileWarning, Diagnostics, ErrorCode, ErrorReporter, Result, SourceLocation, Span};

use runner::{AssembledProgram, Assembler, RunnerError};

/// The version of the compiler.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// The name of the compiler.
pub const NAME: &str = "mos65gen";

/// The file extension of program tree text files.
pub const PROGRAM_EXTENSION: &str = "p8t";

/// Compile program tree text into assembly.
///
/// Warnings are dropped; use [`compile_with_reporter`] to see them.
pub fn compile(name: &str, source: &str, options: CompilationOptions) -> Result<AssemblyProgram> {
    let mut diagnostics = Diagnostics::new();
    compile_with_reporter(name, source, options, &mut diagnostics)
}

/// Compile program tree text, reporting diagnostics through `reporter`.
pub fn compile_with_reporter(
    name: &str,
    source: &str,
    options: CompilationOptions,
    reporter: &mut dyn ErrorReporter,
) -> Result<AssemblyProgram> {
    let program = reader::read_program(name, source)?;
    codegen::generate(&program, options, reporter)
}

/// Assemble generated assembly with the built-in assembler.
///
/// Runtime library routines resolve to the entry points of the simulator's
/// native runtime.
pub fn assemble(program: &AssemblyProgram) -> std::result::Result<AssembledProgram, RunnerError> {
    let assembler = Assembler::new().with_symbols(runner::runtime_symbols());
    Ok(assembler.assemble(&program.text())?)
}
