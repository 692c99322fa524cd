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

//! Assembling and running generated programs.
//!
//! This module provides:
//! - A built-in assembler for the emitted 64tass dialect
//! - A 6502/65C02 emulator with a native runtime library
//! - Invocation of the external 64tass assembler
//! - Watching program files for changes

pub mod assembler;
pub mod cpu;
pub mod opcodes;
pub mod runtime;
pub mod simulator;
mod tass;
mod watcher;

pub use assembler::{AssembledProgram, Assembler, AssemblerError};
pub use cpu::{Cpu, CpuError, Memory};
pub use runtime::{runtime_symbols, RuntimeError};
pub use simulator::{assemble_for_simulator, RunSummary, Simulator, DEFAULT_CYCLE_BUDGET};
pub use tass::{find_tass, tass_arguments, TassAssembler};
pub use watcher::ProgramWatcher;

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors of the runner.
#[derive(Debug, Error)]
pub enum RunnerError {
    /// 64tass is not installed.
    #[error("64tass not found. Install 64tass or specify its path with --tass-path")]
    TassNotFound,

    /// The given 64tass path does not exist.
    #[error("64tass path does not exist: {0}")]
    InvalidTassPath(PathBuf),

    /// 64tass could not be started.
    #[error("failed to start 64tass: {0}")]
    TassStartFailed(#[from] io::Error),

    /// 64tass reported errors.
    #[error("64tass failed:\n{0}")]
    TassFailed(String),

    #[error(transparent)]
    Assembler(#[from] AssemblerError),

    #[error(transparent)]
    Cpu(#[from] CpuError),

    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    /// The program ran longer than its cycle budget.
    #[error("program did not finish within {0} cycles")]
    CycleBudgetExceeded(u64),

    /// A symbol asked for does not exist in the program.
    #[error("unknown symbol '{0}'")]
    UnknownSymbol(String),

    /// A number that has no 5-byte float representation.
    #[error("{0} cannot be stored as a float")]
    FloatOutOfRange(f64),

    /// Error watching files.
    #[error("file watch error: {0}")]
    WatchError(String),
}
