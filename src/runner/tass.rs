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

//! Invoking the external 64tass cross-assembler.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use log::{debug, info};

use super::RunnerError;
use crate::config::OutputType;

/// Binary names tried, in order.
const TASS_BINARIES: &[&str] = &["64tass", "64tass.exe"];

/// Find 64tass in the `PATH`.
///
/// ```no_run
/// use mos65gen::runner::find_tass;
///
/// match find_tass() {
///     Some(path) => println!("using {}", path.display()),
///     None => println!("64tass not installed"),
/// }
/// ```
pub fn find_tass() -> Option<PathBuf> {
    TASS_BINARIES
        .iter()
        .find_map(|binary| which::which(binary).ok())
}

/// The 64tass command line for one assembly file.
pub fn tass_arguments(source: &Path, output: &Path, output_type: OutputType) -> Vec<String> {
    let mut arguments = vec![
        "--ascii".to_string(),
        "--case-sensitive".to_string(),
        "--long-branch".to_string(),
        "-Wall".to_string(),
        "--no-monitor".to_string(),
    ];
    arguments.push(match output_type {
        OutputType::Prg => "--cbm-prg".to_string(),
        OutputType::Raw => "--nostart".to_string(),
    });
    arguments.push("--output".to_string());
    arguments.push(output.display().to_string());
    arguments.push(source.display().to_string());
    arguments
}

/// Runs 64tass.
#[derive(Debug, Clone)]
pub struct TassAssembler {
    path: PathBuf,
}

impl TassAssembler {
    /// Use the 64tass binary at `path`.
    pub fn new(path: PathBuf) -> Result<Self, RunnerError> {
        if !path.exists() {
            return Err(RunnerError::InvalidTassPath(path));
        }
        Ok(Self { path })
    }

    /// Use the 64tass binary found in the `PATH`.
    pub fn locate() -> Result<Self, RunnerError> {
        find_tass().map(|path| Self { path }).ok_or(RunnerError::TassNotFound)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Assemble `source` into `output`.
    pub fn assemble(&self, source: &Path, output: &Path, output_type: OutputType) -> Result<(), RunnerError> {
        let arguments = tass_arguments(source, output, output_type);
        debug!("running {} {}", self.path.display(), arguments.join(" "));

        let result = Command::new(&self.path)
            .args(&arguments)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            let stdout = String::from_utf8_lossy(&result.stdout);
            let message = if stderr.trim().is_empty() { stdout } else { stderr };
            return Err(RunnerError::TassFailed(message.trim().to_string()));
        }
        info!("64tass wrote {}", output.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arguments_for_prg() {
        let arguments = tass_arguments(Path::new("out/hello.asm"), Path::new("out/hello.prg"), OutputType::Prg);
        assert!(arguments.contains(&"--cbm-prg".to_string()));
        assert!(arguments.contains(&"--long-branch".to_string()));
        assert_eq!(arguments.last().map(String::as_str), Some("out/hello.asm"));
    }

    #[test]
    fn test_arguments_for_raw() {
        let arguments = tass_arguments(Path::new("a.asm"), Path::new("a.bin"), OutputType::Raw);
        assert!(arguments.contains(&"--nostart".to_string()));
        assert!(!arguments.contains(&"--cbm-prg".to_string()));
    }

    #[test]
    fn test_invalid_path() {
        let result = TassAssembler::new(PathBuf::from("/nonexistent/64tass"));
        assert!(matches!(result, Err(RunnerError::InvalidTassPath(_))));
    }
}
