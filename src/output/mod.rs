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

//! Writing compiler output to disk.
//!
//! - Assembly text files (`<name>.asm`) for 64tass
//! - PRG files (two byte load address followed by the program)
//! - Raw binary images

mod prg;

pub use prg::{read_prg, write_prg};

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use log::info;

use crate::codegen::AssemblyProgram;
use crate::config::OutputType;

/// The extension of a binary file of the given layout.
pub fn binary_extension(output: OutputType) -> &'static str {
    match output {
        OutputType::Prg => "prg",
        OutputType::Raw => "bin",
    }
}

/// Determine the binary layout from a file extension.
pub fn format_from_extension(path: &Path) -> Option<OutputType> {
    match path.extension()?.to_str()?.to_lowercase().as_str() {
        "prg" => Some(OutputType::Prg),
        "bin" | "raw" => Some(OutputType::Raw),
        _ => None,
    }
}

/// Write the assembly text of `program` to `<directory>/<name>.asm`.
pub fn write_assembly(program: &AssemblyProgram, directory: &Path) -> io::Result<PathBuf> {
    fs::create_dir_all(directory)?;
    let path = directory.join(format!("{}.asm", program.name));
    fs::write(&path, program.text())?;
    info!("wrote {} ({} lines)", path.display(), program.lines.len());
    Ok(path)
}

/// Write assembled bytes in the given layout.
pub fn write_binary(bytes: &[u8], load_address: u16, path: &Path, output: OutputType) -> io::Result<()> {
    match output {
        OutputType::Prg => write_prg(bytes, path, load_address),
        OutputType::Raw => fs::write(path, bytes),
    }?;
    info!("wrote {} ({} bytes at ${:04x})", path.display(), bytes.len(), load_address);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_detection() {
        assert_eq!(format_from_extension(Path::new("test.prg")), Some(OutputType::Prg));
        assert_eq!(format_from_extension(Path::new("test.PRG")), Some(OutputType::Prg));
        assert_eq!(format_from_extension(Path::new("test.bin")), Some(OutputType::Raw));
        assert_eq!(format_from_extension(Path::new("test.asm")), None);
    }

    #[test]
    fn test_write_assembly_names_file_after_program() {
        let dir = tempfile::tempdir().unwrap();
        let program = AssemblyProgram {
            name: "hello".to_string(),
            lines: vec!["  rts".to_string()],
            load_address: 0x0801,
        };
        let path = write_assembly(&program, dir.path()).unwrap();
        assert_eq!(path.file_name().and_then(|n| n.to_str()), Some("hello.asm"));
        assert_eq!(fs::read_to_string(path).unwrap(), "  rts\n");
    }

    #[test]
    fn test_raw_binary_has_no_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.bin");
        write_binary(&[0xea, 0x60], 0xc000, &path, OutputType::Raw).unwrap();
        assert_eq!(fs::read(&path).unwrap(), vec![0xea, 0x60]);
    }
}
