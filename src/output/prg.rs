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

//! PRG file writer.
//!
//! PRG format is very simple:
//! - 2-byte load address (little-endian)
//! - Program data

use std::fs::File;
use std::io::{self, Write};
use std::path::Path;

/// Write a PRG file loading at `load_address`.
pub fn write_prg(code: &[u8], path: &Path, load_address: u16) -> io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(&load_address.to_le_bytes())?;
    file.write_all(code)?;
    Ok(())
}

/// Read a PRG file and return the load address and code.
pub fn read_prg(path: &Path) -> io::Result<(u16, Vec<u8>)> {
    let data = std::fs::read(path)?;
    if data.len() < 2 {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "PRG file too short"));
    }
    let load_address = u16::from_le_bytes([data[0], data[1]]);
    Ok((load_address, data[2..].to_vec()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_and_read_prg() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.prg");
        let code = vec![0xA9, 0x00, 0x60]; // LDA #$00, RTS

        write_prg(&code, &path, 0x0801).unwrap();
        let (load_address, read_code) = read_prg(&path).unwrap();

        assert_eq!(load_address, 0x0801);
        assert_eq!(read_code, code);
    }

    #[test]
    fn test_short_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("short.prg");
        std::fs::write(&path, [0x01]).unwrap();
        assert_eq!(read_prg(&path).unwrap_err().kind(), io::ErrorKind::InvalidData);
    }
}
