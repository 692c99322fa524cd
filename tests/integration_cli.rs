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

//! End-to-end CLI integration tests.

use std::path::Path;
use std::process::{Command, Output};

use tempfile::TempDir;

const HELLO: &str = "\
main {
  str message = \"hello\"
  asmsub chrout(ubyte char @A) = $ffd2
  sub start() {
    ubyte i = 0
    while message[i] != 0 {
      chrout(message[i])
      i++
    }
  }
}
";

fn cargo_bin() -> Command {
    Command::new(env!("CARGO_BIN_EXE_mos65gen"))
}

fn write_source(dir: &TempDir, name: &str, source: &str) -> std::path::PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, source).unwrap();
    path
}

fn run_cli(input: &Path, output_dir: &Path, extra: &[&str]) -> Output {
    cargo_bin()
        .arg(input)
        .arg("-o")
        .arg(output_dir)
        .args(extra)
        .output()
        .expect("failed to execute mos65gen")
}

#[test]
fn test_help_flag() {
    let output = cargo_bin().arg("--help").output().expect("failed to execute mos65gen");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("mos65gen"));
    assert!(stdout.contains("--output-dir"));
    assert!(stdout.contains("--zeropage"));
}

#[test]
fn test_version_flag() {
    let output = cargo_bin().arg("--version").output().expect("failed to execute mos65gen");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("mos65gen"));
    assert!(stdout.contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn test_compile_writes_assembly() {
    let dir = TempDir::new().unwrap();
    let input = write_source(&dir, "hello.p8t", HELLO);
    let output = run_cli(&input, dir.path(), &[]);
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));

    let assembly = std::fs::read_to_string(dir.path().join("hello.asm")).unwrap();
    assert!(assembly.contains(".cpu  '6502'"), "{}", assembly);
    assert!(assembly.contains("start\t.proc"), "{}", assembly);
    assert!(!dir.path().join("hello.prg").exists());
}

#[test]
fn test_assemble_writes_prg() {
    let dir = TempDir::new().unwrap();
    let input = write_source(&dir, "hello.p8t", HELLO);
    let output = run_cli(&input, dir.path(), &["--assemble"]);
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));

    let prg = std::fs::read(dir.path().join("hello.prg")).unwrap();
    assert_eq!(&prg[..2], &[0x01, 0x08]);
}

#[test]
fn test_raw_output_at_load_address() {
    let dir = TempDir::new().unwrap();
    let input = write_source(&dir, "hello.p8t", HELLO);
    let output = run_cli(
        &input,
        dir.path(),
        &["--assemble", "--output", "raw", "--launcher", "none", "--load-address", "$c000"],
    );
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));

    let binary = std::fs::read(dir.path().join("hello.bin")).unwrap();
    assert!(!binary.is_empty());
    assert_ne!(&binary[..2], &[0x00, 0xc0]);
}

#[test]
fn test_run_prints_program_output() {
    let dir = TempDir::new().unwrap();
    let input = write_source(&dir, "hello.p8t", HELLO);
    let output = run_cli(&input, dir.path(), &["--run"]);
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("hello"), "stdout: {}", stdout);
}

#[test]
fn test_compile_error_exit_code() {
    let dir = TempDir::new().unwrap();
    let input = write_source(&dir, "bad.p8t", "main {\n  sub start() {\n    x = 1\n  }\n}\n");
    let output = run_cli(&input, dir.path(), &[]);
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("E020"), "stderr: {}", stderr);
    assert!(!dir.path().join("bad.asm").exists());
}

#[test]
fn test_missing_input_exit_code() {
    let dir = TempDir::new().unwrap();
    let output = run_cli(&dir.path().join("missing.p8t"), dir.path(), &[]);
    assert_eq!(output.status.code(), Some(3));
}

#[test]
fn test_invalid_cpu_is_rejected() {
    let dir = TempDir::new().unwrap();
    let input = write_source(&dir, "hello.p8t", HELLO);
    let output = run_cli(&input, dir.path(), &["--cpu", "z80"]);
    assert!(!output.status.success());
}

#[test]
fn test_65c02_option_reaches_assembly() {
    let dir = TempDir::new().unwrap();
    let input = write_source(&dir, "hello.p8t", HELLO);
    let output = run_cli(&input, dir.path(), &["--cpu", "65c02", "--zeropage", "full"]);
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    let assembly = std::fs::read_to_string(dir.path().join("hello.asm")).unwrap();
    assert!(assembly.contains("w65c02"), "{}", assembly);
}
