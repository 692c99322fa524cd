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

//! mos65gen command line tool
//!
//! Compiles program tree text into 64tass assembly and optionally assembles
//! and runs it.

use clap::Parser;
use std::fs;
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use log::{debug, info};

use mos65gen::config::{CompilationOptions, CpuType, LauncherType, OutputType, ZeropageType};
use mos65gen::error::{render_error, render_warning, Diagnostics};
use mos65gen::output::{binary_extension, write_assembly, write_binary};
use mos65gen::runner::{ProgramWatcher, Simulator, TassAssembler};

/// mos65gen - a 6502/65C02 code generator emitting 64tass assembly
#[derive(Parser, Debug)]
#[command(name = "mos65gen")]
#[command(version)]
#[command(about = "A 6502/65C02 code generator emitting 64tass assembly")]
#[command(long_about = r#"
mos65gen compiles program tree files (.p8t) into assembly source for the
64tass cross assembler. The assembly can be assembled with the built-in
assembler or with 64tass, and run in the built-in 6502 simulator.

Example usage:
  mos65gen hello.p8t -o build
  mos65gen hello.p8t --cpu 65c02 --zeropage full --assemble
  mos65gen hello.p8t --tass
  mos65gen hello.p8t --run --watch
"#)]
struct Cli {
    /// Program tree file to compile (.p8t)
    input: PathBuf,

    /// Directory for the generated files
    #[arg(short = 'o', long = "output-dir", default_value = ".")]
    output_dir: PathBuf,

    /// Target CPU (6502, 65c02)
    #[arg(long, default_value = "6502")]
    cpu: CpuType,

    /// Zero page usage (basicsafe, floatsafe, kernalsafe, full, dontuse)
    #[arg(long, default_value = "basicsafe")]
    zeropage: ZeropageType,

    /// Zero page range the program must not use, like `$fb-$fe` (repeatable)
    #[arg(long = "zp-reserved", value_parser = parse_zp_range)]
    zp_reserved: Vec<RangeInclusive<u8>>,

    /// Enable floating point support
    #[arg(long)]
    floats: bool,

    /// Program launcher (basic, none)
    #[arg(long, default_value = "basic")]
    launcher: LauncherType,

    /// Binary layout (prg, raw)
    #[arg(long, default_value = "prg")]
    output: OutputType,

    /// Load address, like `$c000`
    #[arg(long, value_parser = parse_address)]
    load_address: Option<u16>,

    /// Disable the assembly optimizer
    #[arg(long)]
    no_optimize: bool,

    /// Warn whenever slow stack based evaluation is used
    #[arg(long)]
    slow_warnings: bool,

    /// Assemble with the built-in assembler and write the binary
    #[arg(long)]
    assemble: bool,

    /// Assemble with 64tass
    #[arg(long)]
    tass: bool,

    /// Path to the 64tass binary (searched in PATH if not specified)
    #[arg(long)]
    tass_path: Option<PathBuf>,

    /// Run the program in the built-in simulator
    #[arg(short, long)]
    run: bool,

    /// Recompile whenever the input file changes
    #[arg(short, long)]
    watch: bool,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn options(&self) -> CompilationOptions {
        let mut options = CompilationOptions::new()
            .with_cpu(self.cpu)
            .with_zeropage(self.zeropage)
            .with_floats(self.floats)
            .with_output(self.output)
            .with_launcher(self.launcher)
            .with_optimize(!self.no_optimize)
            .with_slow_warnings(self.slow_warnings);
        for range in &self.zp_reserved {
            options = options.with_reserved(range.clone());
        }
        if let Some(address) = self.load_address {
            options = options.with_load_address(address);
        }
        options
    }
}

/// Parse a number written as `$hex`, `0xhex` or decimal.
fn parse_number(text: &str) -> Result<u32, String> {
    let text = text.trim();
    let parsed = if let Some(hex) = text.strip_prefix('$').or_else(|| text.strip_prefix("0x")) {
        u32::from_str_radix(hex, 16)
    } else {
        text.parse()
    };
    parsed.map_err(|_| format!("invalid number '{}'", text))
}

fn parse_address(text: &str) -> Result<u16, String> {
    let value = parse_number(text)?;
    u16::try_from(value).map_err(|_| format!("address {} is out of range", text))
}

fn parse_zp_range(text: &str) -> Result<RangeInclusive<u8>, String> {
    let (start, end) = text.split_once('-').unwrap_or((text, text));
    let byte = |part: &str| {
        parse_number(part).and_then(|v| u8::try_from(v).map_err(|_| format!("'{}' is not a zero page address", part)))
    };
    let (start, end) = (byte(start)?, byte(end)?);
    if start > end {
        return Err(format!("empty range '{}'", text));
    }
    Ok(start..=end)
}

fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp(None)
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    let options = cli.options();
    debug!("options: {:?}", options);

    let result = build(&cli, &options);
    if !cli.watch {
        return match result {
            Ok(()) => ExitCode::SUCCESS,
            Err(code) => code,
        };
    }

    let watcher = match ProgramWatcher::new(std::slice::from_ref(&cli.input)) {
        Ok(watcher) => watcher,
        Err(e) => {
            eprintln!("Error: Failed to create file watcher: {}", e);
            return ExitCode::from(6);
        }
    };
    println!("Watching {} for changes... (Press Ctrl+C to stop)", cli.input.display());
    loop {
        if let Err(e) = watcher.wait_for_change() {
            eprintln!("Watch error: {}", e);
            continue;
        }
        println!();
        println!("Recompiling...");
        if build(&cli, &options).is_err() {
            println!("Fix errors and save to retry.");
        }
    }
}

/// Compile the input and run the requested follow-up steps.
fn build(cli: &Cli, options: &CompilationOptions) -> Result<(), ExitCode> {
    let source = fs::read_to_string(&cli.input).map_err(|e| {
        eprintln!("Error: Cannot read {}: {}", cli.input.display(), e);
        ExitCode::from(3)
    })?;
    let filename = cli
        .input
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("<input>");
    let name = cli
        .input
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("program");

    let mut diagnostics = Diagnostics::new();
    let result = mos65gen::compile_with_reporter(name, &source, options.clone(), &mut diagnostics);
    for warning in diagnostics.warnings() {
        eprint!("{}", render_warning(warning, &source, filename));
    }
    let assembly = result.map_err(|e| {
        eprint!("{}", render_error(&e, &source, filename));
        ExitCode::from(1)
    })?;

    let asm_path = write_assembly(&assembly, &cli.output_dir).map_err(|e| {
        eprintln!("Error: Cannot write assembly to {}: {}", cli.output_dir.display(), e);
        ExitCode::from(1)
    })?;
    println!("Compiled {} -> {}", filename, asm_path.display());

    if cli.tass || cli.tass_path.is_some() {
        run_tass(cli, options, &asm_path)?;
    }

    if cli.assemble || cli.run {
        let assembled = mos65gen::assemble(&assembly).map_err(|e| {
            eprintln!("Error: {}", e);
            ExitCode::from(4)
        })?;
        if cli.assemble {
            let path = asm_path.with_extension(binary_extension(options.output));
            write_binary(&assembled.bytes, assembled.load_address, &path, options.output).map_err(|e| {
                eprintln!("Error: Cannot write {}: {}", path.display(), e);
                ExitCode::from(1)
            })?;
            println!("Assembled {} ({} bytes)", path.display(), assembled.bytes.len());
        }
        if cli.run {
            let mut simulator = Simulator::new(assembled);
            let summary = simulator.run().map_err(|e| {
                eprintln!("Error: {}", e);
                ExitCode::from(5)
            })?;
            print!("{}", simulator.output());
            info!(
                "program finished after {} cycles ({} instructions)",
                summary.cycles, summary.instructions
            );
        }
    }
    Ok(())
}

fn run_tass(cli: &Cli, options: &CompilationOptions, asm_path: &Path) -> Result<(), ExitCode> {
    let tass = match &cli.tass_path {
        Some(path) => TassAssembler::new(path.clone()),
        None => TassAssembler::locate(),
    }
    .map_err(|e| {
        eprintln!("Error: {}", e);
        ExitCode::from(4)
    })?;
    let path = asm_path.with_extension(binary_extension(options.output));
    tass.assemble(asm_path, &path, options.output).map_err(|e| {
        eprintln!("Error: {}", e);
        ExitCode::from(4)
    })?;
    println!("Assembled {} with 64tass", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_address() {
        assert_eq!(parse_address("$c000"), Ok(0xc000));
        assert_eq!(parse_address("0x0801"), Ok(0x0801));
        assert_eq!(parse_address("4096"), Ok(4096));
        assert!(parse_address("$10000").is_err());
        assert!(parse_address("zz").is_err());
    }

    #[test]
    fn test_parse_zp_range() {
        assert_eq!(parse_zp_range("$fb-$fe"), Ok(0xfb..=0xfe));
        assert_eq!(parse_zp_range("2"), Ok(2..=2));
        assert!(parse_zp_range("$fe-$fb").is_err());
        assert!(parse_zp_range("$100").is_err());
    }

    #[test]
    fn test_cli_builds_options() {
        let cli = Cli::parse_from([
            "mos65gen",
            "game.p8t",
            "--cpu",
            "65c02",
            "--zeropage",
            "full",
            "--zp-reserved",
            "$fb-$fe",
            "--load-address",
            "$c000",
            "--no-optimize",
        ]);
        let options = cli.options();
        assert!(options.is_65c02());
        assert_eq!(options.zeropage, ZeropageType::Full);
        assert_eq!(options.zp_reserved, vec![0xfb..=0xfe]);
        assert_eq!(options.load_address, Some(0xc000));
        assert!(!options.optimize);
    }
}
