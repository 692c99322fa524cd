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

//! Compilation options.
//!
//! Everything the code generator needs to know about the target machine and
//! the requested output lives in `CompilationOptions`. The command line tool
//! fills it from its arguments, tests build it with the `with_*` methods.

use std::fmt;
use std::ops::RangeInclusive;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

/// The CPU variant to generate code for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CpuType {
    /// The original NMOS 6502 (and the 6510 of the C64).
    #[default]
    Cpu6502,
    /// The CMOS 65C02 with `stz`, `bra`, `phx`/`phy` and `(zp)` addressing.
    Cpu65c02,
}

impl CpuType {
    /// The name used in the `.cpu` directive of the assembler.
    pub fn assembler_name(&self) -> &'static str {
        match self {
            CpuType::Cpu6502 => "6502",
            CpuType::Cpu65c02 => "w65c02",
        }
    }
}

impl fmt::Display for CpuType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CpuType::Cpu6502 => write!(f, "6502"),
            CpuType::Cpu65c02 => write!(f, "65c02"),
        }
    }
}

impl FromStr for CpuType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "6502" | "6510" => Ok(CpuType::Cpu6502),
            "65c02" | "w65c02" => Ok(CpuType::Cpu65c02),
            other => Err(format!("unknown cpu '{}', expected 6502 or 65c02", other)),
        }
    }
}

/// How much of the zero page the program may claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ZeropageType {
    /// Only bytes BASIC and the kernal leave alone; returning to BASIC works.
    #[default]
    Basicsafe,
    /// Like basicsafe, plus bytes only the BASIC floating point routines need spared.
    Floatsafe,
    /// Everything the kernal does not use; BASIC is gone after the program ends.
    Kernalsafe,
    /// Everything except the bytes touched by the kernal IRQ handler.
    Full,
    /// No zero page use at all.
    Dontuse,
}

impl fmt::Display for ZeropageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ZeropageType::Basicsafe => "basicsafe",
            ZeropageType::Floatsafe => "floatsafe",
            ZeropageType::Kernalsafe => "kernalsafe",
            ZeropageType::Full => "full",
            ZeropageType::Dontuse => "dontuse",
        };
        write!(f, "{}", name)
    }
}

impl FromStr for ZeropageType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "basicsafe" => Ok(ZeropageType::Basicsafe),
            "floatsafe" => Ok(ZeropageType::Floatsafe),
            "kernalsafe" => Ok(ZeropageType::Kernalsafe),
            "full" => Ok(ZeropageType::Full),
            "dontuse" => Ok(ZeropageType::Dontuse),
            other => Err(format!("unknown zeropage type '{}'", other)),
        }
    }
}

/// The binary layout the assembler should produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputType {
    /// A PRG file with a two byte load address.
    #[default]
    Prg,
    /// A raw binary image.
    Raw,
}

impl fmt::Display for OutputType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputType::Prg => write!(f, "prg"),
            OutputType::Raw => write!(f, "raw"),
        }
    }
}

impl FromStr for OutputType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "prg" => Ok(OutputType::Prg),
            "raw" => Ok(OutputType::Raw),
            other => Err(format!("unknown output type '{}'", other)),
        }
    }
}

/// How the program gets started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LauncherType {
    /// A BASIC `SYS` line in front of the program.
    #[default]
    Basic,
    /// No launcher; the program starts at its load address.
    None,
}

impl fmt::Display for LauncherType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LauncherType::Basic => write!(f, "basic"),
            LauncherType::None => write!(f, "none"),
        }
    }
}

impl FromStr for LauncherType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "basic" => Ok(LauncherType::Basic),
            "none" => Ok(LauncherType::None),
            other => Err(format!("unknown launcher type '{}'", other)),
        }
    }
}

/// The load address of a BASIC program on the C64.
pub const BASIC_LOAD_ADDRESS: u16 = 0x0801;

/// The default load address of a raw program.
pub const RAW_LOAD_ADDRESS: u16 = 0xc000;

/// Options for one compilation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompilationOptions {
    /// Target CPU.
    pub cpu: CpuType,
    /// Zero page usage policy.
    pub zeropage: ZeropageType,
    /// Additional zero page address ranges the program must not touch.
    pub zp_reserved: Vec<RangeInclusive<u8>>,
    /// Whether floating point support is enabled.
    pub floats: bool,
    /// Output layout.
    pub output: OutputType,
    /// Program launcher.
    pub launcher: LauncherType,
    /// Explicit load address; defaults depend on output and launcher.
    pub load_address: Option<u16>,
    /// Run the assembly optimizer and drop unused inline subroutines.
    pub optimize: bool,
    /// Inline subroutines marked `inline` at their call sites.
    pub optimize_inline: bool,
    /// Warn whenever the operand stack fallback is used.
    pub slow_warnings: bool,
    /// The line number of the BASIC `SYS` line.
    pub basic_line: u16,
}

impl Default for CompilationOptions {
    fn default() -> Self {
        Self {
            cpu: CpuType::default(),
            zeropage: ZeropageType::default(),
            zp_reserved: Vec::new(),
            floats: false,
            output: OutputType::default(),
            launcher: LauncherType::default(),
            load_address: None,
            optimize: true,
            optimize_inline: false,
            slow_warnings: false,
            basic_line: current_year(),
        }
    }
}

impl CompilationOptions {
    /// Create options with the default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Select the target CPU.
    pub fn with_cpu(mut self, cpu: CpuType) -> Self {
        self.cpu = cpu;
        self
    }

    /// Select the zero page policy.
    pub fn with_zeropage(mut self, zeropage: ZeropageType) -> Self {
        self.zeropage = zeropage;
        self
    }

    /// Reserve an extra zero page range.
    pub fn with_reserved(mut self, range: RangeInclusive<u8>) -> Self {
        self.zp_reserved.push(range);
        self
    }

    /// Enable or disable floating point support.
    pub fn with_floats(mut self, floats: bool) -> Self {
        self.floats = floats;
        self
    }

    /// Select the output layout.
    pub fn with_output(mut self, output: OutputType) -> Self {
        self.output = output;
        self
    }

    /// Select the launcher.
    pub fn with_launcher(mut self, launcher: LauncherType) -> Self {
        self.launcher = launcher;
        self
    }

    /// Set an explicit load address.
    pub fn with_load_address(mut self, address: u16) -> Self {
        self.load_address = Some(address);
        self
    }

    /// Enable or disable optimization.
    pub fn with_optimize(mut self, optimize: bool) -> Self {
        self.optimize = optimize;
        self
    }

    /// Enable or disable warnings for slow code paths.
    pub fn with_slow_warnings(mut self, slow_warnings: bool) -> Self {
        self.slow_warnings = slow_warnings;
        self
    }

    /// Set the BASIC line number.
    pub fn with_basic_line(mut self, line: u16) -> Self {
        self.basic_line = line;
        self
    }

    /// Whether the target supports 65C02 instructions.
    pub fn is_65c02(&self) -> bool {
        self.cpu == CpuType::Cpu65c02
    }

    /// The address the program is loaded at.
    pub fn effective_load_address(&self) -> u16 {
        match (self.load_address, self.launcher) {
            (Some(address), _) => address,
            (None, LauncherType::Basic) => BASIC_LOAD_ADDRESS,
            (None, LauncherType::None) => RAW_LOAD_ADDRESS,
        }
    }
}

fn current_year() -> u16 {
    let seconds = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    // Average Gregorian year length in seconds.
    let years = seconds / 31_556_952;
    (1970 + years).min(u16::MAX as u64) as u16
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("6502", CpuType::Cpu6502; "plain 6502")]
    #[test_case("6510", CpuType::Cpu6502; "c64 6510")]
    #[test_case("65C02", CpuType::Cpu65c02; "uppercase cmos")]
    #[test_case("w65c02", CpuType::Cpu65c02; "assembler name")]
    fn test_cpu_from_str(input: &str, expected: CpuType) {
        assert_eq!(input.parse::<CpuType>(), Ok(expected));
    }

    #[test]
    fn test_zeropage_round_trip_names() {
        for zp in [
            ZeropageType::Basicsafe,
            ZeropageType::Floatsafe,
            ZeropageType::Kernalsafe,
            ZeropageType::Full,
            ZeropageType::Dontuse,
        ] {
            assert_eq!(zp.to_string().parse::<ZeropageType>(), Ok(zp));
        }
        assert!("everything".parse::<ZeropageType>().is_err());
    }

    #[test]
    fn test_load_address_defaults() {
        let options = CompilationOptions::new();
        assert_eq!(options.effective_load_address(), 0x0801);

        let raw = CompilationOptions::new().with_launcher(LauncherType::None);
        assert_eq!(raw.effective_load_address(), 0xc000);

        let fixed = raw.with_load_address(0x4000);
        assert_eq!(fixed.effective_load_address(), 0x4000);
    }

    #[test]
    fn test_builder() {
        let options = CompilationOptions::new()
            .with_cpu(CpuType::Cpu65c02)
            .with_floats(true)
            .with_reserved(0x10..=0x20)
            .with_basic_line(2026);
        assert!(options.is_65c02());
        assert!(options.floats);
        assert_eq!(options.zp_reserved, vec![0x10..=0x20]);
        assert_eq!(options.basic_line, 2026);
        assert_eq!(options.cpu.assembler_name(), "w65c02");
    }

    #[test]
    fn test_current_year_is_plausible() {
        assert!(current_year() >= 2024);
    }
}
