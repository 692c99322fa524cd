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

//! Running assembled programs on the emulated CPU.

use log::{debug, trace};

use super::assembler::{AssembledProgram, Assembler};
use super::cpu::{Cpu, Memory};
use super::runtime::{runtime_symbols, Outcome, Runtime, EXIT_TRAP};
use super::RunnerError;
use crate::codegen::types::{f64_to_mflpt, mflpt_to_f64};

/// Cycles a run may take before it is considered stuck.
pub const DEFAULT_CYCLE_BUDGET: u64 = 20_000_000;

/// Cycles charged for one native runtime call.
const NATIVE_CALL_CYCLES: u64 = 40;

/// Statistics of a finished run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub cycles: u64,
    pub instructions: u64,
    pub native_calls: u64,
}

/// Assemble `source` with the runtime library symbols predefined.
pub fn assemble_for_simulator(source: &str) -> Result<AssembledProgram, RunnerError> {
    let assembler = Assembler::new().with_symbols(runtime_symbols());
    Ok(assembler.assemble(source)?)
}

/// A loaded program and the machine it runs on.
pub struct Simulator {
    program: AssembledProgram,
    cpu: Cpu,
    memory: Memory,
    runtime: Runtime,
    cycle_budget: u64,
}

impl Simulator {
    /// Load an assembled program into fresh memory.
    pub fn new(program: AssembledProgram) -> Self {
        let mut memory = Memory::new();
        memory.load(program.load_address, &program.bytes);
        let cpu = Cpu::new(program.cmos);
        Self {
            program,
            cpu,
            memory,
            runtime: Runtime::new(),
            cycle_budget: DEFAULT_CYCLE_BUDGET,
        }
    }

    /// Assemble `source` and load it.
    pub fn from_source(source: &str) -> Result<Self, RunnerError> {
        Ok(Self::new(assemble_for_simulator(source)?))
    }

    pub fn with_cycle_budget(mut self, cycles: u64) -> Self {
        self.cycle_budget = cycles;
        self
    }

    /// The address execution starts at: the BASIC launcher's entry label or the load address.
    pub fn entry_point(&self) -> u16 {
        self.program
            .symbol("prog8_entrypoint")
            .unwrap_or(self.program.load_address)
    }

    /// Run the whole program until its final `rts`.
    pub fn run(&mut self) -> Result<RunSummary, RunnerError> {
        let entry = self.entry_point();
        self.run_from(entry)
    }

    /// Call the subroutine labelled `name` and run until it returns.
    pub fn call(&mut self, name: &str) -> Result<RunSummary, RunnerError> {
        let address = self.address_of(name)?;
        self.cpu.x = 0xff;
        self.run_from(address)
    }

    fn run_from(&mut self, address: u16) -> Result<RunSummary, RunnerError> {
        debug!("simulating from ${:04x}", address);
        self.cpu.sp = 0xff;
        self.cpu.push_word(&mut self.memory, EXIT_TRAP.wrapping_sub(1));
        self.cpu.pc = address;
        let start_cycles = self.cpu.cycles;
        let mut instructions = 0u64;
        let mut native_calls = 0u64;

        loop {
            let used = self.cpu.cycles - start_cycles;
            if used > self.cycle_budget {
                return Err(RunnerError::CycleBudgetExceeded(self.cycle_budget));
            }
            if self.cpu.pc == EXIT_TRAP {
                break;
            }
            if let Some(routine) = self.runtime.routine_at(self.cpu.pc) {
                native_calls += 1;
                self.cpu.cycles += NATIVE_CALL_CYCLES;
                match self.runtime.call(routine, &mut self.cpu, &mut self.memory)? {
                    Outcome::Return => self.cpu.return_from_subroutine(&self.memory),
                    Outcome::Stop => break,
                }
                continue;
            }
            self.cpu.step(&mut self.memory)?;
            instructions += 1;
        }

        let summary = RunSummary {
            cycles: self.cpu.cycles - start_cycles,
            instructions,
            native_calls,
        };
        trace!("simulation finished: {:?}", summary);
        Ok(summary)
    }

    fn address_of(&self, name: &str) -> Result<u16, RunnerError> {
        self.program
            .symbol(name)
            .ok_or_else(|| RunnerError::UnknownSymbol(name.to_string()))
    }

    pub fn program(&self) -> &AssembledProgram {
        &self.program
    }

    pub fn cpu(&self) -> &Cpu {
        &self.cpu
    }

    pub fn memory(&self) -> &Memory {
        &self.memory
    }

    /// FAC1 of the float runtime.
    pub fn fac1(&self) -> f64 {
        self.runtime.fac1
    }

    /// Text printed through the kernal `CHROUT` routine.
    pub fn output(&self) -> &str {
        self.runtime.output()
    }

    pub fn peek(&self, address: u16) -> u8 {
        self.memory.read(address)
    }

    pub fn peek_word(&self, address: u16) -> u16 {
        self.memory.read_word(address)
    }

    pub fn poke(&mut self, address: u16, value: u8) {
        self.memory.write(address, value);
    }

    /// The byte stored at symbol `name`.
    pub fn read_byte(&self, name: &str) -> Result<u8, RunnerError> {
        Ok(self.peek(self.address_of(name)?))
    }

    /// The word stored at symbol `name`.
    pub fn read_word(&self, name: &str) -> Result<u16, RunnerError> {
        Ok(self.peek_word(self.address_of(name)?))
    }

    /// The 5-byte float stored at symbol `name`.
    pub fn read_float(&self, name: &str) -> Result<f64, RunnerError> {
        let bytes = self.memory.slice(self.address_of(name)?, 5);
        Ok(mflpt_to_f64([bytes[0], bytes[1], bytes[2], bytes[3], bytes[4]]))
    }

    /// Store a byte at symbol `name`.
    pub fn write_byte(&mut self, name: &str, value: u8) -> Result<(), RunnerError> {
        let address = self.address_of(name)?;
        self.poke(address, value);
        Ok(())
    }

    /// Store a word at symbol `name`.
    pub fn write_word(&mut self, name: &str, value: u16) -> Result<(), RunnerError> {
        let address = self.address_of(name)?;
        self.memory.write_word(address, value);
        Ok(())
    }

    /// Store a number as a 5-byte float at symbol `name`.
    pub fn write_float(&mut self, name: &str, value: f64) -> Result<(), RunnerError> {
        let address = self.address_of(name)?;
        let bytes = f64_to_mflpt(value).ok_or(RunnerError::FloatOutOfRange(value))?;
        for (offset, byte) in bytes.into_iter().enumerate() {
            self.poke(address.wrapping_add(offset as u16), byte);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runs_until_final_rts() {
        let mut simulator = Simulator::from_source(
            "* = $c000\n  lda  #7\n  sta  result\n  rts\nresult\t.byte  0\n",
        )
        .unwrap();
        let summary = simulator.run().unwrap();
        assert_eq!(simulator.read_byte("result").unwrap(), 7);
        assert_eq!(summary.instructions, 3);
    }

    #[test]
    fn test_native_routines_are_called() {
        let source = "* = $c000\n  lda  #6\n  ldy  #7\n  jsr  math.multiply_bytes\n  sta  result\n  rts\nresult\t.byte  0\n";
        let mut simulator = Simulator::from_source(source).unwrap();
        let summary = simulator.run().unwrap();
        assert_eq!(simulator.read_byte("result").unwrap(), 42);
        assert_eq!(summary.native_calls, 1);
    }

    #[test]
    fn test_endless_loop_hits_cycle_budget() {
        let mut simulator = Simulator::from_source("* = $c000\n-  jmp  -\n")
            .unwrap()
            .with_cycle_budget(1000);
        assert!(matches!(
            simulator.run(),
            Err(RunnerError::CycleBudgetExceeded(1000))
        ));
    }

    #[test]
    fn test_call_subroutine_by_name() {
        let source = "* = $c000\n  rts\ndouble\t.proc\n  asl  value\n  rts\nvalue\t.byte  21\n  .pend\n";
        let mut simulator = Simulator::from_source(source).unwrap();
        simulator.call("double").unwrap();
        assert_eq!(simulator.read_byte("double.value").unwrap(), 42);
    }

    #[test]
    fn test_float_values_round_trip_through_memory() {
        let mut simulator = Simulator::from_source("* = $c000\n  rts\nvalue\t.byte  0, 0, 0, 0, 0\n").unwrap();
        simulator.write_float("value", -2.5).unwrap();
        assert_eq!(simulator.read_float("value").unwrap(), -2.5);
        assert!(matches!(
            simulator.write_float("value", f64::INFINITY),
            Err(RunnerError::FloatOutOfRange(_))
        ));
    }

    #[test]
    fn test_unknown_symbol() {
        let simulator = Simulator::from_source("* = $c000\n  rts\n").unwrap();
        assert!(matches!(
            simulator.read_word("nothing"),
            Err(RunnerError::UnknownSymbol(_))
        ));
    }
}
