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

//! Code generation for the 6502 and 65C02.
//!
//! This module turns a normalized program tree into 64tass assembly text.
//! It handles:
//! - Zero page allocation for the whole program
//! - Program header, blocks, subroutines and the footer
//! - Expression evaluation, comparisons and in-place updates
//! - Statements and control flow
//!
//! All mutable state of one compilation lives in [`CodegenSession`]. The
//! concerns are split over extension traits implemented for the session,
//! one per submodule.

pub mod assignments;
pub mod comparisons;
pub mod control_flow;
pub mod emit;
pub mod expressions;
pub mod functions;
pub mod inplace;
pub mod labels;
pub mod registers;
pub mod statements;
pub mod types;
pub mod variables;
pub mod zeropage;

pub use emit::{AssemblyOptimizer, PeepholeOptimizer, TextEmitter};
pub use zeropage::{Zeropage, ZeropageAllocation, ZeropageAllocationError};

use log::{debug, info};

use crate::ast::{Block, Program, ScopedName, Subroutine, SymbolTable, VarDecl};
use crate::config::{CompilationOptions, LauncherType, OutputType, ZeropageType, BASIC_LOAD_ADDRESS};
use crate::error::{CompileError, CompileWarning, ErrorCode, ErrorReporter, Result, Span};
use assignments::AssignmentEmitter;
use functions::{FunctionEmitter, SubroutineFrame, SubroutineReferences};
use labels::FloatConstants;
use statements::StatementEmitter;
use types::{float_fill_asm, to_hex};
use variables::VariableManager;

/// Low byte of the operand stack.
pub const ESTACK_LO: u16 = 0xce00;
/// High byte of the operand stack.
pub const ESTACK_HI: u16 = 0xcf00;

/// The assembly text produced for a program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssemblyProgram {
    /// The program name; the assembly file is named after it.
    pub name: String,
    /// The lines of the program.
    pub lines: Vec<String>,
    /// The address the program is loaded at.
    pub load_address: u16,
}

impl AssemblyProgram {
    /// The full program text.
    pub fn text(&self) -> String {
        let mut text = self.lines.join("\n");
        text.push('\n');
        text
    }
}

/// The state of one compilation.
pub struct CodegenSession<'a> {
    program: &'a Program,
    symbols: SymbolTable<'a>,
    reporter: &'a mut dyn ErrorReporter,
    options: CompilationOptions,
    zeropage: Zeropage,
    emitter: TextEmitter,
    /// Sequence number of the next generated label.
    label_counter: usize,
    float_constants: FloatConstants,
    /// The assembler scope code is currently emitted into.
    scope: ScopedName,
    /// The subroutine being translated, if any.
    current_sub: Option<&'a Subroutine>,
    frame: SubroutineFrame,
    /// Depth of repeat loops around the current statement.
    repeat_nesting: usize,
    /// How each subroutine is called, jumped to or addressed.
    referenced: SubroutineReferences,
}

impl<'a> CodegenSession<'a> {
    /// Create a session for `program`.
    pub fn new(
        program: &'a Program,
        options: CompilationOptions,
        reporter: &'a mut dyn ErrorReporter,
    ) -> Self {
        let zeropage = Zeropage::new(&options);
        Self {
            program,
            symbols: SymbolTable::build(program),
            reporter,
            options,
            zeropage,
            emitter: TextEmitter::new(),
            label_counter: 0,
            float_constants: FloatConstants::new(),
            scope: ScopedName::new(Vec::new()),
            current_sub: None,
            frame: SubroutineFrame::default(),
            repeat_nesting: 0,
            referenced: functions::referenced_subroutines(program),
        }
    }

    /// The zero page allocator.
    pub fn zeropage(&self) -> &Zeropage {
        &self.zeropage
    }

    /// The options of this compilation.
    pub fn options(&self) -> &CompilationOptions {
        &self.options
    }

    /// Generate the program with the default peephole optimizer.
    pub fn generate(self) -> Result<AssemblyProgram> {
        let mut optimizer = PeepholeOptimizer::new();
        self.generate_with_optimizer(&mut optimizer)
    }

    /// Generate the program, running `optimizer` until it makes no more changes.
    ///
    /// The optimizer only runs when optimization is enabled. Fatal errors
    /// are also handed to the reporter.
    pub fn generate_with_optimizer(
        mut self,
        optimizer: &mut dyn AssemblyOptimizer,
    ) -> Result<AssemblyProgram> {
        if let Err(error) = self.translate_program() {
            self.reporter.err(error.clone());
            return Err(error);
        }
        if self.options.optimize {
            let changes = self.emitter.optimize(optimizer);
            debug!("assembly optimizer made {} changes", changes);
        }
        info!(
            "generated {} lines of assembly for '{}'",
            self.emitter.len(),
            self.program.name
        );
        Ok(AssemblyProgram {
            name: self.program.name.clone(),
            lines: self.emitter.take_lines(),
            load_address: self.options.effective_load_address(),
        })
    }

    fn translate_program(&mut self) -> Result<()> {
        self.check_entry_point()?;
        self.allocate_all_zeropage_variables()?;
        self.header()?;
        let program = self.program;
        for block in &program.blocks {
            self.translate_block(block)?;
        }
        self.footer()
    }

    fn check_entry_point(&self) -> Result<()> {
        match self.program.blocks.first() {
            Some(block) if block.name == "main" => {}
            Some(block) => {
                return Err(CompileError::new(
                    ErrorCode::MissingMainBlock,
                    "first block should be 'main'",
                    block.span,
                ))
            }
            None => {
                return Err(CompileError::new(
                    ErrorCode::MissingMainBlock,
                    "program has no 'main' block",
                    Span::default(),
                ))
            }
        }
        if self.program.entry_point().is_none() {
            return Err(CompileError::new(
                ErrorCode::MissingEntryPoint,
                "program entrypoint 'main.start' is missing",
                self.program.blocks[0].span,
            ));
        }
        Ok(())
    }

    fn header(&mut self) -> Result<()> {
        let load_address = self.options.effective_load_address();
        self.out(&format!(
            "; {} assembly code for '{}'",
            self.options.cpu, self.program.name
        ));
        self.out("; assembler syntax is for the 64tasm cross-assembler");
        self.out(&format!(
            "; output options: output={} launcher={} zp={}",
            self.options.output, self.options.launcher, self.options.zeropage
        ));
        self.out(&format!(
            "\n.cpu  '{}'\n.enc  'none'\n",
            self.options.cpu.assembler_name()
        ));

        self.out(&format!("P8ZP_SCRATCH_B1 = {}", zeropage::SCRATCH_B1));
        self.out(&format!("P8ZP_SCRATCH_REG = {}", zeropage::SCRATCH_REG));
        self.out(&format!("P8ZP_SCRATCH_W1 = {}    ; word", zeropage::SCRATCH_W1));
        self.out(&format!("P8ZP_SCRATCH_W2 = {}    ; word", zeropage::SCRATCH_W2));
        self.out(&format!("P8ESTACK_LO = {}", to_hex(ESTACK_LO as i32)));
        self.out(&format!("P8ESTACK_HI = {}", to_hex(ESTACK_HI as i32)));

        match (self.options.launcher, self.options.output) {
            (LauncherType::Basic, _) => {
                if load_address != BASIC_LOAD_ADDRESS {
                    return Err(CompileError::new(
                        ErrorCode::ValueOutOfRange,
                        "BASIC output must have load address $0801",
                        Span::default(),
                    ));
                }
                self.out("; ---- basic program with sys call ----");
                self.out(&format!("* = {}", to_hex(load_address as i32)));
                self.out(&format!("  .word  (+), {}", self.options.basic_line));
                self.out("  .null  $9e, format(' %d ', prog8_entrypoint), $3a, $8f, ' prog8'");
                self.out("+\t.word  0");
                self.out("prog8_entrypoint\t; assembly code starts here\n");
                self.out("  jsr  c64.init_system");
                self.out("  jsr  c64.init_system_phase2");
            }
            (LauncherType::None, OutputType::Prg) => {
                self.out("; ---- program without basic sys call ----");
                self.out(&format!("* = {}\n", to_hex(load_address as i32)));
                self.out("  jsr  c64.init_system");
                self.out("  jsr  c64.init_system_phase2");
            }
            (LauncherType::None, OutputType::Raw) => {
                self.out("; ---- raw assembler program ----");
                self.out(&format!("* = {}\n", to_hex(load_address as i32)));
            }
        }

        if !matches!(
            self.options.zeropage,
            ZeropageType::Basicsafe | ZeropageType::Dontuse
        ) {
            self.out("; zeropage is clobbered so we need to reset the machine at exit");
            self.out("  lda  #>sys.reset_system |  pha |  lda  #<sys.reset_system |  pha");
        }
        self.out("  jsr  main.start |  lda  #31 |  sta  $01 |  rts");
        Ok(())
    }

    fn footer(&mut self) -> Result<()> {
        self.out("; global float constants");
        let constants: Vec<(String, f64)> = self
            .float_constants
            .iter()
            .map(|(name, value)| (name.to_string(), value))
            .collect();
        for (name, value) in constants {
            let bytes = types::f64_to_mflpt(value).ok_or_else(|| {
                CompileError::new(
                    ErrorCode::ValueOutOfRange,
                    format!("floating point value out of range: {}", value),
                    Span::default(),
                )
            })?;
            self.out(&format!(
                "{}\t.byte  {}  ; float {}",
                name,
                float_fill_asm(bytes),
                types::float_comment(value)
            ));
        }
        self.out("prog8_program_end\t; end of program label for progend()");
        Ok(())
    }

    fn translate_block(&mut self, block: &'a Block) -> Result<()> {
        debug!("translating block '{}'", block.name);
        self.scope = block.scoped_name();
        self.current_sub = None;
        self.frame = SubroutineFrame::default();

        self.out(&format!("\n\n; ---- block: '{}' ----", block.name));
        if let Some(address) = block.address {
            self.out(&format!("* = {}", to_hex(address as i32)));
        }
        self.out(&format!("{}\t.proc\n", block.name));

        self.zeropage_vars_asm(&block.variables)?;
        self.memdefs_asm(&block.variables, &block.subroutines)?;
        self.vardecls_asm(&block.variables, true)?;
        self.out("\n; subroutines in this block");

        for statement in &block.statements {
            self.translate_statement(statement)?;
        }
        for sub in &block.subroutines {
            self.translate_subroutine(sub)?;
        }

        self.scope = block.scoped_name();
        self.current_sub = None;
        let initializers = variables::block_initializers(block);
        if !initializers.is_empty() {
            self.frame = SubroutineFrame::default();
            self.out("prog8_init_vars\t.proc\n");
            for assignment in &initializers {
                self.translate_assignment(assignment)?;
            }
            self.out("  rts");
            self.frame_variables_asm()?;
            self.out("  .pend");
        }

        self.out("\n\t.pend\n");
        Ok(())
    }

    // ---- helpers shared by the code generation traits ----

    /// Append assembly text.
    pub(crate) fn out(&mut self, fragment: &str) {
        self.emitter.out(fragment);
    }

    /// The symbol to use for `name` in the current assembler scope.
    pub(crate) fn asm_name(&self, name: &ScopedName) -> String {
        if name.scope() == self.scope {
            name.name().to_string()
        } else {
            name.to_string()
        }
    }

    /// Look up a variable declaration.
    pub(crate) fn variable(&self, name: &ScopedName, span: Span) -> Result<&'a VarDecl> {
        self.symbols.variable(name).ok_or_else(|| {
            CompileError::new(
                ErrorCode::UndefinedSymbol,
                format!("undefined variable '{}'", name),
                span,
            )
        })
    }

    /// Look up a subroutine.
    pub(crate) fn subroutine(&self, name: &ScopedName, span: Span) -> Result<&'a Subroutine> {
        self.symbols.subroutine(name).ok_or_else(|| {
            CompileError::new(
                ErrorCode::UndefinedSymbol,
                format!("undefined subroutine '{}'", name),
                span,
            )
        })
    }

    /// True when the variable lives in zero page.
    pub(crate) fn is_zp_variable(&self, name: &ScopedName) -> bool {
        self.zeropage.allocated_variable(name).is_some()
    }

    /// True when 65C02 instructions may be used.
    pub(crate) fn is_65c02(&self) -> bool {
        self.options.is_65c02()
    }

    /// An unconditional jump to a label in the current routine.
    pub(crate) fn jmp(&mut self, label: &str) {
        if self.is_65c02() {
            self.out(&format!("  bra  {}", label));
        } else {
            self.out(&format!("  jmp  {}", label));
        }
    }

    /// Report a warning.
    pub(crate) fn warn(&mut self, message: impl Into<String>, span: Span) {
        self.reporter.warn(CompileWarning::new(message, span));
    }

    /// Warn about the operand stack fallback, if requested.
    pub(crate) fn warn_slow(&mut self, span: Span) {
        if self.options.slow_warnings {
            self.warn("slow stack evaluation used for expression", span);
        }
    }
}

/// Generate assembly for `program` with the default optimizer.
///
/// Errors and warnings are reported through `reporter`; the first fatal
/// error is also returned.
pub fn generate(
    program: &Program,
    options: CompilationOptions,
    reporter: &mut dyn ErrorReporter,
) -> Result<AssemblyProgram> {
    CodegenSession::new(program, options, reporter).generate()
}
