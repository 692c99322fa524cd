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

//! The normalized program tree handed to the code generator.
//!
//! Earlier passes (the reader in this crate, or any other front end) produce
//! this tree fully typed, with constants folded and names resolved to
//! `ScopedName`s. The code generator treats it as read-only.

mod expr;
mod stmt;
mod types;

pub use expr::*;
pub use stmt::*;
pub use types::*;

use std::collections::HashMap;
use std::fmt;

use crate::error::Span;

/// A dot-qualified name such as `main.start.counter`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScopedName(Vec<String>);

impl ScopedName {
    /// Create a scoped name from its parts.
    pub fn new(parts: Vec<String>) -> Self {
        Self(parts)
    }

    /// Split a dotted string into a scoped name.
    pub fn parse(dotted: &str) -> Self {
        Self(dotted.split('.').map(str::to_string).collect())
    }

    /// The name extended with one more part.
    pub fn child(&self, name: &str) -> Self {
        let mut parts = self.0.clone();
        parts.push(name.to_string());
        Self(parts)
    }

    /// The last part.
    pub fn name(&self) -> &str {
        self.0.last().map(String::as_str).unwrap_or("")
    }

    /// Everything but the last part.
    pub fn scope(&self) -> ScopedName {
        let len = self.0.len().saturating_sub(1);
        Self(self.0[..len].to_vec())
    }

    /// The parts of the name.
    pub fn parts(&self) -> &[String] {
        &self.0
    }

    /// The number of parts.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True for the empty name used by anonymous allocations.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// True when `self` is `other` or lies inside it.
    pub fn starts_with(&self, other: &ScopedName) -> bool {
        self.0.starts_with(&other.0)
    }
}

impl fmt::Display for ScopedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join("."))
    }
}

/// A CPU register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CpuRegister {
    A,
    X,
    Y,
}

/// A register or register pair used to pass values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegisterOrPair {
    A,
    X,
    Y,
    /// A low byte, X high byte.
    AX,
    /// A low byte, Y high byte.
    AY,
    /// X low byte, Y high byte.
    XY,
    /// The primary floating point accumulator.
    Fac1,
    /// The secondary floating point accumulator.
    Fac2,
}

impl RegisterOrPair {
    /// The name as written in the program tree text.
    pub fn name(&self) -> &'static str {
        match self {
            RegisterOrPair::A => "A",
            RegisterOrPair::X => "X",
            RegisterOrPair::Y => "Y",
            RegisterOrPair::AX => "AX",
            RegisterOrPair::AY => "AY",
            RegisterOrPair::XY => "XY",
            RegisterOrPair::Fac1 => "FAC1",
            RegisterOrPair::Fac2 => "FAC2",
        }
    }

    /// Parse a register name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_uppercase().as_str() {
            "A" => Some(RegisterOrPair::A),
            "X" => Some(RegisterOrPair::X),
            "Y" => Some(RegisterOrPair::Y),
            "AX" => Some(RegisterOrPair::AX),
            "AY" => Some(RegisterOrPair::AY),
            "XY" => Some(RegisterOrPair::XY),
            "FAC1" => Some(RegisterOrPair::Fac1),
            "FAC2" => Some(RegisterOrPair::Fac2),
            _ => None,
        }
    }

    /// True for the 16-bit register pairs.
    pub fn is_pair(&self) -> bool {
        matches!(
            self,
            RegisterOrPair::AX | RegisterOrPair::AY | RegisterOrPair::XY
        )
    }

    /// True when the register (pair) involves `register`.
    pub fn uses(&self, register: CpuRegister) -> bool {
        match register {
            CpuRegister::A => matches!(
                self,
                RegisterOrPair::A | RegisterOrPair::AX | RegisterOrPair::AY
            ),
            CpuRegister::X => matches!(
                self,
                RegisterOrPair::X | RegisterOrPair::AX | RegisterOrPair::XY
            ),
            CpuRegister::Y => matches!(
                self,
                RegisterOrPair::Y | RegisterOrPair::AY | RegisterOrPair::XY
            ),
        }
    }
}

/// How a declared name is stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarDeclKind {
    /// An ordinary mutable variable.
    Var,
    /// A compile-time constant.
    Const,
    /// A variable at a fixed memory address.
    Memory,
}

/// Where a variable would like to live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ZeropageWish {
    /// Must be in zero page; failing that is an error.
    Require,
    /// Should be in zero page if there is room.
    Prefer,
    /// May be placed in zero page when space is left.
    #[default]
    DontCare,
    /// Must never be placed in zero page.
    Forbid,
}

/// The initial value of a variable.
#[derive(Debug, Clone, PartialEq)]
pub enum VarInit {
    /// A number (the value of a constant, or the address of a memory variable).
    Number(f64),
    /// String contents, without the terminating zero.
    Str(String),
    /// Array elements.
    Array(Vec<ArrayElement>),
}

/// One element of an array initializer.
#[derive(Debug, Clone, PartialEq)]
pub enum ArrayElement {
    /// A number.
    Number(f64),
    /// The address of a variable, label or subroutine.
    AddressOf(ScopedName),
}

/// A variable declaration.
#[derive(Debug, Clone, PartialEq)]
pub struct VarDecl {
    /// The short name.
    pub name: String,
    /// The fully scoped name.
    pub scoped_name: ScopedName,
    /// The datatype.
    pub dt: DataType,
    /// The storage class.
    pub kind: VarDeclKind,
    /// The initial value.
    pub value: Option<VarInit>,
    /// The zero page wish.
    pub zeropage: ZeropageWish,
    /// Referenced from inline assembly; never removed.
    pub shared: bool,
    /// The number of elements of an array.
    pub array_size: Option<usize>,
    /// The source span of this declaration.
    pub span: Span,
}

impl VarDecl {
    /// Create a variable declaration with no value and no zero page wish.
    pub fn new(scoped_name: ScopedName, dt: DataType, span: Span) -> Self {
        Self {
            name: scoped_name.name().to_string(),
            scoped_name,
            dt,
            kind: VarDeclKind::Var,
            value: None,
            zeropage: ZeropageWish::DontCare,
            shared: false,
            array_size: None,
            span,
        }
    }

    /// The number of elements of a string (including the terminator) or array.
    pub fn element_count(&self) -> Option<usize> {
        match (&self.value, self.dt) {
            (Some(VarInit::Str(text)), DataType::Str) => Some(text.chars().count() + 1),
            (_, dt) if dt.is_array() => self
                .array_size
                .or_else(|| match &self.value {
                    Some(VarInit::Array(elements)) => Some(elements.len()),
                    _ => None,
                }),
            _ => None,
        }
    }

    /// The numeric value of a constant or memory-mapped variable.
    pub fn number(&self) -> Option<f64> {
        match &self.value {
            Some(VarInit::Number(value)) => Some(*value),
            _ => None,
        }
    }
}

/// A subroutine parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct SubroutineParameter {
    /// The parameter name.
    pub name: String,
    /// The datatype.
    pub dt: DataType,
    /// The register an assembly subroutine takes this parameter in.
    pub register: Option<RegisterOrPair>,
}

/// A subroutine.
#[derive(Debug, Clone, PartialEq)]
pub struct Subroutine {
    /// The short name.
    pub name: String,
    /// The fully scoped name.
    pub scoped_name: ScopedName,
    /// The parameters.
    pub parameters: Vec<SubroutineParameter>,
    /// The datatype of the returned value.
    pub return_type: Option<DataType>,
    /// The register an assembly subroutine returns its value in.
    pub return_register: Option<RegisterOrPair>,
    /// True for subroutines written in assembly with a register calling convention.
    pub is_asm: bool,
    /// The fixed address of an external assembly routine.
    pub address: Option<u16>,
    /// Registers an assembly subroutine does not preserve.
    pub clobbers: Vec<CpuRegister>,
    /// Marked for inlining at the call sites.
    pub inline: bool,
    /// Local variables, parameters included.
    pub variables: Vec<VarDecl>,
    /// The body.
    pub statements: Vec<Statement>,
    /// The source span of this subroutine.
    pub span: Span,
}

impl Subroutine {
    /// Create an empty, regular subroutine.
    pub fn new(scoped_name: ScopedName, span: Span) -> Self {
        Self {
            name: scoped_name.name().to_string(),
            scoped_name,
            parameters: Vec::new(),
            return_type: None,
            return_register: None,
            is_asm: false,
            address: None,
            clobbers: Vec::new(),
            inline: false,
            variables: Vec::new(),
            statements: Vec::new(),
            span,
        }
    }

    /// True when calling this subroutine may change X.
    pub fn clobbers_x(&self) -> bool {
        self.is_asm
            && (self.clobbers.contains(&CpuRegister::X)
                || self.return_register.is_some_and(|r| r.uses(CpuRegister::X))
                || self
                    .parameters
                    .iter()
                    .any(|p| p.register.is_some_and(|r| r.uses(CpuRegister::X))))
    }

    /// Count the `rts` instructions in the body's inline assembly and returns.
    pub fn amount_of_returns(&self) -> usize {
        fn count(statements: &[Statement]) -> usize {
            statements
                .iter()
                .map(|s| match &s.kind {
                    StatementKind::Return(_) => 1,
                    StatementKind::InlineAssembly(text) => text
                        .lines()
                        .filter(|line| {
                            let trimmed = line.trim();
                            trimmed == "rts" || trimmed.starts_with("rts ") || trimmed.starts_with("rts;")
                        })
                        .count(),
                    StatementKind::AnonymousScope(body) => count(body),
                    _ => 0,
                })
                .sum()
        }
        count(&self.statements)
    }
}

/// A block: the top level unit of a program.
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    /// The block name.
    pub name: String,
    /// A fixed address for the block's code.
    pub address: Option<u16>,
    /// Block-level variables.
    pub variables: Vec<VarDecl>,
    /// Subroutines of this block.
    pub subroutines: Vec<Subroutine>,
    /// Statements outside any subroutine (labels, inline assembly).
    pub statements: Vec<Statement>,
    /// The source span of this block.
    pub span: Span,
}

impl Block {
    /// Create an empty block.
    pub fn new(name: impl Into<String>, span: Span) -> Self {
        Self {
            name: name.into(),
            address: None,
            variables: Vec::new(),
            subroutines: Vec::new(),
            statements: Vec::new(),
            span,
        }
    }

    /// The scoped name of the block.
    pub fn scoped_name(&self) -> ScopedName {
        ScopedName::new(vec![self.name.clone()])
    }
}

/// A complete program.
#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    /// The program name; also the name of the assembly file.
    pub name: String,
    /// Blocks in source order.
    pub blocks: Vec<Block>,
}

impl Program {
    /// Create a new empty program.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            blocks: Vec::new(),
        }
    }

    /// Find a block by name.
    pub fn block(&self, name: &str) -> Option<&Block> {
        self.blocks.iter().find(|b| b.name == name)
    }

    /// Find the program entry point `main.start`.
    pub fn entry_point(&self) -> Option<&Subroutine> {
        self.block("main")?
            .subroutines
            .iter()
            .find(|s| s.name == "start")
    }
}

/// What a scoped name refers to.
#[derive(Debug, Clone, Copy)]
pub enum Symbol<'a> {
    /// A block.
    Block(&'a Block),
    /// A subroutine.
    Subroutine(&'a Subroutine),
    /// A variable, constant or memory-mapped variable.
    Variable(&'a VarDecl),
    /// A label.
    Label,
}

/// Lookup table from scoped names to the declarations in a program.
#[derive(Debug, Default)]
pub struct SymbolTable<'a> {
    symbols: HashMap<ScopedName, Symbol<'a>>,
}

impl<'a> SymbolTable<'a> {
    /// Index every declaration of `program`.
    pub fn build(program: &'a Program) -> Self {
        let mut symbols = HashMap::new();
        for block in &program.blocks {
            symbols.insert(block.scoped_name(), Symbol::Block(block));
            for var in &block.variables {
                symbols.insert(var.scoped_name.clone(), Symbol::Variable(var));
            }
            collect_labels(&block.scoped_name(), &block.statements, &mut symbols);
            for sub in &block.subroutines {
                symbols.insert(sub.scoped_name.clone(), Symbol::Subroutine(sub));
                for var in &sub.variables {
                    symbols.insert(var.scoped_name.clone(), Symbol::Variable(var));
                }
                collect_labels(&sub.scoped_name, &sub.statements, &mut symbols);
            }
        }
        Self { symbols }
    }

    /// Look up a name.
    pub fn lookup(&self, name: &ScopedName) -> Option<Symbol<'a>> {
        self.symbols.get(name).copied()
    }

    /// Look up a variable declaration.
    pub fn variable(&self, name: &ScopedName) -> Option<&'a VarDecl> {
        match self.lookup(name) {
            Some(Symbol::Variable(decl)) => Some(decl),
            _ => None,
        }
    }

    /// Look up a subroutine.
    pub fn subroutine(&self, name: &ScopedName) -> Option<&'a Subroutine> {
        match self.lookup(name) {
            Some(Symbol::Subroutine(sub)) => Some(sub),
            _ => None,
        }
    }

    /// Every variable declaration in the program, in no particular order.
    pub fn variables(&self) -> impl Iterator<Item = &'a VarDecl> + '_ {
        self.symbols.values().filter_map(|symbol| match symbol {
            Symbol::Variable(decl) => Some(*decl),
            _ => None,
        })
    }
}

fn collect_labels<'a>(
    scope: &ScopedName,
    statements: &'a [Statement],
    symbols: &mut HashMap<ScopedName, Symbol<'a>>,
) {
    for statement in statements {
        match &statement.kind {
            StatementKind::Label(name) => {
                symbols.insert(scope.child(name), Symbol::Label);
            }
            StatementKind::AnonymousScope(body)
            | StatementKind::While { body, .. }
            | StatementKind::Until { body, .. } => collect_labels(scope, body, symbols),
            StatementKind::Repeat(repeat) => collect_labels(scope, &repeat.body, symbols),
            StatementKind::If(ifelse) => {
                collect_labels(scope, &ifelse.then_branch, symbols);
                collect_labels(scope, &ifelse.else_branch, symbols);
            }
            StatementKind::ConditionalBranch(branch) => {
                collect_labels(scope, &branch.then_branch, symbols);
                collect_labels(scope, &branch.else_branch, symbols);
            }
            StatementKind::When(when) => {
                for choice in &when.choices {
                    collect_labels(scope, &choice.body, symbols);
                }
            }
            _ => {}
        }
    }
}
