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

//! Reader for the textual form of the program tree.
//!
//! The text is a small Prog8-like language: blocks holding variables and
//! subroutines, statements, and expressions. Reading happens in three steps:
//!
//! - `tokens` - Tokenization with `logos`
//! - `declarations`, `statements`, `expressions` - Recursive descent parsing
//!   into an untyped tree with names as written (DeclarationParser,
//!   StatementParser and ExpressionParser traits)
//! - `resolve` - Name resolution, literal typing, implicit casts, constant
//!   folding and lowering of `while`, `do-until` and `break`
//!
//! The result is the normalized [`Program`] the code generator expects.

pub mod declarations;
pub mod expressions;
pub mod helpers;
pub mod resolve;
pub mod statements;
pub mod tokens;

pub use tokens::{tokenize, Token};

use std::collections::HashMap;

use log::debug;

use crate::ast::{DataType, Expr, ExprKind, Program, ScopedName, VarDecl, VarInit};
use crate::error::{Result, Span};
use declarations::DeclarationParser;
use helpers::ParserHelpers;

/// An initializer that still needs name resolution and folding.
#[derive(Debug, Clone, PartialEq)]
pub enum Initializer {
    /// A single value: a constant, an address or a block variable's start value.
    Value(Expr),
    /// The elements of an array.
    Array(Vec<Expr>),
}

/// The parsed program before name resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedProgram {
    /// The program tree with names as written and provisional datatypes.
    pub program: Program,
    /// Initializers of constants, memory-mapped variables, arrays and block variables.
    pub initializers: HashMap<ScopedName, Initializer>,
}

/// The reader state.
pub struct Parser<'a> {
    /// The token stream to parse.
    pub(crate) tokens: &'a [(Token, Span)],
    /// Current position in the token stream.
    pub(crate) position: usize,
    /// The block or subroutine being parsed.
    pub(crate) scope: ScopedName,
    /// Declarations of the current scope, hoisted string literals included.
    pub(crate) declarations: Vec<VarDecl>,
    pub(crate) initializers: HashMap<ScopedName, Initializer>,
    string_counter: usize,
}

impl<'a> Parser<'a> {
    /// Create a new parser for the given token stream.
    pub fn new(tokens: &'a [(Token, Span)]) -> Self {
        Self {
            tokens,
            position: 0,
            scope: ScopedName::new(Vec::new()),
            declarations: Vec::new(),
            initializers: HashMap::new(),
            string_counter: 0,
        }
    }

    /// Parse all blocks.
    pub fn parse(mut self, name: &str) -> Result<ParsedProgram> {
        let mut program = Program::new(name);
        self.skip_newlines();
        while !self.is_at_end() {
            let block = self.parse_block()?;
            program.blocks.push(block);
            self.skip_newlines();
        }
        Ok(ParsedProgram {
            program,
            initializers: self.initializers,
        })
    }

    /// Move a string literal into a variable of the current scope.
    ///
    /// Equal literals in one scope share the variable.
    pub(crate) fn hoist_string(&mut self, text: String, span: Span) -> Expr {
        let existing = self.declarations.iter().find(|decl| {
            decl.name.starts_with("prog8_str_") && decl.value.as_ref() == Some(&VarInit::Str(text.clone()))
        });
        let name = match existing {
            Some(decl) => decl.name.clone(),
            None => {
                let name = format!("prog8_str_{}", self.string_counter);
                self.string_counter += 1;
                let mut decl = VarDecl::new(self.scope.child(&name), DataType::Str, span);
                decl.value = Some(VarInit::Str(text));
                self.declarations.push(decl);
                name
            }
        };
        Expr::new(ExprKind::Identifier(ScopedName::parse(&name)), DataType::Str, span)
    }
}

/// Parse program tree text without resolving names.
pub fn parse(name: &str, source: &str) -> Result<ParsedProgram> {
    let tokens = tokenize(source)?;
    Parser::new(&tokens).parse(name)
}

/// Read program tree text into a normalized program.
pub fn read_program(name: &str, source: &str) -> Result<Program> {
    let parsed = parse(name, source)?;
    debug!(
        "read {} block(s) with {} pending initializer(s)",
        parsed.program.blocks.len(),
        parsed.initializers.len()
    );
    resolve::resolve(parsed)
}
