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

//! Block, subroutine and variable declaration parsing for the reader.

use super::expressions::{ExpressionParser, UNTYPED};
use super::helpers::ParserHelpers;
use super::statements::StatementParser;
use super::tokens::Token;
use super::{Initializer, Parser};
use crate::ast::{
    AssignTarget, Assignment, Block, CpuRegister, DataType, RegisterOrPair, ScopedName, Statement,
    StatementKind, Subroutine, SubroutineParameter, VarDecl, VarDeclKind, VarInit, ZeropageWish,
};
use crate::error::{CompileError, ErrorCode, Span};

/// Extension trait for declaration parsing.
pub trait DeclarationParser {
    /// Parse a block.
    fn parse_block(&mut self) -> Result<Block, CompileError>;

    /// Parse a regular subroutine (`sub name(...) -> type { ... }`).
    fn parse_subroutine(&mut self, inline: bool) -> Result<Subroutine, CompileError>;

    /// Parse an assembly subroutine with a register calling convention.
    fn parse_asm_subroutine(&mut self, inline: bool) -> Result<Subroutine, CompileError>;

    /// True when the current token starts a variable declaration.
    fn is_declaration_start(&self) -> bool;

    /// Parse a variable declaration into the current scope.
    ///
    /// Returns the assignment of the initial value for variables declared
    /// inside a subroutine, which are initialized each time the declaration
    /// is reached.
    fn parse_variable_declaration(&mut self) -> Result<Option<Statement>, CompileError>;

    /// Parse `@REG`.
    fn parse_register(&mut self) -> Result<RegisterOrPair, CompileError>;
}

impl<'a> DeclarationParser for Parser<'a> {
    fn parse_block(&mut self) -> Result<Block, CompileError> {
        let (name, start) = self.expect_identifier("expected block name")?;
        let mut block = Block::new(name.clone(), start);
        if let Some(Token::Integer(address)) = self.peek() {
            let address = *address;
            block.address = Some(address_value(address, self.peek_span().unwrap_or(start))?);
            self.advance();
        }
        self.skip_newlines();
        self.expect(&Token::LeftBrace, "expected '{' after block name")?;

        self.scope = ScopedName::new(vec![name]);
        self.declarations.clear();
        loop {
            self.skip_newlines();
            match self.peek() {
                None | Some(Token::RightBrace) => break,
                Some(Token::Sub) => {
                    let sub = self.parse_subroutine(false)?;
                    block.subroutines.push(sub);
                }
                Some(Token::AsmSub) => {
                    let sub = self.parse_asm_subroutine(false)?;
                    block.subroutines.push(sub);
                }
                Some(Token::Inline) => {
                    self.advance();
                    let sub = if self.check(&Token::AsmSub) {
                        self.parse_asm_subroutine(true)?
                    } else {
                        self.parse_subroutine(true)?
                    };
                    block.subroutines.push(sub);
                }
                Some(Token::InlineAsm(_)) => {
                    if let Some(statement) = self.parse_statement()? {
                        block.statements.push(statement);
                    }
                }
                Some(Token::Identifier(_)) if self.peek_ahead(1) == Some(&Token::Colon) => {
                    if let Some(statement) = self.parse_statement()? {
                        block.statements.push(statement);
                    }
                }
                _ if self.is_declaration_start() => {
                    self.parse_variable_declaration()?;
                }
                Some(other) => {
                    return Err(self.error(
                        ErrorCode::UnexpectedToken,
                        format!("expected declaration, subroutine or label in block, found {}", other),
                    ))
                }
            }
            self.expect_end_of_statement()?;
        }
        self.expect(&Token::RightBrace, "expected '}' at the end of the block")?;
        block.span = start.merge(&self.previous_span());
        block.variables = std::mem::take(&mut self.declarations);
        Ok(block)
    }

    fn parse_subroutine(&mut self, inline: bool) -> Result<Subroutine, CompileError> {
        let start = self.peek_span().unwrap_or_default();
        self.expect(&Token::Sub, "expected 'sub'")?;
        let (name, _) = self.expect_identifier("expected subroutine name")?;
        let block_scope = self.scope.clone();
        let mut sub = Subroutine::new(block_scope.child(&name), start);
        sub.inline = inline;

        self.expect(&Token::LeftParen, "expected '(' after subroutine name")?;
        if !self.check(&Token::RightParen) {
            loop {
                let dt = self.parse_declared_type()?.0;
                let (param, _) = self.expect_identifier("expected parameter name")?;
                sub.parameters.push(SubroutineParameter {
                    name: param,
                    dt,
                    register: None,
                });
                if !self.match_token(&Token::Comma) {
                    break;
                }
            }
        }
        self.expect(&Token::RightParen, "expected ')' after parameters")?;
        if self.match_token(&Token::Arrow) {
            sub.return_type = Some(self.parse_scalar_type()?);
        }

        let outer = std::mem::take(&mut self.declarations);
        self.scope = sub.scoped_name.clone();
        for param in &sub.parameters {
            self.declarations
                .push(VarDecl::new(sub.scoped_name.child(&param.name), param.dt, start));
        }
        let body = self.parse_statement_block();
        self.scope = block_scope;
        sub.variables = std::mem::replace(&mut self.declarations, outer);
        sub.statements = body?;
        sub.span = start.merge(&self.previous_span());
        Ok(sub)
    }

    fn parse_asm_subroutine(&mut self, inline: bool) -> Result<Subroutine, CompileError> {
        let start = self.peek_span().unwrap_or_default();
        self.expect(&Token::AsmSub, "expected 'asmsub'")?;
        let (name, _) = self.expect_identifier("expected subroutine name")?;
        let block_scope = self.scope.clone();
        let mut sub = Subroutine::new(block_scope.child(&name), start);
        sub.is_asm = true;
        sub.inline = inline;

        self.expect(&Token::LeftParen, "expected '(' after subroutine name")?;
        if !self.check(&Token::RightParen) {
            loop {
                let dt = self.parse_declared_type()?.0;
                let (param, _) = self.expect_identifier("expected parameter name")?;
                let register = self.parse_register()?;
                sub.parameters.push(SubroutineParameter {
                    name: param,
                    dt,
                    register: Some(register),
                });
                if !self.match_token(&Token::Comma) {
                    break;
                }
            }
        }
        self.expect(&Token::RightParen, "expected ')' after parameters")?;

        if self.match_token(&Token::Clobbers) {
            self.expect(&Token::LeftParen, "expected '(' after 'clobbers'")?;
            while let Some(Token::Identifier(register)) = self.peek() {
                let clobbered = match register.to_ascii_uppercase().as_str() {
                    "A" => CpuRegister::A,
                    "X" => CpuRegister::X,
                    "Y" => CpuRegister::Y,
                    _ => return Err(self.error(ErrorCode::UnexpectedToken, format!("'{}' is not a CPU register", register))),
                };
                sub.clobbers.push(clobbered);
                self.advance();
                if !self.match_token(&Token::Comma) {
                    break;
                }
            }
            self.expect(&Token::RightParen, "expected ')' after clobbered registers")?;
        }

        if self.match_token(&Token::Arrow) {
            sub.return_type = Some(self.parse_scalar_type()?);
            sub.return_register = Some(self.parse_register()?);
        }

        if self.match_token(&Token::Assign) {
            match self.advance() {
                Some((Token::Integer(address), span)) => sub.address = Some(address_value(address, span)?),
                _ => {
                    return Err(CompileError::new(
                        ErrorCode::InvalidNumber,
                        "expected the address of the routine",
                        self.previous_span(),
                    ))
                }
            }
        } else {
            let outer = std::mem::take(&mut self.declarations);
            self.scope = sub.scoped_name.clone();
            let body = self.parse_statement_block();
            self.scope = block_scope;
            sub.variables = std::mem::replace(&mut self.declarations, outer);
            sub.statements = body?;
        }
        sub.span = start.merge(&self.previous_span());
        Ok(sub)
    }

    fn is_declaration_start(&self) -> bool {
        match self.peek() {
            Some(Token::Const) => true,
            Some(Token::Ampersand) => self.peek_ahead(1).is_some_and(Token::is_type),
            Some(token) => token.is_type(),
            None => false,
        }
    }

    fn parse_variable_declaration(&mut self) -> Result<Option<Statement>, CompileError> {
        let start = self.peek_span().unwrap_or_default();
        let kind = if self.match_token(&Token::Const) {
            VarDeclKind::Const
        } else if self.match_token(&Token::Ampersand) {
            VarDeclKind::Memory
        } else {
            VarDeclKind::Var
        };
        let (dt, array_size) = self.parse_declared_type()?;

        let mut zeropage = ZeropageWish::DontCare;
        let mut shared = false;
        while self.match_token(&Token::At) {
            let (wish, span) = self.expect_identifier("expected '@zp', '@requirezp', '@nozp' or '@shared'")?;
            match wish.as_str() {
                "zp" => zeropage = ZeropageWish::Prefer,
                "requirezp" => zeropage = ZeropageWish::Require,
                "nozp" => zeropage = ZeropageWish::Forbid,
                "shared" => shared = true,
                other => {
                    return Err(CompileError::new(
                        ErrorCode::UnexpectedToken,
                        format!("unknown variable tag '@{}'", other),
                        span,
                    ))
                }
            }
        }

        let (name, name_span) = self.expect_identifier("expected variable name")?;
        let scoped_name = self.scope.child(&name);
        let mut decl = VarDecl::new(scoped_name.clone(), dt, start.merge(&name_span));
        decl.kind = kind;
        decl.zeropage = zeropage;
        decl.shared = shared;
        decl.array_size = array_size;

        let mut statement = None;
        if self.match_token(&Token::Assign) {
            self.skip_newlines();
            match self.peek().cloned() {
                Some(Token::Str(text)) if dt == DataType::Str => {
                    self.advance();
                    decl.value = Some(VarInit::Str(text));
                }
                Some(Token::LeftBracket) if dt.is_array() => {
                    let elements = self.parse_array_literal()?;
                    self.initializers.insert(scoped_name, Initializer::Array(elements));
                }
                _ if dt.is_pass_by_reference() => {
                    return Err(self.error(
                        ErrorCode::TypeMismatch,
                        format!("expected a {} literal for '{}'", if dt == DataType::Str { "string" } else { "array" }, name),
                    ))
                }
                _ => {
                    let value = self.parse_expression()?;
                    let in_subroutine = self.scope.len() > 1;
                    if kind == VarDeclKind::Var && in_subroutine {
                        let span = start.merge(&value.span);
                        statement = Some(Statement::new(
                            StatementKind::Assignment(Assignment {
                                target: AssignTarget::Variable(ScopedName::parse(&name)),
                                dt: UNTYPED,
                                value,
                            }),
                            span,
                        ));
                    } else {
                        self.initializers.insert(scoped_name, Initializer::Value(value));
                    }
                }
            }
        } else if kind != VarDeclKind::Var {
            return Err(self.error(
                ErrorCode::ExpectedToken,
                format!("'{}' needs a value", name),
            ));
        } else if dt == DataType::Str || (dt.is_array() && array_size.is_none()) {
            return Err(self.error(
                ErrorCode::ExpectedToken,
                format!("'{}' needs an initial value to know its size", name),
            ));
        }

        self.declarations.push(decl);
        Ok(statement)
    }

    fn parse_register(&mut self) -> Result<RegisterOrPair, CompileError> {
        self.expect(&Token::At, "expected '@' and a register name")?;
        let (name, span) = self.expect_identifier("expected register name")?;
        RegisterOrPair::from_name(&name).ok_or_else(|| {
            CompileError::new(
                ErrorCode::UnexpectedToken,
                format!("'{}' is not a register or register pair", name),
                span,
            )
        })
    }
}

impl Parser<'_> {
    /// Parse a datatype with an optional array suffix (`ubyte[10]`, `word[]`).
    fn parse_declared_type(&mut self) -> Result<(DataType, Option<usize>), CompileError> {
        let dt = self.parse_scalar_type()?;
        if !self.match_token(&Token::LeftBracket) {
            return Ok((dt, None));
        }
        let array = dt
            .array_of()
            .ok_or_else(|| self.error(ErrorCode::ExpectedType, format!("there are no arrays of {}", dt)))?;
        let size = match self.peek() {
            Some(Token::Integer(size)) => {
                let size = *size as usize;
                self.advance();
                if size == 0 {
                    return Err(CompileError::new(
                        ErrorCode::ValueOutOfRange,
                        "array size must be at least 1",
                        self.previous_span(),
                    ));
                }
                let max = array.max_array_length().unwrap_or(256);
                if size > max {
                    return Err(CompileError::new(
                        ErrorCode::ValueOutOfRange,
                        format!("an array of {} holds at most {} elements", dt, max),
                        self.previous_span(),
                    ));
                }
                Some(size)
            }
            _ => None,
        };
        self.expect(&Token::RightBracket, "expected ']' after array size")?;
        Ok((array, size))
    }

    fn parse_array_literal(&mut self) -> Result<Vec<crate::ast::Expr>, CompileError> {
        self.expect(&Token::LeftBracket, "expected '['")?;
        let mut elements = Vec::new();
        self.skip_newlines();
        if !self.check(&Token::RightBracket) {
            loop {
                elements.push(self.parse_expression()?);
                self.skip_newlines();
                if !self.match_token(&Token::Comma) {
                    break;
                }
                self.skip_newlines();
            }
        }
        self.expect(&Token::RightBracket, "expected ']' after array elements")?;
        Ok(elements)
    }
}

fn address_value(value: u32, span: Span) -> Result<u16, CompileError> {
    u16::try_from(value).map_err(|_| {
        CompileError::new(
            ErrorCode::ValueOutOfRange,
            format!("address ${:x} is out of range", value),
            span,
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::parse;

    fn block(source: &str) -> Block {
        let mut parsed = parse("test", source).unwrap();
        parsed.program.blocks.remove(0)
    }

    #[test]
    fn test_block_with_address() {
        let main = block("main $c000 {\n}\n");
        assert_eq!(main.name, "main");
        assert_eq!(main.address, Some(0xc000));
    }

    #[test]
    fn test_variable_tags() {
        let main = block("main {\n  ubyte @zp @shared counter\n  uword @nozp ptr\n  word @requirezp w\n}");
        let counter = &main.variables[0];
        assert_eq!(counter.scoped_name.to_string(), "main.counter");
        assert_eq!(counter.zeropage, ZeropageWish::Prefer);
        assert!(counter.shared);
        assert_eq!(main.variables[1].zeropage, ZeropageWish::Forbid);
        assert_eq!(main.variables[2].zeropage, ZeropageWish::Require);
    }

    #[test]
    fn test_constants_and_memory_variables() {
        let parsed = parse("test", "main {\n  const ubyte LIMIT = 10\n  &ubyte border = $d020\n}").unwrap();
        let main = &parsed.program.blocks[0];
        assert_eq!(main.variables[0].kind, VarDeclKind::Const);
        assert_eq!(main.variables[1].kind, VarDeclKind::Memory);
        assert!(parsed.initializers.contains_key(&ScopedName::parse("main.LIMIT")));
        assert!(parsed.initializers.contains_key(&ScopedName::parse("main.border")));
    }

    #[test]
    fn test_strings_and_arrays() {
        let parsed = parse("test", "main {\n  str name = \"c64\"\n  ubyte[] table = [1, 2,\n 3]\n  uword[4] words\n}").unwrap();
        let main = &parsed.program.blocks[0];
        assert_eq!(main.variables[0].value, Some(VarInit::Str("c64".to_string())));
        assert_eq!(main.variables[1].dt, DataType::ArrayUb);
        assert!(matches!(
            parsed.initializers.get(&ScopedName::parse("main.table")),
            Some(Initializer::Array(elements)) if elements.len() == 3
        ));
        assert_eq!(main.variables[2].array_size, Some(4));
    }

    #[test]
    fn test_subroutine_parameters_become_variables() {
        let main = block("main {\n  sub add(ubyte a, uword b) -> uword {\n    ubyte tmp = 3\n    return a + b\n  }\n}");
        let sub = &main.subroutines[0];
        assert_eq!(sub.scoped_name.to_string(), "main.add");
        assert_eq!(sub.parameters.len(), 2);
        assert_eq!(sub.return_type, Some(DataType::Uword));
        let names: Vec<_> = sub.variables.iter().map(|v| v.scoped_name.to_string()).collect();
        assert_eq!(names, vec!["main.add.a", "main.add.b", "main.add.tmp"]);
        assert!(matches!(sub.statements[0].kind, StatementKind::Assignment(_)));
        assert!(sub.statements[1].is_return());
    }

    #[test]
    fn test_asm_subroutines() {
        let main = block(
            "main {\n  asmsub chrout(ubyte char @A) clobbers(X, Y) = $ffd2\n  inline asmsub twice(ubyte v @A) -> ubyte @A {\n    %asm {{\n  asl  a\n  rts\n}}\n  }\n}",
        );
        let chrout = &main.subroutines[0];
        assert!(chrout.is_asm);
        assert_eq!(chrout.address, Some(0xffd2));
        assert_eq!(chrout.clobbers, vec![CpuRegister::X, CpuRegister::Y]);
        assert_eq!(chrout.parameters[0].register, Some(RegisterOrPair::A));
        let twice = &main.subroutines[1];
        assert!(twice.inline);
        assert_eq!(twice.return_register, Some(RegisterOrPair::A));
        assert_eq!(twice.amount_of_returns(), 1);
    }

    #[test]
    fn test_declaration_errors() {
        let error = parse("test", "main {\n  const ubyte X\n}").unwrap_err();
        assert_eq!(error.code, ErrorCode::ExpectedToken);
        let error = parse("test", "main {\n  str[4] names\n}").unwrap_err();
        assert_eq!(error.code, ErrorCode::ExpectedType);
        let error = parse("test", "main {\n  ubyte @fast x\n}").unwrap_err();
        assert_eq!(error.code, ErrorCode::UnexpectedToken);
    }
}
