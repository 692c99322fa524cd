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

//! Reader helper methods for token stream navigation and error handling.

use super::tokens::Token;
use super::Parser;
use crate::error::{CompileError, ErrorCode, Span};

/// Trait for token stream operations of the reader.
pub trait ParserHelpers<'a> {
    /// Check if we've reached the end of the token stream.
    fn is_at_end(&self) -> bool;

    /// Peek at the current token without advancing.
    fn peek(&self) -> Option<&Token>;

    /// Peek at the current token's span.
    fn peek_span(&self) -> Option<Span>;

    /// Peek at a token ahead by n positions.
    fn peek_ahead(&self, n: usize) -> Option<&Token>;

    /// The first token that is not a newline, starting at the current one.
    fn peek_past_newlines(&self) -> Option<&Token>;

    /// Get the previous token's span (for error reporting).
    fn previous_span(&self) -> Span;

    /// Advance to the next token and return the current one.
    fn advance(&mut self) -> Option<(Token, Span)>;

    /// Check if the current token matches the expected kind.
    fn check(&self, expected: &Token) -> bool;

    /// Check if the current token matches any of the expected kinds.
    fn check_any(&self, expected: &[Token]) -> bool;

    /// Consume the current token if it matches the expected kind.
    fn match_token(&mut self, expected: &Token) -> bool;

    /// Expect the current token to match, or return an error.
    fn expect(&mut self, expected: &Token, message: &str) -> Result<(Token, Span), CompileError>;

    /// Expect an identifier and return its text and span.
    fn expect_identifier(&mut self, message: &str) -> Result<(String, Span), CompileError>;

    /// Expect the end of a statement: a newline, a closing brace or the end of input.
    fn expect_end_of_statement(&mut self) -> Result<(), CompileError>;

    /// Skip newlines.
    fn skip_newlines(&mut self);

    /// Create an error at the current position.
    fn error(&self, code: ErrorCode, message: impl Into<String>) -> CompileError;
}

impl<'a> ParserHelpers<'a> for Parser<'a> {
    fn is_at_end(&self) -> bool {
        self.position >= self.tokens.len()
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.position).map(|(t, _)| t)
    }

    fn peek_span(&self) -> Option<Span> {
        self.tokens.get(self.position).map(|(_, s)| *s)
    }

    fn peek_ahead(&self, n: usize) -> Option<&Token> {
        self.tokens.get(self.position + n).map(|(t, _)| t)
    }

    fn peek_past_newlines(&self) -> Option<&Token> {
        self.tokens[self.position.min(self.tokens.len())..]
            .iter()
            .map(|(t, _)| t)
            .find(|t| **t != Token::Newline)
    }

    fn previous_span(&self) -> Span {
        if self.position > 0 {
            self.tokens[self.position - 1].1
        } else if let Some((_, span)) = self.tokens.first() {
            *span
        } else {
            Span::new(0, 0)
        }
    }

    fn advance(&mut self) -> Option<(Token, Span)> {
        let result = self.tokens.get(self.position).cloned();
        if result.is_some() {
            self.position += 1;
        }
        result
    }

    fn check(&self, expected: &Token) -> bool {
        self.peek()
            .is_some_and(|t| std::mem::discriminant(t) == std::mem::discriminant(expected))
    }

    fn check_any(&self, expected: &[Token]) -> bool {
        expected.iter().any(|e| self.check(e))
    }

    fn match_token(&mut self, expected: &Token) -> bool {
        if self.check(expected) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: &Token, message: &str) -> Result<(Token, Span), CompileError> {
        if self.check(expected) {
            if let Some(token) = self.advance() {
                return Ok(token);
            }
        }
        Err(self.unexpected(ErrorCode::ExpectedToken, message))
    }

    fn expect_identifier(&mut self, message: &str) -> Result<(String, Span), CompileError> {
        match self.advance() {
            Some((Token::Identifier(name), span)) => Ok((name, span)),
            Some(_) => {
                self.position -= 1;
                Err(self.unexpected(ErrorCode::ExpectedIdentifier, message))
            }
            None => Err(self.unexpected(ErrorCode::ExpectedIdentifier, message)),
        }
    }

    fn expect_end_of_statement(&mut self) -> Result<(), CompileError> {
        match self.peek() {
            None | Some(Token::RightBrace) => Ok(()),
            Some(Token::Newline) => {
                self.skip_newlines();
                Ok(())
            }
            Some(_) => Err(self.unexpected(ErrorCode::UnexpectedToken, "expected end of statement")),
        }
    }

    fn skip_newlines(&mut self) {
        while self.check(&Token::Newline) {
            self.advance();
        }
    }

    fn error(&self, code: ErrorCode, message: impl Into<String>) -> CompileError {
        let span = self.peek_span().unwrap_or_else(|| self.previous_span());
        CompileError::new(code, message, span)
    }
}

impl Parser<'_> {
    /// An error naming the token found where something else was expected.
    fn unexpected(&self, code: ErrorCode, message: &str) -> CompileError {
        match self.peek() {
            Some(found) => self.error(code, format!("{}, found {}", message, found)),
            None => CompileError::new(
                ErrorCode::UnexpectedEndOfFile,
                format!("{}, found end of file", message),
                self.previous_span(),
            ),
        }
    }
}
