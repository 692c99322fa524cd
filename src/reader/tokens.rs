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

//! Tokens of the program tree text.

use std::fmt;

use logos::{Lexer, Logos};

use crate::ast::BranchCondition;
use crate::error::{CompileError, ErrorCode, Result, Span};

/// A token of the program tree text.
#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r]+")]
#[logos(skip r";[^\n]*")]
pub enum Token {
    // Literals
    /// Integer literal (decimal, `$hex` or `%binary`).
    #[regex(r"\$[0-9a-fA-F]+", |lex| u32::from_str_radix(&lex.slice()[1..], 16).ok())]
    #[regex(r"%[01]+", |lex| u32::from_str_radix(&lex.slice()[1..], 2).ok())]
    #[regex(r"[0-9]+", |lex| lex.slice().parse::<u32>().ok())]
    Integer(u32),
    /// Floating point literal.
    #[regex(r"[0-9]+\.[0-9]+([eE][+-]?[0-9]+)?", |lex| lex.slice().parse::<f64>().ok())]
    #[regex(r"[0-9]+[eE][+-]?[0-9]+", |lex| lex.slice().parse::<f64>().ok())]
    Float(f64),
    /// String literal, escapes already processed.
    #[regex(r#""([^"\\\n]|\\.)*""#, |lex| unescape(lex.slice()))]
    Str(String),
    /// Character literal, as its byte value.
    #[regex(r"'([^'\\\n]|\\.)'", |lex| char_value(lex.slice()))]
    Char(u8),
    /// Identifier.
    #[regex(r"[A-Za-z_][A-Za-z0-9_]*", |lex| lex.slice().to_string())]
    Identifier(String),
    /// The text of a `%asm {{ ... }}` block.
    #[token("%asm", inline_assembly)]
    InlineAsm(String),

    // Type keywords
    #[token("ubyte")]
    Ubyte,
    #[token("byte")]
    Byte,
    #[token("uword")]
    Uword,
    #[token("word")]
    Word,
    #[token("float")]
    FloatType,
    #[token("str")]
    StrType,

    // Declaration keywords
    #[token("sub")]
    Sub,
    #[token("asmsub")]
    AsmSub,
    #[token("inline")]
    Inline,
    #[token("const")]
    Const,
    #[token("clobbers")]
    Clobbers,

    // Statement keywords
    #[token("if")]
    If,
    #[token("else")]
    Else,
    /// `if_cs`, `if_z` and the other status flag branches.
    #[token("if_cs", |_| BranchCondition::Cs)]
    #[token("if_cc", |_| BranchCondition::Cc)]
    #[token("if_eq", |_| BranchCondition::Eq)]
    #[token("if_z", |_| BranchCondition::Eq)]
    #[token("if_ne", |_| BranchCondition::Ne)]
    #[token("if_nz", |_| BranchCondition::Ne)]
    #[token("if_vs", |_| BranchCondition::Vs)]
    #[token("if_vc", |_| BranchCondition::Vc)]
    #[token("if_mi", |_| BranchCondition::Mi)]
    #[token("if_neg", |_| BranchCondition::Mi)]
    #[token("if_pl", |_| BranchCondition::Pl)]
    #[token("if_pos", |_| BranchCondition::Pl)]
    IfFlag(BranchCondition),
    #[token("repeat")]
    Repeat,
    #[token("when")]
    When,
    #[token("while")]
    While,
    #[token("do")]
    Do,
    #[token("until")]
    Until,
    #[token("break")]
    Break,
    #[token("goto")]
    Goto,
    #[token("gosub")]
    Gosub,
    #[token("return")]
    Return,

    // Word operators
    #[token("and")]
    And,
    #[token("or")]
    Or,
    #[token("xor")]
    Xor,
    #[token("not")]
    Not,
    #[token("as")]
    As,

    // Punctuation
    #[token("{")]
    LeftBrace,
    #[token("}")]
    RightBrace,
    #[token("(")]
    LeftParen,
    #[token(")")]
    RightParen,
    #[token("[")]
    LeftBracket,
    #[token("]")]
    RightBracket,
    #[token(",")]
    Comma,
    #[token(".")]
    Dot,
    #[token(":")]
    Colon,
    #[token("->")]
    Arrow,
    #[token("@")]
    At,
    #[token("\n")]
    Newline,

    // Assignment operators
    #[token("=")]
    Assign,
    #[token("+=")]
    PlusAssign,
    #[token("-=")]
    MinusAssign,
    #[token("*=")]
    StarAssign,
    #[token("/=")]
    SlashAssign,
    #[token("%=")]
    PercentAssign,
    #[token("&=")]
    AmpersandAssign,
    #[token("|=")]
    PipeAssign,
    #[token("^=")]
    CaretAssign,
    #[token("<<=")]
    ShiftLeftAssign,
    #[token(">>=")]
    ShiftRightAssign,
    #[token("++")]
    PlusPlus,
    #[token("--")]
    MinusMinus,

    // Operators
    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Star,
    #[token("**")]
    StarStar,
    #[token("/")]
    Slash,
    #[token("%")]
    Percent,
    #[token("&")]
    Ampersand,
    #[token("|")]
    Pipe,
    #[token("^")]
    Caret,
    #[token("~")]
    Tilde,
    #[token("<<")]
    ShiftLeft,
    #[token(">>")]
    ShiftRight,
    #[token("==")]
    Equal,
    #[token("!=")]
    NotEqual,
    #[token("<")]
    Less,
    #[token(">")]
    Greater,
    #[token("<=")]
    LessEqual,
    #[token(">=")]
    GreaterEqual,
}

fn unescape(quoted: &str) -> Option<String> {
    let inner = &quoted[1..quoted.len() - 1];
    let mut text = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            text.push(c);
            continue;
        }
        match chars.next()? {
            'n' => text.push('\n'),
            'r' => text.push('\r'),
            '0' => text.push('\0'),
            other => text.push(other),
        }
    }
    Some(text)
}

fn char_value(quoted: &str) -> Option<u8> {
    let text = unescape(quoted)?;
    let mut chars = text.chars();
    let c = chars.next()?;
    if chars.next().is_some() || !c.is_ascii() {
        return None;
    }
    Some(c as u8)
}

fn inline_assembly(lex: &mut Lexer<Token>) -> Option<String> {
    let remainder = lex.remainder();
    let start = remainder.len() - remainder.trim_start().len();
    let body = remainder[start..].strip_prefix("{{")?;
    let end = body.find("}}")?;
    let text = body[..end].trim_matches('\n').to_string();
    lex.bump(start + 2 + end + 2);
    Some(text)
}

impl Token {
    /// A short description used in error messages.
    pub fn name(&self) -> &'static str {
        match self {
            Token::Integer(_) | Token::Float(_) => "number",
            Token::Str(_) => "string",
            Token::Char(_) => "character",
            Token::Identifier(_) => "identifier",
            Token::InlineAsm(_) => "'%asm'",
            Token::Ubyte => "'ubyte'",
            Token::Byte => "'byte'",
            Token::Uword => "'uword'",
            Token::Word => "'word'",
            Token::FloatType => "'float'",
            Token::StrType => "'str'",
            Token::Sub => "'sub'",
            Token::AsmSub => "'asmsub'",
            Token::Inline => "'inline'",
            Token::Const => "'const'",
            Token::Clobbers => "'clobbers'",
            Token::If => "'if'",
            Token::Else => "'else'",
            Token::IfFlag(_) => "status flag branch",
            Token::Repeat => "'repeat'",
            Token::When => "'when'",
            Token::While => "'while'",
            Token::Do => "'do'",
            Token::Until => "'until'",
            Token::Break => "'break'",
            Token::Goto => "'goto'",
            Token::Gosub => "'gosub'",
            Token::Return => "'return'",
            Token::And => "'and'",
            Token::Or => "'or'",
            Token::Xor => "'xor'",
            Token::Not => "'not'",
            Token::As => "'as'",
            Token::LeftBrace => "'{'",
            Token::RightBrace => "'}'",
            Token::LeftParen => "'('",
            Token::RightParen => "')'",
            Token::LeftBracket => "'['",
            Token::RightBracket => "']'",
            Token::Comma => "','",
            Token::Dot => "'.'",
            Token::Colon => "':'",
            Token::Arrow => "'->'",
            Token::At => "'@'",
            Token::Newline => "newline",
            Token::Assign => "'='",
            Token::PlusAssign => "'+='",
            Token::MinusAssign => "'-='",
            Token::StarAssign => "'*='",
            Token::SlashAssign => "'/='",
            Token::PercentAssign => "'%='",
            Token::AmpersandAssign => "'&='",
            Token::PipeAssign => "'|='",
            Token::CaretAssign => "'^='",
            Token::ShiftLeftAssign => "'<<='",
            Token::ShiftRightAssign => "'>>='",
            Token::PlusPlus => "'++'",
            Token::MinusMinus => "'--'",
            Token::Plus => "'+'",
            Token::Minus => "'-'",
            Token::Star => "'*'",
            Token::StarStar => "'**'",
            Token::Slash => "'/'",
            Token::Percent => "'%'",
            Token::Ampersand => "'&'",
            Token::Pipe => "'|'",
            Token::Caret => "'^'",
            Token::Tilde => "'~'",
            Token::ShiftLeft => "'<<'",
            Token::ShiftRight => "'>>'",
            Token::Equal => "'=='",
            Token::NotEqual => "'!='",
            Token::Less => "'<'",
            Token::Greater => "'>'",
            Token::LessEqual => "'<='",
            Token::GreaterEqual => "'>='",
        }
    }

    /// True for the datatype keywords.
    pub fn is_type(&self) -> bool {
        matches!(
            self,
            Token::Ubyte | Token::Byte | Token::Uword | Token::Word | Token::FloatType | Token::StrType
        )
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Integer(n) => write!(f, "{}", n),
            Token::Float(n) => write!(f, "{}", n),
            Token::Str(s) => write!(f, "\"{}\"", s),
            Token::Char(c) => write!(f, "'{}'", *c as char),
            Token::Identifier(s) => write!(f, "'{}'", s),
            _ => write!(f, "{}", self.name()),
        }
    }
}

/// Split `source` into tokens with their spans.
pub fn tokenize(source: &str) -> Result<Vec<(Token, Span)>> {
    let mut lexer = Token::lexer(source);
    let mut tokens = Vec::new();
    while let Some(token) = lexer.next() {
        let span = Span::from_range(lexer.span());
        match token {
            Ok(token) => tokens.push((token, span)),
            Err(()) => return Err(lex_error(lexer.slice(), span)),
        }
    }
    Ok(tokens)
}

fn lex_error(slice: &str, span: Span) -> CompileError {
    match slice.chars().next() {
        Some('"') => CompileError::new(ErrorCode::UnterminatedString, "unterminated string literal", span),
        Some('%') if slice.starts_with("%asm") => CompileError::new(
            ErrorCode::UnexpectedToken,
            "inline assembly must be enclosed in '{{' and '}}'",
            span,
        ),
        Some(c) if c.is_ascii_digit() || c == '$' || c == '%' => {
            CompileError::new(ErrorCode::InvalidNumber, format!("invalid number '{}'", slice), span)
        }
        Some(c) => CompileError::new(
            ErrorCode::InvalidCharacter,
            format!("unexpected character '{}'", c),
            span,
        ),
        None => CompileError::new(ErrorCode::UnexpectedEndOfFile, "unexpected end of input", span),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<Token> {
        tokenize(source)
            .unwrap()
            .into_iter()
            .map(|(token, _)| token)
            .collect()
    }

    #[test]
    fn test_numbers() {
        assert_eq!(
            kinds("42 $d020 %1010 1.5 2e3"),
            vec![
                Token::Integer(42),
                Token::Integer(0xd020),
                Token::Integer(10),
                Token::Float(1.5),
                Token::Float(2000.0),
            ]
        );
    }

    #[test]
    fn test_keywords_and_identifiers() {
        assert_eq!(
            kinds("ubyte counter if_z if_cs subtotal"),
            vec![
                Token::Ubyte,
                Token::Identifier("counter".to_string()),
                Token::IfFlag(BranchCondition::Eq),
                Token::IfFlag(BranchCondition::Cs),
                Token::Identifier("subtotal".to_string()),
            ]
        );
    }

    #[test]
    fn test_operators_prefer_longest_match() {
        assert_eq!(
            kinds("<<= << <= < ** *= ++"),
            vec![
                Token::ShiftLeftAssign,
                Token::ShiftLeft,
                Token::LessEqual,
                Token::Less,
                Token::StarStar,
                Token::StarAssign,
                Token::PlusPlus,
            ]
        );
    }

    #[test]
    fn test_comments_and_newlines() {
        assert_eq!(
            kinds("x = 1 ; set x\ny"),
            vec![
                Token::Identifier("x".to_string()),
                Token::Assign,
                Token::Integer(1),
                Token::Newline,
                Token::Identifier("y".to_string()),
            ]
        );
    }

    #[test]
    fn test_strings_and_chars() {
        assert_eq!(
            kinds(r#""hi\n" 'A'"#),
            vec![Token::Str("hi\n".to_string()), Token::Char(65)]
        );
    }

    #[test]
    fn test_inline_assembly() {
        let tokens = kinds("%asm {{\n  lda  #1\n  rts\n}}\nx");
        assert_eq!(tokens[0], Token::InlineAsm("  lda  #1\n  rts".to_string()));
        assert_eq!(tokens[1], Token::Newline);
    }

    #[test]
    fn test_lex_errors() {
        assert_eq!(tokenize("x = \"open").unwrap_err().code, ErrorCode::UnterminatedString);
        assert_eq!(tokenize("x # 1").unwrap_err().code, ErrorCode::InvalidCharacter);
        assert_eq!(tokenize("%asm { nop }").unwrap_err().code, ErrorCode::UnexpectedToken);
    }
}
