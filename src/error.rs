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

//! Error types for the mos65gen code generator.
//!
//! This module defines the error and warning types shared by the program
//! reader, the zero page allocator and the code generator, together with the
//! `ErrorReporter` interface the generator reports through.

use std::fmt;
use std::ops::Range;

use ariadne::{Color, Label, Report, ReportKind, Source};
use thiserror::Error;

/// A source span representing a range in the source code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Span {
    /// Start byte offset (inclusive)
    pub start: usize,
    /// End byte offset (exclusive)
    pub end: usize,
}

impl Span {
    /// Create a new span.
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    /// Create a span from a range.
    pub fn from_range(range: Range<usize>) -> Self {
        Self {
            start: range.start,
            end: range.end,
        }
    }

    /// Get the length of this span.
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    /// Check if the span is empty.
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Merge two spans into one that covers both.
    pub fn merge(&self, other: &Span) -> Span {
        Span {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }
}

impl From<Range<usize>> for Span {
    fn from(range: Range<usize>) -> Self {
        Self::from_range(range)
    }
}

impl From<Span> for Range<usize> {
    fn from(span: Span) -> Self {
        span.start..span.end
    }
}

/// Error codes for the code generator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    // Program reader errors (E001-E030)
    InvalidCharacter,
    InvalidNumber,
    UnterminatedString,
    UnexpectedToken,
    UnexpectedEndOfFile,
    ExpectedToken,
    ExpectedExpression,
    ExpectedIdentifier,
    ExpectedType,
    InvalidAssignmentTarget,
    UndefinedName,
    DuplicateDefinition,
    ArgumentCount,
    TypeMismatch,
    BreakOutsideLoop,

    // Zero page allocation errors (E100-E103)
    ZeropageDisabled,
    ZeropageTypeNotAllowed,
    ZeropageExhausted,
    FloatsNotEnabled,

    // Code generation errors (E200-E209)
    DivisionByZero,
    SignedRemainder,
    InvalidInPlaceCast,
    InvalidShift,
    InvalidRepeatCount,
    MissingMainBlock,
    MissingEntryPoint,
    UnsupportedOperation,
    ValueOutOfRange,
    UndefinedSymbol,

    // Internal consistency violations (E900)
    InternalError,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

impl ErrorCode {
    /// Get the numeric code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            ErrorCode::InvalidCharacter => "E001",
            ErrorCode::InvalidNumber => "E002",
            ErrorCode::UnterminatedString => "E003",
            ErrorCode::UnexpectedToken => "E010",
            ErrorCode::UnexpectedEndOfFile => "E011",
            ErrorCode::ExpectedToken => "E012",
            ErrorCode::ExpectedExpression => "E013",
            ErrorCode::ExpectedIdentifier => "E014",
            ErrorCode::ExpectedType => "E015",
            ErrorCode::InvalidAssignmentTarget => "E016",
            ErrorCode::UndefinedName => "E020",
            ErrorCode::DuplicateDefinition => "E021",
            ErrorCode::ArgumentCount => "E022",
            ErrorCode::TypeMismatch => "E023",
            ErrorCode::BreakOutsideLoop => "E024",

            ErrorCode::ZeropageDisabled => "E100",
            ErrorCode::ZeropageTypeNotAllowed => "E101",
            ErrorCode::ZeropageExhausted => "E102",
            ErrorCode::FloatsNotEnabled => "E103",

            ErrorCode::DivisionByZero => "E200",
            ErrorCode::SignedRemainder => "E201",
            ErrorCode::InvalidInPlaceCast => "E202",
            ErrorCode::InvalidShift => "E203",
            ErrorCode::InvalidRepeatCount => "E204",
            ErrorCode::MissingMainBlock => "E205",
            ErrorCode::MissingEntryPoint => "E206",
            ErrorCode::UnsupportedOperation => "E207",
            ErrorCode::ValueOutOfRange => "E208",
            ErrorCode::UndefinedSymbol => "E209",

            ErrorCode::InternalError => "E900",
        }
    }

    /// Whether this code marks a defect in an earlier pass rather than in the input.
    pub fn is_internal(&self) -> bool {
        matches!(self, ErrorCode::InternalError)
    }
}

/// A compiler error with source location.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("[{code}] {message}")]
pub struct CompileError {
    /// The error code.
    pub code: ErrorCode,
    /// The error message.
    pub message: String,
    /// The source span where the error occurred.
    pub span: Span,
    /// Optional hint for fixing the error.
    pub hint: Option<String>,
}

impl CompileError {
    /// Create a new compile error.
    pub fn new(code: ErrorCode, message: impl Into<String>, span: Span) -> Self {
        Self {
            code,
            message: message.into(),
            span,
            hint: None,
        }
    }

    /// Create an internal consistency error.
    ///
    /// These signal tree shapes that earlier passes were supposed to remove,
    /// never problems in the user's program.
    pub fn internal(message: impl Into<String>, span: Span) -> Self {
        Self::new(ErrorCode::InternalError, message, span)
    }

    /// Add a hint to this error.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    /// Get the error code string.
    pub fn code_str(&self) -> &'static str {
        self.code.code()
    }
}

/// A non-fatal diagnostic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileWarning {
    /// The warning message.
    pub message: String,
    /// The source span the warning refers to.
    pub span: Span,
}

impl CompileWarning {
    /// Create a new warning.
    pub fn new(message: impl Into<String>, span: Span) -> Self {
        Self {
            message: message.into(),
            span,
        }
    }
}

impl fmt::Display for CompileWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "warning: {}", self.message)
    }
}

/// Result type for compiler operations.
pub type Result<T> = std::result::Result<T, CompileError>;

/// The interface the code generator reports errors and warnings through.
pub trait ErrorReporter {
    /// Record a fatal error. Generation of the current unit will not succeed.
    fn err(&mut self, error: CompileError);

    /// Record a warning.
    fn warn(&mut self, warning: CompileWarning);

    /// True when no error has been recorded.
    fn no_errors(&self) -> bool;

    /// Render every recorded diagnostic against `source`, errors first.
    fn report(&self, source: &str, filename: Option<&str>) -> String;
}

/// The default `ErrorReporter`: collects diagnostics in order, dropping duplicates.
#[derive(Debug, Default)]
pub struct Diagnostics {
    errors: Vec<CompileError>,
    warnings: Vec<CompileWarning>,
}

impl Diagnostics {
    /// Create an empty diagnostics collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// All errors recorded so far.
    pub fn errors(&self) -> &[CompileError] {
        &self.errors
    }

    /// All warnings recorded so far.
    pub fn warnings(&self) -> &[CompileWarning] {
        &self.warnings
    }

    /// Take the recorded errors and warnings, leaving the collector empty.
    pub fn take(&mut self) -> (Vec<CompileError>, Vec<CompileWarning>) {
        (
            std::mem::take(&mut self.errors),
            std::mem::take(&mut self.warnings),
        )
    }
}

impl ErrorReporter for Diagnostics {
    fn err(&mut self, error: CompileError) {
        if !self.errors.contains(&error) {
            self.errors.push(error);
        }
    }

    fn warn(&mut self, warning: CompileWarning) {
        if !self.warnings.contains(&warning) {
            self.warnings.push(warning);
        }
    }

    fn no_errors(&self) -> bool {
        self.errors.is_empty()
    }

    fn report(&self, source: &str, filename: Option<&str>) -> String {
        let mut output = String::new();
        for error in &self.errors {
            output.push_str(&format_error(error, source, filename));
        }
        for warning in &self.warnings {
            output.push_str(&format_warning(warning, source, filename));
        }
        output
    }
}

/// Source location with line and column information.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLocation {
    /// Line number (1-indexed).
    pub line: usize,
    /// Column number (1-indexed).
    pub column: usize,
    /// The content of the line.
    pub line_content: String,
}

impl SourceLocation {
    /// Calculate line and column from a byte offset in source code.
    pub fn from_offset(source: &str, offset: usize) -> Self {
        let mut offset = offset.min(source.len());
        while !source.is_char_boundary(offset) {
            offset -= 1;
        }
        let before = &source[..offset];

        let line = before.chars().filter(|&c| c == '\n').count() + 1;

        let line_start = before.rfind('\n').map(|i| i + 1).unwrap_or(0);
        let column = before[line_start..].chars().count() + 1;

        let line_end = source[offset..]
            .find('\n')
            .map(|i| offset + i)
            .unwrap_or(source.len());
        let line_content = source[line_start..line_end].to_string();

        Self {
            line,
            column,
            line_content,
        }
    }
}

/// Format an error with source context.
pub fn format_error(error: &CompileError, source: &str, filename: Option<&str>) -> String {
    let header = format!("error[{}]: {}", error.code_str(), error.message);
    let mut output = format_with_context(&header, error.span, source, filename);
    if let Some(hint) = &error.hint {
        output.push_str(&format!("  = hint: {}\n", hint));
    }
    output
}

/// Format a warning with source context.
pub fn format_warning(warning: &CompileWarning, source: &str, filename: Option<&str>) -> String {
    let header = format!("warning: {}", warning.message);
    format_with_context(&header, warning.span, source, filename)
}

fn format_with_context(header: &str, span: Span, source: &str, filename: Option<&str>) -> String {
    let loc = SourceLocation::from_offset(source, span.start);
    let filename = filename.unwrap_or("<input>");

    let mut output = String::new();
    output.push_str(header);
    output.push('\n');
    output.push_str(&format!("  --> {}:{}:{}\n", filename, loc.line, loc.column));

    let line_num_width = loc.line.to_string().len();
    output.push_str(&format!("{:>width$} |\n", "", width = line_num_width));
    output.push_str(&format!(
        "{:>width$} | {}\n",
        loc.line,
        loc.line_content,
        width = line_num_width
    ));

    let underline_start = loc.column - 1;
    let underline_len = span
        .len()
        .max(1)
        .min(loc.line_content.len().saturating_sub(underline_start).max(1));
    output.push_str(&format!(
        "{:>width$} | {:>start$}{}\n",
        "",
        "",
        "^".repeat(underline_len),
        width = line_num_width,
        start = underline_start
    ));

    output
}

/// Render an error as a colored ariadne report.
pub fn render_error(error: &CompileError, source: &str, filename: &str) -> String {
    let range = clamp_range(error.span, source);
    let mut report = Report::build(ReportKind::Error, filename, range.start)
        .with_code(error.code_str())
        .with_message(&error.message)
        .with_label(
            Label::new((filename, range))
                .with_message(&error.message)
                .with_color(Color::Red),
        );
    if let Some(hint) = &error.hint {
        report = report.with_help(hint);
    }
    write_report(report.finish(), source, filename)
}

/// Render a warning as a colored ariadne report.
pub fn render_warning(warning: &CompileWarning, source: &str, filename: &str) -> String {
    let range = clamp_range(warning.span, source);
    let report = Report::build(ReportKind::Warning, filename, range.start)
        .with_message(&warning.message)
        .with_label(
            Label::new((filename, range))
                .with_message(&warning.message)
                .with_color(Color::Yellow),
        )
        .finish();
    write_report(report, source, filename)
}

fn clamp_range(span: Span, source: &str) -> Range<usize> {
    let start = span.start.min(source.len());
    let end = span.end.clamp(start, source.len());
    start..end
}

fn write_report<'a>(report: Report<'_, (&'a str, Range<usize>)>, source: &str, filename: &'a str) -> String {
    let mut buffer = Vec::new();
    if report
        .write((filename, Source::from(source)), &mut buffer)
        .is_err()
    {
        return String::new();
    }
    String::from_utf8_lossy(&buffer).into_owned()
}
