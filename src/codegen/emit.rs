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

//! Assembly text emission.
//!
//! This module provides the line buffer all code generation writes into:
//! - `TextEmitter` normalizes fragments into individual lines
//! - `AssemblyOptimizer` is the hook that rewrites the finished lines
//! - `PeepholeOptimizer` is the default, conservative optimizer
//!
//! A fragment may hold several instructions separated by `" | "` or by
//! newlines. Lines that start with whitespace are instructions and get a
//! single tab of indentation; everything else (labels, comments,
//! directives at column 0) is kept as written.

use log::debug;

/// Collects the lines of the generated assembly program.
#[derive(Debug, Default, Clone)]
pub struct TextEmitter {
    lines: Vec<String>,
}

impl TextEmitter {
    /// Create an empty emitter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a fragment, splitting it into normalized lines.
    pub fn out(&mut self, fragment: &str) {
        let fragment = if fragment.contains(" | ") {
            fragment.replace(" | ", "\n")
        } else {
            fragment.to_string()
        };
        for line in fragment.trim_matches('\n').split('\n') {
            self.lines.push(normalize_line(line));
        }
    }

    /// Append a single line without any splitting or normalization.
    pub fn out_raw(&mut self, line: impl Into<String>) {
        self.lines.push(line.into());
    }

    /// The lines produced so far.
    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// Number of lines produced so far.
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    /// True when nothing has been emitted.
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Hand out the lines, leaving the emitter empty.
    pub fn take_lines(&mut self) -> Vec<String> {
        std::mem::take(&mut self.lines)
    }

    /// Run `optimizer` until it reports no more changes.
    ///
    /// Returns the total number of changes made.
    pub fn optimize(&mut self, optimizer: &mut dyn AssemblyOptimizer) -> usize {
        let mut total = 0;
        loop {
            let changes = optimizer.optimize(&mut self.lines);
            debug!("assembly optimizer pass: {} changes", changes);
            if changes == 0 {
                return total;
            }
            total += changes;
        }
    }

    /// The final program text.
    pub fn text(&self) -> String {
        let mut text = self.lines.join("\n");
        text.push('\n');
        text
    }
}

fn normalize_line(line: &str) -> String {
    if line.starts_with(' ') || line.starts_with('\t') {
        format!("\t{}", line.trim())
    } else {
        line.trim_end().to_string()
    }
}

/// A rewriting pass over the finished assembly lines.
pub trait AssemblyOptimizer {
    /// Rewrite `lines` in place and return the number of changes made.
    fn optimize(&mut self, lines: &mut Vec<String>) -> usize;
}

/// Removes jumps to the immediately following label and repeated `rts`.
#[derive(Debug, Default, Clone, Copy)]
pub struct PeepholeOptimizer;

impl PeepholeOptimizer {
    /// Create the optimizer.
    pub fn new() -> Self {
        Self
    }
}

impl AssemblyOptimizer for PeepholeOptimizer {
    fn optimize(&mut self, lines: &mut Vec<String>) -> usize {
        let mut remove = Vec::new();
        let mut index = 0;
        while index < lines.len() {
            let Some(instruction) = instruction_of(&lines[index]) else {
                index += 1;
                continue;
            };
            let Some(next) = next_code_line(lines, index + 1) else {
                break;
            };

            let mut parts = instruction.split_whitespace();
            let mnemonic = parts.next().unwrap_or("");
            let operand = parts.next().unwrap_or("");
            let next_trimmed = lines[next].trim();

            if (mnemonic == "jmp" || mnemonic == "bra") && !operand.is_empty() && !operand.starts_with('-') {
                if let Some(label) = label_of(&lines[next]) {
                    if label == operand {
                        remove.push(index);
                    }
                }
            } else if mnemonic == "rts"
                && lines[index].starts_with('\t')
                && lines[next].starts_with('\t')
                && next_trimmed == "rts"
            {
                remove.push(next);
                index = next;
            }
            index += 1;
        }

        remove.dedup();
        for &line in remove.iter().rev() {
            lines.remove(line);
        }
        remove.len()
    }
}

/// The instruction part of an indented line, without any trailing comment.
fn instruction_of(line: &str) -> Option<&str> {
    if !line.starts_with('\t') {
        return None;
    }
    let code = line.split(';').next().unwrap_or("").trim();
    if code.is_empty() || code.starts_with('.') {
        None
    } else {
        Some(code)
    }
}

/// The label a column-0 line defines, if it only defines a label.
fn label_of(line: &str) -> Option<&str> {
    if line.starts_with('\t') || line.starts_with(';') || line.is_empty() {
        return None;
    }
    let code = line.split(';').next().unwrap_or("").trim();
    let mut words = code.split_whitespace();
    let label = words.next()?;
    if words.next().is_some() || label.contains('=') {
        None
    } else {
        Some(label)
    }
}

/// The next line that is neither blank nor a comment.
fn next_code_line(lines: &[String], start: usize) -> Option<usize> {
    (start..lines.len()).find(|&i| {
        let trimmed = lines[i].trim();
        !trimmed.is_empty() && !trimmed.starts_with(';')
    })
}
