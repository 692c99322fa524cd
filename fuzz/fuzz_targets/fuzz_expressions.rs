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

//! Structured fuzz target: random expressions over typed variables.
//!
//! Every generated program is syntactically valid. Compiling may still fail
//! (division by zero, word shift amounts) but must never panic, and the
//! assembly of every accepted program must assemble.
//!
//! Run with:
//!   cargo +nightly fuzz run fuzz_expressions

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use mos65gen::config::CompilationOptions;

#[derive(Debug, Arbitrary)]
enum Operand {
    Variable(u8),
    Literal(u16),
    Memory(u16),
}

#[derive(Debug, Arbitrary)]
enum Expression {
    Leaf(Operand),
    Binary(Box<Expression>, u8, Box<Expression>),
    Negate(Box<Expression>),
    Invert(Box<Expression>),
}

#[derive(Debug, Arbitrary)]
struct Input {
    word_target: bool,
    in_place: bool,
    expression: Expression,
}

const OPERATORS: [&str; 10] = ["+", "-", "*", "/", "%", "&", "|", "^", "<<", ">>"];

fn render_operand(operand: &Operand, out: &mut String) {
    match operand {
        Operand::Variable(n) => out.push_str(["b1", "b2", "w1", "w2"][usize::from(*n) % 4]),
        Operand::Literal(v) => out.push_str(&v.to_string()),
        Operand::Memory(address) => out.push_str(&format!("@(${:04x})", address)),
    }
}

fn render(expression: &Expression, depth: usize, out: &mut String) {
    match expression {
        Expression::Binary(left, op, right) if depth < 6 => {
            out.push('(');
            render(left, depth + 1, out);
            out.push_str(&format!(" {} ", OPERATORS[usize::from(*op) % OPERATORS.len()]));
            render(right, depth + 1, out);
            out.push(')');
        }
        Expression::Negate(inner) if depth < 6 => {
            out.push_str("-(");
            render(inner, depth + 1, out);
            out.push(')');
        }
        Expression::Invert(inner) if depth < 6 => {
            out.push_str("~(");
            render(inner, depth + 1, out);
            out.push(')');
        }
        Expression::Leaf(operand) => render_operand(operand, out),
        _ => out.push_str("b1"),
    }
}

fuzz_target!(|input: Input| {
    let mut expression = String::new();
    render(&input.expression, 0, &mut expression);
    let target = if input.word_target { "w1" } else { "b1" };
    let cast = if input.word_target { "uword" } else { "ubyte" };
    let statement = if input.in_place {
        format!("{t} = {t} + (({e}) as {c})", t = target, e = expression, c = cast)
    } else {
        format!("{} = ({}) as {}", target, expression, cast)
    };
    let source = format!(
        "main {{\n  ubyte b1\n  ubyte b2\n  uword w1\n  uword w2\n  sub start() {{\n    {}\n  }}\n}}\n",
        statement
    );
    if let Ok(assembly) = mos65gen::compile("fuzz", &source, CompilationOptions::default()) {
        if let Err(e) = mos65gen::assemble(&assembly) {
            panic!("generated assembly does not assemble: {}\n{}", e, assembly.text());
        }
    }
});
