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

//! Expression nodes of the program tree.
//!
//! Every expression carries the datatype earlier passes inferred for it,
//! so the code generator never has to guess.

use std::fmt;

use super::{DataType, ScopedName};
use crate::error::Span;

/// An expression.
#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    /// The kind of expression.
    pub kind: ExprKind,
    /// The inferred datatype of the value.
    pub dt: DataType,
    /// The source span of this expression.
    pub span: Span,
}

impl Expr {
    /// Create a new expression.
    pub fn new(kind: ExprKind, dt: DataType, span: Span) -> Self {
        Self { kind, dt, span }
    }

    /// A numeric literal.
    pub fn number(value: f64, dt: DataType, span: Span) -> Self {
        Self::new(ExprKind::Number(value), dt, span)
    }

    /// A reference to a variable, constant or label.
    pub fn identifier(name: ScopedName, dt: DataType, span: Span) -> Self {
        Self::new(ExprKind::Identifier(name), dt, span)
    }

    /// A binary expression; the result type must be supplied.
    pub fn binary(left: Expr, op: BinaryOp, right: Expr, dt: DataType) -> Self {
        let span = left.span.merge(&right.span);
        Self::new(
            ExprKind::Binary {
                left: Box::new(left),
                op,
                right: Box::new(right),
            },
            dt,
            span,
        )
    }

    /// The numeric value if this is a literal.
    pub fn constant_value(&self) -> Option<f64> {
        match &self.kind {
            ExprKind::Number(value) => Some(*value),
            _ => None,
        }
    }

    /// The integer value if this is an integer literal.
    pub fn constant_int(&self) -> Option<i32> {
        match &self.kind {
            ExprKind::Number(value) if self.dt.is_integer() => Some(*value as i32),
            _ => None,
        }
    }

    /// True for a literal.
    pub fn is_constant(&self) -> bool {
        matches!(self.kind, ExprKind::Number(_))
    }

    /// True for a literal zero.
    pub fn is_zero(&self) -> bool {
        self.constant_value() == Some(0.0)
    }

    /// The referenced name if this is a plain identifier.
    pub fn as_identifier(&self) -> Option<&ScopedName> {
        match &self.kind {
            ExprKind::Identifier(name) => Some(name),
            _ => None,
        }
    }

    /// Structural equality, ignoring spans.
    ///
    /// Only side-effect free shapes compare equal; two calls never do.
    pub fn is_same_as(&self, other: &Expr) -> bool {
        match (&self.kind, &other.kind) {
            (ExprKind::Number(a), ExprKind::Number(b)) => a == b && self.dt == other.dt,
            (ExprKind::Identifier(a), ExprKind::Identifier(b)) => a == b,
            (ExprKind::AddressOf(a), ExprKind::AddressOf(b)) => a == b,
            (ExprKind::DirectMemoryRead(a), ExprKind::DirectMemoryRead(b)) => a.is_same_as(b),
            (
                ExprKind::ArrayIndexed { array: a, index: ia },
                ExprKind::ArrayIndexed { array: b, index: ib },
            ) => a == b && ia.is_same_as(ib),
            (
                ExprKind::Prefix { op: oa, operand: a },
                ExprKind::Prefix { op: ob, operand: b },
            ) => oa == ob && a.is_same_as(b),
            (
                ExprKind::Binary {
                    left: la,
                    op: oa,
                    right: ra,
                },
                ExprKind::Binary {
                    left: lb,
                    op: ob,
                    right: rb,
                },
            ) => oa == ob && la.is_same_as(lb) && ra.is_same_as(rb),
            (ExprKind::Typecast { expr: a, .. }, ExprKind::Typecast { expr: b, .. }) => {
                self.dt == other.dt && a.is_same_as(b)
            }
            _ => false,
        }
    }

    /// True if evaluating this expression may call a subroutine.
    pub fn has_calls(&self) -> bool {
        match &self.kind {
            ExprKind::FunctionCall { .. } => true,
            ExprKind::DirectMemoryRead(inner) => inner.has_calls(),
            ExprKind::ArrayIndexed { index, .. } => index.has_calls(),
            ExprKind::Prefix { operand, .. } => operand.has_calls(),
            ExprKind::Binary { left, right, .. } => left.has_calls() || right.has_calls(),
            ExprKind::Typecast { expr, .. } => expr.has_calls(),
            _ => false,
        }
    }
}

/// The kind of expression.
#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    /// A numeric literal. Integers are stored exactly.
    Number(f64),

    /// A variable, constant or memory-mapped variable reference.
    Identifier(ScopedName),

    /// The address of a variable, label or subroutine (`&name`).
    AddressOf(ScopedName),

    /// A byte read from memory (`@(address)`).
    DirectMemoryRead(Box<Expr>),

    /// An array element (`name[index]`).
    ArrayIndexed { array: ScopedName, index: Box<Expr> },

    /// A prefix operation.
    Prefix { op: PrefixOp, operand: Box<Expr> },

    /// A binary operation.
    Binary {
        left: Box<Expr>,
        op: BinaryOp,
        right: Box<Expr>,
    },

    /// A conversion to the expression's datatype.
    Typecast { expr: Box<Expr>, implicit: bool },

    /// A call of a subroutine that returns a value.
    FunctionCall { target: ScopedName, args: Vec<Expr> },
}

/// A binary operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    // Arithmetic
    Add,
    Sub,
    Mul,
    Div,
    Remainder,
    Pow,

    // Bitwise
    BitAnd,
    BitOr,
    BitXor,
    ShiftLeft,
    ShiftRight,

    // Logical
    And,
    Or,
    Xor,

    // Comparison
    Equal,
    NotEqual,
    Less,
    Greater,
    LessEqual,
    GreaterEqual,
}

impl BinaryOp {
    /// Get the precedence of this operator (higher = binds tighter).
    pub fn precedence(&self) -> u8 {
        match self {
            BinaryOp::Or => 1,
            BinaryOp::Xor => 2,
            BinaryOp::And => 3,
            BinaryOp::Equal | BinaryOp::NotEqual => 4,
            BinaryOp::Less | BinaryOp::Greater | BinaryOp::LessEqual | BinaryOp::GreaterEqual => {
                5
            }
            BinaryOp::BitOr => 6,
            BinaryOp::BitXor => 7,
            BinaryOp::BitAnd => 8,
            BinaryOp::ShiftLeft | BinaryOp::ShiftRight => 9,
            BinaryOp::Add | BinaryOp::Sub => 10,
            BinaryOp::Mul | BinaryOp::Div | BinaryOp::Remainder => 11,
            BinaryOp::Pow => 12,
        }
    }

    /// Check if this is a comparison operator.
    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            BinaryOp::Equal
                | BinaryOp::NotEqual
                | BinaryOp::Less
                | BinaryOp::Greater
                | BinaryOp::LessEqual
                | BinaryOp::GreaterEqual
        )
    }

    /// Check if this is a logical operator.
    pub fn is_logical(&self) -> bool {
        matches!(self, BinaryOp::And | BinaryOp::Or | BinaryOp::Xor)
    }

    /// Operators where `a OP b == b OP a` and `(a OP b) OP c == a OP (b OP c)`.
    pub fn is_associative(&self) -> bool {
        matches!(
            self,
            BinaryOp::Add
                | BinaryOp::Mul
                | BinaryOp::BitAnd
                | BinaryOp::BitOr
                | BinaryOp::BitXor
                | BinaryOp::And
                | BinaryOp::Or
                | BinaryOp::Xor
                | BinaryOp::Equal
                | BinaryOp::NotEqual
        )
    }

    /// The comparison that is true exactly when this one is false.
    pub fn inverted(&self) -> Option<BinaryOp> {
        match self {
            BinaryOp::Equal => Some(BinaryOp::NotEqual),
            BinaryOp::NotEqual => Some(BinaryOp::Equal),
            BinaryOp::Less => Some(BinaryOp::GreaterEqual),
            BinaryOp::GreaterEqual => Some(BinaryOp::Less),
            BinaryOp::Greater => Some(BinaryOp::LessEqual),
            BinaryOp::LessEqual => Some(BinaryOp::Greater),
            _ => None,
        }
    }

    /// The comparison that gives the same result with the operands swapped.
    pub fn swapped(&self) -> Option<BinaryOp> {
        match self {
            BinaryOp::Equal => Some(BinaryOp::Equal),
            BinaryOp::NotEqual => Some(BinaryOp::NotEqual),
            BinaryOp::Less => Some(BinaryOp::Greater),
            BinaryOp::Greater => Some(BinaryOp::Less),
            BinaryOp::LessEqual => Some(BinaryOp::GreaterEqual),
            BinaryOp::GreaterEqual => Some(BinaryOp::LessEqual),
            _ => None,
        }
    }

    /// Get a string representation of this operator.
    pub fn as_str(&self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Remainder => "%",
            BinaryOp::Pow => "**",
            BinaryOp::BitAnd => "&",
            BinaryOp::BitOr => "|",
            BinaryOp::BitXor => "^",
            BinaryOp::ShiftLeft => "<<",
            BinaryOp::ShiftRight => ">>",
            BinaryOp::And => "and",
            BinaryOp::Or => "or",
            BinaryOp::Xor => "xor",
            BinaryOp::Equal => "==",
            BinaryOp::NotEqual => "!=",
            BinaryOp::Less => "<",
            BinaryOp::Greater => ">",
            BinaryOp::LessEqual => "<=",
            BinaryOp::GreaterEqual => ">=",
        }
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A prefix operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrefixOp {
    /// Unary plus, a no-op.
    Plus,
    /// Arithmetic negation (`-x`).
    Negate,
    /// Bitwise inversion (`~x`).
    Invert,
    /// Logical not (`not x`).
    Not,
}

impl PrefixOp {
    /// Get a string representation of this operator.
    pub fn as_str(&self) -> &'static str {
        match self {
            PrefixOp::Plus => "+",
            PrefixOp::Negate => "-",
            PrefixOp::Invert => "~",
            PrefixOp::Not => "not",
        }
    }
}

impl fmt::Display for PrefixOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ExprKind::Number(value) => write!(f, "{}", value),
            ExprKind::Identifier(name) => write!(f, "{}", name),
            ExprKind::AddressOf(name) => write!(f, "&{}", name),
            ExprKind::DirectMemoryRead(address) => write!(f, "@({})", address),
            ExprKind::ArrayIndexed { array, index } => write!(f, "{}[{}]", array, index),
            ExprKind::Prefix { op, operand } => match op {
                PrefixOp::Not => write!(f, "not {}", operand),
                _ => write!(f, "{}{}", op, operand),
            },
            ExprKind::Binary { left, op, right } => write!(f, "({} {} {})", left, op, right),
            ExprKind::Typecast { expr, .. } => write!(f, "({} as {})", expr, self.dt),
            ExprKind::FunctionCall { target, args } => {
                write!(f, "{}(", target)?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", arg)?;
                }
                write!(f, ")")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn var(name: &str, dt: DataType) -> Expr {
        Expr::identifier(ScopedName::parse(name), dt, Span::default())
    }

    #[test]
    fn test_inverted_is_involution() {
        for op in [
            BinaryOp::Equal,
            BinaryOp::NotEqual,
            BinaryOp::Less,
            BinaryOp::Greater,
            BinaryOp::LessEqual,
            BinaryOp::GreaterEqual,
        ] {
            let inverted = op.inverted().unwrap();
            assert_eq!(inverted.inverted(), Some(op));
            assert_eq!(op.swapped().unwrap().swapped(), Some(op));
        }
        assert_eq!(BinaryOp::Add.inverted(), None);
    }

    #[test]
    fn test_associativity() {
        assert!(BinaryOp::Add.is_associative());
        assert!(BinaryOp::BitXor.is_associative());
        assert!(!BinaryOp::Sub.is_associative());
        assert!(!BinaryOp::ShiftLeft.is_associative());
    }

    #[test]
    fn test_precedence_order() {
        assert!(BinaryOp::Mul.precedence() > BinaryOp::Add.precedence());
        assert!(BinaryOp::Add.precedence() > BinaryOp::ShiftLeft.precedence());
        assert!(BinaryOp::Less.precedence() > BinaryOp::And.precedence());
    }

    #[test]
    fn test_is_same_as_ignores_spans() {
        let a = var("main.x", DataType::Ubyte);
        let mut b = var("main.x", DataType::Ubyte);
        b.span = Span::new(10, 11);
        assert!(a.is_same_as(&b));
        assert!(!a.is_same_as(&var("main.y", DataType::Ubyte)));

        let call = Expr::new(
            ExprKind::FunctionCall {
                target: ScopedName::parse("main.f"),
                args: vec![],
            },
            DataType::Ubyte,
            Span::default(),
        );
        assert!(!call.is_same_as(&call.clone()));
        assert!(call.has_calls());
    }

    #[test]
    fn test_constant_helpers() {
        let zero = Expr::number(0.0, DataType::Ubyte, Span::default());
        assert!(zero.is_zero());
        assert_eq!(zero.constant_int(), Some(0));
        let half = Expr::number(0.5, DataType::Float, Span::default());
        assert_eq!(half.constant_int(), None);
        assert_eq!(half.constant_value(), Some(0.5));
    }

    #[test]
    fn test_display() {
        let expr = Expr::binary(
            var("main.x", DataType::Ubyte),
            BinaryOp::Add,
            Expr::number(3.0, DataType::Ubyte, Span::default()),
            DataType::Ubyte,
        );
        assert_eq!(expr.to_string(), "(main.x + 3)");
    }
}
