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

//! Statement nodes of the program tree.

use super::{DataType, Expr, ExprKind, RegisterOrPair, ScopedName};
use crate::error::Span;

/// A statement.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    /// The kind of statement.
    pub kind: StatementKind,
    /// The source span of this statement.
    pub span: Span,
}

impl Statement {
    /// Create a new statement.
    pub fn new(kind: StatementKind, span: Span) -> Self {
        Self { kind, span }
    }

    /// True for a `return`.
    pub fn is_return(&self) -> bool {
        matches!(self.kind, StatementKind::Return(_))
    }
}

/// The kind of statement.
#[derive(Debug, Clone, PartialEq)]
pub enum StatementKind {
    /// An assignment.
    Assignment(Assignment),

    /// `target++` or `target--`.
    PostIncrDecr {
        target: AssignTarget,
        dt: DataType,
        increment: bool,
    },

    /// An if statement whose condition is a comparison.
    If(IfElse),

    /// A counted (or endless) loop.
    Repeat(RepeatLoop),

    /// A multi-way dispatch on an integer value.
    When(WhenStatement),

    /// A branch on a CPU status flag (`if_cs`, `if_z`, ...).
    ConditionalBranch(ConditionalBranch),

    /// `goto target`.
    Jump(JumpTarget),

    /// `gosub target`, a call without arguments or result handling.
    GoSub(JumpTarget),

    /// A subroutine call whose result, if any, is discarded.
    FunctionCall { target: ScopedName, args: Vec<Expr> },

    /// `return` with an optional value.
    Return(Option<Expr>),

    /// Literal assembly text.
    InlineAssembly(String),

    /// A label definition.
    Label(String),

    /// A nested statement list without a scope of its own.
    AnonymousScope(Vec<Statement>),

    /// A raw while loop. Earlier passes lower these to jumps.
    While { condition: Expr, body: Vec<Statement> },

    /// A raw do-until loop. Earlier passes lower these to jumps.
    Until { body: Vec<Statement>, condition: Expr },

    /// A raw `break`. Earlier passes replace these with jumps.
    Break,
}

/// An assignment statement.
#[derive(Debug, Clone, PartialEq)]
pub struct Assignment {
    /// Where the value goes.
    pub target: AssignTarget,
    /// The datatype of the target.
    pub dt: DataType,
    /// The value.
    pub value: Expr,
}

/// The target of an assignment.
#[derive(Debug, Clone, PartialEq)]
pub enum AssignTarget {
    /// A named variable.
    Variable(ScopedName),
    /// A memory byte (`@(address)`).
    Memory(Box<Expr>),
    /// An array element.
    ArrayElement { array: ScopedName, index: Box<Expr> },
    /// A CPU register or register pair.
    Register(RegisterOrPair),
}

impl AssignTarget {
    /// True when `expr` reads exactly what this target writes.
    pub fn is_same_as(&self, expr: &Expr) -> bool {
        match (self, &expr.kind) {
            (AssignTarget::Variable(name), ExprKind::Identifier(other)) => name == other,
            (AssignTarget::Memory(address), ExprKind::DirectMemoryRead(other)) => {
                address.is_same_as(other)
            }
            (
                AssignTarget::ArrayElement { array, index },
                ExprKind::ArrayIndexed {
                    array: other,
                    index: other_index,
                },
            ) => array == other && index.is_same_as(other_index),
            _ => false,
        }
    }
}

/// An if statement.
#[derive(Debug, Clone, PartialEq)]
pub struct IfElse {
    /// The guard; a comparison expression.
    pub condition: Expr,
    /// Statements executed when the guard holds.
    pub then_branch: Vec<Statement>,
    /// Statements executed otherwise.
    pub else_branch: Vec<Statement>,
}

/// A repeat loop.
#[derive(Debug, Clone, PartialEq)]
pub struct RepeatLoop {
    /// Number of iterations; `None` loops forever.
    pub count: Option<Expr>,
    /// The loop body.
    pub body: Vec<Statement>,
}

/// A when statement.
#[derive(Debug, Clone, PartialEq)]
pub struct WhenStatement {
    /// The value to dispatch on.
    pub condition: Expr,
    /// The choices in declaration order.
    pub choices: Vec<WhenChoice>,
}

/// One choice of a when statement.
#[derive(Debug, Clone, PartialEq)]
pub struct WhenChoice {
    /// The matching constants; `None` for the else choice.
    pub values: Option<Vec<Expr>>,
    /// The statements of this choice.
    pub body: Vec<Statement>,
    /// The source span of this choice.
    pub span: Span,
}

/// A branch on a status flag.
#[derive(Debug, Clone, PartialEq)]
pub struct ConditionalBranch {
    /// The flag condition.
    pub condition: BranchCondition,
    /// Statements executed when the condition holds.
    pub then_branch: Vec<Statement>,
    /// Statements executed otherwise.
    pub else_branch: Vec<Statement>,
}

/// A CPU status flag condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BranchCondition {
    /// Carry set.
    Cs,
    /// Carry clear.
    Cc,
    /// Zero set (equal).
    Eq,
    /// Zero clear (not equal).
    Ne,
    /// Overflow set.
    Vs,
    /// Overflow clear.
    Vc,
    /// Negative set.
    Mi,
    /// Negative clear.
    Pl,
}

impl BranchCondition {
    /// The condition that holds exactly when this one does not.
    pub fn complement(&self) -> BranchCondition {
        match self {
            BranchCondition::Cs => BranchCondition::Cc,
            BranchCondition::Cc => BranchCondition::Cs,
            BranchCondition::Eq => BranchCondition::Ne,
            BranchCondition::Ne => BranchCondition::Eq,
            BranchCondition::Vs => BranchCondition::Vc,
            BranchCondition::Vc => BranchCondition::Vs,
            BranchCondition::Mi => BranchCondition::Pl,
            BranchCondition::Pl => BranchCondition::Mi,
        }
    }

    /// The branch instruction testing this condition.
    pub fn instruction(&self) -> &'static str {
        match self {
            BranchCondition::Cs => "bcs",
            BranchCondition::Cc => "bcc",
            BranchCondition::Eq => "beq",
            BranchCondition::Ne => "bne",
            BranchCondition::Vs => "bvs",
            BranchCondition::Vc => "bvc",
            BranchCondition::Mi => "bmi",
            BranchCondition::Pl => "bpl",
        }
    }
}

/// The target of a jump or gosub.
#[derive(Debug, Clone, PartialEq)]
pub enum JumpTarget {
    /// A label or subroutine.
    Label(ScopedName),
    /// A variable holding the target address.
    Variable(ScopedName),
    /// A fixed address.
    Address(u16),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_branch_condition_complement() {
        for cond in [
            BranchCondition::Cs,
            BranchCondition::Eq,
            BranchCondition::Vs,
            BranchCondition::Mi,
        ] {
            assert_ne!(cond, cond.complement());
            assert_eq!(cond.complement().complement(), cond);
        }
        assert_eq!(BranchCondition::Ne.instruction(), "bne");
    }

    #[test]
    fn test_target_same_as_expression() {
        let name = ScopedName::parse("main.x");
        let target = AssignTarget::Variable(name.clone());
        let expr = Expr::identifier(name, DataType::Ubyte, Span::default());
        assert!(target.is_same_as(&expr));

        let address = Expr::number(53280.0, DataType::Uword, Span::default());
        let memory = AssignTarget::Memory(Box::new(address.clone()));
        let read = Expr::new(
            ExprKind::DirectMemoryRead(Box::new(address)),
            DataType::Ubyte,
            Span::default(),
        );
        assert!(memory.is_same_as(&read));
        assert!(!memory.is_same_as(&expr));
    }
}
