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

//! Name resolution, typing and lowering of a parsed program.
//!
//! This pass turns the reader's untyped tree into the normalized tree:
//! - Names are resolved to scoped names (subroutine, then block, then global)
//! - Literals get the smallest fitting datatype, or the datatype of the
//!   operand or target they are combined with
//! - Implicit casts widen operands to a common datatype
//! - Constants are folded, including comparisons of two constants
//! - Conditions become comparisons
//! - `while`, `do-until` and `break` are lowered to labels and jumps

use std::collections::{HashMap, HashSet};

use log::trace;

use super::{Initializer, ParsedProgram};
use crate::ast::{
    ArrayElement, AssignTarget, Assignment, BinaryOp, ConditionalBranch, DataType, Expr, ExprKind,
    IfElse, JumpTarget, PrefixOp, Program, RegisterOrPair, RepeatLoop, ScopedName, Statement,
    StatementKind, VarDeclKind, VarInit, WhenChoice, WhenStatement,
};
use crate::error::{CompileError, ErrorCode, Result, Span};

/// What a scoped name refers to.
#[derive(Debug, Clone, PartialEq)]
enum Entry {
    Block,
    Label,
    Subroutine {
        parameters: Vec<DataType>,
        return_type: Option<DataType>,
    },
    Variable {
        dt: DataType,
        kind: VarDeclKind,
    },
}

#[derive(Debug, Default)]
struct LoopContext {
    /// The label after the loop, created on the first `break`.
    end: Option<String>,
}

/// The resolver state.
struct Resolver {
    entries: HashMap<ScopedName, Entry>,
    pending: HashMap<ScopedName, Initializer>,
    values: HashMap<ScopedName, VarInit>,
    evaluating: HashSet<ScopedName>,
    block: ScopedName,
    sub: Option<ScopedName>,
    return_type: Option<DataType>,
    loops: Vec<LoopContext>,
    label_counter: usize,
}

/// Resolve names and types of a parsed program.
pub fn resolve(parsed: ParsedProgram) -> Result<Program> {
    let ParsedProgram {
        mut program,
        initializers,
    } = parsed;
    let mut resolver = Resolver::new(&program, initializers)?;
    resolver.evaluate_initializers()?;

    for block in &mut program.blocks {
        resolver.block = block.scoped_name();
        resolver.sub = None;
        resolver.return_type = None;
        let statements = std::mem::take(&mut block.statements);
        block.statements = resolver.statements(statements)?;
        for sub in &mut block.subroutines {
            trace!("resolving subroutine '{}'", sub.scoped_name);
            resolver.sub = Some(sub.scoped_name.clone());
            resolver.return_type = sub.return_type;
            resolver.loops.clear();
            let statements = std::mem::take(&mut sub.statements);
            sub.statements = resolver.statements(statements)?;
        }
    }

    for block in &mut program.blocks {
        let variables = block
            .variables
            .iter_mut()
            .chain(block.subroutines.iter_mut().flat_map(|s| s.variables.iter_mut()));
        for decl in variables {
            let Some(value) = resolver.values.remove(&decl.scoped_name) else {
                continue;
            };
            if let VarInit::Array(elements) = &value {
                match decl.array_size {
                    Some(size) if size != elements.len() => {
                        return Err(CompileError::new(
                            ErrorCode::TypeMismatch,
                            format!(
                                "array '{}' has size {} but {} initial values",
                                decl.name,
                                size,
                                elements.len()
                            ),
                            decl.span,
                        ))
                    }
                    _ if decl.dt.max_array_length().is_some_and(|max| elements.len() > max) => {
                        return Err(CompileError::new(
                            ErrorCode::ValueOutOfRange,
                            format!("array '{}' has too many initial values", decl.name),
                            decl.span,
                        ))
                    }
                    _ => decl.array_size = Some(elements.len()),
                }
            }
            decl.value = Some(value);
        }
    }
    Ok(program)
}

impl Resolver {
    /// Index every declaration of `program`.
    fn new(program: &Program, pending: HashMap<ScopedName, Initializer>) -> Result<Self> {
        let mut entries = HashMap::new();
        for block in &program.blocks {
            define(&mut entries, block.scoped_name(), Entry::Block, block.span)?;
            let scope = block.scoped_name();
            for decl in &block.variables {
                let entry = Entry::Variable {
                    dt: decl.dt,
                    kind: decl.kind,
                };
                define(&mut entries, decl.scoped_name.clone(), entry, decl.span)?;
            }
            define_labels(&mut entries, &scope, &block.statements)?;
            for sub in &block.subroutines {
                let entry = Entry::Subroutine {
                    parameters: sub.parameters.iter().map(|p| p.dt).collect(),
                    return_type: sub.return_type,
                };
                define(&mut entries, sub.scoped_name.clone(), entry, sub.span)?;
                for decl in &sub.variables {
                    let entry = Entry::Variable {
                        dt: decl.dt,
                        kind: decl.kind,
                    };
                    define(&mut entries, decl.scoped_name.clone(), entry, decl.span)?;
                }
                define_labels(&mut entries, &sub.scoped_name, &sub.statements)?;
            }
        }
        Ok(Self {
            entries,
            pending,
            values: HashMap::new(),
            evaluating: HashSet::new(),
            block: ScopedName::new(Vec::new()),
            sub: None,
            return_type: None,
            loops: Vec::new(),
            label_counter: 0,
        })
    }

    fn evaluate_initializers(&mut self) -> Result<()> {
        let mut names: Vec<ScopedName> = self.pending.keys().cloned().collect();
        names.sort();
        for name in names {
            self.evaluate(&name)?;
        }
        Ok(())
    }

    /// Fold the initializer of `name` into a value, resolving it in the declaring scope.
    fn evaluate(&mut self, name: &ScopedName) -> Result<()> {
        let Some(initializer) = self.pending.remove(name) else {
            return Ok(());
        };
        let (dt, kind) = match self.entries.get(name) {
            Some(Entry::Variable { dt, kind }) => (*dt, *kind),
            _ => {
                return Err(CompileError::internal(
                    format!("initializer for unknown variable '{}'", name),
                    Span::default(),
                ))
            }
        };
        self.evaluating.insert(name.clone());
        let saved = (self.block.clone(), self.sub.clone(), self.return_type);
        self.block = ScopedName::new(name.parts()[..1].to_vec());
        self.sub = (name.len() > 2).then(|| name.scope());
        let value = self.initial_value(name, dt, kind, initializer);
        (self.block, self.sub, self.return_type) = saved;
        self.evaluating.remove(name);
        let value = value?;
        self.values.insert(name.clone(), value);
        Ok(())
    }

    fn initial_value(
        &mut self,
        name: &ScopedName,
        dt: DataType,
        kind: VarDeclKind,
        initializer: Initializer,
    ) -> Result<VarInit> {
        match initializer {
            Initializer::Value(expr) => {
                let span = expr.span;
                let expr = self.expr(expr)?;
                let target = if kind == VarDeclKind::Memory {
                    DataType::Uword
                } else {
                    dt
                };
                let value = self.coerce(expr, target)?;
                value.constant_value().map(VarInit::Number).ok_or_else(|| {
                    CompileError::new(
                        ErrorCode::TypeMismatch,
                        format!("the value of '{}' must be a constant", name.name()),
                        span,
                    )
                })
            }
            Initializer::Array(elements) => {
                let element_dt = dt.element_type().ok_or_else(|| {
                    CompileError::internal(format!("'{}' is not an array", name), Span::default())
                })?;
                let mut values = Vec::with_capacity(elements.len());
                for element in elements {
                    let span = element.span;
                    let element = self.expr(element)?;
                    let value = match element.kind {
                        ExprKind::AddressOf(target) if element_dt == DataType::Uword => ArrayElement::AddressOf(target),
                        _ => match self.coerce(element, element_dt)?.constant_value() {
                            Some(value) => ArrayElement::Number(value),
                            None => {
                                return Err(CompileError::new(
                                    ErrorCode::TypeMismatch,
                                    "array elements must be constants or addresses",
                                    span,
                                ))
                            }
                        },
                    };
                    values.push(value);
                }
                Ok(VarInit::Array(values))
            }
        }
    }

    /// The folded value of the constant `name`.
    fn constant(&mut self, name: &ScopedName, span: Span) -> Result<f64> {
        if self.evaluating.contains(name) {
            return Err(CompileError::new(
                ErrorCode::UndefinedName,
                format!("constant '{}' is defined in terms of itself", name),
                span,
            ));
        }
        self.evaluate(name)?;
        match self.values.get(name) {
            Some(VarInit::Number(value)) => Ok(*value),
            _ => Err(CompileError::internal(
                format!("constant '{}' has no value", name),
                span,
            )),
        }
    }

    /// Find the declaration `name` refers to from the current scope.
    fn lookup(&self, name: &ScopedName, span: Span) -> Result<(ScopedName, Entry)> {
        let nested = |scope: &ScopedName| {
            ScopedName::new(scope.parts().iter().chain(name.parts()).cloned().collect())
        };
        let candidates = self
            .sub
            .iter()
            .map(nested)
            .chain(std::iter::once(nested(&self.block)))
            .chain(std::iter::once(name.clone()));
        for candidate in candidates {
            if let Some(entry) = self.entries.get(&candidate) {
                return Ok((candidate, entry.clone()));
            }
        }
        Err(CompileError::new(
            ErrorCode::UndefinedName,
            format!("undefined name '{}'", name),
            span,
        ))
    }

    fn subroutine(
        &self,
        name: &ScopedName,
        span: Span,
    ) -> Result<(ScopedName, Vec<DataType>, Option<DataType>)> {
        match self.lookup(name, span)? {
            (
                scoped,
                Entry::Subroutine {
                    parameters,
                    return_type,
                },
            ) => Ok((scoped, parameters, return_type)),
            _ => Err(CompileError::new(
                ErrorCode::TypeMismatch,
                format!("'{}' is not a subroutine", name),
                span,
            )),
        }
    }

    /// The array or string `name` and its element type.
    fn array(&self, name: &ScopedName, span: Span) -> Result<(ScopedName, DataType)> {
        match self.lookup(name, span)? {
            (scoped, Entry::Variable { dt: DataType::Str, .. }) => Ok((scoped, DataType::Ubyte)),
            (scoped, Entry::Variable { dt, .. }) if dt.is_array() => {
                Ok((scoped, dt.element_type().unwrap_or(DataType::Ubyte)))
            }
            _ => Err(CompileError::new(
                ErrorCode::TypeMismatch,
                format!("'{}' is not an array", name),
                span,
            )),
        }
    }

    fn local_label(&self, label: &str) -> ScopedName {
        self.sub.as_ref().unwrap_or(&self.block).child(label)
    }

    fn next_label_number(&mut self) -> usize {
        self.label_counter += 1;
        self.label_counter
    }

    // ========================================
    // Expressions
    // ========================================

    fn expr(&mut self, expr: Expr) -> Result<Expr> {
        let span = expr.span;
        match expr.kind {
            ExprKind::Number(value) if expr.dt == DataType::Float => Ok(Expr::number(value, DataType::Float, span)),
            ExprKind::Number(value) => integer_literal(value, span),
            ExprKind::Identifier(name) => match self.lookup(&name, span)? {
                (
                    scoped,
                    Entry::Variable {
                        dt,
                        kind: VarDeclKind::Const,
                    },
                ) => {
                    let value = self.constant(&scoped, span)?;
                    Ok(Expr::number(value, dt, span))
                }
                (scoped, Entry::Variable { dt, .. }) => Ok(Expr::identifier(scoped, dt, span)),
                _ => Err(CompileError::new(
                    ErrorCode::TypeMismatch,
                    format!("'{}' is not a variable", name),
                    span,
                )
                .with_hint(format!("use '&{}' for its address", name))),
            },
            ExprKind::AddressOf(name) => match self.lookup(&name, span)? {
                (_, Entry::Block) | (_, Entry::Variable { kind: VarDeclKind::Const, .. }) => Err(CompileError::new(
                    ErrorCode::TypeMismatch,
                    format!("'{}' has no address", name),
                    span,
                )),
                (scoped, _) => Ok(Expr::new(ExprKind::AddressOf(scoped), DataType::Uword, span)),
            },
            ExprKind::DirectMemoryRead(address) => {
                let address = self.expr(*address)?;
                let address = self.coerce(address, DataType::Uword)?;
                Ok(Expr::new(
                    ExprKind::DirectMemoryRead(Box::new(address)),
                    DataType::Ubyte,
                    span,
                ))
            }
            ExprKind::ArrayIndexed { array, index } => {
                let (array, element) = self.array(&array, span)?;
                let index = self.index(*index)?;
                Ok(Expr::new(
                    ExprKind::ArrayIndexed {
                        array,
                        index: Box::new(index),
                    },
                    element,
                    span,
                ))
            }
            ExprKind::Prefix { op, operand } => self.prefix(op, *operand, span),
            ExprKind::Binary { left, op, right } => self.binary(*left, op, *right, span),
            ExprKind::Typecast { expr: inner, .. } => {
                let inner = self.expr(*inner)?;
                cast(inner, expr.dt, span)
            }
            ExprKind::FunctionCall { target, args } => {
                let (target, parameters, return_type) = self.subroutine(&target, span)?;
                let args = self.arguments(&target, &parameters, args, span)?;
                let dt = return_type.ok_or_else(|| {
                    CompileError::new(
                        ErrorCode::TypeMismatch,
                        format!("'{}' does not return a value", target),
                        span,
                    )
                })?;
                Ok(Expr::new(ExprKind::FunctionCall { target, args }, dt, span))
            }
        }
    }

    fn index(&mut self, index: Expr) -> Result<Expr> {
        let index = self.expr(index)?;
        if !index.dt.is_integer() {
            return Err(CompileError::new(
                ErrorCode::TypeMismatch,
                format!("array index must be an integer, not {}", index.dt),
                index.span,
            ));
        }
        if index.constant_value().is_some_and(|i| i < 0.0) {
            return Err(CompileError::new(
                ErrorCode::ValueOutOfRange,
                "array index can't be negative",
                index.span,
            ));
        }
        Ok(index)
    }

    fn arguments(
        &mut self,
        target: &ScopedName,
        parameters: &[DataType],
        args: Vec<Expr>,
        span: Span,
    ) -> Result<Vec<Expr>> {
        if args.len() != parameters.len() {
            return Err(CompileError::new(
                ErrorCode::ArgumentCount,
                format!(
                    "'{}' takes {} argument(s), {} given",
                    target,
                    parameters.len(),
                    args.len()
                ),
                span,
            ));
        }
        args.into_iter()
            .zip(parameters)
            .map(|(arg, dt)| {
                let arg = self.expr(arg)?;
                self.coerce(arg, *dt)
            })
            .collect()
    }

    fn prefix(&mut self, op: PrefixOp, operand: Expr, span: Span) -> Result<Expr> {
        let operand = self.expr(operand)?;
        let dt = operand.dt;
        if !dt.is_numeric() {
            return Err(CompileError::new(
                ErrorCode::TypeMismatch,
                format!("operator '{}' cannot be applied to {}", op, dt),
                span,
            ));
        }
        let constant = operand.constant_value();
        let result_dt = match op {
            PrefixOp::Plus => return Ok(operand),
            PrefixOp::Negate => {
                if let Some(value) = constant {
                    return if dt == DataType::Float {
                        Ok(Expr::number(-value, DataType::Float, span))
                    } else {
                        integer_literal(-value, span)
                    };
                }
                dt
            }
            PrefixOp::Invert => {
                if dt == DataType::Float {
                    return Err(CompileError::new(
                        ErrorCode::TypeMismatch,
                        "'~' cannot be applied to a float",
                        span,
                    ));
                }
                if let Some(value) = constant {
                    return Ok(Expr::number(wrap(!(value as i64), dt), dt, span));
                }
                dt
            }
            PrefixOp::Not => {
                if let Some(value) = constant {
                    return Ok(Expr::number(f64::from(u8::from(value == 0.0)), DataType::Ubyte, span));
                }
                DataType::Ubyte
            }
        };
        Ok(Expr::new(
            ExprKind::Prefix {
                op,
                operand: Box::new(operand),
            },
            result_dt,
            span,
        ))
    }

    fn binary(&mut self, left: Expr, op: BinaryOp, right: Expr, span: Span) -> Result<Expr> {
        let left = self.expr(left)?;
        let right = self.expr(right)?;

        if op.is_comparison() && left.dt == DataType::Str && right.dt == DataType::Str {
            return Ok(Expr::new(binary_kind(left, op, right), DataType::Ubyte, span));
        }
        let left = as_address(left);
        let right = as_address(right);
        if !left.dt.is_numeric() || !right.dt.is_numeric() {
            return Err(CompileError::new(
                ErrorCode::TypeMismatch,
                format!("operator '{}' cannot be applied to {} and {}", op, left.dt, right.dt),
                span,
            ));
        }

        if op.is_logical() {
            if let (Some(l), Some(r)) = (left.constant_value(), right.constant_value()) {
                let (l, r) = (l != 0.0, r != 0.0);
                let result = match op {
                    BinaryOp::And => l && r,
                    BinaryOp::Or => l || r,
                    _ => l != r,
                };
                return Ok(Expr::number(f64::from(u8::from(result)), DataType::Ubyte, span));
            }
            return Ok(Expr::new(binary_kind(left, op, right), DataType::Ubyte, span));
        }

        let (left, right) = adopt_literals(left, right);
        let integer_only = matches!(
            op,
            BinaryOp::BitAnd
                | BinaryOp::BitOr
                | BinaryOp::BitXor
                | BinaryOp::ShiftLeft
                | BinaryOp::ShiftRight
                | BinaryOp::Remainder
        );
        if integer_only && (left.dt == DataType::Float || right.dt == DataType::Float) {
            return Err(CompileError::new(
                ErrorCode::TypeMismatch,
                format!("operator '{}' needs integer operands", op),
                span,
            ));
        }

        if matches!(op, BinaryOp::ShiftLeft | BinaryOp::ShiftRight) {
            if let (Some(l), Some(r)) = (left.constant_value(), right.constant_value()) {
                if let Some(folded) = fold(op, l, r, left.dt) {
                    return number_of_type(folded, left.dt == DataType::Float, span);
                }
            }
            let right = match right.constant_value() {
                Some(amount) if DataType::Ubyte.contains(amount) => Expr::number(amount, DataType::Ubyte, right.span),
                _ => right,
            };
            let dt = left.dt;
            return Ok(Expr::new(binary_kind(left, op, right), dt, span));
        }

        let common = if op.is_comparison() {
            comparison_type(left.dt, right.dt)
        } else {
            common_type(left.dt, right.dt)
        };
        if let (Some(l), Some(r)) = (left.constant_value(), right.constant_value()) {
            if let Some(folded) = fold(op, l, r, common) {
                return if op.is_comparison() {
                    Ok(Expr::number(folded, DataType::Ubyte, span))
                } else {
                    number_of_type(folded, common == DataType::Float, span)
                };
            }
        }
        let left = convert(left, common);
        let right = convert(right, common);
        let dt = if op.is_comparison() { DataType::Ubyte } else { common };
        Ok(Expr::new(binary_kind(left, op, right), dt, span))
    }

    /// Implicitly convert `expr` to `dt` for an assignment, argument or return.
    ///
    /// Widening is implicit; narrowing and float to integer need an `as` cast.
    fn coerce(&self, expr: Expr, dt: DataType) -> Result<Expr> {
        let expr = if dt == DataType::Uword { as_address(expr) } else { expr };
        if expr.dt == dt {
            return Ok(expr);
        }
        let mismatch = |expr: &Expr| {
            CompileError::new(
                ErrorCode::TypeMismatch,
                format!("a {} value can't be used where {} is expected", expr.dt, dt),
                expr.span,
            )
        };
        if !dt.is_numeric() || !expr.dt.is_numeric() {
            return Err(mismatch(&expr));
        }
        if let Some(value) = expr.constant_value() {
            if dt == DataType::Float {
                return Ok(Expr::number(value, dt, expr.span));
            }
            if value.fract() != 0.0 {
                return Err(mismatch(&expr).with_hint("use an explicit 'as' cast"));
            }
            if !dt.contains(value) {
                return Err(CompileError::new(
                    ErrorCode::ValueOutOfRange,
                    format!("value {} doesn't fit in {}", value, dt),
                    expr.span,
                ));
            }
            return Ok(Expr::number(value, dt, expr.span));
        }
        if expr.dt == DataType::Float || (dt != DataType::Float && expr.dt.larger_than(dt)) {
            return Err(mismatch(&expr).with_hint("use an explicit 'as' cast"));
        }
        Ok(implicit_cast(expr, dt))
    }

    /// Turn a condition into a comparison.
    fn condition(&self, expr: Expr) -> Result<Expr> {
        let (span, dt) = (expr.span, expr.dt);
        match expr.kind {
            ExprKind::Binary { left, op, right } if op.is_comparison() => {
                Ok(Expr::new(ExprKind::Binary { left, op, right }, dt, span))
            }
            ExprKind::Prefix {
                op: PrefixOp::Not,
                operand,
            } => Ok(inverted(self.condition(*operand)?)),
            kind => {
                if !dt.is_numeric() {
                    return Err(CompileError::new(
                        ErrorCode::TypeMismatch,
                        format!("a {} value can't be used as a condition", dt),
                        span,
                    ));
                }
                let zero = Expr::number(0.0, dt, span);
                Ok(Expr::binary(Expr::new(kind, dt, span), BinaryOp::NotEqual, zero, DataType::Ubyte))
            }
        }
    }

    // ========================================
    // Statements
    // ========================================

    fn statements(&mut self, statements: Vec<Statement>) -> Result<Vec<Statement>> {
        let mut resolved = Vec::with_capacity(statements.len());
        for statement in statements {
            self.statement(statement, &mut resolved)?;
        }
        Ok(resolved)
    }

    fn statement(&mut self, statement: Statement, out: &mut Vec<Statement>) -> Result<()> {
        let span = statement.span;
        let kind = match statement.kind {
            StatementKind::Assignment(assignment) => {
                let (target, dt) = self.target(assignment.target, span)?;
                let value = self.expr(assignment.value)?;
                let value = self.coerce(value, dt)?;
                StatementKind::Assignment(Assignment { target, dt, value })
            }
            StatementKind::PostIncrDecr { target, increment, .. } => {
                let (target, dt) = self.target(target, span)?;
                if !dt.is_numeric() {
                    return Err(CompileError::new(
                        ErrorCode::TypeMismatch,
                        format!("can't increment or decrement a {}", dt),
                        span,
                    ));
                }
                StatementKind::PostIncrDecr {
                    target,
                    dt,
                    increment,
                }
            }
            StatementKind::If(ifelse) => return self.if_statement(ifelse, span, out),
            StatementKind::Repeat(repeat) => {
                let count = match repeat.count {
                    Some(count) => {
                        let count = self.expr(count)?;
                        if !count.dt.is_integer() {
                            return Err(CompileError::new(
                                ErrorCode::TypeMismatch,
                                format!("repeat count must be an integer, not {}", count.dt),
                                count.span,
                            ));
                        }
                        Some(count)
                    }
                    None => None,
                };
                self.loops.push(LoopContext::default());
                let body = self.statements(repeat.body);
                let context = self.loops.pop().unwrap_or_default();
                out.push(Statement::new(
                    StatementKind::Repeat(RepeatLoop { count, body: body? }),
                    span,
                ));
                if let Some(end) = context.end {
                    out.push(Statement::new(StatementKind::Label(end), span));
                }
                return Ok(());
            }
            StatementKind::When(when) => StatementKind::When(self.when_statement(when)?),
            StatementKind::ConditionalBranch(branch) => StatementKind::ConditionalBranch(ConditionalBranch {
                condition: branch.condition,
                then_branch: self.statements(branch.then_branch)?,
                else_branch: self.statements(branch.else_branch)?,
            }),
            StatementKind::Jump(target) => StatementKind::Jump(self.jump_target(target, span)?),
            StatementKind::GoSub(target) => StatementKind::GoSub(self.jump_target(target, span)?),
            StatementKind::FunctionCall { target, args } => {
                let (target, parameters, _) = self.subroutine(&target, span)?;
                let args = self.arguments(&target, &parameters, args, span)?;
                StatementKind::FunctionCall { target, args }
            }
            StatementKind::Return(value) => StatementKind::Return(self.return_value(value, span)?),
            StatementKind::AnonymousScope(body) => StatementKind::AnonymousScope(self.statements(body)?),
            StatementKind::While { condition, body } => return self.while_loop(condition, body, span, out),
            StatementKind::Until { body, condition } => return self.until_loop(body, condition, span, out),
            StatementKind::Break => {
                let counter = &mut self.label_counter;
                let context = self.loops.last_mut().ok_or_else(|| {
                    CompileError::new(ErrorCode::BreakOutsideLoop, "'break' outside of a loop", span)
                })?;
                let end = context
                    .end
                    .get_or_insert_with(|| {
                        *counter += 1;
                        format!("prog8_loopend_{}", counter)
                    })
                    .clone();
                StatementKind::Jump(JumpTarget::Label(self.local_label(&end)))
            }
            kind @ (StatementKind::InlineAssembly(_) | StatementKind::Label(_)) => kind,
        };
        out.push(Statement::new(kind, span));
        Ok(())
    }

    fn target(&mut self, target: AssignTarget, span: Span) -> Result<(AssignTarget, DataType)> {
        match target {
            AssignTarget::Variable(name) => match self.lookup(&name, span)? {
                (_, Entry::Variable { kind: VarDeclKind::Const, .. }) => Err(CompileError::new(
                    ErrorCode::InvalidAssignmentTarget,
                    format!("can't assign to constant '{}'", name),
                    span,
                )),
                (scoped, Entry::Variable { dt, .. }) => Ok((AssignTarget::Variable(scoped), dt)),
                _ => Err(CompileError::new(
                    ErrorCode::InvalidAssignmentTarget,
                    format!("'{}' is not a variable", name),
                    span,
                )),
            },
            AssignTarget::Memory(address) => {
                let address = self.expr(*address)?;
                let address = self.coerce(address, DataType::Uword)?;
                Ok((AssignTarget::Memory(Box::new(address)), DataType::Ubyte))
            }
            AssignTarget::ArrayElement { array, index } => {
                let (array, element) = self.array(&array, span)?;
                let index = self.index(*index)?;
                Ok((
                    AssignTarget::ArrayElement {
                        array,
                        index: Box::new(index),
                    },
                    element,
                ))
            }
            AssignTarget::Register(register) => Ok((AssignTarget::Register(register), register_type(register))),
        }
    }

    fn if_statement(&mut self, ifelse: IfElse, span: Span, out: &mut Vec<Statement>) -> Result<()> {
        let condition = self.expr(ifelse.condition)?;
        let then_branch = self.statements(ifelse.then_branch)?;
        let else_branch = self.statements(ifelse.else_branch)?;
        if let Some(value) = condition.constant_value() {
            trace!("if condition is always {}", value != 0.0);
            let taken = if value != 0.0 { then_branch } else { else_branch };
            if !taken.is_empty() {
                out.push(Statement::new(StatementKind::AnonymousScope(taken), span));
            }
            return Ok(());
        }
        let condition = self.condition(condition)?;
        out.push(Statement::new(
            StatementKind::If(IfElse {
                condition,
                then_branch,
                else_branch,
            }),
            span,
        ));
        Ok(())
    }

    fn when_statement(&mut self, when: WhenStatement) -> Result<WhenStatement> {
        let condition = self.expr(when.condition)?;
        if !condition.dt.is_integer() {
            return Err(CompileError::new(
                ErrorCode::TypeMismatch,
                format!("when value must be an integer, not {}", condition.dt),
                condition.span,
            ));
        }
        let mut choices = Vec::with_capacity(when.choices.len());
        for choice in when.choices {
            let values = match choice.values {
                Some(values) => {
                    let mut resolved = Vec::with_capacity(values.len());
                    for value in values {
                        let value = self.expr(value)?;
                        if !value.is_constant() {
                            return Err(CompileError::new(
                                ErrorCode::TypeMismatch,
                                "when choice values must be constants",
                                value.span,
                            ));
                        }
                        resolved.push(self.coerce(value, condition.dt)?);
                    }
                    Some(resolved)
                }
                None => None,
            };
            choices.push(WhenChoice {
                values,
                body: self.statements(choice.body)?,
                span: choice.span,
            });
        }
        Ok(WhenStatement { condition, choices })
    }

    fn jump_target(&self, target: JumpTarget, span: Span) -> Result<JumpTarget> {
        let JumpTarget::Label(name) = target else {
            return Ok(target);
        };
        match self.lookup(&name, span)? {
            (scoped, Entry::Label | Entry::Subroutine { .. }) => Ok(JumpTarget::Label(scoped)),
            (
                scoped,
                Entry::Variable {
                    dt: DataType::Uword,
                    kind: VarDeclKind::Var | VarDeclKind::Memory,
                },
            ) => Ok(JumpTarget::Variable(scoped)),
            _ => Err(CompileError::new(
                ErrorCode::TypeMismatch,
                format!("can't jump to '{}'", name),
                span,
            )),
        }
    }

    fn return_value(&mut self, value: Option<Expr>, span: Span) -> Result<Option<Expr>> {
        match (value, self.return_type) {
            (Some(value), Some(dt)) => {
                let value = self.expr(value)?;
                self.coerce(value, dt).map(Some)
            }
            (None, None) => Ok(None),
            (Some(_), None) => Err(CompileError::new(
                ErrorCode::TypeMismatch,
                "this subroutine doesn't return a value",
                span,
            )),
            (None, Some(dt)) => Err(CompileError::new(
                ErrorCode::TypeMismatch,
                format!("expected a {} return value", dt),
                span,
            )),
        }
    }

    fn while_loop(&mut self, condition: Expr, body: Vec<Statement>, span: Span, out: &mut Vec<Statement>) -> Result<()> {
        let number = self.next_label_number();
        let start = format!("prog8_whileloop_{}", number);
        let end = format!("prog8_whileend_{}", number);
        let condition = self.expr(condition)?;
        self.loops.push(LoopContext {
            end: Some(end.clone()),
        });
        let body = self.statements(body);
        self.loops.pop();
        let body = body?;

        let exit = match condition.constant_value() {
            Some(value) if value == 0.0 => return Ok(()),
            Some(_) => None,
            None => Some(inverted(self.condition(condition)?)),
        };
        out.push(Statement::new(StatementKind::Label(start.clone()), span));
        if let Some(exit) = exit {
            out.push(Statement::new(
                StatementKind::If(IfElse {
                    condition: exit,
                    then_branch: vec![Statement::new(
                        StatementKind::Jump(JumpTarget::Label(self.local_label(&end))),
                        span,
                    )],
                    else_branch: Vec::new(),
                }),
                span,
            ));
        }
        out.extend(body);
        out.push(Statement::new(
            StatementKind::Jump(JumpTarget::Label(self.local_label(&start))),
            span,
        ));
        out.push(Statement::new(StatementKind::Label(end), span));
        Ok(())
    }

    fn until_loop(&mut self, body: Vec<Statement>, condition: Expr, span: Span, out: &mut Vec<Statement>) -> Result<()> {
        let number = self.next_label_number();
        let start = format!("prog8_untilloop_{}", number);
        let end = format!("prog8_untilend_{}", number);
        self.loops.push(LoopContext {
            end: Some(end.clone()),
        });
        let body = self.statements(body);
        self.loops.pop();
        let body = body?;
        let condition = self.expr(condition)?;

        out.push(Statement::new(StatementKind::Label(start.clone()), span));
        out.extend(body);
        let again = Statement::new(
            StatementKind::Jump(JumpTarget::Label(self.local_label(&start))),
            span,
        );
        match condition.constant_value() {
            Some(value) if value != 0.0 => {}
            Some(_) => out.push(again),
            None => out.push(Statement::new(
                StatementKind::If(IfElse {
                    condition: inverted(self.condition(condition)?),
                    then_branch: vec![again],
                    else_branch: Vec::new(),
                }),
                span,
            )),
        }
        out.push(Statement::new(StatementKind::Label(end), span));
        Ok(())
    }
}

fn define(entries: &mut HashMap<ScopedName, Entry>, name: ScopedName, entry: Entry, span: Span) -> Result<()> {
    if entries.contains_key(&name) {
        return Err(CompileError::new(
            ErrorCode::DuplicateDefinition,
            format!("'{}' is already defined", name),
            span,
        ));
    }
    entries.insert(name, entry);
    Ok(())
}

fn define_labels(entries: &mut HashMap<ScopedName, Entry>, scope: &ScopedName, statements: &[Statement]) -> Result<()> {
    for statement in statements {
        match &statement.kind {
            StatementKind::Label(name) => define(entries, scope.child(name), Entry::Label, statement.span)?,
            StatementKind::AnonymousScope(body)
            | StatementKind::While { body, .. }
            | StatementKind::Until { body, .. } => define_labels(entries, scope, body)?,
            StatementKind::Repeat(repeat) => define_labels(entries, scope, &repeat.body)?,
            StatementKind::If(IfElse {
                then_branch,
                else_branch,
                ..
            })
            | StatementKind::ConditionalBranch(ConditionalBranch {
                then_branch,
                else_branch,
                ..
            }) => {
                define_labels(entries, scope, then_branch)?;
                define_labels(entries, scope, else_branch)?;
            }
            StatementKind::When(when) => {
                for choice in &when.choices {
                    define_labels(entries, scope, &choice.body)?;
                }
            }
            _ => {}
        }
    }
    Ok(())
}

fn binary_kind(left: Expr, op: BinaryOp, right: Expr) -> ExprKind {
    ExprKind::Binary {
        left: Box::new(left),
        op,
        right: Box::new(right),
    }
}

/// The smallest integer type holding `value`.
fn integer_literal(value: f64, span: Span) -> Result<Expr> {
    [DataType::Ubyte, DataType::Byte, DataType::Uword, DataType::Word]
        .into_iter()
        .find(|dt| dt.contains(value))
        .map(|dt| Expr::number(value, dt, span))
        .ok_or_else(|| {
            CompileError::new(
                ErrorCode::ValueOutOfRange,
                format!("integer {} is out of range", value),
                span,
            )
        })
}

fn number_of_type(value: f64, float: bool, span: Span) -> Result<Expr> {
    if float {
        Ok(Expr::number(value, DataType::Float, span))
    } else {
        integer_literal(value, span)
    }
}

/// Wrap an integer to the range of `dt`.
fn wrap(value: i64, dt: DataType) -> f64 {
    match dt {
        DataType::Ubyte => f64::from(value as u8),
        DataType::Byte => f64::from(value as i8),
        DataType::Uword => f64::from(value as u16),
        DataType::Word => f64::from(value as i16),
        _ => value as f64,
    }
}

fn convert_constant(value: f64, dt: DataType) -> f64 {
    if dt == DataType::Float {
        value
    } else {
        wrap(value.trunc() as i64, dt)
    }
}

fn implicit_cast(expr: Expr, dt: DataType) -> Expr {
    let span = expr.span;
    Expr::new(
        ExprKind::Typecast {
            expr: Box::new(expr),
            implicit: true,
        },
        dt,
        span,
    )
}

/// Convert an operand to the common datatype of a binary expression.
fn convert(expr: Expr, dt: DataType) -> Expr {
    if expr.dt == dt {
        return expr;
    }
    match expr.constant_value() {
        Some(value) => Expr::number(convert_constant(value, dt), dt, expr.span),
        None => implicit_cast(expr, dt),
    }
}

/// An explicit `as` cast.
fn cast(expr: Expr, dt: DataType, span: Span) -> Result<Expr> {
    let expr = if dt == DataType::Uword { as_address(expr) } else { expr };
    if expr.dt == dt {
        return Ok(expr);
    }
    if !expr.dt.is_numeric() || !dt.is_numeric() {
        return Err(CompileError::new(
            ErrorCode::TypeMismatch,
            format!("can't cast {} to {}", expr.dt, dt),
            span,
        ));
    }
    if let Some(value) = expr.constant_value() {
        return Ok(Expr::number(convert_constant(value, dt), dt, span));
    }
    Ok(Expr::new(
        ExprKind::Typecast {
            expr: Box::new(expr),
            implicit: false,
        },
        dt,
        span,
    ))
}

/// Strings and arrays used as numbers stand for their address.
fn as_address(expr: Expr) -> Expr {
    match expr.kind {
        ExprKind::Identifier(name) if expr.dt.is_pass_by_reference() => {
            Expr::new(ExprKind::AddressOf(name), DataType::Uword, expr.span)
        }
        kind => Expr::new(kind, expr.dt, expr.span),
    }
}

/// Give integer literals the datatype of the other operand when they fit in it.
fn adopt_literals(left: Expr, right: Expr) -> (Expr, Expr) {
    fn adopt(literal: Expr, dt: DataType) -> Expr {
        match literal.constant_value() {
            Some(value) if literal.dt.is_integer() && dt == DataType::Float => Expr::number(value, dt, literal.span),
            Some(value) if literal.dt.is_integer() && dt.is_integer() && dt.contains(value) => {
                Expr::number(value, dt, literal.span)
            }
            _ => literal,
        }
    }
    match (left.is_constant(), right.is_constant()) {
        (true, false) => {
            let dt = right.dt;
            (adopt(left, dt), right)
        }
        (false, true) => {
            let dt = left.dt;
            (left, adopt(right, dt))
        }
        _ => (left, right),
    }
}

/// The datatype both operands of an arithmetic operation are converted to.
fn common_type(left: DataType, right: DataType) -> DataType {
    if left == right {
        left
    } else if left == DataType::Float || right == DataType::Float {
        DataType::Float
    } else if right.larger_than(left) {
        right
    } else {
        left
    }
}

/// Like [`common_type`], but mixed signedness compares as signed words.
fn comparison_type(left: DataType, right: DataType) -> DataType {
    let common = common_type(left, right);
    if common.is_integer() && left.is_signed() != right.is_signed() {
        DataType::Word
    } else {
        common
    }
}

/// Fold an operation on two constants; `None` when it has to happen at runtime.
fn fold(op: BinaryOp, left: f64, right: f64, dt: DataType) -> Option<f64> {
    let float = dt == DataType::Float;
    let (l, r) = (left as i64, right as i64);
    let value = match op {
        BinaryOp::Add => left + right,
        BinaryOp::Sub => left - right,
        BinaryOp::Mul => left * right,
        BinaryOp::Div if right == 0.0 => return None,
        BinaryOp::Div if float => left / right,
        BinaryOp::Div => (l / r) as f64,
        BinaryOp::Remainder if r <= 0 || l < 0 || float => return None,
        BinaryOp::Remainder => (l % r) as f64,
        BinaryOp::Pow => {
            let value = left.powf(right);
            if !float && value.fract() != 0.0 {
                return None;
            }
            value
        }
        BinaryOp::BitAnd => (l & r) as f64,
        BinaryOp::BitOr => (l | r) as f64,
        BinaryOp::BitXor => (l ^ r) as f64,
        BinaryOp::ShiftLeft => (l << r.clamp(0, 32)) as f64,
        BinaryOp::ShiftRight => (l >> r.clamp(0, 32)) as f64,
        BinaryOp::Equal => f64::from(u8::from(left == right)),
        BinaryOp::NotEqual => f64::from(u8::from(left != right)),
        BinaryOp::Less => f64::from(u8::from(left < right)),
        BinaryOp::Greater => f64::from(u8::from(left > right)),
        BinaryOp::LessEqual => f64::from(u8::from(left <= right)),
        BinaryOp::GreaterEqual => f64::from(u8::from(left >= right)),
        BinaryOp::And | BinaryOp::Or | BinaryOp::Xor => return None,
    };
    value.is_finite().then_some(value)
}

/// The comparison that holds exactly when `condition` does not.
fn inverted(condition: Expr) -> Expr {
    let (span, dt) = (condition.span, condition.dt);
    match condition.kind {
        ExprKind::Binary { left, op, right } => match op.inverted() {
            Some(op) => Expr::new(ExprKind::Binary { left, op, right }, dt, span),
            None => {
                let original = Expr::new(ExprKind::Binary { left, op, right }, dt, span);
                Expr::binary(original, BinaryOp::Equal, Expr::number(0.0, dt, span), DataType::Ubyte)
            }
        },
        kind => Expr::binary(
            Expr::new(kind, dt, span),
            BinaryOp::Equal,
            Expr::number(0.0, dt, span),
            DataType::Ubyte,
        ),
    }
}

fn register_type(register: RegisterOrPair) -> DataType {
    match register {
        RegisterOrPair::A | RegisterOrPair::X | RegisterOrPair::Y => DataType::Ubyte,
        RegisterOrPair::AX | RegisterOrPair::AY | RegisterOrPair::XY => DataType::Uword,
        RegisterOrPair::Fac1 | RegisterOrPair::Fac2 => DataType::Float,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::read_program;

    fn program(source: &str) -> Program {
        read_program("test", source).unwrap()
    }

    fn start_body(body: &str) -> Vec<Statement> {
        let source = format!(
            "main {{\n  ubyte ub\n  byte b\n  uword uw\n  word w\n  float f\n  ubyte[4] table\n  sub start() {{\n{}\n  }}\n}}\n",
            body
        );
        let mut program = program(&source);
        program.blocks.remove(0).subroutines.remove(0).statements
    }

    fn error(source: &str) -> ErrorCode {
        read_program("test", source).unwrap_err().code
    }

    fn assigned_value(statement: &Statement) -> &Expr {
        match &statement.kind {
            StatementKind::Assignment(assignment) => &assignment.value,
            other => panic!("expected assignment, got {:?}", other),
        }
    }

    #[test]
    fn test_names_resolve_to_innermost_scope() {
        let body = start_body("ubyte ub\nub = 1\nmain.ub = 2\nuw = 3");
        let StatementKind::Assignment(local) = &body[0].kind else {
            panic!("expected assignment")
        };
        assert_eq!(local.target, AssignTarget::Variable(ScopedName::parse("main.start.ub")));
        let StatementKind::Assignment(global) = &body[1].kind else {
            panic!("expected assignment")
        };
        assert_eq!(global.target, AssignTarget::Variable(ScopedName::parse("main.ub")));
        let StatementKind::Assignment(block) = &body[2].kind else {
            panic!("expected assignment")
        };
        assert_eq!(block.target, AssignTarget::Variable(ScopedName::parse("main.uw")));
        assert_eq!(block.dt, DataType::Uword);
        assert_eq!(block.value.dt, DataType::Uword);
    }

    #[test]
    fn test_literals_take_the_operand_type() {
        let body = start_body("uw = uw + 1\nw = w - 300\nf = f * 2");
        for (statement, dt) in body.iter().zip([DataType::Uword, DataType::Word, DataType::Float]) {
            let ExprKind::Binary { right, .. } = &assigned_value(statement).kind else {
                panic!("expected binary expression")
            };
            assert_eq!(right.dt, dt);
        }
    }

    #[test]
    fn test_narrow_operand_is_widened() {
        let body = start_body("uw = uw + ub");
        let value = assigned_value(&body[0]);
        assert_eq!(value.dt, DataType::Uword);
        let ExprKind::Binary { right, .. } = &value.kind else {
            panic!("expected binary expression")
        };
        assert!(matches!(right.kind, ExprKind::Typecast { implicit: true, .. }));
        assert_eq!(right.dt, DataType::Uword);
    }

    #[test]
    fn test_constants_fold() {
        let source = "main {\n  const ubyte SIZE = 4 * 8\n  const uword ADDR = $c000 + SIZE\n  sub start() {\n    uword x = ADDR - 1\n    if SIZE > 10 {\n      x = 1\n    }\n  }\n}\n";
        let program = program(source);
        let block = &program.blocks[0];
        assert_eq!(block.variables.iter().find(|v| v.name == "ADDR").and_then(|v| v.number()), Some(49184.0));
        let body = &block.subroutines[0].statements;
        assert_eq!(assigned_value(&body[0]).constant_value(), Some(49183.0));
        assert!(matches!(body[1].kind, StatementKind::AnonymousScope(_)));
    }

    #[test]
    fn test_conditions_become_comparisons() {
        let body = start_body("if ub {\n  ub = 0\n}\nif not uw {\n  ub = 1\n}");
        let StatementKind::If(first) = &body[0].kind else {
            panic!("expected if")
        };
        assert!(matches!(first.condition.kind, ExprKind::Binary { op: BinaryOp::NotEqual, .. }));
        let StatementKind::If(second) = &body[1].kind else {
            panic!("expected if")
        };
        assert!(matches!(second.condition.kind, ExprKind::Binary { op: BinaryOp::Equal, .. }));
    }

    #[test]
    fn test_while_is_lowered() {
        let body = start_body("while ub < 10 {\n  ub++\n  if ub == 5\n    break\n}");
        assert!(matches!(&body[0].kind, StatementKind::Label(name) if name.starts_with("prog8_whileloop_")));
        let StatementKind::If(exit) = &body[1].kind else {
            panic!("expected exit test")
        };
        assert!(matches!(exit.condition.kind, ExprKind::Binary { op: BinaryOp::GreaterEqual, .. }));
        assert!(matches!(body.last().map(|s| &s.kind), Some(StatementKind::Label(name)) if name.starts_with("prog8_whileend_")));
        assert!(!format!("{:?}", body).contains("Break"));
    }

    #[test]
    fn test_break_in_repeat_adds_end_label() {
        let body = start_body("repeat {\n  break\n}");
        assert!(matches!(body[0].kind, StatementKind::Repeat(_)));
        assert!(matches!(&body[1].kind, StatementKind::Label(name) if name.starts_with("prog8_loopend_")));
    }

    #[test]
    fn test_jump_targets() {
        let body = start_body("uword vector\nloop:\ngoto loop\ngoto vector\ngoto $c000");
        assert!(matches!(&body[1].kind, StatementKind::Jump(JumpTarget::Label(name)) if name.to_string() == "main.start.loop"));
        assert!(matches!(&body[2].kind, StatementKind::Jump(JumpTarget::Variable(_))));
        assert!(matches!(body[3].kind, StatementKind::Jump(JumpTarget::Address(0xc000))));
    }

    #[test]
    fn test_array_initializer_sets_size() {
        let program = program("main {\n  uword[] vectors = [&main.start, $c000]\n  sub start() {\n  }\n}\n");
        let decl = &program.blocks[0].variables[0];
        assert_eq!(decl.array_size, Some(2));
        assert!(matches!(
            &decl.value,
            Some(VarInit::Array(elements)) if matches!(elements[0], ArrayElement::AddressOf(_))
        ));
    }

    #[test]
    fn test_call_arguments_are_coerced() {
        let source = "main {\n  sub start() {\n    uword r = twice(7)\n  }\n  sub twice(uword value) -> uword {\n    return value * 2\n  }\n}\n";
        let program = program(source);
        let value = assigned_value(&program.blocks[0].subroutines[0].statements[0]);
        let ExprKind::FunctionCall { target, args } = &value.kind else {
            panic!("expected call")
        };
        assert_eq!(target.to_string(), "main.twice");
        assert_eq!(args[0].dt, DataType::Uword);
    }

    #[test]
    fn test_errors() {
        let wrap = |body: &str| format!("main {{\n  sub start() {{\n{}\n  }}\n}}\n", body);
        assert_eq!(error(&wrap("nothing = 1")), ErrorCode::UndefinedName);
        assert_eq!(error(&wrap("ubyte a\nubyte a")), ErrorCode::DuplicateDefinition);
        assert_eq!(error(&wrap("break")), ErrorCode::BreakOutsideLoop);
        assert_eq!(error(&wrap("ubyte a\nuword b\na = b")), ErrorCode::TypeMismatch);
        assert_eq!(error(&wrap("ubyte a = 300")), ErrorCode::ValueOutOfRange);
        assert_eq!(error(&wrap("const ubyte C = 1\nC = 2")), ErrorCode::InvalidAssignmentTarget);
        assert_eq!(error(&wrap("start(1)")), ErrorCode::ArgumentCount);
        assert_eq!(error(&wrap("return 1")), ErrorCode::TypeMismatch);
        assert_eq!(error("main {\n  const ubyte A = B\n  const ubyte B = A\n}\n"), ErrorCode::UndefinedName);
    }

    #[test]
    fn test_explicit_cast_allows_narrowing() {
        let body = start_body("ub = uw as ubyte\nb = 200 as byte");
        assert!(matches!(assigned_value(&body[0]).kind, ExprKind::Typecast { implicit: false, .. }));
        assert_eq!(assigned_value(&body[1]).constant_value(), Some(-56.0));
    }
}
