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

//! Subroutine frames and calls.
//!
//! This module provides:
//! - Subroutine prologues, bodies and epilogues
//! - Program startup in `main.start`
//! - Calls of regular, inline and assembly subroutines
//! - Per-subroutine scratch variables (loop counters, register save slots)

use std::collections::HashSet;

use log::{debug, trace};

use super::assignments::AssignmentEmitter;
use super::expressions::ExpressionEmitter;
use super::labels::LabelManager;
use super::registers::RegisterManager;
use super::statements::StatementEmitter;
use super::variables::{zp_init_label, VariableManager};
use super::CodegenSession;
use crate::ast::{
    ArrayElement, AssignTarget, CpuRegister, DataType, Expr, ExprKind, JumpTarget, Program, RegisterOrPair,
    ScopedName, Statement, StatementKind, Subroutine, SubroutineParameter, VarDeclKind, VarInit,
};
use crate::error::{CompileError, ErrorCode, Result, Span};

/// A variable created during code generation, declared in the subroutine epilogue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtraVar {
    /// Ubyte or uword.
    pub dt: DataType,
    /// The label.
    pub name: String,
    /// The zero page address, when it got one.
    pub address: Option<u8>,
}

/// Scratch storage used by the subroutine being translated.
#[derive(Debug, Default)]
pub struct SubroutineFrame {
    /// Loop counters and other late variables.
    pub extra_vars: Vec<ExtraVar>,
    pub regsave_a: bool,
    pub regsave_x: bool,
    pub regsave_y: bool,
    /// `prog8_float_eval_result1` is used.
    pub float_eval_result1: bool,
    /// `prog8_float_eval_result2` is used.
    pub float_eval_result2: bool,
}

/// How subroutines are used in a program.
#[derive(Debug, Default, Clone)]
pub struct SubroutineReferences {
    called: HashSet<ScopedName>,
    addressed: HashSet<ScopedName>,
}

impl SubroutineReferences {
    /// True when `name` is called, jumped to or has its address taken.
    pub fn is_used(&self, name: &ScopedName) -> bool {
        self.called.contains(name) || self.addressed.contains(name)
    }

    /// True when `name` is used other than by a call, so it needs a real body.
    pub fn needs_body(&self, name: &ScopedName) -> bool {
        self.addressed.contains(name)
    }
}

/// Collect how each subroutine of `program` is referenced.
pub fn referenced_subroutines(program: &Program) -> SubroutineReferences {
    let mut references = SubroutineReferences::default();
    for block in &program.blocks {
        for decl in &block.variables {
            collect_initializer(decl.value.as_ref(), &mut references);
        }
        collect_statements(&block.statements, &mut references);
        for sub in &block.subroutines {
            for decl in &sub.variables {
                collect_initializer(decl.value.as_ref(), &mut references);
            }
            collect_statements(&sub.statements, &mut references);
        }
    }
    references
}

fn collect_initializer(value: Option<&VarInit>, references: &mut SubroutineReferences) {
    if let Some(VarInit::Array(elements)) = value {
        for element in elements {
            if let ArrayElement::AddressOf(name) = element {
                references.addressed.insert(name.clone());
            }
        }
    }
}

fn collect_statements(statements: &[Statement], references: &mut SubroutineReferences) {
    for statement in statements {
        match &statement.kind {
            StatementKind::Assignment(assignment) => {
                collect_target(&assignment.target, references);
                collect_expr(&assignment.value, references);
            }
            StatementKind::PostIncrDecr { target, .. } => collect_target(target, references),
            StatementKind::If(ifelse) => {
                collect_expr(&ifelse.condition, references);
                collect_statements(&ifelse.then_branch, references);
                collect_statements(&ifelse.else_branch, references);
            }
            StatementKind::Repeat(repeat) => {
                if let Some(count) = &repeat.count {
                    collect_expr(count, references);
                }
                collect_statements(&repeat.body, references);
            }
            StatementKind::When(when) => {
                collect_expr(&when.condition, references);
                for choice in &when.choices {
                    collect_statements(&choice.body, references);
                }
            }
            StatementKind::ConditionalBranch(branch) => {
                collect_statements(&branch.then_branch, references);
                collect_statements(&branch.else_branch, references);
            }
            StatementKind::Jump(JumpTarget::Label(name))
            | StatementKind::GoSub(JumpTarget::Label(name)) => {
                references.addressed.insert(name.clone());
            }
            StatementKind::FunctionCall { target, args } => {
                references.called.insert(target.clone());
                for arg in args {
                    collect_expr(arg, references);
                }
            }
            StatementKind::Return(Some(value)) => collect_expr(value, references),
            StatementKind::AnonymousScope(body) => collect_statements(body, references),
            StatementKind::While { condition, body } | StatementKind::Until { body, condition } => {
                collect_expr(condition, references);
                collect_statements(body, references);
            }
            _ => {}
        }
    }
}

fn collect_target(target: &AssignTarget, references: &mut SubroutineReferences) {
    match target {
        AssignTarget::Memory(address) => collect_expr(address, references),
        AssignTarget::ArrayElement { index, .. } => collect_expr(index, references),
        AssignTarget::Variable(_) | AssignTarget::Register(_) => {}
    }
}

fn collect_expr(expr: &Expr, references: &mut SubroutineReferences) {
    match &expr.kind {
        ExprKind::AddressOf(name) => {
            references.addressed.insert(name.clone());
        }
        ExprKind::FunctionCall { target, args } => {
            references.called.insert(target.clone());
            for arg in args {
                collect_expr(arg, references);
            }
        }
        ExprKind::DirectMemoryRead(inner)
        | ExprKind::Prefix { operand: inner, .. }
        | ExprKind::Typecast { expr: inner, .. }
        | ExprKind::ArrayIndexed { index: inner, .. } => collect_expr(inner, references),
        ExprKind::Binary { left, right, .. } => {
            collect_expr(left, references);
            collect_expr(right, references);
        }
        ExprKind::Number(_) | ExprKind::Identifier(_) => {}
    }
}

/// True when a regular subroutine takes its arguments in registers.
///
/// That is the case for a single integer parameter (A or AY) and for two
/// byte parameters (A and Y).
pub fn uses_register_parameters(sub: &Subroutine) -> bool {
    if sub.is_asm {
        return false;
    }
    match sub.parameters.as_slice() {
        [single] => single.dt.is_integer(),
        [first, second] => first.dt.is_byte() && second.dt.is_byte(),
        _ => false,
    }
}

/// True when the body of an inline subroutine can be copied to its call sites.
pub fn is_inlinable(sub: &Subroutine) -> bool {
    if !sub.inline {
        return false;
    }
    if sub.is_asm {
        return sub.address.is_none() && sub.amount_of_returns() == 0;
    }
    let trailing = sub.statements.last().is_some_and(Statement::is_return);
    let returns = sub.amount_of_returns();
    !has_labels(&sub.statements) && returns == usize::from(trailing)
}

fn has_labels(statements: &[Statement]) -> bool {
    statements.iter().any(|s| match &s.kind {
        StatementKind::Label(_) => true,
        StatementKind::AnonymousScope(body) => has_labels(body),
        StatementKind::Repeat(repeat) => has_labels(&repeat.body),
        StatementKind::If(ifelse) => has_labels(&ifelse.then_branch) || has_labels(&ifelse.else_branch),
        StatementKind::ConditionalBranch(branch) => {
            has_labels(&branch.then_branch) || has_labels(&branch.else_branch)
        }
        StatementKind::When(when) => when.choices.iter().any(|c| has_labels(&c.body)),
        _ => false,
    })
}

/// Extension trait for subroutines and calls.
pub trait FunctionEmitter<'a> {
    /// Translate a subroutine definition.
    fn translate_subroutine(&mut self, sub: &'a Subroutine) -> Result<()>;

    /// Declare the extra variables and scratch slots of the current frame.
    fn frame_variables_asm(&mut self) -> Result<()>;

    /// Emit the program startup code of `main.start`.
    fn entrypoint_initialization(&mut self) -> Result<()>;

    /// Call `target` with `args`.
    ///
    /// A returned value is left in A, AY or FAC1 depending on its datatype.
    fn translate_function_call(&mut self, target: &ScopedName, args: &[Expr], span: Span) -> Result<()>;
}

impl<'a> FunctionEmitter<'a> for CodegenSession<'a> {
    fn translate_subroutine(&mut self, sub: &'a Subroutine) -> Result<()> {
        let inlining = self.options.optimize_inline && is_inlinable(sub);
        if sub.inline && self.options.optimize && !self.referenced.is_used(&sub.scoped_name) {
            debug!("dropping unused inline subroutine '{}'", sub.scoped_name);
            return Ok(());
        }
        let only_variables = inlining && !self.referenced.needs_body(&sub.scoped_name);

        self.scope = sub.scoped_name.clone();
        self.current_sub = Some(sub);
        self.frame = SubroutineFrame::default();
        self.repeat_nesting = 0;
        trace!("translating subroutine '{}'", sub.scoped_name);

        self.out("");
        if sub.is_asm {
            if sub.address.is_some() || only_variables {
                return Ok(());
            }
            self.out(&format!("{}\t.proc", sub.name));
            for statement in &sub.statements {
                self.translate_statement(statement)?;
            }
            self.out("  .pend\n");
            return Ok(());
        }

        self.out(&format!("{}\t.proc", sub.name));
        self.zeropage_vars_asm(&sub.variables)?;
        self.memdefs_asm(&sub.variables, &[])?;

        if sub.name == "start" && sub.scoped_name.len() == 2 && sub.scoped_name.parts()[0] == "main" {
            self.entrypoint_initialization()?;
        }

        if uses_register_parameters(sub) {
            self.out("; simple int arg(s) passed via register(s)");
            match sub.parameters.as_slice() {
                [single] if single.dt.is_byte() => self.out(&format!("  sta  {}", single.name)),
                [single] => self.out(&format!("  sta  {p} |  sty  {p}+1", p = single.name)),
                [first, second] => {
                    self.out(&format!("  sta  {} |  sty  {}", first.name, second.name))
                }
                _ => {}
            }
        }

        if !only_variables {
            self.out("; statements");
            for statement in &sub.statements {
                self.translate_statement(statement)?;
            }
            if !sub.statements.last().is_some_and(Statement::is_return) {
                self.out("  rts");
            }
        }

        self.out("; variables");
        self.frame_variables_asm()?;
        self.vardecls_asm(&sub.variables, false)?;
        self.out("  .pend\n");
        Ok(())
    }

    fn frame_variables_asm(&mut self) -> Result<()> {
        let extra = std::mem::take(&mut self.frame.extra_vars);
        for var in &extra {
            match (var.address, var.dt) {
                (Some(address), _) => self.out(&format!("{} = {}", var.name, address)),
                (None, DataType::Ubyte) => self.out(&format!("{}    .byte  0", var.name)),
                (None, DataType::Uword) => self.out(&format!("{}    .word  0", var.name)),
                (None, dt) => {
                    return Err(CompileError::internal(
                        format!("extra variable '{}' of type {}", var.name, dt),
                        Span::default(),
                    ))
                }
            }
        }
        self.frame.extra_vars = extra;
        if self.frame.regsave_a {
            self.out("prog8_regsaveA     .byte  0");
        }
        if self.frame.regsave_x {
            self.out("prog8_regsaveX     .byte  0");
        }
        if self.frame.regsave_y {
            self.out("prog8_regsaveY     .byte  0");
        }
        if self.frame.float_eval_result1 {
            self.out("prog8_float_eval_result1    .byte  0,0,0,0,0");
        }
        if self.frame.float_eval_result2 {
            self.out("prog8_float_eval_result2    .byte  0,0,0,0,0");
        }
        Ok(())
    }

    fn entrypoint_initialization(&mut self) -> Result<()> {
        self.out("; program startup initialization");
        self.out("  cld");
        let program = self.program;
        for block in &program.blocks {
            if !super::variables::block_initializers(block).is_empty() {
                self.out(&format!("  jsr  {}.prog8_init_vars", block.name));
            }
        }

        let mut zp_values = Vec::new();
        for block in &program.blocks {
            let variables = block
                .variables
                .iter()
                .chain(block.subroutines.iter().flat_map(|s| s.variables.iter()));
            for decl in variables {
                let copied = decl.kind == VarDeclKind::Var
                    && (decl.dt == DataType::Str || decl.dt.is_array())
                    && decl.value.is_some()
                    && self.is_zp_variable(&decl.scoped_name);
                if copied {
                    zp_values.push(decl);
                }
            }
        }

        if !zp_values.is_empty() {
            self.out("; zp str and array initializations");
            for decl in &zp_values {
                let name = self.asm_name(&decl.scoped_name);
                let source = zp_init_label(&decl.scoped_name);
                if decl.dt == DataType::Str {
                    self.out(&format!(
                        "  lda  #<{t} |  sta  P8ZP_SCRATCH_W1 |  lda  #>{t} |  sta  P8ZP_SCRATCH_W1+1",
                        t = name
                    ));
                    self.out(&format!(
                        "  lda  #<{s} |  ldy  #>{s} |  jsr  prog8_lib.strcpy",
                        s = source
                    ));
                } else {
                    let size = decl.dt.storage_size(decl.element_count().unwrap_or(0));
                    self.out(&format!(
                        "  lda  #<{s} |  sta  P8ZP_SCRATCH_W1 |  lda  #>{s} |  sta  P8ZP_SCRATCH_W1+1",
                        s = source
                    ));
                    self.out(&format!(
                        "  lda  #<{t} |  sta  P8ZP_SCRATCH_W2 |  lda  #>{t} |  sta  P8ZP_SCRATCH_W2+1",
                        t = name
                    ));
                    self.out(&format!(
                        "  lda  #<{} |  ldy  #>{} |  jsr  prog8_lib.memcopy",
                        size, size
                    ));
                }
            }
            self.out("  jmp  +");
            for decl in &zp_values {
                let label = zp_init_label(&decl.scoped_name);
                self.zp_init_value_asm(decl, &label)?;
            }
        }

        self.out("+\ttsx");
        self.out("  stx  prog8_lib.orig_stackpointer\t; required for sys.exit()");
        self.out("  ldx  #255\t; init estack ptr");
        self.out("  clv");
        self.out("  clc");
        Ok(())
    }

    fn translate_function_call(&mut self, target: &ScopedName, args: &[Expr], span: Span) -> Result<()> {
        let sub = self.subroutine(target, span)?;
        if args.len() != sub.parameters.len() {
            return Err(CompileError::internal(
                format!(
                    "'{}' takes {} arguments, {} given",
                    target,
                    sub.parameters.len(),
                    args.len()
                ),
                span,
            ));
        }
        let inline = self.options.optimize_inline && is_inlinable(sub);
        if sub.is_asm {
            self.asm_call(sub, args, inline, span)
        } else if inline {
            self.inline_call(sub, args)
        } else {
            self.regular_call(sub, args)
        }
    }
}

impl<'a> CodegenSession<'a> {
    /// A byte or word variable for loop counting, declared in the epilogue.
    ///
    /// Outside nested loops an existing counter of the same type is reused.
    pub(crate) fn counter_variable(&mut self, dt: DataType, nested: bool) -> String {
        if !nested {
            if let Some(existing) = self.frame.extra_vars.iter().find(|v| v.dt == dt) {
                return existing.name.clone();
            }
        }
        let name = self.make_label("counter");
        let address = match self.zeropage.allocate(
            &ScopedName::new(Vec::new()),
            dt,
            None,
            None,
            &mut *self.reporter,
        ) {
            Ok((address, _)) => Some(address),
            Err(error) => {
                trace!("'{}' stays in normal memory: {}", name, error);
                None
            }
        };
        debug!("late allocation of '{}' ({}) at {:?}", name, dt, address);
        self.frame.extra_vars.push(ExtraVar {
            dt,
            name: name.clone(),
            address,
        });
        name
    }

    fn regular_call(&mut self, sub: &'a Subroutine, args: &[Expr]) -> Result<()> {
        if uses_register_parameters(sub) {
            match (sub.parameters.as_slice(), args) {
                ([single], [arg]) if single.dt.is_byte() => self.expr_to_a(arg)?,
                ([_], [arg]) => self.expr_to_ay(arg)?,
                ([_, _], [first, second]) => match self.simple_operand(second)? {
                    Some(operand) => {
                        self.expr_to_a(first)?;
                        self.out(&format!("  ldy  {}", operand.lo()));
                    }
                    None => {
                        self.expr_to_a(second)?;
                        self.out("  sta  P8ESTACK_LO,x |  dex");
                        self.expr_to_a(first)?;
                        self.out("  inx |  ldy  P8ESTACK_LO,x");
                    }
                },
                _ => {}
            }
        } else {
            self.assign_parameters(sub, args)?;
        }
        let name = self.asm_name(&sub.scoped_name);
        self.out(&format!("  jsr  {}", name));
        Ok(())
    }

    fn assign_parameters(&mut self, sub: &Subroutine, args: &[Expr]) -> Result<()> {
        for (param, arg) in sub.parameters.iter().zip(args) {
            let variable = sub.scoped_name.child(&param.name);
            let value = self.argument_value(param, arg);
            self.deliver(&value, super::assignments::Destination::Variable(variable))?;
        }
        Ok(())
    }

    fn argument_value(&self, param: &SubroutineParameter, arg: &Expr) -> Expr {
        if arg.dt == param.dt || (param.dt == DataType::Uword && arg.dt == DataType::Str) {
            arg.clone()
        } else {
            Expr::new(
                ExprKind::Typecast {
                    expr: Box::new(arg.clone()),
                    implicit: true,
                },
                param.dt,
                arg.span,
            )
        }
    }

    fn inline_call(&mut self, sub: &'a Subroutine, args: &[Expr]) -> Result<()> {
        trace!("inlining '{}'", sub.scoped_name);
        self.assign_parameters(sub, args)?;
        let (body, trailing) = match sub.statements.split_last() {
            Some((last, rest)) if last.is_return() => (rest, Some(last)),
            _ => (sub.statements.as_slice(), None),
        };
        for statement in body {
            self.translate_statement(statement)?;
        }
        if let Some(Statement {
            kind: StatementKind::Return(Some(value)),
            ..
        }) = trailing
        {
            match sub.return_type {
                Some(DataType::Float) => self.expr_to_fac1(value)?,
                Some(dt) if dt.is_byte() => self.expr_to_a(value)?,
                _ => self.expr_to_ay(value)?,
            }
        }
        Ok(())
    }

    fn asm_call(&mut self, sub: &'a Subroutine, args: &[Expr], inline: bool, span: Span) -> Result<()> {
        let mut registers = Vec::with_capacity(args.len());
        for param in &sub.parameters {
            match param.register {
                Some(register) => registers.push(register),
                None => {
                    return Err(CompileError::new(
                        ErrorCode::UnsupportedOperation,
                        format!(
                            "parameter '{}' of assembly subroutine '{}' has no register",
                            param.name, sub.name
                        ),
                        span,
                    ))
                }
            }
        }
        let calls: Vec<(RegisterOrPair, &Expr)> = registers.into_iter().zip(args).collect();

        for (register, arg) in calls.iter().filter(|(r, _)| *r == RegisterOrPair::Fac2) {
            self.expr_to_register(arg, *register)?;
        }
        for (register, arg) in calls.iter().filter(|(r, _)| *r == RegisterOrPair::Fac1) {
            self.expr_to_register(arg, *register)?;
        }
        let integers: Vec<(RegisterOrPair, &Expr)> = calls
            .iter()
            .filter(|(r, _)| !matches!(r, RegisterOrPair::Fac1 | RegisterOrPair::Fac2))
            .map(|(r, a)| (*r, *a))
            .collect();

        let saves_x = sub.clobbers_x();
        let mut simple = Vec::with_capacity(integers.len());
        for (register, arg) in &integers {
            match self.simple_operand(arg)? {
                Some(operand) if register.is_pair() == arg.dt.is_word() || operand.constant().is_some() => {
                    simple.push(operand)
                }
                _ => break,
            }
        }

        // an inlined body shares this frame's save slot, so it keeps X on the hardware stack
        let stack_save = saves_x && inline;
        if simple.len() == integers.len() {
            if stack_save {
                self.save_register_stack(CpuRegister::X, false);
            } else if saves_x {
                self.save_register_local(CpuRegister::X);
            }
            let mut ordered: Vec<(RegisterOrPair, _)> =
                integers.iter().map(|(r, _)| *r).zip(simple).collect();
            ordered.sort_by_key(|(register, _)| register.uses(CpuRegister::X));
            for (register, operand) in ordered {
                let (lo, hi) = (operand.lo(), operand.hi());
                match register {
                    RegisterOrPair::A => self.out(&format!("  lda  {}", lo)),
                    RegisterOrPair::X => self.out(&format!("  ldx  {}", lo)),
                    RegisterOrPair::Y => self.out(&format!("  ldy  {}", lo)),
                    RegisterOrPair::AY => self.out(&format!("  lda  {} |  ldy  {}", lo, hi)),
                    RegisterOrPair::AX => self.out(&format!("  lda  {} |  ldx  {}", lo, hi)),
                    RegisterOrPair::XY => self.out(&format!("  ldx  {} |  ldy  {}", lo, hi)),
                    RegisterOrPair::Fac1 | RegisterOrPair::Fac2 => {}
                }
            }
        } else {
            self.warn_slow(span);
            let count = integers.len();
            for (register, arg) in &integers {
                if register.is_pair() {
                    self.expr_to_ay(arg)?;
                    self.out("  sta  P8ESTACK_LO,x |  tya |  sta  P8ESTACK_HI,x |  dex");
                } else {
                    self.expr_to_a(arg)?;
                    self.out("  sta  P8ESTACK_LO,x |  dex");
                }
            }
            let slot = |index: usize| count - index;
            let mut x_register = None;
            for (index, (register, _)) in integers.iter().enumerate() {
                let k = slot(index);
                match register {
                    RegisterOrPair::X => {
                        self.out(&format!("  lda  P8ESTACK_LO+{},x |  sta  P8ZP_SCRATCH_W2", k));
                        x_register = Some(*register);
                    }
                    RegisterOrPair::AX => {
                        self.out(&format!(
                            "  lda  P8ESTACK_LO+{k},x |  sta  P8ZP_SCRATCH_B1 |  lda  P8ESTACK_HI+{k},x |  sta  P8ZP_SCRATCH_W2",
                            k = k
                        ));
                        x_register = Some(*register);
                    }
                    RegisterOrPair::XY => {
                        self.out(&format!(
                            "  lda  P8ESTACK_LO+{k},x |  sta  P8ZP_SCRATCH_W2 |  lda  P8ESTACK_HI+{k},x |  sta  P8ZP_SCRATCH_W1",
                            k = k
                        ));
                        x_register = Some(*register);
                    }
                    _ => {}
                }
            }
            for (index, (register, _)) in integers.iter().enumerate() {
                let k = slot(index);
                match register {
                    RegisterOrPair::A => self.out(&format!("  lda  P8ESTACK_LO+{},x", k)),
                    RegisterOrPair::Y => self.out(&format!("  ldy  P8ESTACK_LO+{},x", k)),
                    RegisterOrPair::AY => self.out(&format!(
                        "  lda  P8ESTACK_LO+{k},x |  ldy  P8ESTACK_HI+{k},x",
                        k = k
                    )),
                    _ => {}
                }
            }
            for _ in 0..count {
                self.out("  inx");
            }
            if stack_save {
                self.save_register_stack(CpuRegister::X, true);
            } else if saves_x {
                self.save_register_local(CpuRegister::X);
            }
            match x_register {
                Some(RegisterOrPair::X) => self.out("  ldx  P8ZP_SCRATCH_W2"),
                Some(RegisterOrPair::AX) => self.out("  lda  P8ZP_SCRATCH_B1 |  ldx  P8ZP_SCRATCH_W2"),
                Some(RegisterOrPair::XY) => self.out("  ldx  P8ZP_SCRATCH_W2 |  ldy  P8ZP_SCRATCH_W1"),
                _ => {}
            }
        }

        if inline {
            trace!("inlining assembly subroutine '{}'", sub.scoped_name);
            for statement in &sub.statements {
                self.translate_statement(statement)?;
            }
        } else {
            let name = match sub.address {
                Some(address) => super::types::to_hex(i32::from(address)),
                None => self.asm_name(&sub.scoped_name),
            };
            self.out(&format!("  jsr  {}", name));
        }

        match sub.return_register {
            Some(RegisterOrPair::Y) => self.out("  tya"),
            Some(RegisterOrPair::X) | Some(RegisterOrPair::XY) => self.out("  txa"),
            Some(RegisterOrPair::AX) => self.out("  pha |  txa |  tay |  pla"),
            Some(RegisterOrPair::Fac2) => self.float_call("MOVFA"),
            _ => {}
        }
        if stack_save {
            self.restore_register_stack(CpuRegister::X, sub.return_register.is_some());
        } else if saves_x {
            self.restore_register_local(CpuRegister::X);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Block, StatementKind, VarDecl};
    use crate::codegen::emit::TextEmitter;
    use crate::config::{CompilationOptions, CpuType};
    use crate::error::Diagnostics;

    fn sub(name: &str) -> Subroutine {
        Subroutine::new(ScopedName::parse(name), Span::default())
    }

    fn param(name: &str, dt: DataType, register: Option<RegisterOrPair>) -> SubroutineParameter {
        SubroutineParameter {
            name: name.to_string(),
            dt,
            register,
        }
    }

    fn number(value: f64, dt: DataType) -> Expr {
        Expr::number(value, dt, Span::default())
    }

    fn program_with(subs: Vec<Subroutine>) -> Program {
        let mut program = Program::new("calls");
        let mut main = Block::new("main", Span::default());
        main.subroutines.push(sub("main.start"));
        main.subroutines.extend(subs);
        program.blocks.push(main);
        program
    }

    fn lines_of(session: &mut CodegenSession<'_>) -> Vec<String> {
        std::mem::replace(&mut session.emitter, TextEmitter::new()).take_lines()
    }

    #[test]
    fn test_register_parameter_conventions() {
        let mut one = sub("main.one");
        one.parameters.push(param("w", DataType::Uword, None));
        assert!(uses_register_parameters(&one));

        let mut two = sub("main.two");
        two.parameters.push(param("a", DataType::Ubyte, None));
        two.parameters.push(param("b", DataType::Byte, None));
        assert!(uses_register_parameters(&two));

        two.parameters[1].dt = DataType::Uword;
        assert!(!uses_register_parameters(&two));

        let mut float = sub("main.f");
        float.parameters.push(param("f", DataType::Float, None));
        assert!(!uses_register_parameters(&float));
    }

    #[test]
    fn test_inlinable_requires_single_trailing_return() {
        let mut inline = sub("main.i");
        inline.inline = true;
        inline.statements.push(Statement::new(StatementKind::Return(None), Span::default()));
        assert!(is_inlinable(&inline));

        inline.statements.insert(0, Statement::new(StatementKind::Return(None), Span::default()));
        assert!(!is_inlinable(&inline));

        let mut labelled = sub("main.l");
        labelled.inline = true;
        labelled.statements.push(Statement::new(StatementKind::Label("x".into()), Span::default()));
        assert!(!is_inlinable(&labelled));
    }

    #[test]
    fn test_two_byte_arguments_go_in_a_and_y() {
        let mut callee = sub("main.plot");
        callee.parameters.push(param("x", DataType::Ubyte, None));
        callee.parameters.push(param("y", DataType::Ubyte, None));
        let program = program_with(vec![callee]);
        let mut diagnostics = Diagnostics::new();
        let mut session =
            CodegenSession::new(&program, CompilationOptions::default(), &mut diagnostics);
        session.scope = ScopedName::parse("main.start");
        let args = [number(3.0, DataType::Ubyte), number(4.0, DataType::Ubyte)];
        session
            .translate_function_call(&ScopedName::parse("main.plot"), &args, Span::default())
            .unwrap();
        assert_eq!(
            lines_of(&mut session),
            vec!["\tlda  #3", "\tldy  #4", "\tjsr  main.plot"]
        );
    }

    #[test]
    fn test_asm_call_saves_x_when_clobbered() {
        let mut callee = sub("main.chrout");
        callee.is_asm = true;
        callee.address = Some(0xffd2);
        callee.parameters.push(param("char", DataType::Ubyte, Some(RegisterOrPair::A)));
        callee.clobbers.push(CpuRegister::X);
        let program = program_with(vec![callee]);
        let mut diagnostics = Diagnostics::new();
        let mut session =
            CodegenSession::new(&program, CompilationOptions::default(), &mut diagnostics);
        session.scope = ScopedName::parse("main.start");
        let args = [number(65.0, DataType::Ubyte)];
        session
            .translate_function_call(&ScopedName::parse("main.chrout"), &args, Span::default())
            .unwrap();
        assert_eq!(
            lines_of(&mut session),
            vec![
                "\tstx  prog8_regsaveX",
                "\tlda  #$41",
                "\tjsr  $ffd2",
                "\tldx  prog8_regsaveX"
            ]
        );
        assert!(session.frame.regsave_x);
    }

    #[test]
    fn test_inlined_asm_call_keeps_x_on_the_stack() {
        let mut callee = sub("main.border");
        callee.is_asm = true;
        callee.inline = true;
        callee.parameters.push(param("color", DataType::Ubyte, Some(RegisterOrPair::A)));
        callee.clobbers.push(CpuRegister::X);
        callee.statements.push(Statement::new(
            StatementKind::InlineAssembly("  ldx  #0 |  sta  $d020".to_string()),
            Span::default(),
        ));
        let program = program_with(vec![callee]);
        let mut diagnostics = Diagnostics::new();
        let mut options = CompilationOptions::default();
        options.optimize_inline = true;
        let mut session = CodegenSession::new(&program, options, &mut diagnostics);
        session.scope = ScopedName::parse("main.start");
        let args = [number(2.0, DataType::Ubyte)];
        session
            .translate_function_call(&ScopedName::parse("main.border"), &args, Span::default())
            .unwrap();
        assert_eq!(
            lines_of(&mut session),
            vec![
                "	txa",
                "	pha",
                "	lda  #2",
                "  ldx  #0 |  sta  $d020",
                "	pla",
                "	tax"
            ]
        );
        assert!(!session.frame.regsave_x);
    }

    #[test]
    fn test_asm_call_without_clobbers_keeps_x_untouched() {
        let mut callee = sub("main.setcolor");
        callee.is_asm = true;
        callee.parameters.push(param("color", DataType::Ubyte, Some(RegisterOrPair::Y)));
        let program = program_with(vec![callee]);
        let mut diagnostics = Diagnostics::new();
        let options = CompilationOptions::default().with_cpu(CpuType::Cpu65c02);
        let mut session = CodegenSession::new(&program, options, &mut diagnostics);
        session.scope = ScopedName::parse("main.start");
        let args = [number(1.0, DataType::Ubyte)];
        session
            .translate_function_call(&ScopedName::parse("main.setcolor"), &args, Span::default())
            .unwrap();
        assert_eq!(
            lines_of(&mut session),
            vec!["\tldy  #1", "\tjsr  main.setcolor"]
        );
    }

    #[test]
    fn test_counters_are_reused_unless_nested() {
        let program = program_with(Vec::new());
        let mut diagnostics = Diagnostics::new();
        let mut session =
            CodegenSession::new(&program, CompilationOptions::default(), &mut diagnostics);
        let first = session.counter_variable(DataType::Ubyte, false);
        let second = session.counter_variable(DataType::Ubyte, false);
        let nested = session.counter_variable(DataType::Ubyte, true);
        let word = session.counter_variable(DataType::Uword, false);
        assert_eq!(first, second);
        assert_ne!(first, nested);
        assert_ne!(first, word);
        assert_eq!(session.frame.extra_vars.len(), 3);
        assert!(session.frame.extra_vars.iter().all(|v| v.address.is_some()));
    }

    #[test]
    fn test_frame_variables_order() {
        let program = program_with(Vec::new());
        let mut diagnostics = Diagnostics::new();
        let options = CompilationOptions::default().with_zeropage(crate::config::ZeropageType::Dontuse);
        let mut session = CodegenSession::new(&program, options, &mut diagnostics);
        let counter = session.counter_variable(DataType::Uword, false);
        session.frame.regsave_y = true;
        session.frame.float_eval_result1 = true;
        session.frame_variables_asm().unwrap();
        assert_eq!(
            lines_of(&mut session),
            vec![
                format!("{}    .word  0", counter),
                "prog8_regsaveY     .byte  0".to_string(),
                "prog8_float_eval_result1    .byte  0,0,0,0,0".to_string(),
            ]
        );
    }

    #[test]
    fn test_references_distinguish_calls_from_addresses() {
        let mut start = sub("main.start");
        start.statements.push(Statement::new(
            StatementKind::FunctionCall {
                target: ScopedName::parse("main.called"),
                args: Vec::new(),
            },
            Span::default(),
        ));
        start.statements.push(Statement::new(
            StatementKind::Jump(JumpTarget::Label(ScopedName::parse("main.jumped"))),
            Span::default(),
        ));
        let mut program = Program::new("refs");
        let mut main = Block::new("main", Span::default());
        let mut table = VarDecl::new(ScopedName::parse("main.table"), DataType::ArrayUw, Span::default());
        table.value = Some(VarInit::Array(vec![ArrayElement::AddressOf(ScopedName::parse(
            "main.vector",
        ))]));
        main.variables.push(table);
        main.subroutines.push(start);
        program.blocks.push(main);

        let references = referenced_subroutines(&program);
        assert!(references.is_used(&ScopedName::parse("main.called")));
        assert!(!references.needs_body(&ScopedName::parse("main.called")));
        assert!(references.needs_body(&ScopedName::parse("main.jumped")));
        assert!(references.needs_body(&ScopedName::parse("main.vector")));
        assert!(!references.is_used(&ScopedName::parse("main.other")));
    }
}
