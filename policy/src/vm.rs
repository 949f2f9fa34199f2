// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The stack-machine executor. Executes one linked [`CodeImage`] against
//! one route via a caller-supplied [`VarRw`], returning a [`Verdict`]. Any
//! [`RuntimeError`] is fail-soft: the route falls through to
//! [`Verdict::Default`] rather than panicking or poisoning later routes.

use crate::code::{CodeImage, Instruction};
use crate::dependency::Dependency;
use crate::dispatch::{eval_bin, eval_un};
use crate::errors::{Diagnostic, PolicyError, RuntimeError};
use crate::value::Value;
use crate::varmap::TRACE_VAR_ID;
use crate::varrw::VarRw;
use ahash::AHashMap;

/// The outcome of running a route through one target's compiled filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Accept,
    Reject,
    /// No term reached a terminal `accept`/`reject` — the filter's
    /// configured default applies.
    Default,
}

/// A regex pool compiled once per linked [`CodeImage`], since regex
/// patterns are compile-time constants, indexed the same way as the
/// image's `regexes` symbol table.
pub struct RegexPool(Vec<regex::Regex>);

impl RegexPool {
    /// Compile every pattern in `image`. Patterns are validated at codegen
    /// time ([`crate::codegen`] rejects an invalid pattern before an image
    /// is ever linked), so a compile failure here indicates a linker bug.
    pub fn compile(image: &CodeImage) -> Self {
        RegexPool(
            image
                .regexes
                .iter()
                .map(|p| regex::Regex::new(p).expect("codegen validates regex patterns before linking"))
                .collect(),
        )
    }
}

/// A named sub-policy, pre-compiled to a boolean-verdict fragment: lowered
/// the same way as an import filter, since a sub-policy's terms resolve to
/// the same `accept`/`reject` vocabulary — calling it just turns that
/// verdict into a `Bool` on the caller's stack instead of terminating the
/// caller's own execution.
pub struct SubrImage {
    pub image: CodeImage,
    pub regexes: RegexPool,
}

impl SubrImage {
    pub fn compile(policy: &crate::statement::PolicyStatement, protocol: &str, varmap: &crate::varmap::VarMap) -> Result<Self, PolicyError> {
        let image = crate::codegen::codegen_import(policy, protocol, varmap)?;
        let regexes = RegexPool::compile(&image);
        Ok(SubrImage { image, regexes })
    }
}

/// Executes one [`CodeImage`] against one route. Borrows its collaborators
/// for the duration of a single `run` call; a fresh [`Vm`] (or at least a
/// fresh operand stack) is used per route.
pub struct Vm<'a> {
    image: &'a CodeImage,
    regexes: &'a RegexPool,
    set_map: &'a Dependency<Value>,
    subrs: &'a AHashMap<String, SubrImage>,
    varrw: &'a mut dyn VarRw,
    stack: Vec<Value>,
    traced: bool,
}

impl<'a> Vm<'a> {
    pub fn new(
        image: &'a CodeImage,
        regexes: &'a RegexPool,
        set_map: &'a Dependency<Value>,
        subrs: &'a AHashMap<String, SubrImage>,
        varrw: &'a mut dyn VarRw,
    ) -> Self {
        let traced = matches!(varrw.read(TRACE_VAR_ID), Value::Bool(true));
        Vm { image, regexes, set_map, subrs, varrw, stack: Vec::new(), traced }
    }

    fn pop(&mut self, offset: usize) -> Result<Value, RuntimeError> {
        self.stack.pop().ok_or(RuntimeError::StackUnderflow(offset))
    }

    /// Run the whole linked image for one route. A target's `CodeImage` may
    /// concatenate several terms/policies; the first `Accept`/`Reject`
    /// reached wins. `OnFalseExit` on a false predicate, and `next term`/
    /// `next policy`, terminate only the current term or policy: they jump
    /// to the image's recorded term/policy boundary rather than falling
    /// into the following term's or policy's own instructions, discarding
    /// the stack down to empty as they go — a term with no terminal action
    /// simply falls through to the next term, carrying no operands
    /// forward.
    pub fn run(&mut self) -> Verdict {
        let mut pc = 0usize;
        while pc < self.image.instructions.len() {
            if self.traced {
                tracing::debug!(pc, instr = ?self.image.instructions[pc], stack_depth = self.stack.len(), "vm step");
            }
            match self.step(pc) {
                Ok(StepOutcome::Continue) => pc += 1,
                Ok(StepOutcome::Accept) => {
                    self.varrw.sync();
                    return Verdict::Accept;
                }
                Ok(StepOutcome::Reject) => {
                    self.varrw.sync();
                    return Verdict::Reject;
                }
                Ok(StepOutcome::FellOffTerm) | Ok(StepOutcome::NextTerm) => {
                    self.stack.clear();
                    pc = self.image.term_end_after(pc);
                }
                Ok(StepOutcome::NextPolicy) => {
                    self.stack.clear();
                    pc = self.image.policy_end_after(pc);
                }
                Err(e) => {
                    let err = PolicyError::runtime(e, Diagnostic::new().with_line(pc as u32));
                    tracing::error!(pc, error = %err, "runtime error, falling through to default verdict");
                    return Verdict::Default;
                }
            }
        }
        self.varrw.sync();
        Verdict::Default
    }

    fn step(&mut self, pc: usize) -> Result<StepOutcome, RuntimeError> {
        match &self.image.instructions[pc] {
            Instruction::Push(v) => {
                self.stack.push(v.clone());
                Ok(StepOutcome::Continue)
            }
            Instruction::PushSet(idx) => {
                let name = self.image.sets.get(*idx as usize).ok_or(RuntimeError::TypeMismatch(pc))?;
                let v = self.set_map.get(name).cloned().unwrap_or(Value::Null);
                self.stack.push(v);
                Ok(StepOutcome::Continue)
            }
            Instruction::Load(id) => {
                let v = self.varrw.read(*id).clone();
                self.stack.push(v);
                Ok(StepOutcome::Continue)
            }
            Instruction::Store(id) => {
                let v = self.pop(pc)?;
                self.varrw.write(*id, v);
                Ok(StepOutcome::Continue)
            }
            Instruction::BinOp(op) => {
                let l = self.pop(pc)?;
                let r = self.pop(pc)?;
                let v = eval_bin(*op, &l, &r).ok_or(RuntimeError::TypeMismatch(pc))?;
                self.stack.push(v);
                Ok(StepOutcome::Continue)
            }
            Instruction::UnOp(op) => {
                let v = self.pop(pc)?;
                let out = eval_un(*op, &v).ok_or(RuntimeError::TypeMismatch(pc))?;
                self.stack.push(out);
                Ok(StepOutcome::Continue)
            }
            Instruction::Regex(idx) => {
                let v = self.pop(pc)?;
                let re = self.regexes.0.get(*idx as usize).ok_or(RuntimeError::TypeMismatch(pc))?;
                let matched = crate::dispatch::eval_regex(re, &v).ok_or(RuntimeError::TypeMismatch(pc))?;
                self.stack.push(Value::Bool(matched));
                Ok(StepOutcome::Continue)
            }
            Instruction::OnFalseExit => {
                let v = self.pop(pc)?;
                match v {
                    Value::Bool(true) => Ok(StepOutcome::Continue),
                    Value::Bool(false) => Ok(StepOutcome::FellOffTerm),
                    _ => Err(RuntimeError::TypeMismatch(pc)),
                }
            }
            Instruction::Accept => Ok(StepOutcome::Accept),
            Instruction::Reject => Ok(StepOutcome::Reject),
            Instruction::NextPolicy => Ok(StepOutcome::NextPolicy),
            Instruction::NextTerm => Ok(StepOutcome::NextTerm),
            Instruction::Subr(idx) => {
                let name = self.image.subrs.get(*idx as usize).ok_or(RuntimeError::TypeMismatch(pc))?.clone();
                let verdict = self.run_subr(&name, pc)?;
                self.stack.push(Value::Bool(verdict == Verdict::Accept));
                Ok(StepOutcome::Continue)
            }
        }
    }

    /// Execute a named sub-policy as a nested filter invocation against the
    /// same route: writes the sub-policy performs are synced through the
    /// shared `VarRw` immediately, so they are visible to the caller's
    /// remaining instructions.
    fn run_subr(&mut self, name: &str, pc: usize) -> Result<Verdict, RuntimeError> {
        let sub = self.subrs.get(name).ok_or(RuntimeError::TypeMismatch(pc))?;
        let mut nested = Vm {
            image: &sub.image,
            regexes: &sub.regexes,
            set_map: self.set_map,
            subrs: self.subrs,
            varrw: &mut *self.varrw,
            stack: Vec::new(),
            traced: self.traced,
        };
        Ok(nested.run())
    }
}

enum StepOutcome {
    Continue,
    Accept,
    Reject,
    FellOffTerm,
    NextPolicy,
    NextTerm,
}
