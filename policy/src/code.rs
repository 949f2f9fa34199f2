// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The VM's instruction set and the linked `CodeImage` it executes.

use crate::dispatch::{BinOp, UnOp};
use crate::errors::PolicyError;
use crate::value::Value;
use crate::varmap::Id;
use serde::{Deserialize, Serialize};

/// A filter kind, the second axis of a [`Target`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterKind {
    Import,
    ExportSourceMatch,
    Export,
}

/// The unit of linking and delivery: `(protocol, filter-kind)`. All code
/// compiled for a `(protocol, kind)` pair is merged by the linker into one
/// [`CodeImage`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Target {
    pub protocol: String,
    pub kind: FilterKind,
}

impl Target {
    pub fn new(protocol: impl Into<String>, kind: FilterKind) -> Self {
        Target { protocol: protocol.into(), kind }
    }
}

/// Reserved id for the nexthop4 variable. Generic variables that share ids
/// across protocols are allocated a private range below any
/// protocol-specific id a `VarMap::declare` caller uses.
pub const NEXTHOP4_VAR_ID: Id = 1;
pub const NEXTHOP6_VAR_ID: Id = 2;
pub const POLICY_TAGS_VAR_ID: Id = 3;
pub const FILTER_SLOT_VAR_ID: Id = 4;

/// Allocates redistribution tags monotonically. A single instance is
/// shared by the whole `Configuration` across commits so the counter is
/// genuinely global, never reused.
#[derive(Debug, Default)]
pub struct TagAllocator {
    next: u32,
}

impl TagAllocator {
    pub fn new() -> Self {
        Self { next: 0 }
    }

    /// Allocate a fresh tag. Fails fatally on 32-bit overflow.
    pub fn allocate(&mut self) -> Result<u32, PolicyError> {
        let tag = self.next;
        self.next = self.next.checked_add(1).ok_or(PolicyError::TagOverflow)?;
        Ok(tag)
    }
}

/// A single VM instruction. Operand order for N-ary operators: top-of-stack
/// is the *first* argument — the code generator emits operand-producing
/// code in reverse source order to uphold this.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Instruction {
    /// Push an immediate value.
    Push(Value),
    /// Push the value referenced by a set name, resolved at execute time
    /// via the `SetMap` (index into the image's symbol table).
    PushSet(u32),
    /// Read a variable.
    Load(Id),
    /// Write a variable (buffered until `VarRw::sync`).
    Store(Id),
    /// Apply a binary operator to the top two stack values.
    BinOp(BinOp),
    /// Apply a unary operator to the top stack value.
    UnOp(UnOp),
    /// Compiled regex match (index into the image's `RegexPool`).
    Regex(u32),
    /// If top is `Bool(false)`, terminate the current term; otherwise
    /// leave the stack unchanged.
    OnFalseExit,
    Accept,
    Reject,
    NextPolicy,
    NextTerm,
    /// Execute a named sub-policy; its verdict becomes a `Bool` on the
    /// caller's stack (index into the image's symbol table).
    Subr(u32),
}

/// The wire payload handed to the filter-manager collaborator: a framed
/// instruction sequence plus a symbol table. `sets`/`regexes` are indexed
/// by `PushSet`/`Regex`/`Subr` operands; `tags` records the redistribution
/// tags this image's policies may assign, for the receiver's own
/// bookkeeping. `term_ends`/`policy_ends` hold, in ascending order, the
/// exclusive end offset of each term's and each policy's instruction run —
/// `run` jumps to these on early term/policy exit instead of falling
/// through into the next term's or policy's own code. The exact byte
/// encoding is left to the filter-manager collaborator (out of scope);
/// `Serialize`/`Deserialize` are derived so a collaborator can pick its own
/// encoder.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CodeImage {
    pub instructions: Vec<Instruction>,
    pub sets: Vec<String>,
    pub regexes: Vec<String>,
    pub subrs: Vec<String>,
    pub tags: Vec<u32>,
    pub term_ends: Vec<usize>,
    pub policy_ends: Vec<usize>,
}

impl CodeImage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    /// Record that a term's own code ends at the current instruction
    /// count. Called by the code generator once per term, right after that
    /// term's match and action code has been appended.
    pub fn mark_term_end(&mut self) {
        self.term_ends.push(self.instructions.len());
    }

    /// Record that a policy's own code ends at the current instruction
    /// count. Called by the code generator once per policy (or per
    /// export-source-match fragment), right after its last term.
    pub fn mark_policy_end(&mut self) {
        self.policy_ends.push(self.instructions.len());
    }

    /// The smallest recorded term end strictly after `pc`, or the end of
    /// the instruction stream if `pc` lies in the last term. Used by `run`
    /// to skip the remainder of the current term on `FellOffTerm`/
    /// `NextTerm` without executing its action code unconditionally.
    pub fn term_end_after(&self, pc: usize) -> usize {
        self.term_ends
            .iter()
            .copied()
            .find(|&end| end > pc)
            .unwrap_or(self.instructions.len())
    }

    /// The smallest recorded policy end strictly after `pc`, analogous to
    /// [`Self::term_end_after`] but for `NextPolicy`.
    pub fn policy_end_after(&self, pc: usize) -> usize {
        self.policy_ends
            .iter()
            .copied()
            .find(|&end| end > pc)
            .unwrap_or(self.instructions.len())
    }

    /// Concatenate `other`'s instructions after `self`'s, remapping its
    /// symbol-table indices and term/policy boundaries to land after
    /// `self`'s own entries. Used by the linker to merge per-policy
    /// fragments that share a target.
    pub fn append(&mut self, mut other: CodeImage) {
        let set_base = self.sets.len() as u32;
        let regex_base = self.regexes.len() as u32;
        let subr_base = self.subrs.len() as u32;
        let instr_base = self.instructions.len();
        for instr in &mut other.instructions {
            match instr {
                Instruction::PushSet(idx) => *idx += set_base,
                Instruction::Regex(idx) => *idx += regex_base,
                Instruction::Subr(idx) => *idx += subr_base,
                _ => {}
            }
        }
        self.instructions.extend(other.instructions);
        self.sets.extend(other.sets);
        self.regexes.extend(other.regexes);
        self.subrs.extend(other.subrs);
        self.tags.extend(other.tags);
        self.term_ends.extend(other.term_ends.iter().map(|end| end + instr_base));
        self.policy_ends.extend(other.policy_ends.iter().map(|end| end + instr_base));
    }
}
