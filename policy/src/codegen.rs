// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The code generator & linker. Lowers a checked [`PolicyStatement`] to a
//! per-target [`CodeImage`] fragment, and links per-policy fragments that
//! share a target into one flat instruction stream.
//!
//! **[design choice, recorded in DESIGN.md]** The split of a term's three
//! blocks across the `export`/`export-source-match` targets: the
//! `export-source-match` fragment (one per distinct source protocol named
//! by a term's `Proto` directive) carries that term's source-match
//! predicates (minus the `Proto` statement itself, which is a compile-time
//! target selector, not a runtime check) followed by only its
//! `policy-tags`-assigning statements, terminated with `Accept` so the tag
//! survives to the consuming protocol. The `export` fragment (one per
//! consuming protocol) carries every term's dest-match predicates followed
//! by its remaining action statements (everything except the
//! `policy-tags` assignment, already applied at the source).

use crate::ast::{Block, Node, NextTarget};
use crate::code::{CodeImage, Instruction, TagAllocator, Target, POLICY_TAGS_VAR_ID};
use crate::errors::{Diagnostic, PolicyError, SemanticError};
use crate::statement::{PolicyStatement, Term};
use crate::value::Value;
use crate::varmap::VarMap;
use std::collections::HashMap;

/// Per-fragment codegen state: interns set/regex/subr names into the
/// fragment's own symbol table (remapped to global offsets by
/// [`CodeImage::append`] at link time).
#[derive(Default)]
struct FragmentCtx {
    image: CodeImage,
    set_index: HashMap<String, u32>,
    regex_index: HashMap<String, u32>,
    subr_index: HashMap<String, u32>,
}

impl FragmentCtx {
    fn intern_set(&mut self, name: &str) -> u32 {
        if let Some(&i) = self.set_index.get(name) {
            return i;
        }
        let i = self.image.sets.len() as u32;
        self.image.sets.push(name.to_string());
        self.set_index.insert(name.to_string(), i);
        i
    }

    fn intern_regex(&mut self, pattern: &str) -> Result<u32, SemanticError> {
        if let Some(&i) = self.regex_index.get(pattern) {
            return Ok(i);
        }
        regex::Regex::new(pattern).map_err(|e| SemanticError::TypeMismatch {
            op: format!("invalid regex pattern {pattern:?}: {e}"),
            operands: vec!["str"],
        })?;
        let i = self.image.regexes.len() as u32;
        self.image.regexes.push(pattern.to_string());
        self.regex_index.insert(pattern.to_string(), i);
        Ok(i)
    }

    fn intern_subr(&mut self, name: &str) -> u32 {
        if let Some(&i) = self.subr_index.get(name) {
            return i;
        }
        let i = self.image.subrs.len() as u32;
        self.image.subrs.push(name.to_string());
        self.subr_index.insert(name.to_string(), i);
        i
    }
}

/// Lower an expression node to code leaving one `Value` on the stack.
/// Operand order for binary operators: the code generator emits the right
/// operand's code first so the left operand lands on top of the stack —
/// top-of-stack is always the first argument.
fn lower_expr(node: &Node, protocol: &str, varmap: &VarMap, fc: &mut FragmentCtx) -> Result<Vec<Instruction>, SemanticError> {
    Ok(match node {
        Node::Line(_, inner) => lower_expr(inner, protocol, varmap, fc)?,
        Node::Var(name) => {
            let id = varmap.var2id(protocol, name)?;
            vec![Instruction::Load(id)]
        }
        Node::Elem(v) => vec![Instruction::Push(v.clone())],
        Node::SetRef(name) => vec![Instruction::PushSet(fc.intern_set(name))],
        Node::Un(op, child) => {
            let mut code = lower_expr(child, protocol, varmap, fc)?;
            code.push(Instruction::UnOp(*op));
            code
        }
        Node::Bin(op, l, r) => {
            let mut code = lower_expr(r, protocol, varmap, fc)?;
            code.extend(lower_expr(l, protocol, varmap, fc)?);
            code.push(Instruction::BinOp(*op));
            code
        }
        Node::Regex(pattern, child) => {
            let mut code = lower_expr(child, protocol, varmap, fc)?;
            let idx = fc.intern_regex(pattern)?;
            code.push(Instruction::Regex(idx));
            code
        }
        Node::Subr(name) => vec![Instruction::Subr(fc.intern_subr(name))],
        Node::PolicyGroup(names) => {
            // Desugars to a left fold of `&&` over each member's verdict:
            // `policy (P1, P2)` is true iff every member accepts.
            let mut names = names.iter();
            let first = names.next().expect("parser never produces an empty policy group");
            let mut code = vec![Instruction::Subr(fc.intern_subr(first))];
            for name in names {
                code.push(Instruction::Subr(fc.intern_subr(name)));
                code.push(Instruction::BinOp(crate::dispatch::BinOp::And));
            }
            code
        }
        other => {
            return Err(SemanticError::TypeMismatch {
                op: format!("{other:?} is not a value expression"),
                operands: vec![],
            });
        }
    })
}

/// Lower a match block (source or dest): each statement leaves a `Bool`,
/// followed by `OnFalseExit` so a false predicate terminates the term
/// without running its action block.
fn lower_match_block<'a>(
    stmts: impl Iterator<Item = &'a Node>,
    protocol: &str,
    varmap: &VarMap,
    fc: &mut FragmentCtx,
) -> Result<Vec<Instruction>, SemanticError> {
    let mut out = Vec::new();
    for stmt in stmts {
        out.extend(lower_expr(stmt, protocol, varmap, fc)?);
        out.push(Instruction::OnFalseExit);
    }
    Ok(out)
}

fn is_policy_tags_assign(node: &Node) -> bool {
    match node {
        Node::Line(_, inner) => is_policy_tags_assign(inner),
        Node::Assign(name, _, _) => name == "policy-tags",
        _ => false,
    }
}

/// Lower one action statement. A `policy-tags` assignment ignores the
/// user-written right-hand side literal and instead stores the tag the
/// caller allocated for it: the literal in the source, e.g. `+= 7`, is a
/// user-facing label, not the wire tag — the freshly-allocated 32-bit
/// value is what travels to the consumer.
fn lower_action_stmt(
    node: &Node,
    protocol: &str,
    varmap: &VarMap,
    fc: &mut FragmentCtx,
    allocated_tag: Option<u32>,
) -> Result<Vec<Instruction>, SemanticError> {
    match node {
        Node::Line(_, inner) => lower_action_stmt(inner, protocol, varmap, fc, allocated_tag),
        Node::Accept => Ok(vec![Instruction::Accept]),
        Node::Reject => Ok(vec![Instruction::Reject]),
        Node::Next(NextTarget::Policy) => Ok(vec![Instruction::NextPolicy]),
        Node::Next(NextTarget::Term) => Ok(vec![Instruction::NextTerm]),
        Node::Subr(name) => Ok(vec![Instruction::Subr(fc.intern_subr(name))]),
        Node::PolicyGroup(_) => lower_expr(node, protocol, varmap, fc),
        Node::Assign(name, modop, _rhs) if name == "policy-tags" => {
            let id = varmap.var2id(protocol, name).unwrap_or(POLICY_TAGS_VAR_ID);
            let tag = allocated_tag.expect("tag must be pre-allocated before lowering a policy-tags assignment");
            let mut code = Vec::new();
            if let Some(op) = modop {
                code.push(Instruction::Push(Value::U32(tag)));
                code.push(Instruction::Load(id));
                code.push(Instruction::BinOp(*op));
            } else {
                code.push(Instruction::Push(Value::U32(tag)));
            }
            code.push(Instruction::Store(id));
            Ok(code)
        }
        Node::Assign(name, modop, rhs) => {
            let id = varmap.var2id(protocol, name)?;
            let mut code = lower_expr(rhs, protocol, varmap, fc)?;
            if let Some(op) = modop {
                code.push(Instruction::Load(id));
                code.push(Instruction::BinOp(*op));
            }
            code.push(Instruction::Store(id));
            Ok(code)
        }
        other => Err(SemanticError::TypeMismatch { op: format!("{other:?} is not a valid action statement"), operands: vec![] }),
    }
}

/// Lower an import policy's single term into the `(protocol, import)`
/// fragment: source-match predicates, then the full action block.
fn lower_import_term(term: &Term, protocol: &str, varmap: &VarMap, fc: &mut FragmentCtx) -> Result<Vec<Instruction>, SemanticError> {
    let mut out = lower_match_block(term.block(Block::Source).iter(), protocol, varmap, fc)?;
    for stmt in term.block(Block::Action).iter() {
        out.extend(lower_action_stmt(stmt, protocol, varmap, fc, None)?);
    }
    Ok(out)
}

/// Lower one term's contribution to the `export-source-match` fragment for
/// `want_protocol`: only participates if the term's declared source
/// protocol matches, in which case it emits its (Proto-stripped)
/// source-match predicates followed by its tag-assigning action
/// statements.
fn lower_export_source_match_term(
    term: &Term,
    want_protocol: &str,
    varmap: &VarMap,
    fc: &mut FragmentCtx,
    tags: &mut TagAllocator,
    collected_tags: &mut Vec<u32>,
) -> Result<Vec<Instruction>, PolicyError> {
    let Some(term_protocol) = crate::checker::term_source_protocol(term) else {
        return Ok(Vec::new());
    };
    if term_protocol != want_protocol {
        return Ok(Vec::new());
    }

    let diag = || Diagnostic::new().with_term(term.name.clone()).with_block("source");
    let non_proto_source = term.block(Block::Source).iter().filter(|n| !matches!(strip_line(n), Node::Proto(_)));
    let mut out =
        lower_match_block(non_proto_source, &term_protocol, varmap, fc).map_err(|e| PolicyError::semantic(e, diag()))?;

    let mut wrote_tag = false;
    for stmt in term.block(Block::Action).iter() {
        if is_policy_tags_assign(stmt) {
            let tag = tags.allocate()?;
            collected_tags.push(tag);
            out.extend(
                lower_action_stmt(stmt, &term_protocol, varmap, fc, Some(tag))
                    .map_err(|e| PolicyError::semantic(e, Diagnostic::new().with_term(term.name.clone()).with_block("action")))?,
            );
            wrote_tag = true;
        }
    }
    if wrote_tag {
        out.push(Instruction::Accept);
    }
    Ok(out)
}

/// Lower one term's contribution to the `export` fragment for the
/// consuming protocol: dest-match predicates, then every action statement
/// except the `policy-tags` assignment (already applied at the source).
fn lower_export_term(term: &Term, protocol: &str, varmap: &VarMap, fc: &mut FragmentCtx) -> Result<Vec<Instruction>, SemanticError> {
    let mut out = lower_match_block(term.block(Block::Dest).iter(), protocol, varmap, fc)?;
    for stmt in term.block(Block::Action).iter() {
        if is_policy_tags_assign(stmt) {
            continue;
        }
        out.extend(lower_action_stmt(stmt, protocol, varmap, fc, None)?);
    }
    Ok(out)
}

fn strip_line(node: &Node) -> &Node {
    match node {
        Node::Line(_, inner) => strip_line(inner),
        other => other,
    }
}

/// Lower a checked import policy to its one `(protocol, import)` fragment.
pub fn codegen_import(policy: &PolicyStatement, protocol: &str, varmap: &VarMap) -> Result<CodeImage, PolicyError> {
    let mut fc = FragmentCtx::default();
    for term in policy.iter_terms() {
        let code =
            lower_import_term(term, protocol, varmap, &mut fc).map_err(|e| PolicyError::semantic(e, Diagnostic::new().with_policy(policy.name.clone()).with_term(term.name.clone())))?;
        fc.image.instructions.extend(code);
        fc.image.mark_term_end();
    }
    fc.image.mark_policy_end();
    Ok(fc.image)
}

/// Lower a checked export policy. Returns the `export` fragment for
/// `consumer_protocol`, plus one `export-source-match` fragment per
/// distinct source protocol named across its terms.
pub fn codegen_export(
    policy: &PolicyStatement,
    consumer_protocol: &str,
    varmap: &VarMap,
    tags: &mut TagAllocator,
) -> Result<(CodeImage, HashMap<String, CodeImage>), PolicyError> {
    let mut export_fc = FragmentCtx::default();
    for term in policy.iter_terms() {
        let code = lower_export_term(term, consumer_protocol, varmap, &mut export_fc)
            .map_err(|e| PolicyError::semantic(e, Diagnostic::new().with_policy(policy.name.clone()).with_term(term.name.clone())))?;
        export_fc.image.instructions.extend(code);
        export_fc.image.mark_term_end();
    }
    export_fc.image.mark_policy_end();

    let mut source_protocols: Vec<String> = Vec::new();
    for term in policy.iter_terms() {
        if let Some(p) = crate::checker::term_source_protocol(term) {
            if !source_protocols.contains(&p) {
                source_protocols.push(p);
            }
        }
    }

    let mut source_match_images = HashMap::new();
    for src_protocol in source_protocols {
        let mut fc = FragmentCtx::default();
        let mut collected_tags = Vec::new();
        for term in policy.iter_terms() {
            let code = lower_export_source_match_term(term, &src_protocol, varmap, &mut fc, tags, &mut collected_tags)?;
            fc.image.instructions.extend(code);
            fc.image.mark_term_end();
        }
        fc.image.mark_policy_end();
        fc.image.tags = collected_tags;
        source_match_images.insert(src_protocol, fc.image);
    }

    Ok((export_fc.image, source_match_images))
}

/// Link every per-policy fragment sharing `target`, in `policies` list
/// order, into one flat instruction stream.
pub fn link(target: &Target, fragments: impl IntoIterator<Item = CodeImage>) -> CodeImage {
    let mut out = CodeImage::new();
    for frag in fragments {
        out.append(frag);
    }
    tracing::debug!(protocol = %target.protocol, kind = ?target.kind, instructions = out.instructions.len(), "linked target");
    out
}
