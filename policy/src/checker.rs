// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The semantic checker & dependency visitor. One pass over a policy's
//! terms accomplishes type checking, per-direction legality, set/sub-policy
//! dependency resolution with cycle detection, and reject-reachability
//! tracking, all driven by a [`SemanticVarRw`].

use crate::ast::{Block, Node};
use crate::dependency::Dependency;
use crate::dispatch::{type_of_bin, type_of_un};
use crate::errors::{Diagnostic, PolicyError, SemanticError};
use crate::statement::{Direction, PolicyStatement};
use crate::value::Value;
use crate::varmap::VarMap;
use crate::varrw::SemanticVarRw;
use ahash::AHashSet;

/// Result of successfully checking one policy: the dependency edges to
/// install and a hint for the filter-manager.
#[derive(Debug, Clone, Default)]
pub struct CheckResult {
    pub sets: AHashSet<String>,
    pub subrs: AHashSet<String>,
    pub can_reject: bool,
}

struct Ctx<'a> {
    varmap: &'a VarMap,
    protocol: &'a str,
    svarrw: SemanticVarRw<'a>,
    set_map: &'a Dependency<Value>,
    policy_map: &'a Dependency<PolicyStatement>,
    sets: AHashSet<String>,
    subrs: AHashSet<String>,
    can_reject: bool,
    line: u32,
}

fn assign_compatible(var_type: &str, rhs_type: &str) -> bool {
    var_type == rhs_type || (var_type == "nexthop4" && rhs_type == "ipv4") || (var_type == "nexthop6" && rhs_type == "ipv6")
}

/// Type-check one AST node, recording dependency edges as `SetRef`/`Subr`
/// nodes are visited. Returns the node's result type, or `"void"` for
/// statement-only nodes with no value (`Accept`/`Reject`/`Next`/`Assign`/
/// `Proto`).
fn check_node(node: &Node, ctx: &mut Ctx) -> Result<&'static str, SemanticError> {
    match node {
        Node::Line(line, inner) => {
            ctx.line = *line;
            check_node(inner, ctx)
        }
        Node::Var(name) => {
            let id = ctx.varmap.var2id(ctx.protocol, name)?;
            ctx.svarrw.check_read(id)
        }
        Node::Elem(v) => Ok(v.type_name()),
        Node::SetRef(name) => {
            ctx.sets.insert(name.clone());
            ctx.set_map.get(name).map(Value::type_name).ok_or_else(|| SemanticError::UnknownSet(name.clone()))
        }
        Node::Un(op, child) => {
            let t = check_node(child, ctx)?;
            type_of_un(*op, t)
        }
        Node::Bin(op, l, r) => {
            let lt = check_node(l, ctx)?;
            let rt = check_node(r, ctx)?;
            type_of_bin(*op, lt, rt)
        }
        Node::Regex(_, child) => {
            let t = check_node(child, ctx)?;
            if t == "str" {
                Ok("bool")
            } else {
                Err(SemanticError::TypeMismatch { op: "regex".to_string(), operands: vec![t] })
            }
        }
        Node::Assign(name, modop, rhs) => {
            let id = ctx.varmap.var2id(ctx.protocol, name)?;
            let var_type = ctx.varmap.type_of(id)?;
            ctx.svarrw.check_write(id)?;
            let rhs_t = check_node(rhs, ctx)?;
            if let Some(op) = modop {
                type_of_bin(*op, var_type, rhs_t)?;
            } else if !assign_compatible(var_type, rhs_t) {
                return Err(SemanticError::TypeMismatch { op: "=".to_string(), operands: vec![var_type, rhs_t] });
            }
            Ok("void")
        }
        Node::Accept => Ok("void"),
        Node::Reject => {
            ctx.can_reject = true;
            Ok("void")
        }
        Node::Next(_) => Ok("void"),
        Node::Proto(_) => Ok("void"),
        Node::Subr(name) => {
            ctx.subrs.insert(name.clone());
            if ctx.policy_map.contains(name) {
                Ok("bool")
            } else {
                Err(SemanticError::UnknownSubPolicy(name.clone()))
            }
        }
        Node::PolicyGroup(names) => {
            for name in names {
                ctx.subrs.insert(name.clone());
                if !ctx.policy_map.contains(name) {
                    return Err(SemanticError::UnknownSubPolicy(name.clone()));
                }
            }
            Ok("bool")
        }
    }
}

fn contains_proto(node: &Node) -> bool {
    match node {
        Node::Line(_, inner) => contains_proto(inner),
        Node::Proto(_) => true,
        Node::Un(_, c) => contains_proto(c),
        Node::Bin(_, l, r) => contains_proto(l) || contains_proto(r),
        Node::Regex(_, c) => contains_proto(c),
        _ => false,
    }
}

/// DFS cycle detection over the sub-policy reference graph, using a
/// grey/black coloring. Runs over the *proposed* edge set for
/// `start`, not the currently-installed `PolicyMap` edges, so a
/// self-consistent new configuration never has to touch live state before
/// being rejected.
fn detect_cycle(policy_map: &Dependency<PolicyStatement>, start: &str, proposed: &AHashSet<String>) -> Result<(), SemanticError> {
    #[derive(PartialEq)]
    enum Color {
        Grey,
        Black,
    }
    let mut colors: std::collections::HashMap<String, Color> = std::collections::HashMap::new();
    let mut path = Vec::new();

    fn visit(
        node: &str,
        start: &str,
        proposed: &AHashSet<String>,
        policy_map: &Dependency<PolicyStatement>,
        colors: &mut std::collections::HashMap<String, Color>,
        path: &mut Vec<String>,
    ) -> Result<(), SemanticError> {
        if let Some(Color::Grey) = colors.get(node) {
            path.push(node.to_string());
            return Err(SemanticError::SubPolicyCycle(path.clone()));
        }
        if let Some(Color::Black) = colors.get(node) {
            return Ok(());
        }
        colors.insert(node.to_string(), Color::Grey);
        path.push(node.to_string());

        let edges: AHashSet<String> = if node == start {
            proposed.clone()
        } else {
            policy_map.get(node).map(|p| p.subrs.clone()).unwrap_or_default()
        };
        for next in &edges {
            visit(next, start, proposed, policy_map, colors, path)?;
        }

        path.pop();
        colors.insert(node.to_string(), Color::Black);
        Ok(())
    }

    visit(start, start, proposed, policy_map, &mut colors, &mut path)
}

/// Check `policy` for `direction`, returning its resolved dependency sets
/// on success. Does not mutate `set_map`/`policy_map` — the caller installs
/// the returned edges atomically.
pub fn check_policy(
    policy: &PolicyStatement,
    direction: Direction,
    protocol: &str,
    varmap: &VarMap,
    set_map: &Dependency<Value>,
    policy_map: &Dependency<PolicyStatement>,
) -> Result<CheckResult, PolicyError> {
    let mut ctx = Ctx {
        varmap,
        protocol,
        svarrw: SemanticVarRw::new(varmap, protocol),
        set_map,
        policy_map,
        sets: AHashSet::new(),
        subrs: AHashSet::new(),
        can_reject: false,
        line: 0,
    };

    for term in policy.iter_terms() {
        let diag = || Diagnostic::new().with_policy(policy.name.clone()).with_term(term.name.clone());

        if direction == Direction::Import {
            for stmt in term.block(Block::Source).iter() {
                if contains_proto(stmt) {
                    return Err(PolicyError::semantic(SemanticError::ProtoInImport, diag().with_block("source").with_line(ctx.line)));
                }
            }
            if !term.block(Block::Dest).is_empty() {
                return Err(PolicyError::semantic(SemanticError::DestMatchInImport, diag().with_block("dest")));
            }
        }

        if direction == Direction::Export && !term.block(Block::Action).is_empty() {
            let has_proto = term.block(Block::Source).iter().any(contains_proto);
            if !has_proto {
                return Err(PolicyError::semantic(SemanticError::MissingProtoInExport, diag().with_block("source")));
            }
        }

        for (block, name) in [(Block::Source, "source"), (Block::Dest, "dest"), (Block::Action, "action")] {
            for stmt in term.block(block).iter() {
                check_node(stmt, &mut ctx).map_err(|e| PolicyError::semantic(e, diag().with_block(name).with_line(ctx.line)))?;
            }
        }
    }

    detect_cycle(policy_map, &policy.name, &ctx.subrs)
        .map_err(|e| PolicyError::semantic(e, Diagnostic::new().with_policy(policy.name.clone())))?;

    Ok(CheckResult { sets: ctx.sets, subrs: ctx.subrs, can_reject: ctx.can_reject })
}

/// Resolve a term's declared source protocol, i.e. the `Proto(name)`
/// statement in its source-match block, if any (used by codegen to route a
/// term's fragment to the right `export-source-match` target).
pub fn term_source_protocol(term: &crate::statement::Term) -> Option<String> {
    for stmt in term.block(Block::Source).iter() {
        if let Some(name) = extract_proto(stmt) {
            return Some(name);
        }
    }
    None
}

fn extract_proto(node: &Node) -> Option<String> {
    match node {
        Node::Line(_, inner) => extract_proto(inner),
        Node::Proto(name) => Some(name.clone()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::ConfigNodeId;
    use crate::statement::Term;
    use crate::value::Value;
    use crate::varmap::Access;

    fn bgp_varmap() -> VarMap {
        let mut vm = VarMap::new();
        vm.declare("bgp", "med", "u32", Access::ReadWrite, 10);
        vm.declare("bgp", "policy-tags", "set32", Access::ReadWrite, 11);
        vm
    }

    #[test]
    fn import_rejects_proto_in_source() {
        let varmap = bgp_varmap();
        let set_map = Dependency::new();
        let policy_map = Dependency::new();
        let mut p = PolicyStatement::new("P");
        let mut t = Term::new("t1");
        t.block_mut(Block::Source).insert(ConfigNodeId::head(1), Node::Line(1, Box::new(Node::Proto("bgp".into()))));
        t.block_mut(Block::Action).insert(ConfigNodeId::head(2), Node::Accept);
        p.add_term(ConfigNodeId::head(1), t);

        let err = check_policy(&p, Direction::Import, "bgp", &varmap, &set_map, &policy_map).unwrap_err();
        assert!(matches!(err, PolicyError::Semantic { source: SemanticError::ProtoInImport, .. }));
    }

    #[test]
    fn export_requires_proto_before_nontrivial_action() {
        let varmap = bgp_varmap();
        let set_map = Dependency::new();
        let policy_map = Dependency::new();
        let mut p = PolicyStatement::new("P");
        let mut t = Term::new("t1");
        t.block_mut(Block::Action).insert(ConfigNodeId::head(1), Node::Accept);
        p.add_term(ConfigNodeId::head(1), t);

        let err = check_policy(&p, Direction::Export, "bgp", &varmap, &set_map, &policy_map).unwrap_err();
        assert!(matches!(err, PolicyError::Semantic { source: SemanticError::MissingProtoInExport, .. }));
    }

    #[test]
    fn detects_subr_self_cycle() {
        let varmap = VarMap::new();
        let set_map = Dependency::new();
        let mut policy_map = Dependency::new();
        let mut p = PolicyStatement::new("R");
        policy_map.create("R", PolicyStatement::new("R")).unwrap();
        let mut t = Term::new("t1");
        t.block_mut(Block::Source)
            .insert(ConfigNodeId::head(1), Node::Line(1, Box::new(Node::Subr("R".into()))));
        p.add_term(ConfigNodeId::head(1), t);

        let err = check_policy(&p, Direction::Import, "bgp", &varmap, &set_map, &policy_map).unwrap_err();
        assert!(matches!(err, PolicyError::Semantic { source: SemanticError::SubPolicyCycle(_), .. }));
    }

    #[test]
    fn resolves_set_dependency() {
        let varmap = bgp_varmap();
        let mut set_map = Dependency::new();
        set_map.create("S", Value::Set32(ahash::AHashSet::from_iter([1, 2, 3]))).unwrap();
        let policy_map = Dependency::new();
        let mut p = PolicyStatement::new("Q");
        let mut t = Term::new("t1");
        t.block_mut(Block::Source).insert(
            ConfigNodeId::head(1),
            crate::parser::parse("med in S", 1).unwrap(),
        );
        t.block_mut(Block::Action).insert(ConfigNodeId::head(2), Node::Accept);
        p.add_term(ConfigNodeId::head(1), t);

        let res = check_policy(&p, Direction::Import, "bgp", &varmap, &set_map, &policy_map).unwrap();
        assert!(res.sets.contains("S"));
    }
}
