// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Canonical AST-to-string printer. Used by the round-trip parse property
//! and by diagnostics that want to show a user their statement back in
//! canonical form.

use crate::ast::{Node, NextTarget};
use crate::dispatch::{BinOp, UnOp};
use crate::value::{AsSegment, NextHop4, NextHop6, Value};

fn print_value(v: &Value) -> String {
    match v {
        Value::U32(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Str(s) => format!("\"{s}\""),
        Value::IPv4(a) => a.to_string(),
        Value::IPv6(a) => a.to_string(),
        Value::IPv4Net(n) => n.to_string(),
        Value::IPv6Net(n) => n.to_string(),
        Value::NextHop4(NextHop4::Addr(a)) => a.to_string(),
        Value::NextHop4(NextHop4::SelfAddr) | Value::NextHop6(NextHop6::SelfAddr) => "self".to_string(),
        Value::NextHop4(NextHop4::PeerAddress) | Value::NextHop6(NextHop6::PeerAddress) => "peer-address".to_string(),
        Value::NextHop4(NextHop4::Discard) | Value::NextHop6(NextHop6::Discard) => "discard".to_string(),
        Value::NextHop4(NextHop4::Reject) | Value::NextHop6(NextHop6::Reject) => "reject".to_string(),
        Value::NextHop4(NextHop4::NextTable) | Value::NextHop6(NextHop6::NextTable) => "next-table".to_string(),
        Value::NextHop6(NextHop6::Addr(a)) => a.to_string(),
        Value::ASPath(segs) => segs
            .iter()
            .map(|s| match s {
                AsSegment::Seq(n) => n.to_string(),
                AsSegment::Set(v) => format!("{{{}}}", v.iter().map(u32::to_string).collect::<Vec<_>>().join(",")),
            })
            .collect::<Vec<_>>()
            .join(" "),
        Value::CommunitySet(s) | Value::Set32(s) => {
            let mut items: Vec<_> = s.iter().copied().collect();
            items.sort_unstable();
            format!("{{{}}}", items.iter().map(u32::to_string).collect::<Vec<_>>().join(","))
        }
        Value::FilterHandle(_) => "<filter>".to_string(),
        Value::Null => "null".to_string(),
    }
}

fn modop_str(op: &Option<BinOp>) -> &'static str {
    match op {
        None => "=",
        Some(BinOp::Add) => "+=",
        Some(BinOp::Sub) => "-=",
        Some(BinOp::Mul) => "*=",
        _ => "=",
    }
}

/// Print `node` in the same canonical syntax [`crate::parser::parse`]
/// accepts, so that `parse(print(parse(s))) == parse(s)`.
pub fn print(node: &Node) -> String {
    match node {
        Node::Line(_, inner) => print(inner),
        Node::Var(name) => name.clone(),
        Node::Elem(v) => print_value(v),
        Node::SetRef(name) => name.clone(),
        Node::Un(UnOp::Not, child) => format!("!{}", print(child)),
        Node::Un(UnOp::Head, child) => format!("{} head", print(child)),
        Node::Un(UnOp::Ctr, child) => format!("{} ctr", print(child)),
        Node::Bin(op, l, r) => {
            if let Node::SetRef(name) = r.as_ref() {
                match op {
                    BinOp::Eq => return format!("{} in {}", print(l), name),
                    BinOp::NEInt => return format!("{} not in {}", print(l), name),
                    _ => {}
                }
            }
            format!("{} {} {}", print(l), op, print(r))
        }
        Node::Regex(pattern, child) => format!("{} regex \"{pattern}\"", print(child)),
        Node::Assign(name, modop, rhs) => format!("{name} {} {}", modop_str(modop), print(rhs)),
        Node::Accept => "accept".to_string(),
        Node::Reject => "reject".to_string(),
        Node::Next(NextTarget::Policy) => "next policy".to_string(),
        Node::Next(NextTarget::Term) => "next term".to_string(),
        Node::Proto(name) => format!("protocol {name}"),
        Node::Subr(name) => format!("policy {name}"),
        Node::PolicyGroup(names) => format!("policy ({})", names.join(", ")),
    }
}
