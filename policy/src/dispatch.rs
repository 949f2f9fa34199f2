// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The operator dispatcher: a flat table keyed by `(operator, operand
//! type(s))`. Kept as two plain `match` functions (type propagation and
//! evaluation) rather than per-type trait objects so the supported set
//! stays enumerable for the dispatcher-totality test below.

use crate::errors::SemanticError;
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinOp {
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
    And,
    Or,
    Xor,
    Add,
    Sub,
    Mul,
    NEInt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnOp {
    Not,
    Head,
    Ctr,
}

impl std::fmt::Display for BinOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            BinOp::Eq => "==",
            BinOp::Ne => "!=",
            BinOp::Lt => "<",
            BinOp::Gt => ">",
            BinOp::Le => "<=",
            BinOp::Ge => ">=",
            BinOp::And => "&&",
            BinOp::Or => "||",
            BinOp::Xor => "^",
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::NEInt => "NEInt",
        };
        f.write_str(s)
    }
}

impl std::fmt::Display for UnOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            UnOp::Not => "!",
            UnOp::Head => "head",
            UnOp::Ctr => "ctr",
        };
        f.write_str(s)
    }
}

/// Returns the result type name for `(op, left-type, right-type)`, or an
/// error if no dispatcher entry exists. Used at semantic-check time.
pub fn type_of_bin(op: BinOp, lt: &'static str, rt: &'static str) -> Result<&'static str, SemanticError> {
    use BinOp::*;
    let ordered_numeric = matches!((lt, rt), ("u32", "u32") | ("ipv4", "ipv4") | ("ipv6", "ipv6"));
    let eq_comparable = matches!(
        (lt, rt),
        ("u32", "u32")
            | ("bool", "bool")
            | ("str", "str")
            | ("ipv4", "ipv4")
            | ("ipv6", "ipv6")
            | ("ipv4net", "ipv4net")
            | ("ipv6net", "ipv6net")
            | ("aspath", "aspath")
            | ("communityset", "communityset")
            | ("u32", "set32")
            | ("set32", "u32")
    );
    match (op, lt, rt) {
        (Eq, _, _) | (Ne, _, _) if eq_comparable => Ok("bool"),
        (Lt | Gt | Le | Ge, _, _) if ordered_numeric => Ok("bool"),
        (And | Or | Xor, "bool", "bool") => Ok("bool"),
        (Add | Sub | Mul, "u32", "u32") => Ok("u32"),
        // `policy-tags += <tag>`: accumulating a redistribution tag into a
        // set-typed variable, not arithmetic.
        (Add, "set32", "u32") => Ok("set32"),
        (NEInt, "u32", "u32") => Ok("bool"),
        (NEInt, "u32", "set32") => Ok("bool"),
        (NEInt, "set32", "u32") => Ok("bool"),
        _ => Err(SemanticError::TypeMismatch {
            op: op.to_string(),
            operands: vec![lt, rt],
        }),
    }
}

/// Unary counterpart of [`type_of_bin`].
pub fn type_of_un(op: UnOp, t: &'static str) -> Result<&'static str, SemanticError> {
    use UnOp::*;
    match (op, t) {
        (Not, "bool") => Ok("bool"),
        (Head, "aspath") => Ok("u32"),
        (Ctr, "aspath") => Ok("u32"),
        (Ctr, "set32") => Ok("u32"),
        (Ctr, "communityset") => Ok("u32"),
        _ => Err(SemanticError::TypeMismatch {
            op: op.to_string(),
            operands: vec![t],
        }),
    }
}

/// Evaluate a binary operator at runtime. Assumes the semantic checker has
/// already proven `(op, l.type, r.type)` is in the dispatcher table;
/// reaching the fallback arm indicates a compiler bug, surfaced by the
/// caller as `RuntimeError::TypeMismatch`.
pub fn eval_bin(op: BinOp, l: &Value, r: &Value) -> Option<Value> {
    use BinOp::*;
    use Value::*;
    Some(match (op, l, r) {
        (Eq, U32(a), U32(b)) => Bool(a == b),
        (Ne, U32(a), U32(b)) => Bool(a != b),
        (Lt, U32(a), U32(b)) => Bool(a < b),
        (Gt, U32(a), U32(b)) => Bool(a > b),
        (Le, U32(a), U32(b)) => Bool(a <= b),
        (Ge, U32(a), U32(b)) => Bool(a >= b),
        (Eq, Bool(a), Bool(b)) => Bool(a == b),
        (Ne, Bool(a), Bool(b)) => Bool(a != b),
        (Eq, Str(a), Str(b)) => Bool(a == b),
        (Ne, Str(a), Str(b)) => Bool(a != b),
        (Eq, IPv4(a), IPv4(b)) => Bool(a == b),
        (Ne, IPv4(a), IPv4(b)) => Bool(a != b),
        (Lt, IPv4(a), IPv4(b)) => Bool(a < b),
        (Gt, IPv4(a), IPv4(b)) => Bool(a > b),
        (Le, IPv4(a), IPv4(b)) => Bool(a <= b),
        (Ge, IPv4(a), IPv4(b)) => Bool(a >= b),
        (Eq, IPv6(a), IPv6(b)) => Bool(a == b),
        (Ne, IPv6(a), IPv6(b)) => Bool(a != b),
        (Lt, IPv6(a), IPv6(b)) => Bool(a < b),
        (Gt, IPv6(a), IPv6(b)) => Bool(a > b),
        (Le, IPv6(a), IPv6(b)) => Bool(a <= b),
        (Ge, IPv6(a), IPv6(b)) => Bool(a >= b),
        (Eq, IPv4Net(a), IPv4Net(b)) => Bool(a == b),
        (Ne, IPv4Net(a), IPv4Net(b)) => Bool(a != b),
        (Eq, IPv6Net(a), IPv6Net(b)) => Bool(a == b),
        (Ne, IPv6Net(a), IPv6Net(b)) => Bool(a != b),
        (Eq, ASPath(a), ASPath(b)) => Bool(a == b),
        (Ne, ASPath(a), ASPath(b)) => Bool(a != b),
        (Eq, CommunitySet(a), CommunitySet(b)) => Bool(a == b),
        (Ne, CommunitySet(a), CommunitySet(b)) => Bool(a != b),
        (Eq, U32(_), Set32(_)) => Bool(l.is_member_of(r)),
        (Ne, U32(_), Set32(_)) => Bool(!l.is_member_of(r)),
        (Eq, Set32(_), U32(_)) => Bool(r.is_member_of(l)),
        (Ne, Set32(_), U32(_)) => Bool(!r.is_member_of(l)),
        (And, Bool(a), Bool(b)) => Bool(*a && *b),
        (Or, Bool(a), Bool(b)) => Bool(*a || *b),
        (Xor, Bool(a), Bool(b)) => Bool(a != b),
        (Add, U32(a), U32(b)) => U32(a.wrapping_add(*b)),
        (Sub, U32(a), U32(b)) => U32(a.wrapping_sub(*b)),
        (Mul, U32(a), U32(b)) => U32(a.wrapping_mul(*b)),
        (Add, Set32(a), U32(b)) => {
            let mut s = a.clone();
            s.insert(*b);
            Set32(s)
        }
        (NEInt, U32(a), U32(b)) => Bool(a != b),
        (NEInt, U32(_), Set32(_)) => Bool(!l.is_member_of(r)),
        (NEInt, Set32(_), U32(_)) => Bool(!r.is_member_of(l)),
        _ => return None,
    })
}

/// Evaluate a unary operator at runtime. See [`eval_bin`] for the
/// compiler-bug-on-mismatch contract.
pub fn eval_un(op: UnOp, v: &Value) -> Option<Value> {
    use UnOp::*;
    use Value::*;
    Some(match (op, v) {
        (Not, Bool(b)) => Bool(!b),
        (Head, ASPath(path)) => match path.first() {
            Some(crate::value::AsSegment::Seq(n)) => U32(*n),
            Some(crate::value::AsSegment::Set(s)) => U32(*s.first().unwrap_or(&0)),
            None => Null,
        },
        (Ctr, ASPath(path)) => U32(path.len() as u32),
        (Ctr, Set32(s)) => U32(s.len() as u32),
        (Ctr, CommunitySet(s)) => U32(s.len() as u32),
        _ => return None,
    })
}

/// Match a compiled regex against a string value — the `regex` sequence
/// operator. Dispatched separately from [`eval_bin`] because the pattern is
/// a codegen-time constant, compiled once and indexed by a `RegexPool`,
/// not an operand value.
pub fn eval_regex(re: &regex::Regex, v: &Value) -> Option<bool> {
    match v {
        Value::Str(s) => Some(re.is_match(s)),
        _ => None,
    }
}

/// All `(op, lt, rt)` triples the dispatcher supports — used by property
/// tests to enumerate and confirm dispatcher totality.
pub fn enumerate_bin_entries() -> Vec<(BinOp, &'static str, &'static str)> {
    let types = [
        "u32", "bool", "str", "ipv4", "ipv6", "ipv4net", "ipv6net", "aspath", "communityset", "set32",
    ];
    let ops = [
        BinOp::Eq,
        BinOp::Ne,
        BinOp::Lt,
        BinOp::Gt,
        BinOp::Le,
        BinOp::Ge,
        BinOp::And,
        BinOp::Or,
        BinOp::Xor,
        BinOp::Add,
        BinOp::Sub,
        BinOp::Mul,
        BinOp::NEInt,
    ];
    let mut out = Vec::new();
    for op in ops {
        for lt in types {
            for rt in types {
                if type_of_bin(op, lt, rt).is_ok() {
                    out.push((op, lt, rt));
                }
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispatcher_totality_bin() {
        for (op, lt, rt) in enumerate_bin_entries() {
            let l = Value::sentinel(lt);
            let r = Value::sentinel(rt);
            let result_type = type_of_bin(op, lt, rt).expect("enumerated entry must type-check");
            let v = eval_bin(op, &l, &r).unwrap_or_else(|| panic!("no evaluator for {op} {lt} {rt}"));
            assert_eq!(v.type_name(), result_type);
        }
    }

    #[test]
    fn set_membership() {
        let mut s = ahash::AHashSet::new();
        s.insert(7u32);
        let set = Value::Set32(s);
        assert_eq!(eval_bin(BinOp::Eq, &Value::U32(7), &set), Some(Value::Bool(true)));
        assert_eq!(eval_bin(BinOp::Eq, &Value::U32(8), &set), Some(Value::Bool(false)));
    }

    #[test]
    fn arithmetic_wraps() {
        assert_eq!(eval_bin(BinOp::Add, &Value::U32(u32::MAX), &Value::U32(1)), Some(Value::U32(0)));
    }
}
