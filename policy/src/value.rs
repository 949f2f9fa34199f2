// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The runtime value model: a closed tagged-variant `Value`.

use ahash::AHashSet;
use ipnet::{Ipv4Net, Ipv6Net};
use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, Ipv6Addr};

/// A special nexthop marker, in addition to a concrete address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NextHop4 {
    Addr(Ipv4Addr),
    SelfAddr,
    PeerAddress,
    Discard,
    Reject,
    NextTable,
}

/// IPv6 counterpart of [`NextHop4`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NextHop6 {
    Addr(Ipv6Addr),
    SelfAddr,
    PeerAddress,
    Discard,
    Reject,
    NextTable,
}

/// A single hop in an `ASPath`. Segments may be ordered sequences (`Seq`) or
/// unordered sets (`Set`), matching BGP AS_PATH/AS_SET segment semantics.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AsSegment {
    Seq(u32),
    Set(Vec<u32>),
}

/// The runtime value. Closed sum type so the dispatcher can reason
/// exhaustively about the supported variant combinations — only possible
/// if no external code can add a new variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    U32(u32),
    Bool(bool),
    Str(String),
    IPv4(Ipv4Addr),
    IPv6(Ipv6Addr),
    IPv4Net(Ipv4Net),
    IPv6Net(Ipv6Net),
    NextHop4(NextHop4),
    NextHop6(NextHop6),
    ASPath(Vec<AsSegment>),
    CommunitySet(AHashSet<u32>),
    Set32(AHashSet<u32>),
    FilterHandle(crate::filter::FilterHandle),
    Null,
}

impl Value {
    /// A short, stable type name used in diagnostics and dispatcher lookups.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::U32(_) => "u32",
            Value::Bool(_) => "bool",
            Value::Str(_) => "str",
            Value::IPv4(_) => "ipv4",
            Value::IPv6(_) => "ipv6",
            Value::IPv4Net(_) => "ipv4net",
            Value::IPv6Net(_) => "ipv6net",
            Value::NextHop4(_) => "nexthop4",
            Value::NextHop6(_) => "nexthop6",
            Value::ASPath(_) => "aspath",
            Value::CommunitySet(_) => "communityset",
            Value::Set32(_) => "set32",
            Value::FilterHandle(_) => "filterhandle",
            Value::Null => "null",
        }
    }

    /// Construct the type-correct sentinel value for a type name, used by
    /// `SemanticVarRw` for type propagation without real data.
    pub fn sentinel(type_name: &str) -> Value {
        match type_name {
            "u32" => Value::U32(0),
            "bool" => Value::Bool(false),
            "str" => Value::Str(String::new()),
            "ipv4" => Value::IPv4(Ipv4Addr::UNSPECIFIED),
            "ipv6" => Value::IPv6(Ipv6Addr::UNSPECIFIED),
            "ipv4net" => Value::IPv4Net(Ipv4Net::default()),
            "ipv6net" => Value::IPv6Net(Ipv6Net::default()),
            "nexthop4" => Value::NextHop4(NextHop4::SelfAddr),
            "nexthop6" => Value::NextHop6(NextHop6::SelfAddr),
            "aspath" => Value::ASPath(Vec::new()),
            "communityset" => Value::CommunitySet(AHashSet::new()),
            "set32" => Value::Set32(AHashSet::new()),
            _ => Value::Null,
        }
    }

    /// Whether `self` is a member of `set` — used for the `==`/set-membership
    /// operator overload, where `x == S` holds iff `x` is an element of `S`.
    pub fn is_member_of(&self, set: &Value) -> bool {
        match (self, set) {
            (Value::U32(v), Value::Set32(s)) => s.contains(v),
            _ => false,
        }
    }
}
