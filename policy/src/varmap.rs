// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The `VarMap`: the authoritative catalog of per-protocol variables. Maps
//! `(protocol, name)` to a numeric id stable across one process run, a
//! type, and a read/write permission.

use crate::errors::SemanticError;
use std::collections::HashMap;

/// A variable id. Stable across one process run. Generic
/// variables (policy-tags, filter-version slots, next-hop, ...) occupy a
/// shared range across protocols; protocol-specific variables occupy a
/// private range. This crate does not police the partitioning itself — it
/// is a convention the protocol adapter (out of scope) is expected to
/// follow when calling [`VarMap::declare`].
pub type Id = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    ReadOnly,
    ReadWrite,
}

/// The reserved id for the `trace` variable: when it reads `Bool(true)`
/// the VM emits a per-instruction trace at `tracing::debug!`.
pub const TRACE_VAR_ID: Id = 0;

#[derive(Debug, Clone)]
struct VarEntry {
    id: Id,
    type_name: &'static str,
    access: Access,
}

/// Catalog of declared variables, keyed by `(protocol, name)` for lookup and
/// by `id` for type/access queries.
#[derive(Debug, Default)]
pub struct VarMap {
    by_name: HashMap<(String, String), VarEntry>,
    by_id: HashMap<Id, VarEntry>,
}

impl VarMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called at startup by each protocol adapter to register a variable.
    pub fn declare(&mut self, protocol: &str, name: &str, type_name: &'static str, access: Access, id: Id) {
        let entry = VarEntry { id, type_name, access };
        self.by_name.insert((protocol.to_string(), name.to_string()), entry.clone());
        self.by_id.insert(id, entry);
    }

    pub fn var2id(&self, protocol: &str, name: &str) -> Result<Id, SemanticError> {
        self.by_name
            .get(&(protocol.to_string(), name.to_string()))
            .map(|e| e.id)
            .ok_or_else(|| SemanticError::UnknownVariable(format!("{protocol}.{name}")))
    }

    pub fn type_of(&self, id: Id) -> Result<&'static str, SemanticError> {
        self.by_id
            .get(&id)
            .map(|e| e.type_name)
            .ok_or_else(|| SemanticError::UnknownVariable(id.to_string()))
    }

    pub fn access_of(&self, id: Id) -> Result<Access, SemanticError> {
        self.by_id
            .get(&id)
            .map(|e| e.access)
            .ok_or_else(|| SemanticError::UnknownVariable(id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn declare_and_lookup() {
        let mut vm = VarMap::new();
        vm.declare("bgp", "metric", "u32", Access::ReadWrite, 100);
        assert_eq!(vm.var2id("bgp", "metric").unwrap(), 100);
        assert_eq!(vm.type_of(100).unwrap(), "u32");
        assert_eq!(vm.access_of(100).unwrap(), Access::ReadWrite);
    }

    #[test]
    fn unknown_variable() {
        let vm = VarMap::new();
        assert!(vm.var2id("bgp", "nope").is_err());
        assert!(vm.type_of(999).is_err());
    }
}
