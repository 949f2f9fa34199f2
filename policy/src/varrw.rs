// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The `VarRw` contract: the runtime bridge between the VM and a concrete
//! route object. Reads are cached, writes are buffered until `sync()`, and
//! a `VarRw` instance is used for exactly one route.

use crate::errors::SemanticError;
use crate::value::Value;
use crate::varmap::{Access, Id, VarMap};
use ahash::AHashMap;

/// The abstract read/write interface between the VM and a concrete route
/// object. Implementations are out of scope for this crate; this trait is
/// the seam a protocol adapter implements over its own route type.
pub trait VarRw {
    /// Read a variable. Returns `Value::Null` if the underlying route does
    /// not carry the attribute. The reference is valid until the next
    /// `sync()`.
    fn read(&mut self, id: Id) -> &Value;

    /// Buffer a write; has no visible effect until `sync()`.
    fn write(&mut self, id: Id, value: Value);

    /// Commit buffered writes. At most one effective write per id, even if
    /// the policy wrote the same id repeatedly.
    fn sync(&mut self);
}

/// Semantic-check-time `VarRw`: returns type-correct sentinel values for
/// type propagation only, and flags reads of undeclared variables or
/// writes to read-only variables. Uses the same read-cache/modified-set
/// idiom as a real `VarRw`, specialized for type-checking rather than
/// execution.
pub struct SemanticVarRw<'a> {
    varmap: &'a VarMap,
    protocol: String,
    cache: AHashMap<Id, Value>,
    modified: std::collections::HashSet<Id>,
    errors: Vec<SemanticError>,
}

impl<'a> SemanticVarRw<'a> {
    pub fn new(varmap: &'a VarMap, protocol: impl Into<String>) -> Self {
        Self {
            varmap,
            protocol: protocol.into(),
            cache: AHashMap::new(),
            modified: std::collections::HashSet::new(),
            errors: Vec::new(),
        }
    }

    /// Type-check a read of `id`, returning the sentinel value's type name.
    pub fn check_read(&mut self, id: Id) -> Result<&'static str, SemanticError> {
        match self.varmap.type_of(id) {
            Ok(t) => {
                self.cache.entry(id).or_insert_with(|| Value::sentinel(t));
                Ok(t)
            }
            Err(e) => {
                self.errors.push(e.clone());
                Err(e)
            }
        }
    }

    /// Type-check a write of `id`, failing if the variable is read-only.
    pub fn check_write(&mut self, id: Id) -> Result<(), SemanticError> {
        match self.varmap.access_of(id) {
            Ok(Access::ReadWrite) => {
                self.modified.insert(id);
                Ok(())
            }
            Ok(Access::ReadOnly) => {
                let e = SemanticError::ReadOnlyWrite(id);
                self.errors.push(e.clone());
                Err(e)
            }
            Err(e) => {
                self.errors.push(e.clone());
                Err(e)
            }
        }
    }

    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    pub fn errors(&self) -> &[SemanticError] {
        &self.errors
    }
}
