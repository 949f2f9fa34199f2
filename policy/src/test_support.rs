// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! A concrete [`VarRw`] for tests, using the same buffered-write idiom as
//! [`crate::varrw::SemanticVarRw`] but backing a real route attribute map
//! instead of type sentinels. Shared by `#[cfg(test)]` unit tests and the
//! crate-level `tests/scenarios.rs` integration tests, gated behind a
//! `testing` feature plus `cfg(test)`.

use crate::value::Value;
use crate::varmap::Id;
use crate::varrw::VarRw;
use ahash::AHashMap;

/// A route stand-in: a plain `Id -> Value` map with buffered writes.
#[derive(Debug, Default)]
pub struct MapVarRw {
    values: AHashMap<Id, Value>,
    written: Vec<(Id, Value)>,
}

impl MapVarRw {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, id: Id, value: Value) -> &mut Self {
        self.values.insert(id, value);
        self
    }

    pub fn get(&self, id: Id) -> Option<&Value> {
        self.values.get(&id)
    }
}

impl VarRw for MapVarRw {
    fn read(&mut self, id: Id) -> &Value {
        self.values.entry(id).or_insert(Value::Null)
    }

    fn write(&mut self, id: Id, value: Value) {
        self.written.push((id, value));
    }

    fn sync(&mut self) {
        for (id, v) in self.written.drain(..) {
            self.values.insert(id, v);
        }
    }
}
