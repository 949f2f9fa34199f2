// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! A generic named-object container with back-edge dependency tracking.
//! Used to back both the `SetMap` ([`Value`](crate::value::Value)) and the
//! `PolicyMap` ([`PolicyStatement`](crate::statement::PolicyStatement)).

use crate::errors::DependencyError;
use ahash::AHashSet;
use std::collections::HashMap;

#[derive(Debug)]
struct Entry<T> {
    value: T,
    /// Names of dependents that reference this entry (back-edges).
    dependents: AHashSet<String>,
}

/// An owned, named collection of `T` with dependency back-edges: an entry
/// may not be deleted while a dependent exists, and every deletion updates
/// the dependency graph before returning success.
#[derive(Debug, Default)]
pub struct Dependency<T> {
    entries: HashMap<String, Entry<T>>,
}

impl<T> Dependency<T> {
    pub fn new() -> Self {
        Self { entries: HashMap::new() }
    }

    pub fn create(&mut self, name: &str, value: T) -> Result<(), DependencyError> {
        if self.entries.contains_key(name) {
            return Err(DependencyError::AlreadyExists(name.to_string()));
        }
        self.entries.insert(
            name.to_string(),
            Entry {
                value,
                dependents: AHashSet::new(),
            },
        );
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&T> {
        self.entries.get(name).map(|e| &e.value)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut T> {
        self.entries.get_mut(name).map(|e| &mut e.value)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Replace the stored value in place, keeping existing dependency
    /// edges. Used for atomic wholesale set-content replacement.
    pub fn replace_value(&mut self, name: &str, value: T) -> Result<(), DependencyError> {
        match self.entries.get_mut(name) {
            Some(e) => {
                e.value = value;
                Ok(())
            }
            None => Err(DependencyError::NotFound(name.to_string())),
        }
    }

    /// Remove `name`, failing if any dependent still references it.
    pub fn remove(&mut self, name: &str) -> Result<T, DependencyError> {
        let count = self.entries.get(name).map(|e| e.dependents.len()).ok_or_else(|| DependencyError::NotFound(name.to_string()))?;
        if count > 0 {
            return Err(DependencyError::InUse(name.to_string(), count));
        }
        Ok(self.entries.remove(name).expect("checked above").value)
    }

    pub fn add_dependency(&mut self, name: &str, dependent: &str) -> Result<(), DependencyError> {
        let e = self.entries.get_mut(name).ok_or_else(|| DependencyError::NotFound(name.to_string()))?;
        e.dependents.insert(dependent.to_string());
        Ok(())
    }

    pub fn del_dependency(&mut self, name: &str, dependent: &str) {
        if let Some(e) = self.entries.get_mut(name) {
            e.dependents.remove(dependent);
        }
    }

    pub fn get_deps(&self, name: &str) -> AHashSet<String> {
        self.entries.get(name).map(|e| e.dependents.clone()).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn values(&self) -> impl Iterator<Item = (&String, &T)> {
        self.entries.iter().map(|(k, v)| (k, &v.value))
    }

    /// Atomically replace `dependent`'s back-edges across this container:
    /// remove it from every entry in `old` not in `new`, add it to every
    /// entry in `new` not already present.
    pub fn replace_dependent_edges(&mut self, dependent: &str, old: &AHashSet<String>, new: &AHashSet<String>) {
        for name in old.difference(new) {
            self.del_dependency(name, dependent);
        }
        for name in new.difference(old) {
            let _ = self.add_dependency(name, dependent);
        }
    }
}
