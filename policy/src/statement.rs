// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! `Term`, `PolicyStatement`, and `PolicyList`. `Term` owns three
//! `OrderedBlock<Node>`s (source/dest/action); `PolicyStatement` owns one
//! `OrderedBlock<Term>` plus the resolved dependency sets used by the
//! checker.

use crate::ast::{Block, ConfigNodeId, Node, OrderedBlock};
use ahash::AHashSet;
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct Term {
    pub name: String,
    source: OrderedBlock<Node>,
    dest: OrderedBlock<Node>,
    action: OrderedBlock<Node>,
}

impl Term {
    pub fn new(name: impl Into<String>) -> Self {
        Term {
            name: name.into(),
            source: OrderedBlock::new(),
            dest: OrderedBlock::new(),
            action: OrderedBlock::new(),
        }
    }

    pub fn block(&self, b: Block) -> &OrderedBlock<Node> {
        match b {
            Block::Source => &self.source,
            Block::Dest => &self.dest,
            Block::Action => &self.action,
        }
    }

    pub fn block_mut(&mut self, b: Block) -> &mut OrderedBlock<Node> {
        match b {
            Block::Source => &mut self.source,
            Block::Dest => &mut self.dest,
            Block::Action => &mut self.action,
        }
    }

    /// Flush any out-of-order statements left pending in any block, with a
    /// warning.
    pub fn finalize(&mut self) {
        self.source.finalize();
        self.dest.finalize();
        self.action.finalize();
    }
}

/// A named, ordered sequence of terms. Term names are unique within a
/// policy; terms are addressed by [`ConfigNodeId`] ordering, same
/// out-of-order-tolerant discipline as a `Term`'s own blocks.
#[derive(Debug, Clone)]
pub struct PolicyStatement {
    pub name: String,
    terms: OrderedBlock<Term>,
    name_to_id: HashMap<String, u64>,
    /// Sets/sub-policies this policy depends on, as resolved by the last
    /// successful semantic check and replaced atomically on each commit.
    pub sets: AHashSet<String>,
    pub subrs: AHashSet<String>,
    /// Whether any path through this policy's terms reaches a `Reject`, as
    /// determined by the last successful semantic check. A hint for the
    /// filter-manager collaborator's own optimization, not consulted by the
    /// VM itself.
    pub can_reject: bool,
}

impl PolicyStatement {
    pub fn new(name: impl Into<String>) -> Self {
        PolicyStatement {
            name: name.into(),
            terms: OrderedBlock::new(),
            name_to_id: HashMap::new(),
            sets: AHashSet::new(),
            subrs: AHashSet::new(),
            can_reject: false,
        }
    }

    pub fn term_exists(&self, name: &str) -> bool {
        self.name_to_id.contains_key(name)
    }

    /// Append (or, on a repeated id, replace) a term at `order`.
    pub fn add_term(&mut self, order: ConfigNodeId, term: Term) {
        self.name_to_id.insert(term.name.clone(), order.unique_id);
        self.terms.insert(order, term);
    }

    pub fn find_term(&self, name: &str) -> Option<&Term> {
        self.terms.iter().find(|t| t.name == name)
    }

    pub fn find_term_mut(&mut self, name: &str) -> Option<&mut Term> {
        let id = *self.name_to_id.get(name)?;
        self.terms.get_mut(id)
    }

    pub fn delete_term(&mut self, name: &str) -> bool {
        if let Some(id) = self.name_to_id.remove(name) {
            self.terms.remove(id);
            true
        } else {
            false
        }
    }

    /// In-order iterator over placed (non-pending) terms.
    pub fn iter_terms(&self) -> impl Iterator<Item = &Term> {
        self.terms.iter()
    }

    /// End-of-policy finalization: flush out-of-order terms to the tail
    /// with a warning, then do the same within every term's blocks.
    pub fn finalize(&mut self) {
        self.terms.finalize();
        for id in self.terms.ids_in_order().to_vec() {
            if let Some(t) = self.terms.get_mut(id) {
                t.finalize();
            }
        }
    }
}

/// Direction a [`PolicyList`] applies in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Import,
    Export,
}

/// For a `(protocol, direction, modifier)` triple, the ordered list of
/// policy names that apply. `modifier` distinguishes parallel import/export
/// lists for the same protocol and direction (e.g. distinct neighbor-group
/// policy sets); this crate treats it as an opaque label.
#[derive(Debug, Clone, Default)]
pub struct PolicyList {
    pub policies: Vec<String>,
}

impl PolicyList {
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::ConfigNodeId;

    #[test]
    fn term_unique_name_tracking_and_delete() {
        let mut p = PolicyStatement::new("P");
        assert!(!p.term_exists("t1"));
        p.add_term(ConfigNodeId::head(1), Term::new("t1"));
        assert!(p.term_exists("t1"));
        assert!(p.delete_term("t1"));
        assert!(!p.delete_term("t1")); // permissive duplicate delete at this layer returns false, caller treats as no-op
    }

    #[test]
    fn term_block_holds_statements_in_order() {
        let mut t = Term::new("t1");
        t.block_mut(Block::Action).insert(ConfigNodeId::head(1), Node::Accept);
        assert_eq!(t.block(Block::Action).iter().collect::<Vec<_>>(), vec![&Node::Accept]);
    }

    #[test]
    fn policy_iterates_terms_in_order() {
        let mut p = PolicyStatement::new("P");
        p.add_term(ConfigNodeId::head(1), Term::new("a"));
        p.add_term(ConfigNodeId::after(2, 1), Term::new("b"));
        let names: Vec<_> = p.iter_terms().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
    }
}
