// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The mutating delta surface: `create_policy`, `delete_policy`,
//! `create_term`, `delete_term`, `update_term_block`, `create_set`,
//! `update_set`, `add_to_set`/`delete_from_set`, `delete_set`,
//! `update_imports`, `update_exports`, `add_varmap`, `commit`.
//!
//! `Configuration` owns every mutable piece of the core: the `PolicyMap`
//! and `SetMap` (both backed by [`Dependency`]), the per-protocol import/
//! export lists, the [`TagAllocator`] and tag table, the compiled-fragment
//! cache, and one [`VersionedFilter`] per installed target. It tracks which
//! policies and targets a batch of deltas touched and recompiles/relinks
//! only those on `commit`.
//!
//! Single-threaded-cooperative concurrency model: state lives behind one
//! `Rc<RefCell<Inner>>`, the same interior-mutability idiom
//! [`crate::filter::FilterHandle`] already establishes for this crate,
//! rather than `Arc<Mutex<_>>` (which would also demand `Send`, at odds
//! with `Rc`).

use crate::ast::ConfigNodeId;
use crate::code::{CodeImage, FilterKind, Target, TagAllocator};
use crate::checker;
use crate::codegen;
use crate::dependency::Dependency;
use crate::errors::PolicyError;
use crate::filter::VersionedFilter;
use crate::parser;
use crate::statement::{Direction, PolicyList, PolicyStatement, Term};
use crate::value::Value;
use crate::varmap::VarMap;
use crate::varrw::VarRw;
use crate::vm::{RegexPool, SubrImage, Verdict, Vm};
use ahash::AHashSet;
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;
use std::time::Duration;

/// The filter-manager collaborator, modeled as a trait since its real
/// implementation lives outside this crate. Receives one freshly linked
/// [`CodeImage`] per affected target at the end of a commit. The core never
/// inspects what the sink does with it.
pub trait FilterSink {
    fn install(&mut self, target: Target, image: CodeImage);
}

/// A `FilterSink` that discards every image — the default for a
/// `Configuration` built without an explicit collaborator (e.g. while the
/// protocol adapter wiring is still being brought up).
#[derive(Debug, Default)]
pub struct NullFilterSink;

impl FilterSink for NullFilterSink {
    fn install(&mut self, _target: Target, _image: CodeImage) {}
}

struct Inner {
    policies: Dependency<PolicyStatement>,
    sets: Dependency<Value>,
    varmap: VarMap,
    // protocol -> modifier -> ordered policy list.
    // `BTreeMap` keeps modifier iteration order deterministic for the
    // linker without needing to remember insertion order separately.
    imports: HashMap<String, BTreeMap<String, PolicyList>>,
    exports: HashMap<String, BTreeMap<String, PolicyList>>,
    tag_alloc: TagAllocator,
    tag_table: HashMap<String, AHashSet<u32>>,
    filters: HashMap<Target, VersionedFilter>,
    // Per-(target, policy) compiled fragment cache, the unit of
    // incremental recompile: a policy whose content or usage hasn't
    // changed since the last commit is never re-lowered.
    compiled: HashMap<(Target, String), CodeImage>,
    subr_images: HashMap<String, Rc<SubrImage>>,
    modified_policies: AHashSet<String>,
    modified_targets: AHashSet<Target>,
    filter_sink: Box<dyn FilterSink>,
    debounce: Option<tokio::task::JoinHandle<()>>,
}

impl Inner {
    fn new(filter_sink: Box<dyn FilterSink>) -> Self {
        Inner {
            policies: Dependency::new(),
            sets: Dependency::new(),
            varmap: VarMap::new(),
            imports: HashMap::new(),
            exports: HashMap::new(),
            tag_alloc: TagAllocator::new(),
            tag_table: HashMap::new(),
            filters: HashMap::new(),
            compiled: HashMap::new(),
            subr_images: HashMap::new(),
            modified_policies: AHashSet::new(),
            modified_targets: AHashSet::new(),
            filter_sink,
            debounce: None,
        }
    }

    fn touch(&mut self, policy: &str) {
        self.modified_policies.insert(policy.to_string());
    }

    fn protocols_importing(&self, policy: &str) -> Vec<String> {
        self.imports
            .iter()
            .filter(|(_, lists)| lists.values().any(|pl| pl.policies.iter().any(|p| p == policy)))
            .map(|(p, _)| p.clone())
            .collect()
    }

    fn protocols_exporting(&self, policy: &str) -> Vec<String> {
        self.exports
            .iter()
            .filter(|(_, lists)| lists.values().any(|pl| pl.policies.iter().any(|p| p == policy)))
            .map(|(p, _)| p.clone())
            .collect()
    }

    fn merged_list<'a>(map: &'a HashMap<String, BTreeMap<String, PolicyList>>, protocol: &str) -> Vec<String> {
        map.get(protocol).into_iter().flat_map(|m| m.values()).flat_map(|pl| pl.policies.iter().cloned()).collect()
    }

    /// Compile (or return the cached) `(protocol, import)` fragment for
    /// `name`, installing the checker's resolved dependency edges on a
    /// fresh compile.
    fn get_or_compile_import(&mut self, protocol: &str, name: &str) -> Result<CodeImage, PolicyError> {
        let key = (Target::new(protocol, FilterKind::Import), name.to_string());
        if let Some(image) = self.compiled.get(&key) {
            return Ok(image.clone());
        }
        let mut policy = self.policies.get(name).cloned().ok_or_else(|| PolicyError::UnknownPolicy(name.to_string()))?;
        // End-of-policy finalization: flush any term/statement still
        // waiting on a not-yet-arrived predecessor to the tail, with a
        // warning, so a stalled out-of-order delta never silently drops a
        // term from the compiled image.
        policy.finalize();
        let old_sets = policy.sets.clone();
        let old_subrs = policy.subrs.clone();
        let check = checker::check_policy(&policy, Direction::Import, protocol, &self.varmap, &self.sets, &self.policies)?;
        self.sets.replace_dependent_edges(name, &old_sets, &check.sets);
        self.policies.replace_dependent_edges(name, &old_subrs, &check.subrs);
        if let Some(p) = self.policies.get_mut(name) {
            p.sets = check.sets.clone();
            p.subrs = check.subrs.clone();
            p.can_reject = check.can_reject;
        }
        for subr_name in &check.subrs {
            self.ensure_subr_compiled(protocol, subr_name)?;
        }
        let image = codegen::codegen_import(&policy, protocol, &self.varmap)?;
        self.compiled.insert(key, image.clone());
        tracing::debug!(protocol, policy = name, "compiled import fragment");
        Ok(image)
    }

    /// Compile (or return the cached) export fragment for `name` against
    /// `consumer_protocol`, plus every per-source-protocol source-match
    /// fragment it produced (the export / export-source-match split
    /// recorded in DESIGN.md).
    fn get_or_compile_export(&mut self, consumer_protocol: &str, name: &str) -> Result<(CodeImage, HashMap<String, CodeImage>), PolicyError> {
        let export_key = (Target::new(consumer_protocol, FilterKind::Export), name.to_string());
        if let Some(export_frag) = self.compiled.get(&export_key).cloned() {
            let src_map: HashMap<String, CodeImage> = self
                .compiled
                .iter()
                .filter(|((t, n), _)| t.kind == FilterKind::ExportSourceMatch && n == name)
                .map(|((t, _), img)| (t.protocol.clone(), img.clone()))
                .collect();
            return Ok((export_frag, src_map));
        }
        let mut policy = self.policies.get(name).cloned().ok_or_else(|| PolicyError::UnknownPolicy(name.to_string()))?;
        policy.finalize();
        let old_sets = policy.sets.clone();
        let old_subrs = policy.subrs.clone();
        let check = checker::check_policy(&policy, Direction::Export, consumer_protocol, &self.varmap, &self.sets, &self.policies)?;
        self.sets.replace_dependent_edges(name, &old_sets, &check.sets);
        self.policies.replace_dependent_edges(name, &old_subrs, &check.subrs);
        if let Some(p) = self.policies.get_mut(name) {
            p.sets = check.sets.clone();
            p.subrs = check.subrs.clone();
            p.can_reject = check.can_reject;
        }
        for subr_name in &check.subrs {
            self.ensure_subr_compiled(consumer_protocol, subr_name)?;
        }
        let (export_frag, src_map) = codegen::codegen_export(&policy, consumer_protocol, &self.varmap, &mut self.tag_alloc)?;
        self.compiled.insert(export_key, export_frag.clone());
        for (src, frag) in &src_map {
            self.compiled.insert((Target::new(src.clone(), FilterKind::ExportSourceMatch), name.to_string()), frag.clone());
        }
        tracing::debug!(consumer_protocol, policy = name, sources = src_map.len(), "compiled export fragment");
        Ok((export_frag, src_map))
    }

    fn ensure_subr_compiled(&mut self, protocol: &str, name: &str) -> Result<(), PolicyError> {
        if self.subr_images.contains_key(name) {
            return Ok(());
        }
        let mut policy = self.policies.get(name).cloned().ok_or_else(|| PolicyError::UnknownPolicy(name.to_string()))?;
        policy.finalize();
        let sub = SubrImage::compile(&policy, protocol, &self.varmap)?;
        self.subr_images.insert(name.to_string(), Rc::new(sub));
        Ok(())
    }

    /// Relink one target from its currently cached fragments. Returns any
    /// newly discovered targets (only possible for `Export`, whose compile
    /// can surface previously-unseen `ExportSourceMatch` source protocols).
    fn relink_target(&mut self, target: &Target) -> Result<Vec<Target>, PolicyError> {
        match target.kind {
            FilterKind::Import => {
                let names = Self::merged_list(&self.imports, &target.protocol);
                let mut frags = Vec::with_capacity(names.len());
                for name in &names {
                    frags.push(self.get_or_compile_import(&target.protocol, name)?);
                }
                let image = codegen::link(target, frags);
                self.install_image(target, image);
                Ok(Vec::new())
            }
            FilterKind::Export => {
                let names = Self::merged_list(&self.exports, &target.protocol);
                let mut frags = Vec::with_capacity(names.len());
                let mut discovered = AHashSet::new();
                for name in &names {
                    let (frag, src_map) = self.get_or_compile_export(&target.protocol, name)?;
                    frags.push(frag);
                    for src in src_map.keys() {
                        discovered.insert(Target::new(src.clone(), FilterKind::ExportSourceMatch));
                    }
                }
                let image = codegen::link(target, frags);
                self.install_image(target, image);
                Ok(discovered.into_iter().collect())
            }
            FilterKind::ExportSourceMatch => {
                let mut names: Vec<String> =
                    self.compiled.keys().filter(|(t, _)| t == target).map(|(_, n)| n.clone()).collect();
                names.sort();
                let frags: Vec<CodeImage> =
                    names.iter().filter_map(|n| self.compiled.get(&(target.clone(), n.clone())).cloned()).collect();
                let image = codegen::link(target, frags);
                self.install_image(target, image);
                Ok(Vec::new())
            }
        }
    }

    fn install_image(&mut self, target: &Target, image: CodeImage) {
        if target.kind == FilterKind::ExportSourceMatch {
            self.tag_table.entry(target.protocol.clone()).or_default().extend(image.tags.iter().copied());
        }
        let vf = self.filters.entry(target.clone()).or_insert_with(VersionedFilter::new);
        vf.install(image.clone());
        self.filter_sink.install(target.clone(), image);
        tracing::info!(protocol = %target.protocol, kind = ?target.kind, "installed new filter image");
    }

    /// The incremental recompile & link pipeline: every modified policy is
    /// recompiled for its current usages (discovering any target whose
    /// fragment it contributes to), then every affected target is relinked
    /// in one pass, and any target an `Export` compile newly surfaced (a
    /// previously unseen `export-source-match` source protocol) is
    /// relinked in a second pass.
    fn do_compile_and_link(&mut self) -> Result<(), PolicyError> {
        let modified: Vec<String> = self.modified_policies.drain().collect();
        for name in &modified {
            // Only queue the Import/Export targets this policy used to
            // contribute to directly. An `ExportSourceMatch` target is
            // deliberately excluded here and left for `relink_target`'s own
            // `Export` pass to rediscover (see `second_pass` below): since
            // its cache entries only get repopulated as a side effect of
            // recompiling the corresponding `Export` target, relinking it
            // before that happens would link against a stale or missing
            // fragment for this policy.
            let old_targets: Vec<Target> = self
                .compiled
                .keys()
                .filter(|(t, n)| n == name && t.kind != FilterKind::ExportSourceMatch)
                .map(|(t, _)| t.clone())
                .collect();
            self.modified_targets.extend(old_targets);
            self.compiled.retain(|(_, n), _| n != name);
            self.subr_images.remove(name);

            for protocol in self.protocols_importing(name) {
                self.modified_targets.insert(Target::new(protocol, FilterKind::Import));
            }
            for protocol in self.protocols_exporting(name) {
                self.modified_targets.insert(Target::new(protocol, FilterKind::Export));
            }
        }

        let first_pass: Vec<Target> = self.modified_targets.drain().collect();
        let mut second_pass = AHashSet::new();
        let n_targets = first_pass.len();
        for target in &first_pass {
            let discovered = self.relink_target(target)?;
            second_pass.extend(discovered);
        }
        let n_second = second_pass.len();
        for target in second_pass {
            self.relink_target(&target)?;
        }
        tracing::info!(targets = n_targets + n_second, "commit relinked targets");
        Ok(())
    }
}

/// The mutating delta surface. Cheap to clone — every clone shares the
/// same `Rc<RefCell<Inner>>` state, matching the single-threaded-
/// cooperative model.
#[derive(Clone)]
pub struct Configuration(Rc<RefCell<Inner>>);

impl Configuration {
    pub fn new(filter_sink: Box<dyn FilterSink>) -> Self {
        Configuration(Rc::new(RefCell::new(Inner::new(filter_sink))))
    }

    pub fn with_null_sink() -> Self {
        Self::new(Box::new(NullFilterSink))
    }

    /// Register a protocol variable, called at startup by each protocol
    /// adapter.
    pub fn add_varmap(&self, protocol: &str, name: &str, type_name: &'static str, access: crate::varmap::Access, id: crate::varmap::Id) {
        self.0.borrow_mut().varmap.declare(protocol, name, type_name, access, id);
    }

    pub fn create_policy(&self, name: &str) -> Result<(), PolicyError> {
        let mut inner = self.0.borrow_mut();
        inner.policies.create(name, PolicyStatement::new(name))?;
        tracing::debug!(policy = name, "created policy");
        Ok(())
    }

    /// Fails if the policy is still referenced by a sub-policy, an import
    /// list, or an export list — a policy may not be deleted while a
    /// dependent exists.
    pub fn delete_policy(&self, name: &str) -> Result<(), PolicyError> {
        let mut inner = self.0.borrow_mut();
        // Clear this policy's own outgoing edges (the sets/sub-policies it
        // referenced as of its last successful compile) before removing it,
        // so it stops appearing in their `dependents` sets. `remove` itself
        // only guards on and clears *incoming* edges (dependents of `name`).
        let (old_sets, old_subrs) = inner
            .policies
            .get(name)
            .map(|p| (p.sets.clone(), p.subrs.clone()))
            .unwrap_or_default();
        inner.sets.replace_dependent_edges(name, &old_sets, &AHashSet::new());
        inner.policies.replace_dependent_edges(name, &old_subrs, &AHashSet::new());
        inner.policies.remove(name)?;
        inner.touch(name);
        tracing::debug!(policy = name, "deleted policy");
        Ok(())
    }

    pub fn create_term(&self, policy: &str, order: ConfigNodeId, term: &str) -> Result<(), PolicyError> {
        let mut inner = self.0.borrow_mut();
        let p = inner.policies.get_mut(policy).ok_or_else(|| PolicyError::UnknownPolicy(policy.to_string()))?;
        if p.term_exists(term) {
            return Err(PolicyError::from(crate::errors::DependencyError::AlreadyExists(term.to_string())));
        }
        p.add_term(order, Term::new(term));
        inner.touch(policy);
        tracing::debug!(policy, term, "created term");
        Ok(())
    }

    /// Permissive: deleting an absent term is not an error.
    pub fn delete_term(&self, policy: &str, term: &str) -> Result<(), PolicyError> {
        let mut inner = self.0.borrow_mut();
        let p = inner.policies.get_mut(policy).ok_or_else(|| PolicyError::UnknownPolicy(policy.to_string()))?;
        if !p.delete_term(term) {
            tracing::warn!(policy, term, "permissive no-op: term already absent");
        }
        inner.touch(policy);
        Ok(())
    }

    /// Replace one block of one term with freshly parsed statements.
    /// `statements` may pack more than one statement separated by `;`,
    /// e.g. `"policy-tags += 7; accept"`; each is parsed independently and
    /// chained at successive synthetic `ConfigNodeId`s after `order`. A
    /// `ParseError` here is reported to the caller immediately — it does
    /// not wait for `commit`.
    pub fn update_term_block(
        &self,
        policy: &str,
        term: &str,
        block: crate::ast::Block,
        order: ConfigNodeId,
        statements: &str,
    ) -> Result<(), PolicyError> {
        let pieces = parser::split_statements(statements);
        let mut nodes = Vec::with_capacity(pieces.len());
        for (i, stmt) in pieces.iter().enumerate() {
            let node = parser::parse(stmt, order.unique_id as u32)
                .map_err(|e| PolicyError::parse(e, crate::errors::Diagnostic::new().with_policy(policy).with_term(term).with_block(block.as_str())))?;
            nodes.push((child_id(order, i), node));
        }

        let mut inner = self.0.borrow_mut();
        let t = inner
            .policies
            .get_mut(policy)
            .ok_or_else(|| PolicyError::UnknownPolicy(policy.to_string()))?
            .find_term_mut(term)
            .ok_or_else(|| PolicyError::UnknownPolicy(format!("{policy}:{term}")))?;
        for (id, node) in nodes {
            t.block_mut(block).insert(id, node);
        }
        inner.touch(policy);
        tracing::debug!(policy, term, block = block.as_str(), "updated term block");
        Ok(())
    }

    pub fn create_set(&self, name: &str, value: Value) -> Result<(), PolicyError> {
        let mut inner = self.0.borrow_mut();
        inner.sets.create(name, value)?;
        tracing::debug!(set = name, "created set");
        Ok(())
    }

    /// Atomic wholesale replacement of a set's contents. Fails if the set
    /// has not been created yet.
    pub fn update_set(&self, name: &str, value: Value) -> Result<(), PolicyError> {
        let mut inner = self.0.borrow_mut();
        inner.sets.replace_value(name, value)?;
        tracing::debug!(set = name, "updated set");
        Ok(())
    }

    pub fn add_to_set(&self, name: &str, element: u32) -> Result<(), PolicyError> {
        let mut inner = self.0.borrow_mut();
        match inner.sets.get_mut(name) {
            Some(Value::Set32(s)) | Some(Value::CommunitySet(s)) => {
                s.insert(element);
                Ok(())
            }
            Some(_) => Err(PolicyError::InvalidOperation(format!("set '{name}' is not a numeric set"))),
            None => Err(PolicyError::from(crate::errors::DependencyError::NotFound(name.to_string()))),
        }
    }

    pub fn delete_from_set(&self, name: &str, element: u32) -> Result<(), PolicyError> {
        let mut inner = self.0.borrow_mut();
        match inner.sets.get_mut(name) {
            Some(Value::Set32(s)) | Some(Value::CommunitySet(s)) => {
                s.remove(&element);
                Ok(())
            }
            Some(_) => Err(PolicyError::InvalidOperation(format!("set '{name}' is not a numeric set"))),
            None => Err(PolicyError::from(crate::errors::DependencyError::NotFound(name.to_string()))),
        }
    }

    /// Fails if the set is still referenced by a policy.
    pub fn delete_set(&self, name: &str) -> Result<(), PolicyError> {
        let mut inner = self.0.borrow_mut();
        inner.sets.remove(name)?;
        tracing::debug!(set = name, "deleted set");
        Ok(())
    }

    /// Replace the named import list for `protocol`. `modifier` is an
    /// opaque label distinguishing parallel lists.
    pub fn update_imports(&self, protocol: &str, modifier: &str, policies: Vec<String>) -> Result<(), PolicyError> {
        self.update_ie(protocol, modifier, policies, true)
    }

    pub fn update_exports(&self, protocol: &str, modifier: &str, policies: Vec<String>) -> Result<(), PolicyError> {
        self.update_ie(protocol, modifier, policies, false)
    }

    fn update_ie(&self, protocol: &str, modifier: &str, policies: Vec<String>, is_import: bool) -> Result<(), PolicyError> {
        let mut inner = self.0.borrow_mut();
        for p in &policies {
            if !inner.policies.contains(p) {
                return Err(PolicyError::UnknownPolicy(p.clone()));
            }
        }
        let map = if is_import { &mut inner.imports } else { &mut inner.exports };
        let old_list = map.get(protocol).and_then(|m| m.get(modifier)).cloned().unwrap_or_default();
        let old_set: AHashSet<String> = old_list.policies.iter().cloned().collect();
        let new_set: AHashSet<String> = policies.iter().cloned().collect();
        let marker = format!("{}:{protocol}:{modifier}", if is_import { "import" } else { "export" });
        inner.policies.replace_dependent_edges(&marker, &old_set, &new_set);

        // Every policy whose membership in this list changed (added or
        // removed) needs a full recompute at next commit: `do_compile_and_link`
        // evicts its stale fragments and recompiles it against whatever
        // lists currently reference it.
        for changed in old_set.symmetric_difference(&new_set) {
            inner.touch(changed);
        }

        let target_kind = if is_import { FilterKind::Import } else { FilterKind::Export };
        inner.modified_targets.insert(Target::new(protocol, target_kind));
        map.entry(protocol.to_string()).or_default().insert(modifier.to_string(), PolicyList { policies });
        tracing::debug!(protocol, modifier, import = is_import, "updated policy list");
        Ok(())
    }

    /// Recompile/relink whatever `modified_policies`/`modified_targets`
    /// accumulated, after `debounce_millis` of quiet. A new delta arriving
    /// before the delay elapses restarts the timer: compile/link/hand-off
    /// all wait for the latest delta, but every delta's own
    /// parse/semantic-adjacent checks (e.g. `update_term_block`'s parse)
    /// already happened synchronously when the delta was made.
    pub fn commit(&self, debounce_millis: u64) {
        if let Some(handle) = self.0.borrow_mut().debounce.take() {
            handle.abort();
        }
        let this = self.clone();
        let handle = tokio::task::spawn_local(async move {
            tokio::time::sleep(Duration::from_millis(debounce_millis)).await;
            if let Err(e) = this.0.borrow_mut().do_compile_and_link() {
                tracing::error!(error = %e, "commit failed, previous filter images remain installed");
            }
        });
        self.0.borrow_mut().debounce = Some(handle);
    }

    /// Commit immediately, bypassing the debounce timer — useful for tests
    /// and for a caller that wants synchronous compile/link semantics.
    pub fn commit_now(&self) -> Result<(), PolicyError> {
        if let Some(handle) = self.0.borrow_mut().debounce.take() {
            handle.abort();
        }
        self.0.borrow_mut().do_compile_and_link()
    }

    /// Run one route through `target`'s currently installed filter,
    /// returning the verdict. One VM invocation per route. Returns
    /// `Verdict::Default` if nothing has ever been linked for this target,
    /// matching "fall off the end" semantics for an empty filter.
    pub fn run(&self, target: &Target, varrw: &mut dyn VarRw) -> Verdict {
        let inner = self.0.borrow();
        let Some(handle) = inner.filters.get(target).and_then(VersionedFilter::current) else {
            return Verdict::Default;
        };
        let image = handle.image();
        let regexes = RegexPool::compile(&image);
        // Sub-policies are rebuilt into an owned map per call, since
        // `SubrImage` doesn't implement `Clone` (its `RegexPool` is rebuilt
        // from the image rather than cloned) and a `Vm` invocation is
        // short-lived (one route), so the rebuild cost is negligible next to
        // compiling the regex set once per image anyway.
        let mut owned_subrs = ahash::AHashMap::new();
        for (name, sub) in &inner.subr_images {
            owned_subrs.insert(name.clone(), SubrImage { image: sub.image.clone(), regexes: RegexPool::compile(&sub.image) });
        }
        let mut vm = Vm::new(&image, &regexes, &inner.sets, &owned_subrs, varrw);
        vm.run()
    }

    pub fn tag_table_for(&self, protocol: &str) -> AHashSet<u32> {
        self.0.borrow().tag_table.get(protocol).cloned().unwrap_or_default()
    }

    /// Whether any path through `name`'s terms reaches a `Reject`, as of the
    /// last successful compile. `None` if the policy doesn't exist or hasn't
    /// been compiled (and therefore checked) yet.
    pub fn can_reject(&self, name: &str) -> Option<bool> {
        self.0.borrow().policies.get(name).map(|p| p.can_reject)
    }
}

/// Generate the `i`-th statement's id within one `update_term_block` call:
/// the first statement keeps `order` unchanged, later ones chain after the
/// previous statement's synthetic id.
fn child_id(order: ConfigNodeId, i: usize) -> ConfigNodeId {
    if i == 0 {
        return order;
    }
    let unique_id = order.unique_id.wrapping_mul(1_000_003).wrapping_add(i as u64);
    let after = child_id(order, i - 1).unique_id;
    ConfigNodeId { unique_id, after: Some(after) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Block;
    use crate::test_support::MapVarRw;
    use crate::value::Value;
    use crate::varmap::Access;

    fn bgp_config() -> Configuration {
        let cfg = Configuration::with_null_sink();
        cfg.add_varmap("bgp", "med", "u32", Access::ReadWrite, 10);
        cfg.add_varmap("bgp", "policy-tags", "set32", Access::ReadWrite, crate::code::POLICY_TAGS_VAR_ID);
        cfg
    }

    #[tokio::test]
    async fn import_accept_all() {
        let cfg = bgp_config();
        cfg.create_policy("P1").unwrap();
        cfg.create_term("P1", ConfigNodeId::head(1), "t1").unwrap();
        cfg.update_term_block("P1", "t1", Block::Action, ConfigNodeId::head(2), "accept").unwrap();
        cfg.update_imports("bgp", "main", vec!["P1".to_string()]).unwrap();
        cfg.commit_now().unwrap();

        let mut route = MapVarRw::new();
        let verdict = cfg.run(&Target::new("bgp", FilterKind::Import), &mut route);
        assert_eq!(verdict, Verdict::Accept);
    }

    #[tokio::test]
    async fn reject_tagged() {
        let cfg = bgp_config();
        cfg.create_policy("P1b").unwrap();
        cfg.create_term("P1b", ConfigNodeId::head(1), "t1").unwrap();
        cfg.update_term_block("P1b", "t1", Block::Source, ConfigNodeId::head(2), "policy-tags contains 42").unwrap();
        cfg.update_term_block("P1b", "t1", Block::Action, ConfigNodeId::head(3), "reject").unwrap();
        cfg.update_imports("bgp", "main", vec!["P1b".to_string()]).unwrap();
        cfg.commit_now().unwrap();

        let mut route = MapVarRw::new();
        route.set(crate::code::POLICY_TAGS_VAR_ID, Value::Set32(ahash::AHashSet::from_iter([42])));
        let verdict = cfg.run(&Target::new("bgp", FilterKind::Import), &mut route);
        assert_eq!(verdict, Verdict::Reject);
    }

    #[tokio::test]
    async fn can_reject_hint_tracks_last_compile() {
        let cfg = bgp_config();
        cfg.create_policy("P1c").unwrap();
        cfg.create_term("P1c", ConfigNodeId::head(1), "t1").unwrap();
        cfg.update_term_block("P1c", "t1", Block::Action, ConfigNodeId::head(2), "accept").unwrap();
        cfg.update_imports("bgp", "main", vec!["P1c".to_string()]).unwrap();
        cfg.commit_now().unwrap();
        assert_eq!(cfg.can_reject("P1c"), Some(false));

        cfg.update_term_block("P1c", "t1", Block::Action, ConfigNodeId::head(2), "reject").unwrap();
        cfg.commit_now().unwrap();
        assert_eq!(cfg.can_reject("P1c"), Some(true));

        assert_eq!(cfg.can_reject("nonexistent"), None);
    }

    #[tokio::test]
    async fn delete_in_use_set_is_refused() {
        let cfg = bgp_config();
        cfg.create_set("S", Value::Set32(ahash::AHashSet::from_iter([1, 2, 3]))).unwrap();
        cfg.create_policy("Q").unwrap();
        cfg.create_term("Q", ConfigNodeId::head(1), "t1").unwrap();
        cfg.update_term_block("Q", "t1", Block::Source, ConfigNodeId::head(2), "med in S").unwrap();
        cfg.update_term_block("Q", "t1", Block::Action, ConfigNodeId::head(3), "accept").unwrap();
        cfg.update_imports("bgp", "main", vec!["Q".to_string()]).unwrap();
        cfg.commit_now().unwrap();

        assert!(matches!(cfg.delete_set("S"), Err(PolicyError::Dependency(_))));

        // `Q` is still referenced by the import list, so it can't be deleted
        // either until the list itself stops naming it.
        assert!(matches!(cfg.delete_policy("Q"), Err(PolicyError::Dependency(_))));
        cfg.update_imports("bgp", "main", vec![]).unwrap();
        cfg.commit_now().unwrap();

        cfg.delete_policy("Q").unwrap();
        assert!(cfg.delete_set("S").is_ok());
    }

    #[tokio::test]
    async fn debounce_restarts_on_new_delta() {
        tokio::time::pause();
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let cfg = bgp_config();
                cfg.create_policy("P").unwrap();
                cfg.create_term("P", ConfigNodeId::head(1), "t1").unwrap();
                cfg.update_term_block("P", "t1", Block::Action, ConfigNodeId::head(2), "accept").unwrap();
                cfg.update_imports("bgp", "main", vec!["P".to_string()]).unwrap();

                cfg.commit(100);
                tokio::time::advance(Duration::from_millis(60)).await;
                // A second delta within the debounce window restarts the timer.
                cfg.commit(100);
                tokio::time::advance(Duration::from_millis(60)).await;
                // Original 100ms deadline would have elapsed by now (120ms in)
                // had the timer not restarted; nothing should be linked yet.
                assert_eq!(cfg.run(&Target::new("bgp", FilterKind::Import), &mut MapVarRw::new()), Verdict::Default);

                tokio::time::advance(Duration::from_millis(60)).await;
                tokio::task::yield_now().await;
                assert_eq!(cfg.run(&Target::new("bgp", FilterKind::Import), &mut MapVarRw::new()), Verdict::Accept);
            })
            .await;
    }

    #[tokio::test]
    async fn incremental_recompile_does_not_reallocate_unrelated_tags() {
        let cfg = bgp_config();
        cfg.add_varmap("ospf", "policy-tags", "set32", Access::ReadWrite, crate::code::POLICY_TAGS_VAR_ID);
        cfg.create_policy("Tagged").unwrap();
        cfg.create_term("Tagged", ConfigNodeId::head(1), "t1").unwrap();
        cfg.update_term_block("Tagged", "t1", Block::Source, ConfigNodeId::head(2), "protocol bgp").unwrap();
        cfg.update_term_block("Tagged", "t1", Block::Action, ConfigNodeId::head(3), "policy-tags += 7").unwrap();
        cfg.update_exports("ospf", "main", vec!["Tagged".to_string()]).unwrap();
        cfg.commit_now().unwrap();
        // The tag table is keyed by the *source* protocol the
        // `export-source-match` fragment was compiled for (here "bgp",
        // from the term's `protocol bgp` match), not the consumer ("ospf").
        let tags_before = cfg.tag_table_for("bgp");
        assert!(!tags_before.is_empty());

        // An unrelated policy's own commit must not disturb `Tagged`'s tag.
        cfg.create_policy("Other").unwrap();
        cfg.create_term("Other", ConfigNodeId::head(1), "t1").unwrap();
        cfg.update_term_block("Other", "t1", Block::Action, ConfigNodeId::head(2), "accept").unwrap();
        cfg.update_imports("bgp", "main", vec!["Other".to_string()]).unwrap();
        cfg.commit_now().unwrap();

        assert_eq!(cfg.tag_table_for("bgp"), tags_before);
    }
}
