// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Crate-level integration tests exercising `Configuration` end to end:
//! every delta op, the checker, the codegen/link pipeline, and the VM, all
//! wired together the way a protocol adapter would use them. Unlike the
//! `#[cfg(test)]` unit tests inside `configuration.rs` (which focus on the
//! delta surface and the incremental recompile pipeline in isolation), these
//! tests read like a sequence of operator actions against a running router:
//! declare variables, build up policies, commit, and run routes through the
//! resulting filters.

use dataplane_policy::ast::{Block, ConfigNodeId};
use dataplane_policy::code::{FilterKind, Target, NEXTHOP4_VAR_ID, POLICY_TAGS_VAR_ID};
use dataplane_policy::test_support::MapVarRw;
use dataplane_policy::value::NextHop4;
use dataplane_policy::varmap::Access;
use dataplane_policy::{Configuration, PolicyError, Value, Verdict};

fn configured_bgp() -> Configuration {
    let cfg = Configuration::with_null_sink();
    cfg.add_varmap("bgp", "med", "u32", Access::ReadWrite, 10);
    cfg.add_varmap("bgp", "policy-tags", "set32", Access::ReadWrite, POLICY_TAGS_VAR_ID);
    cfg.add_varmap("bgp", "nexthop4", "nexthop4", Access::ReadWrite, NEXTHOP4_VAR_ID);
    cfg
}

/// An import policy with no source-match accepts every route; a second
/// import policy that matches on an inbound redistribution tag rejects it.
#[test]
fn import_accepts_all_then_reject_tagged_route() {
    let cfg = configured_bgp();

    cfg.create_policy("AcceptAll").unwrap();
    cfg.create_term("AcceptAll", ConfigNodeId::head(1), "t1").unwrap();
    cfg.update_term_block("AcceptAll", "t1", Block::Action, ConfigNodeId::head(2), "accept").unwrap();
    cfg.update_imports("bgp", "main", vec!["AcceptAll".to_string()]).unwrap();
    cfg.commit_now().unwrap();

    let target = Target::new("bgp", FilterKind::Import);
    assert_eq!(cfg.run(&target, &mut MapVarRw::new()), Verdict::Accept);

    cfg.update_imports("bgp", "main", vec![]).unwrap();
    cfg.delete_policy("AcceptAll").unwrap();

    cfg.create_policy("RejectTagged").unwrap();
    cfg.create_term("RejectTagged", ConfigNodeId::head(1), "t1").unwrap();
    cfg.update_term_block("RejectTagged", "t1", Block::Source, ConfigNodeId::head(2), "policy-tags contains 42").unwrap();
    cfg.update_term_block("RejectTagged", "t1", Block::Action, ConfigNodeId::head(3), "reject").unwrap();
    cfg.update_imports("bgp", "main", vec!["RejectTagged".to_string()]).unwrap();
    cfg.commit_now().unwrap();

    let mut tagged = MapVarRw::new();
    tagged.set(POLICY_TAGS_VAR_ID, Value::Set32(ahash::AHashSet::from_iter([42])));
    assert_eq!(cfg.run(&target, &mut tagged), Verdict::Reject);

    let mut untagged = MapVarRw::new();
    untagged.set(POLICY_TAGS_VAR_ID, Value::Set32(ahash::AHashSet::new()));
    assert_eq!(cfg.run(&target, &mut untagged), Verdict::Default);
}

/// An export policy assigns a redistribution tag to routes sourced from
/// a given protocol, and the tag travels on the `export-source-match`
/// target's own filter, independent of the consumer protocol's `export`
/// filter.
#[test]
fn export_assigns_redistribution_tag() {
    let cfg = configured_bgp();
    cfg.add_varmap("ospf", "policy-tags", "set32", Access::ReadWrite, POLICY_TAGS_VAR_ID);

    cfg.create_policy("TagFromBgp").unwrap();
    cfg.create_term("TagFromBgp", ConfigNodeId::head(1), "t1").unwrap();
    cfg.update_term_block("TagFromBgp", "t1", Block::Source, ConfigNodeId::head(2), "protocol bgp").unwrap();
    cfg.update_term_block("TagFromBgp", "t1", Block::Action, ConfigNodeId::head(3), "policy-tags += 7").unwrap();
    cfg.update_exports("ospf", "main", vec!["TagFromBgp".to_string()]).unwrap();
    cfg.commit_now().unwrap();

    let tags = cfg.tag_table_for("bgp");
    assert_eq!(tags.len(), 1, "exactly one tag allocated for the one export-source-match fragment");

    let source_match = Target::new("bgp", FilterKind::ExportSourceMatch);
    let mut route = MapVarRw::new();
    // The accumulating `policy-tags += <tag>` read-modify-write assumes the
    // route already carries an (empty) tag set, same as a real protocol
    // adapter's `VarRw` would initialize it — not the `Null` a brand-new
    // `MapVarRw` otherwise returns for an untouched id.
    route.set(POLICY_TAGS_VAR_ID, Value::Set32(ahash::AHashSet::new()));
    assert_eq!(cfg.run(&source_match, &mut route), Verdict::Accept);
    assert!(matches!(route.get(POLICY_TAGS_VAR_ID), Some(Value::Set32(s)) if !s.is_empty()));

    // The ospf-facing `export` target carries no policy-tags instruction of
    // its own (it's stripped at lowering, already applied at the source) —
    // an empty dest-match/action term still installs an (empty) filter.
    let export_target = Target::new("ospf", FilterKind::Export);
    assert_eq!(cfg.run(&export_target, &mut MapVarRw::new()), Verdict::Default);
}

/// An import policy rewrites the route's nexthop before accepting.
#[test]
fn nexthop_rewrite_on_accept() {
    let cfg = configured_bgp();
    cfg.create_policy("RewriteNexthop").unwrap();
    cfg.create_term("RewriteNexthop", ConfigNodeId::head(1), "t1").unwrap();
    cfg.update_term_block("RewriteNexthop", "t1", Block::Action, ConfigNodeId::head(2), "nexthop4 = 192.0.2.1; accept").unwrap();
    cfg.update_imports("bgp", "main", vec!["RewriteNexthop".to_string()]).unwrap();
    cfg.commit_now().unwrap();

    let mut route = MapVarRw::new();
    let verdict = cfg.run(&Target::new("bgp", FilterKind::Import), &mut route);
    assert_eq!(verdict, Verdict::Accept);
    assert_eq!(route.get(NEXTHOP4_VAR_ID), Some(&Value::NextHop4(NextHop4::Addr("192.0.2.1".parse().unwrap()))));
}

/// A set still referenced by a policy, and a policy still referenced by
/// an import list, both refuse deletion until the reference is removed.
#[test]
fn delete_refused_while_referenced_then_succeeds() {
    let cfg = configured_bgp();
    cfg.create_set("HighMed", Value::Set32(ahash::AHashSet::from_iter([100, 200]))).unwrap();
    cfg.create_policy("MatchesHighMed").unwrap();
    cfg.create_term("MatchesHighMed", ConfigNodeId::head(1), "t1").unwrap();
    cfg.update_term_block("MatchesHighMed", "t1", Block::Source, ConfigNodeId::head(2), "med in HighMed").unwrap();
    cfg.update_term_block("MatchesHighMed", "t1", Block::Action, ConfigNodeId::head(3), "accept").unwrap();
    cfg.update_imports("bgp", "main", vec!["MatchesHighMed".to_string()]).unwrap();
    cfg.commit_now().unwrap();

    assert!(matches!(cfg.delete_set("HighMed"), Err(PolicyError::Dependency(_))));
    assert!(matches!(cfg.delete_policy("MatchesHighMed"), Err(PolicyError::Dependency(_))));

    cfg.update_imports("bgp", "main", vec![]).unwrap();
    cfg.commit_now().unwrap();

    cfg.delete_policy("MatchesHighMed").unwrap();
    cfg.delete_set("HighMed").unwrap();
}

/// A term's blocks arrive out of order within one `update_term_block`
/// sequence; the ordered container reassembles them and the compiled filter
/// still behaves as if they'd arrived in order.
#[test]
fn out_of_order_term_block_delivery() {
    let cfg = configured_bgp();
    cfg.create_policy("OutOfOrder").unwrap();
    cfg.create_term("OutOfOrder", ConfigNodeId::head(1), "t1").unwrap();

    // Source-match delivered as three statements whose ids arrive out of
    // sequence: first the tail (after id=2), then the head, then the middle.
    let tail = ConfigNodeId::after(3, 2);
    let head = ConfigNodeId::head(1);
    let middle = ConfigNodeId::after(2, 1);
    cfg.update_term_block("OutOfOrder", "t1", Block::Source, tail, "med == 100").unwrap();
    cfg.update_term_block("OutOfOrder", "t1", Block::Source, head, "policy-tags contains 42").unwrap();
    cfg.update_term_block("OutOfOrder", "t1", Block::Source, middle, "med != 0").unwrap();
    cfg.update_term_block("OutOfOrder", "t1", Block::Action, ConfigNodeId::head(10), "accept").unwrap();
    cfg.update_imports("bgp", "main", vec!["OutOfOrder".to_string()]).unwrap();
    cfg.commit_now().unwrap();

    let target = Target::new("bgp", FilterKind::Import);
    let mut matching = MapVarRw::new();
    matching.set(10, Value::U32(100));
    matching.set(POLICY_TAGS_VAR_ID, Value::Set32(ahash::AHashSet::from_iter([42])));
    assert_eq!(cfg.run(&target, &mut matching), Verdict::Accept);

    let mut non_matching = MapVarRw::new();
    non_matching.set(10, Value::U32(50));
    non_matching.set(POLICY_TAGS_VAR_ID, Value::Set32(ahash::AHashSet::from_iter([42])));
    assert_eq!(cfg.run(&target, &mut non_matching), Verdict::Default);
}

/// A caller policy invokes a sub-policy; the sub-policy's own verdict
/// becomes a boolean the caller's source-match can combine with `&&`, and a
/// `policy (A, B)` group requires every member to accept.
#[test]
fn sub_policy_invocation_and_group() {
    let cfg = configured_bgp();

    cfg.create_policy("HighMed").unwrap();
    cfg.create_term("HighMed", ConfigNodeId::head(1), "t1").unwrap();
    cfg.update_term_block("HighMed", "t1", Block::Source, ConfigNodeId::head(2), "med == 100").unwrap();
    cfg.update_term_block("HighMed", "t1", Block::Action, ConfigNodeId::head(3), "accept").unwrap();

    // Two terms: reject a tagged route, otherwise fall through to an
    // unconditional accept. A single term matching "not tagged" would leave
    // the untagged case at `Verdict::Default` rather than an explicit
    // accept, which `policy (...)`'s all-must-accept semantics require.
    cfg.create_policy("NoTags").unwrap();
    cfg.create_term("NoTags", ConfigNodeId::head(1), "t1").unwrap();
    cfg.update_term_block("NoTags", "t1", Block::Source, ConfigNodeId::head(2), "policy-tags contains 42").unwrap();
    cfg.update_term_block("NoTags", "t1", Block::Action, ConfigNodeId::head(3), "reject").unwrap();
    cfg.create_term("NoTags", ConfigNodeId::after(2, 1), "t2").unwrap();
    cfg.update_term_block("NoTags", "t2", Block::Action, ConfigNodeId::head(4), "accept").unwrap();

    cfg.create_policy("Caller").unwrap();
    cfg.create_term("Caller", ConfigNodeId::head(1), "t1").unwrap();
    cfg.update_term_block("Caller", "t1", Block::Source, ConfigNodeId::head(2), "policy HighMed").unwrap();
    cfg.update_term_block("Caller", "t1", Block::Action, ConfigNodeId::head(3), "accept").unwrap();
    cfg.update_imports("bgp", "main", vec!["Caller".to_string()]).unwrap();
    cfg.commit_now().unwrap();

    let target = Target::new("bgp", FilterKind::Import);
    let mut accepted = MapVarRw::new();
    accepted.set(10, Value::U32(100));
    assert_eq!(cfg.run(&target, &mut accepted), Verdict::Accept);

    let mut falls_through = MapVarRw::new();
    falls_through.set(10, Value::U32(7));
    assert_eq!(cfg.run(&target, &mut falls_through), Verdict::Default);

    // A `policy (HighMed, NoTags)` group is true only if every member
    // accepts; `NoTags` rejects unless tag 42 is absent, so a route with
    // med == 100 and no tags clears the group while one carrying tag 42
    // does not.
    cfg.create_policy("Group").unwrap();
    cfg.create_term("Group", ConfigNodeId::head(1), "t1").unwrap();
    cfg.update_term_block("Group", "t1", Block::Source, ConfigNodeId::head(2), "policy (HighMed, NoTags)").unwrap();
    cfg.update_term_block("Group", "t1", Block::Action, ConfigNodeId::head(3), "accept").unwrap();
    cfg.update_imports("bgp", "group", vec!["Group".to_string()]).unwrap();
    cfg.commit_now().unwrap();

    let mut clears_group = MapVarRw::new();
    clears_group.set(10, Value::U32(100));
    clears_group.set(POLICY_TAGS_VAR_ID, Value::Set32(ahash::AHashSet::new()));
    assert_eq!(cfg.run(&target, &mut clears_group), Verdict::Accept);
}

/// A parse error in a delta is reported synchronously to the caller, not
/// deferred to `commit`.
#[test]
fn parse_errors_surface_immediately_not_at_commit() {
    let cfg = configured_bgp();
    cfg.create_policy("Bad").unwrap();
    cfg.create_term("Bad", ConfigNodeId::head(1), "t1").unwrap();
    let err = cfg.update_term_block("Bad", "t1", Block::Action, ConfigNodeId::head(2), "accept accept");
    assert!(matches!(err, Err(PolicyError::Parse { .. })));
}

/// An import policy that tries to match on the originating protocol is a
/// semantic error, reported at commit time.
#[test]
fn import_with_proto_match_is_a_semantic_error() {
    let cfg = configured_bgp();
    cfg.create_policy("BadImport").unwrap();
    cfg.create_term("BadImport", ConfigNodeId::head(1), "t1").unwrap();
    cfg.update_term_block("BadImport", "t1", Block::Source, ConfigNodeId::head(2), "protocol bgp").unwrap();
    cfg.update_term_block("BadImport", "t1", Block::Action, ConfigNodeId::head(3), "accept").unwrap();
    cfg.update_imports("bgp", "main", vec!["BadImport".to_string()]).unwrap();

    let err = cfg.commit_now();
    assert!(matches!(err, Err(PolicyError::Semantic { .. })));
}

/// Deleting an absent term or removing a policy from a list it was never in
/// is a permissive no-op, not an error.
#[test]
fn permissive_deletes_are_not_errors() {
    let cfg = configured_bgp();
    cfg.create_policy("P").unwrap();
    cfg.delete_term("P", "never-existed").unwrap();
    cfg.update_imports("bgp", "main", vec![]).unwrap();
    cfg.commit_now().unwrap();
}

/// A statement whose declared predecessor never arrives is still flushed to
/// the compiled image at commit (end-of-policy finalization), rather than
/// silently dropped for lacking a resolved position.
#[test]
fn orphaned_out_of_order_statement_is_flushed_at_commit() {
    let cfg = configured_bgp();
    cfg.create_policy("Orphan").unwrap();
    cfg.create_term("Orphan", ConfigNodeId::head(1), "t1").unwrap();

    // "after id=404" names a predecessor that is never delivered.
    let orphan = ConfigNodeId::after(2, 404);
    cfg.update_term_block("Orphan", "t1", Block::Action, orphan, "accept").unwrap();
    cfg.update_imports("bgp", "main", vec!["Orphan".to_string()]).unwrap();
    cfg.commit_now().unwrap();

    let target = Target::new("bgp", FilterKind::Import);
    assert_eq!(cfg.run(&target, &mut MapVarRw::new()), Verdict::Accept);
}
