//! # Synthesis Tests
//!
//! End-to-end behaviour of the declare → synthesize pipeline:
//! - reference chains resolve to their terminal values
//! - every problem in the tree is reported in one pass
//! - value-dependency cycles are named, never looped on
//! - placement snapshots taken at synthesis time

use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use stackweave::{
    BinPackResource, ClusterConstruct, ConstructTree, DeferredValue, IssueKind, LaunchTarget,
    PlacementAssembler, ScheduledTask, StackError,
};

// ============================================================================
// TEST HELPERS
// ============================================================================

fn issues(err: &StackError) -> Vec<(String, IssueKind, String)> {
    err.report()
        .expect("expected a validation report")
        .iter()
        .map(|i| (i.node.clone(), i.kind, i.message.clone()))
        .collect()
}

// ============================================================================
// HAPPY PATH
// ============================================================================

#[test]
fn network_cluster_service_resolve_to_ids() {
    let mut tree = ConstructTree::new("App").unwrap();
    let root = tree.root();
    tree.add_node(root, "Network", "Vpc").unwrap();
    let cluster = tree.add_node(root, "Cluster", "Cluster").unwrap();
    tree.set_property(cluster, "network", DeferredValue::reference("Network", "id"))
        .unwrap();
    let service = tree.add_node(root, "Service", "Service").unwrap();
    tree.set_property(service, "cluster", DeferredValue::reference("Cluster", "id"))
        .unwrap();

    let template = tree.synthesize().unwrap();

    let ids: Vec<&str> = template
        .root()
        .children
        .iter()
        .map(|c| c.id.as_str())
        .collect();
    assert_eq!(ids, vec!["Network", "Cluster", "Service"]);
    assert_eq!(template.property("Cluster", "network"), Some(&json!("Network")));
    assert_eq!(template.property("Service", "cluster"), Some(&json!("Cluster")));
    assert!(template.find("Network").unwrap().properties.is_empty());
}

#[test]
fn chains_of_lazies_and_references_flatten() {
    let mut tree = ConstructTree::new("App").unwrap();
    let root = tree.root();
    let vpc = tree.add_node(root, "Vpc", "Vpc").unwrap();
    tree.expose(
        vpc,
        "cidr",
        DeferredValue::lazy(|| DeferredValue::lazy(|| DeferredValue::concrete("10.0.0.0/16"))),
    )
    .unwrap();
    let subnet = tree.add_node(vpc, "Subnet", "Subnet").unwrap();
    tree.expose(subnet, "parentCidr", DeferredValue::reference("Vpc", "cidr"))
        .unwrap();
    let task = tree.add_node(root, "Task", "Task").unwrap();
    tree.set_property(
        task,
        "network",
        DeferredValue::lazy(|| {
            DeferredValue::map([
                ("subnet", DeferredValue::reference("Vpc/Subnet", "id")),
                ("cidr", DeferredValue::reference("Vpc/Subnet", "parentCidr")),
            ])
        }),
    )
    .unwrap();

    let template = tree.synthesize().unwrap();
    assert_eq!(
        template.property("Task", "network"),
        Some(&json!({"subnet": "Vpc/Subnet", "cidr": "10.0.0.0/16"}))
    );
}

#[test]
fn shared_output_resolves_once_across_consumers() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);

    let mut tree = ConstructTree::new("App").unwrap();
    let root = tree.root();
    let image = tree.add_node(root, "Image", "ContainerImage").unwrap();
    tree.expose(
        image,
        "uri",
        DeferredValue::lazy(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            DeferredValue::concrete("registry/app:1")
        }),
    )
    .unwrap();
    for id in ["Web", "Worker", "Cron"] {
        let node = tree.add_node(root, id, "TaskDefinition").unwrap();
        tree.set_property(node, "image", DeferredValue::reference("Image", "uri"))
            .unwrap();
    }

    let template = tree.synthesize().unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(template.property("Cron", "image"), Some(&json!("registry/app:1")));
}

// ============================================================================
// AGGREGATED FAILURES
// ============================================================================

#[test]
fn missing_reference_names_node_and_target() {
    let mut tree = ConstructTree::new("App").unwrap();
    let service = tree.add_node(tree.root(), "Service", "Service").unwrap();
    tree.set_property(service, "cluster", DeferredValue::reference("Missing", "id"))
        .unwrap();

    let err = tree.synthesize().unwrap_err();
    let found = issues(&err);
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].0, "Service");
    assert_eq!(found[0].1, IssueKind::UnknownReference);
    assert!(found[0].2.contains("Missing"));
}

#[test]
fn unknown_reference_and_unrelated_check_both_reported() {
    let mut tree = ConstructTree::new("App").unwrap();
    let root = tree.root();
    let service = tree.add_node(root, "Service", "Service").unwrap();
    tree.set_property(service, "cluster", DeferredValue::reference("Missing", "id"))
        .unwrap();
    let task = tree.add_node(root, "Task", "TaskDefinition").unwrap();
    tree.add_check(task, |ctx| {
        if ctx.property("image").is_none() {
            vec!["task definition needs an image".to_string()]
        } else {
            Vec::new()
        }
    })
    .unwrap();

    let err = tree.synthesize().unwrap_err();
    let found = issues(&err);
    assert_eq!(found.len(), 2);
    assert_eq!(found[0].1, IssueKind::UnknownReference);
    assert_eq!(found[1], (
        "Task".to_string(),
        IssueKind::Check,
        "task definition needs an image".to_string()
    ));
}

#[test]
fn many_problems_in_nested_tree_all_surface() {
    let mut tree = ConstructTree::new("App").unwrap();
    let root = tree.root();
    let cluster = tree.add_node(root, "Cluster", "Cluster").unwrap();
    let capacity = tree.add_node(cluster, "Capacity", "AutoScalingGroup").unwrap();
    tree.set_property(capacity, "subnet", DeferredValue::reference("Net", "subnet"))
        .unwrap();
    tree.set_property(capacity, "role", DeferredValue::reference("Iam", "role"))
        .unwrap();
    tree.add_check(capacity, |_| vec!["first".to_string(), "second".to_string()])
        .unwrap();

    let err = tree.synthesize().unwrap_err();
    let found = issues(&err);
    assert_eq!(found.len(), 4);
    assert!(found.iter().all(|(node, _, _)| node == "Cluster/Capacity"));
    assert!(err.to_string().contains("4 problem(s)"));
}

#[test]
fn no_partial_template_on_failure() {
    let mut tree = ConstructTree::new("App").unwrap();
    let good = tree.add_node(tree.root(), "Good", "Thing").unwrap();
    tree.set_property(good, "name", "fine").unwrap();
    let bad = tree.add_node(tree.root(), "Bad", "Thing").unwrap();
    tree.set_property(bad, "x", DeferredValue::reference("Nope", "id"))
        .unwrap();

    assert!(matches!(
        tree.synthesize(),
        Err(StackError::Validation { .. })
    ));
}

// ============================================================================
// CYCLES
// ============================================================================

#[test]
fn two_node_cycle_names_both_members() {
    let mut tree = ConstructTree::new("App").unwrap();
    let root = tree.root();
    let a = tree.add_node(root, "A", "Thing").unwrap();
    let b = tree.add_node(root, "B", "Thing").unwrap();
    tree.expose(a, "out", DeferredValue::reference("B", "out")).unwrap();
    tree.expose(b, "out", DeferredValue::reference("A", "out")).unwrap();
    tree.set_property(a, "value", DeferredValue::reference("A", "out"))
        .unwrap();

    let err = tree.synthesize().unwrap_err();
    let report = err.report().unwrap();
    assert_eq!(report.len(), 1);
    let issue = &report.issues()[0];
    assert_eq!(issue.node, "A");
    assert_eq!(issue.kind, IssueKind::CyclicReference);
    assert!(issue.message.contains("A.out -> B.out -> A.out"));
}

#[test]
fn three_node_cycle_reported_for_every_consumer() {
    let mut tree = ConstructTree::new("App").unwrap();
    let root = tree.root();
    for (id, next) in [("A", "B"), ("B", "C"), ("C", "A")] {
        let node = tree.add_node(root, id, "Thing").unwrap();
        tree.expose(node, "out", DeferredValue::reference(next, "out"))
            .unwrap();
        tree.set_property(node, "value", DeferredValue::reference(id, "out"))
            .unwrap();
    }

    let err = tree.synthesize().unwrap_err();
    let found = issues(&err);
    assert_eq!(found.len(), 3);
    assert!(found.iter().all(|(_, kind, _)| *kind == IssueKind::CyclicReference));
    for member in ["A.out", "B.out", "C.out"] {
        assert!(found[0].2.contains(member), "{} missing from {}", member, found[0].2);
    }
}

#[test]
fn self_reference_is_a_cycle() {
    let mut tree = ConstructTree::new("App").unwrap();
    let a = tree.add_node(tree.root(), "A", "Thing").unwrap();
    tree.expose(a, "loop", DeferredValue::reference("A", "loop")).unwrap();
    tree.set_property(a, "value", DeferredValue::reference("A", "loop"))
        .unwrap();

    let err = tree.synthesize().unwrap_err();
    let found = issues(&err);
    assert_eq!(found[0].1, IssueKind::CyclicReference);
    assert!(found[0].2.contains("A.loop -> A.loop"));
}

#[test]
fn cycle_does_not_hide_independent_errors() {
    let mut tree = ConstructTree::new("App").unwrap();
    let root = tree.root();
    let a = tree.add_node(root, "A", "Thing").unwrap();
    let b = tree.add_node(root, "B", "Thing").unwrap();
    tree.expose(a, "out", DeferredValue::reference("B", "out")).unwrap();
    tree.expose(b, "out", DeferredValue::reference("A", "out")).unwrap();
    tree.set_property(a, "value", DeferredValue::reference("A", "out"))
        .unwrap();
    let c = tree.add_node(root, "C", "Thing").unwrap();
    tree.set_property(c, "value", DeferredValue::reference("Ghost", "id"))
        .unwrap();

    let err = tree.synthesize().unwrap_err();
    let kinds: Vec<IssueKind> = issues(&err).into_iter().map(|(_, k, _)| k).collect();
    assert_eq!(
        kinds,
        vec![IssueKind::CyclicReference, IssueKind::UnknownReference]
    );
}

// ============================================================================
// PLACEMENT + SCHEDULING
// ============================================================================

#[test]
fn placement_calls_after_declaration_are_captured() {
    let mut tree = ConstructTree::new("App").unwrap();
    let task = tree.add_node(tree.root(), "Task", "Task").unwrap();
    let placement = PlacementAssembler::new();
    tree.set_property(task, "placementConstraints", placement.constraints())
        .unwrap();
    tree.set_property(task, "placementStrategies", placement.strategies())
        .unwrap();

    // configured after being wired into the tree
    placement.add_member_of_constraint("a").unwrap();
    placement.add_member_of_constraint("b").unwrap();

    let template = tree.synthesize().unwrap();
    assert_eq!(
        template.property("Task", "placementConstraints"),
        Some(&json!([
            {"type": "memberOf", "expression": "a"},
            {"type": "memberOf", "expression": "b"}
        ]))
    );
    assert!(template.property("Task", "placementStrategies").is_none());
}

#[test]
fn capacity_error_joins_the_aggregate_report() {
    let mut tree = ConstructTree::new("App").unwrap();
    let root = tree.root();
    let cluster = ClusterConstruct::new(&mut tree, root, "Cluster").unwrap();
    let web = ScheduledTask::new(&mut tree, root, "Web", cluster.path(), LaunchTarget::Fleet)
        .unwrap();
    web.placement()
        .add_spread_strategy(Vec::<String>::new())
        .unwrap()
        .add_bin_pack_strategy(BinPackResource::Memory)
        .unwrap();
    let api = tree.add_node(root, "Api", "Service").unwrap();
    tree.set_property(api, "listener", DeferredValue::reference("Lb", "listener"))
        .unwrap();

    let err = tree.synthesize().unwrap_err();
    let found = issues(&err);
    assert_eq!(found.len(), 2);
    assert_eq!(found[0].0, "Web");
    assert!(found[0].2.contains("no fleet capacity"));
    assert_eq!(found[1].0, "Api");
}
