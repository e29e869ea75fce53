// Copyright 2025 Strobe project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::collections::HashSet;
use std::time::Duration;

use crate::{DependencyTracker, DirtyLevel, TrackerError};

fn tracker_with_chain() -> DependencyTracker<&'static str> {
    // c -> b -> a
    let tracker = DependencyTracker::new();
    tracker.register_node("a");
    tracker.register_node("b");
    tracker.register_node("c");
    tracker.add_dependency(&"b", &"a").unwrap();
    tracker.add_dependency(&"c", &"b").unwrap();
    tracker
}

fn diamond() -> DependencyTracker<&'static str> {
    // sink depends on left and right, which both depend on root.
    let tracker = DependencyTracker::new();
    tracker.add_dependency(&"left", &"root").unwrap();
    tracker.add_dependency(&"right", &"root").unwrap();
    tracker.add_dependency(&"sink", &"left").unwrap();
    tracker.add_dependency(&"sink", &"right").unwrap();
    tracker
}

fn set(items: &[&'static str]) -> HashSet<&'static str> {
    items.iter().copied().collect()
}

#[test]
fn register_is_idempotent() {
    let tracker = DependencyTracker::new();
    assert!(tracker.register_node("a"));
    assert!(!tracker.register_node("a"));
    assert_eq!(1, tracker.len());
    // New nodes start dirty.
    assert!(tracker.is_dirty(&"a").unwrap());
}

#[test]
fn edge_symmetry() {
    let tracker = tracker_with_chain();
    for (from, to) in [("b", "a"), ("c", "b")] {
        assert!(tracker.direct_dependencies(&from).unwrap().contains(to));
        assert!(tracker.dependents(&to).unwrap().contains(from));
    }
}

#[test]
fn unregister_removes_incident_edges() {
    let tracker = tracker_with_chain();
    tracker.unregister_node(&"b").unwrap();
    assert!(!tracker.contains(&"b"));
    assert!(tracker.dependents(&"a").unwrap().is_empty());
    assert!(tracker.direct_dependencies(&"c").unwrap().is_empty());
    assert_eq!(Err(TrackerError::UnknownNode("b")), tracker.is_dirty(&"b"));
}

#[test]
fn add_and_remove_round_trip() {
    let tracker = tracker_with_chain();
    tracker.register_node("d");
    tracker.add_dependency(&"d", &"a").unwrap();
    tracker.unregister_node(&"d").unwrap();
    // Neighbors are restored to their previous edge sets.
    assert_eq!(set(&["b"]), tracker.dependents(&"a").unwrap().into_iter().collect());
}

#[test]
fn self_dependency_is_rejected() {
    let tracker = DependencyTracker::new();
    tracker.register_node("a");
    assert_eq!(
        Err(TrackerError::SelfDependency("a")),
        tracker.add_dependency(&"a", &"a")
    );
}

#[test]
fn cycle_is_rejected_with_evidence() {
    let tracker = DependencyTracker::new();
    tracker.add_dependency(&"y", &"x").unwrap();

    let before_deps = tracker.direct_dependencies(&"x").unwrap();
    let err = tracker.add_dependency(&"x", &"y").unwrap_err();
    match err {
        TrackerError::CircularDependency { cycle } => {
            assert_eq!(vec!["x", "y", "x"], cycle);
        }
        other => panic!("expected CircularDependency, got {other:?}"),
    }
    // Tracker state is unchanged by the failed call.
    assert_eq!(before_deps, tracker.direct_dependencies(&"x").unwrap());
    assert!(tracker.find_cycles().is_empty());
    tracker.validate_integrity().unwrap();
}

#[test]
fn longer_cycle_is_rejected() {
    let tracker = tracker_with_chain();
    // a -> c would close c -> b -> a.
    let err = tracker.add_dependency(&"a", &"c").unwrap_err();
    match err {
        TrackerError::CircularDependency { cycle } => {
            assert_eq!(vec!["a", "c", "b", "a"], cycle);
        }
        other => panic!("expected CircularDependency, got {other:?}"),
    }
}

#[test]
fn add_dependency_is_idempotent() {
    let tracker = DependencyTracker::new();
    tracker.add_dependency(&"b", &"a").unwrap();
    tracker.add_dependency(&"b", &"a").unwrap();
    assert_eq!(1, tracker.direct_dependencies(&"b").unwrap().len());
}

#[test]
fn batch_add_rolls_back_on_failure() {
    let tracker = DependencyTracker::new();
    tracker.add_dependency(&"b", &"a").unwrap();

    // "a" -> "b" closes a cycle, so the whole batch must be rejected.
    let err = tracker.add_dependencies_batch(&"a", &["c", "d", "b"]);
    assert!(matches!(
        err,
        Err(TrackerError::CircularDependency { .. })
    ));
    assert!(tracker.direct_dependencies(&"a").unwrap().is_empty());

    // A clean batch lands atomically.
    assert_eq!(2, tracker.add_dependencies_batch(&"b", &["c", "d"]).unwrap());
    assert_eq!(set(&["a", "c", "d"]), tracker.direct_dependencies(&"b").unwrap().into_iter().collect());
}

#[test]
fn remove_dependency_of_absent_edge_is_a_noop() {
    let tracker = tracker_with_chain();
    tracker.remove_dependency(&"c", &"a").unwrap();
    tracker.remove_dependency(&"c", &"b").unwrap();
    assert!(tracker.direct_dependencies(&"c").unwrap().is_empty());
}

#[test]
fn transitive_queries() {
    let tracker = diamond();
    assert_eq!(
        set(&["left", "right", "root"]),
        tracker.transitive_dependencies(&"sink").unwrap().into_iter().collect()
    );
    assert_eq!(
        set(&["left", "right", "sink"]),
        tracker.transitive_dependents(&"root").unwrap().into_iter().collect()
    );
    assert!(tracker.transitive_dependents(&"sink").unwrap().is_empty());
}

#[test]
fn leaves_sources_and_depth() {
    let tracker = diamond();
    assert_eq!(vec!["root"], tracker.leaf_nodes());
    assert_eq!(vec!["sink"], tracker.source_nodes());
    assert_eq!(0, tracker.dependency_depth(&"root").unwrap());
    assert_eq!(1, tracker.dependency_depth(&"left").unwrap());
    assert_eq!(2, tracker.dependency_depth(&"sink").unwrap());
}

#[test]
fn topological_order_is_deterministic() {
    let tracker = diamond();
    let order = tracker.topological_order().unwrap();
    assert_eq!(vec!["root", "left", "right", "sink"], order);
    // Repeated calls serve the same order (now from the cache).
    assert_eq!(order, tracker.topological_order().unwrap());
    assert_eq!(1, tracker.cached_order_count());
}

#[test]
fn topological_order_for_subset() {
    let tracker = diamond();

    // With clean dependencies included, the order covers the transitive closure.
    let order = tracker
        .topological_order_for(&["sink"], true)
        .unwrap();
    assert_eq!(vec!["root", "left", "right", "sink"], order);

    // Without, only edges between subset members count.
    let order = tracker
        .topological_order_for(&["sink", "left"], false)
        .unwrap();
    assert_eq!(vec!["left", "sink"], order);
}

#[test]
fn order_cache_invalidated_by_mutation() {
    let tracker = diamond();
    tracker.topological_order().unwrap();
    assert_eq!(1, tracker.cached_order_count());

    tracker.register_node("floater");
    assert_eq!(0, tracker.cached_order_count());

    let order = tracker.topological_order().unwrap();
    assert!(order.contains(&"floater"));

    tracker.remove_dependency(&"sink", &"left").unwrap();
    assert_eq!(0, tracker.cached_order_count());
}

#[test]
fn order_cache_entries_expire() {
    let tracker = DependencyTracker::new_with_order_cache_ttl(Duration::from_millis(10));
    tracker.add_dependency(&"b", &"a").unwrap();
    tracker.topological_order().unwrap();
    assert_eq!(1, tracker.cached_order_count());

    std::thread::sleep(Duration::from_millis(25));
    // The expired entry is dropped on access and the order recomputed.
    assert_eq!(vec!["a", "b"], tracker.topological_order().unwrap());
}

#[test]
fn dirty_marking_and_clearing() {
    let tracker = tracker_with_chain();
    assert_eq!(3, tracker.clear_all_dirty());
    assert_eq!(0, tracker.dirty_node_count());

    assert!(tracker.mark_dirty(&"a", DirtyLevel::High).unwrap());
    assert!(!tracker.mark_dirty(&"a", DirtyLevel::Normal).unwrap());
    // Re-marking at a lower level does not downgrade.
    assert_eq!(vec!["a"], tracker.dirty_nodes_by_level(DirtyLevel::High));

    tracker.clear_dirty(&"a").unwrap();
    assert!(!tracker.is_dirty(&"a").unwrap());
    assert!(tracker.dirty_state(&"a").unwrap().last_evaluated.is_some());
}

#[test]
fn mark_dirty_with_dependents_covers_the_affected_set() {
    let tracker = diamond();
    tracker.clear_all_dirty();

    let result = tracker.mark_dirty_with_dependents(&"root").unwrap();
    assert_eq!(4, result.newly_dirtied);
    assert_eq!(vec!["left", "right", "root", "sink"], tracker.dirty_nodes());

    // Marking a node with no dependents affects only itself.
    tracker.clear_all_dirty();
    let result = tracker.mark_dirty_with_dependents(&"sink").unwrap();
    assert_eq!(1, result.newly_dirtied);
}

#[test]
fn mark_dirty_batch_counts_newly_dirtied() {
    let tracker = tracker_with_chain();
    tracker.clear_all_dirty();
    tracker.mark_dirty(&"a", DirtyLevel::Normal).unwrap();

    let result = tracker
        .mark_dirty_batch(&["a", "b", "c"], DirtyLevel::Normal)
        .unwrap();
    assert_eq!(2, result.newly_dirtied);

    assert_eq!(
        Err(TrackerError::UnknownNode("zzz")),
        tracker.mark_dirty_batch(&["zzz"], DirtyLevel::Normal).map(|_| ())
    );
}

#[test]
fn unknown_node_is_surfaced() {
    let tracker = DependencyTracker::<&'static str>::new();
    assert_eq!(
        Err(TrackerError::UnknownNode("ghost")),
        tracker.direct_dependencies(&"ghost").map(|_| ())
    );
    assert_eq!(
        Err(TrackerError::UnknownNode("ghost")),
        tracker.unregister_node(&"ghost")
    );
}

#[test]
fn validate_integrity_on_healthy_graph() {
    let tracker = diamond();
    tracker.validate_integrity().unwrap();
}

#[test]
fn error_messages_name_the_cycle() {
    let tracker = DependencyTracker::new();
    tracker.add_dependency(&"y", &"x").unwrap();
    let err = tracker.add_dependency(&"x", &"y").unwrap_err();
    assert_eq!("dependency cycle detected: x -> y -> x", err.to_string());
}
