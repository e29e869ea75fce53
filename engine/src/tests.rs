// Copyright 2025 Strobe project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use graph::TrackerError;
use guardrails::GuardrailConfig;
use maplit::btreemap;
use parking_lot::Mutex;

use crate::{
    Engine, EvalError, EvaluationMode, InputMap, InputValue, NodeId, NodeRef, NodeState, OpContext,
    Operator, OutputDecl, Propagate, Value, ValueType,
};

type RunLog = Arc<Mutex<Vec<NodeId>>>;

#[derive(Clone)]
enum Behavior {
    /// Returns the node's `v` input.
    ReadInput,
    /// Sums `v` inputs and the resolved values of `Ref` inputs.
    Sum,
    Fail(String),
    Sleep(Duration),
    /// Fails on the first run, succeeds afterwards.
    FlakyOnce(Arc<Mutex<bool>>),
}

struct TestOp {
    id: NodeId,
    inputs: InputMap,
    behavior: Behavior,
    runs: RunLog,
}

impl TestOp {
    fn constant(id: &str, value: f64, runs: &RunLog) -> Arc<dyn Operator> {
        Arc::new(TestOp {
            id: id.into(),
            inputs: btreemap! { "v".to_owned() => InputValue::Float(value) },
            behavior: Behavior::ReadInput,
            runs: runs.clone(),
        })
    }

    fn sum(id: &str, upstream: &[&str], runs: &RunLog) -> Arc<dyn Operator> {
        let inputs = upstream
            .iter()
            .map(|dep| {
                (
                    format!("in_{dep}"),
                    InputValue::Ref(NodeRef::new(*dep, "out")),
                )
            })
            .collect();
        Arc::new(TestOp {
            id: id.into(),
            inputs,
            behavior: Behavior::Sum,
            runs: runs.clone(),
        })
    }

    fn failing(id: &str, message: &str, runs: &RunLog) -> Arc<dyn Operator> {
        Arc::new(TestOp {
            id: id.into(),
            inputs: BTreeMap::new(),
            behavior: Behavior::Fail(message.to_owned()),
            runs: runs.clone(),
        })
    }

    fn sleeping(id: &str, duration: Duration, runs: &RunLog) -> Arc<dyn Operator> {
        Arc::new(TestOp {
            id: id.into(),
            inputs: BTreeMap::new(),
            behavior: Behavior::Sleep(duration),
            runs: runs.clone(),
        })
    }

    fn flaky(id: &str, runs: &RunLog) -> Arc<dyn Operator> {
        Arc::new(TestOp {
            id: id.into(),
            inputs: BTreeMap::new(),
            behavior: Behavior::FlakyOnce(Arc::new(Mutex::new(false))),
            runs: runs.clone(),
        })
    }
}

impl Operator for TestOp {
    fn id(&self) -> &NodeId {
        &self.id
    }

    fn inputs(&self) -> InputMap {
        self.inputs.clone()
    }

    fn outputs(&self) -> Vec<OutputDecl> {
        vec![OutputDecl::new("out", ValueType::Float)]
    }

    fn evaluate(&self, ctx: &OpContext) -> Result<Value, String> {
        self.runs.lock().push(self.id.clone());
        match &self.behavior {
            Behavior::ReadInput => ctx
                .input("v")
                .and_then(|v| match v {
                    InputValue::Float(f) => Some(Value::Float(*f)),
                    _ => None,
                })
                .ok_or_else(|| "missing `v` input".to_owned()),
            Behavior::Sum => {
                let mut total = 0.0;
                for (name, input) in ctx.inputs() {
                    match input {
                        InputValue::Float(f) => total += f,
                        InputValue::Ref(_) => {
                            total += ctx
                                .resolved_input(name)
                                .and_then(Value::as_float)
                                .ok_or_else(|| format!("no upstream value for `{name}`"))?;
                        }
                        _ => {}
                    }
                }
                Ok(Value::Float(total))
            }
            Behavior::Fail(message) => Err(message.clone()),
            Behavior::Sleep(duration) => {
                std::thread::sleep(*duration);
                Ok(Value::Float(0.0))
            }
            Behavior::FlakyOnce(failed) => {
                let mut failed = failed.lock();
                if *failed {
                    Ok(Value::Float(1.0))
                } else {
                    *failed = true;
                    Err("first run fails".to_owned())
                }
            }
        }
    }
}

fn runs_of(log: &RunLog) -> Vec<String> {
    log.lock().iter().map(|id| id.as_str().to_owned()).collect()
}

fn diamond(engine: &Engine, runs: &RunLog) {
    engine.add_node(TestOp::constant("root", 2.0, runs)).unwrap();
    engine.add_node(TestOp::sum("left", &["root"], runs)).unwrap();
    engine.add_node(TestOp::sum("right", &["root"], runs)).unwrap();
    engine
        .add_node(TestOp::sum("sink", &["left", "right"], runs))
        .unwrap();
}

#[tokio::test]
async fn empty_graph() {
    let engine = Engine::for_test();
    let result = engine.evaluate_all().await.unwrap();
    assert!(result.success);
    assert_eq!(0, result.evaluated_count);
    assert_eq!(0, result.failed_count);
}

#[tokio::test]
async fn linear_chain() {
    let engine = Engine::for_test();
    let runs: RunLog = RunLog::default();
    engine.add_node(TestOp::constant("a", 5.0, &runs)).unwrap();
    engine.add_node(TestOp::sum("b", &["a"], &runs)).unwrap();
    engine.add_node(TestOp::sum("c", &["b"], &runs)).unwrap();

    let result = engine.evaluate_all().await.unwrap();
    assert!(result.success);
    assert_eq!(3, result.evaluated_count);
    assert_eq!(
        vec![NodeId::from("a"), NodeId::from("b"), NodeId::from("c")],
        result.evaluation_order
    );
    assert_eq!(vec!["a", "b", "c"], runs_of(&runs));

    let value = engine.get_result(&"c".into()).await.unwrap();
    assert_eq!(Some(5.0), value.as_float());

    // Change a's inputs with propagation to dependents.
    let changed = engine
        .update_node_inputs(
            &"a".into(),
            btreemap! { "v".to_owned() => InputValue::Float(7.0) },
            Propagate::WithDependents,
        )
        .unwrap();
    assert!(changed);
    assert!(engine.tracker().is_dirty(&"c".into()).unwrap());

    let result = engine.evaluate_incremental(&["a".into()]).await.unwrap();
    assert!(result.success);
    assert_eq!(3, result.evaluated_count);
    assert_eq!(
        Some(7.0),
        engine.get_result(&"c".into()).await.unwrap().as_float()
    );

    // No change since: the same call evaluates nothing.
    let result = engine.evaluate_incremental(&["a".into()]).await.unwrap();
    assert!(result.success);
    assert_eq!(0, result.evaluated_count);
}

#[tokio::test]
async fn shared_subexpression_evaluates_once() {
    let engine = Engine::for_test();
    let runs: RunLog = RunLog::default();
    diamond(&engine, &runs);

    let value = engine.evaluate_node(&"sink".into()).await.unwrap();
    assert_eq!(Some(4.0), value.as_float());
    // root ran exactly once despite being reachable through both branches.
    assert_eq!(
        1,
        runs.lock().iter().filter(|id| id.as_str() == "root").count()
    );
    let runs_before = runs_of(&runs);

    // Immediately re-requesting the sink touches the cache, not the nodes.
    let value = engine.evaluate_node(&"sink".into()).await.unwrap();
    assert_eq!(Some(4.0), value.as_float());
    assert_eq!(runs_before, runs_of(&runs));
    assert!(engine.cache_stats().hits >= 1);
}

#[tokio::test]
async fn cycle_rejection_leaves_state_unchanged() {
    let engine = Engine::for_test();
    let runs: RunLog = RunLog::default();
    engine.add_node(TestOp::constant("x", 1.0, &runs)).unwrap();
    engine.add_node(TestOp::sum("y", &["x"], &runs)).unwrap();

    let deps_before = engine.tracker().direct_dependencies(&"x".into()).unwrap();
    let signature_before = engine.signature(&"x".into()).unwrap();

    let err = engine.add_dependency(&"x".into(), &"y".into()).unwrap_err();
    assert!(matches!(
        err,
        EvalError::Tracker(TrackerError::CircularDependency { .. })
    ));
    assert_eq!(
        deps_before,
        engine.tracker().direct_dependencies(&"x".into()).unwrap()
    );
    assert_eq!(signature_before, engine.signature(&"x".into()).unwrap());
}

#[tokio::test]
async fn guardrail_timeout_leaves_node_dirty() {
    let engine = Engine::for_test_with_config(GuardrailConfig {
        max_operation_duration: Duration::from_millis(50),
        strict_mode: false,
        ..GuardrailConfig::testing()
    });
    let runs: RunLog = RunLog::default();
    engine.add_node(TestOp::constant("fast", 1.0, &runs)).unwrap();
    engine
        .add_node(TestOp::sleeping("slow", Duration::from_millis(250), &runs))
        .unwrap();

    let result = engine.evaluate_all().await.unwrap();
    assert!(!result.success);
    assert_eq!(1, result.failed_count);
    assert_eq!(1, result.evaluated_count);
    assert!(result.errors[&NodeId::from("slow")].contains("cancelled"));

    // The timed-out node wrote no cache entry and is still dirty; the fast node completed.
    assert!(engine.tracker().is_dirty(&"slow".into()).unwrap());
    assert_eq!(
        NodeState::Evaluated,
        engine.evaluation_state(&"fast".into()).unwrap().state
    );

    // A second pass re-attempts the dirty node.
    let slow_attempts_before = runs.lock().iter().filter(|id| id.as_str() == "slow").count();
    let _ = engine.evaluate_all().await.unwrap();
    let slow_attempts_after = runs.lock().iter().filter(|id| id.as_str() == "slow").count();
    assert_eq!(slow_attempts_before + 1, slow_attempts_after);
}

#[tokio::test]
async fn strategy_selection() {
    let engine = Engine::for_test();
    let runs: RunLog = RunLog::default();
    for i in 0..10 {
        engine
            .add_node(TestOp::constant(&format!("n{i}"), i as f64, &runs))
            .unwrap();
    }
    engine.evaluate_all().await.unwrap();

    // One dirty node out of ten: incremental.
    engine
        .update_node_inputs(
            &"n3".into(),
            btreemap! { "v".to_owned() => InputValue::Float(30.0) },
            Propagate::NodeOnly,
        )
        .unwrap();
    let result = engine.execute_optimal_evaluation().await.unwrap();
    assert!(result.success);
    assert_eq!(EvaluationMode::Incremental, result.mode);
    assert_eq!(1, result.evaluated_count);

    // Eight dirty nodes out of ten: full evaluation.
    for i in 0..8 {
        engine
            .update_node_inputs(
                &format!("n{i}").into(),
                btreemap! { "v".to_owned() => InputValue::Float(100.0 + i as f64) },
                Propagate::NodeOnly,
            )
            .unwrap();
    }
    let result = engine.execute_optimal_evaluation().await.unwrap();
    assert!(result.success);
    assert_eq!(EvaluationMode::Full, result.mode);
    assert_eq!(8, result.evaluated_count);
    assert_eq!(2, result.cached_results_used);
}

#[tokio::test]
async fn crash_isolation() {
    let engine = Engine::for_test();
    let runs: RunLog = RunLog::default();
    engine.add_node(TestOp::constant("good", 1.0, &runs)).unwrap();
    engine.add_node(TestOp::failing("bad", "shader exploded", &runs)).unwrap();

    let result = engine.evaluate_all().await.unwrap();
    assert!(!result.success);
    assert_eq!(1, result.failed_count);
    assert!(result.errors[&NodeId::from("bad")].contains("shader exploded"));

    // The independent node completed with a cache entry.
    let good_state = engine.evaluation_state(&"good".into()).unwrap();
    assert_eq!(NodeState::Evaluated, good_state.state);
    let runs_before = runs_of(&runs);
    assert_eq!(
        Some(1.0),
        engine.get_result(&"good".into()).await.unwrap().as_float()
    );
    assert_eq!(runs_before, runs_of(&runs));

    assert_eq!(
        NodeState::Error,
        engine.evaluation_state(&"bad".into()).unwrap().state
    );
}

#[tokio::test]
async fn evaluation_is_idempotent() {
    let engine = Engine::for_test();
    let runs: RunLog = RunLog::default();
    diamond(&engine, &runs);

    let first = engine.evaluate_all().await.unwrap();
    assert_eq!(4, first.evaluated_count);

    let second = engine.evaluate_all().await.unwrap();
    assert!(second.success);
    assert_eq!(0, second.evaluated_count);
    assert_eq!(4, second.cached_results_used);
    assert_eq!(4, runs.lock().len());
}

#[tokio::test]
async fn unchanged_inputs_are_a_noop() {
    let engine = Engine::for_test();
    let runs: RunLog = RunLog::default();
    engine.add_node(TestOp::constant("a", 5.0, &runs)).unwrap();
    engine.evaluate_all().await.unwrap();

    let changed = engine
        .update_node_inputs(
            &"a".into(),
            btreemap! { "v".to_owned() => InputValue::Float(5.0) },
            Propagate::WithDependents,
        )
        .unwrap();
    assert!(!changed);
    assert_eq!(0, engine.tracker().dirty_node_count());
    // And the cached result still serves.
    let result = engine.evaluate_all().await.unwrap();
    assert_eq!(0, result.evaluated_count);
}

#[tokio::test]
async fn signature_reflects_dependency_changes() {
    let engine = Engine::for_test();
    let runs: RunLog = RunLog::default();
    engine.add_node(TestOp::constant("a", 1.0, &runs)).unwrap();
    engine.add_node(TestOp::constant("b", 2.0, &runs)).unwrap();
    engine.evaluate_all().await.unwrap();

    // Adding a dependency changes the signature and dirties the node, with inputs untouched.
    let signature_before = engine.signature(&"b".into()).unwrap();
    engine.add_dependency(&"b".into(), &"a".into()).unwrap();
    assert_ne!(signature_before, engine.signature(&"b".into()).unwrap());
    assert!(engine.tracker().is_dirty(&"b".into()).unwrap());

    engine.evaluate_all().await.unwrap();

    // Removing it changes the signature back but dirties nothing.
    engine.remove_dependency(&"b".into(), &"a".into()).unwrap();
    assert_eq!(signature_before, engine.signature(&"b".into()).unwrap());
    assert!(!engine.tracker().is_dirty(&"b".into()).unwrap());
}

#[tokio::test]
async fn rebind_input_swaps_edges() {
    let engine = Engine::for_test();
    let runs: RunLog = RunLog::default();
    engine.add_node(TestOp::constant("a", 10.0, &runs)).unwrap();
    engine.add_node(TestOp::constant("b", 20.0, &runs)).unwrap();
    engine.add_node(TestOp::sum("c", &["b"], &runs)).unwrap();
    engine.evaluate_all().await.unwrap();
    assert_eq!(
        Some(20.0),
        engine.get_result(&"c".into()).await.unwrap().as_float()
    );

    engine
        .rebind_input(&"c".into(), "in_b", NodeRef::new("a", "out"))
        .unwrap();
    let deps = engine.tracker().direct_dependencies(&"c".into()).unwrap();
    assert!(deps.contains(&NodeId::from("a")));
    assert!(!deps.contains(&NodeId::from("b")));
    assert!(engine.tracker().is_dirty(&"c".into()).unwrap());

    assert_eq!(
        Some(10.0),
        engine.get_result(&"c".into()).await.unwrap().as_float()
    );
}

#[tokio::test]
async fn error_nodes_recover_on_reevaluation() {
    let engine = Engine::for_test();
    let runs: RunLog = RunLog::default();
    engine.add_node(TestOp::flaky("glitch", &runs)).unwrap();

    let result = engine.evaluate_all().await.unwrap();
    assert!(!result.success);
    assert_eq!(
        NodeState::Error,
        engine.evaluation_state(&"glitch".into()).unwrap().state
    );

    // The Error state keeps the node dirty, so the next pass re-runs and recovers it.
    let result = engine.evaluate_all().await.unwrap();
    assert!(result.success);
    let state = engine.evaluation_state(&"glitch".into()).unwrap();
    assert_eq!(NodeState::Evaluated, state.state);
    assert_eq!(1, state.evaluation_count);
}

#[tokio::test]
async fn duplicate_and_unknown_nodes() {
    let engine = Engine::for_test();
    let runs: RunLog = RunLog::default();
    engine.add_node(TestOp::constant("a", 1.0, &runs)).unwrap();
    assert_eq!(
        Err(EvalError::DuplicateNode("a".into())),
        engine.add_node(TestOp::constant("a", 2.0, &runs))
    );
    assert_eq!(
        Err(EvalError::UnknownNode("ghost".into())),
        engine.remove_node(&"ghost".into())
    );
    assert!(matches!(
        engine.evaluate_node(&"ghost".into()).await,
        Err(EvalError::UnknownNode(_))
    ));
}

#[tokio::test]
async fn remove_node_restores_neighbors() {
    let engine = Engine::for_test();
    let runs: RunLog = RunLog::default();
    engine.add_node(TestOp::constant("a", 1.0, &runs)).unwrap();
    engine.add_node(TestOp::sum("b", &["a"], &runs)).unwrap();
    engine.evaluate_all().await.unwrap();

    engine.remove_node(&"b".into()).unwrap();
    assert!(engine.tracker().dependents(&"a".into()).unwrap().is_empty());
    assert_eq!(1, engine.node_count());
}

#[tokio::test]
async fn empty_sources_are_a_noop() {
    let engine = Engine::for_test();
    let runs: RunLog = RunLog::default();
    diamond(&engine, &runs);
    let result = engine.evaluate_incremental(&[]).await.unwrap();
    assert!(result.success);
    assert_eq!(0, result.evaluated_count);
    assert!(runs.lock().is_empty());
}

#[tokio::test]
async fn evaluation_state_bookkeeping() {
    let engine = Engine::for_test();
    let runs: RunLog = RunLog::default();
    engine.add_node(TestOp::constant("a", 1.0, &runs)).unwrap();

    let state = engine.evaluation_state(&"a".into()).unwrap();
    assert_eq!(NodeState::New, state.state);
    assert!(state.is_dirty);
    assert_eq!(0, state.evaluation_count);

    engine.evaluate_all().await.unwrap();
    let state = engine.evaluation_state(&"a".into()).unwrap();
    assert_eq!(NodeState::Evaluated, state.state);
    assert!(!state.is_dirty);
    assert!(state.last_evaluation_time.is_some());
    assert_eq!(1, state.evaluation_count);

    engine
        .update_node_inputs(
            &"a".into(),
            btreemap! { "v".to_owned() => InputValue::Float(2.0) },
            Propagate::NodeOnly,
        )
        .unwrap();
    engine.evaluate_all().await.unwrap();
    assert_eq!(2, engine.evaluation_state(&"a".into()).unwrap().evaluation_count);
}

#[tokio::test]
async fn clear_all_dirty_skips_evaluation() {
    let engine = Engine::for_test();
    let runs: RunLog = RunLog::default();
    diamond(&engine, &runs);

    assert_eq!(4, engine.clear_all_dirty());
    // Nothing is dirty, so optimal evaluation picks a full pass over clean nodes; they have no
    // cached values yet and re-run, which is the documented cost of the escape hatch.
    assert_eq!(0, engine.tracker().dirty_node_count());
}
