// Copyright 2025 Strobe project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! The incremental evaluation engine: owns the node set, their signatures and evaluation
//! states, the dependency tracker, and the result cache, and decides per request what actually
//! needs to be recomputed.

mod error;
mod node;
mod op_context;
mod result;
mod signature;
mod state;

pub use crate::error::EvalError;
pub use crate::node::{
    collect_node_refs, InputMap, InputValue, NodeId, NodeRef, Operator, OutputDecl, Value,
    ValueType,
};
pub use crate::op_context::OpContext;
pub use crate::result::{EvaluationMode, EvaluationResult};
pub use crate::signature::Signature;
pub use crate::state::{NodeEvaluationState, NodeState};

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use cache::{CacheStats, ResultCache};
use fnv::{FnvHashMap as HashMap, FnvHashSet as HashSet};
use graph::{DependencyTracker, DirtyLevel};
use guardrails::{EvaluationContext, GuardrailConfig};
use parking_lot::{Mutex, RwLock};
use perf_monitor::{Metric, ObservationMetric, PerformanceMonitor};
use task_executor::Executor;

use crate::signature::compute_signature;

///
/// Whether an input change dirties only the changed node or its transitive dependents as well.
/// The choice is always the caller's; the engine never propagates implicitly.
///
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Propagate {
    NodeOnly,
    WithDependents,
}

enum Outcome {
    Evaluated,
    CacheHit,
}

///
/// The evaluation engine.
///
/// All methods take `&self`: the engine is designed for a multi-threaded host, with graph
/// structure behind the tracker's reader/writer lock, per-node async mutexes serializing
/// evaluation of the same node, and the cache and monitor internally synchronized. Within one
/// `evaluate_*` call nodes run sequentially in topological order; concurrent top-level calls
/// claiming overlapping nodes serialize on the per-node locks.
///
pub struct Engine {
    nodes: RwLock<HashMap<NodeId, Arc<dyn Operator>>>,
    inputs: RwLock<HashMap<NodeId, InputMap>>,
    states: RwLock<HashMap<NodeId, NodeEvaluationState>>,
    signatures: RwLock<HashMap<NodeId, Signature>>,
    // The latest value computed per node, used to resolve dependents' `Ref` inputs. Unlike the
    // cache it is not bounded or expired: it always reflects the last completed evaluation.
    values: RwLock<HashMap<NodeId, Value>>,
    locks: Mutex<HashMap<NodeId, Arc<tokio::sync::Mutex<()>>>>,
    tracker: DependencyTracker<NodeId>,
    cache: ResultCache<NodeId, Value>,
    context: EvaluationContext,
    executor: Executor,
    abort_on_first_error: bool,
}

impl Engine {
    pub fn new(executor: Executor, context: EvaluationContext) -> Engine {
        Self::with_cache(
            executor,
            context,
            ResultCache::<NodeId, Value>::DEFAULT_CAPACITY,
            ResultCache::<NodeId, Value>::DEFAULT_IDLE_TTL,
        )
    }

    pub fn with_cache(
        executor: Executor,
        context: EvaluationContext,
        cache_capacity: usize,
        cache_idle_ttl: Duration,
    ) -> Engine {
        Engine {
            nodes: RwLock::default(),
            inputs: RwLock::default(),
            states: RwLock::default(),
            signatures: RwLock::default(),
            values: RwLock::default(),
            locks: Mutex::default(),
            tracker: DependencyTracker::new(),
            cache: ResultCache::with_capacity(cache_capacity, cache_idle_ttl),
            context,
            executor,
            abort_on_first_error: false,
        }
    }

    ///
    /// An engine over the ambient tokio runtime with the testing guardrail profile (strict mode
    /// off, so content warnings stay warnings in fixtures).
    ///
    pub fn for_test() -> Engine {
        Self::for_test_with_config(GuardrailConfig {
            strict_mode: false,
            ..GuardrailConfig::testing()
        })
    }

    pub fn for_test_with_config(config: GuardrailConfig) -> Engine {
        Engine::new(
            Executor::new(),
            EvaluationContext::for_test_with_config(config),
        )
    }

    /// Abort a batch at the first per-node failure instead of continuing independent nodes.
    pub fn set_abort_on_first_error(&mut self, abort: bool) {
        self.abort_on_first_error = abort;
    }

    pub fn tracker(&self) -> &DependencyTracker<NodeId> {
        &self.tracker
    }

    pub fn monitor(&self) -> &PerformanceMonitor {
        self.context.monitor()
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.read().len()
    }

    pub fn evaluation_state(&self, id: &NodeId) -> Option<NodeEvaluationState> {
        self.states.read().get(id).copied()
    }

    pub fn signature(&self, id: &NodeId) -> Option<Signature> {
        self.signatures.read().get(id).copied()
    }

    ///
    /// Registers a node and discovers its dependencies by scanning the input map for `Ref`s.
    /// Referenced nodes need not have been added yet; their edges are registered on demand.
    ///
    pub fn add_node(&self, node: Arc<dyn Operator>) -> Result<(), EvalError> {
        let id = node.id().clone();
        if self.nodes.read().contains_key(&id) {
            return Err(EvalError::DuplicateNode(id));
        }

        let inputs = node.inputs();
        let ref_targets: Vec<NodeId> = collect_node_refs(&inputs)
            .into_iter()
            .map(|r| r.id.clone())
            .collect();

        let newly_registered = self.tracker.register_node(id.clone());
        if let Err(err) = self.tracker.add_dependencies_batch(&id, &ref_targets) {
            // The batch rolled its edges back; undo the registration too if it was ours.
            if newly_registered {
                let _ = self.tracker.unregister_node(&id);
            }
            return Err(err.into());
        }

        let signature = self.signature_for(&id, &inputs)?;
        self.nodes.write().insert(id.clone(), node);
        self.inputs.write().insert(id.clone(), inputs);
        self.states.write().insert(id.clone(), NodeEvaluationState::new());
        self.signatures.write().insert(id.clone(), signature);
        self.locks
            .lock()
            .insert(id.clone(), Arc::new(tokio::sync::Mutex::new(())));
        log::debug!("Added node {id} ({} dependencies)", ref_targets.len());
        Ok(())
    }

    ///
    /// Removes a node: all incident edges, its evaluation state, its per-node lock, and its
    /// cache entries.
    ///
    pub fn remove_node(&self, id: &NodeId) -> Result<(), EvalError> {
        if self.nodes.write().remove(id).is_none() {
            return Err(EvalError::UnknownNode(id.clone()));
        }
        self.tracker.unregister_node(id)?;
        self.inputs.write().remove(id);
        self.states.write().remove(id);
        self.signatures.write().remove(id);
        self.values.write().remove(id);
        self.locks.lock().remove(id);
        self.cache.invalidate(id);
        log::debug!("Removed node {id}");
        Ok(())
    }

    ///
    /// Replaces a node's inputs. When the resulting signature is unchanged this is a no-op;
    /// otherwise the node is dirtied (and, if requested, its transitive dependents with it) and
    /// its cache entries are dropped.
    ///
    /// Dependency edges are not rewired here: callers changing `Ref` inputs use
    /// `add_dependency`/`remove_dependency` or `rebind_input`.
    ///
    /// Returns whether the signature changed.
    ///
    pub fn update_node_inputs(
        &self,
        id: &NodeId,
        new_inputs: InputMap,
        propagate: Propagate,
    ) -> Result<bool, EvalError> {
        if !self.nodes.read().contains_key(id) {
            return Err(EvalError::UnknownNode(id.clone()));
        }
        let new_signature = self.signature_for(id, &new_inputs)?;
        let old_signature = self
            .signatures
            .read()
            .get(id)
            .copied()
            .ok_or_else(|| EvalError::UnknownNode(id.clone()))?;
        if new_signature == old_signature {
            return Ok(false);
        }

        self.inputs.write().insert(id.clone(), new_inputs);
        self.signatures.write().insert(id.clone(), new_signature);
        self.cache.invalidate(id);
        match propagate {
            Propagate::NodeOnly => {
                self.tracker.mark_dirty(id, DirtyLevel::Normal)?;
                self.mark_states_dirty(std::iter::once(id.clone()));
            }
            Propagate::WithDependents => {
                self.tracker.mark_dirty_with_dependents(id)?;
                let mut affected = vec![id.clone()];
                affected.extend(self.tracker.transitive_dependents(id)?);
                self.mark_states_dirty(affected);
            }
        }
        Ok(true)
    }

    ///
    /// Adds the dependency edge `from -> to` and refreshes `from`'s signature. The signature
    /// change dirties `from` even though its input values are untouched.
    ///
    pub fn add_dependency(&self, from: &NodeId, to: &NodeId) -> Result<(), EvalError> {
        if !self.nodes.read().contains_key(from) {
            return Err(EvalError::UnknownNode(from.clone()));
        }
        self.tracker.add_dependency(from, to)?;
        self.refresh_signature(from)?;
        self.tracker.mark_dirty(from, DirtyLevel::Normal)?;
        self.mark_states_dirty(std::iter::once(from.clone()));
        self.cache.invalidate(from);
        Ok(())
    }

    ///
    /// Removes the dependency edge `from -> to` and refreshes `from`'s signature. Neither
    /// endpoint is dirtied implicitly; callers mark dirty if they want re-evaluation.
    ///
    pub fn remove_dependency(&self, from: &NodeId, to: &NodeId) -> Result<(), EvalError> {
        if !self.nodes.read().contains_key(from) {
            return Err(EvalError::UnknownNode(from.clone()));
        }
        self.tracker.remove_dependency(from, to)?;
        self.refresh_signature(from)?;
        Ok(())
    }

    ///
    /// Atomically repoints a `Ref` input at a different upstream node: updates the input map,
    /// drops the old edge if no other input still references its target, adds the new edge, and
    /// dirties the node.
    ///
    pub fn rebind_input(
        &self,
        id: &NodeId,
        input: &str,
        new_ref: NodeRef,
    ) -> Result<(), EvalError> {
        let mut inputs = self
            .inputs
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| EvalError::UnknownNode(id.clone()))?;
        let old_target = match inputs.get(input) {
            Some(InputValue::Ref(old)) => Some(old.id.clone()),
            _ => None,
        };

        self.tracker.add_dependency(id, &new_ref.id)?;
        let new_target = new_ref.id.clone();
        inputs.insert(input.to_owned(), InputValue::Ref(new_ref));

        if let Some(old_target) = old_target {
            let still_referenced = collect_node_refs(&inputs)
                .into_iter()
                .any(|r| r.id == old_target);
            if !still_referenced && old_target != new_target {
                self.tracker.remove_dependency(id, &old_target)?;
            }
        }

        let signature = self.signature_for(id, &inputs)?;
        self.inputs.write().insert(id.clone(), inputs);
        self.signatures.write().insert(id.clone(), signature);
        self.tracker.mark_dirty(id, DirtyLevel::Normal)?;
        self.mark_states_dirty(std::iter::once(id.clone()));
        self.cache.invalidate(id);
        Ok(())
    }

    ///
    /// Evaluates the whole graph in topological order. Nodes that are clean with a live cache
    /// entry are served from the cache; everything else runs.
    ///
    pub async fn evaluate_all(&self) -> Result<EvaluationResult, EvalError> {
        let run = self.context.for_run();
        run.arm_evaluation_deadline(&self.executor);
        let order = self.tracker.topological_order()?;
        self.monitor().increment_counter(Metric::FullEvaluations, 1);
        Ok(self
            .evaluate_in_order(&run, order, EvaluationMode::Full)
            .await)
    }

    ///
    /// Incremental evaluation: takes the dirty subset of `sources`, closes it over transitive
    /// dependents (the affected set), marks the closure dirty, and evaluates it in topological
    /// order together with its clean dependencies (which are served from the cache).
    ///
    /// Empty `sources` - and sources that are all clean - are a success no-op.
    ///
    pub async fn evaluate_incremental(
        &self,
        sources: &[NodeId],
    ) -> Result<EvaluationResult, EvalError> {
        let mut affected: HashSet<NodeId> = HashSet::default();
        for source in sources {
            if self.tracker.is_dirty(source)? {
                affected.insert(source.clone());
                affected.extend(self.tracker.transitive_dependents(source)?);
            }
        }
        if affected.is_empty() {
            return Ok(EvaluationResult::new(EvaluationMode::Incremental));
        }

        let mut affected: Vec<NodeId> = affected.into_iter().collect();
        affected.sort();
        self.tracker.mark_dirty_batch(&affected, DirtyLevel::Normal)?;
        self.mark_states_dirty(affected.iter().cloned());

        let order = self.tracker.topological_order_for(&affected, true)?;
        self.monitor()
            .increment_counter(Metric::IncrementalEvaluations, 1);
        let run = self.context.for_run();
        run.arm_evaluation_deadline(&self.executor);
        Ok(self
            .evaluate_in_order(&run, order, EvaluationMode::Incremental)
            .await)
    }

    ///
    /// Evaluates `id` and everything it transitively depends on, returning its value.
    ///
    pub async fn evaluate_node(&self, id: &NodeId) -> Result<Value, EvalError> {
        if !self.nodes.read().contains_key(id) {
            return Err(EvalError::UnknownNode(id.clone()));
        }
        let order = self.tracker.topological_order_for(&[id.clone()], true)?;
        let run = self.context.for_run();
        run.arm_evaluation_deadline(&self.executor);
        let result = self
            .evaluate_in_order(&run, order, EvaluationMode::SingleNode)
            .await;

        if let Some(message) = result.errors.get(id) {
            return Err(EvalError::NodeEvaluationFailed {
                node: id.clone(),
                message: message.clone(),
            });
        }
        if let Some((node, message)) = result.errors.iter().next() {
            return Err(EvalError::NodeEvaluationFailed {
                node: node.clone(),
                message: message.clone(),
            });
        }
        self.values
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| EvalError::UnknownNode(id.clone()))
    }

    ///
    /// Returns the cached value when the node is clean and its entry matches the current
    /// signature; re-evaluates otherwise.
    ///
    pub async fn get_result(&self, id: &NodeId) -> Result<Value, EvalError> {
        let signature = self
            .signatures
            .read()
            .get(id)
            .copied()
            .ok_or_else(|| EvalError::UnknownNode(id.clone()))?;
        let clean = {
            let states = self.states.read();
            states
                .get(id)
                .map(|s| s.state == NodeState::Evaluated && !s.is_dirty)
                .unwrap_or(false)
        };
        if clean {
            if let Some(value) = self.cache.get(id, signature.as_u64()) {
                self.monitor().record_cache_hit();
                return Ok(value);
            }
            self.monitor().record_cache_miss();
        }
        self.evaluate_node(id).await
    }

    ///
    /// Strategy selection: full evaluation when nothing is dirty (every node then resolves from
    /// the cache) or when more than half the graph is dirty (recomputing the order restriction
    /// stops paying for itself there); incremental otherwise.
    ///
    pub async fn execute_optimal_evaluation(&self) -> Result<EvaluationResult, EvalError> {
        let dirty = self.tracker.dirty_node_count();
        let total = self.node_count();
        if dirty == 0 || dirty * 2 > total {
            self.evaluate_all().await
        } else {
            let sources = self.tracker.dirty_nodes();
            self.evaluate_incremental(&sources).await
        }
    }

    ///
    /// Clears every dirty flag without evaluating, and returns the guardrail context to normal
    /// admission. The escape hatch for hosts that know the world is consistent.
    ///
    pub fn clear_all_dirty(&self) -> usize {
        let cleared = self.tracker.clear_all_dirty();
        let mut states = self.states.write();
        for state in states.values_mut() {
            state.mark_clean();
        }
        self.context.reset();
        cleared
    }

    fn mark_states_dirty(&self, ids: impl IntoIterator<Item = NodeId>) {
        let mut states = self.states.write();
        for id in ids {
            if let Some(state) = states.get_mut(&id) {
                state.mark_dirty();
            }
        }
    }

    fn signature_for(&self, id: &NodeId, inputs: &InputMap) -> Result<Signature, EvalError> {
        let dependencies: BTreeSet<NodeId> = self
            .tracker
            .direct_dependencies(id)?
            .into_iter()
            .collect();
        Ok(compute_signature(inputs, &dependencies))
    }

    fn refresh_signature(&self, id: &NodeId) -> Result<(), EvalError> {
        let inputs = self
            .inputs
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| EvalError::UnknownNode(id.clone()))?;
        let signature = self.signature_for(id, &inputs)?;
        self.signatures.write().insert(id.clone(), signature);
        Ok(())
    }

    async fn evaluate_in_order(
        &self,
        run: &EvaluationContext,
        order: Vec<NodeId>,
        mode: EvaluationMode,
    ) -> EvaluationResult {
        let started = Instant::now();
        let mut result = EvaluationResult::new(mode);
        for id in order {
            match self.evaluate_single(run, &id).await {
                Ok(Outcome::Evaluated) => {
                    result.evaluated_count += 1;
                    result.evaluation_order.push(id);
                }
                Ok(Outcome::CacheHit) => {
                    result.cached_results_used += 1;
                }
                Err(err) => {
                    result.failed_count += 1;
                    result.success = false;
                    result.errors.insert(id.clone(), err.to_string());
                    if self.abort_on_first_error {
                        break;
                    }
                    // A tripped token means the evaluation deadline passed or the host asked us
                    // to stop: every remaining node would fail the same way.
                    if run.token().is_cancelled() {
                        break;
                    }
                }
            }
        }
        result.total_evaluation_time = started.elapsed();
        run.monitor().record_observation(
            ObservationMetric::EvaluationBatchTimeMicros,
            result.total_evaluation_time.as_micros() as u64,
        );
        result
    }

    ///
    /// Evaluates one node under its per-node lock:
    ///
    /// 1. acquire the lock (serializing with any other evaluator of this node);
    /// 2. if the node is clean, try the cache at the current signature;
    /// 3. validate that every direct dependency is in `Evaluated` state;
    /// 4. run `evaluate` on the blocking pool under guardrails;
    /// 5. insert the cache entry, then transition to `Evaluated` (in that order, so readers
    ///    that observe `Evaluated` find the entry).
    ///
    /// Deadline or cancellation leaves the node dirty with no cache write; a node failure
    /// transitions it to `Error`.
    ///
    async fn evaluate_single(
        &self,
        run: &EvaluationContext,
        id: &NodeId,
    ) -> Result<Outcome, EvalError> {
        let lock = self
            .locks
            .lock()
            .get(id)
            .cloned()
            .ok_or_else(|| EvalError::UnknownNode(id.clone()))?;
        let _guard = lock.lock().await;

        let signature = self
            .signatures
            .read()
            .get(id)
            .copied()
            .ok_or_else(|| EvalError::UnknownNode(id.clone()))?;

        // Re-check under the node lock: another evaluator may have finished this node while we
        // waited.
        let clean = {
            let states = self.states.read();
            states
                .get(id)
                .map(|s| s.state == NodeState::Evaluated && !s.is_dirty)
                .unwrap_or(false)
        };
        if clean {
            if self.cache.get(id, signature.as_u64()).is_some() {
                run.monitor().record_cache_hit();
                return Ok(Outcome::CacheHit);
            }
            // The entry expired out of the cache; fall through and recompute.
            run.monitor().record_cache_miss();
        }

        let dependencies = self.tracker.direct_dependencies(id)?;
        {
            let states = self.states.read();
            for dependency in &dependencies {
                let ready = states
                    .get(dependency)
                    .map(|s| s.state == NodeState::Evaluated)
                    .unwrap_or(false);
                if !ready {
                    return Err(EvalError::DependencyNotReady {
                        node: id.clone(),
                        dependency: dependency.clone(),
                    });
                }
            }
        }

        let inputs = self
            .inputs
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| EvalError::UnknownNode(id.clone()))?;

        if run.config().enable_precondition_validation {
            let rendered: Vec<(String, String)> = inputs
                .iter()
                .map(|(name, value)| (name.clone(), format!("{value:?}")))
                .collect();
            let report = run
                .validate_preconditions(rendered.iter().map(|(n, v)| (n.as_str(), v.as_str())))?;
            if !report.passed {
                log::warn!(
                    "Preconditions failed for {id}: {}",
                    report.failures.join("; ")
                );
            }
        }

        let mut resolved: HashMap<String, Value> = HashMap::default();
        {
            let values = self.values.read();
            for (name, value) in &inputs {
                if let InputValue::Ref(node_ref) = value {
                    if let Some(upstream) = values.get(&node_ref.id) {
                        resolved.insert(name.clone(), upstream.clone());
                    }
                }
            }
        }

        let node = self
            .nodes
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| EvalError::UnknownNode(id.clone()))?;
        let op_ctx = OpContext::new(id.clone(), inputs, resolved, run.clone());

        let eval = self.executor.spawn_blocking(
            move || node.evaluate(&op_ctx),
            |join_error| Err(format!("evaluation task panicked: {join_error}")),
        );
        let eval_started = Instant::now();
        let guarded = run
            .execute_with_guardrails_async(id.as_str(), async move { Ok(eval.await) })
            .await;
        let duration = eval_started.elapsed();

        match guarded {
            Err(guardrail_error) => {
                // No cache write and no state transition: the node stays dirty and the next
                // evaluation re-attempts it.
                run.monitor()
                    .record_node_evaluation(id.as_str(), duration, false);
                Err(guardrail_error.into())
            }
            Ok(Err(message)) => {
                if let Some(state) = self.states.write().get_mut(id) {
                    state.mark_error();
                }
                run.monitor()
                    .record_node_evaluation(id.as_str(), duration, false);
                Err(EvalError::NodeEvaluationFailed {
                    node: id.clone(),
                    message,
                })
            }
            Ok(Ok(value)) => {
                self.cache.put(id.clone(), signature.as_u64(), value.clone());
                self.values.write().insert(id.clone(), value);
                if let Some(state) = self.states.write().get_mut(id) {
                    state.mark_evaluated();
                }
                self.tracker.clear_dirty(id)?;
                run.monitor()
                    .record_node_evaluation(id.as_str(), duration, true);
                Ok(Outcome::Evaluated)
            }
        }
    }
}

#[cfg(test)]
mod tests;
