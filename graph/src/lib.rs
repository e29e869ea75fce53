// Copyright 2025 Strobe project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! The dependency tracker of the evaluation engine: a DAG (enforced on mutation) of opaque node
//! keys, with per-node dirty state, deterministic topological ordering, and cycle diagnostics.

mod dirty;

pub use crate::dirty::{DirtyLevel, DirtyState};

use std::collections::{BTreeSet, VecDeque};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::time::{Duration, Instant};

use fixedbitset::FixedBitSet;
use fnv::{FnvHashMap as HashMap, FnvHashSet as HashSet, FnvHasher};
use parking_lot::{Mutex, RwLock};
use petgraph::stable_graph::{NodeIndex, StableDiGraph};
use petgraph::visit::{VisitMap, Visitable};
use petgraph::Direction;

///
/// The key type tracked by a `DependencyTracker`: an opaque, hashable, totally-orderable
/// identity. The `Ord` bound is what makes orderings and error evidence deterministic.
///
pub trait GraphKey:
    Clone + Eq + Ord + Hash + fmt::Debug + fmt::Display + Send + Sync + 'static
{
}

impl<T: Clone + Eq + Ord + Hash + fmt::Debug + fmt::Display + Send + Sync + 'static> GraphKey
    for T
{
}

fn format_cycle<K: fmt::Display>(cycle: &[K]) -> String {
    cycle
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" -> ")
}

#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum TrackerError<K: GraphKey> {
    #[error("node may not depend on itself: {0}")]
    SelfDependency(K),
    /// Carries the offending path (or, for an ordering pass, the residual nodes) as evidence.
    #[error("dependency cycle detected: {}", format_cycle(.cycle))]
    CircularDependency { cycle: Vec<K> },
    #[error("unknown node: {0}")]
    UnknownNode(K),
}

// 2^32 tracked nodes ought to be more than enough for anyone!
type TrackerIndex = NodeIndex<u32>;

type PGraph<K> = StableDiGraph<K, (), u32>;

///
/// The scope of a cached topological order: the whole graph, or a fingerprinted subset.
///
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
enum OrderScope {
    All,
    Subset(u64),
}

type OrderCacheKey = (OrderScope, bool);

struct OrderCacheEntry<K> {
    order: Vec<K>,
    last_access: Instant,
}

struct InnerTracker<K: GraphKey> {
    // An edge `from -> to` means "from depends on to": outgoing neighbors are dependencies,
    // incoming neighbors are dependents. Stable indices because nodes are removable.
    pg: PGraph<K>,
    ids: HashMap<K, TrackerIndex>,
    dirty: HashMap<K, DirtyState>,
}

impl<K: GraphKey> InnerTracker<K> {
    fn index_of(&self, key: &K) -> Result<TrackerIndex, TrackerError<K>> {
        self.ids
            .get(key)
            .copied()
            .ok_or_else(|| TrackerError::UnknownNode(key.clone()))
    }

    /// Gets or creates the entry for the given key. Returns (index, newly_created).
    fn ensure_node(&mut self, key: K) -> (TrackerIndex, bool) {
        if let Some(&ix) = self.ids.get(&key) {
            return (ix, false);
        }
        let ix = self.pg.add_node(key.clone());
        self.ids.insert(key.clone(), ix);
        self.dirty.insert(key, DirtyState::new());
        (ix, true)
    }

    ///
    /// Begins a Walk from the given roots.
    ///
    /// The Walk will iterate over all nodes that descend from the roots in the direction of
    /// traversal (including the roots themselves) but won't necessarily be in topological order.
    ///
    fn walk(&self, roots: VecDeque<TrackerIndex>, direction: Direction) -> Walk<'_, K> {
        Walk {
            graph: self,
            direction,
            deque: roots,
            walked: self.pg.visit_map(),
        }
    }

    ///
    /// Finds a path `start -> ... -> target` along dependency edges, if one exists. Used as the
    /// preventive reachability check in `add_dependency`, where the path becomes cycle evidence.
    ///
    fn path_between(&self, start: TrackerIndex, target: TrackerIndex) -> Option<Vec<K>> {
        let mut parents: HashMap<TrackerIndex, TrackerIndex> = HashMap::default();
        let mut walked = self.pg.visit_map();
        let mut deque = VecDeque::from([start]);

        while let Some(ix) = deque.pop_front() {
            if !walked.visit(ix) {
                continue;
            }
            if ix == target {
                let mut path = vec![self.pg[ix].clone()];
                let mut cursor = ix;
                while let Some(&parent) = parents.get(&cursor) {
                    path.push(self.pg[parent].clone());
                    cursor = parent;
                }
                path.reverse();
                return Some(path);
            }
            for dep in self.pg.neighbors_directed(ix, Direction::Outgoing) {
                if !walked.is_visited(&dep) {
                    parents.entry(dep).or_insert(ix);
                    deque.push_back(dep);
                }
            }
        }
        None
    }

    ///
    /// Kahn's algorithm restricted to `relevant`, with ties broken by key order for determinism.
    /// Residual nodes with non-zero in-degree after the pass are surfaced as cycle evidence.
    ///
    fn topological_order_in(&self, relevant: &HashSet<K>) -> Result<Vec<K>, TrackerError<K>> {
        let mut in_degree: HashMap<K, usize> = HashMap::default();
        for key in relevant {
            let ix = self.ids[key];
            let degree = self
                .pg
                .neighbors_directed(ix, Direction::Outgoing)
                .filter(|dep_ix| relevant.contains(&self.pg[*dep_ix]))
                .count();
            in_degree.insert(key.clone(), degree);
        }

        let mut ready: BTreeSet<K> = in_degree
            .iter()
            .filter(|(_, degree)| **degree == 0)
            .map(|(key, _)| key.clone())
            .collect();
        let mut order = Vec::with_capacity(relevant.len());

        while let Some(key) = ready.pop_first() {
            let ix = self.ids[&key];
            order.push(key);
            for dependent_ix in self.pg.neighbors_directed(ix, Direction::Incoming) {
                let dependent = &self.pg[dependent_ix];
                if let Some(degree) = in_degree.get_mut(dependent) {
                    *degree -= 1;
                    if *degree == 0 {
                        ready.insert(dependent.clone());
                    }
                }
            }
        }

        if order.len() == relevant.len() {
            Ok(order)
        } else {
            let emitted: HashSet<K> = order.into_iter().collect();
            let mut residual: Vec<K> = relevant.difference(&emitted).cloned().collect();
            residual.sort();
            Err(TrackerError::CircularDependency { cycle: residual })
        }
    }

    fn find_cycles(&self) -> Vec<Vec<K>> {
        // kosaraju over tarjan: tarjan_scc has panicked on some stable-graph inputs.
        let sccs = petgraph::algo::kosaraju_scc(&self.pg);
        let mut cycles: Vec<Vec<K>> = sccs
            .into_iter()
            .filter(|scc| scc.len() > 1)
            .map(|scc| {
                let mut cycle: Vec<K> = scc.into_iter().map(|ix| self.pg[ix].clone()).collect();
                cycle.sort();
                cycle
            })
            .collect();
        cycles.sort();
        cycles
    }
}

#[derive(Debug, Eq, PartialEq)]
pub struct DirtyMarkResult {
    pub newly_dirtied: usize,
}

///
/// The shared dependency tracker.
///
/// One multi-reader/single-writer lock guards all edge and dirty state; queries take the read
/// lock, mutations take the write lock, and batch mutations amortize a single acquisition. The
/// topological-order cache lives beside the lock (not under it) so that order queries can stay
/// read-only with respect to the graph itself.
///
pub struct DependencyTracker<K: GraphKey> {
    inner: RwLock<InnerTracker<K>>,
    order_cache: Mutex<HashMap<OrderCacheKey, OrderCacheEntry<K>>>,
    order_cache_ttl: Duration,
}

impl<K: GraphKey> DependencyTracker<K> {
    pub const DEFAULT_ORDER_CACHE_TTL: Duration = Duration::from_secs(60);

    pub fn new() -> DependencyTracker<K> {
        Self::new_with_order_cache_ttl(Self::DEFAULT_ORDER_CACHE_TTL)
    }

    pub fn new_with_order_cache_ttl(order_cache_ttl: Duration) -> DependencyTracker<K> {
        DependencyTracker {
            inner: RwLock::new(InnerTracker {
                pg: StableDiGraph::default(),
                ids: HashMap::default(),
                dirty: HashMap::default(),
            }),
            order_cache: Mutex::default(),
            order_cache_ttl,
        }
    }

    pub fn len(&self) -> usize {
        self.inner.read().ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, key: &K) -> bool {
        self.inner.read().ids.contains_key(key)
    }

    /// All registered keys, in key order.
    pub fn nodes(&self) -> Vec<K> {
        let inner = self.inner.read();
        let mut nodes: Vec<K> = inner.ids.keys().cloned().collect();
        nodes.sort();
        nodes
    }

    ///
    /// Registers a node, creating empty edge sets and a fresh (dirty) state. Idempotent: returns
    /// true only if the node was newly created.
    ///
    pub fn register_node(&self, key: K) -> bool {
        let newly = {
            let mut inner = self.inner.write();
            let (_, newly) = inner.ensure_node(key);
            newly
        };
        if newly {
            self.invalidate_order_cache();
        }
        newly
    }

    ///
    /// Removes a node and all of its incident edges. O(deg) via the stable graph's removal.
    ///
    pub fn unregister_node(&self, key: &K) -> Result<(), TrackerError<K>> {
        {
            let mut inner = self.inner.write();
            let ix = inner.index_of(key)?;
            inner.pg.remove_node(ix);
            inner.ids.remove(key);
            inner.dirty.remove(key);
        }
        self.invalidate_order_cache();
        Ok(())
    }

    ///
    /// Adds the edge `from -> to` ("from depends on to"). Unknown endpoints are created, matching
    /// the register-on-demand behavior of every other edge mutation. Idempotent for edges that
    /// are already present.
    ///
    /// Fails with `SelfDependency` when `from == to`, and with `CircularDependency` when a
    /// dependency path already leads from `to` back to `from`; in the latter case no edge is
    /// added and the discovered path is attached as evidence.
    ///
    pub fn add_dependency(&self, from: &K, to: &K) -> Result<(), TrackerError<K>> {
        if from == to {
            return Err(TrackerError::SelfDependency(from.clone()));
        }
        {
            let mut inner = self.inner.write();
            let (from_ix, _) = inner.ensure_node(from.clone());
            let (to_ix, _) = inner.ensure_node(to.clone());
            if inner.pg.find_edge(from_ix, to_ix).is_some() {
                return Ok(());
            }
            if let Some(path) = inner.path_between(to_ix, from_ix) {
                let mut cycle = vec![from.clone()];
                cycle.extend(path);
                return Err(TrackerError::CircularDependency { cycle });
            }
            crate::test_trace_log!("Adding dependency {} -> {}", from, to);
            inner.pg.add_edge(from_ix, to_ix, ());
        }
        self.invalidate_order_cache();
        Ok(())
    }

    ///
    /// Adds many dependencies of `from` under one write-lock acquisition. Atomic: if any edge is
    /// rejected, the edges added earlier in the batch are removed before returning.
    ///
    pub fn add_dependencies_batch(&self, from: &K, tos: &[K]) -> Result<usize, TrackerError<K>> {
        if let Some(dup) = tos.iter().find(|to| *to == from) {
            return Err(TrackerError::SelfDependency(dup.clone()));
        }
        let added = {
            let mut inner = self.inner.write();
            let (from_ix, _) = inner.ensure_node(from.clone());
            let mut added = Vec::new();
            for to in tos {
                let (to_ix, _) = inner.ensure_node(to.clone());
                if inner.pg.find_edge(from_ix, to_ix).is_some() {
                    continue;
                }
                if let Some(path) = inner.path_between(to_ix, from_ix) {
                    for edge in added.drain(..) {
                        inner.pg.remove_edge(edge);
                    }
                    // Nodes registered on demand earlier in the batch stay registered, so the
                    // order cache must still be invalidated on this path.
                    self.invalidate_order_cache();
                    let mut cycle = vec![from.clone()];
                    cycle.extend(path);
                    return Err(TrackerError::CircularDependency { cycle });
                }
                added.push(inner.pg.add_edge(from_ix, to_ix, ()));
            }
            added.len()
        };
        self.invalidate_order_cache();
        Ok(added)
    }

    /// Removes the edge `from -> to`. An absent edge is not an error.
    pub fn remove_dependency(&self, from: &K, to: &K) -> Result<(), TrackerError<K>> {
        {
            let mut inner = self.inner.write();
            let from_ix = inner.index_of(from)?;
            let to_ix = inner.index_of(to)?;
            let Some(edge) = inner.pg.find_edge(from_ix, to_ix) else {
                return Ok(());
            };
            inner.pg.remove_edge(edge);
        }
        self.invalidate_order_cache();
        Ok(())
    }

    /// Snapshot of the nodes `key` directly depends on.
    pub fn direct_dependencies(&self, key: &K) -> Result<HashSet<K>, TrackerError<K>> {
        let inner = self.inner.read();
        let ix = inner.index_of(key)?;
        Ok(inner
            .pg
            .neighbors_directed(ix, Direction::Outgoing)
            .map(|dep| inner.pg[dep].clone())
            .collect())
    }

    /// Snapshot of the nodes that directly depend on `key`.
    pub fn dependents(&self, key: &K) -> Result<HashSet<K>, TrackerError<K>> {
        let inner = self.inner.read();
        let ix = inner.index_of(key)?;
        Ok(inner
            .pg
            .neighbors_directed(ix, Direction::Incoming)
            .map(|dep| inner.pg[dep].clone())
            .collect())
    }

    pub fn transitive_dependencies(&self, key: &K) -> Result<HashSet<K>, TrackerError<K>> {
        self.transitive(key, Direction::Outgoing)
    }

    pub fn transitive_dependents(&self, key: &K) -> Result<HashSet<K>, TrackerError<K>> {
        self.transitive(key, Direction::Incoming)
    }

    fn transitive(&self, key: &K, direction: Direction) -> Result<HashSet<K>, TrackerError<K>> {
        let inner = self.inner.read();
        let ix = inner.index_of(key)?;
        Ok(inner
            .walk(VecDeque::from([ix]), direction)
            .filter(|&reached| reached != ix)
            .map(|reached| inner.pg[reached].clone())
            .collect())
    }

    /// Nodes with zero dependencies, in key order.
    pub fn leaf_nodes(&self) -> Vec<K> {
        self.externals(Direction::Outgoing)
    }

    /// Nodes with zero dependents, in key order.
    pub fn source_nodes(&self) -> Vec<K> {
        self.externals(Direction::Incoming)
    }

    fn externals(&self, direction: Direction) -> Vec<K> {
        let inner = self.inner.read();
        let mut nodes: Vec<K> = inner
            .pg
            .externals(direction)
            .map(|ix| inner.pg[ix].clone())
            .collect();
        nodes.sort();
        nodes
    }

    ///
    /// The longest dependency path length below `key`. A node with no dependencies has depth 0.
    ///
    pub fn dependency_depth(&self, key: &K) -> Result<usize, TrackerError<K>> {
        let inner = self.inner.read();
        let root = inner.index_of(key)?;

        // Memoized iterative post-order; recursion depth is graph-shaped and unbounded.
        let mut memo: HashMap<TrackerIndex, usize> = HashMap::default();
        let mut stack = vec![(root, false)];
        while let Some((ix, processed)) = stack.pop() {
            if processed {
                let depth = inner
                    .pg
                    .neighbors_directed(ix, Direction::Outgoing)
                    .map(|dep| memo[&dep] + 1)
                    .max()
                    .unwrap_or(0);
                memo.insert(ix, depth);
            } else if !memo.contains_key(&ix) {
                stack.push((ix, true));
                for dep in inner.pg.neighbors_directed(ix, Direction::Outgoing) {
                    if !memo.contains_key(&dep) {
                        stack.push((dep, false));
                    }
                }
            }
        }
        Ok(memo[&root])
    }

    ///
    /// A topological order of the whole graph: every node appears after all of its dependencies.
    ///
    pub fn topological_order(&self) -> Result<Vec<K>, TrackerError<K>> {
        if let Some(order) = self.cached_order(&(OrderScope::All, true)) {
            return Ok(order);
        }
        let order = {
            let inner = self.inner.read();
            let relevant: HashSet<K> = inner.ids.keys().cloned().collect();
            inner.topological_order_in(&relevant)?
        };
        self.store_order((OrderScope::All, true), order.clone());
        Ok(order)
    }

    ///
    /// A topological order restricted to `subset`.
    ///
    /// With `include_clean_dependencies`, the ordered set is the subset plus everything it
    /// transitively depends on; otherwise only dependency edges between subset members
    /// participate in in-degree counting.
    ///
    pub fn topological_order_for(
        &self,
        subset: &[K],
        include_clean_dependencies: bool,
    ) -> Result<Vec<K>, TrackerError<K>> {
        let cache_key = (
            OrderScope::Subset(Self::subset_fingerprint(subset)),
            include_clean_dependencies,
        );
        if let Some(order) = self.cached_order(&cache_key) {
            return Ok(order);
        }

        let order = {
            let inner = self.inner.read();
            let mut relevant: HashSet<K> = HashSet::default();
            for key in subset {
                let ix = inner.index_of(key)?;
                if include_clean_dependencies {
                    relevant.extend(
                        inner
                            .walk(VecDeque::from([ix]), Direction::Outgoing)
                            .map(|reached| inner.pg[reached].clone()),
                    );
                } else {
                    relevant.insert(key.clone());
                }
            }
            inner.topological_order_in(&relevant)?
        };
        self.store_order(cache_key, order.clone());
        Ok(order)
    }

    fn subset_fingerprint(subset: &[K]) -> u64 {
        let mut sorted: Vec<&K> = subset.iter().collect();
        sorted.sort();
        sorted.dedup();
        let mut hasher = FnvHasher::default();
        for key in sorted {
            key.hash(&mut hasher);
        }
        hasher.finish()
    }

    fn cached_order(&self, cache_key: &OrderCacheKey) -> Option<Vec<K>> {
        let mut cache = self.order_cache.lock();
        let expired = cache
            .get(cache_key)
            .is_some_and(|entry| entry.last_access.elapsed() > self.order_cache_ttl);
        if expired {
            cache.remove(cache_key);
            return None;
        }
        cache.get_mut(cache_key).map(|entry| {
            entry.last_access = Instant::now();
            entry.order.clone()
        })
    }

    fn store_order(&self, cache_key: OrderCacheKey, order: Vec<K>) {
        self.order_cache.lock().insert(
            cache_key,
            OrderCacheEntry {
                order,
                last_access: Instant::now(),
            },
        );
    }

    fn invalidate_order_cache(&self) {
        let mut cache = self.order_cache.lock();
        if !cache.is_empty() {
            log::debug!("Invalidating {} cached topological order(s)", cache.len());
            cache.clear();
        }
    }

    /// For tests: the number of live order-cache entries.
    pub fn cached_order_count(&self) -> usize {
        self.order_cache.lock().len()
    }

    pub fn mark_dirty(&self, key: &K, level: DirtyLevel) -> Result<bool, TrackerError<K>> {
        let mut inner = self.inner.write();
        inner.index_of(key)?;
        let state = inner.dirty.get_mut(key).expect("dirty state for every node");
        Ok(state.mark(level))
    }

    /// Marks many nodes dirty under one write-lock acquisition; counts newly-dirtied nodes.
    pub fn mark_dirty_batch(
        &self,
        keys: &[K],
        level: DirtyLevel,
    ) -> Result<DirtyMarkResult, TrackerError<K>> {
        let mut inner = self.inner.write();
        for key in keys {
            inner.index_of(key)?;
        }
        let mut newly_dirtied = 0;
        for key in keys {
            let state = inner.dirty.get_mut(key).expect("dirty state for every node");
            if state.mark(level) {
                newly_dirtied += 1;
            }
        }
        Ok(DirtyMarkResult { newly_dirtied })
    }

    ///
    /// Marks `key` and all of its transitive dependents dirty: everything whose result could
    /// observe a change to `key`.
    ///
    pub fn mark_dirty_with_dependents(&self, key: &K) -> Result<DirtyMarkResult, TrackerError<K>> {
        let mut inner = self.inner.write();
        let ix = inner.index_of(key)?;
        let affected: Vec<K> = inner
            .walk(VecDeque::from([ix]), Direction::Incoming)
            .map(|reached| inner.pg[reached].clone())
            .collect();

        let mut newly_dirtied = 0;
        for key in affected {
            let state = inner
                .dirty
                .get_mut(&key)
                .expect("dirty state for every node");
            if state.mark(DirtyLevel::Normal) {
                log::debug!("Dirtying {key}");
                newly_dirtied += 1;
            }
        }
        Ok(DirtyMarkResult { newly_dirtied })
    }

    /// Clears the dirty flag; only correct after a successful evaluation of `key`.
    pub fn clear_dirty(&self, key: &K) -> Result<(), TrackerError<K>> {
        let mut inner = self.inner.write();
        inner.index_of(key)?;
        inner
            .dirty
            .get_mut(key)
            .expect("dirty state for every node")
            .clear();
        Ok(())
    }

    pub fn clear_dirty_batch(&self, keys: &[K]) -> Result<usize, TrackerError<K>> {
        let mut inner = self.inner.write();
        for key in keys {
            inner.index_of(key)?;
        }
        let mut cleared = 0;
        for key in keys {
            if inner
                .dirty
                .get_mut(key)
                .expect("dirty state for every node")
                .clear()
            {
                cleared += 1;
            }
        }
        Ok(cleared)
    }

    pub fn clear_all_dirty(&self) -> usize {
        let mut inner = self.inner.write();
        let mut cleared = 0;
        for state in inner.dirty.values_mut() {
            if state.clear() {
                cleared += 1;
            }
        }
        cleared
    }

    pub fn is_dirty(&self, key: &K) -> Result<bool, TrackerError<K>> {
        let inner = self.inner.read();
        inner.index_of(key)?;
        Ok(inner.dirty[key].is_dirty)
    }

    pub fn dirty_state(&self, key: &K) -> Result<DirtyState, TrackerError<K>> {
        let inner = self.inner.read();
        inner.index_of(key)?;
        Ok(inner.dirty[key])
    }

    pub fn dirty_nodes(&self) -> Vec<K> {
        let inner = self.inner.read();
        let mut nodes: Vec<K> = inner
            .dirty
            .iter()
            .filter(|(_, state)| state.is_dirty)
            .map(|(key, _)| key.clone())
            .collect();
        nodes.sort();
        nodes
    }

    pub fn dirty_node_count(&self) -> usize {
        let inner = self.inner.read();
        inner.dirty.values().filter(|state| state.is_dirty).count()
    }

    pub fn dirty_nodes_by_level(&self, level: DirtyLevel) -> Vec<K> {
        let inner = self.inner.read();
        let mut nodes: Vec<K> = inner
            .dirty
            .iter()
            .filter(|(_, state)| state.is_dirty && state.level == level)
            .map(|(key, _)| key.clone())
            .collect();
        nodes.sort();
        nodes
    }

    ///
    /// Diagnostic integrity pass: verifies the key index against the underlying graph and scans
    /// for cycles that should have been impossible given the preventive check. A failure here
    /// indicates tracker corruption, not caller error.
    ///
    pub fn validate_integrity(&self) -> Result<(), TrackerError<K>> {
        let inner = self.inner.read();
        for (key, &ix) in &inner.ids {
            assert!(
                inner.pg.node_weight(ix) == Some(key),
                "tracker index out of sync for {key}"
            );
            assert!(
                inner.dirty.contains_key(key),
                "missing dirty state for {key}"
            );
            assert!(
                inner.pg.find_edge(ix, ix).is_none(),
                "self-dependency present for {key}"
            );
        }
        if let Some(cycle) = inner.find_cycles().into_iter().next() {
            return Err(TrackerError::CircularDependency { cycle });
        }
        Ok(())
    }

    /// All simple-cycle evidence currently in the graph, as sorted strongly connected components.
    pub fn find_cycles(&self) -> Vec<Vec<K>> {
        self.inner.read().find_cycles()
    }
}

///
/// Represents the state of a particular walk through the tracker. Implements Iterator and has
/// the same lifetime as the read guard that produced it.
///
struct Walk<'a, K: GraphKey> {
    graph: &'a InnerTracker<K>,
    direction: Direction,
    deque: VecDeque<TrackerIndex>,
    walked: FixedBitSet,
}

impl<'a, K: GraphKey> Iterator for Walk<'a, K> {
    type Item = TrackerIndex;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(ix) = self.deque.pop_front() {
            if !self.walked.visit(ix) {
                continue;
            }
            self.deque
                .extend(self.graph.pg.neighbors_directed(ix, self.direction));
            return Some(ix);
        }
        None
    }
}

///
/// Logs at trace level, but only in `cfg(test)`.
///
#[macro_export]
macro_rules! test_trace_log {
    ($($arg:tt)+) => {
      #[cfg(test)]
      {
        log::trace!($($arg)+)
      }
    };
}

#[cfg(test)]
mod tests;
