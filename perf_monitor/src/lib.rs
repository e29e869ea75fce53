// Copyright 2025 Strobe project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{self, AtomicU64};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant, SystemTime};

use concrete_time::TimeSpan;
use parking_lot::Mutex;
use task_executor::Executor;
use tokio::time::sleep;

mod metrics;

pub use crate::metrics::{Metric, ObservationMetric};

/// Completed operation records retained before the oldest are dropped.
const MAX_COMPLETED_OPERATIONS: usize = 1024;
/// Evaluation records retained per node. Trimmed in half-chunks so that eviction is amortized
/// rather than per-insert.
const MAX_RECORDS_PER_NODE: usize = 256;
/// Retained snapshots, whether taken explicitly or by the periodic task.
const MAX_SNAPSHOTS: usize = 100;

///
/// An opaque handle for an in-flight tracked operation.
///
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct OperationId(u64);

struct ActiveOperation {
    name: String,
    started: SystemTime,
}

/// A completed tracked operation.
#[derive(Clone, Debug)]
pub struct OperationRecord {
    pub name: String,
    pub span: TimeSpan,
    pub success: bool,
}

/// One evaluation of one node.
#[derive(Clone, Copy, Debug)]
pub struct NodeEvaluationRecord {
    pub duration: Duration,
    pub success: bool,
}

/// A point-in-time view of the monitor's aggregates.
#[derive(Clone, Debug)]
pub struct MonitorSnapshot {
    pub counters: HashMap<&'static str, u64>,
    pub cache_hit_rate: f64,
    pub active_operations: usize,
    pub completed_operations: usize,
    pub taken_at: SystemTime,
}

/// Rolled-up percentiles and rates for reporting surfaces.
#[derive(Clone, Debug)]
pub struct PerformanceReport {
    pub node_evaluation_p50_micros: u64,
    pub node_evaluation_p95_micros: u64,
    pub node_evaluation_p99_micros: u64,
    pub cache_hit_rate: f64,
    pub throughput_ops_per_sec: f64,
    pub estimated_cpu_reduction: f64,
    pub recommendation: String,
}

///
/// Advisory estimate of how much recomputation the cache and incremental evaluation are saving.
/// Nothing branches on these numbers; they exist for reporting surfaces only.
///
#[derive(Clone, Copy, Debug)]
pub struct CpuReductionAnalysis {
    pub cache_hit_rate: f64,
    pub incremental_fraction: f64,
    pub estimated_reduction: f64,
}

/// The latest reading of a caller-named metric.
#[derive(Clone, Debug, PartialEq)]
pub struct CustomMetric {
    pub value: f64,
    pub unit: String,
}

struct MonitorInner {
    counters: Mutex<HashMap<Metric, u64>>,
    custom: Mutex<HashMap<String, CustomMetric>>,
    observations: Mutex<HashMap<ObservationMetric, hdrhistogram::Histogram<u64>>>,
    active: Mutex<HashMap<OperationId, ActiveOperation>>,
    completed: Mutex<VecDeque<OperationRecord>>,
    node_records: Mutex<HashMap<String, Vec<NodeEvaluationRecord>>>,
    snapshots: Mutex<VecDeque<MonitorSnapshot>>,
    next_operation: AtomicU64,
    started_at: Instant,
}

impl MonitorInner {
    fn snapshot(&self) -> MonitorSnapshot {
        let counters = self
            .counters
            .lock()
            .iter()
            .map(|(metric, value)| (metric.as_str(), *value))
            .collect();
        let snapshot = MonitorSnapshot {
            counters,
            cache_hit_rate: self.cache_hit_rate(),
            active_operations: self.active.lock().len(),
            completed_operations: self.completed.lock().len(),
            taken_at: SystemTime::now(),
        };

        let mut snapshots = self.snapshots.lock();
        if snapshots.len() >= MAX_SNAPSHOTS {
            snapshots.pop_front();
        }
        snapshots.push_back(snapshot.clone());
        snapshot
    }

    fn counter(&self, metric: Metric) -> u64 {
        self.counters.lock().get(&metric).copied().unwrap_or(0)
    }

    fn cache_hit_rate(&self) -> f64 {
        let hits = self.counter(Metric::CacheHits) as f64;
        let misses = self.counter(Metric::CacheMisses) as f64;
        if hits + misses == 0.0 {
            0.0
        } else {
            hits / (hits + misses)
        }
    }
}

///
/// Records metric counters, duration observations, and per-node evaluation history, and rolls
/// them up into snapshots and reports.
///
/// All interior state is independently synchronized: recording from concurrently evaluating
/// nodes never contends on more than the single map being touched.
///
#[derive(Clone)]
pub struct PerformanceMonitor {
    inner: Arc<MonitorInner>,
}

impl PerformanceMonitor {
    pub fn new() -> PerformanceMonitor {
        PerformanceMonitor {
            inner: Arc::new(MonitorInner {
                counters: Mutex::default(),
                custom: Mutex::default(),
                observations: Mutex::default(),
                active: Mutex::default(),
                completed: Mutex::new(VecDeque::new()),
                node_records: Mutex::default(),
                snapshots: Mutex::new(VecDeque::new()),
                next_operation: AtomicU64::new(0),
                started_at: Instant::now(),
            }),
        }
    }

    pub fn increment_counter(&self, metric: Metric, change: u64) {
        self.inner
            .counters
            .lock()
            .entry(metric)
            .and_modify(|e| *e += change)
            .or_insert(change);
    }

    pub fn counter(&self, metric: Metric) -> u64 {
        self.inner.counter(metric)
    }

    ///
    /// Records the latest reading of a caller-named metric (gauge semantics: the previous
    /// reading is replaced).
    ///
    pub fn record_metric(&self, name: &str, value: f64, unit: &str) {
        self.inner.custom.lock().insert(
            name.to_owned(),
            CustomMetric {
                value,
                unit: unit.to_owned(),
            },
        );
    }

    pub fn custom_metric(&self, name: &str) -> Option<CustomMetric> {
        self.inner.custom.lock().get(name).cloned()
    }

    ///
    /// Records an observation of a time-like metric into a histogram.
    ///
    pub fn record_observation(&self, metric: ObservationMetric, value: u64) {
        let mut histograms_by_metric = self.inner.observations.lock();
        histograms_by_metric
            .entry(metric)
            .and_modify(|h| {
                let _ = h.record(value);
            })
            .or_insert_with(|| {
                let mut h =
                    hdrhistogram::Histogram::<u64>::new(3).expect("Failed to allocate histogram");
                let _ = h.record(value);
                h
            });
    }

    pub fn record_cache_hit(&self) {
        self.increment_counter(Metric::CacheHits, 1);
    }

    pub fn record_cache_miss(&self) {
        self.increment_counter(Metric::CacheMisses, 1);
    }

    ///
    /// Records one evaluation of the named node. Per-node history is bounded: when a node's list
    /// fills up, the oldest half is dropped in one pass.
    ///
    pub fn record_node_evaluation(&self, node: &str, duration: Duration, success: bool) {
        self.increment_counter(Metric::NodeEvaluations, 1);
        if !success {
            self.increment_counter(Metric::NodeEvaluationErrors, 1);
        }
        self.record_observation(
            ObservationMetric::NodeEvaluationTimeMicros,
            duration.as_micros() as u64,
        );

        let mut node_records = self.inner.node_records.lock();
        let records = node_records.entry(node.to_owned()).or_default();
        if records.len() >= MAX_RECORDS_PER_NODE {
            records.drain(..MAX_RECORDS_PER_NODE / 2);
        }
        records.push(NodeEvaluationRecord { duration, success });
    }

    pub fn node_records(&self, node: &str) -> Vec<NodeEvaluationRecord> {
        self.inner
            .node_records
            .lock()
            .get(node)
            .cloned()
            .unwrap_or_default()
    }

    ///
    /// Begins tracking an operation. The returned id must be passed back to `operation_finished`;
    /// callers hold it in a scope object so that finishing is guaranteed on every exit path.
    ///
    pub fn operation_started(&self, name: &str) -> OperationId {
        let id = OperationId(
            self.inner
                .next_operation
                .fetch_add(1, atomic::Ordering::Relaxed),
        );
        self.increment_counter(Metric::OperationsTracked, 1);
        self.inner.active.lock().insert(
            id,
            ActiveOperation {
                name: name.to_owned(),
                started: SystemTime::now(),
            },
        );
        id
    }

    pub fn operation_finished(&self, id: OperationId, success: bool) {
        let Some(active) = self.inner.active.lock().remove(&id) else {
            log::warn!("No previously-started operation found for id: {id:?}");
            return;
        };
        let span = TimeSpan::since(&active.started);
        self.record_observation(
            ObservationMetric::OperationTimeMicros,
            std::time::Duration::from(span.duration).as_micros() as u64,
        );

        let mut completed = self.inner.completed.lock();
        if completed.len() >= MAX_COMPLETED_OPERATIONS {
            completed.pop_front();
        }
        completed.push_back(OperationRecord {
            name: active.name,
            span,
            success,
        });
    }

    pub fn active_operation_count(&self) -> usize {
        self.inner.active.lock().len()
    }

    pub fn cache_hit_rate(&self) -> f64 {
        self.inner.cache_hit_rate()
    }

    ///
    /// Computes a snapshot of the current aggregates and retains it (up to `MAX_SNAPSHOTS`).
    ///
    pub fn snapshot(&self) -> MonitorSnapshot {
        self.inner.snapshot()
    }

    pub fn snapshots(&self) -> Vec<MonitorSnapshot> {
        self.inner.snapshots.lock().iter().cloned().collect()
    }

    pub fn cpu_reduction_analysis(&self) -> CpuReductionAnalysis {
        let cache_hit_rate = self.cache_hit_rate();
        let full = self.counter(Metric::FullEvaluations) as f64;
        let incremental = self.counter(Metric::IncrementalEvaluations) as f64;
        let incremental_fraction = if full + incremental == 0.0 {
            0.0
        } else {
            incremental / (full + incremental)
        };
        // Heuristic weighting of the two savings sources, capped below 1.0.
        let estimated_reduction = (cache_hit_rate * 0.6 + incremental_fraction * 0.3).min(0.95);
        CpuReductionAnalysis {
            cache_hit_rate,
            incremental_fraction,
            estimated_reduction,
        }
    }

    pub fn report(&self) -> PerformanceReport {
        let (p50, p95, p99) = {
            let observations = self.inner.observations.lock();
            match observations.get(&ObservationMetric::NodeEvaluationTimeMicros) {
                Some(h) => (
                    h.value_at_quantile(0.50),
                    h.value_at_quantile(0.95),
                    h.value_at_quantile(0.99),
                ),
                None => (0, 0, 0),
            }
        };

        let analysis = self.cpu_reduction_analysis();
        let elapsed = self.inner.started_at.elapsed().as_secs_f64();
        let throughput_ops_per_sec = if elapsed == 0.0 {
            0.0
        } else {
            self.counter(Metric::NodeEvaluations) as f64 / elapsed
        };

        let recommendation = if analysis.cache_hit_rate >= 0.8 {
            "Cache hit rate is healthy; no action needed.".to_owned()
        } else if analysis.incremental_fraction < 0.2 {
            "Most evaluations are full passes; prefer evaluate_incremental for small change sets."
                .to_owned()
        } else {
            "Cache hit rate is low; check for signature churn from frequently-changing inputs."
                .to_owned()
        };

        PerformanceReport {
            node_evaluation_p50_micros: p50,
            node_evaluation_p95_micros: p95,
            node_evaluation_p99_micros: p99,
            cache_hit_rate: analysis.cache_hit_rate,
            throughput_ops_per_sec,
            estimated_cpu_reduction: analysis.estimated_reduction,
            recommendation,
        }
    }

    ///
    /// Spawns a task which periodically snapshots the monitor.
    ///
    /// Uses a `Weak` reference to the monitor state to detect when the last owning handle has
    /// been dropped, at which point the task exits.
    ///
    pub fn start_periodic_snapshots(&self, executor: &Executor, interval: Duration) {
        let _join = executor.native_spawn(Self::periodic_snapshot_task(
            Arc::downgrade(&self.inner),
            interval,
        ));
    }

    async fn periodic_snapshot_task(inner: Weak<MonitorInner>, interval: Duration) {
        loop {
            sleep(interval).await;

            if let Some(inner) = Weak::upgrade(&inner) {
                inner.snapshot();
            } else {
                // The monitor has been dropped.
                break;
            };
        }
    }
}
