// Copyright 2025 Strobe project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::time::Duration;

use fnv::FnvHashMap as HashMap;

use crate::node::NodeId;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EvaluationMode {
    Full,
    Incremental,
    SingleNode,
}

///
/// The aggregated outcome of one evaluation call. Per-node failures are recorded here rather
/// than propagated, so independent nodes in the batch always complete.
///
#[derive(Clone, Debug)]
pub struct EvaluationResult {
    pub success: bool,
    pub mode: EvaluationMode,
    pub evaluated_count: usize,
    pub failed_count: usize,
    pub cached_results_used: usize,
    pub total_evaluation_time: Duration,
    /// The nodes actually evaluated, in the order they ran. Cache hits are not listed.
    pub evaluation_order: Vec<NodeId>,
    pub errors: HashMap<NodeId, String>,
}

impl EvaluationResult {
    pub(crate) fn new(mode: EvaluationMode) -> EvaluationResult {
        EvaluationResult {
            success: true,
            mode,
            evaluated_count: 0,
            failed_count: 0,
            cached_results_used: 0,
            total_evaluation_time: Duration::ZERO,
            evaluation_order: Vec::new(),
            errors: HashMap::default(),
        }
    }
}
