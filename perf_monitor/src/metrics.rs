// Copyright 2025 Strobe project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum Metric {
    NodeEvaluations,
    NodeEvaluationErrors,
    CacheHits,
    CacheMisses,
    FullEvaluations,
    IncrementalEvaluations,
    OperationsTracked,
    AllocationsTracked,
    GuardrailViolations,
    RetriesAttempted,
    PreconditionFailures,
}

impl Metric {
    pub fn as_str(&self) -> &'static str {
        use Metric::*;

        match *self {
            NodeEvaluations => "node_evaluations",
            NodeEvaluationErrors => "node_evaluation_errors",
            CacheHits => "cache_hits",
            CacheMisses => "cache_misses",
            FullEvaluations => "full_evaluations",
            IncrementalEvaluations => "incremental_evaluations",
            OperationsTracked => "operations_tracked",
            AllocationsTracked => "allocations_tracked",
            GuardrailViolations => "guardrail_violations",
            RetriesAttempted => "retries_attempted",
            PreconditionFailures => "precondition_failures",
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum ObservationMetric {
    NodeEvaluationTimeMicros,
    OperationTimeMicros,
    EvaluationBatchTimeMicros,
}

impl ObservationMetric {
    pub fn as_str(&self) -> &'static str {
        use ObservationMetric::*;

        match *self {
            NodeEvaluationTimeMicros => "node_evaluation_time_micros",
            OperationTimeMicros => "operation_time_micros",
            EvaluationBatchTimeMicros => "evaluation_batch_time_micros",
        }
    }
}
