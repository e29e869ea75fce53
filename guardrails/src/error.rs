// Copyright 2025 Strobe project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::fmt;

///
/// The limit named by a `GuardrailError::Violation`. Limits are checked in a fixed priority
/// order (deadline, memory, operations, recursion) so that concurrent overruns always surface
/// the same violation.
///
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Limit {
    EvaluationDeadline,
    OperationDeadline,
    Memory,
    SingleAllocation,
    Operations,
    Recursion,
}

impl fmt::Display for Limit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Limit::EvaluationDeadline => "evaluation deadline",
            Limit::OperationDeadline => "operation deadline",
            Limit::Memory => "memory budget",
            Limit::SingleAllocation => "single allocation size",
            Limit::Operations => "operation budget",
            Limit::Recursion => "recursion depth",
        };
        write!(f, "{name}")
    }
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum GuardrailError {
    #[error("guardrail violated: {limit} (observed {observed}, allowed {allowed})")]
    Violation {
        limit: Limit,
        observed: u64,
        allowed: u64,
    },
    #[error("operation cancelled")]
    Cancelled,
    #[error("precondition failed: {}", .failures.join("; "))]
    PreconditionFailed { failures: Vec<String> },
    #[error("invalid guardrail configuration: {0}")]
    ConfigurationInvalid(String),
    #[error("transient resource failure: {0}")]
    TransientResource(String),
}

impl GuardrailError {
    ///
    /// Whether `execute_resilient` may retry after this failure. Cancellation, deadline and
    /// budget violations, and configuration errors never retry.
    ///
    pub fn is_retryable(&self) -> bool {
        matches!(self, GuardrailError::TransientResource(_))
    }
}

impl From<cancellation::Cancelled> for GuardrailError {
    fn from(_: cancellation::Cancelled) -> Self {
        GuardrailError::Cancelled
    }
}
