// Copyright 2025 Strobe project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! Bounded execution for node evaluation: named limits with preset profiles, per-evaluation
//! execution state, and the context that wraps every operation with resource, time, and error
//! policies.

mod config;
mod context;
mod error;
mod state;

pub use crate::config::{GuardrailConfig, OnViolation};
pub use crate::context::{
    Capabilities, ErrorBoundary, EvaluationContext, OperationScope, PreconditionReport,
    RetryPolicy,
};
pub use crate::error::{GuardrailError, Limit};
pub use crate::state::{ExecutionState, Mode};
