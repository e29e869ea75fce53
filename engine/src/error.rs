// Copyright 2025 Strobe project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use graph::TrackerError;
use guardrails::GuardrailError;

use crate::node::NodeId;

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum EvalError {
    #[error("a node with id {0} already exists")]
    DuplicateNode(NodeId),
    #[error("unknown node: {0}")]
    UnknownNode(NodeId),
    /// An ordering bug if ever observed by callers: the engine evaluates dependencies first.
    #[error("dependency {dependency} of {node} has not been evaluated")]
    DependencyNotReady { node: NodeId, dependency: NodeId },
    #[error("evaluation of {node} failed: {message}")]
    NodeEvaluationFailed { node: NodeId, message: String },
    #[error(transparent)]
    Tracker(#[from] TrackerError<NodeId>),
    #[error(transparent)]
    Guardrail(#[from] GuardrailError),
}

impl EvalError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, EvalError::Guardrail(GuardrailError::Cancelled))
    }
}
