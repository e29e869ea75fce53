// Copyright 2025 Strobe project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::any::Any;
use std::sync::Arc;

use fnv::FnvHashMap as HashMap;
use guardrails::{EvaluationContext, GuardrailError};

use crate::node::{InputMap, InputValue, NodeId, Value};

///
/// What a node sees while it evaluates: its current inputs, the values its `Ref` inputs resolve
/// to, the host's capability handles, and the cooperative guardrail checkpoints.
///
pub struct OpContext {
    node: NodeId,
    inputs: InputMap,
    resolved: HashMap<String, Value>,
    ctx: EvaluationContext,
}

impl OpContext {
    pub(crate) fn new(
        node: NodeId,
        inputs: InputMap,
        resolved: HashMap<String, Value>,
        ctx: EvaluationContext,
    ) -> OpContext {
        OpContext {
            node,
            inputs,
            resolved,
            ctx,
        }
    }

    pub fn node(&self) -> &NodeId {
        &self.node
    }

    pub fn inputs(&self) -> &InputMap {
        &self.inputs
    }

    pub fn input(&self, name: &str) -> Option<&InputValue> {
        self.inputs.get(name)
    }

    ///
    /// The upstream value a `Ref` input currently resolves to. Present for every `Ref` input of
    /// an evaluating node, because dependencies complete before their dependents start.
    ///
    pub fn resolved_input(&self, name: &str) -> Option<&Value> {
        self.resolved.get(name)
    }

    ///
    /// The cooperative checkpoint: long loops should call this periodically so that deadlines,
    /// budget overruns, and external cancellation can take effect between iterations.
    ///
    pub fn checkpoint(&self, op_name: &str) -> Result<(), GuardrailError> {
        self.ctx.validate_can_proceed(op_name)
    }

    pub fn track_allocation(&self, kind: &str, bytes: u64) -> Result<(), GuardrailError> {
        self.ctx.track_resource_allocation(kind, bytes)
    }

    pub fn is_cancelled(&self) -> bool {
        self.ctx.token().is_cancelled()
    }

    pub fn render_handle(&self) -> Option<Arc<dyn Any + Send + Sync>> {
        self.ctx.capabilities().render.clone()
    }

    pub fn audio_handle(&self) -> Option<Arc<dyn Any + Send + Sync>> {
        self.ctx.capabilities().audio.clone()
    }

    pub fn resource_handle(&self) -> Option<Arc<dyn Any + Send + Sync>> {
        self.ctx.capabilities().resources.clone()
    }
}
