// Copyright 2025 Strobe project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::op_context::OpContext;

///
/// The opaque identity of a node. Unique within one engine instance, and never reused after the
/// node has been removed.
///
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(Arc<str>);

impl NodeId {
    pub fn new(id: impl Into<Arc<str>>) -> NodeId {
        NodeId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", self.0)
    }
}

impl From<&str> for NodeId {
    fn from(id: &str) -> NodeId {
        NodeId::new(id)
    }
}

impl From<String> for NodeId {
    fn from(id: String) -> NodeId {
        NodeId::new(id)
    }
}

/// The kinds of values flowing between nodes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ValueType {
    Unit,
    Bool,
    Int,
    Float,
    Text,
    Vec2,
    Color,
    List,
    Blob,
}

///
/// A value produced by a node's `evaluate`. Values are opaque to the engine: signatures, not
/// result equality, drive caching, so only `Clone` and `Debug` are required of the payload.
///
#[derive(Clone, Debug)]
pub enum Value {
    Unit,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Vec2([f32; 2]),
    Color([f32; 4]),
    List(Vec<Value>),
    Blob(Arc<[u8]>),
}

impl Value {
    pub fn value_type(&self) -> ValueType {
        match self {
            Value::Unit => ValueType::Unit,
            Value::Bool(_) => ValueType::Bool,
            Value::Int(_) => ValueType::Int,
            Value::Float(_) => ValueType::Float,
            Value::Text(_) => ValueType::Text,
            Value::Vec2(_) => ValueType::Vec2,
            Value::Color(_) => ValueType::Color,
            Value::List(_) => ValueType::List,
            Value::Blob(_) => ValueType::Blob,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }
}

///
/// An input value that denotes another node's output. Its presence in an input map establishes
/// the dependency edge `this node -> referenced node`.
///
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct NodeRef {
    pub id: NodeId,
    pub output: String,
}

impl NodeRef {
    pub fn new(id: impl Into<NodeId>, output: impl Into<String>) -> NodeRef {
        NodeRef {
            id: id.into(),
            output: output.into(),
        }
    }
}

///
/// A node input: either an immediate value or a reference to another node's output.
///
#[derive(Clone, Debug, PartialEq)]
pub enum InputValue {
    Unit,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Vec2([f32; 2]),
    Color([f32; 4]),
    List(Vec<InputValue>),
    Ref(NodeRef),
}

// Hashed rather than compared for signatures; floats hash by bit pattern so that equal inputs
// produce equal fingerprints.
impl Hash for InputValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            InputValue::Unit => 0_u8.hash(state),
            InputValue::Bool(b) => {
                1_u8.hash(state);
                b.hash(state);
            }
            InputValue::Int(i) => {
                2_u8.hash(state);
                i.hash(state);
            }
            InputValue::Float(f) => {
                3_u8.hash(state);
                f.to_bits().hash(state);
            }
            InputValue::Text(s) => {
                4_u8.hash(state);
                s.hash(state);
            }
            InputValue::Vec2(v) => {
                5_u8.hash(state);
                for component in v {
                    component.to_bits().hash(state);
                }
            }
            InputValue::Color(c) => {
                6_u8.hash(state);
                for channel in c {
                    channel.to_bits().hash(state);
                }
            }
            InputValue::List(items) => {
                7_u8.hash(state);
                items.len().hash(state);
                for item in items {
                    item.hash(state);
                }
            }
            InputValue::Ref(node_ref) => {
                8_u8.hash(state);
                node_ref.hash(state);
            }
        }
    }
}

///
/// Input maps iterate in sorted name order, which is what makes signatures independent of
/// insertion order.
///
pub type InputMap = BTreeMap<String, InputValue>;

/// Collects every `NodeRef` in an input map, including refs nested in lists.
pub fn collect_node_refs(inputs: &InputMap) -> Vec<&NodeRef> {
    fn visit<'a>(value: &'a InputValue, out: &mut Vec<&'a NodeRef>) {
        match value {
            InputValue::Ref(node_ref) => out.push(node_ref),
            InputValue::List(items) => {
                for item in items {
                    visit(item, out);
                }
            }
            _ => {}
        }
    }

    let mut refs = Vec::new();
    for value in inputs.values() {
        visit(value, &mut refs);
    }
    refs
}

/// A declared output of a node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutputDecl {
    pub name: String,
    pub value_type: ValueType,
}

impl OutputDecl {
    pub fn new(name: impl Into<String>, value_type: ValueType) -> OutputDecl {
        OutputDecl {
            name: name.into(),
            value_type,
        }
    }
}

///
/// A unit of computation in the graph.
///
/// Implementations must be deterministic given equal inputs; side effects are permitted but
/// must be idempotent under re-evaluation. Long-running bodies should call
/// `OpContext::checkpoint` periodically so that deadlines and cancellation can take effect.
///
pub trait Operator: Send + Sync + 'static {
    fn id(&self) -> &NodeId;

    /// The node's declared inputs. Read once when the node is added; afterwards the engine owns
    /// the current input map (see `Engine::update_node_inputs`).
    fn inputs(&self) -> InputMap;

    fn outputs(&self) -> Vec<OutputDecl>;

    fn evaluate(&self, ctx: &OpContext) -> Result<Value, String>;
}
