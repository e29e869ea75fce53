// Copyright 2025 Strobe project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::time::SystemTime;

///
/// The lifecycle state of a node:
///
/// ```text
///  New -- register --> Dirty -- evaluate OK --> Evaluated -- inputs change --> Dirty
///                        |                          |
///                        +-- evaluate Fail -> Error +-- mark_dirty --> Dirty
///  Error -- mark_dirty + successful evaluate --> Evaluated
/// ```
///
/// Terminal only on removal.
///
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeState {
    New,
    Clean,
    Dirty,
    Evaluated,
    Error,
}

#[derive(Clone, Copy, Debug)]
pub struct NodeEvaluationState {
    pub state: NodeState,
    pub is_evaluated: bool,
    pub is_dirty: bool,
    pub last_evaluation_time: Option<SystemTime>,
    pub last_modified_time: SystemTime,
    pub evaluation_count: u64,
}

impl NodeEvaluationState {
    pub(crate) fn new() -> NodeEvaluationState {
        NodeEvaluationState {
            state: NodeState::New,
            is_evaluated: false,
            is_dirty: true,
            last_evaluation_time: None,
            last_modified_time: SystemTime::now(),
            evaluation_count: 0,
        }
    }

    pub(crate) fn mark_dirty(&mut self) {
        self.state = NodeState::Dirty;
        self.is_dirty = true;
        self.last_modified_time = SystemTime::now();
    }

    pub(crate) fn mark_evaluated(&mut self) {
        self.state = NodeState::Evaluated;
        self.is_evaluated = true;
        self.is_dirty = false;
        self.last_evaluation_time = Some(SystemTime::now());
        self.evaluation_count += 1;
    }

    pub(crate) fn mark_error(&mut self) {
        self.state = NodeState::Error;
        self.is_dirty = true;
    }

    pub(crate) fn mark_clean(&mut self) {
        self.is_dirty = false;
        if self.state != NodeState::Evaluated {
            self.state = NodeState::Clean;
        }
    }
}
