// Copyright 2025 Strobe project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::time::SystemTime;

///
/// The urgency attached to a dirty mark. Levels are ordered: re-marking a node at a lower level
/// than it already carries never downgrades it.
///
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DirtyLevel {
    Normal,
    High,
    Critical,
}

///
/// Per-node dirty bookkeeping. A newly registered node starts dirty: nothing has ever been
/// computed for it, so its (absent) cached result cannot be trusted.
///
#[derive(Clone, Copy, Debug)]
pub struct DirtyState {
    pub is_dirty: bool,
    pub level: DirtyLevel,
    pub last_modified: SystemTime,
    pub last_evaluated: Option<SystemTime>,
}

impl DirtyState {
    pub(crate) fn new() -> DirtyState {
        DirtyState {
            is_dirty: true,
            level: DirtyLevel::Normal,
            last_modified: SystemTime::now(),
            last_evaluated: None,
        }
    }

    /// Marks dirty, keeping the strongest level seen. Returns true if the node was clean.
    pub(crate) fn mark(&mut self, level: DirtyLevel) -> bool {
        let newly = !self.is_dirty;
        self.is_dirty = true;
        self.level = self.level.max(level);
        self.last_modified = SystemTime::now();
        newly
    }

    /// Clears the dirty flag after a successful evaluation.
    pub(crate) fn clear(&mut self) -> bool {
        let was = self.is_dirty;
        self.is_dirty = false;
        self.level = DirtyLevel::Normal;
        self.last_evaluated = Some(SystemTime::now());
        was
    }
}
