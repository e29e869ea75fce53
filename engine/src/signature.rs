// Copyright 2025 Strobe project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::collections::BTreeSet;
use std::fmt;
use std::hash::{Hash, Hasher};

use fnv::FnvHasher;

use crate::node::{InputMap, NodeId};

///
/// A deterministic fingerprint of a node's inputs and direct dependencies: the cache key.
///
/// Stable under insertion-order reshuffles of the input map (the map iterates sorted), and
/// sensitive to adding or removing a dependency even when input values are unchanged, because
/// the dependency list is hashed as its own section.
///
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Signature(u64);

impl Signature {
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

pub(crate) fn compute_signature(inputs: &InputMap, dependencies: &BTreeSet<NodeId>) -> Signature {
    let mut hasher = FnvHasher::default();
    inputs.len().hash(&mut hasher);
    for (name, value) in inputs {
        name.hash(&mut hasher);
        value.hash(&mut hasher);
    }
    dependencies.len().hash(&mut hasher);
    for dependency in dependencies {
        dependency.hash(&mut hasher);
    }
    Signature(hasher.finish())
}
