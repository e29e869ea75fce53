// Copyright 2025 Strobe project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::collections::VecDeque;
use std::sync::atomic::{self, AtomicU32, AtomicU64};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::config::GuardrailConfig;
use crate::error::{GuardrailError, Limit};

/// Captured violation/exception messages retained per evaluation.
const MAX_BUFFERED_EXCEPTIONS: usize = 64;

///
/// The admission mode of an execution. `Safe` admits operations at halved budgets after a
/// recovered violation; `Panic` admits nothing until reset.
///
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    Normal,
    Safe,
    Panic,
}

///
/// Per-evaluation counters: tracked suboperations, recursion depth, and resource tallies.
/// Everything is independently atomic; the enclosing context is responsible for policy.
///
pub struct ExecutionState {
    started_at: Mutex<Instant>,
    operations: AtomicU64,
    recursion_depth: AtomicU32,
    allocated_bytes: AtomicU64,
    mode: Mutex<Mode>,
    exceptions: Mutex<VecDeque<String>>,
}

impl ExecutionState {
    pub fn new() -> ExecutionState {
        ExecutionState {
            started_at: Mutex::new(Instant::now()),
            operations: AtomicU64::new(0),
            recursion_depth: AtomicU32::new(0),
            allocated_bytes: AtomicU64::new(0),
            mode: Mutex::new(Mode::Normal),
            exceptions: Mutex::new(VecDeque::new()),
        }
    }

    pub fn mode(&self) -> Mode {
        *self.mode.lock()
    }

    pub(crate) fn set_mode(&self, mode: Mode) {
        *self.mode.lock() = mode;
    }

    pub fn operation_count(&self) -> u64 {
        self.operations.load(atomic::Ordering::Relaxed)
    }

    pub fn recursion_depth(&self) -> u32 {
        self.recursion_depth.load(atomic::Ordering::Relaxed)
    }

    pub fn allocated_bytes(&self) -> u64 {
        self.allocated_bytes.load(atomic::Ordering::Relaxed)
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.lock().elapsed()
    }

    pub fn exceptions(&self) -> Vec<String> {
        self.exceptions.lock().iter().cloned().collect()
    }

    pub(crate) fn record_exception(&self, message: String) {
        let mut exceptions = self.exceptions.lock();
        if exceptions.len() >= MAX_BUFFERED_EXCEPTIONS {
            exceptions.pop_front();
        }
        exceptions.push_back(message);
    }

    pub(crate) fn enter_operation(&self) {
        self.operations.fetch_add(1, atomic::Ordering::Relaxed);
        self.recursion_depth.fetch_add(1, atomic::Ordering::Relaxed);
    }

    pub(crate) fn exit_operation(&self) {
        self.recursion_depth.fetch_sub(1, atomic::Ordering::Relaxed);
    }

    pub(crate) fn add_allocation(&self, bytes: u64) -> u64 {
        self.allocated_bytes.fetch_add(bytes, atomic::Ordering::Relaxed) + bytes
    }

    ///
    /// Admission check, in a deterministic priority order: evaluation deadline, then memory,
    /// then operation count, then recursion depth. In `Safe` mode every budget is halved; in
    /// `Panic` mode nothing is admitted.
    ///
    pub fn validate_can_proceed(
        &self,
        config: &GuardrailConfig,
        op_name: &str,
    ) -> Result<(), GuardrailError> {
        let mode = self.mode();
        if mode == Mode::Panic {
            log::debug!("Rejecting `{op_name}`: execution is in panic mode");
            return Err(GuardrailError::Cancelled);
        }
        let halved = mode == Mode::Safe;
        let budget_u64 = |v: u64| if halved { v / 2 } else { v };
        let budget_duration = |d: Duration| if halved { d / 2 } else { d };

        let deadline = budget_duration(config.max_evaluation_duration);
        let elapsed = self.elapsed();
        if elapsed > deadline {
            return Err(GuardrailError::Violation {
                limit: Limit::EvaluationDeadline,
                observed: elapsed.as_millis() as u64,
                allowed: deadline.as_millis() as u64,
            });
        }

        let memory_budget = budget_u64(config.max_memory_bytes);
        let allocated = self.allocated_bytes();
        if allocated > memory_budget {
            return Err(GuardrailError::Violation {
                limit: Limit::Memory,
                observed: allocated,
                allowed: memory_budget,
            });
        }

        let operation_budget = budget_u64(config.max_operations_per_evaluation);
        let operations = self.operation_count();
        if operations > operation_budget {
            return Err(GuardrailError::Violation {
                limit: Limit::Operations,
                observed: operations,
                allowed: operation_budget,
            });
        }

        let depth = self.recursion_depth();
        if depth > config.max_recursion_depth {
            return Err(GuardrailError::Violation {
                limit: Limit::Recursion,
                observed: u64::from(depth),
                allowed: u64::from(config.max_recursion_depth),
            });
        }

        Ok(())
    }

    /// Returns the state to `Normal` with zeroed counters and a fresh deadline epoch.
    pub fn reset(&self) {
        *self.started_at.lock() = Instant::now();
        self.operations.store(0, atomic::Ordering::Relaxed);
        self.recursion_depth.store(0, atomic::Ordering::Relaxed);
        self.allocated_bytes.store(0, atomic::Ordering::Relaxed);
        self.set_mode(Mode::Normal);
        self.exceptions.lock().clear();
    }
}
