// Copyright 2025 Strobe project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::time::Duration;

use crate::error::GuardrailError;

const MIB: u64 = 1024 * 1024;

///
/// What the context does when a guardrail is violated.
///
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OnViolation {
    /// Trip the cancellation token and fail the current operation.
    FailFast,
    /// Record and log the violation, but let the operation proceed.
    LogAndContinue,
    /// Enter `Mode::Safe` (halved budgets) and let the operation proceed. A second violation
    /// while already in safe mode escalates to `Mode::Panic` and fails.
    SwitchToSafeMode,
}

///
/// The named limits and thresholds enforced around every evaluation. Profiles are fixed points
/// in this space; a hand-built configuration must pass `validate` before use.
///
#[derive(Clone, Debug)]
pub struct GuardrailConfig {
    /// Wall-clock deadline for one top-level evaluation call.
    pub max_evaluation_duration: Duration,
    /// Deadline for a single node evaluation or tracked suboperation.
    pub max_operation_duration: Duration,
    /// Budget for the sum of tracked allocations.
    pub max_memory_bytes: u64,
    /// A single tracked allocation above this size is rejected outright.
    pub max_single_allocation_bytes: u64,
    /// Upper bound on tracked suboperations per evaluation.
    pub max_operations_per_evaluation: u64,
    /// Upper bound on re-entrant guardrail scopes.
    pub max_recursion_depth: u32,
    /// Advisory CPU target; sampling above it emits warnings only.
    pub max_cpu_percent: f64,
    /// Fraction of `max_memory_bytes` at which a warning is emitted.
    pub memory_warning_threshold: f64,
    /// Minimum gap between emitted warnings.
    pub performance_warning_interval: Duration,
    pub enable_precondition_validation: bool,
    /// Warnings become errors.
    pub strict_mode: bool,
    pub detailed_violation_logging: bool,
    /// Overrides `on_violation` with `SwitchToSafeMode`.
    pub enable_auto_recovery: bool,
    pub on_violation: OnViolation,
}

impl GuardrailConfig {
    pub fn default_profile() -> GuardrailConfig {
        GuardrailConfig {
            max_evaluation_duration: Duration::from_secs(30),
            max_operation_duration: Duration::from_secs(5),
            max_memory_bytes: 512 * MIB,
            max_single_allocation_bytes: 64 * MIB,
            max_operations_per_evaluation: 100_000,
            max_recursion_depth: 64,
            max_cpu_percent: 80.0,
            memory_warning_threshold: 0.8,
            performance_warning_interval: Duration::from_secs(5),
            enable_precondition_validation: true,
            strict_mode: false,
            detailed_violation_logging: false,
            enable_auto_recovery: false,
            on_violation: OnViolation::FailFast,
        }
    }

    /// Tight limits and strict mode, for test suites.
    pub fn testing() -> GuardrailConfig {
        GuardrailConfig {
            max_evaluation_duration: Duration::from_secs(2),
            max_operation_duration: Duration::from_millis(250),
            max_memory_bytes: 64 * MIB,
            max_single_allocation_bytes: 8 * MIB,
            max_operations_per_evaluation: 10_000,
            max_recursion_depth: 16,
            max_cpu_percent: 50.0,
            memory_warning_threshold: 0.5,
            performance_warning_interval: Duration::from_secs(1),
            enable_precondition_validation: true,
            strict_mode: true,
            detailed_violation_logging: true,
            enable_auto_recovery: false,
            on_violation: OnViolation::FailFast,
        }
    }

    /// Loose limits with validation off, for saturated render loops.
    pub fn performance() -> GuardrailConfig {
        GuardrailConfig {
            max_evaluation_duration: Duration::from_secs(120),
            max_operation_duration: Duration::from_secs(30),
            max_memory_bytes: 2048 * MIB,
            max_single_allocation_bytes: 256 * MIB,
            max_operations_per_evaluation: 10_000_000,
            max_recursion_depth: 128,
            max_cpu_percent: 95.0,
            memory_warning_threshold: 0.95,
            performance_warning_interval: Duration::from_secs(30),
            enable_precondition_validation: false,
            strict_mode: false,
            detailed_violation_logging: false,
            enable_auto_recovery: false,
            on_violation: OnViolation::LogAndContinue,
        }
    }

    /// Moderate limits with verbose diagnostics and auto-recovery.
    pub fn development() -> GuardrailConfig {
        GuardrailConfig {
            max_evaluation_duration: Duration::from_secs(60),
            max_operation_duration: Duration::from_secs(10),
            max_memory_bytes: 1024 * MIB,
            max_single_allocation_bytes: 128 * MIB,
            max_operations_per_evaluation: 1_000_000,
            max_recursion_depth: 64,
            max_cpu_percent: 85.0,
            memory_warning_threshold: 0.75,
            performance_warning_interval: Duration::from_secs(2),
            enable_precondition_validation: true,
            strict_mode: false,
            detailed_violation_logging: true,
            enable_auto_recovery: true,
            on_violation: OnViolation::SwitchToSafeMode,
        }
    }

    pub fn validate(&self) -> Result<(), GuardrailError> {
        let invalid = |msg: String| Err(GuardrailError::ConfigurationInvalid(msg));
        if self.max_evaluation_duration.is_zero() {
            return invalid("max_evaluation_duration must be positive".to_owned());
        }
        if self.max_operation_duration.is_zero() {
            return invalid("max_operation_duration must be positive".to_owned());
        }
        if self.performance_warning_interval.is_zero() {
            return invalid("performance_warning_interval must be positive".to_owned());
        }
        if self.max_single_allocation_bytes > self.max_memory_bytes {
            return invalid(format!(
                "max_single_allocation_bytes ({}) exceeds max_memory_bytes ({})",
                self.max_single_allocation_bytes, self.max_memory_bytes
            ));
        }
        if self.max_operations_per_evaluation == 0 {
            return invalid("max_operations_per_evaluation must be positive".to_owned());
        }
        if self.max_recursion_depth == 0 {
            return invalid("max_recursion_depth must be positive".to_owned());
        }
        if !(0.0..=1.0).contains(&self.memory_warning_threshold) {
            return invalid(format!(
                "memory_warning_threshold must be within [0, 1], got {}",
                self.memory_warning_threshold
            ));
        }
        if !(0.0..=100.0).contains(&self.max_cpu_percent) || self.max_cpu_percent == 0.0 {
            return invalid(format!(
                "max_cpu_percent must be within (0, 100], got {}",
                self.max_cpu_percent
            ));
        }
        Ok(())
    }
}

impl Default for GuardrailConfig {
    fn default() -> Self {
        Self::default_profile()
    }
}
