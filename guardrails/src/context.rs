// Copyright 2025 Strobe project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::any::Any;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use cancellation::CancellationToken;
use parking_lot::Mutex;
use perf_monitor::{Metric, OperationId, PerformanceMonitor};
use task_executor::Executor;
use tokio::time::timeout;

use crate::config::{GuardrailConfig, OnViolation};
use crate::error::{GuardrailError, Limit};
use crate::state::{ExecutionState, Mode};

const MAX_PRECONDITION_ENTRIES: usize = 1024;
const MAX_PRECONDITION_VALUE_BYTES: usize = 64 * 1024;
const WARN_PRECONDITION_VALUE_BYTES: usize = 16 * 1024;

///
/// Opaque capability handles passed through to nodes. The engine never interprets them.
///
#[derive(Clone, Default)]
pub struct Capabilities {
    pub render: Option<Arc<dyn Any + Send + Sync>>,
    pub audio: Option<Arc<dyn Any + Send + Sync>>,
    pub resources: Option<Arc<dyn Any + Send + Sync>>,
}

///
/// An RAII handle for one tracked operation. Start and end always refer to the same operation:
/// the scope that began tracking is the only thing that can end it, and it ends on every exit
/// path from the caller's scope.
///
pub struct OperationScope {
    name: String,
    state: Arc<ExecutionState>,
    monitor: PerformanceMonitor,
    op: OperationId,
    failed: bool,
}

impl OperationScope {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mark_failed(&mut self) {
        self.failed = true;
    }
}

impl Drop for OperationScope {
    fn drop(&mut self) {
        self.state.exit_operation();
        self.monitor.operation_finished(self.op, !self.failed);
    }
}

///
/// The outcome of `try_execute_with_error_boundary`: cancellation is reported separately from
/// other failures so callers can decide whether to continue a batch.
///
#[derive(Debug)]
pub enum ErrorBoundary<T> {
    Completed(T),
    Cancelled,
    Failed(GuardrailError),
}

///
/// The delay schedule used by `execute_resilient` between attempts.
///
#[derive(Clone, Copy, Debug)]
pub enum RetryPolicy {
    Linear {
        base: Duration,
    },
    ExponentialBackoff {
        base: Duration,
        factor: f64,
        cap: Duration,
    },
}

impl RetryPolicy {
    /// The delay before the given attempt (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        match *self {
            RetryPolicy::Linear { base } => base * attempt,
            RetryPolicy::ExponentialBackoff { base, factor, cap } => {
                cap.min(base.mul_f64(factor.powi(attempt.saturating_sub(1) as i32)))
            }
        }
    }
}

/// The verdict of `validate_preconditions`.
#[derive(Clone, Debug, Default)]
pub struct PreconditionReport {
    pub passed: bool,
    pub warnings: Vec<String>,
    pub failures: Vec<String>,
}

struct ContextInner {
    config: GuardrailConfig,
    state: Arc<ExecutionState>,
    monitor: PerformanceMonitor,
    token: CancellationToken,
    capabilities: Capabilities,
    last_memory_warning: Mutex<Option<Instant>>,
}

///
/// The guardrailed execution context: composes the configuration, the per-evaluation execution
/// state, the performance monitor, and the shared cancellation token, and wraps every piece of
/// evaluation work with resource, time, and error policies.
///
/// Contexts are cheap to clone. `for_run` derives a child context with fresh state and a fresh
/// token for one top-level evaluation, sharing the configuration and monitor.
///
#[derive(Clone)]
pub struct EvaluationContext {
    inner: Arc<ContextInner>,
}

impl EvaluationContext {
    pub fn new(
        config: GuardrailConfig,
        monitor: PerformanceMonitor,
        capabilities: Capabilities,
    ) -> Result<EvaluationContext, GuardrailError> {
        config.validate()?;
        Ok(EvaluationContext {
            inner: Arc::new(ContextInner {
                config,
                state: Arc::new(ExecutionState::new()),
                monitor,
                token: CancellationToken::new(),
                capabilities,
                last_memory_warning: Mutex::default(),
            }),
        })
    }

    ///
    /// A context with the testing profile and no capability handles, for unit tests.
    ///
    pub fn for_test() -> EvaluationContext {
        Self::new(
            GuardrailConfig::testing(),
            PerformanceMonitor::new(),
            Capabilities::default(),
        )
        .expect("the testing profile is valid")
    }

    pub fn for_test_with_config(config: GuardrailConfig) -> EvaluationContext {
        Self::new(config, PerformanceMonitor::new(), Capabilities::default())
            .expect("test configuration must be valid")
    }

    ///
    /// Derives a context for one top-level evaluation call: fresh counters, fresh deadline
    /// epoch, and a fresh cancellation token, sharing configuration, monitor, and capabilities.
    ///
    pub fn for_run(&self) -> EvaluationContext {
        EvaluationContext {
            inner: Arc::new(ContextInner {
                config: self.inner.config.clone(),
                state: Arc::new(ExecutionState::new()),
                monitor: self.inner.monitor.clone(),
                token: CancellationToken::new(),
                capabilities: self.inner.capabilities.clone(),
                last_memory_warning: Mutex::default(),
            }),
        }
    }

    pub fn config(&self) -> &GuardrailConfig {
        &self.inner.config
    }

    pub fn state(&self) -> &ExecutionState {
        &self.inner.state
    }

    pub fn monitor(&self) -> &PerformanceMonitor {
        &self.inner.monitor
    }

    pub fn token(&self) -> &CancellationToken {
        &self.inner.token
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.inner.capabilities
    }

    pub fn mode(&self) -> Mode {
        self.inner.state.mode()
    }

    /// Returns the state to `Normal` admission with full budgets.
    pub fn reset(&self) {
        self.inner.state.reset();
    }

    ///
    /// Spawns a task that trips this context's token when the evaluation deadline passes. The
    /// task holds only a token clone, so an evaluation that finishes earlier just lets the
    /// trip fall on an abandoned token.
    ///
    pub fn arm_evaluation_deadline(&self, executor: &Executor) {
        let token = self.inner.token.clone();
        let deadline = self.effective_duration(self.inner.config.max_evaluation_duration);
        let _join = executor.native_spawn(async move {
            tokio::time::sleep(deadline).await;
            token.cancel();
        });
    }

    fn effective_duration(&self, d: Duration) -> Duration {
        if self.mode() == Mode::Safe {
            d / 2
        } else {
            d
        }
    }

    fn effective_u64(&self, v: u64) -> u64 {
        if self.mode() == Mode::Safe {
            v / 2
        } else {
            v
        }
    }

    ///
    /// Begins a tracked operation. Prefer the `execute_*` wrappers; this is exposed for callers
    /// that need to attach a scope to a larger region than one closure.
    ///
    pub fn begin_operation(&self, name: &str) -> OperationScope {
        self.inner.state.enter_operation();
        let op = self.inner.monitor.operation_started(name);
        OperationScope {
            name: name.to_owned(),
            state: self.inner.state.clone(),
            monitor: self.inner.monitor.clone(),
            op,
            failed: false,
        }
    }

    ///
    /// Applies the configured violation policy. Returns `Ok(())` when the policy admits
    /// continuing, and the original violation otherwise.
    ///
    fn handle_violation(&self, violation: GuardrailError) -> Result<(), GuardrailError> {
        self.inner
            .monitor
            .increment_counter(Metric::GuardrailViolations, 1);
        self.inner.state.record_exception(violation.to_string());
        if self.inner.config.detailed_violation_logging {
            log::warn!(
                "{violation} [mode: {:?}, operations: {}, allocated: {} bytes, elapsed: {:?}]",
                self.mode(),
                self.inner.state.operation_count(),
                self.inner.state.allocated_bytes(),
                self.inner.state.elapsed(),
            );
        }

        let policy = if self.inner.config.enable_auto_recovery {
            OnViolation::SwitchToSafeMode
        } else {
            self.inner.config.on_violation
        };
        match policy {
            OnViolation::FailFast => {
                self.inner.token.cancel();
                Err(violation)
            }
            OnViolation::LogAndContinue => {
                log::warn!("Continuing past guardrail violation: {violation}");
                Ok(())
            }
            OnViolation::SwitchToSafeMode => match self.mode() {
                Mode::Normal => {
                    log::warn!("Entering safe mode (halved budgets) after: {violation}");
                    self.inner.state.set_mode(Mode::Safe);
                    Ok(())
                }
                Mode::Safe | Mode::Panic => {
                    log::error!("Violation while already degraded; entering panic mode");
                    self.inner.state.set_mode(Mode::Panic);
                    self.inner.token.cancel();
                    Err(violation)
                }
            },
        }
    }

    ///
    /// The cooperative checkpoint: fails with `Cancelled` once the token has tripped, and
    /// otherwise applies the limit checks (and, on a violation, the configured policy).
    ///
    pub fn validate_can_proceed(&self, op_name: &str) -> Result<(), GuardrailError> {
        self.inner.token.err_if_cancelled()?;
        match self
            .inner
            .state
            .validate_can_proceed(&self.inner.config, op_name)
        {
            Ok(()) => Ok(()),
            Err(violation) => self.handle_violation(violation),
        }
    }

    ///
    /// Runs a synchronous operation inside a tracked scope: push the operation, validate
    /// limits, run, always pop. A run that overshoots the per-operation deadline is reported
    /// through the violation policy after the fact (synchronous work cannot be interrupted).
    ///
    pub fn execute_with_guardrails<T>(
        &self,
        name: &str,
        op: impl FnOnce() -> Result<T, GuardrailError>,
    ) -> Result<T, GuardrailError> {
        let mut scope = self.begin_operation(name);
        if let Err(err) = self.validate_can_proceed(name) {
            scope.mark_failed();
            return Err(err);
        }

        let started = Instant::now();
        let result = op();
        let elapsed = started.elapsed();

        let deadline = self.effective_duration(self.inner.config.max_operation_duration);
        if elapsed > deadline {
            scope.mark_failed();
            self.handle_violation(GuardrailError::Violation {
                limit: Limit::OperationDeadline,
                observed: elapsed.as_millis() as u64,
                allowed: deadline.as_millis() as u64,
            })?;
        }
        if result.is_err() {
            scope.mark_failed();
        }
        result
    }

    ///
    /// The async variant: the operation races the shared cancellation token and the
    /// per-operation deadline. A deadline overrun or trip of the token yields `Cancelled`; the
    /// abandoned work runs to completion on its executor and its result is discarded.
    ///
    pub async fn execute_with_guardrails_async<T>(
        &self,
        name: &str,
        op: impl Future<Output = Result<T, GuardrailError>>,
    ) -> Result<T, GuardrailError> {
        let mut scope = self.begin_operation(name);
        if let Err(err) = self.validate_can_proceed(name) {
            scope.mark_failed();
            return Err(err);
        }

        let deadline = self.effective_duration(self.inner.config.max_operation_duration);
        let result = tokio::select! {
            _ = self.inner.token.cancelled() => Err(GuardrailError::Cancelled),
            timed = timeout(deadline, op) => match timed {
                Ok(result) => result,
                Err(_) => {
                    let violation = GuardrailError::Violation {
                        limit: Limit::OperationDeadline,
                        observed: deadline.as_millis() as u64,
                        allowed: deadline.as_millis() as u64,
                    };
                    self.inner
                        .monitor
                        .increment_counter(Metric::GuardrailViolations, 1);
                    self.inner.state.record_exception(violation.to_string());
                    log::warn!("Operation `{name}` exceeded its deadline: {violation}");
                    // The operation's work is lost either way, so the policy cannot admit it.
                    Err(GuardrailError::Cancelled)
                }
            },
        };
        if result.is_err() {
            scope.mark_failed();
        }
        result
    }

    ///
    /// Runs an operation, converting its outcome into an explicit boundary value: cancellation
    /// is distinguished from other failures, and neither propagates.
    ///
    pub fn try_execute_with_error_boundary<T>(
        &self,
        name: &str,
        op: impl FnOnce() -> Result<T, GuardrailError>,
    ) -> ErrorBoundary<T> {
        match self.execute_with_guardrails(name, op) {
            Ok(value) => ErrorBoundary::Completed(value),
            Err(GuardrailError::Cancelled) => ErrorBoundary::Cancelled,
            Err(err) => ErrorBoundary::Failed(err),
        }
    }

    ///
    /// Tracks an allocation against the memory budget. A single allocation above the configured
    /// bound is rejected (and not tallied); crossing the warning threshold emits at most one
    /// warning per `performance_warning_interval`, or fails in strict mode. The hard budget is
    /// enforced by the next `validate_can_proceed`.
    ///
    pub fn track_resource_allocation(
        &self,
        kind: &str,
        bytes: u64,
    ) -> Result<(), GuardrailError> {
        let single_budget = self.effective_u64(self.inner.config.max_single_allocation_bytes);
        if bytes > single_budget {
            return self.handle_violation(GuardrailError::Violation {
                limit: Limit::SingleAllocation,
                observed: bytes,
                allowed: single_budget,
            });
        }

        let total = self.inner.state.add_allocation(bytes);
        self.inner
            .monitor
            .increment_counter(Metric::AllocationsTracked, 1);

        let memory_budget = self.effective_u64(self.inner.config.max_memory_bytes);
        let fraction = total as f64 / memory_budget as f64;
        if fraction >= self.inner.config.memory_warning_threshold {
            if self.inner.config.strict_mode {
                return self.handle_violation(GuardrailError::Violation {
                    limit: Limit::Memory,
                    observed: total,
                    allowed: memory_budget,
                });
            }
            let mut last = self.inner.last_memory_warning.lock();
            let due = last.is_none_or(|at| {
                at.elapsed() >= self.inner.config.performance_warning_interval
            });
            if due {
                log::warn!(
                    "Tracked memory for `{kind}` at {:.0}% of budget ({total} of {memory_budget} bytes)",
                    fraction * 100.0
                );
                *last = Some(Instant::now());
            }
        }
        Ok(())
    }

    ///
    /// Applies the configured input checks (entry count, value size, forbidden content) and
    /// returns a structured verdict. In strict mode, failures (including elevated warnings) are
    /// returned as an error instead.
    ///
    pub fn validate_preconditions<'a>(
        &self,
        entries: impl IntoIterator<Item = (&'a str, &'a str)>,
    ) -> Result<PreconditionReport, GuardrailError> {
        if !self.inner.config.enable_precondition_validation {
            return Ok(PreconditionReport {
                passed: true,
                ..PreconditionReport::default()
            });
        }

        let mut warnings = Vec::new();
        let mut failures = Vec::new();
        let mut count = 0_usize;
        for (name, value) in entries {
            count += 1;
            if name.is_empty() {
                failures.push("input with an empty name".to_owned());
            }
            if value.len() > MAX_PRECONDITION_VALUE_BYTES {
                failures.push(format!(
                    "input `{name}` is {} bytes (limit {MAX_PRECONDITION_VALUE_BYTES})",
                    value.len()
                ));
            } else if value.len() > WARN_PRECONDITION_VALUE_BYTES {
                warnings.push(format!("input `{name}` is large ({} bytes)", value.len()));
            }
            if value.contains('\0') {
                failures.push(format!("input `{name}` contains a NUL byte"));
            }
        }
        if count > MAX_PRECONDITION_ENTRIES {
            failures.push(format!(
                "{count} inputs exceed the limit of {MAX_PRECONDITION_ENTRIES}"
            ));
        }

        if self.inner.config.strict_mode {
            failures.extend(warnings.drain(..));
        }
        if !failures.is_empty() {
            self.inner
                .monitor
                .increment_counter(Metric::PreconditionFailures, 1);
        }

        let report = PreconditionReport {
            passed: failures.is_empty(),
            warnings,
            failures,
        };
        if self.inner.config.strict_mode && !report.passed {
            return Err(GuardrailError::PreconditionFailed {
                failures: report.failures,
            });
        }
        Ok(report)
    }

    ///
    /// Retry wrapper around `execute_with_guardrails_async`. Only retryable failures (see
    /// `GuardrailError::is_retryable`) are retried; each attempt runs in a fresh operation
    /// scope, with the policy's delay between attempts.
    ///
    pub async fn execute_resilient<T, F, Fut>(
        &self,
        name: &str,
        max_retries: u32,
        policy: RetryPolicy,
        mut op: F,
    ) -> Result<T, GuardrailError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, GuardrailError>>,
    {
        let mut attempt = 0;
        loop {
            match self.execute_with_guardrails_async(name, op()).await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt < max_retries => {
                    attempt += 1;
                    self.inner
                        .monitor
                        .increment_counter(Metric::RetriesAttempted, 1);
                    let delay = policy.delay(attempt);
                    log::debug!(
                        "Retrying `{name}` in {delay:?} after: {err} (attempt {attempt}/{max_retries})"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
