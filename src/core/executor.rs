// src/core/executor.rs - Single-task execution with gating, validation and degradation
//
// `execute` never fails: every outcome, including a panicking handler, is an
// `ExecutionOutput`, and every attempt leaves exactly one telemetry record.

use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde_json::Value;
use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::budget::{BudgetController, ResourceUsage};
use super::response_cache::ResponseCache;
use super::types::*;
use crate::contract::{SchemaValidator, ValidationReport};
use crate::handler::{HandlerRegistry, HandlerRequest, HandlerResponse};
use crate::library::{DegradationAction, TaskDefinition};
use crate::store::{QuarantineRecord, QuarantineStore, TelemetryRecord, TelemetryStore};

/// Run-level facts the executor needs to decide whether a task can run at all.
#[derive(Debug, Clone, Default)]
pub struct ResourceScope {
    /// Provider sources that failed this run.
    pub failed_resources: HashSet<String>,
    /// Upstream tasks that failed or were skipped this run.
    pub unavailable_dependencies: HashSet<String>,
    pub sources_succeeded: Vec<String>,
    pub sources_failed: Vec<String>,
}

pub struct Executor {
    handlers: Arc<HandlerRegistry>,
    budget: Arc<BudgetController>,
    quarantine: Arc<QuarantineStore>,
    telemetry: Arc<TelemetryStore>,
    cache: Option<Arc<ResponseCache>>,
    validator: SchemaValidator,
}

/// Per-attempt bookkeeping shared by every exit path.
struct Attempt<'a> {
    task: &'a TaskDefinition,
    context: &'a ExecutionContext,
    scope: &'a ResourceScope,
    started_at: DateTime<Utc>,
    clock: Instant,
}

impl Executor {
    pub fn new(
        handlers: Arc<HandlerRegistry>,
        budget: Arc<BudgetController>,
        quarantine: Arc<QuarantineStore>,
        telemetry: Arc<TelemetryStore>,
    ) -> Self {
        Self {
            handlers,
            budget,
            quarantine,
            telemetry,
            cache: None,
            validator: SchemaValidator::new(),
        }
    }

    pub fn with_cache(mut self, cache: Arc<ResponseCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub async fn execute(
        &self,
        task: &TaskDefinition,
        context: &ExecutionContext,
        inputs: TaskInputs,
    ) -> ExecutionOutput {
        self.execute_in(task, context, inputs, &ResourceScope::default())
            .await
    }

    pub async fn execute_in(
        &self,
        task: &TaskDefinition,
        context: &ExecutionContext,
        inputs: TaskInputs,
        scope: &ResourceScope,
    ) -> ExecutionOutput {
        let attempt = Attempt {
            task,
            context,
            scope,
            started_at: Utc::now(),
            clock: Instant::now(),
        };
        let run_id = context.run_id();

        // ─── Resource check ─────────────────────────────────────
        if let Some(problem) = resource_problem(task, &inputs, scope) {
            tracing::warn!(run_id, task_id = %task.id, problem = %problem, "resource failure");
            return self.finish(&attempt, degrade_on_resource_failure(task, problem));
        }

        // ─── Budget gate ────────────────────────────────────────
        let gate = self.budget.check(run_id, task.executor_kind);
        if !gate.allowed {
            let reason = gate.reason.unwrap_or_else(|| "budget_gate_closed".into());
            tracing::info!(
                run_id,
                task_id = %task.id,
                kind = task.executor_kind.as_str(),
                reason = %reason,
                "task blocked by budget gate"
            );
            let mut out = base_output(task, AttemptStatus::Blocked);
            out.error = Some(reason);
            return self.finish(&attempt, out);
        }

        // ─── Cache lookup ───────────────────────────────────────
        let cache_key = self.cache_key(task, context, &inputs);
        if let (Some(cache), Some(key)) = (&self.cache, &cache_key) {
            if let Some(envelope) = cache.get(key) {
                tracing::debug!(run_id, task_id = %task.id, "cache hit");
                let mut out = base_output(task, AttemptStatus::Success);
                out.success = true;
                out.cache_hit = true;
                out.validation_pass = true;
                out.data = Some(envelope);
                return self.finish(&attempt, out);
            }
        }

        // ─── Handler ────────────────────────────────────────────
        let response = self.invoke(task, context, inputs).await;
        let latency_ms = response.latency_ms.unwrap_or_else(|| elapsed_ms(attempt.clock));

        if let Err(e) = self.budget.record_usage(run_id, &response.usage) {
            tracing::warn!(run_id, task_id = %task.id, error = %e, "usage not recorded");
        }

        if !response.success {
            let error = response.error.unwrap_or_else(|| "handler reported failure".into());
            tracing::warn!(run_id, task_id = %task.id, error = %error, "task failed");
            let mut out = base_output(task, AttemptStatus::Failed);
            out.error = Some(error);
            out.raw_output = response.raw_output;
            out.resource_usage = response.usage;
            out.latency_ms = latency_ms;
            return self.finish(&attempt, out);
        }

        // ─── Validation ─────────────────────────────────────────
        let (value, report) = match (response.data, &response.raw_output) {
            (Some(data), _) => {
                let report = self.validator.validate(&task.output_contract, &data);
                (data, report)
            }
            (None, Some(raw)) => {
                let (parsed, report) = self.validator.validate_raw(&task.output_contract, raw);
                (parsed.unwrap_or_else(|| Value::String(raw.clone())), report)
            }
            (None, None) => {
                let report = self.validator.validate(&task.output_contract, &Value::Null);
                (Value::Null, report)
            }
        };

        let mut out = if report.valid {
            let envelope = Envelope::new(&task.output_contract.id, value);
            if let (Some(cache), Some(key), Some(policy)) = (&self.cache, cache_key, &task.cache_policy) {
                cache.put(key, envelope.clone(), Duration::from_secs(policy.ttl_secs));
            }
            let mut out = base_output(task, AttemptStatus::Success);
            out.success = true;
            out.validation_pass = true;
            out.data = Some(envelope);
            out
        } else {
            self.degrade_on_validation_failure(task, context, value, report)
        };
        out.raw_output = response.raw_output;
        out.resource_usage = response.usage;
        out.latency_ms = latency_ms;
        self.finish(&attempt, out)
    }

    async fn invoke(&self, task: &TaskDefinition, context: &ExecutionContext, inputs: TaskInputs) -> HandlerResponse {
        let Some(handler) = self.handlers.resolve(task) else {
            return HandlerResponse::failure(format!(
                "no handler registered for task '{}' or executor kind {}",
                task.id, task.executor_kind
            ));
        };
        let request = HandlerRequest {
            task: task.clone(),
            context: context.clone(),
            inputs,
        };
        match AssertUnwindSafe(handler.handle(request)).catch_unwind().await {
            Ok(response) => response,
            Err(panic) => {
                let msg = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".into());
                tracing::error!(run_id = context.run_id(), task_id = %task.id, panic = %msg, "handler panicked");
                HandlerResponse::failure(format!("handler panicked: {msg}"))
            }
        }
    }

    fn cache_key(&self, task: &TaskDefinition, context: &ExecutionContext, inputs: &TaskInputs) -> Option<String> {
        self.cache.as_ref()?;
        let policy = task.cache_policy.as_ref().filter(|p| p.ttl_secs > 0)?;
        match ResponseCache::cache_key(policy, task, context, inputs) {
            Ok(key) => Some(key),
            Err(e) => {
                tracing::warn!(task_id = %task.id, error = %e, "cache key rendering failed; bypassing cache");
                None
            }
        }
    }

    fn degrade_on_validation_failure(
        &self,
        task: &TaskDefinition,
        context: &ExecutionContext,
        value: Value,
        report: ValidationReport,
    ) -> ExecutionOutput {
        let action = task.degradation_policy.on_validation_failure;
        let record_id = self.quarantine.add(QuarantineRecord {
            id: uuid::Uuid::new_v4().to_string(),
            task_id: task.id.clone(),
            task_version: task.version,
            run_id: context.run_id().to_string(),
            pipeline_id: context.pipeline_id().map(String::from),
            entity_id: context.entity_id().map(String::from),
            contract_id: task.output_contract.id.clone(),
            raw_output: value.clone(),
            validation_errors: report.errors.clone(),
            degradation: action,
            created_at: Utc::now(),
        });
        tracing::warn!(
            run_id = context.run_id(),
            task_id = %task.id,
            quarantine_id = %record_id,
            errors = report.errors.len(),
            action = action.as_str(),
            "output failed contract validation"
        );

        let mut out = match action {
            DegradationAction::Quarantine => {
                let mut out = base_output(task, AttemptStatus::Quarantined);
                out.success = true;
                out.data = Some(Envelope::new(&task.output_contract.id, value));
                out
            }
            DegradationAction::Skip | DegradationAction::SkipWithWarning => {
                let mut out = base_output(task, AttemptStatus::Skipped);
                out.success = true;
                out.skipped = true;
                if action == DegradationAction::SkipWithWarning {
                    out.warnings.push(format!(
                        "output violated contract '{}'; task skipped",
                        task.output_contract.id
                    ));
                }
                out
            }
            DegradationAction::UseFallback => match &task.fallback_output {
                Some(fallback) => {
                    let mut out = base_output(task, AttemptStatus::Quarantined);
                    out.success = true;
                    out.data = Some(Envelope::new(&task.output_contract.id, fallback.clone()));
                    out.warnings.push("output violated contract; fallback used".into());
                    out
                }
                None => validation_failed(task),
            },
            DegradationAction::Fail => validation_failed(task),
        };
        out.validation_errors = report.errors;
        out.degradation = Some(action);
        out
    }

    /// Record telemetry and hand back the finished output.
    fn finish(&self, attempt: &Attempt<'_>, mut out: ExecutionOutput) -> ExecutionOutput {
        if out.latency_ms == 0 && !out.cache_hit {
            out.latency_ms = elapsed_ms(attempt.clock);
        }
        let task = attempt.task;
        let ctx = attempt.context;
        let id = uuid::Uuid::new_v4().to_string();
        out.telemetry_id = Some(id.clone());
        self.telemetry.record(TelemetryRecord {
            id,
            run_id: ctx.run_id().to_string(),
            pipeline_id: ctx.pipeline_id().map(String::from),
            task_id: task.id.clone(),
            task_version: task.version,
            executor_kind: task.executor_kind,
            lane: task.lane.clone(),
            stage: task.stage.clone(),
            entity_id: ctx.entity_id().map(String::from),
            status: out.status,
            success: out.success,
            validation_pass: out.validation_pass,
            error_count: out.validation_errors.len() + usize::from(out.error.is_some()),
            error: out.error.clone(),
            usage: out.resource_usage,
            latency_ms: out.latency_ms,
            started_at: attempt.started_at,
            finished_at: Utc::now(),
            cache_hit: out.cache_hit,
            sources_succeeded: attempt.scope.sources_succeeded.clone(),
            sources_failed: attempt.scope.sources_failed.clone(),
        });
        out
    }
}

fn base_output(task: &TaskDefinition, status: AttemptStatus) -> ExecutionOutput {
    ExecutionOutput {
        task_id: task.id.clone(),
        task_version: task.version,
        status,
        success: false,
        skipped: false,
        cache_hit: false,
        data: None,
        raw_output: None,
        validation_pass: false,
        validation_errors: Vec::new(),
        resource_usage: ResourceUsage::default(),
        latency_ms: 0,
        error: None,
        warnings: Vec::new(),
        degradation: None,
        telemetry_id: None,
    }
}

fn validation_failed(task: &TaskDefinition) -> ExecutionOutput {
    let mut out = base_output(task, AttemptStatus::Failed);
    out.error = Some("validation_failed".into());
    out
}

fn elapsed_ms(clock: Instant) -> u64 {
    u64::try_from(clock.elapsed().as_millis()).unwrap_or(u64::MAX)
}

/// First reason the task cannot run, if any.
fn resource_problem(task: &TaskDefinition, inputs: &TaskInputs, scope: &ResourceScope) -> Option<String> {
    if let Some(res) = task
        .required_resources
        .iter()
        .find(|r| scope.failed_resources.contains(*r))
    {
        return Some(format!("resource_unavailable: {res}"));
    }
    if let Some(dep) = task
        .dependencies
        .iter()
        .find(|d| scope.unavailable_dependencies.contains(*d))
    {
        return Some(format!("dependency_unavailable: {dep}"));
    }
    let missing = task.input_contract.missing(inputs);
    if !missing.is_empty() {
        return Some(format!("missing_inputs: {}", missing.join(", ")));
    }
    None
}

fn degrade_on_resource_failure(task: &TaskDefinition, problem: String) -> ExecutionOutput {
    let action = task.degradation_policy.on_resource_failure;
    let mut out = match (action, &task.fallback_output) {
        (DegradationAction::Skip | DegradationAction::SkipWithWarning, _) => {
            let mut out = base_output(task, AttemptStatus::Skipped);
            out.skipped = true;
            if action == DegradationAction::SkipWithWarning {
                out.warnings.push(format!("skipped: {problem}"));
            }
            out
        }
        (DegradationAction::UseFallback, Some(fallback)) => {
            let mut out = base_output(task, AttemptStatus::Success);
            out.success = true;
            out.validation_pass = true;
            out.data = Some(Envelope::new(&task.output_contract.id, fallback.clone()));
            out.warnings.push(format!("fallback used: {problem}"));
            out
        }
        _ => base_output(task, AttemptStatus::Failed),
    };
    out.error = Some(problem);
    out.degradation = Some(action);
    out
}
