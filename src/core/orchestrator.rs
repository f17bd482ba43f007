// src/core/orchestrator.rs - Pipeline runs: select, fetch, execute, account

use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use super::budget::{BudgetController, BudgetLimits};
use super::executor::{Executor, ResourceScope};
use super::response_cache::ResponseCache;
use super::selector::{SelectionRequest, TaskSelector};
use super::types::*;
use crate::handler::{DataProvider, HandlerRegistry, NullDataProvider, ProviderData};
use crate::infra::config::Config;
use crate::infra::errors::TollgateError;
use crate::library::TaskLibrary;
use crate::store::{QuarantineStats, QuarantineStore, TelemetryStats, TelemetryStore};

#[derive(Debug, Clone, Serialize)]
pub struct OrchestratorStats {
    pub telemetry: TelemetryStats,
    pub quarantine: QuarantineStats,
    pub active_budgets: usize,
    pub library_task_count: usize,
}

/// Composition root for pipeline execution.
///
/// Every collaborator is an explicit, shared instance; swap any of them with
/// the `with_*` builders. Independent runs may execute concurrently through a
/// shared `&Orchestrator`; tasks inside one run are strictly sequential.
pub struct Orchestrator {
    library: Arc<TaskLibrary>,
    selector: TaskSelector,
    handlers: Arc<HandlerRegistry>,
    provider: Arc<dyn DataProvider>,
    budget: Arc<BudgetController>,
    quarantine: Arc<QuarantineStore>,
    telemetry: Arc<TelemetryStore>,
    cache: Option<Arc<ResponseCache>>,
    config: Config,
    on_progress: Option<Box<dyn Fn(ProgressEvent) + Send + Sync>>,
}

impl Orchestrator {
    pub fn new(library: Arc<TaskLibrary>, handlers: HandlerRegistry, config: Config) -> Self {
        let cache = config
            .cache
            .enabled
            .then(|| Arc::new(ResponseCache::new(config.cache.max_entries)));
        Self {
            selector: TaskSelector::new(library.clone())
                .with_include_experimental(config.selector.include_experimental),
            library,
            handlers: Arc::new(handlers),
            provider: Arc::new(NullDataProvider),
            budget: Arc::new(BudgetController::new()),
            quarantine: Arc::new(QuarantineStore::new(config.quarantine.capacity)),
            telemetry: Arc::new(TelemetryStore::new()),
            cache,
            config,
            on_progress: None,
        }
    }

    pub fn with_data_provider(mut self, provider: Arc<dyn DataProvider>) -> Self {
        self.provider = provider;
        self
    }

    pub fn with_quarantine(mut self, quarantine: Arc<QuarantineStore>) -> Self {
        self.quarantine = quarantine;
        self
    }

    pub fn with_telemetry(mut self, telemetry: Arc<TelemetryStore>) -> Self {
        self.telemetry = telemetry;
        self
    }

    pub fn with_budget_controller(mut self, budget: Arc<BudgetController>) -> Self {
        self.budget = budget;
        self
    }

    pub fn with_cache(mut self, cache: Option<Arc<ResponseCache>>) -> Self {
        self.cache = cache;
        self
    }

    /// Set a callback for run and task lifecycle events.
    pub fn with_progress(mut self, cb: impl Fn(ProgressEvent) + Send + Sync + 'static) -> Self {
        self.on_progress = Some(Box::new(cb));
        self
    }

    fn emit(&self, event: ProgressEvent) {
        if let Some(ref cb) = self.on_progress {
            cb(event);
        }
    }

    pub fn library(&self) -> &Arc<TaskLibrary> {
        &self.library
    }

    pub fn budget(&self) -> &Arc<BudgetController> {
        &self.budget
    }

    pub fn quarantine(&self) -> &Arc<QuarantineStore> {
        &self.quarantine
    }

    pub fn telemetry(&self) -> &Arc<TelemetryStore> {
        &self.telemetry
    }

    pub fn selector(&self) -> &TaskSelector {
        &self.selector
    }

    fn executor(&self) -> Executor {
        let executor = Executor::new(
            self.handlers.clone(),
            self.budget.clone(),
            self.quarantine.clone(),
            self.telemetry.clone(),
        );
        match &self.cache {
            Some(cache) => executor.with_cache(cache.clone()),
            None => executor,
        }
    }

    fn default_limits(&self) -> BudgetLimits {
        BudgetLimits::from(&self.config.budget)
    }

    /// Pre-flight checks. Fails on invalid default limits; warns about
    /// pipelines that can never run and tasks with no handler.
    pub fn initialize(&self) -> Result<(), TollgateError> {
        self.default_limits()
            .validate()
            .map_err(|reason| TollgateError::Config(format!("default budget limits: {reason}")))?;

        for pipeline in self.library.pipelines() {
            let plan = self.selector.select(
                &SelectionRequest::lane(&pipeline.lane)
                    .with_stage(pipeline.stage.clone())
                    .with_tasks(pipeline.tasks.clone()),
            );
            if let Some(members) = &plan.cycle {
                tracing::warn!(pipeline = %pipeline.id, members = ?members, "pipeline contains a dependency cycle");
            }
        }

        let unhandled: Vec<&str> = self
            .library
            .query(&Default::default())
            .into_iter()
            .filter(|t| self.handlers.resolve(t).is_none())
            .map(|t| t.id.as_str())
            .collect();
        if !unhandled.is_empty() {
            tracing::warn!(tasks = ?unhandled, "tasks without a registered handler");
        }

        let stats = self.library.stats();
        tracing::info!(
            tasks = stats.distinct_ids,
            pipelines = stats.pipeline_count,
            handlers = self.handlers.len(),
            "orchestrator initialized"
        );
        Ok(())
    }

    /// Run a pipeline end to end. Never returns an error; failures are in the result.
    pub async fn execute_pipeline(&self, pipeline_id: &str, context: &ExecutionContext) -> OrchestrationResult {
        let run_id = context.run_id().to_string();
        let clock = Instant::now();

        let Some(pipeline) = self.library.pipeline(pipeline_id) else {
            tracing::error!(run_id = %run_id, pipeline_id, "unknown pipeline");
            return OrchestrationResult::failed(
                &run_id,
                pipeline_id,
                TollgateError::PipelineNotFound(pipeline_id.to_string()).to_string(),
            );
        };

        let mut ctx = context.clone();
        if ctx.pipeline_id().is_none() {
            ctx = ctx.with_pipeline(pipeline_id);
        }
        if ctx.lane().is_none() {
            ctx = ctx.with_lane(&pipeline.lane);
        }
        if ctx.stage().is_none() {
            if let Some(stage) = &pipeline.stage {
                ctx = ctx.with_stage(stage);
            }
        }

        let limits = pipeline.limits.unwrap_or_else(|| self.default_limits());
        let initial = match self.budget.init_run(&run_id, limits) {
            Ok(state) => state,
            Err(e) => {
                tracing::error!(run_id = %run_id, error = %e, "cannot open budget ledger");
                return OrchestrationResult::failed(&run_id, pipeline_id, e.to_string());
            }
        };

        let selection = self.selector.select(
            &SelectionRequest::lane(&pipeline.lane)
                .with_stage(pipeline.stage.clone())
                .with_tasks(pipeline.tasks.clone())
                .with_budget(initial),
        );

        let mut result = OrchestrationResult::new(&run_id, pipeline_id);

        if let Some(members) = &selection.cycle {
            result.error = Some(TollgateError::DependencyCycle(members.clone()).to_string());
            result.budget_state = self.budget.finalize_run(&run_id).ok();
            result.selection = Some(selection);
            result.total_latency_ms = elapsed_ms(clock);
            return result;
        }

        if let Some(blocker) = selection.unscheduled_blockers.first() {
            let reason = selection
                .skip_reason(blocker)
                .map(ToString::to_string)
                .unwrap_or_default();
            tracing::error!(run_id = %run_id, pipeline_id, task_id = %blocker, reason = %reason, "blocker cannot be scheduled");
            result.error = Some(format!("blocker task '{blocker}' cannot be scheduled: {reason}"));
            result.budget_state = self.budget.finalize_run(&run_id).ok();
            result.selection = Some(selection);
            result.total_latency_ms = elapsed_ms(clock);
            return result;
        }

        self.emit(ProgressEvent::RunStarted {
            run_id: run_id.clone(),
            pipeline_id: pipeline_id.to_string(),
            planned: selection.execution_order.len(),
        });
        tracing::info!(
            run_id = %run_id,
            pipeline_id,
            planned = selection.execution_order.len(),
            skipped = selection.skipped.len(),
            "pipeline run started"
        );

        let provided = self.provider.fetch(&ctx).await;
        let mut scope = scope_from(&provided);
        result.sources_succeeded = scope.sources_succeeded.clone();
        result.sources_failed = scope.sources_failed.clone();

        let executor = self.executor();
        let mut outputs: BTreeMap<String, ExecutionOutput> = BTreeMap::new();
        let mut telemetry_ids: HashSet<String> = HashSet::new();
        let mut success = true;

        for task_id in &selection.execution_order {
            let Some(task) = self.library.get_by_id(task_id) else {
                continue;
            };

            let mut inputs = provided.data.clone();
            scope.unavailable_dependencies.clear();
            for dep in &task.dependencies {
                match outputs.get(dep) {
                    Some(out) if out.success && !out.skipped => {
                        if let Some(payload) = out.payload() {
                            inputs.insert(dep.clone(), payload.clone());
                        }
                    }
                    Some(_) => {
                        scope.unavailable_dependencies.insert(dep.clone());
                    }
                    // Completed in an earlier run; nothing to materialize.
                    None => {}
                }
            }

            self.emit(ProgressEvent::TaskStarted {
                run_id: run_id.clone(),
                task_id: task_id.clone(),
            });
            let out = executor.execute_in(task, &ctx, inputs, &scope).await;
            self.emit(ProgressEvent::TaskFinished {
                run_id: run_id.clone(),
                task_id: task_id.clone(),
                status: out.status,
            });

            let halt = task.is_blocker() && !out.success;
            telemetry_ids.extend(out.telemetry_id.clone());
            outputs.insert(task_id.clone(), out);
            if halt {
                success = false;
                result.error = Some(format!("blocker task '{task_id}' failed"));
                tracing::warn!(run_id = %run_id, task_id = %task_id, "blocker failed; halting run");
                self.emit(ProgressEvent::RunHalted {
                    run_id: run_id.clone(),
                    task_id: task_id.clone(),
                });
                break;
            }
        }

        result.success = success;
        result.outputs = outputs;
        result.budget_state = self.budget.finalize_run(&run_id).ok();
        result.telemetry = self
            .telemetry
            .get_by_run(&run_id)
            .into_iter()
            .filter(|r| telemetry_ids.contains(&r.id))
            .collect();
        result.selection = Some(selection);
        result.total_latency_ms = elapsed_ms(clock);

        tracing::info!(
            run_id = %run_id,
            pipeline_id,
            success,
            executed = result.outputs.len(),
            latency_ms = result.total_latency_ms,
            "pipeline run finished"
        );
        self.emit(ProgressEvent::RunFinished {
            run_id: run_id.clone(),
            success,
        });
        result
    }

    /// Run one task outside a pipeline. Opens (and closes) an ad-hoc budget
    /// ledger when the context's run has none.
    pub async fn execute_task(
        &self,
        task_id: &str,
        context: &ExecutionContext,
        extra_inputs: TaskInputs,
    ) -> ExecutionOutput {
        let Some(task) = self.library.get_by_id(task_id) else {
            tracing::error!(run_id = context.run_id(), task_id, "unknown task");
            return ExecutionOutput::not_run(task_id, TollgateError::TaskNotFound(task_id.to_string()).to_string());
        };

        let run_id = context.run_id();
        let ad_hoc = !self.budget.is_active(run_id);
        if ad_hoc {
            if let Err(e) = self.budget.init_run(run_id, self.default_limits()) {
                tracing::warn!(run_id, error = %e, "ad-hoc ledger not opened");
            }
        }

        let provided = self.provider.fetch(context).await;
        let scope = scope_from(&provided);
        let mut inputs = provided.data;
        inputs.extend(extra_inputs);

        let out = self.executor().execute_in(task, context, inputs, &scope).await;

        if ad_hoc {
            if let Err(e) = self.budget.finalize_run(run_id) {
                tracing::warn!(run_id, error = %e, "ad-hoc ledger not finalized");
            }
        }
        out
    }

    pub fn get_stats(&self) -> OrchestratorStats {
        OrchestratorStats {
            telemetry: self.telemetry.get_stats(),
            quarantine: self.quarantine.get_stats(),
            active_budgets: self.budget.active_runs().len(),
            library_task_count: self.library.task_count(),
        }
    }
}

fn elapsed_ms(clock: Instant) -> u64 {
    u64::try_from(clock.elapsed().as_millis()).unwrap_or(u64::MAX)
}

fn scope_from(provided: &ProviderData) -> ResourceScope {
    ResourceScope {
        failed_resources: provided
            .failed_sources
            .iter()
            .map(|f| f.source.clone())
            .collect::<HashSet<_>>(),
        unavailable_dependencies: HashSet::new(),
        sources_succeeded: provided.succeeded_sources.clone(),
        sources_failed: provided.failed_source_names(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::{FnHandler, HandlerResponse, StaticDataProvider};
    use crate::library::{Criticality, ExecutorKind, PipelineDefinition, TaskDefinition};
    use serde_json::json;
    use std::sync::Mutex;

    fn pipeline(id: &str, tasks: Option<Vec<&str>>) -> PipelineDefinition {
        PipelineDefinition {
            id: id.into(),
            lane: "lane_a".into(),
            stage: None,
            tasks: tasks.map(|t| t.into_iter().map(String::from).collect()),
            limits: None,
        }
    }

    fn echo_registry() -> HandlerRegistry {
        HandlerRegistry::new()
            .with_kind(
                ExecutorKind::RemoteCall,
                Arc::new(FnHandler::new(|req| {
                    HandlerResponse::ok(json!({"task": req.task_id(), "inputs": req.inputs.len()}))
                        .with_usage(10, 10, 0.01)
                })),
            )
            .with_kind(
                ExecutorKind::LocalFunction,
                Arc::new(FnHandler::new(|req| HandlerResponse::ok(json!({"task": req.task_id()})))),
            )
    }

    fn library() -> Arc<TaskLibrary> {
        Arc::new(
            TaskLibrary::from_definitions(
                vec![
                    TaskDefinition::new("fetch", "lane_a", ExecutorKind::RemoteCall)
                        .with_criticality(Criticality::Blocker)
                        .with_budget(100, 0.1),
                    TaskDefinition::new("summarize", "lane_a", ExecutorKind::LocalFunction)
                        .with_dependencies(&["fetch"]),
                ],
                vec![pipeline("daily", None)],
            )
            .unwrap(),
        )
    }

    #[tokio::test]
    async fn test_pipeline_runs_in_dependency_order() {
        let orch = Orchestrator::new(library(), echo_registry(), Config::default());
        orch.initialize().unwrap();
        let result = orch
            .execute_pipeline("daily", &ExecutionContext::for_run("r1"))
            .await;
        assert!(result.success, "{:?}", result.error);
        assert_eq!(result.outputs.len(), 2);
        let order: Vec<_> = result.telemetry.iter().map(|t| t.task_id.as_str()).collect();
        assert_eq!(order, vec!["fetch", "summarize"]);
        let state = result.budget_state.unwrap();
        assert_eq!(state.total_units_used, 20);
        assert!(orch.budget().active_runs().is_empty());
    }

    #[tokio::test]
    async fn test_dependency_payload_is_an_input() {
        let seen = Arc::new(Mutex::new(None));
        let seen_clone = seen.clone();
        let handlers = echo_registry().with_task(
            "summarize",
            Arc::new(FnHandler::new(move |req| {
                *seen_clone.lock().unwrap() = req.input("fetch").cloned();
                HandlerResponse::ok(json!({}))
            })),
        );
        let orch = Orchestrator::new(library(), handlers, Config::default());
        orch.execute_pipeline("daily", &ExecutionContext::new()).await;
        let got = seen.lock().unwrap().clone().unwrap();
        assert_eq!(got["task"], json!("fetch"));
    }

    #[tokio::test]
    async fn test_unknown_pipeline_is_reported_not_raised() {
        let orch = Orchestrator::new(library(), echo_registry(), Config::default());
        let result = orch.execute_pipeline("nope", &ExecutionContext::new()).await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("nope"));
        assert!(result.outputs.is_empty());
    }

    #[tokio::test]
    async fn test_reused_run_id_rejected() {
        let orch = Orchestrator::new(library(), echo_registry(), Config::default());
        orch.budget().init_run("busy", BudgetLimits::default()).unwrap();
        let result = orch.execute_pipeline("daily", &ExecutionContext::for_run("busy")).await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("already active"));
    }

    #[tokio::test]
    async fn test_failed_provider_source_reported() {
        let provider = StaticDataProvider::new(
            ProviderData::default()
                .with_source("prices", json!([1, 2]))
                .with_failed_source("news", "timeout"),
        );
        let orch = Orchestrator::new(library(), echo_registry(), Config::default())
            .with_data_provider(Arc::new(provider));
        let result = orch.execute_pipeline("daily", &ExecutionContext::new()).await;
        assert_eq!(result.sources_succeeded, vec!["prices".to_string()]);
        assert_eq!(result.sources_failed, vec!["news".to_string()]);
        assert_eq!(result.telemetry[0].sources_failed, vec!["news".to_string()]);
    }

    #[tokio::test]
    async fn test_execute_task_opens_ad_hoc_ledger() {
        let orch = Orchestrator::new(library(), echo_registry(), Config::default());
        let mut extra = TaskInputs::new();
        extra.insert("symbol".into(), json!("ACME"));
        let out = orch
            .execute_task("fetch", &ExecutionContext::for_run("solo"), extra)
            .await;
        assert!(out.success);
        assert_eq!(out.payload().unwrap()["inputs"], json!(1));
        assert!(!orch.budget().is_active("solo"));

        let missing = orch.execute_task("ghost", &ExecutionContext::new(), TaskInputs::new()).await;
        assert!(!missing.success);
    }

    #[tokio::test]
    async fn test_progress_events() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let orch = Orchestrator::new(library(), echo_registry(), Config::default())
            .with_progress(move |e| sink.lock().unwrap().push(e));
        orch.execute_pipeline("daily", &ExecutionContext::for_run("r1")).await;
        let events = events.lock().unwrap();
        assert!(matches!(events.first(), Some(ProgressEvent::RunStarted { planned: 2, .. })));
        assert!(matches!(events.last(), Some(ProgressEvent::RunFinished { success: true, .. })));
    }

    #[tokio::test]
    async fn test_stats() {
        let orch = Orchestrator::new(library(), echo_registry(), Config::default());
        orch.execute_pipeline("daily", &ExecutionContext::new()).await;
        let stats = orch.get_stats();
        assert_eq!(stats.telemetry.total, 2);
        assert_eq!(stats.library_task_count, 2);
        assert_eq!(stats.active_budgets, 0);
    }

    #[test]
    fn test_elapsed_ms_measures_wall_clock() {
        assert!(elapsed_ms(Instant::now()) < 1_000);
        if let Some(earlier) = Instant::now().checked_sub(std::time::Duration::from_millis(1_500)) {
            assert!(elapsed_ms(earlier) >= 1_500);
        }
    }
}
