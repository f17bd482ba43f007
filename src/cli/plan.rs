// src/cli/plan.rs - Dry-run task selection against a library

use std::path::Path;
use std::sync::Arc;

use crate::core::budget::{BudgetController, BudgetLimits};
use crate::core::selector::{SelectionRequest, SelectionResult, TaskSelector};
use crate::infra::config::Config;
use crate::library::TaskLibrary;

/// What to plan and under which ceilings.
#[derive(Debug, Clone, Default)]
pub struct PlanArgs {
    pub pipeline: Option<String>,
    pub lane: Option<String>,
    pub stage: Option<String>,
    pub max_cost: Option<f64>,
    pub max_units: Option<u64>,
    pub completed: Vec<String>,
}

pub fn run_plan(path: &Path, args: &PlanArgs, config: &Config) -> anyhow::Result<()> {
    let library = Arc::new(
        TaskLibrary::load_from(path).map_err(|e| anyhow::anyhow!("{}: {e}", path.display()))?,
    );
    let plan = build_plan(library.clone(), args, config)?;
    print_plan(&library, &plan);
    if let Some(members) = &plan.cycle {
        anyhow::bail!("dependency cycle among: {}", members.join(", "));
    }
    Ok(())
}

/// Resolve the request and ceilings, then select.
pub fn build_plan(
    library: Arc<TaskLibrary>,
    args: &PlanArgs,
    config: &Config,
) -> anyhow::Result<SelectionResult> {
    let (request, declared_limits) = match (&args.pipeline, &args.lane) {
        (Some(id), _) => {
            let pipeline = library
                .pipeline(id)
                .ok_or_else(|| anyhow::anyhow!("pipeline '{id}' not found"))?;
            let request = SelectionRequest::lane(&pipeline.lane)
                .with_stage(pipeline.stage.clone())
                .with_tasks(pipeline.tasks.clone());
            (request, pipeline.limits)
        }
        (None, Some(lane)) => (SelectionRequest::lane(lane).with_stage(args.stage.clone()), None),
        (None, None) => anyhow::bail!("either --pipeline or --lane is required"),
    };

    let mut limits = declared_limits.unwrap_or_else(|| BudgetLimits::from(&config.budget));
    if let Some(cost) = args.max_cost {
        limits.max_total_cost = cost;
    }
    if let Some(units) = args.max_units {
        limits.max_total_units = units;
    }
    limits.validate().map_err(|e| anyhow::anyhow!("invalid limits: {e}"))?;

    // A throwaway ledger gives the selector the same view a real run starts with.
    let ledger = BudgetController::new();
    let state = ledger.init_run("plan", limits)?;

    let selector = TaskSelector::new(library).with_include_experimental(config.selector.include_experimental);
    let plan = selector.select(
        &request
            .with_completed(args.completed.iter().cloned())
            .with_budget(state),
    );
    tracing::debug!(
        selected = plan.selected.len(),
        skipped = plan.skipped.len(),
        "plan built"
    );
    Ok(plan)
}

fn print_plan(library: &TaskLibrary, plan: &SelectionResult) {
    if let Some(members) = &plan.cycle {
        println!("Dependency cycle: {}", members.join(" -> "));
        println!("No tasks would run.");
        return;
    }

    println!("Execution order:");
    for (i, id) in plan.execution_order.iter().enumerate() {
        match library.get_by_id(id) {
            Some(task) => println!(
                "  {:>2}. {:<28} {:<14} {:<8} value/cost {:.2}",
                i + 1,
                id,
                task.executor_kind.as_str(),
                task.criticality.as_str(),
                task.value_cost_ratio()
            ),
            None => println!("  {:>2}. {id}", i + 1),
        }
    }
    if plan.execution_order.is_empty() {
        println!("  (nothing)");
    }

    if !plan.skipped.is_empty() {
        println!();
        println!("Skipped:");
        for s in &plan.skipped {
            println!("  {:<32} {}", s.task_id, s.reason);
        }
    }

    if !plan.unscheduled_blockers.is_empty() {
        println!();
        println!("Blocked: {} (the run would fail)", plan.unscheduled_blockers.join(", "));
    }

    println!();
    println!(
        "Expected: value {:.2}, cost {:.4}, units {}",
        plan.total_expected_value, plan.total_expected_cost, plan.total_expected_units
    );
}
