// src/library/types.rs - Task and pipeline definition types

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::contract::{InputContract, OutputContract};
use crate::core::budget::BudgetLimits;

pub type TaskId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutorKind {
    RemoteCall,
    LocalFunction,
    Hybrid,
}

impl ExecutorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RemoteCall => "remote_call",
            Self::LocalFunction => "local_function",
            Self::Hybrid => "hybrid",
        }
    }

    /// Remote and hybrid tasks consume external resources and need the heavy gate.
    pub fn is_heavy(&self) -> bool {
        !matches!(self, Self::LocalFunction)
    }
}

impl std::fmt::Display for ExecutorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Criticality {
    /// Failure halts the rest of the run.
    Blocker,
    #[default]
    Optional,
}

impl Criticality {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Blocker => "blocker",
            Self::Optional => "optional",
        }
    }
}

/// Catalog status. Deprecated tasks are kept for compatibility but never auto-selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lifecycle {
    #[default]
    Active,
    Experimental,
    Deprecated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DegradationAction {
    Fail,
    Skip,
    SkipWithWarning,
    Quarantine,
    UseFallback,
}

impl DegradationAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fail => "fail",
            Self::Skip => "skip",
            Self::SkipWithWarning => "skip_with_warning",
            Self::Quarantine => "quarantine",
            Self::UseFallback => "use_fallback",
        }
    }
}

impl std::fmt::Display for DegradationAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DegradationPolicy {
    #[serde(default = "default_resource_failure")]
    pub on_resource_failure: DegradationAction,
    #[serde(default = "default_validation_failure")]
    pub on_validation_failure: DegradationAction,
}

fn default_resource_failure() -> DegradationAction {
    DegradationAction::Fail
}

fn default_validation_failure() -> DegradationAction {
    DegradationAction::Quarantine
}

impl Default for DegradationPolicy {
    fn default() -> Self {
        Self {
            on_resource_failure: default_resource_failure(),
            on_validation_failure: default_validation_failure(),
        }
    }
}

/// Per-task spend estimate used by the selector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskBudget {
    #[serde(default)]
    pub max_units: u64,
    #[serde(default)]
    pub max_cost: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachePolicy {
    pub ttl_secs: u64,
    #[serde(default = "default_key_template")]
    pub key_template: String,
}

pub fn default_key_template() -> String {
    "{{ task_id }}:{{ version }}:{{ entity_id }}:{{ date }}".into()
}

fn default_version() -> u32 {
    1
}

fn default_expected_value() -> f64 {
    0.5
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDefinition {
    pub id: TaskId,
    #[serde(default = "default_version")]
    pub version: u32,
    pub executor_kind: ExecutorKind,
    pub lane: String,
    #[serde(default)]
    pub stage: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub input_contract: InputContract,
    pub output_contract: OutputContract,
    #[serde(default)]
    pub required_resources: Vec<String>,
    #[serde(default)]
    pub criticality: Criticality,
    #[serde(default)]
    pub budget: TaskBudget,
    #[serde(default)]
    pub cache_policy: Option<CachePolicy>,
    #[serde(default)]
    pub degradation_policy: DegradationPolicy,
    #[serde(default)]
    pub dependencies: Vec<TaskId>,
    #[serde(default)]
    pub priority: u32,
    #[serde(default = "default_expected_value")]
    pub expected_value: f64,
    /// Relative cost score; falls back to `budget.max_cost`.
    #[serde(default)]
    pub expected_cost: Option<f64>,
    #[serde(default)]
    pub lifecycle: Lifecycle,
    #[serde(default)]
    pub fallback_output: Option<Value>,
}

impl TaskDefinition {
    /// Minimal definition with permissive defaults; mainly for tests and programmatic catalogs.
    pub fn new(id: impl Into<String>, lane: impl Into<String>, executor_kind: ExecutorKind) -> Self {
        let id = id.into();
        Self {
            output_contract: OutputContract::any(format!("{id}.output")),
            id,
            version: 1,
            executor_kind,
            lane: lane.into(),
            stage: None,
            category: None,
            description: String::new(),
            input_contract: InputContract::default(),
            required_resources: Vec::new(),
            criticality: Criticality::Optional,
            budget: TaskBudget::default(),
            cache_policy: None,
            degradation_policy: DegradationPolicy::default(),
            dependencies: Vec::new(),
            priority: 0,
            expected_value: default_expected_value(),
            expected_cost: None,
            lifecycle: Lifecycle::Active,
            fallback_output: None,
        }
    }

    pub fn with_dependencies(mut self, deps: &[&str]) -> Self {
        self.dependencies = deps.iter().map(|d| d.to_string()).collect();
        self
    }

    pub fn with_criticality(mut self, criticality: Criticality) -> Self {
        self.criticality = criticality;
        self
    }

    pub fn with_budget(mut self, max_units: u64, max_cost: f64) -> Self {
        self.budget = TaskBudget { max_units, max_cost };
        self
    }

    pub fn with_output_contract(mut self, contract: OutputContract) -> Self {
        self.output_contract = contract;
        self
    }

    pub fn is_blocker(&self) -> bool {
        self.criticality == Criticality::Blocker
    }

    pub fn expected_cost(&self) -> f64 {
        self.expected_cost.unwrap_or(self.budget.max_cost)
    }

    /// Expected value per unit of expected cost; free tasks rank highest.
    pub fn value_cost_ratio(&self) -> f64 {
        self.expected_value / self.expected_cost().max(1e-6)
    }
}

/// Named selection of tasks executed as one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineDefinition {
    pub id: String,
    pub lane: String,
    #[serde(default)]
    pub stage: Option<String>,
    /// Explicit task list; when absent every task in lane/stage is a candidate.
    #[serde(default)]
    pub tasks: Option<Vec<TaskId>>,
    #[serde(default)]
    pub limits: Option<BudgetLimits>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_executor_kind_gates() {
        assert!(ExecutorKind::RemoteCall.is_heavy());
        assert!(ExecutorKind::Hybrid.is_heavy());
        assert!(!ExecutorKind::LocalFunction.is_heavy());
    }

    #[test]
    fn test_definition_defaults_from_json() {
        let def: TaskDefinition = serde_json::from_value(json!({
            "id": "fetch_prices",
            "executor_kind": "remote_call",
            "lane": "lane_a",
            "output_contract": {"id": "prices.v1"}
        }))
        .unwrap();
        assert_eq!(def.version, 1);
        assert_eq!(def.criticality, Criticality::Optional);
        assert_eq!(def.lifecycle, Lifecycle::Active);
        assert_eq!(
            def.degradation_policy.on_validation_failure,
            DegradationAction::Quarantine
        );
        assert_eq!(
            def.degradation_policy.on_resource_failure,
            DegradationAction::Fail
        );
        assert!((def.expected_value - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_value_cost_ratio() {
        let mut t = TaskDefinition::new("t", "lane_a", ExecutorKind::RemoteCall).with_budget(100, 0.5);
        t.expected_value = 0.9;
        assert!((t.value_cost_ratio() - 1.8).abs() < 1e-9);
        t.expected_cost = Some(0.3);
        assert!((t.value_cost_ratio() - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_free_task_ratio_is_large_not_infinite() {
        let t = TaskDefinition::new("t", "lane_a", ExecutorKind::LocalFunction);
        assert!(t.value_cost_ratio().is_finite());
        assert!(t.value_cost_ratio() > 1000.0);
    }

    #[test]
    fn test_degradation_action_serde_names() {
        let s = serde_json::to_string(&DegradationAction::SkipWithWarning).unwrap();
        assert_eq!(s, "\"skip_with_warning\"");
        assert_eq!(DegradationAction::UseFallback.to_string(), "use_fallback");
    }

    #[test]
    fn test_default_cache_key_template() {
        let p: CachePolicy = serde_json::from_value(json!({"ttl_secs": 60})).unwrap();
        assert_eq!(p.key_template, default_key_template());
    }
}
