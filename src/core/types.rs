// src/core/types.rs - Core execution types

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use super::budget::{BudgetState, ResourceUsage};
use super::selector::SelectionResult;
use crate::contract::ValidationError;
use crate::library::{DegradationAction, TaskId};
use crate::store::TelemetryRecord;

/// Inputs handed to a task: provider data plus dependency payloads keyed by task id.
pub type TaskInputs = serde_json::Map<String, Value>;

/// Identity of one pipeline invocation. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionContext {
    run_id: String,
    pipeline_id: Option<String>,
    lane: Option<String>,
    stage: Option<String>,
    entity_id: Option<String>,
    date: String,
    metadata: BTreeMap<String, Value>,
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutionContext {
    /// Fresh context with a random v4 run id and today's UTC date.
    pub fn new() -> Self {
        Self::for_run(uuid::Uuid::new_v4().to_string())
    }

    pub fn for_run(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            pipeline_id: None,
            lane: None,
            stage: None,
            entity_id: None,
            date: Utc::now().format("%Y-%m-%d").to_string(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_pipeline(mut self, pipeline_id: impl Into<String>) -> Self {
        self.pipeline_id = Some(pipeline_id.into());
        self
    }

    pub fn with_lane(mut self, lane: impl Into<String>) -> Self {
        self.lane = Some(lane.into());
        self
    }

    pub fn with_stage(mut self, stage: impl Into<String>) -> Self {
        self.stage = Some(stage.into());
        self
    }

    pub fn with_entity(mut self, entity_id: impl Into<String>) -> Self {
        self.entity_id = Some(entity_id.into());
        self
    }

    pub fn with_date(mut self, date: impl Into<String>) -> Self {
        self.date = date.into();
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn pipeline_id(&self) -> Option<&str> {
        self.pipeline_id.as_deref()
    }

    pub fn lane(&self) -> Option<&str> {
        self.lane.as_deref()
    }

    pub fn stage(&self) -> Option<&str> {
        self.stage.as_deref()
    }

    pub fn entity_id(&self) -> Option<&str> {
        self.entity_id.as_deref()
    }

    pub fn date(&self) -> &str {
        &self.date
    }

    pub fn metadata(&self) -> &BTreeMap<String, Value> {
        &self.metadata
    }
}

/// Task payload tagged with the contract it was validated against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub contract_id: String,
    pub payload: Value,
}

impl Envelope {
    pub fn new(contract_id: impl Into<String>, payload: Value) -> Self {
        Self {
            contract_id: contract_id.into(),
            payload,
        }
    }

    /// Decode the payload into a caller-side type.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.payload.clone())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    Success,
    Failed,
    Skipped,
    Quarantined,
    /// Denied by a budget gate; the handler never ran.
    Blocked,
}

impl AttemptStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
            Self::Quarantined => "quarantined",
            Self::Blocked => "blocked",
        }
    }
}

impl std::fmt::Display for AttemptStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one execution attempt. Built once by the executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionOutput {
    pub task_id: TaskId,
    pub task_version: u32,
    pub status: AttemptStatus,
    pub success: bool,
    pub skipped: bool,
    pub cache_hit: bool,
    pub data: Option<Envelope>,
    pub raw_output: Option<String>,
    pub validation_pass: bool,
    pub validation_errors: Vec<ValidationError>,
    pub resource_usage: ResourceUsage,
    pub latency_ms: u64,
    pub error: Option<String>,
    pub warnings: Vec<String>,
    pub degradation: Option<DegradationAction>,
    /// Id of the telemetry record written for this attempt.
    #[serde(default)]
    pub telemetry_id: Option<String>,
}

impl ExecutionOutput {
    /// Output for a task that could not even be attempted.
    pub(crate) fn not_run(task_id: &str, error: impl Into<String>) -> Self {
        Self {
            task_id: task_id.to_string(),
            task_version: 0,
            status: AttemptStatus::Failed,
            success: false,
            skipped: false,
            cache_hit: false,
            data: None,
            raw_output: None,
            validation_pass: false,
            validation_errors: Vec::new(),
            resource_usage: ResourceUsage::default(),
            latency_ms: 0,
            error: Some(error.into()),
            warnings: Vec::new(),
            degradation: None,
            telemetry_id: None,
        }
    }

    /// Payload of a successful attempt, if any.
    pub fn payload(&self) -> Option<&Value> {
        self.data.as_ref().map(|e| &e.payload)
    }
}

/// Lifecycle notifications for progress reporting.
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    RunStarted {
        run_id: String,
        pipeline_id: String,
        planned: usize,
    },
    TaskStarted {
        run_id: String,
        task_id: TaskId,
    },
    TaskFinished {
        run_id: String,
        task_id: TaskId,
        status: AttemptStatus,
    },
    RunHalted {
        run_id: String,
        task_id: TaskId,
    },
    RunFinished {
        run_id: String,
        success: bool,
    },
}

/// Aggregate outcome of a pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestrationResult {
    pub run_id: String,
    pub pipeline_id: String,
    pub success: bool,
    pub outputs: BTreeMap<TaskId, ExecutionOutput>,
    pub telemetry: Vec<TelemetryRecord>,
    pub budget_state: Option<BudgetState>,
    pub total_latency_ms: u64,
    pub sources_succeeded: Vec<String>,
    pub sources_failed: Vec<String>,
    pub selection: Option<SelectionResult>,
    pub error: Option<String>,
}

impl OrchestrationResult {
    pub(crate) fn new(run_id: &str, pipeline_id: &str) -> Self {
        Self {
            run_id: run_id.to_string(),
            pipeline_id: pipeline_id.to_string(),
            success: false,
            outputs: BTreeMap::new(),
            telemetry: Vec::new(),
            budget_state: None,
            total_latency_ms: 0,
            sources_succeeded: Vec::new(),
            sources_failed: Vec::new(),
            selection: None,
            error: None,
        }
    }

    pub(crate) fn failed(run_id: &str, pipeline_id: &str, error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::new(run_id, pipeline_id)
        }
    }
}
