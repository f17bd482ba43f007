// src/store/telemetry.rs - Append-only log of execution attempts

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::core::budget::ResourceUsage;
use crate::core::types::AttemptStatus;
use crate::infra::errors::TollgateError;
use crate::library::ExecutorKind;

/// One row per attempt, whatever its outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryRecord {
    pub id: String,
    pub run_id: String,
    #[serde(default)]
    pub pipeline_id: Option<String>,
    pub task_id: String,
    pub task_version: u32,
    pub executor_kind: ExecutorKind,
    pub lane: String,
    #[serde(default)]
    pub stage: Option<String>,
    #[serde(default)]
    pub entity_id: Option<String>,
    pub status: AttemptStatus,
    pub success: bool,
    pub validation_pass: bool,
    pub error_count: usize,
    #[serde(default)]
    pub error: Option<String>,
    pub usage: ResourceUsage,
    pub latency_ms: u64,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    #[serde(default)]
    pub cache_hit: bool,
    #[serde(default)]
    pub sources_succeeded: Vec<String>,
    #[serde(default)]
    pub sources_failed: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskTelemetry {
    pub attempts: usize,
    pub failures: usize,
    pub avg_latency_ms: f64,
    pub total_cost: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TelemetryStats {
    pub total: usize,
    pub successes: usize,
    /// Attempts with `success = false`, whatever the cause.
    pub failures: usize,
    pub skipped: usize,
    pub quarantined: usize,
    pub blocked: usize,
    pub cache_hits: usize,
    pub failure_rate: f64,
    pub avg_latency_ms: f64,
    pub total_units: u64,
    pub total_cost: f64,
    pub by_task: BTreeMap<String, TaskTelemetry>,
    pub by_lane: BTreeMap<String, usize>,
}

#[derive(Default)]
pub struct TelemetryStore {
    records: Mutex<Vec<TelemetryRecord>>,
}

impl TelemetryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn records(&self) -> MutexGuard<'_, Vec<TelemetryRecord>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn record(&self, record: TelemetryRecord) {
        tracing::trace!(
            run_id = %record.run_id,
            task_id = %record.task_id,
            status = record.status.as_str(),
            latency_ms = record.latency_ms,
            "telemetry recorded"
        );
        self.records().push(record);
    }

    pub fn len(&self) -> usize {
        self.records().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records().is_empty()
    }

    /// Attempts of one run, in attempt order.
    pub fn get_by_run(&self, run_id: &str) -> Vec<TelemetryRecord> {
        self.records().iter().filter(|r| r.run_id == run_id).cloned().collect()
    }

    pub fn get_by_task(&self, task_id: &str) -> Vec<TelemetryRecord> {
        self.records().iter().filter(|r| r.task_id == task_id).cloned().collect()
    }

    pub fn export(&self) -> Result<String, TollgateError> {
        Ok(serde_json::to_string_pretty(&*self.records())?)
    }

    /// Append records from an export. Returns how many were read.
    pub fn import(&self, json: &str) -> Result<usize, TollgateError> {
        let incoming: Vec<TelemetryRecord> = serde_json::from_str(json)?;
        let count = incoming.len();
        self.records().extend(incoming);
        Ok(count)
    }

    pub fn get_stats(&self) -> TelemetryStats {
        let records = self.records();
        let mut stats = TelemetryStats {
            total: records.len(),
            ..Default::default()
        };
        if records.is_empty() {
            return stats;
        }

        let mut latency_sum: u64 = 0;
        for r in records.iter() {
            if r.success {
                stats.successes += 1;
            } else {
                stats.failures += 1;
            }
            match r.status {
                AttemptStatus::Skipped => stats.skipped += 1,
                AttemptStatus::Quarantined => stats.quarantined += 1,
                AttemptStatus::Blocked => stats.blocked += 1,
                AttemptStatus::Success | AttemptStatus::Failed => {}
            }
            if r.cache_hit {
                stats.cache_hits += 1;
            }
            latency_sum = latency_sum.saturating_add(r.latency_ms);
            stats.total_units = stats.total_units.saturating_add(r.usage.total_units());
            stats.total_cost += r.usage.cost_estimate;
            *stats.by_lane.entry(r.lane.clone()).or_default() += 1;

            let t = stats.by_task.entry(r.task_id.clone()).or_default();
            // Incremental mean keeps this single-pass.
            t.attempts += 1;
            t.avg_latency_ms += (r.latency_ms as f64 - t.avg_latency_ms) / t.attempts as f64;
            t.total_cost += r.usage.cost_estimate;
            if !r.success {
                t.failures += 1;
            }
        }

        stats.failure_rate = stats.failures as f64 / stats.total as f64;
        stats.avg_latency_ms = latency_sum as f64 / stats.total as f64;
        stats
    }
}
