// src/store/quarantine.rs - Bounded store of outputs that failed their contract

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::contract::ValidationError;
use crate::infra::errors::TollgateError;
use crate::library::DegradationAction;

pub const DEFAULT_QUARANTINE_CAPACITY: usize = 1000;

/// An invalid output kept for inspection. Never updated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuarantineRecord {
    pub id: String,
    pub task_id: String,
    pub task_version: u32,
    pub run_id: String,
    #[serde(default)]
    pub pipeline_id: Option<String>,
    #[serde(default)]
    pub entity_id: Option<String>,
    pub contract_id: String,
    pub raw_output: Value,
    pub validation_errors: Vec<ValidationError>,
    pub degradation: DegradationAction,
    pub created_at: DateTime<Utc>,
}

impl QuarantineRecord {
    /// Kind of the first violation, used for grouping.
    pub fn error_kind(&self) -> &'static str {
        self.validation_errors
            .first()
            .map(|e| e.kind.as_str())
            .unwrap_or("unknown")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QuarantineStats {
    pub total: usize,
    pub capacity: usize,
    pub by_task: BTreeMap<String, usize>,
    pub by_error_kind: BTreeMap<String, usize>,
    pub last_24h: usize,
}

/// FIFO ring of quarantine records; the oldest is evicted once full.
pub struct QuarantineStore {
    records: Mutex<VecDeque<QuarantineRecord>>,
    capacity: usize,
}

impl Default for QuarantineStore {
    fn default() -> Self {
        Self::new(DEFAULT_QUARANTINE_CAPACITY)
    }
}

impl QuarantineStore {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            records: Mutex::new(VecDeque::with_capacity(capacity.min(4096))),
            capacity,
        }
    }

    fn records(&self) -> MutexGuard<'_, VecDeque<QuarantineRecord>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.records().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records().is_empty()
    }

    /// Append a record, evicting the oldest past capacity. Returns the record id.
    pub fn add(&self, record: QuarantineRecord) -> String {
        let id = record.id.clone();
        let mut records = self.records();
        records.push_back(record);
        self.evict(&mut records);
        id
    }

    fn evict(&self, records: &mut VecDeque<QuarantineRecord>) {
        while records.len() > self.capacity {
            if let Some(old) = records.pop_front() {
                tracing::debug!(id = %old.id, task_id = %old.task_id, "quarantine full; evicted oldest record");
            }
        }
    }

    pub fn get_by_id(&self, id: &str) -> Option<QuarantineRecord> {
        self.records().iter().find(|r| r.id == id).cloned()
    }

    pub fn get_by_run_id(&self, run_id: &str) -> Vec<QuarantineRecord> {
        self.filtered(|r| r.run_id == run_id)
    }

    pub fn get_by_task_id(&self, task_id: &str) -> Vec<QuarantineRecord> {
        self.filtered(|r| r.task_id == task_id)
    }

    /// Inclusive on both ends.
    pub fn get_by_time_range(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Vec<QuarantineRecord> {
        self.filtered(|r| r.created_at >= from && r.created_at <= to)
    }

    /// Most recent first.
    pub fn get_recent(&self, limit: usize) -> Vec<QuarantineRecord> {
        self.records().iter().rev().take(limit).cloned().collect()
    }

    fn filtered(&self, pred: impl Fn(&QuarantineRecord) -> bool) -> Vec<QuarantineRecord> {
        self.records().iter().filter(|r| pred(r)).cloned().collect()
    }

    /// Operator deletion of one record.
    pub fn remove(&self, id: &str) -> bool {
        let mut records = self.records();
        let before = records.len();
        records.retain(|r| r.id != id);
        records.len() != before
    }

    /// Drop records created strictly before `cutoff`. Returns how many were removed.
    pub fn delete_older_than(&self, cutoff: DateTime<Utc>) -> usize {
        let mut records = self.records();
        let before = records.len();
        records.retain(|r| r.created_at >= cutoff);
        let removed = before - records.len();
        if removed > 0 {
            tracing::info!(removed, %cutoff, "pruned quarantine records");
        }
        removed
    }

    /// All records as a JSON array, oldest first.
    pub fn export(&self) -> Result<String, TollgateError> {
        let records: Vec<QuarantineRecord> = self.records().iter().cloned().collect();
        Ok(serde_json::to_string_pretty(&records)?)
    }

    /// Append records from an export. Returns how many were read.
    pub fn import(&self, json: &str) -> Result<usize, TollgateError> {
        let incoming: Vec<QuarantineRecord> = serde_json::from_str(json)?;
        let count = incoming.len();
        let mut records = self.records();
        records.extend(incoming);
        self.evict(&mut records);
        Ok(count)
    }

    pub fn get_stats(&self) -> QuarantineStats {
        let records = self.records();
        let since = Utc::now() - Duration::hours(24);
        let mut stats = QuarantineStats {
            total: records.len(),
            capacity: self.capacity,
            ..Default::default()
        };
        for r in records.iter() {
            *stats.by_task.entry(r.task_id.clone()).or_default() += 1;
            *stats.by_error_kind.entry(r.error_kind().to_string()).or_default() += 1;
            if r.created_at >= since {
                stats.last_24h += 1;
            }
        }
        stats
    }
}
