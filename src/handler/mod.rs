// src/handler/mod.rs - Task handler contract and registry
//
// Handlers are the only place task work actually happens. They never return
// `Err`: a failed call is a `HandlerResponse` with `success = false`.

pub mod provider;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use crate::core::budget::ResourceUsage;
use crate::core::types::{ExecutionContext, TaskInputs};
use crate::library::{ExecutorKind, TaskDefinition};

pub use provider::{DataProvider, NullDataProvider, ProviderData, SourceFailure, StaticDataProvider};

/// Everything a handler needs for one call.
#[derive(Debug, Clone)]
pub struct HandlerRequest {
    pub task: TaskDefinition,
    pub context: ExecutionContext,
    pub inputs: TaskInputs,
}

impl HandlerRequest {
    pub fn task_id(&self) -> &str {
        &self.task.id
    }

    pub fn input(&self, key: &str) -> Option<&Value> {
        self.inputs.get(key)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HandlerResponse {
    pub success: bool,
    /// Structured payload. Takes precedence over `raw_output`.
    pub data: Option<Value>,
    /// Unparsed text the handler produced; parsed as JSON when `data` is absent.
    pub raw_output: Option<String>,
    pub usage: ResourceUsage,
    /// Handler-measured latency; the executor's own timing is used when absent.
    pub latency_ms: Option<u64>,
    pub error: Option<String>,
}

impl HandlerResponse {
    pub fn ok(data: Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            ..Default::default()
        }
    }

    pub fn raw(text: impl Into<String>) -> Self {
        Self {
            success: true,
            raw_output: Some(text.into()),
            ..Default::default()
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Default::default()
        }
    }

    /// Serialize a typed result; a serialization error becomes a failed response.
    pub fn from_typed<T: Serialize>(value: &T) -> Self {
        match serde_json::to_value(value) {
            Ok(data) => Self::ok(data),
            Err(e) => Self::failure(format!("failed to serialize handler output: {e}")),
        }
    }

    pub fn with_usage(mut self, units_in: u64, units_out: u64, cost: f64) -> Self {
        self.usage = ResourceUsage::new(units_in, units_out, cost);
        self
    }

    pub fn with_latency(mut self, latency_ms: u64) -> Self {
        self.latency_ms = Some(latency_ms);
        self
    }
}

/// Performs the work of one task.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn handle(&self, request: HandlerRequest) -> HandlerResponse;
}

/// Synchronous closure handler, convenient for `local_function` tasks.
pub struct FnHandler<F>
where
    F: Fn(&HandlerRequest) -> HandlerResponse + Send + Sync,
{
    f: F,
}

impl<F> FnHandler<F>
where
    F: Fn(&HandlerRequest) -> HandlerResponse + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F> TaskHandler for FnHandler<F>
where
    F: Fn(&HandlerRequest) -> HandlerResponse + Send + Sync,
{
    async fn handle(&self, request: HandlerRequest) -> HandlerResponse {
        (self.f)(&request)
    }
}

/// Resolves the handler for a task: by task id first, then by executor kind.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    by_task: HashMap<String, Arc<dyn TaskHandler>>,
    by_kind: HashMap<ExecutorKind, Arc<dyn TaskHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_task(&mut self, task_id: impl Into<String>, handler: Arc<dyn TaskHandler>) {
        self.by_task.insert(task_id.into(), handler);
    }

    pub fn register_kind(&mut self, kind: ExecutorKind, handler: Arc<dyn TaskHandler>) {
        self.by_kind.insert(kind, handler);
    }

    pub fn with_task(mut self, task_id: impl Into<String>, handler: Arc<dyn TaskHandler>) -> Self {
        self.register_task(task_id, handler);
        self
    }

    pub fn with_kind(mut self, kind: ExecutorKind, handler: Arc<dyn TaskHandler>) -> Self {
        self.register_kind(kind, handler);
        self
    }

    pub fn resolve(&self, task: &TaskDefinition) -> Option<Arc<dyn TaskHandler>> {
        self.by_task
            .get(&task.id)
            .or_else(|| self.by_kind.get(&task.executor_kind))
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.by_task.len() + self.by_kind.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut tasks: Vec<_> = self.by_task.keys().collect();
        tasks.sort();
        let mut kinds: Vec<_> = self.by_kind.keys().collect();
        kinds.sort();
        f.debug_struct("HandlerRegistry")
            .field("tasks", &tasks)
            .field("kinds", &kinds)
            .finish()
    }
}
