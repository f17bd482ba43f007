// src/handler/provider.rs - Run-level data providers

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::types::{ExecutionContext, TaskInputs};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFailure {
    pub source: String,
    pub reason: String,
}

/// Data fetched once per run. Partial failure is normal.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderData {
    pub data: TaskInputs,
    pub succeeded_sources: Vec<String>,
    pub failed_sources: Vec<SourceFailure>,
}

impl ProviderData {
    pub fn with_source(mut self, source: impl Into<String>, value: Value) -> Self {
        let source = source.into();
        self.data.insert(source.clone(), value);
        self.succeeded_sources.push(source);
        self
    }

    pub fn with_failed_source(mut self, source: impl Into<String>, reason: impl Into<String>) -> Self {
        self.failed_sources.push(SourceFailure {
            source: source.into(),
            reason: reason.into(),
        });
        self
    }

    pub fn is_failed(&self, source: &str) -> bool {
        self.failed_sources.iter().any(|f| f.source == source)
    }

    pub fn failed_source_names(&self) -> Vec<String> {
        self.failed_sources.iter().map(|f| f.source.clone()).collect()
    }
}

#[async_trait]
pub trait DataProvider: Send + Sync {
    async fn fetch(&self, context: &ExecutionContext) -> ProviderData;
}

/// Provides nothing; the default when no provider is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullDataProvider;

#[async_trait]
impl DataProvider for NullDataProvider {
    async fn fetch(&self, _context: &ExecutionContext) -> ProviderData {
        ProviderData::default()
    }
}

/// Returns the same canned data for every run.
#[derive(Debug, Clone, Default)]
pub struct StaticDataProvider {
    data: ProviderData,
}

impl StaticDataProvider {
    pub fn new(data: ProviderData) -> Self {
        Self { data }
    }
}

#[async_trait]
impl DataProvider for StaticDataProvider {
    async fn fetch(&self, context: &ExecutionContext) -> ProviderData {
        tracing::debug!(
            run_id = context.run_id(),
            sources = self.data.succeeded_sources.len(),
            failed = self.data.failed_sources.len(),
            "static provider fetch"
        );
        self.data.clone()
    }
}
