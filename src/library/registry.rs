// src/library/registry.rs - Validated, read-only task library

use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use super::loader::{self, DocumentFormat, LibraryDocument};
use super::types::*;
use crate::infra::errors::TollgateError;

/// All task and pipeline definitions known to the process.
///
/// Construction validates every definition and fails closed: a single
/// malformed entry rejects the whole load. Once built the library is never
/// mutated and is shared between runs behind an `Arc`.
#[derive(Debug, Clone, Default)]
pub struct TaskLibrary {
    tasks: BTreeMap<TaskId, BTreeMap<u32, TaskDefinition>>,
    pipelines: BTreeMap<String, PipelineDefinition>,
    version: Option<String>,
}

/// Filters for [`TaskLibrary::query`]. Unset fields match everything.
#[derive(Debug, Clone, Default)]
pub struct TaskQuery {
    pub lane: Option<String>,
    pub stage: Option<String>,
    pub category: Option<String>,
    pub executor_kind: Option<ExecutorKind>,
    pub criticality: Option<Criticality>,
    pub include_deprecated: bool,
}

impl TaskQuery {
    pub fn lane(lane: impl Into<String>) -> Self {
        Self {
            lane: Some(lane.into()),
            ..Default::default()
        }
    }

    pub fn with_stage(mut self, stage: impl Into<String>) -> Self {
        self.stage = Some(stage.into());
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_executor_kind(mut self, kind: ExecutorKind) -> Self {
        self.executor_kind = Some(kind);
        self
    }

    pub fn with_criticality(mut self, criticality: Criticality) -> Self {
        self.criticality = Some(criticality);
        self
    }

    pub fn including_deprecated(mut self) -> Self {
        self.include_deprecated = true;
        self
    }

    fn matches(&self, task: &TaskDefinition) -> bool {
        self.lane.as_ref().map_or(true, |l| &task.lane == l)
            && self.stage.as_ref().map_or(true, |s| task.stage.as_ref() == Some(s))
            && self.category.as_ref().map_or(true, |c| task.category.as_ref() == Some(c))
            && self.executor_kind.map_or(true, |k| task.executor_kind == k)
            && self.criticality.map_or(true, |c| task.criticality == c)
            && (self.include_deprecated || task.lifecycle != Lifecycle::Deprecated)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LibraryStats {
    pub total_definitions: usize,
    pub distinct_ids: usize,
    pub by_lane: BTreeMap<String, usize>,
    pub by_executor_kind: BTreeMap<String, usize>,
    pub by_criticality: BTreeMap<String, usize>,
    pub deprecated: usize,
    pub pipeline_count: usize,
}

impl TaskLibrary {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build from in-memory definitions.
    pub fn from_definitions(
        tasks: Vec<TaskDefinition>,
        pipelines: Vec<PipelineDefinition>,
    ) -> Result<Self, TollgateError> {
        Self::from_document(LibraryDocument {
            version: None,
            tasks,
            pipelines,
        })
    }

    pub fn from_document(doc: LibraryDocument) -> Result<Self, TollgateError> {
        let known_ids: HashSet<&str> = doc.tasks.iter().map(|t| t.id.as_str()).collect();

        let mut tasks: BTreeMap<TaskId, BTreeMap<u32, TaskDefinition>> = BTreeMap::new();
        for task in &doc.tasks {
            validate_task(task, &known_ids)?;
            let versions = tasks.entry(task.id.clone()).or_default();
            if versions.contains_key(&task.version) {
                return Err(TollgateError::DuplicateDefinition {
                    task_id: task.id.clone(),
                    version: task.version,
                });
            }
            versions.insert(task.version, task.clone());
        }

        let mut pipelines = BTreeMap::new();
        for pipeline in doc.pipelines {
            validate_pipeline(&pipeline, &known_ids)?;
            if pipelines.contains_key(&pipeline.id) {
                return Err(TollgateError::Config(format!(
                    "duplicate pipeline '{}'",
                    pipeline.id
                )));
            }
            pipelines.insert(pipeline.id.clone(), pipeline);
        }

        tracing::info!(
            tasks = tasks.len(),
            definitions = doc.tasks.len(),
            pipelines = pipelines.len(),
            "task library loaded"
        );

        Ok(Self {
            tasks,
            pipelines,
            version: doc.version,
        })
    }

    /// Load a `.json`, `.yaml` or `.yml` library file.
    pub fn load_from(path: &Path) -> Result<Self, TollgateError> {
        Self::from_document(loader::read_document(path)?)
    }

    pub fn from_json_str(content: &str) -> Result<Self, TollgateError> {
        Self::from_document(loader::parse_document(content, DocumentFormat::Json)?)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self, TollgateError> {
        Self::from_document(loader::parse_document(content, DocumentFormat::Yaml)?)
    }

    /// Latest version of a task.
    pub fn get_by_id(&self, id: &str) -> Option<&TaskDefinition> {
        self.tasks.get(id).and_then(|v| v.values().next_back())
    }

    pub fn get_version(&self, id: &str, version: u32) -> Option<&TaskDefinition> {
        self.tasks.get(id).and_then(|v| v.get(&version))
    }

    /// Latest versions of every task in a lane, deprecated ones included.
    pub fn get_by_lane(&self, lane: &str) -> Vec<&TaskDefinition> {
        self.query(&TaskQuery::lane(lane).including_deprecated())
    }

    pub fn query(&self, query: &TaskQuery) -> Vec<&TaskDefinition> {
        self.latest().filter(|t| query.matches(t)).collect()
    }

    /// Every stored definition, all versions, ordered by id then version.
    pub fn list_all(&self) -> Vec<&TaskDefinition> {
        self.tasks.values().flat_map(|v| v.values()).collect()
    }

    pub fn pipeline(&self, id: &str) -> Option<&PipelineDefinition> {
        self.pipelines.get(id)
    }

    pub fn pipelines(&self) -> impl Iterator<Item = &PipelineDefinition> {
        self.pipelines.values()
    }

    /// Number of distinct task ids.
    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn document_version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    pub fn stats(&self) -> LibraryStats {
        let mut stats = LibraryStats {
            total_definitions: self.tasks.values().map(|v| v.len()).sum(),
            distinct_ids: self.tasks.len(),
            pipeline_count: self.pipelines.len(),
            ..Default::default()
        };
        for task in self.latest() {
            *stats.by_lane.entry(task.lane.clone()).or_default() += 1;
            *stats
                .by_executor_kind
                .entry(task.executor_kind.as_str().to_string())
                .or_default() += 1;
            *stats
                .by_criticality
                .entry(task.criticality.as_str().to_string())
                .or_default() += 1;
            if task.lifecycle == Lifecycle::Deprecated {
                stats.deprecated += 1;
            }
        }
        stats
    }

    fn latest(&self) -> impl Iterator<Item = &TaskDefinition> {
        self.tasks.values().filter_map(|v| v.values().next_back())
    }
}

fn validate_task(task: &TaskDefinition, known_ids: &HashSet<&str>) -> Result<(), TollgateError> {
    let malformed = |reason: String| TollgateError::malformed(&task.id, task.version, reason);

    if task.id.trim().is_empty() {
        return Err(malformed("id must not be empty".into()));
    }
    if task.version == 0 {
        return Err(malformed("version must be >= 1".into()));
    }
    if task.lane.trim().is_empty() {
        return Err(malformed("lane must not be empty".into()));
    }

    for dep in &task.dependencies {
        if dep == &task.id {
            return Err(malformed("task depends on itself".into()));
        }
        if !known_ids.contains(dep.as_str()) {
            return Err(TollgateError::UnknownDependency {
                task_id: task.id.clone(),
                dependency: dep.clone(),
            });
        }
    }

    if !task.budget.max_cost.is_finite() || task.budget.max_cost < 0.0 {
        return Err(malformed(format!(
            "budget.max_cost must be finite and >= 0, got {}",
            task.budget.max_cost
        )));
    }
    if !(0.0..=1.0).contains(&task.expected_value) {
        return Err(malformed(format!(
            "expected_value must be within [0, 1], got {}",
            task.expected_value
        )));
    }
    if let Some(cost) = task.expected_cost {
        if !cost.is_finite() || cost < 0.0 {
            return Err(malformed(format!("expected_cost must be finite and >= 0, got {cost}")));
        }
    }

    task.output_contract.check_well_formed()?;

    if let Some(policy) = &task.cache_policy {
        let env = minijinja::Environment::new();
        if let Err(e) = env.template_from_str(&policy.key_template) {
            return Err(malformed(format!("cache key template does not compile: {e}")));
        }
    }

    if task.degradation_policy.on_validation_failure == DegradationAction::UseFallback
        && task.fallback_output.is_none()
    {
        return Err(malformed(
            "on_validation_failure = use_fallback requires fallback_output".into(),
        ));
    }

    Ok(())
}

fn validate_pipeline(
    pipeline: &PipelineDefinition,
    known_ids: &HashSet<&str>,
) -> Result<(), TollgateError> {
    if pipeline.id.trim().is_empty() {
        return Err(TollgateError::Config("pipeline id must not be empty".into()));
    }
    if pipeline.lane.trim().is_empty() {
        return Err(TollgateError::Config(format!(
            "pipeline '{}' has an empty lane",
            pipeline.id
        )));
    }
    if let Some(tasks) = &pipeline.tasks {
        if let Some(unknown) = tasks.iter().find(|t| !known_ids.contains(t.as_str())) {
            return Err(TollgateError::Config(format!(
                "pipeline '{}' references unknown task '{unknown}'",
                pipeline.id
            )));
        }
    }
    if let Some(limits) = &pipeline.limits {
        limits
            .validate()
            .map_err(|reason| TollgateError::Config(format!("pipeline '{}': {reason}", pipeline.id)))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::{FieldSchema, FieldType, OutputContract};

    fn task(id: &str) -> TaskDefinition {
        TaskDefinition::new(id, "lane_a", ExecutorKind::RemoteCall)
    }

    // ─── Loading ────────────────────────────────────────────────

    #[test]
    fn test_latest_version_wins() {
        let mut v2 = task("fetch");
        v2.version = 2;
        v2.description = "second".into();
        let lib = TaskLibrary::from_definitions(vec![task("fetch"), v2], vec![]).unwrap();
        assert_eq!(lib.get_by_id("fetch").unwrap().version, 2);
        assert_eq!(lib.get_version("fetch", 1).unwrap().version, 1);
        assert_eq!(lib.list_all().len(), 2);
        assert_eq!(lib.task_count(), 1);
    }

    #[test]
    fn test_duplicate_version_rejected() {
        let err = TaskLibrary::from_definitions(vec![task("fetch"), task("fetch")], vec![]).unwrap_err();
        assert!(matches!(err, TollgateError::DuplicateDefinition { version: 1, .. }));
    }

    #[test]
    fn test_unknown_dependency_rejected() {
        let err = TaskLibrary::from_definitions(
            vec![task("a").with_dependencies(&["ghost"])],
            vec![],
        )
        .unwrap_err();
        assert!(matches!(err, TollgateError::UnknownDependency { .. }));
    }

    #[test]
    fn test_self_dependency_rejected() {
        let err = TaskLibrary::from_definitions(vec![task("a").with_dependencies(&["a"])], vec![]).unwrap_err();
        assert!(err.to_string().contains("depends on itself"));
    }

    #[test]
    fn test_cycles_are_not_rejected_at_load() {
        let lib = TaskLibrary::from_definitions(
            vec![
                task("a").with_dependencies(&["b"]),
                task("b").with_dependencies(&["a"]),
            ],
            vec![],
        );
        assert!(lib.is_ok());
    }

    #[test]
    fn test_fails_closed_on_single_bad_definition() {
        let mut bad = task("bad");
        bad.expected_value = 1.5;
        let err = TaskLibrary::from_definitions(vec![task("good"), bad], vec![]).unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_bad_contract_rejected() {
        let bad = task("a").with_output_contract(OutputContract::new(
            "a.v1",
            FieldSchema::of(FieldType::Number).with_range(Some(5.0), Some(1.0)),
        ));
        let err = TaskLibrary::from_definitions(vec![bad], vec![]).unwrap_err();
        assert!(matches!(err, TollgateError::InvalidContract { .. }));
    }

    #[test]
    fn test_bad_cache_template_rejected() {
        let mut t = task("a");
        t.cache_policy = Some(CachePolicy {
            ttl_secs: 60,
            key_template: "{{ task_id ".into(),
        });
        assert!(TaskLibrary::from_definitions(vec![t], vec![]).is_err());
    }

    #[test]
    fn test_use_fallback_requires_fallback_output() {
        let mut t = task("a");
        t.degradation_policy.on_validation_failure = DegradationAction::UseFallback;
        assert!(TaskLibrary::from_definitions(vec![t.clone()], vec![]).is_err());
        t.fallback_output = Some(serde_json::json!({"rows": []}));
        assert!(TaskLibrary::from_definitions(vec![t], vec![]).is_ok());
    }

    #[test]
    fn test_pipeline_with_unknown_task_rejected() {
        let p = PipelineDefinition {
            id: "daily".into(),
            lane: "lane_a".into(),
            stage: None,
            tasks: Some(vec!["ghost".into()]),
            limits: None,
        };
        assert!(TaskLibrary::from_definitions(vec![task("a")], vec![p]).is_err());
    }

    // ─── Queries ────────────────────────────────────────────────

    #[test]
    fn test_query_filters() {
        let mut b = TaskDefinition::new("b", "lane_a", ExecutorKind::LocalFunction)
            .with_criticality(Criticality::Blocker);
        b.stage = Some("ingest".into());
        let mut old = task("old");
        old.lifecycle = Lifecycle::Deprecated;
        let other = TaskDefinition::new("c", "lane_b", ExecutorKind::Hybrid);
        let lib = TaskLibrary::from_definitions(vec![task("a"), b, old, other], vec![]).unwrap();

        assert_eq!(lib.query(&TaskQuery::lane("lane_a")).len(), 2);
        assert_eq!(lib.get_by_lane("lane_a").len(), 3);
        let staged = lib.query(&TaskQuery::lane("lane_a").with_stage("ingest"));
        assert_eq!(staged.len(), 1);
        assert_eq!(staged[0].id, "b");
        let blockers = lib.query(&TaskQuery::default().with_criticality(Criticality::Blocker));
        assert_eq!(blockers.len(), 1);
        let hybrids = lib.query(&TaskQuery::default().with_executor_kind(ExecutorKind::Hybrid));
        assert_eq!(hybrids[0].id, "c");
    }

    #[test]
    fn test_stats() {
        let lib = TaskLibrary::from_definitions(
            vec![
                task("a"),
                TaskDefinition::new("b", "lane_b", ExecutorKind::LocalFunction)
                    .with_criticality(Criticality::Blocker),
            ],
            vec![],
        )
        .unwrap();
        let stats = lib.stats();
        assert_eq!(stats.total_definitions, 2);
        assert_eq!(stats.by_lane["lane_a"], 1);
        assert_eq!(stats.by_executor_kind["local_function"], 1);
        assert_eq!(stats.by_criticality["blocker"], 1);
        assert_eq!(stats.pipeline_count, 0);
    }
}
