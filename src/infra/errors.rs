// src/infra/errors.rs - Error types for Tollgate

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TollgateError {
    // Load-time errors (fatal to the whole load, never per-execution)
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Task '{task_id}' v{version} is malformed: {reason}")]
    MalformedDefinition {
        task_id: String,
        version: u32,
        reason: String,
    },

    #[error("Duplicate task definition '{task_id}' v{version}")]
    DuplicateDefinition { task_id: String, version: u32 },

    #[error("Task '{task_id}' depends on unknown task '{dependency}'")]
    UnknownDependency { task_id: String, dependency: String },

    #[error("Output contract '{contract_id}' is invalid at {path}: {reason}")]
    InvalidContract {
        contract_id: String,
        path: String,
        reason: String,
    },

    // Planning
    #[error("Dependency cycle detected among: {}", .0.join(", "))]
    DependencyCycle(Vec<String>),

    // Lookup
    #[error("Task '{0}' not found")]
    TaskNotFound(String),

    #[error("Pipeline '{0}' not found")]
    PipelineNotFound(String),

    // Budget ledger lifecycle
    #[error("Run '{0}' is not active")]
    UnknownRun(String),

    #[error("Run '{0}' is already active")]
    RunAlreadyActive(String),

    // Infra
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yml::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl TollgateError {
    /// Errors raised while loading definitions or configuration.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            TollgateError::Config(_)
                | TollgateError::MalformedDefinition { .. }
                | TollgateError::DuplicateDefinition { .. }
                | TollgateError::UnknownDependency { .. }
                | TollgateError::InvalidContract { .. }
        )
    }

    pub(crate) fn malformed(task_id: &str, version: u32, reason: impl Into<String>) -> Self {
        TollgateError::MalformedDefinition {
            task_id: task_id.to_string(),
            version,
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_classification() {
        assert!(TollgateError::Config("bad".into()).is_configuration());
        assert!(TollgateError::malformed("t", 1, "empty lane").is_configuration());
        assert!(TollgateError::DuplicateDefinition {
            task_id: "t".into(),
            version: 1
        }
        .is_configuration());
        assert!(!TollgateError::TaskNotFound("t".into()).is_configuration());
        assert!(!TollgateError::DependencyCycle(vec!["a".into()]).is_configuration());
    }

    #[test]
    fn test_cycle_message_lists_members() {
        let e = TollgateError::DependencyCycle(vec!["a".into(), "b".into()]);
        assert_eq!(e.to_string(), "Dependency cycle detected among: a, b");
    }

    #[test]
    fn test_malformed_message() {
        let e = TollgateError::malformed("fetch_prices", 2, "version must be >= 1");
        assert_eq!(
            e.to_string(),
            "Task 'fetch_prices' v2 is malformed: version must be >= 1"
        );
    }
}
