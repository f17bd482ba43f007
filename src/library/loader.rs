// src/library/loader.rs - Library document parsing (JSON / YAML)

use serde::{Deserialize, Serialize};
use std::path::Path;

use super::types::{PipelineDefinition, TaskDefinition};
use crate::infra::errors::TollgateError;

/// On-disk shape of a task library.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LibraryDocument {
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub tasks: Vec<TaskDefinition>,
    #[serde(default)]
    pub pipelines: Vec<PipelineDefinition>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Json,
    Yaml,
}

impl DocumentFormat {
    pub fn from_path(path: &Path) -> Result<Self, TollgateError> {
        match path.extension().and_then(|e| e.to_str()).map(|e| e.to_ascii_lowercase()) {
            Some(ext) if ext == "json" => Ok(Self::Json),
            Some(ext) if ext == "yaml" || ext == "yml" => Ok(Self::Yaml),
            _ => Err(TollgateError::Config(format!(
                "unsupported library format: {} (expected .json, .yaml or .yml)",
                path.display()
            ))),
        }
    }
}

pub fn parse_document(content: &str, format: DocumentFormat) -> Result<LibraryDocument, TollgateError> {
    let doc = match format {
        DocumentFormat::Json => serde_json::from_str(content)?,
        DocumentFormat::Yaml => serde_yml::from_str(content)?,
    };
    Ok(doc)
}

pub fn read_document(path: &Path) -> Result<LibraryDocument, TollgateError> {
    let format = DocumentFormat::from_path(path)?;
    let content = std::fs::read_to_string(path)?;
    tracing::debug!(path = %path.display(), ?format, "reading task library");
    parse_document(&content, format)
}
