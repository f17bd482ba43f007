// src/infra/config.rs - Configuration loading (TOML)

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::infra::paths;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Task library used by the CLI when no path argument is given.
    #[serde(default)]
    pub library_path: Option<PathBuf>,

    #[serde(default)]
    pub budget: BudgetConfig,

    #[serde(default)]
    pub quarantine: QuarantineConfig,

    #[serde(default)]
    pub selector: SelectorConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Default per-run ceilings, used when a pipeline declares none.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetConfig {
    pub max_total_units: u64,
    pub max_total_cost: f64,
    pub max_duration_secs: u64,
    pub warning_threshold: f64,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            max_total_units: 200_000,
            max_total_cost: 2.0,
            max_duration_secs: 300,
            warning_threshold: 0.8,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuarantineConfig {
    pub capacity: usize,
}

impl Default for QuarantineConfig {
    fn default() -> Self {
        Self { capacity: 1000 }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SelectorConfig {
    #[serde(default)]
    pub include_experimental: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    pub enabled: bool,
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_entries: 512,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "warn".into(),
        }
    }
}

impl Config {
    /// Load config from file, falling back to defaults.
    pub fn load() -> anyhow::Result<Self> {
        let path = paths::config_file_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        let t = self.budget.warning_threshold;
        if !(t > 0.0 && t <= 1.0) {
            anyhow::bail!("budget.warning_threshold must be in (0, 1], got {t}");
        }
        if !self.budget.max_total_cost.is_finite() || self.budget.max_total_cost < 0.0 {
            anyhow::bail!("budget.max_total_cost must be a non-negative number");
        }
        if self.quarantine.capacity == 0 {
            anyhow::bail!("quarantine.capacity must be at least 1");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_reasonable() {
        let c = Config::default();
        assert_eq!(c.budget.max_total_units, 200_000);
        assert!((c.budget.max_total_cost - 2.0).abs() < 0.001);
        assert_eq!(c.budget.max_duration_secs, 300);
        assert!((c.budget.warning_threshold - 0.8).abs() < 0.001);
        assert_eq!(c.quarantine.capacity, 1000);
        assert!(!c.selector.include_experimental);
        assert!(c.cache.enabled);
        assert_eq!(c.logging.level, "warn");
        assert!(c.library_path.is_none());
    }

    #[test]
    fn test_parse_minimal_toml() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.quarantine.capacity, 1000);
        assert_eq!(config.cache.max_entries, 512);
    }

    #[test]
    fn test_parse_full_toml() {
        let toml_str = r#"
library_path = "catalog/library.yaml"

[budget]
max_total_units = 50000
max_total_cost = 1.5
max_duration_secs = 120
warning_threshold = 0.9

[quarantine]
capacity = 50

[selector]
include_experimental = true

[cache]
enabled = false
max_entries = 16

[logging]
level = "debug"
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(
            config.library_path,
            Some(PathBuf::from("catalog/library.yaml"))
        );
        assert_eq!(config.budget.max_total_units, 50_000);
        assert!((config.budget.max_total_cost - 1.5).abs() < 0.001);
        assert_eq!(config.budget.max_duration_secs, 120);
        assert_eq!(config.quarantine.capacity, 50);
        assert!(config.selector.include_experimental);
        assert!(!config.cache.enabled);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_serialize_roundtrip() {
        let config = Config::default();
        let serialized = toml::to_string(&config).unwrap();
        let deserialized: Config = toml::from_str(&serialized).unwrap();
        assert_eq!(
            deserialized.budget.max_total_units,
            config.budget.max_total_units
        );
        assert_eq!(deserialized.quarantine.capacity, config.quarantine.capacity);
    }

    #[test]
    fn test_load_nonexistent_file() {
        let result = Config::load_from(Path::new("/nonexistent/config.toml"));
        assert!(result.is_err());
    }

    #[test]
    fn test_rejects_bad_warning_threshold() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[budget]\nmax_total_units = 10\nmax_total_cost = 1.0\nmax_duration_secs = 5\nwarning_threshold = 1.5\n").unwrap();
        let err = Config::load_from(&path).unwrap_err();
        assert!(err.to_string().contains("warning_threshold"));
    }

    #[test]
    fn test_rejects_zero_capacity() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[quarantine]\ncapacity = 0\n").unwrap();
        assert!(Config::load_from(&path).is_err());
    }
}
