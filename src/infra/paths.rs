// src/infra/paths.rs - Config/data path resolution
//
// TOLLGATE_HOME overrides everything. Otherwise config lives in ~/.tollgate/
// and exported records default to the platform data dir.

use directories::{BaseDirs, ProjectDirs};
use std::path::PathBuf;

fn tollgate_home() -> Option<PathBuf> {
    std::env::var_os("TOLLGATE_HOME").map(PathBuf::from)
}

/// Configuration directory: $TOLLGATE_HOME/ or ~/.tollgate/
pub fn config_dir() -> PathBuf {
    if let Some(home) = tollgate_home() {
        return home;
    }
    match BaseDirs::new() {
        Some(base) => base.home_dir().join(".tollgate"),
        None => PathBuf::from(".tollgate"),
    }
}

/// Data directory: $TOLLGATE_HOME/data/ or the XDG data dir.
pub fn data_dir() -> PathBuf {
    if let Some(home) = tollgate_home() {
        return home.join("data");
    }
    ProjectDirs::from("", "", "tollgate")
        .map(|dirs| dirs.data_local_dir().to_path_buf())
        .unwrap_or_else(|| config_dir().join("data"))
}

pub fn config_file_path() -> PathBuf {
    config_dir().join("config.toml")
}

pub fn quarantine_export_path() -> PathBuf {
    data_dir().join("quarantine.json")
}

pub fn telemetry_export_path() -> PathBuf {
    data_dir().join("telemetry.json")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_file_under_config_dir() {
        let path = config_file_path();
        assert!(path.ends_with("config.toml"));
        assert_eq!(path.parent(), Some(config_dir().as_path()));
    }

    #[test]
    fn test_exports_under_data_dir() {
        assert!(quarantine_export_path().starts_with(data_dir()));
        assert!(telemetry_export_path().starts_with(data_dir()));
    }
}
