// src/cli/mod.rs - CLI definition (clap derive)

pub mod inspect;
pub mod plan;
pub mod validate;

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "tollgate", about = "Budget-gated task orchestration", version)]
pub struct Cli {
    /// Config file path
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Log level (overridden by TOLLGATE_LOG / RUST_LOG)
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Load a task library and report what it contains
    Validate {
        /// Library file (.json, .yaml, .yml). Defaults to `library_path` from config
        library: Option<PathBuf>,
    },
    /// Show which tasks would run, in what order, and why others would not
    Plan {
        /// Library file. Defaults to `library_path` from config
        library: Option<PathBuf>,
        /// Plan a declared pipeline
        #[arg(long, conflicts_with = "lane")]
        pipeline: Option<String>,
        /// Plan every task in a lane
        #[arg(long, required_unless_present = "pipeline")]
        lane: Option<String>,
        /// Restrict a lane plan to one stage
        #[arg(long, requires = "lane")]
        stage: Option<String>,
        /// Cost ceiling for the plan (0 = unbounded)
        #[arg(long)]
        max_cost: Option<f64>,
        /// Unit ceiling for the plan (0 = unbounded)
        #[arg(long)]
        max_units: Option<u64>,
        /// Tasks already completed, comma separated
        #[arg(long, value_delimiter = ',')]
        completed: Vec<String>,
    },
    /// Summarize an exported quarantine or telemetry file
    Inspect {
        #[arg(value_enum)]
        target: InspectTarget,
        /// JSON export. Defaults to the data directory export
        file: Option<PathBuf>,
        /// Print stats as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum InspectTarget {
    Quarantine,
    Telemetry,
}

/// Resolve the library argument against the configured default.
pub fn library_path(
    arg: Option<&PathBuf>,
    config: &crate::infra::config::Config,
) -> anyhow::Result<PathBuf> {
    arg.cloned()
        .or_else(|| config.library_path.clone())
        .ok_or_else(|| anyhow::anyhow!("no library given and no library_path configured"))
}
