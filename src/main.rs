// src/main.rs - Tollgate entry point

use clap::Parser;

use tollgate::cli::{self, Cli, Commands};
use tollgate::infra::config::Config;
use tollgate::infra::logger;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load config (falls back to defaults if no config.toml)
    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };

    let level = cli.log_level.as_deref().unwrap_or(&config.logging.level);
    logger::init_logging(level);

    match &cli.command {
        Commands::Validate { library } => {
            let path = cli::library_path(library.as_ref(), &config)?;
            cli::validate::run_validate(&path)
        }
        Commands::Plan {
            library,
            pipeline,
            lane,
            stage,
            max_cost,
            max_units,
            completed,
        } => {
            let path = cli::library_path(library.as_ref(), &config)?;
            let args = cli::plan::PlanArgs {
                pipeline: pipeline.clone(),
                lane: lane.clone(),
                stage: stage.clone(),
                max_cost: *max_cost,
                max_units: *max_units,
                completed: completed.clone(),
            };
            cli::plan::run_plan(&path, &args, &config)
        }
        Commands::Inspect { target, file, json } => {
            let path = file
                .clone()
                .unwrap_or_else(|| cli::inspect::default_export_path(*target));
            cli::inspect::run_inspect(*target, &path, *json, &config)
        }
    }
}
