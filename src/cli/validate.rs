// src/cli/validate.rs - Load a task library and print its shape

use std::path::Path;

use crate::library::{LibraryStats, TaskLibrary};

pub fn run_validate(path: &Path) -> anyhow::Result<()> {
    let library = TaskLibrary::load_from(path)
        .map_err(|e| anyhow::anyhow!("{}: {e}", path.display()))?;
    tracing::debug!(path = %path.display(), "library loaded");

    println!("{}: ok", path.display());
    if let Some(version) = library.document_version() {
        println!("  Version:    {version}");
    }
    print_stats(&library.stats());
    Ok(())
}

fn print_stats(stats: &LibraryStats) {
    println!(
        "  Tasks:      {} definitions, {} distinct ids ({} deprecated)",
        stats.total_definitions, stats.distinct_ids, stats.deprecated
    );
    println!("  Pipelines:  {}", stats.pipeline_count);
    print_counts("Lanes", &stats.by_lane);
    print_counts("Executors", &stats.by_executor_kind);
    print_counts("Criticality", &stats.by_criticality);
}

fn print_counts(label: &str, counts: &std::collections::BTreeMap<String, usize>) {
    if counts.is_empty() {
        return;
    }
    let joined: Vec<String> = counts.iter().map(|(k, n)| format!("{k}={n}")).collect();
    println!("  {:<11} {}", format!("{label}:"), joined.join(", "));
}
