// src/cli/inspect.rs - Summaries of exported quarantine and telemetry records

use std::path::{Path, PathBuf};

use super::InspectTarget;
use crate::infra::config::Config;
use crate::infra::paths;
use crate::store::{QuarantineStats, QuarantineStore, TelemetryStats, TelemetryStore};

pub fn default_export_path(target: InspectTarget) -> PathBuf {
    match target {
        InspectTarget::Quarantine => paths::quarantine_export_path(),
        InspectTarget::Telemetry => paths::telemetry_export_path(),
    }
}

pub fn run_inspect(target: InspectTarget, path: &Path, json: bool, config: &Config) -> anyhow::Result<()> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("cannot read {}: {e}", path.display()))?;

    match target {
        InspectTarget::Quarantine => {
            let stats = quarantine_stats(&content, config.quarantine.capacity)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                print_quarantine(&stats);
            }
        }
        InspectTarget::Telemetry => {
            let stats = telemetry_stats(&content)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                print_telemetry(&stats);
            }
        }
    }
    Ok(())
}

pub fn quarantine_stats(content: &str, capacity: usize) -> anyhow::Result<QuarantineStats> {
    let store = QuarantineStore::new(capacity);
    let imported = store.import(content)?;
    if imported > store.len() {
        tracing::warn!(imported, kept = store.len(), "export exceeds quarantine capacity; oldest dropped");
    }
    Ok(store.get_stats())
}

pub fn telemetry_stats(content: &str) -> anyhow::Result<TelemetryStats> {
    let store = TelemetryStore::new();
    store.import(content)?;
    Ok(store.get_stats())
}

fn print_quarantine(stats: &QuarantineStats) {
    println!("Quarantine: {} records (capacity {})", stats.total, stats.capacity);
    println!("  Last 24h:   {}", stats.last_24h);
    if !stats.by_error_kind.is_empty() {
        println!("  By error:");
        for (kind, n) in &stats.by_error_kind {
            println!("    {kind:<24} {n}");
        }
    }
    if !stats.by_task.is_empty() {
        println!("  By task:");
        for (task, n) in &stats.by_task {
            println!("    {task:<24} {n}");
        }
    }
}

fn print_telemetry(stats: &TelemetryStats) {
    println!(
        "Telemetry: {} attempts, {} succeeded, {} failed ({:.1}%)",
        stats.total,
        stats.successes,
        stats.failures,
        stats.failure_rate * 100.0
    );
    println!(
        "  Skipped {}, quarantined {}, blocked {}, cache hits {}",
        stats.skipped, stats.quarantined, stats.blocked, stats.cache_hits
    );
    println!(
        "  Usage:      {} units, ${:.4}, avg latency {:.0}ms",
        stats.total_units, stats.total_cost, stats.avg_latency_ms
    );
    if !stats.by_task.is_empty() {
        println!("  By task:");
        for (task, t) in &stats.by_task {
            println!(
                "    {task:<24} {:>5} attempts {:>4} failed  ${:.4}  {:.0}ms",
                t.attempts, t.failures, t.total_cost, t.avg_latency_ms
            );
        }
    }
}
