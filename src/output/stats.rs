//! Statistics from the harvest database
//!
//! This module provides functionality for extracting and displaying
//! stored statistics for the `--stats` command.

use crate::storage::{RunRecord, StorageResult, Store};

/// Stored statistics summary
#[derive(Debug, Clone)]
pub struct StoreStatistics {
    /// Documents stored across all runs
    pub documents: u64,

    /// Number of runs recorded
    pub runs: u64,

    /// The most recent run, if any
    pub latest_run: Option<RunRecord>,
}

/// Loads statistics from the store
///
/// # Arguments
///
/// * `store` - The store to query
pub fn load_statistics(store: &dyn Store) -> StorageResult<StoreStatistics> {
    Ok(StoreStatistics {
        documents: store.count_documents()?,
        runs: store.count_runs()?,
        latest_run: store.latest_run()?,
    })
}

/// Renders statistics as the text printed by `--stats`
pub fn format_statistics(stats: &StoreStatistics) -> String {
    let mut lines = vec![
        "=== Harvest Statistics ===".to_string(),
        String::new(),
        format!("Documents stored: {}", stats.documents),
        format!("Runs recorded:    {}", stats.runs),
    ];

    match &stats.latest_run {
        Some(run) => {
            let success_rate = if run.total > 0 {
                (run.success as f64 / run.total as f64) * 100.0
            } else {
                0.0
            };

            lines.push(String::new());
            lines.push(format!("Latest run (#{}):", run.id));
            lines.push(format!("  Status:   {}", run.status));
            lines.push(format!("  Started:  {}", run.started_at));
            lines.push(format!(
                "  Finished: {}",
                run.finished_at.as_deref().unwrap_or("-")
            ));
            lines.push(format!(
                "  Targets:  {} total, {} succeeded, {} failed, {} skipped",
                run.total, run.success, run.failed, run.skipped
            ));
            lines.push(format!("  Written:  {} documents", run.records_written));
            lines.push(format!("  Success rate: {:.1}%", success_rate));
        }
        None => {
            lines.push(String::new());
            lines.push("No runs recorded yet.".to_string());
        }
    }

    lines.join("\n")
}

/// Prints statistics to stdout
pub fn print_statistics(stats: &StoreStatistics) {
    println!("{}", format_statistics(stats));
}
