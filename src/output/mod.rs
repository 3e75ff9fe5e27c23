//! Output module for run reporting
//!
//! This module handles:
//! - Collecting per-run metrics and rendering the run summary
//! - Notifying a webhook (or the log) when a run ends
//! - Reading stored statistics for the `--stats` command

mod metrics;
mod notifier;
pub mod stats;

pub use metrics::{FailureRecord, MetricsCollector, RunMetrics};
pub use notifier::{
    build_payload, notifier_from_config, LogNotifier, Notifier, NotifyError, StatusColour,
    WebhookNotifier,
};
pub use stats::{format_statistics, load_statistics, print_statistics, StoreStatistics};
