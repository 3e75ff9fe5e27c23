//! Sumi-Harvest: a polite page and feed collector
//!
//! This crate fetches web pages and RSS/Atom feeds under a bounded worker
//! pool, honours robots.txt and per-origin crawl delays, retries transient
//! failures with exponential backoff, and persists each piece of content
//! exactly once behind a deduplication gate.

pub mod config;
pub mod dedup;
pub mod output;
pub mod pipeline;
pub mod robots;
pub mod state;
pub mod storage;
pub mod url;

use std::fmt;
use thiserror::Error;

/// Main error type for Sumi-Harvest operations
///
/// Per-target failures never surface here; they end up in the run report.
#[derive(Debug, Error)]
pub enum HarvestError {
    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("Invalid state transition: {from:?} -> {to:?}")]
    InvalidTransition {
        from: state::TargetState,
        to: state::TargetState,
    },
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),

    #[error("Invalid environment override {name}: {message}")]
    Override { name: String, message: String },
}

/// URL-specific errors
#[derive(Debug, Error)]
pub enum UrlError {
    #[error("Failed to parse URL: {0}")]
    Parse(String),

    #[error("Invalid URL scheme: {0}")]
    InvalidScheme(String),

    #[error("Missing domain in URL")]
    MissingDomain,

    #[error("Malformed URL: {0}")]
    Malformed(String),
}

/// Classification of a terminal target failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// Retryable network or server condition that exhausted its retries
    Transient,
    /// Permanent condition; retrying would not help
    Fatal,
    /// The store or another local resource failed
    Infrastructure,
    /// The run was cancelled while the target was in flight
    Cancelled,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Transient => "transient",
            Self::Fatal => "fatal",
            Self::Infrastructure => "infrastructure",
            Self::Cancelled => "cancelled",
        };
        f.write_str(label)
    }
}

/// Result type alias for Sumi-Harvest operations
pub type Result<T> = std::result::Result<T, HarvestError>;

// Re-export commonly used types
pub use config::Config;
pub use dedup::{DedupGate, DedupOutcome, Identity, Reservation};
pub use output::{MetricsCollector, Notifier, RunMetrics};
pub use pipeline::{Document, Pipeline, RunReport};
pub use robots::{RobotsCache, RobotsPolicy};
pub use state::{Target, TargetKind, TargetOutcome, TargetState};
pub use storage::{SqliteStore, Store};
pub use crate::url::{normalize_url, origin_key};
