//! Storage module for persisting collected content
//!
//! This module handles all database operations for the collector, including:
//! - SQLite database initialization and schema management
//! - Dedup records: reservation, commit and release
//! - Document persistence
//! - Run tracking with final counters

mod schema;
mod sqlite;
mod traits;

pub use schema::{initialize_schema, SCHEMA_VERSION};
pub use sqlite::SqliteStore;
pub use traits::{StorageError, StorageResult, Store};

use crate::dedup::Identity;
use chrono::{DateTime, Utc};
use std::path::Path;

/// Opens (or creates) the SQLite store at `path`
///
/// Missing parent directories are created first.
pub fn open_store(path: &Path) -> StorageResult<SqliteStore> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    SqliteStore::new(path)
}

/// The dedup record written when a document is committed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DedupRecord {
    pub identity: Identity,
    pub url: String,
    pub first_seen_at: DateTime<Utc>,
}

/// A stored document
#[derive(Debug, Clone)]
pub struct DocumentRecord {
    pub id: i64,
    pub identity: String,
    pub url: String,
    pub title: String,
    pub content: String,
    pub links: Vec<String>,
    pub canonical_url: Option<String>,
    pub collected_at: String,
}

/// Represents a collection run
#[derive(Debug, Clone)]
pub struct RunRecord {
    pub id: i64,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub config_hash: String,
    pub status: RunStatus,
    pub total: u64,
    pub success: u64,
    pub failed: u64,
    pub skipped: u64,
    pub records_written: u64,
}

/// Status of a collection run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Running,
    Completed,
    /// Cancelled before every target was processed
    Interrupted,
    /// Aborted by an unrecoverable storage error
    Failed,
}

impl RunStatus {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Interrupted => "interrupted",
            Self::Failed => "failed",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "interrupted" => Some(Self::Interrupted),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.to_db_string())
    }
}
