//! Storage trait and error types
//!
//! This module defines the trait the pipeline persists through and the
//! associated error types.

use crate::dedup::Identity;
use crate::output::RunMetrics;
use crate::pipeline::Document;
use crate::storage::{DedupRecord, DocumentRecord, RunRecord, RunStatus};
use rusqlite::ErrorCode;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Run not found: {0}")]
    RunNotFound(i64),

    #[error("No reservation held for {0}")]
    MissingReservation(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),
}

impl StorageError {
    /// True when a uniqueness constraint rejected the write
    pub fn is_constraint_violation(&self) -> bool {
        match self {
            Self::ConstraintViolation(_) => true,
            Self::Sqlite(e) => sqlite_code(e) == Some(ErrorCode::ConstraintViolation),
            _ => false,
        }
    }

    /// True when the database file itself can no longer be used
    ///
    /// These errors abort the whole run instead of failing one target.
    pub fn is_unrecoverable(&self) -> bool {
        match self {
            Self::Io(_) => true,
            Self::Sqlite(e) => matches!(
                sqlite_code(e),
                Some(
                    ErrorCode::CannotOpen
                        | ErrorCode::NotADatabase
                        | ErrorCode::DatabaseCorrupt
                        | ErrorCode::ReadOnly
                        | ErrorCode::DiskFull
                        | ErrorCode::SystemIoFailure
                )
            ),
            _ => false,
        }
    }
}

fn sqlite_code(error: &rusqlite::Error) -> Option<ErrorCode> {
    match error {
        rusqlite::Error::SqliteFailure(e, _) => Some(e.code),
        _ => None,
    }
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Persistence backend used by the pipeline
///
/// Implementations must be safe to call from many workers at once. The
/// uniqueness of `reserve` is what makes deduplication atomic: of several
/// concurrent reservations for one identity exactly one may succeed, the
/// others must fail with a constraint violation.
pub trait Store: Send + Sync {
    // ===== Deduplication =====

    /// Checks whether a record (reserved or committed) exists for `identity`
    fn exists(&self, identity: &Identity) -> StorageResult<bool>;

    /// Inserts a `reserved` record for `identity`
    ///
    /// Fails with a constraint violation when any record already exists.
    fn reserve(&self, identity: &Identity, url: &str) -> StorageResult<()>;

    /// Writes `document` and flips the reservation to `committed`, atomically
    ///
    /// # Returns
    ///
    /// The ID of the stored document
    fn commit(&self, record: &DedupRecord, document: &Document) -> StorageResult<i64>;

    /// Drops an uncommitted reservation; committed records are untouched
    fn release(&self, identity: &Identity) -> StorageResult<()>;

    /// Drops every uncommitted reservation, returning how many were removed
    ///
    /// Called when a run starts, to clear reservations left by a process
    /// that died mid-write.
    fn purge_reservations(&self) -> StorageResult<usize>;

    // ===== Documents =====

    fn get_document(&self, identity: &Identity) -> StorageResult<Option<DocumentRecord>>;

    fn count_documents(&self) -> StorageResult<u64>;

    // ===== Run Management =====

    /// Creates a new run in the `running` state
    ///
    /// # Arguments
    ///
    /// * `config_hash` - Hash of the configuration the run uses
    fn create_run(&self, config_hash: &str) -> StorageResult<i64>;

    /// Records the final status and counters of a run
    fn finish_run(&self, run_id: i64, status: RunStatus, metrics: &RunMetrics) -> StorageResult<()>;

    fn get_run(&self, run_id: i64) -> StorageResult<RunRecord>;

    /// Gets the most recent run
    fn latest_run(&self) -> StorageResult<Option<RunRecord>>;

    fn count_runs(&self) -> StorageResult<u64>;
}
