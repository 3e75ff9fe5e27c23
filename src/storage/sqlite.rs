//! SQLite storage implementation
//!
//! This module provides a SQLite-based implementation of the [`Store`] trait.
//! The connection sits behind a mutex so one store can be shared by every
//! worker; each call holds the lock only for its own statements.

use crate::dedup::Identity;
use crate::output::RunMetrics;
use crate::pipeline::Document;
use crate::storage::schema::initialize_schema;
use crate::storage::traits::{StorageError, StorageResult, Store};
use crate::storage::{DedupRecord, DocumentRecord, RunRecord, RunStatus};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

const RUN_COLUMNS: &str =
    "id, started_at, finished_at, config_hash, status, total, success, failed, skipped, records_written";

/// SQLite storage backend
#[derive(Debug)]
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Opens or creates the database at `path`
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    ///
    /// # Returns
    ///
    /// * `Ok(SqliteStore)` - Successfully opened/created database
    /// * `Err(StorageError)` - Failed to open database or apply the schema
    pub fn new(path: &Path) -> StorageResult<Self> {
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            PRAGMA busy_timeout = 5000;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Creates an in-memory database
    pub fn new_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn run_from_row(row: &Row<'_>) -> rusqlite::Result<RunRecord> {
    Ok(RunRecord {
        id: row.get(0)?,
        started_at: row.get(1)?,
        finished_at: row.get(2)?,
        config_hash: row.get(3)?,
        status: RunStatus::from_db_string(&row.get::<_, String>(4)?).unwrap_or(RunStatus::Failed),
        total: row.get::<_, i64>(5)? as u64,
        success: row.get::<_, i64>(6)? as u64,
        failed: row.get::<_, i64>(7)? as u64,
        skipped: row.get::<_, i64>(8)? as u64,
        records_written: row.get::<_, i64>(9)? as u64,
    })
}

impl Store for SqliteStore {
    // ===== Deduplication =====

    fn exists(&self, identity: &Identity) -> StorageResult<bool> {
        let found: Option<i64> = self
            .lock()
            .query_row(
                "SELECT 1 FROM dedup_records WHERE identity = ?1",
                params![identity.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn reserve(&self, identity: &Identity, url: &str) -> StorageResult<()> {
        let now = Utc::now().to_rfc3339();
        let result = self.lock().execute(
            "INSERT INTO dedup_records (identity, url, status, first_seen_at) VALUES (?1, ?2, 'reserved', ?3)",
            params![identity.as_str(), url, now],
        );

        match result {
            Ok(_) => Ok(()),
            Err(e) => {
                let error = StorageError::from(e);
                if error.is_constraint_violation() {
                    Err(StorageError::ConstraintViolation(identity.to_string()))
                } else {
                    Err(error)
                }
            }
        }
    }

    fn commit(&self, record: &DedupRecord, document: &Document) -> StorageResult<i64> {
        let links: Vec<&str> = document.extracted_links.iter().map(String::as_str).collect();
        let links_json =
            serde_json::to_string(&links).map_err(|e| StorageError::Serialization(e.to_string()))?;

        let mut conn = self.lock();
        let tx = conn.transaction()?;

        let flipped = tx.execute(
            "UPDATE dedup_records SET status = 'committed' WHERE identity = ?1 AND status = 'reserved'",
            params![record.identity.as_str()],
        )?;
        if flipped == 0 {
            return Err(StorageError::MissingReservation(record.identity.to_string()));
        }

        tx.execute(
            "INSERT INTO documents (identity, url, title, content, links, canonical_url, collected_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                record.identity.as_str(),
                document.url,
                document.title,
                document.content,
                links_json,
                document.canonical_url,
                document.collected_at.to_rfc3339(),
            ],
        )?;
        let id = tx.last_insert_rowid();

        tx.commit()?;
        Ok(id)
    }

    fn release(&self, identity: &Identity) -> StorageResult<()> {
        self.lock().execute(
            "DELETE FROM dedup_records WHERE identity = ?1 AND status = 'reserved'",
            params![identity.as_str()],
        )?;
        Ok(())
    }

    fn purge_reservations(&self) -> StorageResult<usize> {
        let removed = self
            .lock()
            .execute("DELETE FROM dedup_records WHERE status = 'reserved'", [])?;
        Ok(removed)
    }

    // ===== Documents =====

    fn get_document(&self, identity: &Identity) -> StorageResult<Option<DocumentRecord>> {
        let conn = self.lock();
        let row = conn
            .query_row(
                "SELECT id, identity, url, title, content, links, canonical_url, collected_at
                 FROM documents WHERE identity = ?1",
                params![identity.as_str()],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, String>(5)?,
                        row.get::<_, Option<String>>(6)?,
                        row.get::<_, String>(7)?,
                    ))
                },
            )
            .optional()?;

        let Some((id, identity, url, title, content, links_json, canonical_url, collected_at)) = row
        else {
            return Ok(None);
        };

        let links: Vec<String> = serde_json::from_str(&links_json)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;

        Ok(Some(DocumentRecord {
            id,
            identity,
            url,
            title,
            content,
            links,
            canonical_url,
            collected_at,
        }))
    }

    fn count_documents(&self) -> StorageResult<u64> {
        let count: i64 = self
            .lock()
            .query_row("SELECT COUNT(*) FROM documents", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    // ===== Run Management =====

    fn create_run(&self, config_hash: &str) -> StorageResult<i64> {
        let now = Utc::now().to_rfc3339();
        let conn = self.lock();
        conn.execute(
            "INSERT INTO runs (started_at, config_hash, status) VALUES (?1, ?2, ?3)",
            params![now, config_hash, RunStatus::Running.to_db_string()],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn finish_run(&self, run_id: i64, status: RunStatus, metrics: &RunMetrics) -> StorageResult<()> {
        let finished_at = metrics.ended_at.unwrap_or_else(Utc::now).to_rfc3339();
        let updated = self.lock().execute(
            "UPDATE runs SET status = ?1, finished_at = ?2, total = ?3, success = ?4,
             failed = ?5, skipped = ?6, records_written = ?7 WHERE id = ?8",
            params![
                status.to_db_string(),
                finished_at,
                metrics.total as i64,
                metrics.success as i64,
                metrics.failed as i64,
                metrics.skipped as i64,
                metrics.records_written as i64,
                run_id
            ],
        )?;

        if updated == 0 {
            return Err(StorageError::RunNotFound(run_id));
        }
        Ok(())
    }

    fn get_run(&self, run_id: i64) -> StorageResult<RunRecord> {
        self.lock()
            .query_row(
                &format!("SELECT {} FROM runs WHERE id = ?1", RUN_COLUMNS),
                params![run_id],
                run_from_row,
            )
            .optional()?
            .ok_or(StorageError::RunNotFound(run_id))
    }

    fn latest_run(&self) -> StorageResult<Option<RunRecord>> {
        let run = self
            .lock()
            .query_row(
                &format!("SELECT {} FROM runs ORDER BY id DESC LIMIT 1", RUN_COLUMNS),
                [],
                run_from_row,
            )
            .optional()?;
        Ok(run)
    }

    fn count_runs(&self) -> StorageResult<u64> {
        let count: i64 = self
            .lock()
            .query_row("SELECT COUNT(*) FROM runs", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}
