//! Runs against failing and file-backed stores

use crate::common::{memory_store, mount_no_robots, mount_page, pipeline, test_config};
use std::sync::Arc;
use sumi_harvest::output::{format_statistics, load_statistics, RunMetrics};
use sumi_harvest::pipeline::AbortReason;
use sumi_harvest::storage::{
    open_store, DedupRecord, DocumentRecord, RunRecord, RunStatus, StorageError, StorageResult, Store,
};
use sumi_harvest::{Document, FailureKind, Identity, SqliteStore, Target, TargetOutcome};
use wiremock::MockServer;

/// Delegates to SQLite but fails every commit with the given error
struct FailingCommitStore {
    inner: SqliteStore,
    error: fn() -> StorageError,
}

impl FailingCommitStore {
    fn new(error: fn() -> StorageError) -> Self {
        Self {
            inner: SqliteStore::new_in_memory().unwrap(),
            error,
        }
    }
}

impl Store for FailingCommitStore {
    fn exists(&self, identity: &Identity) -> StorageResult<bool> {
        self.inner.exists(identity)
    }

    fn reserve(&self, identity: &Identity, url: &str) -> StorageResult<()> {
        self.inner.reserve(identity, url)
    }

    fn commit(&self, _record: &DedupRecord, _document: &Document) -> StorageResult<i64> {
        Err((self.error)())
    }

    fn release(&self, identity: &Identity) -> StorageResult<()> {
        self.inner.release(identity)
    }

    fn purge_reservations(&self) -> StorageResult<usize> {
        self.inner.purge_reservations()
    }

    fn get_document(&self, identity: &Identity) -> StorageResult<Option<DocumentRecord>> {
        self.inner.get_document(identity)
    }

    fn count_documents(&self) -> StorageResult<u64> {
        self.inner.count_documents()
    }

    fn create_run(&self, config_hash: &str) -> StorageResult<i64> {
        self.inner.create_run(config_hash)
    }

    fn finish_run(&self, run_id: i64, status: RunStatus, metrics: &RunMetrics) -> StorageResult<()> {
        self.inner.finish_run(run_id, status, metrics)
    }

    fn get_run(&self, run_id: i64) -> StorageResult<RunRecord> {
        self.inner.get_run(run_id)
    }

    fn latest_run(&self) -> StorageResult<Option<RunRecord>> {
        self.inner.latest_run()
    }

    fn count_runs(&self) -> StorageResult<u64> {
        self.inner.count_runs()
    }
}

fn locked() -> StorageError {
    StorageError::Sqlite(rusqlite::Error::SqliteFailure(
        rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
        Some("database is locked".to_string()),
    ))
}

fn disk_full() -> StorageError {
    StorageError::Sqlite(rusqlite::Error::SqliteFailure(
        rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_FULL),
        None,
    ))
}

#[tokio::test]
async fn test_failed_commit_releases_reservation() {
    let server = MockServer::start().await;
    mount_no_robots(&server).await;
    mount_page(&server, "/a", "A").await;
    mount_page(&server, "/b", "B").await;

    let base = server.uri();
    let store = Arc::new(FailingCommitStore::new(locked));
    let report = pipeline(&test_config(1), store.clone())
        .run(vec![
            Target::page(format!("{}/a", base)),
            Target::page(format!("{}/b", base)),
        ])
        .await
        .unwrap();

    assert!(report.aborted.is_none());
    assert_eq!(report.metrics.failed, 2);
    for (_, outcome) in &report.outcomes {
        assert!(matches!(
            outcome,
            TargetOutcome::Failed {
                kind: FailureKind::Infrastructure,
                ..
            }
        ));
    }

    // Nothing stays reserved, so a later run can try again
    for slug in ["/a", "/b"] {
        let identity = Identity::from_url(&format!("{}{}", base, slug));
        assert!(!store.exists(&identity).unwrap());
    }
    assert_eq!(
        store.get_run(report.run_id).unwrap().status,
        RunStatus::Completed
    );
}

#[tokio::test]
async fn test_disk_full_aborts_the_run() {
    let server = MockServer::start().await;
    mount_no_robots(&server).await;
    for slug in ["/a", "/b", "/c"] {
        mount_page(&server, slug, "Page").await;
    }

    let base = server.uri();
    let store = Arc::new(FailingCommitStore::new(disk_full));
    let report = pipeline(&test_config(1), store.clone())
        .run(
            ["/a", "/b", "/c"]
                .iter()
                .map(|slug| Target::page(format!("{}{}", base, slug)))
                .collect(),
        )
        .await
        .unwrap();

    assert!(matches!(
        report.aborted,
        Some(AbortReason::Infrastructure(_))
    ));
    assert_eq!(report.outcomes.len(), 1);
    assert_eq!(report.undispatched, 2);
    assert_eq!(report.metrics.failed, 1);
    assert_eq!(
        store.get_run(report.run_id).unwrap().status,
        RunStatus::Failed
    );
}

#[tokio::test]
async fn test_statistics_survive_reopening_the_database() {
    let server = MockServer::start().await;
    mount_no_robots(&server).await;
    mount_page(&server, "/page", "Page").await;

    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("harvest.db");

    {
        let store = Arc::new(SqliteStore::new(&db_path).unwrap());
        let report = pipeline(&test_config(1), store)
            .run(vec![Target::page(format!("{}/page", server.uri()))])
            .await
            .unwrap();
        assert_eq!(report.metrics.records_written, 1);
    }

    let reopened = SqliteStore::new(&db_path).unwrap();
    let stats = load_statistics(&reopened).unwrap();
    assert_eq!(stats.documents, 1);
    assert_eq!(stats.runs, 1);

    let latest = stats.latest_run.as_ref().unwrap();
    assert_eq!(latest.status, RunStatus::Completed);
    assert_eq!(latest.success, 1);
    assert!(format_statistics(&stats).contains("Documents stored: 1"));
}

#[test]
fn test_open_store_creates_missing_directories() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("data").join("nested").join("harvest.db");

    let store = open_store(&db_path).unwrap();
    assert_eq!(store.count_documents().unwrap(), 0);
    assert!(db_path.exists());
}

#[test]
fn test_open_store_reports_unusable_directory() {
    let dir = tempfile::tempdir().unwrap();
    let blocker = dir.path().join("not-a-dir");
    std::fs::write(&blocker, "file").unwrap();

    let error = open_store(&blocker.join("harvest.db")).unwrap_err();
    assert!(matches!(error, StorageError::Io(_)));
    assert!(error.is_unrecoverable());
}

#[tokio::test]
async fn test_stale_reservations_are_purged_on_start() {
    let store = memory_store();
    let identity = Identity::from_url("https://example.com/crashed");
    store.reserve(&identity, "https://example.com/crashed").unwrap();
    assert!(store.exists(&identity).unwrap());

    pipeline(&test_config(1), store.clone())
        .run(Vec::new())
        .await
        .unwrap();

    assert!(!store.exists(&identity).unwrap());
}
