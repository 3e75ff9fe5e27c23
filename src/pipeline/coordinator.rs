//! Pipeline coordinator - runs targets through the fetch-and-persist pipeline
//!
//! A fixed pool of workers drains a shared queue. Each worker takes one
//! target at a time through robots check, crawl delay, fetch with retries,
//! parsing, deduplication and persistence before taking the next. Every wait
//! on the way is cancellable; on cancellation in-flight targets fail with
//! `"cancelled"` and nothing new is dispatched.

use crate::config::Config;
use crate::dedup::{DedupGate, DedupOutcome, Identity};
use crate::output::{notifier_from_config, MetricsCollector, Notifier, RunMetrics};
use crate::pipeline::fetcher::{build_http_client, FetchOutcome, HttpFetcher};
use crate::pipeline::parser::{ContentParser, Document, Parser};
use crate::pipeline::retry::RetryPolicy;
use crate::robots::RobotsCache;
use crate::state::{OriginClock, SkipReason, Target, TargetKind, TargetOutcome, TargetState};
use crate::storage::{RunStatus, StorageError, Store};
use crate::url::{origin_key, parse_http_url};
use crate::{FailureKind, HarvestError};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

type Queue = Arc<Mutex<VecDeque<Target>>>;

/// Why a run stopped before draining its queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbortReason {
    /// The cancellation handle was triggered
    Cancelled,
    /// The store reported an error it cannot recover from
    Infrastructure(String),
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cancelled => f.write_str("run cancelled"),
            Self::Infrastructure(message) => write!(f, "storage failure: {}", message),
        }
    }
}

/// Result of [`Pipeline::run`]
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: i64,
    pub metrics: RunMetrics,
    pub aborted: Option<AbortReason>,
    /// Targets never taken off the queue because the run stopped early
    pub undispatched: usize,
    /// Terminal outcome of every dispatched target, in completion order
    pub outcomes: Vec<(Target, TargetOutcome)>,
}

impl RunReport {
    pub fn outcome_for(&self, url: &str) -> Option<&TargetOutcome> {
        self.outcomes
            .iter()
            .find(|(target, _)| target.url == url)
            .map(|(_, outcome)| outcome)
    }
}

/// Follows one target through its states, rejecting illegal moves
struct Tracker<'a> {
    target: &'a Target,
    state: TargetState,
}

impl<'a> Tracker<'a> {
    fn new(target: &'a Target) -> Self {
        Self {
            target,
            state: TargetState::Queued,
        }
    }

    fn state(&self) -> TargetState {
        self.state
    }

    fn enter(&mut self, next: TargetState) -> crate::Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(HarvestError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        tracing::trace!("{}: {} -> {}", self.target.url, self.state, next);
        self.state = next;
        Ok(())
    }
}

/// Everything the workers share
struct Shared {
    fetcher: HttpFetcher,
    robots: Arc<RobotsCache>,
    clock: OriginClock,
    retry: RetryPolicy,
    timeout: Duration,
    min_domain_interval: Duration,
    parser: Arc<dyn Parser>,
    store: Arc<dyn Store>,
    gate: DedupGate,
    metrics: MetricsCollector,
    cancel: CancellationToken,
    abort: Mutex<Option<AbortReason>>,
    /// Outcomes recorded so far; outlives a worker that panics
    done: Mutex<Vec<(Target, TargetOutcome)>>,
    /// Target each worker is processing, by worker id
    in_flight: Mutex<HashMap<usize, Target>>,
}

/// The fetch-and-persist pipeline
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use sumi_harvest::{Config, Pipeline, SqliteStore};
///
/// # async fn run(config: Config) -> sumi_harvest::Result<()> {
/// let store = Arc::new(SqliteStore::new_in_memory()?);
/// let pipeline = Pipeline::new(&config, store)?;
/// let report = pipeline.run(config.targets()).await?;
/// println!("{}", report.metrics.summary());
/// # Ok(())
/// # }
/// ```
pub struct Pipeline {
    shared: Shared,
    notifier: Arc<dyn Notifier>,
    config_hash: String,
    max_concurrent: usize,
}

impl Pipeline {
    /// Builds a pipeline from the configuration
    ///
    /// # Arguments
    ///
    /// * `config` - Validated configuration
    /// * `store` - Where documents and runs are persisted
    ///
    /// # Returns
    ///
    /// * `Ok(Pipeline)` - Ready to run
    /// * `Err(HarvestError)` - The HTTP client could not be built
    pub fn new(config: &Config, store: Arc<dyn Store>) -> crate::Result<Self> {
        let client = build_http_client(&config.user_agent)?;
        let collector = &config.collector;

        Ok(Self {
            shared: Shared {
                fetcher: HttpFetcher::new(client.clone()),
                robots: Arc::new(RobotsCache::from_config(client.clone(), config)),
                clock: OriginClock::new(),
                retry: RetryPolicy::from_config(collector),
                timeout: collector.timeout(),
                min_domain_interval: collector.min_domain_interval(),
                parser: Arc::new(ContentParser),
                gate: DedupGate::new(Arc::clone(&store)),
                store,
                metrics: MetricsCollector::new(),
                cancel: CancellationToken::new(),
                abort: Mutex::new(None),
                done: Mutex::new(Vec::new()),
                in_flight: Mutex::new(HashMap::new()),
            },
            notifier: notifier_from_config(&config.notifier, client),
            config_hash: String::new(),
            max_concurrent: usize::try_from(collector.max_concurrent)
                .unwrap_or(usize::MAX)
                .max(1),
        })
    }

    pub fn with_parser(mut self, parser: Arc<dyn Parser>) -> Self {
        self.shared.parser = parser;
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Shares a robots cache across pipelines
    pub fn with_robots(mut self, robots: Arc<RobotsCache>) -> Self {
        self.shared.robots = robots;
        self
    }

    /// Hash of the configuration, stored with the run
    pub fn with_config_hash(mut self, hash: impl Into<String>) -> Self {
        self.config_hash = hash.into();
        self
    }

    /// Token that stops the run when cancelled
    pub fn cancellation_handle(&self) -> CancellationToken {
        self.shared.cancel.clone()
    }

    /// Runs every target to a terminal state
    ///
    /// Per-target failures never fail the run. The run stops early only
    /// when cancelled or when the store hits an unrecoverable error; both
    /// are reported in [`RunReport::aborted`]. An error is returned only if
    /// the run could not be started at all.
    pub async fn run(self, targets: Vec<Target>) -> crate::Result<RunReport> {
        let Self {
            shared,
            notifier,
            config_hash,
            max_concurrent,
        } = self;
        let shared = Arc::new(shared);
        shared.metrics.start();

        let run_id = match start_run(shared.store.as_ref(), &config_hash) {
            Ok(run_id) => run_id,
            Err(e) => {
                shared.metrics.end();
                let message = format!("cannot start run: {}", e);
                if let Err(notify_error) = notifier
                    .notify(&shared.metrics.snapshot(), Some(message.as_str()))
                    .await
                {
                    tracing::warn!("Notification failed: {}", notify_error);
                }
                return Err(e.into());
            }
        };

        let worker_count = max_concurrent.min(targets.len());
        tracing::info!(
            "Starting run {} with {} targets on {} workers",
            run_id,
            targets.len(),
            worker_count
        );

        let queue: Queue = Arc::new(Mutex::new(targets.into_iter().collect()));
        let mut workers = JoinSet::new();
        for worker_id in 0..worker_count {
            let shared = Arc::clone(&shared);
            let queue = Arc::clone(&queue);
            workers.spawn(async move { shared.work(worker_id, queue).await });
        }

        let mut lost_workers = 0;
        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                tracing::error!("Worker task failed: {}", e);
                lost_workers += 1;
            }
        }
        if lost_workers > 0 {
            tracing::error!("{} of {} workers crashed", lost_workers, worker_count);
            shared.fail_lost_targets(&queue);
        }

        let undispatched = queue.lock().unwrap_or_else(PoisonError::into_inner).len();
        let outcomes = std::mem::take(
            &mut *shared.done.lock().unwrap_or_else(PoisonError::into_inner),
        );
        shared.metrics.end();
        let metrics = shared.metrics.snapshot();

        let aborted = shared
            .abort_reason()
            .or_else(|| shared.cancel.is_cancelled().then_some(AbortReason::Cancelled));
        let status = match &aborted {
            None => RunStatus::Completed,
            Some(AbortReason::Cancelled) => RunStatus::Interrupted,
            Some(AbortReason::Infrastructure(_)) => RunStatus::Failed,
        };

        if let Err(e) = shared.store.finish_run(run_id, status, &metrics) {
            tracing::warn!("Failed to record the end of run {}: {}", run_id, e);
        }

        let error_message = aborted.as_ref().map(ToString::to_string);
        if let Err(e) = notifier.notify(&metrics, error_message.as_deref()).await {
            tracing::warn!("Notification failed: {}", e);
        }

        match &aborted {
            Some(reason) => tracing::warn!(
                "Run {} stopped ({}): {} processed, {} never dispatched",
                run_id,
                reason,
                metrics.total,
                undispatched
            ),
            None => tracing::info!(
                "Run {} complete: {} succeeded, {} failed, {} skipped",
                run_id,
                metrics.success,
                metrics.failed,
                metrics.skipped
            ),
        }

        Ok(RunReport {
            run_id,
            metrics,
            aborted,
            undispatched,
            outcomes,
        })
    }
}

fn start_run(store: &dyn Store, config_hash: &str) -> Result<i64, StorageError> {
    let purged = store.purge_reservations()?;
    if purged > 0 {
        tracing::info!("Purged {} stale reservations", purged);
    }
    store.create_run(config_hash)
}

impl Shared {
    async fn work(&self, worker_id: usize, queue: Queue) {
        loop {
            if self.cancel.is_cancelled() {
                break;
            }
            let next = queue
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .pop_front();
            let Some(target) = next else {
                break;
            };

            tracing::trace!("Worker {} took {}", worker_id, target);
            self.lock_in_flight().insert(worker_id, target.clone());
            let outcome = self.process(&target).await;
            self.lock_in_flight().remove(&worker_id);
            self.finish(target, outcome);
        }

        tracing::trace!("Worker {} finished", worker_id);
    }

    fn lock_in_flight(&self) -> std::sync::MutexGuard<'_, HashMap<usize, Target>> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn finish(&self, target: Target, outcome: TargetOutcome) {
        self.record(&target, &outcome);
        self.done
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((target, outcome));
    }

    /// Fails the targets a crashed worker held, and the queue it left behind
    ///
    /// Queued targets are only failed when the run was not stopped on
    /// purpose; otherwise they stay undispatched.
    fn fail_lost_targets(&self, queue: &Queue) {
        let lost: Vec<Target> = self.lock_in_flight().drain().map(|(_, target)| target).collect();
        for target in lost {
            self.finish(target, TargetOutcome::failed(FailureKind::Fatal, "worker crashed"));
        }

        if self.cancel.is_cancelled() {
            return;
        }
        let stranded: Vec<Target> = queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for target in stranded {
            self.finish(
                target,
                TargetOutcome::failed(FailureKind::Fatal, "no worker left to process target"),
            );
        }
    }

    /// Emits the single metrics event for a terminal outcome
    fn record(&self, target: &Target, outcome: &TargetOutcome) {
        match outcome {
            TargetOutcome::Recorded { written } => {
                tracing::info!("Recorded {} ({} written)", target, written);
                self.metrics.record_success();
                self.metrics.record_written(*written as u64);
            }
            TargetOutcome::Skipped(reason) => {
                tracing::debug!("Skipped {}: {}", target, reason);
                self.metrics.record_skip();
            }
            TargetOutcome::Failed { kind, reason } => {
                tracing::warn!("Failed {} ({}): {}", target, kind, reason);
                self.metrics.record_failure(&target.url, reason);
            }
        }
    }

    async fn process(&self, target: &Target) -> TargetOutcome {
        let mut tracker = Tracker::new(target);

        let outcome = match self.drive(&mut tracker).await {
            Ok(outcome) => outcome,
            Err(e) => TargetOutcome::failed(FailureKind::Fatal, e.to_string()),
        };

        if let Err(e) = tracker.enter(outcome.state()) {
            tracing::error!("{}: {}", target.url, e);
        }
        outcome
    }

    /// Awaits `future` unless the run is cancelled first
    async fn cancellable<F: Future>(&self, future: F) -> Option<F::Output> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            output = future => Some(output),
        }
    }

    async fn drive(&self, tracker: &mut Tracker<'_>) -> crate::Result<TargetOutcome> {
        let target = tracker.target;
        let url = match parse_http_url(&target.url) {
            Ok(url) => url,
            Err(e) => {
                return Ok(TargetOutcome::failed(
                    FailureKind::Fatal,
                    format!("malformed URL: {}", e),
                ))
            }
        };

        // ===== Robots =====
        tracker.enter(TargetState::RobotsCheck)?;
        let Some(policy) = self.cancellable(self.robots.policy_for(&url)).await else {
            return Ok(TargetOutcome::cancelled());
        };
        if policy.as_ref().is_some_and(|p| !p.is_allowed(url.as_str())) {
            return Ok(TargetOutcome::Skipped(SkipReason::Disallowed));
        }
        let robots_delay = policy.and_then(|p| p.crawl_delay);

        // ===== Crawl delay =====
        let delay = robots_delay.unwrap_or_default().max(self.min_domain_interval);
        let wait = origin_key(&url).map_or(Duration::ZERO, |origin| self.clock.reserve(&origin, delay));
        if !wait.is_zero() {
            tracker.enter(TargetState::Delayed)?;
            tracing::debug!("Waiting {:?} before fetching {}", wait, url);
            if self.cancellable(tokio::time::sleep(wait)).await.is_none() {
                return Ok(TargetOutcome::cancelled());
            }
        }

        // ===== Fetch with retries =====
        let mut attempt_number = 1;
        let body = loop {
            tracker.enter(TargetState::Fetching)?;
            let Some(attempt) = self
                .cancellable(self.fetcher.attempt(target, attempt_number, self.timeout))
                .await
            else {
                return Ok(TargetOutcome::cancelled());
            };

            match attempt.outcome {
                FetchOutcome::Success(body) => break body,
                FetchOutcome::FatalFailure(reason) => {
                    return Ok(TargetOutcome::failed(FailureKind::Fatal, reason));
                }
                transient => {
                    let reason = transient.reason().unwrap_or_default().to_string();
                    if !self.retry.should_retry(attempt_number, &transient) {
                        return Ok(TargetOutcome::failed(FailureKind::Transient, reason));
                    }

                    let backoff = self.retry.delay_for(attempt_number, &transient);
                    tracing::debug!(
                        "Attempt {} for {} failed ({}), retrying in {:?}",
                        attempt_number,
                        target.url,
                        reason,
                        backoff
                    );
                    if self.cancellable(tokio::time::sleep(backoff)).await.is_none() {
                        return Ok(TargetOutcome::cancelled());
                    }
                    attempt_number += 1;
                }
            }
        };

        // ===== Parse =====
        tracker.enter(TargetState::Parsing)?;
        let document = match self.parser.parse(&body, &target.url, target.kind) {
            Ok(document) => document,
            Err(e) => return Ok(TargetOutcome::failed(FailureKind::Fatal, e.to_string())),
        };

        // ===== Dedup and persist =====
        tracker.enter(TargetState::DedupCheck)?;
        match target.kind {
            TargetKind::Page => self.persist_page(tracker, &document),
            TargetKind::Feed => self.persist_feed(tracker, &document),
        }
    }

    fn persist_page(&self, tracker: &mut Tracker<'_>, document: &Document) -> crate::Result<TargetOutcome> {
        let target = tracker.target;
        let url = &target.url;
        let identity = Identity::for_document(document, url);

        let reservation = match self.gate.check_and_reserve(&identity, url) {
            Ok(DedupOutcome::Fresh(reservation)) => reservation,
            Ok(DedupOutcome::Duplicate) => return Ok(TargetOutcome::Skipped(SkipReason::Duplicate)),
            Err(e) => return Ok(self.storage_failure(e)),
        };

        tracker.enter(TargetState::Persisting)?;
        match reservation.commit(document) {
            Ok(_) => Ok(TargetOutcome::Recorded { written: 1 }),
            Err(e) => Ok(self.storage_failure(e)),
        }
    }

    /// Dedups and stores each entry on its own
    fn persist_feed(&self, tracker: &mut Tracker<'_>, feed: &Document) -> crate::Result<TargetOutcome> {
        if feed.entries.is_empty() {
            return Ok(TargetOutcome::Skipped(SkipReason::NoEntries));
        }

        let mut written = 0;
        let mut first_error: Option<StorageError> = None;

        for entry in &feed.entries {
            if tracker.state() == TargetState::Persisting {
                tracker.enter(TargetState::DedupCheck)?;
            }

            let identity = Identity::from_url(&entry.link);
            let result = match self.gate.check_and_reserve(&identity, &entry.link) {
                Ok(DedupOutcome::Duplicate) => continue,
                Ok(DedupOutcome::Fresh(reservation)) => {
                    tracker.enter(TargetState::Persisting)?;
                    reservation.commit(&Document::from_entry(entry, feed.collected_at))
                }
                Err(e) => Err(e),
            };

            match result {
                Ok(_) => written += 1,
                Err(e) => {
                    tracing::warn!("Failed to store feed entry {}: {}", entry.link, e);
                    let unrecoverable = e.is_unrecoverable();
                    first_error.get_or_insert(e);
                    if unrecoverable {
                        break;
                    }
                }
            }
        }

        match (written, first_error) {
            (0, Some(e)) => Ok(self.storage_failure(e)),
            (0, None) => Ok(TargetOutcome::Skipped(SkipReason::Duplicate)),
            (written, error) => {
                if let Some(e) = error {
                    self.check_unrecoverable(&e);
                }
                Ok(TargetOutcome::Recorded { written })
            }
        }
    }

    fn storage_failure(&self, error: StorageError) -> TargetOutcome {
        self.check_unrecoverable(&error);
        TargetOutcome::failed(FailureKind::Infrastructure, error.to_string())
    }

    /// Stops the run when the store can no longer be used
    fn check_unrecoverable(&self, error: &StorageError) {
        if !error.is_unrecoverable() {
            return;
        }

        let mut slot = self.abort.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_none() {
            tracing::error!("Unrecoverable storage error, stopping run: {}", error);
            *slot = Some(AbortReason::Infrastructure(error.to_string()));
        }
        drop(slot);
        self.cancel.cancel();
    }

    fn abort_reason(&self) -> Option<AbortReason> {
        self.abort
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
