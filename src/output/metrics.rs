//! Run metrics
//!
//! The [`MetricsCollector`] is the single writer of a run's counters. Each
//! target produces exactly one terminal event (success, failure or skip);
//! snapshots can be taken at any time.

use chrono::{DateTime, Utc};
use std::fmt::Write as _;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// A terminal failure, kept for the summary and the notifier
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureRecord {
    pub url: String,
    pub reason: String,
    pub at: DateTime<Utc>,
}

/// Counters for one run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunMetrics {
    pub total: u64,
    pub success: u64,
    pub failed: u64,
    pub skipped: u64,
    /// Documents written; a feed target can write many
    pub records_written: u64,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub failures: Vec<FailureRecord>,
}

impl RunMetrics {
    /// `success / total`, or 0 for an empty run
    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.success as f64 / self.total as f64
        }
    }

    /// Wall time between start and end, once the run has ended
    pub fn duration(&self) -> Option<Duration> {
        let (start, end) = (self.started_at?, self.ended_at?);
        (end - start).to_std().ok()
    }

    /// Average wall time per target
    pub fn avg_duration(&self) -> Option<Duration> {
        let total = u32::try_from(self.total).ok().filter(|t| *t > 0)?;
        Some(self.duration()? / total)
    }

    /// Human-readable summary
    pub fn summary(&self) -> String {
        let mut out = String::from("=== Collection Summary ===\n");
        let _ = writeln!(out, "Total targets:   {}", self.total);
        let _ = writeln!(out, "Succeeded:       {}", self.success);
        let _ = writeln!(out, "Failed:          {}", self.failed);
        let _ = writeln!(out, "Skipped:         {}", self.skipped);
        let _ = writeln!(out, "Records written: {}", self.records_written);
        let _ = writeln!(out, "Success rate:    {:.1}%", self.success_rate() * 100.0);

        match self.duration() {
            Some(duration) => {
                let _ = writeln!(out, "Duration:        {:.1}s", duration.as_secs_f64());
            }
            None => out.push_str("Duration:        running\n"),
        }
        if let Some(avg) = self.avg_duration() {
            let _ = writeln!(out, "Avg per target:  {:.2}s", avg.as_secs_f64());
        }

        out.trim_end().to_string()
    }
}

/// Thread-safe collector of [`RunMetrics`]
#[derive(Debug, Default)]
pub struct MetricsCollector {
    inner: Mutex<RunMetrics>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RunMetrics> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Resets the counters and stamps the start time
    pub fn start(&self) {
        *self.lock() = RunMetrics {
            started_at: Some(Utc::now()),
            ..RunMetrics::default()
        };
    }

    pub fn record_success(&self) {
        let mut metrics = self.lock();
        metrics.total += 1;
        metrics.success += 1;
    }

    pub fn record_failure(&self, url: &str, reason: &str) {
        let mut metrics = self.lock();
        metrics.total += 1;
        metrics.failed += 1;
        metrics.failures.push(FailureRecord {
            url: url.to_string(),
            reason: reason.to_string(),
            at: Utc::now(),
        });
    }

    pub fn record_skip(&self) {
        let mut metrics = self.lock();
        metrics.total += 1;
        metrics.skipped += 1;
    }

    /// Adds `count` written documents; does not touch the target counters
    pub fn record_written(&self, count: u64) {
        self.lock().records_written += count;
    }

    /// Stamps the end time; later calls have no effect
    pub fn end(&self) {
        let mut metrics = self.lock();
        if metrics.ended_at.is_none() {
            metrics.ended_at = Some(Utc::now());
        }
    }

    pub fn snapshot(&self) -> RunMetrics {
        self.lock().clone()
    }

    pub fn summary(&self) -> String {
        self.snapshot().summary()
    }
}
