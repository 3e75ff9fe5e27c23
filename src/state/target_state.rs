//! Target state definitions for tracking a target through the pipeline

use crate::FailureKind;
use std::fmt;

/// Where a target currently is in the fetch-and-persist pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TargetState {
    // ===== Active States =====
    /// Waiting for a worker
    Queued,

    /// Consulting the robots policy of the target's origin
    RobotsCheck,

    /// Sleeping out the origin's crawl delay
    Delayed,

    /// An HTTP attempt (or retry) is in flight
    Fetching,

    /// The body is being turned into a document
    Parsing,

    /// Claiming the document's identity in the store
    DedupCheck,

    /// Writing the document under a fresh reservation
    Persisting,

    // ===== Terminal States =====
    /// At least one document was written
    Recorded,

    /// Nothing to write: disallowed, duplicate or empty
    Skipped,

    /// Gave up; the reason is recorded with the metrics
    Failed,
}

impl TargetState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Recorded | Self::Skipped | Self::Failed)
    }

    /// Checks whether `next` is a legal successor of this state
    ///
    /// Any active state may fail (cancellation can interrupt every wait).
    /// `Fetching -> Fetching` is a retry and `Persisting -> DedupCheck`
    /// moves on to the next feed entry.
    pub fn can_transition_to(&self, next: TargetState) -> bool {
        use TargetState::*;

        if self.is_terminal() {
            return false;
        }
        if next == Failed {
            return true;
        }

        matches!(
            (*self, next),
            (Queued, RobotsCheck)
                | (RobotsCheck, Skipped)
                | (RobotsCheck, Delayed)
                | (RobotsCheck, Fetching)
                | (Delayed, Fetching)
                | (Fetching, Fetching)
                | (Fetching, Parsing)
                | (Parsing, DedupCheck)
                | (DedupCheck, Skipped)
                | (DedupCheck, Persisting)
                | (DedupCheck, Recorded)
                | (Persisting, DedupCheck)
                | (Persisting, Recorded)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::RobotsCheck => "robots_check",
            Self::Delayed => "delayed",
            Self::Fetching => "fetching",
            Self::Parsing => "parsing",
            Self::DedupCheck => "dedup_check",
            Self::Persisting => "persisting",
            Self::Recorded => "recorded",
            Self::Skipped => "skipped",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for TargetState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a target ended without writing anything
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SkipReason {
    /// robots.txt disallows the URL for our agent
    Disallowed,
    /// The content identity is already stored
    Duplicate,
    /// A feed with no usable entries
    NoEntries,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Disallowed => "disallowed by robots.txt",
            Self::Duplicate => "already stored",
            Self::NoEntries => "feed has no entries",
        };
        f.write_str(label)
    }
}

/// Terminal result of running one target through the pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetOutcome {
    Recorded { written: usize },
    Skipped(SkipReason),
    Failed { kind: FailureKind, reason: String },
}

impl TargetOutcome {
    pub fn failed(kind: FailureKind, reason: impl Into<String>) -> Self {
        Self::Failed {
            kind,
            reason: reason.into(),
        }
    }

    pub fn cancelled() -> Self {
        Self::failed(FailureKind::Cancelled, "cancelled")
    }

    /// The terminal state this outcome corresponds to
    pub fn state(&self) -> TargetState {
        match self {
            Self::Recorded { .. } => TargetState::Recorded,
            Self::Skipped(_) => TargetState::Skipped,
            Self::Failed { .. } => TargetState::Failed,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            Self::Failed {
                kind: FailureKind::Cancelled,
                ..
            }
        )
    }
}

impl fmt::Display for TargetOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Recorded { written } => write!(f, "recorded ({} written)", written),
            Self::Skipped(reason) => write!(f, "skipped: {}", reason),
            Self::Failed { kind, reason } => write!(f, "failed ({}): {}", kind, reason),
        }
    }
}
