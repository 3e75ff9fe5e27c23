//! Deduplication gate
//!
//! A reservation row claims an identity before anything is written. Of
//! several workers racing on one identity exactly one gets a [`Reservation`];
//! dropping it uncommitted releases the claim.

use crate::dedup::Identity;
use crate::pipeline::Document;
use crate::storage::{DedupRecord, StorageResult, Store};
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;

/// Result of consulting the gate
#[derive(Debug)]
pub enum DedupOutcome {
    /// Nobody has stored this identity; the caller now holds it
    Fresh(Reservation),
    /// Already stored, or reserved by another worker
    Duplicate,
}

impl DedupOutcome {
    pub fn is_fresh(&self) -> bool {
        matches!(self, Self::Fresh(_))
    }
}

/// Atomic check-and-reserve over the store's uniqueness constraint
#[derive(Clone)]
pub struct DedupGate {
    store: Arc<dyn Store>,
}

impl DedupGate {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Reserves `identity` unless it is already known
    ///
    /// The `exists` lookup is only a shortcut; the insert of the reservation
    /// row decides. Of several concurrent callers for one identity exactly
    /// one gets `Fresh`. Store errors other than the uniqueness violation
    /// are returned to the caller.
    pub fn check_and_reserve(&self, identity: &Identity, url: &str) -> StorageResult<DedupOutcome> {
        if self.store.exists(identity)? {
            tracing::trace!("Known identity for {}", url);
            return Ok(DedupOutcome::Duplicate);
        }

        match self.store.reserve(identity, url) {
            Ok(()) => Ok(DedupOutcome::Fresh(Reservation {
                store: Arc::clone(&self.store),
                identity: identity.clone(),
                url: url.to_string(),
                reserved_at: Utc::now(),
                settled: false,
            })),
            Err(e) if e.is_constraint_violation() => {
                tracing::trace!("Lost reservation race for {}", url);
                Ok(DedupOutcome::Duplicate)
            }
            Err(e) => Err(e),
        }
    }
}

/// A held identity that must be committed or released
///
/// Dropping an unsettled reservation releases it.
pub struct Reservation {
    store: Arc<dyn Store>,
    identity: Identity,
    url: String,
    reserved_at: DateTime<Utc>,
    settled: bool,
}

impl Reservation {
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Stores `document` under this identity
    ///
    /// On error the reservation is released when `self` drops.
    pub fn commit(mut self, document: &Document) -> StorageResult<i64> {
        let record = DedupRecord {
            identity: self.identity.clone(),
            url: self.url.clone(),
            first_seen_at: self.reserved_at,
        };
        let id = self.store.commit(&record, document)?;
        self.settled = true;
        Ok(id)
    }

    /// Gives the identity back without storing anything
    pub fn release(mut self) -> StorageResult<()> {
        self.settled = true;
        self.store.release(&self.identity)
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        if let Err(e) = self.store.release(&self.identity) {
            tracing::warn!("Failed to release reservation for {}: {}", self.url, e);
        } else {
            tracing::debug!("Released reservation for {}", self.url);
        }
    }
}

impl fmt::Debug for Reservation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reservation")
            .field("identity", &self.identity)
            .field("url", &self.url)
            .field("settled", &self.settled)
            .finish()
    }
}
