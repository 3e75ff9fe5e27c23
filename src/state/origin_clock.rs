use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Widest spacing the clock enforces between two slots of one origin
pub const MAX_SPACING: Duration = Duration::from_secs(24 * 60 * 60);

/// Tracks when each origin was last (or will next be) fetched
///
/// Workers reserve a fetch slot before sleeping: the slot is computed and
/// recorded under the lock, the sleep happens outside it. Two workers
/// targeting the same origin therefore get slots spaced by at least the
/// origin's delay even if they arrive at the same instant.
#[derive(Debug, Default)]
pub struct OriginClock {
    next_slot: Mutex<HashMap<String, Instant>>,
}

impl OriginClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserves the next fetch slot for `origin` and returns how long the
    /// caller must wait before fetching
    ///
    /// # Arguments
    ///
    /// * `origin` - The `scheme://host[:port]` key
    /// * `delay` - Minimum spacing between fetches to this origin
    pub fn reserve(&self, origin: &str, delay: Duration) -> Duration {
        self.reserve_at(origin, delay, Instant::now())
    }

    /// Same as [`reserve`](Self::reserve) with an explicit clock reading
    pub fn reserve_at(&self, origin: &str, delay: Duration, now: Instant) -> Duration {
        let mut slots = self
            .next_slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let delay = delay.min(MAX_SPACING);
        let slot = match slots.get(origin) {
            Some(previous) => previous.checked_add(delay).unwrap_or(*previous).max(now),
            None => now,
        };
        slots.insert(origin.to_string(), slot);

        slot.saturating_duration_since(now)
    }

    /// Time of the most recent reserved slot for `origin`
    pub fn last_slot(&self, origin: &str) -> Option<Instant> {
        self.next_slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(origin)
            .copied()
    }

    /// Number of origins seen so far
    pub fn origin_count(&self) -> usize {
        self.next_slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}
