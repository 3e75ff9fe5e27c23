//! Deduplication gate
//!
//! Every stored document is keyed by an [`Identity`]. Before persisting, the
//! pipeline asks the [`DedupGate`] for a [`Reservation`]; only the holder of
//! a reservation may write, and an unused reservation is always released.

mod gate;
mod identity;

pub use gate::{DedupGate, DedupOutcome, Reservation};
pub use identity::Identity;
