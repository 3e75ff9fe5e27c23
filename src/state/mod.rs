//! State module for tracking collection progress
//!
//! # Components
//!
//! - `Target`: one URL to collect and whether it is a page or a feed
//! - `TargetState`: where a target is in the pipeline, with the legal transitions
//! - `TargetOutcome`: the terminal result recorded for each target
//! - `OriginClock`: per-origin fetch slots enforcing crawl delays

mod origin_clock;
mod target;
mod target_state;

pub use origin_clock::OriginClock;
pub use target::{Target, TargetKind};
pub use target_state::{SkipReason, TargetOutcome, TargetState};
