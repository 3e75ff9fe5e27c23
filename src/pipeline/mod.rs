//! Pipeline module: fetching, parsing and the per-target state machine
//!
//! This module contains the core collection logic, including:
//! - HTTP fetch attempts with transient/fatal classification
//! - Retry decisions and exponential backoff
//! - HTML page and RSS/Atom feed parsing
//! - The worker pool that runs targets to a terminal state

mod coordinator;
mod feed;
mod fetcher;
mod parser;
mod retry;

pub use coordinator::{AbortReason, Pipeline, RunReport};
pub use feed::parse_feed;
pub use fetcher::{build_http_client, classify_status, FetchAttempt, FetchOutcome, HttpFetcher};
pub use parser::{parse_html, ContentParser, Document, FeedEntry, ParseError, Parser};
pub use retry::{backoff_duration, should_retry, RetryPolicy};
