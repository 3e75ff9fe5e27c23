//! Robots.txt handling module
//!
//! This module fetches, parses and caches robots.txt policies per origin and
//! answers two questions for the pipeline: may this URL be fetched, and how
//! long must we wait between requests to its origin.

mod cache;
mod parser;

pub use cache::{CacheEntryInfo, RobotsCache};
pub use parser::{effective_group, RobotsGroup, RobotsPolicy, MAX_CRAWL_DELAY};

/// Location of the robots.txt file for an origin
///
/// # Examples
///
/// ```
/// use sumi_harvest::robots::robots_url;
///
/// assert_eq!(robots_url("https://example.com"), "https://example.com/robots.txt");
/// ```
pub fn robots_url(origin: &str) -> String {
    format!("{}/robots.txt", origin.trim_end_matches('/'))
}
