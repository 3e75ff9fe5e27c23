//! URL handling module for Sumi-Harvest
//!
//! This module provides URL normalization (the basis of content identity)
//! and the origin keys that scope robots.txt policies and crawl delays.

mod domain;
mod normalize;

pub use domain::origin_key;
pub use normalize::normalize_url;

use crate::UrlError;
use url::Url;

/// Parses a target URL, accepting only absolute HTTP(S) URLs with a host
///
/// # Examples
///
/// ```
/// use sumi_harvest::url::parse_http_url;
///
/// assert!(parse_http_url("https://example.com/page").is_ok());
/// assert!(parse_http_url("mailto:someone@example.com").is_err());
/// ```
pub fn parse_http_url(raw: &str) -> Result<Url, UrlError> {
    let url = Url::parse(raw.trim()).map_err(|e| UrlError::Parse(e.to_string()))?;

    match url.scheme() {
        "http" | "https" => {}
        other => return Err(UrlError::InvalidScheme(other.to_string())),
    }

    if url.host_str().is_none() {
        return Err(UrlError::MissingDomain);
    }

    Ok(url)
}
