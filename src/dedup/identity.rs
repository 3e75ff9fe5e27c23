//! Content identity derived from normalized URLs

use crate::pipeline::Document;
use crate::url::normalize_url;
use sha2::{Digest, Sha256};
use std::fmt;

/// Stable content identity: hex SHA-256 of the normalized URL
///
/// URLs that fail normalization (feed entry ids such as `urn:uuid:...`)
/// are hashed as given, trimmed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Identity(String);

impl Identity {
    /// # Examples
    ///
    /// ```
    /// use sumi_harvest::Identity;
    ///
    /// let a = Identity::from_url("https://www.Example.com/post/?utm_source=x");
    /// let b = Identity::from_url("https://example.com/post");
    /// assert_eq!(a, b);
    /// ```
    pub fn from_url(url: &str) -> Self {
        let key = match normalize_url(url) {
            Ok(normalized) => normalized.to_string(),
            Err(_) => url.trim().to_string(),
        };
        Self(hex::encode(Sha256::digest(key.as_bytes())))
    }

    /// Identity of a parsed page: its canonical URL when declared, else the
    /// URL it was fetched from
    pub fn for_document(document: &Document, target_url: &str) -> Self {
        Self::from_url(document.canonical_url.as_deref().unwrap_or(target_url))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
