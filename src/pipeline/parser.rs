//! Document extraction from fetched bodies
//!
//! This module turns raw response bytes into a [`Document`]:
//! - Page title, canonical URL and visible body text
//! - Outgoing links (absolute, deduplicated)
//! - Feed entries, via [`parse_feed`](crate::pipeline::feed::parse_feed)

use crate::pipeline::feed::parse_feed;
use crate::state::TargetKind;
use chrono::{DateTime, Utc};
use scraper::{ElementRef, Html, Selector};
use std::collections::BTreeSet;
use thiserror::Error;
use url::Url;

/// Errors produced while turning a body into a document
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("invalid source URL {url}: {message}")]
    SourceUrl { url: String, message: String },

    #[error("no content found at {url}")]
    Empty { url: String },

    #[error("not a feed at {url}: {message}")]
    NotAFeed { url: String, message: String },
}

/// One item of an RSS or Atom feed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedEntry {
    pub title: String,
    /// Absolute link to the entry, or its guid/id when no link is given
    pub link: String,
    pub summary: String,
    pub published: Option<String>,
}

/// Parsed content of one fetched target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub url: String,
    pub title: String,
    pub content: String,
    pub extracted_links: BTreeSet<String>,
    pub collected_at: DateTime<Utc>,
    pub canonical_url: Option<String>,
    /// Non-empty only for feeds
    pub entries: Vec<FeedEntry>,
}

impl Document {
    /// Builds the document stored for a single feed entry
    pub fn from_entry(entry: &FeedEntry, collected_at: DateTime<Utc>) -> Self {
        Self {
            url: entry.link.clone(),
            title: entry.title.clone(),
            content: entry.summary.clone(),
            extracted_links: BTreeSet::new(),
            collected_at,
            canonical_url: None,
            entries: Vec::new(),
        }
    }
}

/// Turns raw bytes into a document
///
/// Implementations must be pure: the same input gives the same document
/// (apart from `collected_at`).
pub trait Parser: Send + Sync {
    fn parse(&self, raw: &[u8], source_url: &str, kind: TargetKind) -> Result<Document, ParseError>;
}

/// Default parser: HTML pages via scraper, feeds via [`parse_feed`]
#[derive(Debug, Clone, Copy, Default)]
pub struct ContentParser;

impl Parser for ContentParser {
    fn parse(&self, raw: &[u8], source_url: &str, kind: TargetKind) -> Result<Document, ParseError> {
        let base = Url::parse(source_url).map_err(|e| ParseError::SourceUrl {
            url: source_url.to_string(),
            message: e.to_string(),
        })?;
        let text = String::from_utf8_lossy(raw);

        match kind {
            TargetKind::Page => parse_html(&text, &base),
            TargetKind::Feed => parse_feed(&text, &base),
        }
    }
}

/// Parses an HTML page
///
/// # Extraction Rules
///
/// - Title from `<title>`, falling back to the first `<h1>`
/// - Canonical URL from `<link rel="canonical">`, resolved against `base_url`
/// - Content is the visible text of `<body>` with whitespace collapsed;
///   `script`, `style`, `noscript` and `template` are skipped
/// - Links from `<a href>`, excluding `download` anchors and
///   `javascript:`, `mailto:`, `tel:` and `data:` targets
///
/// # Example
///
/// ```
/// use sumi_harvest::pipeline::parse_html;
/// use url::Url;
///
/// let html = r#"<html><head><title>Test</title></head><body><a href="/page">Link</a></body></html>"#;
/// let base_url = Url::parse("https://example.com/").unwrap();
/// let doc = parse_html(html, &base_url).unwrap();
/// assert_eq!(doc.title, "Test");
/// assert!(doc.extracted_links.contains("https://example.com/page"));
/// ```
pub fn parse_html(html: &str, base_url: &Url) -> Result<Document, ParseError> {
    let document = Html::parse_document(html);

    let title = extract_title(&document).unwrap_or_default();
    let content = extract_text(&document);

    if title.is_empty() && content.is_empty() {
        return Err(ParseError::Empty {
            url: base_url.to_string(),
        });
    }

    Ok(Document {
        url: base_url.to_string(),
        title,
        content,
        extracted_links: extract_links(&document, base_url),
        collected_at: Utc::now(),
        canonical_url: extract_canonical(&document, base_url),
        entries: Vec::new(),
    })
}

fn select_first_text(document: &Html, css: &str) -> Option<String> {
    let selector = Selector::parse(css).ok()?;
    document
        .select(&selector)
        .next()
        .map(|element| collapse_whitespace(&element.text().collect::<String>()))
        .filter(|s| !s.is_empty())
}

fn extract_title(document: &Html) -> Option<String> {
    select_first_text(document, "title").or_else(|| select_first_text(document, "h1"))
}

fn extract_canonical(document: &Html, base_url: &Url) -> Option<String> {
    let selector = Selector::parse("link[rel='canonical'][href]").ok()?;
    document
        .select(&selector)
        .filter_map(|element| element.value().attr("href"))
        .find_map(|href| resolve_link(href, base_url))
}

fn extract_text(document: &Html) -> String {
    let root = Selector::parse("body")
        .ok()
        .and_then(|selector| document.select(&selector).next())
        .unwrap_or_else(|| document.root_element());

    let mut pieces: Vec<&str> = Vec::new();
    for node in root.descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };
        let hidden = node
            .parent()
            .and_then(ElementRef::wrap)
            .is_some_and(|parent| {
                matches!(
                    parent.value().name(),
                    "script" | "style" | "noscript" | "template"
                )
            });
        if !hidden {
            pieces.push(text);
        }
    }

    collapse_whitespace(&pieces.join(" "))
}

fn extract_links(document: &Html, base_url: &Url) -> BTreeSet<String> {
    let Ok(selector) = Selector::parse("a[href]") else {
        return BTreeSet::new();
    };

    document
        .select(&selector)
        .filter(|element| element.value().attr("download").is_none())
        .filter_map(|element| element.value().attr("href"))
        .filter_map(|href| resolve_link(href, base_url))
        .collect()
}

/// Resolves an href against the page URL, dropping non-HTTP targets and
/// fragments
pub(crate) fn resolve_link(href: &str, base_url: &Url) -> Option<String> {
    let href = href.trim();
    if href.is_empty() || href.starts_with('#') {
        return None;
    }

    let lowered = href.to_ascii_lowercase();
    if ["javascript:", "mailto:", "tel:", "data:"]
        .iter()
        .any(|scheme| lowered.starts_with(scheme))
    {
        return None;
    }

    let mut url = base_url.join(href).ok()?;
    if url.scheme() != "http" && url.scheme() != "https" {
        return None;
    }
    url.set_fragment(None);
    Some(url.to_string())
}

pub(crate) fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
