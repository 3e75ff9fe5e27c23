//! RSS 2.0 and Atom feed parsing
//!
//! Feeds are read with a handful of tolerant regular expressions rather than
//! a full XML parser: real-world feeds are frequently malformed, and only a
//! few fields are needed per entry.

use crate::pipeline::parser::{collapse_whitespace, resolve_link, Document, FeedEntry, ParseError};
use chrono::Utc;
use regex::{Captures, Regex};
use std::collections::{BTreeSet, HashMap};
use std::sync::OnceLock;
use url::Url;

/// Entry summaries are cut to this many characters
const SUMMARY_LIMIT: usize = 500;

/// Every element read by [`element_text`]
const ELEMENTS: &[&str] = &[
    "title",
    "description",
    "subtitle",
    "link",
    "guid",
    "id",
    "summary",
    "content",
    "content:encoded",
    "pubDate",
    "published",
    "updated",
    "dc:date",
];

struct FeedPatterns {
    elements: HashMap<&'static str, Regex>,
    entity: Regex,
    rss_item: Regex,
    atom_entry: Regex,
    cdata: Regex,
    tag: Regex,
    atom_link: Regex,
    attr_rel: Regex,
    attr_href: Regex,
}

fn patterns() -> &'static FeedPatterns {
    static PATTERNS: OnceLock<FeedPatterns> = OnceLock::new();
    PATTERNS.get_or_init(|| FeedPatterns {
        elements: ELEMENTS
            .iter()
            .map(|name| {
                let pattern = format!(r"(?is)<{0}\b[^>]*>(.*?)</{0}>", regex::escape(name));
                (*name, Regex::new(&pattern).expect("valid regex"))
            })
            .collect(),
        entity: Regex::new(r"&(#[0-9]{1,7}|#[xX][0-9a-fA-F]{1,6}|[a-zA-Z][a-zA-Z0-9]{1,31});")
            .expect("valid regex"),
        rss_item: Regex::new(r"(?is)<item\b[^>]*>(.*?)</item>").expect("valid regex"),
        atom_entry: Regex::new(r"(?is)<entry\b[^>]*>(.*?)</entry>").expect("valid regex"),
        cdata: Regex::new(r"(?s)<!\[CDATA\[(.*?)\]\]>").expect("valid regex"),
        tag: Regex::new(r"(?s)<[^>]*>").expect("valid regex"),
        atom_link: Regex::new(r"(?is)<link\b([^>]*)/?>").expect("valid regex"),
        attr_rel: Regex::new(r#"(?i)\brel\s*=\s*["']([^"']*)["']"#).expect("valid regex"),
        attr_href: Regex::new(r#"(?i)\bhref\s*=\s*["']([^"']*)["']"#).expect("valid regex"),
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FeedFlavor {
    Rss,
    Atom,
}

/// Parses an RSS 2.0 or Atom document
///
/// The returned document carries the feed title and description, one
/// [`FeedEntry`] per item/entry with a usable link (or guid/id), and the
/// entry links as `extracted_links`. A feed with zero entries is valid.
///
/// # Example
///
/// ```
/// use sumi_harvest::pipeline::parse_feed;
/// use url::Url;
///
/// let xml = r#"<rss><channel><title>News</title>
///   <item><title>First</title><link>/posts/1</link></item>
/// </channel></rss>"#;
/// let doc = parse_feed(xml, &Url::parse("https://example.com/rss").unwrap()).unwrap();
/// assert_eq!(doc.entries[0].link, "https://example.com/posts/1");
/// ```
pub fn parse_feed(xml: &str, source_url: &Url) -> Result<Document, ParseError> {
    let flavor = detect_flavor(xml).ok_or_else(|| ParseError::NotAFeed {
        url: source_url.to_string(),
        message: "no <rss>, <rdf:RDF> or <feed> root element".to_string(),
    })?;

    let p = patterns();
    let item_pattern = match flavor {
        FeedFlavor::Rss => &p.rss_item,
        FeedFlavor::Atom => &p.atom_entry,
    };

    // Channel-level fields live before the first item
    let header_end = item_pattern.find(xml).map_or(xml.len(), |m| m.start());
    let header = &xml[..header_end];
    let title = element_text(header, "title").unwrap_or_default();
    let description = element_text(header, "description")
        .or_else(|| element_text(header, "subtitle"))
        .unwrap_or_default();

    let entries: Vec<FeedEntry> = item_pattern
        .captures_iter(xml)
        .filter_map(|caps| caps.get(1))
        .filter_map(|body| parse_entry(body.as_str(), flavor, source_url))
        .collect();

    let extracted_links: BTreeSet<String> = entries.iter().map(|e| e.link.clone()).collect();

    Ok(Document {
        url: source_url.to_string(),
        title,
        content: description,
        extracted_links,
        collected_at: Utc::now(),
        canonical_url: None,
        entries,
    })
}

fn detect_flavor(xml: &str) -> Option<FeedFlavor> {
    let head: String = xml.chars().take(4096).collect::<String>().to_ascii_lowercase();
    if head.contains("<rss") || head.contains("<rdf:rdf") {
        Some(FeedFlavor::Rss)
    } else if head.contains("<feed") {
        Some(FeedFlavor::Atom)
    } else {
        None
    }
}

fn parse_entry(body: &str, flavor: FeedFlavor, source_url: &Url) -> Option<FeedEntry> {
    let raw_link = match flavor {
        FeedFlavor::Rss => element_text(body, "link").or_else(|| element_text(body, "guid")),
        FeedFlavor::Atom => atom_link(body).or_else(|| element_text(body, "id")),
    }?;
    let link = resolve_link(&raw_link, source_url).unwrap_or(raw_link);

    let summary = ["description", "summary", "content", "content:encoded"]
        .iter()
        .find_map(|name| element_text(body, name))
        .map(|text| truncate_chars(&text, SUMMARY_LIMIT))
        .unwrap_or_default();

    let published = ["pubDate", "published", "updated", "dc:date"]
        .iter()
        .find_map(|name| element_text(body, name));

    Some(FeedEntry {
        title: element_text(body, "title").unwrap_or_default(),
        link,
        summary,
        published,
    })
}

/// Prefers `rel="alternate"` (or no rel) over other link relations
fn atom_link(body: &str) -> Option<String> {
    let p = patterns();
    let mut fallback = None;

    for caps in p.atom_link.captures_iter(body) {
        let attrs = caps.get(1).map_or("", |m| m.as_str());
        let Some(href) = p.attr_href.captures(attrs).and_then(|c| c.get(1)) else {
            continue;
        };
        let rel = p
            .attr_rel
            .captures(attrs)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_ascii_lowercase());

        match rel.as_deref() {
            None | Some("alternate") => return Some(href.as_str().to_string()),
            _ => {
                fallback.get_or_insert_with(|| href.as_str().to_string());
            }
        }
    }

    fallback
}

/// Text of the first `<name>` element: CDATA unwrapped, markup stripped,
/// entities decoded, whitespace collapsed. Empty text counts as absent.
fn element_text(fragment: &str, name: &str) -> Option<String> {
    let p = patterns();
    let inner = p.elements.get(name)?.captures(fragment)?.get(1)?.as_str();

    let unwrapped = p.cdata.replace_all(inner, "$1");
    // Escaped markup inside descriptions becomes real markup after decoding
    let decoded = decode_entities(&p.tag.replace_all(&unwrapped, " "));
    let text = collapse_whitespace(&p.tag.replace_all(&decoded, " "));

    (!text.is_empty()).then_some(text)
}

/// Decodes character references in one pass, so `&amp;lt;` stays `&lt;`
///
/// Unknown named entities and invalid code points are kept verbatim.
fn decode_entities(text: &str) -> String {
    patterns()
        .entity
        .replace_all(text, |caps: &Captures<'_>| match decode_entity(&caps[1]) {
            Some(c) => c.to_string(),
            None => caps[0].to_string(),
        })
        .into_owned()
}

fn decode_entity(name: &str) -> Option<char> {
    if let Some(hex) = name.strip_prefix("#x").or_else(|| name.strip_prefix("#X")) {
        return u32::from_str_radix(hex, 16).ok().and_then(char::from_u32);
    }
    if let Some(decimal) = name.strip_prefix('#') {
        return decimal.parse().ok().and_then(char::from_u32);
    }

    let c = match name {
        "lt" => '<',
        "gt" => '>',
        "amp" => '&',
        "quot" => '"',
        "apos" => '\'',
        "nbsp" => ' ',
        "hellip" => '\u{2026}',
        "ndash" => '\u{2013}',
        "mdash" => '\u{2014}',
        "lsquo" => '\u{2018}',
        "rsquo" => '\u{2019}',
        "ldquo" => '\u{201C}',
        "rdquo" => '\u{201D}',
        _ => return None,
    };
    Some(c)
}

fn truncate_chars(text: &str, limit: usize) -> String {
    match text.char_indices().nth(limit) {
        Some((idx, _)) => format!("{}...", text[..idx].trim_end()),
        None => text.to_string(),
    }
}
