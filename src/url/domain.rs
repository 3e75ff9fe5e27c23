use url::Url;

/// Returns the `scheme://host[:port]` origin of a URL
///
/// Robots policies and crawl-delay clocks are keyed by origin, so
/// `http://example.com` and `https://example.com:8443` are tracked
/// separately. Default ports are omitted. URLs with an opaque origin
/// (`data:`, `file:` and similar) have no key.
///
/// # Examples
///
/// ```
/// use url::Url;
/// use sumi_harvest::url::origin_key;
///
/// let url = Url::parse("https://example.com:443/a/b?c=d").unwrap();
/// assert_eq!(origin_key(&url), Some("https://example.com".to_string()));
/// ```
pub fn origin_key(url: &Url) -> Option<String> {
    let origin = url.origin();
    origin.is_tuple().then(|| origin.ascii_serialization())
}
