use crate::url::parse_http_url;
use crate::UrlError;
use url::Url;

/// Query parameters that identify a referral rather than the content
const TRACKING_PARAMS: &[&str] = &["fbclid", "gclid", "mc_eid", "ref", "source"];

/// Normalizes a URL so that trivially different spellings of the same
/// resource compare equal
///
/// # Normalization Steps
///
/// 1. Parse; reject anything that is not an absolute HTTP(S) URL
/// 2. Lowercase the host and drop a leading `www.`
/// 3. Collapse repeated slashes and drop a trailing slash (root stays `/`)
/// 4. Drop the fragment
/// 5. Drop tracking parameters (`utm_*`, `fbclid`, ...), sort the rest
///
/// Dot segments and default ports are already resolved by the parser. The
/// scheme is kept as-is.
///
/// # Examples
///
/// ```
/// use sumi_harvest::url::normalize_url;
///
/// let url = normalize_url("https://WWW.EXAMPLE.COM/page/?b=2&a=1#top").unwrap();
/// assert_eq!(url.as_str(), "https://example.com/page?a=1&b=2");
/// ```
pub fn normalize_url(raw: &str) -> Result<Url, UrlError> {
    let mut url = parse_http_url(raw)?;

    let host = url
        .host_str()
        .map(|h| h.to_lowercase())
        .ok_or(UrlError::MissingDomain)?;
    if let Some(bare) = host.strip_prefix("www.") {
        url.set_host(Some(bare))
            .map_err(|e| UrlError::Malformed(format!("cannot set host '{}': {}", bare, e)))?;
    }

    let path = collapse_path(url.path());
    url.set_path(&path);
    url.set_fragment(None);

    let mut params: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| !is_tracking_param(key))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    if params.is_empty() {
        url.set_query(None);
    } else {
        params.sort();
        url.query_pairs_mut().clear().extend_pairs(params);
    }

    Ok(url)
}

fn collapse_path(path: &str) -> String {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    format!("/{}", segments.join("/"))
}

fn is_tracking_param(key: &str) -> bool {
    key.starts_with("utm_") || TRACKING_PARAMS.contains(&key)
}
