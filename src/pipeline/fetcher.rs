//! HTTP fetcher implementation
//!
//! This module performs single fetch attempts and classifies the result:
//! - Building HTTP clients with the collector's user agent
//! - Timeout-bounded GET requests
//! - Transient vs fatal classification of failures
//! - `Retry-After` extraction for 429/503 responses

use crate::config::UserAgentConfig;
use crate::state::Target;
use crate::url::parse_http_url;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{redirect::Policy, Client, StatusCode};
use std::time::Duration;

/// Maximum redirect hops followed before a response is treated as fatal
const MAX_REDIRECTS: usize = 10;

/// Result of one fetch attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// 2xx with a non-empty body
    Success(Vec<u8>),

    /// Worth retrying: connection errors, timeouts, 429, 5xx
    TransientFailure {
        reason: String,
        /// Server-provided wait (`Retry-After`), if any
        retry_after: Option<Duration>,
    },

    /// Retrying would not help: other 4xx, malformed URL, empty body, ...
    FatalFailure(String),
}

impl FetchOutcome {
    pub fn transient(reason: impl Into<String>) -> Self {
        Self::TransientFailure {
            reason: reason.into(),
            retry_after: None,
        }
    }

    pub fn fatal(reason: impl Into<String>) -> Self {
        Self::FatalFailure(reason.into())
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TransientFailure { .. })
    }

    /// The failure reason, or `None` for a success
    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::Success(_) => None,
            Self::TransientFailure { reason, .. } => Some(reason),
            Self::FatalFailure(reason) => Some(reason),
        }
    }
}

/// One attempt at fetching a target
#[derive(Debug, Clone)]
pub struct FetchAttempt {
    pub target: Target,
    /// 1 for the first try, incremented per retry
    pub attempt_number: u32,
    pub started_at: DateTime<Utc>,
    pub outcome: FetchOutcome,
}

/// Builds an HTTP client with proper configuration
///
/// # Arguments
///
/// * `config` - The user agent configuration
///
/// # Returns
///
/// * `Ok(Client)` - Successfully built HTTP client
/// * `Err(reqwest::Error)` - Failed to build client
///
/// # Example
///
/// ```no_run
/// use sumi_harvest::config::UserAgentConfig;
/// use sumi_harvest::pipeline::build_http_client;
///
/// let config = UserAgentConfig {
///     crawler_name: "SumiHarvest".to_string(),
///     crawler_version: "1.0".to_string(),
///     contact_url: "https://example.com/about".to_string(),
///     contact_email: "admin@example.com".to_string(),
/// };
///
/// let client = build_http_client(&config).unwrap();
/// ```
pub fn build_http_client(config: &UserAgentConfig) -> Result<Client, reqwest::Error> {
    Client::builder()
        .user_agent(config.header_value())
        .connect_timeout(Duration::from_secs(10))
        .redirect(Policy::limited(MAX_REDIRECTS))
        .gzip(true)
        .brotli(true)
        .build()
}

/// Performs fetch attempts over a shared client
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Performs one attempt for `target`
    ///
    /// # Classification
    ///
    /// | Condition | Outcome |
    /// |-----------|---------|
    /// | 2xx, non-empty body | Success |
    /// | 2xx, empty body | Fatal |
    /// | 429, 5xx | Transient (with `Retry-After` if sent) |
    /// | other 4xx, 3xx after redirects | Fatal |
    /// | timeout, connection error, body read error | Transient |
    /// | malformed URL, unsupported scheme | Fatal |
    ///
    /// # Arguments
    ///
    /// * `target` - What to fetch
    /// * `attempt_number` - 1-based attempt counter, recorded on the result
    /// * `timeout` - Upper bound for the whole request including the body
    pub async fn attempt(&self, target: &Target, attempt_number: u32, timeout: Duration) -> FetchAttempt {
        let started_at = Utc::now();
        let outcome = self.fetch(&target.url, timeout).await;

        FetchAttempt {
            target: target.clone(),
            attempt_number,
            started_at,
            outcome,
        }
    }

    async fn fetch(&self, url: &str, timeout: Duration) -> FetchOutcome {
        let url = match parse_http_url(url) {
            Ok(url) => url,
            Err(e) => return FetchOutcome::fatal(format!("malformed URL: {}", e)),
        };

        let response = match self.client.get(url).timeout(timeout).send().await {
            Ok(response) => response,
            Err(e) => return classify_request_error(&e),
        };

        let status = response.status();
        if !status.is_success() {
            let retry_after = parse_retry_after(response.headers());
            return classify_status(status, retry_after);
        }

        match response.bytes().await {
            Ok(body) if body.is_empty() => FetchOutcome::fatal("empty response body"),
            Ok(body) => FetchOutcome::Success(body.to_vec()),
            Err(e) => classify_request_error(&e),
        }
    }
}

/// Classifies a non-success HTTP status
pub fn classify_status(status: StatusCode, retry_after: Option<Duration>) -> FetchOutcome {
    let reason = format!("HTTP {}", status.as_u16());

    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        FetchOutcome::TransientFailure {
            reason,
            retry_after,
        }
    } else {
        FetchOutcome::FatalFailure(reason)
    }
}

fn classify_request_error(error: &reqwest::Error) -> FetchOutcome {
    if error.is_timeout() {
        FetchOutcome::transient("request timed out")
    } else if error.is_redirect() {
        FetchOutcome::fatal(format!("redirect error: {}", error))
    } else if error.is_builder() {
        FetchOutcome::fatal(format!("invalid request: {}", error))
    } else if error.is_connect() {
        FetchOutcome::transient(format!("connection failed: {}", error))
    } else {
        FetchOutcome::transient(format!("request error: {}", error))
    }
}

/// Reads `Retry-After` as delta-seconds or an HTTP date
fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    let value = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();

    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }

    let at = DateTime::parse_from_rfc2822(value).ok()?;
    (at.with_timezone(&Utc) - Utc::now()).to_std().ok()
}
