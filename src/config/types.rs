use crate::state::Target;
use serde::Deserialize;
use std::time::Duration;

/// Main configuration structure for Sumi-Harvest
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub collector: CollectorConfig,
    #[serde(rename = "user-agent")]
    pub user_agent: UserAgentConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub notifier: NotifierConfig,
    /// Web pages to collect
    #[serde(default)]
    pub targets: Vec<String>,
    /// RSS or Atom feeds to collect
    #[serde(default)]
    pub feeds: Vec<String>,
}

impl Config {
    /// Builds the run's target list: pages first, then feeds, in file order
    pub fn targets(&self) -> Vec<Target> {
        self.targets
            .iter()
            .map(|url| Target::page(url.as_str()))
            .chain(self.feeds.iter().map(|url| Target::feed(url.as_str())))
            .collect()
    }
}

/// Pipeline behaviour configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CollectorConfig {
    /// Number of workers fetching in parallel
    #[serde(rename = "max-concurrent")]
    pub max_concurrent: u32,

    /// Per-request timeout (seconds)
    #[serde(rename = "timeout-secs")]
    pub timeout_secs: u64,

    /// Retries allowed after the first attempt for transient failures
    #[serde(rename = "max-retries")]
    pub max_retries: u32,

    /// Backoff before the first retry (milliseconds); doubles per attempt
    #[serde(rename = "base-delay-ms")]
    pub base_delay_ms: u64,

    /// Upper bound for any single backoff (milliseconds)
    #[serde(rename = "max-backoff-ms")]
    pub max_backoff_ms: u64,

    /// How long a fetched robots.txt stays valid (seconds)
    #[serde(rename = "robots-cache-ttl-secs")]
    pub robots_cache_ttl_secs: u64,

    /// Timeout for robots.txt fetches (seconds)
    #[serde(rename = "robots-timeout-secs")]
    pub robots_timeout_secs: u64,

    /// Whether robots.txt rules and crawl delays are honoured
    #[serde(rename = "respect-robots")]
    pub respect_robots: bool,

    /// Minimum time between requests to the same origin (milliseconds)
    #[serde(rename = "min-domain-interval-ms")]
    pub min_domain_interval_ms: u64,
}

impl CollectorConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }

    pub fn robots_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.robots_cache_ttl_secs)
    }

    pub fn robots_timeout(&self) -> Duration {
        Duration::from_secs(self.robots_timeout_secs)
    }

    pub fn min_domain_interval(&self) -> Duration {
        Duration::from_millis(self.min_domain_interval_ms)
    }
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 5,
            timeout_secs: 10,
            max_retries: 3,
            base_delay_ms: 1_000,
            max_backoff_ms: 60_000,
            robots_cache_ttl_secs: 3_600,
            robots_timeout_secs: 10,
            respect_robots: true,
            min_domain_interval_ms: 0,
        }
    }
}

/// User agent identification configuration
#[derive(Debug, Clone, Deserialize)]
pub struct UserAgentConfig {
    /// Name of the collector, also used as the robots.txt product token
    #[serde(rename = "crawler-name")]
    pub crawler_name: String,

    #[serde(rename = "crawler-version")]
    pub crawler_version: String,

    /// URL with information about the collector
    #[serde(rename = "contact-url")]
    pub contact_url: String,

    #[serde(rename = "contact-email")]
    pub contact_email: String,
}

impl UserAgentConfig {
    /// Full User-Agent header value: `Name/Version (+ContactURL; ContactEmail)`
    pub fn header_value(&self) -> String {
        format!(
            "{}/{} (+{}; {})",
            self.crawler_name, self.crawler_version, self.contact_url, self.contact_email
        )
    }
}

/// Output configuration
#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    /// Path to the SQLite database file
    #[serde(rename = "database-path")]
    pub database_path: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            database_path: "./harvest.db".to_string(),
        }
    }
}

/// Run summary notification configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct NotifierConfig {
    pub enabled: bool,

    #[serde(rename = "webhook-url")]
    pub webhook_url: Option<String>,

    #[serde(rename = "webhook-format")]
    pub webhook_format: WebhookFormat,
}

/// Payload dialect understood by the webhook receiver
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WebhookFormat {
    #[default]
    Slack,
    Discord,
}
