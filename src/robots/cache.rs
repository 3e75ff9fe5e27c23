//! Per-origin robots.txt cache
//!
//! Policies are cached by origin for a fixed TTL. Concurrent lookups for an
//! origin that is not cached share a single in-flight fetch: the first
//! caller installs a cell and fetches, later callers await the same cell.

use crate::config::Config;
use crate::robots::{robots_url, RobotsPolicy};
use crate::url::origin_key;
use chrono::Duration as ChronoDuration;
use reqwest::Client;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::OnceCell;
use url::Url;

type PolicyCell = Arc<OnceCell<Arc<RobotsPolicy>>>;

/// Snapshot of one cache entry, for inspection
#[derive(Debug, Clone)]
pub struct CacheEntryInfo {
    pub origin: String,
    pub age: ChronoDuration,
    pub valid: bool,
    pub crawl_delay: Option<Duration>,
}

/// Fetches, caches and evaluates robots.txt policies
pub struct RobotsCache {
    client: Client,
    agent: String,
    ttl: Duration,
    fetch_timeout: Duration,
    enabled: bool,
    entries: Mutex<HashMap<String, PolicyCell>>,
    fetches: AtomicUsize,
}

impl RobotsCache {
    /// Creates a cache that honours robots.txt
    ///
    /// # Arguments
    ///
    /// * `client` - HTTP client used for robots.txt fetches
    /// * `agent` - Product token matched against `User-agent` lines
    /// * `ttl` - How long a fetched policy stays valid
    /// * `fetch_timeout` - Upper bound for a single robots.txt fetch
    pub fn new(client: Client, agent: impl Into<String>, ttl: Duration, fetch_timeout: Duration) -> Self {
        Self {
            client,
            agent: agent.into(),
            ttl,
            fetch_timeout,
            enabled: true,
            entries: Mutex::new(HashMap::new()),
            fetches: AtomicUsize::new(0),
        }
    }

    /// Creates a cache from the collector configuration
    ///
    /// With `respect-robots = false` the cache is bypassed entirely.
    pub fn from_config(client: Client, config: &Config) -> Self {
        let mut cache = Self::new(
            client,
            config.user_agent.crawler_name.clone(),
            config.collector.robots_cache_ttl(),
            config.collector.robots_timeout(),
        );
        cache.enabled = config.collector.respect_robots;
        cache
    }

    /// A cache that permits everything and never fetches
    pub fn disabled(client: Client) -> Self {
        let mut cache = Self::new(client, "*", Duration::from_secs(3600), Duration::from_secs(10));
        cache.enabled = false;
        cache
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Checks whether `url` may be fetched by our agent
    pub async fn permitted(&self, url: &Url) -> bool {
        match self.policy_for(url).await {
            Some(policy) => policy.is_allowed(url.as_str()),
            None => true,
        }
    }

    /// The crawl delay the origin of `url` asks for, if any
    pub async fn crawl_delay(&self, url: &Url) -> Option<Duration> {
        self.policy_for(url).await.and_then(|p| p.crawl_delay)
    }

    /// Returns the current policy for the origin of `url`
    ///
    /// Returns `None` when the cache is disabled or the URL has no origin.
    pub async fn policy_for(&self, url: &Url) -> Option<Arc<RobotsPolicy>> {
        if !self.enabled {
            return None;
        }
        let origin = origin_key(url)?;
        Some(self.policy(&origin).await)
    }

    async fn policy(&self, origin: &str) -> Arc<RobotsPolicy> {
        let cell = {
            let mut entries = self.lock_entries();
            match entries.get(origin) {
                // Unexpired or still being fetched: share it
                Some(cell) if !cell.get().is_some_and(|p| p.is_expired()) => Arc::clone(cell),
                _ => {
                    let cell: PolicyCell = Arc::new(OnceCell::new());
                    entries.insert(origin.to_string(), Arc::clone(&cell));
                    cell
                }
            }
        };

        cell.get_or_init(|| async { Arc::new(self.fetch_policy(origin).await) })
            .await
            .clone()
    }

    async fn fetch_policy(&self, origin: &str) -> RobotsPolicy {
        self.fetches.fetch_add(1, Ordering::Relaxed);
        let url = robots_url(origin);
        tracing::debug!("Fetching {}", url);

        let response = match self
            .client
            .get(&url)
            .timeout(self.fetch_timeout)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                tracing::debug!("robots.txt fetch failed for {}: {}; allowing all", origin, e);
                return RobotsPolicy::allow_all(origin, &self.agent, self.ttl);
            }
        };

        let status = response.status();
        if status.is_client_error() {
            tracing::debug!("No robots.txt for {} (HTTP {})", origin, status.as_u16());
            return RobotsPolicy::allow_all(origin, &self.agent, self.ttl);
        }
        if !status.is_success() {
            tracing::warn!(
                "robots.txt for {} returned HTTP {}; allowing all",
                origin,
                status.as_u16()
            );
            return RobotsPolicy::allow_all(origin, &self.agent, self.ttl);
        }

        match response.text().await {
            Ok(body) => {
                let policy = RobotsPolicy::from_content(origin, &body, &self.agent, self.ttl);
                tracing::debug!(
                    "robots.txt for {}: {} allow, {} disallow, crawl-delay {:?}",
                    origin,
                    policy.allow_rules.len(),
                    policy.disallow_rules.len(),
                    policy.crawl_delay
                );
                policy
            }
            Err(e) => {
                tracing::debug!("robots.txt body for {} unreadable: {}; allowing all", origin, e);
                RobotsPolicy::allow_all(origin, &self.agent, self.ttl)
            }
        }
    }

    /// Drops one origin's policy, or every policy when `origin` is `None`
    pub fn clear(&self, origin: Option<&str>) {
        let mut entries = self.lock_entries();
        match origin {
            Some(origin) => {
                entries.remove(origin);
            }
            None => entries.clear(),
        }
    }

    /// Lists the fetched policies currently held
    pub fn cache_info(&self) -> Vec<CacheEntryInfo> {
        let entries = self.lock_entries();
        let mut info: Vec<CacheEntryInfo> = entries
            .iter()
            .filter_map(|(origin, cell)| {
                cell.get().map(|policy| CacheEntryInfo {
                    origin: origin.clone(),
                    age: policy.age(),
                    valid: !policy.is_expired(),
                    crawl_delay: policy.crawl_delay,
                })
            })
            .collect();
        info.sort_by(|a, b| a.origin.cmp(&b.origin));
        info
    }

    /// Number of robots.txt network fetches performed so far
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::Relaxed)
    }

    fn lock_entries(&self) -> std::sync::MutexGuard<'_, HashMap<String, PolicyCell>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
