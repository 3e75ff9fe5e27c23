//! Robots.txt policy parsing and evaluation
//!
//! Path matching is delegated to the robotstxt crate (longest match wins,
//! ties go to `Allow`, `*` and `$` patterns). The rule group that applies to
//! our product token is also extracted here so the crawl delay and rule
//! lists can be inspected without re-reading the file.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use robotstxt::DefaultMatcher;
use std::time::Duration;

/// Longest crawl delay honoured; larger values are clamped to it
pub const MAX_CRAWL_DELAY: Duration = Duration::from_secs(3600);

/// The directives of the group that applies to one user agent
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RobotsGroup {
    pub allow: Vec<String>,
    pub disallow: Vec<String>,
    pub crawl_delay: Option<Duration>,
}

/// Robots policy for one origin, resolved for our product token
///
/// Policies are shared read-only between workers and replaced (never
/// mutated) once `expires_at` has passed.
#[derive(Debug, Clone)]
pub struct RobotsPolicy {
    pub origin: String,
    pub allow_rules: Vec<String>,
    pub disallow_rules: Vec<String>,
    pub crawl_delay: Option<Duration>,
    pub fetched_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    agent: String,
    content: String,
}

impl RobotsPolicy {
    /// Builds a policy from raw robots.txt content
    ///
    /// # Arguments
    ///
    /// * `origin` - The origin the file was fetched from
    /// * `content` - The robots.txt body
    /// * `agent` - Our product token (e.g. `SumiHarvest`)
    /// * `ttl` - How long the policy stays valid
    pub fn from_content(origin: &str, content: &str, agent: &str, ttl: Duration) -> Self {
        let group = effective_group(content, agent);
        let fetched_at = Utc::now();

        Self {
            origin: origin.to_string(),
            allow_rules: group.allow,
            disallow_rules: group.disallow,
            crawl_delay: group.crawl_delay,
            fetched_at,
            expires_at: fetched_at + ttl_to_chrono(ttl),
            agent: agent.to_string(),
            content: content.to_string(),
        }
    }

    /// A policy that permits everything with no delay
    ///
    /// Used when the origin has no robots.txt or it could not be fetched.
    pub fn allow_all(origin: &str, agent: &str, ttl: Duration) -> Self {
        Self::from_content(origin, "", agent, ttl)
    }

    pub fn allows_everything(&self) -> bool {
        self.disallow_rules.is_empty()
    }

    /// Checks whether `url` may be fetched
    pub fn is_allowed(&self, url: &str) -> bool {
        if self.content.trim().is_empty() {
            return true;
        }
        let mut matcher = DefaultMatcher::default();
        matcher.one_agent_allowed_by_robots(&self.content, &self.agent, url)
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// How long ago the policy was fetched
    pub fn age(&self) -> ChronoDuration {
        Utc::now() - self.fetched_at
    }
}

fn ttl_to_chrono(ttl: Duration) -> ChronoDuration {
    // expires_at must stay strictly after fetched_at
    ChronoDuration::from_std(ttl)
        .ok()
        .filter(|d| *d > ChronoDuration::zero())
        .unwrap_or_else(|| ChronoDuration::milliseconds(1))
}

/// Extracts the rule group for `agent` from robots.txt content
///
/// A group is one or more consecutive `User-agent` lines followed by rule
/// lines. Groups naming our product token (case-insensitive) are merged and
/// take precedence; otherwise the `*` groups apply. An empty `Disallow:`
/// line allows everything and contributes no rule.
pub fn effective_group(content: &str, agent: &str) -> RobotsGroup {
    let agent = agent.to_ascii_lowercase();
    let mut groups: Vec<(Vec<String>, RobotsGroup)> = Vec::new();
    let mut reading_agents = false;

    for line in content.lines() {
        let line = line.split('#').next().unwrap_or("").trim();
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let key = key.trim().to_ascii_lowercase();
        let value = value.trim();

        if key == "user-agent" {
            if !reading_agents {
                groups.push((Vec::new(), RobotsGroup::default()));
            }
            reading_agents = true;
            if let Some((agents, _)) = groups.last_mut() {
                agents.push(product_token(value));
            }
            continue;
        }

        reading_agents = false;
        let Some((_, group)) = groups.last_mut() else {
            continue;
        };

        match key.as_str() {
            "allow" if !value.is_empty() => group.allow.push(value.to_string()),
            "disallow" if !value.is_empty() => group.disallow.push(value.to_string()),
            "crawl-delay" => {
                if let Some(delay) = parse_crawl_delay(value) {
                    group.crawl_delay = Some(delay);
                }
            }
            _ => {}
        }
    }

    merge_groups(&groups, |name| name == agent)
        .or_else(|| merge_groups(&groups, |name| name == "*"))
        .unwrap_or_default()
}

fn merge_groups<F>(groups: &[(Vec<String>, RobotsGroup)], wanted: F) -> Option<RobotsGroup>
where
    F: Fn(&str) -> bool,
{
    let mut merged: Option<RobotsGroup> = None;

    for (agents, group) in groups {
        if !agents.iter().any(|name| wanted(name)) {
            continue;
        }
        let target = merged.get_or_insert_with(RobotsGroup::default);
        target.allow.extend(group.allow.iter().cloned());
        target.disallow.extend(group.disallow.iter().cloned());
        if target.crawl_delay.is_none() {
            target.crawl_delay = group.crawl_delay;
        }
    }

    merged
}

/// Parses a `Crawl-delay` value in seconds, clamped to [`MAX_CRAWL_DELAY`]
fn parse_crawl_delay(value: &str) -> Option<Duration> {
    let secs = value.parse::<f64>().ok()?;
    if secs.is_nan() || secs < 0.0 {
        return None;
    }
    let delay = Duration::try_from_secs_f64(secs).unwrap_or(MAX_CRAWL_DELAY);
    Some(delay.min(MAX_CRAWL_DELAY))
}

/// `Googlebot/2.1 (+http://...)` -> `googlebot`
fn product_token(value: &str) -> String {
    value
        .split(|c: char| c == '/' || c.is_whitespace())
        .next()
        .unwrap_or("")
        .to_ascii_lowercase()
}
