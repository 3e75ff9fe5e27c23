use crate::config::types::Config;
use crate::config::validation::validate;
use crate::ConfigError;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use toml::{Table, Value};

/// Environment variables that override values from the configuration file
pub const ENV_DB_PATH: &str = "HARVEST_DB_PATH";
pub const ENV_MAX_CONCURRENT: &str = "HARVEST_MAX_CONCURRENT";
pub const ENV_TIMEOUT_SECS: &str = "HARVEST_TIMEOUT_SECS";
pub const ENV_MAX_RETRIES: &str = "HARVEST_MAX_RETRIES";
pub const ENV_TARGETS: &str = "HARVEST_TARGETS";
pub const ENV_FEEDS: &str = "HARVEST_FEEDS";
pub const ENV_WEBHOOK_URL: &str = "HARVEST_WEBHOOK_URL";

/// Selects a profile overlay such as `harvest.staging.toml`
pub const ENV_PROFILE: &str = "HARVEST_PROFILE";

/// Loads, overrides and validates a configuration file
///
/// When `HARVEST_PROFILE` names a profile whose overlay file exists next to
/// `path`, the overlay is deep-merged over the file first. Values set through
/// `HARVEST_*` environment variables then take precedence. Validation runs
/// last.
///
/// # Arguments
///
/// * `path` - Path to the TOML configuration file
///
/// # Returns
///
/// * `Ok(Config)` - Successfully loaded and validated configuration
/// * `Err(ConfigError)` - Failed to load, parse, override or validate
///
/// # Example
///
/// ```no_run
/// use std::path::Path;
/// use sumi_harvest::config::load_config;
///
/// let config = load_config(Path::new("harvest.toml")).unwrap();
/// println!("Workers: {}", config.collector.max_concurrent);
/// ```
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    load_config_from(path, |name| std::env::var(name).ok())
}

/// Same as [`load_config`] with variables resolved through `lookup`
pub fn load_config_from<F>(path: &Path, lookup: F) -> Result<Config, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut table = read_table(path)?;
    if let Some(overlay) = profile_overlay(path, &lookup) {
        tracing::debug!("Applying profile overlay {}", overlay.display());
        deep_merge(&mut table, read_table(&overlay)?);
    }

    let mut config: Config = Value::Table(table).try_into()?;
    apply_overrides(&mut config, &lookup)?;
    validate(&config)?;
    Ok(config)
}

fn read_table(path: &Path) -> Result<Table, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    Ok(toml::from_str(&content)?)
}

/// `harvest.toml` with profile `staging` -> `harvest.staging.toml`
pub fn profile_path(path: &Path, profile: &str) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let file_name = match path.extension() {
        Some(ext) => format!("{}.{}.{}", stem, profile, ext.to_string_lossy()),
        None => format!("{}.{}", stem, profile),
    };
    path.with_file_name(file_name)
}

/// The overlay file for the selected profile, if one is selected and exists
///
/// The `default` profile has no overlay.
fn profile_overlay<F>(path: &Path, lookup: &F) -> Option<PathBuf>
where
    F: Fn(&str) -> Option<String>,
{
    let profile = lookup(ENV_PROFILE)?;
    let profile = profile.trim();
    if profile.is_empty() || profile == "default" {
        return None;
    }

    let overlay = profile_path(path, profile);
    if overlay.is_file() {
        Some(overlay)
    } else {
        tracing::debug!("No overlay for profile '{}' at {}", profile, overlay.display());
        None
    }
}

/// Merges `overlay` into `base`; nested tables merge key by key, anything
/// else is replaced
pub fn deep_merge(base: &mut Table, overlay: Table) {
    for (key, value) in overlay {
        let Value::Table(incoming) = value else {
            base.insert(key, value);
            continue;
        };
        if let Some(Value::Table(existing)) = base.get_mut(&key) {
            deep_merge(existing, incoming);
            continue;
        }
        base.insert(key, Value::Table(incoming));
    }
}

/// Parses TOML content into a configuration without validating it
pub fn parse_config(content: &str) -> Result<Config, ConfigError> {
    Ok(toml::from_str(content)?)
}

/// Applies overrides looked up by variable name
///
/// `lookup` is usually `std::env::var`; tests pass a map instead.
pub fn apply_overrides<F>(config: &mut Config, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(path) = lookup(ENV_DB_PATH) {
        config.output.database_path = path;
    }
    if let Some(raw) = lookup(ENV_MAX_CONCURRENT) {
        config.collector.max_concurrent = parse_number(ENV_MAX_CONCURRENT, &raw)?;
    }
    if let Some(raw) = lookup(ENV_TIMEOUT_SECS) {
        config.collector.timeout_secs = parse_number(ENV_TIMEOUT_SECS, &raw)?;
    }
    if let Some(raw) = lookup(ENV_MAX_RETRIES) {
        config.collector.max_retries = parse_number(ENV_MAX_RETRIES, &raw)?;
    }
    if let Some(raw) = lookup(ENV_TARGETS) {
        config.targets = split_list(&raw);
    }
    if let Some(raw) = lookup(ENV_FEEDS) {
        config.feeds = split_list(&raw);
    }
    if let Some(url) = lookup(ENV_WEBHOOK_URL) {
        config.notifier.webhook_url = Some(url);
        config.notifier.enabled = true;
    }
    Ok(())
}

fn parse_number<T: FromStr>(name: &str, raw: &str) -> Result<T, ConfigError> {
    raw.trim().parse().map_err(|_| ConfigError::Override {
        name: name.to_string(),
        message: format!("expected a non-negative integer, got '{}'", raw),
    })
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

/// Computes a SHA-256 hash of the configuration file content
///
/// The hash is stored with each run so the stats view can tell which runs
/// used the same configuration.
///
/// A profile overlay, when one was applied, is hashed after the base file.
pub fn compute_config_hash(path: &Path, overlay: Option<&Path>) -> Result<String, ConfigError> {
    let mut hasher = Sha256::new();
    hasher.update(std::fs::read(path)?);
    if let Some(overlay) = overlay {
        hasher.update(std::fs::read(overlay)?);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Loads a configuration and returns both the config and its hash
pub fn load_config_with_hash(path: &Path) -> Result<(Config, String), ConfigError> {
    let lookup = |name: &str| std::env::var(name).ok();
    let config = load_config_from(path, lookup)?;
    let overlay = profile_overlay(path, &lookup);
    let hash = compute_config_hash(path, overlay.as_deref())?;
    Ok((config, hash))
}
