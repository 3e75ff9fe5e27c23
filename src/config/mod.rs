//! Configuration module for Sumi-Harvest
//!
//! This module handles loading, parsing, overriding and validating the TOML
//! configuration file.
//!
//! # Example
//!
//! ```no_run
//! use sumi_harvest::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("harvest.toml")).unwrap();
//! println!("Collecting {} targets", config.targets().len());
//! ```

mod parser;
mod types;
mod validation;

pub use types::{
    CollectorConfig, Config, NotifierConfig, OutputConfig, UserAgentConfig, WebhookFormat,
};

pub use parser::{
    apply_overrides, compute_config_hash, deep_merge, load_config, load_config_from,
    load_config_with_hash, parse_config, profile_path, ENV_PROFILE,
};
pub use validation::validate;
