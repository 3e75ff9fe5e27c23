//! Sumi-Harvest main entry point
//!
//! This is the command-line interface for the Sumi-Harvest page and feed
//! collector.

use anyhow::{bail, Context};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use sumi_harvest::config::{load_config_with_hash, Config};
use sumi_harvest::output::{load_statistics, print_statistics};
use sumi_harvest::pipeline::{AbortReason, Pipeline};
use sumi_harvest::storage::open_store;
use tracing_subscriber::EnvFilter;

/// Sumi-Harvest: a polite page and feed collector
///
/// Sumi-Harvest fetches the configured pages and RSS/Atom feeds while
/// respecting robots.txt and crawl delays, retries transient failures, and
/// stores every piece of content exactly once.
#[derive(Parser, Debug)]
#[command(name = "sumi-harvest")]
#[command(version)]
#[command(about = "A polite page and feed collector", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Validate config and show what would be collected without fetching
    #[arg(long, conflicts_with = "stats")]
    dry_run: bool,

    /// Show statistics from the database and exit
    #[arg(long, conflicts_with = "dry_run")]
    stats: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, config_hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;
    tracing::info!("Configuration loaded (hash: {})", config_hash);

    if cli.dry_run {
        handle_dry_run(&config);
        Ok(())
    } else if cli.stats {
        handle_stats(&config)
    } else {
        handle_collect(config, config_hash).await
    }
}

/// Sets up the logging/tracing subscriber
///
/// `RUST_LOG` wins when set; otherwise the filter follows `-v`/`--quiet`.
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if quiet {
            EnvFilter::new("error")
        } else {
            match verbose {
                0 => EnvFilter::new("sumi_harvest=info,warn"),
                1 => EnvFilter::new("sumi_harvest=debug,info"),
                2 => EnvFilter::new("sumi_harvest=trace,debug"),
                _ => EnvFilter::new("trace"),
            }
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Handles the --dry-run mode: shows the validated configuration
fn handle_dry_run(config: &Config) {
    let collector = &config.collector;

    println!("=== Sumi-Harvest Dry Run ===\n");

    println!("Collector:");
    println!("  Max concurrent: {}", collector.max_concurrent);
    println!("  Timeout: {}s", collector.timeout_secs);
    println!("  Max retries: {}", collector.max_retries);
    println!(
        "  Backoff: {}ms base, {}ms cap",
        collector.base_delay_ms, collector.max_backoff_ms
    );
    println!(
        "  Robots: {} (cache {}s)",
        if collector.respect_robots { "respected" } else { "ignored" },
        collector.robots_cache_ttl_secs
    );
    println!("  Min domain interval: {}ms", collector.min_domain_interval_ms);

    println!("\nUser Agent:");
    println!("  {}", config.user_agent.header_value());

    println!("\nOutput:");
    println!("  Database: {}", config.output.database_path);

    println!("\nNotifier:");
    match (&config.notifier.enabled, &config.notifier.webhook_url) {
        (true, Some(url)) => println!("  Webhook ({:?}): {}", config.notifier.webhook_format, url),
        _ => println!("  Log only"),
    }

    println!("\nPages ({}):", config.targets.len());
    for url in &config.targets {
        println!("  - {}", url);
    }

    println!("\nFeeds ({}):", config.feeds.len());
    for url in &config.feeds {
        println!("  - {}", url);
    }

    println!("\n✓ Configuration is valid");
    println!("✓ Would collect {} targets", config.targets().len());
}

/// Handles the --stats mode: shows statistics from the database
fn handle_stats(config: &Config) -> anyhow::Result<()> {
    println!("Database: {}\n", config.output.database_path);

    let store = open_store(Path::new(&config.output.database_path))
        .with_context(|| format!("failed to open {}", config.output.database_path))?;
    let stats = load_statistics(&store).context("failed to read statistics")?;
    print_statistics(&stats);

    Ok(())
}

/// Handles the main collection run
async fn handle_collect(config: Config, config_hash: String) -> anyhow::Result<()> {
    let store = open_store(Path::new(&config.output.database_path))
        .with_context(|| format!("failed to open {}", config.output.database_path))?;

    let pipeline = Pipeline::new(&config, Arc::new(store))
        .context("failed to build pipeline")?
        .with_config_hash(config_hash);

    let cancel = pipeline.cancellation_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, cancelling run");
            cancel.cancel();
        }
    });

    let targets = config.targets();
    tracing::info!(
        "Collecting {} pages and {} feeds",
        config.targets.len(),
        config.feeds.len()
    );

    let report = pipeline.run(targets).await.context("run failed to start")?;
    println!("{}", report.metrics.summary());

    match report.aborted {
        Some(AbortReason::Infrastructure(message)) => {
            bail!("run {} aborted: {}", report.run_id, message)
        }
        Some(AbortReason::Cancelled) => {
            println!(
                "Run {} cancelled; {} targets were not dispatched",
                report.run_id, report.undispatched
            );
            Ok(())
        }
        None => Ok(()),
    }
}
