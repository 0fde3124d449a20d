//! tsfix-harness - validation harness for the Transfer Syntax fixer
//!
//! Fetches reference archives, clears every file's Transfer Syntax
//! declaration, runs the fixer over the cleared copies and reports how many
//! declarations were recovered.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tsfix_common::config::{default_cache_dir, load_config, resolve_directory};
use tsfix_common::logging::init_tracing;
use tsfix_harness::{
    discover_from_index, HarnessOptions, HtmlRenderer, HttpFetcher, StandardExtractor,
    ValidationHarness,
};

/// Command-line arguments for tsfix-harness
#[derive(Parser, Debug)]
#[command(name = "tsfix-harness")]
#[command(about = "Validate Transfer Syntax recovery against reference archives")]
#[command(version)]
struct Args {
    /// Archive URL to validate (repeatable); skips index discovery
    #[arg(short, long = "archive")]
    archives: Vec<String>,

    /// Maximum archives to process, 0 for all
    #[arg(short, long, env = "TSFIX_ARCHIVE_LIMIT")]
    limit: Option<usize>,

    /// Directory for results.json, report.md and report.html
    #[arg(long)]
    report_dir: Option<PathBuf>,

    /// Directory for downloads and extracted archives
    #[arg(long)]
    work_dir: Option<PathBuf>,

    /// Page listing downloadable archives
    #[arg(long, env = "TSFIX_INDEX_URL")]
    index_url: Option<String>,

    /// Archives processed concurrently
    #[arg(long)]
    concurrency: Option<usize>,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,

    /// Config file (default: ~/.config/tsfix/config.toml)
    #[arg(short, long, env = "TSFIX_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = load_config(args.config.as_deref()).context("Failed to load configuration")?;
    init_tracing(&config.logging.level, args.verbose);

    info!(
        "Starting tsfix-harness v{} (git {}, built {}, {})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );

    let harness_config = &config.harness;
    let mut options = HarnessOptions::from(&config);
    options.report_dir = resolve_directory(
        args.report_dir.as_deref(),
        "TSFIX_REPORT_DIR",
        harness_config.report_directory.as_deref(),
        || default_cache_dir().join("report"),
    );
    options.work_dir = resolve_directory(
        args.work_dir.as_deref(),
        "TSFIX_WORK_DIR",
        harness_config.work_directory.as_deref(),
        || default_cache_dir().join("archives"),
    );
    if let Some(limit) = args.limit {
        options.limit = limit;
    }
    if let Some(concurrency) = args.concurrency {
        options.concurrency = concurrency;
    }
    info!("Report directory: {}", options.report_dir.display());
    info!("Work directory: {}", options.work_dir.display());

    let fetcher = HttpFetcher::new(
        Duration::from_secs(harness_config.fetch_timeout_secs),
        harness_config.fetch_retries,
    )
    .context("Failed to build HTTP client")?;

    let sources = if args.archives.is_empty() {
        let index_url = args
            .index_url
            .unwrap_or_else(|| harness_config.index_url.clone());
        info!("Discovering archives from {}", index_url);
        discover_from_index(&fetcher, &index_url)
            .await
            .with_context(|| format!("Cannot list archives from {}", index_url))?
    } else {
        args.archives
    };
    info!("{} archive(s) available", sources.len());

    let harness = ValidationHarness::new(Arc::new(fetcher), Arc::new(StandardExtractor), options);
    let (run, paths) = harness
        .validate(sources, &HtmlRenderer)
        .await
        .context("Validation run failed")?;

    println!(
        "Validated {} file(s): {} matched ({:.2}%)",
        run.total, run.matched, run.success_rate
    );
    println!("Report: {}", paths.markdown.display());
    println!("HTML:   {}", paths.html.display());
    println!("JSON:   {}", paths.json.display());
    Ok(())
}
