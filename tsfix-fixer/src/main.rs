//! tsfix-fixer - Transfer Syntax repair tool
//!
//! Scans a directory tree, detects each file's real Transfer Syntax and
//! repairs the declaration in place. Prints a statistics block when done.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing::info;
use tsfix_common::config::{load_config, resolve_flag};
use tsfix_common::logging::init_tracing;
use tsfix_common::SyntaxCatalog;
use tsfix_fixer::{BatchPipeline, PipelineOptions};

/// Command-line arguments for tsfix-fixer
#[derive(Parser, Debug)]
#[command(name = "tsfix-fixer")]
#[command(about = "Detect and repair DICOM Transfer Syntax declarations")]
#[command(version)]
struct Args {
    /// Directory tree to process
    #[arg(default_value = ".")]
    path: PathBuf,

    /// Report what would change without writing (env: TSFIX_DRY_RUN)
    #[arg(long)]
    dry_run: bool,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,

    /// Log every detection evidence line (env: TSFIX_VERBOSE_EVIDENCE)
    #[arg(long)]
    verbose_evidence: bool,

    /// Worker threads (default: one per CPU)
    #[arg(short, long, env = "TSFIX_WORKERS")]
    workers: Option<usize>,

    /// Config file (default: ~/.config/tsfix/config.toml)
    #[arg(short, long, env = "TSFIX_CONFIG")]
    config: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let config = load_config(args.config.as_deref()).context("Failed to load configuration")?;
    init_tracing(&config.logging.level, args.verbose);

    info!(
        "Starting tsfix-fixer v{} (git {}, built {}, {})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );

    let mut options = PipelineOptions::from(&config.fixer);
    options.dry_run = resolve_flag(args.dry_run, "TSFIX_DRY_RUN", config.fixer.dry_run);
    options.verbose_evidence = resolve_flag(
        args.verbose_evidence,
        "TSFIX_VERBOSE_EVIDENCE",
        config.fixer.verbose_evidence,
    );
    if args.workers.is_some() {
        options.workers = args.workers;
    }

    let catalog = SyntaxCatalog::global();
    info!("Syntax catalog loaded: {} transfer syntaxes", catalog.len());

    let report = BatchPipeline::new(catalog, options)
        .run(&args.path)
        .with_context(|| format!("Cannot process {}", args.path.display()))?;

    println!("{}", report);
    Ok(())
}
