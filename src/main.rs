//! board-harvest main entry point
//!
//! This is the command-line interface for the board-harvest image crawler.

use anyhow::{bail, Context};
use board_harvest::config::{load_config_with_hash, Config};
use board_harvest::crawler::Coordinator;
use board_harvest::ledger::{CheckpointKey, CheckpointLedger};
use board_harvest::output::{print_checkpoints, print_plan, print_summary};
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// board-harvest: a resumable forum and news image crawler
///
/// board-harvest pages through the listing pages of each configured board,
/// downloads the images they reference, and records its progress so an
/// interrupted run picks up where it stopped without storing anything twice.
#[derive(Parser, Debug)]
#[command(name = "board-harvest")]
#[command(version)]
#[command(about = "A resumable forum and news image crawler", long_about = None)]
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

    /// Clear every target's checkpoint and start from its first page
    #[arg(long)]
    fresh: bool,

    /// Validate config and show what would be harvested without fetching anything
    #[arg(long, conflicts_with_all = ["status", "clear"])]
    dry_run: bool,

    /// Show every stored checkpoint and exit
    #[arg(long, conflicts_with_all = ["dry_run", "clear"])]
    status: bool,

    /// Delete the checkpoint of one target (SITE/BOARD) and exit
    #[arg(long, value_name = "SITE/BOARD", conflicts_with_all = ["dry_run", "status"])]
    clear: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let (config, config_hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("Failed to load configuration from {}", cli.config.display()))?;

    setup_logging(cli.verbose, cli.quiet, &config.logging.level);
    tracing::info!("Configuration loaded from {} (hash: {})", cli.config.display(), config_hash);

    if cli.dry_run {
        handle_dry_run(config, &config_hash, cli.fresh)
    } else if cli.status {
        handle_status(&config)
    } else if let Some(target) = cli.clear {
        handle_clear(&config, &target)
    } else {
        handle_harvest(config, &config_hash, cli.fresh).await
    }
}

/// Sets up the logging/tracing subscriber
///
/// `RUST_LOG` wins over the flags; without flags the config file's level applies.
fn setup_logging(verbose: u8, quiet: bool, config_level: &str) {
    let default = if quiet {
        "error".to_string()
    } else {
        match verbose {
            0 => format!("board_harvest={},warn", config_level),
            1 => "board_harvest=debug,info".to_string(),
            2 => "board_harvest=trace,debug".to_string(),
            _ => "trace".to_string(),
        }
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Handles --dry-run: prints the plan for every target
fn handle_dry_run(config: Config, config_hash: &str, fresh: bool) -> anyhow::Result<()> {
    println!("Database: {}", config.ledger.database_path);
    println!("Artifacts: {}", config.dedup.artifact_dir.display());
    println!(
        "Workers: {} (adaptive {}..={})\n",
        config.scheduler.initial_workers, config.scheduler.min_workers, config.scheduler.max_workers
    );

    let coordinator = Coordinator::new(config, config_hash)
        .context("Failed to open harvest storage")?
        .fresh(fresh);
    print_plan(&coordinator.plan()?);
    Ok(())
}

/// Handles --status: lists every checkpoint
fn handle_status(config: &Config) -> anyhow::Result<()> {
    let ledger = CheckpointLedger::open(&config.ledger).context("Failed to open checkpoint ledger")?;
    print_checkpoints(&ledger.list()?);
    Ok(())
}

/// Handles --clear SITE/BOARD
fn handle_clear(config: &Config, target: &str) -> anyhow::Result<()> {
    let Some(key) = CheckpointKey::parse(target) else {
        bail!("Expected SITE/BOARD, got '{}'", target);
    };

    let mut ledger =
        CheckpointLedger::open(&config.ledger).context("Failed to open checkpoint ledger")?;
    if ledger.clear(&key)? {
        println!("✓ Cleared checkpoint for {}", key);
    } else {
        println!("No checkpoint stored for {}", key);
    }
    Ok(())
}

/// Handles the main harvest, stopping cleanly on Ctrl-C
async fn handle_harvest(config: Config, config_hash: &str, fresh: bool) -> anyhow::Result<()> {
    if fresh {
        tracing::info!("Starting fresh harvest (clearing checkpoints)");
    }

    let mut coordinator = Coordinator::new(config, config_hash)
        .context("Failed to initialize harvest")?
        .fresh(fresh);

    let cancel = coordinator.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, finishing in-flight downloads");
            cancel.cancel();
        }
    });

    let summary = coordinator.run().await.context("Harvest aborted")?;
    print_summary(&summary);
    Ok(())
}
