//! Crawler module for task scheduling and image harvesting
//!
//! This module contains the core harvesting logic, including:
//! - The scheduler with its bounded queue and adaptive worker pool
//! - HTTP fetching with transient/permanent error classification
//! - Listing page parsing and image extraction
//! - The image download worker
//! - Per-target coordination with the checkpoint ledger

mod adaptive;
mod coordinator;
mod fetcher;
mod parser;
mod scheduler;
mod task;
mod worker;

pub use adaptive::{AdaptiveConcurrencyController, Adjustment};
pub use coordinator::{
    Coordinator, HarvestSummary, PagingEnd, PlanAction, TargetOutcome, TargetPlan, TargetReport,
};
pub use fetcher::{build_http_client, is_not_found, FetchError, FetchedContent, Fetcher, HttpFetcher};
pub use parser::{extension_of, ImageExtractor};
pub use scheduler::{
    worker_fn, FnWorker, RunContext, RunStats, Scheduler, SchedulerOptions, WorkerFunction,
};
pub use task::{Artifact, DuplicateReason, FailureReason, Feed, Outcome, Task, TaskKey};
pub use worker::{detect_format, ImageArtifact, ImageDownloadWorker, ImageRequest};

use crate::config::Config;
use crate::HarvestError;

/// Runs a complete harvest over every configured target
///
/// This is the main entry point for a harvest. It will:
/// 1. Open the ledger, result store and run log
/// 2. Rehydrate the dedup indexes
/// 3. Start, resume or skip each target according to its checkpoint
/// 4. Mark each target completed or errored
///
/// # Arguments
///
/// * `config` - The harvest configuration
/// * `config_hash` - Hash of the configuration file
/// * `fresh` - Clear every target's checkpoint first
///
/// # Returns
///
/// * `Ok(HarvestSummary)` - Every target ran or was skipped
/// * `Err(HarvestError)` - A fatal failure aborted the harvest
pub async fn harvest(
    config: Config,
    config_hash: &str,
    fresh: bool,
) -> Result<HarvestSummary, HarvestError> {
    Coordinator::new(config, config_hash)?.fresh(fresh).run().await
}
