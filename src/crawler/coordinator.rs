//! Harvest coordinator - per-target crawl orchestration
//!
//! This module contains the outer loop of a harvest, including:
//! - Opening the ledger, the result store and the run log
//! - Rehydrating the dedup indexes from earlier runs
//! - Deciding per target whether to start, resume or skip
//! - Paging through listing pages and feeding image tasks to the scheduler
//! - Marking targets completed or errored

use crate::config::{Config, ResumeStrategy, TargetConfig};
use crate::crawler::fetcher::{is_not_found, FetchError, Fetcher, HttpFetcher};
use crate::crawler::parser::ImageExtractor;
use crate::crawler::scheduler::{RunContext, RunStats, Scheduler};
use crate::crawler::task::{Feed, Task};
use crate::crawler::worker::{ImageDownloadWorker, ImageRequest};
use crate::dedup::{DedupEngine, DedupStats};
use crate::ledger::{CheckpointKey, CheckpointLedger, CheckpointUpdate, IdPosition, IdWindow, ResumePoint};
use crate::state::RunStatus;
use crate::storage::{ArtifactStore, SqliteStorage};
use crate::url::normalize_url_lossy;
use crate::{ConfigError, HarvestError};
use futures::stream::{self, Stream, StreamExt};
use regex::Regex;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

/// Delay before the second attempt at a listing page; doubles afterwards
const LISTING_RETRY_DELAY: Duration = Duration::from_millis(250);

/// Why paging through a target's listing stopped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PagingEnd {
    /// A page had no images or did not exist
    Exhausted { page: u32 },

    /// The configured end page was scanned
    EndPage { page: u32 },

    /// A listing page could not be fetched
    Failed { page: u32, message: String },
}

/// How a target's run ended
#[derive(Debug, Clone, PartialEq)]
pub enum TargetOutcome {
    /// Listing exhausted and every task terminal
    Completed,

    /// Already completed by an earlier run
    Skipped,

    /// Stopped by cancellation; resumable
    Cancelled,

    /// A listing page failed; the target was marked as errored
    Failed(String),
}

/// Result of one target
#[derive(Debug, Clone)]
pub struct TargetReport {
    pub key: CheckpointKey,
    pub outcome: TargetOutcome,
    pub start_page: u32,
    pub stats: RunStats,
}

/// Result of a whole harvest
#[derive(Debug, Clone)]
pub struct HarvestSummary {
    pub run_id: i64,
    pub targets: Vec<TargetReport>,
    pub dedup: DedupStats,
    pub cancelled: bool,
}

/// What a harvest would do with a target
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanAction {
    Start,
    Resume,
    Skip,
}

/// Dry-run view of one target
#[derive(Debug, Clone)]
pub struct TargetPlan {
    pub key: CheckpointKey,
    pub action: PlanAction,
    pub start_page: u32,
    pub end_page: Option<u32>,
    pub first_url: String,
    pub resume_strategy: ResumeStrategy,
}

/// Main harvest coordinator
pub struct Coordinator {
    config: Config,
    config_hash: String,
    fetcher: Arc<dyn Fetcher>,
    ledger: CheckpointLedger,
    results: ArtifactStore,
    dedup: DedupEngine,
    runs: SqliteStorage,
    fresh: bool,
    cancel: CancellationToken,
}

impl Coordinator {
    /// Creates a coordinator fetching over HTTP
    ///
    /// # Arguments
    ///
    /// * `config` - The validated configuration
    /// * `config_hash` - Hash of the configuration file, recorded in the run log
    ///
    /// # Returns
    ///
    /// * `Ok(Coordinator)` - Storage opened and HTTP client built
    /// * `Err(HarvestError)` - Failed to initialize
    pub fn new(config: Config, config_hash: impl Into<String>) -> Result<Self, HarvestError> {
        let fetcher = HttpFetcher::new(&config.fetch)?;
        Self::with_fetcher(config, config_hash, Arc::new(fetcher))
    }

    /// Creates a coordinator over any fetcher
    pub fn with_fetcher(
        config: Config,
        config_hash: impl Into<String>,
        fetcher: Arc<dyn Fetcher>,
    ) -> Result<Self, HarvestError> {
        let database = Path::new(&config.ledger.database_path);
        let ledger = CheckpointLedger::open(&config.ledger)?;
        let results = ArtifactStore::new(&config.dedup.artifact_dir, SqliteStorage::new(database)?)?;
        let runs = SqliteStorage::new(database)?;
        let dedup = DedupEngine::new(&config.dedup);

        Ok(Self {
            config,
            config_hash: config_hash.into(),
            fetcher,
            ledger,
            results,
            dedup,
            runs,
            fresh: false,
            cancel: CancellationToken::new(),
        })
    }

    /// Clears every target's checkpoint before running it
    pub fn fresh(mut self, fresh: bool) -> Self {
        self.fresh = fresh;
        self
    }

    /// Token that stops the harvest after the in-flight downloads
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn ledger(&self) -> &CheckpointLedger {
        &self.ledger
    }

    pub fn results(&self) -> &ArtifactStore {
        &self.results
    }

    /// Describes what [`run`](Self::run) would do, without touching anything
    pub fn plan(&self) -> Result<Vec<TargetPlan>, HarvestError> {
        let mut plans = Vec::new();

        for target in &self.config.targets {
            let key = CheckpointKey::new(&target.site, &target.board);
            let point = if self.fresh {
                ResumePoint::Fresh
            } else {
                self.ledger.resume_point(&key)?
            };

            let (action, start_page) = match &point {
                ResumePoint::Completed => (PlanAction::Skip, target.start_page),
                ResumePoint::Fresh => (PlanAction::Start, target.start_page),
                ResumePoint::Resume { page, .. } => (PlanAction::Resume, resume_page(target, *page)),
            };

            plans.push(TargetPlan {
                key,
                action,
                start_page,
                end_page: target.end_page,
                first_url: target.page_url(start_page),
                resume_strategy: target.resume_strategy,
            });
        }

        Ok(plans)
    }

    /// Runs every configured target in order
    ///
    /// A listing failure marks its target as errored and moves on; a fatal
    /// storage failure marks the target and aborts the harvest.
    pub async fn run(&mut self) -> Result<HarvestSummary, HarvestError> {
        if let Some(previous) = self.runs.latest_run()? {
            if previous.config_hash != self.config_hash {
                warn!(
                    "Configuration changed since run {} (started {})",
                    previous.id, previous.started_at
                );
            }
        }

        let run_id = self.runs.create_run(&self.config_hash)?;
        info!("Starting harvest run {} over {} targets", run_id, self.config.targets.len());

        self.rehydrate()?;

        let targets = self.config.targets.clone();
        let mut reports = Vec::new();

        for target in &targets {
            if self.cancel.is_cancelled() {
                break;
            }

            match self.run_target(target).await {
                Ok(report) => reports.push(report),
                Err(e) => {
                    self.runs.finish_run(run_id, RunStatus::Error)?;
                    return Err(e);
                }
            }
        }

        let cancelled = self.cancel.is_cancelled();
        if cancelled {
            // Left as running so the run log shows the interruption
            info!("Harvest run {} interrupted", run_id);
        } else {
            let failed = reports
                .iter()
                .any(|r| matches!(r.outcome, TargetOutcome::Failed(_)));
            let status = if failed {
                RunStatus::Error
            } else {
                RunStatus::Completed
            };
            self.runs.finish_run(run_id, status)?;
            info!("Harvest run {} finished: {}", run_id, status);
        }

        Ok(HarvestSummary {
            run_id,
            targets: reports,
            dedup: self.dedup.stats(),
            cancelled,
        })
    }

    /// Restores the dedup indexes from stored artifacts and result rows
    fn rehydrate(&mut self) -> Result<(), HarvestError> {
        let files = if self.config.dedup.enabled {
            self.dedup.rehydrate_dir(self.results.root())?
        } else {
            0
        };
        let urls = self.dedup.rehydrate_results(&self.results)?;

        info!("Dedup index rehydrated: {} files, {} stored results", files, urls);
        Ok(())
    }

    async fn run_target(&mut self, target: &TargetConfig) -> Result<TargetReport, HarvestError> {
        let key = CheckpointKey::new(&target.site, &target.board);

        if self.fresh {
            self.ledger.clear(&key)?;
        }

        let (start_page, recent, window) = match self.ledger.resume_point(&key)? {
            ResumePoint::Completed => {
                info!("Skipping completed target {}", key);
                return Ok(TargetReport {
                    key,
                    outcome: TargetOutcome::Skipped,
                    start_page: target.start_page,
                    stats: RunStats::default(),
                });
            }
            ResumePoint::Fresh => {
                info!("Starting target {} at page {}", key, target.start_page);
                (target.start_page, Vec::new(), IdWindow::default())
            }
            ResumePoint::Resume {
                page,
                min_id,
                max_id,
                recent_seen_ids,
                ..
            } => {
                let page = resume_page(target, page);
                info!("Resuming target {} at page {}", key, page);
                (
                    page,
                    recent_seen_ids,
                    IdWindow::from_stored(min_id.as_deref(), max_id.as_deref()),
                )
            }
        };

        self.ledger
            .save_with_retry(&key, &CheckpointUpdate::new().status(RunStatus::Running))
            .await?;

        let (end_tx, end_rx) = oneshot::channel();
        let cursor = PageCursor::new(
            target,
            Arc::clone(&self.fetcher),
            start_page,
            window,
            self.config.scheduler.max_attempts,
            end_tx,
        )?;
        let worker = ImageDownloadWorker::new(Arc::clone(&self.fetcher), &self.config.fetch);
        let scheduler =
            Scheduler::with_cancellation(self.config.scheduler.clone(), self.cancel.child_token());

        let result = {
            let mut ctx = RunContext::new(
                key.clone(),
                &mut self.ledger,
                &mut self.dedup,
                &mut self.results,
            )
            .with_recent_seen(recent);
            scheduler.run(cursor.into_stream(), worker, &mut ctx).await
        };

        let stats = match result {
            Ok(stats) => stats,
            Err(e) => {
                if let Err(mark) = self.ledger.mark_error(&key, &e.to_string()) {
                    warn!("Could not mark {} as errored: {}", key, mark);
                }
                return Err(e);
            }
        };

        let outcome = if stats.cancelled {
            TargetOutcome::Cancelled
        } else {
            match end_rx.await {
                Ok(PagingEnd::Failed { page, message }) => {
                    let message = format!("listing page {} failed: {}", page, message);
                    self.ledger.mark_error(&key, &message)?;
                    TargetOutcome::Failed(message)
                }
                Ok(end) => {
                    debug!("Listing of {} ended: {:?}", key, end);
                    self.ledger
                        .mark_completed(&key, Some(stats.to_checkpoint_stats()))?;
                    TargetOutcome::Completed
                }
                Err(_) => TargetOutcome::Cancelled,
            }
        };

        Ok(TargetReport {
            key,
            outcome,
            start_page,
            stats,
        })
    }
}

/// Page a resumed target restarts from
///
/// Page targets re-scan their last drained page; id-range targets always
/// start from the top and skip the covered ids instead.
fn resume_page(target: &TargetConfig, recorded: u32) -> u32 {
    match target.resume_strategy {
        ResumeStrategy::Page => recorded.max(target.start_page),
        ResumeStrategy::IdRange => target.start_page,
    }
}

/// Walks a target's listing pages and turns them into tasks
struct PageCursor {
    target: TargetConfig,
    fetcher: Arc<dyn Fetcher>,
    extractor: ImageExtractor,
    id_pattern: Option<Regex>,
    next_page: u32,
    listing_attempts: u32,

    /// Ids crawled by earlier runs; frozen for the whole run
    covered: IdWindow,

    /// Ids crawled so far, persisted with each page
    window: IdWindow,

    pages_scanned: u64,
    images_found: u64,
    covered_skipped: u64,
    end_tx: Option<oneshot::Sender<PagingEnd>>,
}

impl PageCursor {
    fn new(
        target: &TargetConfig,
        fetcher: Arc<dyn Fetcher>,
        start_page: u32,
        window: IdWindow,
        listing_attempts: u32,
        end_tx: oneshot::Sender<PagingEnd>,
    ) -> Result<Self, ConfigError> {
        let id_pattern = target
            .item_id_pattern
            .as_deref()
            .map(Regex::new)
            .transpose()
            .map_err(|e| ConfigError::InvalidPattern(e.to_string()))?;

        Ok(Self {
            target: target.clone(),
            fetcher,
            extractor: ImageExtractor::new(&target.image_selector)?,
            id_pattern,
            next_page: start_page.max(1),
            listing_attempts: listing_attempts.max(1),
            covered: window,
            window,
            pages_scanned: 0,
            images_found: 0,
            covered_skipped: 0,
            end_tx: Some(end_tx),
        })
    }

    fn into_stream(self) -> impl Stream<Item = Feed<ImageRequest>> + Send + 'static {
        stream::unfold(self, |mut cursor| async move {
            let feeds = cursor.next_page().await?;
            Some((stream::iter(feeds), cursor))
        })
        .flatten()
    }

    fn finish(&mut self, end: PagingEnd) {
        info!(
            "Listing of {}/{} done after {} pages: {:?}",
            self.target.site, self.target.board, self.pages_scanned, end
        );
        if let Some(tx) = self.end_tx.take() {
            let _ = tx.send(end);
        }
    }

    /// Tasks of the next listing page followed by its progress marker
    async fn next_page(&mut self) -> Option<Vec<Feed<ImageRequest>>> {
        if self.end_tx.is_none() {
            return None;
        }

        let page = self.next_page;
        if let Some(end) = self.target.end_page {
            if page > end {
                self.finish(PagingEnd::EndPage { page: end });
                return None;
            }
        }

        let url = self.target.page_url(page);
        let base = match Url::parse(&url) {
            Ok(base) => base,
            Err(e) => {
                self.finish(PagingEnd::Failed {
                    page,
                    message: e.to_string(),
                });
                return None;
            }
        };

        let html = match self.fetch_listing(&url).await {
            Ok(Some(html)) => html,
            Ok(None) => {
                self.finish(PagingEnd::Exhausted { page });
                return None;
            }
            Err(e) => {
                self.finish(PagingEnd::Failed {
                    page,
                    message: e.to_string(),
                });
                return None;
            }
        };

        let images = self.extractor.extract(&html, &base);
        if images.is_empty() {
            self.finish(PagingEnd::Exhausted { page });
            return None;
        }

        let id_range = self.target.resume_strategy == ResumeStrategy::IdRange;
        let mut feeds = Vec::with_capacity(images.len() + 1);
        let mut last = None;

        for image in images {
            let image_url = image.to_string();
            let item_id = self.item_id(&image_url);

            if id_range {
                if let Some(id) = &item_id {
                    if self.covered.classify_str(id) == IdPosition::Covered {
                        self.covered_skipped += 1;
                        continue;
                    }
                    if let Ok(n) = id.parse::<u64>() {
                        self.window.widen(n);
                    }
                }
            }

            let key = normalize_url_lossy(&image_url);
            last = Some((item_id.clone().unwrap_or_else(|| key.clone()), image_url.clone()));
            feeds.push(Feed::Task(Task::new(
                key,
                ImageRequest {
                    url: image_url,
                    page,
                    item_id,
                },
            )));
        }

        self.pages_scanned += 1;
        self.images_found += feeds.len() as u64;
        debug!("Page {} of {}: {} images", page, self.target.board, feeds.len());

        let mut update = CheckpointUpdate::new()
            .page(page)
            .stat("pages_scanned", self.pages_scanned)
            .stat("images_found", self.images_found);
        if let Some((id, image_url)) = last {
            update = update.last_item(id, Some(image_url));
        }
        if id_range {
            let (min, max) = self.window.to_stored();
            update = update
                .id_window(min, max)
                .stat("covered_skipped", self.covered_skipped);
        }
        feeds.push(Feed::Progress(update));

        match page.checked_add(1) {
            Some(next) => self.next_page = next,
            None => self.finish(PagingEnd::EndPage { page }),
        }
        Some(feeds)
    }

    fn item_id(&self, image_url: &str) -> Option<String> {
        let captures = self.id_pattern.as_ref()?.captures(image_url)?;
        Some(captures.get(1)?.as_str().to_string())
    }

    /// Fetches a listing page, retrying transient failures
    ///
    /// # Returns
    ///
    /// * `Ok(Some(html))` - The page body
    /// * `Ok(None)` - The page does not exist
    /// * `Err(FetchError)` - Permanent failure, or transient on every attempt
    async fn fetch_listing(&self, url: &str) -> Result<Option<String>, FetchError> {
        let mut delay = LISTING_RETRY_DELAY;
        let mut attempt = 1;

        loop {
            match self.fetcher.fetch(url).await {
                Ok(content) => return Ok(Some(content.text())),
                Err(FetchError::Status { status, .. }) if is_not_found(status) => return Ok(None),
                Err(e) if e.is_transient() && attempt < self.listing_attempts => {
                    warn!(
                        "Listing page {} failed (attempt {}/{}): {}",
                        url, attempt, self.listing_attempts, e
                    );
                    tokio::time::sleep(delay).await;
                    delay = delay.saturating_mul(2);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
