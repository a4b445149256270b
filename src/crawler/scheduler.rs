//! Task scheduler with adaptive concurrency
//!
//! This module handles:
//! - A bounded queue between the task producer and the worker pool
//! - Dispatching up to `current_workers` tasks at a time on a `JoinSet`
//! - Retrying transient failures until the attempt budget is spent
//! - Duplicate checks before dispatch and on produced content
//! - Persisting producer progress markers once the work before them is terminal
//! - Cooperative cancellation

use crate::config::SchedulerConfig;
use crate::crawler::adaptive::{AdaptiveConcurrencyController, Adjustment};
use crate::crawler::task::{Artifact, DuplicateReason, FailureReason, Feed, Outcome, Task, TaskKey};
use crate::dedup::DedupEngine;
use crate::ledger::{CheckpointKey, CheckpointLedger, CheckpointUpdate, Stats};
use crate::storage::{ArtifactBytes, ResultRecord, ResultStore};
use crate::HarvestError;
use async_trait::async_trait;
use futures::{FutureExt, Stream, StreamExt};
use lru::LruCache;
use std::collections::{BTreeSet, HashSet, VecDeque};
use std::future::Future;
use std::marker::PhantomData;
use std::num::NonZeroUsize;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Tunables of a scheduler run
pub type SchedulerOptions = SchedulerConfig;

/// Processes one task
///
/// A single worker value is shared by every concurrent invocation.
#[async_trait]
pub trait WorkerFunction<P, T>: Send + Sync + 'static {
    async fn process(&self, task: &Task<P>) -> Outcome<T>;
}

/// Adapter running a closure as a [`WorkerFunction`]
pub struct FnWorker<F, Fut> {
    f: F,
    _future: PhantomData<fn() -> Fut>,
}

/// Wraps a closure returning a future into a worker
///
/// The future must own what it needs from the task:
///
/// ```
/// use board_harvest::crawler::{worker_fn, Outcome, Task};
///
/// let worker = worker_fn(|task: &Task<u32>| {
///     let n = task.payload;
///     async move { Outcome::<u32>::Success(n * 2) }
/// });
/// # let _ = worker;
/// ```
pub fn worker_fn<P, T, F, Fut>(f: F) -> FnWorker<F, Fut>
where
    F: Fn(&Task<P>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Outcome<T>> + Send + 'static,
{
    FnWorker {
        f,
        _future: PhantomData,
    }
}

#[async_trait]
impl<P, T, F, Fut> WorkerFunction<P, T> for FnWorker<F, Fut>
where
    P: Send + Sync + 'static,
    T: Send + 'static,
    F: Fn(&Task<P>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Outcome<T>> + Send + 'static,
{
    async fn process(&self, task: &Task<P>) -> Outcome<T> {
        (self.f)(task).await
    }
}

/// Counters of one scheduler run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunStats {
    /// Tasks received from the producer
    pub tasks: u64,

    /// Worker invocations
    pub attempted: u64,

    pub succeeded: u64,

    /// Transient failures that were requeued
    pub transient_failed: u64,

    /// Tasks that ended in a permanent failure, including spent retry budgets
    pub permanent_failed: u64,

    /// Tasks recognised as already done, before dispatch or from their content
    pub duplicates: u64,

    /// Tasks dropped unprocessed by cancellation
    pub discarded: u64,

    /// Every permanent failure with its reason, in completion order
    pub failures: Vec<(TaskKey, FailureReason)>,

    pub adjustments: Vec<Adjustment>,
    pub final_workers: usize,
    pub checkpoints_saved: u64,
    pub cancelled: bool,
}

impl RunStats {
    /// Tasks that reached a terminal outcome
    pub fn terminal(&self) -> u64 {
        self.succeeded + self.permanent_failed + self.duplicates
    }

    /// Counters in the form stored in a checkpoint
    pub fn to_checkpoint_stats(&self) -> Stats {
        let mut stats = Stats::new();
        stats.insert("tasks".into(), self.tasks.into());
        stats.insert("attempted".into(), self.attempted.into());
        stats.insert("succeeded".into(), self.succeeded.into());
        stats.insert("transient_failed".into(), self.transient_failed.into());
        stats.insert("permanent_failed".into(), self.permanent_failed.into());
        stats.insert("duplicates".into(), self.duplicates.into());
        stats.insert("discarded".into(), self.discarded.into());
        stats
    }
}

/// Everything a run reads and writes besides the tasks themselves
///
/// The scheduling loop is the only user of these while the run lasts.
pub struct RunContext<'a> {
    pub key: CheckpointKey,
    pub ledger: &'a mut CheckpointLedger,
    pub dedup: &'a mut DedupEngine,
    pub results: &'a mut dyn ResultStore,
    recent: LruCache<String, ()>,
}

impl<'a> RunContext<'a> {
    pub fn new(
        key: CheckpointKey,
        ledger: &'a mut CheckpointLedger,
        dedup: &'a mut DedupEngine,
        results: &'a mut dyn ResultStore,
    ) -> Self {
        let capacity = NonZeroUsize::new(ledger.options().recent_seen_capacity.max(1))
            .unwrap_or(NonZeroUsize::MIN);

        Self {
            key,
            ledger,
            dedup,
            results,
            recent: LruCache::new(capacity),
        }
    }

    /// Seeds the recently-seen cache, oldest id first
    pub fn with_recent_seen(mut self, ids: Vec<String>) -> Self {
        for id in ids {
            self.recent.put(id, ());
        }
        self
    }

    fn remember(&mut self, key: &TaskKey) {
        self.recent.put(key.as_str().to_string(), ());
    }

    /// Contents of the recently-seen cache, oldest first
    pub fn recent_seen_ids(&self) -> Vec<String> {
        self.recent.iter().rev().map(|(id, _)| id.clone()).collect()
    }
}

/// Runs a stream of tasks through a worker with adaptive concurrency
pub struct Scheduler {
    options: SchedulerOptions,
    cancel: CancellationToken,
}

impl Scheduler {
    pub fn new(options: SchedulerOptions) -> Self {
        Self::with_cancellation(options, CancellationToken::new())
    }

    /// Creates a scheduler stopped by an existing token
    pub fn with_cancellation(options: SchedulerOptions, cancel: CancellationToken) -> Self {
        Self { options, cancel }
    }

    pub fn options(&self) -> &SchedulerOptions {
        &self.options
    }

    /// Token that stops the run: queued work is discarded, in-flight work finishes
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Processes every task of `tasks` and persists the progress markers among them
    ///
    /// # Arguments
    ///
    /// * `tasks` - Tasks interleaved with progress markers, in admission order
    /// * `worker` - Invoked once per attempt
    /// * `ctx` - Ledger, dedup index and result store of the target
    ///
    /// # Returns
    ///
    /// * `Ok(RunStats)` - The input was exhausted or the run was cancelled
    /// * `Err(HarvestError::Fatal)` - Storage failed; the run was aborted
    pub async fn run<P, T, S, W>(
        &self,
        tasks: S,
        worker: W,
        ctx: &mut RunContext<'_>,
    ) -> Result<RunStats, HarvestError>
    where
        P: Send + Sync + 'static,
        T: Artifact,
        S: Stream<Item = Feed<P>> + Send + 'static,
        W: WorkerFunction<P, T>,
    {
        let (queue_tx, queue_rx) = mpsc::channel(self.options.queue_capacity.max(1));

        let producer = tokio::spawn(async move {
            let mut tasks = Box::pin(tasks);
            while let Some(item) = tasks.next().await {
                if queue_tx.send(item).await.is_err() {
                    break;
                }
            }
        });

        info!(
            "Starting run for {} with {} workers",
            ctx.key, self.options.initial_workers
        );

        let mut run = ActiveRun {
            max_attempts: self.options.max_attempts.max(1),
            worker: Arc::new(worker),
            controller: AdaptiveConcurrencyController::new(&self.options),
            join_set: JoinSet::new(),
            producer,
            queue_rx,
            retry: VecDeque::new(),
            next_seq: 0,
            outstanding: BTreeSet::new(),
            in_flight: HashSet::new(),
            markers: VecDeque::new(),
            stats: RunStats::default(),
            input_closed: false,
            cancelled: false,
        };

        match run.drive(&self.cancel, ctx).await {
            Ok(()) => {
                let stats = run.finish();
                info!(
                    "Run for {} finished: {} succeeded, {} failed, {} duplicates, {} discarded ({} workers)",
                    ctx.key,
                    stats.succeeded,
                    stats.permanent_failed,
                    stats.duplicates,
                    stats.discarded,
                    stats.final_workers
                );
                Ok(stats)
            }
            Err(e) => {
                error!("Run for {} aborted: {}", ctx.key, e);
                run.shutdown(ctx, &e).await;
                Err(e)
            }
        }
    }
}

type Joined<P, T> = (u64, Task<P>, std::thread::Result<Outcome<T>>);

/// State of one run of the scheduling loop
struct ActiveRun<P, T, W> {
    max_attempts: u32,
    worker: Arc<W>,
    controller: AdaptiveConcurrencyController,
    join_set: JoinSet<Joined<P, T>>,
    producer: JoinHandle<()>,
    queue_rx: mpsc::Receiver<Feed<P>>,

    /// Requeued transient failures, dispatched before new tasks
    retry: VecDeque<(u64, Task<P>)>,

    /// Admission sequence number of the next task
    next_seq: u64,

    /// Admitted tasks without a terminal outcome
    outstanding: BTreeSet<u64>,

    /// Keys of dispatched or requeued tasks
    in_flight: HashSet<TaskKey>,

    /// Progress markers waiting for the tasks admitted before them
    markers: VecDeque<(u64, CheckpointUpdate)>,

    stats: RunStats,
    input_closed: bool,
    cancelled: bool,
}

impl<P, T, W> ActiveRun<P, T, W>
where
    P: Send + Sync + 'static,
    T: Artifact,
    W: WorkerFunction<P, T>,
{
    async fn drive(
        &mut self,
        cancel: &CancellationToken,
        ctx: &mut RunContext<'_>,
    ) -> Result<(), HarvestError> {
        loop {
            while !self.cancelled && self.join_set.len() < self.controller.current_workers() {
                let Some((seq, task)) = self.retry.pop_front() else {
                    break;
                };
                self.dispatch(seq, task);
            }

            let drained = self.input_closed && self.retry.is_empty();
            if (drained || self.cancelled) && self.join_set.is_empty() {
                break;
            }

            let can_pull = !self.cancelled
                && !self.input_closed
                && self.retry.is_empty()
                && self.join_set.len() < self.controller.current_workers();

            tokio::select! {
                biased;

                _ = cancel.cancelled(), if !self.cancelled => {
                    self.cancel_pending();
                }

                Some(joined) = self.join_set.join_next(), if !self.join_set.is_empty() => {
                    let joined = joined.map_err(|e| {
                        HarvestError::fatal("joining worker", HarvestError::Aborted(e.to_string()))
                    })?;
                    self.complete(joined, ctx).await?;
                }

                item = self.queue_rx.recv(), if can_pull => match item {
                    Some(Feed::Task(task)) => self.admit(task, ctx).await?,
                    Some(Feed::Progress(update)) => {
                        self.markers.push_back((self.next_seq, update));
                        self.flush_markers(ctx).await?;
                    }
                    None => self.input_closed = true,
                },
            }
        }

        self.flush_markers(ctx).await?;

        if !self.cancelled {
            if let Err(e) = (&mut self.producer).await {
                if e.is_panic() {
                    return Err(HarvestError::fatal(
                        "task producer",
                        HarvestError::Aborted("producer panicked".to_string()),
                    ));
                }
            }
        }

        Ok(())
    }

    fn finish(mut self) -> RunStats {
        self.stats.final_workers = self.controller.current_workers();
        self.stats.cancelled = self.cancelled;
        self.stats
    }

    /// Stops producer and workers after a fatal error, saving what progress it can
    async fn shutdown(&mut self, ctx: &mut RunContext<'_>, cause: &HarvestError) {
        self.producer.abort();
        self.queue_rx.close();
        self.join_set.shutdown().await;

        if is_ledger_failure(cause) {
            return;
        }
        if let Err(e) = self.flush_markers(ctx).await {
            warn!("Final checkpoint flush for {} failed: {}", ctx.key, e);
        }
    }

    /// Registers a new task and dispatches it unless it is already done
    async fn admit(&mut self, task: Task<P>, ctx: &mut RunContext<'_>) -> Result<(), HarvestError> {
        self.stats.tasks += 1;
        let seq = self.next_seq;
        self.next_seq += 1;

        let mut verdict = precheck(&task.key, ctx)?;
        if verdict.is_none() && self.in_flight.contains(&task.key) {
            verdict = Some(DuplicateReason::Url);
        }

        match verdict {
            Some(reason) => {
                debug!("Skipping {}: {}", task.key, reason);
                self.stats.duplicates += 1;
                self.flush_markers(ctx).await
            }
            None => {
                self.outstanding.insert(seq);
                self.in_flight.insert(task.key.clone());
                self.dispatch(seq, task);
                Ok(())
            }
        }
    }

    fn dispatch(&mut self, seq: u64, mut task: Task<P>) {
        task.attempts += 1;
        self.stats.attempted += 1;

        let worker = Arc::clone(&self.worker);
        self.join_set.spawn(async move {
            let outcome = AssertUnwindSafe(worker.process(&task))
                .catch_unwind()
                .await;
            (seq, task, outcome)
        });
    }

    async fn complete(
        &mut self,
        (seq, task, result): Joined<P, T>,
        ctx: &mut RunContext<'_>,
    ) -> Result<(), HarvestError> {
        let outcome = result.unwrap_or_else(|payload| {
            let message = panic_message(payload.as_ref());
            warn!("Worker panicked on {}: {}", task.key, message);
            Outcome::PermanentFailure(FailureReason::WorkerPanicked(message))
        });

        if let Some(adjustment) = self.controller.observe(outcome.class()) {
            self.stats.adjustments.push(adjustment);
        }

        let outcome = match outcome {
            Outcome::TransientFailure(reason) if !self.cancelled && task.attempts >= self.max_attempts => {
                Outcome::PermanentFailure(FailureReason::MaxAttemptsExceeded {
                    attempts: task.attempts,
                    last: Box::new(reason),
                })
            }
            other => other,
        };

        match outcome {
            Outcome::Success(artifact) => match accept(&task.key, &artifact, ctx)? {
                Some(reason) => {
                    debug!("Duplicate {}: {}", task.key, reason);
                    self.stats.duplicates += 1;
                    ctx.remember(&task.key);
                }
                None => {
                    debug!("Stored {}", task.key);
                    self.stats.succeeded += 1;
                    ctx.remember(&task.key);
                }
            },
            Outcome::Duplicate(reason) => {
                debug!("Duplicate {}: {}", task.key, reason);
                self.stats.duplicates += 1;
                ctx.remember(&task.key);
            }
            Outcome::PermanentFailure(reason) => {
                debug!("Failed {}: {}", task.key, reason);
                self.stats.permanent_failed += 1;
                self.stats.failures.push((task.key.clone(), reason));
            }
            Outcome::TransientFailure(_) if self.cancelled => {
                // Stays outstanding so later markers are not persisted
                self.stats.discarded += 1;
                return Ok(());
            }
            Outcome::TransientFailure(reason) => {
                debug!(
                    "Retrying {} (attempt {}/{}): {}",
                    task.key, task.attempts, self.max_attempts, reason
                );
                self.stats.transient_failed += 1;
                self.retry.push_back((seq, task));
                return Ok(());
            }
        }

        self.outstanding.remove(&seq);
        self.in_flight.remove(&task.key);
        self.flush_markers(ctx).await
    }

    /// Drops queued and requeued work after cancellation
    ///
    /// Markers drained before the first dropped task still describe
    /// admitted work only, so they are kept.
    fn cancel_pending(&mut self) {
        info!("Cancellation requested, letting {} in-flight tasks finish", self.join_set.len());
        self.cancelled = true;
        self.producer.abort();
        self.queue_rx.close();

        let mut lost = false;
        while let Ok(item) = self.queue_rx.try_recv() {
            match item {
                Feed::Task(_) => {
                    self.stats.tasks += 1;
                    self.stats.discarded += 1;
                    lost = true;
                }
                Feed::Progress(update) if !lost => {
                    self.markers.push_back((self.next_seq, update));
                }
                Feed::Progress(_) => {}
            }
        }

        self.stats.discarded += self.retry.len() as u64;
        self.retry.clear();
    }

    /// Saves every marker whose preceding tasks are all terminal, in order
    async fn flush_markers(&mut self, ctx: &mut RunContext<'_>) -> Result<(), HarvestError> {
        while let Some(&(barrier, _)) = self.markers.front() {
            if self.outstanding.first().is_some_and(|&oldest| oldest < barrier) {
                break;
            }
            let Some((_, mut update)) = self.markers.pop_front() else {
                break;
            };

            if update.recent_seen_ids.is_none() {
                update = update.recent_seen(ctx.recent_seen_ids());
            }

            ctx.ledger
                .save_with_retry(&ctx.key, &update)
                .await
                .map_err(|e| HarvestError::fatal(format!("checkpoint save for {}", ctx.key), e))?;
            self.stats.checkpoints_saved += 1;
        }
        Ok(())
    }
}

/// Checks a task against the cache, the result store and the URL tier, in that order
fn precheck(key: &TaskKey, ctx: &mut RunContext<'_>) -> Result<Option<DuplicateReason>, HarvestError> {
    if ctx.recent.contains(key.as_str()) {
        return Ok(Some(DuplicateReason::RecentlySeen));
    }

    let stored = ctx
        .results
        .exists(key.as_str())
        .map_err(|e| HarvestError::fatal("result store lookup", e))?;
    if stored {
        return Ok(Some(DuplicateReason::AlreadyStored));
    }

    if ctx.dedup.check_url(key.as_str()) {
        return Ok(Some(DuplicateReason::Url));
    }

    Ok(None)
}

/// Runs a successful result through the content tiers and stores it if unique
fn accept<T: Artifact>(
    key: &TaskKey,
    artifact: &T,
    ctx: &mut RunContext<'_>,
) -> Result<Option<DuplicateReason>, HarvestError> {
    let mut record = ResultRecord::new(key.as_str(), &ctx.key);

    let bytes = match artifact.content() {
        Some(bytes) => {
            if let Some(tier) = ctx.dedup.check(key.as_str(), bytes) {
                return Ok(Some(tier.into()));
            }
            let registration = ctx.dedup.register(key.as_str(), bytes);
            record.content_hash = Some(hex::encode(registration.content_hash));
            record.fingerprint = registration.fingerprint.map(|fp| fp.0);
            record.byte_len = Some(bytes.len() as u64);
            Some(ArtifactBytes {
                bytes,
                extension: artifact.extension(),
            })
        }
        None => {
            if ctx.dedup.is_duplicate_url(key.as_str()) {
                return Ok(Some(DuplicateReason::Url));
            }
            ctx.dedup.register_url(key.as_str());
            None
        }
    };

    ctx.results
        .save(record, bytes)
        .map_err(|e| HarvestError::fatal(format!("storing result {}", key), e))?;
    Ok(None)
}

fn is_ledger_failure(error: &HarvestError) -> bool {
    match error {
        HarvestError::Ledger(_) => true,
        HarvestError::Fatal { source, .. } => is_ledger_failure(source),
        _ => false,
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
