//! Scheduler behaviour under retries, adaptive concurrency and cancellation

use board_harvest::config::DedupConfig;
use board_harvest::crawler::{worker_fn, FailureReason, Feed, Outcome, RunContext, Task};
use board_harvest::ledger::{CheckpointKey, CheckpointLedger, CheckpointRecord, LedgerOptions};
use board_harvest::storage::{
    ArtifactBytes, CheckpointStore, ResultRecord, ResultStore, SqliteStorage, StorageError, StorageResult,
};
use board_harvest::{CheckpointUpdate, DedupEngine, Scheduler, SchedulerOptions};
use futures::stream;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn key() -> CheckpointKey {
    CheckpointKey::new("bbs.example.com", "gallery")
}

fn options(initial: usize, min: usize, max: usize) -> SchedulerOptions {
    SchedulerOptions {
        initial_workers: initial,
        min_workers: min,
        max_workers: max,
        ..SchedulerOptions::default()
    }
}

fn ledger() -> CheckpointLedger {
    CheckpointLedger::new(SqliteStorage::new_in_memory().unwrap(), LedgerOptions::default())
}

fn tasks(count: u32) -> Vec<Feed<u32>> {
    (0..count)
        .map(|i| Feed::Task(Task::new(format!("https://bbs.example.com/img/{}.jpg", i), i)))
        .collect()
}

#[tokio::test]
async fn test_odd_tasks_fail_until_budget_spent() {
    let mut ledger = ledger();
    let mut dedup = DedupEngine::new(&DedupConfig::default());
    let mut results = SqliteStorage::new_in_memory().unwrap();
    let mut ctx = RunContext::new(key(), &mut ledger, &mut dedup, &mut results);

    let worker = worker_fn(|task: &Task<u32>| {
        let n = task.payload;
        async move {
            if n % 2 == 0 {
                Outcome::Success(())
            } else {
                Outcome::TransientFailure(FailureReason::HttpStatus(503))
            }
        }
    });

    let scheduler = Scheduler::new(SchedulerOptions {
        max_attempts: 3,
        ..options(10, 1, 20)
    });
    let stats = scheduler
        .run(stream::iter(tasks(100)), worker, &mut ctx)
        .await
        .unwrap();

    assert_eq!(stats.tasks, 100);
    assert_eq!(stats.succeeded, 50);
    assert_eq!(stats.permanent_failed, 50);
    assert_eq!(stats.transient_failed, 100);
    assert_eq!(stats.attempted, 200);
    assert_eq!(stats.terminal(), 100);
    assert!(stats.final_workers < 10, "workers: {}", stats.final_workers);
    assert!(stats.adjustments.iter().all(|a| a.to < a.from));
    assert_eq!(ResultStore::count(&results).unwrap(), 50);
}

#[tokio::test]
async fn test_attempts_are_bounded() {
    let mut ledger = ledger();
    let mut dedup = DedupEngine::new(&DedupConfig::default());
    let mut results = SqliteStorage::new_in_memory().unwrap();
    let mut ctx = RunContext::new(key(), &mut ledger, &mut dedup, &mut results);

    let calls: Arc<Mutex<HashMap<String, Vec<u32>>>> = Arc::new(Mutex::new(HashMap::new()));
    let seen = Arc::clone(&calls);
    let worker = worker_fn(move |task: &Task<u32>| {
        seen.lock()
            .unwrap()
            .entry(task.key.to_string())
            .or_default()
            .push(task.attempts);
        async { Outcome::<()>::TransientFailure(FailureReason::Network("reset".into())) }
    });

    let scheduler = Scheduler::new(SchedulerOptions {
        max_attempts: 4,
        ..options(2, 1, 4)
    });
    let stats = scheduler
        .run(stream::iter(tasks(10)), worker, &mut ctx)
        .await
        .unwrap();

    assert_eq!(stats.attempted, 40);
    assert_eq!(stats.transient_failed, 30);
    assert_eq!(stats.permanent_failed, 10);
    assert_eq!(stats.succeeded, 0);

    let calls = calls.lock().unwrap();
    assert_eq!(calls.len(), 10);
    for attempts in calls.values() {
        assert_eq!(attempts, &vec![1, 2, 3, 4]);
    }
}

#[tokio::test]
async fn test_healthy_run_grows_within_bounds() {
    let mut ledger = ledger();
    let mut dedup = DedupEngine::new(&DedupConfig::default());
    let mut results = SqliteStorage::new_in_memory().unwrap();
    let mut ctx = RunContext::new(key(), &mut ledger, &mut dedup, &mut results);

    let running = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let (r, p) = (Arc::clone(&running), Arc::clone(&peak));
    let worker = worker_fn(move |_task: &Task<u32>| {
        let running = Arc::clone(&r);
        let peak = Arc::clone(&p);
        async move {
            let now = running.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(1)).await;
            running.fetch_sub(1, Ordering::SeqCst);
            Outcome::Success(())
        }
    });

    let stats = Scheduler::new(options(3, 2, 4))
        .run(stream::iter(tasks(120)), worker, &mut ctx)
        .await
        .unwrap();

    assert_eq!(stats.succeeded, 120);
    assert_eq!(stats.final_workers, 4);
    assert!(!stats.adjustments.is_empty());
    assert!(stats.adjustments.iter().all(|a| a.to > a.from && a.to <= 4));
    assert!(peak.load(Ordering::SeqCst) <= 4);
}

#[tokio::test]
async fn test_failing_run_shrinks_to_floor() {
    let mut ledger = ledger();
    let mut dedup = DedupEngine::new(&DedupConfig::default());
    let mut results = SqliteStorage::new_in_memory().unwrap();
    let mut ctx = RunContext::new(key(), &mut ledger, &mut dedup, &mut results);

    let worker = worker_fn(|task: &Task<u32>| {
        let n = task.payload;
        async move {
            if n % 5 == 0 {
                Outcome::PermanentFailure(FailureReason::NotFound)
            } else {
                Outcome::Success(())
            }
        }
    });

    let stats = Scheduler::new(options(10, 2, 20))
        .run(stream::iter(tasks(400)), worker, &mut ctx)
        .await
        .unwrap();

    assert_eq!(stats.permanent_failed, 80);
    assert_eq!(stats.succeeded, 320);
    assert_eq!(stats.final_workers, 2);
    assert!(stats.adjustments.iter().all(|a| a.to < a.from && a.to >= 2));
}

#[tokio::test]
async fn test_cancellation_keeps_resume_position() {
    let mut ledger = ledger();
    let mut dedup = DedupEngine::new(&DedupConfig::default());
    let mut results = SqliteStorage::new_in_memory().unwrap();

    let scheduler = Scheduler::new(options(1, 1, 1));
    let token = scheduler.cancellation_token();
    let worker = worker_fn(move |task: &Task<u32>| {
        if task.payload == 0 {
            token.cancel();
        }
        async { Outcome::Success(()) }
    });

    let mut feeds = tasks(1);
    feeds.push(Feed::Progress(CheckpointUpdate::new().page(1)));
    feeds.extend(tasks(10).into_iter().skip(1));
    feeds.push(Feed::Progress(CheckpointUpdate::new().page(2)));

    let stats = {
        let mut ctx = RunContext::new(key(), &mut ledger, &mut dedup, &mut results);
        let stats = scheduler.run(stream::iter(feeds), worker, &mut ctx).await;
        stats.unwrap()
    };

    assert!(stats.cancelled);
    assert_eq!(stats.succeeded, 1);
    assert_eq!(stats.tasks, 10);
    assert_eq!(stats.succeeded + stats.discarded, stats.tasks);
    assert_eq!(ledger.current_page(&key()).unwrap(), 1);
    assert_eq!(ResultStore::count(&results).unwrap(), 1);
}

/// Checkpoint store whose writes always fail
struct BrokenStore;

impl CheckpointStore for BrokenStore {
    fn load(&self, _key: &CheckpointKey) -> StorageResult<Option<CheckpointRecord>> {
        Ok(None)
    }

    fn store(&mut self, _record: &CheckpointRecord) -> StorageResult<()> {
        Err(StorageError::Database("disk full".to_string()))
    }

    fn delete(&mut self, _key: &CheckpointKey) -> StorageResult<bool> {
        Ok(false)
    }

    fn exists(&self, _key: &CheckpointKey) -> StorageResult<bool> {
        Ok(false)
    }

    fn list(&self) -> StorageResult<Vec<CheckpointRecord>> {
        Ok(Vec::new())
    }
}

#[tokio::test]
async fn test_checkpoint_failure_aborts_run() {
    let mut ledger = CheckpointLedger::new(
        BrokenStore,
        LedgerOptions {
            recent_seen_capacity: 10,
            save_attempts: 2,
            save_backoff: Duration::from_millis(1),
        },
    );
    let mut dedup = DedupEngine::new(&DedupConfig::default());
    let mut results = SqliteStorage::new_in_memory().unwrap();
    let mut ctx = RunContext::new(key(), &mut ledger, &mut dedup, &mut results);

    let mut feeds = tasks(1);
    feeds.push(Feed::Progress(CheckpointUpdate::new().page(1)));
    feeds.extend(tasks(3).into_iter().skip(1));

    let worker = worker_fn(|_task: &Task<u32>| async { Outcome::Success(()) });
    let err = Scheduler::new(options(1, 1, 1))
        .run(stream::iter(feeds), worker, &mut ctx)
        .await
        .unwrap_err();

    assert!(err.is_fatal(), "unexpected error: {}", err);
}

/// Result store that fails every save after the first
struct FailingResults {
    inner: SqliteStorage,
    saves: u32,
}

impl ResultStore for FailingResults {
    fn exists(&self, task_key: &str) -> StorageResult<bool> {
        ResultStore::exists(&self.inner, task_key)
    }

    fn save(
        &mut self,
        record: ResultRecord,
        artifact: Option<ArtifactBytes<'_>>,
    ) -> StorageResult<ResultRecord> {
        self.saves += 1;
        if self.saves > 1 {
            return Err(StorageError::Database("database is locked".to_string()));
        }
        self.inner.save(record, artifact)
    }

    fn count(&self) -> StorageResult<u64> {
        ResultStore::count(&self.inner)
    }

    fn task_keys(&self) -> StorageResult<Vec<String>> {
        ResultStore::task_keys(&self.inner)
    }
}

#[tokio::test]
async fn test_result_store_failure_aborts_after_last_safe_marker() {
    let mut ledger = ledger();
    let mut dedup = DedupEngine::new(&DedupConfig::default());
    let mut results = FailingResults {
        inner: SqliteStorage::new_in_memory().unwrap(),
        saves: 0,
    };

    let mut feeds = tasks(1);
    feeds.push(Feed::Progress(CheckpointUpdate::new().page(1)));
    feeds.extend(tasks(2).into_iter().skip(1));
    feeds.push(Feed::Progress(CheckpointUpdate::new().page(2)));

    let worker = worker_fn(|_task: &Task<u32>| async { Outcome::Success(()) });
    let result = {
        let mut ctx = RunContext::new(key(), &mut ledger, &mut dedup, &mut results);
        let result = Scheduler::new(options(1, 1, 1))
            .run(stream::iter(feeds), worker, &mut ctx)
            .await;
        result
    };

    match result {
        Err(e) => assert!(e.is_fatal(), "unexpected error: {}", e),
        Ok(stats) => panic!("run should abort, got {:?}", stats),
    }
    assert_eq!(ledger.current_page(&key()).unwrap(), 1);
    assert_eq!(ResultStore::count(&results).unwrap(), 1);
}
