//! Checkpoint persistence across process restarts

use board_harvest::config::{DedupConfig, LedgerConfig};
use board_harvest::crawler::{worker_fn, Feed, Outcome, RunContext, RunStats, Task};
use board_harvest::ledger::{
    CheckpointKey, CheckpointLedger, LedgerError, LedgerOptions, ResumePoint, StatValue, ERROR_COUNT_KEY,
};
use board_harvest::storage::{ResultStore, SqliteStorage};
use board_harvest::{CheckpointUpdate, DedupEngine, RunStatus, Scheduler, SchedulerOptions};
use futures::stream;
use std::path::Path;
use tempfile::TempDir;

const IMAGES_PER_PAGE: u32 = 3;

fn key() -> CheckpointKey {
    CheckpointKey::new("news.example.org", "photos")
}

fn ledger_config(db: &Path) -> LedgerConfig {
    LedgerConfig {
        database_path: db.to_string_lossy().into_owned(),
        recent_seen_capacity: 5,
        save_attempts: 3,
        save_backoff_ms: 1,
    }
}

/// Listing pages `first..=last`, each followed by its progress marker
fn pages(first: u32, last: u32) -> Vec<Feed<u32>> {
    let mut feeds = Vec::new();
    for page in first..=last {
        for i in 0..IMAGES_PER_PAGE {
            let url = format!("https://news.example.org/img/{}-{}.jpg", page, i);
            feeds.push(Feed::Task(Task::new(url, page)));
        }
        feeds.push(Feed::Progress(CheckpointUpdate::new().page(page)));
    }
    feeds
}

/// Runs the given pages the way a harvest does, reopening all storage
async fn run_pages(db: &Path, feeds: Vec<Feed<u32>>, recent: Vec<String>) -> RunStats {
    let mut ledger = CheckpointLedger::new(
        SqliteStorage::new(db).unwrap(),
        LedgerOptions::default(),
    );
    let mut results = SqliteStorage::new(db).unwrap();
    let mut dedup = DedupEngine::new(&DedupConfig::default());
    dedup.rehydrate_results(&results).unwrap();

    let mut ctx = RunContext::new(key(), &mut ledger, &mut dedup, &mut results)
        .with_recent_seen(recent);
    let worker = worker_fn(|_task: &Task<u32>| async { Outcome::Success(()) });
    let options = SchedulerOptions {
        initial_workers: 3,
        ..SchedulerOptions::default()
    };

    let stats = Scheduler::new(options)
        .run(stream::iter(feeds), worker, &mut ctx)
        .await
        .unwrap();
    stats
}

fn stored_keys(db: &Path) -> Vec<String> {
    let results = SqliteStorage::new(db).unwrap();
    let mut keys = ResultStore::task_keys(&results).unwrap();
    keys.sort();
    keys
}

#[test]
fn test_checkpoint_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let config = ledger_config(&dir.path().join("harvest.db"));

    let first = {
        let mut ledger = CheckpointLedger::open(&config).unwrap();
        let recent: Vec<String> = (1..=7).map(|i| format!("item-{}", i)).collect();
        ledger
            .save(
                &key(),
                &CheckpointUpdate::new()
                    .page(3)
                    .last_item("7", Some("https://news.example.org/img/7.jpg".into()))
                    .stat("images_found", 21i64)
                    .recent_seen(recent),
            )
            .unwrap()
    };

    let mut ledger = CheckpointLedger::open(&config).unwrap();
    assert_eq!(ledger.current_page(&key()).unwrap(), 3);
    assert_eq!(ledger.status(&key()).unwrap(), Some(RunStatus::Running));
    assert_eq!(ledger.last_item_id(&key()).unwrap().as_deref(), Some("7"));
    assert_eq!(
        ledger.stats(&key()).unwrap().get("images_found"),
        Some(&StatValue::from(21i64))
    );

    match ledger.resume_point(&key()).unwrap() {
        ResumePoint::Resume {
            page,
            recent_seen_ids,
            ..
        } => {
            assert_eq!(page, 3);
            assert_eq!(
                recent_seen_ids,
                vec!["item-3", "item-4", "item-5", "item-6", "item-7"]
            );
        }
        other => panic!("expected resume, got {:?}", other),
    }

    let completed = ledger.mark_completed(&key(), None).unwrap();
    assert_eq!(completed.created_at, first.created_at);
    assert!(completed.updated_at > first.updated_at);
    assert_eq!(completed.current_page, 3);
    drop(ledger);

    let mut ledger = CheckpointLedger::open(&config).unwrap();
    assert_eq!(ledger.resume_point(&key()).unwrap(), ResumePoint::Completed);

    let reopen = ledger.save(&key(), &CheckpointUpdate::new().status(RunStatus::Running));
    assert!(matches!(reopen, Err(LedgerError::InvalidTransition { .. })));

    assert!(ledger.clear(&key()).unwrap());
    assert_eq!(ledger.resume_point(&key()).unwrap(), ResumePoint::Fresh);
}

#[test]
fn test_errors_accumulate() {
    let dir = TempDir::new().unwrap();
    let config = ledger_config(&dir.path().join("harvest.db"));
    let mut ledger = CheckpointLedger::open(&config).unwrap();

    ledger.mark_error(&key(), "listing page 4 failed: HTTP 503").unwrap();
    let record = ledger.mark_error(&key(), "listing page 4 failed: HTTP 502").unwrap();

    assert_eq!(record.status, RunStatus::Error);
    assert_eq!(record.stat_count(ERROR_COUNT_KEY), 2);
    assert!(matches!(
        ledger.resume_point(&key()).unwrap(),
        ResumePoint::Resume { .. }
    ));
}

#[tokio::test]
async fn test_resume_matches_uninterrupted_run() {
    let dir = TempDir::new().unwrap();

    let straight = dir.path().join("straight.db");
    let stats = run_pages(&straight, pages(1, 10), Vec::new()).await;
    assert_eq!(stats.succeeded, 30);

    // First process stops after page 5
    let resumed = dir.path().join("resumed.db");
    run_pages(&resumed, pages(1, 5), Vec::new()).await;

    let ledger = CheckpointLedger::new(
        SqliteStorage::new(&resumed).unwrap(),
        LedgerOptions::default(),
    );
    let ResumePoint::Resume {
        page,
        recent_seen_ids,
        ..
    } = ledger.resume_point(&key()).unwrap()
    else {
        panic!("expected a resumable checkpoint");
    };
    assert_eq!(page, 5);
    drop(ledger);

    let second = run_pages(&resumed, pages(page, 10), recent_seen_ids).await;
    assert_eq!(second.duplicates, u64::from(IMAGES_PER_PAGE));
    assert_eq!(second.succeeded, 15);

    assert_eq!(stored_keys(&straight), stored_keys(&resumed));
    assert_eq!(stored_keys(&resumed).len(), 30);
}
