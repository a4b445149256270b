//! Integration tests for the harvester
//!
//! These tests use wiremock to serve listing pages and images and run the
//! full harvest cycle end-to-end.

use board_harvest::config::{parse_config, Config};
use board_harvest::crawler::{harvest, Coordinator, TargetOutcome};
use board_harvest::ledger::{CheckpointKey, CheckpointLedger};
use board_harvest::storage::{ResultStore, SqliteStorage};
use board_harvest::RunStatus;
use std::path::Path;
use tempfile::TempDir;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const PNG_MAGIC: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

/// Creates a test configuration with one target listed at `{server}/board?page=N`
fn create_test_config(server: &str, dir: &Path) -> Config {
    let content = format!(
        r#"
[scheduler]
initial-workers = 2
min-workers = 1
max-workers = 4
max-attempts = 2

[ledger]
database-path = "{db}"
save-backoff-ms = 1

[dedup]
artifact-dir = "{artifacts}"
near-duplicate-threshold = 3

[fetch]
min-bytes = 64
timeout-secs = 5

[[target]]
site = "bbs.test"
board = "gallery"
list-url = "{server}/board?page={{page}}"
"#,
        db = dir.join("harvest.db").display(),
        artifacts = dir.join("artifacts").display(),
        server = server,
    );
    parse_config(&content).expect("Failed to parse test config")
}

fn key() -> CheckpointKey {
    CheckpointKey::new("bbs.test", "gallery")
}

/// PNG signature followed by pseudo-random bytes, distinct per seed
fn png(seed: u64) -> Vec<u8> {
    let mut state = seed;
    let mut bytes = PNG_MAGIC.to_vec();
    bytes.extend((0..2040).map(|_| {
        state = state
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        (state >> 56) as u8
    }));
    bytes
}

fn listing(images: &[&str]) -> String {
    let tags: String = images
        .iter()
        .map(|src| format!(r#"<div class="post"><img src="{}"></div>"#, src))
        .collect();
    format!("<html><body>{}</body></html>", tags)
}

async fn mount_page(server: &MockServer, page: u32, images: &[&str]) {
    Mock::given(method("GET"))
        .and(path("/board"))
        .and(query_param("page", page.to_string()))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(listing(images))
                .insert_header("content-type", "text/html"),
        )
        .mount(server)
        .await;
}

async fn mount_image(server: &MockServer, image_path: &str, bytes: Vec<u8>) {
    Mock::given(method("GET"))
        .and(path(image_path))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(bytes)
                .insert_header("content-type", "image/png"),
        )
        .mount(server)
        .await;
}

/// Two listing pages, an empty third page, one missing image and one re-upload
async fn mount_board(server: &MockServer) {
    let base = server.uri();
    let page1 = [
        format!("{}/img/1.png", base),
        format!("{}/img/2.png", base),
        format!("{}/img/3.png", base),
        format!("{}/img/missing.png", base),
    ];
    let page1: Vec<&str> = page1.iter().map(String::as_str).collect();

    mount_page(server, 1, &page1).await;
    mount_page(server, 2, &["/img/4.png", "/img/copy-of-1.png"]).await;
    mount_page(server, 3, &[]).await;

    for n in 1..=4u64 {
        mount_image(server, &format!("/img/{}.png", n), png(n)).await;
    }
    mount_image(server, "/img/copy-of-1.png", png(1)).await;
}

fn stored_count(config: &Config) -> u64 {
    let storage = SqliteStorage::new(Path::new(&config.ledger.database_path))
        .expect("Failed to open DB");
    ResultStore::count(&storage).expect("Failed to count results")
}

fn artifact_files(config: &Config) -> usize {
    let dir = config.dedup.artifact_dir.join("bbs.test").join("gallery");
    std::fs::read_dir(dir)
        .map(|entries| entries.filter_map(Result::ok).count())
        .unwrap_or(0)
}

#[tokio::test]
async fn test_full_harvest_single_target() {
    let mock_server = MockServer::start().await;
    mount_board(&mock_server).await;

    let dir = TempDir::new().unwrap();
    let config = create_test_config(&mock_server.uri(), dir.path());

    let summary = harvest(config.clone(), "hash-1", false)
        .await
        .expect("Harvest failed");

    assert!(!summary.cancelled);
    assert_eq!(summary.targets.len(), 1);

    let report = &summary.targets[0];
    assert_eq!(report.outcome, TargetOutcome::Completed);
    assert_eq!(report.start_page, 1);
    assert_eq!(report.stats.tasks, 6);
    assert_eq!(report.stats.succeeded, 4);
    assert_eq!(report.stats.duplicates, 1);
    assert_eq!(report.stats.permanent_failed, 1);
    assert_eq!(summary.dedup.content_duplicates, 1);

    assert_eq!(stored_count(&config), 4);
    assert_eq!(artifact_files(&config), 4);

    let ledger = CheckpointLedger::open(&config.ledger).unwrap();
    assert_eq!(ledger.status(&key()).unwrap(), Some(RunStatus::Completed));
    assert_eq!(ledger.current_page(&key()).unwrap(), 2);

    let runs = SqliteStorage::new(Path::new(&config.ledger.database_path)).unwrap();
    let run = runs.latest_run().unwrap().expect("run recorded");
    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.config_hash, "hash-1");
}

#[tokio::test]
async fn test_completed_target_is_skipped_until_fresh() {
    let mock_server = MockServer::start().await;
    mount_board(&mock_server).await;

    let dir = TempDir::new().unwrap();
    let config = create_test_config(&mock_server.uri(), dir.path());

    harvest(config.clone(), "hash-1", false)
        .await
        .expect("First harvest failed");

    let mut coordinator = Coordinator::new(config.clone(), "hash-1").unwrap();
    let summary = coordinator.run().await.expect("Second harvest failed");
    assert_eq!(summary.targets[0].outcome, TargetOutcome::Skipped);
    assert_eq!(stored_count(&config), 4);

    // A fresh run re-walks the board but stores nothing twice
    let mut coordinator = Coordinator::new(config.clone(), "hash-1").unwrap().fresh(true);
    let summary = coordinator.run().await.expect("Fresh harvest failed");

    let report = &summary.targets[0];
    assert_eq!(report.outcome, TargetOutcome::Completed);
    assert_eq!(report.stats.succeeded, 0);
    assert_eq!(report.stats.duplicates, 5);
    assert_eq!(stored_count(&config), 4);
    assert_eq!(artifact_files(&config), 4);
}

#[tokio::test]
async fn test_failed_listing_resumes_from_checkpoint() {
    let mock_server = MockServer::start().await;
    let base = mock_server.uri();
    let page1 = [
        format!("{}/img/1.png", base),
        format!("{}/img/2.png", base),
        format!("{}/img/3.png", base),
    ];
    let page1: Vec<&str> = page1.iter().map(String::as_str).collect();

    mount_page(&mock_server, 1, &page1).await;
    Mock::given(method("GET"))
        .and(path("/board"))
        .and(query_param("page", "2"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&mock_server)
        .await;
    for n in 1..=3u64 {
        mount_image(&mock_server, &format!("/img/{}.png", n), png(n)).await;
    }

    let dir = TempDir::new().unwrap();
    let config = create_test_config(&base, dir.path());

    let summary = harvest(config.clone(), "hash-1", false)
        .await
        .expect("Harvest failed");
    assert!(matches!(summary.targets[0].outcome, TargetOutcome::Failed(_)));
    assert_eq!(stored_count(&config), 3);

    {
        let ledger = CheckpointLedger::open(&config.ledger).unwrap();
        assert_eq!(ledger.status(&key()).unwrap(), Some(RunStatus::Error));
        assert_eq!(ledger.current_page(&key()).unwrap(), 1);
    }

    // The board recovers and gains a page
    mock_server.reset().await;
    mount_page(&mock_server, 1, &page1).await;
    mount_page(&mock_server, 2, &["/img/4.png"]).await;
    for n in 1..=4u64 {
        mount_image(&mock_server, &format!("/img/{}.png", n), png(n)).await;
    }

    let summary = harvest(config.clone(), "hash-1", false)
        .await
        .expect("Resumed harvest failed");

    let report = &summary.targets[0];
    assert_eq!(report.outcome, TargetOutcome::Completed);
    assert_eq!(report.start_page, 1);
    assert_eq!(report.stats.duplicates, 3);
    assert_eq!(report.stats.succeeded, 1);
    assert_eq!(stored_count(&config), 4);

    let ledger = CheckpointLedger::open(&config.ledger).unwrap();
    assert_eq!(ledger.status(&key()).unwrap(), Some(RunStatus::Completed));
    assert_eq!(ledger.current_page(&key()).unwrap(), 2);
}

#[tokio::test]
async fn test_end_page_stops_paging() {
    let mock_server = MockServer::start().await;
    mount_board(&mock_server).await;

    let dir = TempDir::new().unwrap();
    let mut config = create_test_config(&mock_server.uri(), dir.path());
    config.targets[0].end_page = Some(1);

    let summary = harvest(config.clone(), "hash-1", false)
        .await
        .expect("Harvest failed");

    let report = &summary.targets[0];
    assert_eq!(report.outcome, TargetOutcome::Completed);
    assert_eq!(report.stats.tasks, 4);
    assert_eq!(stored_count(&config), 3);
}
