//! Dedup tiers and their rehydration from stored artifacts

use board_harvest::config::DedupConfig;
use board_harvest::dedup::{content_hash, DedupEngine, DuplicateTier, Fingerprinter, PerceptualHash};
use board_harvest::ledger::CheckpointKey;
use board_harvest::storage::{ArtifactBytes, ArtifactStore, ResultRecord, ResultStore, SqliteStorage};
use tempfile::TempDir;

/// Reads the first eight bytes as the hash, so tests control bit distances
struct PrefixFingerprinter;

impl Fingerprinter for PrefixFingerprinter {
    fn fingerprint(&self, bytes: &[u8]) -> Option<PerceptualHash> {
        let prefix: [u8; 8] = bytes.get(..8)?.try_into().ok()?;
        Some(PerceptualHash(u64::from_be_bytes(prefix)))
    }
}

fn engine() -> DedupEngine {
    DedupEngine::with_fingerprinter(&DedupConfig::default(), PrefixFingerprinter)
}

fn image(prefix: [u8; 8], body: &str) -> Vec<u8> {
    let mut bytes = prefix.to_vec();
    bytes.extend_from_slice(body.as_bytes());
    bytes
}

#[test]
fn test_tiers_apply_in_order() {
    let mut dedup = engine();
    let original = image([0x10; 8], "original");
    dedup.register("https://bbs.example.com/img/1.jpg", &original);

    // Same URL, different bytes: the URL tier answers first
    assert_eq!(
        dedup.check("https://bbs.example.com/img/1.jpg", b"anything else"),
        Some(DuplicateTier::Url)
    );

    // Same bytes under another URL
    assert_eq!(
        dedup.check("https://bbs.example.com/img/2.jpg", &original),
        Some(DuplicateTier::Content)
    );

    // One flipped bit in the fingerprint, different bytes
    let mut prefix = [0x10; 8];
    prefix[7] ^= 0x01;
    let recompressed = image(prefix, "recompressed");
    assert_eq!(
        dedup.check("https://bbs.example.com/img/3.jpg", &recompressed),
        Some(DuplicateTier::NearDuplicate {
            distance: 1,
            original: "https://bbs.example.com/img/1.jpg".to_string(),
        })
    );

    let unrelated = image([0xEF; 8], "unrelated");
    assert_eq!(dedup.check("https://bbs.example.com/img/4.jpg", &unrelated), None);

    let stats = dedup.stats();
    assert_eq!(stats.artifacts_checked, 4);
    assert_eq!(stats.url_duplicates, 1);
    assert_eq!(stats.content_duplicates, 1);
    assert_eq!(stats.near_duplicates, 1);
    assert_eq!(stats.unique, 1);
}

#[test]
fn test_disabled_content_checks_keep_url_tier() {
    let config = DedupConfig {
        enabled: false,
        ..DedupConfig::default()
    };
    let mut dedup = DedupEngine::with_fingerprinter(&config, PrefixFingerprinter);
    let bytes = image([0x42; 8], "body");
    dedup.register("https://bbs.example.com/a.png", &bytes);

    assert_eq!(dedup.check("https://bbs.example.com/b.png", &bytes), None);
    assert!(dedup.check_url("https://bbs.example.com/a.png"));
}

#[test]
fn test_rehydration_from_artifact_store_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let key = CheckpointKey::new("bbs.example.com", "gallery");
    let rows = SqliteStorage::new_in_memory().unwrap();
    let mut store = ArtifactStore::new(dir.path().join("artifacts"), rows).unwrap();

    let first = image([0x01; 8], "first image");
    let second = image([0xF0; 8], "second image");
    let uploads = [
        ("https://bbs.example.com/1.png", &first),
        ("https://bbs.example.com/2.png", &second),
    ];
    for (url, bytes) in uploads {
        store
            .save(
                ResultRecord::new(url, &key),
                Some(ArtifactBytes {
                    bytes,
                    extension: "png",
                }),
            )
            .unwrap();
    }

    let mut dedup = engine();
    assert_eq!(dedup.rehydrate_dir(store.root()).unwrap(), 2);
    assert_eq!(dedup.rehydrate_results(&store).unwrap(), 2);
    let sizes = dedup.index_sizes();

    dedup.rehydrate_dir(store.root()).unwrap();
    dedup.rehydrate_results(&store).unwrap();
    assert_eq!(dedup.index_sizes(), sizes);
    assert_eq!(sizes, (2, 2, 2));

    assert!(dedup.is_duplicate_url("https://bbs.example.com/1.png"));
    assert!(dedup.is_duplicate_content(&second));
    let hash = hex::encode(content_hash(&first));
    let stem = &hash[..16];
    let stored_at = store.target_dir(&key).join(format!("{}.png", stem));
    assert_eq!(
        dedup.check("https://bbs.example.com/9.png", &image([0x01; 8], "re-encoded first")),
        Some(DuplicateTier::NearDuplicate {
            distance: 0,
            original: stored_at.to_string_lossy().into_owned(),
        })
    );
}
