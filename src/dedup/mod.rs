//! Deduplication engine
//!
//! Implements three escalating tiers:
//! - Tier 1: URL deduplication on a 64-bit hash of the normalized URL
//! - Tier 2: exact content deduplication on SHA-256
//! - Tier 3: near-duplicate detection on a 64-bit perceptual fingerprint
//!
//! Tier 1 runs before a task is dispatched; tiers 2 and 3 run on the bytes a
//! successful task produced. Only artifacts that pass every tier are
//! registered, and registration inserts into all three.

mod fingerprint;
mod index;

pub use fingerprint::{BlockGradientFingerprinter, Fingerprinter, PerceptualHash};
pub use index::{IndexEntry, NearMatch, PerceptualIndex};

use crate::config::DedupConfig;
use crate::storage::{ResultStore, StorageResult};
use crate::url::normalize_url_lossy;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::Path;
use tracing::{debug, info, warn};

/// Which tier flagged a duplicate
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DuplicateTier {
    /// The normalized URL was seen before
    Url,

    /// Byte-identical content was stored before
    Content,

    /// Perceptually similar content was stored before
    NearDuplicate { distance: u32, original: String },
}

impl fmt::Display for DuplicateTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DuplicateTier::Url => write!(f, "url"),
            DuplicateTier::Content => write!(f, "content"),
            DuplicateTier::NearDuplicate { distance, original } => {
                write!(f, "near-duplicate of {} (distance {})", original, distance)
            }
        }
    }
}

/// Counters of dedup activity in this process
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DedupStats {
    /// URL lookups made before dispatch
    pub urls_checked: u64,

    /// Artifacts run through the content tiers
    pub artifacts_checked: u64,

    pub url_duplicates: u64,
    pub content_duplicates: u64,
    pub near_duplicates: u64,

    /// Artifacts registered as unique
    pub unique: u64,
}

impl DedupStats {
    pub fn total_duplicates(&self) -> u64 {
        self.url_duplicates + self.content_duplicates + self.near_duplicates
    }

    /// Share of checks that found a duplicate, in `[0, 1]`
    pub fn duplicate_rate(&self) -> f64 {
        let checked = self.urls_checked + self.artifacts_checked;
        if checked == 0 {
            return 0.0;
        }
        self.total_duplicates() as f64 / checked as f64
    }
}

/// What registering an artifact recorded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Registration {
    pub content_hash: [u8; 32],
    pub fingerprint: Option<PerceptualHash>,
}

/// Hashes a URL (or other task key) for the URL tier
///
/// The key is normalized first, then the first 8 bytes of its SHA-256 are
/// read as a big-endian integer.
pub fn url_hash(url: &str) -> u64 {
    let normalized = normalize_url_lossy(url);
    let digest = Sha256::digest(normalized.as_bytes());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(prefix)
}

/// SHA-256 of artifact bytes
pub fn content_hash(bytes: &[u8]) -> [u8; 32] {
    Sha256::digest(bytes).into()
}

/// Three-tier duplicate detector
///
/// Indexes only grow during a run. Rehydration at startup is a bulk
/// `register` and is safe to repeat.
pub struct DedupEngine {
    seen_urls: HashSet<u64>,
    seen_content: HashSet<[u8; 32]>,
    index: PerceptualIndex,
    fingerprinter: Box<dyn Fingerprinter>,
    content_checks: bool,
    stats: DedupStats,
}

impl DedupEngine {
    /// Creates an engine with the default byte-gradient fingerprinter
    pub fn new(config: &DedupConfig) -> Self {
        Self::with_fingerprinter(config, BlockGradientFingerprinter)
    }

    /// Creates an engine with a caller-supplied fingerprinter
    pub fn with_fingerprinter(config: &DedupConfig, fingerprinter: impl Fingerprinter + 'static) -> Self {
        Self {
            seen_urls: HashSet::new(),
            seen_content: HashSet::new(),
            index: PerceptualIndex::new(config.near_duplicate_threshold),
            fingerprinter: Box::new(fingerprinter),
            content_checks: config.enabled,
            stats: DedupStats::default(),
        }
    }

    /// Pure query on the URL tier
    pub fn is_duplicate_url(&self, url: &str) -> bool {
        self.seen_urls.contains(&url_hash(url))
    }

    /// Pure query on the content tier
    pub fn is_duplicate_content(&self, bytes: &[u8]) -> bool {
        self.content_checks && self.seen_content.contains(&content_hash(bytes))
    }

    /// Pure query on the near-duplicate tier
    pub fn is_near_duplicate(&self, bytes: &[u8]) -> bool {
        self.near_match(bytes).is_some()
    }

    fn near_match(&self, bytes: &[u8]) -> Option<NearMatch<'_>> {
        if !self.content_checks {
            return None;
        }
        let fingerprint = self.fingerprinter.fingerprint(bytes)?;
        self.index.nearest(fingerprint)
    }

    /// URL-tier check made before dispatch; counted in the stats
    pub fn check_url(&mut self, url: &str) -> bool {
        self.stats.urls_checked += 1;
        let duplicate = self.is_duplicate_url(url);
        if duplicate {
            self.stats.url_duplicates += 1;
        }
        duplicate
    }

    /// Runs all tiers in order and reports the first that matches
    ///
    /// Nothing is registered; call [`register`](Self::register) once the
    /// artifact is accepted.
    pub fn check(&mut self, url: &str, bytes: &[u8]) -> Option<DuplicateTier> {
        self.stats.artifacts_checked += 1;

        let tier = if self.is_duplicate_url(url) {
            self.stats.url_duplicates += 1;
            Some(DuplicateTier::Url)
        } else if self.is_duplicate_content(bytes) {
            self.stats.content_duplicates += 1;
            Some(DuplicateTier::Content)
        } else if let Some(found) = self.near_match(bytes) {
            let tier = DuplicateTier::NearDuplicate {
                distance: found.distance,
                original: found.entry.source.clone(),
            };
            self.stats.near_duplicates += 1;
            Some(tier)
        } else {
            None
        };

        if let Some(tier) = &tier {
            debug!("Duplicate {}: {}", url, tier);
        }
        tier
    }

    /// Inserts an accepted artifact into all three tiers
    pub fn register(&mut self, url: &str, bytes: &[u8]) -> Registration {
        self.register_url(url);
        let registration = self.register_content(bytes, url);
        self.stats.unique += 1;
        registration
    }

    /// Inserts a URL into the URL tier only
    pub fn register_url(&mut self, url: &str) {
        self.seen_urls.insert(url_hash(url));
    }

    fn register_content(&mut self, bytes: &[u8], source: &str) -> Registration {
        let hash = content_hash(bytes);
        self.seen_content.insert(hash);

        let fingerprint = self.fingerprinter.fingerprint(bytes);
        if let Some(fp) = fingerprint {
            self.index.insert(fp, source);
        }

        Registration {
            content_hash: hash,
            fingerprint,
        }
    }

    /// Restores the content tiers from the files of an artifact directory
    ///
    /// Walks `dir` recursively. Partial downloads (`*.part`) are ignored. A
    /// missing directory is not an error.
    ///
    /// # Returns
    ///
    /// Number of files registered
    pub fn rehydrate_dir(&mut self, dir: &Path) -> std::io::Result<usize> {
        if !dir.exists() {
            return Ok(0);
        }

        let mut pending = vec![dir.to_path_buf()];
        let mut count = 0;

        while let Some(current) = pending.pop() {
            for entry in fs::read_dir(&current)? {
                let path = entry?.path();
                if path.is_dir() {
                    pending.push(path);
                    continue;
                }
                if path.extension().is_some_and(|ext| ext == "part") {
                    continue;
                }

                match fs::read(&path) {
                    Ok(bytes) => {
                        self.register_content(&bytes, &path.to_string_lossy());
                        count += 1;
                    }
                    Err(e) => warn!("Skipping unreadable artifact {}: {}", path.display(), e),
                }
            }
        }

        info!("Rehydrated {} artifacts from {}", count, dir.display());
        Ok(count)
    }

    /// Restores the URL tier from the keys recorded in a result store
    pub fn rehydrate_results(&mut self, store: &dyn ResultStore) -> StorageResult<usize> {
        let keys = store.task_keys()?;
        for key in &keys {
            self.register_url(key);
        }
        Ok(keys.len())
    }

    pub fn stats(&self) -> DedupStats {
        self.stats
    }

    /// Sizes of the three tiers: (urls, content hashes, fingerprints)
    pub fn index_sizes(&self) -> (usize, usize, usize) {
        (self.seen_urls.len(), self.seen_content.len(), self.index.len())
    }
}
