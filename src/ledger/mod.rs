//! Checkpoint ledger
//!
//! The ledger keeps one durable progress record per crawl target
//! (`site`, `board`). It is read once when a target starts and written after
//! each unit of progress, so an interrupted run can pick up where it stopped.
//!
//! The ledger is the only writer of checkpoint records. Writes go through a
//! [`CheckpointStore`], which makes each save atomic per key.

mod id_window;
mod record;

pub use id_window::{IdPosition, IdWindow};
pub use record::{
    CheckpointKey, CheckpointRecord, CheckpointUpdate, StatValue, Stats, ERROR_COUNT_KEY,
    ERROR_MESSAGE_KEY,
};

use crate::config::LedgerConfig;
use crate::state::RunStatus;
use crate::storage::{CheckpointStore, SqliteStorage, StorageError};
use chrono::Utc;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Errors raised by the checkpoint ledger
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Checkpoint storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Invalid status transition for {key}: {from} -> {to}")]
    InvalidTransition {
        key: CheckpointKey,
        from: RunStatus,
        to: RunStatus,
    },

    #[error("Checkpoint write for {key} failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        key: CheckpointKey,
        attempts: u32,
        #[source]
        source: StorageError,
    },
}

/// Result type for ledger operations
pub type LedgerResult<T> = Result<T, LedgerError>;

/// Where a target should start, according to its checkpoint
#[derive(Debug, Clone, PartialEq)]
pub enum ResumePoint {
    /// No checkpoint: start from the configured beginning
    Fresh,

    /// Interrupted or errored earlier: continue from the recorded position
    Resume {
        page: u32,
        last_item_id: Option<String>,
        min_id: Option<String>,
        max_id: Option<String>,
        recent_seen_ids: Vec<String>,
    },

    /// The target finished; skip it unless its checkpoint is cleared
    Completed,
}

/// Tunables of the ledger
#[derive(Debug, Clone)]
pub struct LedgerOptions {
    /// Maximum length of `recent_seen_ids`
    pub recent_seen_capacity: usize,

    /// Attempts per write in [`CheckpointLedger::save_with_retry`]
    pub save_attempts: u32,

    /// Delay before the second attempt; doubles on each further attempt
    pub save_backoff: Duration,
}

impl Default for LedgerOptions {
    fn default() -> Self {
        Self {
            recent_seen_capacity: 500,
            save_attempts: 3,
            save_backoff: Duration::from_millis(200),
        }
    }
}

impl From<&LedgerConfig> for LedgerOptions {
    fn from(config: &LedgerConfig) -> Self {
        Self {
            recent_seen_capacity: config.recent_seen_capacity,
            save_attempts: config.save_attempts.max(1),
            save_backoff: Duration::from_millis(config.save_backoff_ms),
        }
    }
}

/// Durable per-target progress tracker
pub struct CheckpointLedger {
    store: Box<dyn CheckpointStore>,
    options: LedgerOptions,
}

impl CheckpointLedger {
    /// Creates a ledger over any checkpoint store
    pub fn new(store: impl CheckpointStore + 'static, options: LedgerOptions) -> Self {
        Self {
            store: Box::new(store),
            options,
        }
    }

    /// Opens the SQLite-backed ledger described by the configuration
    ///
    /// # Arguments
    ///
    /// * `config` - Ledger section of the configuration
    ///
    /// # Returns
    ///
    /// * `Ok(CheckpointLedger)` - Database opened and schema ready
    /// * `Err(LedgerError)` - Failed to open the database
    pub fn open(config: &LedgerConfig) -> LedgerResult<Self> {
        let storage = SqliteStorage::new(Path::new(&config.database_path))?;
        Ok(Self::new(storage, LedgerOptions::from(config)))
    }

    pub fn options(&self) -> &LedgerOptions {
        &self.options
    }

    /// Merges an update into the record for `key`, creating it if absent
    ///
    /// A new record starts as `running` on page 1. `created_at` is set on the
    /// first write and never changed afterwards.
    ///
    /// # Returns
    ///
    /// The record as persisted
    pub fn save(
        &mut self,
        key: &CheckpointKey,
        update: &CheckpointUpdate,
    ) -> LedgerResult<CheckpointRecord> {
        let now = Utc::now();
        let mut record = match self.store.load(key)? {
            Some(existing) => existing,
            None => CheckpointRecord::new(key.clone(), now),
        };

        record.apply(update, self.options.recent_seen_capacity, now)?;
        self.store.store(&record)?;

        debug!(
            "Checkpoint saved for {}: page {} ({})",
            key, record.current_page, record.status
        );
        Ok(record)
    }

    /// Saves with exponential backoff on storage failures
    ///
    /// Invalid status transitions are not retried. Exhausting all attempts
    /// yields [`LedgerError::RetriesExhausted`], which callers treat as fatal.
    pub async fn save_with_retry(
        &mut self,
        key: &CheckpointKey,
        update: &CheckpointUpdate,
    ) -> LedgerResult<CheckpointRecord> {
        let attempts = self.options.save_attempts.max(1);
        let mut delay = self.options.save_backoff;
        let mut attempt = 1;

        loop {
            match self.save(key, update) {
                Ok(record) => return Ok(record),
                Err(LedgerError::Storage(e)) if attempt < attempts => {
                    warn!(
                        "Checkpoint write for {} failed (attempt {}/{}): {}",
                        key, attempt, attempts, e
                    );
                    tokio::time::sleep(delay).await;
                    delay = delay.saturating_mul(2);
                    attempt += 1;
                }
                Err(LedgerError::Storage(e)) => {
                    return Err(LedgerError::RetriesExhausted {
                        key: key.clone(),
                        attempts,
                        source: e,
                    });
                }
                Err(other) => return Err(other),
            }
        }
    }

    pub fn load(&self, key: &CheckpointKey) -> LedgerResult<Option<CheckpointRecord>> {
        Ok(self.store.load(key)?)
    }

    /// Deletes the record for `key`
    ///
    /// # Returns
    ///
    /// `true` if a record was removed
    pub fn clear(&mut self, key: &CheckpointKey) -> LedgerResult<bool> {
        let removed = self.store.delete(key)?;
        if removed {
            info!("Checkpoint cleared: {}", key);
        }
        Ok(removed)
    }

    pub fn exists(&self, key: &CheckpointKey) -> LedgerResult<bool> {
        Ok(self.store.exists(key)?)
    }

    /// Every checkpoint record in the store
    pub fn list(&self) -> LedgerResult<Vec<CheckpointRecord>> {
        Ok(self.store.list()?)
    }

    /// Page to resume from; 1 when no record exists
    pub fn current_page(&self, key: &CheckpointKey) -> LedgerResult<u32> {
        Ok(self.load(key)?.map_or(1, |r| r.current_page))
    }

    pub fn status(&self, key: &CheckpointKey) -> LedgerResult<Option<RunStatus>> {
        Ok(self.load(key)?.map(|r| r.status))
    }

    pub fn stats(&self, key: &CheckpointKey) -> LedgerResult<Stats> {
        Ok(self.load(key)?.map(|r| r.stats).unwrap_or_default())
    }

    pub fn last_item_id(&self, key: &CheckpointKey) -> LedgerResult<Option<String>> {
        Ok(self.load(key)?.and_then(|r| r.last_item_id))
    }

    pub fn recent_seen_ids(&self, key: &CheckpointKey) -> LedgerResult<Vec<String>> {
        Ok(self.load(key)?.map(|r| r.recent_seen_ids).unwrap_or_default())
    }

    pub fn min_id(&self, key: &CheckpointKey) -> LedgerResult<Option<String>> {
        Ok(self.load(key)?.and_then(|r| r.min_id))
    }

    pub fn max_id(&self, key: &CheckpointKey) -> LedgerResult<Option<String>> {
        Ok(self.load(key)?.and_then(|r| r.max_id))
    }

    /// Marks a target as finished, optionally replacing its final stats
    pub fn mark_completed(
        &mut self,
        key: &CheckpointKey,
        final_stats: Option<Stats>,
    ) -> LedgerResult<CheckpointRecord> {
        let mut update = CheckpointUpdate::new().status(RunStatus::Completed);
        if let Some(stats) = final_stats {
            update = update.stats(stats);
        }

        let record = self.save(key, &update)?;
        info!("Target {} marked completed at page {}", key, record.current_page);
        Ok(record)
    }

    /// Marks a target as errored, recording the message and bumping the error count
    pub fn mark_error(
        &mut self,
        key: &CheckpointKey,
        message: &str,
    ) -> LedgerResult<CheckpointRecord> {
        let previous = self
            .load(key)?
            .map_or(0, |r| r.stat_count(ERROR_COUNT_KEY));

        let update = CheckpointUpdate::new()
            .status(RunStatus::Error)
            .stat(ERROR_MESSAGE_KEY, message)
            .stat(ERROR_COUNT_KEY, previous + 1);

        let record = self.save(key, &update)?;
        warn!("Target {} marked as error: {}", key, message);
        Ok(record)
    }

    /// Decides where a target should start
    pub fn resume_point(&self, key: &CheckpointKey) -> LedgerResult<ResumePoint> {
        let point = match self.load(key)? {
            None => ResumePoint::Fresh,
            Some(record) if record.status == RunStatus::Completed => ResumePoint::Completed,
            Some(record) => ResumePoint::Resume {
                page: record.current_page,
                last_item_id: record.last_item_id,
                min_id: record.min_id,
                max_id: record.max_id,
                recent_seen_ids: record.recent_seen_ids,
            },
        };
        Ok(point)
    }
}
