//! Storage traits and error types
//!
//! Two narrow interfaces sit at the persistence seam: [`CheckpointStore`] backs
//! the checkpoint ledger, [`ResultStore`] is the authoritative record of
//! processed tasks.

use crate::ledger::{CheckpointKey, CheckpointRecord};
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid stored value: {0}")]
    InvalidValue(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Backend for checkpoint records, one row per `(site, board)`
///
/// Implementations must make `store` atomic per key: a reader never observes
/// a half-written record.
pub trait CheckpointStore: Send {
    /// Loads the record for a key, if any
    fn load(&self, key: &CheckpointKey) -> StorageResult<Option<CheckpointRecord>>;

    /// Inserts or replaces the record for `record.key`
    fn store(&mut self, record: &CheckpointRecord) -> StorageResult<()>;

    /// Deletes the record for a key
    ///
    /// # Returns
    ///
    /// `true` if a record existed
    fn delete(&mut self, key: &CheckpointKey) -> StorageResult<bool>;

    /// Checks whether a record exists for a key
    fn exists(&self, key: &CheckpointKey) -> StorageResult<bool>;

    /// Lists every stored record, ordered by site then board
    fn list(&self) -> StorageResult<Vec<CheckpointRecord>>;
}

/// One accepted task, as recorded in the result store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultRecord {
    pub task_key: String,
    pub site: String,
    pub board: String,

    /// Hex-encoded SHA-256 of the stored content
    pub content_hash: Option<String>,

    /// Perceptual fingerprint of the stored content
    pub fingerprint: Option<u64>,

    pub byte_len: Option<u64>,

    /// Location of the stored artifact file, if the store wrote one
    pub file_path: Option<String>,

    /// RFC 3339 timestamp of the write
    pub saved_at: String,
}

impl ResultRecord {
    /// Creates a record with no artifact metadata
    pub fn new(task_key: impl Into<String>, key: &CheckpointKey) -> Self {
        Self {
            task_key: task_key.into(),
            site: key.site.clone(),
            board: key.board.clone(),
            content_hash: None,
            fingerprint: None,
            byte_len: None,
            file_path: None,
            saved_at: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// Raw bytes accompanying a result, for stores that keep files
#[derive(Debug, Clone, Copy)]
pub struct ArtifactBytes<'a> {
    pub bytes: &'a [u8],

    /// File extension without the dot, e.g. "jpg"
    pub extension: &'a str,
}

/// Authoritative "already processed" store
///
/// The scheduler asks `exists` before dispatching a task and calls `save` once
/// a task's outcome is accepted.
pub trait ResultStore: Send {
    /// Checks whether a task key has already been recorded
    fn exists(&self, task_key: &str) -> StorageResult<bool>;

    /// Records an accepted task
    ///
    /// # Arguments
    ///
    /// * `record` - The row to write; stores may fill in `file_path`
    /// * `artifact` - The content to keep, when the task produced any
    ///
    /// # Returns
    ///
    /// The record as it was written
    fn save(
        &mut self,
        record: ResultRecord,
        artifact: Option<ArtifactBytes<'_>>,
    ) -> StorageResult<ResultRecord>;

    /// Number of recorded tasks
    fn count(&self) -> StorageResult<u64>;

    /// Every recorded task key, for rehydrating the URL dedup tier
    fn task_keys(&self) -> StorageResult<Vec<String>>;
}
