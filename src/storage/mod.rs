//! Storage module for persisting harvest state
//!
//! This module handles all database operations, including:
//! - SQLite database initialization and schema management
//! - Checkpoint records backing the ledger
//! - The authoritative result store, with artifact files on disk
//! - The run log used to detect configuration changes between runs

mod artifacts;
mod schema;
mod sqlite;
mod traits;

pub use artifacts::ArtifactStore;
pub use sqlite::{RunRecord, SqliteStorage};
pub use traits::{
    ArtifactBytes, CheckpointStore, ResultRecord, ResultStore, StorageError, StorageResult,
};
