//! SQLite storage implementation
//!
//! This module provides a SQLite-based implementation of the checkpoint and
//! result store traits, plus the run log used to detect configuration changes.

use crate::ledger::{CheckpointKey, CheckpointRecord, Stats};
use crate::state::RunStatus;
use crate::storage::schema::initialize_schema;
use crate::storage::traits::{
    ArtifactBytes, CheckpointStore, ResultRecord, ResultStore, StorageError, StorageResult,
};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;

/// A row of the `runs` table
#[derive(Debug, Clone)]
pub struct RunRecord {
    pub id: i64,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub config_hash: String,
    pub status: RunStatus,
}

/// SQLite storage backend
pub struct SqliteStorage {
    conn: Connection,
}

impl SqliteStorage {
    /// Creates a new SqliteStorage instance
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    ///
    /// # Returns
    ///
    /// * `Ok(SqliteStorage)` - Successfully opened/created database
    /// * `Err(StorageError)` - Failed to open database
    pub fn new(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;

        // WAL lets the ledger and the result store hold separate connections
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA busy_timeout = 5000;
            PRAGMA temp_store = MEMORY;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self { conn })
    }

    /// Creates an in-memory database
    pub fn new_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        initialize_schema(&conn)?;
        Ok(Self { conn })
    }

    /// Records the start of a run
    ///
    /// # Returns
    ///
    /// The ID of the newly created run
    pub fn create_run(&mut self, config_hash: &str) -> StorageResult<i64> {
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO runs (started_at, config_hash, status) VALUES (?1, ?2, ?3)",
            params![now, config_hash, RunStatus::Running.to_db_string()],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Records the end of a run
    pub fn finish_run(&mut self, run_id: i64, status: RunStatus) -> StorageResult<()> {
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "UPDATE runs SET status = ?1, finished_at = ?2 WHERE id = ?3",
            params![status.to_db_string(), now, run_id],
        )?;
        Ok(())
    }

    /// Gets the most recent run
    pub fn latest_run(&self) -> StorageResult<Option<RunRecord>> {
        let run = self
            .conn
            .query_row(
                "SELECT id, started_at, finished_at, config_hash, status
                 FROM runs ORDER BY id DESC LIMIT 1",
                [],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, Option<String>>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                    ))
                },
            )
            .optional()?;

        run.map(|(id, started_at, finished_at, config_hash, status)| {
            Ok(RunRecord {
                id,
                started_at,
                finished_at,
                config_hash,
                status: parse_status(&status)?,
            })
        })
        .transpose()
    }

    /// Every result row of one target, oldest first
    pub fn results_for(&self, key: &CheckpointKey) -> StorageResult<Vec<ResultRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT task_key, site, board, content_hash, fingerprint, byte_len, file_path, saved_at
             FROM results WHERE site = ?1 AND board = ?2 ORDER BY saved_at, task_key",
        )?;

        let rows = stmt.query_map(params![key.site, key.board], RawResult::from_row)?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row?.into_record()?);
        }
        Ok(results)
    }
}

/// Column values of a `checkpoints` row before conversion
struct RawCheckpoint {
    site: String,
    board: String,
    current_page: i64,
    last_item_id: Option<String>,
    last_item_url: Option<String>,
    status: String,
    stats: String,
    recent_seen_ids: String,
    min_id: Option<String>,
    max_id: Option<String>,
    created_at: String,
    updated_at: String,
}

const CHECKPOINT_COLUMNS: &str = "site, board, current_page, last_item_id, last_item_url, status,
     stats, recent_seen_ids, min_id, max_id, created_at, updated_at";

impl RawCheckpoint {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            site: row.get(0)?,
            board: row.get(1)?,
            current_page: row.get(2)?,
            last_item_id: row.get(3)?,
            last_item_url: row.get(4)?,
            status: row.get(5)?,
            stats: row.get(6)?,
            recent_seen_ids: row.get(7)?,
            min_id: row.get(8)?,
            max_id: row.get(9)?,
            created_at: row.get(10)?,
            updated_at: row.get(11)?,
        })
    }

    fn into_record(self) -> StorageResult<CheckpointRecord> {
        let current_page = u32::try_from(self.current_page).map_err(|_| {
            StorageError::InvalidValue(format!("current_page out of range: {}", self.current_page))
        })?;
        let stats: Stats = serde_json::from_str(&self.stats)?;
        let recent_seen_ids: Vec<String> = serde_json::from_str(&self.recent_seen_ids)?;

        Ok(CheckpointRecord {
            key: CheckpointKey {
                site: self.site,
                board: self.board,
            },
            current_page,
            last_item_id: self.last_item_id,
            last_item_url: self.last_item_url,
            status: parse_status(&self.status)?,
            stats,
            recent_seen_ids,
            min_id: self.min_id,
            max_id: self.max_id,
            created_at: parse_timestamp(&self.created_at)?,
            updated_at: parse_timestamp(&self.updated_at)?,
        })
    }
}

/// Column values of a `results` row before conversion
struct RawResult {
    task_key: String,
    site: String,
    board: String,
    content_hash: Option<String>,
    fingerprint: Option<String>,
    byte_len: Option<i64>,
    file_path: Option<String>,
    saved_at: String,
}

impl RawResult {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            task_key: row.get(0)?,
            site: row.get(1)?,
            board: row.get(2)?,
            content_hash: row.get(3)?,
            fingerprint: row.get(4)?,
            byte_len: row.get(5)?,
            file_path: row.get(6)?,
            saved_at: row.get(7)?,
        })
    }

    fn into_record(self) -> StorageResult<ResultRecord> {
        let fingerprint = self
            .fingerprint
            .map(|hex| {
                u64::from_str_radix(&hex, 16).map_err(|_| {
                    StorageError::InvalidValue(format!("bad fingerprint '{}'", hex))
                })
            })
            .transpose()?;

        Ok(ResultRecord {
            task_key: self.task_key,
            site: self.site,
            board: self.board,
            content_hash: self.content_hash,
            fingerprint,
            byte_len: self.byte_len.map(|n| n.max(0) as u64),
            file_path: self.file_path,
            saved_at: self.saved_at,
        })
    }
}

fn parse_status(value: &str) -> StorageResult<RunStatus> {
    RunStatus::from_db_string(value)
        .ok_or_else(|| StorageError::InvalidValue(format!("unknown status '{}'", value)))
}

fn parse_timestamp(value: &str) -> StorageResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StorageError::InvalidValue(format!("bad timestamp '{}': {}", value, e)))
}

fn format_timestamp(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

impl CheckpointStore for SqliteStorage {
    fn load(&self, key: &CheckpointKey) -> StorageResult<Option<CheckpointRecord>> {
        let raw = self
            .conn
            .query_row(
                &format!(
                    "SELECT {} FROM checkpoints WHERE site = ?1 AND board = ?2",
                    CHECKPOINT_COLUMNS
                ),
                params![key.site, key.board],
                RawCheckpoint::from_row,
            )
            .optional()?;

        raw.map(RawCheckpoint::into_record).transpose()
    }

    fn store(&mut self, record: &CheckpointRecord) -> StorageResult<()> {
        let stats = serde_json::to_string(&record.stats)?;
        let recent = serde_json::to_string(&record.recent_seen_ids)?;

        // Single statement: the row is replaced atomically, created_at is kept
        // from the first insert
        self.conn.execute(
            "INSERT INTO checkpoints (site, board, current_page, last_item_id, last_item_url,
                 status, stats, recent_seen_ids, min_id, max_id, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
             ON CONFLICT(site, board) DO UPDATE SET
                 current_page = excluded.current_page,
                 last_item_id = excluded.last_item_id,
                 last_item_url = excluded.last_item_url,
                 status = excluded.status,
                 stats = excluded.stats,
                 recent_seen_ids = excluded.recent_seen_ids,
                 min_id = excluded.min_id,
                 max_id = excluded.max_id,
                 updated_at = excluded.updated_at",
            params![
                record.key.site,
                record.key.board,
                record.current_page.max(1),
                record.last_item_id,
                record.last_item_url,
                record.status.to_db_string(),
                stats,
                recent,
                record.min_id,
                record.max_id,
                format_timestamp(&record.created_at),
                format_timestamp(&record.updated_at),
            ],
        )?;
        Ok(())
    }

    fn delete(&mut self, key: &CheckpointKey) -> StorageResult<bool> {
        let removed = self.conn.execute(
            "DELETE FROM checkpoints WHERE site = ?1 AND board = ?2",
            params![key.site, key.board],
        )?;
        Ok(removed > 0)
    }

    fn exists(&self, key: &CheckpointKey) -> StorageResult<bool> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM checkpoints WHERE site = ?1 AND board = ?2",
            params![key.site, key.board],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    fn list(&self) -> StorageResult<Vec<CheckpointRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM checkpoints ORDER BY site, board",
            CHECKPOINT_COLUMNS
        ))?;

        let rows = stmt.query_map([], RawCheckpoint::from_row)?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row?.into_record()?);
        }
        Ok(records)
    }
}

impl ResultStore for SqliteStorage {
    fn exists(&self, task_key: &str) -> StorageResult<bool> {
        let found = self
            .conn
            .query_row(
                "SELECT 1 FROM results WHERE task_key = ?1",
                params![task_key],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn save(
        &mut self,
        record: ResultRecord,
        _artifact: Option<ArtifactBytes<'_>>,
    ) -> StorageResult<ResultRecord> {
        let fingerprint = record.fingerprint.map(|f| format!("{:016x}", f));
        let byte_len = record.byte_len.map(|n| n as i64);

        self.conn.execute(
            "INSERT OR REPLACE INTO results
                 (task_key, site, board, content_hash, fingerprint, byte_len, file_path, saved_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                record.task_key,
                record.site,
                record.board,
                record.content_hash,
                fingerprint,
                byte_len,
                record.file_path,
                record.saved_at,
            ],
        )?;
        Ok(record)
    }

    fn count(&self) -> StorageResult<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM results", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    fn task_keys(&self) -> StorageResult<Vec<String>> {
        let mut stmt = self.conn.prepare("SELECT task_key FROM results")?;
        let keys = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(keys)
    }
}
