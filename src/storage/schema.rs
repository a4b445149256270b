//! Database schema definitions
//!
//! This module contains all SQL schema definitions for the board-harvest database.

/// SQL schema for the database
pub const SCHEMA_SQL: &str = r#"
-- Track harvest runs
CREATE TABLE IF NOT EXISTS runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    started_at TEXT NOT NULL,
    finished_at TEXT,
    config_hash TEXT NOT NULL,
    status TEXT NOT NULL
);

-- One progress record per crawl target
CREATE TABLE IF NOT EXISTS checkpoints (
    site TEXT NOT NULL,
    board TEXT NOT NULL,
    current_page INTEGER NOT NULL CHECK (current_page >= 1),
    last_item_id TEXT,
    last_item_url TEXT,
    status TEXT NOT NULL CHECK (status IN ('running', 'completed', 'error')),
    stats TEXT NOT NULL DEFAULT '{}',
    recent_seen_ids TEXT NOT NULL DEFAULT '[]',
    min_id TEXT,
    max_id TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (site, board)
);

-- Authoritative record of processed tasks
CREATE TABLE IF NOT EXISTS results (
    task_key TEXT PRIMARY KEY,
    site TEXT NOT NULL,
    board TEXT NOT NULL,
    content_hash TEXT,
    fingerprint TEXT,
    byte_len INTEGER,
    file_path TEXT,
    saved_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_results_target ON results(site, board);
CREATE INDEX IF NOT EXISTS idx_results_content_hash ON results(content_hash);
"#;

/// Initializes the database schema
///
/// # Arguments
///
/// * `conn` - The database connection
///
/// # Returns
///
/// * `Ok(())` - Schema initialized successfully
/// * `Err(rusqlite::Error)` - Failed to initialize schema
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}
