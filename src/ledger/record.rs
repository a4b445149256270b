use crate::ledger::LedgerError;
use crate::state::RunStatus;
use crate::url::canonical_site;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Stats key holding the message of the most recent error
pub const ERROR_MESSAGE_KEY: &str = "last_error";

/// Stats key counting how many times a target was marked as errored
pub const ERROR_COUNT_KEY: &str = "error_count";

/// Identifies one crawl target
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CheckpointKey {
    pub site: String,
    pub board: String,
}

impl CheckpointKey {
    /// Creates a key, canonicalizing the site to its bare host
    ///
    /// `"https://WWW.Example.com/forum"` and `"www.example.com"` both yield the
    /// site `"www.example.com"`. An empty board becomes `"all"`.
    pub fn new(site: &str, board: &str) -> Self {
        let board = board.trim();
        Self {
            site: canonical_site(site),
            board: if board.is_empty() {
                "all".to_string()
            } else {
                board.to_string()
            },
        }
    }

    /// Parses a `site/board` pair as printed by `Display`
    pub fn parse(value: &str) -> Option<Self> {
        let (site, board) = value.trim().rsplit_once('/')?;
        if site.is_empty() || board.is_empty() {
            return None;
        }
        Some(Self::new(site, board))
    }
}

impl fmt::Display for CheckpointKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.site, self.board)
    }
}

/// A single stats entry: counters mostly, plus the occasional message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StatValue {
    Count(i64),
    Text(String),
}

impl StatValue {
    /// Returns the numeric value, if this is a counter
    pub fn as_count(&self) -> Option<i64> {
        match self {
            StatValue::Count(n) => Some(*n),
            StatValue::Text(_) => None,
        }
    }
}

impl From<i64> for StatValue {
    fn from(n: i64) -> Self {
        StatValue::Count(n)
    }
}

impl From<u64> for StatValue {
    fn from(n: u64) -> Self {
        StatValue::Count(i64::try_from(n).unwrap_or(i64::MAX))
    }
}

impl From<usize> for StatValue {
    fn from(n: usize) -> Self {
        StatValue::from(n as u64)
    }
}

impl From<&str> for StatValue {
    fn from(s: &str) -> Self {
        StatValue::Text(s.to_string())
    }
}

impl From<String> for StatValue {
    fn from(s: String) -> Self {
        StatValue::Text(s)
    }
}

impl fmt::Display for StatValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatValue::Count(n) => write!(f, "{}", n),
            StatValue::Text(s) => write!(f, "{}", s),
        }
    }
}

/// Rolling stats of a target, keyed by name
pub type Stats = BTreeMap<String, StatValue>;

/// Durable progress record of one crawl target
#[derive(Debug, Clone, PartialEq)]
pub struct CheckpointRecord {
    pub key: CheckpointKey,

    /// Listing page the target resumes from, always >= 1
    pub current_page: u32,

    pub last_item_id: Option<String>,
    pub last_item_url: Option<String>,
    pub status: RunStatus,
    pub stats: Stats,

    /// Recently processed ids, oldest first; a cache, never authoritative
    pub recent_seen_ids: Vec<String>,

    pub min_id: Option<String>,
    pub max_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CheckpointRecord {
    /// Creates the record a first save starts from
    pub fn new(key: CheckpointKey, now: DateTime<Utc>) -> Self {
        Self {
            key,
            current_page: 1,
            last_item_id: None,
            last_item_url: None,
            status: RunStatus::Running,
            stats: Stats::new(),
            recent_seen_ids: Vec::new(),
            min_id: None,
            max_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Merges a partial update into this record
    ///
    /// `created_at` is left alone and `updated_at` moves strictly forward,
    /// even when the clock has not.
    ///
    /// # Arguments
    ///
    /// * `update` - Fields to change; `None` fields keep their value
    /// * `recent_capacity` - Upper bound on `recent_seen_ids` after the merge
    /// * `now` - Timestamp to record
    pub fn apply(
        &mut self,
        update: &CheckpointUpdate,
        recent_capacity: usize,
        now: DateTime<Utc>,
    ) -> Result<(), LedgerError> {
        if let Some(status) = update.status {
            if !self.status.can_transition_to(status) {
                return Err(LedgerError::InvalidTransition {
                    key: self.key.clone(),
                    from: self.status,
                    to: status,
                });
            }
            self.status = status;
        }

        if let Some(page) = update.current_page {
            self.current_page = page.max(1);
        }
        if let Some(id) = &update.last_item_id {
            self.last_item_id = Some(id.clone());
        }
        if let Some(url) = &update.last_item_url {
            self.last_item_url = Some(url.clone());
        }
        if let Some(min) = &update.min_id {
            self.min_id = Some(min.clone());
        }
        if let Some(max) = &update.max_id {
            self.max_id = Some(max.clone());
        }

        for (name, value) in &update.stats {
            self.stats.insert(name.clone(), value.clone());
        }

        if let Some(ids) = &update.recent_seen_ids {
            let skip = ids.len().saturating_sub(recent_capacity);
            self.recent_seen_ids = ids[skip..].to_vec();
        }

        self.updated_at = if now > self.updated_at {
            now
        } else {
            self.updated_at + Duration::nanoseconds(1)
        };

        Ok(())
    }

    /// Reads a counter from `stats`, treating missing or textual entries as zero
    pub fn stat_count(&self, name: &str) -> i64 {
        self.stats
            .get(name)
            .and_then(StatValue::as_count)
            .unwrap_or(0)
    }
}

/// A partial change to a checkpoint record
///
/// Built with the chained setters and handed to
/// [`CheckpointLedger::save`](crate::ledger::CheckpointLedger::save).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CheckpointUpdate {
    pub current_page: Option<u32>,
    pub last_item_id: Option<String>,
    pub last_item_url: Option<String>,
    pub status: Option<RunStatus>,
    pub stats: Stats,
    pub recent_seen_ids: Option<Vec<String>>,
    pub min_id: Option<String>,
    pub max_id: Option<String>,
}

impl CheckpointUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn page(mut self, page: u32) -> Self {
        self.current_page = Some(page);
        self
    }

    pub fn last_item(mut self, id: impl Into<String>, url: Option<String>) -> Self {
        self.last_item_id = Some(id.into());
        self.last_item_url = url;
        self
    }

    pub fn status(mut self, status: RunStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn stat(mut self, name: impl Into<String>, value: impl Into<StatValue>) -> Self {
        self.stats.insert(name.into(), value.into());
        self
    }

    pub fn stats(mut self, stats: Stats) -> Self {
        self.stats.extend(stats);
        self
    }

    pub fn recent_seen(mut self, ids: Vec<String>) -> Self {
        self.recent_seen_ids = Some(ids);
        self
    }

    pub fn id_window(mut self, min: Option<String>, max: Option<String>) -> Self {
        self.min_id = min;
        self.max_id = max;
        self
    }

    /// Returns true if applying this update would change nothing but `updated_at`
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}
