/// Run status definitions for crawl target checkpoints
///
/// A checkpoint starts `Running`, and ends either `Completed` (terminal) or
/// `Error`. An errored target may be picked up again by a later run, which
/// moves it back to `Running`.
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status of a crawl target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    /// Crawl in progress (or interrupted while in progress)
    Running,

    /// Crawl reached the end of its source; resuming skips the target
    Completed,

    /// Crawl aborted on a fatal error; a later run may resume it
    Error,
}

impl RunStatus {
    /// Returns true if no further crawling is expected for the target
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed)
    }

    /// Returns true if a restarted crawl should pick up from the checkpoint
    pub fn is_resumable(&self) -> bool {
        matches!(self, Self::Running | Self::Error)
    }

    /// Checks whether a checkpoint may move from `self` to `next`
    ///
    /// `Completed` only accepts further `Completed` saves (final stats updates);
    /// restarting a completed target requires clearing its checkpoint first.
    pub fn can_transition_to(&self, next: RunStatus) -> bool {
        match (self, next) {
            (Self::Running, _) => true,
            (Self::Error, _) => true,
            (Self::Completed, Self::Completed) => true,
            (Self::Completed, _) => false,
        }
    }

    /// Converts the status to its database string representation
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Error => "error",
        }
    }

    /// Parses a status from its database string representation
    ///
    /// Returns None if the string doesn't match any known status.
    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "error" => Some(Self::Error),
            _ => None,
        }
    }

    /// Returns all possible statuses
    pub fn all() -> [Self; 3] {
        [Self::Running, Self::Completed, Self::Error]
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_string())
    }
}
