//! board-harvest: a resumable forum/news image crawler
//!
//! This crate crawls listing pages of forum boards and news sections, downloads the
//! images they reference, and keeps enough durable state to resume an interrupted
//! run without redoing or double-storing work.
//!
//! The orchestration core is made of three pieces:
//! - [`crawler::Scheduler`]: bounded producer/consumer queue with adaptive concurrency
//! - [`ledger::CheckpointLedger`]: per-target progress record persisted in SQLite
//! - [`dedup::DedupEngine`]: URL, content-hash and perceptual near-duplicate detection

pub mod config;
pub mod crawler;
pub mod dedup;
pub mod ledger;
pub mod output;
pub mod state;
pub mod storage;
pub mod url;

use thiserror::Error;

/// Main error type for board-harvest operations
#[derive(Debug, Error)]
pub enum HarvestError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("Checkpoint ledger error: {0}")]
    Ledger(#[from] ledger::LedgerError),

    #[error("URL error: {0}")]
    UrlError(#[from] UrlError),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] ::url::ParseError),

    #[error("Fetch error: {0}")]
    Fetch(#[from] crawler::FetchError),

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Infrastructure failure that aborted a whole run (distinct from per-task outcomes)
    #[error("Fatal error during {context}: {source}")]
    Fatal {
        context: String,
        #[source]
        source: Box<HarvestError>,
    },

    #[error("Run aborted: {0}")]
    Aborted(String),
}

impl HarvestError {
    /// Wraps an error as fatal to the current run
    pub fn fatal(context: impl Into<String>, source: impl Into<HarvestError>) -> Self {
        Self::Fatal {
            context: context.into(),
            source: Box::new(source.into()),
        }
    }

    /// Returns true if this error aborted a run
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal { .. } | Self::Aborted(_))
    }
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),

    #[error("Invalid CSS selector: {0}")]
    InvalidSelector(String),

    #[error("Invalid item id pattern: {0}")]
    InvalidPattern(String),
}

/// URL-specific errors
#[derive(Debug, Error)]
pub enum UrlError {
    #[error("Failed to parse URL: {0}")]
    Parse(String),

    #[error("Invalid URL scheme: {0}")]
    InvalidScheme(String),

    #[error("Missing domain in URL")]
    MissingDomain,

    #[error("Malformed URL: {0}")]
    Malformed(String),
}

/// Result type alias for board-harvest operations
pub type Result<T> = std::result::Result<T, HarvestError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Result type alias for URL operations
pub type UrlResult<T> = std::result::Result<T, UrlError>;

// Re-export commonly used types
pub use config::Config;
pub use crawler::{Outcome, RunStats, Scheduler, SchedulerOptions, Task, TaskKey};
pub use dedup::DedupEngine;
pub use ledger::{CheckpointKey, CheckpointLedger, CheckpointRecord, CheckpointUpdate};
pub use state::RunStatus;
pub use url::{extract_domain, normalize_url};
