use serde::Deserialize;
use std::path::PathBuf;

/// Main configuration structure for board-harvest
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub dedup: DedupConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default, rename = "target")]
    pub targets: Vec<TargetConfig>,
}

/// Scheduler and adaptive concurrency settings
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SchedulerConfig {
    /// Worker count at the start of every run
    #[serde(default = "default_initial_workers")]
    pub initial_workers: usize,

    /// Lower bound for adaptive concurrency
    #[serde(default = "default_min_workers")]
    pub min_workers: usize,

    /// Upper bound for adaptive concurrency
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    /// Capacity of the bounded task queue between producer and workers
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Maximum worker invocations per task
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Number of observed outcomes between concurrency adjustments
    #[serde(default = "default_adjust_interval")]
    pub adjust_interval: usize,

    /// Number of recent outcomes the error rate is computed over
    #[serde(default = "default_window_size")]
    pub window_size: usize,

    /// Error rate above which concurrency shrinks
    #[serde(default = "default_error_high_watermark")]
    pub error_high_watermark: f64,

    /// Error rate below which concurrency grows
    #[serde(default = "default_error_low_watermark")]
    pub error_low_watermark: f64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            initial_workers: default_initial_workers(),
            min_workers: default_min_workers(),
            max_workers: default_max_workers(),
            queue_capacity: default_queue_capacity(),
            max_attempts: default_max_attempts(),
            adjust_interval: default_adjust_interval(),
            window_size: default_window_size(),
            error_high_watermark: default_error_high_watermark(),
            error_low_watermark: default_error_low_watermark(),
        }
    }
}

/// Checkpoint ledger persistence settings
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct LedgerConfig {
    /// Path to the SQLite database holding checkpoints and results
    pub database_path: String,

    /// Maximum number of ids kept in a checkpoint's recent-seen cache
    #[serde(default = "default_recent_seen_capacity")]
    pub recent_seen_capacity: usize,

    /// Attempts per checkpoint write before the run is aborted
    #[serde(default = "default_save_attempts")]
    pub save_attempts: u32,

    /// Base delay of the exponential backoff between write attempts (milliseconds)
    #[serde(default = "default_save_backoff_ms")]
    pub save_backoff_ms: u64,
}

/// Deduplication settings
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct DedupConfig {
    /// Whether content and near-duplicate checks run at all
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Maximum Hamming distance (out of 64 bits) flagged as near-duplicate
    #[serde(default = "default_near_duplicate_threshold")]
    pub near_duplicate_threshold: u32,

    /// Directory accepted artifacts are written to
    #[serde(default = "default_artifact_dir")]
    pub artifact_dir: PathBuf,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            near_duplicate_threshold: default_near_duplicate_threshold(),
            artifact_dir: default_artifact_dir(),
        }
    }
}

/// HTTP fetch and artifact validation settings
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct FetchConfig {
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Smallest accepted artifact in bytes
    #[serde(default = "default_min_bytes")]
    pub min_bytes: usize,

    /// Largest accepted artifact in bytes
    #[serde(default = "default_max_bytes")]
    pub max_bytes: usize,

    /// Accepted image formats (file extensions, lowercase)
    #[serde(default = "default_allowed_formats")]
    pub allowed_formats: Vec<String>,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            timeout_secs: default_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            min_bytes: default_min_bytes(),
            max_bytes: default_max_bytes(),
            allowed_formats: default_allowed_formats(),
        }
    }
}

/// Logging settings
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Default level when neither RUST_LOG nor -v flags are given
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// How a target resumes after an interruption
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ResumeStrategy {
    /// Restart listing pagination from the recorded page
    #[default]
    Page,
    /// Skip items whose id falls inside the recorded min/max window
    IdRange,
}

/// One crawl target: a board or news section of a site
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct TargetConfig {
    /// Site host, e.g. "bbs.example.com"
    pub site: String,

    /// Board name within the site
    #[serde(default = "default_board")]
    pub board: String,

    /// Listing page URL template; `{page}` is replaced by the page number
    pub list_url: String,

    /// CSS selector matching image elements on a listing page
    #[serde(default = "default_image_selector")]
    pub image_selector: String,

    #[serde(default = "default_start_page")]
    pub start_page: u32,

    pub end_page: Option<u32>,

    #[serde(default)]
    pub resume_strategy: ResumeStrategy,

    /// Regex with one capture group extracting a numeric item id from an image URL
    pub item_id_pattern: Option<String>,
}

impl TargetConfig {
    /// Builds the listing URL for a page number
    pub fn page_url(&self, page: u32) -> String {
        self.list_url.replace("{page}", &page.to_string())
    }
}

fn default_initial_workers() -> usize {
    5
}

fn default_min_workers() -> usize {
    1
}

fn default_max_workers() -> usize {
    20
}

fn default_queue_capacity() -> usize {
    1000
}

fn default_max_attempts() -> u32 {
    3
}

fn default_adjust_interval() -> usize {
    20
}

fn default_window_size() -> usize {
    100
}

fn default_error_high_watermark() -> f64 {
    0.10
}

fn default_error_low_watermark() -> f64 {
    0.01
}

fn default_recent_seen_capacity() -> usize {
    500
}

fn default_save_attempts() -> u32 {
    3
}

fn default_save_backoff_ms() -> u64 {
    200
}

fn default_true() -> bool {
    true
}

fn default_near_duplicate_threshold() -> u32 {
    5
}

fn default_artifact_dir() -> PathBuf {
    PathBuf::from("./downloads")
}

fn default_user_agent() -> String {
    format!("board-harvest/{}", env!("CARGO_PKG_VERSION"))
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_min_bytes() -> usize {
    10 * 1024
}

fn default_max_bytes() -> usize {
    20 * 1024 * 1024
}

fn default_allowed_formats() -> Vec<String> {
    ["jpg", "jpeg", "png", "gif", "webp"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_board() -> String {
    "all".to_string()
}

fn default_image_selector() -> String {
    "img".to_string()
}

fn default_start_page() -> u32 {
    1
}
