//! Units of work and their outcomes

use crate::dedup::DuplicateTier;
use crate::ledger::CheckpointUpdate;
use crate::state::OutcomeClass;
use std::fmt;

/// Stable identity of a task: a URL or another content identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskKey(String);

impl TaskKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TaskKey {
    fn from(key: &str) -> Self {
        Self(key.to_string())
    }
}

impl From<String> for TaskKey {
    fn from(key: String) -> Self {
        Self(key)
    }
}

/// One unit of work flowing through the scheduler
#[derive(Debug, Clone)]
pub struct Task<P> {
    pub key: TaskKey,
    pub payload: P,

    /// Worker invocations so far; the worker sees 1 on its first attempt
    pub attempts: u32,

    /// Hint carried for callers; the queue itself is FIFO
    pub priority: i32,
}

impl<P> Task<P> {
    pub fn new(key: impl Into<TaskKey>, payload: P) -> Self {
        Self {
            key: key.into(),
            payload,
            attempts: 0,
            priority: 0,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

/// Why a task failed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// Network-level failure (timeout, refused connection, reset)
    Network(String),

    /// Non-success HTTP status
    HttpStatus(u16),

    /// The resource does not exist
    NotFound,

    /// Content outside the accepted size bounds
    SizeOutOfBounds { len: usize, min: usize, max: usize },

    /// Content of a format that is not accepted
    UnsupportedFormat(String),

    /// Content that could not be used for another reason
    InvalidContent(String),

    /// Transient failures on every allowed attempt
    MaxAttemptsExceeded { attempts: u32, last: Box<FailureReason> },

    /// The worker panicked; the payload message if it had one
    WorkerPanicked(String),

    Other(String),
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::Network(msg) => write!(f, "network error: {}", msg),
            FailureReason::HttpStatus(code) => write!(f, "HTTP {}", code),
            FailureReason::NotFound => write!(f, "not found"),
            FailureReason::SizeOutOfBounds { len, min, max } => {
                write!(f, "size {} bytes outside [{}, {}]", len, min, max)
            }
            FailureReason::UnsupportedFormat(format) => write!(f, "unsupported format '{}'", format),
            FailureReason::InvalidContent(msg) => write!(f, "invalid content: {}", msg),
            FailureReason::MaxAttemptsExceeded { attempts, last } => {
                write!(f, "gave up after {} attempts ({})", attempts, last)
            }
            FailureReason::WorkerPanicked(msg) => write!(f, "worker panicked: {}", msg),
            FailureReason::Other(msg) => f.write_str(msg),
        }
    }
}

/// Why a task was recognised as already done
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DuplicateReason {
    /// Hit in the recent-seen cache carried by the checkpoint
    RecentlySeen,

    /// The result store already holds the task key
    AlreadyStored,

    /// The normalized URL was seen before
    Url,

    /// Byte-identical content was stored before
    Content,

    /// Perceptually similar content was stored before
    NearDuplicate { distance: u32, original: String },

    /// Reported by the worker itself
    Other(String),
}

impl From<DuplicateTier> for DuplicateReason {
    fn from(tier: DuplicateTier) -> Self {
        match tier {
            DuplicateTier::Url => DuplicateReason::Url,
            DuplicateTier::Content => DuplicateReason::Content,
            DuplicateTier::NearDuplicate { distance, original } => {
                DuplicateReason::NearDuplicate { distance, original }
            }
        }
    }
}

impl fmt::Display for DuplicateReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DuplicateReason::RecentlySeen => write!(f, "recently seen"),
            DuplicateReason::AlreadyStored => write!(f, "already stored"),
            DuplicateReason::Url => write!(f, "duplicate url"),
            DuplicateReason::Content => write!(f, "duplicate content"),
            DuplicateReason::NearDuplicate { distance, original } => {
                write!(f, "near-duplicate of {} (distance {})", original, distance)
            }
            DuplicateReason::Other(msg) => f.write_str(msg),
        }
    }
}

/// Result of processing one task
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<T> {
    Success(T),

    /// Worth retrying; the scheduler requeues until the attempt budget is spent
    TransientFailure(FailureReason),

    /// Terminal failure
    PermanentFailure(FailureReason),

    /// Nothing new to do
    Duplicate(DuplicateReason),
}

impl<T> Outcome<T> {
    /// How the outcome counts toward the error rate
    pub fn class(&self) -> OutcomeClass {
        match self {
            Outcome::Success(_) => OutcomeClass::Ok,
            Outcome::TransientFailure(_) | Outcome::PermanentFailure(_) => OutcomeClass::Failed,
            Outcome::Duplicate(_) => OutcomeClass::Neutral,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(_))
    }
}

/// An item of the task stream handed to the scheduler
#[derive(Debug, Clone)]
pub enum Feed<P> {
    Task(Task<P>),

    /// Checkpoint to persist once every task fed before it is terminal
    Progress(CheckpointUpdate),
}

impl<P> From<Task<P>> for Feed<P> {
    fn from(task: Task<P>) -> Self {
        Feed::Task(task)
    }
}

/// A successful result the scheduler can deduplicate and store
///
/// Results without content (plain acknowledgements) are recorded by key only.
pub trait Artifact: Send + 'static {
    /// Raw bytes to run through the content tiers and keep
    fn content(&self) -> Option<&[u8]> {
        None
    }

    /// File extension to store the content under
    fn extension(&self) -> &str {
        "bin"
    }
}

impl Artifact for () {}

impl Artifact for Vec<u8> {
    fn content(&self) -> Option<&[u8]> {
        Some(self)
    }
}
