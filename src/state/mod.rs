//! State module for tracking crawl progress
//!
//! # Components
//!
//! - `RunStatus`: lifecycle of a crawl target's checkpoint (running, completed, error)
//! - `ConcurrencyState`: current worker count and rolling outcome window for one run

mod concurrency;
mod run_status;

// Re-export main types
pub use concurrency::{ConcurrencyState, OutcomeClass};
pub use run_status::RunStatus;
