//! Adaptive concurrency control
//!
//! Every `adjust_interval` observed worker outcomes the controller looks at
//! the error rate of the rolling window and moves the worker count:
//!
//! | Error rate            | New worker count                   |
//! |-----------------------|------------------------------------|
//! | above high watermark  | `max(min, floor(current * 0.8))`   |
//! | below low watermark   | `min(max, ceil(current * 1.2))`    |
//! | otherwise             | unchanged                          |

use crate::config::SchedulerConfig;
use crate::state::{ConcurrencyState, OutcomeClass};
use tracing::info;

/// A change of the worker count
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Adjustment {
    pub from: usize,
    pub to: usize,
    pub error_rate: f64,

    /// Outcomes observed when the change was made
    pub observed: u64,
}

/// Adjusts the number of concurrent workers from the observed error rate
#[derive(Debug, Clone)]
pub struct AdaptiveConcurrencyController {
    state: ConcurrencyState,
    adjust_interval: usize,
    high_watermark: f64,
    low_watermark: f64,
}

impl AdaptiveConcurrencyController {
    pub fn new(options: &SchedulerConfig) -> Self {
        Self {
            state: ConcurrencyState::new(
                options.initial_workers,
                options.min_workers,
                options.max_workers,
                options.window_size,
            ),
            adjust_interval: options.adjust_interval.max(1),
            high_watermark: options.error_high_watermark,
            low_watermark: options.error_low_watermark,
        }
    }

    pub fn current_workers(&self) -> usize {
        self.state.current_workers
    }

    pub fn error_rate(&self) -> f64 {
        self.state.error_rate()
    }

    /// Records one worker outcome; returns the adjustment it triggered, if any
    pub fn observe(&mut self, class: OutcomeClass) -> Option<Adjustment> {
        self.state.record(class);

        if self.state.since_adjustment < self.adjust_interval {
            return None;
        }
        self.state.since_adjustment = 0;

        let rate = self.state.error_rate();
        let current = self.state.current_workers;
        let target = if rate > self.high_watermark {
            current * 4 / 5
        } else if rate < self.low_watermark {
            (current * 6 + 4) / 5
        } else {
            current
        };

        let applied = self.state.set_workers(target);
        if applied == current {
            return None;
        }

        info!(
            "Adjusting workers {} -> {} (error rate {:.1}%)",
            current,
            applied,
            rate * 100.0
        );

        Some(Adjustment {
            from: current,
            to: applied,
            error_rate: rate,
            observed: self.state.observed,
        })
    }
}
