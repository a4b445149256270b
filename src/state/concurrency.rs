use std::collections::VecDeque;

/// Coarse classification of a worker invocation, as seen by the error-rate window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeClass {
    /// The invocation produced a usable result
    Ok,

    /// The invocation failed (transiently or permanently)
    Failed,

    /// The invocation found nothing new; neither success nor error
    Neutral,
}

/// Tracks the adaptive concurrency level for one scheduler run
///
/// This is never persisted: a resumed crawl starts again from the configured
/// initial worker count and only inherits its position from the ledger.
#[derive(Debug, Clone)]
pub struct ConcurrencyState {
    /// Number of workers currently allowed to pull from the queue
    pub current_workers: usize,

    /// Lower bound on `current_workers`
    pub min_workers: usize,

    /// Upper bound on `current_workers`
    pub max_workers: usize,

    /// Most recent outcomes, oldest first
    window: VecDeque<OutcomeClass>,

    /// Capacity of `window`
    window_size: usize,

    /// Outcomes observed since the last adjustment point
    pub since_adjustment: usize,

    /// Total outcomes observed in this run
    pub observed: u64,
}

impl ConcurrencyState {
    /// Creates a state starting at `initial`, clamped into `[min, max]`
    pub fn new(initial: usize, min_workers: usize, max_workers: usize, window_size: usize) -> Self {
        let min_workers = min_workers.max(1);
        let max_workers = max_workers.max(min_workers);

        Self {
            current_workers: initial.clamp(min_workers, max_workers),
            min_workers,
            max_workers,
            window: VecDeque::with_capacity(window_size.max(1)),
            window_size: window_size.max(1),
            since_adjustment: 0,
            observed: 0,
        }
    }

    /// Records one outcome in the rolling window
    pub fn record(&mut self, class: OutcomeClass) {
        if self.window.len() == self.window_size {
            self.window.pop_front();
        }
        self.window.push_back(class);
        self.since_adjustment += 1;
        self.observed += 1;
    }

    /// Fraction of failed outcomes in the rolling window
    pub fn error_rate(&self) -> f64 {
        if self.window.is_empty() {
            return 0.0;
        }

        let failed = self
            .window
            .iter()
            .filter(|c| **c == OutcomeClass::Failed)
            .count();
        failed as f64 / self.window.len() as f64
    }

    /// Number of outcomes currently held in the window
    pub fn window_len(&self) -> usize {
        self.window.len()
    }

    /// Sets the worker count, clamped to the configured bounds
    ///
    /// Returns the value actually applied.
    pub fn set_workers(&mut self, workers: usize) -> usize {
        self.current_workers = workers.clamp(self.min_workers, self.max_workers);
        self.since_adjustment = 0;
        self.current_workers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_clamps_initial() {
        let state = ConcurrencyState::new(50, 2, 10, 20);
        assert_eq!(state.current_workers, 10);

        let state = ConcurrencyState::new(0, 2, 10, 20);
        assert_eq!(state.current_workers, 2);
    }

    #[test]
    fn test_error_rate_empty_window() {
        let state = ConcurrencyState::new(5, 1, 10, 20);
        assert_eq!(state.error_rate(), 0.0);
    }

    #[test]
    fn test_error_rate_counts_failures_only() {
        let mut state = ConcurrencyState::new(5, 1, 10, 20);
        state.record(OutcomeClass::Ok);
        state.record(OutcomeClass::Failed);
        state.record(OutcomeClass::Neutral);
        state.record(OutcomeClass::Failed);

        assert!((state.error_rate() - 0.5).abs() < f64::EPSILON);
        assert_eq!(state.since_adjustment, 4);
        assert_eq!(state.observed, 4);
    }

    #[test]
    fn test_window_is_rolling() {
        let mut state = ConcurrencyState::new(5, 1, 10, 4);
        for _ in 0..4 {
            state.record(OutcomeClass::Failed);
        }
        for _ in 0..4 {
            state.record(OutcomeClass::Ok);
        }

        assert_eq!(state.window_len(), 4);
        assert_eq!(state.error_rate(), 0.0);
    }

    #[test]
    fn test_set_workers_clamps_and_resets_counter() {
        let mut state = ConcurrencyState::new(5, 2, 8, 10);
        state.record(OutcomeClass::Ok);

        assert_eq!(state.set_workers(100), 8);
        assert_eq!(state.set_workers(0), 2);
        assert_eq!(state.since_adjustment, 0);
    }
}
