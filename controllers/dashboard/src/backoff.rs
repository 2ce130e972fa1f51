//! Retry delays for failed reconcile requests.
//!
//! The worker keeps one [`FibonacciBackoff`] per request key, so a namespace
//! whose listing keeps failing backs off on its own while other namespaces
//! are still retried at the shortest delay. A `Done` directive resets the
//! key. Delays run 1s, 1s, 2s, 3s, 5s and so on, capped at 300s.

use std::time::Duration;

/// First retry delay, in seconds
pub const DEFAULT_MIN_SECONDS: u64 = 1;
/// Longest retry delay, in seconds
pub const DEFAULT_MAX_SECONDS: u64 = 300;

/// Delays that follow the Fibonacci sequence up to a cap
#[derive(Debug, Clone)]
pub struct FibonacciBackoff {
    floor: u64,
    cap: u64,
    /// The two most recent steps; the next delay is `steps.1`
    steps: (u64, u64),
}

impl Default for FibonacciBackoff {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_SECONDS, DEFAULT_MAX_SECONDS)
    }
}

impl FibonacciBackoff {
    /// Sequence starting at `floor` seconds (twice) and never exceeding `cap`.
    #[must_use]
    pub fn new(floor: u64, cap: u64) -> Self {
        Self {
            floor,
            cap,
            steps: (0, floor),
        }
    }

    /// Delay for the next retry of this key.
    pub fn next_backoff(&mut self) -> Duration {
        let (prev, current) = self.steps;
        self.steps = (current, prev.saturating_add(current).min(self.cap));
        Duration::from_secs(current)
    }

    pub fn reset(&mut self) {
        self.steps = (0, self.floor);
    }
}
