//! # Backoff Schedules
//!
//! One bounded-retry vocabulary shared by the components that wait on the
//! outside world: the evaluation notifier (exponential) and the readiness
//! poller (fixed interval). The push force-retry is a single conditional
//! escalation, not a loop, and stays in [`crate::vcs`].

use std::time::Duration;

/// An endless schedule of sleep durations. Bound it with the caller's attempt
/// budget or deadline.
#[derive(Debug, Clone)]
pub struct Backoff {
    next: Duration,
    factor: u32,
}

impl Backoff {
    /// Doubling schedule: `initial, 2*initial, 4*initial, ...`
    pub fn exponential(initial: Duration) -> Self {
        Self {
            next: initial,
            factor: 2,
        }
    }

    /// Constant schedule: `interval, interval, ...`
    pub fn fixed(interval: Duration) -> Self {
        Self {
            next: interval,
            factor: 1,
        }
    }
}

impl Iterator for Backoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        let current = self.next;
        self.next = current.saturating_mul(self.factor);
        Some(current)
    }
}
