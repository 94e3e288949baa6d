//! Timed refresh gates.

use std::time::{Duration, Instant};

/// A gate that opens once per interval.
///
/// The gate starts open (a fresh component should do its first refresh
/// immediately) and only advances when the task it guards actually
/// succeeded, so failed refreshes are retried on the next tick.
#[derive(Debug, Clone)]
pub struct TimedGate {
    interval: Duration,
    last_fired: Option<Instant>,
}

impl TimedGate {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_fired: None,
        }
    }

    /// Whether the guarded task should run now.
    pub fn is_open(&self) -> bool {
        match self.last_fired {
            None => true,
            Some(at) => at.elapsed() >= self.interval,
        }
    }

    /// Record a successful run, closing the gate for one interval.
    pub fn mark_fired(&mut self) {
        self.last_fired = Some(Instant::now());
    }

    /// Re-open the gate immediately (e.g. after a reset).
    pub fn reset(&mut self) {
        self.last_fired = None;
    }
}
