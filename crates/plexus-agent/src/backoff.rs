//! Exponential backoff with a maximum delay.
//!
//! The client does not reconnect by itself; a caller-side reconnect driver
//! pairs this with [`AgentClient::on_disconnect`](crate::AgentClient::on_disconnect).

use std::time::Duration;

/// Stateful delay generator for reconnect schedulers.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            current: initial,
        }
    }

    /// Return the current delay, then double it (capped at the max).
    pub fn next(&mut self) -> Duration {
        let delay = self.current.min(self.max);
        self.current = (self.current * 2).min(self.max);
        delay
    }

    /// Restore the initial delay, e.g. after a successful reconnect.
    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}
