//! Reconnect backoff.

use std::time::Duration;

use rand::Rng;

/// Exponential backoff with jitter for the reconnect loop. Each failed
/// connection attempt doubles the base delay up to the cap; a successful
/// connection resets it.
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

    /// The delay to sleep before the next attempt. Jittered by ±20% so a
    /// fleet of clients does not reconnect in lockstep.
    pub fn next_delay(&mut self) -> Duration {
        let base = self.current;
        self.current = (self.current * 2).min(self.max);

        let jitter = rand::thread_rng().gen_range(0.8..1.2);
        base.mul_f64(jitter)
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}
