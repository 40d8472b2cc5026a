//! Exponential backoff with jitter for polling loops.

use std::time::Duration;

use rand::Rng;

/// Delay schedule for one polling loop: `base * 2^n`, capped at `max`,
/// plus up to 10% jitter.
#[derive(Debug, Clone)]
pub struct Backoff {
    base_ms: u64,
    max_ms: u64,
    attempt: u32,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base_ms: base.as_millis() as u64,
            max_ms: max.as_millis().max(base.as_millis()) as u64,
            attempt: 0,
        }
    }

    /// Number of delays handed out so far.
    pub fn attempts(&self) -> u32 {
        self.attempt
    }

    pub fn next_delay(&mut self) -> Duration {
        let exponent = self.attempt.min(32);
        self.attempt = self.attempt.saturating_add(1);

        let capped = self
            .base_ms
            .saturating_mul(2u64.saturating_pow(exponent))
            .min(self.max_ms);
        let jitter_range = capped / 10;
        let jitter = if jitter_range > 0 {
            rand::thread_rng().gen_range(0..jitter_range)
        } else {
            0
        };

        Duration::from_millis(capped + jitter)
    }

    /// Next delay, never longer than the time left before a deadline.
    pub fn next_within(&mut self, remaining: Duration) -> Duration {
        self.next_delay().min(remaining)
    }
}
