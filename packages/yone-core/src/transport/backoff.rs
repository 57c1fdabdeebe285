//! Capped exponential backoff with full jitter.

use std::time::Duration;

use rand::Rng;

use crate::state::TransportConfig;

/// Produces reconnect delays: attempt `n` waits a random time in
/// `[0, base * 2^min(n, max_exponent)]`.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    base_ms: u64,
    max_exponent: u32,
    exponent: u32,
}

impl ExponentialBackoff {
    pub fn new(base_ms: u64, max_exponent: u32) -> Self {
        Self {
            base_ms: base_ms.max(1),
            max_exponent,
            exponent: 0,
        }
    }

    pub fn from_config(config: &TransportConfig) -> Self {
        Self::new(config.backoff_base_ms, config.backoff_max_exponent)
    }

    /// Upper bound of the next delay, without advancing.
    pub fn current_cap(&self) -> Duration {
        Duration::from_millis(self.base_ms.saturating_mul(1u64 << self.exponent))
    }

    /// Returns the next delay using the thread-local RNG.
    pub fn next_delay(&mut self) -> Duration {
        self.next_delay_with(&mut rand::thread_rng())
    }

    /// Returns the next delay drawn from `rng` and grows the cap.
    pub fn next_delay_with<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Duration {
        let cap = self.current_cap().as_millis() as u64;
        if self.exponent < self.max_exponent {
            self.exponent += 1;
        }
        Duration::from_millis(rng.gen_range(0..=cap))
    }

    /// Starts over from the base delay.
    pub fn reset(&mut self) {
        self.exponent = 0;
    }
}
