//! Retry delay schedule.

use rand::Rng;
use std::time::Duration;

/// Default upper bound of the multiplicative jitter factor.
pub const DEFAULT_JITTER: f64 = 0.1;

/// Doubling delay schedule keyed by zero-based attempt number.
///
/// Attempt `n` waits `initial * 2^n`, clamped to `max`, then stretched by a random
/// factor in `[1, 1 + jitter)` so concurrent callers do not retry in lockstep.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    jitter: f64,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max: max.max(initial),
            jitter: DEFAULT_JITTER,
        }
    }

    /// Replace the jitter fraction; `0.0` makes the schedule deterministic.
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.max(0.0);
        self
    }

    pub fn with_max(mut self, max: Duration) -> Self {
        self.max = max.max(self.initial);
        self
    }

    pub fn initial(&self) -> Duration {
        self.initial
    }

    pub fn max(&self) -> Duration {
        self.max
    }

    /// Deterministic part of the wait before retry `attempt` (zero-based).
    pub fn base_delay(&self, attempt: u32) -> Duration {
        2u32.checked_pow(attempt)
            .and_then(|factor| self.initial.checked_mul(factor))
            .map_or(self.max, |delay| delay.min(self.max))
    }

    /// Wait before retry `attempt` (zero-based), jitter included.
    pub fn delay(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt);
        if self.jitter == 0.0 || base.is_zero() {
            return base;
        }
        let stretch = rand::thread_rng().gen_range(0.0..self.jitter);
        base.mul_f64(1.0 + stretch)
    }
}
