//! Reconnection policy applied on top of the push client.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// When to re-subscribe after a streaming connection closes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconnectPolicy {
    /// Delay before the first reconnect attempt
    pub initial_delay: Duration,
    /// Upper bound on the delay
    pub max_delay: Duration,
    /// Growth factor per consecutive failure; `1.0` gives a fixed interval
    pub multiplier: f64,
    /// Consecutive failed connections before discovery is run again
    pub rediscover_after: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::exponential(Duration::from_secs(1), Duration::from_secs(30))
    }
}

impl ReconnectPolicy {
    /// Retry at a constant interval.
    pub fn fixed(delay: Duration) -> Self {
        Self {
            initial_delay: delay,
            max_delay: delay,
            multiplier: 1.0,
            rediscover_after: 5,
        }
    }

    /// Double the delay on every consecutive failure, up to `max_delay`.
    pub fn exponential(initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            initial_delay,
            max_delay,
            multiplier: 2.0,
            rediscover_after: 5,
        }
    }

    pub fn with_rediscover_after(mut self, failures: u32) -> Self {
        self.rediscover_after = failures;
        self
    }

    /// Delay before reconnect attempt number `attempt` (starting at 1).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32) as i32;
        let factor = self.multiplier.max(1.0).powi(exponent);
        let delay = self.initial_delay.as_secs_f64() * factor;
        Duration::from_secs_f64(delay.min(self.max_delay.as_secs_f64()))
    }

    /// Whether `failures` consecutive failed connections call for a new discovery.
    pub fn should_rediscover(&self, failures: u32) -> bool {
        self.rediscover_after > 0 && failures >= self.rediscover_after
    }
}
