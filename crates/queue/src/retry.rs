//! Redelivery policy: capped exponential backoff with jitter.

use std::time::Duration;

use anchornet_common::RetrySettings;
use rand::Rng;

/// Retry configuration for outbound delivery.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum delivery attempts per recipient.
    pub max_attempts: u32,
    /// Initial delay before the first redelivery.
    pub initial_interval: Duration,
    /// Multiplier applied per attempt.
    pub multiplier: f64,
    /// Delay ceiling.
    pub max_interval: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_interval: Duration::from_secs(1),
            multiplier: 1.5,
            max_interval: Duration::from_secs(60),
        }
    }
}

impl From<&RetrySettings> for RetryConfig {
    fn from(settings: &RetrySettings) -> Self {
        Self {
            max_attempts: settings.max_attempts,
            initial_interval: Duration::from_millis(settings.initial_interval_ms),
            multiplier: settings.multiplier,
            max_interval: Duration::from_millis(settings.max_interval_ms),
        }
    }
}

impl RetryConfig {
    /// Backoff before redelivering after the given 0-indexed failed attempt.
    ///
    /// The schedule is `initial * multiplier^attempt`, jittered by up to 20%
    /// either way and capped at `max_interval`.
    #[must_use]
    #[allow(clippy::cast_possible_wrap)]
    pub fn backoff(&self, attempt: u32) -> Duration {
        let base = self.initial_interval.as_secs_f64() * self.multiplier.powi(attempt as i32);
        let jittered = base * rand::thread_rng().gen_range(0.8..=1.2);
        let delay = Duration::from_secs_f64(jittered);

        delay.min(self.max_interval)
    }

    /// Whether another delivery may be attempted after `attempt` attempts.
    #[must_use]
    pub const fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}
