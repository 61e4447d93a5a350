//! Bounded exponential backoff for port binding

use std::time::Duration;

use jm_core::config::BackoffConfig;

/// Exponential backoff with jitter and a limit on attempts
pub struct ExponentialBackoff {
    current: Duration,
    max: Duration,
    multiplier: f64,
    jitter: f64,
    attempts: u32,
    max_attempts: u32,
}

impl ExponentialBackoff {
    /// Backoff from configuration, allowing `max_attempts` retries
    pub fn from_config(config: &BackoffConfig, max_attempts: u32) -> Self {
        Self::new(
            config.initial,
            config.max,
            config.multiplier,
            config.jitter,
            max_attempts,
        )
    }

    /// Backoff with explicit parameters
    pub fn new(
        initial: Duration,
        max: Duration,
        multiplier: f64,
        jitter: f64,
        max_attempts: u32,
    ) -> Self {
        Self {
            current: initial,
            max,
            multiplier,
            jitter,
            attempts: 0,
            max_attempts,
        }
    }

    /// Delay before the next attempt, `None` once attempts are exhausted
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempts >= self.max_attempts {
            return None;
        }
        self.attempts += 1;

        let delay = self.current;
        let next = Duration::from_secs_f64(self.current.as_secs_f64() * self.multiplier);
        self.current = std::cmp::min(next, self.max);

        let jitter_amount = delay.as_secs_f64() * self.jitter * rand::random::<f64>();
        Some(delay + Duration::from_secs_f64(jitter_amount))
    }

    /// Attempts handed out so far
    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}
