//! Reconnect Policy
//!
//! Exponential backoff with jitter between chart session attempts. A policy
//! belongs to one subscriber's supervisor and is reset whenever a session
//! reaches streaming.

use std::time::Duration;

use rand::Rng;

use crate::infrastructure::config::ReconnectSettings;

/// Backoff parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectConfig {
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound for any delay before jitter.
    pub max_delay: Duration,
    /// Growth factor per attempt.
    pub multiplier: f64,
    /// Jitter as a fraction of the delay (0.1 = ±10%).
    pub jitter_factor: f64,
    /// Retries allowed in a row (0 = unlimited).
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            multiplier: 2.0,
            jitter_factor: 0.1,
            max_attempts: 5,
        }
    }
}

impl ReconnectConfig {
    /// Build from relay settings, with the default jitter.
    #[must_use]
    pub fn from_settings(settings: &ReconnectSettings) -> Self {
        Self {
            initial_delay: settings.delay_initial,
            max_delay: settings.delay_max,
            multiplier: settings.delay_multiplier,
            max_attempts: settings.max_attempts,
            ..Self::default()
        }
    }
}

/// Backoff state for consecutive failed attempts.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    config: ReconnectConfig,
    attempts: u32,
}

impl ReconnectPolicy {
    /// Create a policy with no failed attempts.
    #[must_use]
    pub const fn new(config: ReconnectConfig) -> Self {
        Self {
            config,
            attempts: 0,
        }
    }

    /// Delay before the next attempt, or `None` once attempts are exhausted.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.exhausted() {
            return None;
        }
        let base = self.base_delay(self.attempts);
        self.attempts += 1;
        Some(self.jitter(base))
    }

    /// Forget previous failures.
    pub const fn reset(&mut self) {
        self.attempts = 0;
    }

    /// Failed attempts since the last reset.
    #[must_use]
    pub const fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Whether the attempt budget is used up.
    #[must_use]
    pub const fn exhausted(&self) -> bool {
        self.config.max_attempts != 0 && self.attempts >= self.config.max_attempts
    }

    /// `initial * multiplier^attempt`, capped at `max_delay`.
    fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let factor = self.config.multiplier.max(1.0).powi(exponent);
        let secs = self.config.initial_delay.as_secs_f64() * factor;

        if !secs.is_finite() || secs >= self.config.max_delay.as_secs_f64() {
            return self.config.max_delay;
        }
        Duration::from_secs_f64(secs)
    }

    fn jitter(&self, delay: Duration) -> Duration {
        let factor = self.config.jitter_factor;
        if factor <= 0.0 || delay.is_zero() {
            return delay;
        }
        let spread = rand::rng().random_range(-factor..=factor);
        delay.mul_f64((1.0 + spread).max(0.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(initial_ms: u64, max_ms: u64, multiplier: f64, max_attempts: u32) -> ReconnectConfig {
        ReconnectConfig {
            initial_delay: Duration::from_millis(initial_ms),
            max_delay: Duration::from_millis(max_ms),
            multiplier,
            jitter_factor: 0.0,
            max_attempts,
        }
    }

    #[test]
    fn delays_grow_exponentially() {
        let mut policy = ReconnectPolicy::new(config(100, 10_000, 2.0, 0));
        let delays: Vec<_> = (0..4).filter_map(|_| policy.next_delay()).collect();
        assert_eq!(
            delays,
            [100, 200, 400, 800].map(Duration::from_millis).to_vec()
        );
    }

    #[test]
    fn delays_are_capped() {
        let mut policy = ReconnectPolicy::new(config(1000, 2500, 4.0, 0));
        assert_eq!(policy.next_delay(), Some(Duration::from_millis(1000)));
        assert_eq!(policy.next_delay(), Some(Duration::from_millis(2500)));
        assert_eq!(policy.next_delay(), Some(Duration::from_millis(2500)));
    }

    #[test]
    fn attempts_are_bounded() {
        let mut policy = ReconnectPolicy::new(config(10, 100, 2.0, 2));
        assert!(policy.next_delay().is_some());
        assert!(policy.next_delay().is_some());
        assert!(policy.exhausted());
        assert_eq!(policy.next_delay(), None);
        assert_eq!(policy.attempts(), 2);
    }

    #[test]
    fn reset_restarts_from_initial_delay() {
        let mut policy = ReconnectPolicy::new(config(50, 1000, 3.0, 3));
        let _ = policy.next_delay();
        let _ = policy.next_delay();
        policy.reset();

        assert_eq!(policy.attempts(), 0);
        assert!(!policy.exhausted());
        assert_eq!(policy.next_delay(), Some(Duration::from_millis(50)));
    }

    #[test]
    fn jitter_stays_within_factor() {
        for _ in 0..200 {
            let mut policy = ReconnectPolicy::new(ReconnectConfig {
                jitter_factor: 0.1,
                ..config(1000, 60_000, 2.0, 0)
            });
            let millis = policy.next_delay().unwrap().as_millis();
            assert!((900..=1100).contains(&millis), "delay {millis}ms out of range");
        }
    }

    #[test]
    fn settings_map_onto_config() {
        let settings = ReconnectSettings {
            delay_initial: Duration::from_millis(250),
            delay_max: Duration::from_secs(30),
            delay_multiplier: 1.5,
            max_attempts: 7,
        };
        let config = ReconnectConfig::from_settings(&settings);
        assert_eq!(config.initial_delay, Duration::from_millis(250));
        assert_eq!(config.max_delay, Duration::from_secs(30));
        assert_eq!(config.max_attempts, 7);
        assert!((config.jitter_factor - 0.1).abs() < f64::EPSILON);
    }
}
