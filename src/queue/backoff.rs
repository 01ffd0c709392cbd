//! Exponential backoff calculation
//!
//! Delays grow as `initial * multiplier^retry`, are capped at a maximum and
//! can optionally be spread with jitter.

use rand::Rng;
use std::time::Duration;

use crate::config::QueueConfig;

/// Exponential backoff policy
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    initial: Duration,
    multiplier: f64,
    max: Duration,
    jitter: bool,
}

impl BackoffPolicy {
    /// Create a policy without jitter
    pub fn new(initial: Duration, multiplier: f64, max: Duration) -> Self {
        Self {
            initial,
            multiplier,
            max,
            jitter: false,
        }
    }

    /// Build the policy described by a queue configuration
    pub fn from_config(config: &QueueConfig) -> Self {
        Self::new(
            Duration::from_millis(config.initial_backoff_ms),
            config.backoff_multiplier,
            Duration::from_millis(config.max_backoff_ms),
        )
        .with_jitter(config.jitter)
    }

    /// Enable or disable jitter
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Delay before the retry that follows `retry` earlier retries
    ///
    /// `retry` is zero for the first retry, so with the defaults the sequence
    /// is 1s, 2s, 4s. With jitter the delay is 50-100% of the computed value.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let base = self.initial.as_secs_f64() * self.multiplier.powi(retry as i32);
        let capped = base.min(self.max.as_secs_f64());

        let delay = if self.jitter {
            let jitter = rand::thread_rng().gen_range(0.5..1.0);
            capped * jitter
        } else {
            capped
        };

        Duration::from_secs_f64(delay)
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::from_config(&QueueConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_sequence_doubles_from_one_second() {
        let policy = BackoffPolicy::default();

        assert_eq!(policy.delay_for(0), Duration::from_millis(1000));
        assert_eq!(policy.delay_for(1), Duration::from_millis(2000));
        assert_eq!(policy.delay_for(2), Duration::from_millis(4000));
        assert_eq!(policy.delay_for(3), Duration::from_millis(8000));
    }

    #[test]
    fn test_backoff_capped_at_max() {
        let policy = BackoffPolicy::new(Duration::from_secs(10), 2.0, Duration::from_secs(60));

        // 10 * 2^5 = 320, capped at 60
        assert_eq!(policy.delay_for(5), Duration::from_secs(60));
        assert_eq!(policy.delay_for(30), Duration::from_secs(60));
    }

    #[test]
    fn test_jitter_within_range() {
        let policy = BackoffPolicy::new(Duration::from_secs(10), 2.0, Duration::from_secs(300))
            .with_jitter(true);

        for _ in 0..100 {
            let backoff = policy.delay_for(0);
            assert!(
                backoff >= Duration::from_secs(5) && backoff <= Duration::from_secs(10),
                "Backoff {:?} should be between 5-10 seconds",
                backoff
            );
        }
    }

    #[test]
    fn test_from_config_uses_queue_settings() {
        let config = QueueConfig {
            initial_backoff_ms: 250,
            backoff_multiplier: 3.0,
            max_backoff_ms: 2000,
            ..QueueConfig::default()
        };
        let policy = BackoffPolicy::from_config(&config);

        assert_eq!(policy.delay_for(0), Duration::from_millis(250));
        assert_eq!(policy.delay_for(1), Duration::from_millis(750));
        assert_eq!(policy.delay_for(2), Duration::from_millis(2000));
    }
}
