//! Retry policy with exponential backoff for outbound sends

use std::time::Duration;

use rand::Rng;

use crate::config::QueueSettings;

/// Decides whether a failed send is retried and how long to wait first.
///
/// `attempts` is always the number of send attempts already made for the
/// message, counting the one that just failed. The policy is stateless: the
/// same input always yields the same decision, and with `jitter_factor == 0.0`
/// the same delay.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total send attempts allowed before giving up
    pub max_attempts: u32,
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Multiplier for exponential growth
    pub multiplier: f64,
    /// Upper bound for any single delay
    pub max_delay: Duration,
    /// Jitter factor (0.0 to 1.0)
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(200),
            multiplier: 2.0,
            max_delay: Duration::from_secs(5),
            jitter_factor: 0.0,
        }
    }
}

impl RetryPolicy {
    /// Whether another attempt is allowed after `attempts` failed attempts
    pub fn should_retry(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }

    /// Delay to wait before the attempt that follows `attempts` failed ones.
    ///
    /// 200ms, 400ms, 800ms, ... with the default settings, capped at `max_delay`.
    pub fn delay_before(&self, attempts: u32) -> Duration {
        let exponent = attempts.saturating_sub(1).min(32) as i32;
        let base_ms = self.base_delay.as_millis() as f64;
        let max_ms = self.max_delay.as_millis() as f64;
        let capped = (base_ms * self.multiplier.powi(exponent)).min(max_ms);

        // Apply jitter only if jitter_factor > 0
        let final_ms = if self.jitter_factor > 0.0 && capped > 0.0 {
            let jitter_range = capped * self.jitter_factor;
            let jitter = rand::rng().random_range(-jitter_range..=jitter_range);
            (capped + jitter).clamp(0.0, max_ms)
        } else {
            capped
        };

        Duration::from_millis(final_ms as u64)
    }
}

impl From<&QueueSettings> for RetryPolicy {
    fn from(settings: &QueueSettings) -> Self {
        Self {
            max_attempts: settings.max_attempts,
            base_delay: Duration::from_millis(settings.base_delay_ms),
            multiplier: settings.backoff_multiplier,
            max_delay: Duration::from_millis(settings.max_delay_ms),
            jitter_factor: settings.jitter_factor,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_retry_stops_at_max_attempts() {
        let policy = RetryPolicy::default();

        assert!(policy.should_retry(0));
        assert!(policy.should_retry(1));
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));
        assert!(!policy.should_retry(4));
    }

    #[test]
    fn test_delay_grows_exponentially() {
        let policy = RetryPolicy::default();

        assert_eq!(policy.delay_before(1), Duration::from_millis(200));
        assert_eq!(policy.delay_before(2), Duration::from_millis(400));
        assert_eq!(policy.delay_before(3), Duration::from_millis(800));
    }

    #[test]
    fn test_delay_caps_at_max() {
        let policy = RetryPolicy {
            max_attempts: 20,
            base_delay: Duration::from_millis(1000),
            multiplier: 10.0,
            max_delay: Duration::from_millis(5000),
            jitter_factor: 0.0,
        };

        assert_eq!(policy.delay_before(10), Duration::from_millis(5000));
        assert_eq!(policy.delay_before(u32::MAX), Duration::from_millis(5000));
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let policy = RetryPolicy {
            jitter_factor: 0.5,
            ..Default::default()
        };

        for _ in 0..100 {
            let delay = policy.delay_before(2);
            assert!(delay >= Duration::from_millis(200));
            assert!(delay <= Duration::from_millis(600));
        }
    }

    #[test]
    fn test_from_settings() {
        let settings = QueueSettings {
            max_attempts: 5,
            base_delay_ms: 50,
            backoff_multiplier: 3.0,
            max_delay_ms: 1000,
            jitter_factor: 0.0,
            send_timeout_ms: 1000,
        };
        let policy = RetryPolicy::from(&settings);

        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.delay_before(1), Duration::from_millis(50));
        assert_eq!(policy.delay_before(2), Duration::from_millis(150));
        assert_eq!(policy.delay_before(4), Duration::from_millis(1000));
    }
}
