//! Retry policy for gateway calls.
//!
//! Attempts are spaced by exponential backoff. A rate-limit response that
//! carries `Retry-After` replaces the backoff value for that wait only. The
//! sleep itself goes through [`Sleeper`] so tests can observe delays without
//! waiting for them.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Largest accepted `max_delay_secs` (one day).
pub const MAX_DELAY_LIMIT_SECS: f64 = 86_400.0;

/// Retry settings, deserializable from the `[retry]` config section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts per call, including the first one.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub base_delay_secs: f64,
    /// Growth factor applied per further attempt.
    pub multiplier: f64,
    /// Upper bound for a computed backoff delay.
    pub max_delay_secs: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_secs: 5.0,
            multiplier: 2.0,
            max_delay_secs: 120.0,
        }
    }
}

impl RetryPolicy {
    /// Policy that never waits; used in tests and dry runs.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay_secs: 0.0,
            multiplier: 1.0,
            max_delay_secs: 0.0,
        }
    }

    /// Backoff before attempt `failed_attempt + 1`, where `failed_attempt`
    /// is the 1-based number of the attempt that just failed.
    ///
    /// Values too large for a [`Duration`] saturate to [`Duration::MAX`].
    pub fn backoff(&self, failed_attempt: u32) -> Duration {
        let exponent = i32::try_from(failed_attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let secs = self.base_delay_secs * self.multiplier.powi(exponent);
        // `max` maps NaN to zero.
        let secs = secs.min(self.max_delay_secs).max(0.0);
        Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
    }

    /// Reject values [`RetryPolicy::backoff`] cannot turn into a sane delay.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_attempts == 0 {
            return Err("retry.max_attempts must be at least 1".to_string());
        }
        for (key, value) in [
            ("base_delay_secs", self.base_delay_secs),
            ("multiplier", self.multiplier),
            ("max_delay_secs", self.max_delay_secs),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(format!(
                    "retry.{} must be a finite, non-negative number (got {})",
                    key, value
                ));
            }
        }
        if self.max_delay_secs > MAX_DELAY_LIMIT_SECS {
            return Err(format!(
                "retry.max_delay_secs must not exceed {} (got {})",
                MAX_DELAY_LIMIT_SECS, self.max_delay_secs
            ));
        }
        Ok(())
    }

    /// Wait before the next attempt. A server-supplied `retry_after` wins
    /// over the computed backoff.
    pub fn delay(&self, failed_attempt: u32, retry_after: Option<Duration>) -> Duration {
        retry_after.unwrap_or_else(|| self.backoff(failed_attempt))
    }

    /// Whether another attempt is allowed after `failed_attempt`.
    pub fn allows_retry(&self, failed_attempt: u32) -> bool {
        failed_attempt < self.max_attempts
    }
}

/// Abstraction over `tokio::time::sleep`.
#[async_trait::async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Real sleeper backed by the tokio timer.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSleeper;

#[async_trait::async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_backoff_doubles() {
        let policy = RetryPolicy::default();
        let delays: Vec<u64> = (1..5).map(|a| policy.backoff(a).as_secs()).collect();
        assert_eq!(delays, vec![5, 10, 20, 40]);
    }

    #[test]
    fn test_backoff_is_capped() {
        let policy = RetryPolicy {
            max_delay_secs: 15.0,
            ..Default::default()
        };
        assert_eq!(policy.backoff(3), Duration::from_secs(15));
        assert_eq!(policy.backoff(10), Duration::from_secs(15));
    }

    #[test]
    fn test_retry_after_overrides_backoff() {
        let policy = RetryPolicy::default();
        assert_eq!(
            policy.delay(3, Some(Duration::from_secs(2))),
            Duration::from_secs(2)
        );
        assert_eq!(policy.delay(3, None), Duration::from_secs(20));
    }

    #[test]
    fn test_allows_retry() {
        let policy = RetryPolicy::default();
        assert!(policy.allows_retry(1));
        assert!(policy.allows_retry(4));
        assert!(!policy.allows_retry(5));

        let single = RetryPolicy::immediate(1);
        assert!(!single.allows_retry(1));
        assert_eq!(single.backoff(1), Duration::ZERO);
    }

    #[test]
    fn test_backoff_saturates_instead_of_panicking() {
        let unbounded = RetryPolicy {
            max_attempts: 2000,
            max_delay_secs: f64::INFINITY,
            ..Default::default()
        };
        assert_eq!(unbounded.backoff(1500), Duration::MAX);

        let nan_cap = RetryPolicy {
            max_delay_secs: f64::NAN,
            multiplier: f64::NAN,
            ..Default::default()
        };
        assert_eq!(nan_cap.backoff(3), Duration::ZERO);
    }

    #[test]
    fn test_validate_rejects_unusable_values() {
        assert!(RetryPolicy::default().validate().is_ok());
        assert!(RetryPolicy::immediate(1).validate().is_ok());

        let cases = [
            RetryPolicy { max_attempts: 0, ..Default::default() },
            RetryPolicy { base_delay_secs: -1.0, ..Default::default() },
            RetryPolicy { multiplier: f64::NAN, ..Default::default() },
            RetryPolicy { max_delay_secs: f64::INFINITY, ..Default::default() },
            RetryPolicy { max_delay_secs: 1e300, ..Default::default() },
        ];
        for policy in cases {
            assert!(policy.validate().is_err(), "{:?} should be rejected", policy);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_tokio_sleeper_advances_clock() {
        let start = tokio::time::Instant::now();
        TokioSleeper.sleep(Duration::from_secs(2)).await;
        assert!(start.elapsed() >= Duration::from_secs(2));
    }
}
