//! Reconnect backoff and timeout utilities.
//!
//! The policy is pure computation: it never sleeps and holds no state, so the
//! connection manager can ask for a delay and schedule it however it likes.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Exponential backoff with bounded random jitter.
///
/// `delay(n) = min(max_delay, base_delay * backoff_factor^n) + random(0, jitter_max)`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    /// Delay used before the first retry, in milliseconds.
    pub base_delay_ms: u64,
    /// Upper bound for the exponential part of the delay, in milliseconds.
    pub max_delay_ms: u64,
    /// Number of scheduled retries before the manager gives up.
    pub max_attempts: u32,
    /// Growth factor applied per attempt. Values below 1 shrink the delay.
    pub backoff_factor: f64,
    /// Maximum random jitter added to each delay, in milliseconds.
    pub jitter_max_ms: u64,
}

impl ReconnectPolicy {
    /// Exponential part of the delay for `attempt` (0-based), without jitter.
    pub fn backoff_ms(&self, attempt: u32) -> u64 {
        let factor = if self.backoff_factor.is_finite() && self.backoff_factor > 0.0 {
            self.backoff_factor
        } else {
            1.0
        };
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let raw = self.base_delay_ms as f64 * factor.powi(exponent);
        if !raw.is_finite() || raw >= self.max_delay_ms as f64 {
            return self.max_delay_ms;
        }
        (raw as u64).min(self.max_delay_ms)
    }

    /// Computes the delay to wait before retry number `attempt` (0-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let backoff = self.backoff_ms(attempt);
        Duration::from_millis(backoff.saturating_add(jitter_ms(self.jitter_max_ms)))
    }

    /// Upper bound of any value [`ReconnectPolicy::delay`] can return.
    pub fn ceiling(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms.saturating_add(self.jitter_max_ms))
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
            max_attempts: 10,
            backoff_factor: 2.0,
            jitter_max_ms: 1_000,
        }
    }
}

/// Applies a timeout to an async computation.
pub async fn with_timeout<T, Fut>(
    timeout: Duration,
    future: Fut,
) -> Result<T, tokio::time::error::Elapsed>
where
    Fut: Future<Output = T>,
{
    tokio::time::timeout(timeout, future).await
}

fn jitter_ms(max_jitter_ms: u64) -> u64 {
    if max_jitter_ms == 0 {
        return 0;
    }
    rand::rng().random_range(0..=max_jitter_ms)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{with_timeout, ReconnectPolicy};

    fn policy() -> ReconnectPolicy {
        ReconnectPolicy {
            base_delay_ms: 100,
            max_delay_ms: 5_000,
            max_attempts: 8,
            backoff_factor: 2.0,
            jitter_max_ms: 250,
        }
    }

    #[test]
    fn delay_stays_within_bounds_for_every_attempt() {
        let policy = policy();
        for attempt in 0..64 {
            let floor = policy.backoff_ms(attempt);
            for _ in 0..20 {
                let delay = policy.delay(attempt);
                assert!(delay <= policy.ceiling(), "attempt {attempt}: {delay:?}");
                assert!(delay >= Duration::from_millis(floor));
            }
        }
    }

    #[test]
    fn decaying_factor_shrinks_the_delay() {
        let policy = ReconnectPolicy {
            base_delay_ms: 1_000,
            backoff_factor: 0.5,
            jitter_max_ms: 0,
            ..ReconnectPolicy::default()
        };
        assert_eq!(policy.backoff_ms(0), 1_000);
        assert_eq!(policy.backoff_ms(1), 500);
        assert_eq!(policy.backoff_ms(3), 125);
    }

    #[test]
    fn backoff_grows_exponentially_until_capped() {
        let policy = policy();
        assert_eq!(policy.backoff_ms(0), 100);
        assert_eq!(policy.backoff_ms(1), 200);
        assert_eq!(policy.backoff_ms(4), 1_600);
        assert_eq!(policy.backoff_ms(6), 5_000);
        assert_eq!(policy.backoff_ms(u32::MAX), 5_000);
    }

    #[test]
    fn zero_jitter_is_deterministic() {
        let policy = ReconnectPolicy {
            jitter_max_ms: 0,
            ..policy()
        };
        assert_eq!(policy.delay(2), Duration::from_millis(400));
        assert_eq!(policy.delay(2), policy.delay(2));
    }

    #[test]
    fn nonsensical_factor_falls_back_to_constant_delay() {
        for factor in [f64::NAN, f64::INFINITY, 0.0, -2.0] {
            let policy = ReconnectPolicy {
                backoff_factor: factor,
                jitter_max_ms: 0,
                ..policy()
            };
            assert_eq!(policy.backoff_ms(5), 100, "factor {factor}");
        }
    }

    #[test]
    fn partial_config_fills_defaults() {
        let policy: ReconnectPolicy =
            serde_json::from_str(r#"{"max_attempts":3}"#).expect("decode policy");
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.base_delay_ms, ReconnectPolicy::default().base_delay_ms);
    }

    #[tokio::test]
    async fn with_timeout_reports_elapsed() {
        let result = with_timeout(Duration::from_millis(5), std::future::pending::<()>()).await;
        assert!(result.is_err());
    }
}
