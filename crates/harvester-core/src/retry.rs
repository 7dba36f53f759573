//! Bounded retry with exponential backoff for registry requests

use std::time::Duration;

use serde::Deserialize;

use crate::error::FetchError;
use crate::rate_limit::RateLimiter;

/// Retry bounds: attempt count and total time spent waiting between attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    #[serde(rename = "base_delay_ms", with = "millis")]
    pub base_delay: Duration,
    #[serde(rename = "max_delay_ms", with = "millis")]
    pub max_delay: Duration,
    #[serde(rename = "max_total_wait_ms", with = "millis")]
    pub max_total_wait: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_total_wait: Duration::from_secs(120),
        }
    }
}

impl RetryPolicy {
    /// Exponential backoff after `attempt` failures: base, 2×base, 4×base, ... capped at `max_delay`
    pub fn backoff_duration(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Run `attempt_fn` under the class rate limiter, retrying transient failures.
///
/// Every attempt first waits for a limiter slot. A 429 with a wait hint defers
/// the whole limiter so other callers of the class back off too; other
/// transient failures sleep the exponential backoff. Gives up once attempts or
/// total wait are exhausted and returns the last error. Permanent errors are
/// returned immediately.
pub fn retry_with_backoff<T>(
    label: &str,
    policy: &RetryPolicy,
    limiter: &RateLimiter,
    mut attempt_fn: impl FnMut() -> Result<T, FetchError>,
) -> Result<T, FetchError> {
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1u32;
    let mut waited = Duration::ZERO;
    loop {
        limiter.acquire();
        match attempt_fn() {
            Ok(v) => return Ok(v),
            Err(e) if e.is_retryable() && attempt < max_attempts => {
                let hint = e.retry_after();
                let delay = hint.unwrap_or_else(|| policy.backoff_duration(attempt));
                if waited + delay > policy.max_total_wait {
                    log::warn!("{label}: giving up after {attempt} attempts ({waited:?} waited): {e}");
                    return Err(e);
                }
                waited += delay;
                log::debug!(
                    "{label}: attempt {attempt}/{max_attempts} failed: {e}, retrying in {delay:?}"
                );
                match hint {
                    Some(wait) => limiter.defer(wait),
                    None => std::thread::sleep(delay),
                }
                attempt += 1;
            }
            Err(e) => {
                log::debug!("{label}: failed permanently: {e}");
                return Err(e);
            }
        }
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}
