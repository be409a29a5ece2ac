//! Exponential backoff shared by connection establishment and command retries

use animatronic_shared::defaults;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Retry budget and delay curve
///
/// The delay before attempt `n + 1` (with `n` starting at 0) is
/// `min(base_delay * 2^n, max_delay)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffPolicy {
    /// Total attempts, including the first one
    pub max_retries: u32,
    #[serde(rename = "base_delay_ms", with = "crate::config::millis")]
    pub base_delay: Duration,
    #[serde(rename = "max_delay_ms", with = "crate::config::millis")]
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: defaults::MAX_RETRIES,
            base_delay: Duration::from_millis(defaults::BASE_DELAY_MS),
            max_delay: Duration::from_millis(defaults::MAX_DELAY_MS),
        }
    }
}

impl BackoffPolicy {
    pub fn new(max_retries: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay,
        }
    }

    /// Delay to wait after failed attempt `attempt` (0-based)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Delays between consecutive attempts for a budget of `attempts`
    pub fn schedule(&self, attempts: u32) -> Vec<Duration> {
        (0..attempts.saturating_sub(1))
            .map(|n| self.delay_for_attempt(n))
            .collect()
    }
}
