//! Exponential backoff with jitter

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Retry budget for one logical agent call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts including the first.
    pub max_attempts: u32,
    /// Delay before the first retry; doubles on each subsequent retry.
    pub base_delay_ms: u64,
    /// Cap applied before jitter.
    pub max_delay_ms: u64,
    /// Symmetric jitter as a fraction of the delay (0.25 = ±25%).
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 200,
            max_delay_ms: 5_000,
            jitter: 0.25,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (0-based): `base * 2^retry`, capped,
    /// then jittered.
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        let raw = self
            .base_delay_ms
            .saturating_mul(1u64 << retry.min(20))
            .min(self.max_delay_ms);

        let jitter = self.jitter.clamp(0.0, 1.0);
        if jitter == 0.0 || raw == 0 {
            return Duration::from_millis(raw);
        }

        let factor = rand::thread_rng().gen_range(-jitter..=jitter);
        let jittered = (raw as f64 * (1.0 + factor)).max(0.0);
        Duration::from_millis(jittered.round() as u64)
    }
}
