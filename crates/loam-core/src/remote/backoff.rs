//! Exponential backoff with jitter for retryable remote failures.

use std::time::Duration;

use rand::Rng;

use crate::config::SyncSettings;

/// Backoff schedule: `base * 2^(attempt - 1)`, capped, with equal jitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    base_ms: u64,
    cap_ms: u64,
}

impl Backoff {
    #[must_use]
    pub const fn new(base_ms: u64, cap_ms: u64) -> Self {
        Self { base_ms, cap_ms }
    }

    #[must_use]
    pub const fn from_settings(settings: &SyncSettings) -> Self {
        Self::new(settings.backoff_base_ms, settings.backoff_cap_ms)
    }

    /// Upper bound of the delay before retry number `attempt` (1-based).
    #[must_use]
    pub fn ceiling_ms(&self, attempt: u32) -> u64 {
        let exponent = attempt.saturating_sub(1).min(32);
        self.base_ms
            .saturating_mul(1_u64 << exponent)
            .min(self.cap_ms)
    }

    /// Jittered delay in `[ceiling / 2, ceiling]`.
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        let ceiling = self.ceiling_ms(attempt);
        let half = ceiling / 2;
        let jitter = rand::thread_rng().gen_range(0..=ceiling - half);
        Duration::from_millis(half + jitter)
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::from_settings(&SyncSettings::default())
    }
}
