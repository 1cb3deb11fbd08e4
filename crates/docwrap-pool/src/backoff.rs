//! Exponential backoff between connection attempts.

use std::time::Duration;

use docwrap_core::RetryPolicy;

/// Delay schedule derived from a [`RetryPolicy`].
///
/// The delay after failed attempt `n` (1-based) is `base_delay * 2^(n-1)`,
/// capped at `max_delay`. There is no delay after the final attempt.
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: RetryPolicy,
}

impl Backoff {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn max_attempts(&self) -> u32 {
        self.policy.max_attempts
    }

    /// How long to wait after `attempt` failed, or `None` if it was the last one.
    pub fn delay_after(&self, attempt: u32) -> Option<Duration> {
        if attempt >= self.policy.max_attempts {
            return None;
        }
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        let delay = self
            .policy
            .base_delay
            .checked_mul(factor)
            .unwrap_or(self.policy.max_delay);
        Some(delay.min(self.policy.max_delay))
    }
}
