//! Reconnection policy.
//!
//! Every unexpected socket close schedules a new connection attempt. How
//! soon, and for how long, is an explicit configuration point: the default
//! retries immediately and never gives up, [`ReconnectPolicy::backoff`] is
//! the recommended hardening.

use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Ceiling applied after multiplication.
    pub max_delay: Duration,
    /// Growth factor applied per attempt.
    pub multiplier: f64,
    /// Give up after this many attempts; `None` retries forever.
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectPolicy {
    /// Immediate retry, no cap.
    fn default() -> Self {
        Self {
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            multiplier: 1.0,
            max_attempts: None,
        }
    }
}

impl ReconnectPolicy {
    /// Exponential backoff: 250ms doubling up to 30s, unlimited attempts.
    pub fn backoff() -> Self {
        Self {
            initial_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            max_attempts: None,
        }
    }

    /// Delay before the given attempt (1-based), or `None` to give up.
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        if let Some(max) = self.max_attempts
            && attempt > max
        {
            return None;
        }
        let factor = self.multiplier.powi(attempt.saturating_sub(1) as i32);
        let delay = self.initial_delay.mul_f64(factor.max(0.0));
        Some(delay.min(self.max_delay.max(self.initial_delay)))
    }
}
