//! Backoff arithmetic for the Canvas client.

use std::time::Duration;

use rand::Rng;
use reqwest::header::{HeaderMap, RETRY_AFTER};

use crate::config::RetryPolicy;

/// What to do with a response status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StatusClass {
    Success,
    Unauthorized,
    Transient,
    Rejected,
}

impl RetryPolicy {
    pub(crate) fn classify(&self, status: u16) -> StatusClass {
        match status {
            200..=299 => StatusClass::Success,
            401 | 403 => StatusClass::Unauthorized,
            s if self.retry_on.contains(&s) => StatusClass::Transient,
            _ => StatusClass::Rejected,
        }
    }

    /// Whether another attempt is allowed after `attempt` (0-based) failed.
    pub(crate) fn can_retry(&self, attempt: u32) -> bool {
        attempt + 1 < self.max_attempts.max(1)
    }

    /// Delay before the attempt following `attempt`. A server hint wins when
    /// the policy respects it.
    pub(crate) fn backoff(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        if let Some(hint) = retry_after.filter(|_| self.respect_retry_after) {
            return hint;
        }

        let base = self.base_delay_ms as f64 * 2f64.powi(attempt.min(30) as i32);
        let jitter_range = base * self.jitter.clamp(0.0, 1.0);
        let wait = if jitter_range > 0.0 {
            base + rand::thread_rng().gen_range(-jitter_range..jitter_range)
        } else {
            base
        };
        Duration::from_millis(wait.clamp(0.0, self.max_delay_ms as f64) as u64)
    }
}

/// `Retry-After` as delta-seconds. HTTP-date values are ignored.
pub(crate) fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}
