use std::sync::atomic::{AtomicU64, Ordering};

use reqwest::header::HeaderMap;

pub(crate) const REMAINING_HEADER: &str = "x-rate-limit-remaining";

/// Remaining request budget as last reported by the server.
///
/// Shared by every request a client issues, including concurrent ones. The value
/// is an `f64` stored as bits so updates stay lock-free and atomic.
#[derive(Debug)]
pub struct RateLimitBudget {
    remaining: AtomicU64,
    observed: AtomicU64,
}

const UNKNOWN: u64 = u64::MAX;

impl Default for RateLimitBudget {
    fn default() -> Self {
        Self {
            remaining: AtomicU64::new(UNKNOWN),
            observed: AtomicU64::new(0),
        }
    }
}

impl RateLimitBudget {
    /// Last reported budget, if the server has reported one yet.
    pub fn remaining(&self) -> Option<f64> {
        match self.remaining.load(Ordering::Acquire) {
            UNKNOWN => None,
            bits => Some(f64::from_bits(bits)),
        }
    }

    /// Number of responses that carried a budget header.
    pub fn observations(&self) -> u64 {
        self.observed.load(Ordering::Relaxed)
    }

    pub fn record(&self, remaining: f64) {
        if remaining.is_finite() {
            self.remaining.store(remaining.to_bits(), Ordering::Release);
            self.observed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn observe(&self, headers: &HeaderMap) {
        let reported = headers
            .get(REMAINING_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.trim().parse::<f64>().ok());
        if let Some(remaining) = reported {
            self.record(remaining);
        }
    }

    pub fn below(&self, threshold: f64) -> bool {
        self.remaining().is_some_and(|r| r < threshold)
    }
}
