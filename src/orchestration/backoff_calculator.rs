//! # Backoff Calculator
//!
//! Exponential backoff for per-record retries.
//!
//! Retry attempt `k` (1-based) waits
//! `initial_delay × multiplier^(k−1)` from the moment it is scheduled. The
//! result is capped by `max_delay` when one is configured, and is never
//! shorter than a retry-after hint supplied by the remote service.
//!
//! ```rust
//! use bulkops_core::orchestration::backoff_calculator::RetryPolicy;
//! use std::time::Duration;
//!
//! let policy = RetryPolicy {
//!     retries: 3,
//!     initial_delay: Duration::from_secs(2),
//!     multiplier: 2.0,
//!     max_delay: None,
//! };
//!
//! assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(2));
//! assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(4));
//! assert_eq!(policy.delay_for_attempt(3), Duration::from_secs(8));
//! ```

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Retry budget and backoff curve shared read-only by every worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retries allowed after the first failed attempt
    pub retries: u32,
    /// Delay before retry attempt 1
    pub initial_delay: Duration,
    /// Exponential multiplier (>= 1.0)
    pub multiplier: f64,
    /// Optional cap on any single delay
    pub max_delay: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: 3,
            initial_delay: Duration::from_secs(5),
            multiplier: 2.0,
            max_delay: None,
        }
    }
}

impl RetryPolicy {
    /// Total attempts a record may consume, first try included
    pub fn max_attempts(&self) -> u32 {
        self.retries.saturating_add(1)
    }

    /// Delay before retry attempt `attempt` (1-based)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let factor = self.multiplier.powi(exponent);
        let seconds = self.initial_delay.as_secs_f64() * factor;

        let delay = Duration::try_from_secs_f64(seconds).unwrap_or(Duration::MAX);

        match self.max_delay {
            Some(cap) => delay.min(cap),
            None => delay,
        }
    }

    /// Delay for `attempt`, raised to the server's retry-after hint when that is longer
    pub fn delay_with_hint(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        let delay = self.delay_for_attempt(attempt);
        match retry_after {
            Some(hint) if hint > delay => hint,
            _ => delay,
        }
    }
}
