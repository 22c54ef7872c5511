//! Retry and terminal-failure policy: exponential backoff bounded by a
//! per-item attempt count.

use chrono::Duration;

/// Retry behavior for a queue. The backoff is `base * 2^retry_count`
/// after the count has been incremented, so consecutive retries of one
/// item wait 2, 4, 8, ... base units.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Default `max_retries` applied at enqueue when the caller leaves
    /// it unset.
    pub default_max_retries: u32,
    /// Backoff time unit.
    pub base: Duration,
    /// Optional ceiling on a single backoff delay.
    pub cap: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            default_max_retries: 3,
            base: Duration::seconds(1),
            cap: None,
        }
    }
}

/// Outcome of applying the policy to a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Re-arm as pending with the incremented count and a future
    /// `next_retry_at` delay.
    Retry { retry_count: u32, delay: Duration },
    /// Attempts exhausted — the item goes terminally failed.
    Exhausted,
}

impl RetryPolicy {
    /// Decide what happens after a failed attempt on an item that has
    /// already consumed `retry_count` of `max_retries` attempts.
    pub fn on_failure(&self, retry_count: u32, max_retries: u32) -> RetryDecision {
        let next = retry_count.saturating_add(1);
        if next <= max_retries {
            RetryDecision::Retry {
                retry_count: next,
                delay: self.backoff(next),
            }
        } else {
            RetryDecision::Exhausted
        }
    }

    /// Backoff delay for the given (already incremented) retry count.
    pub fn backoff(&self, retry_count: u32) -> Duration {
        let exp = retry_count.min(30);
        let delay = self.base * 2i32.pow(exp);
        match self.cap {
            Some(cap) if delay > cap => cap,
            _ => delay,
        }
    }
}
