use std::collections::BTreeSet;
use std::time::Duration;

pub const DEFAULT_RETRY_STATUSES: [u16; 4] = [500, 502, 503, 504];
pub const MAX_BACKOFF: Duration = Duration::from_secs(120);

/// Bounded retry with exponential backoff, applied to idempotent-enough HTTP
/// calls toward the CRM service and the model endpoint.
#[derive(Clone, Debug, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    /// Seconds; the first retry waits exactly this long.
    pub backoff_factor: f64,
    pub retry_statuses: BTreeSet<u16>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(2, 1.0)
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, backoff_factor: f64) -> Self {
        Self {
            max_retries,
            backoff_factor,
            retry_statuses: DEFAULT_RETRY_STATUSES.into_iter().collect(),
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.retry_statuses.insert(status);
        self
    }

    pub fn should_retry_status(&self, status: u16) -> bool {
        self.retry_statuses.contains(&status)
    }

    /// Delay before retry number `retry` (1-based).
    pub fn backoff(&self, retry: u32) -> Duration {
        if retry == 0 || !self.backoff_factor.is_finite() || self.backoff_factor <= 0.0 {
            return Duration::ZERO;
        }
        let exponent = retry.saturating_sub(1).min(16);
        let seconds = self.backoff_factor * f64::from(1_u32 << exponent);
        if seconds >= MAX_BACKOFF.as_secs_f64() {
            MAX_BACKOFF
        } else {
            Duration::from_secs_f64(seconds)
        }
    }
}
