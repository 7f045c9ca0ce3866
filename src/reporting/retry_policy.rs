//! Retry policy for failed reports.
//!
//! Implements exponential backoff with configurable parameters.

use std::time::Duration;

use crate::config::ReportingSettings;
use crate::notifications::NotificationError;

/// Retry policy implementing exponential backoff.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of retries before permanent failure.
    pub max_retries: u32,
    /// Initial backoff duration in seconds.
    pub initial_backoff_secs: u64,
    /// Maximum backoff duration in seconds (cap for exponential growth).
    pub max_backoff_secs: u64,
    /// Multiplier applied to backoff after each retry.
    pub backoff_multiplier: f64,
}

impl RetryPolicy {
    /// Create a new RetryPolicy from configuration settings.
    pub fn new(config: &ReportingSettings) -> Self {
        Self {
            max_retries: config.max_retries,
            initial_backoff_secs: config.initial_backoff_secs,
            max_backoff_secs: config.max_backoff_secs,
            backoff_multiplier: config.backoff_multiplier,
        }
    }

    /// Policy that never waits between attempts.
    pub fn immediate(max_retries: u32) -> Self {
        Self {
            max_retries,
            initial_backoff_secs: 0,
            max_backoff_secs: 0,
            backoff_multiplier: 1.0,
        }
    }

    /// Check if an error should be retried given the current retry count.
    ///
    /// Returns true if the error kind is retryable and the retry count is
    /// less than max_retries.
    pub fn should_retry(&self, error: &NotificationError, retry_count: u32) -> bool {
        error.is_retryable() && retry_count < self.max_retries
    }

    /// Backoff in seconds before retry number `retry_count` (0-based):
    /// `initial_backoff * multiplier^retry_count`, capped at `max_backoff_secs`.
    pub fn backoff_secs(&self, retry_count: u32) -> u64 {
        let exponent = i32::try_from(retry_count).unwrap_or(i32::MAX);
        let backoff = self.initial_backoff_secs as f64 * self.backoff_multiplier.powi(exponent);
        (backoff.min(self.max_backoff_secs as f64)) as u64
    }

    pub fn backoff(&self, retry_count: u32) -> Duration {
        Duration::from_secs(self.backoff_secs(retry_count))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(&ReportingSettings::default())
    }
}
