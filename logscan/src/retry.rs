//! Retry policy and cancellation for fetch workers.
//!
//! The default [`RetryPolicy`] retries a failing range forever without
//! delay. Limits and exponential backoff are opt-in.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// How a fetch worker reacts to failed fetches of the same range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retries allowed after the first failure. `None` retries forever.
    #[serde(default)]
    pub max_retries: Option<u32>,
    /// Delay before the first retry in milliseconds. Zero disables backoff.
    #[serde(default)]
    pub initial_backoff_ms: u64,
    /// Upper bound for the doubled delay in milliseconds.
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

fn default_max_backoff_ms() -> u64 {
    30_000
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: None,
            initial_backoff_ms: 0,
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

impl RetryPolicy {
    /// Retry forever with no delay
    pub fn unlimited() -> Self {
        Self::default()
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn with_initial_backoff_ms(mut self, initial_backoff_ms: u64) -> Self {
        self.initial_backoff_ms = initial_backoff_ms;
        self
    }

    pub fn with_max_backoff_ms(mut self, max_backoff_ms: u64) -> Self {
        self.max_backoff_ms = max_backoff_ms;
        self
    }

    /// Whether another attempt is allowed after `failures` consecutive failures.
    pub fn should_retry(&self, failures: u32) -> bool {
        match self.max_retries {
            Some(max) => failures <= max,
            None => true,
        }
    }

    /// Delay before retry number `attempt` (zero-based).
    pub fn backoff_duration(&self, attempt: u32) -> Duration {
        if self.initial_backoff_ms == 0 {
            return Duration::ZERO;
        }
        let factor = 2u64.checked_pow(attempt).unwrap_or(u64::MAX);
        let ms = self
            .initial_backoff_ms
            .saturating_mul(factor)
            .min(self.max_backoff_ms);
        Duration::from_millis(ms)
    }
}

/// Shared flag used to abort a running scan.
///
/// Clones observe the same flag, so a caller can keep one and hand another
/// to [`Scanner::scan_with_cancel`](crate::scanner::Scanner::scan_with_cancel).
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}
