//! Retry logic for API fetches.
//!
//! This module provides configurable exponential backoff for transient
//! failures (`NetworkFailure`, `RateLimited`). Every backoff sleep can be
//! interrupted by a [`CancellationToken`], so a stop request takes effect at
//! the next suspension point rather than after the full delay.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use meterwatch_core::{RetryConfig, RetryOutcome, FetchError, with_retry};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() {
//! let config = RetryConfig::new(3).initial_delay(Duration::from_millis(1));
//! let cancel = CancellationToken::new();
//!
//! let outcome = with_retry(&config, &cancel, "M1", || async {
//!     Ok::<_, FetchError>(42)
//! })
//! .await;
//! assert!(matches!(outcome, RetryOutcome::Succeeded { value: 42, attempts: 1 }));
//! # }
//! ```

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::FetchError;

/// Configuration for retry behavior.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (0 means no retries).
    pub max_retries: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound for any single delay, including server-requested ones.
    pub max_delay: Duration,
    /// Backoff multiplier (1.0 = constant delay, 2.0 = double each time).
    pub backoff_multiplier: f64,
    /// Whether to add up to 25% random jitter to delays.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(300),
            backoff_multiplier: 2.0,
            jitter: false,
        }
    }
}

impl RetryConfig {
    /// Create a new retry config with custom settings.
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Default::default()
        }
    }

    /// No retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// Set maximum number of retries.
    #[must_use]
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Set initial delay.
    #[must_use]
    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Set maximum delay.
    #[must_use]
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Set backoff multiplier.
    #[must_use]
    pub fn backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Enable or disable jitter.
    #[must_use]
    pub fn jitter(mut self, enabled: bool) -> Self {
        self.jitter = enabled;
        self
    }

    /// Delay before retry number `attempt + 1`: `initial * multiplier^attempt`,
    /// capped at `max_delay`. Values too large for a `Duration` fall back to
    /// the cap.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base_delay =
            self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(attempt as i32);
        let max = self.max_delay.as_secs_f64();
        let capped_delay = base_delay.min(max);

        let final_delay = if self.jitter {
            let jitter_factor = 1.0 + (rand::rng().random::<f64>() * 0.25);
            (capped_delay * jitter_factor).min(max)
        } else {
            capped_delay
        };

        Duration::try_from_secs_f64(final_delay)
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }

    /// Delay after a failure, raised to the server's `Retry-After` when
    /// that is longer. The result never exceeds `max_delay`.
    pub fn delay_for_failure(&self, attempt: u32, error: &FetchError) -> Duration {
        let backoff = self.delay_for_attempt(attempt);
        match error.retry_after() {
            Some(requested) => backoff.max(requested).min(self.max_delay),
            None => backoff,
        }
    }
}

/// Result of [`with_retry`].
#[derive(Debug)]
pub enum RetryOutcome<T> {
    /// The operation succeeded after `attempts` tries.
    Succeeded { value: T, attempts: u32 },
    /// The operation failed permanently, or transient failures exhausted
    /// the retry budget. `error` is the last failure seen.
    Failed { error: FetchError, attempts: u32 },
    /// A stop was requested while waiting to retry.
    Cancelled { attempts: u32 },
}

impl<T> RetryOutcome<T> {
    /// Number of times the operation was invoked.
    pub fn attempts(&self) -> u32 {
        match self {
            RetryOutcome::Succeeded { attempts, .. }
            | RetryOutcome::Failed { attempts, .. }
            | RetryOutcome::Cancelled { attempts } => *attempts,
        }
    }
}

/// Execute an async fetch with retry logic.
///
/// Only transient failures are retried. The operation is invoked at most
/// `max_retries + 1` times. Between attempts the task sleeps for
/// [`RetryConfig::delay_for_failure`], or returns
/// [`RetryOutcome::Cancelled`] if `cancel` fires first.
pub async fn with_retry<F, Fut, T>(
    config: &RetryConfig,
    cancel: &CancellationToken,
    operation_name: &str,
    mut operation: F,
) -> RetryOutcome<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, FetchError>>,
{
    let mut attempt = 0;

    loop {
        let error = match operation().await {
            Ok(value) => {
                if attempt > 0 {
                    debug!("{} succeeded after {} retries", operation_name, attempt);
                }
                return RetryOutcome::Succeeded {
                    value,
                    attempts: attempt + 1,
                };
            }
            Err(e) => e,
        };

        if !error.is_retryable() || attempt >= config.max_retries {
            return RetryOutcome::Failed {
                error,
                attempts: attempt + 1,
            };
        }

        let delay = config.delay_for_failure(attempt, &error);
        warn!(
            meter = operation_name,
            kind = %error.kind(),
            attempt = attempt + 1,
            delay = ?delay,
            "Fetch failed (attempt {}/{}), retrying: {}",
            attempt + 1,
            config.max_retries + 1,
            error
        );

        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("{} retry cancelled", operation_name);
                return RetryOutcome::Cancelled { attempts: attempt + 1 };
            }
            _ = sleep(delay) => {}
        }

        attempt += 1;
    }
}
