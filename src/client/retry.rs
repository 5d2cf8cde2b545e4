//! Retry with capped exponential backoff, jitter and cancellation.

use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use tokio_util::sync::CancellationToken;

use crate::error::RunlineError;
use crate::util::backoff::{capped_exponential, jittered};

/// Statuses retried by default.
pub const DEFAULT_RETRYABLE_STATUSES: [u16; 6] = [408, 429, 500, 502, 503, 504];

/// Named retry presets.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RetryPreset {
    #[default]
    Default,
    /// Fast, few attempts; for interactive calls.
    Realtime,
    /// Many attempts with a high cap.
    Aggressive,
    /// Only 429/503, with longer delays.
    RateLimited,
}

/// Transient record handed to the observer before each retry.
#[derive(Debug)]
pub struct RetryAttempt<'a> {
    /// The attempt that just failed (1-indexed).
    pub attempt_number: u32,
    /// Delay before the next attempt.
    pub delay: Duration,
    pub error: &'a RunlineError,
}

/// Telemetry callback; it cannot influence control flow.
pub type RetryObserver = Arc<dyn Fn(&RetryAttempt<'_>) + Send + Sync>;

/// Retry configuration for outbound requests.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Maximum number of attempts (including the first).
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
    /// Widen each delay by a random ±25%.
    pub jitter: bool,
    pub retryable_statuses: BTreeSet<u16>,
    /// Retry failures that carry no HTTP status (connect errors, timeouts).
    pub retry_transport_errors: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1000),
            multiplier: 2.0,
            max_delay: Duration::from_millis(10_000),
            jitter: true,
            retryable_statuses: DEFAULT_RETRYABLE_STATUSES.into_iter().collect(),
            retry_transport_errors: true,
        }
    }
}

impl RetryConfig {
    pub fn preset(preset: RetryPreset) -> Self {
        match preset {
            RetryPreset::Default => Self::default(),
            RetryPreset::Realtime => Self::realtime(),
            RetryPreset::Aggressive => Self::aggressive(),
            RetryPreset::RateLimited => Self::rate_limited(),
        }
    }

    pub fn realtime() -> Self {
        Self {
            max_attempts: 2,
            initial_delay: Duration::from_millis(250),
            max_delay: Duration::from_millis(1000),
            ..Self::default()
        }
    }

    pub fn aggressive() -> Self {
        Self {
            max_attempts: 6,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_millis(30_000),
            ..Self::default()
        }
    }

    pub fn rate_limited() -> Self {
        Self {
            max_attempts: 4,
            initial_delay: Duration::from_millis(5000),
            max_delay: Duration::from_millis(60_000),
            retryable_statuses: [429, 503].into_iter().collect(),
            retry_transport_errors: false,
            ..Self::default()
        }
    }

    /// Delay before retry `retry` (1-indexed), without jitter.
    pub fn base_delay(&self, retry: u32) -> Duration {
        capped_exponential(self.initial_delay, self.multiplier, self.max_delay, retry)
    }

    /// Delay before retry `retry`, with jitter drawn fresh per call.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let base = self.base_delay(retry);
        if self.jitter {
            jittered(base, &mut rand::rng())
        } else {
            base
        }
    }

    /// Whether `err` should be retried under this configuration.
    pub fn is_retryable(&self, err: &RunlineError) -> bool {
        if matches!(err, RunlineError::Cancelled) {
            return false;
        }
        if let Some(status) = err.status() {
            return self.retryable_statuses.contains(&status);
        }
        match err {
            RunlineError::Network(_)
            | RunlineError::Timeout(_)
            | RunlineError::Io(_)
            | RunlineError::Disconnected => self.retry_transport_errors,
            _ => false,
        }
    }

    /// Execute an async operation with retry.
    ///
    /// Attempts run strictly one after another. Cancelling `cancel` aborts
    /// the attempt in flight or the pending backoff sleep and yields
    /// [`RunlineError::Cancelled`]. After the last attempt the last error is
    /// returned.
    pub async fn execute<F, Fut, T>(
        &self,
        cancel: &CancellationToken,
        observer: Option<&RetryObserver>,
        mut operation: F,
    ) -> Result<T, RunlineError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RunlineError>>,
    {
        if self.max_attempts == 0 {
            return Err(RunlineError::Configuration(
                "max_attempts must be at least 1".to_string(),
            ));
        }

        let mut attempt = 1;
        loop {
            if cancel.is_cancelled() {
                return Err(RunlineError::Cancelled);
            }

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(RunlineError::Cancelled),
                result = operation() => result,
            };

            let err = match result {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };
            if attempt >= self.max_attempts || !self.is_retryable(&err) {
                return Err(err);
            }

            let delay = self.delay_for(attempt);
            tracing::warn!(
                attempt,
                max_attempts = self.max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Retrying after error"
            );
            if let Some(observer) = observer {
                observer(&RetryAttempt {
                    attempt_number: attempt,
                    delay,
                    error: &err,
                });
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(RunlineError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
            attempt += 1;
        }
    }
}
