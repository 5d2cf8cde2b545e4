//! Timeout helper.

use std::future::Future;
use std::time::Duration;

use crate::error::RunlineError;

/// Race a future against a timer.
///
/// The outer `Err` is only ever [`RunlineError::Timeout`], produced when the
/// timer wins; the future's own output, errors included, comes back in `Ok`.
/// When the timer wins the future is dropped, so any result it would have
/// produced later is discarded.
pub async fn with_timeout<F: Future>(
    duration: Duration,
    future: F,
) -> Result<F::Output, RunlineError> {
    tokio::time::timeout(duration, future)
        .await
        .map_err(|_| RunlineError::Timeout(duration.as_millis() as u64))
}
