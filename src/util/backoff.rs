//! Backoff delay math.
//!
//! Two schedules live here. Tool retries use a pure doubling schedule in
//! whole seconds with no cap and no jitter. Outbound requests use a capped
//! exponential schedule with optional ±25% jitter.

use std::time::Duration;

use rand::Rng;

/// Fraction by which a jittered delay may deviate from its base value.
pub const JITTER_SPREAD: f64 = 0.25;

/// Delay before tool retry `retry` (1-indexed): `2^(retry-1)` seconds.
pub fn tool_retry_delay(retry: u32) -> Duration {
    let exponent = retry.saturating_sub(1);
    let secs = 1u64.checked_shl(exponent).unwrap_or(u64::MAX);
    Duration::from_secs(secs)
}

/// `min(max, initial × multiplier^(attempt-1))` for a 1-indexed attempt.
pub fn capped_exponential(
    initial: Duration,
    multiplier: f64,
    max: Duration,
    attempt: u32,
) -> Duration {
    let exponent = attempt.saturating_sub(1) as i32;
    let raw_ms = initial.as_millis() as f64 * multiplier.powi(exponent);
    let capped_ms = raw_ms.min(max.as_millis() as f64);
    if capped_ms.is_finite() && capped_ms > 0.0 {
        Duration::from_millis(capped_ms as u64)
    } else {
        Duration::ZERO
    }
}

/// Scale `delay` by a factor drawn uniformly from `[1 - spread, 1 + spread]`.
pub fn jittered<R: Rng + ?Sized>(delay: Duration, rng: &mut R) -> Duration {
    let factor = rng.random_range((1.0 - JITTER_SPREAD)..=(1.0 + JITTER_SPREAD));
    Duration::from_secs_f64(delay.as_secs_f64() * factor)
}
