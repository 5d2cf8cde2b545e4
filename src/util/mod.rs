//! Utility modules: backoff schedules, timeout.

pub mod backoff;
pub mod timeout;
