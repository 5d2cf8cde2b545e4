//! Outbound request client with classification-aware retry.

pub mod http;
pub mod retry;

pub use http::{build_http_client, RequestClient};
pub use retry::{RetryAttempt, RetryConfig, RetryObserver, RetryPreset, DEFAULT_RETRYABLE_STATUSES};
