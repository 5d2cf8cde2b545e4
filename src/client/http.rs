//! HTTP client for ancillary (non-streaming) backend calls.

use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CONTENT_TYPE};
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::retry::{RetryAttempt, RetryConfig, RetryObserver};
use crate::config::RunlineConfig;
use crate::diagnostics::{default_sink, Diagnostic, DiagnosticSink};
use crate::error::RunlineError;

/// Build the reqwest client used for both ancillary calls and run streams.
pub fn build_http_client(timeout: Option<Duration>) -> Result<reqwest::Client, RunlineError> {
    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
    let mut builder = reqwest::Client::builder()
        .default_headers(headers)
        .pool_max_idle_per_host(10);
    if let Some(timeout) = timeout {
        builder = builder.timeout(timeout);
    }
    Ok(builder.build()?)
}

/// Turn a non-success response into an error carrying its status.
pub async fn error_for_response(resp: reqwest::Response) -> RunlineError {
    let status = resp.status().as_u16();
    let body = resp.text().await.unwrap_or_default();
    RunlineError::api(status, body)
}

/// Retrying JSON client rooted at a base URL.
#[derive(Clone)]
pub struct RequestClient {
    http: reqwest::Client,
    base_url: String,
    retry: RetryConfig,
    observer: Option<RetryObserver>,
    sink: Arc<dyn DiagnosticSink>,
}

impl RequestClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, RunlineError> {
        Ok(Self {
            http: build_http_client(Some(Duration::from_secs(30)))?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            retry: RetryConfig::default(),
            observer: None,
            sink: default_sink(),
        })
    }

    /// Build from layered configuration.
    pub fn from_config(config: &RunlineConfig) -> Result<Self, RunlineError> {
        Ok(Self {
            http: build_http_client(Some(config.request_timeout()))?,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            retry: config.retry_config(),
            observer: None,
            sink: default_sink(),
        })
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Observer invoked before each retry, for telemetry only.
    pub fn with_observer(mut self, observer: RetryObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn DiagnosticSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_http_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn retry_config(&self) -> &RetryConfig {
        &self.retry
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, RunlineError> {
        self.send(Method::GET, path, None, &CancellationToken::new()).await
    }

    pub async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T, RunlineError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let body = serde_json::to_value(body)?;
        self.send(Method::POST, path, Some(body), &CancellationToken::new())
            .await
    }

    pub async fn delete(&self, path: &str) -> Result<(), RunlineError> {
        let _: Value = self
            .send(Method::DELETE, path, None, &CancellationToken::new())
            .await?;
        Ok(())
    }

    /// Send a request with retry; `cancel` stops the attempt in flight and
    /// any further retries. An empty success body decodes as JSON `null`.
    pub async fn send<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
        cancel: &CancellationToken,
    ) -> Result<T, RunlineError> {
        let url = format!("{}/{}", self.base_url, path.trim_start_matches('/'));
        let sink = self.sink.clone();
        let user_observer = self.observer.clone();
        let observer: RetryObserver = Arc::new(move |attempt: &RetryAttempt<'_>| {
            sink.record(Diagnostic::RequestRetry {
                attempt: attempt.attempt_number,
                delay_ms: attempt.delay.as_millis() as u64,
                error: attempt.error.to_string(),
            });
            if let Some(observer) = &user_observer {
                observer(attempt);
            }
        });

        self.retry
            .execute(cancel, Some(&observer), || {
                let request = self.http.request(method.clone(), &url);
                let request = match &body {
                    Some(body) => request.header(CONTENT_TYPE, "application/json").json(body),
                    None => request,
                };
                let url = url.as_str();
                async move {
                    debug!(url, "sending request");
                    let resp = request.send().await?;
                    if !resp.status().is_success() {
                        return Err(error_for_response(resp).await);
                    }
                    let bytes = resp.bytes().await?;
                    if bytes.is_empty() {
                        return Ok(serde_json::from_value(Value::Null)?);
                    }
                    Ok(serde_json::from_slice(&bytes)?)
                }
            })
            .await
    }
}

impl std::fmt::Debug for RequestClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestClient")
            .field("base_url", &self.base_url)
            .field("retry", &self.retry)
            .finish()
    }
}
