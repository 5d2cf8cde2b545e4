//! Opens the streaming execution endpoint.

use bytes::Bytes;
use futures::stream::BoxStream;
use futures::{StreamExt, TryStreamExt};
use reqwest::header::ACCEPT;
use tracing::debug;

use crate::client::http::{build_http_client, error_for_response};
use crate::config::RunlineConfig;
use crate::error::RunlineError;
use crate::protocol::ExecuteRequest;

/// Raw byte stream of one run.
pub type RunByteStream = BoxStream<'static, Result<Bytes, RunlineError>>;

/// Client for `POST /api/execute`. The stream is not retried: a run is
/// not idempotent, so a failed connection surfaces to the consumer.
#[derive(Debug, Clone)]
pub struct RunClient {
    http: reqwest::Client,
    url: String,
}

impl RunClient {
    pub fn new(url: impl Into<String>) -> Result<Self, RunlineError> {
        Ok(Self {
            http: build_http_client(None)?,
            url: url.into(),
        })
    }

    pub fn from_config(config: &RunlineConfig) -> Result<Self, RunlineError> {
        Self::new(config.execute_url())
    }

    pub fn with_http_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Start a run. Non-success statuses fail before any bytes are read.
    pub async fn execute(&self, request: &ExecuteRequest) -> Result<RunByteStream, RunlineError> {
        debug!(url = %self.url, "opening run stream");
        let resp = self
            .http
            .post(&self.url)
            .header(ACCEPT, "text/event-stream")
            .json(request)
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(error_for_response(resp).await);
        }

        Ok(resp.bytes_stream().map_err(RunlineError::from).boxed())
    }
}
