//! Run drivers: the server-side producers of run events.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::error::RunlineError;
use crate::protocol::{ExecuteRequest, RunEmitter};
use crate::tools::{Invocable, ToolInput};

/// Produces the body of one run.
///
/// `RUN_STARTED` has already been emitted when `drive` is called. Returning
/// `Ok` finishes the run and returning `Err` fails it, unless the driver
/// ended the run itself. The future is dropped if the client disconnects.
#[async_trait]
pub trait RunDriver: Send + Sync {
    async fn drive(
        &self,
        request: ExecuteRequest,
        emitter: &mut RunEmitter,
    ) -> Result<(), RunlineError>;
}

/// Streams the prompt back word by word, optionally passing it through a
/// tool first.
#[derive(Clone, Default)]
pub struct EchoDriver {
    tool: Option<Arc<dyn Invocable>>,
    delay: Duration,
}

impl EchoDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Invoke `tool` with the prompt before echoing.
    pub fn with_tool(mut self, tool: Arc<dyn Invocable>) -> Self {
        self.tool = Some(tool);
        self
    }

    /// Pause between words.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[async_trait]
impl RunDriver for EchoDriver {
    async fn drive(
        &self,
        request: ExecuteRequest,
        emitter: &mut RunEmitter,
    ) -> Result<(), RunlineError> {
        debug!(model = request.model.as_deref(), "echo run");
        if let Some(tool) = &self.tool {
            emitter
                .call_tool(tool.as_ref(), ToolInput::from(request.prompt.as_str()))
                .await?;
        }

        for (i, word) in request.prompt.split_inclusive(' ').enumerate() {
            if i > 0 && !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            emitter.text_delta(word)?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for EchoDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EchoDriver")
            .field("tool", &self.tool.as_ref().map(|t| t.name().to_string()))
            .field("delay", &self.delay)
            .finish()
    }
}
