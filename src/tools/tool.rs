//! Invocable trait and closure-based tool.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use super::input::ToolInput;
use crate::error::RunlineError;

/// A named unit of work invocable with a payload.
///
/// Raw tools and [`SafeTool`](super::SafeTool) both implement this, so
/// wrapping composes without inheritance.
#[async_trait]
pub trait Invocable: Send + Sync {
    /// Tool name (must match what the agent calls).
    fn name(&self) -> &str;

    /// Human-readable description.
    fn description(&self) -> &str;

    /// Run the tool. Raw tools may fail or hang.
    async fn invoke(&self, input: ToolInput) -> Result<Value, RunlineError>;
}

#[async_trait]
impl<T: Invocable + ?Sized> Invocable for Arc<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn description(&self) -> &str {
        (**self).description()
    }

    async fn invoke(&self, input: ToolInput) -> Result<Value, RunlineError> {
        (**self).invoke(input).await
    }
}

type ToolHandler =
    dyn Fn(ToolInput) -> Pin<Box<dyn Future<Output = Result<Value, RunlineError>> + Send>>
        + Send
        + Sync;

/// Closure-based tool for quick tool creation.
pub struct FnTool {
    name: String,
    description: String,
    handler: Arc<ToolHandler>,
}

impl FnTool {
    /// Create a tool from a closure.
    pub fn new<F, Fut>(name: impl Into<String>, description: impl Into<String>, handler: F) -> Self
    where
        F: Fn(ToolInput) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, RunlineError>> + Send + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            handler: Arc::new(move |input| Box::pin(handler(input))),
        }
    }
}

#[async_trait]
impl Invocable for FnTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    async fn invoke(&self, input: ToolInput) -> Result<Value, RunlineError> {
        (self.handler)(input).await
    }
}

impl std::fmt::Debug for FnTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnTool")
            .field("name", &self.name)
            .field("description", &self.description)
            .finish()
    }
}
