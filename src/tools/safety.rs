//! Safety wrapper: validation, sandboxing, timeout and retry around any tool.
//!
//! [`SafeTool`] never fails. Every outcome, including exhausted retries, is
//! returned as a JSON payload so it can sit inside an agent loop that
//! expects a result value.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bon::Builder;
use serde_json::{json, Value};
use thiserror::Error;

use super::input::{ParsedInput, ToolInput};
use super::sandbox::{PathSandbox, ViolationReason};
use super::tool::Invocable;
use super::types::InputSchema;
use super::validation::validate_input;
use crate::diagnostics::{default_sink, Diagnostic, DiagnosticSink};
use crate::error::RunlineError;
use crate::util::backoff::tool_retry_delay;
use crate::util::timeout::with_timeout;

pub const DEFAULT_TOOL_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_TOOL_MAX_RETRIES: u32 = 2;

/// Read-only policy attached to a wrapper at construction.
#[derive(Debug, Clone, Builder)]
pub struct SafetyPolicy {
    /// Per-attempt time limit.
    #[builder(default = Duration::from_millis(DEFAULT_TOOL_TIMEOUT_MS))]
    pub timeout: Duration,
    /// Additional attempts after the first one fails.
    #[builder(default = DEFAULT_TOOL_MAX_RETRIES)]
    pub max_retries: u32,
    /// Allowed path prefixes; unrestricted when empty.
    #[builder(default)]
    pub sandbox: PathSandbox,
    #[builder(default)]
    pub input_schema: InputSchema,
}

impl Default for SafetyPolicy {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// One invocation as seen by the wrapper.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolInvocationRequest {
    pub tool_name: String,
    pub raw_input: ToolInput,
}

/// Terminal failure of a wrapped invocation.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ToolFailure {
    #[error("Invalid input: {details}")]
    InvalidInput { details: String },

    #[error("Access denied for '{path}': {reason}")]
    SandboxDenied { path: String, reason: ViolationReason },

    #[error("Tool execution failed after {attempts} attempts: {message}")]
    RetriesExhausted { attempts: u32, message: String },
}

impl ToolFailure {
    /// Structured error payload returned in place of a result.
    pub fn to_payload(&self) -> Value {
        match self {
            Self::InvalidInput { details } => json!({
                "error": "Invalid input",
                "details": details,
            }),
            Self::SandboxDenied { path, reason } => json!({
                "error": "Access denied",
                "path": path,
                "details": reason.to_string(),
            }),
            Self::RetriesExhausted { attempts, message } => json!({
                "error": "Tool execution failed after retries",
                "message": message,
                "attempts": attempts,
            }),
        }
    }
}

/// Result of one wrapped invocation. Never mutated after return.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryOutcome {
    /// Underlying invocations performed (zero when rejected up front).
    pub attempts_made: u32,
    pub result: Result<Value, ToolFailure>,
}

impl RetryOutcome {
    pub fn succeeded(&self) -> bool {
        self.result.is_ok()
    }

    /// Collapse into the value handed back to the agent loop.
    pub fn into_payload(self) -> Value {
        match self.result {
            Ok(value) => value,
            Err(failure) => failure.to_payload(),
        }
    }
}

/// Wraps an [`Invocable`] with a [`SafetyPolicy`].
pub struct SafeTool<T> {
    inner: T,
    policy: Arc<SafetyPolicy>,
    sink: Arc<dyn DiagnosticSink>,
}

impl<T: Invocable> SafeTool<T> {
    pub fn new(inner: T, policy: SafetyPolicy) -> Self {
        Self::with_shared_policy(inner, Arc::new(policy))
    }

    /// Wrap with a policy shared across several wrappers.
    pub fn with_shared_policy(inner: T, policy: Arc<SafetyPolicy>) -> Self {
        Self {
            inner,
            policy,
            sink: default_sink(),
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn DiagnosticSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn policy(&self) -> &SafetyPolicy {
        &self.policy
    }

    pub fn inner(&self) -> &T {
        &self.inner
    }

    /// Run the full parse → validate → sandbox → execute/retry pipeline.
    pub async fn invoke_with_outcome(&self, input: ToolInput) -> RetryOutcome {
        let request = ToolInvocationRequest {
            tool_name: self.inner.name().to_string(),
            raw_input: input,
        };
        self.execute(request).await
    }

    async fn execute(&self, request: ToolInvocationRequest) -> RetryOutcome {
        let ToolInvocationRequest {
            tool_name,
            raw_input,
        } = request;
        let parsed = ParsedInput::parse(raw_input);

        if let Err(details) = validate_input(&parsed.to_value(), &self.policy.input_schema) {
            self.sink.record(Diagnostic::ValidationFailed {
                tool: tool_name,
                details: details.clone(),
            });
            return RetryOutcome {
                attempts_made: 0,
                result: Err(ToolFailure::InvalidInput { details }),
            };
        }

        if let Err(violation) = self.policy.sandbox.check(&parsed) {
            self.sink.record(Diagnostic::SandboxDenied {
                tool: tool_name,
                path: violation.path.clone(),
                reason: violation.reason.to_string(),
            });
            return RetryOutcome {
                attempts_made: 0,
                result: Err(ToolFailure::SandboxDenied {
                    path: violation.path,
                    reason: violation.reason,
                }),
            };
        }

        let max_attempts = self.policy.max_retries.saturating_add(1);
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            if attempt > 1 {
                tokio::time::sleep(tool_retry_delay(attempt - 1)).await;
            }
            self.sink.record(Diagnostic::ToolAttempt {
                tool: tool_name.clone(),
                attempt,
                max_attempts,
            });

            let call = self.inner.invoke(ToolInput::from(parsed.clone()));
            match with_timeout(self.policy.timeout, call).await {
                Ok(Ok(value)) => {
                    self.sink.record(Diagnostic::ToolSucceeded {
                        tool: tool_name,
                        attempts: attempt,
                    });
                    return RetryOutcome {
                        attempts_made: attempt,
                        result: Ok(value),
                    };
                }
                Ok(Err(err)) => {
                    last_error = err.to_string();
                    self.sink.record(Diagnostic::ToolAttemptFailed {
                        tool: tool_name.clone(),
                        attempt,
                        error: last_error.clone(),
                    });
                }
                Err(elapsed) => {
                    self.sink.record(Diagnostic::ToolAttemptAbandoned {
                        tool: tool_name.clone(),
                        attempt,
                        timeout_ms: self.policy.timeout.as_millis() as u64,
                    });
                    last_error = elapsed.to_string();
                }
            }
        }

        RetryOutcome {
            attempts_made: max_attempts,
            result: Err(ToolFailure::RetriesExhausted {
                attempts: max_attempts,
                message: last_error,
            }),
        }
    }
}

#[async_trait]
impl<T: Invocable> Invocable for SafeTool<T> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn description(&self) -> &str {
        self.inner.description()
    }

    async fn invoke(&self, input: ToolInput) -> Result<Value, RunlineError> {
        Ok(self.invoke_with_outcome(input).await.into_payload())
    }
}

impl<T: Invocable> std::fmt::Debug for SafeTool<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SafeTool")
            .field("name", &self.inner.name())
            .field("policy", &self.policy)
            .finish()
    }
}
