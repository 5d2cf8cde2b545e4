//! Injected diagnostic sinks.
//!
//! Components that need observability take an `Arc<dyn DiagnosticSink>`
//! rather than logging through process-wide state, so tests can assert on
//! exactly what was recorded.

use std::sync::{Arc, Mutex};

use serde::Serialize;

/// A single observable event produced by the tool wrapper, emitter, consumer
/// or request client.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "diagnostic", rename_all = "snake_case")]
pub enum Diagnostic {
    ToolAttempt {
        tool: String,
        attempt: u32,
        max_attempts: u32,
    },
    ToolAttemptFailed {
        tool: String,
        attempt: u32,
        error: String,
    },
    /// A timed-out attempt was dropped; its late result will never be observed.
    ToolAttemptAbandoned {
        tool: String,
        attempt: u32,
        timeout_ms: u64,
    },
    ToolSucceeded {
        tool: String,
        attempts: u32,
    },
    ValidationFailed {
        tool: String,
        details: String,
    },
    SandboxDenied {
        tool: String,
        path: String,
        reason: String,
    },
    RequestRetry {
        attempt: u32,
        delay_ms: u64,
        error: String,
    },
    EventEmitted {
        kind: String,
    },
    FrameSkipped {
        frame: String,
        reason: String,
    },
    ClientDisconnected,
}

/// Receiver for [`Diagnostic`] events.
pub trait DiagnosticSink: Send + Sync {
    fn record(&self, event: Diagnostic);
}

/// Forwards diagnostics to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl DiagnosticSink for TracingSink {
    fn record(&self, event: Diagnostic) {
        match event {
            Diagnostic::ToolAttempt {
                tool,
                attempt,
                max_attempts,
            } => tracing::debug!(tool, attempt, max_attempts, "tool attempt"),
            Diagnostic::ToolAttemptFailed {
                tool,
                attempt,
                error,
            } => tracing::warn!(tool, attempt, error, "tool attempt failed"),
            Diagnostic::ToolAttemptAbandoned {
                tool,
                attempt,
                timeout_ms,
            } => tracing::warn!(tool, attempt, timeout_ms, "tool attempt abandoned after timeout"),
            Diagnostic::ToolSucceeded { tool, attempts } => {
                tracing::debug!(tool, attempts, "tool succeeded")
            }
            Diagnostic::ValidationFailed { tool, details } => {
                tracing::warn!(tool, details, "tool input failed validation")
            }
            Diagnostic::SandboxDenied { tool, path, reason } => tracing::warn!(
                security = true,
                tool,
                path,
                reason,
                "sandbox denied path access"
            ),
            Diagnostic::RequestRetry {
                attempt,
                delay_ms,
                error,
            } => tracing::warn!(attempt, delay_ms, error, "retrying request after error"),
            Diagnostic::EventEmitted { kind } => tracing::trace!(kind, "run event emitted"),
            Diagnostic::FrameSkipped { frame, reason } => {
                tracing::warn!(frame, reason, "skipping malformed frame")
            }
            Diagnostic::ClientDisconnected => tracing::info!("run client disconnected"),
        }
    }
}

/// Collects diagnostics in memory.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    events: Arc<Mutex<Vec<Diagnostic>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything recorded so far.
    pub fn events(&self) -> Vec<Diagnostic> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    /// Number of recorded events matching a predicate.
    pub fn count(&self, predicate: impl Fn(&Diagnostic) -> bool) -> usize {
        self.events().iter().filter(|e| predicate(e)).count()
    }
}

impl DiagnosticSink for MemorySink {
    fn record(&self, event: Diagnostic) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

/// Default sink shared by components that were not given one.
pub fn default_sink() -> Arc<dyn DiagnosticSink> {
    Arc::new(TracingSink)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_sink_records_in_order() {
        let sink = MemorySink::new();
        sink.record(Diagnostic::ClientDisconnected);
        sink.record(Diagnostic::EventEmitted {
            kind: "RUN_STARTED".into(),
        });

        let events = sink.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0], Diagnostic::ClientDisconnected);
        assert_eq!(
            sink.count(|e| matches!(e, Diagnostic::EventEmitted { .. })),
            1
        );
    }

    #[test]
    fn serializes_with_diagnostic_tag() {
        let value = serde_json::to_value(Diagnostic::EventEmitted {
            kind: "RUN_FINISHED".into(),
        })
        .unwrap();
        assert_eq!(
            value,
            serde_json::json!({ "diagnostic": "event_emitted", "kind": "RUN_FINISHED" })
        );

        let value = serde_json::to_value(Diagnostic::ClientDisconnected).unwrap();
        assert_eq!(value, serde_json::json!({ "diagnostic": "client_disconnected" }));
    }

    #[test]
    fn clones_share_storage() {
        let sink = MemorySink::new();
        let clone = sink.clone();
        clone.record(Diagnostic::ClientDisconnected);
        assert_eq!(sink.events().len(), 1);
    }
}
