//! Server-side sequencing of one run onto an event channel.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::events::RunEvent;
use crate::diagnostics::{default_sink, Diagnostic, DiagnosticSink};
use crate::error::RunlineError;
use crate::tools::{Invocable, ToolInput};

/// Observable state of a run.
///
/// `Idle → Started → {Started ⇄ ToolPending, Started ⇄ Streaming} →
/// Finished | Errored`; the last two are absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Started,
    ToolPending,
    Streaming,
    Finished,
    Errored,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Active,
    Finished,
    Errored,
}

/// Emits a totally ordered [`RunEvent`] stream for a single run.
///
/// Each event is pushed to the channel as soon as it is produced. When the
/// receiving side goes away the emitter's cancellation token fires so the
/// producer can abandon outstanding work.
pub struct RunEmitter {
    tx: mpsc::UnboundedSender<RunEvent>,
    phase: Phase,
    pending_tools: HashSet<String>,
    streaming: bool,
    cancel: CancellationToken,
    disconnect_noted: AtomicBool,
    sink: Arc<dyn DiagnosticSink>,
}

impl RunEmitter {
    pub fn new(tx: mpsc::UnboundedSender<RunEvent>) -> Self {
        Self {
            tx,
            phase: Phase::Idle,
            pending_tools: HashSet::new(),
            streaming: false,
            cancel: CancellationToken::new(),
            disconnect_noted: AtomicBool::new(false),
            sink: default_sink(),
        }
    }

    /// Create an emitter together with the receiving end of its channel.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<RunEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    pub fn with_sink(mut self, sink: Arc<dyn DiagnosticSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn state(&self) -> RunState {
        match self.phase {
            Phase::Idle => RunState::Idle,
            Phase::Finished => RunState::Finished,
            Phase::Errored => RunState::Errored,
            Phase::Active if !self.pending_tools.is_empty() => RunState::ToolPending,
            Phase::Active if self.streaming => RunState::Streaming,
            Phase::Active => RunState::Started,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.phase, Phase::Finished | Phase::Errored)
    }

    /// Token cancelled once the client is known to be gone.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_disconnected(&self) -> bool {
        self.tx.is_closed()
    }

    /// Resolves when the receiving side of the channel is dropped.
    pub async fn disconnected(&self) {
        self.tx.closed().await;
        self.mark_disconnected();
    }

    /// Emit `RUN_STARTED`. Must come first, exactly once.
    pub fn begin(&mut self) -> Result<(), RunlineError> {
        if self.phase != Phase::Idle {
            return Err(self.violation("begin"));
        }
        self.phase = Phase::Active;
        self.send(RunEvent::started())
    }

    /// Emit `TOOL_CALL_START`. The same tool may not be started twice
    /// without an intervening `tool_end`.
    pub fn tool_start(&mut self, name: impl Into<String>) -> Result<(), RunlineError> {
        let name = name.into();
        self.require_active("tool_start")?;
        if self.pending_tools.contains(&name) {
            return Err(RunlineError::Protocol(format!(
                "tool '{name}' started again before it ended"
            )));
        }
        self.streaming = false;
        self.pending_tools.insert(name.clone());
        self.send(RunEvent::ToolCallStart { name })
    }

    /// Emit `TOOL_CALL_END` for a tool previously started.
    pub fn tool_end(&mut self, name: impl Into<String>, result: Value) -> Result<(), RunlineError> {
        let name = name.into();
        self.require_active("tool_end")?;
        if !self.pending_tools.remove(&name) {
            return Err(RunlineError::Protocol(format!(
                "tool '{name}' ended without a matching start"
            )));
        }
        self.send(RunEvent::ToolCallEnd { name, result })
    }

    /// Emit one `TEXT_MESSAGE_CONTENT` fragment, verbatim.
    pub fn text_delta(&mut self, delta: impl Into<String>) -> Result<(), RunlineError> {
        self.require_active("text_delta")?;
        if !self.pending_tools.is_empty() {
            return Err(RunlineError::Protocol(
                "text emitted while a tool call is pending".to_string(),
            ));
        }
        self.streaming = true;
        self.send(RunEvent::text(delta))
    }

    /// Emit `RUN_ERROR` and end the run.
    pub fn fail(&mut self, error: impl Into<String>) -> Result<(), RunlineError> {
        self.require_active("fail")?;
        self.phase = Phase::Errored;
        self.send(RunEvent::error(error))
    }

    /// Emit `RUN_FINISHED` and end the run.
    pub fn finish(&mut self) -> Result<(), RunlineError> {
        self.require_active("finish")?;
        self.phase = Phase::Finished;
        self.send(RunEvent::finished())
    }

    /// Bracket one tool invocation with start/end events.
    ///
    /// A failing tool is reported as an `{"error": ...}` result rather than
    /// ending the run.
    pub async fn call_tool<T>(&mut self, tool: &T, input: ToolInput) -> Result<Value, RunlineError>
    where
        T: Invocable + ?Sized,
    {
        let name = tool.name().to_string();
        self.tool_start(name.clone())?;
        let result = match tool.invoke(input).await {
            Ok(value) => value,
            Err(err) => json!({ "error": err.to_string() }),
        };
        self.tool_end(name, result.clone())?;
        Ok(result)
    }

    fn require_active(&self, op: &str) -> Result<(), RunlineError> {
        if self.phase == Phase::Active {
            Ok(())
        } else {
            Err(self.violation(op))
        }
    }

    fn violation(&self, op: &str) -> RunlineError {
        RunlineError::Protocol(format!("{op} not permitted in state {:?}", self.state()))
    }

    fn send(&mut self, event: RunEvent) -> Result<(), RunlineError> {
        let kind = event.kind().to_string();
        if self.tx.send(event).is_err() {
            self.mark_disconnected();
            return Err(RunlineError::Disconnected);
        }
        self.sink.record(Diagnostic::EventEmitted { kind });
        Ok(())
    }

    fn mark_disconnected(&self) {
        self.note_disconnect();
        self.cancel.cancel();
    }

    /// Record the client's departure once, however it was detected.
    pub(crate) fn note_disconnect(&self) {
        if !self.disconnect_noted.swap(true, Ordering::Relaxed) {
            self.sink.record(Diagnostic::ClientDisconnected);
        }
    }
}

impl Drop for RunEmitter {
    fn drop(&mut self) {
        if self.phase == Phase::Active {
            let _ = self
                .tx
                .send(RunEvent::error("run ended without a terminal event"));
        }
    }
}

impl std::fmt::Debug for RunEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunEmitter")
            .field("state", &self.state())
            .field("pending_tools", &self.pending_tools)
            .finish()
    }
}
