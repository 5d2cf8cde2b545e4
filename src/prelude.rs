//! Convenience re-exports for common use.

pub use crate::client::{RequestClient, RetryConfig, RetryPreset};
pub use crate::config::RunlineConfig;
pub use crate::consumer::{Conversation, ConversationStore, RunClient, RunConsumer, RunOutcome};
pub use crate::diagnostics::{Diagnostic, DiagnosticSink, MemorySink, TracingSink};
pub use crate::error::{Result, RunlineError};
pub use crate::protocol::{ExecuteRequest, RunEmitter, RunEvent};
pub use crate::tools::{FnTool, InputSchema, Invocable, SafeTool, SafetyPolicy, ToolInput};
