//! runline: resilient agent tool execution and run event streaming.
//!
//! Tools are wrapped with validation, path sandboxing, timeouts and retry
//! ([`tools::SafeTool`]). A server sequences each run into an ordered
//! stream of [`protocol::RunEvent`]s ([`protocol::RunEmitter`]), and a client
//! folds that stream into a conversation ([`consumer::RunConsumer`]) while
//! ancillary requests retry transient failures ([`client::RequestClient`]).
//!
//! # Quick Start
//!
//! ```no_run
//! use runline::prelude::*;
//! use serde_json::json;
//!
//! # async fn example() -> runline::error::Result<()> {
//! let tool = FnTool::new("echo", "Echo the input", |input| async move {
//!     Ok(input.into_value())
//! });
//! let safe = SafeTool::new(tool, SafetyPolicy::default());
//! let result = safe.invoke(ToolInput::from(json!({ "text": "hi" }))).await?;
//! println!("{result}");
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod consumer;
pub mod diagnostics;
pub mod error;
pub mod prelude;
pub mod protocol;
pub mod tools;
pub mod util;

#[cfg(feature = "server")]
pub mod server;

#[cfg(feature = "cli")]
pub mod cli;
