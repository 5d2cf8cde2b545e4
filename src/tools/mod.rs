//! Tool capabilities and the safety wrapper around them.

pub mod input;
pub mod safety;
pub mod sandbox;
pub mod tool;
pub mod types;
pub mod validation;

pub use input::{ParsedInput, ToolInput};
pub use safety::{RetryOutcome, SafeTool, SafetyPolicy, ToolFailure, ToolInvocationRequest};
pub use sandbox::{PathSandbox, SandboxViolation, ViolationReason};
pub use tool::{FnTool, Invocable};
pub use types::InputSchema;
pub use validation::validate_input;
