//! Run event protocol: event types, wire framing, and the server-side emitter.

pub mod emitter;
pub mod events;
pub mod frame;
pub mod request;

pub use emitter::{RunEmitter, RunState};
pub use events::{RunEvent, RunEventKind};
pub use frame::{encode_frame, FrameDecoder, FrameError, FrameStyle};
pub use request::ExecuteRequest;
