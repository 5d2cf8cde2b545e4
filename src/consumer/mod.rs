//! Client-side run consumption: decode the event stream, fold it into a
//! conversation, and keep it cancellable.

pub mod conversation;
pub mod reducer;
pub mod run;
pub mod store;
pub mod transport;

pub use conversation::{
    Conversation, Message, Notification, NotificationLevel, Role, ToolCallEntry, ToolCallStatus,
};
pub use reducer::{Applied, RunReducer};
pub use run::{EventObserver, RunConsumer, RunOutcome, RunSummary};
pub use store::{ConversationStore, RunTicket};
pub use transport::{RunByteStream, RunClient};
