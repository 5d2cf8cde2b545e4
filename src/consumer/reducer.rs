//! Folds one run's events into a [`Conversation`].

use uuid::Uuid;

use super::conversation::{Conversation, Message, Notification, ToolCallStatus};
use crate::protocol::RunEvent;

/// Result of applying one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Applied {
    /// The event updated the transcript; the run continues.
    Continue,
    Finished,
    Errored(String),
    /// The run had already ended; the event was dropped.
    Ignored,
}

/// Per-run reduction state: which assistant message the run streams into,
/// and whether a terminal event has been seen.
#[derive(Debug, Default)]
pub struct RunReducer {
    message_id: Option<Uuid>,
    terminated: bool,
    events_applied: usize,
}

impl RunReducer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assistant message owned by this run, once created.
    pub fn message_id(&self) -> Option<Uuid> {
        self.message_id
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    pub fn events_applied(&self) -> usize {
        self.events_applied
    }

    pub fn apply(&mut self, conversation: &mut Conversation, event: RunEvent) -> Applied {
        if self.terminated {
            return Applied::Ignored;
        }
        self.events_applied += 1;

        match event {
            RunEvent::RunStarted {} => {
                self.ensure_message(conversation);
                Applied::Continue
            }
            RunEvent::TextMessageContent { delta } => {
                let id = self.ensure_message(conversation);
                if let Some(message) = conversation.message_mut(id) {
                    message.content.push_str(&delta);
                    message.is_streaming = true;
                }
                Applied::Continue
            }
            RunEvent::ToolCallStart { name } => {
                conversation.push(Message::tool_call(name, ToolCallStatus::Running, None));
                Applied::Continue
            }
            RunEvent::ToolCallEnd { name, result } => {
                match conversation.running_tool_call_mut(&name) {
                    Some(message) => {
                        if let Some(call) = message.tool_call.as_mut() {
                            call.status = ToolCallStatus::Completed;
                            call.result = Some(result);
                        }
                    }
                    None => {
                        conversation.push(Message::tool_call(
                            name,
                            ToolCallStatus::Completed,
                            Some(result),
                        ));
                    }
                }
                Applied::Continue
            }
            RunEvent::RunError { error } => {
                conversation.notify(Notification::error(error.clone()));
                self.settle(conversation);
                Applied::Errored(error)
            }
            RunEvent::RunFinished {} => {
                self.settle(conversation);
                Applied::Finished
            }
        }
    }

    /// End the run without a terminal event, optionally raising a notice.
    /// No-op if the run already ended.
    pub fn interrupt(&mut self, conversation: &mut Conversation, notice: Option<String>) {
        if self.terminated {
            return;
        }
        if let Some(notice) = notice {
            conversation.notify(Notification::error(notice));
        }
        self.settle(conversation);
    }

    fn ensure_message(&mut self, conversation: &mut Conversation) -> Uuid {
        match self.message_id {
            Some(id) => id,
            None => {
                let id = conversation.push(Message::streaming_assistant());
                self.message_id = Some(id);
                id
            }
        }
    }

    fn settle(&mut self, conversation: &mut Conversation) {
        self.terminated = true;
        if let Some(id) = self.message_id {
            if let Some(message) = conversation.message_mut(id) {
                message.is_streaming = false;
            }
        }
    }
}
