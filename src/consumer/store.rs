//! Shared conversation state plus the currently active run.

use std::sync::{Arc, Mutex, MutexGuard};

use tokio_util::sync::CancellationToken;

use super::conversation::{Conversation, Message};
use super::reducer::{Applied, RunReducer};
use crate::protocol::RunEvent;

/// Handle for one run started through [`ConversationStore::begin_run`].
#[derive(Debug, Clone)]
pub struct RunTicket {
    run_id: u64,
    cancel: CancellationToken,
}

impl RunTicket {
    pub fn run_id(&self) -> u64 {
        self.run_id
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

#[derive(Debug)]
struct ActiveRun {
    run_id: u64,
    cancel: CancellationToken,
    reducer: RunReducer,
}

#[derive(Debug, Default)]
struct StoreState {
    conversation: Conversation,
    active: Option<ActiveRun>,
    next_run: u64,
}

/// Owns the conversation. At most one run streams into it at a time; every
/// mutation happens under one lock so stop, apply and begin never interleave.
#[derive(Debug, Clone, Default)]
pub struct ConversationStore {
    state: Arc<Mutex<StoreState>>,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_conversation(conversation: Conversation) -> Self {
        Self {
            state: Arc::new(Mutex::new(StoreState {
                conversation,
                ..StoreState::default()
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Copy of the current conversation.
    pub fn snapshot(&self) -> Conversation {
        self.lock().conversation.clone()
    }

    pub fn push_user(&self, content: impl Into<String>) {
        self.lock().conversation.push(Message::user(content));
    }

    /// Stop any active run, then clear the transcript.
    pub fn clear(&self) {
        let mut state = self.lock();
        stop_active(&mut state);
        state.conversation.clear();
    }

    pub fn active_run(&self) -> Option<u64> {
        self.lock().active.as_ref().map(|run| run.run_id)
    }

    /// Start a new run, stopping the previous one first.
    pub fn begin_run(&self) -> RunTicket {
        let mut state = self.lock();
        stop_active(&mut state);

        state.next_run += 1;
        let ticket = RunTicket {
            run_id: state.next_run,
            cancel: CancellationToken::new(),
        };
        state.active = Some(ActiveRun {
            run_id: ticket.run_id,
            cancel: ticket.cancel.clone(),
            reducer: RunReducer::new(),
        });
        ticket
    }

    /// Apply an event for `run_id`. Events for a run that is no longer
    /// active are dropped.
    pub fn apply(&self, run_id: u64, event: RunEvent) -> Applied {
        let mut state = self.lock();
        let StoreState {
            conversation,
            active,
            ..
        } = &mut *state;

        let Some(run) = active.as_mut().filter(|run| run.run_id == run_id) else {
            return Applied::Ignored;
        };
        if run.cancel.is_cancelled() {
            return Applied::Ignored;
        }

        let applied = run.reducer.apply(conversation, event);
        if run.reducer.is_terminated() {
            *active = None;
        }
        applied
    }

    /// End `run_id` without a terminal event. Returns false if it was not
    /// the active run.
    pub fn interrupt(&self, run_id: u64, notice: Option<String>) -> bool {
        let mut state = self.lock();
        let StoreState {
            conversation,
            active,
            ..
        } = &mut *state;

        match active.take() {
            Some(mut run) if run.run_id == run_id => {
                run.cancel.cancel();
                run.reducer.interrupt(conversation, notice);
                true
            }
            other => {
                *active = other;
                false
            }
        }
    }

    /// Abort the active run and clear its streaming flag. Safe to call
    /// repeatedly; returns whether a run was stopped.
    pub fn stop(&self) -> bool {
        stop_active(&mut self.lock())
    }
}

fn stop_active(state: &mut StoreState) -> bool {
    match state.active.take() {
        Some(mut run) => {
            run.cancel.cancel();
            run.reducer.interrupt(&mut state.conversation, None);
            true
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stop_clears_streaming_and_drops_late_events() {
        let store = ConversationStore::new();
        let ticket = store.begin_run();
        store.apply(ticket.run_id(), RunEvent::started());
        store.apply(ticket.run_id(), RunEvent::text("ab"));
        assert!(store.snapshot().is_streaming());

        assert!(store.stop());
        assert!(!store.stop());
        assert!(ticket.is_cancelled());
        assert!(!store.snapshot().is_streaming());

        assert_eq!(store.apply(ticket.run_id(), RunEvent::text("cd")), Applied::Ignored);
        assert_eq!(store.snapshot().messages()[0].content, "ab");
    }

    #[test]
    fn new_run_cancels_the_previous_one() {
        let store = ConversationStore::new();
        let first = store.begin_run();
        store.apply(first.run_id(), RunEvent::text("one"));

        let second = store.begin_run();
        assert!(first.is_cancelled());
        assert_eq!(store.active_run(), Some(second.run_id()));

        store.apply(first.run_id(), RunEvent::text("stale"));
        store.apply(second.run_id(), RunEvent::text("two"));

        let conversation = store.snapshot();
        assert_eq!(conversation.len(), 2);
        assert_eq!(conversation.messages()[0].content, "one");
        assert_eq!(conversation.messages()[1].content, "two");
        assert!(!conversation.messages()[0].is_streaming);
    }

    #[test]
    fn terminal_event_releases_the_run() {
        let store = ConversationStore::new();
        let ticket = store.begin_run();
        store.apply(ticket.run_id(), RunEvent::finished());
        assert_eq!(store.active_run(), None);
        assert!(!store.interrupt(ticket.run_id(), None));
    }

    #[test]
    fn interrupt_only_touches_the_named_run() {
        let store = ConversationStore::new();
        let ticket = store.begin_run();
        assert!(!store.interrupt(ticket.run_id() + 1, None));
        assert_eq!(store.active_run(), Some(ticket.run_id()));

        assert!(store.interrupt(ticket.run_id(), Some("stream closed".into())));
        assert_eq!(store.snapshot().notifications().len(), 1);
    }
}
