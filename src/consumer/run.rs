//! Reads a run's byte stream into the conversation store.

use std::fmt::Display;
use std::sync::Arc;

use futures::{Stream, StreamExt};
use tracing::{debug, info};

use super::reducer::Applied;
use super::store::{ConversationStore, RunTicket};
use super::transport::RunClient;
use crate::diagnostics::{default_sink, Diagnostic, DiagnosticSink};
use crate::error::RunlineError;
use crate::protocol::{ExecuteRequest, FrameDecoder, FrameError, RunEvent};

/// How a consumed run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Finished,
    Errored(String),
    /// Stopped locally, or superseded by a newer run.
    Cancelled,
    /// The stream closed or failed before a terminal event.
    Interrupted(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub run_id: u64,
    pub outcome: RunOutcome,
    pub events_applied: usize,
    pub frames_skipped: usize,
}

/// Called with each event after it has been applied to the store.
pub type EventObserver = Arc<dyn Fn(&RunEvent) + Send + Sync>;

/// Client-side consumer. Clones share the same store.
#[derive(Clone)]
pub struct RunConsumer {
    store: ConversationStore,
    sink: Arc<dyn DiagnosticSink>,
    observer: Option<EventObserver>,
}

impl RunConsumer {
    pub fn new(store: ConversationStore) -> Self {
        Self {
            store,
            sink: default_sink(),
            observer: None,
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn DiagnosticSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_observer(mut self, observer: EventObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn store(&self) -> &ConversationStore {
        &self.store
    }

    /// Reserve a new run, cancelling the one in flight.
    pub fn begin_run(&self) -> RunTicket {
        self.store.begin_run()
    }

    /// Abort the active run. Idempotent; returns whether a run was stopped.
    pub fn stop(&self) -> bool {
        let stopped = self.store.stop();
        if stopped {
            info!("run stopped");
        }
        stopped
    }

    /// Drive `stream` until a terminal event, cancellation, or end of input.
    /// Returning drops the stream, which closes the underlying connection.
    pub async fn consume<S, B, E>(&self, ticket: &RunTicket, stream: S) -> RunSummary
    where
        S: Stream<Item = Result<B, E>>,
        B: AsRef<[u8]>,
        E: Display,
    {
        let mut stream = std::pin::pin!(stream);
        let mut decoder = FrameDecoder::new();
        let mut summary = RunSummary {
            run_id: ticket.run_id(),
            outcome: RunOutcome::Cancelled,
            events_applied: 0,
            frames_skipped: 0,
        };
        let cancel = ticket.cancellation_token().clone();

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    self.store.interrupt(ticket.run_id(), None);
                    return summary;
                }
                next = stream.next() => next,
            };

            match next {
                Some(Ok(chunk)) => {
                    for frame in decoder.push(chunk.as_ref()) {
                        if let Some(outcome) = self.handle_frame(ticket, frame, &mut summary) {
                            summary.outcome = outcome;
                            return summary;
                        }
                    }
                }
                Some(Err(e)) => {
                    let notice = format!("Run stream failed: {e}");
                    return self.interrupted(ticket, notice, summary);
                }
                None => break,
            }
        }

        if let Some(frame) = decoder.finish() {
            if let Some(outcome) = self.handle_frame(ticket, frame, &mut summary) {
                summary.outcome = outcome;
                return summary;
            }
        }
        self.interrupted(ticket, "Run ended before completion".to_string(), summary)
    }

    /// Begin a run and consume `stream` into it.
    pub async fn consume_stream<S, B, E>(&self, stream: S) -> RunSummary
    where
        S: Stream<Item = Result<B, E>>,
        B: AsRef<[u8]>,
        E: Display,
    {
        let ticket = self.begin_run();
        self.consume(&ticket, stream).await
    }

    /// Record the prompt, cancel any run in flight, then stream the new run.
    /// Only failing to open the stream is returned as an error.
    pub async fn submit(
        &self,
        client: &RunClient,
        request: &ExecuteRequest,
    ) -> Result<RunSummary, RunlineError> {
        let ticket = self.begin_run();
        self.store.push_user(request.prompt.clone());

        let opened = tokio::select! {
            biased;
            _ = ticket.cancellation_token().cancelled() => None,
            opened = client.execute(request) => Some(opened),
        };
        let stream = match opened {
            None => {
                return Ok(RunSummary {
                    run_id: ticket.run_id(),
                    outcome: RunOutcome::Cancelled,
                    events_applied: 0,
                    frames_skipped: 0,
                })
            }
            Some(Ok(stream)) => stream,
            Some(Err(e)) => {
                self.store
                    .interrupt(ticket.run_id(), Some(format!("Run failed to start: {e}")));
                return Err(e);
            }
        };

        Ok(self.consume(&ticket, stream).await)
    }

    fn handle_frame(
        &self,
        ticket: &RunTicket,
        frame: Result<RunEvent, FrameError>,
        summary: &mut RunSummary,
    ) -> Option<RunOutcome> {
        let event = match frame {
            Ok(event) => event,
            Err(FrameError { frame, reason }) => {
                summary.frames_skipped += 1;
                self.sink.record(Diagnostic::FrameSkipped { frame, reason });
                return None;
            }
        };

        debug!(run_id = ticket.run_id(), kind = %event.kind(), "applying run event");
        let observed = self.observer.as_ref().map(|_| event.clone());
        let applied = self.store.apply(ticket.run_id(), event);
        if let (Some(observer), Some(event)) = (&self.observer, observed) {
            if applied != Applied::Ignored {
                observer(&event);
            }
        }
        match applied {
            Applied::Continue => {
                summary.events_applied += 1;
                None
            }
            Applied::Finished => {
                summary.events_applied += 1;
                Some(RunOutcome::Finished)
            }
            Applied::Errored(error) => {
                summary.events_applied += 1;
                Some(RunOutcome::Errored(error))
            }
            Applied::Ignored => Some(RunOutcome::Cancelled),
        }
    }

    fn interrupted(&self, ticket: &RunTicket, notice: String, mut summary: RunSummary) -> RunSummary {
        summary.outcome = if self.store.interrupt(ticket.run_id(), Some(notice.clone())) {
            RunOutcome::Interrupted(notice)
        } else {
            RunOutcome::Cancelled
        };
        summary
    }
}

impl std::fmt::Debug for RunConsumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunConsumer")
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}
