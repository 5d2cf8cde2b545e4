//! Tests for the run consumer: decoding, reduction and cancellation.

use std::sync::{Arc, Mutex};

use futures::stream;
use pretty_assertions::assert_eq;
use runline::consumer::*;
use runline::diagnostics::{Diagnostic, MemorySink};
use runline::error::RunlineError;
use runline::protocol::{encode_frame, ExecuteRequest, FrameStyle, RunEvent};
use serde_json::json;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn frame(event: &RunEvent) -> Vec<u8> {
    encode_frame(event, FrameStyle::SseWithEvent)
        .unwrap()
        .into_bytes()
}

/// A live stream whose chunks are pushed by the test.
fn live_stream() -> (
    mpsc::UnboundedSender<Result<Vec<u8>, RunlineError>>,
    UnboundedReceiverStream<Result<Vec<u8>, RunlineError>>,
) {
    let (tx, rx) = mpsc::unbounded_channel();
    (tx, UnboundedReceiverStream::new(rx))
}

#[tokio::test]
async fn deltas_reconstruct_the_message_text() {
    let deltas = ["The ", "quick ", "brown ", "fox", " ", "jumps."];
    let mut events = vec![RunEvent::started()];
    events.extend(deltas.iter().map(|d| RunEvent::text(*d)));
    events.push(RunEvent::finished());

    // one byte per chunk: every frame is split across reads
    let bytes: Vec<u8> = events.iter().flat_map(frame).collect();
    let chunks = bytes.into_iter().map(|b| Ok::<_, RunlineError>(vec![b]));

    let consumer = RunConsumer::new(ConversationStore::new());
    let summary = consumer.consume_stream(stream::iter(chunks)).await;

    assert_eq!(summary.outcome, RunOutcome::Finished);
    let conversation = consumer.store().snapshot();
    assert_eq!(conversation.len(), 1);
    assert_eq!(conversation.messages()[0].content, deltas.concat());
    assert!(!conversation.messages()[0].is_streaming);
}

#[tokio::test]
async fn mixed_sse_forms_are_accepted() {
    let body = [
        "event: RUN_STARTED\ndata: {}\n\n",
        "data: {\"type\":\"TEXT_MESSAGE_CONTENT\",\"data\":{\"delta\":\"ab\"}}\n\n",
        "event: TEXT_MESSAGE_CONTENT\ndata: {\"delta\":\"cd\"}\n\n",
        "{\"type\":\"RUN_FINISHED\",\"data\":{}}\n",
    ]
    .concat();

    let consumer = RunConsumer::new(ConversationStore::new());
    let summary = consumer
        .consume_stream(stream::iter([Ok::<_, RunlineError>(body)]))
        .await;

    assert_eq!(summary.outcome, RunOutcome::Finished);
    assert_eq!(consumer.store().snapshot().messages()[0].content, "abcd");
}

#[tokio::test]
async fn stop_mid_stream_freezes_the_message() {
    let consumer = RunConsumer::new(ConversationStore::new());
    let (tx, stream) = live_stream();
    let ticket = consumer.begin_run();

    let task = {
        let consumer = consumer.clone();
        let ticket = ticket.clone();
        tokio::spawn(async move { consumer.consume(&ticket, stream).await })
    };

    tx.send(Ok(frame(&RunEvent::started()))).unwrap();
    tx.send(Ok(frame(&RunEvent::text("one ")))).unwrap();
    tx.send(Ok(frame(&RunEvent::text("two ")))).unwrap();
    while consumer.store().snapshot().messages().first().map(|m| m.content.as_str()) != Some("one two ") {
        tokio::task::yield_now().await;
    }

    assert!(consumer.stop());
    assert!(!consumer.store().snapshot().is_streaming());

    // late frames after the stop are never applied
    for delta in ["three ", "four ", "five"] {
        let _ = tx.send(Ok(frame(&RunEvent::text(delta))));
    }
    let summary = task.await.unwrap();

    assert_eq!(summary.outcome, RunOutcome::Cancelled);
    let conversation = consumer.store().snapshot();
    assert_eq!(conversation.messages()[0].content, "one two ");
    assert!(!conversation.messages()[0].is_streaming);
    assert!(!consumer.stop());
}

#[tokio::test]
async fn new_run_cancels_the_previous_one() {
    let consumer = RunConsumer::new(ConversationStore::new());
    let (first_tx, first_stream) = live_stream();
    let first = consumer.begin_run();
    let first_task = {
        let consumer = consumer.clone();
        let ticket = first.clone();
        tokio::spawn(async move { consumer.consume(&ticket, first_stream).await })
    };
    first_tx.send(Ok(frame(&RunEvent::text("first")))).unwrap();
    while consumer.store().snapshot().is_empty() {
        tokio::task::yield_now().await;
    }

    let second_body: Vec<u8> = [RunEvent::started(), RunEvent::text("second"), RunEvent::finished()]
        .iter()
        .flat_map(frame)
        .collect();
    let second = consumer
        .consume_stream(stream::iter([Ok::<_, RunlineError>(second_body)]))
        .await;
    let _ = first_tx.send(Ok(frame(&RunEvent::text(" late"))));

    assert_eq!(first_task.await.unwrap().outcome, RunOutcome::Cancelled);
    assert_eq!(second.outcome, RunOutcome::Finished);
    let conversation = consumer.store().snapshot();
    assert_eq!(conversation.len(), 2);
    assert_eq!(conversation.messages()[0].content, "first");
    assert_eq!(conversation.messages()[1].content, "second");
    assert!(!conversation.is_streaming());
}

#[tokio::test]
async fn malformed_frames_do_not_abort_the_stream() {
    let sink = MemorySink::new();
    let consumer = RunConsumer::new(ConversationStore::new()).with_sink(Arc::new(sink.clone()));
    let chunks: Vec<Result<Vec<u8>, RunlineError>> = vec![
        Ok(frame(&RunEvent::started())),
        Ok(b"data: {\"type\":\"TEXT_MESSAGE_CONTENT\"\n\n".to_vec()),
        Ok(b"data: [1, 2, 3]\n\n".to_vec()),
        Ok(frame(&RunEvent::text("still here"))),
        Ok(frame(&RunEvent::finished())),
    ];

    let summary = consumer.consume_stream(stream::iter(chunks)).await;

    assert_eq!(summary.outcome, RunOutcome::Finished);
    assert_eq!(summary.frames_skipped, 2);
    assert_eq!(
        sink.count(|e| matches!(e, Diagnostic::FrameSkipped { .. })),
        2
    );
    assert_eq!(consumer.store().snapshot().messages()[0].content, "still here");
}

#[tokio::test]
async fn conversation_stays_usable_after_run_error() {
    let consumer = RunConsumer::new(ConversationStore::new());
    let failed: Vec<u8> = [RunEvent::started(), RunEvent::error("tool crashed")]
        .iter()
        .flat_map(frame)
        .collect();
    let ok: Vec<u8> = [RunEvent::started(), RunEvent::text("fine"), RunEvent::finished()]
        .iter()
        .flat_map(frame)
        .collect();

    let first = consumer
        .consume_stream(stream::iter([Ok::<_, RunlineError>(failed)]))
        .await;
    let second = consumer
        .consume_stream(stream::iter([Ok::<_, RunlineError>(ok)]))
        .await;

    assert_eq!(first.outcome, RunOutcome::Errored("tool crashed".into()));
    assert_eq!(second.outcome, RunOutcome::Finished);
    let conversation = consumer.store().snapshot();
    assert_eq!(conversation.notifications()[0].level, NotificationLevel::Error);
    assert_eq!(conversation.messages()[1].content, "fine");
}

#[tokio::test]
async fn submit_streams_from_the_execute_endpoint() {
    let server = MockServer::start().await;
    let body: String = [
        RunEvent::started(),
        RunEvent::ToolCallStart {
            name: "search".into(),
        },
        RunEvent::ToolCallEnd {
            name: "search".into(),
            result: json!({ "hits": 1 }),
        },
        RunEvent::text("found it"),
        RunEvent::finished(),
    ]
    .iter()
    .map(|e| encode_frame(e, FrameStyle::SseWithEvent).unwrap())
    .collect();
    Mock::given(method("POST"))
        .and(path("/api/execute"))
        .and(header("accept", "text/event-stream"))
        .and(body_json(json!({ "prompt": "find it", "conversationId": "c-9" })))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_string(body),
        )
        .expect(1)
        .mount(&server)
        .await;

    let observed = Arc::new(Mutex::new(Vec::new()));
    let observed_in_cb = observed.clone();
    let consumer = RunConsumer::new(ConversationStore::new()).with_observer(Arc::new(
        move |event: &RunEvent| observed_in_cb.lock().unwrap().push(event.kind()),
    ));
    let client = RunClient::new(format!("{}/api/execute", server.uri())).unwrap();

    let summary = consumer
        .submit(&client, &ExecuteRequest::new("find it").with_conversation_id("c-9"))
        .await
        .unwrap();

    assert_eq!(summary.outcome, RunOutcome::Finished);
    assert_eq!(observed.lock().unwrap().len(), 5);
    let conversation = consumer.store().snapshot();
    let roles: Vec<Role> = conversation.messages().iter().map(|m| m.role).collect();
    assert_eq!(roles, vec![Role::User, Role::Assistant, Role::Tool]);
    assert_eq!(conversation.messages()[1].content, "found it");
    let call = conversation.messages()[2].tool_call.as_ref().unwrap();
    assert_eq!(call.status, ToolCallStatus::Completed);
}

#[tokio::test]
async fn submit_surfaces_endpoint_errors() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/execute"))
        .respond_with(ResponseTemplate::new(400).set_body_string("prompt cannot be empty"))
        .mount(&server)
        .await;

    let consumer = RunConsumer::new(ConversationStore::new());
    let client = RunClient::new(format!("{}/api/execute", server.uri())).unwrap();

    let err = consumer
        .submit(&client, &ExecuteRequest::new(" "))
        .await
        .unwrap_err();

    assert_eq!(err.status(), Some(400));
    let conversation = consumer.store().snapshot();
    assert_eq!(conversation.notifications().len(), 1);
    assert!(!conversation.is_streaming());
}
