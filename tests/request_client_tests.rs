//! Tests for the retrying request client against a mock backend.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use pretty_assertions::assert_eq;
use reqwest::Method;
use runline::client::{RequestClient, RetryAttempt, RetryConfig};
use runline::diagnostics::{Diagnostic, MemorySink};
use runline::error::RunlineError;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn fast_retry(max_attempts: u32) -> RetryConfig {
    RetryConfig {
        max_attempts,
        initial_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(40),
        jitter: false,
        ..RetryConfig::default()
    }
}

#[tokio::test]
async fn retries_503_twice_then_succeeds() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/sessions"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/sessions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{ "id": "s-1" }])))
        .expect(1)
        .mount(&server)
        .await;

    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen_in_observer = seen.clone();
    let sink = MemorySink::new();
    let client = RequestClient::new(server.uri())
        .unwrap()
        .with_retry(fast_retry(3))
        .with_sink(Arc::new(sink.clone()))
        .with_observer(Arc::new(move |attempt: &RetryAttempt<'_>| {
            seen_in_observer
                .lock()
                .unwrap()
                .push((attempt.attempt_number, attempt.error.status()));
        }));

    let sessions: Value = client.get_json("/api/sessions").await.unwrap();

    assert_eq!(sessions, json!([{ "id": "s-1" }]));
    assert_eq!(*seen.lock().unwrap(), vec![(1, Some(503)), (2, Some(503))]);
    assert_eq!(
        sink.count(|e| matches!(e, Diagnostic::RequestRetry { .. })),
        2
    );
}

#[tokio::test]
async fn not_found_fails_immediately() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/memory/42"))
        .respond_with(ResponseTemplate::new(404).set_body_string("no such memory"))
        .expect(1)
        .mount(&server)
        .await;

    let observed = Arc::new(AtomicU32::new(0));
    let counter = observed.clone();
    let client = RequestClient::new(server.uri())
        .unwrap()
        .with_retry(fast_retry(5))
        .with_observer(Arc::new(move |_: &RetryAttempt<'_>| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

    let err = client.get_json::<Value>("/api/memory/42").await.unwrap_err();

    assert!(matches!(err, RunlineError::Api { status: 404, .. }));
    assert!(err.to_string().contains("no such memory"));
    assert_eq!(observed.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn exhausted_retries_surface_the_last_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/memory"))
        .respond_with(ResponseTemplate::new(502))
        .expect(3)
        .mount(&server)
        .await;

    let client = RequestClient::new(server.uri())
        .unwrap()
        .with_retry(fast_retry(3));

    let err = client
        .post_json::<_, Value>("/api/memory", &json!({ "text": "remember" }))
        .await
        .unwrap_err();

    assert_eq!(err.status(), Some(502));
}

#[tokio::test]
async fn post_sends_json_body_and_delete_accepts_empty_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/memory"))
        .and(body_json(json!({ "text": "remember" })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "id": 7 })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/api/memory/7"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let client = RequestClient::new(format!("{}/", server.uri())).unwrap();

    let created: Value = client
        .post_json("api/memory", &json!({ "text": "remember" }))
        .await
        .unwrap();
    assert_eq!(created["id"], 7);
    client.delete("/api/memory/7").await.unwrap();
}

#[tokio::test]
async fn rate_limited_preset_does_not_retry_500() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/limits"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;

    let config = RetryConfig {
        initial_delay: Duration::from_millis(10),
        jitter: false,
        ..RetryConfig::rate_limited()
    };
    let client = RequestClient::new(server.uri()).unwrap().with_retry(config);

    let err = client.get_json::<Value>("/api/limits").await.unwrap_err();
    assert_eq!(err.status(), Some(500));
}

#[tokio::test]
async fn rate_limited_preset_retries_429() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/limits"))
        .respond_with(ResponseTemplate::new(429))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/limits"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "ok": true })))
        .mount(&server)
        .await;

    let config = RetryConfig {
        initial_delay: Duration::from_millis(10),
        jitter: false,
        ..RetryConfig::rate_limited()
    };
    let client = RequestClient::new(server.uri()).unwrap().with_retry(config);

    let body: Value = client.get_json("/api/limits").await.unwrap();
    assert_eq!(body, json!({ "ok": true }));
}

#[tokio::test]
async fn cancellation_stops_backoff_and_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/slow"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let config = RetryConfig {
        max_attempts: 10,
        initial_delay: Duration::from_secs(30),
        max_delay: Duration::from_secs(30),
        jitter: false,
        ..RetryConfig::default()
    };
    let client = RequestClient::new(server.uri()).unwrap().with_retry(config);
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let started = std::time::Instant::now();
    let err = client
        .send::<Value>(Method::GET, "/api/slow", None, &cancel)
        .await
        .unwrap_err();

    assert!(matches!(err, RunlineError::Cancelled));
    assert!(!err.is_retryable());
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(server.received_requests().await.unwrap().len(), 1);
}

#[tokio::test]
async fn connection_refused_is_retried_as_transport_error() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let observed = Arc::new(AtomicU32::new(0));
    let counter = observed.clone();
    let client = RequestClient::new(format!("http://{addr}"))
        .unwrap()
        .with_retry(fast_retry(2))
        .with_observer(Arc::new(move |_: &RetryAttempt<'_>| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

    let err = client.get_json::<Value>("/api/health").await.unwrap_err();

    assert!(matches!(err, RunlineError::Network(_)));
    assert_eq!(observed.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn cancellation_aborts_an_attempt_in_flight() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/stalled"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(30)))
        .mount(&server)
        .await;

    let observed = Arc::new(AtomicU32::new(0));
    let counter = observed.clone();
    let client = RequestClient::new(server.uri())
        .unwrap()
        .with_retry(fast_retry(5))
        .with_observer(Arc::new(move |_: &RetryAttempt<'_>| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let started = std::time::Instant::now();
    let err = client
        .send::<Value>(Method::GET, "/api/stalled", None, &cancel)
        .await
        .unwrap_err();

    assert!(matches!(err, RunlineError::Cancelled));
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(observed.load(Ordering::SeqCst), 0);
    assert_eq!(server.received_requests().await.unwrap().len(), 1);
}
