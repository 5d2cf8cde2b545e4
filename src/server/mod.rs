//! HTTP surface for runs: `POST /api/execute` answered with an event stream.

pub mod driver;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::header::{CACHE_CONTROL, CONTENT_TYPE};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use bytes::Bytes;
use serde_json::json;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

pub use driver::{EchoDriver, RunDriver};

use crate::diagnostics::{default_sink, DiagnosticSink};
use crate::error::RunlineError;
use crate::protocol::{encode_frame, ExecuteRequest, FrameStyle, RunEmitter};

/// Shared handler state.
#[derive(Clone)]
pub struct ServerState {
    driver: Arc<dyn RunDriver>,
    sink: Arc<dyn DiagnosticSink>,
    frame_style: FrameStyle,
}

impl ServerState {
    pub fn new(driver: Arc<dyn RunDriver>) -> Self {
        Self {
            driver,
            sink: default_sink(),
            frame_style: FrameStyle::default(),
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn DiagnosticSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_frame_style(mut self, style: FrameStyle) -> Self {
        self.frame_style = style;
        self
    }
}

/// Router with the default state for `driver`.
pub fn router(driver: Arc<dyn RunDriver>) -> Router {
    router_with_state(ServerState::new(driver))
}

pub fn router_with_state(state: ServerState) -> Router {
    Router::new()
        .route("/api/execute", post(execute_handler))
        .with_state(Arc::new(state))
}

/// Bind `addr` and serve until the process is stopped.
pub async fn serve(addr: SocketAddr, app: Router) -> Result<(), RunlineError> {
    info!(%addr, "binding run server");
    let listener = TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "run server ready");
    axum::serve(listener, app.into_make_service()).await?;
    Ok(())
}

async fn execute_handler(
    State(state): State<Arc<ServerState>>,
    Json(request): Json<ExecuteRequest>,
) -> Response {
    if request.prompt.trim().is_empty() {
        warn!("rejecting run with empty prompt");
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "prompt cannot be empty" })),
        )
            .into_response();
    }
    info!(
        model = request.model.as_deref(),
        conversation = request.conversation_id.as_deref(),
        "starting run"
    );

    let (emitter, mut rx) = RunEmitter::channel();
    let emitter = emitter.with_sink(state.sink.clone());
    // Dropping the response body (client gone) cancels the run.
    let client_gone = emitter.cancellation_token().drop_guard();

    tokio::spawn(drive_run(state.driver.clone(), request, emitter));

    let style = state.frame_style;
    let frames = async_stream::stream! {
        let _client_gone = client_gone;
        while let Some(event) = rx.recv().await {
            yield encode_frame(&event, style).map(Bytes::from);
        }
    };

    (
        [(CONTENT_TYPE, "text/event-stream"), (CACHE_CONTROL, "no-cache")],
        Body::from_stream(frames),
    )
        .into_response()
}

/// Run `driver` between `RUN_STARTED` and a terminal event, abandoning it
/// once the emitter's cancellation token fires.
pub async fn drive_run(driver: Arc<dyn RunDriver>, request: ExecuteRequest, mut emitter: RunEmitter) {
    if let Err(e) = emitter.begin() {
        warn!(error = %e, "run could not start");
        return;
    }

    let cancel = emitter.cancellation_token();
    let outcome = tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(RunlineError::Cancelled),
        result = driver.drive(request, &mut emitter) => result,
    };

    if emitter.is_terminal() {
        return;
    }
    let ended = match outcome {
        Ok(()) => emitter.finish(),
        Err(RunlineError::Cancelled | RunlineError::Disconnected) => {
            emitter.note_disconnect();
            debug!("client disconnected, run abandoned");
            return;
        }
        Err(e) => {
            warn!(error = %e, "run failed");
            emitter.fail(e.to_string())
        }
    };
    if let Err(e) = ended {
        debug!(error = %e, "terminal event not delivered");
    }
}
