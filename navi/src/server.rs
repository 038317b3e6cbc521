//! HTTP transport for inbound events and the admin endpoints.
//!
//! The broker delivers each message as `POST /events/{event}` with the job as
//! the JSON body. The response status tells it what to do next: 2xx
//! acknowledges, 422 drops a message that can never succeed, and 503 asks for
//! redelivery.

use crate::dispatch::Dispatcher;
use crate::errors::TaskError;
use crate::metrics_defs::EVENTS_INFLIGHT;
use crate::reconciler::Outcome;
use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Serialize;
use serde_json::Value;
use shared::gauge;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::net::TcpListener;
use tokio::sync::Semaphore;

#[derive(Clone)]
struct EventState {
    dispatcher: Arc<Dispatcher>,
    permits: Arc<Semaphore>,
}

/// Routes for event ingestion. At most `prefetch` events are processed at
/// once; further requests wait for a permit.
pub fn router(dispatcher: Arc<Dispatcher>, prefetch: usize) -> Router {
    let state = EventState {
        dispatcher,
        permits: Arc::new(Semaphore::new(prefetch)),
    };

    Router::new()
        .route("/events/{event}", post(handle_event))
        .with_state(state)
}

#[derive(Serialize)]
struct EventResponse {
    outcome: &'static str,
    #[serde(rename = "elasticUrl", skip_serializing_if = "Option::is_none")]
    routing_key: Option<String>,
}

impl From<Outcome> for EventResponse {
    fn from(outcome: Outcome) -> Self {
        EventResponse {
            outcome: outcome.as_str(),
            routing_key: outcome.routing_key().map(str::to_string),
        }
    }
}

impl IntoResponse for EventResponse {
    fn into_response(self) -> Response {
        (StatusCode::OK, Json(self)).into_response()
    }
}

#[derive(Serialize)]
struct ApiErrorResponse {
    error_message: String,
    kind: &'static str,
    retryable: bool,
}

impl IntoResponse for TaskError {
    fn into_response(self) -> Response {
        let status = match &self {
            TaskError::UnknownEvent(_) => StatusCode::NOT_FOUND,
            err if err.is_permanent() => StatusCode::UNPROCESSABLE_ENTITY,
            _ => StatusCode::SERVICE_UNAVAILABLE,
        };

        let body = Json(ApiErrorResponse {
            error_message: self.to_string(),
            kind: self.kind(),
            retryable: !self.is_permanent(),
        });

        (status, body).into_response()
    }
}

async fn handle_event(
    State(state): State<EventState>,
    Path(event): Path<String>,
    body: Bytes,
) -> Result<EventResponse, TaskError> {
    let payload: Value = serde_json::from_slice(&body)
        .map_err(|err| TaskError::InvalidEvent(format!("body is not json: {err}")))?;

    let _permit = state
        .permits
        .acquire()
        .await
        .map_err(|_| TaskError::ShuttingDown)?;

    let _inflight = InflightGuard::new();
    state
        .dispatcher
        .handle(&event, &payload)
        .await
        .map(EventResponse::from)
}

/// Tracks the in-flight gauge, including for requests dropped mid-way when
/// the client disconnects.
struct InflightGuard;

impl InflightGuard {
    fn new() -> Self {
        gauge!(EVENTS_INFLIGHT).increment(1.0);
        InflightGuard
    }
}

impl Drop for InflightGuard {
    fn drop(&mut self) {
        gauge!(EVENTS_INFLIGHT).decrement(1.0);
    }
}

/// Liveness and readiness endpoints.
pub fn admin_router(ready: Arc<AtomicBool>) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok\n" }))
        .route("/ready", get(ready_handler))
        .with_state(ready)
}

async fn ready_handler(State(ready): State<Arc<AtomicBool>>) -> Response {
    match ready.load(Ordering::Relaxed) {
        true => (StatusCode::OK, "ok\n").into_response(),
        false => (StatusCode::SERVICE_UNAVAILABLE, "not ready\n").into_response(),
    }
}

/// Serves `app` until `shutdown` resolves. In-flight requests are allowed to
/// finish.
pub async fn serve<F>(listener: TcpListener, app: Router, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
}

/// Resolves on ctrl-c, or SIGTERM on unix.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown signal received");
}
