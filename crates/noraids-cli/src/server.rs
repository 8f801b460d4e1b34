//! Admin HTTP API: feed events by hand, force gates, inspect the daemon.

use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use noraids_core::{GateAction, SpaceEvent, already_text, changed_text, now_unix_millis};
use serde::Serialize;
use serde_json::json;
use tower_http::trace::TraceLayer;

use crate::dispatch::{Dispatcher, HandleOutcome};
use crate::gate::{GateError, RemoteGate};
use crate::notify::Notifier;
use crate::session::Transport;

/// Shared state accessible from handlers.
pub struct AppState<C, N> {
    pub dispatcher: Arc<Dispatcher<C, N>>,
    /// ISO-8601 start time, reported by `/status`.
    pub started_at: String,
}

impl<C, N> Clone for AppState<C, N> {
    fn clone(&self) -> Self {
        Self {
            dispatcher: Arc::clone(&self.dispatcher),
            started_at: self.started_at.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
struct StatusResponse {
    up_since: String,
    session: &'static str,
    tracked_keys: usize,
}

#[derive(Debug, Serialize)]
struct EventResponse {
    outcome: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    elapsed_ms: Option<u64>,
    timestamps: Vec<u64>,
}

impl From<HandleOutcome> for EventResponse {
    fn from(outcome: HandleOutcome) -> Self {
        let label = outcome.as_str();
        match outcome {
            HandleOutcome::Enabled {
                elapsed,
                timestamps,
            } => Self {
                outcome: label,
                elapsed_ms: Some(elapsed.as_millis() as u64),
                timestamps,
            },
            HandleOutcome::AlreadyEnabled { timestamps } => Self {
                outcome: label,
                elapsed_ms: None,
                timestamps,
            },
            HandleOutcome::Ignored | HandleOutcome::NotTriggered => Self {
                outcome: label,
                elapsed_ms: None,
                timestamps: Vec::new(),
            },
        }
    }
}

#[derive(Debug, Serialize)]
struct ToggleResponse {
    changed: bool,
    message: String,
}

/// Build the router with all routes.
pub fn router<C, N>(state: AppState<C, N>) -> Router
where
    C: Transport + RemoteGate,
    N: Notifier,
{
    Router::new()
        .route("/healthz", get(healthz))
        .route("/status", get(status::<C, N>))
        .route("/events", post(ingest_event::<C, N>))
        .route("/gate/{handle}/enable", post(enable_gate::<C, N>))
        .route("/gate/{handle}/disable", post(disable_gate::<C, N>))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// GET /healthz
async fn healthz() -> &'static str {
    "ok"
}

/// GET /status
async fn status<C, N>(State(state): State<AppState<C, N>>) -> Json<StatusResponse>
where
    C: Transport + RemoteGate,
    N: Notifier,
{
    Json(StatusResponse {
        up_since: state.started_at.clone(),
        session: state.dispatcher.session_phase().as_str(),
        tracked_keys: state.dispatcher.tracked_keys(),
    })
}

/// POST /events
async fn ingest_event<C, N>(
    State(state): State<AppState<C, N>>,
    Json(event): Json<SpaceEvent>,
) -> Response
where
    C: Transport + RemoteGate,
    N: Notifier,
{
    match state
        .dispatcher
        .handle_event(&event, now_unix_millis())
        .await
    {
        Ok(outcome) => Json(EventResponse::from(outcome)).into_response(),
        Err(e) => {
            tracing::error!("failed to handle posted event: {e}");
            state.dispatcher.report_error(&e).await;
            gate_failure(&e)
        }
    }
}

/// POST /gate/{handle}/enable
async fn enable_gate<C, N>(
    State(state): State<AppState<C, N>>,
    Path(handle): Path<String>,
) -> Response
where
    C: Transport + RemoteGate,
    N: Notifier,
{
    let started = Instant::now();
    let result = state.dispatcher.force_enable(&handle).await;
    toggle_response(GateAction::Enable, &handle, result, started)
}

/// POST /gate/{handle}/disable
async fn disable_gate<C, N>(
    State(state): State<AppState<C, N>>,
    Path(handle): Path<String>,
) -> Response
where
    C: Transport + RemoteGate,
    N: Notifier,
{
    let started = Instant::now();
    let result = state.dispatcher.force_disable(&handle).await;
    toggle_response(GateAction::Disable, &handle, result, started)
}

fn toggle_response(
    action: GateAction,
    handle: &str,
    result: Result<bool, GateError>,
    started: Instant,
) -> Response {
    match result {
        Ok(changed) => {
            let message = if changed {
                changed_text(action, Some(handle), started.elapsed())
            } else {
                already_text(action, Some(handle))
            };
            Json(ToggleResponse { changed, message }).into_response()
        }
        Err(e) => gate_failure(&e),
    }
}

fn gate_failure(err: &GateError) -> Response {
    let status = match err {
        GateError::InvalidHandle(_) => StatusCode::BAD_REQUEST,
        GateError::Transport(_) | GateError::Unexpected { .. } => StatusCode::BAD_GATEWAY,
    };
    (status, Json(json!({ "error": err.to_string() }))).into_response()
}
