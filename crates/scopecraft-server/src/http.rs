use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::{Method, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::stream::{self, Stream};
use scopecraft_core::{EventBroadcaster, StateStore};
use scopecraft_orchestrator::{DecisionGate, Manager};
use scopecraft_types::{AppState as Session, FileRef, ScopecraftError};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};
use uuid::Uuid;

/// Shared handle every route extracts via `State` (spec §6.2's four logical
/// operations plus the ambient snapshot read). Cheap to clone: every field
/// is itself an `Arc`/`Clone` handle into the same running orchestrator.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<StateStore>,
    pub broadcaster: EventBroadcaster,
    pub manager: Arc<Manager>,
    pub decision_gate: Arc<DecisionGate>,
}

pub fn app_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    Router::new()
        .route("/sessions", post(create_session))
        .route("/sessions/{id}", get(get_session))
        .route("/sessions/{id}/messages", post(send_message))
        .route("/sessions/{id}/decisions/{decision_id}", post(submit_decision))
        .route("/sessions/{id}/events", get(subscribe_events))
        .layer(cors)
        .with_state(state)
}

/// Binds and serves the router, draining on Ctrl-C like the rest of this
/// lineage's server crates.
pub async fn serve(addr: SocketAddr, state: AppState) -> anyhow::Result<()> {
    let app = app_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("scopecraft-server listening on http://{addr}");
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if tokio::signal::ctrl_c().await.is_err() {
                futures::future::pending::<()>().await;
            }
        })
        .await?;
    Ok(())
}

fn map_err(err: ScopecraftError) -> StatusCode {
    match err.kind() {
        "not_found" => StatusCode::NOT_FOUND,
        "already_exists" => StatusCode::CONFLICT,
        "invariant_violation" | "intake_invalid" | "stale_decision" => StatusCode::BAD_REQUEST,
        "decision_already_pending" => StatusCode::CONFLICT,
        _ => {
            error!(error = %err, "orchestrator request failed");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

/// Spawns the manager loop for `session_id` in the background; the caller
/// (create_session / send_message) doesn't block on a full run completing
/// since that may involve an `awaiting_user` suspension or minutes of
/// worker dispatch — clients observe progress over `/events` instead.
fn spawn_run(manager: Arc<Manager>, session_id: String) {
    tokio::spawn(async move {
        if let Err(err) = manager.run(&session_id).await {
            error!(session_id, error = %err, "manager run ended in error");
        }
    });
}

#[derive(Debug, Deserialize)]
struct CreateSessionRequest {
    #[serde(default)]
    query: String,
    #[serde(default)]
    files: Vec<FileRef>,
}

#[derive(Debug, Serialize, Deserialize)]
struct CreateSessionResponse {
    session_id: String,
}

async fn create_session(
    State(state): State<AppState>,
    Json(req): Json<CreateSessionRequest>,
) -> Result<Json<CreateSessionResponse>, StatusCode> {
    let session_id = Uuid::new_v4().to_string();
    state
        .store
        .create(session_id.clone(), req.query, req.files)
        .await
        .map_err(map_err)?;
    spawn_run(state.manager.clone(), session_id.clone());
    Ok(Json(CreateSessionResponse { session_id }))
}

async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Session>, StatusCode> {
    state.store.read(&id).await.map(Json).map_err(map_err)
}

#[derive(Debug, Deserialize)]
struct SendMessageRequest {
    text: String,
    #[serde(default)]
    attachments: Vec<FileRef>,
}

/// spec §6.2 `send_message`: appends to the session's query/files, and if
/// the session was idle or already complete, kicks off a fresh manager
/// iteration over the updated intake.
async fn send_message(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<SendMessageRequest>,
) -> Result<Json<Session>, StatusCode> {
    let outcome = state
        .store
        .apply(&id, scopecraft_core::MutationKind::StateChange, move |session| {
            if !session.query.trim().is_empty() {
                session.query.push('\n');
            }
            session.query.push_str(&req.text);
            session.files.extend(req.attachments);
            Ok(())
        })
        .await
        .map_err(map_err)?;

    let idle_or_done = matches!(
        outcome.snapshot.status,
        scopecraft_types::SessionStatus::New
            | scopecraft_types::SessionStatus::IntakeReady
            | scopecraft_types::SessionStatus::Complete
            | scopecraft_types::SessionStatus::Failed
    );
    if idle_or_done {
        spawn_run(state.manager.clone(), id);
    }
    Ok(Json(outcome.snapshot))
}

#[derive(Debug, Deserialize)]
struct SubmitDecisionRequest {
    response: String,
}

async fn submit_decision(
    State(state): State<AppState>,
    Path((id, decision_id)): Path<(String, String)>,
    Json(req): Json<SubmitDecisionRequest>,
) -> Result<StatusCode, StatusCode> {
    state
        .decision_gate
        .submit(&id, &decision_id, req.response)
        .await
        .map_err(map_err)?;
    Ok(StatusCode::ACCEPTED)
}

/// spec §6.2 `subscribe_events`, bound to SSE with a 10s keep-alive matching
/// the convention used elsewhere in this lineage's server crates. Built on
/// `futures::stream::unfold` rather than `BroadcastStream` since
/// `EventBroadcaster::subscribe` hands back an opaque `Subscription`
/// (`recv(&mut self) -> Option<EventEnvelope>`), not a raw
/// `broadcast::Receiver`.
async fn subscribe_events(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let subscription = state.broadcaster.subscribe(&id).await;
    let stream = stream::unfold(subscription, |mut sub| async move {
        let envelope = sub.recv().await?;
        let payload = serde_json::to_string(&envelope).unwrap_or_default();
        Some((Ok(Event::default().event(envelope.event_type.clone()).data(payload)), sub))
    });
    Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(10)))
}
