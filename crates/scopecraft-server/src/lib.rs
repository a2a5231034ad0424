//! Axum binding for the orchestrator's client-facing interface (spec §6.2):
//! `create_session`, `send_message`, `submit_decision`, and
//! `subscribe_events`, plus an ambient session-snapshot read.

mod http;

pub use http::{app_router, serve, AppState};
