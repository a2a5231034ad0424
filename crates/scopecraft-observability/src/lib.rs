//! Structured logging for the orchestrator. Components log through
//! [`emit_event`] with an [`ObservabilityEvent`] rather than calling
//! `tracing` macros directly with ad hoc fields, so every component's logs
//! carry the same shape and can be filtered/aggregated uniformly.

use std::path::Path;

use serde::Serialize;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initializes the global tracing subscriber: an env-filtered stdout layer,
/// plus an optional daily-rolling file layer when `log_dir` is given. The
/// returned [`WorkerGuard`] must be held for the process lifetime or the
/// file layer silently stops flushing.
pub fn init_tracing(log_dir: Option<&Path>) -> anyhow::Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stdout_layer = fmt::layer().with_target(false);

    match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let file_appender = tracing_appender::rolling::daily(dir, "scopecraft.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            let file_layer = fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .json();
            tracing_subscriber::registry()
                .with(filter)
                .with(stdout_layer)
                .with(file_layer)
                .init();
            Ok(Some(guard))
        }
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(stdout_layer)
                .init();
            Ok(None)
        }
    }
}

/// One structured observability record. Mirrors the fields every component
/// in this lineage attaches to its logs: which session/run/worker the event
/// concerns, an outcome status, and a free-form detail payload.
#[derive(Debug, Clone, Serialize)]
pub struct ObservabilityEvent {
    pub event: String,
    pub component: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker: Option<String>,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(default)]
    pub detail: serde_json::Value,
}

impl ObservabilityEvent {
    pub fn new(event: impl Into<String>, component: impl Into<String>, status: impl Into<String>) -> Self {
        Self {
            event: event.into(),
            component: component.into(),
            session_id: None,
            run_id: None,
            worker: None,
            status: status.into(),
            error_code: None,
            detail: serde_json::Value::Null,
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_worker(mut self, worker: impl Into<String>) -> Self {
        self.worker = Some(worker.into());
        self
    }

    pub fn with_error_code(mut self, code: impl Into<String>) -> Self {
        self.error_code = Some(code.into());
        self
    }

    pub fn with_detail(mut self, detail: serde_json::Value) -> Self {
        self.detail = detail;
        self
    }
}

/// Emits one observability record at the given level. This is the only
/// sanctioned way components log orchestrator activity.
pub fn emit_event(level: Level, ev: ObservabilityEvent) {
    let payload = serde_json::to_string(&ev).unwrap_or_else(|_| "<unserializable event>".into());
    match level {
        Level::ERROR => tracing::error!(target: "scopecraft", event = %payload),
        Level::WARN => tracing::warn!(target: "scopecraft", event = %payload),
        Level::DEBUG => tracing::debug!(target: "scopecraft", event = %payload),
        Level::TRACE => tracing::trace!(target: "scopecraft", event = %payload),
        Level::INFO => tracing::info!(target: "scopecraft", event = %payload),
    }
}
