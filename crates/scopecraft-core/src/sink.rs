use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use scopecraft_types::EventEnvelope;
use tokio::sync::Mutex;

use crate::broadcaster::EventSink;

/// Read-through replica of every published event (spec §6.5): appends one
/// JSON line per event to `<state_dir>/events.jsonl`, lazily opening the
/// file on first write. Best effort, matching `EventSink::record`'s
/// infallible signature — a write failure is dropped rather than
/// propagated back to the publisher, and the next call simply retries the
/// open.
pub struct JsonlEventSink {
    path: PathBuf,
    file: Mutex<Option<File>>,
}

impl JsonlEventSink {
    pub fn new(state_dir: impl AsRef<Path>) -> std::io::Result<Self> {
        std::fs::create_dir_all(state_dir.as_ref())?;
        Ok(Self {
            path: state_dir.as_ref().join("events.jsonl"),
            file: Mutex::new(None),
        })
    }
}

#[async_trait]
impl EventSink for JsonlEventSink {
    async fn record(&self, envelope: &EventEnvelope) {
        let Ok(line) = serde_json::to_string(envelope) else {
            return;
        };
        let mut guard = self.file.lock().await;
        if guard.is_none() {
            *guard = std::fs::OpenOptions::new().create(true).append(true).open(&self.path).ok();
        }
        if let Some(file) = guard.as_mut() {
            if writeln!(file, "{line}").is_err() {
                *guard = None;
            }
        }
    }
}
