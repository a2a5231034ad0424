use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use scopecraft_types::{
    now_ms, AppState, EventData, EventEnvelope, FileRef, PipelineStatus, Result, RunError,
    ScopecraftError, SessionStatus, TraceEntry, TraceLevel, WorkflowVisualization,
};
use tokio::sync::RwLock;

use crate::broadcaster::EventBroadcaster;

/// Distinguishes which event the store should emit after a mutation (spec
/// §4.1 `apply`): a `workflow_state_change` when status or a pipeline field
/// changed, or an `agent_trace_appended` notice for trace-only appends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationKind {
    StateChange,
    TraceAppended,
}

/// Snapshot-plus-diff result of [`StateStore::apply`].
pub struct ApplyOutcome {
    pub snapshot: AppState,
    pub kind: MutationKind,
}

/// Owns one `AppState` per session (C1). All mutations go through
/// [`StateStore::apply`], which serializes writers per session via the
/// session's own entry in the map being guarded end-to-end by the outer
/// `RwLock` write guard for the duration of the mutation closure — so two
/// concurrent `apply` calls for the same session never interleave.
pub struct StateStore {
    sessions: Arc<RwLock<HashMap<String, AppState>>>,
    state_dir: Option<PathBuf>,
    broadcaster: EventBroadcaster,
}

impl StateStore {
    pub fn new(broadcaster: EventBroadcaster, state_dir: Option<PathBuf>) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            state_dir,
            broadcaster,
        }
    }

    pub async fn create(
        &self,
        session_id: impl Into<String>,
        query: impl Into<String>,
        files: Vec<FileRef>,
    ) -> Result<AppState> {
        let session_id = session_id.into();
        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(&session_id) {
            return Err(ScopecraftError::AlreadyExists(session_id));
        }
        let state = AppState::new(session_id.clone(), query, files);
        self.persist(&state).await?;
        sessions.insert(session_id, state.clone());
        Ok(state)
    }

    pub async fn read(&self, session_id: &str) -> Result<AppState> {
        self.sessions
            .read()
            .await
            .get(session_id)
            .cloned()
            .ok_or_else(|| ScopecraftError::NotFound(session_id.to_string()))
    }

    /// Applies `mutate` atomically to the session's state, checks I1/I3/I5,
    /// persists the new snapshot, and emits the appropriate change event.
    pub async fn apply<F>(
        &self,
        session_id: &str,
        kind: MutationKind,
        mutate: F,
    ) -> Result<ApplyOutcome>
    where
        F: FnOnce(&mut AppState) -> Result<()>,
    {
        let mut sessions = self.sessions.write().await;
        let state = sessions
            .get_mut(session_id)
            .ok_or_else(|| ScopecraftError::NotFound(session_id.to_string()))?;

        let before = state.clone();
        if let Err(err) = mutate(state) {
            *state = before;
            return Err(err);
        }
        if let Err(err) = check_invariants(&before, state) {
            *state = before;
            return Err(err);
        }
        state.revision += 1;
        state.updated_at_ms = now_ms();
        let snapshot = state.clone();
        drop(sessions);

        self.persist(&snapshot).await?;
        self.emit_change_event(&snapshot, kind).await;
        Ok(ApplyOutcome { snapshot, kind })
    }

    /// Appends one trace entry with a correctly-assigned `seq` (spec I4 /
    /// P1) and emits `agent_trace_appended`.
    pub async fn append_trace(
        &self,
        session_id: &str,
        worker: impl Into<String>,
        level: TraceLevel,
        message: impl Into<String>,
        details: serde_json::Map<String, serde_json::Value>,
    ) -> Result<ApplyOutcome> {
        let worker = worker.into();
        let message = message.into();
        self.apply(session_id, MutationKind::TraceAppended, move |state| {
            let seq = state.agent_trace.last().map(|e| e.seq + 1).unwrap_or(0);
            state.agent_trace.push(TraceEntry {
                seq,
                timestamp: chrono::Utc::now(),
                worker,
                level,
                message,
                details,
            });
            Ok(())
        })
        .await
    }

    /// Clears `field` and its transitive dependents (spec §3.4, §4.7.5,
    /// P8). `dependents` should be the worker registry's derived dependency
    /// closure for `field`.
    pub async fn rewind(&self, session_id: &str, field: &str, dependents: &[&str]) -> Result<AppState> {
        let mut sessions = self.sessions.write().await;
        let state = sessions
            .get_mut(session_id)
            .ok_or_else(|| ScopecraftError::NotFound(session_id.to_string()))?;

        if !matches!(state.status, SessionStatus::Complete | SessionStatus::Failed | SessionStatus::Running) {
            return Err(ScopecraftError::InvalidTransition(format!(
                "session {session_id} is not in a rewindable state"
            )));
        }

        state.clear_field(field);
        for dep in dependents {
            state.clear_field(dep);
        }
        state.status = SessionStatus::Running;
        state.error = None;
        state.revision += 1;
        state.updated_at_ms = now_ms();
        let snapshot = state.clone();
        drop(sessions);

        self.persist(&snapshot).await?;
        self.emit_change_event(&snapshot, MutationKind::StateChange).await;
        Ok(snapshot)
    }

    async fn emit_change_event(&self, state: &AppState, kind: MutationKind) {
        let data = match kind {
            MutationKind::StateChange => EventData::WorkflowStateChange {
                change_type: "phase_transition".into(),
                current_stage: format!("{:?}", state.status),
                workflow_visualization: WorkflowVisualization {
                    stages: Vec::new(),
                    completion_percentage: 0.0,
                },
                active_agents: Vec::new(),
                pipeline_status: PipelineStatus {
                    files_processed: !state.processed_files_content.is_empty(),
                    trades_mapped: !state.trade_mapping.is_empty(),
                    scope_analyzed: !state.scope_items.is_empty(),
                    takeoff_calculated: !state.takeoff_data.is_empty(),
                    estimate_generated: !state.estimate.is_empty(),
                    export_ready: !state.export_artifacts.is_empty(),
                },
            },
            MutationKind::TraceAppended => {
                let entry = state.agent_trace.last();
                EventData::AgentSubstep {
                    agent_name: entry.map(|e| e.worker.clone()).unwrap_or_default(),
                    substep: "trace_appended".into(),
                    progress_percentage: 0,
                    substep_details: entry.map(|e| e.details.clone()).unwrap_or_default(),
                }
            }
        };
        let event_type = match kind {
            MutationKind::StateChange => "workflow_state_change",
            MutationKind::TraceAppended => "agent_trace_appended",
        };
        self.broadcaster
            .publish(EventEnvelope::new(event_type, state.session_id.clone(), data))
            .await;
    }

    async fn persist(&self, state: &AppState) -> Result<()> {
        let Some(dir) = &self.state_dir else {
            return Ok(());
        };
        let session_dir = dir.join(&state.session_id);
        std::fs::create_dir_all(&session_dir)?;

        atomic_write_json(&session_dir.join("state.json"), state)?;

        let diff_line = serde_json::to_string(state)?;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(session_dir.join("mutations.jsonl"))?;
        use std::io::Write;
        writeln!(file, "{diff_line}")?;
        Ok(())
    }
}

fn atomic_write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<()> {
    let tmp_path = path.with_extension("json.tmp");
    std::fs::write(&tmp_path, serde_json::to_vec_pretty(value)?)?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

/// Enforces I1 (single writer per field — checked by the caller choosing
/// the right mutation site, this guards the observable effect), I3
/// (`pending_decision` non-null iff `status = awaiting_user`), and I5
/// (dependency-before-use is checked by the planner before dispatch; here
/// we only guard the cheaper, always-checkable invariants).
fn check_invariants(_before: &AppState, after: &AppState) -> Result<()> {
    let decision_present = after.pending_decision.is_some();
    let awaiting = after.status == SessionStatus::AwaitingUser;
    if decision_present != awaiting {
        return Err(ScopecraftError::InvariantViolation(
            "pending_decision must be non-null iff status = awaiting_user (I3)".into(),
        ));
    }
    for window in after.agent_trace.windows(2) {
        if window[0].timestamp > window[1].timestamp {
            return Err(ScopecraftError::InvariantViolation(
                "agent_trace must be monotonic in timestamp (I4)".into(),
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use scopecraft_types::TraceLevel;

    async fn store() -> StateStore {
        StateStore::new(EventBroadcaster::new(64), None)
    }

    #[tokio::test]
    async fn create_then_read_round_trips() {
        let store = store().await;
        let created = store.create("s1", "hello", vec![]).await.expect("create");
        let read = store.read("s1").await.expect("read");
        assert_eq!(created.session_id, read.session_id);
        assert_eq!(read.status, SessionStatus::New);
    }

    #[tokio::test]
    async fn create_twice_fails_already_exists() {
        let store = store().await;
        store.create("s1", "q", vec![]).await.expect("create");
        let err = store.create("s1", "q2", vec![]).await.unwrap_err();
        assert!(matches!(err, ScopecraftError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn apply_bumps_revision_and_persists_mutation() {
        let store = store().await;
        store.create("s1", "q", vec![]).await.expect("create");
        store
            .apply("s1", MutationKind::StateChange, |state| {
                state.status = SessionStatus::Running;
                Ok(())
            })
            .await
            .expect("apply");
        let state = store.read("s1").await.expect("read");
        assert_eq!(state.status, SessionStatus::Running);
        assert_eq!(state.revision, 1);
    }

    #[tokio::test]
    async fn apply_rejects_decision_invariant_violation() {
        let store = store().await;
        store.create("s1", "q", vec![]).await.expect("create");
        let err = store
            .apply("s1", MutationKind::StateChange, |state| {
                state.status = SessionStatus::AwaitingUser;
                // pending_decision intentionally left None: violates I3.
                Ok(())
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ScopecraftError::InvariantViolation(_)));
    }

    #[tokio::test]
    async fn append_trace_assigns_monotonic_seq() {
        let store = store().await;
        store.create("s1", "q", vec![]).await.expect("create");
        store
            .append_trace("s1", "file-reader", TraceLevel::Info, "started", Default::default())
            .await
            .expect("trace 1");
        store
            .append_trace("s1", "file-reader", TraceLevel::Info, "done", Default::default())
            .await
            .expect("trace 2");
        let state = store.read("s1").await.expect("read");
        assert_eq!(state.agent_trace[0].seq, 0);
        assert_eq!(state.agent_trace[1].seq, 1);
    }

    #[tokio::test]
    async fn rewind_clears_field_and_dependents() {
        let store = store().await;
        store.create("s1", "q", vec![]).await.expect("create");
        store
            .apply("s1", MutationKind::StateChange, |state| {
                state.status = SessionStatus::Running;
                state.trade_mapping.push(scopecraft_types::TradeMappingEntry {
                    trade: "electrical".into(),
                    section_ref: "16".into(),
                    confidence: 0.9,
                });
                state.scope_items.push(scopecraft_types::ScopeItem {
                    trade: "electrical".into(),
                    item: "panel".into(),
                    description: "200A panel".into(),
                    location: None,
                    spec: None,
                    qty: None,
                });
                Ok(())
            })
            .await
            .expect("seed");

        let rewound = store
            .rewind("s1", "trade_mapping", &["scope_items"])
            .await
            .expect("rewind");
        assert!(rewound.trade_mapping.is_empty());
        assert!(rewound.scope_items.is_empty());
        assert_eq!(rewound.status, SessionStatus::Running);
    }

    #[tokio::test]
    async fn persists_to_disk_when_state_dir_configured() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = StateStore::new(EventBroadcaster::new(64), Some(dir.path().to_path_buf()));
        store.create("s1", "q", vec![]).await.expect("create");
        let snapshot_path = dir.path().join("s1").join("state.json");
        assert!(snapshot_path.exists());
    }
}
