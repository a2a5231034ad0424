use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use scopecraft_core::{EventBroadcaster, MutationKind, StateStore};
use scopecraft_types::{
    DecisionRequest, EventData, EventEnvelope, Result, ScopecraftError, SessionStatus,
};
use serde_json::Value;
use tokio::sync::{oneshot, Mutex};

/// The outcome of waiting on an open decision.
pub enum DecisionOutcome {
    Resumed { response: String },
    TimedOutWithDefault { response: String },
    TimedOut,
}

/// Suspends a run awaiting a user response and correlates the eventual
/// `submit` call back to the waiter (C7, spec §4.6). Exactly one decision
/// may be outstanding per session; a second `open` while one is pending is a
/// programming error and fails fast.
pub struct DecisionGate {
    store: Arc<StateStore>,
    broadcaster: EventBroadcaster,
    pending: Mutex<HashMap<String, (DecisionRequest, oneshot::Sender<String>)>>,
}

impl DecisionGate {
    pub fn new(store: Arc<StateStore>, broadcaster: EventBroadcaster) -> Self {
        Self {
            store,
            broadcaster,
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Opens a new decision, transitions the session to `awaiting_user`,
    /// and emits `user_decision_needed`. Returns a waiter the caller should
    /// immediately await (with its own timeout handling; see [`Self::wait`]).
    pub async fn open(&self, session_id: &str, request: DecisionRequest) -> Result<()> {
        {
            let mut pending = self.pending.lock().await;
            if pending.contains_key(session_id) {
                return Err(ScopecraftError::DecisionAlreadyPending);
            }
            let (tx, _rx) = oneshot::channel();
            pending.insert(session_id.to_string(), (request.clone(), tx));
        }

        let request_for_mutation = request.clone();
        self.store
            .apply(session_id, MutationKind::StateChange, move |state| {
                state.pending_decision = Some(request_for_mutation.clone());
                state.status = SessionStatus::AwaitingUser;
                Ok(())
            })
            .await?;

        self.emit_decision_needed(session_id, &request).await;
        Ok(())
    }

    /// Blocks until `submit` resolves this session's decision or
    /// `timeout_seconds` elapses. On timeout with a `default_option`, the
    /// default is synthesized as if the user had chosen it; without one, the
    /// run bubbles a `user_timeout` error to the manager (spec §4.6 step 4).
    pub async fn wait(&self, session_id: &str) -> DecisionOutcome {
        let (request, rx) = {
            let mut pending = self.pending.lock().await;
            let Some((request, _)) = pending.get(session_id) else {
                return DecisionOutcome::TimedOut;
            };
            let request = request.clone();
            let (tx, rx) = oneshot::channel();
            pending.insert(session_id.to_string(), (request.clone(), tx));
            (request, rx)
        };

        let timeout = Duration::from_secs(request.timeout_seconds);
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(response)) => DecisionOutcome::Resumed { response },
            Ok(Err(_)) | Err(_) => {
                self.pending.lock().await.remove(session_id);
                match request.default_option {
                    Some(default) => DecisionOutcome::TimedOutWithDefault { response: default },
                    None => DecisionOutcome::TimedOut,
                }
            }
        }
    }

    /// Resolves an open decision (C7 `submit`, spec §4.6 step 3).
    pub async fn submit(&self, session_id: &str, decision_id: &str, response: String) -> Result<()> {
        let sender = {
            let mut pending = self.pending.lock().await;
            let Some((request, _)) = pending.get(session_id) else {
                return Err(ScopecraftError::StaleDecision {
                    expected: "<none pending>".into(),
                    got: decision_id.to_string(),
                });
            };
            if request.decision_id != decision_id {
                return Err(ScopecraftError::StaleDecision {
                    expected: request.decision_id.clone(),
                    got: decision_id.to_string(),
                });
            }
            if !request.accepts(&response) {
                return Err(ScopecraftError::IntakeInvalid(format!(
                    "response '{response}' is not a valid option for decision '{decision_id}'"
                )));
            }
            pending.remove(session_id).map(|(_, tx)| tx)
        };

        let response_for_mutation = response.clone();
        self.store
            .apply(session_id, MutationKind::StateChange, move |state| {
                state
                    .manager_notes
                    .insert("last_decision".into(), Value::String(response_for_mutation.clone()));
                state.pending_decision = None;
                state.status = SessionStatus::Running;
                Ok(())
            })
            .await?;

        if let Some(sender) = sender {
            let _ = sender.send(response);
        }
        Ok(())
    }

    /// Applies a synthesized `response` the same way [`Self::submit`] would,
    /// for the timeout-with-default path (spec §4.6 step 4): the gate's
    /// [`Self::wait`] has already removed the pending entry by the time this
    /// is called, so there is no waiter to check against and no sender to
    /// notify — only the `AppState` mutation remains.
    pub async fn force_resolve(&self, session_id: &str, response: String) -> Result<()> {
        self.store
            .apply(session_id, MutationKind::StateChange, move |state| {
                state
                    .manager_notes
                    .insert("last_decision".into(), Value::String(response.clone()));
                state.pending_decision = None;
                state.status = SessionStatus::Running;
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Fails any open decision for `session_id` with `cancelled`, used when
    /// a session is cancelled mid-flight (spec §5 Cancellation).
    pub async fn cancel(&self, session_id: &str) {
        let mut pending = self.pending.lock().await;
        if let Some((_, tx)) = pending.remove(session_id) {
            drop(tx); // dropping the sender wakes `wait` with a RecvError.
        }
    }

    async fn emit_decision_needed(&self, session_id: &str, request: &DecisionRequest) {
        let options = request
            .options
            .iter()
            .map(|o| serde_json::to_value(o).unwrap_or(Value::Null))
            .collect();
        let data = EventData::UserDecisionNeeded {
            decision_id: request.decision_id.clone(),
            decision_type: format!("{:?}", request.kind),
            prompt: request.prompt.clone(),
            options,
            default_option: request.default_option.clone(),
            timeout_seconds: request.timeout_seconds,
            can_skip: request.can_skip,
            affects_workflow: request.affects_workflow,
            context: Default::default(),
        };
        self.broadcaster
            .publish(EventEnvelope::user_decision_needed(session_id, data))
            .await;
    }
}
