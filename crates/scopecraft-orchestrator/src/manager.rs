use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use scopecraft_core::{Config, EventBroadcaster, MutationKind, StateStore, Worker, WorkerRegistry};
use scopecraft_observability::{emit_event, ObservabilityEvent};
use scopecraft_types::{
    canonical_sequence, AppState, BrainChoice, EventData, EventEnvelope, IntentTag, PipelineStatus,
    Result, RunError, ScopecraftError, SessionStatus, TraceLevel, WorkerResult, WorkflowVisualization,
};
use serde_json::{Map, Value};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::Level;

use crate::brain::BrainAllocator;
use crate::classifier::IntentClassifier;
use crate::decision_gate::{DecisionGate, DecisionOutcome};
use crate::planner::{PlanStep, RoutePlanner};

const COMPONENT: &str = "manager";

/// Heuristic for which `RecoverableError` messages represent a transient
/// upstream failure eligible for retry (spec §4.7.3/§4.7.4) versus a
/// one-shot recoverable condition (e.g. a single unparsable file) that the
/// plan should simply continue past.
fn is_transient(message: &str) -> bool {
    let lower = message.to_lowercase();
    ["rate limit", "timeout", "network", "429", "503", "502", "temporarily unavailable"]
        .iter()
        .any(|needle| lower.contains(needle))
}

fn backoff_delay(attempt: u32) -> Duration {
    let millis = 500u64.saturating_mul(1u64 << attempt.min(4));
    Duration::from_millis(millis.min(8_000))
}

/// Outcome of running every step of one plan.
enum PlanOutcome {
    /// The plan finished; final status already applied.
    Terminal(AppState),
    /// A decision resolved mid-plan; the manager must re-classify/re-plan
    /// against the now-updated state (spec §4.7 step 5's "back to step 4",
    /// generalized one level further up to re-classification since intent
    /// may itself depend on the newly-populated fields).
    Replan,
}

/// Outcome of running a single plan step end to end, including any
/// decision-gate suspension and resume.
enum StepOutcome {
    Completed,
    Replan,
    RecoverableContinue,
    Fatal,
}

/// The autonomous controller (C8, spec §4.7): classify → plan → dispatch →
/// reassess, looped until the session's objectives are satisfied or a fatal
/// error/cancellation stops it. One `Manager` is shared across sessions; a
/// `run()` call drives exactly one session's manager task to completion.
pub struct Manager {
    store: Arc<StateStore>,
    broadcaster: EventBroadcaster,
    registry: Arc<WorkerRegistry>,
    classifier: Arc<IntentClassifier>,
    brain: Arc<BrainAllocator>,
    decision_gate: Arc<DecisionGate>,
    config: Config,
    cancel_tokens: RwLock<HashMap<String, CancellationToken>>,
}

impl Manager {
    pub fn new(
        store: Arc<StateStore>,
        broadcaster: EventBroadcaster,
        registry: Arc<WorkerRegistry>,
        classifier: Arc<IntentClassifier>,
        brain: Arc<BrainAllocator>,
        decision_gate: Arc<DecisionGate>,
        config: Config,
    ) -> Self {
        Self {
            store,
            broadcaster,
            registry,
            classifier,
            brain,
            decision_gate,
            config,
            cancel_tokens: RwLock::new(HashMap::new()),
        }
    }

    /// Drives one session's manager loop to a terminal state
    /// (`complete`/`failed`). Safe to call again on a session that is
    /// `new`/`intake_ready`/`running`/`files_ready_for_analysis`; calling it
    /// on an already-terminal session simply re-reads and returns that
    /// state.
    pub async fn run(&self, session_id: &str) -> Result<AppState> {
        let cancel = CancellationToken::new();
        self.cancel_tokens
            .write()
            .await
            .insert(session_id.to_string(), cancel.clone());

        let result = tokio::time::timeout(
            Duration::from_secs(self.config.run_timeout_secs),
            self.drive(session_id, &cancel),
        )
        .await;

        self.cancel_tokens.write().await.remove(session_id);

        match result {
            Ok(inner) => inner,
            Err(_elapsed) => self.fail_with_cancellation(session_id, "run_timeout").await,
        }
    }

    /// Requests cancellation of an in-flight session (spec §5
    /// Cancellation). A no-op if the session isn't currently running.
    pub async fn cancel(&self, session_id: &str) {
        if let Some(token) = self.cancel_tokens.read().await.get(session_id) {
            token.cancel();
        }
        self.decision_gate.cancel(session_id).await;
    }

    /// External `rewind(session_id, field)` (spec §4.7.5). Clears `field`
    /// and its transitive dependents, then drives the loop again from a
    /// fresh classification so the now-empty downstream steps are replanned
    /// (usually yielding the previously-skipped steps).
    pub async fn rewind(&self, session_id: &str, field: &str) -> Result<AppState> {
        self.cancel(session_id).await;
        let dependents = self.registry.transitive_dependents(field);
        self.store.rewind(session_id, field, &dependents).await?;
        self.run(session_id).await
    }

    async fn fail_with_cancellation(&self, session_id: &str, kind: &str) -> Result<AppState> {
        let outcome = self
            .store
            .apply(session_id, MutationKind::StateChange, |state| {
                state.status = SessionStatus::Failed;
                state.error = Some(RunError {
                    kind: kind.to_string(),
                    message: format!("session {kind}"),
                    worker: None,
                    recoverable: kind == "user_timeout",
                });
                Ok(())
            })
            .await?;
        self.emit_workflow_state_change(session_id, "cancelled", &outcome.snapshot)
            .await;
        Ok(outcome.snapshot)
    }

    /// The classify → (spreadsheet-intake) → plan → execute cycle, looped
    /// until a terminal outcome. Spec §4.7 steps 2–6.
    async fn drive(&self, session_id: &str, cancel: &CancellationToken) -> Result<AppState> {
        self.emit_workflow_started(session_id).await?;

        loop {
            if cancel.is_cancelled() {
                return self.fail_with_cancellation(session_id, "cancelled").await;
            }

            let state = self.store.read(session_id).await?;
            if matches!(state.status, SessionStatus::Complete | SessionStatus::Failed) {
                return Ok(state);
            }

            let intent = self.classifier.classify(&state).await;
            emit_event(
                Level::INFO,
                ObservabilityEvent::new("intent_classified", COMPONENT, "ok")
                    .with_session(session_id)
                    .with_detail(serde_json::json!({"tag": intent.tag.as_str(), "confidence": intent.confidence})),
            );

            let outcome = self
                .store
                .apply(session_id, MutationKind::StateChange, {
                    let intent = intent.clone();
                    move |state| {
                        state.intent = Some(intent);
                        if state.status == SessionStatus::New {
                            state.status = SessionStatus::Running;
                        }
                        Ok(())
                    }
                })
                .await?;
            self.emit_manager_thinking(session_id, &intent).await;

            if intent.tag == IntentTag::SpreadsheetIntegration {
                match self
                    .run_single_step(session_id, "spreadsheet-intake", intent.confidence, cancel)
                    .await?
                {
                    StepOutcome::Completed | StepOutcome::Replan => {
                        self.store
                            .apply(session_id, MutationKind::StateChange, |state| {
                                state.status = SessionStatus::FilesReadyForAnalysis;
                                Ok(())
                            })
                            .await?;
                        continue;
                    }
                    StepOutcome::RecoverableContinue => continue,
                    StepOutcome::Fatal => {
                        let state = self.store.read(session_id).await?;
                        self.emit_workflow_state_change(session_id, "workflow_completed", &state)
                            .await;
                        return Ok(state);
                    }
                }
            }

            if intent.tag == IntentTag::NoAction {
                let final_state = self
                    .store
                    .apply(session_id, MutationKind::StateChange, |state| {
                        state.status = SessionStatus::Complete;
                        state
                            .manager_notes
                            .insert("last_plan".into(), Value::Array(vec![]));
                        Ok(())
                    })
                    .await?
                    .snapshot;
                self.emit_workflow_state_change(session_id, "workflow_completed", &final_state)
                    .await;
                return Ok(final_state);
            }

            let plan = RoutePlanner::plan(intent.tag, &outcome.snapshot, &self.registry)?;
            self.emit_manager_thinking_plan(session_id, &plan).await;
            self.store
                .apply(session_id, MutationKind::StateChange, {
                    let plan_json: Vec<Value> = plan
                        .iter()
                        .map(|s| serde_json::to_value(s).unwrap_or(Value::Null))
                        .collect();
                    move |state| {
                        state.manager_notes.insert("last_plan".into(), Value::Array(plan_json));
                        Ok(())
                    }
                })
                .await?;

            match self.execute_plan(session_id, &plan, intent.confidence, cancel).await? {
                PlanOutcome::Terminal(state) => return Ok(state),
                PlanOutcome::Replan => continue,
            }
        }
    }

    async fn execute_plan(
        &self,
        session_id: &str,
        plan: &[PlanStep],
        intent_confidence: f64,
        cancel: &CancellationToken,
    ) -> Result<PlanOutcome> {
        let total_steps = plan.len().max(1);
        for (idx, step) in plan.iter().enumerate() {
            if cancel.is_cancelled() {
                let state = self.fail_with_cancellation(session_id, "cancelled").await?;
                return Ok(PlanOutcome::Terminal(state));
            }

            if step.skip {
                self.emit_agent_substep(session_id, &step.worker_name, "skipped", 100).await;
                continue;
            }

            match self
                .run_single_step(session_id, &step.worker_name, intent_confidence, cancel)
                .await?
            {
                StepOutcome::Completed => {
                    let state = self.store.read(session_id).await?;
                    let completion = ((idx + 1) as f64 / total_steps as f64) * 100.0;
                    self.emit_workflow_state_change_with_progress(session_id, "phase_transition", &state, completion)
                        .await;

                    if self.objectives_met_early(&state, plan, idx) {
                        break;
                    }
                }
                StepOutcome::Replan => return Ok(PlanOutcome::Replan),
                StepOutcome::RecoverableContinue => continue,
                StepOutcome::Fatal => {
                    let state = self.store.read(session_id).await?;
                    return Ok(PlanOutcome::Terminal(state));
                }
            }
        }

        let final_state = self
            .store
            .apply(session_id, MutationKind::StateChange, |state| {
                state.status = SessionStatus::Complete;
                state
                    .manager_notes
                    .insert("last_reassessment_ms".into(), Value::Number(scopecraft_types::now_ms().into()));
                Ok(())
            })
            .await?
            .snapshot;
        self.emit_workflow_state_change(session_id, "workflow_completed", &final_state)
            .await;
        Ok(PlanOutcome::Terminal(final_state))
    }

    /// True once every remaining (not-yet-executed) step's worker already
    /// looks fresh against `state` — the manager's early-completion
    /// reassessment (spec §4.7 step 5 "reassess").
    fn objectives_met_early(&self, state: &AppState, plan: &[PlanStep], completed_idx: usize) -> bool {
        plan[completed_idx + 1..].iter().all(|step| {
            self.registry
                .get(&step.worker_name)
                .map(|w| w.skip_if_fresh(state))
                .unwrap_or(false)
        })
    }

    /// Runs one worker end to end: brain allocation, dispatch-with-retry,
    /// and (if the worker asks for it) a decision-gate suspension followed
    /// by a resume dispatch of the same worker (spec §4.7.1, §4.6, §6.4).
    async fn run_single_step(
        &self,
        session_id: &str,
        worker_name: &str,
        intent_confidence: f64,
        cancel: &CancellationToken,
    ) -> Result<StepOutcome> {
        let Some(worker) = self.registry.get(worker_name) else {
            return Ok(StepOutcome::Fatal);
        };

        let state = self.store.read(session_id).await?;
        let complexity = worker.complexity_hint(&state);
        let choice = self.brain.allocate(worker_name, complexity, &state, intent_confidence);
        self.emit_brain_allocation(session_id, worker_name, &choice).await;
        self.emit_agent_substep(session_id, worker_name, "initializing", 0).await;

        let result = self
            .dispatch_with_retry(session_id, worker.as_ref(), &state, &choice, cancel)
            .await;

        self.apply_worker_result(session_id, worker_name, result, cancel).await
    }

    async fn apply_worker_result(
        &self,
        session_id: &str,
        worker_name: &str,
        result: WorkerResult,
        cancel: &CancellationToken,
    ) -> Result<StepOutcome> {
        match result {
            WorkerResult::Ok { field_writes } => {
                self.merge_field_writes(session_id, worker_name, field_writes).await?;
                self.emit_agent_substep(session_id, worker_name, "completed", 100).await;
                Ok(StepOutcome::Completed)
            }
            WorkerResult::NeedsUserInput { request } => {
                self.decision_gate.open(session_id, request).await?;
                let outcome = self.decision_gate.wait(session_id).await;
                match outcome {
                    DecisionOutcome::Resumed { .. } => {
                        self.resume_after_decision(session_id, worker_name, cancel).await
                    }
                    DecisionOutcome::TimedOutWithDefault { response } => {
                        self.decision_gate.force_resolve(session_id, response).await?;
                        self.resume_after_decision(session_id, worker_name, cancel).await
                    }
                    DecisionOutcome::TimedOut => {
                        let state = self
                            .store
                            .apply(session_id, MutationKind::StateChange, |state| {
                                state.status = SessionStatus::Failed;
                                state.pending_decision = None;
                                state.error = Some(RunError {
                                    kind: "user_timeout".into(),
                                    message: "decision timed out with no default option".into(),
                                    worker: Some(worker_name.to_string()),
                                    recoverable: true,
                                });
                                Ok(())
                            })
                            .await?
                            .snapshot;
                        self.emit_error_recovery(session_id, "decision timed out", "high", false, &[worker_name])
                            .await;
                        self.emit_workflow_state_change(session_id, "workflow_completed", &state)
                            .await;
                        Ok(StepOutcome::Fatal)
                    }
                }
            }
            WorkerResult::RecoverableError { message, details } => {
                self.store
                    .append_trace(
                        session_id,
                        worker_name.to_string(),
                        TraceLevel::Warn,
                        message.clone(),
                        details,
                    )
                    .await?;
                self.emit_agent_substep(session_id, worker_name, "completed", 100).await;
                self.emit_error_recovery(session_id, &message, "medium", true, &[worker_name])
                    .await;
                Ok(StepOutcome::RecoverableContinue)
            }
            WorkerResult::FatalError { message, .. } => {
                // A worker honoring the cancel signal at its own I/O boundary
                // (spec §5 Cancellation) surfaces as an ordinary
                // `fatal_error`; the manager is the only place that knows
                // the underlying cause was cancellation rather than a real
                // worker failure, so it reclassifies here.
                if cancel.is_cancelled() {
                    self.fail_with_cancellation(session_id, "cancelled").await?;
                    return Ok(StepOutcome::Fatal);
                }
                let state = self
                    .store
                    .apply(session_id, MutationKind::StateChange, |state| {
                        state.status = SessionStatus::Failed;
                        state.error = Some(RunError {
                            kind: "worker_fatal".into(),
                            message: message.clone(),
                            worker: Some(worker_name.to_string()),
                            recoverable: false,
                        });
                        Ok(())
                    })
                    .await?
                    .snapshot;
                self.emit_agent_substep(session_id, worker_name, "failed", 100).await;
                self.emit_error_recovery(session_id, &message, "high", false, &[worker_name])
                    .await;
                self.emit_workflow_state_change(session_id, "workflow_completed", &state)
                    .await;
                Ok(StepOutcome::Fatal)
            }
        }
    }

    /// Re-dispatches `worker_name` now that `manager_notes.last_decision`
    /// holds the user's answer (spec §6.4's resume path). The protocol
    /// assumes the second dispatch resolves; a second `needs_user_input`
    /// from the same worker is treated as a programming error and promoted
    /// to fatal rather than opening a second concurrent decision (P4).
    async fn resume_after_decision(
        &self,
        session_id: &str,
        worker_name: &str,
        cancel: &CancellationToken,
    ) -> Result<StepOutcome> {
        let Some(worker) = self.registry.get(worker_name) else {
            return Ok(StepOutcome::Fatal);
        };
        let state = self.store.read(session_id).await?;
        let complexity = worker.complexity_hint(&state);
        let intent_confidence = state.intent.as_ref().map(|i| i.confidence).unwrap_or(1.0);
        let choice = self.brain.allocate(worker_name, complexity, &state, intent_confidence);
        let result = self
            .dispatch_with_retry(session_id, worker.as_ref(), &state, &choice, cancel)
            .await;
        match result {
            WorkerResult::NeedsUserInput { .. } => {
                let state = self
                    .store
                    .apply(session_id, MutationKind::StateChange, |state| {
                        state.status = SessionStatus::Failed;
                        state.error = Some(RunError {
                            kind: "invariant_violation".into(),
                            message: format!("worker '{worker_name}' asked for a second decision on resume"),
                            worker: Some(worker_name.to_string()),
                            recoverable: false,
                        });
                        Ok(())
                    })
                    .await?
                    .snapshot;
                self.emit_workflow_state_change(session_id, "workflow_completed", &state)
                    .await;
                Ok(StepOutcome::Fatal)
            }
            other => self.apply_worker_result(session_id, worker_name, other, cancel).await,
        }
    }

    /// Per-dispatch retry with exponential backoff (spec §4.7.4): only
    /// `RecoverableError`s classified as transient are retried, up to
    /// `retry_budget` times; once exhausted the failure is promoted to
    /// `FatalError` for this worker (spec §4.7.3). A dispatch timeout is
    /// itself treated as a fatal outcome, letting the caller decide whether
    /// downstream steps can proceed without this worker's output.
    async fn dispatch_with_retry(
        &self,
        session_id: &str,
        worker: &dyn Worker,
        state: &AppState,
        choice: &BrainChoice,
        cancel: &CancellationToken,
    ) -> WorkerResult {
        let mut attempt = 0;
        loop {
            let dispatch_timeout = Duration::from_secs(self.config.worker_dispatch_timeout_secs);
            let outcome = tokio::time::timeout(
                dispatch_timeout,
                worker.dispatch(state, choice, cancel.clone()),
            )
            .await;

            let result = match outcome {
                Ok(result) => result,
                Err(_elapsed) => WorkerResult::FatalError {
                    message: format!("worker '{}' exceeded its dispatch timeout", worker.name()),
                    details: Map::new(),
                },
            };

            if let WorkerResult::RecoverableError { message, details } = &result {
                if is_transient(message) {
                    if attempt < self.config.retry_budget {
                        self.emit_error_recovery(session_id, message, "low", true, &[worker.name()])
                            .await;
                        emit_event(
                            Level::WARN,
                            ObservabilityEvent::new("worker_retry", COMPONENT, "retrying")
                                .with_session(session_id)
                                .with_worker(worker.name())
                                .with_detail(serde_json::json!({"attempt": attempt + 1})),
                        );
                        tokio::time::sleep(backoff_delay(attempt)).await;
                        attempt += 1;
                        continue;
                    }
                    return WorkerResult::FatalError {
                        message: message.clone(),
                        details: details.clone(),
                    };
                }
            }

            return result;
        }
    }

    async fn merge_field_writes(
        &self,
        session_id: &str,
        worker_name: &str,
        field_writes: Map<String, Value>,
    ) -> Result<()> {
        if field_writes.is_empty() {
            return Ok(());
        }
        let Some(descriptor) = self.registry.descriptor(worker_name) else {
            return Err(ScopecraftError::InvariantViolation(format!(
                "no descriptor registered for worker '{worker_name}'"
            )));
        };
        for field in field_writes.keys() {
            if !descriptor.produces.contains(&field.as_str()) {
                return Err(ScopecraftError::InvariantViolation(format!(
                    "worker '{worker_name}' wrote undeclared field '{field}' (I1)"
                )));
            }
        }

        self.store
            .apply(session_id, MutationKind::StateChange, move |state| {
                apply_field_writes(state, &field_writes)
            })
            .await?;
        Ok(())
    }

    async fn emit_workflow_started(&self, session_id: &str) -> Result<()> {
        let state = self.store.read(session_id).await?;
        self.emit_workflow_state_change(session_id, "workflow_started", &state).await;
        Ok(())
    }

    async fn emit_workflow_state_change(&self, session_id: &str, change_type: &str, state: &AppState) {
        self.emit_workflow_state_change_with_progress(session_id, change_type, state, 0.0)
            .await;
    }

    async fn emit_workflow_state_change_with_progress(
        &self,
        session_id: &str,
        change_type: &str,
        state: &AppState,
        completion_percentage: f64,
    ) {
        let stages = state
            .intent
            .as_ref()
            .map(|i| canonical_sequence(i.tag).iter().map(|s| s.to_string()).collect())
            .unwrap_or_default();
        let data = EventData::WorkflowStateChange {
            change_type: change_type.to_string(),
            current_stage: format!("{:?}", state.status),
            workflow_visualization: WorkflowVisualization {
                stages,
                completion_percentage,
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
        };
        self.broadcaster
            .publish(EventEnvelope::workflow_state_change(session_id, data))
            .await;
    }

    async fn emit_manager_thinking(&self, session_id: &str, intent: &scopecraft_types::Intent) {
        let data = EventData::ManagerThinking {
            thinking_type: "analyzing_input".into(),
            stage: "intent_classification".into(),
            analysis: format!("classified intent as {}", intent.tag.as_str()),
            factors: intent
                .metadata
                .get("source")
                .and_then(|v| v.as_str())
                .map(|s| vec![s.to_string()])
                .unwrap_or_default(),
            confidence: intent.confidence,
            reasoning_depth: if intent.confidence >= 0.9 { "shallow" } else { "deep" }.into(),
        };
        self.broadcaster
            .publish(EventEnvelope::manager_thinking(session_id, data))
            .await;
    }

    async fn emit_manager_thinking_plan(&self, session_id: &str, plan: &[PlanStep]) {
        let data = EventData::ManagerThinking {
            thinking_type: "route_planning".into(),
            stage: "planning".into(),
            analysis: format!(
                "planned {} step(s): {}",
                plan.len(),
                plan.iter().map(|s| s.worker_name.as_str()).collect::<Vec<_>>().join(" -> ")
            ),
            factors: plan.iter().filter(|s| s.skip).map(|s| format!("skip:{}", s.worker_name)).collect(),
            confidence: 1.0,
            reasoning_depth: "shallow".into(),
        };
        self.broadcaster
            .publish(EventEnvelope::manager_thinking(session_id, data))
            .await;
    }

    async fn emit_agent_substep(&self, session_id: &str, agent_name: &str, substep: &str, progress: u8) {
        let data = EventData::AgentSubstep {
            agent_name: agent_name.to_string(),
            substep: substep.to_string(),
            progress_percentage: progress,
            substep_details: Map::new(),
        };
        self.broadcaster
            .publish(EventEnvelope::agent_substep(session_id, data))
            .await;
    }

    async fn emit_brain_allocation(&self, session_id: &str, agent_name: &str, choice: &BrainChoice) {
        let data = EventData::BrainAllocation {
            agent_name: agent_name.to_string(),
            model_selected: choice.model_selected.clone(),
            model_tier: choice.model_tier.as_str().to_string(),
            reasoning: choice.rationale.clone(),
            complexity_assessment: format!("{:?}", choice.complexity_assessment),
            context_window: choice.expected_context_window,
            factors_considered: choice.factors_considered.clone(),
        };
        self.broadcaster
            .publish(EventEnvelope::brain_allocation(session_id, data))
            .await;
    }

    async fn emit_error_recovery(
        &self,
        session_id: &str,
        error_message: &str,
        severity: &str,
        can_continue: bool,
        affected_agents: &[&str],
    ) {
        let data = EventData::ErrorRecovery {
            error_message: error_message.to_string(),
            severity: severity.to_string(),
            recovery_strategy: if can_continue { "retrying_or_continuing" } else { "stopping" }.into(),
            can_continue,
            affected_agents: affected_agents.iter().map(|s| s.to_string()).collect(),
            user_action_required: !can_continue,
        };
        self.broadcaster
            .publish(EventEnvelope::error_recovery(session_id, data))
            .await;
    }
}

fn apply_field_writes(state: &mut AppState, writes: &Map<String, Value>) -> Result<()> {
    for (field, value) in writes {
        match field.as_str() {
            "files" => {
                state.files = serde_json::from_value(value.clone())
                    .map_err(|e| ScopecraftError::InvariantViolation(e.to_string()))?;
            }
            "processed_files_content" => {
                state.processed_files_content = value
                    .as_object()
                    .cloned()
                    .ok_or_else(|| ScopecraftError::InvariantViolation("processed_files_content must be an object".into()))?;
            }
            "trade_mapping" => {
                state.trade_mapping = serde_json::from_value(value.clone())
                    .map_err(|e| ScopecraftError::InvariantViolation(e.to_string()))?;
            }
            "scope_items" => {
                state.scope_items = serde_json::from_value(value.clone())
                    .map_err(|e| ScopecraftError::InvariantViolation(e.to_string()))?;
            }
            "takeoff_data" => {
                state.takeoff_data = serde_json::from_value(value.clone())
                    .map_err(|e| ScopecraftError::InvariantViolation(e.to_string()))?;
            }
            "estimate" => {
                state.estimate = serde_json::from_value(value.clone())
                    .map_err(|e| ScopecraftError::InvariantViolation(e.to_string()))?;
            }
            "qa_findings" => {
                state.qa_findings = serde_json::from_value(value.clone())
                    .map_err(|e| ScopecraftError::InvariantViolation(e.to_string()))?;
            }
            "export_artifacts" => {
                state.export_artifacts = value
                    .as_object()
                    .cloned()
                    .ok_or_else(|| ScopecraftError::InvariantViolation("export_artifacts must be an object".into()))?;
            }
            other => {
                return Err(ScopecraftError::InvariantViolation(format!(
                    "unknown AppState field '{other}' in worker field_writes"
                )));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::NullOracle;
    use scopecraft_core::{stub_registry, Config as CoreConfig};

    fn manager(registry: Arc<WorkerRegistry>) -> (Arc<StateStore>, EventBroadcaster, Manager) {
        let broadcaster = EventBroadcaster::new(256);
        let store = Arc::new(StateStore::new(broadcaster.clone(), None));
        let classifier = Arc::new(IntentClassifier::new(Arc::new(NullOracle), 0.5));
        let brain = Arc::new(BrainAllocator::new(HashMap::new()));
        let decision_gate = Arc::new(DecisionGate::new(store.clone(), broadcaster.clone()));
        let manager = Manager::new(
            store.clone(),
            broadcaster.clone(),
            registry,
            classifier,
            brain,
            decision_gate,
            CoreConfig::default(),
        );
        (store, broadcaster, manager)
    }

    #[tokio::test]
    async fn empty_query_no_files_completes_immediately_with_no_action() {
        let (store, _bus, manager) = manager(Arc::new(stub_registry()));
        store.create("s1", "", vec![]).await.expect("create");
        let state = manager.run("s1").await.expect("run");
        assert_eq!(state.status, SessionStatus::Complete);
        assert_eq!(state.intent.unwrap().tag, IntentTag::NoAction);
    }

    #[tokio::test]
    async fn full_estimation_runs_every_stub_worker_to_completion() {
        let (store, _bus, manager) = manager(Arc::new(stub_registry()));
        store
            .create(
                "s1",
                "Estimate this project",
                vec![scopecraft_types::FileRef {
                    name: "planA.pdf".into(),
                    mime: "application/pdf".into(),
                    source: scopecraft_types::FileSource::Bytes { base64: "".into() },
                    size_bytes: 10,
                }],
            )
            .await
            .expect("create");
        let state = manager.run("s1").await.expect("run");
        assert_eq!(state.status, SessionStatus::Complete);
        assert_eq!(state.intent.unwrap().tag, IntentTag::FullEstimation);
    }

    #[tokio::test]
    async fn export_existing_runs_only_the_exporter() {
        let (store, _bus, manager) = manager(Arc::new(stub_registry()));
        store.create("s1", "Export to spreadsheet format", vec![]).await.expect("create");
        store
            .apply("s1", MutationKind::StateChange, |state| {
                state.estimate.push(scopecraft_types::EstimateLine {
                    line_ref: "1".into(),
                    unit_cost: 1.0,
                    extended: 1.0,
                    subtotals: Default::default(),
                    totals: 1.0,
                });
                Ok(())
            })
            .await
            .expect("seed estimate");
        let state = manager.run("s1").await.expect("run");
        assert_eq!(state.status, SessionStatus::Complete);
        assert_eq!(state.intent.unwrap().tag, IntentTag::ExportExisting);
    }

    #[tokio::test]
    async fn cancellation_mid_flight_marks_session_failed() {
        let (store, _bus, manager) = manager(Arc::new(stub_registry()));
        store
            .create(
                "s1",
                "Estimate this project",
                vec![scopecraft_types::FileRef {
                    name: "planA.pdf".into(),
                    mime: "application/pdf".into(),
                    source: scopecraft_types::FileSource::Bytes { base64: "".into() },
                    size_bytes: 10,
                }],
            )
            .await
            .expect("create");

        let manager = Arc::new(manager);
        let handle = tokio::spawn({
            let manager = manager.clone();
            async move { manager.run("s1").await }
        });
        manager.cancel("s1").await;
        let state = handle.await.expect("join").expect("run");
        // The run either raced past cancellation to completion, or observed
        // it; both are acceptable outcomes, but it must never hang.
        assert!(matches!(state.status, SessionStatus::Complete | SessionStatus::Failed));
    }
}
