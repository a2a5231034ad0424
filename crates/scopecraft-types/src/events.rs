use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The six mandatory streaming event payloads (spec §6.1). Subscribers must
/// tolerate unknown fields, so this is `#[serde(untagged)]`: the wire shape
/// is exactly the `data` object the spec prescribes, with no extra
/// discriminant key layered on top of it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EventData {
    ManagerThinking {
        thinking_type: String,
        stage: String,
        analysis: String,
        factors: Vec<String>,
        confidence: f64,
        reasoning_depth: String,
    },
    AgentSubstep {
        agent_name: String,
        substep: String,
        progress_percentage: u8,
        substep_details: Map<String, Value>,
    },
    WorkflowStateChange {
        change_type: String,
        current_stage: String,
        workflow_visualization: WorkflowVisualization,
        active_agents: Vec<String>,
        pipeline_status: PipelineStatus,
    },
    BrainAllocation {
        agent_name: String,
        model_selected: String,
        model_tier: String,
        reasoning: String,
        complexity_assessment: String,
        context_window: u32,
        factors_considered: Vec<String>,
    },
    UserDecisionNeeded {
        decision_id: String,
        decision_type: String,
        prompt: String,
        options: Vec<Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        default_option: Option<String>,
        timeout_seconds: u64,
        can_skip: bool,
        affects_workflow: bool,
        context: Map<String, Value>,
    },
    ErrorRecovery {
        error_message: String,
        severity: String,
        recovery_strategy: String,
        can_continue: bool,
        affected_agents: Vec<String>,
        user_action_required: bool,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct WorkflowVisualization {
    pub stages: Vec<String>,
    pub completion_percentage: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PipelineStatus {
    pub files_processed: bool,
    pub trades_mapped: bool,
    pub scope_analyzed: bool,
    pub takeoff_calculated: bool,
    pub estimate_generated: bool,
    pub export_ready: bool,
}

/// The envelope every event shares (spec §4.5). `dropped` is populated by
/// the broadcaster on the first event delivered to a subscriber after it
/// lagged (spec §4.5 Delivery / §8 boundary behaviors); absent otherwise.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    #[serde(rename = "type")]
    pub event_type: String,
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
    pub data: EventData,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dropped: Option<u64>,
}

impl EventEnvelope {
    pub fn new(event_type: impl Into<String>, session_id: impl Into<String>, data: EventData) -> Self {
        Self {
            event_type: event_type.into(),
            session_id: session_id.into(),
            timestamp: Utc::now(),
            data,
            dropped: None,
        }
    }

    pub fn manager_thinking(session_id: impl Into<String>, data: EventData) -> Self {
        Self::new("manager_thinking", session_id, data)
    }

    pub fn agent_substep(session_id: impl Into<String>, data: EventData) -> Self {
        Self::new("agent_substep", session_id, data)
    }

    pub fn workflow_state_change(session_id: impl Into<String>, data: EventData) -> Self {
        Self::new("workflow_state_change", session_id, data)
    }

    pub fn brain_allocation(session_id: impl Into<String>, data: EventData) -> Self {
        Self::new("brain_allocation", session_id, data)
    }

    pub fn user_decision_needed(session_id: impl Into<String>, data: EventData) -> Self {
        Self::new("user_decision_needed", session_id, data)
    }

    pub fn error_recovery(session_id: impl Into<String>, data: EventData) -> Self {
        Self::new("error_recovery", session_id, data)
    }
}
