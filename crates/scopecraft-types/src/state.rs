use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::decision::DecisionRequest;
use crate::file::FileRef;
use crate::intent::Intent;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    New,
    IntakeReady,
    Running,
    AwaitingUser,
    FilesReadyForAnalysis,
    Complete,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceLevel {
    Info,
    Warn,
    Error,
}

/// One append-only entry in `AppState.agent_trace` (spec §3.1). `seq` is a
/// per-session monotonic counter so P1 (trace monotonicity) can be checked
/// without relying on timestamp resolution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceEntry {
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub worker: String,
    pub level: TraceLevel,
    pub message: String,
    #[serde(default)]
    pub details: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunError {
    pub kind: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker: Option<String>,
    pub recoverable: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeMappingEntry {
    pub trade: String,
    pub section_ref: String,
    pub confidence: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScopeItem {
    pub trade: String,
    pub item: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spec: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qty: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TakeoffEntry {
    pub scope_ref: String,
    pub quantity: f64,
    pub unit: String,
    pub method: String,
    #[serde(default)]
    pub assumptions: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EstimateLine {
    pub line_ref: String,
    pub unit_cost: f64,
    pub extended: f64,
    #[serde(default)]
    pub subtotals: Map<String, Value>,
    pub totals: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QaFinding {
    pub severity: Severity,
    pub message: String,
    #[serde(rename = "ref")]
    pub reference: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactLocator {
    pub location: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
}

/// The single source of truth for a running analysis (spec §3.1). Exactly
/// one `AppState` exists per session; the State Store (C1) is the only
/// component that constructs or mutates one directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppState {
    pub session_id: String,
    pub query: String,
    #[serde(default)]
    pub files: Vec<FileRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent: Option<Intent>,
    #[serde(default)]
    pub processed_files_content: Map<String, Value>,
    #[serde(default)]
    pub trade_mapping: Vec<TradeMappingEntry>,
    #[serde(default)]
    pub scope_items: Vec<ScopeItem>,
    #[serde(default)]
    pub takeoff_data: Vec<TakeoffEntry>,
    #[serde(default)]
    pub estimate: Vec<EstimateLine>,
    #[serde(default)]
    pub qa_findings: Vec<QaFinding>,
    #[serde(default)]
    pub export_artifacts: Map<String, Value>,
    pub status: SessionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_decision: Option<DecisionRequest>,
    #[serde(default)]
    pub agent_trace: Vec<TraceEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RunError>,
    #[serde(default)]
    pub manager_notes: Map<String, Value>,
    pub revision: u64,
    pub updated_at_ms: u64,
}

impl AppState {
    pub fn new(session_id: impl Into<String>, query: impl Into<String>, files: Vec<FileRef>) -> Self {
        Self {
            session_id: session_id.into(),
            query: query.into(),
            files,
            intent: None,
            processed_files_content: Map::new(),
            trade_mapping: Vec::new(),
            scope_items: Vec::new(),
            takeoff_data: Vec::new(),
            estimate: Vec::new(),
            qa_findings: Vec::new(),
            export_artifacts: Map::new(),
            status: SessionStatus::New,
            pending_decision: None,
            agent_trace: Vec::new(),
            error: None,
            manager_notes: Map::new(),
            revision: 0,
            updated_at_ms: now_ms(),
        }
    }

    /// Returns the declared AppState field name populated by each worker in
    /// the canonical sequences (spec §3.3 `produces`, mirrored here so the
    /// store's dependency checks don't need the full Worker Registry).
    pub fn field_is_populated(&self, field: &str) -> bool {
        match field {
            "files" => !self.files.is_empty(),
            "processed_files_content" => !self.processed_files_content.is_empty(),
            "trade_mapping" => !self.trade_mapping.is_empty(),
            "scope_items" => !self.scope_items.is_empty(),
            "takeoff_data" => !self.takeoff_data.is_empty(),
            "estimate" => !self.estimate.is_empty(),
            "qa_findings" => !self.qa_findings.is_empty(),
            "export_artifacts" => !self.export_artifacts.is_empty(),
            _ => false,
        }
    }

    pub fn clear_field(&mut self, field: &str) {
        match field {
            "files" => self.files.clear(),
            "processed_files_content" => self.processed_files_content.clear(),
            "trade_mapping" => self.trade_mapping.clear(),
            "scope_items" => self.scope_items.clear(),
            "takeoff_data" => self.takeoff_data.clear(),
            "estimate" => self.estimate.clear(),
            "qa_findings" => self.qa_findings.clear(),
            "export_artifacts" => self.export_artifacts.clear(),
            _ => {}
        }
    }
}

pub fn now_ms() -> u64 {
    Utc::now().timestamp_millis() as u64
}
