//! Shared data types for the Scopecraft construction-document orchestrator:
//! `AppState`, the six streaming event payloads, decisions, and the
//! worker-facing dispatch contract. Kept dependency-light so every other
//! crate in the workspace, plus any external worker implementation, can
//! depend on it without pulling in tokio or axum.

mod decision;
mod error;
mod events;
mod file;
mod intent;
mod state;
mod worker;

pub use decision::{DecisionKind, DecisionOption, DecisionRequest};
pub use error::{Result, ScopecraftError};
pub use events::{EventData, EventEnvelope, PipelineStatus, WorkflowVisualization};
pub use file::{FileRef, FileSource, PageContentKind, ProcessedFile, ProcessedPage};
pub use intent::{canonical_sequence, Intent, IntentTag};
pub use state::{
    now_ms, AppState, ArtifactLocator, EstimateLine, QaFinding, RunError, ScopeItem,
    SessionStatus, Severity, TakeoffEntry, TraceEntry, TraceLevel, TradeMappingEntry,
};
pub use worker::{BrainChoice, BrainTier, ComplexityHint, WorkerDescriptor, WorkerResult};
