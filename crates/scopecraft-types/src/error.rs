use thiserror::Error;

/// Error taxonomy for the orchestrator, keyed by kind rather than by call
/// site (spec §7). The manager is the only component permitted to turn one
/// of these into `AppState.error`; workers never raise across the dispatch
/// boundary.
#[derive(Error, Debug)]
pub enum ScopecraftError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("session already exists: {0}")]
    AlreadyExists(String),

    #[error("session not found: {0}")]
    NotFound(String),

    #[error("invalid state transition: {0}")]
    InvalidTransition(String),

    #[error("intake invalid: {0}")]
    IntakeInvalid(String),

    #[error("classification failed: {0}")]
    ClassificationFailed(String),

    #[error("planning could not satisfy a worker dependency: {0}")]
    PlanningUnmetDependency(String),

    #[error("worker transient error: {0}")]
    WorkerTransient(String),

    #[error("worker recoverable error: {0}")]
    WorkerRecoverable(String),

    #[error("worker fatal error: {0}")]
    WorkerFatal(String),

    #[error("decision timed out")]
    UserTimeout,

    #[error("stale decision: expected {expected}, got {got}")]
    StaleDecision { expected: String, got: String },

    #[error("a decision is already pending for this session")]
    DecisionAlreadyPending,

    #[error("run cancelled")]
    Cancelled,

    #[error("invariant violation: {0}")]
    InvariantViolation(String),
}

impl ScopecraftError {
    /// The error-taxonomy kind string used in `AppState.error.kind` and in
    /// `error_recovery` events (spec §6.1/§7).
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Io(_) | Self::Serialization(_) => "io",
            Self::AlreadyExists(_) => "already_exists",
            Self::NotFound(_) => "not_found",
            Self::InvalidTransition(_) => "invariant_violation",
            Self::IntakeInvalid(_) => "intake_invalid",
            Self::ClassificationFailed(_) => "classification_failed",
            Self::PlanningUnmetDependency(_) => "planning_unmet_dependency",
            Self::WorkerTransient(_) => "worker_transient",
            Self::WorkerRecoverable(_) => "worker_recoverable",
            Self::WorkerFatal(_) => "worker_fatal",
            Self::UserTimeout => "user_timeout",
            Self::StaleDecision { .. } => "stale_decision",
            Self::DecisionAlreadyPending => "decision_already_pending",
            Self::Cancelled => "cancelled",
            Self::InvariantViolation(_) => "invariant_violation",
        }
    }

    /// Whether an external caller may retry/rewind after this error.
    pub fn recoverable(&self) -> bool {
        matches!(
            self,
            Self::WorkerTransient(_) | Self::WorkerRecoverable(_) | Self::UserTimeout
        )
    }
}

impl serde::Serialize for ScopecraftError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ScopecraftError>;
