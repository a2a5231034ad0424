use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::decision::DecisionRequest;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComplexityHint {
    Low,
    Med,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BrainTier {
    Low,
    Medium,
    High,
}

impl BrainTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

/// Output of the Brain Allocator (C4) for one plan step (spec §4.4).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrainChoice {
    pub model_tier: BrainTier,
    pub model_selected: String,
    pub rationale: String,
    pub complexity_assessment: ComplexityHint,
    pub expected_context_window: u32,
    pub factors_considered: Vec<String>,
}

/// Static metadata for one named worker (spec §3.3 / Worker Registry).
#[derive(Debug, Clone)]
pub struct WorkerDescriptor {
    pub name: &'static str,
    pub requires: &'static [&'static str],
    pub produces: &'static [&'static str],
}

/// Outcome of one dispatch (spec §4.7.1). Workers never raise across the
/// dispatch boundary; this enum is the only channel for worker failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum WorkerResult {
    Ok {
        field_writes: Map<String, Value>,
    },
    NeedsUserInput {
        request: DecisionRequest,
    },
    RecoverableError {
        message: String,
        #[serde(default)]
        details: Map<String, Value>,
    },
    FatalError {
        message: String,
        #[serde(default)]
        details: Map<String, Value>,
    },
}
