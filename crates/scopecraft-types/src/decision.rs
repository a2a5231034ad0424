use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionKind {
    FileSelection,
    ConfirmProceed,
    ChooseOption,
    ResolveError,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionOption {
    pub id: String,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionRequest {
    pub decision_id: String,
    pub kind: DecisionKind,
    pub prompt: String,
    #[serde(default)]
    pub options: Vec<DecisionOption>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_option: Option<String>,
    pub timeout_seconds: u64,
    pub can_skip: bool,
    pub affects_workflow: bool,
}

impl DecisionRequest {
    pub fn new(kind: DecisionKind, prompt: impl Into<String>, timeout_seconds: u64) -> Self {
        Self {
            decision_id: uuid::Uuid::new_v4().to_string(),
            kind,
            prompt: prompt.into(),
            options: Vec::new(),
            default_option: None,
            timeout_seconds,
            can_skip: false,
            affects_workflow: true,
        }
    }

    /// Whether `response` is an acceptable answer to this request. Enumerated
    /// kinds require one of `options`; free-form kinds accept any non-empty
    /// response.
    pub fn accepts(&self, response: &str) -> bool {
        if self.options.is_empty() {
            return !response.trim().is_empty();
        }
        self.options.iter().any(|o| o.id == response)
    }
}
