use serde::{Deserialize, Serialize};
use serde_json::Map;

/// The closed set of intent tags the classifier may emit (spec §4.2). The
/// classifier must never invent a tag outside this set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentTag {
    FullEstimation,
    QuickEstimate,
    FileAnalysis,
    ExportExisting,
    UpdateEstimate,
    DataAnalysis,
    SpreadsheetIntegration,
    NoAction,
}

impl IntentTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FullEstimation => "full_estimation",
            Self::QuickEstimate => "quick_estimate",
            Self::FileAnalysis => "file_analysis",
            Self::ExportExisting => "export_existing",
            Self::UpdateEstimate => "update_estimate",
            Self::DataAnalysis => "data_analysis",
            Self::SpreadsheetIntegration => "spreadsheet_integration",
            Self::NoAction => "no_action",
        }
    }
}

/// The canonical worker sequence for an intent (spec §4.3 table). Kept here
/// (rather than only in the planner) because classifier confidence and plan
/// shape are both derived from this fixed mapping.
pub fn canonical_sequence(tag: IntentTag) -> &'static [&'static str] {
    match tag {
        IntentTag::FullEstimation => &[
            "file-reader",
            "trade-mapper",
            "scope",
            "takeoff",
            "estimator",
            "qa-validator",
            "exporter",
        ],
        IntentTag::QuickEstimate => &["takeoff", "estimator", "qa-validator"],
        IntentTag::FileAnalysis => &["file-reader", "trade-mapper", "scope"],
        IntentTag::ExportExisting => &["exporter"],
        IntentTag::UpdateEstimate => &["estimator", "qa-validator", "exporter"],
        IntentTag::DataAnalysis => &["file-reader", "trade-mapper", "scope"],
        IntentTag::SpreadsheetIntegration => &["spreadsheet-intake"],
        IntentTag::NoAction => &[],
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Intent {
    pub tag: IntentTag,
    pub confidence: f64,
    #[serde(default)]
    pub metadata: Map<String, serde_json::Value>,
}
