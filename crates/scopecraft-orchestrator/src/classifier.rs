use std::sync::Arc;

use async_trait::async_trait;
use regex::Regex;
use scopecraft_types::{AppState, Intent, IntentTag, Result, ScopecraftError};

/// The classifier's LLM fallback pass (spec §4.2 step 2), modeled as an
/// injectable trait so the deterministic pattern pass and default heuristic
/// are fully testable without a live provider. The real provider adapter is
/// out of scope (spec §1); this crate ships only [`NullOracle`].
#[async_trait]
pub trait IntentOracle: Send + Sync {
    async fn classify(&self, query: &str, file_summary: &str, populated: &PopulatedFlags) -> Result<OracleVerdict>;
}

#[derive(Debug, Clone, Copy)]
pub struct OracleVerdict {
    pub tag: IntentTag,
    pub confidence: f64,
}

/// Which AppState fields are already populated, summarized for the oracle
/// prompt and for the default heuristic (spec §4.2 step 3).
#[derive(Debug, Clone, Copy, Default)]
pub struct PopulatedFlags {
    pub files: bool,
    pub processed_files_content: bool,
    pub trade_mapping: bool,
    pub scope_items: bool,
    pub takeoff_data: bool,
    pub estimate: bool,
}

impl PopulatedFlags {
    fn from_state(state: &AppState) -> Self {
        Self {
            files: !state.files.is_empty(),
            processed_files_content: !state.processed_files_content.is_empty(),
            trade_mapping: !state.trade_mapping.is_empty(),
            scope_items: !state.scope_items.is_empty(),
            takeoff_data: !state.takeoff_data.is_empty(),
            estimate: !state.estimate.is_empty(),
        }
    }
}

/// Always fails, forcing the classifier straight to its default heuristic.
/// The conservative choice when no provider is configured.
pub struct NullOracle;

#[async_trait]
impl IntentOracle for NullOracle {
    async fn classify(&self, _query: &str, _file_summary: &str, _populated: &PopulatedFlags) -> Result<OracleVerdict> {
        Err(ScopecraftError::ClassificationFailed(
            "no intent oracle configured".into(),
        ))
    }
}

struct PatternRule {
    name: &'static str,
    tag: IntentTag,
    confidence: f64,
    matches: fn(&str, &PopulatedFlags) -> bool,
}

fn spreadsheet_url_regex() -> &'static Regex {
    static RE: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)https?://[^\s]*spreadsheet-service[^\s]*").unwrap())
}

/// Ordered, deterministic pattern rules (spec §4.2 step 1). First match
/// wins; ties in pattern pass are broken by declaration order.
fn pattern_rules() -> &'static [PatternRule] {
    static RULES: &[PatternRule] = &[
        PatternRule {
            name: "spreadsheet_url",
            tag: IntentTag::SpreadsheetIntegration,
            confidence: 0.95,
            // Gated on `!flags.files`: once spreadsheet-intake has run and
            // populated `files`, the query still contains the same URL, but
            // re-classifying to spreadsheet_integration would redispatch the
            // same worker forever instead of routing the downloaded file
            // onward (spec §4.2 step 3 / §8 S3's "re-classifies to
            // full_estimation").
            matches: |query, flags| !flags.files && spreadsheet_url_regex_matches(query),
        },
        PatternRule {
            name: "export_with_estimate",
            tag: IntentTag::ExportExisting,
            confidence: 0.93,
            matches: |query, flags| flags.estimate && contains_any(query, &["export", "download"]),
        },
        PatternRule {
            name: "quick_estimate",
            tag: IntentTag::QuickEstimate,
            confidence: 0.9,
            matches: |query, flags| {
                flags.scope_items && contains_any(query, &["quick estimate", "quick"])
            },
        },
        PatternRule {
            name: "update_estimate",
            tag: IntentTag::UpdateEstimate,
            confidence: 0.9,
            matches: |query, flags| {
                flags.estimate && contains_any(query, &["update", "revise", "recalculate"])
            },
        },
        PatternRule {
            name: "data_analysis",
            tag: IntentTag::DataAnalysis,
            confidence: 0.9,
            matches: |query, flags| {
                flags.files && contains_any(query, &["just analyze", "data analysis", "map trades"])
            },
        },
        PatternRule {
            name: "file_analysis",
            tag: IntentTag::FileAnalysis,
            confidence: 0.9,
            matches: |query, flags| flags.files && contains_any(query, &["scope only", "analyze file"]),
        },
    ];
    RULES
}

fn spreadsheet_url_regex_matches(query: &str) -> bool {
    spreadsheet_url_regex().is_match(query)
}

fn contains_any(query: &str, needles: &[&str]) -> bool {
    let lower = query.to_lowercase();
    needles.iter().any(|n| lower.contains(n))
}

/// Maps `(query, files, existing state)` to an intent tag, confidence, and
/// metadata (C2, spec §4.2). Never invents a tag outside [`IntentTag`]'s
/// closed set.
pub struct IntentClassifier {
    oracle: Arc<dyn IntentOracle>,
    confidence_floor: f64,
}

impl IntentClassifier {
    pub fn new(oracle: Arc<dyn IntentOracle>, confidence_floor: f64) -> Self {
        Self {
            oracle,
            confidence_floor,
        }
    }

    pub async fn classify(&self, state: &AppState) -> Intent {
        let flags = PopulatedFlags::from_state(state);

        for rule in pattern_rules() {
            if (rule.matches)(&state.query, &flags) {
                return self.finish(rule.tag, rule.confidence, rule.name);
            }
        }

        let file_summary = format!("{} file(s) attached", state.files.len());
        match self.oracle.classify(&state.query, &file_summary, &flags).await {
            Ok(verdict) if verdict.confidence >= self.confidence_floor => {
                self.finish(verdict.tag, verdict.confidence, "oracle")
            }
            _ => self.finish(self.default_heuristic(&flags), 0.3, "default_heuristic"),
        }
    }

    fn default_heuristic(&self, flags: &PopulatedFlags) -> IntentTag {
        if flags.files {
            IntentTag::FullEstimation
        } else if flags.estimate {
            IntentTag::ExportExisting
        } else {
            IntentTag::NoAction
        }
    }

    fn finish(&self, tag: IntentTag, confidence: f64, source: &str) -> Intent {
        let mut metadata = serde_json::Map::new();
        metadata.insert("source".into(), serde_json::Value::String(source.into()));
        Intent {
            tag,
            confidence,
            metadata,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scopecraft_types::FileRef;

    fn state_with(query: &str, files: Vec<FileRef>) -> AppState {
        AppState::new("s1", query, files)
    }

    fn classifier() -> IntentClassifier {
        IntentClassifier::new(Arc::new(NullOracle), 0.5)
    }

    #[tokio::test]
    async fn empty_query_no_files_is_no_action() {
        let state = state_with("", vec![]);
        let intent = classifier().classify(&state).await;
        assert_eq!(intent.tag, IntentTag::NoAction);
    }

    #[tokio::test]
    async fn files_present_with_no_pattern_match_defaults_to_full_estimation() {
        let state = state_with(
            "hello there",
            vec![FileRef {
                name: "plan.pdf".into(),
                mime: "application/pdf".into(),
                source: scopecraft_types::FileSource::Bytes { base64: "".into() },
                size_bytes: 10,
            }],
        );
        let intent = classifier().classify(&state).await;
        assert_eq!(intent.tag, IntentTag::FullEstimation);
    }

    #[tokio::test]
    async fn spreadsheet_url_is_detected_with_high_confidence() {
        let state = state_with("Analyze https://my-spreadsheet-service.example/sheet/ABC", vec![]);
        let intent = classifier().classify(&state).await;
        assert_eq!(intent.tag, IntentTag::SpreadsheetIntegration);
        assert!(intent.confidence >= 0.9);
    }

    #[tokio::test]
    async fn export_intent_requires_existing_estimate() {
        let mut state = state_with("Export to spreadsheet format", vec![]);
        state.estimate.push(scopecraft_types::EstimateLine {
            line_ref: "1".into(),
            unit_cost: 1.0,
            extended: 1.0,
            subtotals: Default::default(),
            totals: 1.0,
        });
        let intent = classifier().classify(&state).await;
        assert_eq!(intent.tag, IntentTag::ExportExisting);
    }

    #[tokio::test]
    async fn spreadsheet_url_does_not_refire_once_files_are_populated() {
        let state = state_with(
            "Analyze https://my-spreadsheet-service.example/sheet/ABC",
            vec![FileRef {
                name: "plan-3.pdf".into(),
                mime: "application/pdf".into(),
                source: scopecraft_types::FileSource::Bytes { base64: "".into() },
                size_bytes: 10,
            }],
        );
        let intent = classifier().classify(&state).await;
        assert_eq!(intent.tag, IntentTag::FullEstimation);
    }

    #[tokio::test]
    async fn classification_is_idempotent_for_high_confidence_pattern_match() {
        let state = state_with("Analyze https://my-spreadsheet-service.example/sheet/ABC", vec![]);
        let c = classifier();
        let first = c.classify(&state).await;
        let second = c.classify(&state).await;
        assert_eq!(first.tag, second.tag);
        assert_eq!(first.confidence, second.confidence);
    }
}
