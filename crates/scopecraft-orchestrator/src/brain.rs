use std::collections::HashMap;

use scopecraft_types::{AppState, BrainChoice, BrainTier, ComplexityHint, PageContentKind};

/// Maps a worker step to a model tier (C4, spec §4.4). Rules are
/// table-driven and reproducible from inputs alone: same complexity hint,
/// same document features, same intent confidence always yields the same
/// choice.
pub struct BrainAllocator {
    overrides: HashMap<String, BrainTier>,
}

impl BrainAllocator {
    pub fn new(overrides: HashMap<String, BrainTier>) -> Self {
        Self { overrides }
    }

    pub fn allocate(
        &self,
        worker_name: &str,
        complexity: ComplexityHint,
        state: &AppState,
        intent_confidence: f64,
    ) -> BrainChoice {
        let mut factors = Vec::new();

        if let Some(&forced) = self.overrides.get(worker_name) {
            factors.push("brain_tier_override".to_string());
            return self.finish(forced, complexity, factors);
        }

        let mut tier = match complexity {
            ComplexityHint::Low => BrainTier::Low,
            ComplexityHint::Med => BrainTier::Medium,
            ComplexityHint::High => BrainTier::High,
        };
        factors.push(format!("complexity_hint={:?}", complexity));

        if has_visual_content(state) {
            factors.push("visual_content_present".to_string());
            tier = bump(tier);
        }

        if total_document_bytes(state) > LARGE_DOCUMENT_THRESHOLD_BYTES {
            factors.push("large_document_size".to_string());
            tier = bump(tier);
        }

        if intent_confidence < 0.6 {
            factors.push("low_intent_confidence".to_string());
            tier = bump(tier);
        }

        self.finish(tier, complexity, factors)
    }

    fn finish(&self, tier: BrainTier, complexity: ComplexityHint, factors: Vec<String>) -> BrainChoice {
        BrainChoice {
            model_tier: tier,
            model_selected: model_for_tier(tier).to_string(),
            rationale: format!("selected {} tier from {} factor(s)", tier.as_str(), factors.len()),
            complexity_assessment: complexity,
            expected_context_window: context_window_for_tier(tier),
            factors_considered: factors,
        }
    }
}

const LARGE_DOCUMENT_THRESHOLD_BYTES: u64 = 5 * 1024 * 1024;

fn has_visual_content(state: &AppState) -> bool {
    state
        .processed_files_content
        .values()
        .filter_map(|v| v.get("pages"))
        .filter_map(|p| p.as_array())
        .flatten()
        .any(|page| {
            page.get("kind")
                .and_then(|k| k.as_str())
                .map(|k| k == page_content_kind_str(PageContentKind::ImageOcr))
                .unwrap_or(false)
        })
}

fn page_content_kind_str(kind: PageContentKind) -> &'static str {
    match kind {
        PageContentKind::Text => "text",
        PageContentKind::Table => "table",
        PageContentKind::ImageOcr => "image_ocr",
    }
}

fn total_document_bytes(state: &AppState) -> u64 {
    state.files.iter().map(|f| f.size_bytes).sum()
}

fn bump(tier: BrainTier) -> BrainTier {
    match tier {
        BrainTier::Low => BrainTier::Medium,
        BrainTier::Medium => BrainTier::High,
        BrainTier::High => BrainTier::High,
    }
}

fn model_for_tier(tier: BrainTier) -> &'static str {
    match tier {
        BrainTier::Low => "scopecraft-fast",
        BrainTier::Medium => "scopecraft-balanced",
        BrainTier::High => "scopecraft-frontier",
    }
}

fn context_window_for_tier(tier: BrainTier) -> u32 {
    match tier {
        BrainTier::Low => 8_000,
        BrainTier::Medium => 32_000,
        BrainTier::High => 128_000,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn low_complexity_maps_to_low_tier() {
        let allocator = BrainAllocator::new(HashMap::new());
        let state = AppState::new("s1", "q", vec![]);
        let choice = allocator.allocate("takeoff", ComplexityHint::Low, &state, 0.95);
        assert_eq!(choice.model_tier, BrainTier::Low);
    }

    #[test]
    fn override_wins_regardless_of_complexity() {
        let mut overrides = HashMap::new();
        overrides.insert("takeoff".to_string(), BrainTier::High);
        let allocator = BrainAllocator::new(overrides);
        let state = AppState::new("s1", "q", vec![]);
        let choice = allocator.allocate("takeoff", ComplexityHint::Low, &state, 0.95);
        assert_eq!(choice.model_tier, BrainTier::High);
    }

    #[test]
    fn low_intent_confidence_bumps_tier() {
        let allocator = BrainAllocator::new(HashMap::new());
        let state = AppState::new("s1", "q", vec![]);
        let choice = allocator.allocate("takeoff", ComplexityHint::Low, &state, 0.2);
        assert_eq!(choice.model_tier, BrainTier::Medium);
    }

    #[test]
    fn allocation_is_reproducible() {
        let allocator = BrainAllocator::new(HashMap::new());
        let state = AppState::new("s1", "q", vec![]);
        let a = allocator.allocate("estimator", ComplexityHint::Med, &state, 0.8);
        let b = allocator.allocate("estimator", ComplexityHint::Med, &state, 0.8);
        assert_eq!(a.model_tier, b.model_tier);
        assert_eq!(a.expected_context_window, b.expected_context_window);
    }
}
