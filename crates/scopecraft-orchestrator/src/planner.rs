use std::collections::HashSet;

use scopecraft_core::WorkerRegistry;
use scopecraft_types::{canonical_sequence, AppState, IntentTag, Result, ScopecraftError};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanStep {
    pub worker_name: String,
    pub rationale: String,
    pub skip: bool,
}

/// Stateless, deterministic mapping from `(intent, state, registry)` to an
/// ordered plan (C3, spec §4.3). Calling [`RoutePlanner::plan`] twice with
/// identical inputs yields an identical plan (L1).
pub struct RoutePlanner;

impl RoutePlanner {
    pub fn plan(
        intent: IntentTag,
        state: &AppState,
        registry: &WorkerRegistry,
    ) -> Result<Vec<PlanStep>> {
        let sequence = canonical_sequence(intent);
        let mut populated: HashSet<&str> = known_populated_fields(state);
        let mut steps = Vec::with_capacity(sequence.len());

        for &worker_name in sequence {
            let descriptor = registry.descriptor(worker_name).ok_or_else(|| {
                ScopecraftError::PlanningUnmetDependency(format!(
                    "no worker registered for step '{worker_name}'"
                ))
            })?;

            let worker = registry.get(worker_name);
            let skip = worker
                .as_ref()
                .map(|w| w.skip_if_fresh(state))
                .unwrap_or(false);

            if skip {
                steps.push(PlanStep {
                    worker_name: worker_name.to_string(),
                    rationale: "output already fresh, skipping".into(),
                    skip: true,
                });
                for produced in descriptor.produces {
                    populated.insert(produced);
                }
                continue;
            }

            for required in descriptor.requires {
                if !populated.contains(required) {
                    return Err(ScopecraftError::PlanningUnmetDependency(format!(
                        "worker '{worker_name}' requires '{required}', which is neither already populated nor produced by a preceding step"
                    )));
                }
            }

            steps.push(PlanStep {
                worker_name: worker_name.to_string(),
                rationale: "canonical step for intent".to_string(),
                skip: false,
            });
            for produced in descriptor.produces {
                populated.insert(produced);
            }
        }

        Ok(steps)
    }
}

fn known_populated_fields(state: &AppState) -> HashSet<&'static str> {
    const FIELDS: &[&str] = &[
        "files",
        "processed_files_content",
        "trade_mapping",
        "scope_items",
        "takeoff_data",
        "estimate",
        "qa_findings",
        "export_artifacts",
    ];
    FIELDS
        .iter()
        .copied()
        .filter(|f| state.field_is_populated(f))
        .collect()
}
