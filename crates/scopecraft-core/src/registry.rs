use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use scopecraft_types::{AppState, BrainChoice, ComplexityHint, WorkerDescriptor, WorkerResult};
use tokio_util::sync::CancellationToken;

/// The worker-facing dispatch contract (spec §4.7.1 / §6.3). Workers read an
/// immutable snapshot and return writes; they never mutate `AppState`
/// directly and never raise across this boundary.
#[async_trait]
pub trait Worker: Send + Sync {
    fn name(&self) -> &'static str;

    async fn dispatch(
        &self,
        snapshot: &AppState,
        choice: &BrainChoice,
        cancel: CancellationToken,
    ) -> WorkerResult;

    /// Coarse complexity label for the Brain Allocator (spec §3.3
    /// `complexity_hints`). Default is a fixed `Med`; real workers should
    /// derive this from the snapshot (document size, image content, etc).
    fn complexity_hint(&self, _snapshot: &AppState) -> ComplexityHint {
        ComplexityHint::Med
    }

    /// `skip_if_fresh` predicate (spec §3.3): true means this worker's
    /// output already looks valid and the planner may omit the step.
    fn skip_if_fresh(&self, _snapshot: &AppState) -> bool {
        false
    }
}

/// Name → handle mapping plus declared requires/produces metadata (C5).
/// Immutable after construction; the manager and the router look workers up
/// by name and never hold references to each other's implementations.
#[derive(Clone)]
pub struct WorkerRegistry {
    workers: HashMap<&'static str, Arc<dyn Worker>>,
    descriptors: HashMap<&'static str, WorkerDescriptor>,
}

impl WorkerRegistry {
    pub fn builder() -> WorkerRegistryBuilder {
        WorkerRegistryBuilder::default()
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Worker>> {
        self.workers.get(name).cloned()
    }

    pub fn descriptor(&self, name: &str) -> Option<&WorkerDescriptor> {
        self.descriptors.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.workers.keys().copied()
    }

    /// Every `AppState` field that transitively depends on `field` per the
    /// registry's `requires`/`produces` edges: if a worker requires a field
    /// in the clearing set, its produced fields join the set too, fixed
    /// point. Used by rewind (spec §3.4, §4.7.5, P8) to clear a field's
    /// downstream dependents.
    pub fn transitive_dependents(&self, field: &str) -> Vec<&'static str> {
        let mut cleared: std::collections::HashSet<&'static str> = std::collections::HashSet::new();
        loop {
            let mut grew = false;
            for descriptor in self.descriptors.values() {
                let requires_cleared = descriptor
                    .requires
                    .iter()
                    .any(|r| *r == field || cleared.contains(r));
                if requires_cleared {
                    for produced in descriptor.produces {
                        if cleared.insert(produced) {
                            grew = true;
                        }
                    }
                }
            }
            if !grew {
                break;
            }
        }
        cleared.into_iter().collect()
    }
}

#[derive(Default)]
pub struct WorkerRegistryBuilder {
    workers: HashMap<&'static str, Arc<dyn Worker>>,
    descriptors: HashMap<&'static str, WorkerDescriptor>,
}

impl WorkerRegistryBuilder {
    pub fn register(mut self, descriptor: WorkerDescriptor, worker: Arc<dyn Worker>) -> Self {
        self.descriptors.insert(descriptor.name, descriptor);
        self.workers.insert(worker.name(), worker);
        self
    }

    pub fn build(self) -> WorkerRegistry {
        WorkerRegistry {
            workers: self.workers,
            descriptors: self.descriptors,
        }
    }
}

/// Test/demo scaffolding standing in for the out-of-scope real workers
/// (document extraction, trade mapping, scope, takeoff, estimation, export,
/// spreadsheet-service integration — spec §1). Always succeeds with no
/// field writes after a short simulated delay, so the manager loop is
/// exercisable end to end without any real worker implementation.
pub struct StubWorker {
    name: &'static str,
    delay: Duration,
}

impl StubWorker {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            delay: Duration::from_millis(5),
        }
    }
}

#[async_trait]
impl Worker for StubWorker {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn dispatch(
        &self,
        _snapshot: &AppState,
        _choice: &BrainChoice,
        cancel: CancellationToken,
    ) -> WorkerResult {
        tokio::select! {
            _ = tokio::time::sleep(self.delay) => {}
            _ = cancel.cancelled() => {
                return WorkerResult::FatalError {
                    message: "cancelled".into(),
                    details: Default::default(),
                };
            }
        }
        WorkerResult::Ok {
            field_writes: Default::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::WORKER_DESCRIPTORS;

    fn registry() -> WorkerRegistry {
        let mut builder = WorkerRegistry::builder();
        for descriptor in WORKER_DESCRIPTORS {
            builder = builder.register(descriptor.clone(), Arc::new(StubWorker::new(descriptor.name)));
        }
        builder.build()
    }

    #[test]
    fn rewinding_trade_mapping_clears_everything_downstream() {
        let dependents = registry().transitive_dependents("trade_mapping");
        assert!(dependents.contains(&"scope_items"));
        assert!(dependents.contains(&"takeoff_data"));
        assert!(dependents.contains(&"estimate"));
        assert!(dependents.contains(&"qa_findings"));
        assert!(dependents.contains(&"export_artifacts"));
        assert!(!dependents.contains(&"processed_files_content"));
    }

    #[test]
    fn rewinding_a_leaf_field_has_no_dependents() {
        let dependents = registry().transitive_dependents("export_artifacts");
        assert!(dependents.is_empty());
    }
}
