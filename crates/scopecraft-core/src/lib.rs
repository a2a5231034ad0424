//! The state store (C1), event broadcaster (C6), and worker registry (C5)
//! that the orchestrator's manager loop is built on top of.

mod broadcaster;
mod config;
mod registry;
mod sink;
mod store;

pub use broadcaster::{EventBroadcaster, EventSink, Subscription};
pub use config::Config;
pub use registry::{StubWorker, Worker, WorkerRegistry, WorkerRegistryBuilder};
pub use sink::JsonlEventSink;
pub use store::{ApplyOutcome, MutationKind, StateStore};

use std::sync::Arc;

use scopecraft_types::WorkerDescriptor;

/// The fixed, loaded-at-startup Worker Registry entries for every worker
/// named in the canonical sequences (spec §4.3). `requires`/`produces` here
/// are the dependency-closure source the planner and rewind both use.
pub const WORKER_DESCRIPTORS: &[WorkerDescriptor] = &[
    WorkerDescriptor {
        name: "file-reader",
        requires: &["files"],
        produces: &["processed_files_content"],
    },
    WorkerDescriptor {
        name: "trade-mapper",
        requires: &["processed_files_content"],
        produces: &["trade_mapping"],
    },
    WorkerDescriptor {
        name: "scope",
        requires: &["trade_mapping"],
        produces: &["scope_items"],
    },
    WorkerDescriptor {
        name: "takeoff",
        requires: &["scope_items"],
        produces: &["takeoff_data"],
    },
    WorkerDescriptor {
        name: "estimator",
        requires: &["takeoff_data"],
        produces: &["estimate"],
    },
    WorkerDescriptor {
        name: "qa-validator",
        requires: &["estimate"],
        produces: &["qa_findings"],
    },
    WorkerDescriptor {
        name: "exporter",
        requires: &["estimate"],
        produces: &["export_artifacts"],
    },
    WorkerDescriptor {
        name: "spreadsheet-intake",
        requires: &[],
        produces: &["files"],
    },
];

/// Builds a registry of [`StubWorker`]s for every descriptor above —
/// convenient for tests, demos, and the `run` CLI subcommand where no real
/// worker implementations are wired in.
pub fn stub_registry() -> WorkerRegistry {
    let mut builder = WorkerRegistry::builder();
    for descriptor in WORKER_DESCRIPTORS {
        builder = builder.register(descriptor.clone(), Arc::new(StubWorker::new(descriptor.name)));
    }
    builder.build()
}
