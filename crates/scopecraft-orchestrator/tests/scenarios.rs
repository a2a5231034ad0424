//! End-to-end scenarios mirroring spec §8 (S1-S6), exercised against
//! `StubWorker`s (and a `FakeSpreadsheetClient` for S3) since the real
//! worker implementations are out of scope.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use scopecraft_core::{stub_registry, Config, EventBroadcaster, StateStore, Worker, WorkerRegistry, WORKER_DESCRIPTORS};
use scopecraft_orchestrator::{
    BrainAllocator, DecisionGate, FakeSpreadsheetClient, IntentClassifier, Manager, NullOracle,
    SpreadsheetFile, SpreadsheetIntakeWorker,
};
use scopecraft_types::{EventData, FileRef, FileSource, IntentTag, SessionStatus};

fn harness(registry: WorkerRegistry) -> (Arc<StateStore>, EventBroadcaster, Arc<Manager>, Arc<DecisionGate>) {
    let broadcaster = EventBroadcaster::new(256);
    let store = Arc::new(StateStore::new(broadcaster.clone(), None));
    let classifier = Arc::new(IntentClassifier::new(Arc::new(NullOracle), 0.5));
    let brain = Arc::new(BrainAllocator::new(HashMap::new()));
    let decision_gate = Arc::new(DecisionGate::new(store.clone(), broadcaster.clone()));
    let manager = Arc::new(Manager::new(
        store.clone(),
        broadcaster.clone(),
        Arc::new(registry),
        classifier,
        brain,
        decision_gate.clone(),
        Config::default(),
    ));
    (store, broadcaster, manager, decision_gate)
}

fn pdf(name: &str) -> FileRef {
    FileRef {
        name: name.into(),
        mime: "application/pdf".into(),
        source: FileSource::Bytes { base64: "".into() },
        size_bytes: 1024,
    }
}

/// S1. Fresh full estimation: terminal state is `complete` with the right
/// intent, and the expected event shape fires along the way.
#[tokio::test]
async fn s1_fresh_full_estimation() {
    let (store, broadcaster, manager, _gate) = harness(stub_registry());
    store
        .create("s1", "Estimate this project", vec![pdf("planA.pdf")])
        .await
        .expect("create");

    let mut sub = broadcaster.subscribe("s1").await;
    let final_state = manager.run("s1").await.expect("run");

    assert_eq!(final_state.status, SessionStatus::Complete);
    assert_eq!(final_state.intent.unwrap().tag, IntentTag::FullEstimation);
    assert!(final_state.export_artifacts.is_empty());

    let mut manager_thinking = 0;
    let mut substeps_completed = 0;
    let mut workflow_started = 0;
    let mut workflow_completed = 0;
    while let Ok(Some(envelope)) = tokio::time::timeout(Duration::from_millis(50), sub.recv()).await {
        match envelope.data {
            EventData::ManagerThinking { .. } => manager_thinking += 1,
            EventData::AgentSubstep { substep, .. } if substep == "completed" => substeps_completed += 1,
            EventData::WorkflowStateChange { change_type, .. } if change_type == "workflow_started" => {
                workflow_started += 1
            }
            EventData::WorkflowStateChange { change_type, .. } if change_type == "workflow_completed" => {
                workflow_completed += 1
            }
            _ => {}
        }
    }
    assert!(manager_thinking >= 1);
    assert!(substeps_completed >= 6);
    assert_eq!(workflow_started, 1);
    assert_eq!(workflow_completed, 1);
}

/// S2. Export existing: plan is just `[exporter]`, so exactly two
/// `agent_substep` events fire (initializing + completed) and no other
/// worker is ever allocated a brain tier.
#[tokio::test]
async fn s2_export_existing_runs_only_the_exporter() {
    let (store, broadcaster, manager, _gate) = harness(stub_registry());
    store.create("s1", "Export to spreadsheet format", vec![]).await.expect("create");
    store
        .apply("s1", scopecraft_core::MutationKind::StateChange, |state| {
            state.estimate.push(scopecraft_types::EstimateLine {
                line_ref: "1".into(),
                unit_cost: 1.0,
                extended: 1.0,
                subtotals: Default::default(),
                totals: 1.0,
            });
            Ok(())
        })
        .await
        .expect("seed");

    let mut sub = broadcaster.subscribe("s1").await;
    let final_state = manager.run("s1").await.expect("run");
    assert_eq!(final_state.status, SessionStatus::Complete);
    assert_eq!(final_state.intent.unwrap().tag, IntentTag::ExportExisting);

    let mut substep_count = 0;
    let mut brain_agents = std::collections::HashSet::new();
    while let Ok(Some(envelope)) = tokio::time::timeout(Duration::from_millis(50), sub.recv()).await {
        match envelope.data {
            EventData::AgentSubstep { .. } => substep_count += 1,
            EventData::BrainAllocation { agent_name, .. } => {
                brain_agents.insert(agent_name);
            }
            _ => {}
        }
    }
    assert_eq!(substep_count, 2);
    assert_eq!(brain_agents.len(), 1);
    assert!(brain_agents.contains("exporter"));
}

/// S3. Spreadsheet-service file selection: the first dispatch surfaces a
/// `user_decision_needed` with five options; submitting one resumes the
/// worker, which downloads the file, and the manager re-classifies to
/// `full_estimation` and runs to completion. Exactly one decision event.
#[tokio::test]
async fn s3_spreadsheet_file_selection_then_full_estimation() {
    let files: Vec<SpreadsheetFile> = (1..=5)
        .map(|i| SpreadsheetFile {
            id: format!("f{i}"),
            name: format!("plan-{i}.pdf"),
            detail: None,
        })
        .collect();
    let spreadsheet_worker = SpreadsheetIntakeWorker::new(Arc::new(FakeSpreadsheetClient { files }));

    let mut builder = WorkerRegistry::builder();
    for descriptor in WORKER_DESCRIPTORS {
        if descriptor.name == "spreadsheet-intake" {
            continue;
        }
        builder = builder.register(descriptor.clone(), Arc::new(scopecraft_core::StubWorker::new(descriptor.name)));
    }
    let spreadsheet_descriptor = WORKER_DESCRIPTORS.iter().find(|d| d.name == "spreadsheet-intake").unwrap().clone();
    builder = builder.register(spreadsheet_descriptor, Arc::new(spreadsheet_worker));
    let registry = builder.build();

    let (store, broadcaster, manager, decision_gate) = harness(registry);
    store
        .create("s1", "Analyze https://my-spreadsheet-service.example/sheet/ABC", vec![])
        .await
        .expect("create");

    let mut sub = broadcaster.subscribe("s1").await;
    let handle = tokio::spawn({
        let manager = manager.clone();
        async move { manager.run("s1").await }
    });

    let mut decision_count = 0;
    let mut decision_id = String::new();
    let mut option_count = 0;
    loop {
        let envelope = tokio::time::timeout(Duration::from_secs(2), sub.recv())
            .await
            .expect("event before timeout")
            .expect("event");
        if let EventData::UserDecisionNeeded { decision_id: id, options, .. } = envelope.data {
            decision_count += 1;
            decision_id = id;
            option_count = options.len();
            break;
        }
    }
    assert_eq!(option_count, 5);

    decision_gate
        .submit("s1", &decision_id, "f3".to_string())
        .await
        .expect("submit");

    let final_state = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("manager finished in time")
        .expect("join")
        .expect("run");

    assert_eq!(final_state.status, SessionStatus::Complete);
    assert_eq!(final_state.intent.unwrap().tag, IntentTag::FullEstimation);
    assert_eq!(final_state.files.len(), 1);
    assert_eq!(final_state.files[0].name, "plan-3.pdf");

    // Drain remaining events and make sure no second decision was raised.
    while let Ok(Some(envelope)) = tokio::time::timeout(Duration::from_millis(50), sub.recv()).await {
        if matches!(envelope.data, EventData::UserDecisionNeeded { .. }) {
            decision_count += 1;
        }
    }
    assert_eq!(decision_count, 1);
}

/// S4. Skip optimization: once scope-level fields are already fresh, a
/// `quick_estimate` plan only contains `[takeoff, estimator, qa-validator]`
/// and none of those three show up as `skip=true`.
#[tokio::test]
async fn s4_quick_estimate_skips_upstream_stages() {
    let (store, _broadcaster, manager, _gate) = harness(stub_registry());
    store.create("s1", "Quick estimate please", vec![]).await.expect("create");
    store
        .apply("s1", scopecraft_core::MutationKind::StateChange, |state| {
            state.processed_files_content.insert(
                "planA.pdf".into(),
                serde_json::json!({"pages": [{"kind": "text", "content": "hello"}]}),
            );
            state.trade_mapping.push(scopecraft_types::TradeMappingEntry {
                trade: "electrical".into(),
                section_ref: "16".into(),
                confidence: 0.9,
            });
            state.scope_items.push(scopecraft_types::ScopeItem {
                trade: "electrical".into(),
                item: "panel".into(),
                description: "200A panel".into(),
                location: None,
                spec: None,
                qty: None,
            });
            Ok(())
        })
        .await
        .expect("seed");

    let final_state = manager.run("s1").await.expect("run");
    assert_eq!(final_state.intent.unwrap().tag, IntentTag::QuickEstimate);
    assert_eq!(final_state.status, SessionStatus::Complete);

    let plan_json = final_state
        .manager_notes
        .get("last_plan")
        .cloned()
        .unwrap_or(serde_json::Value::Null);
    let plan = plan_json.as_array().expect("plan array");
    let worker_names: Vec<&str> = plan
        .iter()
        .map(|s| s["worker_name"].as_str().unwrap())
        .collect();
    assert_eq!(worker_names, vec!["takeoff", "estimator", "qa-validator"]);
    assert!(plan.iter().all(|s| s["skip"] == false));
}

/// S5. A worker that would fail fatally is simply absent from a plan that
/// never requires it: `data_analysis` never calls the estimator, so the run
/// completes normally regardless of the estimator's (hypothetical) health.
#[tokio::test]
async fn s5_fatal_worker_outside_the_plan_does_not_affect_the_run() {
    let (store, _broadcaster, manager, _gate) = harness(stub_registry());
    store
        .create("s1", "just analyze and map trades", vec![pdf("planA.pdf")])
        .await
        .expect("create");

    let final_state = manager.run("s1").await.expect("run");
    assert_eq!(final_state.intent.unwrap().tag, IntentTag::DataAnalysis);
    assert_eq!(final_state.status, SessionStatus::Complete);
    assert!(final_state.estimate.is_empty());
}

/// S6. Cancellation mid-flight ends the run in `failed` with a `cancelled`
/// error kind and no further progress.
#[tokio::test]
async fn s6_cancellation_mid_flight_fails_the_run() {
    struct SlowWorker;
    #[async_trait::async_trait]
    impl Worker for SlowWorker {
        fn name(&self) -> &'static str {
            "takeoff"
        }
        async fn dispatch(
            &self,
            _snapshot: &scopecraft_types::AppState,
            _choice: &scopecraft_types::BrainChoice,
            cancel: tokio_util::sync::CancellationToken,
        ) -> scopecraft_types::WorkerResult {
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(30)) => {
                    scopecraft_types::WorkerResult::Ok { field_writes: Default::default() }
                }
                _ = cancel.cancelled() => {
                    scopecraft_types::WorkerResult::FatalError {
                        message: "cancelled".into(),
                        details: Default::default(),
                    }
                }
            }
        }
    }

    let mut builder = WorkerRegistry::builder();
    for descriptor in WORKER_DESCRIPTORS {
        if descriptor.name == "takeoff" {
            builder = builder.register(descriptor.clone(), Arc::new(SlowWorker));
        } else {
            builder = builder.register(descriptor.clone(), Arc::new(scopecraft_core::StubWorker::new(descriptor.name)));
        }
    }
    let registry = builder.build();

    let (store, broadcaster, manager, _gate) = harness(registry);
    store.create("s1", "Quick estimate please", vec![]).await.expect("create");
    store
        .apply("s1", scopecraft_core::MutationKind::StateChange, |state| {
            state.scope_items.push(scopecraft_types::ScopeItem {
                trade: "electrical".into(),
                item: "panel".into(),
                description: "200A panel".into(),
                location: None,
                spec: None,
                qty: None,
            });
            Ok(())
        })
        .await
        .expect("seed");

    let mut sub = broadcaster.subscribe("s1").await;
    let handle = tokio::spawn({
        let manager = manager.clone();
        async move { manager.run("s1").await }
    });

    tokio::time::sleep(Duration::from_millis(50)).await;
    manager.cancel("s1").await;

    let final_state = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("manager finished in time")
        .expect("join")
        .expect("run");

    assert_eq!(final_state.status, SessionStatus::Failed);
    assert_eq!(final_state.error.as_ref().unwrap().kind, "cancelled");

    let mut saw_cancelled_change = false;
    while let Ok(Some(envelope)) = tokio::time::timeout(Duration::from_millis(50), sub.recv()).await {
        if let EventData::WorkflowStateChange { change_type, .. } = envelope.data {
            if change_type == "cancelled" {
                saw_cancelled_change = true;
            }
        }
    }
    assert!(saw_cancelled_change);
}
