use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use scopecraft_core::{stub_registry, Config, EventBroadcaster, JsonlEventSink, StateStore};
use scopecraft_orchestrator::{BrainAllocator, DecisionGate, IntentClassifier, Manager, NullOracle};
use scopecraft_server::{serve, AppState};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "scopecraft-engine")]
#[command(about = "Headless construction-document analysis orchestrator")]
struct Cli {
    #[arg(long, default_value = "scopecraft.yaml")]
    config: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Runs the HTTP/SSE binding (spec §6.2) until Ctrl-C.
    Serve {
        #[arg(long, alias = "host", default_value = "127.0.0.1")]
        hostname: String,
        #[arg(long, default_value_t = 4000)]
        port: u16,
        #[arg(long)]
        state_dir: Option<PathBuf>,
    },
    /// Runs a single session to completion against stub workers and prints
    /// the final state — useful for exercising the manager loop without a
    /// client.
    Run {
        query: String,
        #[arg(long)]
        state_dir: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut config = Config::load(&cli.config).context("loading config")?;

    match cli.command {
        Command::Serve { hostname, port, state_dir } => {
            if let Some(dir) = state_dir {
                config.state_dir = Some(dir);
            }
            let _log_guard = scopecraft_observability::init_tracing(config.log_dir.as_deref())?;
            let addr: SocketAddr = format!("{hostname}:{port}").parse().context("invalid hostname or port")?;
            let (store, broadcaster, manager, decision_gate) = build_manager(config)?;
            info!(%addr, "starting scopecraft-engine");
            serve(
                addr,
                AppState {
                    store,
                    broadcaster,
                    manager,
                    decision_gate,
                },
            )
            .await?;
        }
        Command::Run { query, state_dir } => {
            if let Some(dir) = state_dir {
                config.state_dir = Some(dir);
            }
            let _log_guard = scopecraft_observability::init_tracing(config.log_dir.as_deref())?;
            let (store, _broadcaster, manager, _decision_gate) = build_manager(config)?;
            let session_id = uuid::Uuid::new_v4().to_string();
            store.create(session_id.clone(), query, Vec::new()).await?;
            let final_state = manager.run(&session_id).await?;
            println!("{}", serde_json::to_string_pretty(&final_state)?);
        }
    }

    Ok(())
}

/// Wires the manager loop (C8) and everything it drives (C1–C7) against the
/// demo `stub_registry()` — the real worker implementations are out of
/// scope for this repository (spec §1). The returned `DecisionGate` is the
/// same instance the manager dispatches through, so a caller submitting a
/// decision against it actually resumes the in-flight run. When
/// `config.state_dir` is set, every published event is also mirrored to
/// `<state_dir>/events.jsonl` via a `JsonlEventSink` (spec §6.5).
fn build_manager(
    config: Config,
) -> anyhow::Result<(Arc<StateStore>, EventBroadcaster, Arc<Manager>, Arc<DecisionGate>)> {
    let mut broadcaster = EventBroadcaster::new(config.broadcaster_subscriber_buffer);
    if let Some(dir) = &config.state_dir {
        let sink = JsonlEventSink::new(dir).context("opening event sink")?;
        broadcaster = broadcaster.with_sink(Arc::new(sink));
    }
    let store = Arc::new(StateStore::new(broadcaster.clone(), config.state_dir.clone()));
    let classifier = Arc::new(IntentClassifier::new(Arc::new(NullOracle), config.intent_confidence_floor));
    let brain = Arc::new(BrainAllocator::new(HashMap::new()));
    let decision_gate = Arc::new(DecisionGate::new(store.clone(), broadcaster.clone()));
    let manager = Arc::new(Manager::new(
        store.clone(),
        broadcaster.clone(),
        Arc::new(stub_registry()),
        classifier,
        brain,
        decision_gate.clone(),
        config,
    ));
    Ok((store, broadcaster, manager, decision_gate))
}
