//! Intent classification (C2), route planning (C3), brain allocation (C4),
//! decision gating (C7), and the manager loop (C8) that drives them — the
//! autonomous controller described in spec §4.7, built on top of the state
//! store, broadcaster, and worker registry in `scopecraft-core`.

mod brain;
mod classifier;
mod decision_gate;
mod manager;
mod planner;
mod spreadsheet;

pub use brain::BrainAllocator;
pub use classifier::{IntentClassifier, IntentOracle, NullOracle, OracleVerdict, PopulatedFlags};
pub use decision_gate::{DecisionGate, DecisionOutcome};
pub use manager::Manager;
pub use planner::{PlanStep, RoutePlanner};
pub use spreadsheet::{SpreadsheetClient, SpreadsheetFile, SpreadsheetIntakeWorker};

#[cfg(any(test, feature = "test-support"))]
pub use spreadsheet::FakeSpreadsheetClient;
