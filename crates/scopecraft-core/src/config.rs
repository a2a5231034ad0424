use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use scopecraft_types::BrainTier;

/// The orchestrator's enumerated configuration surface (spec §6.6), plus the
/// `qa_block_on_error` flag spec §9's open questions defers to config, and
/// the state/log directories needed by the persistence-replica sink (§6.5).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub worker_dispatch_timeout_secs: u64,
    pub decision_timeout_secs: u64,
    pub run_timeout_secs: u64,
    pub retry_budget: u32,
    pub broadcaster_subscriber_buffer: usize,
    pub parallel_dispatch_enabled: bool,
    pub brain_tier_overrides: HashMap<String, BrainTier>,
    pub intent_confidence_floor: f64,
    pub qa_block_on_error: bool,
    pub state_dir: Option<PathBuf>,
    pub log_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            worker_dispatch_timeout_secs: 120,
            decision_timeout_secs: 300,
            run_timeout_secs: 1800,
            retry_budget: 2,
            broadcaster_subscriber_buffer: 256,
            parallel_dispatch_enabled: false,
            brain_tier_overrides: HashMap::new(),
            intent_confidence_floor: 0.5,
            qa_block_on_error: true,
            state_dir: None,
            log_dir: None,
        }
    }
}

impl Config {
    /// Loads a YAML config file if present, then applies `SCOPECRAFT_*`
    /// environment overrides for the scalar options. A missing file is not
    /// an error: defaults apply.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let mut config = match std::fs::read_to_string(path.as_ref()) {
            Ok(raw) => serde_yaml::from_str(&raw)?,
            Err(_) => Config::default(),
        };
        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Some(v) = env_u64("SCOPECRAFT_WORKER_DISPATCH_TIMEOUT") {
            self.worker_dispatch_timeout_secs = v;
        }
        if let Some(v) = env_u64("SCOPECRAFT_DECISION_TIMEOUT") {
            self.decision_timeout_secs = v;
        }
        if let Some(v) = env_u64("SCOPECRAFT_RUN_TIMEOUT") {
            self.run_timeout_secs = v;
        }
        if let Some(v) = env_u64("SCOPECRAFT_RETRY_BUDGET") {
            self.retry_budget = v as u32;
        }
        if let Ok(dir) = std::env::var("SCOPECRAFT_STATE_DIR") {
            if !dir.trim().is_empty() {
                self.state_dir = Some(PathBuf::from(dir));
            }
        }
        if let Ok(dir) = std::env::var("SCOPECRAFT_LOG_DIR") {
            if !dir.trim().is_empty() {
                self.log_dir = Some(PathBuf::from(dir));
            }
        }
    }
}

fn env_u64(key: &str) -> Option<u64> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_table() {
        let config = Config::default();
        assert_eq!(config.worker_dispatch_timeout_secs, 120);
        assert_eq!(config.decision_timeout_secs, 300);
        assert_eq!(config.run_timeout_secs, 1800);
        assert_eq!(config.retry_budget, 2);
        assert_eq!(config.broadcaster_subscriber_buffer, 256);
        assert!(!config.parallel_dispatch_enabled);
        assert_eq!(config.intent_confidence_floor, 0.5);
        assert!(config.qa_block_on_error);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let config = Config::load("/nonexistent/scopecraft.yaml").expect("load");
        assert_eq!(config.retry_budget, Config::default().retry_budget);
    }
}
