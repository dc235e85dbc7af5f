//! Client configuration, loaded from a JSON file.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use murk_settle::EngineConfig;

fn default_fill_interval_secs() -> u64 {
    25
}

fn default_relay_attempts() -> u32 {
    3
}

/// Endpoints and tunables for one client instance.
#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    /// Directory of the sled ledger database.
    pub ledger_path: PathBuf,
    /// Base URL of the chain gateway (leaf reads, deposits, receipts).
    pub chain_url: String,
    /// URL of the relay endpoint.
    pub relay_url: String,
    /// URL of the fill endpoint.
    pub fill_url: String,
    /// URL of the proving service.
    pub prover_url: String,
    /// Seconds between background fill attempts per open order.
    #[serde(default = "default_fill_interval_secs")]
    pub fill_interval_secs: u64,
    /// Relay submission attempts before a transient rejection is an error.
    #[serde(default = "default_relay_attempts")]
    pub relay_attempts: u32,
}

impl Config {
    /// Read and parse the config file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))
    }

    /// Engine tunables derived from this config.
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            fill_interval: Duration::from_secs(self.fill_interval_secs),
            relay_attempts: self.relay_attempts,
            ..EngineConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_config() {
        let raw = r#"{
            "ledger_path": "/tmp/murk.db",
            "chain_url": "http://localhost:8545",
            "relay_url": "http://localhost:3000/api/relay",
            "fill_url": "http://localhost:3000/api/fill",
            "prover_url": "http://localhost:9000/prove"
        }"#;
        let config: Config = serde_json::from_str(raw).unwrap();
        assert_eq!(config.fill_interval_secs, 25);
        assert_eq!(config.relay_attempts, 3);
        assert_eq!(config.engine_config().fill_interval.as_secs(), 25);
    }
}
