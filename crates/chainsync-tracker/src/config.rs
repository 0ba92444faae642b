//! Tracker configuration

use crate::{Error, Result};
use chainsync_params::NetworkType;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default block explorer serving `api/blocks/tip/height`
pub const DEFAULT_ORACLE_URL: &str = "https://mempool.space";

/// Height oracle configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OracleConfig {
    /// Explorer base URL, without trailing slash
    pub base_url: String,
    /// Transport timeout for a single height request (seconds)
    pub timeout_secs: u64,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_ORACLE_URL.to_string(),
            timeout_secs: 30,
        }
    }
}

impl OracleConfig {
    /// Request timeout
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Sync tracker configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Network the wallet runs on
    pub network: NetworkType,
    /// Embedded node data directory (contains `logs/bitcoin/<network>/lnd.log`)
    pub node_data_dir: PathBuf,
    /// Delay between node readiness probes before the first height is known (seconds)
    pub node_ready_poll_secs: u64,
    /// Delay between node status polls while catching up (seconds)
    pub status_poll_secs: u64,
    /// Re-query the height oracle every N status polls
    pub oracle_refresh_every: u32,
    /// Delay between recovery status polls (seconds)
    pub recovery_poll_secs: u64,
    /// Log file polling interval for the file tailer (milliseconds)
    pub log_poll_millis: u64,
    /// Height oracle settings
    pub oracle: OracleConfig,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            network: NetworkType::Mainnet,
            node_data_dir: PathBuf::from("."),
            node_ready_poll_secs: 3,
            status_poll_secs: 2,
            oracle_refresh_every: 15, // ~30s at the default poll interval
            recovery_poll_secs: 2,
            log_poll_millis: 500,
            oracle: OracleConfig::default(),
        }
    }
}

impl TrackerConfig {
    /// Load and validate a JSON config file. Missing keys take their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would spin or never refresh
    pub fn validate(&self) -> Result<()> {
        if self.node_ready_poll_secs == 0 || self.status_poll_secs == 0 || self.recovery_poll_secs == 0 {
            return Err(Error::Config("poll intervals must be non-zero".to_string()));
        }
        if self.oracle_refresh_every == 0 {
            return Err(Error::Config("oracle_refresh_every must be at least 1".to_string()));
        }
        if self.log_poll_millis == 0 {
            return Err(Error::Config("log_poll_millis must be non-zero".to_string()));
        }
        if self.oracle.base_url.trim().is_empty() {
            return Err(Error::Config("oracle base_url is empty".to_string()));
        }
        Ok(())
    }

    /// Node readiness probe interval
    pub fn node_ready_poll(&self) -> Duration {
        Duration::from_secs(self.node_ready_poll_secs)
    }

    /// Status poll interval
    pub fn status_poll(&self) -> Duration {
        Duration::from_secs(self.status_poll_secs)
    }

    /// Recovery poll interval
    pub fn recovery_poll(&self) -> Duration {
        Duration::from_secs(self.recovery_poll_secs)
    }

    /// Log tail poll interval
    pub fn log_poll(&self) -> Duration {
        Duration::from_millis(self.log_poll_millis)
    }
}
