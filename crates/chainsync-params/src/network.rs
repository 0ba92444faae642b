//! Network definitions

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Network type enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkType {
    /// Mainnet
    #[default]
    Mainnet,
    /// Testnet3
    Testnet,
    /// Testnet4
    Testnet4,
    /// Signet
    Signet,
    /// Regtest (local development)
    Regtest,
}

impl NetworkType {
    /// Resolve the network from a wallet configuration value.
    ///
    /// Unknown or empty values fall back to mainnet; wallet settings are
    /// user-editable and must never block sync tracking.
    pub fn from_wallet_setting(setting: &str) -> Self {
        match setting.trim().to_ascii_lowercase().as_str() {
            "testnet" | "testnet3" => Self::Testnet,
            "testnet4" => Self::Testnet4,
            _ => Self::Mainnet,
        }
    }

    /// Directory name used under `logs/bitcoin/` by the embedded node.
    pub const fn log_network_name(&self) -> &'static str {
        match self {
            Self::Mainnet => "mainnet",
            Self::Testnet => "testnet",
            Self::Testnet4 => "testnet4",
            Self::Signet => "signet",
            Self::Regtest => "regtest",
        }
    }

    /// URL path segment prepended to explorer API paths.
    ///
    /// `None` when no public explorer serves the network.
    pub const fn explorer_path_segment(&self) -> Option<&'static str> {
        match self {
            Self::Mainnet => Some(""),
            Self::Testnet => Some("testnet/"),
            Self::Testnet4 => Some("testnet4/"),
            Self::Signet => Some("signet/"),
            Self::Regtest => None,
        }
    }
}

impl fmt::Display for NetworkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.log_network_name())
    }
}

impl FromStr for NetworkType {
    type Err = Error;

    /// Strict parse, used for CLI flags and config files.
    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mainnet" | "bitcoin" => Ok(Self::Mainnet),
            "testnet" | "testnet3" => Ok(Self::Testnet),
            "testnet4" => Ok(Self::Testnet4),
            "signet" => Ok(Self::Signet),
            "regtest" => Ok(Self::Regtest),
            other => Err(Error::InvalidNetwork(other.to_string())),
        }
    }
}

/// Network configuration
#[derive(Debug, Clone)]
pub struct Network {
    /// Network type
    pub network_type: NetworkType,
    /// Human-readable name
    pub name: &'static str,
    /// Default REST port of the embedded node
    pub node_rest_port: u16,
}

impl Network {
    /// Get network by type
    pub const fn from_type(network_type: NetworkType) -> Self {
        Self {
            network_type,
            name: network_type.log_network_name(),
            node_rest_port: 8080,
        }
    }

    /// Default node REST endpoint on localhost
    pub fn default_node_url(&self) -> String {
        format!("https://127.0.0.1:{}", self.node_rest_port)
    }
}
