//! Bitcoin network parameters for the chain sync tracker
//!
//! Maps wallet network settings onto the names used by the embedded node's
//! log directory and by the block explorer height oracle.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod network;

pub use network::{Network, NetworkType};

/// Error types for parameter operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid network specified
    #[error("Invalid network: {0}")]
    InvalidNetwork(String),
}

/// Result type for parameter operations
pub type Result<T> = std::result::Result<T, Error>;
