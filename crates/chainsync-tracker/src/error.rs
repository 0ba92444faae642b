//! Error types for sync tracking

use std::path::PathBuf;

/// Result type
pub type Result<T> = std::result::Result<T, Error>;

/// Error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Network error
    #[error("Network error: {0}")]
    Network(String),

    /// Height oracle replied with a non-200 status
    #[error("Height oracle returned HTTP {0}")]
    OracleStatus(u16),

    /// Node replied with a non-200 status
    #[error("Node returned HTTP {0}")]
    NodeStatus(u16),

    /// Node error
    #[error("Node error: {0}")]
    Node(String),

    /// Parse error
    #[error("Parse error: {0}")]
    Parse(String),

    /// Log file does not exist (yet)
    #[error("Log file not found: {}", .0.display())]
    LogFileMissing(PathBuf),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Operation cancelled
    #[error("Cancelled")]
    Cancelled,

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<chainsync_params::Error> for Error {
    fn from(e: chainsync_params::Error) -> Self {
        Error::Config(format!("{}", e))
    }
}
