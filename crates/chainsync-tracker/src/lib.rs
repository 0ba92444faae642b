//! Wallet chain sync progress tracking
//!
//! Tracks how far the embedded node is behind the network tip, wallet recovery
//! progress and address rescans observed through the node's log, and publishes
//! all of it as a single [`SyncState`] record.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![allow(clippy::result_large_err)]

pub mod cancel;
pub mod config;
pub mod error;
pub mod events;
pub mod log_source;
pub mod log_tail;
pub mod node;
pub mod oracle;
pub mod progress;
pub mod recovery;
pub mod rescan;
pub mod state;
pub mod sync;
pub mod tracker;

pub use cancel::CancelToken;
pub use chainsync_params::{Network, NetworkType};
pub use config::{OracleConfig, TrackerConfig, DEFAULT_ORACLE_URL};
pub use error::{Error, Result};
pub use events::{init_tracker_logging, TrackerEvent};
pub use log_source::{LogEventSource, LogLineBus, LogListener, LogSubscription};
pub use log_tail::{log_file_path, FileLogSource, LOG_FILE_NAME};
pub use node::{LndRestClient, NodeStatus, NodeStatusSource, RecoveryStatus, MACAROON_HEADER};
pub use oracle::{parse_height, HeightOracle, MempoolHeightOracle};
pub use progress::{
    display_fraction, display_percent, rescan_fraction, summary, sync_fraction, HeightProgress,
};
pub use recovery::RecoveryTracker;
pub use rescan::{parse_rescan_line, RescanLogEvent, RescanTracker};
pub use state::{RescanState, SyncState, SyncStateHandle};
pub use sync::SyncTracker;
pub use tracker::ChainSyncTracker;
