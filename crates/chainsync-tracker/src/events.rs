//! Tracker events and structured logging
//!
//! Every externally interesting transition is published as a [`TrackerEvent`]
//! and logged with structured fields at the same time.

use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

/// Tracker event type
#[derive(Debug, Clone, PartialEq)]
pub enum TrackerEvent {
    /// Catch-up loop started
    SyncStarted { timestamp: String },
    /// Node height or best height changed while syncing
    SyncProgress {
        current_height: u64,
        best_height: u64,
        blocks_remaining: u64,
    },
    /// Catch-up loop finished
    SyncFinished { height: u64 },
    /// Height oracle query failed
    OracleUnavailable { error: String },
    /// Best height clamped to the local height after an oracle failure
    OracleFallback { height: u64 },
    /// Recovery loop started
    RecoveryStarted,
    /// Recovery progress reported by the node
    RecoveryProgress { progress: Option<f64> },
    /// Recovery finished or was never active
    RecoveryFinished,
    /// Rescan tracking session started
    RescanStarted { start_height: u64 },
    /// Log observation could not be started
    LogObservationUnavailable { error: String },
    /// Rescan start marker seen in the log
    RescanStartMarker { height: u64 },
    /// Rescan progress marker seen in the log
    RescanProgress { current_height: u64 },
    /// Rescan address count seen in the log
    RescanAddressCount { address_count: u64 },
    /// Rescan finished marker seen in the log
    RescanFinished { address_count: u64, final_height: u64 },
    /// Rescan tracking stopped and its listener released
    RescanStopped,
    /// Express graph sync flag toggled
    ExpressGraphSync { active: bool },
    /// Whole state reset
    Reset,
}

impl TrackerEvent {
    /// Stable event name used in structured logs
    pub fn name(&self) -> &'static str {
        match self {
            Self::SyncStarted { .. } => "sync_started",
            Self::SyncProgress { .. } => "sync_progress",
            Self::SyncFinished { .. } => "sync_finished",
            Self::OracleUnavailable { .. } => "oracle_unavailable",
            Self::OracleFallback { .. } => "oracle_fallback",
            Self::RecoveryStarted => "recovery_started",
            Self::RecoveryProgress { .. } => "recovery_progress",
            Self::RecoveryFinished => "recovery_finished",
            Self::RescanStarted { .. } => "rescan_started",
            Self::LogObservationUnavailable { .. } => "log_observation_unavailable",
            Self::RescanStartMarker { .. } => "rescan_start_marker",
            Self::RescanProgress { .. } => "rescan_progress",
            Self::RescanAddressCount { .. } => "rescan_address_count",
            Self::RescanFinished { .. } => "rescan_finished",
            Self::RescanStopped => "rescan_stopped",
            Self::ExpressGraphSync { .. } => "express_graph_sync",
            Self::Reset => "reset",
        }
    }

    pub(crate) fn log(&self) {
        let event = self.name();
        match self {
            Self::SyncStarted { timestamp } => {
                info!(event, timestamp = %timestamp, "Chain sync started")
            }
            Self::SyncProgress {
                current_height,
                best_height,
                blocks_remaining,
            } => debug!(
                event,
                current_height = %current_height,
                best_height = %best_height,
                blocks_remaining = %blocks_remaining,
                "Chain sync progress"
            ),
            Self::SyncFinished { height } => {
                info!(event, height = %height, "Chain sync finished")
            }
            Self::OracleUnavailable { error } => {
                warn!(event, error = %error, "Best block height unavailable")
            }
            Self::OracleFallback { height } => {
                info!(event, height = %height, "Using local height as best height")
            }
            Self::RecoveryStarted => info!(event, "Wallet recovery started"),
            Self::RecoveryProgress { progress } => {
                debug!(event, progress = ?progress, "Wallet recovery progress")
            }
            Self::RecoveryFinished => info!(event, "Wallet recovery finished"),
            Self::RescanStarted { start_height } => {
                info!(event, start_height = %start_height, "Rescan tracking started")
            }
            Self::LogObservationUnavailable { error } => {
                warn!(event, error = %error, "Node log not observable yet")
            }
            Self::RescanStartMarker { height } => {
                info!(event, height = %height, "Rescan started by node")
            }
            Self::RescanProgress { current_height } => {
                debug!(event, current_height = %current_height, "Rescan progress")
            }
            Self::RescanAddressCount { address_count } => {
                debug!(event, address_count = %address_count, "Rescan address count")
            }
            Self::RescanFinished {
                address_count,
                final_height,
            } => info!(
                event,
                address_count = %address_count,
                final_height = %final_height,
                "Rescan finished"
            ),
            Self::RescanStopped => info!(event, "Rescan tracking stopped"),
            Self::ExpressGraphSync { active } => {
                info!(event, active = %active, "Express graph sync toggled")
            }
            Self::Reset => info!(event, "Sync state reset"),
        }
    }
}

/// Initialize logging for the tracker.
///
/// Honours `RUST_LOG`, defaulting to `info`. Returns `false` if a global
/// subscriber was already installed.
pub fn init_tracker_logging(json: bool) -> bool {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let installed = if json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .json()
            .try_init()
            .is_ok()
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .try_init()
            .is_ok()
    };

    if installed {
        info!("Tracker logging initialized");
    }
    installed
}
