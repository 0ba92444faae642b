//! Chain sync tracker facade
//!
//! [`ChainSyncTracker`] owns the shared [`SyncState`] and the three trackers
//! that write to it. UI code reads the state through [`ChainSyncTracker::state`]
//! or a [`watch`] subscription and drives the trackers through the methods
//! below.

use crate::config::TrackerConfig;
use crate::events::TrackerEvent;
use crate::log_source::LogEventSource;
use crate::node::NodeStatusSource;
use crate::oracle::HeightOracle;
use crate::recovery::RecoveryTracker;
use crate::rescan::RescanTracker;
use crate::state::{SyncState, SyncStateHandle};
use crate::sync::SyncTracker;
use crate::Result;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::info;

/// Process-wide sync progress tracker
#[derive(Clone)]
pub struct ChainSyncTracker {
    config: Arc<TrackerConfig>,
    state: SyncStateHandle,
    sync: SyncTracker,
    recovery: RecoveryTracker,
    rescan: RescanTracker,
}

impl ChainSyncTracker {
    /// Create a tracker over the given collaborators.
    ///
    /// The rescan tracker observes the node log under `config.node_data_dir`.
    pub fn new(
        config: TrackerConfig,
        node: Arc<dyn NodeStatusSource>,
        oracle: Arc<dyn HeightOracle>,
        logs: Arc<dyn LogEventSource>,
    ) -> Self {
        let state = SyncStateHandle::new();
        let sync = SyncTracker::new(state.clone(), Arc::clone(&node), oracle, &config);
        let recovery = RecoveryTracker::new(state.clone(), node, &config);
        let rescan = RescanTracker::new(
            state.clone(),
            logs,
            config.node_data_dir.clone(),
            config.network,
        );

        info!(
            network = %config.network,
            data_dir = %config.node_data_dir.display(),
            "Chain sync tracker created"
        );

        Self {
            config: Arc::new(config),
            state,
            sync,
            recovery,
            rescan,
        }
    }

    /// Tracker configuration
    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// Current state snapshot
    pub fn state(&self) -> SyncState {
        self.state.snapshot()
    }

    /// Receive every state change
    pub fn subscribe(&self) -> watch::Receiver<SyncState> {
        self.state.subscribe()
    }

    /// Receive tracker events
    pub fn subscribe_events(&self) -> broadcast::Receiver<TrackerEvent> {
        self.state.subscribe_events()
    }

    /// Rescan tracker, e.g. to feed lines by hand
    pub fn rescan(&self) -> &RescanTracker {
        &self.rescan
    }

    /// Run the catch-up loop to completion (see [`SyncTracker::start_syncing`])
    pub async fn start_syncing(&self) -> Result<()> {
        self.sync.start_syncing().await
    }

    /// Run the catch-up loop on a background task
    pub fn spawn_syncing(&self) -> JoinHandle<Result<()>> {
        self.sync.spawn_syncing()
    }

    /// Query the height oracle once
    pub async fn get_best_block_height(&self) -> Result<u64> {
        self.sync.get_best_block_height().await
    }

    /// Probe recovery status and start polling if a recovery is running
    pub async fn check_recovery_status(&self) -> Result<Option<JoinHandle<Result<()>>>> {
        self.recovery.check_recovery_status().await
    }

    /// Stop recovery polling and clear the recovery fields
    pub fn stop_recovering(&self) {
        self.recovery.stop_recovering();
    }

    /// Start a rescan tracking session at `start_height`
    pub async fn start_rescan_tracking(&self, start_height: u64) {
        self.rescan.start_rescan_tracking(start_height).await;
    }

    /// Stop rescan tracking. Safe when idle.
    pub fn stop_rescan_tracking(&self) {
        self.rescan.stop_rescan_tracking();
    }

    /// Set the express graph sync flag
    pub fn set_express_graph_sync_status(&self, active: bool) {
        self.state.set_express_graph_sync(active);
        self.state.publish(TrackerEvent::ExpressGraphSync { active });
    }

    /// Resolve once express graph sync is no longer active
    pub async fn wait_for_express_graph_sync_end(&self) -> Result<()> {
        self.state.wait_for_express_graph_sync_end().await
    }

    /// Stop every loop, release the rescan listener and return to initial values.
    ///
    /// Loops still unwinding after this returns cannot write to the state.
    pub fn reset(&self) {
        self.sync.cancel();
        self.recovery.cancel();
        self.rescan.stop_rescan_tracking();
        self.state.reset();
        self.state.publish(TrackerEvent::Reset);
    }
}
