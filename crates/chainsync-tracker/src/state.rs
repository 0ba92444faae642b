//! Shared sync state
//!
//! [`SyncStateHandle`] owns the single [`SyncState`] record. Trackers mutate it
//! through the crate-private methods below; every mutation is published on a
//! `watch` channel so observers re-render without polling, and transitions are
//! published as [`TrackerEvent`]s on a `broadcast` channel.

use crate::events::TrackerEvent;
use crate::node::{NodeStatus, RecoveryStatus};
use crate::progress::HeightProgress;
use crate::{Error, Result};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};

const EVENT_CAPACITY: usize = 256;

/// Rescan sub-record
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RescanState {
    /// A rescan tracking session is active
    pub is_rescanning: bool,
    /// First block height of the rescan
    pub rescan_start_height: Option<u64>,
    /// Last block height the rescan reached.
    ///
    /// Expected to be at least `rescan_start_height`, but log ordering is not trusted.
    pub rescan_current_height: Option<u64>,
    /// Number of addresses the rescan covers
    pub rescan_address_count: Option<u64>,
    /// Transactions found by the rescan
    pub rescan_txns_found: u64,
    /// The node log is being delivered to the tracker
    pub is_log_observation_active: bool,
}

/// Externally observable sync snapshot
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SyncState {
    /// Catch-up loop is active
    pub is_syncing: bool,
    /// Last known local height
    pub current_block_height: u64,
    /// Last known network tip height
    pub best_block_height: u64,
    /// `current - best`, negative while behind
    pub current_progress: i64,
    /// `max(0, best - current)`
    pub num_blocks_until_synced: u64,
    /// Last height oracle query failed
    pub error: bool,
    /// Wallet recovery is running
    pub is_recovering: bool,
    /// Recovery progress in `[0, 1]`; `None` while recovering without a number yet
    pub recovery_progress: Option<f64>,
    /// Node is in express graph sync
    pub is_in_express_graph_sync: bool,
    /// Rescan sub-record
    pub rescan: RescanState,
}

impl SyncState {
    fn recompute(&mut self) -> HeightProgress {
        let progress = HeightProgress::compute(self.current_block_height, self.best_block_height);
        self.current_progress = progress.current_progress;
        self.num_blocks_until_synced = progress.num_blocks_until_synced;
        progress
    }
}

/// Cheap, cloneable handle to the shared state
#[derive(Clone)]
pub struct SyncStateHandle {
    inner: Arc<StateShared>,
}

struct StateShared {
    state: watch::Sender<SyncState>,
    events: broadcast::Sender<TrackerEvent>,
    // Bumped by `reset`; writers from an older generation are refused
    generation: Mutex<u64>,
}

impl SyncStateHandle {
    /// Create state in its initial (idle) values
    pub fn new() -> Self {
        let (state, _) = watch::channel(SyncState::default());
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(StateShared {
                state,
                events,
                generation: Mutex::new(0),
            }),
        }
    }

    /// Current snapshot
    pub fn snapshot(&self) -> SyncState {
        self.inner.state.borrow().clone()
    }

    /// Receive every state change
    pub fn subscribe(&self) -> watch::Receiver<SyncState> {
        self.inner.state.subscribe()
    }

    /// Receive tracker events published from now on
    pub fn subscribe_events(&self) -> broadcast::Receiver<TrackerEvent> {
        self.inner.events.subscribe()
    }

    /// Wait until express graph sync is no longer active
    pub async fn wait_for_express_graph_sync_end(&self) -> Result<()> {
        let mut rx = self.inner.state.subscribe();
        rx.wait_for(|s| !s.is_in_express_graph_sync)
            .await
            .map(|_| ())
            .map_err(|_| Error::Cancelled)
    }

    pub(crate) fn publish(&self, event: TrackerEvent) {
        event.log();
        // No subscribers is fine
        let _ = self.inner.events.send(event);
    }

    fn modify<R>(&self, f: impl FnOnce(&mut SyncState) -> R) -> R {
        let mut out = None;
        self.inner.state.send_modify(|s| out = Some(f(s)));
        out.unwrap_or_else(|| unreachable!("send_modify runs the closure"))
    }

    /// Writer bound to the current generation, for polling loops
    pub(crate) fn writer(&self) -> StateWriter {
        StateWriter {
            handle: self.clone(),
            generation: *self.inner.generation.lock(),
        }
    }

    pub(crate) fn is_recovering(&self) -> bool {
        self.inner.state.borrow().is_recovering
    }

    // Express graph sync

    pub(crate) fn set_express_graph_sync(&self, active: bool) {
        self.modify(|s| s.is_in_express_graph_sync = active);
    }

    // Rescan fields

    pub(crate) fn begin_rescan(&self, start_height: u64) {
        self.modify(|s| {
            s.rescan = RescanState {
                is_rescanning: true,
                rescan_start_height: Some(start_height),
                rescan_current_height: Some(start_height),
                rescan_address_count: None,
                rescan_txns_found: 0,
                is_log_observation_active: s.rescan.is_log_observation_active,
            };
        });
    }

    pub(crate) fn set_log_observation(&self, active: bool) {
        self.modify(|s| s.rescan.is_log_observation_active = active);
    }

    pub(crate) fn set_rescan_start(&self, height: u64) {
        self.modify(|s| {
            s.rescan.rescan_start_height = Some(height);
            s.rescan.rescan_current_height = Some(height);
        });
    }

    pub(crate) fn set_rescan_current(&self, height: u64) {
        self.modify(|s| s.rescan.rescan_current_height = Some(height));
    }

    pub(crate) fn set_rescan_address_count(&self, count: u64) {
        self.modify(|s| s.rescan.rescan_address_count = Some(count));
    }

    pub(crate) fn clear_rescan(&self) {
        self.modify(|s| s.rescan = RescanState::default());
    }

    /// Back to initial values. Writers created before this call are refused.
    pub(crate) fn reset(&self) {
        let mut generation = self.inner.generation.lock();
        *generation += 1;
        self.inner.state.send_replace(SyncState::default());
    }
}

impl Default for SyncStateHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Generation-checked writer for the sync and recovery fields.
///
/// Every write fails with [`Error::Cancelled`] once the state has been reset
/// after the writer was created.
#[derive(Clone)]
pub(crate) struct StateWriter {
    handle: SyncStateHandle,
    generation: u64,
}

impl StateWriter {
    fn modify<R>(&self, f: impl FnOnce(&mut SyncState) -> R) -> Result<R> {
        let generation = self.handle.inner.generation.lock();
        if *generation != self.generation {
            return Err(Error::Cancelled);
        }
        Ok(self.handle.modify(f))
    }

    pub(crate) fn set_syncing(&self, syncing: bool) -> Result<()> {
        self.modify(|s| s.is_syncing = syncing)
    }

    pub(crate) fn set_error(&self, error: bool) -> Result<()> {
        self.modify(|s| s.error = error)
    }

    /// Store a fresh oracle height, clearing the error flag.
    ///
    /// Progress is only recomputed once a local height is known.
    pub(crate) fn apply_best_height(&self, best_height: u64) -> Result<SyncState> {
        self.modify(|s| {
            s.best_block_height = best_height;
            s.error = false;
            if s.current_block_height > 0 {
                s.recompute();
            }
            s.clone()
        })
    }

    /// Store a node status reply; clears `is_syncing` once synced or caught up.
    pub(crate) fn apply_node_status(&self, status: &NodeStatus) -> Result<SyncState> {
        self.modify(|s| {
            s.current_block_height = status.block_height;
            let progress = s.recompute();
            if status.synced_to_chain || progress.is_caught_up() {
                s.is_syncing = false;
            }
            s.clone()
        })
    }

    /// Clamp a stale best height up to the local height.
    ///
    /// Returns the new best height when the clamp applied.
    pub(crate) fn apply_oracle_fallback(&self) -> Result<Option<u64>> {
        self.modify(|s| {
            if s.current_block_height >= s.best_block_height {
                s.best_block_height = s.current_block_height;
                s.recompute();
                Some(s.best_block_height)
            } else {
                None
            }
        })
    }

    pub(crate) fn set_recovering(&self, recovering: bool) -> Result<()> {
        self.modify(|s| s.is_recovering = recovering)
    }

    /// Apply a recovery status reply. Returns `true` while recovery continues.
    pub(crate) fn apply_recovery_status(&self, status: &RecoveryStatus) -> Result<bool> {
        self.modify(|s| {
            if status.recovery_mode {
                if let Some(progress) = status.progress {
                    s.recovery_progress = Some(progress);
                }
                if status.recovery_finished {
                    s.is_recovering = false;
                    s.recovery_progress = None;
                }
            } else {
                s.is_recovering = false;
                s.recovery_progress = None;
            }
            s.is_recovering
        })
    }

    pub(crate) fn clear_recovery(&self) -> Result<()> {
        self.modify(|s| {
            s.is_recovering = false;
            s.recovery_progress = None;
        })
    }
}
