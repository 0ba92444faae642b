//! Chain catch-up loop
//!
//! [`SyncTracker`] polls the node until its chain height reaches the best height
//! reported by the [`HeightOracle`], refreshing the oracle every few iterations.
//! Every suspension point is raced against a [`CancelToken`], so a reset or a
//! newer loop stops the running one at its next await.

use crate::cancel::CancelToken;
use crate::config::TrackerConfig;
use crate::events::TrackerEvent;
use crate::node::{NodeStatus, NodeStatusSource};
use crate::oracle::HeightOracle;
use crate::state::{StateWriter, SyncState, SyncStateHandle};
use crate::{Error, Result};
use chainsync_params::NetworkType;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Drives `is_syncing` and the height fields of the shared state
#[derive(Clone)]
pub struct SyncTracker {
    inner: Arc<SyncInner>,
}

struct SyncInner {
    state: SyncStateHandle,
    node: Arc<dyn NodeStatusSource>,
    oracle: Arc<dyn HeightOracle>,
    network: NetworkType,
    node_ready_poll: Duration,
    status_poll: Duration,
    oracle_refresh_every: u32,
    cancel: Mutex<CancelToken>,
}

impl SyncTracker {
    /// Create a sync tracker
    pub fn new(
        state: SyncStateHandle,
        node: Arc<dyn NodeStatusSource>,
        oracle: Arc<dyn HeightOracle>,
        config: &TrackerConfig,
    ) -> Self {
        Self {
            inner: Arc::new(SyncInner {
                state,
                node,
                oracle,
                network: config.network,
                node_ready_poll: config.node_ready_poll(),
                status_poll: config.status_poll(),
                oracle_refresh_every: config.oracle_refresh_every.max(1),
                cancel: Mutex::new(CancelToken::new()),
            }),
        }
    }

    /// Query the height oracle once and store the result.
    ///
    /// On failure `error` is set and the error is returned; the caller decides
    /// whether to fall back to the local height.
    pub async fn get_best_block_height(&self) -> Result<u64> {
        let writer = self.inner.state.writer();
        self.inner.refresh_best_height(&writer).await
    }

    /// Run the catch-up loop until the node is synced.
    ///
    /// Any loop already running is cancelled first. Returns `Ok(())` both when
    /// the node caught up and when the loop was cancelled.
    pub async fn start_syncing(&self) -> Result<()> {
        self.inner.drive(self.inner.prepare()).await
    }

    /// Run the catch-up loop on a background task.
    ///
    /// The loop is registered before this returns, so a `cancel` or a state
    /// reset issued right after stops it even if the task has not been polled.
    pub fn spawn_syncing(&self) -> JoinHandle<Result<()>> {
        let prepared = self.inner.prepare();
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move { inner.drive(prepared).await })
    }

    /// Cancel the running loop, if any
    pub fn cancel(&self) {
        self.inner.cancel.lock().cancel();
    }
}

impl SyncInner {
    fn take_fresh_token(&self) -> CancelToken {
        let token = CancelToken::new();
        let previous = std::mem::replace(&mut *self.cancel.lock(), token.clone());
        previous.cancel();
        token
    }

    /// Claim the loop slot and mark the state as syncing
    fn prepare(&self) -> Result<(CancelToken, StateWriter)> {
        let cancel = self.take_fresh_token();
        let writer = self.state.writer();
        writer.set_syncing(true)?;
        self.state.publish(TrackerEvent::SyncStarted {
            timestamp: chrono::Utc::now().to_rfc3339(),
        });
        Ok((cancel, writer))
    }

    async fn drive(&self, prepared: Result<(CancelToken, StateWriter)>) -> Result<()> {
        let result = match prepared {
            Ok((cancel, writer)) => self.run(&cancel, &writer).await,
            Err(e) => Err(e),
        };
        match result {
            Err(Error::Cancelled) => {
                debug!("Sync loop cancelled");
                Ok(())
            }
            other => other,
        }
    }

    async fn refresh_best_height(&self, writer: &StateWriter) -> Result<u64> {
        match self.oracle.fetch_height(self.network).await {
            Ok(height) => {
                writer.apply_best_height(height)?;
                debug!(height = %height, network = %self.network, "Best block height updated");
                Ok(height)
            }
            Err(e) => {
                writer.set_error(true)?;
                self.state.publish(TrackerEvent::OracleUnavailable {
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    /// Refresh the best height, clamping to the local height when the oracle fails.
    ///
    /// Only cancellation is returned as an error.
    async fn refresh_or_fall_back(&self, cancel: &CancelToken, writer: &StateWriter) -> Result<()> {
        match cancel.run(self.refresh_best_height(writer)).await? {
            Ok(_) => Ok(()),
            Err(Error::Cancelled) => Err(Error::Cancelled),
            Err(_) => self.fall_back(writer),
        }
    }

    fn fall_back(&self, writer: &StateWriter) -> Result<()> {
        if let Some(height) = writer.apply_oracle_fallback()? {
            self.state.publish(TrackerEvent::OracleFallback { height });
        }
        Ok(())
    }

    async fn run(&self, cancel: &CancelToken, writer: &StateWriter) -> Result<()> {
        let oracle_ok = match cancel.run(self.refresh_best_height(writer)).await? {
            Ok(_) => true,
            Err(Error::Cancelled) => return Err(Error::Cancelled),
            Err(_) => false,
        };

        let status = self.wait_for_node(cancel).await?;
        let mut snapshot = self.apply_status(writer, &status)?;

        // The fallback needs a local height to compare against
        if !oracle_ok {
            self.fall_back(writer)?;
            snapshot = self.state.snapshot();
        }

        let mut iteration: u32 = 0;
        while snapshot.is_syncing && snapshot.num_blocks_until_synced > 0 {
            cancel.sleep(self.status_poll).await?;
            iteration = iteration.wrapping_add(1);

            match cancel.run(self.node.node_status()).await? {
                Ok(status) => {
                    self.apply_status(writer, &status)?;
                }
                Err(e) => warn!(error = %e, "Node status poll failed, retrying"),
            }

            if iteration % self.oracle_refresh_every == 0 {
                self.refresh_or_fall_back(cancel, writer).await?;
            }

            snapshot = self.state.snapshot();
        }

        cancel.check()?;
        writer.set_syncing(false)?;
        self.state.publish(TrackerEvent::SyncFinished {
            height: snapshot.current_block_height,
        });
        Ok(())
    }

    /// Poll until the node reports a non-zero chain height
    async fn wait_for_node(&self, cancel: &CancelToken) -> Result<NodeStatus> {
        loop {
            match cancel.run(self.node.node_status()).await? {
                Ok(status) if status.block_height > 0 => return Ok(status),
                Ok(_) => debug!("Node has no chain height yet"),
                Err(e) => warn!(error = %e, "Node not ready, retrying"),
            }
            cancel.sleep(self.node_ready_poll).await?;
        }
    }

    fn apply_status(&self, writer: &StateWriter, status: &NodeStatus) -> Result<SyncState> {
        let snapshot = writer.apply_node_status(status)?;
        self.state.publish(TrackerEvent::SyncProgress {
            current_height: snapshot.current_block_height,
            best_height: snapshot.best_block_height,
            blocks_remaining: snapshot.num_blocks_until_synced,
        });
        Ok(snapshot)
    }
}
