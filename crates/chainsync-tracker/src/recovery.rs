//! Wallet recovery polling

use crate::cancel::CancelToken;
use crate::config::TrackerConfig;
use crate::events::TrackerEvent;
use crate::node::NodeStatusSource;
use crate::state::{StateWriter, SyncStateHandle};
use crate::{Error, Result};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Drives `is_recovering` and `recovery_progress`
#[derive(Clone)]
pub struct RecoveryTracker {
    inner: Arc<RecoveryInner>,
}

struct RecoveryInner {
    state: SyncStateHandle,
    node: Arc<dyn NodeStatusSource>,
    poll: Duration,
    cancel: Mutex<CancelToken>,
}

impl RecoveryTracker {
    /// Create a recovery tracker
    pub fn new(
        state: SyncStateHandle,
        node: Arc<dyn NodeStatusSource>,
        config: &TrackerConfig,
    ) -> Self {
        Self {
            inner: Arc::new(RecoveryInner {
                state,
                node,
                poll: config.recovery_poll(),
                cancel: Mutex::new(CancelToken::new()),
            }),
        }
    }

    /// Probe the node once and spawn the polling loop if a recovery is running.
    ///
    /// Returns the loop's task handle, or `None` when there is nothing to track.
    /// Must be called from within a tokio runtime.
    pub async fn check_recovery_status(&self) -> Result<Option<JoinHandle<Result<()>>>> {
        let status = self.inner.node.recovery_status().await?;
        if !status.recovery_mode || status.recovery_finished {
            debug!(
                recovery_mode = status.recovery_mode,
                recovery_finished = status.recovery_finished,
                "No wallet recovery in progress"
            );
            return Ok(None);
        }

        let prepared = self.inner.prepare();
        let inner = Arc::clone(&self.inner);
        Ok(Some(tokio::spawn(async move { inner.drive(prepared).await })))
    }

    /// Poll recovery status until the node reports it finished.
    ///
    /// Any loop already running is cancelled first. Returns `Ok(())` when
    /// recovery ended and when the loop was stopped.
    pub async fn start_recovering(&self) -> Result<()> {
        self.inner.drive(self.inner.prepare()).await
    }

    /// Clear the recovery flags and stop the loop
    pub fn stop_recovering(&self) {
        self.cancel();
        let was_recovering = self.inner.state.is_recovering();
        // A fresh writer belongs to the current generation
        if self.inner.state.writer().clear_recovery().is_ok() && was_recovering {
            self.inner.state.publish(TrackerEvent::RecoveryFinished);
        }
    }

    /// Cancel the running loop without touching state
    pub fn cancel(&self) {
        self.inner.cancel.lock().cancel();
    }
}

impl RecoveryInner {
    fn take_fresh_token(&self) -> CancelToken {
        let token = CancelToken::new();
        let previous = std::mem::replace(&mut *self.cancel.lock(), token.clone());
        previous.cancel();
        token
    }

    /// Claim the loop slot and mark the state as recovering
    fn prepare(&self) -> Result<(CancelToken, StateWriter)> {
        let cancel = self.take_fresh_token();
        let writer = self.state.writer();
        writer.set_recovering(true)?;
        self.state.publish(TrackerEvent::RecoveryStarted);
        Ok((cancel, writer))
    }

    async fn drive(&self, prepared: Result<(CancelToken, StateWriter)>) -> Result<()> {
        let result = match prepared {
            Ok((cancel, writer)) => self.run(&cancel, &writer).await,
            Err(e) => Err(e),
        };
        match result {
            Err(Error::Cancelled) => {
                debug!("Recovery loop stopped");
                Ok(())
            }
            other => other,
        }
    }

    async fn run(&self, cancel: &CancelToken, writer: &StateWriter) -> Result<()> {
        while self.state.is_recovering() {
            cancel.sleep(self.poll).await?;

            let status = match cancel.run(self.node.recovery_status()).await? {
                Ok(status) => status,
                Err(e) => {
                    warn!(error = %e, "Recovery status poll failed, retrying");
                    continue;
                }
            };

            if writer.apply_recovery_status(&status)? {
                self.state.publish(TrackerEvent::RecoveryProgress {
                    progress: self.state.snapshot().recovery_progress,
                });
            } else {
                self.state.publish(TrackerEvent::RecoveryFinished);
            }
        }
        Ok(())
    }
}
