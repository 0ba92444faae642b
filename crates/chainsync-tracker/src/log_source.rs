//! Log event source
//!
//! Log lines from the embedded node are delivered to registered listeners.
//! A registration is an owned [`LogSubscription`]: it is released by
//! [`LogSubscription::remove`] or when dropped, so no exit path can leave a
//! callback attached after its owner has shut down.

use crate::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// Callback invoked with each log line
pub type LogListener = Arc<dyn Fn(&str) + Send + Sync>;

/// Source of node log lines
#[async_trait]
pub trait LogEventSource: Send + Sync {
    /// Register `listener` for every line delivered from now on
    fn subscribe(&self, listener: LogListener) -> LogSubscription;

    /// Begin (or continue) delivering lines from the node log for `network`
    /// under `log_dir`. Fails if the log file does not exist yet.
    async fn observe_log_file(&self, log_dir: &Path, network: &str) -> Result<()>;
}

#[derive(Default)]
struct ListenerRegistry {
    next_id: AtomicU64,
    listeners: Mutex<BTreeMap<u64, LogListener>>,
}

impl ListenerRegistry {
    fn insert(&self, listener: LogListener) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners.lock().insert(id, listener);
        id
    }

    fn remove(&self, id: u64) -> bool {
        self.listeners.lock().remove(&id).is_some()
    }

    fn snapshot(&self) -> Vec<LogListener> {
        self.listeners.lock().values().cloned().collect()
    }

    fn len(&self) -> usize {
        self.listeners.lock().len()
    }
}

/// Owned listener registration
#[must_use = "dropping a LogSubscription removes the listener"]
pub struct LogSubscription {
    id: u64,
    registry: Option<Weak<ListenerRegistry>>,
}

impl LogSubscription {
    /// Remove the listener
    pub fn remove(mut self) {
        self.release();
    }

    /// Whether the listener is still registered
    pub fn is_active(&self) -> bool {
        match self.registry.as_ref().and_then(Weak::upgrade) {
            Some(registry) => registry.listeners.lock().contains_key(&self.id),
            None => false,
        }
    }

    fn release(&mut self) {
        if let Some(registry) = self.registry.take().and_then(|weak| weak.upgrade()) {
            if registry.remove(self.id) {
                tracing::debug!(listener = self.id, "Log listener removed");
            }
        }
    }
}

impl Drop for LogSubscription {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for LogSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogSubscription")
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish()
    }
}

/// In-process line dispatcher
///
/// Lines are dispatched to a snapshot of the listeners taken before the first
/// call, so a listener may remove itself (or others) while being called.
#[derive(Clone, Default)]
pub struct LogLineBus {
    registry: Arc<ListenerRegistry>,
}

impl LogLineBus {
    /// Create an empty bus
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener
    pub fn subscribe(&self, listener: LogListener) -> LogSubscription {
        let id = self.registry.insert(listener);
        tracing::debug!(listener = id, "Log listener registered");
        LogSubscription {
            id,
            registry: Some(Arc::downgrade(&self.registry)),
        }
    }

    /// Deliver one line
    pub fn emit(&self, line: &str) {
        for listener in self.registry.snapshot() {
            listener(line);
        }
    }

    /// Deliver a chunk that may hold several lines. Blank lines are skipped.
    pub fn emit_chunk(&self, chunk: &str) {
        for line in chunk.lines() {
            let line = line.trim_end_matches('\r');
            if !line.is_empty() {
                self.emit(line);
            }
        }
    }

    /// Number of registered listeners
    pub fn listener_count(&self) -> usize {
        self.registry.len()
    }
}

#[async_trait]
impl LogEventSource for LogLineBus {
    fn subscribe(&self, listener: LogListener) -> LogSubscription {
        LogLineBus::subscribe(self, listener)
    }

    /// Lines are injected with [`LogLineBus::emit`]; there is no file to open.
    async fn observe_log_file(&self, _log_dir: &Path, _network: &str) -> Result<()> {
        Ok(())
    }
}
