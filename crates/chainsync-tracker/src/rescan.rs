//! Rescan tracking from node log output
//!
//! The node reports address rescans only in its log. A tracking session
//! subscribes to the log, matches each line against an ordered list of
//! patterns (first match wins) and updates the rescan fields of the shared
//! state. A "finished" line ends the session by itself.
//!
//! ```text
//! Idle --start_rescan_tracking--> Tracking --finished line / stop--> Idle
//! ```

use crate::events::TrackerEvent;
use crate::log_source::{LogEventSource, LogSubscription};
use crate::state::SyncStateHandle;
use chainsync_params::NetworkType;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use regex::{Captures, Regex};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// Progress information extracted from one log line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RescanLogEvent {
    /// Rescan started at `height`
    Started { height: u64 },
    /// Rescan reached `height`
    Progress { height: u64 },
    /// Rescan over `address_count` addresses finished at `height`
    Finished { address_count: u64, height: u64 },
    /// Rescan was invoked for `address_count` addresses
    AddressCount { address_count: u64 },
}

type Extractor = fn(&Captures<'_>) -> Option<RescanLogEvent>;

struct LinePattern {
    regex: Regex,
    extract: Extractor,
}

fn capture_u64(caps: &Captures<'_>, name: &str) -> Option<u64> {
    caps.name(name)?.as_str().parse().ok()
}

fn pattern(re: &str, extract: Extractor) -> LinePattern {
    LinePattern {
        regex: Regex::new(re).unwrap_or_else(|e| panic!("invalid rescan pattern {re:?}: {e}")),
        extract,
    }
}

// Priority order matters: the start line also mentions an address count, and
// the finished line also mentions "rescan ... for N addresses".
static PATTERNS: Lazy<Vec<LinePattern>> = Lazy::new(|| {
    vec![
        pattern(
            r"Started rescan from block \S+ \(height (?P<height>\d+)\)",
            |c| Some(RescanLogEvent::Started { height: capture_u64(c, "height")? }),
        ),
        pattern(
            r"Rescanned through block \S+ \(height (?P<height>\d+)\)",
            |c| Some(RescanLogEvent::Progress { height: capture_u64(c, "height")? }),
        ),
        pattern(
            r"Finished rescan for (?P<count>\d+) address(?:es)? \(synced to block \S+, height (?P<height>\d+)\)",
            |c| {
                Some(RescanLogEvent::Finished {
                    address_count: capture_u64(c, "count")?,
                    height: capture_u64(c, "height")?,
                })
            },
        ),
        pattern(
            r"(?i)\brescan\b.*?\bfor (?P<count>\d+) (?:addresses|address|addrs)\b",
            |c| Some(RescanLogEvent::AddressCount { address_count: capture_u64(c, "count")? }),
        ),
    ]
});

/// Match a log line against the rescan patterns, first match wins.
///
/// Lines matching nothing (all other node output) return `None`.
pub fn parse_rescan_line(line: &str) -> Option<RescanLogEvent> {
    PATTERNS
        .iter()
        .find_map(|p| p.regex.captures(line).map(|caps| (p, caps)))
        .and_then(|(p, caps)| (p.extract)(&caps))
}

/// Tracks node rescans through the log event source
#[derive(Clone)]
pub struct RescanTracker {
    shared: Arc<RescanShared>,
}

struct RescanShared {
    state: SyncStateHandle,
    logs: Arc<dyn LogEventSource>,
    log_dir: PathBuf,
    network: NetworkType,
    subscription: Mutex<Option<LogSubscription>>,
    session: AtomicU64,
}

impl RescanTracker {
    /// Create a tracker reading the node log under `log_dir`
    pub fn new(
        state: SyncStateHandle,
        logs: Arc<dyn LogEventSource>,
        log_dir: impl Into<PathBuf>,
        network: NetworkType,
    ) -> Self {
        Self {
            shared: Arc::new(RescanShared {
                state,
                logs,
                log_dir: log_dir.into(),
                network,
                subscription: Mutex::new(None),
                session: AtomicU64::new(0),
            }),
        }
    }

    /// Whether a log listener is currently registered
    pub fn is_listening(&self) -> bool {
        self.shared
            .subscription
            .lock()
            .as_ref()
            .map(LogSubscription::is_active)
            .unwrap_or(false)
    }

    /// Start a tracking session at `start_height`.
    ///
    /// Any previous listener is removed before the new one is registered. A log
    /// file that cannot be observed yet leaves the session active without events.
    pub async fn start_rescan_tracking(&self, start_height: u64) {
        let shared = &self.shared;

        if let Some(previous) = shared.subscription.lock().take() {
            previous.remove();
        }

        let session = shared.session.fetch_add(1, Ordering::AcqRel) + 1;
        shared.state.begin_rescan(start_height);
        shared.state.publish(TrackerEvent::RescanStarted { start_height });

        let weak: Weak<RescanShared> = Arc::downgrade(shared);
        let subscription = shared.logs.subscribe(Arc::new(move |line: &str| {
            if let Some(shared) = weak.upgrade() {
                shared.handle_line(session, line);
            }
        }));
        // A concurrent start may have installed its own listener meanwhile;
        // replacing it here drops (and so releases) that registration.
        *shared.subscription.lock() = Some(subscription);

        let network = shared.network.log_network_name();
        let observed = shared.logs.observe_log_file(&shared.log_dir, network).await;

        if shared.session.load(Ordering::Acquire) != session {
            // Finished or replaced while the observe request was in flight
            return;
        }
        match observed {
            Ok(()) => shared.state.set_log_observation(true),
            Err(e) => {
                shared.state.set_log_observation(false);
                shared.state.publish(TrackerEvent::LogObservationUnavailable {
                    error: e.to_string(),
                });
            }
        }
    }

    /// Remove the listener and return every rescan field to idle. Safe when idle.
    pub fn stop_rescan_tracking(&self) {
        self.shared.stop();
    }

    /// Feed one line as if delivered by the log source
    pub fn handle_line(&self, line: &str) {
        let session = self.shared.session.load(Ordering::Acquire);
        self.shared.handle_line(session, line);
    }
}

impl RescanShared {
    fn handle_line(&self, session: u64, line: &str) {
        if self.session.load(Ordering::Acquire) != session || !self.state.snapshot().rescan.is_rescanning {
            return;
        }

        match parse_rescan_line(line) {
            Some(RescanLogEvent::Started { height }) => {
                self.state.set_rescan_start(height);
                self.state.publish(TrackerEvent::RescanStartMarker { height });
            }
            Some(RescanLogEvent::Progress { height }) => {
                self.state.set_rescan_current(height);
                self.state.publish(TrackerEvent::RescanProgress {
                    current_height: height,
                });
            }
            Some(RescanLogEvent::Finished {
                address_count,
                height,
            }) => {
                self.state.set_rescan_address_count(address_count);
                self.state.set_rescan_current(height);
                self.state.publish(TrackerEvent::RescanFinished {
                    address_count,
                    final_height: height,
                });
                self.stop();
            }
            Some(RescanLogEvent::AddressCount { address_count }) => {
                self.state.set_rescan_address_count(address_count);
                self.state.publish(TrackerEvent::RescanAddressCount { address_count });
            }
            None => {}
        }
    }

    fn stop(&self) {
        // Invalidate callbacks already snapshotted for dispatch
        self.session.fetch_add(1, Ordering::AcqRel);

        let previous = self.subscription.lock().take();
        let was_tracking = previous.is_some() || self.state.snapshot().rescan.is_rescanning;
        if let Some(subscription) = previous {
            subscription.remove();
        }

        self.state.clear_rescan();
        if was_tracking {
            self.state.publish(TrackerEvent::RescanStopped);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log_source::LogLineBus;

    const START: &str = "2026-01-21 02:15:44.368 [INF] BTWL: Started rescan from block 000000000000000000012b8e7c3cbd4ec0a2f1e3b1b6a0c2cf0d2d2a4e3babcd (height 118957) for 9 addrs";
    const PROGRESS: &str = "2026-01-21 02:15:50.012 [INF] BTWL: Rescanned through block 0000000000000000000234a1b0f0a4d4dd4b5d6f7c8e9a0b1c2d3e4f5a6b7c8d (height 119000)";
    const FINISHED: &str = "2026-01-21 02:16:31.901 [INF] BTWL: Finished rescan for 9 addresses (synced to block 00000000000000000001f0e1d2c3b4a5968778695a4b3c2d1e0f1a2b3c4d5e6f, height 119438)";

    fn tracker() -> (RescanTracker, LogLineBus, SyncStateHandle) {
        let state = SyncStateHandle::new();
        let bus = LogLineBus::new();
        let tracker = RescanTracker::new(state.clone(), Arc::new(bus.clone()), "/tmp", NetworkType::Mainnet);
        (tracker, bus, state)
    }

    #[test]
    fn test_parse_start_line() {
        assert_eq!(
            parse_rescan_line(START),
            Some(RescanLogEvent::Started { height: 118_957 })
        );
    }

    #[test]
    fn test_parse_progress_line() {
        assert_eq!(
            parse_rescan_line(PROGRESS),
            Some(RescanLogEvent::Progress { height: 119_000 })
        );
    }

    #[test]
    fn test_parse_finished_line() {
        assert_eq!(
            parse_rescan_line(FINISHED),
            Some(RescanLogEvent::Finished {
                address_count: 9,
                height: 119_438
            })
        );
        assert_eq!(
            parse_rescan_line("Finished rescan for 1 address (synced to block 00ab, height 5)"),
            Some(RescanLogEvent::Finished {
                address_count: 1,
                height: 5
            })
        );
    }

    #[test]
    fn test_parse_address_count_line() {
        assert_eq!(
            parse_rescan_line("2026-01-21 02:15:44.100 [INF] CHNF: Starting rescan for 12 addresses"),
            Some(RescanLogEvent::AddressCount { address_count: 12 })
        );
        assert_eq!(
            parse_rescan_line("[DBG] LNWL: Rescan invoked for 3 addrs"),
            Some(RescanLogEvent::AddressCount { address_count: 3 })
        );
    }

    #[test]
    fn test_unrelated_lines_ignored() {
        assert_eq!(parse_rescan_line(""), None);
        assert_eq!(
            parse_rescan_line("2026-01-21 02:15:44.368 [INF] LTND: Waiting for chain backend to finish sync"),
            None
        );
        assert_eq!(
            parse_rescan_line("Rescanned through block abc (height notanumber)"),
            None
        );
    }

    #[tokio::test]
    async fn test_session_lifecycle() {
        let (tracker, bus, state) = tracker();

        tracker.start_rescan_tracking(100).await;
        let s = state.snapshot().rescan;
        assert!(s.is_rescanning);
        assert!(s.is_log_observation_active);
        assert_eq!(s.rescan_start_height, Some(100));
        assert_eq!(s.rescan_current_height, Some(100));
        assert!(tracker.is_listening());

        bus.emit(START);
        bus.emit(PROGRESS);
        let s = state.snapshot().rescan;
        assert_eq!(s.rescan_start_height, Some(118_957));
        assert_eq!(s.rescan_current_height, Some(119_000));

        bus.emit(FINISHED);
        assert!(!state.snapshot().rescan.is_rescanning);
        assert!(!tracker.is_listening());
        assert_eq!(bus.listener_count(), 0);
    }

    #[tokio::test]
    async fn test_progress_before_start_tolerated() {
        let (tracker, bus, state) = tracker();
        tracker.start_rescan_tracking(200_000).await;

        bus.emit(PROGRESS);
        let s = state.snapshot().rescan;
        assert_eq!(s.rescan_start_height, Some(200_000));
        assert_eq!(s.rescan_current_height, Some(119_000));
    }

    #[test]
    fn test_stop_when_idle() {
        let (tracker, _bus, state) = tracker();
        tracker.stop_rescan_tracking();
        tracker.stop_rescan_tracking();
        assert_eq!(state.snapshot().rescan, Default::default());
    }

    #[tokio::test]
    async fn test_dropping_tracker_releases_listener() {
        let (tracker, bus, _state) = tracker();
        tracker.start_rescan_tracking(1).await;
        assert_eq!(bus.listener_count(), 1);

        drop(tracker);
        assert_eq!(bus.listener_count(), 0);
    }
}
