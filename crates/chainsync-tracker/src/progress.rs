//! Height progress calculation
//!
//! Pure functions turning (current, target) height pairs into the numbers the
//! UI renders. Nothing here touches shared state.

use crate::state::SyncState;

/// Derived progress for a (current, best) height pair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeightProgress {
    /// `current - best`; negative while behind the tip
    pub current_progress: i64,
    /// `max(0, best - current)`
    pub num_blocks_until_synced: u64,
}

impl HeightProgress {
    /// Compute progress from the local and best known heights
    pub fn compute(current_height: u64, best_height: u64) -> Self {
        Self {
            current_progress: signed_delta(current_height, best_height),
            num_blocks_until_synced: best_height.saturating_sub(current_height),
        }
    }

    /// Whether the local height has reached the best known height
    pub fn is_caught_up(&self) -> bool {
        self.num_blocks_until_synced == 0
    }
}

fn signed_delta(current: u64, best: u64) -> i64 {
    if current >= best {
        i64::try_from(current - best).unwrap_or(i64::MAX)
    } else {
        i64::try_from(best - current).map(|d| -d).unwrap_or(i64::MIN)
    }
}

/// Fraction of the chain synced, `None` while the best height is unknown
pub fn sync_fraction(current_height: u64, best_height: u64) -> Option<f64> {
    if best_height == 0 {
        return None;
    }
    Some(current_height as f64 / best_height as f64)
}

/// Clamp a reported fraction into `[0, 1]` for display
pub fn display_fraction(fraction: Option<f64>) -> f64 {
    match fraction {
        Some(f) if f.is_nan() => 0.0,
        Some(f) => f.clamp(0.0, 1.0),
        None => 0.0,
    }
}

/// Display percentage rounded to one decimal
pub fn display_percent(fraction: Option<f64>) -> f64 {
    (display_fraction(fraction) * 1000.0).round() / 10.0
}

/// Fraction of a rescan covered, for display.
///
/// Log ordering can put `current` below `start`; that reads as 0 rather than failing.
pub fn rescan_fraction(start_height: u64, current_height: u64, tip_height: u64) -> f64 {
    if tip_height <= start_height {
        return if current_height >= start_height { 1.0 } else { 0.0 };
    }
    let total = (tip_height - start_height) as f64;
    let done = current_height.saturating_sub(start_height) as f64;
    display_fraction(Some(done / total))
}

/// One-line human summary of a state snapshot
pub fn summary(state: &SyncState) -> String {
    let mut parts = Vec::new();

    if state.is_syncing {
        let pct = display_percent(sync_fraction(state.current_block_height, state.best_block_height));
        parts.push(format!(
            "Syncing | {}/{} ({:.1}%) | {} blocks left",
            state.current_block_height,
            state.best_block_height,
            pct,
            state.num_blocks_until_synced
        ));
    } else {
        parts.push(format!("Synced | height {}", state.current_block_height));
    }

    if state.error {
        parts.push("oracle unavailable".to_string());
    }

    if state.is_recovering {
        match state.recovery_progress {
            Some(p) => parts.push(format!("Recovering {:.1}%", display_percent(Some(p)))),
            None => parts.push("Recovering".to_string()),
        }
    }

    let rescan = &state.rescan;
    if rescan.is_rescanning {
        let start = rescan.rescan_start_height.unwrap_or(0);
        let current = rescan.rescan_current_height.unwrap_or(start);
        parts.push(format!(
            "Rescanning {} -> {} ({:.1}%)",
            start,
            current,
            rescan_fraction(start, current, state.best_block_height) * 100.0
        ));
    }

    if state.is_in_express_graph_sync {
        parts.push("Graph sync".to_string());
    }

    parts.join(" | ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_behind_tip() {
        let p = HeightProgress::compute(799_990, 800_000);
        assert_eq!(p.num_blocks_until_synced, 10);
        assert_eq!(p.current_progress, -10);
        assert!(!p.is_caught_up());
    }

    #[test]
    fn test_ahead_of_stale_tip() {
        let p = HeightProgress::compute(800_005, 800_000);
        assert_eq!(p.num_blocks_until_synced, 0);
        assert_eq!(p.current_progress, 5);
        assert!(p.is_caught_up());
    }

    #[test]
    fn test_sync_fraction_unknown_best() {
        assert_eq!(sync_fraction(100, 0), None);
        assert_eq!(sync_fraction(50, 100), Some(0.5));
    }

    #[test]
    fn test_display_clamping() {
        assert_eq!(display_fraction(Some(1.7)), 1.0);
        assert_eq!(display_fraction(Some(-0.2)), 0.0);
        assert_eq!(display_fraction(Some(f64::NAN)), 0.0);
        assert_eq!(display_fraction(None), 0.0);
        assert_eq!(display_percent(Some(0.12345)), 12.3);
    }

    #[test]
    fn test_rescan_fraction_tolerates_disorder() {
        assert_eq!(rescan_fraction(100, 50, 200), 0.0);
        assert_eq!(rescan_fraction(100, 150, 200), 0.5);
        assert_eq!(rescan_fraction(100, 250, 200), 1.0);
        assert_eq!(rescan_fraction(200, 200, 100), 1.0);
    }

    #[test]
    fn test_summary_string() {
        let state = SyncState {
            is_syncing: true,
            current_block_height: 500,
            best_block_height: 1000,
            num_blocks_until_synced: 500,
            current_progress: -500,
            ..Default::default()
        };

        let summary = summary(&state);
        assert!(summary.contains("500/1000"));
        assert!(summary.contains("50.0%"));
    }
}
