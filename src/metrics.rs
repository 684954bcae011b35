//! Engine counters and uptime tracking

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

pub struct EngineMetrics {
    start_time: Instant,
    rounds_started: AtomicU64,
    tiles_selected: AtomicU64,
    wagers_registered: AtomicU64,
    rounds_lost: AtomicU64,
    rounds_cashed_out: AtomicU64,
    rounds_completed: AtomicU64,
    attestations_issued: AtomicU64,
    sessions_pruned: AtomicU64,
}

/// Point-in-time counter view for the stats endpoint
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub rounds_started: u64,
    pub tiles_selected: u64,
    pub wagers_registered: u64,
    pub rounds_lost: u64,
    pub rounds_cashed_out: u64,
    pub rounds_completed: u64,
    pub attestations_issued: u64,
    pub sessions_pruned: u64,
    pub uptime_secs: u64,
}

impl EngineMetrics {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            rounds_started: AtomicU64::new(0),
            tiles_selected: AtomicU64::new(0),
            wagers_registered: AtomicU64::new(0),
            rounds_lost: AtomicU64::new(0),
            rounds_cashed_out: AtomicU64::new(0),
            rounds_completed: AtomicU64::new(0),
            attestations_issued: AtomicU64::new(0),
            sessions_pruned: AtomicU64::new(0),
        }
    }

    pub fn record_round_started(&self) {
        self.rounds_started.fetch_add(1, Ordering::SeqCst);
    }

    pub fn record_tile_selected(&self) {
        self.tiles_selected.fetch_add(1, Ordering::SeqCst);
    }

    pub fn record_wager_registered(&self) {
        self.wagers_registered.fetch_add(1, Ordering::SeqCst);
    }

    pub fn record_round_lost(&self) {
        self.rounds_lost.fetch_add(1, Ordering::SeqCst);
    }

    pub fn record_round_cashed_out(&self) {
        self.rounds_cashed_out.fetch_add(1, Ordering::SeqCst);
    }

    pub fn record_round_completed(&self) {
        self.rounds_completed.fetch_add(1, Ordering::SeqCst);
    }

    pub fn record_attestations_issued(&self) {
        self.attestations_issued.fetch_add(1, Ordering::SeqCst);
    }

    pub fn record_sessions_pruned(&self, count: u64) {
        self.sessions_pruned.fetch_add(count, Ordering::SeqCst);
    }

    pub fn total_runtime(&self) -> Duration {
        self.start_time.elapsed()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            rounds_started: self.rounds_started.load(Ordering::SeqCst),
            tiles_selected: self.tiles_selected.load(Ordering::SeqCst),
            wagers_registered: self.wagers_registered.load(Ordering::SeqCst),
            rounds_lost: self.rounds_lost.load(Ordering::SeqCst),
            rounds_cashed_out: self.rounds_cashed_out.load(Ordering::SeqCst),
            rounds_completed: self.rounds_completed.load(Ordering::SeqCst),
            attestations_issued: self.attestations_issued.load(Ordering::SeqCst),
            sessions_pruned: self.sessions_pruned.load(Ordering::SeqCst),
            uptime_secs: self.total_runtime().as_secs(),
        }
    }
}

impl Default for EngineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let metrics = EngineMetrics::new();
        metrics.record_round_started();
        metrics.record_round_started();
        metrics.record_tile_selected();
        metrics.record_sessions_pruned(3);

        let snap = metrics.snapshot();
        assert_eq!(snap.rounds_started, 2);
        assert_eq!(snap.tiles_selected, 1);
        assert_eq!(snap.sessions_pruned, 3);
        assert_eq!(snap.rounds_lost, 0);
    }
}
