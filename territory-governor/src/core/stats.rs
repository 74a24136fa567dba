/*!
Counters for decisions, corrections and delivery failures
*/

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;

use territory_database::WorldId;

use crate::core::{engine::Decision, error::GovernorError};

/// Per-world counters, updated by that world's tasks
#[derive(Debug, Default)]
pub struct WorldStats {
    accepted: AtomicU64,
    no_op: AtomicU64,
    stale: AtomicU64,
    ignored: AtomicU64,
    availability_changes: AtomicU64,
    lock_events: AtomicU64,
    poll_corrections: AtomicU64,
    poll_failures: AtomicU64,
}

impl WorldStats {
    pub fn record(&self, decision: &Decision) {
        let counter = match decision {
            Decision::Accepted => &self.accepted,
            Decision::NoOp => &self.no_op,
            Decision::Stale => &self.stale,
            Decision::Ignored(_) => &self.ignored,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_availability_change(&self) {
        self.availability_changes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_lock_event(&self) {
        self.lock_events.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_poll_corrections(&self, count: usize) {
        self.poll_corrections
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn record_poll_failure(&self) {
        self.poll_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> WorldStatsSnapshot {
        WorldStatsSnapshot {
            accepted: self.accepted.load(Ordering::Relaxed),
            no_op: self.no_op.load(Ordering::Relaxed),
            stale: self.stale.load(Ordering::Relaxed),
            ignored: self.ignored.load(Ordering::Relaxed),
            availability_changes: self.availability_changes.load(Ordering::Relaxed),
            lock_events: self.lock_events.load(Ordering::Relaxed),
            poll_corrections: self.poll_corrections.load(Ordering::Relaxed),
            poll_failures: self.poll_failures.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WorldStatsSnapshot {
    pub accepted: u64,
    pub no_op: u64,
    pub stale: u64,
    pub ignored: u64,
    pub availability_changes: u64,
    pub lock_events: u64,
    pub poll_corrections: u64,
    pub poll_failures: u64,
}

/// Process-wide counters plus one [`WorldStats`] per tracked world.
///
/// The world map is fixed at construction, so lookups need no lock.
#[derive(Debug)]
pub struct GovernorStats {
    started_at: DateTime<Utc>,
    malformed: AtomicU64,
    sink_failures: AtomicU64,
    outbound_dropped: AtomicU64,
    worlds: BTreeMap<WorldId, Arc<WorldStats>>,
}

impl GovernorStats {
    pub fn new(worlds: impl IntoIterator<Item = WorldId>) -> Self {
        Self {
            started_at: Utc::now(),
            malformed: AtomicU64::new(0),
            sink_failures: AtomicU64::new(0),
            outbound_dropped: AtomicU64::new(0),
            worlds: worlds
                .into_iter()
                .map(|id| (id, Arc::new(WorldStats::default())))
                .collect(),
        }
    }

    /// Counters for one world; untracked worlds get a detached set
    pub fn world(&self, world_id: WorldId) -> Arc<WorldStats> {
        self.worlds
            .get(&world_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn record_malformed(&self) {
        self.malformed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_sink_failure(&self, failure: &GovernorError) {
        if matches!(failure, GovernorError::SinkDeliveryFailure { .. }) {
            self.sink_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_outbound_drop(&self) {
        self.outbound_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            started_at: self.started_at,
            uptime_secs: (Utc::now() - self.started_at).num_seconds(),
            malformed: self.malformed.load(Ordering::Relaxed),
            sink_failures: self.sink_failures.load(Ordering::Relaxed),
            outbound_dropped: self.outbound_dropped.load(Ordering::Relaxed),
            worlds: self
                .worlds
                .iter()
                .map(|(id, stats)| (*id, stats.snapshot()))
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    pub started_at: DateTime<Utc>,
    pub uptime_secs: i64,
    pub malformed: u64,
    pub sink_failures: u64,
    pub outbound_dropped: u64,
    pub worlds: BTreeMap<WorldId, WorldStatsSnapshot>,
}
