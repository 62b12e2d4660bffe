use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Process-lifetime engine counters.
#[derive(Debug, Default)]
pub struct EngineMetrics {
    accepted: AtomicU64,
    rejected: AtomicU64,
    duplicates: AtomicU64,
    low_confidence: AtomicU64,
    late_arrivals: AtomicU64,
    inconsistencies: AtomicU64,
    entities_created: AtomicU64,
    aliases_added: AtomicU64,
    snapshots_emitted: AtomicU64,
    persistence_failures: AtomicU64,
    stale_queries: AtomicU64,
}

/// Point-in-time copy of [`EngineMetrics`], as reported by the health route.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub events_accepted: u64,
    pub events_rejected: u64,
    pub duplicates_discarded: u64,
    pub low_confidence_discarded: u64,
    pub late_arrivals: u64,
    pub inconsistencies_skipped: u64,
    pub entities_created: u64,
    pub aliases_added: u64,
    pub snapshots_emitted: u64,
    pub persistence_failures: u64,
    pub stale_queries_served: u64,
}

macro_rules! counter {
    ($incr:ident, $field:ident) => {
        pub fn $incr(&self) {
            self.$field.fetch_add(1, Ordering::Relaxed);
        }
    };
}

impl EngineMetrics {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    counter!(event_accepted, accepted);
    counter!(event_rejected, rejected);
    counter!(duplicate, duplicates);
    counter!(low_confidence, low_confidence);
    counter!(late_arrival, late_arrivals);
    counter!(inconsistency, inconsistencies);
    counter!(entity_created, entities_created);
    counter!(alias_added, aliases_added);
    counter!(snapshot_emitted, snapshots_emitted);
    counter!(persistence_failure, persistence_failures);
    counter!(stale_query, stale_queries);

    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        let read = |c: &AtomicU64| c.load(Ordering::Relaxed);
        MetricsSnapshot {
            events_accepted: read(&self.accepted),
            events_rejected: read(&self.rejected),
            duplicates_discarded: read(&self.duplicates),
            low_confidence_discarded: read(&self.low_confidence),
            late_arrivals: read(&self.late_arrivals),
            inconsistencies_skipped: read(&self.inconsistencies),
            entities_created: read(&self.entities_created),
            aliases_added: read(&self.aliases_added),
            snapshots_emitted: read(&self.snapshots_emitted),
            persistence_failures: read(&self.persistence_failures),
            stale_queries_served: read(&self.stale_queries),
        }
    }
}
