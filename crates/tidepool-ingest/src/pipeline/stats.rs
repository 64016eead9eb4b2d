//! Running ingestion statistics.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;

/// Point-in-time copy of the pipeline counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IndexerStats {
    /// Events delivered by any relay, before parsing.
    pub events_received: u64,
    /// Events that passed parsing and every trust check.
    pub events_processed: u64,
    /// Torrents indexed for the first time.
    pub torrents_added: u64,
    /// Announcements of already-indexed torrents.
    pub duplicates: u64,
    /// Events dropped before reaching the duplicate detector.
    pub events_rejected: u64,
    pub last_event_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
}

/// Shared counters updated from the event handlers.
#[derive(Debug, Default)]
pub(crate) struct StatsCounters {
    received: AtomicU64,
    processed: AtomicU64,
    added: AtomicU64,
    duplicates: AtomicU64,
    rejected: AtomicU64,
    /// Unix seconds, 0 until the first event.
    last_event_at: AtomicI64,
    started_at: RwLock<Option<DateTime<Utc>>>,
}

impl StatsCounters {
    pub fn mark_started(&self) {
        *self.started_at.write() = Some(Utc::now());
    }

    pub fn record_received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
        self.last_event_at
            .store(Utc::now().timestamp(), Ordering::Relaxed);
    }

    pub fn record_processed(&self) {
        self.processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_added(&self) {
        self.added.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_duplicate(&self) {
        self.duplicates.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> IndexerStats {
        let last = self.last_event_at.load(Ordering::Relaxed);
        IndexerStats {
            events_received: self.received.load(Ordering::Relaxed),
            events_processed: self.processed.load(Ordering::Relaxed),
            torrents_added: self.added.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            events_rejected: self.rejected.load(Ordering::Relaxed),
            last_event_at: (last > 0)
                .then(|| DateTime::from_timestamp(last, 0))
                .flatten(),
            started_at: *self.started_at.read(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_reflects_counters() {
        let stats = StatsCounters::default();
        assert_eq!(stats.snapshot(), IndexerStats::default());

        stats.mark_started();
        stats.record_received();
        stats.record_received();
        stats.record_processed();
        stats.record_added();
        stats.record_rejected();

        let snap = stats.snapshot();
        assert_eq!(snap.events_received, 2);
        assert_eq!(snap.events_processed, 1);
        assert_eq!(snap.torrents_added, 1);
        assert_eq!(snap.duplicates, 0);
        assert_eq!(snap.events_rejected, 1);
        assert!(snap.last_event_at.is_some());
        assert!(snap.started_at.is_some());
    }
}
