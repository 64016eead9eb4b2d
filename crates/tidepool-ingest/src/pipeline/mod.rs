//! Ingestion pipeline orchestrator.
//!
//! Ties the relay fleet, trust gate and duplicate detectors together:
//!
//! ```text
//! [RelayFleet] → parse → [TrustGate] → [DuplicateDetector] → SQLite
//!                                              ↓ (new only)
//!                              [NearDuplicateDetector], [EnrichmentQueue]
//! ```
//!
//! # Lifecycle
//!
//! `Idle → Running → Idle`. [`IngestPipeline::start`] resolves the trusted
//! publisher set (failing if it cannot), connects the fleet, subscribes to
//! kind 2003 announcements from trusted authors and launches the
//! maintenance loop. [`IngestPipeline::stop`] cancels everything started
//! from that point.
//!
//! # Maintenance
//!
//! Three independent timers run while the pipeline is up:
//!
//! - reconnect sweep: retries every relay that is not connected
//! - stats tick: logs running counters
//! - enrichment sweep: queues torrents still missing a title
//!
//! Each event is handled on the blocking pool so storage calls never stall
//! the relay delivery tasks.

mod activity;
mod enrichment;
mod stats;

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use nostr_sdk::{Event, Filter, Kind, PublicKey, Timestamp};
use serde::Serialize;
use tidepool_core::{TORRENT_KIND, normalize_pubkey, parse_announcement};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;

use crate::config::{EnrichmentConfig, PipelineConfig};
use crate::dedupe::{DuplicateDetector, NearDuplicateDetector, ProcessOutcome};
use crate::relay::{EventHandler, RelayFleet};
use crate::store::Store;
use crate::trust::TrustGate;
use crate::{Error, Result};

pub use activity::ActivityLog;
pub use enrichment::{Enricher, EnrichmentQueue, NoopEnricher, ReleaseNameEnricher};
pub use stats::IndexerStats;

use stats::StatsCounters;

const SECONDS_PER_DAY: u64 = 24 * 60 * 60;

/// Why an event was dropped before indexing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    /// Not a torrent announcement.
    NotAnnouncement,
    Malformed,
    MissingInfoHash,
    Blacklisted,
    Untrusted,
    TagFilter,
    /// The store failed while recording the announcement.
    Storage,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotAnnouncement => "not_announcement",
            Self::Malformed => "malformed",
            Self::MissingInfoHash => "missing_info_hash",
            Self::Blacklisted => "blacklisted",
            Self::Untrusted => "untrusted",
            Self::TagFilter => "tag_filter",
            Self::Storage => "storage",
        }
    }
}

/// What happened to one inbound event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum EventOutcome {
    Added { torrent_id: i64 },
    Duplicate { torrent_id: i64 },
    Rejected { reason: RejectReason },
}

/// Everything one event needs, cloned into each delivery task.
#[derive(Clone)]
struct EventProcessor {
    gate: Arc<TrustGate>,
    detector: Arc<DuplicateDetector>,
    clusterer: Option<Arc<NearDuplicateDetector>>,
    enrichment: Arc<EnrichmentQueue>,
    stats: Arc<StatsCounters>,
}

impl EventProcessor {
    fn handle(&self, relay_url: &str, event: &Event) -> EventOutcome {
        self.stats.record_received();
        metrics::counter!("ingest_events_total").increment(1);

        let outcome = self.evaluate(relay_url, event);
        match &outcome {
            EventOutcome::Added { .. } => {
                self.stats.record_added();
                metrics::counter!("ingest_torrents_added_total").increment(1);
            }
            EventOutcome::Duplicate { .. } => {
                self.stats.record_duplicate();
                metrics::counter!("ingest_duplicates_total").increment(1);
            }
            EventOutcome::Rejected { reason } => {
                self.stats.record_rejected();
                metrics::counter!("ingest_events_rejected_total", "reason" => reason.as_str())
                    .increment(1);
            }
        }
        outcome
    }

    fn evaluate(&self, relay_url: &str, event: &Event) -> EventOutcome {
        let reject = |reason| EventOutcome::Rejected { reason };

        let announcement = match parse_announcement(event) {
            Ok(Some(a)) => a,
            Ok(None) => return reject(RejectReason::NotAnnouncement),
            Err(e) => {
                tracing::debug!(event_id = %event.id, relay = relay_url, "Dropping malformed announcement: {}", e);
                return reject(RejectReason::Malformed);
            }
        };

        if !announcement.has_info_hash() {
            return reject(RejectReason::MissingInfoHash);
        }

        match self.gate.is_blacklisted(&announcement.pubkey) {
            Ok(false) => {}
            Ok(true) => return reject(RejectReason::Blacklisted),
            Err(e) => {
                tracing::warn!(pubkey = %announcement.pubkey, "Blacklist check failed: {}", e);
                return reject(RejectReason::Storage);
            }
        }

        if !self.gate.is_trusted(&announcement.pubkey) {
            tracing::trace!(pubkey = %announcement.pubkey, "Publisher not trusted");
            return reject(RejectReason::Untrusted);
        }

        if !self.gate.matches_tag_filter(&announcement) {
            return reject(RejectReason::TagFilter);
        }

        self.stats.record_processed();
        metrics::counter!("ingest_events_processed_total").increment(1);

        match self.detector.process(&announcement, relay_url) {
            Ok(ProcessOutcome::New { torrent_id }) => {
                tracing::info!(
                    info_hash = %announcement.info_hash,
                    name = %announcement.name,
                    relay = relay_url,
                    "Indexed new torrent"
                );

                if let Some(clusterer) = &self.clusterer
                    && let Err(e) = clusterer.cluster(torrent_id, &announcement)
                {
                    tracing::warn!(info_hash = %announcement.info_hash, "Clustering failed: {}", e);
                }

                self.enrichment.enqueue(&announcement.info_hash);
                EventOutcome::Added { torrent_id }
            }
            Ok(ProcessOutcome::Duplicate { torrent_id, .. }) => {
                EventOutcome::Duplicate { torrent_id }
            }
            Err(e) => {
                tracing::error!(
                    info_hash = %announcement.info_hash,
                    event_id = %announcement.event_id,
                    "Failed to record announcement: {}",
                    e
                );
                reject(RejectReason::Storage)
            }
        }
    }
}

struct RunState {
    cancel: CancellationToken,
    /// Child of `cancel` owning the live announcement subscription.
    subscription: CancellationToken,
    maintenance: JoinHandle<()>,
}

/// The ingestion orchestrator.
pub struct IngestPipeline {
    config: PipelineConfig,
    store: Arc<Store>,
    fleet: Arc<RelayFleet>,
    gate: Arc<TrustGate>,
    detector: Arc<DuplicateDetector>,
    clusterer: Arc<NearDuplicateDetector>,
    enrichment: Arc<EnrichmentQueue>,
    activity: Arc<dyn ActivityLog>,
    stats: Arc<StatsCounters>,
    lifecycle: tokio::sync::Mutex<Option<RunState>>,
    running: AtomicBool,
}

impl IngestPipeline {
    /// Build a pipeline with no enrichment and the store as activity log.
    pub fn new(
        config: PipelineConfig,
        store: Arc<Store>,
        fleet: Arc<RelayFleet>,
        gate: Arc<TrustGate>,
    ) -> Result<Self> {
        config.validate()?;

        let enrichment = Arc::new(EnrichmentQueue::new(
            Arc::new(NoopEnricher),
            store.clone(),
            EnrichmentConfig::default(),
        ));

        Ok(Self {
            config,
            detector: Arc::new(DuplicateDetector::new(store.clone())),
            clusterer: Arc::new(NearDuplicateDetector::new(store.clone())),
            activity: store.clone(),
            store,
            fleet,
            gate,
            enrichment,
            stats: Arc::new(StatsCounters::default()),
            lifecycle: tokio::sync::Mutex::new(None),
            running: AtomicBool::new(false),
        })
    }

    /// Replace the enrichment collaborator.
    pub fn with_enricher(mut self, enricher: Arc<dyn Enricher>, config: EnrichmentConfig) -> Self {
        self.enrichment = Arc::new(EnrichmentQueue::new(enricher, self.store.clone(), config));
        self
    }

    /// Replace the activity log collaborator.
    pub fn with_activity_log(mut self, activity: Arc<dyn ActivityLog>) -> Self {
        self.activity = activity;
        self
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub fn fleet(&self) -> &Arc<RelayFleet> {
        &self.fleet
    }

    pub fn detector(&self) -> &Arc<DuplicateDetector> {
        &self.detector
    }

    pub fn near_duplicates(&self) -> &Arc<NearDuplicateDetector> {
        &self.clusterer
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Snapshot of the running counters.
    pub fn get_stats(&self) -> IndexerStats {
        self.stats.snapshot()
    }

    /// Torrents waiting for an enrichment worker.
    pub fn enrichment_backlog(&self) -> usize {
        self.enrichment.backlog()
    }

    /// Start ingesting. No-op if already running.
    ///
    /// Fails only if the trusted publisher set cannot be resolved. An empty
    /// set starts the pipeline without a subscription.
    pub async fn start(&self, parent: &CancellationToken) -> Result<()> {
        let mut lifecycle = self.lifecycle.lock().await;
        if lifecycle.is_some() {
            tracing::debug!("Pipeline already running");
            return Ok(());
        }

        let trusted = self.gate.web_of_trust().trusted_uploaders()?;

        let cancel = parent.child_token();
        self.stats.mark_started();
        self.enrichment.start(&cancel);

        let connected = self.fleet.start().await;

        let since = match self.config.initial_lookback_days {
            0 => Timestamp::now(),
            days => lookback(days),
        };
        let subscription = cancel.child_token();
        let subscribed = match self
            .subscribe_trusted(&trusted, subscription.clone(), Some(since))
            .await
        {
            Ok(count) => count,
            Err(e) => {
                cancel.cancel();
                self.fleet.stop().await;
                self.enrichment.stop();
                return Err(e);
            }
        };

        let maintenance = tokio::spawn(run_maintenance(
            self.config.clone(),
            self.fleet.clone(),
            self.store.clone(),
            self.enrichment.clone(),
            self.stats.clone(),
            cancel.clone(),
        ));

        *lifecycle = Some(RunState {
            cancel,
            subscription,
            maintenance,
        });
        self.running.store(true, Ordering::SeqCst);
        metrics::gauge!("ingest_running").set(1.0);

        tracing::info!(
            relays = connected,
            subscribed,
            trusted = trusted.len(),
            "Ingestion pipeline started"
        );
        self.activity.log(
            "started",
            &format!(
                "{} relays connected, {} trusted publishers",
                connected,
                trusted.len()
            ),
        );
        Ok(())
    }

    /// Stop ingesting. Idempotent.
    pub async fn stop(&self) {
        let Some(state) = self.lifecycle.lock().await.take() else {
            return;
        };

        state.cancel.cancel();
        self.fleet.stop().await;
        self.enrichment.stop();
        if let Err(e) = state.maintenance.await {
            tracing::warn!("Maintenance loop ended abnormally: {}", e);
        }

        self.running.store(false, Ordering::SeqCst);
        metrics::gauge!("ingest_running").set(0.0);

        let stats = self.stats.snapshot();
        tracing::info!(
            received = stats.events_received,
            added = stats.torrents_added,
            duplicates = stats.duplicates,
            "Ingestion pipeline stopped"
        );
        self.activity.log(
            "stopped",
            &format!(
                "{} events received, {} torrents added",
                stats.events_received, stats.torrents_added
            ),
        );
    }

    /// Handle one inbound event synchronously.
    ///
    /// Subscriptions call this on the blocking pool; it is public for
    /// replaying events from other sources.
    pub fn on_event(&self, relay_url: &str, event: &Event) -> EventOutcome {
        self.processor().handle(relay_url, event)
    }

    /// Re-subscribe with a lookback of `days_back` days (0 = everything the
    /// relays still hold). No-op when not running.
    ///
    /// Returns the number of relays subscribed.
    pub async fn fetch_historical(&self, days_back: u64) -> Result<usize> {
        let since = (days_back > 0).then(|| lookback(days_back));
        let subscribed = self.resubscribe(since).await?;
        if subscribed > 0 {
            tracing::info!(days_back, relays = subscribed, "Historical fetch started");
        }
        Ok(subscribed)
    }

    /// Import a publisher's contact list as depth-1 follow edges.
    ///
    /// Malformed entries are skipped. Returns the number of new edges.
    pub async fn import_contact_list(&self, publisher: &str) -> Result<usize> {
        let follower = normalize_pubkey(publisher)?;
        let author = PublicKey::from_hex(&follower)
            .map_err(|e| Error::Validation(format!("publisher '{}': {}", publisher, e)))?;

        let filter = Filter::new().author(author).kind(Kind::ContactList).limit(1);
        let event = self.fleet.fetch_one(filter).await?;

        let mut follows: Vec<String> = Vec::new();
        let mut skipped = 0usize;
        for tag in event.tags.iter() {
            let values = tag.as_slice();
            if values.first().map(String::as_str) != Some("p") {
                continue;
            }
            match values.get(1).map(|v| normalize_pubkey(v)) {
                Some(Ok(hex)) if hex != follower => follows.push(hex),
                Some(Ok(_)) => {}
                _ => skipped += 1,
            }
        }
        follows.sort();
        follows.dedup();

        let imported = self.store.add_follows(&follower, &follows, 1)?;
        self.gate.web_of_trust().invalidate();

        tracing::info!(
            publisher = %follower,
            follows = follows.len(),
            imported,
            skipped,
            "Imported contact list"
        );
        self.activity.log(
            "contacts_imported",
            &format!(
                "{} follows imported from {} ({} malformed skipped)",
                imported, follower, skipped
            ),
        );

        // Widen the live subscription to the new trusted set
        if self.is_running()
            && let Err(e) = self.resubscribe(Some(Timestamp::now())).await
        {
            tracing::warn!("Failed to refresh subscription after import: {}", e);
        }

        Ok(imported)
    }

    fn processor(&self) -> EventProcessor {
        EventProcessor {
            gate: self.gate.clone(),
            detector: self.detector.clone(),
            clusterer: self
                .config
                .cluster_near_duplicates
                .then(|| self.clusterer.clone()),
            enrichment: self.enrichment.clone(),
            stats: self.stats.clone(),
        }
    }

    fn handler(&self) -> EventHandler {
        let processor = self.processor();
        Arc::new(move |relay_url: String, event: Event| {
            let processor = processor.clone();
            tokio::task::spawn_blocking(move || {
                processor.handle(&relay_url, &event);
            });
        })
    }

    /// Replace the live subscription with one over the current trusted set.
    ///
    /// The new subscription is established before the old one is cancelled.
    async fn resubscribe(&self, since: Option<Timestamp>) -> Result<usize> {
        let mut lifecycle = self.lifecycle.lock().await;
        let Some(state) = lifecycle.as_mut() else {
            tracing::debug!("Pipeline not running, nothing to re-subscribe");
            return Ok(0);
        };

        let trusted = self.gate.web_of_trust().trusted_uploaders()?;
        let subscription = state.cancel.child_token();
        let subscribed = self
            .subscribe_trusted(&trusted, subscription.clone(), since)
            .await?;

        let previous = std::mem::replace(&mut state.subscription, subscription);
        previous.cancel();
        Ok(subscribed)
    }

    async fn subscribe_trusted(
        &self,
        trusted: &HashSet<String>,
        cancel: CancellationToken,
        since: Option<Timestamp>,
    ) -> Result<usize> {
        let authors: Vec<PublicKey> = trusted
            .iter()
            .filter_map(|pk| PublicKey::parse(pk).ok())
            .collect();

        if authors.is_empty() {
            tracing::warn!("No trusted publishers configured, ingestion will idle");
            return Ok(0);
        }

        let mut filter = Filter::new().kind(Kind::from(TORRENT_KIND)).authors(authors);
        if let Some(since) = since {
            filter = filter.since(since);
        }

        match self.fleet.subscribe_all(filter, self.handler(), cancel).await {
            Ok(count) => Ok(count),
            Err(Error::NoConnectedRelays) => {
                tracing::warn!("No relays connected yet, subscription applies on reconnect");
                Ok(0)
            }
            Err(e) => Err(e),
        }
    }
}

fn lookback(days: u64) -> Timestamp {
    Timestamp::from(
        Timestamp::now()
            .as_u64()
            .saturating_sub(days.saturating_mul(SECONDS_PER_DAY)),
    )
}

async fn run_maintenance(
    config: PipelineConfig,
    fleet: Arc<RelayFleet>,
    store: Arc<Store>,
    enrichment: Arc<EnrichmentQueue>,
    stats: Arc<StatsCounters>,
    cancel: CancellationToken,
) {
    let timer = |period: Duration| {
        let mut interval = interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        interval
    };
    let mut reconnect = timer(config.reconnect_interval);
    let mut report = timer(config.stats_interval);
    let mut enrich = timer(config.enrichment_interval);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = reconnect.tick() => {
                let retried = fleet.reconnect_all().await;
                if retried > 0 {
                    tracing::debug!(retried, "Reconnect sweep");
                }
            }
            _ = report.tick() => {
                let snapshot = stats.snapshot();
                let relays = fleet.connected_count().await;
                tracing::info!(
                    received = snapshot.events_received,
                    processed = snapshot.events_processed,
                    added = snapshot.torrents_added,
                    duplicates = snapshot.duplicates,
                    rejected = snapshot.events_rejected,
                    relays,
                    enrichment_backlog = enrichment.backlog(),
                    "Ingestion stats"
                );
            }
            _ = enrich.tick() => {
                match store.torrents_missing_title(config.enrichment_batch) {
                    Ok(hashes) => {
                        let queued = hashes.iter().filter(|h| enrichment.enqueue(h)).count();
                        if queued > 0 {
                            tracing::debug!(queued, "Enrichment sweep");
                        }
                    }
                    Err(e) => tracing::warn!("Enrichment sweep failed: {}", e),
                }
            }
        }
    }

    tracing::debug!("Maintenance loop stopped");
}
