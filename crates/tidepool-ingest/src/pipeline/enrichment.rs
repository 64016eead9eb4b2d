//! Background metadata enrichment.
//!
//! New torrents are queued by info hash on a bounded channel drained by a
//! fixed pool of workers. A full queue drops the request; the periodic
//! enrichment sweep picks the torrent up again while it still lacks a title.
//! Enrichment results never touch ingestion state beyond the torrent's own
//! metadata columns.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::Result;
use crate::config::EnrichmentConfig;
use crate::store::{Enrichment, Store, TorrentRecord};

/// Looks up metadata for an indexed torrent.
#[async_trait]
pub trait Enricher: Send + Sync {
    /// Metadata to merge into the torrent, or `None` if nothing was found.
    async fn enrich(&self, torrent: &TorrentRecord) -> Result<Option<Enrichment>>;
}

/// Finds nothing.
pub struct NoopEnricher;

#[async_trait]
impl Enricher for NoopEnricher {
    async fn enrich(&self, _torrent: &TorrentRecord) -> Result<Option<Enrichment>> {
        Ok(None)
    }
}

/// Derives a title and year from a scene-style release name.
///
/// `Some.Movie.2020.1080p.BluRay-GRP` becomes title `Some Movie`, year 2020.
/// Names without a plausible year are left alone.
pub struct ReleaseNameEnricher;

#[async_trait]
impl Enricher for ReleaseNameEnricher {
    async fn enrich(&self, torrent: &TorrentRecord) -> Result<Option<Enrichment>> {
        Ok(title_and_year(&torrent.name).map(|(title, year)| Enrichment {
            title: Some(title),
            year: Some(year),
            ..Default::default()
        }))
    }
}

fn title_and_year(name: &str) -> Option<(String, i32)> {
    let tokens: Vec<&str> = name
        .split(['.', ' ', '_', '(', ')', '[', ']'])
        .filter(|t| !t.is_empty())
        .collect();

    // The first token is part of the title even when it looks like a year ("1917")
    let (pos, year) = tokens.iter().enumerate().skip(1).find_map(|(i, t)| {
        let year: i32 = t.parse().ok().filter(|_| t.len() == 4)?;
        (1900..=2099).contains(&year).then_some((i, year))
    })?;

    Some((tokens[..pos].join(" "), year))
}

/// Bounded enrichment queue with a worker pool.
pub struct EnrichmentQueue {
    enricher: Arc<dyn Enricher>,
    store: Arc<Store>,
    config: EnrichmentConfig,
    sender: Mutex<Option<mpsc::Sender<String>>>,
    depth: Arc<AtomicUsize>,
}

impl EnrichmentQueue {
    pub fn new(enricher: Arc<dyn Enricher>, store: Arc<Store>, config: EnrichmentConfig) -> Self {
        Self {
            enricher,
            store,
            config,
            sender: Mutex::new(None),
            depth: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Spawn the workers. They exit when `cancel` fires or the queue is stopped.
    pub fn start(&self, cancel: &CancellationToken) {
        let (tx, rx) = mpsc::channel::<String>(self.config.queue_capacity.max(1));
        let rx = Arc::new(tokio::sync::Mutex::new(rx));

        for worker in 0..self.config.workers.max(1) {
            let rx = rx.clone();
            let cancel = cancel.clone();
            let enricher = self.enricher.clone();
            let store = self.store.clone();
            let depth = self.depth.clone();

            tokio::spawn(async move {
                loop {
                    let next = tokio::select! {
                        _ = cancel.cancelled() => None,
                        hash = async { rx.lock().await.recv().await } => hash,
                    };
                    let Some(info_hash) = next else {
                        break;
                    };

                    let remaining = depth.fetch_sub(1, Ordering::Relaxed).saturating_sub(1);
                    metrics::gauge!("enrichment_queue_depth").set(remaining as f64);
                    enrich_one(enricher.as_ref(), &store, &info_hash).await;
                }
                tracing::debug!(worker, "Enrichment worker stopped");
            });
        }

        *self.sender.lock() = Some(tx);
        tracing::debug!(
            workers = self.config.workers,
            capacity = self.config.queue_capacity,
            "Enrichment queue started"
        );
    }

    /// Close the queue. Workers finish what they hold and exit.
    pub fn stop(&self) {
        self.sender.lock().take();
    }

    /// Queue a torrent for enrichment. Returns false if the queue is full or
    /// not running.
    pub fn enqueue(&self, info_hash: &str) -> bool {
        let guard = self.sender.lock();
        let Some(tx) = guard.as_ref() else {
            return false;
        };

        // Count before sending so a fast worker never sees a negative depth
        let depth = self.depth.fetch_add(1, Ordering::Relaxed) + 1;
        match tx.try_send(info_hash.to_string()) {
            Ok(()) => {
                metrics::gauge!("enrichment_queue_depth").set(depth as f64);
                true
            }
            Err(e) => {
                self.depth.fetch_sub(1, Ordering::Relaxed);
                if matches!(e, mpsc::error::TrySendError::Full(_)) {
                    metrics::counter!("enrichment_dropped_total").increment(1);
                    tracing::debug!(info_hash, "Enrichment queue full, dropping");
                }
                false
            }
        }
    }

    /// Requests waiting for a worker.
    pub fn backlog(&self) -> usize {
        self.depth.load(Ordering::Relaxed)
    }
}

async fn enrich_one(enricher: &dyn Enricher, store: &Store, info_hash: &str) {
    let torrent = match store.get_torrent_by_hash(info_hash) {
        Ok(Some(t)) => t,
        Ok(None) => return,
        Err(e) => {
            tracing::warn!(info_hash, "Enrichment lookup failed: {}", e);
            return;
        }
    };

    match enricher.enrich(&torrent).await {
        Ok(Some(enrichment)) => {
            if let Err(e) = store.apply_enrichment(info_hash, &enrichment) {
                metrics::counter!("enrichment_failures_total").increment(1);
                tracing::warn!(info_hash, "Failed to store enrichment: {}", e);
            } else {
                tracing::debug!(info_hash, title = ?enrichment.title, "Torrent enriched");
            }
        }
        Ok(None) => {}
        Err(e) => {
            metrics::counter!("enrichment_failures_total").increment(1);
            tracing::warn!(info_hash, "Enrichment failed: {}", e);
        }
    }
}
