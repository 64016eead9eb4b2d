//! Configuration for the ingestion components.
//!
//! Every component takes its configuration as a constructor argument. The
//! daemon fills these from command-line flags and `TIDEPOOL_*` environment
//! variables; tests use the defaults.

use std::collections::HashSet;
use std::time::Duration;

use crate::{Error, Result};

/// Orchestration settings for the ingestion pipeline.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// How often disconnected relays are retried.
    pub reconnect_interval: Duration,
    /// How often running statistics are logged and exported.
    pub stats_interval: Duration,
    /// How often torrents without a title are queued for enrichment.
    pub enrichment_interval: Duration,
    /// Maximum torrents queued per enrichment sweep.
    pub enrichment_batch: usize,
    /// Lookback for the initial subscription, in days (0 = live only).
    pub initial_lookback_days: u64,
    /// Cluster new torrents with near-duplicates after insert.
    pub cluster_near_duplicates: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            reconnect_interval: Duration::from_secs(5 * 60),
            stats_interval: Duration::from_secs(60),
            enrichment_interval: Duration::from_secs(30 * 60),
            enrichment_batch: 50,
            initial_lookback_days: 0,
            cluster_near_duplicates: true,
        }
    }
}

impl PipelineConfig {
    /// Reject settings the maintenance loop cannot run with.
    pub fn validate(&self) -> Result<()> {
        for (name, interval) in [
            ("reconnect_interval", self.reconnect_interval),
            ("stats_interval", self.stats_interval),
            ("enrichment_interval", self.enrichment_interval),
        ] {
            if interval.is_zero() {
                return Err(Error::Config(format!("{} must be greater than zero", name)));
            }
        }
        Ok(())
    }
}

/// Timeouts for relay fan-out operations.
#[derive(Debug, Clone)]
pub struct FleetConfig {
    /// Deadline for a single connection attempt.
    pub connect_timeout: Duration,
    /// Deadline for one-shot fetches such as contact lists.
    pub fetch_timeout: Duration,
    /// Deadline for a single publish.
    pub publish_timeout: Duration,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            fetch_timeout: Duration::from_secs(10),
            publish_timeout: Duration::from_secs(10),
        }
    }
}

/// Content-tag allow list applied after the trust checks.
#[derive(Debug, Clone, Default)]
pub struct TagFilterConfig {
    pub enabled: bool,
    /// Lowercased tags; an announcement passes if any of its tags or its
    /// category label is in this set.
    pub tags: HashSet<String>,
}

impl TagFilterConfig {
    /// An enabled filter over the given tags (case-insensitive).
    pub fn new<I, S>(tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let tags: HashSet<String> = tags
            .into_iter()
            .map(|t| t.as_ref().trim().to_lowercase())
            .filter(|t| !t.is_empty())
            .collect();
        Self { enabled: true, tags }
    }

    /// Whether the filter restricts anything.
    pub fn is_active(&self) -> bool {
        self.enabled && !self.tags.is_empty()
    }
}

/// Web-of-trust resolution settings.
#[derive(Debug, Clone)]
pub struct TrustConfig {
    /// Follow hops from a whitelisted publisher still considered trusted.
    pub depth: u32,
    /// How long a resolved trusted set is reused.
    pub cache_ttl: Duration,
}

impl Default for TrustConfig {
    fn default() -> Self {
        Self {
            depth: 1,
            cache_ttl: Duration::from_secs(60),
        }
    }
}

/// Enrichment worker pool settings.
#[derive(Debug, Clone)]
pub struct EnrichmentConfig {
    /// Concurrent enrichment workers.
    pub workers: usize,
    /// Bounded queue capacity; requests beyond it are dropped.
    pub queue_capacity: usize,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            queue_capacity: 256,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let pipeline = PipelineConfig::default();
        assert_eq!(pipeline.reconnect_interval, Duration::from_secs(300));
        assert_eq!(pipeline.stats_interval, Duration::from_secs(60));
        assert_eq!(pipeline.enrichment_interval, Duration::from_secs(1800));
        assert_eq!(pipeline.enrichment_batch, 50);
        assert!(pipeline.validate().is_ok());

        let fleet = FleetConfig::default();
        assert_eq!(fleet.connect_timeout, Duration::from_secs(10));

        let enrichment = EnrichmentConfig::default();
        assert_eq!(enrichment.workers, 2);
        assert_eq!(enrichment.queue_capacity, 256);

        assert_eq!(TrustConfig::default().depth, 1);
    }

    #[test]
    fn test_zero_interval_is_rejected() {
        let config = PipelineConfig {
            stats_interval: Duration::ZERO,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_tag_filter() {
        assert!(!TagFilterConfig::default().is_active());

        let filter = TagFilterConfig::new(["Movie", " TV ", ""]);
        assert!(filter.is_active());
        assert!(filter.tags.contains("movie"));
        assert!(filter.tags.contains("tv"));
        assert_eq!(filter.tags.len(), 2);

        let disabled = TagFilterConfig {
            enabled: false,
            ..filter
        };
        assert!(!disabled.is_active());
    }
}
