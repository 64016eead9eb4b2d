//! Tidepool ingestion pipeline.
//!
//! This crate subscribes to NIP-35 torrent announcements on Nostr relays,
//! admits only those from trusted publishers, and indexes them into SQLite
//! with one row per info hash.
//!
//! # Modules
//!
//! - [`relay`] - Relay connections and the fleet that fans out over them
//! - [`trust`] - Trust gate and web-of-trust collaborators
//! - [`dedupe`] - Exact-hash upsert with provenance, near-duplicate clustering
//! - [`pipeline`] - Orchestrator, statistics, enrichment queue
//! - [`store`] - SQLite schema and the narrow operations on it
//! - [`config`] - Component configuration with defaults
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │   RelayFleet    │  one connection per relay, kind 2003 from trusted authors
//! └────────┬────────┘
//!          │  (relay URL, event)
//!          ▼
//! ┌─────────────────┐
//! │ parse + gate    │  blacklist, web of trust, tag filter
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │DuplicateDetector│  insert-or-get by info hash + upload ledger
//! └────────┬────────┘
//!          │  new torrents only
//!          ▼
//! ┌─────────────────┐
//! │ clustering and  │  dedup groups, background metadata lookup
//! │   enrichment    │
//! └─────────────────┘
//! ```

pub mod config;
pub mod dedupe;
mod error;
pub mod pipeline;
pub mod relay;
pub mod store;
pub mod trust;

// Re-export commonly used types at crate root
pub use error::{Error, Result};

pub use config::{EnrichmentConfig, FleetConfig, PipelineConfig, TagFilterConfig, TrustConfig};
pub use dedupe::{DuplicateDetector, NearDuplicateDetector, ProcessOutcome};
pub use pipeline::{EventOutcome, IndexerStats, IngestPipeline, RejectReason};
pub use relay::{RelayFleet, RelayConnection};
pub use store::{RelayStatus, Store};
pub use trust::{StaticWebOfTrust, StoreWebOfTrust, TrustGate, WebOfTrust};
