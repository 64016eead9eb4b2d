//! Tidepool ingestion daemon.
//!
//! Connects to Nostr relays, admits torrent announcements from trusted
//! publishers and indexes them into SQLite.
//!
//! # Usage
//!
//! ```bash
//! # Default relays, one whitelisted curator
//! tidepool-ingest --whitelist npub1...
//!
//! # Custom relays, follow the curator's contact list, movies only
//! tidepool-ingest \
//!     --db-path /data/tidepool.db \
//!     --relays wss://relay.damus.io,wss://nos.lol \
//!     --whitelist npub1... \
//!     --import-contacts npub1... \
//!     --tags movie,tv
//! ```
//!
//! Every flag can also be set through its `TIDEPOOL_*` environment variable.
//!
//! # Graceful Shutdown
//!
//! On Ctrl+C the daemon cancels all subscriptions, disconnects from every
//! relay and logs a summary of the run.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tidepool_core::metrics::MetricsExporter;
use tidepool_ingest::{
    EnrichmentConfig, FleetConfig, IngestPipeline, PipelineConfig, RelayFleet, Store,
    StoreWebOfTrust, TagFilterConfig, TrustConfig, TrustGate,
    pipeline::ReleaseNameEnricher,
    relay::{CUSTOM_PRESET, normalize_relay_url},
};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Tidepool ingestion daemon.
#[derive(Parser, Debug)]
#[command(name = "tidepool-ingest")]
#[command(about = "Trust-filtered torrent index ingestion from Nostr relays")]
#[command(version)]
struct Args {
    /// SQLite database path
    #[arg(long, env = "TIDEPOOL_DB_PATH", default_value = "./data/tidepool.db")]
    db_path: PathBuf,

    /// Relay URLs to register (comma-separated). Defaults are seeded when the
    /// database has no relays yet.
    #[arg(long, env = "TIDEPOOL_RELAYS", value_delimiter = ',')]
    relays: Vec<String>,

    /// Publishers to whitelist (hex or npub, comma-separated)
    #[arg(long, env = "TIDEPOOL_WHITELIST", value_delimiter = ',')]
    whitelist: Vec<String>,

    /// Follow hops from a whitelisted publisher that are still trusted
    #[arg(long, env = "TIDEPOOL_TRUST_DEPTH", default_value = "1")]
    trust_depth: u32,

    /// Only index announcements carrying one of these tags (comma-separated)
    #[arg(long, env = "TIDEPOOL_TAGS", value_delimiter = ',')]
    tags: Vec<String>,

    /// Days of history to request on startup (0 = live only)
    #[arg(long, env = "TIDEPOOL_LOOKBACK_DAYS", default_value = "0")]
    lookback_days: u64,

    /// Import this publisher's contact list as trusted follows after startup
    #[arg(long, env = "TIDEPOOL_IMPORT_CONTACTS")]
    import_contacts: Option<String>,

    /// Concurrent metadata enrichment workers
    #[arg(long, env = "TIDEPOOL_ENRICHMENT_WORKERS", default_value = "2")]
    enrichment_workers: usize,

    /// Metrics HTTP server port (0 to disable)
    #[arg(long, env = "TIDEPOOL_METRICS_PORT", default_value = "9090")]
    metrics_port: u16,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Install rustls crypto provider (required when both ring and aws-lc-rs are present)
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("info".parse()?)
                .add_directive("tidepool_ingest=debug".parse()?),
        )
        .init();

    let args = Args::parse();

    tracing::info!("Tidepool ingestion daemon starting...");

    if args.metrics_port > 0 {
        MetricsExporter::install()
            .context("Failed to install metrics recorder")?
            .serve(args.metrics_port)
            .await
            .context("Failed to start metrics server")?;
    }

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    ctrlc::set_handler(move || {
        tracing::info!("Shutdown signal received, stopping gracefully...");
        signal.cancel();
    })
    .context("Failed to set Ctrl+C handler")?;

    let store = Arc::new(
        Store::open(&args.db_path)
            .with_context(|| format!("Failed to open database at {:?}", args.db_path))?,
    );

    seed_relays(&store, &args.relays)?;

    for publisher in &args.whitelist {
        store
            .add_whitelist(publisher, Some("command line"))
            .with_context(|| format!("Invalid whitelist entry '{}'", publisher))?;
    }

    let tag_filter = if args.tags.is_empty() {
        TagFilterConfig::default()
    } else {
        TagFilterConfig::new(&args.tags)
    };

    tracing::info!("Configuration:");
    tracing::info!("  Database: {}", args.db_path.display());
    tracing::info!("  Whitelisted: {}", store.whitelist()?.len());
    tracing::info!("  Trust depth: {}", args.trust_depth);
    tracing::info!(
        "  Tag filter: {}",
        if tag_filter.is_active() {
            args.tags.join(",")
        } else {
            "disabled".to_string()
        }
    );
    tracing::info!("  Lookback: {} days", args.lookback_days);

    let web_of_trust = Arc::new(StoreWebOfTrust::new(
        store.clone(),
        TrustConfig {
            depth: args.trust_depth,
            ..Default::default()
        },
    ));
    let gate = Arc::new(TrustGate::new(web_of_trust, store.clone(), tag_filter));

    let fleet = Arc::new(RelayFleet::new(FleetConfig::default(), Some(store.clone())));
    let loaded = fleet.load_registered().await?;
    tracing::info!("  Relays: {}", loaded);

    let pipeline = IngestPipeline::new(
        PipelineConfig {
            initial_lookback_days: args.lookback_days,
            ..Default::default()
        },
        store.clone(),
        fleet,
        gate,
    )?
    .with_enricher(
        Arc::new(ReleaseNameEnricher),
        EnrichmentConfig {
            workers: args.enrichment_workers,
            ..Default::default()
        },
    );

    pipeline
        .start(&shutdown)
        .await
        .context("Failed to start ingestion")?;

    if let Some(publisher) = &args.import_contacts {
        match pipeline.import_contact_list(publisher).await {
            Ok(imported) => tracing::info!("Imported {} follows from {}", imported, publisher),
            Err(e) => tracing::warn!("Contact list import from {} failed: {}", publisher, e),
        }
    }

    shutdown.cancelled().await;

    tracing::info!("Shutting down...");
    pipeline.stop().await;

    let stats = pipeline.get_stats();
    let groups = pipeline.near_duplicates().get_dedup_stats()?;

    tracing::info!("═══════════════════════════════════════════════════════");
    tracing::info!("SHUTDOWN COMPLETE");
    tracing::info!("═══════════════════════════════════════════════════════");
    tracing::info!("Events received:      {}", stats.events_received);
    tracing::info!("Events processed:     {}", stats.events_processed);
    tracing::info!("Events rejected:      {}", stats.events_rejected);
    tracing::info!("Torrents added:       {}", stats.torrents_added);
    tracing::info!("Duplicates:           {}", stats.duplicates);
    tracing::info!("Torrents indexed:     {}", store.torrent_count()?);
    tracing::info!(
        "Dedup groups:         {} ({} members)",
        groups.group_count, groups.total_members
    );
    if let Some(started) = stats.started_at {
        tracing::info!("Running since:        {}", started.format("%Y-%m-%d %H:%M:%S UTC"));
    }

    Ok(())
}

/// Register relays given on the command line, or the default preset when the
/// database has none.
fn seed_relays(store: &Store, relays: &[String]) -> Result<()> {
    if relays.is_empty() {
        if store.list_relays(false)?.is_empty() {
            let seeded = RelayFleet::seed_defaults(store)?;
            tracing::info!("Seeded {} default relays", seeded);
        }
        return Ok(());
    }

    for url in relays {
        match normalize_relay_url(url) {
            Ok(url) => {
                store.register_relay(&url, None, CUSTOM_PRESET)?;
            }
            Err(e) => tracing::warn!("Skipping relay {}: {}", url, e),
        }
    }
    Ok(())
}
