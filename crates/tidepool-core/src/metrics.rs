//! Prometheus export for the metrics Tidepool components record.
//!
//! Components record through the `metrics` facade directly
//! (`metrics::counter!("ingest_events_total").increment(1)`). The daemon
//! installs a [`MetricsExporter`] once at startup and serves it over HTTP:
//!
//! ```rust,ignore
//! let exporter = MetricsExporter::install()?;
//! exporter.serve(9090).await?;
//! ```
//!
//! Names carry the component as prefix (`ingest_`, `relay_`, `dedupe_`,
//! `enrichment_`) and `_total` for counters. Labels stay low-cardinality.

use axum::{Router, extract::State, routing::get};
use metrics::{describe_counter, describe_gauge};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use tokio::task::JoinHandle;

/// Handle to the process-wide Prometheus recorder.
#[derive(Clone)]
pub struct MetricsExporter {
    handle: PrometheusHandle,
}

impl MetricsExporter {
    /// Install the global recorder and describe every Tidepool metric.
    ///
    /// Fails if a recorder is already installed in this process.
    pub fn install() -> Result<Self, BuildError> {
        let handle = PrometheusBuilder::new().install_recorder()?;
        describe_metrics();
        Ok(Self { handle })
    }

    /// Current metrics in the Prometheus text format.
    pub fn render(&self) -> String {
        self.handle.render()
    }

    /// Serve `/metrics` and `/health` on `port` from a background task.
    ///
    /// The listener is bound before returning, so a taken port is reported
    /// here rather than from the task.
    pub async fn serve(self, port: u16) -> std::io::Result<JoinHandle<()>> {
        let app = Router::new()
            .route("/metrics", get(render_metrics))
            .route("/health", get(|| async { "ok" }))
            .with_state(self.handle);

        let addr = SocketAddr::from(([0, 0, 0, 0], port));
        let listener = tokio::net::TcpListener::bind(addr).await?;
        tracing::info!(%addr, "Serving metrics");

        Ok(tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                tracing::error!(error = %e, "Metrics server exited");
            }
        }))
    }
}

async fn render_metrics(State(handle): State<PrometheusHandle>) -> String {
    handle.render()
}

/// Attach help text to the metrics recorded across the workspace.
pub fn describe_metrics() {
    // ingest
    describe_counter!("ingest_events_total", "Events received from relays");
    describe_counter!(
        "ingest_events_processed_total",
        "Events that passed parsing and trust checks"
    );
    describe_counter!(
        "ingest_events_rejected_total",
        "Events dropped before indexing, labelled by reason"
    );
    describe_counter!("ingest_torrents_added_total", "New torrents indexed");
    describe_counter!(
        "ingest_duplicates_total",
        "Announcements for torrents already in the index"
    );
    describe_gauge!("ingest_running", "1 while the pipeline is running");

    // relays
    describe_gauge!("relay_connections", "Relays currently connected");
    describe_gauge!("relay_registered", "Relays loaded in the fleet");
    describe_counter!(
        "relay_connects_total",
        "Successful relay connections, labelled by connect or reconnect"
    );
    describe_counter!(
        "relay_connect_failures_total",
        "Failed relay connection attempts"
    );
    describe_counter!(
        "relay_notifications_lagged_total",
        "Notifications skipped because a subscription fell behind"
    );

    // dedupe and enrichment
    describe_counter!(
        "dedupe_groups_joined_total",
        "Torrents clustered into a dedup group"
    );
    describe_gauge!("enrichment_queue_depth", "Torrents waiting for enrichment");
    describe_counter!(
        "enrichment_dropped_total",
        "Enrichment requests dropped on a full queue"
    );
    describe_counter!("enrichment_failures_total", "Enrichment attempts that failed");
}
