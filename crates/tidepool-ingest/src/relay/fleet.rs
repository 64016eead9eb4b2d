//! Relay fleet management.
//!
//! The [`RelayFleet`] owns every [`RelayConnection`] keyed by normalized URL
//! and fans connect, subscribe, publish and fetch out across them
//! concurrently. Partial failures are recorded per relay and never escalate
//! to a fleet-wide failure.
//!
//! Subscriptions are remembered while live, so a relay that connects later
//! (through [`RelayFleet::add_relay`] or a reconnect sweep) picks up every
//! subscription it missed.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use futures::future::{self, BoxFuture, FutureExt};
use nostr_sdk::{Event, Filter};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use super::client::NostrConnection;
use super::connection::{ConnectionFactory, EventHandler, RelayConnection};
use super::url::normalize_relay_url;
use crate::config::FleetConfig;
use crate::store::{RelayStatus, Store};
use crate::{Error, Result};

/// Preset name for relays added at runtime.
pub const CUSTOM_PRESET: &str = "custom";

/// Preset name for [`DEFAULT_RELAYS`].
pub const DEFAULT_PRESET: &str = "default";

/// Default public relays carrying torrent announcements.
pub const DEFAULT_RELAYS: &[(&str, &str)] = &[
    ("wss://relay.damus.io", "Damus"),
    ("wss://nos.lol", "nos.lol"),
    ("wss://relay.primal.net", "Primal"),
    ("wss://relay.nostr.band", "nostr.band"),
    ("wss://nostr.mom", "nostr.mom"),
];

/// Per-relay outcome of a publish fan-out.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PublishReport {
    /// URL → `Ok` or a failure description.
    pub results: BTreeMap<String, std::result::Result<(), String>>,
}

impl PublishReport {
    pub fn succeeded(&self) -> usize {
        self.results.values().filter(|r| r.is_ok()).count()
    }

    pub fn failed(&self) -> usize {
        self.results.len() - self.succeeded()
    }
}

struct FleetSubscription {
    id: u64,
    filter: Filter,
    handler: EventHandler,
    cancel: CancellationToken,
    /// Relays this subscription is live on.
    applied: HashSet<String>,
}

/// The set of relay connections.
pub struct RelayFleet {
    config: FleetConfig,
    store: Option<Arc<Store>>,
    factory: ConnectionFactory,
    connections: RwLock<HashMap<String, Arc<dyn RelayConnection>>>,
    statuses: parking_lot::RwLock<HashMap<String, RelayStatus>>,
    subscriptions: Mutex<Vec<FleetSubscription>>,
    next_subscription_id: AtomicU64,
    running: AtomicBool,
}

impl RelayFleet {
    /// Create an empty fleet of nostr-sdk connections.
    pub fn new(config: FleetConfig, store: Option<Arc<Store>>) -> Self {
        let factory: ConnectionFactory =
            Arc::new(|url: &str| Arc::new(NostrConnection::new(url)) as Arc<dyn RelayConnection>);
        Self::with_factory(config, store, factory)
    }

    /// Create an empty fleet whose connections come from `factory`.
    pub fn with_factory(
        config: FleetConfig,
        store: Option<Arc<Store>>,
        factory: ConnectionFactory,
    ) -> Self {
        Self {
            config,
            store,
            factory,
            connections: RwLock::new(HashMap::new()),
            statuses: parking_lot::RwLock::new(HashMap::new()),
            subscriptions: Mutex::new(Vec::new()),
            next_subscription_id: AtomicU64::new(1),
            running: AtomicBool::new(false),
        }
    }

    /// Register [`DEFAULT_RELAYS`] under the default preset.
    ///
    /// Returns the number of new registrations.
    pub fn seed_defaults(store: &Store) -> Result<usize> {
        let mut added = 0;
        for (url, label) in DEFAULT_RELAYS {
            if store.register_relay(url, Some(*label), DEFAULT_PRESET)? {
                added += 1;
            }
        }
        Ok(added)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Load every enabled relay registration from the store.
    ///
    /// Returns the number of relays loaded. Already-loaded URLs are skipped.
    pub async fn load_registered(self: &Arc<Self>) -> Result<usize> {
        let Some(store) = &self.store else {
            return Ok(0);
        };

        let mut loaded = 0;
        for registration in store.list_relays(true)? {
            match self.add_relay(&registration.url).await {
                Ok(_) => loaded += 1,
                Err(Error::AlreadyExists(_)) => {}
                Err(e) => tracing::warn!(relay = %registration.url, "Skipping registration: {}", e),
            }
        }

        tracing::info!("Loaded {} registered relays", loaded);
        Ok(loaded)
    }

    /// Connect every loaded relay and wait for all attempts to finish.
    ///
    /// Returns the number of relays connected. Individual failures are logged
    /// and persisted, never returned.
    pub async fn start(&self) -> usize {
        self.running.store(true, Ordering::SeqCst);

        let connections: Vec<_> = self.connections.read().await.values().cloned().collect();
        let results = future::join_all(connections.into_iter().map(|c| self.connect_one(c))).await;
        let connected = results.into_iter().filter(|ok| *ok).count();

        self.update_gauges().await;
        tracing::info!("Fleet started: {} relays connected", connected);
        connected
    }

    /// Cancel fleet subscriptions and disconnect every relay.
    pub async fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);

        for sub in self.subscriptions.lock().drain(..) {
            sub.cancel.cancel();
        }

        let connections: Vec<_> = self.connections.read().await.values().cloned().collect();
        future::join_all(connections.iter().map(|c| c.disconnect())).await;

        for conn in &connections {
            self.set_status(conn.url(), RelayStatus::Disconnected, None);
        }

        self.update_gauges().await;
        tracing::info!("Fleet stopped");
    }

    /// Register a relay and, if the fleet is running, connect it in the background.
    ///
    /// Returns the normalized URL.
    pub async fn add_relay(self: &Arc<Self>, url: &str) -> Result<String> {
        let url = normalize_relay_url(url).map_err(|e| Error::Validation(e.to_string()))?;

        let conn = {
            let mut connections = self.connections.write().await;
            if connections.contains_key(&url) {
                return Err(Error::AlreadyExists(url));
            }
            let conn = (self.factory)(&url);
            connections.insert(url.clone(), conn.clone());
            conn
        };

        self.statuses
            .write()
            .insert(url.clone(), RelayStatus::Disconnected);

        if let Some(store) = &self.store
            && let Err(e) = store.register_relay(&url, None, CUSTOM_PRESET)
        {
            tracing::warn!(relay = %url, "Failed to persist registration: {}", e);
        }

        if self.is_running() {
            let fleet = Arc::clone(self);
            tokio::spawn(async move {
                fleet.connect_one(conn).await;
                fleet.update_gauges().await;
            });
        }

        tracing::debug!(relay = %url, "Relay added");
        self.update_gauges().await;
        Ok(url)
    }

    /// Disconnect and deregister a relay.
    pub async fn remove_relay(&self, url: &str) -> Result<()> {
        let url = normalize_relay_url(url).unwrap_or_else(|_| url.trim().to_string());

        let conn = self
            .connections
            .write()
            .await
            .remove(&url)
            .ok_or_else(|| Error::NotFound(url.clone()))?;

        conn.disconnect().await;
        self.statuses.write().remove(&url);
        for sub in self.subscriptions.lock().iter_mut() {
            sub.applied.remove(&url);
        }

        if let Some(store) = &self.store
            && let Err(e) = store.unregister_relay(&url)
        {
            tracing::warn!(relay = %url, "Failed to remove registration: {}", e);
        }

        tracing::info!(relay = %url, "Relay removed");
        self.update_gauges().await;
        Ok(())
    }

    /// Subscribe `filter` on every connected relay until `cancel` fires.
    ///
    /// Each delivered event carries its origin URL. Returns the number of
    /// relays subscribed; errors only when no relay is connected. The
    /// subscription is remembered either way and applied to relays as they
    /// connect.
    pub async fn subscribe_all(
        &self,
        filter: Filter,
        handler: EventHandler,
        cancel: CancellationToken,
    ) -> Result<usize> {
        let id = self.next_subscription_id.fetch_add(1, Ordering::Relaxed);
        {
            let mut subs = self.subscriptions.lock();
            subs.retain(|s| !s.cancel.is_cancelled());
            subs.push(FleetSubscription {
                id,
                filter: filter.clone(),
                handler: handler.clone(),
                cancel: cancel.clone(),
                applied: HashSet::new(),
            });
        }

        let connected = self.connected().await;
        if connected.is_empty() {
            return Err(Error::NoConnectedRelays);
        }

        let attempts = connected.iter().map(|conn| {
            let (filter, handler, cancel) = (filter.clone(), handler.clone(), cancel.clone());
            async move {
                let result = conn.subscribe(filter, handler, cancel).await;
                (conn.url().to_string(), result)
            }
        });

        let mut subscribed = Vec::new();
        for (url, result) in future::join_all(attempts).await {
            match result {
                Ok(()) => subscribed.push(url),
                Err(e) => tracing::warn!(relay = %url, "Subscribe failed: {}", e),
            }
        }

        let count = subscribed.len();
        if let Some(sub) = self.subscriptions.lock().iter_mut().find(|s| s.id == id) {
            sub.applied.extend(subscribed);
        }

        tracing::debug!("Subscription {} live on {} relays", id, count);
        Ok(count)
    }

    /// Publish to every loaded relay.
    pub async fn publish_to_all(&self, event: &Event) -> PublishReport {
        let connections: Vec<_> = self.connections.read().await.values().cloned().collect();
        self.publish_to(connections.into_iter().map(Ok).collect(), event)
            .await
    }

    /// Publish to the given relays only.
    ///
    /// Unknown and disconnected targets are reported without a network call.
    pub async fn publish_to_selected(&self, urls: &[String], event: &Event) -> PublishReport {
        let targets = {
            let connections = self.connections.read().await;
            urls.iter()
                .map(|url| {
                    let normalized = normalize_relay_url(url).unwrap_or_else(|_| url.clone());
                    connections
                        .get(&normalized)
                        .cloned()
                        .ok_or(normalized)
                })
                .collect()
        };
        self.publish_to(targets, event).await
    }

    async fn publish_to(
        &self,
        targets: Vec<std::result::Result<Arc<dyn RelayConnection>, String>>,
        event: &Event,
    ) -> PublishReport {
        let mut report = PublishReport::default();
        let mut sends: Vec<BoxFuture<'_, (String, std::result::Result<(), String>)>> = Vec::new();

        for target in targets {
            match target {
                Err(url) => {
                    report.results.insert(url, Err("not loaded".to_string()));
                }
                Ok(conn) if !conn.is_connected() => {
                    report
                        .results
                        .insert(conn.url().to_string(), Err("not connected".to_string()));
                }
                Ok(conn) => {
                    let timeout = self.config.publish_timeout;
                    sends.push(
                        async move {
                            let outcome = match tokio::time::timeout(timeout, conn.publish(event)).await {
                                Ok(Ok(())) => Ok(()),
                                Ok(Err(e)) => Err(e.to_string()),
                                Err(_) => Err(format!("timed out after {:?}", timeout)),
                            };
                            (conn.url().to_string(), outcome)
                        }
                        .boxed(),
                    );
                }
            }
        }

        for (url, outcome) in future::join_all(sends).await {
            if let Err(reason) = &outcome {
                tracing::debug!(relay = %url, "Publish failed: {}", reason);
            }
            report.results.insert(url, outcome);
        }

        report
    }

    /// Retry every disconnected relay in the background.
    ///
    /// Returns immediately with the number of retries started.
    pub async fn reconnect_all(self: &Arc<Self>) -> usize {
        let stale: Vec<_> = self
            .connections
            .read()
            .await
            .values()
            .filter(|c| !c.is_connected())
            .cloned()
            .collect();

        let count = stale.len();
        for conn in stale {
            let fleet = Arc::clone(self);
            tokio::spawn(async move {
                if fleet.connect_one(conn).await {
                    metrics::counter!("relay_connects_total", "reason" => "reconnect").increment(1);
                }
                fleet.update_gauges().await;
            });
        }

        if count > 0 {
            tracing::debug!("Reconnect sweep: retrying {} relays", count);
        }
        count
    }

    /// Snapshot of URL → status. Does not mutate anything.
    pub async fn health_check(&self) -> HashMap<String, RelayStatus> {
        let connections = self.connections.read().await;
        let statuses = self.statuses.read();

        connections
            .iter()
            .map(|(url, conn)| {
                let status = if conn.is_connected() {
                    RelayStatus::Connected
                } else {
                    match statuses.get(url) {
                        Some(RelayStatus::Connected) | None => RelayStatus::Disconnected,
                        Some(other) => *other,
                    }
                };
                (url.clone(), status)
            })
            .collect()
    }

    /// First event matching `filter` from any connected relay.
    pub async fn fetch_one(&self, filter: Filter) -> Result<Event> {
        let connected = self.connected().await;
        if connected.is_empty() {
            return Err(Error::NoConnectedRelays);
        }

        let timeout = self.config.fetch_timeout;
        let fetches: Vec<BoxFuture<'_, Result<Event>>> = connected
            .iter()
            .map(|conn| {
                let filter = filter.clone();
                async move {
                    tokio::time::timeout(timeout, conn.fetch_one(filter, timeout))
                        .await
                        .map_err(|_| Error::Timeout(format!("fetch from {}", conn.url())))?
                }
                .boxed()
            })
            .collect();

        let (event, _) = future::select_ok(fetches).await?;
        Ok(event)
    }

    /// Loaded relay URLs.
    pub async fn relay_urls(&self) -> Vec<String> {
        let mut urls: Vec<_> = self.connections.read().await.keys().cloned().collect();
        urls.sort();
        urls
    }

    pub async fn connected_count(&self) -> usize {
        self.connected().await.len()
    }

    async fn connected(&self) -> Vec<Arc<dyn RelayConnection>> {
        self.connections
            .read()
            .await
            .values()
            .filter(|c| c.is_connected())
            .cloned()
            .collect()
    }

    /// Connect one relay, record the outcome and apply missed subscriptions.
    async fn connect_one(&self, conn: Arc<dyn RelayConnection>) -> bool {
        let url = conn.url().to_string();
        let was_connected = conn.is_connected();
        self.set_status(&url, RelayStatus::Connecting, None);

        let timeout = self.config.connect_timeout;
        let result = match tokio::time::timeout(timeout, conn.connect(timeout)).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout(format!("connect to {}", url))),
        };

        match result {
            Ok(()) => {
                self.set_status(&url, RelayStatus::Connected, None);
                metrics::counter!("relay_connects_total", "reason" => "connect").increment(1);
                tracing::debug!(relay = %url, "Relay connected");
                if !was_connected {
                    // Subscriptions do not outlive the session they were opened on.
                    for sub in self.subscriptions.lock().iter_mut() {
                        sub.applied.remove(&url);
                    }
                }
                self.apply_subscriptions(&conn).await;
                true
            }
            Err(e) => {
                let reason = e.to_string();
                self.set_status(&url, RelayStatus::Error, Some(&reason));
                metrics::counter!("relay_connect_failures_total", "reason" => "connect").increment(1);
                tracing::warn!(relay = %url, "Relay connection failed: {}", reason);
                false
            }
        }
    }

    async fn apply_subscriptions(&self, conn: &Arc<dyn RelayConnection>) {
        let url = conn.url().to_string();
        let pending: Vec<_> = {
            let mut subs = self.subscriptions.lock();
            subs.retain(|s| !s.cancel.is_cancelled());
            subs.iter()
                .filter(|s| !s.applied.contains(&url))
                .map(|s| (s.id, s.filter.clone(), s.handler.clone(), s.cancel.clone()))
                .collect()
        };

        for (id, filter, handler, cancel) in pending {
            match conn.subscribe(filter, handler, cancel).await {
                Ok(()) => {
                    if let Some(sub) = self.subscriptions.lock().iter_mut().find(|s| s.id == id) {
                        sub.applied.insert(url.clone());
                    }
                }
                Err(e) => tracing::warn!(relay = %url, "Re-subscribe failed: {}", e),
            }
        }
    }

    /// Record a status in memory and, best-effort, in the store.
    fn set_status(&self, url: &str, status: RelayStatus, error: Option<&str>) {
        self.statuses.write().insert(url.to_string(), status);

        if let Some(store) = &self.store
            && let Err(e) = store.update_relay_status(url, status, error)
        {
            tracing::debug!(relay = %url, "Failed to persist status: {}", e);
        }
    }

    async fn update_gauges(&self) {
        let connections = self.connections.read().await;
        let connected = connections.values().filter(|c| c.is_connected()).count();
        metrics::gauge!("relay_connections").set(connected as f64);
        metrics::gauge!("relay_registered").set(connections.len() as f64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::MemoryConnection;
    use nostr_sdk::{EventBuilder, Keys, Kind};
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    const A: &str = "wss://relay-a.example.com";
    const B: &str = "wss://relay-b.example.com";
    const DOWN: &str = "wss://down.example.com";

    /// Fleet over memory connections; `DOWN` refuses to connect.
    fn fleet_with_store(
        store: Option<Arc<Store>>,
    ) -> (Arc<RelayFleet>, Arc<Mutex<HashMap<String, Arc<MemoryConnection>>>>) {
        let made: Arc<Mutex<HashMap<String, Arc<MemoryConnection>>>> = Arc::default();
        let registry = made.clone();
        let factory: ConnectionFactory = Arc::new(move |url: &str| {
            let conn = if url == DOWN {
                Arc::new(MemoryConnection::refusing(url))
            } else {
                Arc::new(MemoryConnection::new(url))
            };
            registry.lock().insert(url.to_string(), conn.clone());
            conn as Arc<dyn RelayConnection>
        });

        let config = FleetConfig {
            connect_timeout: Duration::from_millis(500),
            fetch_timeout: Duration::from_millis(200),
            publish_timeout: Duration::from_millis(500),
        };
        (Arc::new(RelayFleet::with_factory(config, store, factory)), made)
    }

    fn fleet() -> (Arc<RelayFleet>, Arc<Mutex<HashMap<String, Arc<MemoryConnection>>>>) {
        fleet_with_store(None)
    }

    fn note() -> Event {
        EventBuilder::text_note("hello").sign_with_keys(&Keys::generate()).unwrap()
    }

    fn counting_handler() -> (EventHandler, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        (Arc::new(move |_, _| {
            c.fetch_add(1, Ordering::SeqCst);
        }), count)
    }

    #[tokio::test]
    async fn test_start_tolerates_partial_failure() {
        let (fleet, _) = fleet();
        fleet.add_relay(A).await.unwrap();
        fleet.add_relay(DOWN).await.unwrap();

        assert_eq!(fleet.start().await, 1);

        let health = fleet.health_check().await;
        assert_eq!(health[A], RelayStatus::Connected);
        assert_eq!(health[DOWN], RelayStatus::Error);
    }

    #[tokio::test]
    async fn test_add_relay_rejects_duplicates_after_normalization() {
        let (fleet, _) = fleet();
        fleet.add_relay(A).await.unwrap();
        let err = fleet.add_relay("wss://RELAY-A.example.com/").await.unwrap_err();
        assert!(matches!(err, Error::AlreadyExists(_)));
        assert!(matches!(fleet.add_relay("ws://localhost:7777").await, Err(Error::Validation(_))));
    }

    #[tokio::test]
    async fn test_remove_relay() {
        let (fleet, made) = fleet();
        fleet.add_relay(A).await.unwrap();
        fleet.start().await;

        fleet.remove_relay(A).await.unwrap();
        assert!(!made.lock()[A].is_connected());
        assert!(fleet.relay_urls().await.is_empty());
        assert!(matches!(fleet.remove_relay(A).await, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_subscribe_all_requires_a_connected_relay() {
        let (fleet, _) = fleet();
        fleet.add_relay(DOWN).await.unwrap();
        fleet.start().await;

        let (handler, _) = counting_handler();
        let result = fleet
            .subscribe_all(Filter::new(), handler, CancellationToken::new())
            .await;
        assert!(matches!(result, Err(Error::NoConnectedRelays)));
    }

    #[tokio::test]
    async fn test_subscribe_all_tags_origin_and_fans_out() {
        let (fleet, made) = fleet();
        fleet.add_relay(A).await.unwrap();
        fleet.add_relay(B).await.unwrap();
        fleet.add_relay(DOWN).await.unwrap();
        fleet.start().await;

        let origins = Arc::new(Mutex::new(Vec::new()));
        let sink = origins.clone();
        let handler: EventHandler = Arc::new(move |url, _| sink.lock().push(url));

        let subscribed = fleet
            .subscribe_all(Filter::new().kind(Kind::TextNote), handler, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(subscribed, 2);

        let event = note();
        let conns = made.lock().clone();
        conns[A].deliver(&event);
        conns[B].deliver(&event);

        let mut seen = origins.lock().clone();
        seen.sort();
        assert_eq!(seen, vec![A.to_string(), B.to_string()]);
    }

    #[tokio::test]
    async fn test_reconnect_applies_remembered_subscriptions() {
        let (fleet, made) = fleet();
        fleet.add_relay(A).await.unwrap();
        fleet.add_relay(DOWN).await.unwrap();
        fleet.start().await;

        let (handler, count) = counting_handler();
        let cancel = CancellationToken::new();
        fleet.subscribe_all(Filter::new(), handler, cancel.clone()).await.unwrap();

        let down = made.lock()[DOWN].clone();
        down.set_refuse_connect(false);
        assert_eq!(fleet.reconnect_all().await, 1);

        for _ in 0..50 {
            if down.active_subscriptions() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(down.is_connected());
        assert_eq!(down.deliver(&note()), 1);
        assert_eq!(count.load(Ordering::SeqCst), 1);

        // Already-connected relays are not retried
        assert_eq!(fleet.reconnect_all().await, 0);

        cancel.cancel();
        assert_eq!(down.deliver(&note()), 0);
    }

    #[tokio::test]
    async fn test_dropped_session_is_resubscribed_on_reconnect() {
        let (fleet, made) = fleet();
        fleet.add_relay(A).await.unwrap();
        fleet.start().await;

        let (handler, count) = counting_handler();
        let cancel = CancellationToken::new();
        fleet.subscribe_all(Filter::new(), handler, cancel.clone()).await.unwrap();

        let a = made.lock()[A].clone();
        a.drop_session();
        assert_eq!(a.active_subscriptions(), 0);
        assert_eq!(a.deliver(&note()), 0);
        assert_eq!(fleet.health_check().await[A], RelayStatus::Disconnected);

        assert_eq!(fleet.reconnect_all().await, 1);
        for _ in 0..50 {
            if a.active_subscriptions() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(a.connect_attempts(), 2);
        assert_eq!(a.deliver(&note()), 1);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(fleet.health_check().await[A], RelayStatus::Connected);

        cancel.cancel();
    }

    #[tokio::test]
    async fn test_add_relay_while_running_connects_and_subscribes() {
        let (fleet, made) = fleet();
        fleet.add_relay(A).await.unwrap();
        fleet.start().await;

        let (handler, _) = counting_handler();
        fleet.subscribe_all(Filter::new(), handler, CancellationToken::new()).await.unwrap();

        fleet.add_relay(B).await.unwrap();
        let b = made.lock()[B].clone();
        for _ in 0..50 {
            if b.active_subscriptions() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(b.is_connected());
        assert_eq!(b.active_subscriptions(), 1);
    }

    #[tokio::test]
    async fn test_publish_reports() {
        let (fleet, made) = fleet();
        fleet.add_relay(A).await.unwrap();
        fleet.add_relay(B).await.unwrap();
        fleet.add_relay(DOWN).await.unwrap();
        fleet.start().await;

        let event = note();
        let report = fleet.publish_to_all(&event).await;
        assert_eq!(report.succeeded(), 2);
        assert_eq!(report.results[DOWN], Err("not connected".to_string()));

        let report = fleet
            .publish_to_selected(
                &[B.to_string(), "wss://unknown.example.com".to_string(), DOWN.to_string()],
                &event,
            )
            .await;
        assert_eq!(report.results[B], Ok(()));
        assert_eq!(
            report.results["wss://unknown.example.com"],
            Err("not loaded".to_string())
        );
        assert_eq!(report.results[DOWN], Err("not connected".to_string()));
        assert_eq!(report.failed(), 2);

        let conns = made.lock().clone();
        assert_eq!(conns[A].published().len(), 1);
        assert_eq!(conns[B].published().len(), 2);
        assert_eq!(conns[DOWN].connect_attempts(), 1);
    }

    #[tokio::test]
    async fn test_fetch_one() {
        let (fleet, made) = fleet();
        assert!(matches!(fleet.fetch_one(Filter::new()).await, Err(Error::NoConnectedRelays)));

        fleet.add_relay(A).await.unwrap();
        fleet.add_relay(B).await.unwrap();
        fleet.start().await;

        let event = note();
        made.lock()[B].store_event(event.clone());

        let fetched = fleet.fetch_one(Filter::new().kind(Kind::TextNote)).await.unwrap();
        assert_eq!(fetched.id, event.id);

        assert!(fleet.fetch_one(Filter::new().kind(Kind::ContactList)).await.is_err());
    }

    #[tokio::test]
    async fn test_status_is_persisted() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let (fleet, _) = fleet_with_store(Some(store.clone()));
        fleet.add_relay(A).await.unwrap();
        fleet.add_relay(DOWN).await.unwrap();
        fleet.start().await;

        assert_eq!(store.get_relay(A).unwrap().unwrap().status, RelayStatus::Connected);
        let down = store.get_relay(DOWN).unwrap().unwrap();
        assert_eq!(down.status, RelayStatus::Error);
        assert_eq!(down.consecutive_failures, 1);

        fleet.stop().await;
        assert_eq!(store.get_relay(A).unwrap().unwrap().status, RelayStatus::Disconnected);
        assert_eq!(fleet.connected_count().await, 0);
    }

    #[tokio::test]
    async fn test_load_registered_skips_disabled() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        store.register_relay(A, Some("A"), "default").unwrap();
        store.register_relay(B, None, "default").unwrap();
        store.set_relay_enabled(B, false).unwrap();

        let (fleet, _) = fleet_with_store(Some(store));
        assert_eq!(fleet.load_registered().await.unwrap(), 1);
        assert_eq!(fleet.relay_urls().await, vec![A.to_string()]);
    }

    #[test]
    fn test_seed_defaults_once() {
        let store = Store::open_in_memory().unwrap();
        assert_eq!(RelayFleet::seed_defaults(&store).unwrap(), DEFAULT_RELAYS.len());
        assert_eq!(RelayFleet::seed_defaults(&store).unwrap(), 0);

        let relays = store.list_relays(true).unwrap();
        assert_eq!(relays.len(), DEFAULT_RELAYS.len());
        assert!(relays.iter().all(|r| r.preset == DEFAULT_PRESET && r.label.is_some()));
    }
}
