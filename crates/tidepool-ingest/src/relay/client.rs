//! nostr-sdk backed relay connection.
//!
//! Each [`NostrConnection`] owns a single-relay `Client`, so connection
//! lifecycles stay independent: one relay failing its handshake or lagging
//! never stalls another.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use nostr_sdk::prelude::*;
use parking_lot::Mutex;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;

use super::connection::{EventHandler, RelayConnection};
use crate::{Error, Result};

/// Size of the per-connection notification buffer.
const NOTIFICATION_CHANNEL_SIZE: usize = 16_384;

/// Minimum gap between lag warnings for one subscription.
const LAG_WARNING_INTERVAL: Duration = Duration::from_secs(10);

/// A relay connection backed by nostr-sdk.
pub struct NostrConnection {
    url: String,
    client: Client,
    relay: Mutex<Option<Relay>>,
    /// Cancelled when the current session ends; subscriptions are bound to it.
    session: Mutex<CancellationToken>,
}

impl NostrConnection {
    /// Create an unconnected handle for a normalized relay URL.
    pub fn new(url: impl Into<String>) -> Self {
        let pool_opts = RelayPoolOptions::default().notification_channel_size(NOTIFICATION_CHANNEL_SIZE);
        let client = Client::builder()
            .opts(Options::new().pool(pool_opts))
            .build();

        Self {
            url: url.into(),
            client,
            relay: Mutex::new(None),
            session: Mutex::new(CancellationToken::new()),
        }
    }
}

#[async_trait]
impl RelayConnection for NostrConnection {
    fn url(&self) -> &str {
        &self.url
    }

    async fn connect(&self, timeout: Duration) -> Result<()> {
        if self.is_connected() {
            return Ok(());
        }

        self.client
            .add_relay(self.url.as_str())
            .await
            .map_err(|e| Error::relay(&self.url, e))?;

        self.client
            .try_connect_relay(self.url.as_str(), timeout)
            .await
            .map_err(|e| Error::relay(&self.url, e))?;

        let relay = self
            .client
            .relay(self.url.as_str())
            .await
            .map_err(|e| Error::relay(&self.url, e))?;
        *self.relay.lock() = Some(relay);
        std::mem::replace(&mut *self.session.lock(), CancellationToken::new()).cancel();

        tracing::debug!(relay = %self.url, "Connected");
        Ok(())
    }

    async fn disconnect(&self) {
        self.session.lock().cancel();
        self.client.disconnect().await;
        if let Some(relay) = self.relay.lock().take() {
            tracing::debug!(relay = %self.url, status = ?relay.status(), "Disconnected");
        }
    }

    fn is_connected(&self) -> bool {
        self.relay
            .lock()
            .as_ref()
            .is_some_and(|relay| relay.status() == RelayStatus::Connected)
    }

    async fn subscribe(
        &self,
        filter: Filter,
        handler: EventHandler,
        cancel: CancellationToken,
    ) -> Result<()> {
        // Take the receiver before subscribing so no early event is missed
        let mut notifications = self.client.notifications();
        let output = self.client.subscribe(filter, None).await?;
        let subscription_id = output.val;

        tracing::debug!(relay = %self.url, subscription = %subscription_id, "Subscribed");

        let url = self.url.clone();
        let client = self.client.clone();
        let session = self.session.lock().clone();

        tokio::spawn(async move {
            let mut last_lag_warning = Instant::now();
            let mut lagged_since_warning = 0u64;

            loop {
                let notification = tokio::select! {
                    _ = cancel.cancelled() => {
                        client.unsubscribe(&subscription_id).await;
                        break;
                    }
                    _ = session.cancelled() => {
                        client.unsubscribe(&subscription_id).await;
                        break;
                    }
                    n = notifications.recv() => n,
                };

                match notification {
                    Ok(RelayPoolNotification::Event {
                        subscription_id: id,
                        event,
                        ..
                    }) if id == subscription_id => handler(url.clone(), *event),
                    Ok(RelayPoolNotification::Shutdown) => break,
                    Ok(_) => {}
                    Err(RecvError::Lagged(count)) => {
                        metrics::counter!("relay_notifications_lagged_total").increment(count);
                        lagged_since_warning += count;
                        if last_lag_warning.elapsed() >= LAG_WARNING_INTERVAL {
                            tracing::warn!(
                                relay = %url,
                                dropped = lagged_since_warning,
                                "Subscription fell behind, notifications dropped"
                            );
                            last_lag_warning = Instant::now();
                            lagged_since_warning = 0;
                        }
                    }
                    Err(RecvError::Closed) => break,
                }
            }

            tracing::debug!(relay = %url, subscription = %subscription_id, "Subscription ended");
        });

        Ok(())
    }

    async fn publish(&self, event: &Event) -> Result<()> {
        let output = self.client.send_event(event).await?;
        if output.success.is_empty() {
            let reason = output
                .failed
                .values()
                .next()
                .cloned()
                .unwrap_or_else(|| "rejected".to_string());
            return Err(Error::relay(&self.url, reason));
        }
        Ok(())
    }

    async fn fetch_one(&self, filter: Filter, timeout: Duration) -> Result<Event> {
        let events = self.client.fetch_events(filter, timeout).await?;
        events
            .into_iter()
            .next()
            .ok_or_else(|| Error::Timeout(format!("no matching event from {}", self.url)))
    }
}
