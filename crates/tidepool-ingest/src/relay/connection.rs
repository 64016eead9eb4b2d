//! The relay connection contract.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use nostr_sdk::{Event, Filter};
use tokio_util::sync::CancellationToken;

use crate::Result;

/// Callback invoked once per inbound event, with the origin relay URL.
///
/// Runs on the subscription's delivery task: it must hand off any blocking
/// work instead of doing it inline.
pub type EventHandler = Arc<dyn Fn(String, Event) + Send + Sync>;

/// Builds a connection for a normalized relay URL.
pub type ConnectionFactory = Arc<dyn Fn(&str) -> Arc<dyn RelayConnection> + Send + Sync>;

/// One physical connection to one relay.
///
/// Network errors on connect, publish and fetch are returned to the caller.
/// A handler that panics or errors is its own problem; it never tears down
/// the connection.
#[async_trait]
pub trait RelayConnection: Send + Sync {
    /// Normalized relay URL.
    fn url(&self) -> &str;

    /// Establish a session within `timeout`. No-op if already connected.
    async fn connect(&self, timeout: Duration) -> Result<()>;

    /// Tear down the session. Safe to call repeatedly.
    async fn disconnect(&self);

    /// Non-blocking liveness check.
    fn is_connected(&self) -> bool;

    /// Deliver every event matching `filter` to `handler` until `cancel` fires
    /// or the session ends.
    ///
    /// Events of one subscription arrive in network order.
    async fn subscribe(
        &self,
        filter: Filter,
        handler: EventHandler,
        cancel: CancellationToken,
    ) -> Result<()>;

    /// Send one event.
    async fn publish(&self, event: &Event) -> Result<()>;

    /// First event matching `filter`, or [`crate::Error::Timeout`].
    async fn fetch_one(&self, filter: Filter, timeout: Duration) -> Result<Event>;
}
