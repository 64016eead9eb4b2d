//! In-memory relay connection.
//!
//! Behaves like a relay that lives inside the process: events handed to
//! [`MemoryConnection::deliver`] reach every matching live subscription, and
//! events stored with [`MemoryConnection::store_event`] answer `fetch_one`.
//! Used for offline runs and throughout the test suite.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use nostr_sdk::{Event, Filter};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use super::connection::{EventHandler, RelayConnection};
use crate::{Error, Result};

struct Subscription {
    filter: Filter,
    handler: EventHandler,
    cancel: CancellationToken,
}

/// A scripted relay connection with no network behind it.
pub struct MemoryConnection {
    url: String,
    connected: AtomicBool,
    refuse_connect: AtomicBool,
    connect_attempts: AtomicUsize,
    subscriptions: Mutex<Vec<Subscription>>,
    published: Mutex<Vec<Event>>,
    stored: Mutex<Vec<Event>>,
}

impl MemoryConnection {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            connected: AtomicBool::new(false),
            refuse_connect: AtomicBool::new(false),
            connect_attempts: AtomicUsize::new(0),
            subscriptions: Mutex::new(Vec::new()),
            published: Mutex::new(Vec::new()),
            stored: Mutex::new(Vec::new()),
        }
    }

    /// A connection whose connect attempts fail until told otherwise.
    pub fn refusing(url: impl Into<String>) -> Self {
        let conn = Self::new(url);
        conn.set_refuse_connect(true);
        conn
    }

    pub fn set_refuse_connect(&self, refuse: bool) {
        self.refuse_connect.store(refuse, Ordering::SeqCst);
    }

    /// Simulate the remote end dropping the session. Its subscriptions die
    /// with it.
    pub fn drop_session(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.subscriptions.lock().clear();
    }

    pub fn connect_attempts(&self) -> usize {
        self.connect_attempts.load(Ordering::SeqCst)
    }

    /// Number of subscriptions that have not been cancelled.
    pub fn active_subscriptions(&self) -> usize {
        let mut subs = self.subscriptions.lock();
        subs.retain(|s| !s.cancel.is_cancelled());
        subs.len()
    }

    /// Events successfully published through this connection.
    pub fn published(&self) -> Vec<Event> {
        self.published.lock().clone()
    }

    /// Keep an event for `fetch_one`.
    pub fn store_event(&self, event: Event) {
        self.stored.lock().push(event);
    }

    /// Push an event to every live subscription whose filter matches.
    ///
    /// Returns the number of handlers invoked. Nothing is delivered while
    /// disconnected.
    pub fn deliver(&self, event: &Event) -> usize {
        if !self.is_connected() {
            return 0;
        }

        let handlers: Vec<EventHandler> = {
            let mut subs = self.subscriptions.lock();
            subs.retain(|s| !s.cancel.is_cancelled());
            subs.iter()
                .filter(|s| filter_matches(&s.filter, event))
                .map(|s| s.handler.clone())
                .collect()
        };

        for handler in &handlers {
            handler(self.url.clone(), event.clone());
        }
        handlers.len()
    }
}

/// Kind, author and time-window matching.
fn filter_matches(filter: &Filter, event: &Event) -> bool {
    if let Some(kinds) = &filter.kinds
        && !kinds.contains(&event.kind)
    {
        return false;
    }
    if let Some(authors) = &filter.authors
        && !authors.contains(&event.pubkey)
    {
        return false;
    }
    if let Some(since) = filter.since
        && event.created_at < since
    {
        return false;
    }
    if let Some(until) = filter.until
        && event.created_at > until
    {
        return false;
    }
    true
}

#[async_trait]
impl RelayConnection for MemoryConnection {
    fn url(&self) -> &str {
        &self.url
    }

    async fn connect(&self, _timeout: Duration) -> Result<()> {
        if self.is_connected() {
            return Ok(());
        }
        self.connect_attempts.fetch_add(1, Ordering::SeqCst);

        if self.refuse_connect.load(Ordering::SeqCst) {
            return Err(Error::relay(&self.url, "connection refused"));
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.subscriptions.lock().clear();
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn subscribe(
        &self,
        filter: Filter,
        handler: EventHandler,
        cancel: CancellationToken,
    ) -> Result<()> {
        if !self.is_connected() {
            return Err(Error::relay(&self.url, "not connected"));
        }
        self.subscriptions.lock().push(Subscription {
            filter,
            handler,
            cancel,
        });
        Ok(())
    }

    async fn publish(&self, event: &Event) -> Result<()> {
        if !self.is_connected() {
            return Err(Error::relay(&self.url, "not connected"));
        }
        self.published.lock().push(event.clone());
        Ok(())
    }

    async fn fetch_one(&self, filter: Filter, timeout: Duration) -> Result<Event> {
        if !self.is_connected() {
            return Err(Error::relay(&self.url, "not connected"));
        }
        self.stored
            .lock()
            .iter()
            .filter(|e| filter_matches(&filter, e))
            .max_by_key(|e| e.created_at)
            .cloned()
            .ok_or_else(|| {
                Error::Timeout(format!("no matching event from {} within {:?}", self.url, timeout))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nostr_sdk::{EventBuilder, Keys, Kind};
    use std::sync::Arc;

    fn note(keys: &Keys) -> Event {
        EventBuilder::text_note("hi").sign_with_keys(keys).unwrap()
    }

    #[tokio::test]
    async fn test_deliver_respects_filter_and_cancel() {
        let conn = MemoryConnection::new("wss://memory.test");
        conn.connect(Duration::from_secs(1)).await.unwrap();

        let keys = Keys::generate();
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        let handler: EventHandler = Arc::new(move |url, _| {
            assert_eq!(url, "wss://memory.test");
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let cancel = CancellationToken::new();
        let filter = Filter::new().kind(Kind::TextNote).author(keys.public_key());
        conn.subscribe(filter, handler, cancel.clone()).await.unwrap();

        assert_eq!(conn.deliver(&note(&keys)), 1);
        assert_eq!(conn.deliver(&note(&Keys::generate())), 0);

        cancel.cancel();
        assert_eq!(conn.deliver(&note(&keys)), 0);
        assert_eq!(conn.active_subscriptions(), 0);
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_refusing_connection() {
        let conn = MemoryConnection::refusing("wss://down.test");
        assert!(conn.connect(Duration::from_secs(1)).await.is_err());
        assert!(!conn.is_connected());
        assert!(conn.publish(&note(&Keys::generate())).await.is_err());

        conn.set_refuse_connect(false);
        conn.connect(Duration::from_secs(1)).await.unwrap();
        conn.connect(Duration::from_secs(1)).await.unwrap();
        assert_eq!(conn.connect_attempts(), 2);
    }

    #[tokio::test]
    async fn test_fetch_one_returns_latest_match() {
        let conn = MemoryConnection::new("wss://memory.test");
        conn.connect(Duration::from_secs(1)).await.unwrap();

        let keys = Keys::generate();
        conn.store_event(note(&keys));

        let filter = Filter::new().kind(Kind::ContactList).author(keys.public_key());
        assert!(matches!(
            conn.fetch_one(filter, Duration::from_millis(10)).await,
            Err(Error::Timeout(_))
        ));

        let filter = Filter::new().kind(Kind::TextNote).author(keys.public_key());
        assert!(conn.fetch_one(filter, Duration::from_millis(10)).await.is_ok());
    }
}
