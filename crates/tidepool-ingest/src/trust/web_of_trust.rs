//! Web-of-trust collaborators.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use tidepool_core::normalize_pubkey;

use crate::config::TrustConfig;
use crate::store::Store;
use crate::{Error, Result};

/// Source of the currently trusted publisher set.
pub trait WebOfTrust: Send + Sync {
    /// Lowercase-hex publisher keys trusted right now.
    fn trusted_uploaders(&self) -> Result<Arc<HashSet<String>>>;

    /// Drop any cached state after the underlying graph changed.
    fn invalidate(&self) {}
}

/// Trusted set = whitelist ∪ publishers followed by whitelisted publishers
/// within the configured depth, read from the store.
///
/// The resolved set is cached for `cache_ttl` so per-event checks never
/// walk the follow graph.
pub struct StoreWebOfTrust {
    store: Arc<Store>,
    config: TrustConfig,
    cache: RwLock<Option<(Instant, Arc<HashSet<String>>)>>,
}

impl StoreWebOfTrust {
    pub fn new(store: Arc<Store>, config: TrustConfig) -> Self {
        Self {
            store,
            config,
            cache: RwLock::new(None),
        }
    }

    pub fn depth(&self) -> u32 {
        self.config.depth
    }
}

impl WebOfTrust for StoreWebOfTrust {
    fn trusted_uploaders(&self) -> Result<Arc<HashSet<String>>> {
        if let Some((resolved_at, set)) = self.cache.read().as_ref()
            && resolved_at.elapsed() < self.config.cache_ttl
        {
            return Ok(set.clone());
        }

        let set = Arc::new(normalize_set(
            self.store
                .trusted_set(self.config.depth)
                .map_err(|e| Error::Trust(e.to_string()))?,
        ));
        *self.cache.write() = Some((Instant::now(), set.clone()));

        tracing::debug!(
            trusted = set.len(),
            depth = self.config.depth,
            "Resolved trusted publishers"
        );
        Ok(set)
    }

    fn invalidate(&self) {
        *self.cache.write() = None;
    }
}

/// Lowercase-hex form of every entry. Entries that are not a valid identity
/// are dropped with a warning.
fn normalize_set<I, S>(publishers: I) -> HashSet<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    publishers
        .into_iter()
        .filter_map(|p| match normalize_pubkey(p.as_ref()) {
            Ok(hex) => Some(hex),
            Err(e) => {
                tracing::warn!("Ignoring trusted publisher: {}", e);
                None
            }
        })
        .collect()
}

/// A fixed trusted set.
pub struct StaticWebOfTrust {
    trusted: Arc<HashSet<String>>,
}

impl StaticWebOfTrust {
    pub fn new<I, S>(publishers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            trusted: Arc::new(normalize_set(publishers)),
        }
    }
}

impl WebOfTrust for StaticWebOfTrust {
    fn trusted_uploaders(&self) -> Result<Arc<HashSet<String>>> {
        Ok(self.trusted.clone())
    }
}
