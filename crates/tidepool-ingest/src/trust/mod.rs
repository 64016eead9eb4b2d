//! Trust gate.
//!
//! Every announcement passes three checks before it reaches the duplicate
//! detector: the publisher is not blacklisted, the publisher is in the
//! web-of-trust's current trusted set, and the content tags pass the tag
//! filter. The gate holds no per-event state.

mod web_of_trust;

use std::sync::Arc;

use tidepool_core::{Announcement, normalize_pubkey, pubkeys_match};

use crate::Result;
use crate::config::TagFilterConfig;
use crate::store::Store;

pub use web_of_trust::{StaticWebOfTrust, StoreWebOfTrust, WebOfTrust};

/// Answers whether a publisher's announcements may be indexed.
pub struct TrustGate {
    web_of_trust: Arc<dyn WebOfTrust>,
    store: Arc<Store>,
    tag_filter: TagFilterConfig,
}

impl TrustGate {
    pub fn new(
        web_of_trust: Arc<dyn WebOfTrust>,
        store: Arc<Store>,
        tag_filter: TagFilterConfig,
    ) -> Self {
        Self {
            web_of_trust,
            store,
            tag_filter,
        }
    }

    pub fn web_of_trust(&self) -> &Arc<dyn WebOfTrust> {
        &self.web_of_trust
    }

    /// True iff the publisher is on the blacklist.
    pub fn is_blacklisted(&self, publisher: &str) -> Result<bool> {
        self.store.is_blacklisted(publisher)
    }

    /// True iff the publisher is in the current trusted set.
    ///
    /// An empty set trusts nobody. A failing collaborator is logged and
    /// treated the same way.
    pub fn is_trusted(&self, publisher: &str) -> bool {
        let trusted = match self.web_of_trust.trusted_uploaders() {
            Ok(set) => set,
            Err(e) => {
                tracing::warn!("Trusted set unavailable, rejecting publisher: {}", e);
                return false;
            }
        };

        if trusted.is_empty() {
            return false;
        }

        let Ok(hex) = normalize_pubkey(publisher) else {
            return false;
        };

        trusted.contains(&hex) || trusted.iter().any(|entry| pubkeys_match(entry, &hex))
    }

    /// True if tag filtering is off, or any content tag or the category label
    /// is in the filter set.
    pub fn matches_tag_filter(&self, announcement: &Announcement) -> bool {
        if !self.tag_filter.is_active() {
            return true;
        }

        announcement
            .tags
            .iter()
            .map(|t| t.to_lowercase())
            .chain(std::iter::once(announcement.category.label.to_lowercase()))
            .any(|t| self.tag_filter.tags.contains(&t))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use nostr_sdk::{Keys, ToBech32};
    use std::collections::HashSet;
    use tidepool_core::Category;

    struct FailingWebOfTrust;

    impl WebOfTrust for FailingWebOfTrust {
        fn trusted_uploaders(&self) -> Result<Arc<HashSet<String>>> {
            Err(Error::Trust("graph offline".to_string()))
        }
    }

    fn gate(wot: Arc<dyn WebOfTrust>, store: Arc<Store>, filter: TagFilterConfig) -> TrustGate {
        TrustGate::new(wot, store, filter)
    }

    fn announcement(tags: &[&str], category: Category) -> Announcement {
        Announcement {
            event_id: "e".repeat(64),
            pubkey: "a".repeat(64),
            created_at: 0,
            info_hash: "1".repeat(40),
            name: "Test".to_string(),
            size: 0,
            magnet: String::new(),
            category,
            files: Vec::new(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            trackers: Vec::new(),
            description: None,
            imdb_id: None,
            tmdb_id: None,
        }
    }

    #[test]
    fn test_empty_trusted_set_fails_closed() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let keys = Keys::generate();
        // Present in the raw whitelist, but the collaborator reports nothing
        store.add_whitelist(&keys.public_key().to_hex(), None).unwrap();

        let gate = gate(
            Arc::new(StaticWebOfTrust::new(Vec::<String>::new())),
            store,
            TagFilterConfig::default(),
        );
        assert!(!gate.is_trusted(&keys.public_key().to_hex()));
        assert!(!gate.is_trusted(""));
        assert!(!gate.is_trusted("garbage"));
    }

    #[test]
    fn test_collaborator_error_fails_closed() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let gate = gate(Arc::new(FailingWebOfTrust), store, TagFilterConfig::default());
        assert!(!gate.is_trusted(&Keys::generate().public_key().to_hex()));
    }

    #[test]
    fn test_trust_tolerates_both_encodings() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let hex_keys = Keys::generate();
        let npub_keys = Keys::generate();

        let wot = StaticWebOfTrust::new([
            hex_keys.public_key().to_hex(),
            npub_keys.public_key().to_bech32().unwrap(),
        ]);
        let gate = gate(Arc::new(wot), store, TagFilterConfig::default());

        assert!(gate.is_trusted(&hex_keys.public_key().to_bech32().unwrap()));
        assert!(gate.is_trusted(&hex_keys.public_key().to_hex().to_uppercase()));
        assert!(gate.is_trusted(&npub_keys.public_key().to_hex()));
        assert!(!gate.is_trusted(&Keys::generate().public_key().to_hex()));
    }

    #[test]
    fn test_uppercase_hex_trusted_entry_matches() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let hex = Keys::generate().public_key().to_hex();

        let gate = gate(
            Arc::new(StaticWebOfTrust::new([hex.to_uppercase()])),
            store,
            TagFilterConfig::default(),
        );
        assert!(gate.is_trusted(&hex));
        assert!(gate.is_trusted(&hex.to_uppercase()));
    }

    /// A collaborator that hands back entries exactly as configured.
    struct RawWebOfTrust(Arc<HashSet<String>>);

    impl WebOfTrust for RawWebOfTrust {
        fn trusted_uploaders(&self) -> Result<Arc<HashSet<String>>> {
            Ok(self.0.clone())
        }
    }

    #[test]
    fn test_unnormalized_collaborator_entries_still_match() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let keys = Keys::generate();
        let mixed: String = keys
            .public_key()
            .to_hex()
            .chars()
            .enumerate()
            .map(|(i, c)| if i % 2 == 0 { c.to_ascii_uppercase() } else { c })
            .collect();

        let wot = RawWebOfTrust(Arc::new(HashSet::from([format!(" {} ", mixed)])));
        let gate = gate(Arc::new(wot), store, TagFilterConfig::default());
        assert!(gate.is_trusted(&keys.public_key().to_bech32().unwrap()));
    }

    #[test]
    fn test_blacklist() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let bad = Keys::generate().public_key();
        store.add_blacklist(&bad.to_hex(), Some("spam")).unwrap();

        let gate = gate(
            Arc::new(StaticWebOfTrust::new([bad.to_hex()])),
            store,
            TagFilterConfig::default(),
        );
        assert!(gate.is_blacklisted(&bad.to_bech32().unwrap()).unwrap());
        assert!(!gate.is_blacklisted(&Keys::generate().public_key().to_hex()).unwrap());
    }

    #[test]
    fn test_tag_filter() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let wot: Arc<dyn WebOfTrust> = Arc::new(StaticWebOfTrust::new(Vec::<String>::new()));

        let open = gate(wot.clone(), store.clone(), TagFilterConfig::default());
        assert!(open.matches_tag_filter(&announcement(&["anything"], Category::OTHER)));

        let disabled = gate(
            wot.clone(),
            store.clone(),
            TagFilterConfig {
                enabled: false,
                tags: HashSet::from(["tv".to_string()]),
            },
        );
        assert!(disabled.matches_tag_filter(&announcement(&["movie"], Category::MOVIE)));

        let filtered = gate(wot, store, TagFilterConfig::new(["TV", "Music"]));
        assert!(filtered.matches_tag_filter(&announcement(&["TV", "hd"], Category::TV_HD)));
        assert!(filtered.matches_tag_filter(&announcement(&["flac"], Category::AUDIO_LOSSLESS)));
        assert!(!filtered.matches_tag_filter(&announcement(&["movie"], Category::MOVIE)));
    }
}
