//! Trust whitelist, blacklist and follow edges.
//!
//! Every identity is normalized to lowercase hex before it is written or
//! looked up, so hex and `npub` inputs address the same row.

use std::collections::HashSet;

use rusqlite::params;
use tidepool_core::normalize_pubkey;

use super::{Store, unix_now};
use crate::Result;

impl Store {
    /// Add a publisher to the whitelist. Returns true if newly added.
    pub fn add_whitelist(&self, pubkey: &str, note: Option<&str>) -> Result<bool> {
        let pubkey = normalize_pubkey(pubkey)?;
        let conn = self.conn();
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO trust_whitelist (pubkey, note, added_at) VALUES (?, ?, ?)",
            params![pubkey, note, unix_now()],
        )?;
        Ok(inserted > 0)
    }

    /// Remove a publisher from the whitelist.
    pub fn remove_whitelist(&self, pubkey: &str) -> Result<bool> {
        let pubkey = normalize_pubkey(pubkey)?;
        let conn = self.conn();
        Ok(conn.execute("DELETE FROM trust_whitelist WHERE pubkey = ?", [pubkey])? > 0)
    }

    /// All whitelisted publishers.
    pub fn whitelist(&self) -> Result<HashSet<String>> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT pubkey FROM trust_whitelist")?;
        let keys = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<HashSet<String>>>()?;
        Ok(keys)
    }

    /// Add a publisher to the blacklist. Returns true if newly added.
    pub fn add_blacklist(&self, pubkey: &str, reason: Option<&str>) -> Result<bool> {
        let pubkey = normalize_pubkey(pubkey)?;
        let conn = self.conn();
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO trust_blacklist (pubkey, reason, added_at) VALUES (?, ?, ?)",
            params![pubkey, reason, unix_now()],
        )?;
        Ok(inserted > 0)
    }

    /// Remove a publisher from the blacklist.
    pub fn remove_blacklist(&self, pubkey: &str) -> Result<bool> {
        let pubkey = normalize_pubkey(pubkey)?;
        let conn = self.conn();
        Ok(conn.execute("DELETE FROM trust_blacklist WHERE pubkey = ?", [pubkey])? > 0)
    }

    /// Whether a publisher is blacklisted. Unparseable identities never are.
    pub fn is_blacklisted(&self, pubkey: &str) -> Result<bool> {
        let Ok(pubkey) = normalize_pubkey(pubkey) else {
            return Ok(false);
        };
        let conn = self.conn();
        let found: i64 = conn.query_row(
            "SELECT COUNT(*) FROM trust_blacklist WHERE pubkey = ?",
            [pubkey],
            |row| row.get(0),
        )?;
        Ok(found > 0)
    }

    /// Record follow edges from one publisher. Returns the number of new edges.
    pub fn add_follows(&self, follower: &str, followed: &[String], depth: u32) -> Result<usize> {
        let follower = normalize_pubkey(follower)?;
        let now = unix_now();

        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let mut added = 0;
        {
            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO trust_follows (follower, followed, depth, added_at)
                 VALUES (?, ?, ?, ?)",
            )?;
            for target in followed {
                added += stmt.execute(params![follower, target, depth, now])?;
            }
        }
        tx.commit()?;
        Ok(added)
    }

    /// Publishers reachable from `root` within `depth` follow hops, root included.
    pub fn follows_within_depth(&self, root: &str, depth: u32) -> Result<HashSet<String>> {
        let root = normalize_pubkey(root)?;
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "WITH RECURSIVE reach(pubkey, hops) AS (
                SELECT ?1, 0
                UNION
                SELECT f.followed, r.hops + 1
                FROM trust_follows f JOIN reach r ON f.follower = r.pubkey
                WHERE r.hops < ?2
            )
            SELECT DISTINCT pubkey FROM reach",
        )?;
        let keys = stmt
            .query_map(params![root, depth], |row| row.get(0))?
            .collect::<rusqlite::Result<HashSet<String>>>()?;
        Ok(keys)
    }

    /// Whitelisted publishers plus everyone they follow within `depth` hops.
    pub fn trusted_set(&self, depth: u32) -> Result<HashSet<String>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "WITH RECURSIVE reach(pubkey, hops) AS (
                SELECT pubkey, 0 FROM trust_whitelist
                UNION
                SELECT f.followed, r.hops + 1
                FROM trust_follows f JOIN reach r ON f.follower = r.pubkey
                WHERE r.hops < ?1
            )
            SELECT DISTINCT pubkey FROM reach",
        )?;
        let keys = stmt
            .query_map([depth], |row| row.get(0))?
            .collect::<rusqlite::Result<HashSet<String>>>()?;
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nostr_sdk::{Keys, ToBech32};

    fn pk() -> String {
        Keys::generate().public_key().to_hex()
    }

    #[test]
    fn test_whitelist_accepts_npub() {
        let store = Store::open_in_memory().unwrap();
        let keys = Keys::generate();
        let npub = keys.public_key().to_bech32().unwrap();

        assert!(store.add_whitelist(&npub, Some("friend")).unwrap());
        assert!(!store.add_whitelist(&keys.public_key().to_hex(), None).unwrap());
        assert!(store.whitelist().unwrap().contains(&keys.public_key().to_hex()));

        assert!(store.remove_whitelist(&npub).unwrap());
        assert!(store.whitelist().unwrap().is_empty());
    }

    #[test]
    fn test_invalid_identity_is_rejected() {
        let store = Store::open_in_memory().unwrap();
        assert!(store.add_whitelist("not-a-key", None).is_err());
        assert!(!store.is_blacklisted("not-a-key").unwrap());
    }

    #[test]
    fn test_blacklist() {
        let store = Store::open_in_memory().unwrap();
        let bad = pk();
        assert!(!store.is_blacklisted(&bad).unwrap());
        store.add_blacklist(&bad, Some("spam")).unwrap();
        assert!(store.is_blacklisted(&bad.to_uppercase()).unwrap());
        store.remove_blacklist(&bad).unwrap();
        assert!(!store.is_blacklisted(&bad).unwrap());
    }

    #[test]
    fn test_follow_depth() {
        let store = Store::open_in_memory().unwrap();
        let (root, a, b, c) = (pk(), pk(), pk(), pk());

        store.add_follows(&root, &[a.clone()], 1).unwrap();
        store.add_follows(&a, &[b.clone()], 1).unwrap();
        store.add_follows(&b, &[c.clone(), root.clone()], 1).unwrap();

        let one = store.follows_within_depth(&root, 1).unwrap();
        assert_eq!(one, HashSet::from([root.clone(), a.clone()]));

        let two = store.follows_within_depth(&root, 2).unwrap();
        assert!(two.contains(&b));
        assert!(!two.contains(&c));

        let zero = store.follows_within_depth(&root, 0).unwrap();
        assert_eq!(zero, HashSet::from([root.clone()]));
    }

    #[test]
    fn test_trusted_set_expands_from_whitelist() {
        let store = Store::open_in_memory().unwrap();
        let (root, friend, stranger) = (pk(), pk(), pk());

        assert!(store.trusted_set(1).unwrap().is_empty());

        store.add_whitelist(&root, None).unwrap();
        assert_eq!(store.add_follows(&root, &[friend.clone()], 1).unwrap(), 1);
        assert_eq!(store.add_follows(&root, &[friend.clone()], 1).unwrap(), 0);

        let trusted = store.trusted_set(1).unwrap();
        assert!(trusted.contains(&root));
        assert!(trusted.contains(&friend));
        assert!(!trusted.contains(&stranger));

        assert_eq!(store.trusted_set(0).unwrap(), HashSet::from([root]));
    }
}
