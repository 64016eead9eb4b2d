//! Content-addressed upsert with a provenance ledger.
//!
//! [`DuplicateDetector::process`] is the single entry point every accepted
//! announcement goes through. One info hash yields at most one torrent row no
//! matter how many callers race on it; every distinct announcement leaves
//! exactly one upload record.
//!
//! # Trust score
//!
//! A torrent starts at `BASE_TRUST + UPLOAD_TRUST_INCREMENT` for its first
//! upload and gains `UPLOAD_TRUST_INCREMENT` for each further publisher.
//! [`DuplicateDetector::recalculate_all`] restores exactly that formula.

use std::collections::HashSet;
use std::sync::Arc;

use rusqlite::{Connection, OptionalExtension, TransactionBehavior, params};
use serde::Serialize;
use tidepool_core::{Announcement, file_tree_hash, normalize_pubkey};

use crate::store::{Store, insert_or_get_torrent, unix_now};
use crate::{Error, Result};

/// Score every torrent starts from.
pub const BASE_TRUST: i64 = 10;

/// Added per independent publisher.
pub const UPLOAD_TRUST_INCREMENT: i64 = 10;

/// Added by [`DuplicateDetector::calculate_trust_score`] per trusted publisher.
pub const TRUSTED_PUBLISHER_BONUS: i64 = 50;

/// What `process` did with an announcement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum ProcessOutcome {
    /// First sighting of this info hash.
    New { torrent_id: i64 },
    /// The info hash was already indexed. `recorded` is false when this exact
    /// announcement had been seen before and nothing changed.
    Duplicate { torrent_id: i64, recorded: bool },
}

impl ProcessOutcome {
    pub fn is_new(&self) -> bool {
        matches!(self, Self::New { .. })
    }

    pub fn torrent_id(&self) -> i64 {
        match self {
            Self::New { torrent_id } | Self::Duplicate { torrent_id, .. } => *torrent_id,
        }
    }
}

/// One row of the provenance ledger.
#[derive(Debug, Clone, Serialize)]
pub struct UploadRecord {
    pub torrent_id: i64,
    pub event_id: String,
    pub pubkey: String,
    pub relay_url: Option<String>,
    pub created_at: i64,
    pub seen_at: i64,
}

/// Result of [`DuplicateDetector::purge_exclusive_to_publisher`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PurgeReport {
    /// Torrents whose only publisher was the purged one.
    pub torrents_deleted: usize,
    /// Upload records removed, across deleted and shared torrents.
    pub uploads_removed: usize,
}

/// Exact-key duplicate detection and provenance tracking.
pub struct DuplicateDetector {
    store: Arc<Store>,
}

impl DuplicateDetector {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Index an announcement seen on `relay_url`.
    ///
    /// The whole decision runs in one immediate transaction. Only storage
    /// failures are errors; an already-seen announcement is a normal outcome.
    pub fn process(&self, ann: &Announcement, relay_url: &str) -> Result<ProcessOutcome> {
        if !ann.has_info_hash() {
            return Err(Error::Validation(format!(
                "announcement {} has no info hash",
                ann.event_id
            )));
        }

        let tree_hash = file_tree_hash(&ann.files);
        let now = unix_now();

        let mut conn = self.store.conn();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let (torrent_id, inserted) = insert_or_get_torrent(
            &tx,
            ann,
            tree_hash.as_deref(),
            BASE_TRUST + UPLOAD_TRUST_INCREMENT,
            now,
        )?;

        if inserted {
            record_upload(&tx, torrent_id, ann, relay_url, now)?;
            tx.commit()?;
            tracing::debug!(info_hash = %ann.info_hash, torrent_id, "New torrent");
            return Ok(ProcessOutcome::New { torrent_id });
        }

        let publisher_known = publisher_has_upload(&tx, torrent_id, &ann.pubkey)?;
        if !record_upload(&tx, torrent_id, ann, relay_url, now)? {
            return Ok(ProcessOutcome::Duplicate {
                torrent_id,
                recorded: false,
            });
        }

        let increment = if publisher_known { 0 } else { UPLOAD_TRUST_INCREMENT };
        tx.execute(
            "UPDATE torrents SET
                upload_count = (SELECT COUNT(DISTINCT pubkey) FROM uploads WHERE torrent_id = ?1),
                trust_score = trust_score + ?2,
                updated_at = ?3
             WHERE id = ?1",
            params![torrent_id, increment, now],
        )?;
        tx.commit()?;

        tracing::debug!(
            info_hash = %ann.info_hash,
            torrent_id,
            new_publisher = !publisher_known,
            "Recorded duplicate upload"
        );
        Ok(ProcessOutcome::Duplicate {
            torrent_id,
            recorded: true,
        })
    }

    /// Stored score plus a bonus per trusted provenance publisher.
    ///
    /// A publisher counts if whitelisted, or (with `trust_depth >= 1`) if
    /// reachable from `viewer` within `trust_depth` follow hops.
    pub fn calculate_trust_score(
        &self,
        torrent_id: i64,
        viewer: Option<&str>,
        trust_depth: u32,
    ) -> Result<i64> {
        let (base, publishers) = {
            let conn = self.store.conn();
            let base: Option<i64> = conn
                .query_row(
                    "SELECT trust_score FROM torrents WHERE id = ?",
                    [torrent_id],
                    |row| row.get(0),
                )
                .optional()?;
            let Some(base) = base else {
                return Err(Error::NotFound(format!("torrent {}", torrent_id)));
            };

            let mut stmt =
                conn.prepare("SELECT DISTINCT pubkey FROM uploads WHERE torrent_id = ?")?;
            let publishers = stmt
                .query_map([torrent_id], |row| row.get(0))?
                .collect::<rusqlite::Result<Vec<String>>>()?;
            (base, publishers)
        };

        let whitelist = self.store.whitelist()?;
        let reachable = match viewer {
            Some(viewer) if trust_depth >= 1 => self.store.follows_within_depth(viewer, trust_depth)?,
            _ => HashSet::new(),
        };

        let trusted = publishers
            .iter()
            .filter(|p| whitelist.contains(*p) || reachable.contains(*p))
            .count() as i64;

        Ok(base + TRUSTED_PUBLISHER_BONUS * trusted)
    }

    /// Recompute provenance counts and reset every trust score to
    /// `BASE_TRUST + UPLOAD_TRUST_INCREMENT × count`. Idempotent.
    ///
    /// Returns the number of torrents updated.
    pub fn recalculate_all(&self) -> Result<usize> {
        let mut conn = self.store.conn();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        tx.execute(
            "UPDATE torrents SET upload_count =
                (SELECT COUNT(DISTINCT pubkey) FROM uploads WHERE uploads.torrent_id = torrents.id)",
            [],
        )?;
        let updated = tx.execute(
            "UPDATE torrents SET trust_score = ?1 + ?2 * upload_count",
            params![BASE_TRUST, UPLOAD_TRUST_INCREMENT],
        )?;
        tx.commit()?;

        tracing::info!("Recalculated trust for {} torrents", updated);
        Ok(updated)
    }

    /// Delete torrents only `publisher` ever announced, and strip the
    /// publisher's upload records from torrents shared with others.
    pub fn purge_exclusive_to_publisher(&self, publisher: &str) -> Result<PurgeReport> {
        let publisher = normalize_pubkey(publisher)?;
        let now = unix_now();

        let mut conn = self.store.conn();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let (exclusive, shared) = {
            let mut stmt = tx.prepare(
                "SELECT torrent_id, COUNT(DISTINCT pubkey) FROM uploads
                 WHERE torrent_id IN (SELECT torrent_id FROM uploads WHERE pubkey = ?)
                 GROUP BY torrent_id",
            )?;
            let rows = stmt
                .query_map([&publisher], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)))?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            let (exclusive, shared): (Vec<_>, Vec<_>) =
                rows.into_iter().partition(|(_, publishers)| *publishers == 1);
            (
                exclusive.into_iter().map(|(id, _)| id).collect::<Vec<_>>(),
                shared.into_iter().map(|(id, _)| id).collect::<Vec<_>>(),
            )
        };

        let uploads_removed = tx.execute("DELETE FROM uploads WHERE pubkey = ?", [&publisher])?;

        let mut torrents_deleted = 0;
        for id in &exclusive {
            torrents_deleted += tx.execute("DELETE FROM torrents WHERE id = ?", [id])?;
        }

        for id in &shared {
            tx.execute(
                "UPDATE torrents SET
                    upload_count = (SELECT COUNT(DISTINCT pubkey) FROM uploads WHERE torrent_id = ?1),
                    updated_at = ?2
                 WHERE id = ?1",
                params![id, now],
            )?;
        }

        tx.commit()?;

        let report = PurgeReport {
            torrents_deleted,
            uploads_removed,
        };
        tracing::info!(
            publisher = %publisher,
            torrents_deleted,
            uploads_removed,
            shared = shared.len(),
            "Purged publisher content"
        );
        Ok(report)
    }

    /// Provenance ledger of one torrent, oldest first.
    pub fn uploads_for(&self, torrent_id: i64) -> Result<Vec<UploadRecord>> {
        let conn = self.store.conn();
        let mut stmt = conn.prepare(
            "SELECT torrent_id, event_id, pubkey, relay_url, created_at, seen_at
             FROM uploads WHERE torrent_id = ? ORDER BY id",
        )?;
        let records = stmt
            .query_map([torrent_id], |row| {
                Ok(UploadRecord {
                    torrent_id: row.get(0)?,
                    event_id: row.get(1)?,
                    pubkey: row.get(2)?,
                    relay_url: row.get(3)?,
                    created_at: row.get(4)?,
                    seen_at: row.get(5)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }
}

/// Insert-or-ignore one upload record. Returns true if it was new.
fn record_upload(
    conn: &Connection,
    torrent_id: i64,
    ann: &Announcement,
    relay_url: &str,
    now: i64,
) -> Result<bool> {
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO uploads (torrent_id, event_id, pubkey, relay_url, created_at, seen_at)
         VALUES (?, ?, ?, ?, ?, ?)",
        params![
            torrent_id,
            ann.event_id,
            ann.pubkey,
            relay_url,
            ann.created_at as i64,
            now
        ],
    )?;
    Ok(inserted > 0)
}

fn publisher_has_upload(conn: &Connection, torrent_id: i64, pubkey: &str) -> Result<bool> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM uploads WHERE torrent_id = ? AND pubkey = ? LIMIT 1",
            params![torrent_id, pubkey],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}
