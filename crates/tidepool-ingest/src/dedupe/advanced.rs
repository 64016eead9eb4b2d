//! Near-duplicate detection and dedup groups.
//!
//! [`NearDuplicateDetector::check_duplicate`] runs three tiers, first match
//! wins:
//!
//! | Tier     | Confidence | Match                                               |
//! |----------|------------|-----------------------------------------------------|
//! | Exact    | 1.0        | same info hash                                      |
//! | Probable | 0.95       | same file-tree fingerprint, different info hash     |
//! | Semantic | 0.85       | same IMDb/TMDB id and compatible release names      |
//!
//! The semantic tier is deliberately permissive: when neither name declares
//! a comparable quality tier or release group, the match is accepted.
//! Over-merged groups are pruned by manual review.

use std::sync::Arc;

use rusqlite::{Connection, OptionalExtension, TransactionBehavior, params};
use serde::Serialize;
use tidepool_core::{Announcement, FileEntry, file_tree_hash, parse_release};

use crate::store::{Store, unix_now};
use crate::{Error, Result};

/// Which tier produced a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DuplicateKind {
    Exact,
    Probable,
    Semantic,
}

impl DuplicateKind {
    pub fn confidence(&self) -> f64 {
        match self {
            Self::Exact => 1.0,
            Self::Probable => 0.95,
            Self::Semantic => 0.85,
        }
    }
}

/// An existing torrent the candidate duplicates.
#[derive(Debug, Clone, Serialize)]
pub struct DuplicateMatch {
    pub kind: DuplicateKind,
    pub confidence: f64,
    pub reason: String,
    pub torrent_id: i64,
    pub info_hash: String,
    /// Group the existing torrent belongs to, if any.
    pub group_id: Option<i64>,
}

impl DuplicateMatch {
    fn new(kind: DuplicateKind, reason: String, existing: ExistingTorrent) -> Self {
        Self {
            kind,
            confidence: kind.confidence(),
            reason,
            torrent_id: existing.id,
            info_hash: existing.info_hash,
            group_id: existing.group_id,
        }
    }
}

/// A cluster of torrents believed to be the same release.
#[derive(Debug, Clone, Serialize)]
pub struct DedupGroup {
    pub id: i64,
    pub canonical_info_hash: String,
    pub file_tree_hash: Option<String>,
    pub member_count: i64,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct GroupMember {
    pub torrent_id: i64,
    pub info_hash: String,
    pub name: String,
    pub size: u64,
}

/// Aggregate group statistics. All zero when no group exists.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DedupStats {
    pub group_count: u64,
    pub total_members: u64,
    pub max_group_size: u64,
    pub avg_group_size: f64,
}

struct ExistingTorrent {
    id: i64,
    info_hash: String,
    name: String,
    group_id: Option<i64>,
}

/// Three-tier duplicate detection over the index.
pub struct NearDuplicateDetector {
    store: Arc<Store>,
}

impl NearDuplicateDetector {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Structural fingerprint of a file manifest.
    pub fn compute_file_tree_hash(files: &[FileEntry]) -> Option<String> {
        file_tree_hash(files)
    }

    /// Run all three tiers.
    pub fn check_duplicate(&self, candidate: &Announcement) -> Result<Option<DuplicateMatch>> {
        let existing = {
            let conn = self.store.conn();
            conn.query_row(
                "SELECT id, info_hash, name, dedup_group_id FROM torrents WHERE info_hash = ?",
                [&candidate.info_hash],
                existing_from_row,
            )
            .optional()?
        };

        if let Some(existing) = existing {
            return Ok(Some(DuplicateMatch::new(
                DuplicateKind::Exact,
                "identical info hash".to_string(),
                existing,
            )));
        }

        self.check_near_duplicate(candidate)
    }

    /// The probable and semantic tiers only.
    pub fn check_near_duplicate(&self, candidate: &Announcement) -> Result<Option<DuplicateMatch>> {
        if let Some(found) = self.check_probable(candidate)? {
            return Ok(Some(found));
        }
        self.check_semantic(candidate)
    }

    fn check_probable(&self, candidate: &Announcement) -> Result<Option<DuplicateMatch>> {
        let Some(fingerprint) = file_tree_hash(&candidate.files) else {
            return Ok(None);
        };

        let conn = self.store.conn();

        let grouped = conn
            .query_row(
                "SELECT t.id, t.info_hash, t.name, g.id
                 FROM dedup_groups g JOIN torrents t ON t.info_hash = g.canonical_info_hash
                 WHERE g.file_tree_hash = ?1 AND g.canonical_info_hash != ?2
                 ORDER BY g.id LIMIT 1",
                params![fingerprint, candidate.info_hash],
                existing_from_row,
            )
            .optional()?;

        // An ungrouped torrent with the same fingerprint seeds the first group
        let existing = match grouped {
            Some(existing) => Some(existing),
            None => conn
                .query_row(
                    "SELECT id, info_hash, name, dedup_group_id FROM torrents
                     WHERE file_tree_hash = ?1 AND info_hash != ?2
                     ORDER BY first_seen_at, id LIMIT 1",
                    params![fingerprint, candidate.info_hash],
                    existing_from_row,
                )
                .optional()?,
        };

        Ok(existing.map(|existing| {
            let reason = format!("matching file tree {}", &fingerprint[..12]);
            DuplicateMatch::new(DuplicateKind::Probable, reason, existing)
        }))
    }

    fn check_semantic(&self, candidate: &Announcement) -> Result<Option<DuplicateMatch>> {
        if candidate.imdb_id.is_none() && candidate.tmdb_id.is_none() {
            return Ok(None);
        }

        let existing = {
            let conn = self.store.conn();
            conn.query_row(
                "SELECT id, info_hash, name, dedup_group_id FROM torrents
                 WHERE info_hash != ?3
                   AND ((?1 IS NOT NULL AND imdb_id = ?1) OR (?2 IS NOT NULL AND tmdb_id = ?2))
                 ORDER BY first_seen_at, id LIMIT 1",
                params![candidate.imdb_id, candidate.tmdb_id, candidate.info_hash],
                existing_from_row,
            )
            .optional()?
        };

        let Some(existing) = existing else {
            return Ok(None);
        };

        match release_similarity(&candidate.name, &existing.name) {
            Some(reason) => Ok(Some(DuplicateMatch::new(
                DuplicateKind::Semantic,
                reason,
                existing,
            ))),
            None => Ok(None),
        }
    }

    /// Create an empty group. Returns its id.
    pub fn create_dedup_group(
        &self,
        canonical_info_hash: &str,
        file_tree_hash: Option<&str>,
    ) -> Result<i64> {
        let conn = self.store.conn();
        create_group(&conn, canonical_info_hash, file_tree_hash)
    }

    /// Point a torrent at a group and bump the group's member count, atomically.
    ///
    /// Returns false if the torrent is already a member. A torrent in another
    /// group is not moved.
    pub fn add_to_group(&self, torrent_id: i64, group_id: i64) -> Result<bool> {
        let mut conn = self.store.conn();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let joined = join_group(&tx, torrent_id, group_id)?;
        tx.commit()?;
        Ok(joined)
    }

    pub fn get_group(&self, group_id: i64) -> Result<Option<DedupGroup>> {
        let conn = self.store.conn();
        Ok(conn
            .query_row(
                "SELECT id, canonical_info_hash, file_tree_hash, member_count, created_at
                 FROM dedup_groups WHERE id = ?",
                [group_id],
                |row| {
                    Ok(DedupGroup {
                        id: row.get(0)?,
                        canonical_info_hash: row.get(1)?,
                        file_tree_hash: row.get(2)?,
                        member_count: row.get(3)?,
                        created_at: row.get(4)?,
                    })
                },
            )
            .optional()?)
    }

    /// Members of a group, earliest first.
    pub fn get_group_members(&self, group_id: i64) -> Result<Vec<GroupMember>> {
        let conn = self.store.conn();
        let mut stmt = conn.prepare(
            "SELECT id, info_hash, name, size FROM torrents
             WHERE dedup_group_id = ? ORDER BY first_seen_at, id",
        )?;
        let members = stmt
            .query_map([group_id], |row| {
                Ok(GroupMember {
                    torrent_id: row.get(0)?,
                    info_hash: row.get(1)?,
                    name: row.get(2)?,
                    size: row.get::<_, i64>(3)?.max(0) as u64,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(members)
    }

    pub fn get_dedup_stats(&self) -> Result<DedupStats> {
        let conn = self.store.conn();
        let (count, total, max): (i64, i64, i64) = conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(member_count), 0), COALESCE(MAX(member_count), 0)
             FROM dedup_groups",
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )?;

        Ok(DedupStats {
            group_count: count as u64,
            total_members: total as u64,
            max_group_size: max as u64,
            avg_group_size: if count > 0 {
                total as f64 / count as f64
            } else {
                0.0
            },
        })
    }

    /// Cluster a just-indexed torrent with its nearest duplicate, if any.
    ///
    /// Joins the existing torrent's group, or creates one canonicalized on the
    /// existing (earlier) torrent and adds both. Returns the group id.
    pub fn cluster(&self, torrent_id: i64, candidate: &Announcement) -> Result<Option<i64>> {
        match self.check_near_duplicate(candidate)? {
            Some(found) => self.cluster_with(torrent_id, candidate, &found).map(Some),
            None => Ok(None),
        }
    }

    /// Apply a match found outside the transaction.
    ///
    /// Group pointers are re-read under the write lock: another handler may
    /// have grouped either torrent after `found` was looked up.
    fn cluster_with(
        &self,
        torrent_id: i64,
        candidate: &Announcement,
        found: &DuplicateMatch,
    ) -> Result<i64> {
        let mut conn = self.store.conn();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let existing_group = current_group(&tx, found.torrent_id)?;
        let own_group = current_group(&tx, torrent_id)?;

        let (group_id, joined) = match (existing_group, own_group) {
            (Some(group), None) => (group, join_group(&tx, torrent_id, group)?),
            (None, Some(group)) => (group, join_group(&tx, found.torrent_id, group)?),
            (Some(group), Some(own)) => {
                if group != own {
                    tracing::debug!(
                        torrent_id,
                        group,
                        own,
                        "Near-duplicate already clustered elsewhere, leaving groups apart"
                    );
                }
                (own, false)
            }
            (None, None) => {
                let fingerprint = match found.kind {
                    DuplicateKind::Probable => file_tree_hash(&candidate.files),
                    _ => tx
                        .query_row(
                            "SELECT file_tree_hash FROM torrents WHERE id = ?",
                            [found.torrent_id],
                            |row| row.get(0),
                        )
                        .optional()?
                        .flatten(),
                };
                let id = create_group(&tx, &found.info_hash, fingerprint.as_deref())?;
                join_group(&tx, found.torrent_id, id)?;
                (id, join_group(&tx, torrent_id, id)?)
            }
        };
        tx.commit()?;

        if joined {
            metrics::counter!("dedupe_groups_joined_total").increment(1);
            tracing::info!(
                info_hash = %candidate.info_hash,
                canonical = %found.info_hash,
                group_id,
                kind = ?found.kind,
                reason = %found.reason,
                "Clustered near-duplicate"
            );
        }
        Ok(group_id)
    }
}

fn existing_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ExistingTorrent> {
    Ok(ExistingTorrent {
        id: row.get(0)?,
        info_hash: row.get(1)?,
        name: row.get(2)?,
        group_id: row.get(3)?,
    })
}

fn create_group(conn: &Connection, canonical: &str, fingerprint: Option<&str>) -> Result<i64> {
    conn.execute(
        "INSERT INTO dedup_groups (canonical_info_hash, file_tree_hash, member_count, created_at)
         VALUES (?, ?, 0, ?)",
        params![canonical, fingerprint, unix_now()],
    )?;
    Ok(conn.last_insert_rowid())
}

fn current_group(conn: &Connection, torrent_id: i64) -> Result<Option<i64>> {
    conn.query_row(
        "SELECT dedup_group_id FROM torrents WHERE id = ?",
        [torrent_id],
        |row| row.get(0),
    )
    .optional()?
    .ok_or_else(|| Error::NotFound(format!("torrent {}", torrent_id)))
}

/// Both updates or neither: the caller owns the transaction.
fn join_group(conn: &Connection, torrent_id: i64, group_id: i64) -> Result<bool> {
    let current: Option<Option<i64>> = conn
        .query_row(
            "SELECT dedup_group_id FROM torrents WHERE id = ?",
            [torrent_id],
            |row| row.get(0),
        )
        .optional()?;

    match current {
        None => return Err(Error::NotFound(format!("torrent {}", torrent_id))),
        Some(Some(existing)) if existing == group_id => return Ok(false),
        Some(Some(existing)) => {
            return Err(Error::Validation(format!(
                "torrent {} already belongs to group {}",
                torrent_id, existing
            )));
        }
        Some(None) => {}
    }

    let bumped = conn.execute(
        "UPDATE dedup_groups SET member_count = member_count + 1 WHERE id = ?",
        [group_id],
    )?;
    if bumped == 0 {
        return Err(Error::NotFound(format!("dedup group {}", group_id)));
    }

    conn.execute(
        "UPDATE torrents SET dedup_group_id = ?, updated_at = ? WHERE id = ?",
        params![group_id, unix_now(), torrent_id],
    )?;
    Ok(true)
}

/// Decide whether two release names can be the same release.
///
/// Returns the acceptance reason, or `None` when both declare different
/// quality tiers.
pub fn release_similarity(candidate: &str, existing: &str) -> Option<String> {
    let a = parse_release(candidate);
    let b = parse_release(existing);

    if let (Some(qa), Some(qb)) = (&a.quality, &b.quality)
        && qa != qb
    {
        return None;
    }

    if let (Some(ga), Some(gb)) = (&a.group, &b.group)
        && ga == gb
    {
        return Some(format!("same external id and release group {}", ga));
    }

    let source = match (&a.source, &b.source) {
        (Some(sa), Some(sb)) if sa == sb => format!(", both {}", sa),
        _ => String::new(),
    };
    Some(format!("same external id, accepted by default{}", source))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dedupe::DuplicateDetector;
    use tidepool_core::Category;

    const RELAY: &str = "wss://relay.example.com";

    fn files(entries: &[(&str, u64)]) -> Vec<FileEntry> {
        entries
            .iter()
            .map(|(path, size)| FileEntry {
                path: path.to_string(),
                size: *size,
            })
            .collect()
    }

    fn announcement(info_hash: &str, name: &str, files: Vec<FileEntry>) -> Announcement {
        Announcement {
            event_id: format!("{}{}", info_hash, "0".repeat(24)),
            pubkey: "f".repeat(64),
            created_at: 1_700_000_000,
            info_hash: info_hash.to_string(),
            name: name.to_string(),
            size: files.iter().map(|f| f.size).sum(),
            magnet: String::new(),
            category: Category::MOVIE,
            files,
            tags: Vec::new(),
            trackers: Vec::new(),
            description: None,
            imdb_id: None,
            tmdb_id: None,
        }
    }

    fn setup() -> (NearDuplicateDetector, DuplicateDetector, Arc<Store>) {
        let store = Arc::new(Store::open_in_memory().unwrap());
        (
            NearDuplicateDetector::new(store.clone()),
            DuplicateDetector::new(store.clone()),
            store,
        )
    }

    #[test]
    fn test_exact_beats_probable() {
        let (near, basic, _) = setup();
        let manifest = files(&[("Movie/movie.mkv", 1000)]);

        let original = announcement(&"1".repeat(40), "Movie", manifest.clone());
        let original_id = basic.process(&original, RELAY).unwrap().torrent_id();
        let reencode = announcement(&"2".repeat(40), "Movie", manifest.clone());
        let reencode_id = basic.process(&reencode, RELAY).unwrap().torrent_id();

        let group = near.cluster(reencode_id, &reencode).unwrap().unwrap();
        assert_eq!(near.get_group_members(group).unwrap().len(), 2);

        // Same hash as an indexed torrent and same fingerprint as a group
        let found = near.check_duplicate(&original).unwrap().unwrap();
        assert_eq!(found.kind, DuplicateKind::Exact);
        assert_eq!(found.confidence, 1.0);
        assert_eq!(found.torrent_id, original_id);
        assert_eq!(found.group_id, Some(group));
    }

    #[test]
    fn test_probable_match_by_fingerprint() {
        let (near, basic, _) = setup();
        basic
            .process(
                &announcement(&"1".repeat(40), "Album", files(&[("CD1/01.flac", 10), ("CD1/02.flac", 20)])),
                RELAY,
            )
            .unwrap();

        let candidate = announcement(
            &"2".repeat(40),
            "Album (reupload)",
            files(&[("cd1/02.FLAC", 20), ("cd1/01.flac", 10)]),
        );
        let found = near.check_duplicate(&candidate).unwrap().unwrap();
        assert_eq!(found.kind, DuplicateKind::Probable);
        assert_eq!(found.confidence, 0.95);
        assert_eq!(found.info_hash, "1".repeat(40));

        let different = announcement(&"3".repeat(40), "Other", files(&[("cd1/01.flac", 11)]));
        assert!(near.check_duplicate(&different).unwrap().is_none());
    }

    #[test]
    fn test_semantic_tier_quality_and_group() {
        let (near, basic, _) = setup();
        let mut existing = announcement(
            &"1".repeat(40),
            "Some.Movie.2020.1080p.BluRay.x264-GRP",
            files(&[("a.mkv", 1)]),
        );
        existing.imdb_id = Some("tt1234567".to_string());
        basic.process(&existing, RELAY).unwrap();

        let mut same_group = announcement(
            &"2".repeat(40),
            "Some Movie 2020 1080p WEB-DL-grp",
            files(&[("b.mkv", 2)]),
        );
        same_group.imdb_id = Some("tt1234567".to_string());
        let found = near.check_duplicate(&same_group).unwrap().unwrap();
        assert_eq!(found.kind, DuplicateKind::Semantic);
        assert!(found.reason.contains("GRP"));

        let mut other_quality = same_group.clone();
        other_quality.info_hash = "3".repeat(40);
        other_quality.name = "Some.Movie.2020.2160p.WEB-DL-GRP".to_string();
        assert!(near.check_duplicate(&other_quality).unwrap().is_none());

        let mut no_tokens = same_group.clone();
        no_tokens.info_hash = "4".repeat(40);
        no_tokens.name = "Some Movie".to_string();
        no_tokens.imdb_id = None;
        no_tokens.tmdb_id = Some("movie:99".to_string());
        assert!(near.check_duplicate(&no_tokens).unwrap().is_none());

        no_tokens.imdb_id = Some("tt1234567".to_string());
        let found = near.check_duplicate(&no_tokens).unwrap().unwrap();
        assert_eq!(found.kind, DuplicateKind::Semantic);
        assert_eq!(found.confidence, 0.85);
        assert!(found.reason.contains("accepted by default"));
    }

    #[test]
    fn test_release_similarity() {
        assert!(release_similarity("X.1080p-A", "X.720p-A").is_none());
        assert!(release_similarity("X.1080p-A", "X.1080p-B").is_some());
        assert!(release_similarity("X 4K-A", "X 2160p-a").unwrap().contains("release group A"));
        assert!(release_similarity("Plain", "Names").is_some());
    }

    #[test]
    fn test_add_to_group_is_atomic() {
        let (near, basic, _) = setup();
        let id = basic
            .process(&announcement(&"1".repeat(40), "A", Vec::new()), RELAY)
            .unwrap()
            .torrent_id();

        let group = near.create_dedup_group(&"1".repeat(40), None).unwrap();
        assert!(near.add_to_group(id, group).unwrap());
        assert!(!near.add_to_group(id, group).unwrap());
        assert_eq!(near.get_group(group).unwrap().unwrap().member_count, 1);

        // Missing group: torrent pointer must not move
        let other = basic
            .process(&announcement(&"2".repeat(40), "B", Vec::new()), RELAY)
            .unwrap()
            .torrent_id();
        assert!(matches!(near.add_to_group(other, 9999), Err(Error::NotFound(_))));
        assert!(near.get_group_members(group).unwrap().iter().all(|m| m.torrent_id != other));

        let second = near.create_dedup_group(&"2".repeat(40), None).unwrap();
        assert!(matches!(near.add_to_group(id, second), Err(Error::Validation(_))));
        assert_eq!(near.get_group(second).unwrap().unwrap().member_count, 0);

        assert!(matches!(near.add_to_group(9999, group), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_cluster_joins_existing_group() {
        let (near, basic, _) = setup();
        let manifest = files(&[("show/e01.mkv", 500)]);

        let index = |hash: &str| {
            let ann = announcement(&hash.repeat(40), "Show", manifest.clone());
            let id = basic.process(&ann, RELAY).unwrap().torrent_id();
            near.cluster(id, &ann).unwrap()
        };

        assert_eq!(index("1"), None);
        let group = index("2").unwrap();
        assert_eq!(index("3"), Some(group));

        let g = near.get_group(group).unwrap().unwrap();
        assert_eq!(g.canonical_info_hash, "1".repeat(40));
        assert_eq!(g.member_count, 3);

        let stats = near.get_dedup_stats().unwrap();
        assert_eq!(stats.group_count, 1);
        assert_eq!(stats.total_members, 3);
        assert_eq!(stats.max_group_size, 3);
        assert_eq!(stats.avg_group_size, 3.0);
    }

    #[test]
    fn test_cluster_rereads_group_after_lookup() {
        let (near, basic, _) = setup();
        let manifest = files(&[("release/video.mkv", 700)]);
        let index = |hash: &str| {
            let ann = announcement(&hash.repeat(40), "Release", manifest.clone());
            (basic.process(&ann, RELAY).unwrap().torrent_id(), ann)
        };

        let (first_id, _) = index("1");
        let (second_id, second) = index("2");
        let (third_id, third) = index("3");

        // Both lookups see the first torrent ungrouped
        let second_found = near.check_near_duplicate(&second).unwrap().unwrap();
        let third_found = near.check_near_duplicate(&third).unwrap().unwrap();
        assert_eq!(second_found.torrent_id, first_id);
        assert_eq!(third_found.group_id, None);

        let group = near.cluster_with(second_id, &second, &second_found).unwrap();
        assert_eq!(near.cluster_with(third_id, &third, &third_found).unwrap(), group);

        let members: Vec<i64> = near
            .get_group_members(group)
            .unwrap()
            .iter()
            .map(|m| m.torrent_id)
            .collect();
        assert_eq!(members, vec![first_id, second_id, third_id]);
        assert_eq!(near.get_dedup_stats().unwrap().group_count, 1);
        assert_eq!(near.get_group(group).unwrap().unwrap().member_count, 3);
    }

    #[test]
    fn test_cluster_with_grouped_candidate_pulls_in_match() {
        let (near, basic, _) = setup();
        let ann = |hash: &str| announcement(&hash.repeat(40), "Pack", files(&[("pack/a.bin", 9)]));

        let first = ann("1");
        let first_id = basic.process(&first, RELAY).unwrap().torrent_id();
        assert!(near.check_near_duplicate(&first).unwrap().is_none());

        let second = ann("2");
        let second_id = basic.process(&second, RELAY).unwrap().torrent_id();
        let found = near.check_near_duplicate(&first).unwrap().unwrap();
        assert_eq!(found.torrent_id, second_id);

        // The candidate is already a member before its own match is applied
        let group = near.create_dedup_group(&first.info_hash, None).unwrap();
        near.add_to_group(first_id, group).unwrap();

        assert_eq!(near.cluster_with(first_id, &first, &found).unwrap(), group);
        assert_eq!(near.get_group(group).unwrap().unwrap().member_count, 2);
        assert!(
            near.get_group_members(group)
                .unwrap()
                .iter()
                .any(|m| m.torrent_id == second_id)
        );
    }

    #[test]
    fn test_stats_with_no_groups() {
        let (near, _, _) = setup();
        assert_eq!(near.get_dedup_stats().unwrap(), DedupStats::default());
    }
}
