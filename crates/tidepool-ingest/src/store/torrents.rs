//! Indexed torrent rows.

use rusqlite::{Connection, OptionalExtension, Row, params};
use serde::Serialize;
use tidepool_core::{Announcement, FileEntry};

use super::{Store, unix_now};
use crate::Result;

/// An indexed torrent as stored.
#[derive(Debug, Clone, Serialize)]
pub struct TorrentRecord {
    pub id: i64,
    pub info_hash: String,
    pub name: String,
    pub size: u64,
    pub category: u32,
    pub magnet: String,
    pub files: Vec<FileEntry>,
    pub file_tree_hash: Option<String>,
    pub tags: Vec<String>,
    pub description: Option<String>,
    pub trust_score: i64,
    pub upload_count: i64,
    pub title: Option<String>,
    pub year: Option<i32>,
    pub imdb_id: Option<String>,
    pub tmdb_id: Option<String>,
    pub poster_url: Option<String>,
    pub backdrop_url: Option<String>,
    pub overview: Option<String>,
    pub dedup_group_id: Option<i64>,
    pub first_seen_at: i64,
    pub updated_at: i64,
}

const TORRENT_COLUMNS: &str = "id, info_hash, name, size, category, magnet, files, file_tree_hash, \
     tags, description, trust_score, upload_count, title, year, imdb_id, tmdb_id, poster_url, \
     backdrop_url, overview, dedup_group_id, first_seen_at, updated_at";

impl TorrentRecord {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let files: String = row.get(6)?;
        let tags: String = row.get(8)?;
        Ok(Self {
            id: row.get(0)?,
            info_hash: row.get(1)?,
            name: row.get(2)?,
            size: row.get::<_, i64>(3)?.max(0) as u64,
            category: row.get(4)?,
            magnet: row.get(5)?,
            files: serde_json::from_str(&files).unwrap_or_default(),
            file_tree_hash: row.get(7)?,
            tags: serde_json::from_str(&tags).unwrap_or_default(),
            description: row.get(9)?,
            trust_score: row.get(10)?,
            upload_count: row.get(11)?,
            title: row.get(12)?,
            year: row.get(13)?,
            imdb_id: row.get(14)?,
            tmdb_id: row.get(15)?,
            poster_url: row.get(16)?,
            backdrop_url: row.get(17)?,
            overview: row.get(18)?,
            dedup_group_id: row.get(19)?,
            first_seen_at: row.get(20)?,
            updated_at: row.get(21)?,
        })
    }
}

/// Metadata written back by an enrichment collaborator.
#[derive(Debug, Clone, Default)]
pub struct Enrichment {
    pub title: Option<String>,
    pub year: Option<i32>,
    pub imdb_id: Option<String>,
    pub tmdb_id: Option<String>,
    pub poster_url: Option<String>,
    pub backdrop_url: Option<String>,
    pub overview: Option<String>,
}

/// Insert a torrent for `ann` unless its info hash is already indexed.
///
/// Returns the row id and whether this call inserted it. Runs on any
/// connection or transaction; the read fallback sees the row that won the
/// conflict.
pub fn insert_or_get_torrent(
    conn: &Connection,
    ann: &Announcement,
    file_tree_hash: Option<&str>,
    initial_trust: i64,
    now: i64,
) -> Result<(i64, bool)> {
    let files = serde_json::to_string(&ann.files).unwrap_or_else(|_| "[]".to_string());
    let tags = serde_json::to_string(&ann.tags).unwrap_or_else(|_| "[]".to_string());

    let inserted: Option<i64> = conn
        .query_row(
            "INSERT INTO torrents (
                info_hash, name, size, category, magnet, files, file_tree_hash, tags,
                description, imdb_id, tmdb_id, trust_score, upload_count,
                first_seen_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, 1, ?13, ?13)
            ON CONFLICT(info_hash) DO NOTHING
            RETURNING id",
            params![
                ann.info_hash,
                ann.name,
                ann.size as i64,
                ann.category.code,
                ann.magnet,
                files,
                file_tree_hash,
                tags,
                ann.description,
                ann.imdb_id,
                ann.tmdb_id,
                initial_trust,
                now,
            ],
            |row| row.get(0),
        )
        .optional()?;

    if let Some(id) = inserted {
        return Ok((id, true));
    }

    let id = conn.query_row(
        "SELECT id FROM torrents WHERE info_hash = ?",
        [&ann.info_hash],
        |row| row.get(0),
    )?;
    Ok((id, false))
}

impl Store {
    /// Get a torrent by row id.
    pub fn get_torrent(&self, id: i64) -> Result<Option<TorrentRecord>> {
        let conn = self.conn();
        let sql = format!("SELECT {} FROM torrents WHERE id = ?", TORRENT_COLUMNS);
        Ok(conn
            .query_row(&sql, [id], TorrentRecord::from_row)
            .optional()?)
    }

    /// Get a torrent by info hash (case-insensitive).
    pub fn get_torrent_by_hash(&self, info_hash: &str) -> Result<Option<TorrentRecord>> {
        let conn = self.conn();
        let sql = format!("SELECT {} FROM torrents WHERE info_hash = ?", TORRENT_COLUMNS);
        Ok(conn
            .query_row(&sql, [info_hash.to_ascii_lowercase()], TorrentRecord::from_row)
            .optional()?)
    }

    /// Number of indexed torrents.
    pub fn torrent_count(&self) -> Result<u64> {
        let conn = self.conn();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM torrents", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    /// Info hashes of torrents that still lack an enrichment title, oldest first.
    pub fn torrents_missing_title(&self, limit: usize) -> Result<Vec<String>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT info_hash FROM torrents
             WHERE title IS NULL
             ORDER BY first_seen_at ASC, id ASC
             LIMIT ?",
        )?;
        let hashes = stmt
            .query_map([limit as i64], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(hashes)
    }

    /// Write enrichment metadata back to a torrent.
    ///
    /// Fields left `None` keep their stored value. Returns false if no torrent
    /// has this info hash.
    pub fn apply_enrichment(&self, info_hash: &str, enrichment: &Enrichment) -> Result<bool> {
        let conn = self.conn();
        let updated = conn.execute(
            "UPDATE torrents SET
                title = COALESCE(?2, title),
                year = COALESCE(?3, year),
                imdb_id = COALESCE(imdb_id, ?4),
                tmdb_id = COALESCE(tmdb_id, ?5),
                poster_url = COALESCE(?6, poster_url),
                backdrop_url = COALESCE(?7, backdrop_url),
                overview = COALESCE(?8, overview),
                updated_at = ?9
             WHERE info_hash = ?1",
            params![
                info_hash.to_ascii_lowercase(),
                enrichment.title,
                enrichment.year,
                enrichment.imdb_id,
                enrichment.tmdb_id,
                enrichment.poster_url,
                enrichment.backdrop_url,
                enrichment.overview,
                unix_now(),
            ],
        )?;
        Ok(updated > 0)
    }

    /// Full-text search over torrent names, best trust score first.
    pub fn search_torrents(&self, query: &str, limit: usize) -> Result<Vec<TorrentRecord>> {
        let match_expr = fts_query(query);
        if match_expr.is_empty() {
            return Ok(Vec::new());
        }

        let conn = self.conn();
        let sql = format!(
            "SELECT {} FROM torrents
             WHERE id IN (SELECT rowid FROM torrents_fts WHERE torrents_fts MATCH ?1)
             ORDER BY trust_score DESC, first_seen_at DESC
             LIMIT ?2",
            TORRENT_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![match_expr, limit as i64], TorrentRecord::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }
}

/// Turn free text into an FTS5 expression of quoted prefix terms.
fn fts_query(query: &str) -> String {
    query
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| format!("\"{}\"*", t.to_lowercase()))
        .collect::<Vec<_>>()
        .join(" ")
}
