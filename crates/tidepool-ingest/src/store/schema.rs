//! SQLite schema for the torrent index.
//!
//! Defines the tables and provides migration utilities. The full-text index
//! over torrent names (`torrents_fts`) is kept in sync by triggers and is
//! consumed by the search layer.

use rusqlite::{Connection, Result};

type Migration = fn(&Connection) -> Result<()>;

/// Ordered migrations. The database's `user_version` pragma counts how many
/// have been applied.
const MIGRATIONS: &[Migration] = &[create_tables, create_search_index_and_backfill];

/// Schema version of a fully migrated database.
pub const SCHEMA_VERSION: i64 = MIGRATIONS.len() as i64;

/// Bring the database up to [`SCHEMA_VERSION`], applying each pending
/// migration in its own transaction.
pub fn init_schema(conn: &Connection) -> Result<()> {
    let applied: i64 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;

    for (version, migration) in (1i64..).zip(MIGRATIONS).skip(applied.max(0) as usize) {
        let tx = conn.unchecked_transaction()?;
        migration(&tx)?;
        tx.pragma_update(None, "user_version", version)?;
        tx.commit()?;
        tracing::debug!(version, "Applied schema migration");
    }

    Ok(())
}

/// Version 1: core tables and lookup indexes.
fn create_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        -- One row per distinct info hash
        CREATE TABLE IF NOT EXISTS torrents (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            info_hash TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            size INTEGER NOT NULL DEFAULT 0,
            category INTEGER NOT NULL DEFAULT 8000,
            magnet TEXT NOT NULL,
            files TEXT NOT NULL DEFAULT '[]',
            file_tree_hash TEXT,
            tags TEXT NOT NULL DEFAULT '[]',
            description TEXT,
            trust_score INTEGER NOT NULL DEFAULT 0,
            upload_count INTEGER NOT NULL DEFAULT 0,
            title TEXT,
            year INTEGER,
            imdb_id TEXT,
            tmdb_id TEXT,
            poster_url TEXT,
            backdrop_url TEXT,
            overview TEXT,
            dedup_group_id INTEGER,
            first_seen_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );

        -- Provenance ledger: one row per (torrent, announcement)
        CREATE TABLE IF NOT EXISTS uploads (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            torrent_id INTEGER NOT NULL,
            event_id TEXT NOT NULL,
            pubkey TEXT NOT NULL,
            relay_url TEXT,
            created_at INTEGER NOT NULL,
            seen_at INTEGER NOT NULL,
            UNIQUE (torrent_id, event_id)
        );

        CREATE TABLE IF NOT EXISTS dedup_groups (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            canonical_info_hash TEXT NOT NULL,
            file_tree_hash TEXT,
            member_count INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS relays (
            url TEXT PRIMARY KEY,
            label TEXT,
            preset TEXT NOT NULL DEFAULT 'custom',
            enabled INTEGER NOT NULL DEFAULT 1,
            status TEXT NOT NULL DEFAULT 'disconnected',
            last_connected_at INTEGER,
            consecutive_failures INTEGER NOT NULL DEFAULT 0,
            last_error TEXT,
            first_seen_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS trust_whitelist (
            pubkey TEXT PRIMARY KEY,
            note TEXT,
            added_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS trust_blacklist (
            pubkey TEXT PRIMARY KEY,
            reason TEXT,
            added_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS trust_follows (
            follower TEXT NOT NULL,
            followed TEXT NOT NULL,
            depth INTEGER NOT NULL DEFAULT 1,
            added_at INTEGER NOT NULL,
            PRIMARY KEY (follower, followed)
        );

        CREATE TABLE IF NOT EXISTS activity_log (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            event_type TEXT NOT NULL,
            detail TEXT NOT NULL,
            created_at INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_torrents_file_tree ON torrents(file_tree_hash);
        CREATE INDEX IF NOT EXISTS idx_torrents_imdb ON torrents(imdb_id);
        CREATE INDEX IF NOT EXISTS idx_torrents_tmdb ON torrents(tmdb_id);
        CREATE INDEX IF NOT EXISTS idx_torrents_group ON torrents(dedup_group_id);
        CREATE INDEX IF NOT EXISTS idx_torrents_missing_title ON torrents(title) WHERE title IS NULL;
        CREATE INDEX IF NOT EXISTS idx_uploads_torrent ON uploads(torrent_id);
        CREATE INDEX IF NOT EXISTS idx_uploads_pubkey ON uploads(pubkey);
        CREATE INDEX IF NOT EXISTS idx_dedup_groups_tree ON dedup_groups(file_tree_hash);
        CREATE INDEX IF NOT EXISTS idx_trust_follows_follower ON trust_follows(follower);
        "#,
    )
}

/// Version 2: full-text index over torrent names, synced by triggers and
/// backfilled from rows written under version 1.
fn create_search_index_and_backfill(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE VIRTUAL TABLE IF NOT EXISTS torrents_fts USING fts5(
            name,
            content = 'torrents',
            content_rowid = 'id'
        );

        CREATE TRIGGER IF NOT EXISTS torrents_fts_insert AFTER INSERT ON torrents BEGIN
            INSERT INTO torrents_fts (rowid, name) VALUES (new.id, new.name);
        END;

        CREATE TRIGGER IF NOT EXISTS torrents_fts_delete AFTER DELETE ON torrents BEGIN
            INSERT INTO torrents_fts (torrents_fts, rowid, name) VALUES ('delete', old.id, old.name);
        END;

        CREATE TRIGGER IF NOT EXISTS torrents_fts_update AFTER UPDATE OF name ON torrents BEGIN
            INSERT INTO torrents_fts (torrents_fts, rowid, name) VALUES ('delete', old.id, old.name);
            INSERT INTO torrents_fts (rowid, name) VALUES (new.id, new.name);
        END;

        INSERT INTO torrents_fts (torrents_fts) VALUES ('rebuild');
        "#,
    )
}

/// Last-known relay connection status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RelayStatus {
    Connected,
    Connecting,
    #[default]
    Disconnected,
    Error,
}

impl RelayStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connected => "connected",
            Self::Connecting => "connecting",
            Self::Disconnected => "disconnected",
            Self::Error => "error",
        }
    }
}

impl std::str::FromStr for RelayStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        [Self::Connected, Self::Connecting, Self::Disconnected, Self::Error]
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("unknown relay status '{}'", s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user_version(conn: &Connection) -> i64 {
        conn.pragma_query_value(None, "user_version", |row| row.get(0))
            .unwrap()
    }

    #[test]
    fn test_fresh_database_gets_every_table() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        assert_eq!(user_version(&conn), SCHEMA_VERSION);

        let mut stmt = conn
            .prepare("SELECT count(*) FROM sqlite_master WHERE type = 'table' AND name = ?")
            .unwrap();
        for table in [
            "torrents",
            "uploads",
            "dedup_groups",
            "relays",
            "trust_whitelist",
            "trust_blacklist",
            "trust_follows",
            "activity_log",
            "torrents_fts",
        ] {
            let n: i64 = stmt.query_row([table], |row| row.get(0)).unwrap();
            assert_eq!(n, 1, "missing {}", table);
        }
    }

    #[test]
    fn test_rerun_is_a_noop() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        init_schema(&conn).unwrap();
        assert_eq!(user_version(&conn), SCHEMA_VERSION);
    }

    #[test]
    fn test_version_one_database_is_backfilled() {
        let conn = Connection::open_in_memory().unwrap();
        create_tables(&conn).unwrap();
        conn.pragma_update(None, "user_version", 1).unwrap();
        conn.execute(
            "INSERT INTO torrents (info_hash, name, magnet, first_seen_at, updated_at)
             VALUES ('aa', 'Sintel 2010', 'magnet:?', 0, 0)",
            [],
        )
        .unwrap();

        init_schema(&conn).unwrap();

        let hits: i64 = conn
            .query_row(
                "SELECT count(*) FROM torrents_fts WHERE torrents_fts MATCH 'sintel'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(hits, 1);
    }

    #[test]
    fn test_relay_status_parse() {
        for status in [
            RelayStatus::Connected,
            RelayStatus::Connecting,
            RelayStatus::Disconnected,
            RelayStatus::Error,
        ] {
            assert_eq!(status.as_str().parse::<RelayStatus>(), Ok(status));
        }
        assert!("offline".parse::<RelayStatus>().is_err());
    }
}
