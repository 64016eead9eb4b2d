//! Relay registrations.

use rusqlite::{OptionalExtension, Row, params};
use serde::Serialize;

use super::schema::RelayStatus;
use super::{Store, unix_now};
use crate::Result;

/// A configured or discovered relay endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct RelayRegistration {
    pub url: String,
    pub label: Option<String>,
    pub preset: String,
    pub enabled: bool,
    pub status: RelayStatus,
    pub last_connected_at: Option<i64>,
    pub consecutive_failures: u32,
    pub last_error: Option<String>,
}

impl RelayRegistration {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let status: String = row.get(4)?;
        Ok(Self {
            url: row.get(0)?,
            label: row.get(1)?,
            preset: row.get(2)?,
            enabled: row.get(3)?,
            status: status.parse().unwrap_or_default(),
            last_connected_at: row.get(5)?,
            consecutive_failures: row.get(6)?,
            last_error: row.get(7)?,
        })
    }
}

const RELAY_COLUMNS: &str =
    "url, label, preset, enabled, status, last_connected_at, consecutive_failures, last_error";

impl Store {
    /// Register a relay URL (already normalized). Existing rows are left as is.
    ///
    /// Returns true if the relay was newly registered.
    pub fn register_relay(&self, url: &str, label: Option<&str>, preset: &str) -> Result<bool> {
        let conn = self.conn();
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO relays (url, label, preset, status, first_seen_at)
             VALUES (?, ?, ?, ?, ?)",
            params![url, label, preset, RelayStatus::Disconnected.as_str(), unix_now()],
        )?;
        Ok(inserted > 0)
    }

    /// Remove a relay registration. Returns true if it existed.
    pub fn unregister_relay(&self, url: &str) -> Result<bool> {
        let conn = self.conn();
        Ok(conn.execute("DELETE FROM relays WHERE url = ?", [url])? > 0)
    }

    /// Enable or disable a relay.
    pub fn set_relay_enabled(&self, url: &str, enabled: bool) -> Result<bool> {
        let conn = self.conn();
        let updated = conn.execute(
            "UPDATE relays SET enabled = ? WHERE url = ?",
            params![enabled, url],
        )?;
        Ok(updated > 0)
    }

    /// Record a relay status change.
    ///
    /// A transition to `Connected` stamps `last_connected_at` and clears the
    /// failure streak; `Error` extends it.
    pub fn update_relay_status(
        &self,
        url: &str,
        status: RelayStatus,
        error: Option<&str>,
    ) -> Result<()> {
        let now = unix_now();
        let conn = self.conn();

        match status {
            RelayStatus::Connected => conn.execute(
                "UPDATE relays SET status = ?, last_connected_at = ?,
                    consecutive_failures = 0, last_error = NULL
                 WHERE url = ?",
                params![status.as_str(), now, url],
            )?,
            RelayStatus::Error => conn.execute(
                "UPDATE relays SET status = ?, last_error = ?,
                    consecutive_failures = consecutive_failures + 1
                 WHERE url = ?",
                params![status.as_str(), error, url],
            )?,
            _ => conn.execute(
                "UPDATE relays SET status = ? WHERE url = ?",
                params![status.as_str(), url],
            )?,
        };

        Ok(())
    }

    /// Get one registration.
    pub fn get_relay(&self, url: &str) -> Result<Option<RelayRegistration>> {
        let conn = self.conn();
        let sql = format!("SELECT {} FROM relays WHERE url = ?", RELAY_COLUMNS);
        Ok(conn
            .query_row(&sql, [url], RelayRegistration::from_row)
            .optional()?)
    }

    /// List registrations, optionally only enabled ones.
    pub fn list_relays(&self, enabled_only: bool) -> Result<Vec<RelayRegistration>> {
        let conn = self.conn();
        let sql = format!(
            "SELECT {} FROM relays WHERE (?1 = 0 OR enabled = 1) ORDER BY first_seen_at, url",
            RELAY_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let relays = stmt
            .query_map([enabled_only], RelayRegistration::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(relays)
    }
}
