//! Activity log rows.

use rusqlite::params;
use serde::Serialize;

use super::{Store, unix_now};
use crate::Result;

/// One operator-visible activity entry.
#[derive(Debug, Clone, Serialize)]
pub struct ActivityEntry {
    pub id: i64,
    pub event_type: String,
    pub detail: String,
    pub created_at: i64,
}

impl Store {
    /// Append an activity entry.
    pub fn append_activity(&self, event_type: &str, detail: &str) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO activity_log (event_type, detail, created_at) VALUES (?, ?, ?)",
            params![event_type, detail, unix_now()],
        )?;
        Ok(())
    }

    /// Most recent entries, newest first.
    pub fn recent_activity(&self, limit: usize) -> Result<Vec<ActivityEntry>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, event_type, detail, created_at FROM activity_log
             ORDER BY id DESC LIMIT ?",
        )?;
        let entries = stmt
            .query_map([limit as i64], |row| {
                Ok(ActivityEntry {
                    id: row.get(0)?,
                    event_type: row.get(1)?,
                    detail: row.get(2)?,
                    created_at: row.get(3)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recent_activity_newest_first() {
        let store = Store::open_in_memory().unwrap();
        store.append_activity("indexer_started", "3 relays").unwrap();
        store.append_activity("indexer_stopped", "").unwrap();

        let entries = store.recent_activity(10).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].event_type, "indexer_stopped");
        assert_eq!(entries[1].detail, "3 relays");

        assert_eq!(store.recent_activity(1).unwrap().len(), 1);
    }
}
