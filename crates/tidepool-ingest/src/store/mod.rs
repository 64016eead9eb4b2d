//! Persistent store for the torrent index.
//!
//! A single SQLite connection guarded by a mutex, shared by every component
//! through `Arc<Store>`. All writes go through narrow, idempotent statements:
//! conditional insert by info hash, insert-or-ignore by event id, and
//! increment-by-delta updates.

mod activity;
mod relays;
pub mod schema;
mod torrents;
mod trust;

use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::{Mutex, MutexGuard};
use rusqlite::Connection;
use tracing::info;

use crate::Result;

pub use activity::ActivityEntry;
pub use relays::RelayRegistration;
pub use schema::RelayStatus;
pub use torrents::{Enrichment, TorrentRecord, insert_or_get_torrent};

/// Handle to the SQLite database.
pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    /// Open or create a store at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        info!("Opening store at {}", path.display());
        let conn = Connection::open(path)?;

        // WAL lets the search layer read while ingestion writes
        conn.execute_batch(
            "PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL; PRAGMA busy_timeout=5000;",
        )?;

        schema::init_schema(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory store (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        schema::init_schema(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Lock the connection.
    ///
    /// Callers open a transaction on the guard for multi-statement updates.
    pub fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock()
    }
}

/// Current Unix time in seconds.
pub(crate) fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
