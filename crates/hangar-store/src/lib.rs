//! hangar-store: embedded SQLite persistence for the hangar server.
//!
//! The store is the sole writer of persisted rows; every other component
//! reads and mutates through it. One connection guarded by a mutex — SQLite
//! serializes writers anyway, and contention here is low relative to PTY
//! I/O.

pub mod agents;
pub mod errors;
pub mod jobs;
pub mod migrations;
pub mod notifications;
pub mod repositories;
pub mod sessions;
pub mod slack;
pub mod workers;
pub mod worktrees;

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use rusqlite::Connection;
use tracing::info;

pub use errors::StoreError;
pub use slack::SlackConfig;

/// Handle to the embedded database. Cheap to clone.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Open (or create) the database at `path` and run pending migrations.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::Migration(format!("create store dir: {}", e)))?;
        }
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.pragma_update(None, "busy_timeout", 5000)?;
        migrations::migrate(&conn)?;
        info!(event = "store.open_completed", path = %path.display());
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// In-memory store for tests.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        migrations::migrate(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub(crate) fn conn(&self) -> MutexGuard<'_, Connection> {
        match self.conn.lock() {
            Ok(guard) => guard,
            // A poisoned connection mutex means a row-mapping panic mid-read;
            // the connection itself is still usable.
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

pub(crate) fn opt_u32(value: Option<i64>) -> Option<u32> {
    value.and_then(|v| u32::try_from(v).ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("store.db");
        let _store = Store::open(&path).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_clone_shares_connection() {
        let store = Store::open_in_memory().unwrap();
        let clone = store.clone();
        store
            .conn()
            .execute("CREATE TABLE t (x INTEGER)", [])
            .unwrap();
        clone.conn().execute("INSERT INTO t VALUES (1)", []).unwrap();
        let n: i64 = store
            .conn()
            .query_row("SELECT COUNT(*) FROM t", [], |r| r.get(0))
            .unwrap();
        assert_eq!(n, 1);
    }
}
