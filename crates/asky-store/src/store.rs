use std::path::Path;
use std::sync::Mutex;

use rusqlite::Connection;

use crate::db::init_db;
use crate::error::Result;

/// Thread-safe unified store for messages, sessions, and user memories.
///
/// Wraps a single SQLite connection in a `Mutex`: writes serialize on the
/// lock, each transactional operation (interaction save, session
/// compaction, cascaded delete) commits atomically.
pub struct HistoryStore {
    pub(crate) db: Mutex<Connection>,
}

impl HistoryStore {
    /// Open (or create) the store at `path` and run idempotent schema init.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        init_db(&conn)?;
        Ok(Self { db: Mutex::new(conn) })
    }

    /// In-memory store for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        init_db(&conn)?;
        Ok(Self { db: Mutex::new(conn) })
    }

    pub(crate) fn now() -> String {
        chrono::Utc::now().to_rfc3339()
    }
}
