use rusqlite::Connection;

use crate::error::Result;

/// Initialise message/session/memory tables. Safe to call on every startup.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS messages (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            timestamp   TEXT NOT NULL,
            session_id  INTEGER,
            role        TEXT,
            content     TEXT NOT NULL,
            summary     TEXT,
            model       TEXT NOT NULL DEFAULT '',
            token_count INTEGER,
            FOREIGN KEY (session_id) REFERENCES sessions(id)
        );
        CREATE INDEX IF NOT EXISTS idx_messages_session
            ON messages(session_id, id);

        CREATE TABLE IF NOT EXISTS sessions (
            id                  INTEGER PRIMARY KEY AUTOINCREMENT,
            name                TEXT,
            model               TEXT,
            created_at          TEXT,
            compacted_summary   TEXT
        );

        CREATE TABLE IF NOT EXISTS user_memories (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            content         TEXT NOT NULL,
            category        TEXT,
            embedding       BLOB,
            embedding_model TEXT,
            created_at      TEXT NOT NULL
        );",
    )
    .map_err(crate::error::StoreError::Database)?;

    // Additive migrations: older databases predate these columns.
    ensure_column(conn, "sessions", "memory_auto_extract", "INTEGER DEFAULT 0")?;
    ensure_column(conn, "sessions", "max_turns", "INTEGER")?;
    ensure_column(conn, "sessions", "last_used_at", "TEXT")?;
    ensure_column(conn, "user_memories", "session_id", "INTEGER")?;

    Ok(())
}

/// Add a missing column for backward-compatible schema evolution.
fn ensure_column(conn: &Connection, table: &str, column: &str, sql_type: &str) -> Result<()> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
    let existing: Vec<String> = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .filter_map(|r| r.ok())
        .collect();
    if existing.iter().any(|c| c == column) {
        return Ok(());
    }
    conn.execute_batch(&format!("ALTER TABLE {table} ADD COLUMN {column} {sql_type}"))?;
    Ok(())
}
