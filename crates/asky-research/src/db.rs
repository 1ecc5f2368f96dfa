use rusqlite::Connection;
use tracing::warn;

use crate::error::Result;

pub const CHUNK_FTS_TABLE: &str = "content_chunks_fts";

/// Initialise research cache tables. Safe to call on every startup.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS research_cache (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            url             TEXT UNIQUE NOT NULL,
            url_hash        TEXT NOT NULL,
            content         TEXT,
            title           TEXT,
            summary         TEXT,
            summary_status  TEXT DEFAULT 'pending',
            links_json      TEXT,
            fetch_timestamp TEXT NOT NULL,
            expires_at      TEXT NOT NULL,
            content_hash    TEXT,
            created_at      TEXT NOT NULL,
            updated_at      TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_research_cache_url_hash
            ON research_cache(url_hash);
        CREATE INDEX IF NOT EXISTS idx_research_cache_expires
            ON research_cache(expires_at);

        CREATE TABLE IF NOT EXISTS content_chunks (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            cache_id        INTEGER NOT NULL,
            chunk_index     INTEGER NOT NULL,
            chunk_text      TEXT NOT NULL,
            embedding       BLOB,
            embedding_model TEXT,
            created_at      TEXT NOT NULL,
            FOREIGN KEY (cache_id) REFERENCES research_cache(id) ON DELETE CASCADE,
            UNIQUE(cache_id, chunk_index)
        );
        CREATE INDEX IF NOT EXISTS idx_chunks_cache_id
            ON content_chunks(cache_id);

        CREATE TABLE IF NOT EXISTS link_embeddings (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            cache_id        INTEGER NOT NULL,
            link_text       TEXT NOT NULL,
            link_url        TEXT NOT NULL,
            embedding       BLOB,
            embedding_model TEXT,
            created_at      TEXT NOT NULL,
            FOREIGN KEY (cache_id) REFERENCES research_cache(id) ON DELETE CASCADE,
            UNIQUE(cache_id, link_url)
        );
        CREATE INDEX IF NOT EXISTS idx_link_embeddings_cache_id
            ON link_embeddings(cache_id);

        CREATE TABLE IF NOT EXISTS research_findings (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            finding_text    TEXT NOT NULL,
            source_url      TEXT,
            source_title    TEXT,
            tags            TEXT,
            embedding       BLOB,
            embedding_model TEXT,
            created_at      TEXT NOT NULL,
            session_id      TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_findings_created
            ON research_findings(created_at);",
    )
    .map_err(crate::error::ResearchError::Database)?;

    // Older databases predate the model tag on link vectors.
    ensure_column(conn, "link_embeddings", "embedding_model", "TEXT")?;

    init_chunk_fts(conn);
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

/// External-content FTS5 index over chunk text plus sync triggers.
/// FTS5 may be unavailable in stripped-down builds; BM25 lexical search is
/// then disabled and the token-overlap fallback takes over.
fn init_chunk_fts(conn: &Connection) {
    let result = conn.execute_batch(&format!(
        "CREATE VIRTUAL TABLE IF NOT EXISTS {CHUNK_FTS_TABLE}
            USING fts5(chunk_text, content='content_chunks', content_rowid='id');
        CREATE TRIGGER IF NOT EXISTS content_chunks_ai
            AFTER INSERT ON content_chunks
        BEGIN
            INSERT INTO {CHUNK_FTS_TABLE}(rowid, chunk_text)
            VALUES (new.id, new.chunk_text);
        END;
        CREATE TRIGGER IF NOT EXISTS content_chunks_ad
            AFTER DELETE ON content_chunks
        BEGIN
            INSERT INTO {CHUNK_FTS_TABLE}({CHUNK_FTS_TABLE}, rowid, chunk_text)
            VALUES('delete', old.id, old.chunk_text);
        END;
        CREATE TRIGGER IF NOT EXISTS content_chunks_au
            AFTER UPDATE ON content_chunks
        BEGIN
            INSERT INTO {CHUNK_FTS_TABLE}({CHUNK_FTS_TABLE}, rowid, chunk_text)
            VALUES('delete', old.id, old.chunk_text);
            INSERT INTO {CHUNK_FTS_TABLE}(rowid, chunk_text)
            VALUES (new.id, new.chunk_text);
        END;
        INSERT INTO {CHUNK_FTS_TABLE}({CHUNK_FTS_TABLE}) VALUES('rebuild');"
    ));
    if let Err(e) = result {
        warn!(error = %e, "FTS5 unavailable, BM25 lexical search disabled");
    }
}

/// Whether the chunk FTS table exists in this database.
pub fn chunk_fts_available(conn: &Connection) -> bool {
    conn.query_row(
        "SELECT 1 FROM sqlite_master WHERE type IN ('table','view') AND name = ?1 LIMIT 1",
        [CHUNK_FTS_TABLE],
        |_| Ok(()),
    )
    .is_ok()
}
