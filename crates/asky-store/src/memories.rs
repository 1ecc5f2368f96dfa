//! Persistent user-memory facts with optional session scoping and
//! embedding blobs for semantic recall.

use tracing::debug;

use crate::error::Result;
use crate::store::HistoryStore;
use crate::types::UserMemory;

impl HistoryStore {
    /// Persist a user memory. `session_id = None` stores a global fact.
    pub fn save_user_memory(
        &self,
        content: &str,
        category: Option<&str>,
        session_id: Option<i64>,
        embedding: Option<&[u8]>,
        embedding_model: Option<&str>,
    ) -> Result<i64> {
        let db = self.db.lock().expect("store lock poisoned");
        db.execute(
            "INSERT INTO user_memories (content, category, embedding, embedding_model, created_at, session_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![content, category, embedding, embedding_model, Self::now(), session_id],
        )?;
        let id = db.last_insert_rowid();
        debug!(memory_id = id, session_id, "user memory saved");
        Ok(id)
    }

    /// Recent memories, optionally restricted to one session scope.
    pub fn list_user_memories(
        &self,
        limit: usize,
        session_id: Option<i64>,
    ) -> Result<Vec<UserMemory>> {
        let db = self.db.lock().expect("store lock poisoned");
        let map_row = |row: &rusqlite::Row<'_>| -> rusqlite::Result<UserMemory> {
            Ok(UserMemory {
                id: row.get(0)?,
                content: row.get(1)?,
                category: row.get(2)?,
                embedding_model: row.get(3)?,
                created_at: row.get(4)?,
                session_id: row.get(5)?,
            })
        };
        let memories = if let Some(sid) = session_id {
            let mut stmt = db.prepare(
                "SELECT id, content, category, embedding_model, created_at, session_id
                 FROM user_memories WHERE session_id = ?1
                 ORDER BY created_at DESC LIMIT ?2",
            )?;
            let rows: Vec<UserMemory> = stmt
                .query_map(rusqlite::params![sid, limit as i64], map_row)?
                .filter_map(|r| r.ok())
                .collect();
            rows
        } else {
            let mut stmt = db.prepare(
                "SELECT id, content, category, embedding_model, created_at, session_id
                 FROM user_memories
                 ORDER BY created_at DESC LIMIT ?1",
            )?;
            let rows: Vec<UserMemory> = stmt
                .query_map([limit as i64], map_row)?
                .filter_map(|r| r.ok())
                .collect();
            rows
        };
        Ok(memories)
    }

    /// Memories that carry an embedding, as (row, blob) pairs for cosine
    /// recall. Global memories are always included; session-scoped ones
    /// only when `session_id` matches.
    pub fn user_memories_with_embeddings(
        &self,
        session_id: Option<i64>,
    ) -> Result<Vec<(UserMemory, Vec<u8>)>> {
        let db = self.db.lock().expect("store lock poisoned");
        let mut stmt = db.prepare(
            "SELECT id, content, category, embedding_model, created_at, session_id, embedding
             FROM user_memories WHERE embedding IS NOT NULL",
        )?;
        let rows: Vec<(UserMemory, Vec<u8>)> = stmt
            .query_map([], |row| {
                Ok((
                    UserMemory {
                        id: row.get(0)?,
                        content: row.get(1)?,
                        category: row.get(2)?,
                        embedding_model: row.get(3)?,
                        created_at: row.get(4)?,
                        session_id: row.get(5)?,
                    },
                    row.get::<_, Vec<u8>>(6)?,
                ))
            })?
            .filter_map(|r| r.ok())
            .filter(|(memory, _)| match memory.session_id {
                None => true,
                Some(sid) => session_id == Some(sid),
            })
            .collect();
        Ok(rows)
    }

    pub fn delete_user_memory(&self, memory_id: i64) -> Result<bool> {
        let db = self.db.lock().expect("store lock poisoned");
        let deleted = db.execute("DELETE FROM user_memories WHERE id = ?1", [memory_id])?;
        Ok(deleted > 0)
    }
}
