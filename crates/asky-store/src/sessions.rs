//! Session rows and their message log: creation, lookup, compaction
//! storage, cascaded deletion, and conversion from plain history.

use tracing::debug;

use crate::error::Result;
use crate::store::HistoryStore;
use crate::types::{DeleteSelector, Session, StoredMessage};

fn row_to_session(row: &rusqlite::Row<'_>) -> rusqlite::Result<Session> {
    Ok(Session {
        id: row.get(0)?,
        name: row.get(1)?,
        model: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
        created_at: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
        compacted_summary: row.get(4)?,
        memory_auto_extract: row.get::<_, Option<i64>>(5)?.unwrap_or(0) != 0,
        max_turns: row.get(6)?,
    })
}

const SESSION_COLUMNS: &str =
    "id, name, model, created_at, compacted_summary, memory_auto_extract, max_turns";

impl HistoryStore {
    /// Create a new session and return its id.
    pub fn create_session(
        &self,
        model: &str,
        name: Option<&str>,
        memory_auto_extract: bool,
        max_turns: Option<i64>,
    ) -> Result<i64> {
        let db = self.db.lock().expect("store lock poisoned");
        let now = Self::now();
        db.execute(
            "INSERT INTO sessions (name, model, created_at, last_used_at, memory_auto_extract, max_turns)
             VALUES (?1, ?2, ?3, ?3, ?4, ?5)",
            rusqlite::params![name, model, now, memory_auto_extract as i64, max_turns],
        )?;
        let id = db.last_insert_rowid();
        debug!(session_id = id, name, "session created");
        Ok(id)
    }

    pub fn get_session_by_id(&self, session_id: i64) -> Result<Option<Session>> {
        let db = self.db.lock().expect("store lock poisoned");
        match db.query_row(
            &format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE id = ?1"),
            [session_id],
            row_to_session,
        ) {
            Ok(s) => Ok(Some(s)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Most recent session with an exact name match.
    pub fn get_session_by_name(&self, name: &str) -> Result<Option<Session>> {
        let db = self.db.lock().expect("store lock poisoned");
        match db.query_row(
            &format!(
                "SELECT {SESSION_COLUMNS} FROM sessions
                 WHERE name = ?1 ORDER BY created_at DESC LIMIT 1"
            ),
            [name],
            row_to_session,
        ) {
            Ok(s) => Ok(Some(s)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// All sessions with an exact name match, newest first.
    pub fn get_sessions_by_name(&self, name: &str) -> Result<Vec<Session>> {
        let db = self.db.lock().expect("store lock poisoned");
        let mut stmt = db.prepare(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions
             WHERE name = ?1 ORDER BY created_at DESC"
        ))?;
        let sessions = stmt
            .query_map([name], row_to_session)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(sessions)
    }

    /// Resolve a resume term: a numeric term matches by id, otherwise all
    /// exact-name matches are returned so callers can reject ambiguity.
    pub fn find_sessions(&self, term: &str) -> Result<Vec<Session>> {
        let trimmed = term.trim();
        if let Ok(id) = trimmed.parse::<i64>() {
            return Ok(self.get_session_by_id(id)?.into_iter().collect());
        }
        self.get_sessions_by_name(trimmed)
    }

    /// Save a message to a session. Returns the message row id.
    pub fn save_message(
        &self,
        session_id: i64,
        role: &str,
        content: &str,
        summary: &str,
        token_count: i64,
    ) -> Result<i64> {
        let db = self.db.lock().expect("store lock poisoned");
        let timestamp = Self::now();
        db.execute(
            "INSERT INTO messages (timestamp, session_id, role, content, summary, model, token_count)
             VALUES (?1, ?2, ?3, ?4, ?5, '', ?6)",
            rusqlite::params![timestamp, session_id, role, content, summary, token_count],
        )?;
        Ok(db.last_insert_rowid())
    }

    /// All raw messages for a session in chronological order. Compaction
    /// never removes rows; callers decide which ones enter the context.
    pub fn get_session_messages(&self, session_id: i64) -> Result<Vec<StoredMessage>> {
        let db = self.db.lock().expect("store lock poisoned");
        let mut stmt = db.prepare(
            "SELECT id, timestamp, session_id, role, content, summary, token_count
             FROM messages WHERE session_id = ?1 ORDER BY timestamp ASC, id ASC",
        )?;
        let messages = stmt
            .query_map([session_id], |row| {
                Ok(StoredMessage {
                    id: row.get(0)?,
                    timestamp: row.get(1)?,
                    session_id: row.get(2)?,
                    role: row.get(3)?,
                    content: row.get(4)?,
                    summary: row.get(5)?,
                    token_count: row.get(6)?,
                })
            })?
            .filter_map(|r| r.ok())
            .collect();
        Ok(messages)
    }

    /// Store the compacted summary on the session row.
    pub fn compact_session(&self, session_id: i64, compacted_summary: &str) -> Result<()> {
        let db = self.db.lock().expect("store lock poisoned");
        db.execute(
            "UPDATE sessions SET compacted_summary = ?1 WHERE id = ?2",
            rusqlite::params![compacted_summary, session_id],
        )?;
        Ok(())
    }

    pub fn list_sessions(&self, limit: usize) -> Result<Vec<Session>> {
        let db = self.db.lock().expect("store lock poisoned");
        let mut stmt = db.prepare(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions
             ORDER BY created_at DESC LIMIT ?1"
        ))?;
        let sessions = stmt
            .query_map([limit as i64], row_to_session)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(sessions)
    }

    pub fn update_session_max_turns(&self, session_id: i64, max_turns: i64) -> Result<()> {
        let db = self.db.lock().expect("store lock poisoned");
        db.execute(
            "UPDATE sessions SET max_turns = ?1 WHERE id = ?2",
            rusqlite::params![max_turns, session_id],
        )?;
        Ok(())
    }

    pub fn set_session_memory_auto_extract(&self, session_id: i64, enabled: bool) -> Result<()> {
        let db = self.db.lock().expect("store lock poisoned");
        db.execute(
            "UPDATE sessions SET memory_auto_extract = ?1 WHERE id = ?2",
            rusqlite::params![enabled as i64, session_id],
        )?;
        Ok(())
    }

    pub fn update_session_last_used(&self, session_id: i64) -> Result<()> {
        let db = self.db.lock().expect("store lock poisoned");
        db.execute(
            "UPDATE sessions SET last_used_at = ?1 WHERE id = ?2",
            rusqlite::params![Self::now(), session_id],
        )?;
        Ok(())
    }

    /// First user message of a session, truncated for display.
    pub fn get_first_message_preview(&self, session_id: i64, max_chars: usize) -> Result<String> {
        let db = self.db.lock().expect("store lock poisoned");
        let content: Option<String> = match db.query_row(
            "SELECT content FROM messages
             WHERE session_id = ?1 AND role = 'user'
             ORDER BY timestamp ASC, id ASC LIMIT 1",
            [session_id],
            |row| row.get(0),
        ) {
            Ok(c) => Some(c),
            Err(rusqlite::Error::QueryReturnedNoRows) => None,
            Err(e) => return Err(e.into()),
        };
        let Some(content) = content else {
            return Ok(String::new());
        };
        if content.chars().count() > max_chars {
            let truncated: String = content.chars().take(max_chars).collect();
            Ok(format!("{truncated}..."))
        } else {
            Ok(content)
        }
    }

    /// Delete sessions and their messages by selector. Returns session
    /// rows deleted.
    pub fn delete_sessions(&self, selector: &DeleteSelector) -> Result<usize> {
        let db = self.db.lock().expect("store lock poisoned");

        let session_ids: Vec<i64> = match selector {
            DeleteSelector::All => {
                let mut stmt = db.prepare("SELECT id FROM sessions")?;
                let ids: Vec<i64> = stmt
                    .query_map([], |row| row.get(0))?
                    .filter_map(|r| r.ok())
                    .collect();
                ids
            }
            DeleteSelector::Ids(ids) => {
                let placeholders = vec!["?"; ids.len()].join(",");
                let mut stmt = db.prepare(&format!(
                    "SELECT id FROM sessions WHERE id IN ({placeholders})"
                ))?;
                let ids: Vec<i64> = stmt
                    .query_map(rusqlite::params_from_iter(ids.iter()), |row| row.get(0))?
                    .filter_map(|r| r.ok())
                    .collect();
                ids
            }
            DeleteSelector::Range(start, end) => {
                let mut stmt = db.prepare("SELECT id FROM sessions WHERE id BETWEEN ?1 AND ?2")?;
                let ids: Vec<i64> = stmt
                    .query_map([start, end], |row| row.get(0))?
                    .filter_map(|r| r.ok())
                    .collect();
                ids
            }
        };

        if session_ids.is_empty() {
            return Ok(0);
        }

        let placeholders = vec!["?"; session_ids.len()].join(",");
        db.execute(
            &format!("DELETE FROM messages WHERE session_id IN ({placeholders})"),
            rusqlite::params_from_iter(session_ids.iter()),
        )?;
        let deleted = db.execute(
            &format!("DELETE FROM sessions WHERE id IN ({placeholders})"),
            rusqlite::params_from_iter(session_ids.iter()),
        )?;
        debug!(deleted, "sessions deleted with message cascade");
        Ok(deleted)
    }

    pub fn count_sessions(&self) -> Result<usize> {
        let db = self.db.lock().expect("store lock poisoned");
        let count: i64 = db.query_row("SELECT COUNT(*) FROM sessions", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Convert a plain history interaction into a new session containing
    /// its user+assistant pair. Returns the session id (the existing one
    /// if the interaction already belongs to a session).
    pub fn convert_history_to_session(&self, interaction_id: i64) -> Result<i64> {
        let interaction = self
            .get_interaction_by_id(interaction_id)?
            .ok_or(crate::error::StoreError::InteractionNotFound { id: interaction_id })?;

        if let Some(existing) = interaction.session_id {
            return Ok(existing);
        }

        let session_name = if interaction.query.is_empty() {
            "New Session".to_string()
        } else {
            let first_line = interaction.query.lines().next().unwrap_or("").trim();
            if first_line.chars().count() > 30 {
                let head: String = first_line.chars().take(30).collect();
                format!("{head}...")
            } else {
                first_line.to_string()
            }
        };

        let session_id =
            self.create_session(&interaction.model, Some(&session_name), false, None)?;

        if !interaction.query.is_empty() {
            self.save_message(session_id, "user", &interaction.query, "", 0)?;
        }
        if !interaction.answer.is_empty() {
            self.save_message(session_id, "assistant", &interaction.answer, "", 0)?;
        }
        Ok(session_id)
    }
}
