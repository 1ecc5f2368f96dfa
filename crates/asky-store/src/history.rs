//! Non-session interaction history: save, paired retrieval, selector
//! context with partner expansion, and smart deletes.

use std::collections::BTreeSet;

use rusqlite::Connection;
use tracing::debug;

use crate::error::Result;
use crate::store::HistoryStore;
use crate::types::{DeleteSelector, Interaction};

/// Messages longer than this get a lazily generated summary before they
/// are used as non-full selector context.
pub const LAZY_SUMMARY_THRESHOLD_CHARS: usize = 1200;

/// A message that still needs a summary before compact context rendering.
#[derive(Debug, Clone)]
pub struct PendingSummary {
    pub message_id: i64,
    pub role: String,
    pub content: String,
}

impl HistoryStore {
    /// Save a query and its answer as two message rows (user + assistant).
    /// Returns the assistant row id, which doubles as the interaction id.
    pub fn save_interaction(
        &self,
        query: &str,
        answer: &str,
        model: &str,
        query_summary: &str,
        answer_summary: &str,
    ) -> Result<i64> {
        let db = self.db.lock().expect("store lock poisoned");
        let timestamp = Self::now();

        db.execute(
            "INSERT INTO messages (timestamp, session_id, role, content, summary, model, token_count)
             VALUES (?1, NULL, 'user', ?2, ?3, ?4, NULL)",
            rusqlite::params![timestamp, query, query_summary, model],
        )?;
        db.execute(
            "INSERT INTO messages (timestamp, session_id, role, content, summary, model, token_count)
             VALUES (?1, NULL, 'assistant', ?2, ?3, ?4, NULL)",
            rusqlite::params![timestamp, answer, answer_summary, model],
        )?;
        let assistant_id = db.last_insert_rowid();
        debug!(assistant_id, "interaction saved");
        Ok(assistant_id)
    }

    /// Fetch the most recent non-session interactions, newest first.
    ///
    /// Walks the message table backwards pairing assistant with the
    /// preceding user row. Orphans and legacy null-role rows are tolerated
    /// rather than dropped.
    pub fn get_history(&self, limit: usize) -> Result<Vec<Interaction>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let db = self.db.lock().expect("store lock poisoned");
        // Over-fetch: orphan rows mean `limit` pairs can need more rows.
        let fetch_limit = (limit * 3) as i64;
        let mut stmt = db.prepare(
            "SELECT id, timestamp, role, content, summary, model, token_count
             FROM messages
             WHERE session_id IS NULL
             ORDER BY timestamp DESC, id DESC
             LIMIT ?1",
        )?;
        let rows: Vec<(i64, String, Option<String>, String, Option<String>, String, Option<i64>)> =
            stmt.query_map([fetch_limit], |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                    row.get(5)?,
                    row.get(6)?,
                ))
            })?
            .filter_map(|r| r.ok())
            .collect();

        let mut interactions = Vec::new();
        let mut i = 0;
        while i < rows.len() && interactions.len() < limit {
            let (id, ref ts, ref role, ref content, ref summary, ref model, token_count) = rows[i];
            match role.as_deref() {
                Some("assistant") => {
                    if i + 1 < rows.len() && rows[i + 1].2.as_deref() == Some("user") {
                        let user = &rows[i + 1];
                        interactions.push(Interaction {
                            id,
                            timestamp: ts.clone(),
                            session_id: None,
                            role: None,
                            content: format!("Query: {}\n\nAnswer: {}", user.3, content),
                            query: user.3.clone(),
                            answer: content.clone(),
                            summary: summary.clone(),
                            model: model.clone(),
                            token_count,
                        });
                        i += 2;
                        continue;
                    }
                    // Orphan assistant row: the query is unknown.
                    interactions.push(Interaction {
                        id,
                        timestamp: ts.clone(),
                        session_id: None,
                        role: None,
                        content: String::new(),
                        query: "<unknown>".to_string(),
                        answer: content.clone(),
                        summary: summary.clone(),
                        model: model.clone(),
                        token_count,
                    });
                    i += 1;
                }
                Some("user") => {
                    // Orphan user row: the turn was interrupted.
                    interactions.push(Interaction {
                        id,
                        timestamp: ts.clone(),
                        session_id: None,
                        role: None,
                        content: String::new(),
                        query: content.clone(),
                        answer: "<no answer>".to_string(),
                        summary: summary.clone(),
                        model: model.clone(),
                        token_count,
                    });
                    i += 1;
                }
                _ => {
                    // Legacy row with no role: pass content through untouched.
                    interactions.push(Interaction {
                        id,
                        timestamp: ts.clone(),
                        session_id: None,
                        role: None,
                        content: content.clone(),
                        query: String::new(),
                        answer: String::new(),
                        summary: summary.clone(),
                        model: model.clone(),
                        token_count,
                    });
                    i += 1;
                }
            }
        }

        Ok(interactions)
    }

    /// Expand interaction ids to include each row's user/assistant partner.
    pub fn expand_partner_ids(&self, ids: &[i64]) -> Result<Vec<i64>> {
        let db = self.db.lock().expect("store lock poisoned");
        Ok(expand_partners(&db, ids)?)
    }

    /// Messages among the (partner-expanded) ids whose content exceeds the
    /// lazy-summary threshold and that have no stored summary yet.
    pub fn pending_context_summaries(&self, ids: &[i64]) -> Result<Vec<PendingSummary>> {
        let db = self.db.lock().expect("store lock poisoned");
        let expanded = expand_partners(&db, ids)?;
        if expanded.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; expanded.len()].join(",");
        let mut stmt = db.prepare(&format!(
            "SELECT id, role, content FROM messages
             WHERE id IN ({placeholders}) AND (summary IS NULL OR summary = '')
             ORDER BY id ASC"
        ))?;
        let params = rusqlite::params_from_iter(expanded.iter());
        let pending = stmt
            .query_map(params, |row| {
                Ok(PendingSummary {
                    message_id: row.get(0)?,
                    role: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                    content: row.get(2)?,
                })
            })?
            .filter_map(|r| r.ok())
            .filter(|p| p.content.len() > LAZY_SUMMARY_THRESHOLD_CHARS)
            .collect();
        Ok(pending)
    }

    /// Back-fill a lazily generated summary onto a message row.
    pub fn backfill_summary(&self, message_id: i64, summary: &str) -> Result<()> {
        let db = self.db.lock().expect("store lock poisoned");
        db.execute(
            "UPDATE messages SET summary = ?1 WHERE id = ?2",
            rusqlite::params![summary, message_id],
        )?;
        Ok(())
    }

    /// Combine content from the selected interactions into one context
    /// string. Partner rows are auto-included; when not `full`, stored
    /// summaries replace long content and short content passes through.
    pub fn get_interaction_context(&self, ids: &[i64], full: bool) -> Result<String> {
        let db = self.db.lock().expect("store lock poisoned");
        let expanded = expand_partners(&db, ids)?;
        if expanded.is_empty() {
            return Ok(String::new());
        }

        let placeholders = vec!["?"; expanded.len()].join(",");
        let mut stmt = db.prepare(&format!(
            "SELECT id, role, content, summary FROM messages
             WHERE id IN ({placeholders})
             ORDER BY id ASC"
        ))?;
        let params = rusqlite::params_from_iter(expanded.iter());
        let rows: Vec<(i64, Option<String>, String, Option<String>)> = stmt
            .query_map(params, |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
            })?
            .filter_map(|r| r.ok())
            .collect();

        let mut parts = Vec::with_capacity(rows.len());
        for (_id, role, content, summary) in rows {
            if full {
                parts.push(if content.is_empty() { "...".to_string() } else { content });
                continue;
            }
            let text = match summary.filter(|s| !s.is_empty()) {
                Some(s) => s,
                None => content,
            };
            let prefix = match role.as_deref() {
                Some("user") => "Query: ",
                _ => "Answer: ",
            };
            parts.push(format!("{prefix}{text}"));
        }
        Ok(parts.join("\n\n"))
    }

    /// Fetch one interaction by message id, resolving its partner so both
    /// query and answer are populated.
    pub fn get_interaction_by_id(&self, interaction_id: i64) -> Result<Option<Interaction>> {
        let db = self.db.lock().expect("store lock poisoned");
        let row: Option<(i64, String, Option<i64>, Option<String>, String, Option<String>, String, Option<i64>)> =
            match db.query_row(
                "SELECT id, timestamp, session_id, role, content, summary, model, token_count
                 FROM messages WHERE id = ?1",
                [interaction_id],
                |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                        row.get(5)?,
                        row.get(6)?,
                        row.get(7)?,
                    ))
                },
            ) {
                Ok(r) => Some(r),
                Err(rusqlite::Error::QueryReturnedNoRows) => None,
                Err(e) => return Err(e.into()),
            };

        let Some((id, timestamp, session_id, role, content, summary, model, token_count)) = row
        else {
            return Ok(None);
        };

        let (query, answer) = match role.as_deref() {
            Some("assistant") => {
                let q = partner_content(&db, session_id, id, PartnerDirection::PrecedingUser)?;
                (q.unwrap_or_default(), content.clone())
            }
            Some("user") => {
                let a = partner_content(&db, session_id, id, PartnerDirection::FollowingAssistant)?;
                (content.clone(), a.unwrap_or_default())
            }
            _ => (String::new(), String::new()),
        };

        Ok(Some(Interaction {
            id,
            timestamp,
            session_id,
            role,
            content,
            query,
            answer,
            summary,
            model,
            token_count,
        }))
    }

    /// The most recently written interaction, if any.
    pub fn get_last_interaction(&self) -> Result<Option<Interaction>> {
        let last_id: Option<i64> = {
            let db = self.db.lock().expect("store lock poisoned");
            match db.query_row(
                "SELECT id FROM messages ORDER BY timestamp DESC, id DESC LIMIT 1",
                [],
                |row| row.get(0),
            ) {
                Ok(id) => Some(id),
                Err(rusqlite::Error::QueryReturnedNoRows) => None,
                Err(e) => return Err(e.into()),
            }
        };
        match last_id {
            Some(id) => self.get_interaction_by_id(id),
            None => Ok(None),
        }
    }

    /// Delete non-session message rows by selector, auto-including the
    /// user/assistant partner of every targeted row. Returns rows deleted.
    pub fn delete_messages(&self, selector: &DeleteSelector) -> Result<usize> {
        let db = self.db.lock().expect("store lock poisoned");

        let target_ids: Vec<i64> = match selector {
            DeleteSelector::All => {
                let deleted = db.execute("DELETE FROM messages WHERE session_id IS NULL", [])?;
                return Ok(deleted);
            }
            DeleteSelector::Ids(ids) => ids.clone(),
            DeleteSelector::Range(start, end) => {
                let mut stmt = db.prepare(
                    "SELECT id FROM messages
                     WHERE id BETWEEN ?1 AND ?2 AND session_id IS NULL",
                )?;
                let ids: Vec<i64> = stmt
                    .query_map([start, end], |row| row.get(0))?
                    .filter_map(|r| r.ok())
                    .collect();
                ids
            }
        };

        let expanded = expand_partners(&db, &target_ids)?;
        if expanded.is_empty() {
            return Ok(0);
        }
        let placeholders = vec!["?"; expanded.len()].join(",");
        let deleted = db.execute(
            &format!("DELETE FROM messages WHERE id IN ({placeholders})"),
            rusqlite::params_from_iter(expanded.iter()),
        )?;
        debug!(deleted, "messages deleted");
        Ok(deleted)
    }

    /// Number of non-session message rows.
    pub fn record_count(&self) -> Result<usize> {
        let db = self.db.lock().expect("store lock poisoned");
        let count: i64 = db.query_row(
            "SELECT COUNT(*) FROM messages WHERE session_id IS NULL",
            [],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }
}

enum PartnerDirection {
    PrecedingUser,
    FollowingAssistant,
}

fn partner_content(
    db: &Connection,
    session_id: Option<i64>,
    id: i64,
    direction: PartnerDirection,
) -> Result<Option<String>> {
    let sql = match (&direction, session_id) {
        (PartnerDirection::PrecedingUser, Some(_)) => {
            "SELECT content FROM messages WHERE session_id = ?1 AND role = 'user' AND id < ?2
             ORDER BY id DESC LIMIT 1"
        }
        (PartnerDirection::PrecedingUser, None) => {
            "SELECT content FROM messages WHERE session_id IS NULL AND role = 'user' AND id < ?1
             ORDER BY id DESC LIMIT 1"
        }
        (PartnerDirection::FollowingAssistant, Some(_)) => {
            "SELECT content FROM messages WHERE session_id = ?1 AND role = 'assistant' AND id > ?2
             ORDER BY id ASC LIMIT 1"
        }
        (PartnerDirection::FollowingAssistant, None) => {
            "SELECT content FROM messages WHERE session_id IS NULL AND role = 'assistant' AND id > ?1
             ORDER BY id ASC LIMIT 1"
        }
    };
    let result = if session_id.is_some() {
        db.query_row(sql, rusqlite::params![session_id, id], |row| row.get(0))
    } else {
        db.query_row(sql, [id], |row| row.get(0))
    };
    match result {
        Ok(content) => Ok(Some(content)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Include the partner row for every non-session id: preceding user for an
/// assistant row, following assistant for a user row. Sorted, deduplicated.
fn expand_partners(db: &Connection, ids: &[i64]) -> rusqlite::Result<Vec<i64>> {
    let mut expanded: BTreeSet<i64> = ids.iter().copied().collect();
    if ids.is_empty() {
        return Ok(Vec::new());
    }

    let placeholders = vec!["?"; ids.len()].join(",");
    let mut stmt = db.prepare(&format!(
        "SELECT id, role FROM messages WHERE id IN ({placeholders}) AND session_id IS NULL"
    ))?;
    let rows: Vec<(i64, Option<String>)> = stmt
        .query_map(rusqlite::params_from_iter(ids.iter()), |row| {
            Ok((row.get(0)?, row.get(1)?))
        })?
        .filter_map(|r| r.ok())
        .collect();

    for (id, role) in rows {
        let partner: rusqlite::Result<i64> = match role.as_deref() {
            Some("assistant") => db.query_row(
                "SELECT id FROM messages
                 WHERE role = 'user' AND id < ?1 AND session_id IS NULL
                 ORDER BY id DESC LIMIT 1",
                [id],
                |row| row.get(0),
            ),
            Some("user") => db.query_row(
                "SELECT id FROM messages
                 WHERE role = 'assistant' AND id > ?1 AND session_id IS NULL
                 ORDER BY id ASC LIMIT 1",
                [id],
                |row| row.get(0),
            ),
            _ => continue,
        };
        if let Ok(partner_id) = partner {
            expanded.insert(partner_id);
        }
    }

    Ok(expanded.into_iter().collect())
}
