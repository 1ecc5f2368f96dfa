//! Session lifecycle: the per-turn manager and session resolution.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use asky_core::config::CHARS_PER_TOKEN_ESTIMATE;
use asky_llm::{ChatMessage, Summarizer};
use asky_store::{HistoryStore, Session};

use crate::error::Result;

/// Session context exceeds this fraction of the model window before
/// compaction kicks in.
const COMPACT_THRESHOLD_RATIO: f64 = 0.8;
/// Messages kept verbatim after the compacted summary.
const COMPACT_KEEP_RECENT: usize = 6;
const COMPACT_SUMMARY_MAX_CHARS: usize = 6000;
const SESSION_NAME_MAX_CHARS: usize = 40;

const SESSION_COMPACT_PROMPT: &str = "Summarize this conversation history, \
preserving user goals, decisions, facts, and source URLs that later turns \
may rely on.";

/// Drives one session's context building, turn persistence, and
/// summarization-driven compaction.
pub struct SessionManager {
    store: Arc<HistoryStore>,
    summarizer: Arc<Summarizer>,
    model_alias: String,
    context_size: usize,
    pub current_session: Option<Session>,
}

impl SessionManager {
    pub fn new(
        store: Arc<HistoryStore>,
        summarizer: Arc<Summarizer>,
        model_alias: impl Into<String>,
        context_size: usize,
    ) -> Self {
        Self {
            store,
            summarizer,
            model_alias: model_alias.into(),
            context_size,
            current_session: None,
        }
    }

    pub fn store(&self) -> &Arc<HistoryStore> {
        &self.store
    }

    pub fn session_id(&self) -> Option<i64> {
        self.current_session.as_ref().map(|s| s.id)
    }

    /// Create and activate a session.
    pub fn create_session(
        &mut self,
        name: &str,
        memory_auto_extract: bool,
        max_turns: Option<i64>,
    ) -> Result<Session> {
        let id = self.store.create_session(
            &self.model_alias,
            Some(name),
            memory_auto_extract,
            max_turns,
        )?;
        let session = self
            .store
            .get_session_by_id(id)?
            .expect("just-created session exists");
        self.current_session = Some(session.clone());
        Ok(session)
    }

    pub fn find_sessions(&self, term: &str) -> Result<Vec<Session>> {
        Ok(self.store.find_sessions(term)?)
    }

    /// Build the context messages for the next request. A compacted
    /// session contributes its summary in place of the earliest raw
    /// messages; the recent tail rides along verbatim.
    pub fn build_context_messages(&self) -> Result<Vec<ChatMessage>> {
        let Some(session) = &self.current_session else {
            return Ok(Vec::new());
        };
        let messages = self.store.get_session_messages(session.id)?;
        let mut out = Vec::new();

        let raw_start = match &session.compacted_summary {
            Some(summary) if !summary.is_empty() => {
                out.push(ChatMessage::user(format!(
                    "Summary of the conversation so far:\n{summary}"
                )));
                messages.len().saturating_sub(COMPACT_KEEP_RECENT)
            }
            _ => 0,
        };

        for message in &messages[raw_start..] {
            match message.role.as_deref() {
                Some("assistant") => out.push(ChatMessage::assistant(message.content.clone())),
                _ => out.push(ChatMessage::user(message.content.clone())),
            }
        }
        Ok(out)
    }

    /// Persist one user/assistant turn. Returns the assistant row id.
    pub fn save_turn(
        &self,
        query: &str,
        answer: &str,
        query_summary: &str,
        answer_summary: &str,
    ) -> Result<i64> {
        let Some(session) = &self.current_session else {
            return Ok(self
                .store
                .save_interaction(query, answer, &self.model_alias, query_summary, answer_summary)?);
        };
        let token_estimate = (query.len() / CHARS_PER_TOKEN_ESTIMATE) as i64;
        self.store
            .save_message(session.id, "user", query, query_summary, token_estimate)?;
        let answer_tokens = (answer.len() / CHARS_PER_TOKEN_ESTIMATE) as i64;
        let id = self.store.save_message(
            session.id,
            "assistant",
            answer,
            answer_summary,
            answer_tokens,
        )?;
        debug!(session_id = session.id, "session turn saved");
        Ok(id)
    }

    fn estimate_session_tokens(&self, session_id: i64) -> Result<usize> {
        let messages = self.store.get_session_messages(session_id)?;
        let chars: usize = messages.iter().map(|m| m.content.len()).sum();
        Ok(chars / CHARS_PER_TOKEN_ESTIMATE)
    }

    /// Compact the session when its running token estimate exceeds the
    /// model's context budget. Raw messages always remain; only context
    /// building switches to the summary. Returns whether compaction ran.
    pub async fn check_and_compact(&mut self) -> Result<bool> {
        let Some(session) = self.current_session.clone() else {
            return Ok(false);
        };
        let estimate = self.estimate_session_tokens(session.id)?;
        let budget = (self.context_size as f64 * COMPACT_THRESHOLD_RATIO) as usize;
        if estimate <= budget {
            return Ok(false);
        }

        let messages = self.store.get_session_messages(session.id)?;
        if messages.len() < 2 {
            return Ok(false);
        }
        let keep_recent = COMPACT_KEEP_RECENT.min(messages.len() - 1).max(1);
        let compact_until = messages.len() - keep_recent;

        let mut transcript = String::new();
        if let Some(previous) = &session.compacted_summary {
            transcript.push_str("Earlier summary:\n");
            transcript.push_str(previous);
            transcript.push_str("\n\n");
        }
        for message in &messages[..compact_until] {
            let role = message.role.as_deref().unwrap_or("user").to_uppercase();
            transcript.push_str(&format!("{role}: {}\n\n", message.content));
        }

        let summary = match self
            .summarizer
            .summarize(
                &transcript,
                SESSION_COMPACT_PROMPT,
                COMPACT_SUMMARY_MAX_CHARS,
                None,
                None,
            )
            .await
        {
            Ok(summary) => summary,
            Err(e) => {
                warn!(session_id = session.id, error = %e, "session compaction failed");
                return Ok(false);
            }
        };

        self.store.compact_session(session.id, &summary)?;
        if let Some(current) = self.current_session.as_mut() {
            current.compacted_summary = Some(summary);
        }
        info!(session_id = session.id, estimate, budget, "session compacted");
        Ok(true)
    }
}

/// Auto-generated session name from the query text.
pub fn generate_session_name(query_text: &str) -> String {
    let first_line = query_text.lines().next().unwrap_or("").trim();
    if first_line.is_empty() {
        return "research".to_string();
    }
    if first_line.chars().count() > SESSION_NAME_MAX_CHARS {
        let head: String = first_line.chars().take(SESSION_NAME_MAX_CHARS).collect();
        format!("{head}...")
    } else {
        first_line.to_string()
    }
}

/// Why and how the session layer resolved for this turn.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionResolution {
    pub session_id: Option<i64>,
    pub event: Option<String>,
    pub notices: Vec<String>,
    pub halt_reason: Option<String>,
    pub matched_sessions: Vec<SessionSummary>,
    pub memory_auto_extract: bool,
    pub max_turns: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub id: i64,
    pub name: String,
    pub created_at: String,
}

fn summarize_session(session: &Session) -> SessionSummary {
    SessionSummary {
        id: session.id,
        name: session.name.clone().unwrap_or_default(),
        created_at: session.created_at.clone(),
    }
}

/// Inputs for session resolution.
pub struct SessionDirectives<'a> {
    pub query_text: &'a str,
    pub sticky_session_name: Option<&'a str>,
    pub resume_session_term: Option<&'a str>,
    pub shell_session_id: Option<i64>,
    pub research_mode: bool,
    pub elephant_mode: bool,
    pub max_turns: Option<i64>,
}

/// Resolve session state for one turn: sticky create, resume by term,
/// shell auto-attach, or research auto-session. Ambiguous resumes halt.
pub fn resolve_session_for_turn(
    store: &Arc<HistoryStore>,
    summarizer: &Arc<Summarizer>,
    model_alias: &str,
    context_size: usize,
    directives: SessionDirectives<'_>,
) -> Result<(Option<SessionManager>, SessionResolution)> {
    let mut resolution = SessionResolution::default();
    let new_manager = || {
        SessionManager::new(
            Arc::clone(store),
            Arc::clone(summarizer),
            model_alias.to_string(),
            context_size,
        )
    };

    if let Some(name) = directives.sticky_session_name {
        let mut manager = new_manager();
        let session =
            manager.create_session(name, directives.elephant_mode, directives.max_turns)?;
        store.update_session_last_used(session.id)?;
        resolution.session_id = Some(session.id);
        resolution.event = Some("session_created".to_string());
        resolution.memory_auto_extract = session.memory_auto_extract;
        resolution.max_turns = session.max_turns;
        resolution.notices.push(format!(
            "Session {} ('{}') created and active",
            session.id,
            session.name.as_deref().unwrap_or("auto")
        ));
        if directives.query_text.is_empty() {
            resolution.halt_reason = Some("session_command_only".to_string());
        }
        return Ok((Some(manager), resolution));
    }

    if let Some(term) = directives.resume_session_term {
        let mut manager = new_manager();
        let matches = manager.find_sessions(term)?;
        match matches.len() {
            0 => {
                resolution.event = Some("session_resume_not_found".to_string());
                resolution.halt_reason = Some("session_not_found".to_string());
                resolution
                    .notices
                    .push(format!("No sessions found matching '{term}'"));
                return Ok((None, resolution));
            }
            1 => {}
            _ => {
                resolution.event = Some("session_resume_ambiguous".to_string());
                resolution.halt_reason = Some("session_ambiguous".to_string());
                resolution.matched_sessions = matches.iter().map(summarize_session).collect();
                resolution
                    .notices
                    .push(format!("Multiple sessions found for '{term}'"));
                return Ok((None, resolution));
            }
        }

        let mut resumed = matches.into_iter().next().expect("one match");
        store.update_session_last_used(resumed.id)?;
        resolution.session_id = Some(resumed.id);
        resolution.event = Some("session_resumed".to_string());

        if directives.elephant_mode && !resumed.memory_auto_extract {
            store.set_session_memory_auto_extract(resumed.id, true)?;
            resumed.memory_auto_extract = true;
        }
        resolution.memory_auto_extract = resumed.memory_auto_extract;

        if let Some(max_turns) = directives.max_turns {
            store.update_session_max_turns(resumed.id, max_turns)?;
            resumed.max_turns = Some(max_turns);
        }
        resolution.max_turns = resumed.max_turns;

        resolution.notices.push(format!(
            "Resumed session {} ('{}')",
            resumed.id,
            resumed.name.as_deref().unwrap_or("auto")
        ));
        if directives.query_text.is_empty() {
            resolution.halt_reason = Some("session_command_only".to_string());
        }
        manager.current_session = Some(resumed);
        return Ok((Some(manager), resolution));
    }

    let mut manager: Option<SessionManager> = None;

    if let Some(shell_id) = directives.shell_session_id {
        match store.get_session_by_id(shell_id)? {
            Some(mut session) => {
                store.update_session_last_used(session.id)?;
                resolution.session_id = Some(session.id);
                resolution.event = Some("session_auto_resumed".to_string());
                resolution.memory_auto_extract = session.memory_auto_extract;
                if let Some(max_turns) = directives.max_turns {
                    store.update_session_max_turns(session.id, max_turns)?;
                    session.max_turns = Some(max_turns);
                }
                resolution.max_turns = session.max_turns;
                resolution.notices.push(format!(
                    "Resuming session {} ({})",
                    session.id,
                    session.name.as_deref().unwrap_or("auto")
                ));
                let mut m = new_manager();
                m.current_session = Some(session);
                manager = Some(m);
            }
            None => {
                resolution.event = Some("session_auto_resume_missing".to_string());
                resolution
                    .notices
                    .push("Cleared stale shell session lock".to_string());
            }
        }
    }

    // Research turns always run inside a session.
    if directives.research_mode && manager.is_none() {
        let mut m = new_manager();
        let name = generate_session_name(if directives.query_text.is_empty() {
            "research"
        } else {
            directives.query_text
        });
        let session = m.create_session(&name, directives.elephant_mode, directives.max_turns)?;
        resolution.session_id = Some(session.id);
        resolution.event = Some("research_session_created".to_string());
        resolution.memory_auto_extract = session.memory_auto_extract;
        resolution.max_turns = session.max_turns;
        resolution.notices.push(format!(
            "Research mode: started session {} ('{}')",
            session.id,
            session.name.as_deref().unwrap_or("auto")
        ));
        manager = Some(m);
    } else if directives.research_mode {
        if let Some(m) = &manager {
            if let Some(session) = &m.current_session {
                if directives.elephant_mode && !session.memory_auto_extract {
                    store.set_session_memory_auto_extract(session.id, true)?;
                    resolution.memory_auto_extract = true;
                }
            }
        }
    }

    Ok((manager, resolution))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_names_come_from_first_line() {
        assert_eq!(generate_session_name("plan my trip\nmore detail"), "plan my trip");
        assert_eq!(generate_session_name("  "), "research");
        let long = "x".repeat(60);
        assert!(generate_session_name(&long).ends_with("..."));
    }
}
