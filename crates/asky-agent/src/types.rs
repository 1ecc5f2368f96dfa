//! Typed request/response primitives for orchestrated turns.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use asky_llm::ChatMessage;
use asky_research::ingest::LocalIngestionResult;
use asky_research::shortlist::ShortlistResult;

use crate::context::ContextResolution;
use crate::evidence::EvidenceFact;
use crate::session::SessionResolution;

/// High-level request for a fully orchestrated chat turn.
#[derive(Debug, Clone, Default)]
pub struct TurnRequest {
    pub query_text: String,
    /// Comma-separated history selectors: ids, `~N` relatives, or
    /// completion tokens.
    pub continue_ids: Option<String>,
    pub summarize_context: bool,
    pub sticky_session_name: Option<String>,
    pub resume_session_term: Option<String>,
    pub shell_session_id: Option<i64>,
    pub lean: bool,
    /// Explicit research flag; `None` falls back to the client default.
    pub research: Option<bool>,
    pub research_source_mode: Option<String>,
    pub replace_research_corpus: bool,
    /// Enables automatic session-scoped memory extraction.
    pub elephant_mode: bool,
    pub preload_local_sources: bool,
    pub preload_shortlist: bool,
    /// Per-request shortlist override: "on" | "off" | anything else =
    /// auto.
    pub shortlist_override: Option<String>,
    pub additional_source_context: Option<String>,
    pub local_corpus_paths: Option<Vec<String>>,
    pub max_turns: Option<i64>,
    /// Per-request `tool-off` additions.
    pub disabled_tools: HashSet<String>,
    pub save_history: bool,
}

impl TurnRequest {
    pub fn for_query(query_text: impl Into<String>) -> Self {
        Self {
            query_text: query_text.into(),
            preload_local_sources: true,
            preload_shortlist: true,
            save_history: true,
            ..Default::default()
        }
    }
}

/// The bundle produced by the preload pipeline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PreloadResolution {
    pub memory_context: Option<String>,
    pub sub_queries: Vec<String>,
    pub local: LocalIngestionResult,
    pub local_context: Option<String>,
    pub local_elapsed_ms: f64,
    pub shortlist: ShortlistResult,
    pub shortlist_context: Option<String>,
    pub shortlist_elapsed_ms: f64,
    pub shortlist_enabled: bool,
    pub shortlist_reason: String,
    pub seed_url_context: Option<String>,
    pub seed_url_direct_answer_ready: bool,
    pub evidence: Vec<EvidenceFact>,
    pub evidence_context: Option<String>,
    pub evidence_elapsed_ms: f64,
    /// Every source URL or handle cached during preload.
    pub preloaded_source_urls: Vec<String>,
    /// URL/target -> opaque corpus handle for local sources.
    pub preloaded_source_handles: HashMap<String, String>,
    pub combined_context: Option<String>,
}

impl PreloadResolution {
    pub fn is_corpus_preloaded(&self) -> bool {
        !self.preloaded_source_urls.is_empty()
    }
}

/// Result of one orchestrated turn.
#[derive(Debug, Clone, Default)]
pub struct TurnResult {
    pub final_answer: String,
    pub messages: Vec<ChatMessage>,
    pub model_alias: String,
    pub session_id: Option<String>,
    pub halted: bool,
    /// Closed set: session_not_found, session_ambiguous,
    /// session_command_only, local_corpus_missing,
    /// local_corpus_ingestion_failed.
    pub halt_reason: Option<String>,
    pub notices: Vec<String>,
    pub context: ContextResolution,
    pub session: SessionResolution,
    pub preload: PreloadResolution,
}
