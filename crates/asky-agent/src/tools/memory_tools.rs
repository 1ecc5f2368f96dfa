//! Memory tools: `save_finding`, `query_research_memory`, `save_memory`.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use asky_research::embeddings::EmbeddingClient;
use asky_research::{Embedder, ResearchCache, VectorStore};
use asky_store::HistoryStore;

use crate::registry::{error_payload, ToolExecutor};
use crate::tools::string_list;

/// Persist a research finding with an embedding for semantic recall.
pub struct SaveFindingTool {
    cache: Arc<ResearchCache>,
    vector: Arc<VectorStore>,
    session_id: Option<String>,
}

impl SaveFindingTool {
    pub fn new(cache: Arc<ResearchCache>, vector: Arc<VectorStore>, session_id: Option<String>) -> Self {
        Self { cache, vector, session_id }
    }
}

#[async_trait]
impl ToolExecutor for SaveFindingTool {
    async fn execute(&self, args: serde_json::Value) -> serde_json::Value {
        let Some(finding) = args
            .get("finding")
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|f| !f.is_empty())
        else {
            return error_payload("Finding text is required.");
        };

        let source_url = args.get("source_url").and_then(|v| v.as_str());
        let source_title = args.get("source_title").and_then(|v| v.as_str());
        let tags = string_list(args.get("tags"));

        let finding_id = match self.cache.save_finding(
            finding,
            source_url,
            source_title,
            &tags,
            self.session_id.as_deref(),
        ) {
            Ok(id) => id,
            Err(e) => return error_payload(format!("save failed: {e}")),
        };

        let embedded = match self.vector.store_finding_embedding(finding_id, finding).await {
            Ok(embedded) => embedded,
            Err(e) => {
                warn!(finding_id, error = %e, "finding embedding failed (still saved)");
                false
            }
        };

        serde_json::json!({
            "status": "saved",
            "finding_id": finding_id,
            "embedded": embedded,
            "note": if embedded {
                "Finding saved to research memory with embedding"
            } else {
                "Finding saved to research memory (without embedding - API unavailable)"
            },
        })
    }
}

/// Semantic search over saved findings, with a recent-findings fallback
/// when semantic search yields nothing.
pub struct QueryResearchMemoryTool {
    cache: Arc<ResearchCache>,
    vector: Arc<VectorStore>,
    session_id: Option<String>,
    max_results: usize,
}

impl QueryResearchMemoryTool {
    pub fn new(
        cache: Arc<ResearchCache>,
        vector: Arc<VectorStore>,
        session_id: Option<String>,
        max_results: usize,
    ) -> Self {
        Self { cache, vector, session_id, max_results }
    }

    fn render_recent(&self, limit: usize, note: String, search_type: &str) -> serde_json::Value {
        match self.cache.list_findings(limit, self.session_id.as_deref()) {
            Ok(findings) if !findings.is_empty() => {
                let count = findings.len();
                serde_json::json!({
                    "findings": findings
                        .iter()
                        .map(|f| serde_json::json!({
                            "finding": f.finding_text,
                            "source_url": f.source_url,
                            "source_title": f.source_title,
                            "tags": f.tags,
                            "saved_at": f.created_at,
                        }))
                        .collect::<Vec<_>>(),
                    "count": count,
                    "note": note,
                    "search_type": search_type,
                })
            }
            Ok(_) => {
                let empty_note = if self.session_id.is_some() {
                    "No findings in this session's research memory yet. \
                     Use save_finding to store discoveries."
                } else {
                    "No findings in research memory yet. Use save_finding to store discoveries."
                };
                serde_json::json!({ "findings": [], "note": empty_note })
            }
            Err(e) => error_payload(format!("memory read failed: {e}")),
        }
    }
}

#[async_trait]
impl ToolExecutor for QueryResearchMemoryTool {
    async fn execute(&self, args: serde_json::Value) -> serde_json::Value {
        let Some(query) = args
            .get("query")
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|q| !q.is_empty())
        else {
            return error_payload("Query is required.");
        };
        let limit = args
            .get("limit")
            .and_then(|v| v.as_u64())
            .map(|v| v as usize)
            .unwrap_or(self.max_results);

        match self
            .vector
            .search_findings(query, limit, self.session_id.as_deref())
            .await
        {
            Ok(results) if !results.is_empty() => {
                let count = results.len();
                serde_json::json!({
                    "findings": results
                        .iter()
                        .map(|(f, score)| serde_json::json!({
                            "finding": f.finding_text,
                            "source_url": f.source_url,
                            "source_title": f.source_title,
                            "tags": f.tags,
                            "relevance": (score * 1000.0).round() / 1000.0,
                            "saved_at": f.created_at,
                        }))
                        .collect::<Vec<_>>(),
                    "count": count,
                    "search_type": "semantic",
                })
            }
            Ok(_) => self.render_recent(
                limit,
                "No semantically relevant findings. Showing recent findings.".to_string(),
                "recent",
            ),
            Err(e) => {
                warn!(error = %e, "semantic search unavailable");
                self.render_recent(
                    limit,
                    format!("Semantic search unavailable ({e}). Showing recent findings."),
                    "fallback",
                )
            }
        }
    }
}

/// Persist a user memory, globally or scoped to the active session.
pub struct SaveMemoryTool {
    store: Arc<HistoryStore>,
    embedder: Arc<dyn Embedder>,
    session_id: Option<i64>,
}

impl SaveMemoryTool {
    pub fn new(store: Arc<HistoryStore>, embedder: Arc<dyn Embedder>, session_id: Option<i64>) -> Self {
        Self { store, embedder, session_id }
    }
}

#[async_trait]
impl ToolExecutor for SaveMemoryTool {
    async fn execute(&self, args: serde_json::Value) -> serde_json::Value {
        let Some(content) = args
            .get("content")
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|c| !c.is_empty())
        else {
            return error_payload("Memory content is required.");
        };
        let category = args.get("category").and_then(|v| v.as_str());
        let global = args.get("global").and_then(|v| v.as_bool()).unwrap_or(false);
        let scope = if global { None } else { self.session_id };

        let (embedding, model) = if self.embedder.has_model_load_failure() {
            (None, None)
        } else {
            match self.embedder.embed_single(content).await {
                Ok(vector) => (
                    Some(EmbeddingClient::serialize_embedding(&vector)),
                    Some(self.embedder.model().to_string()),
                ),
                Err(e) => {
                    warn!(error = %e, "memory embedding failed (still saved)");
                    (None, None)
                }
            }
        };

        match self.store.save_user_memory(
            content,
            category,
            scope,
            embedding.as_deref(),
            model.as_deref(),
        ) {
            Ok(memory_id) => serde_json::json!({
                "status": "saved",
                "memory_id": memory_id,
                "scope": if scope.is_some() { "session" } else { "global" },
                "embedded": embedding.is_some(),
            }),
            Err(e) => error_payload(format!("save failed: {e}")),
        }
    }
}
