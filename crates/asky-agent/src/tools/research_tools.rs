//! Research-mode tool executors over the cache and vector index.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use asky_research::chunker::chunk_text;
use asky_research::sections::{build_section_index, get_listable_sections, slice_section_content};
use asky_research::urlutil::{
    format_section_ref, is_local_filesystem_target, parse_corpus_source_token, CorpusToken,
};
use asky_research::html::OutputFormat;
use asky_research::{CacheEntry, ResearchCache, Retriever, ScoredChunk, VectorStore};

use crate::registry::{error_payload, ToolExecutor};
use crate::tools::{extract_source_targets, split_local_targets, LOCAL_TARGET_UNSUPPORTED_ERROR};

pub const DEFAULT_HYBRID_DENSE_WEIGHT: f64 = 0.75;
pub const DEFAULT_MIN_CHUNK_RELEVANCE: f64 = 0.15;
const MAX_RAG_CANDIDATE_MULTIPLIER: usize = 3;
const CHUNK_DIVERSITY_SIMILARITY_THRESHOLD: f64 = 0.92;
const CONTENT_PREVIEW_SHORT_CHARS: usize = 2000;
const CONTENT_PREVIEW_LONG_CHARS: usize = 3000;

/// Resolve a URL or corpus handle to a cached entry. Errors are
/// user-visible strings, returned per source.
pub(crate) fn resolve_cached_source(
    cache: &ResearchCache,
    source: &str,
) -> (Option<CacheEntry>, Option<String>, CorpusToken) {
    let token = parse_corpus_source_token(source);
    if token.is_corpus {
        if let Some(error) = &token.error {
            return (None, Some(error.clone()), token);
        }
        let cache_id = token.cache_id.unwrap_or(0);
        return match cache.lookup_by_id(cache_id) {
            Ok(Some(entry)) => (Some(entry), None, token),
            Ok(None) => (
                None,
                Some("Not cached. Use preload/ingestion before querying this handle.".to_string()),
                token,
            ),
            Err(e) => (None, Some(format!("cache error: {e}")), token),
        };
    }

    if is_local_filesystem_target(source) {
        return (None, Some(LOCAL_TARGET_UNSUPPORTED_ERROR.to_string()), token);
    }

    match cache.lookup(source) {
        Ok(Some(entry)) => (Some(entry), None, token),
        Ok(None) => (
            None,
            Some("Not cached. Use extract_links first to cache this URL.".to_string()),
            token,
        ),
        Err(e) => (None, Some(format!("cache error: {e}")), token),
    }
}

/// Resolve section scope from explicit args or the source token itself.
pub(crate) fn resolve_section_scope(
    source_token: &CorpusToken,
    args: &serde_json::Value,
) -> Result<Option<String>, String> {
    let section_ref = args.get("section_ref").and_then(|v| v.as_str()).map(str::trim);
    let section_id = args.get("section_id").and_then(|v| v.as_str()).map(str::trim);

    if let Some(section_ref) = section_ref.filter(|s| !s.is_empty()) {
        let parsed = parse_corpus_source_token(section_ref);
        if !parsed.is_corpus {
            return Err(
                "section_ref must use corpus format: corpus://cache/<id>#section=<section-id>."
                    .to_string(),
            );
        }
        if let Some(error) = parsed.error {
            return Err(error);
        }
        let Some(ref_section) = parsed.section_id else {
            return Err(
                "section_ref is missing section id. Use corpus://cache/<id>#section=<section-id>."
                    .to_string(),
            );
        };
        if let (Some(source_id), Some(ref_id)) = (source_token.cache_id, parsed.cache_id) {
            if source_id != ref_id {
                return Err("section_ref cache ID does not match source cache ID.".to_string());
            }
        }
        return Ok(Some(ref_section));
    }

    if let Some(section_id) = section_id.filter(|s| !s.is_empty()) {
        return Ok(Some(section_id.to_string()));
    }

    Ok(source_token.section_id.clone())
}

/// Section suggestions rendered into error payloads on a failed match.
pub(crate) fn section_suggestions(
    content: &str,
    cache_id: Option<i64>,
    limit: usize,
) -> Vec<serde_json::Value> {
    let index = build_section_index(content);
    get_listable_sections(&index, false)
        .into_iter()
        .take(limit.max(1))
        .map(|section| {
            let mut entry = serde_json::json!({
                "id": section.id,
                "title": section.title,
            });
            if let Some(cache_id) = cache_id {
                entry["section_ref"] = serde_json::json!(format_section_ref(cache_id, &section.id));
            }
            entry
        })
        .collect()
}

/// Top chunks with near-duplicate snippets removed.
pub(crate) fn select_diverse_chunks(ranked: Vec<ScoredChunk>, max_chunks: usize) -> Vec<ScoredChunk> {
    let mut selected: Vec<ScoredChunk> = Vec::new();
    for candidate in ranked {
        let duplicate = selected
            .iter()
            .any(|kept| text_similarity(&candidate.text, &kept.text) >= CHUNK_DIVERSITY_SIMILARITY_THRESHOLD);
        if duplicate {
            continue;
        }
        selected.push(candidate);
        if selected.len() >= max_chunks {
            break;
        }
    }
    selected
}

/// Cheap bigram-overlap similarity for duplicate suppression.
fn text_similarity(a: &str, b: &str) -> f64 {
    if a == b {
        return 1.0;
    }
    let grams = |s: &str| -> std::collections::HashSet<(char, char)> {
        let chars: Vec<char> = s.chars().collect();
        chars.windows(2).map(|w| (w[0], w[1])).collect()
    };
    let ga = grams(a);
    let gb = grams(b);
    if ga.is_empty() || gb.is_empty() {
        return 0.0;
    }
    let intersection = ga.intersection(&gb).count() as f64;
    let union = (ga.len() + gb.len()) as f64 - intersection;
    intersection / union
}

// ---------------------------------------------------------------------------
// extract_links
// ---------------------------------------------------------------------------

/// Fetch pages, cache content, and return only their links, optionally
/// ranked by semantic relevance to a query.
pub struct ExtractLinksTool {
    retriever: Arc<Retriever>,
    cache: Arc<ResearchCache>,
    vector: Arc<VectorStore>,
    max_links_default: usize,
    max_relevant_links: usize,
}

impl ExtractLinksTool {
    pub fn new(
        retriever: Arc<Retriever>,
        cache: Arc<ResearchCache>,
        vector: Arc<VectorStore>,
        max_links_default: usize,
        max_relevant_links: usize,
    ) -> Self {
        Self {
            retriever,
            cache,
            vector,
            max_links_default,
            max_relevant_links,
        }
    }

    async fn ensure_link_embeddings(&self, cache_id: i64, links: &[asky_research::Link]) -> bool {
        let model = self.vector.embedding_model().to_string();
        let has = self
            .vector
            .has_link_embeddings_for_model(cache_id, &model)
            .unwrap_or(false);
        if has {
            return true;
        }
        match self.vector.store_link_embeddings(cache_id, links).await {
            Ok(stored) => stored > 0,
            Err(e) => {
                warn!(cache_id, error = %e, "link embedding failed (will use unranked links)");
                false
            }
        }
    }
}

#[async_trait]
impl ToolExecutor for ExtractLinksTool {
    async fn execute(&self, args: serde_json::Value) -> serde_json::Value {
        let urls = extract_source_targets(&args, false);
        if urls.is_empty() {
            return error_payload("No URLs provided. Please specify 'urls' or 'url' parameter.");
        }
        let (urls, rejected) = split_local_targets(urls);
        let query = args.get("query").and_then(|v| v.as_str()).filter(|q| !q.trim().is_empty());
        let max_links = args
            .get("max_links")
            .and_then(|v| v.as_u64())
            .map(|v| v as usize)
            .unwrap_or(self.max_links_default);

        let mut results = serde_json::Map::new();
        for (url, payload) in rejected {
            results.insert(url, payload);
        }

        for url in urls {
            let (links, cache_id, from_cache) = match self.cache.lookup(&url) {
                Ok(Some(entry)) => {
                    debug!(url, "cache hit");
                    (entry.links, entry.id, true)
                }
                Ok(None) => {
                    let doc = self
                        .retriever
                        .fetch_url_document(&url, OutputFormat::Markdown, true, max_links)
                        .await;
                    if let Some(error) = doc.error {
                        results.insert(url.clone(), error_payload(error));
                        continue;
                    }
                    let trigger = !doc.content.is_empty();
                    match self
                        .cache
                        .put(&url, &doc.content, &doc.title, &doc.links, trigger)
                        .await
                    {
                        Ok(cache_id) => (doc.links, cache_id, false),
                        Err(e) => {
                            results.insert(url.clone(), error_payload(format!("cache error: {e}")));
                            continue;
                        }
                    }
                }
                Err(e) => {
                    results.insert(url.clone(), error_payload(format!("cache error: {e}")));
                    continue;
                }
            };

            let embedded = self.ensure_link_embeddings(cache_id, &links).await;

            let rendered_links: serde_json::Value = if let (Some(query), true) = (query, embedded) {
                let top_k = max_links.min(self.max_relevant_links);
                match self.vector.rank_links_by_relevance(cache_id, query, top_k).await {
                    Ok(ranked) if !ranked.is_empty() => serde_json::json!(ranked
                        .into_iter()
                        .map(|(link, score)| serde_json::json!({
                            "text": link.text,
                            "href": link.href,
                            "relevance": (score * 1000.0).round() / 1000.0,
                        }))
                        .collect::<Vec<_>>()),
                    Ok(_) => serde_json::json!(links.iter().take(max_links).collect::<Vec<_>>()),
                    Err(e) => {
                        warn!(url, error = %e, "relevance ranking failed, using unranked");
                        serde_json::json!(links.iter().take(max_links).collect::<Vec<_>>())
                    }
                }
            } else {
                serde_json::json!(links.iter().take(max_links).collect::<Vec<_>>())
            };

            let link_count = rendered_links.as_array().map(|a| a.len()).unwrap_or(0);
            results.insert(
                url,
                serde_json::json!({
                    "links": rendered_links,
                    "cached": from_cache,
                    "link_count": link_count,
                    "note": "Content cached. Use get_link_summaries or get_relevant_content to read.",
                }),
            );
        }

        serde_json::Value::Object(results)
    }
}

// ---------------------------------------------------------------------------
// get_link_summaries
// ---------------------------------------------------------------------------

/// Cached background summaries (or their status) for previously cached
/// URLs.
pub struct GetLinkSummariesTool {
    cache: Arc<ResearchCache>,
}

impl GetLinkSummariesTool {
    pub fn new(cache: Arc<ResearchCache>) -> Self {
        Self { cache }
    }
}

#[async_trait]
impl ToolExecutor for GetLinkSummariesTool {
    async fn execute(&self, args: serde_json::Value) -> serde_json::Value {
        let urls = extract_source_targets(&args, false);
        if urls.is_empty() {
            return error_payload("No URLs provided.");
        }
        let (urls, rejected) = split_local_targets(urls);

        let mut results = serde_json::Map::new();
        for (url, payload) in rejected {
            results.insert(url, payload);
        }

        for url in urls {
            let payload = match self.cache.read_summary(&url) {
                Ok(Some((title, summary, status))) => {
                    use asky_research::SummaryStatus::*;
                    let summary_text = match (status, &summary) {
                        (Completed, Some(s)) => s.clone(),
                        (Processing, _) => {
                            "(Summary is being generated... try again in a moment)".to_string()
                        }
                        (Failed, _) => "(Summary generation failed)".to_string(),
                        _ => "(Summary pending)".to_string(),
                    };
                    let mut entry = serde_json::json!({
                        "title": title,
                        "summary": summary_text,
                    });
                    if status != Completed {
                        entry["status"] = serde_json::json!(status.as_str());
                    }
                    entry
                }
                Ok(None) => error_payload("Not cached. Use extract_links first to cache this URL."),
                Err(e) => error_payload(format!("cache error: {e}")),
            };
            results.insert(url, payload);
        }

        serde_json::Value::Object(results)
    }
}

// ---------------------------------------------------------------------------
// get_relevant_content
// ---------------------------------------------------------------------------

/// Hybrid chunk retrieval over cached sources, generating embeddings on
/// demand and re-embedding after a model change.
pub struct GetRelevantContentTool {
    cache: Arc<ResearchCache>,
    vector: Arc<VectorStore>,
    max_chunks_default: usize,
}

impl GetRelevantContentTool {
    pub fn new(cache: Arc<ResearchCache>, vector: Arc<VectorStore>, max_chunks_default: usize) -> Self {
        Self { cache, vector, max_chunks_default }
    }

    async fn retrieve_for_source(
        &self,
        entry: &CacheEntry,
        content_for_retrieval: &str,
        scoped: bool,
        query: &str,
        max_chunks: usize,
        dense_weight: f64,
        min_relevance: f64,
    ) -> Result<Vec<ScoredChunk>, String> {
        if scoped {
            // Section-scoped retrieval ranks directly over the slice
            // without touching the full-document vector index.
            return Ok(rank_section_chunks_direct(
                content_for_retrieval,
                query,
                max_chunks,
                min_relevance,
            ));
        }

        let model = self.vector.embedding_model().to_string();
        let has = self
            .vector
            .has_chunk_embeddings_for_model(entry.id, &model)
            .map_err(|e| e.to_string())?;
        if !has {
            debug!(cache_id = entry.id, "generating chunk embeddings");
            let chunks = chunk_text(&entry.content);
            let stored = self
                .vector
                .store_chunk_embeddings(entry.id, &chunks)
                .await
                .map_err(|e| e.to_string())?;
            if stored == 0 {
                return Err("Failed to store chunk embeddings".to_string());
            }
        }

        let candidate_count = max_chunks * MAX_RAG_CANDIDATE_MULTIPLIER;
        self.vector
            .search_chunks_hybrid(entry.id, query, candidate_count, dense_weight, min_relevance)
            .await
            .map_err(|e| e.to_string())
    }
}

/// Rank section-scoped chunks with lexical heuristics only.
fn rank_section_chunks_direct(
    content: &str,
    query: &str,
    max_chunks: usize,
    min_relevance: f64,
) -> Vec<ScoredChunk> {
    let query_tokens = asky_research::text::tokenize(query);
    let mut ranked: Vec<ScoredChunk> = chunk_text(content)
        .into_iter()
        .filter_map(|(index, text)| {
            let score = asky_research::vector::lexical_overlap_score(&query_tokens, &text);
            if score < min_relevance {
                return None;
            }
            Some(ScoredChunk {
                chunk_index: index,
                text,
                score,
                dense_score: score,
                lexical_score: score,
            })
        })
        .collect();
    ranked.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    ranked.truncate(max_chunks.max(1) * MAX_RAG_CANDIDATE_MULTIPLIER);
    ranked
}

#[async_trait]
impl ToolExecutor for GetRelevantContentTool {
    async fn execute(&self, args: serde_json::Value) -> serde_json::Value {
        let sources = extract_source_targets(&args, true);
        let Some(query) = args.get("query").and_then(|v| v.as_str()).filter(|q| !q.is_empty())
        else {
            return error_payload("Query is required for relevant content retrieval.");
        };
        if sources.is_empty() {
            return error_payload("No sources provided. Specify 'urls' or 'corpus_urls'.");
        }
        let max_chunks = args
            .get("max_chunks")
            .and_then(|v| v.as_u64())
            .map(|v| v as usize)
            .unwrap_or(self.max_chunks_default);
        let dense_weight = args
            .get("dense_weight")
            .and_then(|v| v.as_f64())
            .unwrap_or(DEFAULT_HYBRID_DENSE_WEIGHT);
        let min_relevance = args
            .get("min_relevance")
            .and_then(|v| v.as_f64())
            .unwrap_or(DEFAULT_MIN_CHUNK_RELEVANCE);

        let mut results = serde_json::Map::new();
        for source in sources {
            let (entry, lookup_error, token) = resolve_cached_source(&self.cache, &source);
            let Some(entry) = entry else {
                results.insert(source, error_payload(lookup_error.unwrap_or_default()));
                continue;
            };
            if entry.content.is_empty() {
                results.insert(source, error_payload("Cached content is empty."));
                continue;
            }

            let requested_section = match resolve_section_scope(&token, &args) {
                Ok(section) => section,
                Err(e) => {
                    results.insert(source, error_payload(e));
                    continue;
                }
            };

            let mut content_for_retrieval = entry.content.clone();
            let mut section_payload: Option<serde_json::Value> = None;
            if let Some(section_id) = &requested_section {
                if !token.is_corpus {
                    results.insert(
                        source,
                        error_payload(
                            "Section-scoped retrieval only supports local corpus handles. \
                             Use corpus://cache/<id> with section_id or section_ref.",
                        ),
                    );
                    continue;
                }
                let index = build_section_index(&entry.content);
                let slice = slice_section_content(&entry.content, &index, section_id, None);
                if let Some(error) = slice.error {
                    let mut payload = error_payload(error);
                    payload["requested_section_id"] = serde_json::json!(section_id);
                    payload["suggestions"] =
                        serde_json::json!(section_suggestions(&entry.content, Some(entry.id), 8));
                    results.insert(source, payload);
                    continue;
                }
                content_for_retrieval = slice.content.trim().to_string();
                if content_for_retrieval.is_empty() {
                    results.insert(source, error_payload("Matched section has no content."));
                    continue;
                }
                let resolved = slice.section.clone().map(|s| (s.title, s.char_count));
                section_payload = Some(serde_json::json!({
                    "requested_section_id": slice.requested_section_id,
                    "resolved_section_id": slice.resolved_section_id,
                    "auto_promoted": slice.auto_promoted,
                    "section_ref": format_section_ref(entry.id, &slice.resolved_section_id),
                    "title": resolved.as_ref().map(|(t, _)| t.clone()).unwrap_or_default(),
                    "char_count": resolved.map(|(_, c)| c).unwrap_or(0),
                }));
            }

            match self
                .retrieve_for_source(
                    &entry,
                    &content_for_retrieval,
                    section_payload.is_some(),
                    query,
                    max_chunks,
                    dense_weight,
                    min_relevance,
                )
                .await
            {
                Ok(ranked) => {
                    let relevant = select_diverse_chunks(ranked, max_chunks);
                    let mut payload = if relevant.is_empty() {
                        let preview: String = content_for_retrieval
                            .chars()
                            .take(CONTENT_PREVIEW_SHORT_CHARS)
                            .collect();
                        serde_json::json!({
                            "title": entry.title,
                            "note": "No highly relevant sections found. Returning content preview.",
                            "content_preview": preview,
                        })
                    } else {
                        let chunk_count = relevant.len();
                        serde_json::json!({
                            "title": entry.title,
                            "chunks": relevant
                                .iter()
                                .map(|c| serde_json::json!({
                                    "text": c.text,
                                    "relevance": round3(c.score),
                                    "semantic_relevance": round3(c.dense_score),
                                    "lexical_relevance": round3(c.lexical_score),
                                }))
                                .collect::<Vec<_>>(),
                            "chunk_count": chunk_count,
                        })
                    };
                    if let Some(section) = section_payload {
                        payload["section"] = section;
                    }
                    results.insert(source, payload);
                }
                Err(e) => {
                    // Retrieval failure falls back to a content preview so
                    // the model can still act.
                    warn!(source = %source, error = %e, "RAG retrieval failed");
                    let preview: String = content_for_retrieval
                        .chars()
                        .take(CONTENT_PREVIEW_LONG_CHARS)
                        .collect();
                    let mut payload = serde_json::json!({
                        "title": entry.title,
                        "fallback": true,
                        "note": format!("Semantic search unavailable ({}). Returning content preview.", truncate(&e, 50)),
                        "content_preview": preview,
                    });
                    if let Some(section) = section_payload {
                        payload["section"] = section;
                    }
                    results.insert(source, payload);
                }
            }
        }

        serde_json::Value::Object(results)
    }
}

// ---------------------------------------------------------------------------
// get_full_content
// ---------------------------------------------------------------------------

/// Full cached text for sources, optionally scoped to one section.
pub struct GetFullContentTool {
    cache: Arc<ResearchCache>,
}

impl GetFullContentTool {
    pub fn new(cache: Arc<ResearchCache>) -> Self {
        Self { cache }
    }
}

#[async_trait]
impl ToolExecutor for GetFullContentTool {
    async fn execute(&self, args: serde_json::Value) -> serde_json::Value {
        let sources = extract_source_targets(&args, true);
        if sources.is_empty() {
            return error_payload("No sources provided. Specify 'urls' or 'corpus_urls'.");
        }

        let mut results = serde_json::Map::new();
        for source in sources {
            let (entry, lookup_error, token) = resolve_cached_source(&self.cache, &source);
            let Some(entry) = entry else {
                results.insert(source, error_payload(lookup_error.unwrap_or_default()));
                continue;
            };
            if entry.content.is_empty() {
                results.insert(source, error_payload("Cached content is empty."));
                continue;
            }

            let requested_section = match resolve_section_scope(&token, &args) {
                Ok(section) => section,
                Err(e) => {
                    results.insert(source, error_payload(e));
                    continue;
                }
            };

            let payload = match requested_section {
                None => serde_json::json!({
                    "title": entry.title,
                    "content": entry.content,
                    "content_length": entry.content.len(),
                }),
                Some(section_id) => {
                    if !token.is_corpus {
                        results.insert(
                            source,
                            error_payload(
                                "Section-scoped full content only supports local corpus handles. \
                                 Use corpus://cache/<id> with section_id or section_ref.",
                            ),
                        );
                        continue;
                    }
                    let index = build_section_index(&entry.content);
                    let slice = slice_section_content(&entry.content, &index, &section_id, None);
                    if let Some(error) = slice.error {
                        let mut payload = error_payload(error);
                        payload["requested_section_id"] = serde_json::json!(section_id);
                        payload["suggestions"] = serde_json::json!(section_suggestions(
                            &entry.content,
                            Some(entry.id),
                            8
                        ));
                        results.insert(source, payload);
                        continue;
                    }
                    let section_text = slice.content.trim().to_string();
                    if section_text.is_empty() {
                        results.insert(source, error_payload("Matched section has no content."));
                        continue;
                    }
                    let resolved = slice.section.clone();
                    serde_json::json!({
                        "title": entry.title,
                        "content": section_text,
                        "content_length": section_text.len(),
                        "section": {
                            "requested_section_id": slice.requested_section_id,
                            "resolved_section_id": slice.resolved_section_id,
                            "auto_promoted": slice.auto_promoted,
                            "section_ref": format_section_ref(entry.id, &slice.resolved_section_id),
                            "title": resolved.as_ref().map(|s| s.title.clone()).unwrap_or_default(),
                            "char_count": resolved.map(|s| s.char_count).unwrap_or(0),
                        },
                    })
                }
            };
            results.insert(source, payload);
        }

        serde_json::Value::Object(results)
    }
}

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diverse_selection_drops_near_duplicates() {
        let make = |index: i64, text: &str, score: f64| ScoredChunk {
            chunk_index: index,
            text: text.to_string(),
            score,
            dense_score: score,
            lexical_score: score,
        };
        let ranked = vec![
            make(0, "the rust borrow checker enforces aliasing rules", 0.9),
            make(1, "the rust borrow checker enforces aliasing rules", 0.85),
            make(2, "completely different topic about gardening", 0.5),
        ];
        let selected = select_diverse_chunks(ranked, 3);
        assert_eq!(selected.len(), 2);
        assert_eq!(selected[0].chunk_index, 0);
        assert_eq!(selected[1].chunk_index, 2);
    }

    #[test]
    fn section_scope_prefers_ref_then_id_then_source() {
        let token = parse_corpus_source_token("corpus://cache/5#section=from-source-1");

        let from_ref = resolve_section_scope(
            &token,
            &serde_json::json!({"section_ref": "corpus://cache/5#section=from-ref-1"}),
        )
        .unwrap();
        assert_eq!(from_ref.as_deref(), Some("from-ref-1"));

        let from_id =
            resolve_section_scope(&token, &serde_json::json!({"section_id": "explicit-1"})).unwrap();
        assert_eq!(from_id.as_deref(), Some("explicit-1"));

        let from_source = resolve_section_scope(&token, &serde_json::json!({})).unwrap();
        assert_eq!(from_source.as_deref(), Some("from-source-1"));
    }

    #[test]
    fn section_ref_cache_mismatch_is_error() {
        let token = parse_corpus_source_token("corpus://cache/5");
        let result = resolve_section_scope(
            &token,
            &serde_json::json!({"section_ref": "corpus://cache/6#section=x-1"}),
        );
        assert!(result.is_err());
    }
}
