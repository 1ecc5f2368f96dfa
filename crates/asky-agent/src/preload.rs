//! Pre-LLM preload pipeline: memory recall, query expansion, local
//! ingestion, shortlist, and bootstrap evidence extraction.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use tracing::debug;

use asky_core::config::{AskyConfig, ExpansionMode, ModelConfig, CHARS_PER_TOKEN_ESTIMATE};
use asky_research::chunker::chunk_text;
use asky_research::ingest::{format_local_ingestion_context, ingest_local_sources};
use asky_research::shortlist::{
    format_shortlist_context, ShortlistResult, SourceShortlist, StatusSink,
};
use asky_research::text::{dedupe_preserve_order, truncate_with_ellipsis};
use asky_research::urlutil::parse_corpus_source_token;

use crate::evidence::{extract_evidence_from_chunks, format_evidence_context, EvidenceChunk};
use crate::expansion::{expand_query_deterministic, expand_query_with_llm};
use crate::memory::recall_memories_for_query;
use crate::runtime::AskyRuntime;
use crate::types::PreloadResolution;

const SEED_URL_CONTEXT_BUDGET_RATIO: f64 = 0.8;
/// A rich shortlist makes bootstrap evidence redundant; skipping it keeps
/// the model using its retrieval tools for deeper reading.
const EVIDENCE_SKIP_SHORTLIST_THRESHOLD: usize = 3;
const BOOTSTRAP_MAX_SOURCES: usize = 16;
const BOOTSTRAP_MAX_CHUNKS_PER_SOURCE: usize = 2;

/// Shortlist enablement with precedence: lean > request override > model
/// override > global mode flags. Returns the decision and its reason.
pub fn shortlist_enabled_for_request(
    lean: bool,
    model_config: &ModelConfig,
    research_mode: bool,
    shortlist_override: Option<&str>,
    config: &AskyConfig,
) -> (bool, &'static str) {
    if lean {
        return (false, "lean_flag");
    }
    match shortlist_override.map(|s| s.trim().to_lowercase()).as_deref() {
        Some("on") => return (true, "request_override_on"),
        Some("off") => return (false, "request_override_off"),
        _ => {}
    }
    if let Some(model_override) = model_config.source_shortlist_enabled {
        return (model_override, "model_override");
    }
    if !config.shortlist.enabled {
        return (false, "global_disabled");
    }
    if research_mode {
        (config.shortlist.enable_research_mode, "global_research_mode")
    } else {
        (config.shortlist.enable_standard_mode, "global_standard_mode")
    }
}

/// Merge context blocks, dropping empties.
pub fn combine_preloaded_source_context(blocks: &[Option<&str>]) -> Option<String> {
    let merged: Vec<&str> = blocks
        .iter()
        .filter_map(|b| *b)
        .map(str::trim)
        .filter(|b| !b.is_empty())
        .collect();
    if merged.is_empty() {
        None
    } else {
        Some(merged.join("\n\n"))
    }
}

fn seed_url_budget_chars(model_config: &ModelConfig) -> usize {
    let context_chars = model_config.context_size * CHARS_PER_TOKEN_ESTIMATE;
    (context_chars as f64 * SEED_URL_CONTEXT_BUDGET_RATIO) as usize
}

/// True when every seed fetched cleanly and the combined raw size fits the
/// model-derived budget. Research mode never takes the direct path.
pub fn seed_url_context_allows_direct_answer(
    shortlist: &ShortlistResult,
    model_config: &ModelConfig,
    research_mode: bool,
) -> bool {
    if research_mode || shortlist.seed_url_documents.is_empty() {
        return false;
    }
    let budget = seed_url_budget_chars(model_config);
    if budget == 0 {
        return false;
    }
    let mut total = 0usize;
    for doc in &shortlist.seed_url_documents {
        if !doc.error.trim().is_empty() {
            return false;
        }
        total += doc.content.chars().count();
    }
    total <= budget
}

/// Seed URL context block with explicit delivery-status labels. Oversized
/// payloads are summarized, then budget-truncated with an explicit status.
pub async fn format_seed_url_context(
    runtime: &AskyRuntime,
    shortlist: &ShortlistResult,
    model_config: &ModelConfig,
    research_mode: bool,
) -> Option<String> {
    if research_mode || shortlist.seed_url_documents.is_empty() {
        return None;
    }

    let budget = seed_url_budget_chars(model_config);
    let raw_total: usize = shortlist
        .seed_url_documents
        .iter()
        .map(|d| d.content.chars().count())
        .sum();
    let should_summarize = budget > 0 && raw_total > budget;

    struct Rendered {
        url: String,
        resolved_url: String,
        title: String,
        status: &'static str,
        content: String,
    }

    let mut rendered: Vec<Rendered> = Vec::new();
    for doc in &shortlist.seed_url_documents {
        if !doc.error.trim().is_empty() {
            rendered.push(Rendered {
                url: doc.url.clone(),
                resolved_url: doc.resolved_url.clone(),
                title: doc.title.clone(),
                status: "fetch_error",
                content: truncate_with_ellipsis(&doc.error, budget.max(200)),
            });
            continue;
        }
        if should_summarize {
            let summary = runtime
                .summarizer
                .summarize(
                    &doc.content,
                    asky_research::SUMMARIZE_PAGE_PROMPT,
                    budget / shortlist.seed_url_documents.len().max(1),
                    None,
                    None,
                )
                .await
                .unwrap_or_else(|_| truncate_with_ellipsis(&doc.content, budget));
            rendered.push(Rendered {
                url: doc.url.clone(),
                resolved_url: doc.resolved_url.clone(),
                title: doc.title.clone(),
                status: "summarized_due_budget",
                content: summary,
            });
        } else {
            rendered.push(Rendered {
                url: doc.url.clone(),
                resolved_url: doc.resolved_url.clone(),
                title: doc.title.clone(),
                status: "full_content",
                content: doc.content.clone(),
            });
        }
    }

    // Enforce the combined budget across documents in order.
    let mut remaining = budget;
    for item in rendered.iter_mut() {
        if item.status == "fetch_error" {
            continue;
        }
        let len = item.content.chars().count();
        if len <= remaining {
            remaining -= len;
        } else {
            item.content = truncate_with_ellipsis(&item.content, remaining);
            item.status = "summary_truncated_due_budget";
            remaining = 0;
        }
    }

    let mut lines = vec!["Seed URL Content from Query:".to_string()];
    for (index, item) in rendered.iter().enumerate() {
        let mut header = format!("{}. URL: {}", index + 1, item.url);
        if !item.resolved_url.is_empty() && item.resolved_url != item.url {
            header.push_str(&format!(" (resolved: {})", item.resolved_url));
        }
        lines.push(header);
        lines.push(format!("   Delivery status: {}", item.status));
        if !item.title.is_empty() {
            lines.push(format!("   Title: {}", item.title));
        }
        lines.push("   Content:".to_string());
        lines.push(if item.content.is_empty() {
            "[empty]".to_string()
        } else {
            item.content.clone()
        });
        lines.push(String::new());
    }
    Some(lines.join("\n").trim().to_string())
}

fn collect_preloaded_source_urls(preload: &PreloadResolution) -> Vec<String> {
    let mut urls: Vec<String> = Vec::new();
    for item in &preload.local.ingested {
        if !item.source_handle.is_empty() {
            urls.push(item.source_handle.clone());
        } else if !item.target.is_empty() {
            urls.push(item.target.clone());
        }
    }
    for item in &preload.shortlist.candidates {
        urls.push(item.url.clone());
    }
    for item in &preload.shortlist.seed_url_documents {
        let url = if item.resolved_url.is_empty() { &item.url } else { &item.resolved_url };
        if !url.is_empty() && item.error.is_empty() {
            urls.push(url.clone());
        }
    }
    dedupe_preserve_order(urls)
}

fn collect_source_handles(preload: &PreloadResolution) -> HashMap<String, String> {
    let mut handles = HashMap::new();
    for item in &preload.local.ingested {
        if item.source_handle.is_empty() {
            continue;
        }
        handles.insert(item.source_handle.clone(), item.source_handle.clone());
        if !item.target.is_empty() {
            handles.insert(item.target.clone(), item.source_handle.clone());
        }
        if !item.url.is_empty() {
            handles.insert(item.url.clone(), item.source_handle.clone());
        }
    }
    handles
}

/// Parameters for one preload run.
pub struct PreloadParams<'a> {
    pub query_text: &'a str,
    pub research_mode: bool,
    pub model_config: &'a ModelConfig,
    pub lean: bool,
    pub preload_local_sources: bool,
    pub preload_shortlist: bool,
    pub shortlist_override: Option<&'a str>,
    pub additional_source_context: Option<&'a str>,
    pub local_corpus_paths: Option<&'a [String]>,
    pub session_row_id: Option<i64>,
    pub status: Option<Arc<dyn StatusSink>>,
}

/// Run the five preload stages in order, recording per-stage timings.
pub async fn run_preload_pipeline(
    runtime: &AskyRuntime,
    params: PreloadParams<'_>,
) -> PreloadResolution {
    let mut preload = PreloadResolution::default();
    let status = params.status.as_deref();

    // 1. Memory recall: all modes except lean.
    if runtime.config.memory.enabled && !params.lean {
        preload.memory_context = recall_memories_for_query(
            &runtime.store,
            &runtime.embedder,
            params.query_text,
            runtime.config.memory.recall_top_k,
            runtime.config.memory.recall_min_similarity,
            params.session_row_id,
        )
        .await;
    }

    // 2. Query expansion: research mode only.
    preload.sub_queries = vec![params.query_text.to_string()];
    if params.research_mode && runtime.config.query_expansion.enabled {
        notify(status, "Query expansion: decomposing question");
        let max = runtime.config.query_expansion.max_sub_queries;
        preload.sub_queries = match runtime.config.query_expansion.mode {
            ExpansionMode::Deterministic => expand_query_deterministic(params.query_text, max),
            ExpansionMode::Llm => {
                expand_query_with_llm(
                    &runtime.llm,
                    &params.model_config.model,
                    params.query_text,
                    max,
                )
                .await
            }
        };
        if preload.sub_queries.len() > 1 {
            notify(
                status,
                &format!("Query expanded into {} sub-queries", preload.sub_queries.len()),
            );
        }
    }

    // 3. Local ingestion: research mode with corpus requested.
    if params.research_mode && params.preload_local_sources {
        if let Some(paths) = params.local_corpus_paths.filter(|p| !p.is_empty()) {
            notify(status, "Local corpus: starting pre-LLM ingestion");
            let started = Instant::now();
            preload.local = ingest_local_sources(&runtime.cache, &runtime.retriever, paths).await;
            preload.local_elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
            preload.local_context = format_local_ingestion_context(&preload.local);
            notify(
                status,
                &format!(
                    "Local corpus ready: {} document(s) in {:.0}ms",
                    preload.local.ingested.len(),
                    preload.local_elapsed_ms
                ),
            );
        }
    }

    // 4. Shortlist.
    let (shortlist_enabled, shortlist_reason) = shortlist_enabled_for_request(
        params.lean,
        params.model_config,
        params.research_mode,
        params.shortlist_override,
        &runtime.config,
    );
    let (shortlist_enabled, shortlist_reason) = if params.preload_shortlist {
        (shortlist_enabled, shortlist_reason)
    } else {
        (false, "request_disabled")
    };
    preload.shortlist_enabled = shortlist_enabled;
    preload.shortlist_reason = shortlist_reason.to_string();

    if shortlist_enabled {
        notify(status, "Shortlist: starting pre-LLM retrieval");
        let started = Instant::now();
        let shortlist = SourceShortlist::new(
            runtime.config.shortlist.clone(),
            Some(Arc::clone(&runtime.embedder)),
            Arc::clone(&runtime.search),
            Arc::new(asky_research::shortlist::RetrieverFetchSource::new(Arc::clone(
                &runtime.retriever,
            ))),
            Arc::new(asky_research::shortlist::RetrieverSeedLinkSource::new(
                Arc::clone(&runtime.retriever),
                runtime.config.research.max_links_per_url,
            )),
        );
        let queries = if preload.sub_queries.len() > 1 {
            Some(preload.sub_queries.clone())
        } else {
            None
        };
        preload.shortlist = shortlist.run(params.query_text, queries, status).await;
        preload.shortlist_elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        if preload.shortlist.enabled {
            let context = format_shortlist_context(&preload.shortlist);
            preload.shortlist_context = (!context.is_empty()).then_some(context);
        }
        // Cache every fetched seed document so the turn itself reuses the
        // shortlist's fetches instead of refetching.
        for doc in &preload.shortlist.seed_url_documents {
            if doc.error.is_empty() && !doc.content.is_empty() {
                let url = if doc.resolved_url.is_empty() { &doc.url } else { &doc.resolved_url };
                let _ = runtime
                    .cache
                    .put(url, &doc.content, &doc.title, &[], false)
                    .await;
            }
        }
        notify(
            status,
            &format!(
                "Shortlist ready: {} selected in {:.0}ms",
                preload.shortlist.candidates.len(),
                preload.shortlist_elapsed_ms
            ),
        );
    } else {
        preload.shortlist = ShortlistResult::disabled();
        notify(status, &format!("Shortlist disabled ({shortlist_reason})"));
    }

    preload.seed_url_context = format_seed_url_context(
        runtime,
        &preload.shortlist,
        params.model_config,
        params.research_mode,
    )
    .await;
    preload.seed_url_direct_answer_ready = seed_url_context_allows_direct_answer(
        &preload.shortlist,
        params.model_config,
        params.research_mode,
    );
    preload.preloaded_source_urls = collect_preloaded_source_urls(&preload);
    preload.preloaded_source_handles = collect_source_handles(&preload);

    // 5. Bootstrap evidence: research mode with a preloaded corpus but a
    // thin shortlist.
    let has_good_shortlist =
        preload.shortlist.candidates.len() >= EVIDENCE_SKIP_SHORTLIST_THRESHOLD;
    if params.research_mode
        && runtime.config.research.evidence_extraction_enabled
        && preload.is_corpus_preloaded()
        && !has_good_shortlist
    {
        notify(status, "Evidence extraction: processing retrieved chunks");
        let started = Instant::now();
        let chunks = bootstrap_retrieve(runtime, &preload).await;
        if !chunks.is_empty() {
            preload.evidence = extract_evidence_from_chunks(
                &runtime.llm,
                &params.model_config.model,
                &chunks,
                params.query_text,
                runtime.config.research.evidence_extraction_max_chunks,
            )
            .await;
            preload.evidence_context = format_evidence_context(&preload.evidence);
            preload.evidence_elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
            notify(
                status,
                &format!(
                    "Evidence extraction ready: {} facts extracted in {:.0}ms",
                    preload.evidence.len(),
                    preload.evidence_elapsed_ms
                ),
            );
        }
    }

    preload.combined_context = combine_preloaded_source_context(&[
        preload.local_context.as_deref(),
        preload.seed_url_context.as_deref(),
        preload.shortlist_context.as_deref(),
        preload.evidence_context.as_deref(),
        params.additional_source_context,
    ]);

    debug!(
        sources = preload.preloaded_source_urls.len(),
        seed_ready = preload.seed_url_direct_answer_ready,
        "preload pipeline completed"
    );
    preload
}

/// One deterministic retrieval pass over the preloaded corpus for each
/// sub-query, feeding the evidence extractor.
async fn bootstrap_retrieve(runtime: &AskyRuntime, preload: &PreloadResolution) -> Vec<EvidenceChunk> {
    let mut chunks = Vec::new();
    let sources: Vec<&String> = preload
        .preloaded_source_urls
        .iter()
        .take(BOOTSTRAP_MAX_SOURCES)
        .collect();

    for source in sources {
        let token = parse_corpus_source_token(source);
        let entry = if token.is_corpus {
            token
                .cache_id
                .and_then(|id| runtime.cache.lookup_by_id(id).ok().flatten())
        } else {
            runtime.cache.lookup(source).ok().flatten()
        };
        let Some(entry) = entry else { continue };
        if entry.content.is_empty() {
            continue;
        }

        let model = runtime.vector.embedding_model().to_string();
        let has = runtime
            .vector
            .has_chunk_embeddings_for_model(entry.id, &model)
            .unwrap_or(false);
        if !has {
            let text_chunks = chunk_text(&entry.content);
            if runtime
                .vector
                .store_chunk_embeddings(entry.id, &text_chunks)
                .await
                .unwrap_or(0)
                == 0
            {
                continue;
            }
        }

        for query in &preload.sub_queries {
            if let Ok(ranked) = runtime
                .vector
                .search_chunks_hybrid(
                    entry.id,
                    query,
                    BOOTSTRAP_MAX_CHUNKS_PER_SOURCE,
                    asky_research::DEFAULT_DENSE_WEIGHT,
                    0.0,
                )
                .await
            {
                for chunk in ranked {
                    chunks.push(EvidenceChunk {
                        text: chunk.text,
                        source_url: source.clone(),
                    });
                }
            }
        }
    }
    chunks
}

fn notify(status: Option<&dyn StatusSink>, message: &str) {
    if let Some(sink) = status {
        sink.status(message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use asky_core::config::ModelConfig;
    use asky_research::shortlist::SeedUrlDocument;

    fn model(context_size: usize) -> ModelConfig {
        ModelConfig {
            model: "test".to_string(),
            base_url: None,
            context_size,
            max_turns: None,
            max_tokens: 1024,
            temperature: None,
            source_shortlist_enabled: None,
        }
    }

    fn shortlist_with_seed(content_len: usize, error: &str) -> ShortlistResult {
        let mut result = ShortlistResult::disabled();
        result.enabled = true;
        result.seed_url_documents.push(SeedUrlDocument {
            url: "https://ex.com/a".to_string(),
            resolved_url: "https://ex.com/a".to_string(),
            title: "A".to_string(),
            content: "x".repeat(content_len),
            error: error.to_string(),
            warning: String::new(),
        });
        result
    }

    #[test]
    fn direct_answer_requires_clean_fetches_within_budget() {
        let m = model(1000); // budget = 1000 * 4 * 0.8 = 3200 chars
        assert!(seed_url_context_allows_direct_answer(
            &shortlist_with_seed(3000, ""),
            &m,
            false
        ));
        assert!(!seed_url_context_allows_direct_answer(
            &shortlist_with_seed(4000, ""),
            &m,
            false
        ));
        assert!(!seed_url_context_allows_direct_answer(
            &shortlist_with_seed(100, "boom"),
            &m,
            false
        ));
        assert!(!seed_url_context_allows_direct_answer(
            &shortlist_with_seed(100, ""),
            &m,
            true
        ));
    }

    #[test]
    fn enablement_precedence_is_lean_request_model_global() {
        let config = AskyConfig::default();
        let mut m = model(1000);

        assert_eq!(
            shortlist_enabled_for_request(true, &m, true, Some("on"), &config),
            (false, "lean_flag")
        );
        assert_eq!(
            shortlist_enabled_for_request(false, &m, true, Some("off"), &config),
            (false, "request_override_off")
        );
        assert_eq!(
            shortlist_enabled_for_request(false, &m, false, Some("on"), &config),
            (true, "request_override_on")
        );

        m.source_shortlist_enabled = Some(false);
        assert_eq!(
            shortlist_enabled_for_request(false, &m, true, None, &config),
            (false, "model_override")
        );

        m.source_shortlist_enabled = None;
        assert_eq!(
            shortlist_enabled_for_request(false, &m, true, None, &config),
            (true, "global_research_mode")
        );
        assert_eq!(
            shortlist_enabled_for_request(false, &m, false, None, &config),
            (false, "global_standard_mode")
        );
    }

    #[test]
    fn combine_skips_empty_blocks() {
        let combined =
            combine_preloaded_source_context(&[Some("a"), None, Some("  "), Some("b")]).unwrap();
        assert_eq!(combined, "a\n\nb");
        assert!(combine_preloaded_source_context(&[None, Some("")]).is_none());
    }
}
