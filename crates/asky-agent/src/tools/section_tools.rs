//! Local-corpus-only section tools: `list_sections` and
//! `summarize_section`.

use std::sync::Arc;

use async_trait::async_trait;

use asky_llm::{Summarizer, UsageTracker};
use asky_research::sections::{
    build_section_index, get_listable_sections, match_section_strict, slice_section_content,
    MIN_SUMMARIZE_SECTION_CHARS,
};
use asky_research::urlutil::{
    format_corpus_handle, format_section_ref, is_local_filesystem_target,
    parse_corpus_source_token, CorpusToken,
};
use asky_research::{CacheEntry, ResearchCache};

use crate::registry::{error_payload, ToolExecutor};
use crate::tools::research_tools::{resolve_section_scope, section_suggestions};
use crate::tools::{extract_source_targets, string_list};

const SECTION_DETAIL_DEFAULT: &str = "balanced";

fn section_summary_prompt(detail: &str) -> &'static str {
    match detail {
        "compact" => "Summarize this section concisely with high signal bullets and key claims.",
        "max" => {
            "Produce an exhaustive section summary with deep structural coverage, \
             sub-arguments, evidence, caveats, and practical implications."
        }
        _ => {
            "Produce a comprehensive section summary with argument flow, concrete examples, \
             caveats, and implications."
        }
    }
}

fn section_summary_max_chars(detail: &str) -> usize {
    match detail {
        "compact" => 2800,
        "max" => 12_000,
        _ => 7200,
    }
}

fn normalize_detail(raw: Option<&str>) -> String {
    let detail = raw.unwrap_or(SECTION_DETAIL_DEFAULT).trim().to_lowercase();
    match detail.as_str() {
        "compact" | "balanced" | "max" => detail,
        _ => SECTION_DETAIL_DEFAULT.to_string(),
    }
}

/// Section-source selectors: `source`, `sources`, then generic targets.
fn extract_section_sources(args: &serde_json::Value) -> Vec<String> {
    let mut sources = Vec::new();
    if let Some(single) = args.get("source").and_then(|v| v.as_str()) {
        if !single.trim().is_empty() {
            sources.push(asky_research::urlutil::sanitize_url(single));
        }
    }
    sources.extend(
        string_list(args.get("sources"))
            .iter()
            .map(|s| asky_research::urlutil::sanitize_url(s)),
    );
    if sources.is_empty() {
        return extract_source_targets(args, true);
    }
    asky_research::text::dedupe_preserve_order(sources)
}

fn looks_like_web_url(source: &str) -> bool {
    let lowered = source.to_lowercase();
    lowered.starts_with("http://") || lowered.starts_with("https://")
}

/// Resolve a local section source, enforcing corpus-handle constraints.
fn resolve_local_section_source(
    cache: &ResearchCache,
    source: &str,
    source_mode: &str,
) -> (Option<CacheEntry>, Option<String>, CorpusToken) {
    if looks_like_web_url(source) {
        return (
            None,
            Some(
                "Web URLs are not supported by this tool. Use local corpus handles \
                 (corpus://cache/<id>)."
                    .to_string(),
            ),
            parse_corpus_source_token(source),
        );
    }

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
                Some(
                    "Not cached. Ingest the local corpus first, then retry with this handle."
                        .to_string(),
                ),
                token,
            ),
            Err(e) => (None, Some(format!("cache error: {e}")), token),
        };
    }

    if source_mode == "mixed" {
        return (
            None,
            Some(
                "In mixed mode, only corpus handles are accepted for section tools \
                 (corpus://cache/<id>)."
                    .to_string(),
            ),
            token,
        );
    }

    if is_local_filesystem_target(source) {
        let url = if source.starts_with("file://") {
            source.to_string()
        } else {
            format!("file://{source}")
        };
        return match cache.lookup(&url) {
            Ok(Some(entry)) => (Some(entry), None, token),
            Ok(None) => (
                None,
                Some(
                    "Local source not cached. Ingest this source first and use its corpus handle."
                        .to_string(),
                ),
                token,
            ),
            Err(e) => (None, Some(format!("cache error: {e}")), token),
        };
    }

    (
        None,
        Some("Unsupported section source. Use corpus://cache/<id> from the local corpus cache."
            .to_string()),
        token,
    )
}

// ---------------------------------------------------------------------------
// list_sections
// ---------------------------------------------------------------------------

pub struct ListSectionsTool {
    cache: Arc<ResearchCache>,
    source_mode: String,
}

impl ListSectionsTool {
    pub fn new(cache: Arc<ResearchCache>, source_mode: impl Into<String>) -> Self {
        Self { cache, source_mode: source_mode.into() }
    }
}

#[async_trait]
impl ToolExecutor for ListSectionsTool {
    async fn execute(&self, args: serde_json::Value) -> serde_json::Value {
        let sources = extract_section_sources(&args);
        if sources.is_empty() {
            return error_payload("No sources provided. Specify 'source', 'sources', or 'corpus_urls'.");
        }
        let include_toc = args.get("include_toc").and_then(|v| v.as_bool()).unwrap_or(false);

        let mut results = serde_json::Map::new();
        for source in sources {
            let (entry, lookup_error, _token) =
                resolve_local_section_source(&self.cache, &source, &self.source_mode);
            let Some(entry) = entry else {
                results.insert(source, error_payload(lookup_error.unwrap_or_default()));
                continue;
            };
            if entry.content.trim().is_empty() {
                results.insert(source, error_payload("Cached content is empty."));
                continue;
            }

            let index = build_section_index(&entry.content);
            let sections = get_listable_sections(&index, include_toc);
            let rows: Vec<serde_json::Value> = sections
                .iter()
                .map(|section| {
                    let mut row = serde_json::json!({
                        "id": section.id,
                        "title": section.title,
                        "char_count": section.char_count,
                        "section_ref": format_section_ref(entry.id, &section.id),
                    });
                    if include_toc {
                        row["is_toc"] = serde_json::json!(section.is_toc);
                    }
                    row
                })
                .collect();

            results.insert(
                source,
                serde_json::json!({
                    "title": entry.title,
                    "section_count": rows.len(),
                    "all_section_count": index.sections.len(),
                    "sections": rows,
                }),
            );
        }

        serde_json::Value::Object(results)
    }
}

// ---------------------------------------------------------------------------
// summarize_section
// ---------------------------------------------------------------------------

pub struct SummarizeSectionTool {
    cache: Arc<ResearchCache>,
    summarizer: Arc<Summarizer>,
    summarization_tracker: Arc<UsageTracker>,
    source_mode: String,
}

impl SummarizeSectionTool {
    pub fn new(
        cache: Arc<ResearchCache>,
        summarizer: Arc<Summarizer>,
        summarization_tracker: Arc<UsageTracker>,
        source_mode: impl Into<String>,
    ) -> Self {
        Self {
            cache,
            summarizer,
            summarization_tracker,
            source_mode: source_mode.into(),
        }
    }
}

#[async_trait]
impl ToolExecutor for SummarizeSectionTool {
    async fn execute(&self, args: serde_json::Value) -> serde_json::Value {
        let mut sources = extract_section_sources(&args);

        // A lone section_ref is enough: its cache id names the source.
        if sources.is_empty() {
            if let Some(section_ref) = args.get("section_ref").and_then(|v| v.as_str()) {
                let parsed = parse_corpus_source_token(section_ref);
                match (parsed.is_corpus, parsed.error.is_none(), parsed.cache_id) {
                    (true, true, Some(cache_id)) => sources.push(format_corpus_handle(cache_id)),
                    _ => {
                        return error_payload(
                            "section_ref must use corpus format: \
                             corpus://cache/<id>#section=<section-id>.",
                        )
                    }
                }
            }
        }

        if sources.is_empty() {
            return error_payload("No source provided. Specify 'source' or 'corpus_urls'.");
        }
        if sources.len() > 1 {
            return error_payload(
                "summarize_section requires exactly one source. \
                 Call list_sections first and pass one corpus://cache/<id> source.",
            );
        }
        let source = sources.remove(0);

        let (entry, lookup_error, token) =
            resolve_local_section_source(&self.cache, &source, &self.source_mode);
        let Some(entry) = entry else {
            let mut payload = error_payload(lookup_error.unwrap_or_default());
            payload["source"] = serde_json::json!(source);
            return payload;
        };
        if entry.content.trim().is_empty() {
            return error_payload("Cached content is empty.");
        }

        let canonical_source = format_corpus_handle(entry.id);
        let index = build_section_index(&entry.content);
        if get_listable_sections(&index, false).is_empty() {
            let mut payload = error_payload("No sections detected for this source.");
            payload["source"] = serde_json::json!(canonical_source);
            return payload;
        }
        let suggestions = section_suggestions(&entry.content, Some(entry.id), 8);

        let mut requested_section = match resolve_section_scope(&token, &args) {
            Ok(section) => section,
            Err(e) => return error_payload(e),
        };
        let mut confidence = 1.0f64;

        if requested_section.is_none() {
            let section_query = args
                .get("section_query")
                .and_then(|v| v.as_str())
                .map(str::trim)
                .unwrap_or("");
            if section_query.is_empty() {
                let mut payload =
                    error_payload("section_ref, section_id, or section_query is required.");
                payload["source"] = serde_json::json!(canonical_source);
                payload["suggestions"] = serde_json::json!(suggestions);
                return payload;
            }
            let matched = match_section_strict(section_query, &index);
            if !matched.matched {
                let enriched: Vec<serde_json::Value> = matched
                    .suggestions
                    .iter()
                    .map(|s| {
                        serde_json::json!({
                            "id": s.id,
                            "title": s.title,
                            "section_ref": format_section_ref(entry.id, &s.id),
                        })
                    })
                    .collect();
                let mut payload = error_payload("No strict section match found.");
                payload["source"] = serde_json::json!(canonical_source);
                payload["confidence"] = serde_json::json!(matched.confidence);
                payload["reason"] = serde_json::json!(matched.reason);
                payload["suggestions"] = serde_json::json!(enriched);
                return payload;
            }
            confidence = matched.confidence;
            requested_section = matched.section.map(|s| s.id);
        }
        let requested_section = requested_section.unwrap_or_default();

        let detail = normalize_detail(args.get("detail").and_then(|v| v.as_str()));
        let max_chunks = match args.get("max_chunks") {
            None | Some(serde_json::Value::Null) => None,
            Some(value) => match value.as_u64() {
                Some(v) => Some(v as usize),
                None => {
                    let mut payload = error_payload("max_chunks must be an integer.");
                    payload["source"] = serde_json::json!(canonical_source);
                    return payload;
                }
            },
        };

        let slice = slice_section_content(&entry.content, &index, &requested_section, max_chunks);
        if let Some(error) = slice.error {
            let mut payload = error_payload(error);
            payload["source"] = serde_json::json!(canonical_source);
            payload["requested_section_id"] = serde_json::json!(requested_section);
            payload["suggestions"] = serde_json::json!(suggestions);
            return payload;
        }

        let section_text = slice.content.trim().to_string();
        if section_text.is_empty() {
            let mut payload = error_payload("Matched section has no content.");
            payload["source"] = serde_json::json!(canonical_source);
            return payload;
        }

        let resolved = slice.section.clone();
        let resolved_id = slice.resolved_section_id.clone();
        let section_meta = serde_json::json!({
            "id": resolved_id,
            "title": resolved.as_ref().map(|s| s.title.clone()).unwrap_or_default(),
            "char_count": resolved.as_ref().map(|s| s.char_count).unwrap_or(0),
            "confidence": (confidence * 1000.0).round() / 1000.0,
            "section_ref": format_section_ref(entry.id, &resolved_id),
        });

        if section_text.chars().count() < MIN_SUMMARIZE_SECTION_CHARS {
            let mut payload = error_payload(format!(
                "Resolved section is too small to summarize reliably ({} chars).",
                section_text.chars().count()
            ));
            payload["source"] = serde_json::json!(canonical_source);
            payload["requested_section_id"] = serde_json::json!(slice.requested_section_id);
            payload["resolved_section_id"] = serde_json::json!(resolved_id);
            payload["auto_promoted"] = serde_json::json!(slice.auto_promoted);
            payload["section"] = section_meta;
            payload["min_required_chars"] = serde_json::json!(MIN_SUMMARIZE_SECTION_CHARS);
            payload["suggestions"] = serde_json::json!(suggestions);
            return payload;
        }

        let prompt = format!(
            "{}\nFocus section title: {}\nDo not include unrelated section material.",
            section_summary_prompt(&detail),
            resolved.as_ref().map(|s| s.title.clone()).unwrap_or_default()
        );
        let summary = match self
            .summarizer
            .summarize(
                &section_text,
                &prompt,
                section_summary_max_chars(&detail),
                Some(&self.summarization_tracker),
                None,
            )
            .await
        {
            Ok(summary) => summary,
            Err(e) => return error_payload(format!("summarization failed: {e}")),
        };

        serde_json::json!({
            "source": canonical_source,
            "title": entry.title,
            "section": section_meta,
            "requested_section_id": slice.requested_section_id,
            "resolved_section_id": resolved_id,
            "auto_promoted": slice.auto_promoted,
            "detail": detail,
            "summary": summary,
            "section_text_chars": section_text.chars().count(),
            "truncated": slice.truncated,
            "available_chunks": slice.available_chunks,
            "suggestions": suggestions,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detail_normalization_falls_back_to_balanced() {
        assert_eq!(normalize_detail(Some("MAX")), "max");
        assert_eq!(normalize_detail(Some("weird")), "balanced");
        assert_eq!(normalize_detail(None), "balanced");
    }

    #[test]
    fn web_urls_are_rejected_for_section_sources() {
        let cache = ResearchCache::open_in_memory(24).unwrap();
        let (entry, error, _) =
            resolve_local_section_source(&cache, "https://ex.com/page", "local_only");
        assert!(entry.is_none());
        assert!(error.unwrap().contains("Web URLs are not supported"));
    }

    #[test]
    fn mixed_mode_requires_corpus_handles() {
        let cache = ResearchCache::open_in_memory(24).unwrap();
        let (entry, error, _) = resolve_local_section_source(&cache, "/tmp/doc.md", "mixed");
        assert!(entry.is_none());
        assert!(error.unwrap().contains("mixed mode"));
    }
}
