//! Pre-LLM source shortlist: parse → collect → fetch → score → select.

pub mod collect;
pub mod keyphrase;
pub mod score;
pub mod types;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tracing::debug;

use asky_core::config::ShortlistConfig;

use crate::embeddings::Embedder;
use crate::html::OutputFormat;
use crate::retrieval::{derive_title_from_url, FetchedDocument, Retriever};
use crate::text::normalize_whitespace;
use crate::urlutil::{extract_prompt_urls_and_query_text, hostname_of, normalize_url};

pub use types::{
    CandidateRecord, SearchHit, SearchProvider, SeedLinkSource, SeedUrlDocument, SelectedTrace,
    ShortlistCandidate, ShortlistMetrics, ShortlistResult, ShortlistStats, ShortlistTimings,
    ShortlistTrace, SourceType, StatusSink, TraceCandidate,
};
pub use types::FetchSource;

const MAX_TITLE_CHARS: usize = 180;
const MAX_SHORTLIST_CONTEXT_ITEMS: usize = 5;
const MAX_SHORTLIST_CONTEXT_SNIPPET_CHARS: usize = 420;

/// Fetch candidates through the shared retrieval helper.
pub struct RetrieverFetchSource {
    retriever: Arc<Retriever>,
}

impl RetrieverFetchSource {
    pub fn new(retriever: Arc<Retriever>) -> Self {
        Self { retriever }
    }
}

#[async_trait]
impl FetchSource for RetrieverFetchSource {
    async fn fetch(&self, url: &str) -> FetchedDocument {
        self.retriever
            .fetch_url_document(url, OutputFormat::Text, false, 0)
            .await
    }
}

/// Seed-link expansion through the shared retrieval helper, skipping
/// header/nav/footer/aside containers.
pub struct RetrieverSeedLinkSource {
    retriever: Arc<Retriever>,
    max_links: usize,
}

impl RetrieverSeedLinkSource {
    pub fn new(retriever: Arc<Retriever>, max_links: usize) -> Self {
        Self { retriever, max_links }
    }
}

#[async_trait]
impl SeedLinkSource for RetrieverSeedLinkSource {
    async fn links(&self, url: &str) -> FetchedDocument {
        self.retriever.fetch_seed_links(url, self.max_links).await
    }
}

/// Null search backend for configurations without a search provider.
pub struct DisabledSearch;

#[async_trait]
impl SearchProvider for DisabledSearch {
    async fn search(&self, _query: &str, _count: usize) -> Result<Vec<SearchHit>, String> {
        Ok(Vec::new())
    }
}

/// Ranks candidate sources for a prompt before the first LLM call.
pub struct SourceShortlist {
    cfg: ShortlistConfig,
    embedder: Option<Arc<dyn Embedder>>,
    search: Arc<dyn SearchProvider>,
    fetch: Arc<dyn FetchSource>,
    seed_links: Arc<dyn SeedLinkSource>,
}

impl SourceShortlist {
    pub fn new(
        cfg: ShortlistConfig,
        embedder: Option<Arc<dyn Embedder>>,
        search: Arc<dyn SearchProvider>,
        fetch: Arc<dyn FetchSource>,
        seed_links: Arc<dyn SeedLinkSource>,
    ) -> Self {
        Self {
            cfg,
            embedder,
            search,
            fetch,
            seed_links,
        }
    }

    /// Run the full pipeline. `queries` carries pre-expanded sub-queries
    /// when query expansion produced more than one.
    pub async fn run(
        &self,
        user_prompt: &str,
        queries: Option<Vec<String>>,
        status: Option<&dyn StatusSink>,
    ) -> ShortlistResult {
        let total_start = Instant::now();
        let mut metrics = ShortlistMetrics::default();
        let mut warnings: Vec<String> = Vec::new();

        notify(status, "Shortlist: parsing prompt");
        let parse_start = Instant::now();
        let (seed_urls, query_text) = extract_prompt_urls_and_query_text(user_prompt);
        let keyphrases = keyphrase::extract_keyphrases(
            &query_text,
            self.cfg.keyphrase_min_query_chars,
            self.cfg.keyphrase_top_k,
        );
        let search_queries = match &queries {
            Some(qs) if !qs.is_empty() => qs.clone(),
            _ => vec![keyphrase::build_search_query(
                &query_text,
                &keyphrases,
                self.cfg.search_phrase_count,
            )],
        };
        let parse_ms = elapsed_ms(parse_start);

        notify(status, "Shortlist: collecting candidates");
        let collect_start = Instant::now();
        let candidates = collect::collect_candidates(
            &seed_urls,
            &search_queries,
            self.search.as_ref(),
            self.seed_links.as_ref(),
            &self.cfg,
            &mut warnings,
            &mut metrics,
        )
        .await;
        let collect_ms = elapsed_ms(collect_start);

        let processed_candidates: Vec<TraceCandidate> = candidates
            .iter()
            .take(self.cfg.max_fetch_urls)
            .map(|c| TraceCandidate {
                url: c.url.clone(),
                normalized_url: c.normalized_url.clone(),
                source_type: c.source_type,
                hostname: c.hostname.clone(),
            })
            .collect();

        if candidates.is_empty() {
            notify(status, "Shortlist: no candidates found");
            return self.finish(
                seed_urls,
                query_text,
                search_queries,
                keyphrases,
                Vec::new(),
                Vec::new(),
                warnings,
                metrics,
                ShortlistTimings {
                    parse: parse_ms,
                    collect: collect_ms,
                    fetch: 0.0,
                    score: 0.0,
                    total: elapsed_ms(total_start),
                },
                processed_candidates,
            );
        }

        notify(status, "Shortlist: fetching source content");
        let fetch_start = Instant::now();
        let (mut fetched, seed_documents) = self
            .fetch_candidates(candidates, &seed_urls, &mut warnings, &mut metrics)
            .await;
        let fetch_ms = elapsed_ms(fetch_start);

        if fetched.is_empty() {
            notify(status, "Shortlist: no usable page content");
            return self.finish(
                seed_urls,
                query_text,
                search_queries,
                keyphrases,
                Vec::new(),
                seed_documents,
                warnings,
                metrics,
                ShortlistTimings {
                    parse: parse_ms,
                    collect: collect_ms,
                    fetch: fetch_ms,
                    score: 0.0,
                    total: elapsed_ms(total_start),
                },
                processed_candidates,
            );
        }

        notify(status, "Shortlist: ranking candidates");
        let score_start = Instant::now();
        let scoring_queries = score::resolve_scoring_queries(
            queries.as_deref(),
            &query_text,
            &keyphrases,
            &fetched,
            &self.cfg,
        );
        let seed_hostnames: HashSet<String> =
            seed_urls.iter().map(|u| hostname_of(&normalize_url(u))).collect();
        score::score_candidates(
            &mut fetched,
            &scoring_queries,
            &keyphrases,
            &seed_hostnames,
            self.embedder.as_ref(),
            &self.cfg,
            &mut warnings,
            &mut metrics,
        )
        .await;
        let score_ms = elapsed_ms(score_start);

        fetched.sort_by(|a, b| {
            b.final_score
                .partial_cmp(&a.final_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        fetched.truncate(self.cfg.top_k);

        notify(
            status,
            &format!("Shortlist: selected {} source(s)", fetched.len()),
        );

        let selected: Vec<ShortlistCandidate> = fetched
            .iter()
            .enumerate()
            .map(|(index, record)| ShortlistCandidate {
                rank: index + 1,
                final_score: round4(record.final_score),
                semantic_score: round4(record.semantic_score),
                url: record.url.clone(),
                normalized_url: record.normalized_url.clone(),
                hostname: record.hostname.clone(),
                title: record.title.clone(),
                why_selected: record.why_selected.clone(),
                snippet: record.snippet.clone(),
                date: record.date.clone(),
                source_type: record.source_type,
            })
            .collect();

        self.finish(
            seed_urls,
            query_text,
            search_queries,
            keyphrases,
            selected,
            seed_documents,
            warnings,
            metrics,
            ShortlistTimings {
                parse: parse_ms,
                collect: collect_ms,
                fetch: fetch_ms,
                score: score_ms,
                total: elapsed_ms(total_start),
            },
            processed_candidates,
        )
    }

    async fn fetch_candidates(
        &self,
        candidates: Vec<CandidateRecord>,
        seed_urls: &[String],
        warnings: &mut Vec<String>,
        metrics: &mut ShortlistMetrics,
    ) -> (Vec<CandidateRecord>, Vec<SeedUrlDocument>) {
        let mut fetched: Vec<CandidateRecord> = Vec::new();
        let mut seed_documents: Vec<SeedUrlDocument> = Vec::new();
        let mut seen_canonical: HashSet<String> = HashSet::new();
        let mut seeds_covered: HashSet<String> = HashSet::new();

        for mut candidate in candidates.into_iter().take(self.cfg.max_fetch_urls) {
            metrics.fetch_calls += 1;
            let payload = self.fetch.fetch(&candidate.url).await;

            if candidate.source_type == SourceType::Seed {
                seeds_covered.insert(candidate.url.clone());
                seed_documents.push(seed_document_from(&candidate.url, &payload));
            }

            if let Some(error) = &payload.error {
                metrics.fetch_failures += 1;
                warnings.push(format!("fetch_error:{error}"));
                continue;
            }

            let text = normalize_whitespace(&payload.content);
            if text.chars().count() < self.cfg.min_content_chars {
                if text.is_empty() {
                    metrics.fetch_failures += 1;
                } else {
                    metrics.fetch_short_text_skips += 1;
                }
                debug!(url = %candidate.url, text_len = text.len(), "fetch skipped: thin content");
                continue;
            }

            let fetched_title = normalize_whitespace(&payload.title);
            candidate.title = if !fetched_title.is_empty() {
                fetched_title.chars().take(MAX_TITLE_CHARS).collect()
            } else if !candidate.title.is_empty() {
                candidate.title.clone()
            } else {
                derive_title_from_url(&candidate.url)
            };

            // Canonical URL handling: a redirect may land on an already
            // fetched page.
            if !payload.final_url.is_empty() && payload.final_url != candidate.url {
                let normalized_final = normalize_url(&payload.final_url);
                if !normalized_final.is_empty() {
                    candidate.url = payload.final_url.clone();
                    candidate.normalized_url = normalized_final;
                    candidate.hostname = hostname_of(&candidate.normalized_url);
                }
            }
            if !seen_canonical.insert(candidate.normalized_url.clone()) {
                metrics.fetch_canonical_dedupe_skips += 1;
                continue;
            }

            candidate.text = text.chars().take(self.cfg.max_scoring_chars).collect();
            candidate.snippet = candidate.text.chars().take(self.cfg.snippet_chars).collect();
            candidate.date = payload.date.clone();
            if let Some(warning) = payload.warning {
                warnings.push(warning);
            }
            metrics.fetch_success += 1;
            fetched.push(candidate);
        }

        // Every seed URL must appear in seed_url_documents, even the ones
        // that fell outside the fetch budget.
        for seed in seed_urls {
            if seeds_covered.contains(seed) {
                continue;
            }
            let payload = self.fetch.fetch(seed).await;
            metrics.fetch_calls += 1;
            seed_documents.push(seed_document_from(seed, &payload));
        }

        (fetched, seed_documents)
    }

    #[allow(clippy::too_many_arguments)]
    fn finish(
        &self,
        seed_urls: Vec<String>,
        query_text: String,
        search_queries: Vec<String>,
        keyphrases: Vec<String>,
        candidates: Vec<ShortlistCandidate>,
        seed_url_documents: Vec<SeedUrlDocument>,
        warnings: Vec<String>,
        metrics: ShortlistMetrics,
        timings_ms: ShortlistTimings,
        processed_candidates: Vec<TraceCandidate>,
    ) -> ShortlistResult {
        let selected_candidates: Vec<SelectedTrace> = candidates
            .iter()
            .map(|c| SelectedTrace {
                rank: c.rank,
                final_score: c.final_score,
                url: c.url.clone(),
                normalized_url: c.normalized_url.clone(),
                source_type: c.source_type,
            })
            .collect();

        debug!(
            seeds = seed_urls.len(),
            selected = candidates.len(),
            warnings = warnings.len(),
            total_ms = timings_ms.total,
            "shortlist completed"
        );

        ShortlistResult {
            enabled: true,
            seed_urls,
            search_query: search_queries.first().cloned().unwrap_or_default(),
            search_queries,
            query_text,
            keyphrases,
            candidates,
            seed_url_documents,
            warnings,
            stats: ShortlistStats { metrics, timings_ms },
            trace: ShortlistTrace {
                processed_candidates,
                selected_candidates,
            },
        }
    }
}

fn seed_document_from(url: &str, payload: &FetchedDocument) -> SeedUrlDocument {
    SeedUrlDocument {
        url: url.to_string(),
        resolved_url: payload.final_url.clone(),
        title: normalize_whitespace(&payload.title),
        content: if payload.error.is_some() {
            String::new()
        } else {
            payload.content.clone()
        },
        error: payload.error.clone().unwrap_or_default(),
        warning: payload.warning.clone().unwrap_or_default(),
    }
}

/// Format selected candidates into a compact prompt-context block.
pub fn format_shortlist_context(result: &ShortlistResult) -> String {
    if result.candidates.is_empty() {
        return String::new();
    }
    let mut blocks: Vec<String> = Vec::new();
    for item in result.candidates.iter().take(MAX_SHORTLIST_CONTEXT_ITEMS) {
        let title = if item.title.is_empty() { &item.url } else { &item.title };
        let why = if item.why_selected.is_empty() {
            "ranked by semantic relevance".to_string()
        } else {
            item.why_selected.join("; ")
        };
        let snippet: String = normalize_whitespace(&item.snippet)
            .chars()
            .take(MAX_SHORTLIST_CONTEXT_SNIPPET_CHARS)
            .collect();
        blocks.push(format!(
            "{}. {} (score={:.3})\nURL: {}\nWhy: {}\nSnippet: {}",
            item.rank, title, item.final_score, item.url, why, snippet
        ));
    }
    blocks.join("\n\n")
}

fn notify(status: Option<&dyn StatusSink>, message: &str) {
    if let Some(sink) = status {
        sink.status(message);
    }
}

fn elapsed_ms(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}

fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct StaticFetch {
        pages: Vec<(String, FetchedDocument)>,
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl FetchSource for StaticFetch {
        async fn fetch(&self, url: &str) -> FetchedDocument {
            self.calls.lock().unwrap().push(url.to_string());
            self.pages
                .iter()
                .find(|(u, _)| u == url)
                .map(|(_, doc)| doc.clone())
                .unwrap_or_else(|| FetchedDocument {
                    final_url: url.to_string(),
                    error: Some("not found".to_string()),
                    ..Default::default()
                })
        }
    }

    struct NoSeedLinks;

    #[async_trait]
    impl SeedLinkSource for NoSeedLinks {
        async fn links(&self, url: &str) -> FetchedDocument {
            FetchedDocument {
                final_url: url.to_string(),
                ..Default::default()
            }
        }
    }

    fn page(url: &str, content: &str) -> (String, FetchedDocument) {
        (
            url.to_string(),
            FetchedDocument {
                content: content.to_string(),
                title: format!("Title of {url}"),
                final_url: url.to_string(),
                ..Default::default()
            },
        )
    }

    fn shortlist_with(pages: Vec<(String, FetchedDocument)>) -> (SourceShortlist, Arc<StaticFetch>) {
        let mut cfg = asky_core::config::ShortlistConfig::default();
        cfg.seed_link_expansion_enabled = false;
        let fetch = Arc::new(StaticFetch { pages, calls: Mutex::new(Vec::new()) });
        let shortlist = SourceShortlist::new(
            cfg,
            None,
            Arc::new(DisabledSearch),
            Arc::clone(&fetch) as Arc<dyn FetchSource>,
            Arc::new(NoSeedLinks),
        );
        (shortlist, fetch)
    }

    #[tokio::test]
    async fn seed_urls_become_candidates_and_seed_documents() {
        let body = "Plenty of substantial page content about the subject matter at hand, \
                    repeated to pass the thin-content filter. "
            .repeat(8);
        let (shortlist, fetch) = shortlist_with(vec![
            page("https://ex.com/a", &body),
            page("https://ex.com/b", &body),
        ]);

        let result = shortlist
            .run("Summarize https://ex.com/a and https://ex.com/b", None, None)
            .await;

        assert!(result.enabled);
        assert_eq!(result.seed_urls.len(), 2);
        assert_eq!(result.seed_url_documents.len(), 2);
        assert!(result.seed_url_documents.iter().all(|d| d.error.is_empty()));
        assert_eq!(result.candidates.len(), 2);
        assert_eq!(result.candidates[0].rank, 1);
        // One fetch per candidate, no refetch for seed documents.
        assert_eq!(fetch.calls.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn failed_seed_appears_only_in_seed_documents() {
        let body = "Good content for ranking purposes with enough length to pass filters. "
            .repeat(8);
        let (shortlist, _fetch) = shortlist_with(vec![page("https://ex.com/good", &body)]);

        let result = shortlist
            .run("Check https://ex.com/good and https://ex.com/missing", None, None)
            .await;

        assert_eq!(result.candidates.len(), 1);
        assert_eq!(result.candidates[0].url, "https://ex.com/good");

        let missing = result
            .seed_url_documents
            .iter()
            .find(|d| d.url == "https://ex.com/missing")
            .unwrap();
        assert!(!missing.error.is_empty());
        assert!(missing.content.is_empty());
    }

    #[tokio::test]
    async fn canonical_redirect_dedupes() {
        let body = "Canonical page content long enough to clear the minimum threshold. "
            .repeat(8);
        let canonical = FetchedDocument {
            content: body.clone(),
            title: "Canonical".to_string(),
            final_url: "https://ex.com/canonical".to_string(),
            ..Default::default()
        };
        let (shortlist, _fetch) = shortlist_with(vec![
            ("https://ex.com/canonical".to_string(), canonical.clone()),
            ("https://ex.com/alias".to_string(), canonical),
        ]);

        let result = shortlist
            .run(
                "Read https://ex.com/canonical and https://ex.com/alias",
                None,
                None,
            )
            .await;

        assert_eq!(result.candidates.len(), 1);
        assert_eq!(result.stats.metrics.fetch_canonical_dedupe_skips, 1);
    }

    #[tokio::test]
    async fn context_formatting_includes_rank_and_snippet() {
        let body = "Formatted context body with enough words to produce a full snippet for \
                    the prompt context block. "
            .repeat(8);
        let (shortlist, _fetch) = shortlist_with(vec![page("https://ex.com/a", &body)]);
        let result = shortlist.run("Read https://ex.com/a", None, None).await;

        let context = format_shortlist_context(&result);
        assert!(context.starts_with("1. "));
        assert!(context.contains("URL: https://ex.com/a"));
        assert!(context.contains("Snippet: "));
    }
}
