use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::retrieval::FetchedDocument;

/// How a candidate entered the shortlist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    Seed,
    SeedLink,
    Search,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Seed => "seed",
            SourceType::SeedLink => "seed_link",
            SourceType::Search => "search",
        }
    }
}

/// Working record for one candidate source as it moves through
/// collect → fetch → score.
#[derive(Debug, Clone)]
pub struct CandidateRecord {
    pub url: String,
    pub normalized_url: String,
    pub hostname: String,
    pub path_tokens: String,
    pub source_type: SourceType,
    pub title: String,
    pub snippet: String,
    pub text: String,
    pub date: Option<String>,
    pub semantic_score: f64,
    pub final_score: f64,
    pub why_selected: Vec<String>,
}

impl CandidateRecord {
    pub fn new(url: String, normalized_url: String, source_type: SourceType) -> Self {
        let hostname = crate::urlutil::hostname_of(&normalized_url);
        let path_tokens = crate::urlutil::extract_path_tokens(&normalized_url);
        Self {
            url,
            normalized_url,
            hostname,
            path_tokens,
            source_type,
            title: String::new(),
            snippet: String::new(),
            text: String::new(),
            date: None,
            semantic_score: 0.0,
            final_score: 0.0,
            why_selected: Vec::new(),
        }
    }
}

/// One web-search result row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub url: String,
    pub title: String,
    pub snippet: String,
    pub date: Option<String>,
}

/// Search backend used for candidate discovery.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    async fn search(&self, query: &str, count: usize) -> Result<Vec<SearchHit>, String>;
}

/// Content fetcher for candidate pages.
#[async_trait]
pub trait FetchSource: Send + Sync {
    async fn fetch(&self, url: &str) -> FetchedDocument;
}

/// Outbound-link extractor for seed pages.
#[async_trait]
pub trait SeedLinkSource: Send + Sync {
    async fn links(&self, url: &str) -> FetchedDocument;
}

/// Best-effort progress reporting; implementations must not block.
pub trait StatusSink: Send + Sync {
    fn status(&self, message: &str);
}

/// Stage counters surfaced in the shortlist stats payload.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ShortlistMetrics {
    pub search_calls: usize,
    pub search_results: usize,
    pub candidate_inputs: usize,
    pub candidate_deduped: usize,
    pub fetch_calls: usize,
    pub fetch_success: usize,
    pub fetch_short_text_skips: usize,
    pub fetch_failures: usize,
    pub fetch_canonical_dedupe_skips: usize,
    pub seed_link_pages_attempted: usize,
    pub seed_link_pages_success: usize,
    pub seed_link_discovered: usize,
    pub seed_link_added: usize,
    pub seed_link_failures: usize,
    pub embedding_query_calls: usize,
    pub embedding_doc_calls: usize,
    pub embedding_doc_count: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ShortlistTimings {
    pub parse: f64,
    pub collect: f64,
    pub fetch: f64,
    pub score: f64,
    pub total: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ShortlistStats {
    pub metrics: ShortlistMetrics,
    pub timings_ms: ShortlistTimings,
}

/// One selected candidate in rank order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShortlistCandidate {
    pub rank: usize,
    pub final_score: f64,
    pub semantic_score: f64,
    pub url: String,
    pub normalized_url: String,
    pub hostname: String,
    pub title: String,
    pub why_selected: Vec<String>,
    pub snippet: String,
    pub date: Option<String>,
    pub source_type: SourceType,
}

/// Every seed URL's fetch outcome, independent of shortlist selection.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SeedUrlDocument {
    pub url: String,
    pub resolved_url: String,
    pub title: String,
    pub content: String,
    pub error: String,
    pub warning: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceCandidate {
    pub url: String,
    pub normalized_url: String,
    pub source_type: SourceType,
    pub hostname: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectedTrace {
    pub rank: usize,
    pub final_score: f64,
    pub url: String,
    pub normalized_url: String,
    pub source_type: SourceType,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ShortlistTrace {
    pub processed_candidates: Vec<TraceCandidate>,
    pub selected_candidates: Vec<SelectedTrace>,
}

/// Full shortlist output.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ShortlistResult {
    pub enabled: bool,
    pub seed_urls: Vec<String>,
    pub query_text: String,
    pub search_query: String,
    pub search_queries: Vec<String>,
    pub keyphrases: Vec<String>,
    pub candidates: Vec<ShortlistCandidate>,
    pub seed_url_documents: Vec<SeedUrlDocument>,
    pub warnings: Vec<String>,
    pub stats: ShortlistStats,
    pub trace: ShortlistTrace,
}

impl ShortlistResult {
    /// Payload for a turn where every enablement path returned false: no
    /// candidates, no fetches executed.
    pub fn disabled() -> Self {
        Self::default()
    }
}
