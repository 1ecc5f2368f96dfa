use std::collections::HashMap;
use std::path::PathBuf;

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{AskyError, Result};

// Estimation constants shared by context budgeting and compaction.
pub const CHARS_PER_TOKEN_ESTIMATE: usize = 4;
pub const DEFAULT_CONTEXT_SIZE: usize = 128_000;
pub const DEFAULT_MAX_TURNS: usize = 25;

/// Top-level runtime config (asky.toml + ASKY_* env overrides).
///
/// Frozen after load: every tunable named in the pipeline specs is a typed
/// field with an explicit default, so callers never reach for raw env vars.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AskyConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub llm: LlmEndpointConfig,
    #[serde(default)]
    pub embeddings: EmbeddingsConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub research: ResearchConfig,
    #[serde(default)]
    pub shortlist: ShortlistConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub query_expansion: QueryExpansionConfig,
    /// Model alias -> model settings. Aliases are what users select;
    /// the `model` field inside is the provider identifier on the wire.
    #[serde(default)]
    pub models: HashMap<String, ModelConfig>,
}

impl AskyConfig {
    /// Load `asky.toml` merged with `ASKY_*` environment overrides.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut figment = Figment::new();
        if let Some(p) = path {
            figment = figment.merge(Toml::file(p));
        } else {
            figment = figment.merge(Toml::file("asky.toml"));
        }
        figment
            .merge(Env::prefixed("ASKY_").split("__"))
            .extract()
            .map_err(|e| AskyError::Config(e.to_string()))
    }

    /// Resolve a model alias, failing fast on unknown aliases.
    pub fn model(&self, alias: &str) -> Result<&ModelConfig> {
        self.models
            .get(alias)
            .ok_or_else(|| AskyError::UnknownModel { alias: alias.to_string() })
    }
}

impl Default for AskyConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            agent: AgentConfig::default(),
            llm: LlmEndpointConfig::default(),
            embeddings: EmbeddingsConfig::default(),
            fetch: FetchConfig::default(),
            search: SearchConfig::default(),
            research: ResearchConfig::default(),
            shortlist: ShortlistConfig::default(),
            memory: MemoryConfig::default(),
            query_expansion: QueryExpansionConfig::default(),
            models: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { path: default_db_path() }
    }
}

/// Per-alias model settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Provider model identifier sent on the wire.
    pub model: String,
    /// Optional per-model endpoint override.
    pub base_url: Option<String>,
    #[serde(default = "default_context_size")]
    pub context_size: usize,
    /// Per-model tool-loop turn cap. Falls back to `agent.max_turns`.
    pub max_turns: Option<usize>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    pub temperature: Option<f64>,
    /// Per-model shortlist override (precedence: request > model > global).
    pub source_shortlist_enabled: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_model_alias")]
    pub default_model: String,
    /// Model alias used for summarization and background extraction.
    #[serde(default = "default_summarization_model")]
    pub summarization_model: String,
    #[serde(default = "default_max_turns")]
    pub max_turns: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            default_model: default_model_alias(),
            summarization_model: default_summarization_model(),
            max_turns: default_max_turns(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmEndpointConfig {
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,
    /// Environment variable holding the API key. The key itself never
    /// lives in config files.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
}

impl Default for LlmEndpointConfig {
    fn default() -> Self {
        Self {
            base_url: default_llm_base_url(),
            api_key_env: default_api_key_env(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingsConfig {
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,
    #[serde(default = "default_embedding_model")]
    pub model: String,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
}

impl Default for EmbeddingsConfig {
    fn default() -> Self {
        Self {
            base_url: default_llm_base_url(),
            model: default_embedding_model(),
            api_key_env: default_api_key_env(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    #[serde(default = "default_fetch_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_fetch_max_bytes")]
    pub max_bytes: usize,
    #[serde(default = "default_fetch_max_text_chars")]
    pub max_text_chars: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_fetch_timeout_secs(),
            user_agent: default_user_agent(),
            max_bytes: default_fetch_max_bytes(),
            max_text_chars: default_fetch_max_text_chars(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Brave-compatible web search endpoint.
    #[serde(default = "default_search_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_search_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_search_result_count")]
    pub default_count: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            endpoint: default_search_endpoint(),
            api_key_env: default_search_api_key_env(),
            default_count: default_search_result_count(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchConfig {
    #[serde(default = "default_cache_ttl_hours")]
    pub cache_ttl_hours: i64,
    #[serde(default = "default_summarization_workers")]
    pub summarization_workers: usize,
    #[serde(default = "default_max_chunks_per_retrieval")]
    pub max_chunks_per_retrieval: usize,
    #[serde(default = "default_max_links_per_url")]
    pub max_links_per_url: usize,
    #[serde(default = "default_max_relevant_links")]
    pub max_relevant_links: usize,
    #[serde(default = "default_memory_max_results")]
    pub memory_max_results: usize,
    #[serde(default = "bool_true")]
    pub evidence_extraction_enabled: bool,
    #[serde(default = "default_evidence_max_chunks")]
    pub evidence_extraction_max_chunks: usize,
}

impl Default for ResearchConfig {
    fn default() -> Self {
        Self {
            cache_ttl_hours: default_cache_ttl_hours(),
            summarization_workers: default_summarization_workers(),
            max_chunks_per_retrieval: default_max_chunks_per_retrieval(),
            max_links_per_url: default_max_links_per_url(),
            max_relevant_links: default_max_relevant_links(),
            memory_max_results: default_memory_max_results(),
            evidence_extraction_enabled: true,
            evidence_extraction_max_chunks: default_evidence_max_chunks(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShortlistConfig {
    #[serde(default = "bool_true")]
    pub enabled: bool,
    #[serde(default = "bool_true")]
    pub enable_research_mode: bool,
    #[serde(default)]
    pub enable_standard_mode: bool,
    #[serde(default = "default_shortlist_top_k")]
    pub top_k: usize,
    #[serde(default = "default_shortlist_max_candidates")]
    pub max_candidates: usize,
    #[serde(default = "default_shortlist_max_fetch_urls")]
    pub max_fetch_urls: usize,
    #[serde(default = "default_shortlist_min_content_chars")]
    pub min_content_chars: usize,
    #[serde(default = "default_shortlist_max_scoring_chars")]
    pub max_scoring_chars: usize,
    #[serde(default = "default_shortlist_snippet_chars")]
    pub snippet_chars: usize,
    #[serde(default = "default_shortlist_doc_lead_chars")]
    pub doc_lead_chars: usize,
    #[serde(default = "default_shortlist_query_fallback_chars")]
    pub query_fallback_chars: usize,
    #[serde(default = "default_keyphrase_top_k")]
    pub keyphrase_top_k: usize,
    #[serde(default = "default_keyphrase_min_query_chars")]
    pub keyphrase_min_query_chars: usize,
    #[serde(default = "default_search_phrase_count")]
    pub search_phrase_count: usize,
    #[serde(default = "default_search_result_count")]
    pub search_result_count: usize,
    #[serde(default)]
    pub search_with_seed_urls: bool,
    #[serde(default = "bool_true")]
    pub seed_link_expansion_enabled: bool,
    #[serde(default = "default_seed_link_max_pages")]
    pub seed_link_max_pages: usize,
    #[serde(default = "default_seed_links_per_page")]
    pub seed_links_per_page: usize,
    #[serde(default = "default_overlap_bonus_weight")]
    pub overlap_bonus_weight: f64,
    #[serde(default = "default_same_domain_bonus")]
    pub same_domain_bonus: f64,
    #[serde(default = "default_short_text_threshold")]
    pub short_text_threshold: usize,
    #[serde(default = "default_short_text_penalty")]
    pub short_text_penalty: f64,
    #[serde(default = "default_noise_path_penalty")]
    pub noise_path_penalty: f64,
}

impl Default for ShortlistConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            enable_research_mode: true,
            enable_standard_mode: false,
            top_k: default_shortlist_top_k(),
            max_candidates: default_shortlist_max_candidates(),
            max_fetch_urls: default_shortlist_max_fetch_urls(),
            min_content_chars: default_shortlist_min_content_chars(),
            max_scoring_chars: default_shortlist_max_scoring_chars(),
            snippet_chars: default_shortlist_snippet_chars(),
            doc_lead_chars: default_shortlist_doc_lead_chars(),
            query_fallback_chars: default_shortlist_query_fallback_chars(),
            keyphrase_top_k: default_keyphrase_top_k(),
            keyphrase_min_query_chars: default_keyphrase_min_query_chars(),
            search_phrase_count: default_search_phrase_count(),
            search_result_count: default_search_result_count(),
            search_with_seed_urls: false,
            seed_link_expansion_enabled: true,
            seed_link_max_pages: default_seed_link_max_pages(),
            seed_links_per_page: default_seed_links_per_page(),
            overlap_bonus_weight: default_overlap_bonus_weight(),
            same_domain_bonus: default_same_domain_bonus(),
            short_text_threshold: default_short_text_threshold(),
            short_text_penalty: default_short_text_penalty(),
            noise_path_penalty: default_noise_path_penalty(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    #[serde(default = "bool_true")]
    pub enabled: bool,
    #[serde(default = "default_memory_recall_top_k")]
    pub recall_top_k: usize,
    #[serde(default = "default_memory_recall_min_similarity")]
    pub recall_min_similarity: f64,
    /// Query prefixes that flag a turn for global fact extraction.
    #[serde(default = "default_global_triggers")]
    pub global_triggers: Vec<String>,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            recall_top_k: default_memory_recall_top_k(),
            recall_min_similarity: default_memory_recall_min_similarity(),
            global_triggers: default_global_triggers(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryExpansionConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_expansion_mode")]
    pub mode: ExpansionMode,
    #[serde(default = "default_max_sub_queries")]
    pub max_sub_queries: usize,
}

impl Default for QueryExpansionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            mode: default_expansion_mode(),
            max_sub_queries: default_max_sub_queries(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpansionMode {
    Deterministic,
    Llm,
}

fn default_max_sub_queries() -> usize {
    3
}
fn default_db_path() -> PathBuf {
    PathBuf::from("asky.db")
}
fn default_context_size() -> usize {
    DEFAULT_CONTEXT_SIZE
}
fn default_max_tokens() -> u32 {
    4096
}
fn default_model_alias() -> String {
    "default".to_string()
}
fn default_summarization_model() -> String {
    "default".to_string()
}
fn default_max_turns() -> usize {
    DEFAULT_MAX_TURNS
}
fn default_llm_base_url() -> String {
    "https://api.openai.com".to_string()
}
fn default_api_key_env() -> String {
    "ASKY_API_KEY".to_string()
}
fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}
fn default_fetch_timeout_secs() -> u64 {
    20
}
fn default_user_agent() -> String {
    "asky/0.3 (+research-assistant)".to_string()
}
fn default_fetch_max_bytes() -> usize {
    5 * 1024 * 1024
}
fn default_fetch_max_text_chars() -> usize {
    250_000
}
fn default_search_endpoint() -> String {
    "https://api.search.brave.com/res/v1/web/search".to_string()
}
fn default_search_api_key_env() -> String {
    "ASKY_SEARCH_API_KEY".to_string()
}
fn default_cache_ttl_hours() -> i64 {
    24
}
fn default_summarization_workers() -> usize {
    2
}
fn default_max_chunks_per_retrieval() -> usize {
    5
}
fn default_max_links_per_url() -> usize {
    30
}
fn default_max_relevant_links() -> usize {
    20
}
fn default_memory_max_results() -> usize {
    10
}
fn default_evidence_max_chunks() -> usize {
    12
}
fn default_shortlist_top_k() -> usize {
    5
}
fn default_shortlist_max_candidates() -> usize {
    24
}
fn default_shortlist_max_fetch_urls() -> usize {
    8
}
fn default_shortlist_min_content_chars() -> usize {
    280
}
fn default_shortlist_max_scoring_chars() -> usize {
    6000
}
fn default_shortlist_snippet_chars() -> usize {
    420
}
fn default_shortlist_doc_lead_chars() -> usize {
    1200
}
fn default_shortlist_query_fallback_chars() -> usize {
    280
}
fn default_keyphrase_top_k() -> usize {
    8
}
fn default_keyphrase_min_query_chars() -> usize {
    12
}
fn default_search_phrase_count() -> usize {
    3
}
fn default_search_result_count() -> usize {
    5
}
fn default_seed_link_max_pages() -> usize {
    2
}
fn default_seed_links_per_page() -> usize {
    6
}
fn default_overlap_bonus_weight() -> f64 {
    0.25
}
fn default_same_domain_bonus() -> f64 {
    0.08
}
fn default_short_text_threshold() -> usize {
    600
}
fn default_short_text_penalty() -> f64 {
    0.12
}
fn default_noise_path_penalty() -> f64 {
    0.15
}
fn default_memory_recall_top_k() -> usize {
    5
}
fn default_memory_recall_min_similarity() -> f64 {
    0.35
}
fn default_global_triggers() -> Vec<String> {
    vec!["remember:".to_string(), "remember that".to_string()]
}
fn default_expansion_mode() -> ExpansionMode {
    ExpansionMode::Deterministic
}
fn bool_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_complete() {
        let cfg = AskyConfig::default();
        assert_eq!(cfg.research.cache_ttl_hours, 24);
        assert!(cfg.shortlist.enable_research_mode);
        assert!(!cfg.shortlist.enable_standard_mode);
        assert_eq!(cfg.agent.max_turns, DEFAULT_MAX_TURNS);
    }

    #[test]
    fn unknown_model_alias_is_an_error() {
        let cfg = AskyConfig::default();
        assert!(cfg.model("nope").is_err());
    }

    #[test]
    fn model_lookup_resolves_alias() {
        let mut cfg = AskyConfig::default();
        cfg.models.insert(
            "fast".into(),
            ModelConfig {
                model: "gpt-4o-mini".into(),
                base_url: None,
                context_size: 64_000,
                max_turns: Some(10),
                max_tokens: 2048,
                temperature: None,
                source_shortlist_enabled: Some(false),
            },
        );
        let m = cfg.model("fast").unwrap();
        assert_eq!(m.model, "gpt-4o-mini");
        assert_eq!(m.source_shortlist_enabled, Some(false));
    }
}
