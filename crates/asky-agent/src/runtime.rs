//! Process-wide runtime context.
//!
//! Construction is leaf-first to break the tool/summarizer/engine cycle:
//! stores and clients, then the summarizer and vector index, then
//! everything that closes over them. Handles are threaded explicitly;
//! nothing is fetched ambiently.

use std::sync::Arc;

use tracing::info;

use asky_core::{AskyConfig, AskyError, Result};
use asky_hooks::HookRegistry;
use asky_llm::{LlmClient, OpenAiClient, Summarizer};
use asky_research::shortlist::SearchProvider;
use asky_research::{Embedder, EmbeddingClient, ResearchCache, Retriever, VectorStore};
use asky_store::HistoryStore;

use crate::tools::web_search::HttpSearchProvider;

pub struct AskyRuntime {
    pub config: Arc<AskyConfig>,
    pub store: Arc<HistoryStore>,
    pub cache: Arc<ResearchCache>,
    pub embedder: Arc<dyn Embedder>,
    pub vector: Arc<VectorStore>,
    pub llm: Arc<dyn LlmClient>,
    pub summarizer: Arc<Summarizer>,
    pub retriever: Arc<Retriever>,
    pub search: Arc<dyn SearchProvider>,
    pub hooks: Arc<HookRegistry>,
}

impl AskyRuntime {
    /// Build the full runtime from configuration, reading API keys from
    /// the configured environment variables.
    pub fn initialize(config: AskyConfig) -> Result<Self> {
        let api_key = std::env::var(&config.llm.api_key_env).unwrap_or_default();
        let llm: Arc<dyn LlmClient> = Arc::new(OpenAiClient::new(
            api_key,
            Some(config.llm.base_url.clone()),
        ));

        let embed_key = std::env::var(&config.embeddings.api_key_env).unwrap_or_default();
        let embedder: Arc<dyn Embedder> = Arc::new(EmbeddingClient::new(
            config.embeddings.base_url.clone(),
            embed_key,
            config.embeddings.model.clone(),
        ));

        let search_key = std::env::var(&config.search.api_key_env).unwrap_or_default();
        let search: Arc<dyn SearchProvider> = Arc::new(HttpSearchProvider::new(
            config.search.endpoint.clone(),
            search_key,
        ));

        Self::with_components(config, llm, embedder, search)
    }

    /// Dependency-injected construction; tests swap in fake clients here.
    pub fn with_components(
        config: AskyConfig,
        llm: Arc<dyn LlmClient>,
        embedder: Arc<dyn Embedder>,
        search: Arc<dyn SearchProvider>,
    ) -> Result<Self> {
        let store = Arc::new(
            HistoryStore::open(&config.database.path)
                .map_err(|e| AskyError::Database(e.to_string()))?,
        );
        let cache = Arc::new(
            ResearchCache::open(&config.database.path, config.research.cache_ttl_hours)
                .map_err(|e| AskyError::Database(e.to_string()))?,
        );

        let summarization_model = config
            .model(&config.agent.summarization_model)
            .map(|m| m.model.clone())
            .unwrap_or_else(|_| config.agent.summarization_model.clone());
        let summarizer = Arc::new(Summarizer::new(Arc::clone(&llm), summarization_model, 1024));

        cache.start_summarization_workers(
            Arc::clone(&summarizer),
            config.research.summarization_workers,
        );

        let vector = Arc::new(VectorStore::new(Arc::clone(&cache), Arc::clone(&embedder)));
        let retriever = Arc::new(Retriever::new(
            config.fetch.timeout_secs,
            config.fetch.user_agent.clone(),
            config.fetch.max_bytes,
            config.fetch.max_text_chars,
        ));

        info!(db = %config.database.path.display(), "asky runtime initialized");
        Ok(Self {
            config: Arc::new(config),
            store,
            cache,
            embedder,
            vector,
            llm,
            summarizer,
            retriever,
            search,
            hooks: Arc::new(HookRegistry::new()),
        })
    }

    /// Drain background work. Call once before process exit.
    pub async fn shutdown(&self) {
        self.cache.shutdown().await;
    }
}
