//! Cache, vector, and hybrid-search flows over a real SQLite database.

use std::sync::Arc;

use async_trait::async_trait;

use asky_research::{
    chunker::chunk_text, Embedder, EmbeddingClient, Link, ResearchCache, ResearchError,
    SummaryStatus, VectorStore,
};

/// Deterministic letter-frequency embedder: identical texts embed
/// identically, disjoint texts diverge. No network involved.
struct FrequencyEmbedder {
    failed: bool,
}

fn frequency_vector(text: &str) -> Vec<f32> {
    let mut v = vec![0f32; 26];
    for c in text.to_lowercase().chars() {
        if c.is_ascii_lowercase() {
            v[(c as u8 - b'a') as usize] += 1.0;
        }
    }
    v
}

#[async_trait]
impl Embedder for FrequencyEmbedder {
    fn model(&self) -> &str {
        "test-frequency-model"
    }

    fn has_model_load_failure(&self) -> bool {
        self.failed
    }

    async fn embed(&self, texts: &[String]) -> asky_research::Result<Vec<Vec<f32>>> {
        if self.failed {
            return Err(ResearchError::Embedding("failed model".to_string()));
        }
        Ok(texts.iter().map(|t| frequency_vector(t)).collect())
    }

    async fn embed_single(&self, text: &str) -> asky_research::Result<Vec<f32>> {
        if self.failed {
            return Err(ResearchError::Embedding("failed model".to_string()));
        }
        Ok(frequency_vector(text))
    }
}

fn cache() -> Arc<ResearchCache> {
    Arc::new(ResearchCache::open_in_memory(24).unwrap())
}

fn vector_store(cache: &Arc<ResearchCache>, failed: bool) -> VectorStore {
    VectorStore::new(Arc::clone(cache), Arc::new(FrequencyEmbedder { failed }))
}

fn links(pairs: &[(&str, &str)]) -> Vec<Link> {
    pairs
        .iter()
        .map(|(text, href)| Link { text: text.to_string(), href: href.to_string() })
        .collect()
}

#[tokio::test]
async fn put_and_lookup_roundtrip() {
    let cache = cache();
    let id = cache
        .put(
            "https://ex.com/a",
            "page content",
            "Page A",
            &links(&[("next", "https://ex.com/b")]),
            false,
        )
        .await
        .unwrap();

    let entry = cache.lookup("https://ex.com/a").unwrap().unwrap();
    assert_eq!(entry.id, id);
    assert_eq!(entry.title, "Page A");
    assert_eq!(entry.summary_status, SummaryStatus::Pending);
    assert_eq!(entry.links.len(), 1);

    let by_id = cache.lookup_by_id(id).unwrap().unwrap();
    assert_eq!(by_id.url, "https://ex.com/a");

    assert!(cache.lookup("https://ex.com/other").unwrap().is_none());
}

#[tokio::test]
async fn identical_put_is_idempotent_and_keeps_embeddings() {
    let cache = cache();
    let page_links = links(&[("next", "https://ex.com/b")]);
    let id1 = cache
        .put("https://ex.com/a", "same content", "A", &page_links, false)
        .await
        .unwrap();

    let store = vector_store(&cache, false);
    let chunks = chunk_text("same content");
    store.store_chunk_embeddings(id1, &chunks).await.unwrap();
    assert!(store.has_chunk_embeddings(id1).unwrap());

    let id2 = cache
        .put("https://ex.com/a", "same content", "A", &page_links, false)
        .await
        .unwrap();
    assert_eq!(id1, id2);
    assert!(store.has_chunk_embeddings(id1).unwrap());
}

#[tokio::test]
async fn content_change_purges_chunks_and_resets_summary() {
    let cache = cache();
    let id = cache
        .put("https://ex.com/a", "version one", "A", &[], false)
        .await
        .unwrap();
    cache.save_summary(id, "summary of version one");
    assert_eq!(
        cache.lookup("https://ex.com/a").unwrap().unwrap().summary_status,
        SummaryStatus::Completed
    );

    let store = vector_store(&cache, false);
    store
        .store_chunk_embeddings(id, &chunk_text("version one"))
        .await
        .unwrap();
    assert!(store.has_chunk_embeddings(id).unwrap());

    let id_again = cache
        .put("https://ex.com/a", "version two", "A", &[], false)
        .await
        .unwrap();
    assert_eq!(id, id_again);

    let entry = cache.lookup("https://ex.com/a").unwrap().unwrap();
    assert_eq!(entry.summary_status, SummaryStatus::Pending);
    assert!(entry.summary.is_none());
    assert!(!store.has_chunk_embeddings(id).unwrap());
}

#[tokio::test]
async fn cleanup_expired_removes_entries_and_chunks() {
    let cache = Arc::new(ResearchCache::open_in_memory(-1).unwrap());
    let id = cache
        .put("https://ex.com/old", "stale content", "Old", &[], false)
        .await
        .unwrap();

    // Entries with a negative TTL are born expired: absent to lookups.
    assert!(cache.lookup("https://ex.com/old").unwrap().is_none());

    let deleted = cache.cleanup_expired().unwrap();
    assert_eq!(deleted, 1);
    let _ = id;

    let stats = cache.stats().unwrap();
    assert_eq!(stats.total_entries, 0);
    assert_eq!(stats.total_chunks, 0);
}

#[tokio::test]
async fn hybrid_search_ranks_matching_chunk_first() {
    let cache = cache();
    let id = cache
        .put("https://ex.com/doc", "seed", "Doc", &[], false)
        .await
        .unwrap();

    let store = vector_store(&cache, false);
    let chunks = vec![
        (0i64, "machine learning architecture".to_string()),
        (1i64, "weather and travel notes".to_string()),
    ];
    store.store_chunk_embeddings(id, &chunks).await.unwrap();

    let results = store
        .search_chunks_hybrid(id, "machine learning architecture", 5, 0.5, 0.0)
        .await
        .unwrap();

    assert_eq!(results.len(), 2);
    assert_eq!(results[0].text, "machine learning architecture");
    assert!(results[0].score > 0.0);
    assert!(results[0].dense_score > results[1].dense_score);
    assert!(results[0].lexical_score > results[1].lexical_score);
    assert!(results[1].score >= 0.0);
    // Hybrid blend: w*dense + (1-w)*lexical for the resolved weight.
    let expected = 0.5 * results[0].dense_score + 0.5 * results[0].lexical_score;
    assert!((results[0].score - expected).abs() < 1e-9);
}

#[tokio::test]
async fn hybrid_search_results_sorted_and_truncated() {
    let cache = cache();
    let id = cache
        .put("https://ex.com/doc", "seed", "Doc", &[], false)
        .await
        .unwrap();
    let store = vector_store(&cache, false);
    let chunks: Vec<(i64, String)> = (0..6)
        .map(|i| (i as i64, format!("rust borrow checker notes part {i}")))
        .collect();
    store.store_chunk_embeddings(id, &chunks).await.unwrap();

    let results = store
        .search_chunks_hybrid(id, "rust borrow checker", 3, 0.75, 0.0)
        .await
        .unwrap();
    assert_eq!(results.len(), 3);
    for pair in results.windows(2) {
        assert!(pair[0].score >= pair[1].score);
    }
}

#[tokio::test]
async fn failed_embedder_yields_empty_results_not_errors() {
    let cache = cache();
    let id = cache
        .put("https://ex.com/doc", "content", "Doc", &[], false)
        .await
        .unwrap();
    let store = vector_store(&cache, true);

    assert_eq!(store.store_chunk_embeddings(id, &chunk_text("content")).await.unwrap(), 0);
    assert!(store.search_chunks(id, "query", 5).await.unwrap().is_empty());
    assert!(store
        .search_chunks_hybrid(id, "query", 5, 0.75, 0.0)
        .await
        .unwrap()
        .is_empty());
    assert!(store.search_findings("query", 5, None).await.unwrap().is_empty());
}

#[tokio::test]
async fn link_embeddings_rank_by_query_relevance() {
    let cache = cache();
    let id = cache
        .put(
            "https://ex.com/hub",
            "hub page",
            "Hub",
            &links(&[
                ("rust compiler internals", "https://ex.com/rust"),
                ("gardening tips", "https://ex.com/garden"),
            ]),
            false,
        )
        .await
        .unwrap();

    let store = vector_store(&cache, false);
    let entry = cache.lookup_by_id(id).unwrap().unwrap();
    let stored = store.store_link_embeddings(id, &entry.links).await.unwrap();
    assert_eq!(stored, 2);
    assert!(store.has_link_embeddings(id).unwrap());
    assert!(store
        .has_link_embeddings_for_model(id, "test-frequency-model")
        .unwrap());
    assert!(!store.has_link_embeddings_for_model(id, "other-model").unwrap());

    let ranked = store
        .rank_links_by_relevance(id, "rust compiler internals", 10)
        .await
        .unwrap();
    assert_eq!(ranked.len(), 2);
    assert_eq!(ranked[0].0.href, "https://ex.com/rust");
}

#[tokio::test]
async fn findings_save_embed_search_and_scope() {
    let cache = cache();
    let store = vector_store(&cache, false);

    let global = cache
        .save_finding("rust compiles to native code", Some("https://ex.com"), None, &[], None)
        .unwrap();
    let scoped = cache
        .save_finding(
            "session-only fact about oceans",
            None,
            None,
            &["ocean".to_string()],
            Some("7"),
        )
        .unwrap();

    assert!(store.store_finding_embedding(global, "rust compiles to native code").await.unwrap());
    assert!(store
        .store_finding_embedding(scoped, "session-only fact about oceans")
        .await
        .unwrap());

    let fetched = cache.get_finding(global).unwrap().unwrap();
    assert!(fetched.has_embedding);
    assert_eq!(fetched.embedding_model.as_deref(), Some("test-frequency-model"));
    assert!(cache.get_finding(9999).unwrap().is_none());

    let all = store.search_findings("rust native code", 10, None).await.unwrap();
    assert_eq!(all.len(), 2);
    assert_eq!(all[0].0.id, global);

    let session_only = store.search_findings("oceans", 10, Some("7")).await.unwrap();
    assert_eq!(session_only.len(), 1);
    assert_eq!(session_only[0].0.id, scoped);

    assert_eq!(cache.findings_count().unwrap(), 2);
    assert_eq!(cache.delete_findings_by_session("7").unwrap(), 1);
    assert_eq!(cache.findings_count().unwrap(), 1);
    assert!(cache.delete_finding(global).unwrap());
}

#[test]
fn embedding_blob_roundtrip_is_identity() {
    let vector = vec![1.0f32, -0.5, 3.25, 0.0];
    let blob = EmbeddingClient::serialize_embedding(&vector);
    assert_eq!(EmbeddingClient::deserialize_embedding(&blob), vector);
}
