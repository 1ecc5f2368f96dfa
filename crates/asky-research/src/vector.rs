//! Hybrid lexical+dense search over cached chunks, links, and findings.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::cache::ResearchCache;
use crate::db::{chunk_fts_available, CHUNK_FTS_TABLE};
use crate::embeddings::{Embedder, EmbeddingClient};
use crate::error::Result;
use crate::text::tokenize;
use crate::types::{Finding, Link};

pub const DEFAULT_DENSE_WEIGHT: f64 = 0.75;
const HYBRID_LEXICAL_CANDIDATE_MULTIPLIER: usize = 10;

/// Cosine similarity over equal-length non-zero vectors; anything else is
/// 0.0, never NaN.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.is_empty() || b.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += (*x as f64) * (*y as f64);
        norm_a += (*x as f64) * (*x as f64);
        norm_b += (*y as f64) * (*y as f64);
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Token-overlap lexical score: |query ∩ text| / |query|.
pub fn lexical_overlap_score(query_tokens: &HashSet<String>, text: &str) -> f64 {
    if query_tokens.is_empty() {
        return 0.0;
    }
    let chunk_tokens = tokenize(text);
    if chunk_tokens.is_empty() {
        return 0.0;
    }
    let overlap = query_tokens.intersection(&chunk_tokens).count();
    overlap as f64 / query_tokens.len() as f64
}

/// One hybrid-ranked chunk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredChunk {
    pub chunk_index: i64,
    pub text: String,
    pub score: f64,
    pub dense_score: f64,
    pub lexical_score: f64,
}

/// Semantic search over the research cache's embedding columns.
///
/// Every operation returns an empty result set (never an error) when the
/// relevant entry has no stored embeddings or the embedder carries a
/// sticky failure.
pub struct VectorStore {
    cache: Arc<ResearchCache>,
    embedder: Arc<dyn Embedder>,
}

impl VectorStore {
    pub fn new(cache: Arc<ResearchCache>, embedder: Arc<dyn Embedder>) -> Self {
        Self { cache, embedder }
    }

    pub fn embedder(&self) -> &Arc<dyn Embedder> {
        &self.embedder
    }

    pub fn embedding_model(&self) -> &str {
        self.embedder.model()
    }

    /// Embed and store chunk vectors for a cache entry, replacing any
    /// prior chunks for that entry. Returns the number stored.
    pub async fn store_chunk_embeddings(
        &self,
        cache_id: i64,
        chunks: &[(i64, String)],
    ) -> Result<usize> {
        if chunks.is_empty() || self.embedder.has_model_load_failure() {
            return Ok(0);
        }

        let texts: Vec<String> = chunks.iter().map(|(_, text)| text.clone()).collect();
        let embeddings = match self.embedder.embed(&texts).await {
            Ok(v) => v,
            Err(e) => {
                warn!(cache_id, error = %e, "chunk embedding failed");
                return Ok(0);
            }
        };

        let model = self.embedder.model().to_string();
        let now = chrono::Utc::now().to_rfc3339();
        let stored = self.cache.with_conn(|conn| {
            conn.execute("DELETE FROM content_chunks WHERE cache_id = ?1", [cache_id])?;
            let mut stored = 0usize;
            for ((chunk_index, chunk_text), embedding) in chunks.iter().zip(embeddings.iter()) {
                let blob = EmbeddingClient::serialize_embedding(embedding);
                conn.execute(
                    "INSERT OR REPLACE INTO content_chunks
                     (cache_id, chunk_index, chunk_text, embedding, embedding_model, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    rusqlite::params![cache_id, chunk_index, chunk_text, blob, model, now],
                )?;
                stored += 1;
            }
            Ok(stored)
        })?;

        debug!(cache_id, stored, "stored chunk embeddings");
        Ok(stored)
    }

    pub fn has_chunk_embeddings(&self, cache_id: i64) -> Result<bool> {
        let count: i64 = self.cache.with_conn(|conn| {
            conn.query_row(
                "SELECT COUNT(*) FROM content_chunks
                 WHERE cache_id = ?1 AND embedding IS NOT NULL",
                [cache_id],
                |row| row.get(0),
            )
        })?;
        Ok(count > 0)
    }

    /// Model-aware presence check; a model change makes this return false
    /// so callers re-embed automatically.
    pub fn has_chunk_embeddings_for_model(&self, cache_id: i64, model: &str) -> Result<bool> {
        if model.is_empty() {
            return self.has_chunk_embeddings(cache_id);
        }
        let count: i64 = self.cache.with_conn(|conn| {
            conn.query_row(
                "SELECT COUNT(*) FROM content_chunks
                 WHERE cache_id = ?1 AND embedding IS NOT NULL AND embedding_model = ?2",
                rusqlite::params![cache_id, model],
                |row| row.get(0),
            )
        })?;
        Ok(count > 0)
    }

    /// Dense-only cosine search, sorted descending, truncated to `top_k`.
    pub async fn search_chunks(
        &self,
        cache_id: i64,
        query: &str,
        top_k: usize,
    ) -> Result<Vec<(String, f64)>> {
        if query.trim().is_empty() || self.embedder.has_model_load_failure() {
            return Ok(Vec::new());
        }
        let query_embedding = match self.embedder.embed_single(query).await {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "chunk search embedding failed");
                return Ok(Vec::new());
            }
        };

        let rows: Vec<(String, Vec<u8>)> = self.cache.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT chunk_text, embedding FROM content_chunks
                 WHERE cache_id = ?1 AND embedding IS NOT NULL",
            )?;
            let rows = stmt
                .query_map([cache_id], |row| Ok((row.get(0)?, row.get(1)?)))?
                .filter_map(|r| r.ok())
                .collect();
            Ok(rows)
        })?;

        let mut results: Vec<(String, f64)> = rows
            .into_iter()
            .map(|(text, blob)| {
                let embedding = EmbeddingClient::deserialize_embedding(&blob);
                let similarity = cosine_similarity(&query_embedding, &embedding);
                (text, similarity)
            })
            .collect();
        results.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        results.truncate(top_k);
        Ok(results)
    }

    /// Weighted blend of cosine dense similarity and a lexical score.
    /// BM25 over the chunk FTS index when available, token-overlap
    /// fallback otherwise. Results below `min_score` are discarded.
    pub async fn search_chunks_hybrid(
        &self,
        cache_id: i64,
        query: &str,
        top_k: usize,
        dense_weight: f64,
        min_score: f64,
    ) -> Result<Vec<ScoredChunk>> {
        if query.trim().is_empty() || self.embedder.has_model_load_failure() {
            return Ok(Vec::new());
        }
        let query_embedding = match self.embedder.embed_single(query).await {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "hybrid search embedding failed");
                return Ok(Vec::new());
            }
        };
        let query_tokens = tokenize(query);

        let rows: Vec<(i64, String, Vec<u8>)> = self.cache.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT chunk_index, chunk_text, embedding FROM content_chunks
                 WHERE cache_id = ?1 AND embedding IS NOT NULL",
            )?;
            let rows = stmt
                .query_map([cache_id], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?
                .filter_map(|r| r.ok())
                .collect();
            Ok(rows)
        })?;
        if rows.is_empty() {
            return Ok(Vec::new());
        }

        let dense_weight = dense_weight.clamp(0.0, 1.0);
        let lexical_weight = 1.0 - dense_weight;
        let bm25_limit = (top_k * HYBRID_LEXICAL_CANDIDATE_MULTIPLIER).max(top_k);
        let bm25_scores = self.bm25_scores(cache_id, query, bm25_limit)?;
        let use_bm25 = !bm25_scores.is_empty();

        let mut ranked: Vec<ScoredChunk> = Vec::new();
        for (chunk_index, chunk_text, blob) in rows {
            let embedding = EmbeddingClient::deserialize_embedding(&blob);
            let dense_score = cosine_similarity(&query_embedding, &embedding).max(0.0);
            let lexical_score = if use_bm25 {
                *bm25_scores.get(&chunk_index).unwrap_or(&0.0)
            } else {
                lexical_overlap_score(&query_tokens, &chunk_text)
            };
            let score = dense_weight * dense_score + lexical_weight * lexical_score;
            if score < min_score {
                continue;
            }
            ranked.push(ScoredChunk {
                chunk_index,
                text: chunk_text,
                score,
                dense_score,
                lexical_score,
            });
        }

        ranked.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        ranked.truncate(top_k);
        Ok(ranked)
    }

    /// Normalized BM25 lexical scores keyed by chunk_index. Empty when the
    /// FTS index is missing or no token matches.
    fn bm25_scores(&self, cache_id: i64, query: &str, limit: usize) -> Result<HashMap<i64, f64>> {
        let match_query = build_match_query(query);
        let Some(match_query) = match_query else {
            return Ok(HashMap::new());
        };

        let rows: Vec<(i64, f64)> = self.cache.with_conn(|conn| {
            if !chunk_fts_available(conn) {
                return Ok(Vec::new());
            }
            let sql = format!(
                "SELECT cc.chunk_index, bm25({CHUNK_FTS_TABLE}) AS bm25_score
                 FROM {CHUNK_FTS_TABLE}
                 JOIN content_chunks cc ON cc.id = {CHUNK_FTS_TABLE}.rowid
                 WHERE cc.cache_id = ?1 AND {CHUNK_FTS_TABLE} MATCH ?2
                 ORDER BY bm25_score ASC
                 LIMIT ?3"
            );
            let mut stmt = match conn.prepare(&sql) {
                Ok(s) => s,
                Err(e) => {
                    warn!(error = %e, "BM25 lexical scoring unavailable, falling back");
                    return Ok(Vec::new());
                }
            };
            let result = stmt.query_map(
                rusqlite::params![cache_id, match_query, limit as i64],
                |row| Ok((row.get(0)?, row.get(1)?)),
            );
            match result {
                Ok(rows) => Ok(rows.filter_map(|r| r.ok()).collect()),
                Err(e) => {
                    warn!(error = %e, "BM25 query failed, falling back");
                    Ok(Vec::new())
                }
            }
        })?;

        if rows.is_empty() {
            return Ok(HashMap::new());
        }

        // bm25() is rank-style: lower is better. Min-max normalize across
        // the candidate window so 1.0 is the best match.
        let min = rows.iter().map(|(_, s)| *s).fold(f64::INFINITY, f64::min);
        let max = rows.iter().map(|(_, s)| *s).fold(f64::NEG_INFINITY, f64::max);
        if (max - min).abs() < f64::EPSILON {
            return Ok(rows.into_iter().map(|(i, _)| (i, 1.0)).collect());
        }
        Ok(rows
            .into_iter()
            .map(|(index, score)| {
                let normalized = ((max - score) / (max - min)).clamp(0.0, 1.0);
                (index, normalized)
            })
            .collect())
    }

    // Links.

    /// Embed "label - url" pairs, replacing prior link vectors for the
    /// entry. Returns the number stored.
    pub async fn store_link_embeddings(&self, cache_id: i64, links: &[Link]) -> Result<usize> {
        if links.is_empty() || self.embedder.has_model_load_failure() {
            return Ok(0);
        }

        let mut kept: Vec<&Link> = Vec::new();
        let mut texts: Vec<String> = Vec::new();
        for link in links {
            if link.href.is_empty() {
                continue;
            }
            let combined = format!("{} - {}", link.text, link.href).trim().to_string();
            if combined == "-" {
                continue;
            }
            kept.push(link);
            texts.push(combined);
        }
        if texts.is_empty() {
            return Ok(0);
        }

        let embeddings = match self.embedder.embed(&texts).await {
            Ok(v) => v,
            Err(e) => {
                warn!(cache_id, error = %e, "link embedding failed");
                return Ok(0);
            }
        };

        let model = self.embedder.model().to_string();
        let now = chrono::Utc::now().to_rfc3339();
        let stored = self.cache.with_conn(|conn| {
            conn.execute("DELETE FROM link_embeddings WHERE cache_id = ?1", [cache_id])?;
            let mut stored = 0usize;
            for (link, embedding) in kept.iter().zip(embeddings.iter()) {
                let blob = EmbeddingClient::serialize_embedding(embedding);
                conn.execute(
                    "INSERT OR REPLACE INTO link_embeddings
                     (cache_id, link_text, link_url, embedding, embedding_model, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    rusqlite::params![cache_id, link.text, link.href, blob, model, now],
                )?;
                stored += 1;
            }
            Ok(stored)
        })?;

        debug!(cache_id, stored, "stored link embeddings");
        Ok(stored)
    }

    pub fn has_link_embeddings(&self, cache_id: i64) -> Result<bool> {
        let count: i64 = self.cache.with_conn(|conn| {
            conn.query_row(
                "SELECT COUNT(*) FROM link_embeddings
                 WHERE cache_id = ?1 AND embedding IS NOT NULL",
                [cache_id],
                |row| row.get(0),
            )
        })?;
        Ok(count > 0)
    }

    pub fn has_link_embeddings_for_model(&self, cache_id: i64, model: &str) -> Result<bool> {
        if model.is_empty() {
            return self.has_link_embeddings(cache_id);
        }
        let count: i64 = self.cache.with_conn(|conn| {
            conn.query_row(
                "SELECT COUNT(*) FROM link_embeddings
                 WHERE cache_id = ?1 AND embedding IS NOT NULL AND embedding_model = ?2",
                rusqlite::params![cache_id, model],
                |row| row.get(0),
            )
        })?;
        Ok(count > 0)
    }

    /// Cosine-sorted links for an entry, truncated to `top_k`.
    pub async fn rank_links_by_relevance(
        &self,
        cache_id: i64,
        query: &str,
        top_k: usize,
    ) -> Result<Vec<(Link, f64)>> {
        if query.trim().is_empty() || self.embedder.has_model_load_failure() {
            return Ok(Vec::new());
        }
        let query_embedding = match self.embedder.embed_single(query).await {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "link ranking embedding failed");
                return Ok(Vec::new());
            }
        };

        let rows: Vec<(String, String, Vec<u8>)> = self.cache.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT link_text, link_url, embedding FROM link_embeddings
                 WHERE cache_id = ?1 AND embedding IS NOT NULL",
            )?;
            let rows = stmt
                .query_map([cache_id], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?
                .filter_map(|r| r.ok())
                .collect();
            Ok(rows)
        })?;

        let mut results: Vec<(Link, f64)> = rows
            .into_iter()
            .map(|(text, href, blob)| {
                let embedding = EmbeddingClient::deserialize_embedding(&blob);
                let similarity = cosine_similarity(&query_embedding, &embedding);
                (Link { text, href }, similarity)
            })
            .collect();
        results.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        results.truncate(top_k);
        Ok(results)
    }

    // Findings.

    /// Embed a finding's text and store it on the row. Returns whether the
    /// row existed.
    pub async fn store_finding_embedding(&self, finding_id: i64, finding_text: &str) -> Result<bool> {
        if finding_text.trim().is_empty() || self.embedder.has_model_load_failure() {
            return Ok(false);
        }
        let embedding = match self.embedder.embed_single(finding_text).await {
            Ok(v) => v,
            Err(e) => {
                warn!(finding_id, error = %e, "finding embedding failed");
                return Ok(false);
            }
        };
        let blob = EmbeddingClient::serialize_embedding(&embedding);
        self.cache
            .update_finding_embedding(finding_id, &blob, self.embedder.model())
    }

    /// Cosine search over embedded findings, optionally session-filtered.
    pub async fn search_findings(
        &self,
        query: &str,
        top_k: usize,
        session_id: Option<&str>,
    ) -> Result<Vec<(Finding, f64)>> {
        if query.trim().is_empty() || self.embedder.has_model_load_failure() {
            return Ok(Vec::new());
        }
        let query_embedding = match self.embedder.embed_single(query).await {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "finding search embedding failed");
                return Ok(Vec::new());
            }
        };

        let rows: Vec<(Finding, Vec<u8>)> = self.cache.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, finding_text, source_url, source_title, tags,
                        embedding, embedding_model, created_at, session_id
                 FROM research_findings WHERE embedding IS NOT NULL",
            )?;
            let rows = stmt
                .query_map([], |row| {
                    let tags_json: Option<String> = row.get(4)?;
                    let tags = tags_json
                        .and_then(|t| serde_json::from_str::<Vec<String>>(&t).ok())
                        .unwrap_or_default();
                    Ok((
                        Finding {
                            id: row.get(0)?,
                            finding_text: row.get(1)?,
                            source_url: row.get(2)?,
                            source_title: row.get(3)?,
                            tags,
                            has_embedding: true,
                            embedding_model: row.get(6)?,
                            created_at: row.get(7)?,
                            session_id: row.get(8)?,
                        },
                        row.get::<_, Vec<u8>>(5)?,
                    ))
                })?
                .filter_map(|r| r.ok())
                .collect();
            Ok(rows)
        })?;

        let mut results: Vec<(Finding, f64)> = rows
            .into_iter()
            .filter(|(finding, _)| match session_id {
                Some(sid) => finding.session_id.as_deref() == Some(sid),
                None => true,
            })
            .map(|(finding, blob)| {
                let embedding = EmbeddingClient::deserialize_embedding(&blob);
                let similarity = cosine_similarity(&query_embedding, &embedding);
                (finding, similarity)
            })
            .collect();
        results.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        results.truncate(top_k);
        Ok(results)
    }
}

/// Safe FTS MATCH expression from normalized query tokens.
fn build_match_query(query: &str) -> Option<String> {
    let mut tokens: Vec<String> = tokenize(query).into_iter().collect();
    if tokens.is_empty() {
        return None;
    }
    tokens.sort();
    Some(
        tokens
            .iter()
            .map(|t| format!("\"{t}\""))
            .collect::<Vec<_>>()
            .join(" AND "),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_of_empty_or_mismatched_is_zero() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }

    #[test]
    fn cosine_of_identical_vectors_is_one() {
        let v = [0.5f32, -1.0, 2.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn cosine_of_orthogonal_vectors_is_zero() {
        assert!((cosine_similarity(&[1.0, 0.0], &[0.0, 1.0])).abs() < 1e-9);
    }

    #[test]
    fn lexical_overlap_counts_query_fraction() {
        let query_tokens = tokenize("machine learning architecture");
        let full = lexical_overlap_score(&query_tokens, "machine learning architecture notes");
        let partial = lexical_overlap_score(&query_tokens, "weather and travel notes");
        assert!((full - 1.0).abs() < 1e-9);
        assert_eq!(partial, 0.0);
    }

    #[test]
    fn match_query_quotes_and_joins_tokens() {
        let q = build_match_query("Rust async runtime").unwrap();
        assert!(q.contains("\"rust\""));
        assert!(q.contains(" AND "));
        assert!(build_match_query("  ").is_none());
    }
}
