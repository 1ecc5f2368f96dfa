//! Dense vector client with deterministic failure caching.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::{ResearchError, Result};

/// Producer of fixed-dimension dense vectors.
///
/// The sticky failure signal lets scoring paths skip all embedding work
/// once the backing model is known to be unusable for this process.
#[async_trait]
pub trait Embedder: Send + Sync {
    fn model(&self) -> &str;
    fn has_model_load_failure(&self) -> bool;
    /// Order-preserving; returns exactly one vector per input.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
    async fn embed_single(&self, text: &str) -> Result<Vec<f32>>;
}

/// HTTP embeddings client for OpenAI-compatible `/v1/embeddings` endpoints.
///
/// Once the endpoint fails in a recognizably permanent way (auth failure,
/// unknown model, refused connection) the failure flag sticks for the
/// process lifetime and every scoring path is expected to skip embedding
/// work. The flag clears only on restart.
pub struct EmbeddingClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    load_failed: AtomicBool,
}

#[derive(Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingRow>,
}

#[derive(Deserialize)]
struct EmbeddingRow {
    index: usize,
    embedding: Vec<f32>,
}

impl EmbeddingClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
            load_failed: AtomicBool::new(false),
        }
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        if self.load_failed.load(Ordering::Relaxed) {
            return Err(ResearchError::Embedding(
                "embedding model previously failed to load".to_string(),
            ));
        }

        let url = format!("{}/v1/embeddings", self.base_url);
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await;

        let response = match response {
            Ok(r) => r,
            Err(e) => {
                if e.is_connect() {
                    self.mark_failed("connection refused");
                }
                return Err(e.into());
            }
        };

        let status = response.status().as_u16();
        if !response.status().is_success() {
            let text = response.text().await.unwrap_or_default();
            // 401/403/404 signal a misconfigured key or unknown model,
            // neither of which recovers without a restart.
            if matches!(status, 401 | 403 | 404) {
                self.mark_failed(&format!("status {status}"));
            }
            return Err(ResearchError::Embedding(format!(
                "embeddings API error ({status}): {text}"
            )));
        }

        let parsed: EmbeddingsResponse = response
            .json()
            .await
            .map_err(|e| ResearchError::Embedding(e.to_string()))?;

        let mut rows = parsed.data;
        rows.sort_by_key(|r| r.index);
        let vectors: Vec<Vec<f32>> = rows.into_iter().map(|r| r.embedding).collect();
        if vectors.len() != texts.len() {
            return Err(ResearchError::Embedding(format!(
                "embedding count mismatch: {} vs {}",
                vectors.len(),
                texts.len()
            )));
        }
        debug!(count = vectors.len(), model = %self.model, "embedded batch");
        Ok(vectors)
    }

    fn mark_failed(&self, reason: &str) {
        if !self.load_failed.swap(true, Ordering::Relaxed) {
            warn!(model = %self.model, reason, "embedding model marked as failed for this process");
        }
    }

    /// Pack a vector as little-endian f32 bytes.
    pub fn serialize_embedding(vector: &[f32]) -> Vec<u8> {
        let mut out = Vec::with_capacity(vector.len() * 4);
        for value in vector {
            out.extend_from_slice(&value.to_le_bytes());
        }
        out
    }

    /// Mirror of `serialize_embedding`; trailing partial floats are dropped.
    pub fn deserialize_embedding(bytes: &[u8]) -> Vec<f32> {
        bytes
            .chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect()
    }
}

#[async_trait]
impl Embedder for EmbeddingClient {
    fn model(&self) -> &str {
        &self.model
    }

    fn has_model_load_failure(&self) -> bool {
        self.load_failed.load(Ordering::Relaxed)
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.embed_batch(texts).await
    }

    async fn embed_single(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed_batch(std::slice::from_ref(&text.to_string())).await?;
        vectors
            .pop()
            .ok_or_else(|| ResearchError::Embedding("empty embedding response".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serialization_roundtrip_is_identity() {
        let vector = vec![0.0_f32, 1.5, -2.25, f32::MIN_POSITIVE, 1e10];
        let bytes = EmbeddingClient::serialize_embedding(&vector);
        assert_eq!(bytes.len(), vector.len() * 4);
        assert_eq!(EmbeddingClient::deserialize_embedding(&bytes), vector);
    }

    #[test]
    fn deserialize_drops_trailing_partial() {
        let mut bytes = EmbeddingClient::serialize_embedding(&[1.0, 2.0]);
        bytes.push(0xFF);
        assert_eq!(EmbeddingClient::deserialize_embedding(&bytes), vec![1.0, 2.0]);
    }

    #[tokio::test]
    async fn sticky_failure_blocks_subsequent_calls() {
        let client = EmbeddingClient::new("http://example.invalid", "k", "m");
        client.mark_failed("test");
        assert!(client.has_model_load_failure());
        let err = client.embed(&["x".to_string()]).await.unwrap_err();
        assert!(matches!(err, ResearchError::Embedding(_)));
    }
}
