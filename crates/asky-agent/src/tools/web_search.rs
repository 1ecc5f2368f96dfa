//! Web search: HTTP provider plus the `web_search` tool executor.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use asky_research::shortlist::{SearchHit, SearchProvider};

use crate::registry::{error_payload, ToolExecutor};

/// Brave-style web search API client.
pub struct HttpSearchProvider {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl HttpSearchProvider {
    pub fn new(endpoint: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            api_key: api_key.into(),
        }
    }
}

#[derive(Deserialize)]
struct BraveResponse {
    web: Option<BraveWeb>,
}

#[derive(Deserialize)]
struct BraveWeb {
    results: Vec<BraveResult>,
}

#[derive(Deserialize)]
struct BraveResult {
    url: String,
    title: Option<String>,
    description: Option<String>,
    age: Option<String>,
}

#[async_trait]
impl SearchProvider for HttpSearchProvider {
    async fn search(&self, query: &str, count: usize) -> Result<Vec<SearchHit>, String> {
        let response = self
            .client
            .get(&self.endpoint)
            .query(&[("q", query), ("count", &count.to_string())])
            .header("x-subscription-token", &self.api_key)
            .header("accept", "application/json")
            .send()
            .await
            .map_err(|e| format!("search request failed: {e}"))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(%status, "search API error");
            return Err(format!("search API error ({status}): {body}"));
        }

        let parsed: BraveResponse = response
            .json()
            .await
            .map_err(|e| format!("search parse failed: {e}"))?;

        let hits: Vec<SearchHit> = parsed
            .web
            .map(|w| w.results)
            .unwrap_or_default()
            .into_iter()
            .take(count)
            .map(|r| SearchHit {
                url: r.url,
                title: r.title.unwrap_or_default(),
                snippet: r.description.unwrap_or_default(),
                date: r.age,
            })
            .collect();
        debug!(query, hits = hits.len(), "web search completed");
        Ok(hits)
    }
}

/// `web_search` tool: q + count in, provider-shaped result list out.
pub struct WebSearchTool {
    provider: Arc<dyn SearchProvider>,
    default_count: usize,
}

impl WebSearchTool {
    pub fn new(provider: Arc<dyn SearchProvider>, default_count: usize) -> Self {
        Self { provider, default_count }
    }
}

#[async_trait]
impl ToolExecutor for WebSearchTool {
    async fn execute(&self, args: serde_json::Value) -> serde_json::Value {
        let Some(query) = args.get("q").and_then(|v| v.as_str()).filter(|q| !q.trim().is_empty())
        else {
            return error_payload("Search query 'q' is required.");
        };
        let count = args
            .get("count")
            .and_then(|v| v.as_u64())
            .map(|c| c as usize)
            .unwrap_or(self.default_count);

        match self.provider.search(query, count).await {
            Ok(hits) => {
                let count = hits.len();
                serde_json::json!({
                    "results": hits,
                    "count": count,
                })
            }
            Err(e) => error_payload(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedSearch;

    #[async_trait]
    impl SearchProvider for FixedSearch {
        async fn search(&self, _query: &str, count: usize) -> Result<Vec<SearchHit>, String> {
            Ok((0..count.min(2))
                .map(|i| SearchHit {
                    url: format!("https://ex.com/{i}"),
                    title: format!("Result {i}"),
                    snippet: "snippet".to_string(),
                    date: None,
                })
                .collect())
        }
    }

    #[tokio::test]
    async fn missing_query_is_structured_error() {
        let tool = WebSearchTool::new(Arc::new(FixedSearch), 5);
        let result = tool.execute(serde_json::json!({})).await;
        assert!(result["error"].as_str().unwrap().contains("required"));
    }

    #[tokio::test]
    async fn results_pass_through() {
        let tool = WebSearchTool::new(Arc::new(FixedSearch), 5);
        let result = tool.execute(serde_json::json!({"q": "rust", "count": 2})).await;
        assert_eq!(result["count"], 2);
        assert_eq!(result["results"][0]["url"], "https://ex.com/0");
    }
}
