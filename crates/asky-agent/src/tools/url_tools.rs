//! Page-fetch tools: `get_url_content` and `get_url_details`.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use asky_llm::{Summarizer, SummaryProgress, UsageTracker};
use asky_research::html::OutputFormat;
use asky_research::{ResearchCache, Retriever};

use crate::registry::{error_payload, ToolExecutor};
use crate::tools::{extract_source_targets, split_local_targets};

const ANSWER_SUMMARY_MAX_CHARS: usize = 1600;
const SUMMARIZE_FETCHED_PAGE_PROMPT: &str = "Summarize the fetched page content, \
keeping the facts, figures, and conclusions relevant to a research question.";

/// Per-URL summarization progress observer.
pub trait SummarizationStatus: Send + Sync {
    fn status(&self, message: Option<&str>);
}

/// Fetch one or more URLs, cache each page, optionally summarize with
/// per-URL progress callbacks. Results are keyed by URL.
pub struct GetUrlContentTool {
    retriever: Arc<Retriever>,
    cache: Arc<ResearchCache>,
    summarizer: Arc<Summarizer>,
    summarization_tracker: Arc<UsageTracker>,
    status: Option<Arc<dyn SummarizationStatus>>,
}

impl GetUrlContentTool {
    pub fn new(
        retriever: Arc<Retriever>,
        cache: Arc<ResearchCache>,
        summarizer: Arc<Summarizer>,
        summarization_tracker: Arc<UsageTracker>,
        status: Option<Arc<dyn SummarizationStatus>>,
    ) -> Self {
        Self {
            retriever,
            cache,
            summarizer,
            summarization_tracker,
            status,
        }
    }
}

#[async_trait]
impl ToolExecutor for GetUrlContentTool {
    async fn execute(&self, args: serde_json::Value) -> serde_json::Value {
        let urls = extract_source_targets(&args, false);
        if urls.is_empty() {
            return error_payload("No URLs provided. Specify 'urls' or 'url'.");
        }
        let (urls, rejected) = split_local_targets(urls);
        let summarize = args.get("summarize").and_then(|v| v.as_bool()).unwrap_or(false);

        let mut results = serde_json::Map::new();
        for (url, payload) in rejected {
            results.insert(url, payload);
        }

        let total = urls.len();
        for (index, url) in urls.iter().enumerate() {
            let doc = self
                .retriever
                .fetch_url_document(url, OutputFormat::Markdown, false, 0)
                .await;
            if let Some(error) = doc.error {
                results.insert(url.clone(), error_payload(error));
                continue;
            }

            if let Err(e) = self
                .cache
                .put(url, &doc.content, &doc.title, &[], false)
                .await
            {
                warn!(url, error = %e, "cache write failed for fetched page");
            }

            let mut content = doc.content;
            if summarize && !content.is_empty() {
                let url_label = format!("URL {}/{}", index + 1, total);
                let status = self.status.clone();
                let progress = move |p: SummaryProgress| {
                    if let Some(status) = &status {
                        status.status(Some(&format!(
                            "Summarizer: {url_label} {} {}/{} (in {}, out {}, {}ms)",
                            p.stage, p.call_index, p.call_total, p.input_chars, p.output_chars,
                            p.elapsed_ms
                        )));
                    }
                };
                match self
                    .summarizer
                    .summarize(
                        &content,
                        SUMMARIZE_FETCHED_PAGE_PROMPT,
                        ANSWER_SUMMARY_MAX_CHARS,
                        Some(&self.summarization_tracker),
                        Some(&progress),
                    )
                    .await
                {
                    Ok(summary) => content = format!("Summary of {url}:\n{summary}"),
                    Err(e) => {
                        results.insert(
                            url.clone(),
                            error_payload(format!("summarization failed: {e}")),
                        );
                        continue;
                    }
                }
            }

            results.insert(
                url.clone(),
                serde_json::json!({
                    "title": doc.title,
                    "content": content,
                    "final_url": doc.final_url,
                }),
            );
        }
        if summarize {
            if let Some(status) = &self.status {
                status.status(None);
            }
        }

        serde_json::Value::Object(results)
    }
}

/// One URL → content plus discovered links.
pub struct GetUrlDetailsTool {
    retriever: Arc<Retriever>,
    cache: Arc<ResearchCache>,
    max_links: usize,
}

impl GetUrlDetailsTool {
    pub fn new(retriever: Arc<Retriever>, cache: Arc<ResearchCache>, max_links: usize) -> Self {
        Self { retriever, cache, max_links }
    }
}

#[async_trait]
impl ToolExecutor for GetUrlDetailsTool {
    async fn execute(&self, args: serde_json::Value) -> serde_json::Value {
        let Some(url) = args.get("url").and_then(|v| v.as_str()).filter(|u| !u.is_empty()) else {
            return error_payload("URL is required.");
        };
        let url = asky_research::urlutil::sanitize_url(url);
        if asky_research::urlutil::is_local_filesystem_target(&url) {
            return error_payload(crate::tools::LOCAL_TARGET_UNSUPPORTED_ERROR);
        }

        let doc = self
            .retriever
            .fetch_url_document(&url, OutputFormat::Markdown, true, self.max_links)
            .await;
        if let Some(error) = doc.error {
            return error_payload(error);
        }

        if let Err(e) = self
            .cache
            .put(&url, &doc.content, &doc.title, &doc.links, false)
            .await
        {
            warn!(url, error = %e, "cache write failed for fetched page");
        }

        serde_json::json!({
            "title": doc.title,
            "content": doc.content,
            "links": doc.links,
            "final_url": doc.final_url,
        })
    }
}
