//! Shared retrieval helper: one fetch shape for web URLs and local files.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::html::{extract_html, OutputFormat};
use crate::text::normalize_whitespace;
use crate::types::Link;

/// Result of fetching one document. Callers never assume success; `error`
/// is set instead of raising.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FetchedDocument {
    pub content: String,
    pub title: String,
    pub links: Vec<Link>,
    pub date: Option<String>,
    pub final_url: String,
    pub warning: Option<String>,
    pub error: Option<String>,
}

impl FetchedDocument {
    fn failed(url: &str, error: impl Into<String>) -> Self {
        Self {
            final_url: url.to_string(),
            error: Some(error.into()),
            ..Default::default()
        }
    }
}

/// HTTP retrieval with strict limits: hard timeout, capped redirects,
/// capped body and text sizes, and a bot-identifying user agent.
pub struct Retriever {
    client: reqwest::Client,
    user_agent: String,
    max_bytes: usize,
    max_text_chars: usize,
}

impl Retriever {
    pub fn new(
        timeout_secs: u64,
        user_agent: impl Into<String>,
        max_bytes: usize,
        max_text_chars: usize,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .unwrap_or_default();
        Self {
            client,
            user_agent: user_agent.into(),
            max_bytes,
            max_text_chars,
        }
    }

    /// Fetch a URL and extract content, title, and (optionally) links.
    pub async fn fetch_url_document(
        &self,
        url: &str,
        format: OutputFormat,
        include_links: bool,
        max_links: usize,
    ) -> FetchedDocument {
        let response = match self
            .client
            .get(url)
            .header("user-agent", &self.user_agent)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => return FetchedDocument::failed(url, format!("fetch failed: {e}")),
        };

        let status = response.status();
        if !status.is_success() {
            return FetchedDocument::failed(url, format!("HTTP {status}"));
        }

        let final_url = response.url().to_string();
        let date = response
            .headers()
            .get("last-modified")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());
        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_lowercase();

        let body = match response.bytes().await {
            Ok(b) => b,
            Err(e) => return FetchedDocument::failed(url, format!("body read failed: {e}")),
        };
        let mut warning = None;
        let body = if body.len() > self.max_bytes {
            warning = Some(format!("body truncated to {} bytes", self.max_bytes));
            &body[..self.max_bytes]
        } else {
            &body[..]
        };
        let raw = String::from_utf8_lossy(body);

        let doc = if content_type.contains("html") || looks_like_html(&raw) {
            let extracted =
                extract_html(&raw, &final_url, format, self.max_text_chars, false);
            let mut links = extracted.links;
            links.truncate(max_links);
            FetchedDocument {
                content: extracted.text,
                title: if extracted.title.is_empty() {
                    derive_title_from_url(&final_url)
                } else {
                    extracted.title
                },
                links: if include_links { links } else { Vec::new() },
                date,
                final_url,
                warning,
                error: None,
            }
        } else {
            // Plain text / markdown payloads pass through with a size cap.
            let mut content = raw.to_string();
            if content.chars().count() > self.max_text_chars {
                content = content.chars().take(self.max_text_chars).collect();
            }
            FetchedDocument {
                content,
                title: derive_title_from_url(&final_url),
                links: Vec::new(),
                date,
                final_url,
                warning,
                error: None,
            }
        };

        debug!(
            url,
            final_url = %doc.final_url,
            content_chars = doc.content.len(),
            links = doc.links.len(),
            "fetched document"
        );
        doc
    }

    /// Seed-page link extraction: fetch and return content links only,
    /// skipping header/nav/footer/aside containers.
    pub async fn fetch_seed_links(&self, url: &str, max_links: usize) -> FetchedDocument {
        let response = match self
            .client
            .get(url)
            .header("user-agent", &self.user_agent)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                return FetchedDocument::failed(url, format!("seed_link_extract_error:{e}"))
            }
        };
        if !response.status().is_success() {
            return FetchedDocument::failed(
                url,
                format!("seed_link_extract_error:HTTP {}", response.status()),
            );
        }
        let final_url = response.url().to_string();
        let body = match response.text().await {
            Ok(b) => b,
            Err(e) => {
                return FetchedDocument::failed(url, format!("seed_link_extract_error:{e}"))
            }
        };
        let extracted = extract_html(&body, &final_url, OutputFormat::Text, self.max_text_chars, true);
        let mut links = extracted.links;
        links.truncate(max_links);
        FetchedDocument {
            content: String::new(),
            title: extracted.title,
            links,
            date: None,
            final_url,
            warning: None,
            error: None,
        }
    }

    /// Local-file ingestion over the same document shape.
    pub fn fetch_local_document(&self, path: &Path) -> FetchedDocument {
        let url = format!("file://{}", path.display());
        let raw = match std::fs::read_to_string(path) {
            Ok(r) => r,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "local read failed");
                return FetchedDocument::failed(&url, format!("read failed: {e}"));
            }
        };
        let mut content = raw;
        let mut warning = None;
        if content.chars().count() > self.max_text_chars {
            content = content.chars().take(self.max_text_chars).collect();
            warning = Some(format!("content truncated to {} chars", self.max_text_chars));
        }
        let title = path
            .file_stem()
            .and_then(|s| s.to_str())
            .map(|s| s.replace(['-', '_'], " "))
            .unwrap_or_else(|| url.clone());
        FetchedDocument {
            content,
            title,
            links: Vec::new(),
            date: None,
            final_url: url,
            warning,
            error: None,
        }
    }
}

fn looks_like_html(raw: &str) -> bool {
    let head = &raw[..raw.len().min(512)];
    let lowered = head.to_lowercase();
    lowered.contains("<html") || lowered.contains("<!doctype html") || lowered.contains("<body")
}

/// Readable fallback title from the URL path.
pub fn derive_title_from_url(url: &str) -> String {
    match url::Url::parse(url) {
        Ok(parsed) => {
            let path_title = parsed
                .path()
                .trim_matches('/')
                .replace(['-', '_'], " ");
            if !path_title.is_empty() {
                normalize_whitespace(&path_title)
            } else {
                parsed.host_str().unwrap_or("").to_string()
            }
        }
        Err(_) => url.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn title_falls_back_to_path_then_host() {
        assert_eq!(
            derive_title_from_url("https://ex.com/some-long_article"),
            "some long article"
        );
        assert_eq!(derive_title_from_url("https://ex.com/"), "ex.com");
    }

    #[test]
    fn html_detection() {
        assert!(looks_like_html("<!DOCTYPE html><html>"));
        assert!(!looks_like_html("plain text body"));
    }

    #[test]
    fn local_fetch_reads_and_titles() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("my-notes_file.md");
        std::fs::write(&path, "# Notes\n\ncontent here").unwrap();

        let retriever = Retriever::new(5, "test-agent", 1024, 1024);
        let doc = retriever.fetch_local_document(&path);
        assert!(doc.error.is_none());
        assert_eq!(doc.title, "my notes file");
        assert!(doc.content.contains("content here"));
        assert!(doc.final_url.starts_with("file://"));
    }

    #[test]
    fn local_fetch_missing_file_sets_error() {
        let retriever = Retriever::new(5, "test-agent", 1024, 1024);
        let doc = retriever.fetch_local_document(Path::new("/definitely/not/here.txt"));
        assert!(doc.error.is_some());
        assert!(doc.content.is_empty());
    }
}
