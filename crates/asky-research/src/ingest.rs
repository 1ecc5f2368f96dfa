//! Local corpus ingestion: read user-provided files into the research
//! cache and hand back opaque corpus handles instead of raw paths.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::cache::ResearchCache;
use crate::retrieval::Retriever;
use crate::urlutil::format_corpus_handle;

const INGESTIBLE_EXTENSIONS: &[&str] = &["md", "markdown", "txt", "rst", "text"];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestedDocument {
    /// The path the user supplied.
    pub target: String,
    /// Cache row URL (file:// form).
    pub url: String,
    /// Opaque handle safe to show the model.
    pub source_handle: String,
    pub title: String,
    pub content_chars: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LocalIngestionResult {
    pub enabled: bool,
    pub targets: Vec<String>,
    pub ingested: Vec<IngestedDocument>,
    pub warnings: Vec<String>,
}

/// Ingest explicit corpus targets (files or flat directories of text
/// documents). Per-target failures become warnings; the rest proceed.
pub async fn ingest_local_sources(
    cache: &Arc<ResearchCache>,
    retriever: &Retriever,
    targets: &[String],
) -> LocalIngestionResult {
    let mut result = LocalIngestionResult {
        enabled: true,
        targets: targets.to_vec(),
        ..Default::default()
    };

    for target in targets {
        let path = expand_target(target);
        if !path.exists() {
            result.warnings.push(format!("corpus target not found: {target}"));
            continue;
        }

        let files = if path.is_dir() {
            match list_text_files(&path) {
                Ok(files) if files.is_empty() => {
                    result
                        .warnings
                        .push(format!("no ingestible documents under: {target}"));
                    continue;
                }
                Ok(files) => files,
                Err(e) => {
                    result.warnings.push(format!("cannot list {target}: {e}"));
                    continue;
                }
            }
        } else {
            vec![path.clone()]
        };

        for file in files {
            let doc = retriever.fetch_local_document(&file);
            if let Some(error) = doc.error {
                result.warnings.push(format!("{}: {error}", file.display()));
                continue;
            }
            if doc.content.trim().is_empty() {
                result
                    .warnings
                    .push(format!("{}: empty document skipped", file.display()));
                continue;
            }

            match cache
                .put(&doc.final_url, &doc.content, &doc.title, &[], false)
                .await
            {
                Ok(cache_id) => {
                    debug!(target = %file.display(), cache_id, "ingested local document");
                    result.ingested.push(IngestedDocument {
                        target: target.clone(),
                        url: doc.final_url.clone(),
                        source_handle: format_corpus_handle(cache_id),
                        title: doc.title,
                        content_chars: doc.content.chars().count(),
                    });
                }
                Err(e) => {
                    warn!(target = %file.display(), error = %e, "local ingestion cache write failed");
                    result.warnings.push(format!("{}: {e}", file.display()));
                }
            }
        }
    }

    result
}

/// Render ingested documents as a prompt-context block using handles, not
/// filesystem paths.
pub fn format_local_ingestion_context(result: &LocalIngestionResult) -> Option<String> {
    if result.ingested.is_empty() {
        return None;
    }
    let mut lines = vec!["Local corpus documents available for research tools:".to_string()];
    for (index, doc) in result.ingested.iter().enumerate() {
        lines.push(format!(
            "{}. {} ({} chars) — source: {}",
            index + 1,
            doc.title,
            doc.content_chars,
            doc.source_handle
        ));
    }
    Some(lines.join("\n"))
}

fn expand_target(target: &str) -> PathBuf {
    if let Some(stripped) = target.strip_prefix("~/") {
        if let Some(home) = std::env::var_os("HOME") {
            return PathBuf::from(home).join(stripped);
        }
    }
    if let Some(stripped) = target.strip_prefix("file://") {
        return PathBuf::from(stripped);
    }
    PathBuf::from(target)
}

/// Flat (depth-1) listing of ingestible text documents.
fn list_text_files(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.is_file()
                && path
                    .extension()
                    .and_then(|e| e.to_str())
                    .map(|e| INGESTIBLE_EXTENSIONS.contains(&e.to_lowercase().as_str()))
                    .unwrap_or(false)
        })
        .collect();
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn retriever() -> Retriever {
        Retriever::new(5, "test-agent", 1 << 20, 1 << 20)
    }

    #[tokio::test]
    async fn ingests_files_and_directories() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.md"), "# A\n\nalpha content").unwrap();
        std::fs::write(dir.path().join("b.txt"), "beta content").unwrap();
        std::fs::write(dir.path().join("c.bin"), "ignored").unwrap();

        let cache = Arc::new(ResearchCache::open_in_memory(24).unwrap());
        let result = ingest_local_sources(
            &cache,
            &retriever(),
            &[dir.path().to_string_lossy().to_string()],
        )
        .await;

        assert_eq!(result.ingested.len(), 2);
        assert!(result.ingested.iter().all(|d| d.source_handle.starts_with("corpus://cache/")));
        assert!(result.warnings.is_empty());

        let context = format_local_ingestion_context(&result).unwrap();
        assert!(context.contains("corpus://cache/"));
        assert!(!context.contains(&dir.path().to_string_lossy().to_string()));
    }

    #[tokio::test]
    async fn missing_target_becomes_warning() {
        let cache = Arc::new(ResearchCache::open_in_memory(24).unwrap());
        let result =
            ingest_local_sources(&cache, &retriever(), &["/no/such/path.md".to_string()]).await;
        assert!(result.ingested.is_empty());
        assert_eq!(result.warnings.len(), 1);
    }
}
