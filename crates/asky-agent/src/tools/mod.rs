//! Tool executors for discovery, retrieval, and memory.

pub mod memory_tools;
pub mod research_tools;
pub mod section_tools;
pub mod url_tools;
pub mod web_search;

use std::collections::BTreeMap;

use asky_research::urlutil::{is_local_filesystem_target, sanitize_url};
use asky_research::text::dedupe_preserve_order;

pub const LOCAL_TARGET_UNSUPPORTED_ERROR: &str =
    "Local filesystem targets are not supported by this tool. \
     Use an explicit local-source tool instead.";

/// Pull requested source identifiers out of tool args: `urls` (array or
/// string) wins, then single `url`, then `corpus_urls` when allowed.
pub(crate) fn extract_source_targets(args: &serde_json::Value, allow_corpus_urls: bool) -> Vec<String> {
    let mut urls = string_list(args.get("urls"));
    if let Some(single) = args.get("url").and_then(|v| v.as_str()) {
        if !single.is_empty() {
            urls.push(single.to_string());
        }
    }
    if urls.is_empty() && allow_corpus_urls {
        urls = string_list(args.get("corpus_urls"));
    }
    dedupe_preserve_order(urls.iter().map(|u| sanitize_url(u)).filter(|u| !u.is_empty()))
}

pub(crate) fn string_list(value: Option<&serde_json::Value>) -> Vec<String> {
    match value {
        Some(serde_json::Value::String(s)) if !s.is_empty() => vec![s.clone()],
        Some(serde_json::Value::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string())
            .collect(),
        _ => Vec::new(),
    }
}

/// Separate local filesystem targets from eligible URLs. Rejections are
/// structured per-URL errors, never a whole-call failure.
pub(crate) fn split_local_targets(
    urls: Vec<String>,
) -> (Vec<String>, BTreeMap<String, serde_json::Value>) {
    let mut eligible = Vec::new();
    let mut rejected = BTreeMap::new();
    for url in urls {
        if is_local_filesystem_target(&url) {
            rejected.insert(
                url,
                serde_json::json!({ "error": LOCAL_TARGET_UNSUPPORTED_ERROR }),
            );
        } else {
            eligible.push(url);
        }
    }
    (eligible, rejected)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn targets_from_urls_array_deduped() {
        let args = serde_json::json!({"urls": ["https://a.com", "https://a.com", "https://b.com"]});
        assert_eq!(
            extract_source_targets(&args, false),
            vec!["https://a.com", "https://b.com"]
        );
    }

    #[test]
    fn single_url_appends() {
        let args = serde_json::json!({"url": "https://a.com"});
        assert_eq!(extract_source_targets(&args, false), vec!["https://a.com"]);
    }

    #[test]
    fn corpus_urls_only_when_allowed_and_empty() {
        let args = serde_json::json!({"corpus_urls": ["corpus://cache/3"]});
        assert!(extract_source_targets(&args, false).is_empty());
        assert_eq!(extract_source_targets(&args, true), vec!["corpus://cache/3"]);
    }

    #[test]
    fn local_targets_split_with_structured_errors() {
        let (eligible, rejected) =
            split_local_targets(vec!["https://a.com".into(), "/etc/passwd".into()]);
        assert_eq!(eligible, vec!["https://a.com"]);
        assert_eq!(
            rejected["/etc/passwd"]["error"],
            LOCAL_TARGET_UNSUPPORTED_ERROR
        );
    }
}
