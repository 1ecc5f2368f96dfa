//! History selector parsing and prior-context loading.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use asky_llm::Summarizer;
use asky_store::HistoryStore;

use crate::error::{AgentError, Result};

const SELECTOR_SUMMARY_MAX_CHARS: usize = 600;
const SELECTOR_SUMMARY_PROMPT: &str =
    "Summarize this message from a past conversation in a few sentences.";

fn history_selector_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"__hid_(\d+)$").expect("selector pattern"))
}

/// Resolved context payload from history selector processing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContextResolution {
    pub context_str: String,
    pub resolved_ids: Vec<i64>,
}

/// Parse one selector token: a direct integer or a completion-style
/// `<label>__hid_<id>` token. `~N` relatives are handled by the caller.
pub fn parse_history_selector_token(token: &str) -> Option<i64> {
    let cleaned = token.trim();
    if cleaned.is_empty() {
        return None;
    }
    if let Ok(id) = cleaned.parse::<i64>() {
        return Some(id);
    }
    history_selector_pattern()
        .captures(cleaned)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Resolve a comma-separated selector string (`"4"`, `"~1,~2"`,
/// `"topic__hid_9"`) into interaction ids and load their context.
///
/// When `summarize` is requested, large messages without a stored summary
/// get one generated and back-filled before the context is built.
pub async fn load_context_from_history(
    store: &Arc<HistoryStore>,
    summarizer: Option<&Arc<Summarizer>>,
    continue_ids: &str,
    summarize: bool,
) -> Result<ContextResolution> {
    let mut resolved_ids: Vec<i64> = Vec::new();
    let mut relative_indices: Vec<usize> = Vec::new();

    for raw in continue_ids.split(',') {
        let token = raw.trim();
        if token.is_empty() {
            continue;
        }
        if let Some(rest) = token.strip_prefix('~') {
            let rel: usize = rest.parse().map_err(|_| {
                AgentError::InvalidSelector(format!("Invalid relative ID format: {token}"))
            })?;
            if rel < 1 {
                return Err(AgentError::InvalidSelector(format!(
                    "Relative ID must be >= 1 (got {token})"
                )));
            }
            relative_indices.push(rel);
            continue;
        }
        let id = parse_history_selector_token(token).ok_or_else(|| {
            AgentError::InvalidSelector(
                "Invalid continue IDs format. Use comma-separated IDs, completion selector \
                 tokens, or ~N for relative."
                    .to_string(),
            )
        })?;
        resolved_ids.push(id);
    }

    if !relative_indices.is_empty() {
        let max_depth = *relative_indices.iter().max().expect("non-empty");
        let history = store.get_history(max_depth)?;
        for rel in &relative_indices {
            let index = rel - 1;
            let row = history.get(index).ok_or_else(|| {
                AgentError::InvalidSelector(format!(
                    "Relative ID {rel} is out of range (only {} records available).",
                    history.len()
                ))
            })?;
            resolved_ids.push(row.id);
        }
    }

    let deduped: Vec<i64> = resolved_ids
        .into_iter()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    if deduped.is_empty() {
        return Ok(ContextResolution::default());
    }

    // Lazy summary back-fill for large messages when compact context was
    // requested.
    if summarize {
        if let Some(summarizer) = summarizer {
            for pending in store.pending_context_summaries(&deduped)? {
                match summarizer
                    .summarize(
                        &pending.content,
                        SELECTOR_SUMMARY_PROMPT,
                        SELECTOR_SUMMARY_MAX_CHARS,
                        None,
                        None,
                    )
                    .await
                {
                    Ok(summary) if !summary.is_empty() => {
                        store.backfill_summary(pending.message_id, &summary)?;
                    }
                    _ => {}
                }
            }
        }
    }

    let context_str = store.get_interaction_context(&deduped, !summarize)?;
    Ok(ContextResolution {
        context_str,
        resolved_ids: deduped,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_direct_and_completion_tokens() {
        assert_eq!(parse_history_selector_token("42"), Some(42));
        assert_eq!(parse_history_selector_token("rust intro__hid_7"), Some(7));
        assert_eq!(parse_history_selector_token("garbage"), None);
        assert_eq!(parse_history_selector_token(""), None);
    }

    #[tokio::test]
    async fn selector_expansion_resolves_relative_and_direct() {
        let store = Arc::new(HistoryStore::open_in_memory().unwrap());
        store.save_interaction("a", "A", "m", "", "").unwrap();
        let second = store.save_interaction("b", "B", "m", "", "").unwrap();

        // "~1" is the most recent interaction == direct id of the second.
        let by_relative = load_context_from_history(&store, None, "~1", false)
            .await
            .unwrap();
        assert_eq!(by_relative.resolved_ids, vec![second]);
        assert!(by_relative.context_str.contains("b"));
        assert!(by_relative.context_str.contains("B"));
        assert!(!by_relative.context_str.contains('a'));

        let by_id = load_context_from_history(&store, None, &second.to_string(), false)
            .await
            .unwrap();
        assert_eq!(by_id.context_str, by_relative.context_str);
    }

    #[tokio::test]
    async fn malformed_selectors_are_structured_errors() {
        let store = Arc::new(HistoryStore::open_in_memory().unwrap());
        let err = load_context_from_history(&store, None, "abc", false)
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::InvalidSelector(_)));

        let err = load_context_from_history(&store, None, "~x", false)
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::InvalidSelector(_)));
    }

    #[tokio::test]
    async fn out_of_range_relative_errors() {
        let store = Arc::new(HistoryStore::open_in_memory().unwrap());
        store.save_interaction("a", "A", "m", "", "").unwrap();
        let err = load_context_from_history(&store, None, "~5", false)
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::InvalidSelector(_)));
    }
}
