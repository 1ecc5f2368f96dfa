//! Query expansion for research-mode preloading.

use std::sync::Arc;

use tracing::warn;

use asky_llm::{ChatMessage, ChatRequest, LlmClient};

const EXPANSION_SYSTEM_PROMPT: &str = "Decompose the research question into focused \
sub-queries that together cover it. Return ONLY a JSON array of strings. \
Return [] when the question is already narrow.";

/// Deterministic expansion: split on coordinating connectives and
/// question boundaries. Falls back to the whole query.
pub fn expand_query_deterministic(query: &str, max_sub_queries: usize) -> Vec<String> {
    let mut parts: Vec<String> = Vec::new();
    for question in query.split('?') {
        for part in question.split(" and also ") {
            let cleaned = part.trim().trim_start_matches("and ").trim();
            if cleaned.chars().count() >= 12 {
                parts.push(cleaned.to_string());
            }
        }
    }
    parts.truncate(max_sub_queries.max(1));
    if parts.len() <= 1 {
        return vec![query.trim().to_string()];
    }
    parts
}

/// LLM expansion with deterministic fallback on any failure.
pub async fn expand_query_with_llm(
    llm: &Arc<dyn LlmClient>,
    model: &str,
    query: &str,
    max_sub_queries: usize,
) -> Vec<String> {
    let req = ChatRequest {
        model: model.to_string(),
        messages: vec![
            ChatMessage::system(EXPANSION_SYSTEM_PROMPT),
            ChatMessage::user(query.to_string()),
        ],
        max_tokens: 256,
        temperature: None,
        tools: Vec::new(),
    };

    let response = match llm.send(&req).await {
        Ok(r) => r,
        Err(e) => {
            warn!(error = %e, "query expansion call failed, using deterministic");
            return expand_query_deterministic(query, max_sub_queries);
        }
    };

    let raw = response.content.trim();
    let json_str = match (raw.find('['), raw.rfind(']')) {
        (Some(start), Some(end)) if end >= start => &raw[start..=end],
        _ => raw,
    };
    match serde_json::from_str::<Vec<String>>(json_str) {
        Ok(sub_queries) => {
            let cleaned: Vec<String> = sub_queries
                .into_iter()
                .map(|q| q.trim().to_string())
                .filter(|q| !q.is_empty())
                .take(max_sub_queries.max(1))
                .collect();
            if cleaned.is_empty() {
                vec![query.trim().to_string()]
            } else {
                cleaned
            }
        }
        Err(e) => {
            warn!(error = %e, "query expansion parse failed, using deterministic");
            expand_query_deterministic(query, max_sub_queries)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn narrow_queries_stay_whole() {
        let out = expand_query_deterministic("what is rust ownership", 4);
        assert_eq!(out, vec!["what is rust ownership"]);
    }

    #[test]
    fn compound_questions_split() {
        let out = expand_query_deterministic(
            "how do rust lifetimes work? and also how does the borrow checker verify them",
            4,
        );
        assert_eq!(out.len(), 2);
        assert!(out[0].starts_with("how do rust lifetimes"));
        assert!(out[1].starts_with("how does the borrow checker"));
    }

    #[test]
    fn expansion_respects_cap() {
        let out = expand_query_deterministic(
            "alpha question about storage? beta question about memory? gamma question about disks",
            2,
        );
        assert_eq!(out.len(), 2);
    }
}
