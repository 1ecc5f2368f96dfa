//! User-memory recall and background fact extraction.

use std::sync::Arc;

use tracing::{debug, warn};

use asky_llm::{ChatMessage, ChatRequest, LlmClient};
use asky_research::embeddings::EmbeddingClient;
use asky_research::{cosine_similarity, Embedder};
use asky_store::HistoryStore;

const EXTRACTION_MAX_FACTS: usize = 10;

const EXTRACTION_SYSTEM_PROMPT: &str = concat!(
    "You are a conversation memory extractor. ",
    "Extract durable facts about the USER from the exchange below. ",
    "Focus on: preferences, stated facts, personal instructions, important context. ",
    "Ignore tool outputs and one-off request details. ",
    "Return ONLY a JSON array. Each element must be: ",
    r#"{"content":"brief_fact","category":"fact|preference|instruction|context"}"#,
    " Maximum 10 items. If nothing is worth keeping, return []."
);

/// Recall user memories semantically relevant to the query, rendered as a
/// prompt-context block. Global memories always participate; session
/// memories only for the matching session.
pub async fn recall_memories_for_query(
    store: &Arc<HistoryStore>,
    embedder: &Arc<dyn Embedder>,
    query_text: &str,
    top_k: usize,
    min_similarity: f64,
    session_id: Option<i64>,
) -> Option<String> {
    if query_text.trim().is_empty() || embedder.has_model_load_failure() {
        return None;
    }
    let query_embedding = match embedder.embed_single(query_text).await {
        Ok(v) => v,
        Err(e) => {
            warn!(error = %e, "memory recall embedding failed");
            return None;
        }
    };

    let rows = match store.user_memories_with_embeddings(session_id) {
        Ok(rows) => rows,
        Err(e) => {
            warn!(error = %e, "memory recall read failed");
            return None;
        }
    };

    let mut scored: Vec<(String, f64)> = rows
        .into_iter()
        .map(|(memory, blob)| {
            let embedding = EmbeddingClient::deserialize_embedding(&blob);
            let similarity = cosine_similarity(&query_embedding, &embedding);
            (memory.content, similarity)
        })
        .filter(|(_, similarity)| *similarity >= min_similarity)
        .collect();
    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    scored.truncate(top_k);

    if scored.is_empty() {
        return None;
    }
    debug!(recalled = scored.len(), "user memories recalled");
    let mut block = String::from("Previously saved user memory:");
    for (content, _) in scored {
        block.push_str("\n- ");
        block.push_str(&content);
    }
    Some(block)
}

/// Extracted (content, category) pairs from one turn. Pure parsing lives
/// apart from persistence so it stays unit-testable.
pub fn parse_extracted_facts(raw: &str) -> Vec<(String, String)> {
    // The model may wrap the array in prose or a code fence.
    let trimmed = raw.trim();
    let json_str = match (trimmed.find('['), trimmed.rfind(']')) {
        (Some(start), Some(end)) if end >= start => &trimmed[start..=end],
        _ => trimmed,
    };
    let Ok(values) = serde_json::from_str::<Vec<serde_json::Value>>(json_str) else {
        return Vec::new();
    };
    values
        .into_iter()
        .filter_map(|fact| {
            let content = fact.get("content").and_then(|v| v.as_str())?.trim().to_string();
            if content.is_empty() {
                return None;
            }
            let category = fact
                .get("category")
                .and_then(|v| v.as_str())
                .unwrap_or("fact")
                .to_string();
            Some((content, category))
        })
        .take(EXTRACTION_MAX_FACTS)
        .collect()
}

/// Extract durable facts from a finished turn and persist them with
/// embeddings. Session-scoped when `session_id` is set (elephant mode),
/// global otherwise (trigger phrase). Runs in the background; failures
/// are logged, never surfaced to the turn.
pub async fn extract_and_save_memories_from_turn(
    store: Arc<HistoryStore>,
    embedder: Arc<dyn Embedder>,
    llm: Arc<dyn LlmClient>,
    model: String,
    query: String,
    answer: String,
    session_id: Option<i64>,
) {
    let req = ChatRequest {
        model,
        messages: vec![
            ChatMessage::system(EXTRACTION_SYSTEM_PROMPT),
            ChatMessage::user(format!(
                "Extract facts from this exchange:\n\nUSER: {query}\n\nASSISTANT: {answer}"
            )),
        ],
        max_tokens: 512,
        temperature: None,
        tools: Vec::new(),
    };

    let response = match llm.send(&req).await {
        Ok(r) => r,
        Err(e) => {
            warn!(error = %e, "memory extraction call failed");
            return;
        }
    };

    let facts = parse_extracted_facts(&response.content);
    let mut saved = 0usize;
    for (content, category) in &facts {
        let (embedding, model_name) = if embedder.has_model_load_failure() {
            (None, None)
        } else {
            match embedder.embed_single(content).await {
                Ok(v) => (
                    Some(EmbeddingClient::serialize_embedding(&v)),
                    Some(embedder.model().to_string()),
                ),
                Err(_) => (None, None),
            }
        };
        match store.save_user_memory(
            content,
            Some(category),
            session_id,
            embedding.as_deref(),
            model_name.as_deref(),
        ) {
            Ok(_) => saved += 1,
            Err(e) => warn!(error = %e, "memory save failed"),
        }
    }
    debug!(saved, session_id, "memory extraction completed");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_json_array() {
        let facts = parse_extracted_facts(
            r#"[{"content":"prefers metric units","category":"preference"}]"#,
        );
        assert_eq!(facts.len(), 1);
        assert_eq!(facts[0].0, "prefers metric units");
        assert_eq!(facts[0].1, "preference");
    }

    #[test]
    fn parses_array_wrapped_in_prose() {
        let raw = "Here are the facts:\n```json\n[{\"content\":\"lives in Oslo\"}]\n```";
        let facts = parse_extracted_facts(raw);
        assert_eq!(facts.len(), 1);
        assert_eq!(facts[0].1, "fact");
    }

    #[test]
    fn garbage_and_empty_content_yield_nothing() {
        assert!(parse_extracted_facts("not json at all").is_empty());
        assert!(parse_extracted_facts(r#"[{"content":"  "}]"#).is_empty());
        assert!(parse_extracted_facts("[]").is_empty());
    }
}
