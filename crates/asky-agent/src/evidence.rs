//! Bootstrap evidence extraction from retrieved chunks.

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::warn;

use asky_llm::{ChatMessage, ChatRequest, LlmClient};

const EVIDENCE_SYSTEM_PROMPT: &str = "Extract factual statements from the provided \
source excerpts that bear on the research question. Return ONLY a JSON array of \
objects: {\"claim\": \"...\", \"source_url\": \"...\", \"confidence\": 0.0-1.0}. \
Skip opinions and boilerplate. Return [] when nothing is relevant.";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidenceFact {
    pub claim: String,
    pub source_url: String,
    pub confidence: f64,
}

/// One retrieved chunk with its provenance.
#[derive(Debug, Clone)]
pub struct EvidenceChunk {
    pub text: String,
    pub source_url: String,
}

/// Extract per-chunk evidence facts with one LLM call. Chunks are deduped
/// by text and capped before prompting.
pub async fn extract_evidence_from_chunks(
    llm: &Arc<dyn LlmClient>,
    model: &str,
    chunks: &[EvidenceChunk],
    query: &str,
    max_chunks: usize,
) -> Vec<EvidenceFact> {
    let mut seen: HashSet<&str> = HashSet::new();
    let unique: Vec<&EvidenceChunk> = chunks
        .iter()
        .filter(|c| seen.insert(c.text.as_str()))
        .take(max_chunks.max(1))
        .collect();
    if unique.is_empty() {
        return Vec::new();
    }

    let mut excerpts = String::new();
    for (index, chunk) in unique.iter().enumerate() {
        excerpts.push_str(&format!(
            "[{}] source: {}\n{}\n\n",
            index + 1,
            chunk.source_url,
            chunk.text
        ));
    }

    let req = ChatRequest {
        model: model.to_string(),
        messages: vec![
            ChatMessage::system(EVIDENCE_SYSTEM_PROMPT),
            ChatMessage::user(format!(
                "Research question: {query}\n\nSource excerpts:\n\n{excerpts}"
            )),
        ],
        max_tokens: 1024,
        temperature: None,
        tools: Vec::new(),
    };

    let response = match llm.send(&req).await {
        Ok(r) => r,
        Err(e) => {
            warn!(error = %e, "evidence extraction call failed");
            return Vec::new();
        }
    };

    parse_evidence(&response.content)
}

fn parse_evidence(raw: &str) -> Vec<EvidenceFact> {
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
            let claim = fact.get("claim").and_then(|v| v.as_str())?.trim().to_string();
            if claim.is_empty() {
                return None;
            }
            Some(EvidenceFact {
                claim,
                source_url: fact
                    .get("source_url")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string(),
                confidence: fact
                    .get("confidence")
                    .and_then(|v| v.as_f64())
                    .unwrap_or(0.5)
                    .clamp(0.0, 1.0),
            })
        })
        .collect()
}

/// Render evidence facts as a prompt-context block.
pub fn format_evidence_context(facts: &[EvidenceFact]) -> Option<String> {
    if facts.is_empty() {
        return None;
    }
    let mut lines = vec!["Evidence extracted from preloaded sources:".to_string()];
    for fact in facts {
        if fact.source_url.is_empty() {
            lines.push(format!("- {}", fact.claim));
        } else {
            lines.push(format!(
                "- {} (source: {}, confidence {:.2})",
                fact.claim, fact.source_url, fact.confidence
            ));
        }
    }
    Some(lines.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_evidence_and_clamps_confidence() {
        let facts = parse_evidence(
            r#"[{"claim":"the cache uses a 24h TTL","source_url":"https://ex.com","confidence":1.7}]"#,
        );
        assert_eq!(facts.len(), 1);
        assert_eq!(facts[0].confidence, 1.0);
    }

    #[test]
    fn empty_claims_are_dropped() {
        assert!(parse_evidence(r#"[{"claim":""}]"#).is_empty());
        assert!(parse_evidence("no json").is_empty());
    }

    #[test]
    fn context_block_renders_sources() {
        let facts = vec![EvidenceFact {
            claim: "x".to_string(),
            source_url: "https://ex.com".to_string(),
            confidence: 0.8,
        }];
        let block = format_evidence_context(&facts).unwrap();
        assert!(block.contains("https://ex.com"));
        assert!(format_evidence_context(&[]).is_none());
    }
}
